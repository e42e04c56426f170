//! Core data types shared by the storage backends
//!
//! - **Requests**: [`Options`] carries the optional volume hint of a call
//! - **Results**: [`StoreReceipt`], [`LoadReceipt`]
//! - **Configuration**: [`StorageConfig`], [`Driver`]
//!
//! ## Examples
//!
//! ```rust
//! use tresor::types::StorageConfig;
//!
//! let config = StorageConfig::from_json(r#"{
//!     "name": "archive",
//!     "driver": "sha",
//!     "volumes": [ { "name": "v1", "path": "/data/v1", "zip": true } ]
//! }"#).unwrap();
//!
//! assert_eq!(config.volumes.len(), 1);
//! assert!(config.volumes[0].zip);
//! ```

use crate::error::{Result, TresorError};
use crate::hash::HashAlgorithm;
use crate::volume::VolumeConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// Explicit volume to place a new document on, or to probe first
    pub volume_name: Option<String>,
}

impl Options {
    /// Options targeting one volume
    pub fn on_volume(name: impl Into<String>) -> Self {
        Self {
            volume_name: Some(name.into()),
        }
    }
}

/// Result of a successful store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreReceipt {
    /// Canonical uid the content was stored under
    pub uid: String,
    /// Content digest computed while writing
    pub digest: Vec<u8>,
    /// Bytes written
    pub size: u64,
}

impl StoreReceipt {
    /// Digest as lowercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Result of a successful load
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReceipt {
    /// Filesystem path the content was read from
    pub path: PathBuf,
    /// Content digest computed while reading
    pub digest: Vec<u8>,
    /// Bytes copied into the destination
    pub size: u64,
}

impl LoadReceipt {
    /// Digest as lowercase hex
    pub fn digest_hex(&self) -> String {
        hex::encode(&self.digest)
    }
}

/// Storage backend selector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// Sharded, versioned engine
    #[default]
    Sha,
    /// Flat path engine, uid = relative path
    Fs,
}

/// Configuration of one storage instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Instance name, scopes lock keys and cache entries
    pub name: String,
    /// Backend implementation
    #[serde(default)]
    pub driver: Driver,
    /// Volumes in priority order
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    /// Run a rebuild right after start
    #[serde(default)]
    pub rebuild: bool,
    /// Worker threads used by rebuild
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,
    /// Digest algorithm for stored objects
    #[serde(default)]
    pub hash: HashAlgorithm,
}

fn default_parallel_workers() -> usize {
    num_cpus::get()
}

impl StorageConfig {
    /// Configuration with defaults and no volumes
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: Driver::default(),
            volumes: Vec::new(),
            rebuild: false,
            parallel_workers: default_parallel_workers(),
            hash: HashAlgorithm::default(),
        }
    }

    /// Parse a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: StorageConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Check settings that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(TresorError::InvalidConfiguration(
                "storage name must not be empty".to_string(),
            ));
        }
        if self.parallel_workers == 0 {
            return Err(TresorError::InvalidConfiguration(
                "parallel_workers must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
