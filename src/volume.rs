//! Storage volumes
//!
//! A volume is a named root directory plus two layout flags:
//!
//! - `flat`: documents live directly under `<root>/<id>/` instead of the
//!   four-level shard tree
//! - `zip`: older document versions of this volume may have been compacted
//!   into zip archives next to the live tree; they are unpacked on demand into
//!   the engine's scratch volume
//!
//! The scratch volume is created by the engine itself under the reserved name
//! [`UNZIP`] and can never be configured.

use crate::error::{Result, TresorError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Reserved name of the engine-private decompression volume
pub const UNZIP: &str = "unzip";

/// Volume entry as it appears in the storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Unique volume name
    pub name: String,
    /// Root directory, must exist
    pub path: PathBuf,
    /// Disable hierarchical sharding
    #[serde(default)]
    pub flat: bool,
    /// Older versions are compacted into zip archives
    #[serde(default)]
    pub zip: bool,
}

impl VolumeConfig {
    /// Hierarchical, non-archived volume
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            flat: false,
            zip: false,
        }
    }

    /// Set the flat layout flag
    pub fn flat(mut self, flat: bool) -> Self {
        self.flat = flat;
        self
    }

    /// Set the zip tier flag
    pub fn zip(mut self, zip: bool) -> Self {
        self.zip = zip;
        self
    }
}

/// A registered volume. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    name: String,
    path: PathBuf,
    flat: bool,
    zip: bool,
}

impl Volume {
    /// Validate a configured volume
    ///
    /// # Errors
    ///
    /// - [`TresorError::InvalidVolumeName`] if the name is empty or reserved
    /// - [`TresorError::VolumePathNotFound`] if the root directory is missing
    pub fn new(config: &VolumeConfig) -> Result<Self> {
        if config.name.is_empty() || config.name.eq_ignore_ascii_case(UNZIP) {
            return Err(TresorError::InvalidVolumeName(config.name.clone()));
        }

        let path = clean_path(&config.path);
        if !path.is_dir() {
            return Err(TresorError::VolumePathNotFound {
                volume: config.name.clone(),
                path,
            });
        }

        Ok(Self {
            name: config.name.clone(),
            path,
            flat: config.flat,
            zip: config.zip,
        })
    }

    /// The engine-private scratch volume rooted at `path`
    pub(crate) fn scratch(path: &Path) -> Self {
        Self {
            name: UNZIP.to_string(),
            path: clean_path(path),
            flat: false,
            zip: false,
        }
    }

    /// Volume name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flat layout flag
    pub fn is_flat(&self) -> bool {
        self.flat
    }

    /// Zip tier flag
    pub fn is_zip(&self) -> bool {
        self.zip
    }

    /// Whether this is the scratch volume
    pub fn is_scratch(&self) -> bool {
        self.name == UNZIP
    }
}

/// Registered volumes of one engine, in registration order
///
/// New documents are spread round-robin over the set; lookups walk it in
/// order after the hinted and cached volumes.
#[derive(Debug, Default)]
pub struct VolumeSet {
    volumes: Vec<Arc<Volume>>,
    cursor: AtomicUsize,
}

impl VolumeSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a volume; names are unique (case-insensitive)
    pub fn add(&mut self, volume: Volume) -> Result<Arc<Volume>> {
        if self.get(volume.name()).is_some() {
            return Err(TresorError::InvalidVolumeName(volume.name().to_string()));
        }
        let volume = Arc::new(volume);
        self.volumes.push(Arc::clone(&volume));
        Ok(volume)
    }

    /// Volume by name
    pub fn get(&self, name: &str) -> Option<&Arc<Volume>> {
        self.volumes
            .iter()
            .find(|v| v.name().eq_ignore_ascii_case(name))
    }

    /// Volumes in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Volume>> {
        self.volumes.iter()
    }

    /// Number of volumes
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// Whether no volume is registered
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    /// Volume a new document goes to: the hinted one, else the next in turn
    pub fn select(&self, hint: Option<&str>) -> Result<Arc<Volume>> {
        if let Some(name) = hint {
            return self
                .get(name)
                .cloned()
                .ok_or_else(|| TresorError::InvalidVolumeName(name.to_string()));
        }
        if self.volumes.is_empty() {
            return Err(TresorError::NoVolumesDefined);
        }
        let turn = self.cursor.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::clone(&self.volumes[turn % self.volumes.len()]))
    }

    /// Probe order for a lookup
    ///
    /// The hinted volume comes first and must exist; the preferred (cached)
    /// volume follows if it is still registered; then every other volume in
    /// registration order, each listed once.
    pub fn probe_order(&self, hint: Option<&str>, preferred: Option<&str>) -> Result<Vec<Arc<Volume>>> {
        let mut order: Vec<Arc<Volume>> = Vec::with_capacity(self.volumes.len());

        if let Some(name) = hint {
            let volume = self
                .get(name)
                .ok_or_else(|| TresorError::InvalidVolumeName(name.to_string()))?;
            order.push(Arc::clone(volume));
        }
        if let Some(volume) = preferred.and_then(|name| self.get(name)) {
            if !order.iter().any(|v| Arc::ptr_eq(v, volume)) {
                order.push(Arc::clone(volume));
            }
        }
        for volume in &self.volumes {
            if !order.iter().any(|v| Arc::ptr_eq(v, volume)) {
                order.push(Arc::clone(volume));
            }
        }

        Ok(order)
    }
}

/// Normalize a root path: drop `.` components and trailing separators
pub fn clean_path(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, std::path::Component::CurDir))
        .collect()
}
