//! # Tresor - Versioned document storage
//!
//! A multi-volume document store that keeps binary objects (typically the
//! pages of scanned documents) on local filesystems, organised by numeric
//! document id, version and object name.
//!
//! ## Overview
//!
//! Tresor lets you:
//! - Store a stream under a new or existing document, allocating ids and
//!   versions on demand
//! - Load any object of any version back into a writer, with its content digest
//! - Delete single objects, whole versions or whole documents
//! - Spread documents over several volumes, each sharded into a bounded-fanout
//!   directory tree or kept flat
//! - Serve older versions compacted into zip archives transparently
//! - Rebuild the metadata database from what is actually on disk
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tresor::{Options, Storage, StorageBuilder, VolumeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = StorageBuilder::new("archive")
//!     .volume(VolumeConfig::new("v1", "/data/v1"))
//!     .volume(VolumeConfig::new("v2", "/data/v2"))
//!     .build()?;
//!
//! // Id 0 allocates a new document, version 1
//! let page1 = storage.store("0.0|page.1", &mut &b"first page"[..], &Options::default())?;
//! println!("Stored {} ({})", page1.uid, page1.digest_hex());
//!
//! // Version 0 appends a new version of an existing document
//! let id = page1.uid.split('.').next().unwrap_or_default();
//! storage.store(&format!("{}.0|page.1", id), &mut &b"revised"[..], &Options::default())?;
//! assert_eq!(storage.current_version(&page1.uid)?, 2);
//!
//! let mut content = Vec::new();
//! storage.load(&page1.uid, &mut content, &Options::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! ### UIDs
//!
//! `id.version|object`, e.g. `12.3|page.1`. The object part is a path below
//! the version and may be omitted to address the version (or, with version 0,
//! the document) as a whole.
//!
//! ### Volumes
//!
//! A named root directory. Hierarchical volumes use a four-level shard tree,
//! flat volumes one directory per id. Zip-tier volumes may hold versions as
//! archives, which are unpacked into a private scratch volume on first access.
//!
//! ### Rebuild
//!
//! Walks every document version, hands each page to an
//! [`Indexer`](index::Indexer) and saves the resulting
//! [`Bucket`](bucket::Bucket) into a [`BucketStore`](bucket::BucketStore).
//!
//! ## Concurrency
//!
//! Engines are `Send + Sync` and meant to be shared across threads. Operations
//! on the same document are serialized by named locks from a
//! [`KeyLockRegistry`]; directory mutations on a volume are serialized by the
//! volume's lock. Registries and location caches can be shared between engines
//! through [`StorageBuilder`].
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`] with a [`TresorError`]; match on its
//! named kinds (`ObjectNotFound`, `ObjectAlreadyExists`, ...) or use
//! [`TresorError::is_not_found`].
//!
//! ## Module Organization
//!
//! - [`storage`]: the [`Storage`] trait, both engines and the builder
//! - [`uid`] / [`path`]: uid parsing and the on-disk layout
//! - [`volume`]: volume configuration and registration
//! - [`lock`] / [`cache`]: named locks and the volume-location cache
//! - [`hash`]: digest algorithms and hashing copy
//! - [`index`] / [`bucket`]: rebuild collaborators
//! - [`types`]: options, receipts and configuration
//! - [`error`]: error types and handling

// Public API modules
pub mod bucket;
pub mod cache;
pub mod error;
pub mod hash;
pub mod index;
pub mod lock;
pub mod path;
pub mod storage;
pub mod types;
pub mod uid;
pub mod volume;

// Internal modules (not part of public API)
mod collections;

// Re-export main types for convenience
pub use bucket::{Bucket, BucketStore, JsonBucketStore, MemoryBucketStore};
pub use cache::LocationCache;
pub use error::{Result, TresorError};
pub use hash::HashAlgorithm;
pub use index::{IndexResult, Indexer, SniffIndexer};
pub use lock::{KeyLockRegistry, LockKey};
pub use storage::{Backend, FsStorage, ShaStorage, Storage, StorageBuilder};
pub use types::*;
pub use uid::ShaUid;
pub use volume::{Volume, VolumeConfig, UNZIP};
