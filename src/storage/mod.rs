//! Storage engines
//!
//! Two interchangeable backends sit behind the [`Storage`] trait:
//!
//! - [`ShaStorage`]: numeric, versioned document ids laid out in a sharded
//!   tree, with an optional zip tier for compacted versions
//! - [`FsStorage`]: the uid is a relative path stored verbatim under a volume
//!
//! Both share the same collaborators: a [`KeyLockRegistry`] and a
//! [`LocationCache`] (process-wide when the same `Arc` is handed to several
//! engines), a content [`Indexer`] and a [`BucketStore`] used by rebuild.
//!
//! ## Example
//!
//! ```rust,no_run
//! use tresor::{Options, Storage, StorageBuilder, VolumeConfig};
//!
//! # fn example() -> tresor::Result<()> {
//! let storage = StorageBuilder::new("archive")
//!     .volume(VolumeConfig::new("v1", "/data/v1"))
//!     .build()?;
//!
//! let receipt = storage.store("0.0|page.1", &mut &b"Hello world!"[..], &Options::default())?;
//! let mut content = Vec::new();
//! storage.load(&receipt.uid, &mut content, &Options::default())?;
//! # Ok(())
//! # }
//! ```

pub mod fs;
pub mod sha;

pub use self::fs::FsStorage;
pub use self::sha::ShaStorage;

use crate::bucket::{BucketStore, MemoryBucketStore};
use crate::cache::LocationCache;
use crate::error::{Result, TresorError};
use crate::hash::HashAlgorithm;
use crate::index::{Indexer, SniffIndexer};
use crate::lock::{KeyLockRegistry, LockKey};
use crate::types::{Driver, LoadReceipt, Options, StorageConfig, StoreReceipt};
use crate::volume::VolumeConfig;
use parking_lot::Mutex;
use rayon::ThreadPool;
use std::fmt;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Operations every storage engine provides
pub trait Storage: Send + Sync {
    /// Engine name, scopes lock keys and cache entries
    fn name(&self) -> &str;

    /// Copy `source` into the object named by `uid`
    ///
    /// Returns the canonical uid actually written (ids and versions may be
    /// assigned by the engine) with the digest and size of the content.
    fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt>;

    /// Copy the object named by `uid` into `dest`
    fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt>;

    /// Remove an object, or a whole document / version subtree
    fn delete(&self, uid: &str, options: &Options) -> Result<()>;

    /// Current (highest) version of the document `uid` refers to
    fn current_version(&self, uid: &str) -> Result<u32>;

    /// Regenerate metadata buckets for every stored document, returning the
    /// number of documents scheduled
    fn rebuild(&self) -> Result<usize>;
}

/// A configured storage engine
#[derive(Debug)]
pub enum Backend {
    /// Sharded, versioned engine
    Sha(ShaStorage),
    /// Flat path engine
    Fs(FsStorage),
}

impl Backend {
    /// Build the engine described by `config` with default collaborators
    pub fn from_config(config: StorageConfig) -> Result<Self> {
        StorageBuilder::from_config(config).build()
    }

    /// Backend kind
    pub fn driver(&self) -> Driver {
        match self {
            Backend::Sha(_) => Driver::Sha,
            Backend::Fs(_) => Driver::Fs,
        }
    }
}

impl Storage for Backend {
    fn name(&self) -> &str {
        match self {
            Backend::Sha(s) => s.name(),
            Backend::Fs(s) => s.name(),
        }
    }

    fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt> {
        match self {
            Backend::Sha(s) => s.store(uid, source, options),
            Backend::Fs(s) => s.store(uid, source, options),
        }
    }

    fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt> {
        match self {
            Backend::Sha(s) => s.load(uid, dest, options),
            Backend::Fs(s) => s.load(uid, dest, options),
        }
    }

    fn delete(&self, uid: &str, options: &Options) -> Result<()> {
        match self {
            Backend::Sha(s) => s.delete(uid, options),
            Backend::Fs(s) => s.delete(uid, options),
        }
    }

    fn current_version(&self, uid: &str) -> Result<u32> {
        match self {
            Backend::Sha(s) => s.current_version(uid),
            Backend::Fs(s) => s.current_version(uid),
        }
    }

    fn rebuild(&self) -> Result<usize> {
        match self {
            Backend::Sha(s) => s.rebuild(),
            Backend::Fs(s) => s.rebuild(),
        }
    }
}

/// Collaborators and settings shared by every engine
pub(crate) struct Shared {
    pub(crate) name: String,
    pub(crate) algorithm: HashAlgorithm,
    pub(crate) parallel_workers: usize,
    pub(crate) locks: Arc<KeyLockRegistry>,
    pub(crate) cache: Arc<LocationCache>,
    pub(crate) indexer: Arc<dyn Indexer>,
    pub(crate) buckets: Arc<dyn BucketStore>,
}

impl Shared {
    /// Mutex guarding `key`; bind the `Arc` before locking
    pub(crate) fn lock(&self, key: LockKey) -> Arc<Mutex<()>> {
        self.locks.get(&key)
    }

    pub(crate) fn uid_lock(&self, id: impl fmt::Display) -> Arc<Mutex<()>> {
        self.lock(LockKey::uid(&self.name, id))
    }

    pub(crate) fn volume_lock(&self, volume: &str) -> Arc<Mutex<()>> {
        self.lock(LockKey::volume(&self.name, volume))
    }

    pub(crate) fn storage_lock(&self) -> Arc<Mutex<()>> {
        self.lock(LockKey::storage(&self.name))
    }

    /// Worker pool bounding rebuild concurrency
    pub(crate) fn rebuild_pool(&self) -> Result<ThreadPool> {
        let name = self.name.clone();
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_workers)
            .thread_name(move |i| format!("{}-rebuild-{}", name, i))
            .build()
            .map_err(|e| TresorError::ThreadPool(e.to_string()))
    }
}

impl fmt::Debug for Shared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("parallel_workers", &self.parallel_workers)
            .finish()
    }
}

/// Builder for storage engines
///
/// Starts from a [`StorageConfig`] (or just a name) and lets callers inject
/// shared collaborators. Anything not injected gets a private default: a fresh
/// lock registry and cache, a [`SniffIndexer`] and a [`MemoryBucketStore`].
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tresor::{HashAlgorithm, KeyLockRegistry, StorageBuilder, VolumeConfig};
///
/// let locks = Arc::new(KeyLockRegistry::new());
/// let storage = StorageBuilder::new("archive")
///     .volume(VolumeConfig::new("v1", "/data/v1"))
///     .volume(VolumeConfig::new("old", "/data/old").zip(true))
///     .hash_algorithm(HashAlgorithm::Sha256)
///     .parallel_workers(4)
///     .lock_registry(locks)
///     .build_sha()
///     .unwrap();
/// ```
pub struct StorageBuilder {
    config: StorageConfig,
    indexer: Option<Arc<dyn Indexer>>,
    buckets: Option<Arc<dyn BucketStore>>,
    locks: Option<Arc<KeyLockRegistry>>,
    cache: Option<Arc<LocationCache>>,
}

impl StorageBuilder {
    /// Builder with default settings and no volumes
    pub fn new(name: impl Into<String>) -> Self {
        Self::from_config(StorageConfig::new(name))
    }

    /// Builder seeded from a configuration
    pub fn from_config(config: StorageConfig) -> Self {
        Self {
            config,
            indexer: None,
            buckets: None,
            locks: None,
            cache: None,
        }
    }

    /// Rename the engine
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Select the backend built by [`build`](Self::build)
    pub fn driver(mut self, driver: Driver) -> Self {
        self.config.driver = driver;
        self
    }

    /// Append a volume; registration order is probe order
    pub fn volume(mut self, volume: VolumeConfig) -> Self {
        self.config.volumes.push(volume);
        self
    }

    /// Worker threads used by rebuild
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.config.parallel_workers = workers;
        self
    }

    /// Digest algorithm of store and load receipts
    pub fn hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.config.hash = algorithm;
        self
    }

    /// Run a rebuild as soon as the engine is built
    pub fn rebuild_on_start(mut self, rebuild: bool) -> Self {
        self.config.rebuild = rebuild;
        self
    }

    /// Content indexer used by rebuild
    pub fn indexer(mut self, indexer: Arc<dyn Indexer>) -> Self {
        self.indexer = Some(indexer);
        self
    }

    /// Metadata database receiving rebuilt buckets
    pub fn bucket_store(mut self, buckets: Arc<dyn BucketStore>) -> Self {
        self.buckets = Some(buckets);
        self
    }

    /// Share a lock registry with other engines
    pub fn lock_registry(mut self, locks: Arc<KeyLockRegistry>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Share a location cache with other engines
    pub fn location_cache(mut self, cache: Arc<LocationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build the backend selected by the configured driver
    pub fn build(self) -> Result<Backend> {
        match self.config.driver {
            Driver::Sha => self.build_sha().map(Backend::Sha),
            Driver::Fs => self.build_fs().map(Backend::Fs),
        }
    }

    /// Build a sharded engine regardless of the configured driver
    pub fn build_sha(self) -> Result<ShaStorage> {
        let (shared, volumes, rebuild) = self.into_parts()?;
        let storage = ShaStorage::with_shared(shared, &volumes)?;
        if rebuild {
            let count = storage.rebuild()?;
            info!("Startup rebuild of {} scheduled {} documents", storage.name(), count);
        }
        Ok(storage)
    }

    /// Build a flat path engine regardless of the configured driver
    pub fn build_fs(self) -> Result<FsStorage> {
        let (shared, volumes, rebuild) = self.into_parts()?;
        let storage = FsStorage::with_shared(shared, &volumes)?;
        if rebuild {
            let count = storage.rebuild()?;
            info!("Startup rebuild of {} scheduled {} documents", storage.name(), count);
        }
        Ok(storage)
    }

    fn into_parts(self) -> Result<(Shared, Vec<VolumeConfig>, bool)> {
        self.config.validate()?;
        let StorageConfig {
            name,
            volumes,
            rebuild,
            parallel_workers,
            hash,
            ..
        } = self.config;

        let shared = Shared {
            name,
            algorithm: hash,
            parallel_workers,
            locks: self.locks.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            indexer: self.indexer.unwrap_or_else(|| Arc::new(SniffIndexer::new())),
            buckets: self
                .buckets
                .unwrap_or_else(|| Arc::new(MemoryBucketStore::new())),
        };

        Ok((shared, volumes, rebuild))
    }
}

impl fmt::Debug for StorageBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBuilder")
            .field("config", &self.config)
            .field("indexer", &self.indexer.is_some())
            .field("buckets", &self.buckets.is_some())
            .field("locks", &self.locks.is_some())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Remove now-empty directories above `path`, stopping at `root`
///
/// Only empty directories are removed, so a concurrent writer that already
/// created a sibling keeps its branch. Failures end the walk silently: a left
/// over empty directory is harmless.
pub(crate) fn prune_empty_parents(path: &Path, root: &Path) {
    let mut current = path.parent();

    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }

        match std::fs::read_dir(dir) {
            Ok(mut entries) => {
                if entries.next().is_some() {
                    break;
                }
            }
            Err(e) => {
                warn!("Failed to inspect {:?} while pruning: {}", dir, e);
                break;
            }
        }

        if let Err(e) = std::fs::remove_dir(dir) {
            debug!("Stopped pruning at {:?}: {}", dir, e);
            break;
        }
        debug!("Pruned empty directory {:?}", dir);
        current = dir.parent();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prune_empty_parents() {
        let root = TempDir::new().unwrap();
        let deep = root.path().join("a/b/c");
        std::fs::create_dir_all(&deep).unwrap();
        std::fs::create_dir_all(root.path().join("a/keep")).unwrap();

        std::fs::remove_dir(&deep).unwrap();
        prune_empty_parents(&deep, root.path());

        assert!(!root.path().join("a/b").exists());
        assert!(root.path().join("a/keep").exists());
        assert!(root.path().exists());
    }

    #[test]
    fn test_prune_never_removes_root() {
        let root = TempDir::new().unwrap();
        let child = root.path().join("only");
        prune_empty_parents(&child, root.path());
        assert!(root.path().exists());
    }

    #[test]
    fn test_builder_rejects_invalid_config() {
        let result = StorageBuilder::new("archive").parallel_workers(0).build();
        assert!(matches!(result, Err(TresorError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_builder_selects_driver() {
        let dir = TempDir::new().unwrap();
        let backend = StorageBuilder::new("flat")
            .driver(Driver::Fs)
            .volume(VolumeConfig::new("v1", dir.path()))
            .build()
            .unwrap();
        assert_eq!(backend.driver(), Driver::Fs);
        assert_eq!(backend.name(), "flat");
    }
}
