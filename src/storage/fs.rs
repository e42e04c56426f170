//! Flat path storage
//!
//! The uid is a relative path and the object lives at `<volume>/<uid>`. There
//! are no ids, no versions and no zip tier; everything else (locking, cache,
//! store-if-empty, hashed copy, pruning delete) matches the sharded engine.

use super::{prune_empty_parents, Shared, Storage};
use crate::bucket::Bucket;
use crate::error::{Result, TresorError};
use crate::hash::copy_hashed;
use crate::types::{LoadReceipt, Options, StoreReceipt};
use crate::volume::{Volume, VolumeConfig, VolumeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, trace, warn, Span};
use walkdir::WalkDir;

/// Relative object path
///
/// `\` and `@` are accepted as separators and normalized to `/`. Absolute
/// paths and `..` components are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FsUid(String);

impl FsUid {
    /// Normalized path, `/`-separated
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location of the object under `root`
    pub fn resolve(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(self.0.split('/'));
        path
    }
}

impl FromStr for FsUid {
    type Err = TresorError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.replace(['\\', '@'], "/");
        let parts: Vec<&str> = normalized
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .collect();

        let escapes = normalized.starts_with('/')
            || parts.iter().any(|part| *part == "..")
            || Path::new(&normalized)
                .components()
                .any(|c| matches!(c, Component::Prefix(_)));
        if parts.is_empty() || escapes {
            return Err(TresorError::InvalidUid(s.to_string()));
        }

        Ok(FsUid(parts.join("/")))
    }
}

impl fmt::Display for FsUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Flat path storage engine
pub struct FsStorage {
    shared: Shared,
    volumes: VolumeSet,
}

impl FsStorage {
    /// Engine with default collaborators over `volumes`
    pub fn open(name: impl Into<String>, volumes: &[VolumeConfig]) -> Result<Self> {
        let mut builder = super::StorageBuilder::new(name);
        for volume in volumes {
            builder = builder.volume(volume.clone());
        }
        builder.build_fs()
    }

    pub(crate) fn with_shared(shared: Shared, volumes: &[VolumeConfig]) -> Result<Self> {
        let mut storage = Self {
            shared,
            volumes: VolumeSet::new(),
        };
        for config in volumes {
            storage.add_volume(config)?;
        }
        Ok(storage)
    }

    /// Register one volume; layout flags are ignored by this engine
    pub fn add_volume(&mut self, config: &VolumeConfig) -> Result<()> {
        let volume = self.volumes.add(Volume::new(config)?)?;
        info!("Registered volume {} at {:?}", volume.name(), volume.path());
        Ok(())
    }

    /// Engine name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Registered volumes, in registration order
    pub fn volumes(&self) -> impl Iterator<Item = &Arc<Volume>> {
        self.volumes.iter()
    }

    /// Registered volume by name
    pub fn volume(&self, name: &str) -> Option<&Arc<Volume>> {
        self.volumes.get(name)
    }

    #[instrument(skip(self, source, options), fields(storage = %self.shared.name))]
    pub fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt> {
        let uid: FsUid = uid.parse()?;

        let uid_lock = self.shared.uid_lock(&uid);
        let _uid_guard = uid_lock.lock();

        let volume = self.volumes.select(options.volume_name.as_deref())?;

        let volume_lock = self.shared.volume_lock(volume.name());
        let _volume_guard = volume_lock.lock();

        let path = uid.resolve(volume.path());
        if let Ok(meta) = fs::metadata(&path) {
            if meta.len() > 0 {
                return Err(TresorError::ObjectAlreadyExists {
                    volume: volume.name().to_string(),
                    uid: uid.to_string(),
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&path)?;
        let (digest, size) = copy_hashed(source, BufWriter::new(file), self.shared.algorithm)?;

        self.shared
            .cache
            .put(&self.shared.name, uid.as_str(), volume.name());
        debug!("Stored {} on {} ({} bytes)", uid, volume.name(), size);

        Ok(StoreReceipt {
            uid: uid.to_string(),
            digest,
            size,
        })
    }

    #[instrument(skip(self, dest, options), fields(storage = %self.shared.name))]
    pub fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt> {
        let uid: FsUid = uid.parse()?;

        let lock = self.shared.uid_lock(&uid);
        let _guard = lock.lock();

        let (volume, path) = self.find(&uid, options)?;
        let mut reader = BufReader::new(File::open(&path)?);
        let (digest, size) = copy_hashed(&mut reader, dest, self.shared.algorithm)?;
        trace!("Loaded {} from {} ({} bytes)", uid, volume.name(), size);

        Ok(LoadReceipt { path, digest, size })
    }

    #[instrument(skip(self, options), fields(storage = %self.shared.name))]
    pub fn delete(&self, uid: &str, options: &Options) -> Result<()> {
        let uid: FsUid = uid.parse()?;

        let lock = self.shared.uid_lock(&uid);
        let _guard = lock.lock();

        let result = self.remove(&uid, options);
        self.shared.cache.remove(&self.shared.name, uid.as_str());
        result
    }

    fn remove(&self, uid: &FsUid, options: &Options) -> Result<()> {
        let (volume, path) = self.find(uid, options)?;

        let volume_lock = self.shared.volume_lock(volume.name());
        let _volume_guard = volume_lock.lock();

        if path.is_file() {
            fs::remove_file(&path)?;
        } else {
            fs::remove_dir_all(&path)?;
        }
        prune_empty_parents(&path, volume.path());
        debug!("Deleted {} on {}", uid, volume.name());
        Ok(())
    }

    /// Always 1 for a valid uid: this engine keeps no versions
    pub fn current_version(&self, uid: &str) -> Result<u32> {
        let _: FsUid = uid.parse()?;
        Ok(1)
    }

    /// Rebuild one bucket per stored file on every volume
    ///
    /// Returns the number of files scheduled, all of which have finished when
    /// this returns.
    #[instrument(skip(self), fields(storage = %self.shared.name))]
    pub fn rebuild(&self) -> Result<usize> {
        let store_lock = self.shared.storage_lock();
        let _store_guard = store_lock.lock();

        let start = Instant::now();
        let pool = self.shared.rebuild_pool()?;

        let span = Span::current();
        let count = pool.scope(|scope| {
            let _entered = span.enter();
            let mut count = 0;

            for volume in self.volumes.iter() {
                for entry in WalkDir::new(volume.path()).sort_by_file_name() {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => {
                            warn!("Skipping unreadable entry on {}: {}", volume.name(), e);
                            continue;
                        }
                    };
                    if !entry.file_type().is_file() {
                        continue;
                    }

                    let Some(uid) = relative_uid(entry.path(), volume.path()) else {
                        warn!("Skipping unaddressable file {:?}", entry.path());
                        continue;
                    };

                    count += 1;
                    let task_span = span.clone();
                    scope.spawn(move |_| task_span.in_scope(|| self.rebuild_bucket(&uid)));
                }
            }

            count
        });

        info!(
            "Rebuilt {} files of {} in {:?}",
            count,
            self.shared.name,
            start.elapsed()
        );
        Ok(count)
    }

    fn rebuild_bucket(&self, uid: &FsUid) {
        let result = self
            .collect_bucket(uid)
            .and_then(|bucket| self.shared.buckets.save_bucket(&bucket));
        if let Err(e) = result {
            error!("Failed to rebuild bucket {}: {}", uid, e);
        }
    }

    fn collect_bucket(&self, uid: &FsUid) -> Result<Bucket> {
        let receipt = self.load(uid.as_str(), &mut io::sink(), &Options::default())?;
        let extraction = self.shared.indexer.index(&receipt.path)?;

        let mut bucket = Bucket::new(uid.to_string());
        bucket.push_page(
            uid.to_string(),
            extraction.mime_type,
            receipt.size,
            receipt.digest_hex(),
        );
        bucket.merge_extraction(extraction.properties, &extraction.full_text);
        Ok(bucket)
    }

    /// Probe the hinted volume, the cached volume, then every other volume
    fn find(&self, uid: &FsUid, options: &Options) -> Result<(Arc<Volume>, PathBuf)> {
        let cached = self.shared.cache.get(&self.shared.name, uid.as_str());
        let order = self
            .volumes
            .probe_order(options.volume_name.as_deref(), cached.as_deref())?;

        for volume in order {
            let path = uid.resolve(volume.path());
            if path.exists() {
                self.shared
                    .cache
                    .put(&self.shared.name, uid.as_str(), volume.name());
                return Ok((volume, path));
            }
        }

        Err(TresorError::not_found(uid.to_string()))
    }
}

/// Uid of a file found under `root`
fn relative_uid(path: &Path, root: &Path) -> Option<FsUid> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_str().map(str::to_string))
        .collect::<Option<_>>()?;
    parts.join("/").parse().ok()
}

impl Storage for FsStorage {
    fn name(&self) -> &str {
        FsStorage::name(self)
    }

    fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt> {
        FsStorage::store(self, uid, source, options)
    }

    fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt> {
        FsStorage::load(self, uid, dest, options)
    }

    fn delete(&self, uid: &str, options: &Options) -> Result<()> {
        FsStorage::delete(self, uid, options)
    }

    fn current_version(&self, uid: &str) -> Result<u32> {
        FsStorage::current_version(self, uid)
    }

    fn rebuild(&self) -> Result<usize> {
        FsStorage::rebuild(self)
    }
}

impl fmt::Debug for FsStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsStorage")
            .field("shared", &self.shared)
            .field("volumes", &self.volumes)
            .finish()
    }
}
