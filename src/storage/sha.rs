//! Sharded, versioned document storage
//!
//! Documents are addressed by [`ShaUid`] (`id.version|object`) and laid out by
//! [`build_path`]. Id 0 on store means "allocate a new document"; version 0
//! on store means "append a new version".
//!
//! ## Locking
//!
//! Every call touching a document holds its `STORAGE_UID` lock; directory
//! creation and subtree removal additionally hold the `STORAGE_VOLUME` lock
//! of the affected volume. Rebuild holds the `STORAGE` lock for its whole
//! enumeration.
//!
//! ## Zip tier
//!
//! On volumes flagged `zip`, a version may exist only as an archive. Lookups
//! that miss the live tree of such a volume extract the archive into the
//! engine's scratch volume and serve the object from there.

use super::{prune_empty_parents, Shared, Storage};
use crate::bucket::Bucket;
use crate::error::{Result, TresorError};
use crate::hash::copy_hashed;
use crate::path::{build_path, highest_id};
use crate::types::{LoadReceipt, Options, StoreReceipt};
use crate::uid::ShaUid;
use crate::volume::{Volume, VolumeConfig, VolumeSet, UNZIP};
use dashmap::DashSet;
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tracing::{debug, error, info, instrument, trace, warn, Span};
use zip::ZipArchive;

/// Where `find` resolved an object
#[derive(Debug, Clone)]
struct Located {
    /// Volume the path lives on (the scratch volume for zip-tier hits)
    volume: Arc<Volume>,
    /// Volume new versions of this document are written to
    home: Arc<Volume>,
    path: PathBuf,
}

/// Sharded storage engine
pub struct ShaStorage {
    shared: Shared,
    volumes: VolumeSet,
    scratch: Arc<Volume>,
    // Owns the scratch directory; removed with the engine
    _scratch_dir: TempDir,
    // Archives already unpacked into scratch
    extracted: DashSet<PathBuf>,
    next_id: Mutex<u64>,
}

impl ShaStorage {
    /// Engine with default collaborators over `volumes`
    pub fn open(name: impl Into<String>, volumes: &[VolumeConfig]) -> Result<Self> {
        let mut builder = super::StorageBuilder::new(name);
        for volume in volumes {
            builder = builder.volume(volume.clone());
        }
        builder.build_sha()
    }

    pub(crate) fn with_shared(shared: Shared, volumes: &[VolumeConfig]) -> Result<Self> {
        let scratch_dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", shared.name, UNZIP))
            .tempdir()?;
        let scratch = Arc::new(Volume::scratch(scratch_dir.path()));

        let mut storage = Self {
            shared,
            volumes: VolumeSet::new(),
            scratch,
            _scratch_dir: scratch_dir,
            extracted: DashSet::new(),
            next_id: Mutex::new(0),
        };
        storage.init(volumes)?;
        Ok(storage)
    }

    /// Register every configured volume, in order
    pub fn init(&mut self, volumes: &[VolumeConfig]) -> Result<()> {
        for config in volumes {
            self.add_volume(config)?;
        }
        Ok(())
    }

    /// Register one volume
    ///
    /// The id counter is raised to the highest id already on disk so that
    /// allocation after a restart never collides with existing documents.
    #[instrument(skip(self), fields(storage = %self.shared.name))]
    pub fn add_volume(&mut self, config: &VolumeConfig) -> Result<()> {
        let volume = self.volumes.add(Volume::new(config)?)?;

        if let Some(id) = highest_id(volume.path(), volume.is_flat())? {
            let mut next = self.next_id.lock();
            if id > *next {
                *next = id;
            }
        }

        info!(
            "Registered volume {} at {:?} (flat: {}, zip: {})",
            volume.name(),
            volume.path(),
            volume.is_flat(),
            volume.is_zip()
        );
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

    /// Root of the scratch volume holding extracted zip-tier versions
    pub fn scratch_path(&self) -> &Path {
        self.scratch.path()
    }

    /// Copy `source` into the object named by `uid`
    ///
    /// - id 0: a new document is allocated on the hinted volume, or the next
    ///   volume in turn, with version 1
    /// - id N, version 0: the document must exist; the object goes into a new
    ///   version one past the current one
    /// - id N, version M: the object goes into that exact version
    ///
    /// # Errors
    ///
    /// - [`TresorError::ObjectAlreadyExists`] if the target has content
    /// - [`TresorError::ObjectNotFound`] if document N does not exist
    /// - [`TresorError::NoVolumesDefined`] / [`TresorError::InvalidVolumeName`]
    ///   when no volume can take a new document
    #[instrument(skip(self, source, options), fields(storage = %self.shared.name))]
    pub fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt> {
        let mut uid: ShaUid = uid.parse()?;

        let uid_lock = (uid.id != 0).then(|| self.shared.uid_lock(uid.id));
        let _uid_guard = uid_lock.as_ref().map(|lock| lock.lock());

        let volume = if uid.id != 0 {
            let located = self.find(&uid.document(), options)?;
            if uid.version == 0 {
                uid.version = latest_version(&located.path)?
                    .checked_add(1)
                    .ok_or_else(|| {
                        TresorError::internal(format!("version overflow for document {}", uid.id))
                    })?;
            }
            located.home
        } else {
            let volume = self.volumes.select(options.volume_name.as_deref())?;
            uid.id = self.allocate_id();
            uid.version = 1;
            volume
        };

        let volume_lock = self.shared.volume_lock(volume.name());
        let _volume_guard = volume_lock.lock();

        let path = build_path(volume.path(), &uid, volume.is_flat(), false);
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
            .put(&self.shared.name, &uid.id.to_string(), volume.name());
        debug!("Stored {} on {} ({} bytes)", uid, volume.name(), size);

        Ok(StoreReceipt {
            uid: uid.to_string(),
            digest,
            size,
        })
    }

    /// Copy the object named by `uid` into `dest`
    #[instrument(skip(self, dest, options), fields(storage = %self.shared.name))]
    pub fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt> {
        let uid: ShaUid = uid.parse()?;

        let lock = self.shared.uid_lock(uid.id);
        let _guard = lock.lock();

        let located = self.find(&uid, options)?;
        let mut reader = BufReader::new(File::open(&located.path)?);
        let (digest, size) = copy_hashed(&mut reader, dest, self.shared.algorithm)?;
        trace!("Loaded {} from {} ({} bytes)", uid, located.volume.name(), size);

        Ok(LoadReceipt {
            path: located.path,
            digest,
            size,
        })
    }

    /// Remove an object, a version subtree or a whole document
    ///
    /// Empty parent directories are pruned up to the volume root. The cached
    /// location of the id is forgotten whether or not the removal succeeds.
    #[instrument(skip(self, options), fields(storage = %self.shared.name))]
    pub fn delete(&self, uid: &str, options: &Options) -> Result<()> {
        let uid: ShaUid = uid.parse()?;

        let lock = self.shared.uid_lock(uid.id);
        let _guard = lock.lock();

        let result = self.remove(&uid, options);
        self.shared
            .cache
            .remove(&self.shared.name, &uid.id.to_string());
        result
    }

    fn remove(&self, uid: &ShaUid, options: &Options) -> Result<()> {
        let located = self.find(uid, options)?;

        if located.path.is_file() {
            fs::remove_file(&located.path)?;
            debug!("Deleted object {} on {}", uid, located.volume.name());
            return Ok(());
        }

        let volume_lock = self.shared.volume_lock(located.volume.name());
        let _volume_guard = volume_lock.lock();

        fs::remove_dir_all(&located.path)?;
        prune_empty_parents(&located.path, located.volume.path());
        debug!("Deleted subtree {} on {}", uid, located.volume.name());
        Ok(())
    }

    /// Current version of the document `uid` refers to
    ///
    /// Version and object parts of `uid` are ignored. A document whose only
    /// content is version 1 reports 1.
    #[instrument(skip(self), fields(storage = %self.shared.name))]
    pub fn current_version(&self, uid: &str) -> Result<u32> {
        let uid: ShaUid = uid.parse()?;

        let lock = self.shared.uid_lock(uid.id);
        let _guard = lock.lock();

        let located = self.find(&uid.document(), &Options::default())?;
        latest_version(&located.path)
    }

    /// Rebuild metadata buckets for every document version
    ///
    /// Ids are probed from 1 upward and versions from 1 upward within an id;
    /// a missing version ends the id, a missing version 1 ends the walk. Each
    /// version found is indexed on the worker pool. Failures of a single
    /// version, including unreadable archives while probing, are logged and
    /// skipped. Returns the number of versions scheduled, all of which have
    /// finished when this returns.
    #[instrument(skip(self), fields(storage = %self.shared.name))]
    pub fn rebuild(&self) -> Result<usize> {
        let store_lock = self.shared.storage_lock();
        let _store_guard = store_lock.lock();

        let start = Instant::now();
        let pool = self.shared.rebuild_pool()?;
        info!(
            "Rebuilding {} with {} workers",
            self.shared.name, self.shared.parallel_workers
        );

        // Pool threads log under the rebuild span
        let span = Span::current();
        let count = pool.scope(|scope| {
            let _entered = span.enter();
            let mut count = 0;

            'ids: for id in 1u64.. {
                for version in 1u32.. {
                    let uid = ShaUid::new(id, version, "");
                    match self.probe(&uid) {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {
                            if version == 1 {
                                break 'ids;
                            }
                            break;
                        }
                        Err(e) => {
                            warn!("Skipping {} during rebuild: {}", uid, e);
                            continue;
                        }
                    }

                    count += 1;
                    let task_span = span.clone();
                    scope.spawn(move |_| task_span.in_scope(|| self.rebuild_bucket(&uid)));
                }
            }

            count
        });

        info!(
            "Rebuilt {} documents of {} in {:?}",
            count,
            self.shared.name,
            start.elapsed()
        );
        Ok(count)
    }

    fn probe(&self, uid: &ShaUid) -> Result<()> {
        let lock = self.shared.uid_lock(uid.id);
        let _guard = lock.lock();
        self.find(uid, &Options::default()).map(|_| ())
    }

    fn rebuild_bucket(&self, uid: &ShaUid) {
        let bucket = match self.collect_bucket(uid) {
            Ok(bucket) => bucket,
            Err(e) => {
                warn!("Skipping {} during rebuild: {}", uid, e);
                return;
            }
        };

        if let Err(e) = self.shared.buckets.save_bucket(&bucket) {
            error!("Failed to save bucket {}: {}", uid, e);
        }
    }

    /// Index pages 1, 2, ... of one document version until one is missing
    fn collect_bucket(&self, uid: &ShaUid) -> Result<Bucket> {
        let mut bucket = Bucket::new(uid.to_string());

        for page in 1usize.. {
            let page_uid = uid.page(page);
            let loaded = self.load(&page_uid.to_string(), &mut io::sink(), &Options::default());
            let receipt = match loaded {
                Ok(receipt) => receipt,
                Err(e) if e.is_not_found() => break,
                Err(e) => return Err(e),
            };

            let extraction = self.shared.indexer.index(&receipt.path)?;
            bucket.push_page(
                page_uid.object.clone(),
                extraction.mime_type,
                receipt.size,
                receipt.digest_hex(),
            );
            bucket.merge_extraction(extraction.properties, &extraction.full_text);
        }

        trace!("Collected {} pages for {}", bucket.page_count(), uid);
        Ok(bucket)
    }

    fn allocate_id(&self) -> u64 {
        let mut next = self.next_id.lock();
        *next += 1;
        *next
    }

    /// Resolve the filesystem path of `uid`
    ///
    /// Probe order: the hinted volume, the cached volume of the id, every
    /// other volume in registration order, and finally the scratch volume.
    /// Zip-tier volumes are also searched for an archive of the version. The
    /// caller holds the uid lock.
    fn find(&self, uid: &ShaUid, options: &Options) -> Result<Located> {
        let key = uid.id.to_string();
        let cached = self.shared.cache.get(&self.shared.name, &key);

        let mut order = self
            .volumes
            .probe_order(options.volume_name.as_deref(), cached.as_deref())?;
        if cached.as_deref() == Some(UNZIP) && options.volume_name.is_none() {
            order.insert(0, Arc::clone(&self.scratch));
        } else {
            order.push(Arc::clone(&self.scratch));
        }

        for volume in order {
            let path = build_path(volume.path(), uid, volume.is_flat(), false);
            if path.exists() {
                self.shared.cache.put(&self.shared.name, &key, volume.name());
                let home = if volume.is_scratch() {
                    self.archive_home(uid).unwrap_or_else(|| Arc::clone(&volume))
                } else {
                    Arc::clone(&volume)
                };
                return Ok(Located { volume, home, path });
            }

            if volume.is_zip() {
                if let Some(path) = self.extract(&volume, uid)? {
                    self.shared.cache.put(&self.shared.name, &key, UNZIP);
                    return Ok(Located {
                        volume: Arc::clone(&self.scratch),
                        home: volume,
                        path,
                    });
                }
            }
        }

        Err(TresorError::not_found(uid.to_string()))
    }

    /// Zip-tier volume holding an archive of `uid`'s version
    fn archive_home(&self, uid: &ShaUid) -> Option<Arc<Volume>> {
        self.volumes
            .iter()
            .filter(|v| v.is_zip())
            .find(|v| archive_path(v, uid).is_file())
            .cloned()
    }

    /// Unpack the archive of `uid`'s version from `volume` into scratch
    ///
    /// Returns the scratch path of `uid` if the archive exists and contains
    /// it. Each archive is unpacked at most once per engine, under the scratch
    /// volume lock. A failed unpack removes the version directory it created.
    fn extract(&self, volume: &Volume, uid: &ShaUid) -> Result<Option<PathBuf>> {
        let archive = archive_path(volume, uid);
        if !archive.is_file() {
            return Ok(None);
        }

        let target = build_path(self.scratch.path(), uid, false, false);
        if target.exists() {
            return Ok(Some(target));
        }

        let volume_lock = self.shared.volume_lock(self.scratch.name());
        let _volume_guard = volume_lock.lock();

        if !self.extracted.contains(&archive) {
            let dir = build_path(self.scratch.path(), &uid.without_object(), false, false);
            let mut zip = ZipArchive::new(BufReader::new(File::open(&archive)?))?;

            let existed = dir.exists();
            fs::create_dir_all(&dir)?;
            if let Err(e) = zip.extract(&dir) {
                if !existed {
                    if let Err(cleanup) = fs::remove_dir_all(&dir) {
                        warn!("Failed to clean up {:?}: {}", dir, cleanup);
                    }
                    prune_empty_parents(&dir, self.scratch.path());
                }
                return Err(e.into());
            }

            debug!(
                "Extracted {:?} ({} entries) into {:?}",
                archive,
                zip.len(),
                dir
            );
            self.extracted.insert(archive);
        }

        Ok(target.exists().then_some(target))
    }
}

/// Archive of the version `uid` belongs to on a zip-tier volume
fn archive_path(volume: &Volume, uid: &ShaUid) -> PathBuf {
    build_path(volume.path(), &uid.without_object(), volume.is_flat(), true)
}

/// Highest version stored under a document directory
///
/// Version N > 1 lives in a child directory named `N-1`; names that are not
/// integers are ignored. A document without version directories is at
/// version 1.
fn latest_version(document: &Path) -> Result<u32> {
    let mut highest = 0u32;

    for entry in fs::read_dir(document)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Ok(n) = entry.file_name().to_string_lossy().parse::<u32>() {
            highest = highest.max(n);
        }
    }

    highest
        .checked_add(1)
        .ok_or_else(|| TresorError::internal(format!("version overflow in {:?}", document)))
}

impl Storage for ShaStorage {
    fn name(&self) -> &str {
        ShaStorage::name(self)
    }

    fn store(&self, uid: &str, source: &mut dyn Read, options: &Options) -> Result<StoreReceipt> {
        ShaStorage::store(self, uid, source, options)
    }

    fn load(&self, uid: &str, dest: &mut dyn Write, options: &Options) -> Result<LoadReceipt> {
        ShaStorage::load(self, uid, dest, options)
    }

    fn delete(&self, uid: &str, options: &Options) -> Result<()> {
        ShaStorage::delete(self, uid, options)
    }

    fn current_version(&self, uid: &str) -> Result<u32> {
        ShaStorage::current_version(self, uid)
    }

    fn rebuild(&self) -> Result<usize> {
        ShaStorage::rebuild(self)
    }
}

impl std::fmt::Debug for ShaStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaStorage")
            .field("shared", &self.shared)
            .field("volumes", &self.volumes)
            .field("scratch", &self.scratch.path())
            .field("next_id", &*self.next_id.lock())
            .finish()
    }
}
