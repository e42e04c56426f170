//! Integration tests for Tresor
//!
//! Multi-volume, multi-threaded scenarios exercised through the public API.

use ::tresor::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Write};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;
use tracing::info;
use tresor::hash::hash_data;
use tresor::path::build_path;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Archive over several temporary volumes
pub struct ArchiveHarness {
    pub volumes: Vec<TempDir>,
    pub storage: Arc<ShaStorage>,
    pub buckets: Arc<MemoryBucketStore>,
}

impl ArchiveHarness {
    /// Archive named `name` over `count` hierarchical volumes
    pub fn new(name: &str, count: usize) -> Self {
        let volumes: Vec<TempDir> = (0..count).map(|_| TempDir::new().unwrap()).collect();
        let buckets = Arc::new(MemoryBucketStore::new());

        let mut builder = StorageBuilder::new(name)
            .parallel_workers(4)
            .bucket_store(buckets.clone());
        for (i, dir) in volumes.iter().enumerate() {
            builder = builder.volume(VolumeConfig::new(format!("v{}", i + 1), dir.path()));
        }

        Self {
            volumes,
            storage: Arc::new(builder.build_sha().unwrap()),
            buckets,
        }
    }

    pub fn store(&self, uid: &str, content: &[u8]) -> StoreReceipt {
        self.storage
            .store(uid, &mut &content[..], &Options::default())
            .unwrap()
    }

    pub fn load(&self, uid: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.storage.load(uid, &mut out, &Options::default())?;
        Ok(out)
    }
}

/// Deterministic page content
pub struct ContentGenerator {
    rng: StdRng,
}

impl ContentGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Text-like content of a random size
    pub fn text(&mut self, size_range: std::ops::Range<usize>) -> Vec<u8> {
        let size = self.rng.random_range(size_range);
        let words = ["invoice", "total", "date", "page", "scan", "signed", "lorem", "ipsum"];
        let mut content = Vec::with_capacity(size);
        while content.len() < size {
            content.extend_from_slice(words[self.rng.random_range(0..words.len())].as_bytes());
            content.push(b' ');
        }
        content.truncate(size);
        content
    }

    /// Random binary content
    pub fn binary(&mut self, size: usize) -> Vec<u8> {
        let mut content = vec![0u8; size];
        self.rng.fill(&mut content[..]);
        content
    }
}

fn id_of(uid: &str) -> u64 {
    uid.parse::<ShaUid>().unwrap().id
}

#[test]
fn test_concurrent_store_load_delete() {
    let harness = Arc::new(ArchiveHarness::new("concurrent", 3));
    let threads = 8;
    let docs_per_thread = 12;
    let pages = 3;

    // Store: every thread creates its own documents
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let harness = Arc::clone(&harness);
            thread::spawn(move || {
                let mut generator = ContentGenerator::new(t as u64);
                let mut stored = BTreeMap::new();
                for _ in 0..docs_per_thread {
                    let first = generator.text(16..256);
                    let receipt = harness.store("0.0|page.1", &first);
                    let id = id_of(&receipt.uid);
                    stored.insert(format!("{}.1|page.1", id), first);

                    for page in 2..=pages {
                        let uid = format!("{}.1|page.{}", id, page);
                        let content = generator.binary(64 + page * 10);
                        harness.store(&uid, &content);
                        stored.insert(uid, content);
                    }
                }
                stored
            })
        })
        .collect();

    let mut all = BTreeMap::new();
    for handle in handles {
        all.extend(handle.join().unwrap());
    }
    assert_eq!(all.len(), threads * docs_per_thread * pages);

    // Allocated ids are unique and dense
    let ids: std::collections::BTreeSet<u64> = all.keys().map(|uid| id_of(uid)).collect();
    assert_eq!(ids.len(), threads * docs_per_thread);
    assert_eq!(ids.iter().copied().max(), Some((threads * docs_per_thread) as u64));

    // Every volume received documents
    for volume in &harness.volumes {
        assert!(fs::read_dir(volume.path()).unwrap().count() > 0);
    }

    for (uid, content) in &all {
        assert_eq!(&harness.load(uid).unwrap(), content, "content of {}", uid);
    }

    // Delete every other document concurrently while reading the rest
    let (doomed, kept): (Vec<u64>, Vec<u64>) = ids.iter().partition(|id| *id % 2 == 0);
    let handles: Vec<_> = doomed
        .chunks(4)
        .map(|chunk| {
            let harness = Arc::clone(&harness);
            let chunk = chunk.to_vec();
            let kept = kept.clone();
            thread::spawn(move || {
                for (id, other) in chunk.iter().zip(kept.iter().cycle()) {
                    harness
                        .storage
                        .delete(&format!("{}.1", id), &Options::default())
                        .unwrap();
                    harness.load(&format!("{}.1|page.1", other)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in &doomed {
        let err = harness.load(&format!("{}.1|page.2", id)).unwrap_err();
        assert!(err.is_not_found());
    }
    for id in &kept {
        let uid = format!("{}.1|page.3", id);
        assert_eq!(&harness.load(&uid).unwrap(), &all[&uid]);
    }
    info!("Deleted {} documents, kept {}", doomed.len(), kept.len());
}

#[test]
fn test_version_monotonicity() {
    let harness = Arc::new(ArchiveHarness::new("versions", 2));
    let docs = 10;
    let versions = 10u32;
    let pages = 10;

    let ids: Vec<u64> = (0..docs)
        .map(|d| id_of(&harness.store("0.0|page.1", format!("doc {} v1 p1", d).as_bytes()).uid))
        .collect();

    let handles: Vec<_> = ids
        .iter()
        .copied()
        .map(|id| {
            let harness = Arc::clone(&harness);
            thread::spawn(move || {
                for version in 1..=versions {
                    if version > 1 {
                        let receipt = harness.store(
                            &format!("{}.0|page.1", id),
                            format!("doc {} v{} p1", id, version).as_bytes(),
                        );
                        assert_eq!(receipt.uid, format!("{}.{}|page.1", id, version));
                    }
                    for page in 2..=pages {
                        harness.store(
                            &format!("{}.{}|page.{}", id, version, page),
                            format!("doc {} v{} p{}", id, version, page).as_bytes(),
                        );
                    }
                    let current = harness
                        .storage
                        .current_version(&format!("{}.1", id))
                        .unwrap();
                    assert_eq!(current, version);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in &ids {
        for version in [1, 5, 10] {
            let uid = format!("{}.{}|page.7", id, version);
            let expected = format!("doc {} v{} p7", id, version);
            assert_eq!(harness.load(&uid).unwrap(), expected.as_bytes());
        }
    }
}

#[test]
fn test_rebuild_counts_documents() {
    let harness = ArchiveHarness::new("rebuild", 2);
    let mut generator = ContentGenerator::new(7);
    let docs = 15;

    for _ in 0..docs {
        let receipt = harness.store("0.0|page.1", &generator.text(32..64));
        let id = id_of(&receipt.uid);
        harness.store(&format!("{}.1|page.2", id), &generator.binary(40));
    }

    assert_eq!(harness.storage.rebuild().unwrap(), docs);
    assert_eq!(harness.buckets.len(), docs);

    for uid in harness.buckets.uids() {
        let bucket = harness.buckets.load_bucket(&uid).unwrap().unwrap();
        assert_eq!(bucket.page_count(), 2);
        assert_eq!(bucket.file_types[0], "text/plain");
        assert_eq!(bucket.file_lens[1], 40);

        let mut page = Vec::new();
        harness
            .storage
            .load(&format!("{}|page.1", uid), &mut page, &Options::default())
            .unwrap();
        assert_eq!(bucket.file_hashes[0], hex::encode(hash_data(&page, HashAlgorithm::Md5)));
    }
}

#[test]
fn test_rebuild_skips_failing_documents() {
    struct PickyIndexer;

    impl Indexer for PickyIndexer {
        fn index(&self, path: &std::path::Path) -> Result<IndexResult> {
            let content = fs::read(path)?;
            if content.starts_with(b"corrupt") {
                return Err(TresorError::index("unreadable page"));
            }
            Ok(IndexResult {
                mime_type: "text/plain".to_string(),
                full_text: String::from_utf8_lossy(&content).into_owned(),
                ..Default::default()
            })
        }
    }

    let dir = TempDir::new().unwrap();
    let buckets = Arc::new(MemoryBucketStore::new());
    let storage = StorageBuilder::new("picky")
        .volume(VolumeConfig::new("v1", dir.path()))
        .indexer(Arc::new(PickyIndexer))
        .bucket_store(buckets.clone())
        .build()
        .unwrap();

    for content in ["fine", "corrupt", "also fine"] {
        storage
            .store("0.0|page.1", &mut content.as_bytes(), &Options::default())
            .unwrap();
    }

    assert_eq!(storage.rebuild().unwrap(), 3);
    assert_eq!(buckets.uids(), ["1.1", "3.1"]);
}

#[test]
fn test_zip_tier_through_trait() {
    let live = TempDir::new().unwrap();
    let archive_volume = TempDir::new().unwrap();

    let config = StorageConfig::from_json(&format!(
        r#"{{
            "name": "tiered",
            "volumes": [
                {{ "name": "live", "path": {:?} }},
                {{ "name": "archive", "path": {:?}, "zip": true }}
            ]
        }}"#,
        live.path(),
        archive_volume.path()
    ))
    .unwrap();
    let storage: Box<dyn Storage> = Box::new(Backend::from_config(config).unwrap());

    // Document 3, version 1 was compacted into an archive
    let zip_path = build_path(archive_volume.path(), &ShaUid::new(3, 1, ""), false, true);
    fs::create_dir_all(zip_path.parent().unwrap()).unwrap();
    let mut zip = ZipWriter::new(File::create(&zip_path).unwrap());
    for page in 1..=3 {
        zip.start_file(format!("page.{}", page), SimpleFileOptions::default())
            .unwrap();
        write!(zip, "archived page {}", page).unwrap();
    }
    zip.finish().unwrap();

    for page in 1..=3 {
        let mut out = Vec::new();
        storage
            .load(&format!("3.1|page.{}", page), &mut out, &Options::default())
            .unwrap();
        assert_eq!(out, format!("archived page {}", page).as_bytes());
    }

    // A second load reuses the extracted copy
    let receipt = storage
        .load("3.1|page.1", &mut io::sink(), &Options::default())
        .unwrap();
    assert_eq!(receipt.size, "archived page 1".len() as u64);

    assert_eq!(storage.current_version("3.1").unwrap(), 1);
    let next = storage
        .store("3.0|page.1", &mut &b"fresh"[..], &Options::default())
        .unwrap();
    assert_eq!(next.uid, "3.2|page.1");
    assert_eq!(storage.current_version("3.1").unwrap(), 2);
}

#[test]
fn test_shared_locks_and_cache() {
    let locks = Arc::new(KeyLockRegistry::new());
    let cache = Arc::new(LocationCache::new());
    let a_dir = TempDir::new().unwrap();
    let b_dir = TempDir::new().unwrap();

    let build = |name: &str, dir: &TempDir| {
        StorageBuilder::new(name)
            .volume(VolumeConfig::new("v1", dir.path()))
            .lock_registry(Arc::clone(&locks))
            .location_cache(Arc::clone(&cache))
            .build_sha()
            .unwrap()
    };
    let a = build("alpha", &a_dir);
    let b = build("beta", &b_dir);

    let ra = a.store("0.0|page.1", &mut &b"from alpha"[..], &Options::default()).unwrap();
    let rb = b.store("0.0|page.1", &mut &b"from beta"[..], &Options::default()).unwrap();

    // Same uid, different engines: separate entries
    assert_eq!(ra.uid, rb.uid);
    assert_eq!(cache.get("alpha", "1").as_deref(), Some("v1"));
    assert_eq!(cache.get("beta", "1").as_deref(), Some("v1"));
    assert!(locks.len() >= 2);

    let mut out = Vec::new();
    b.load(&rb.uid, &mut out, &Options::default()).unwrap();
    assert_eq!(out, b"from beta");
}

#[test]
fn test_flat_backend_from_config() {
    let dir = TempDir::new().unwrap();
    let mut config = StorageConfig::new("files");
    config.driver = Driver::Fs;
    config.hash = HashAlgorithm::Sha256;
    config.volumes.push(VolumeConfig::new("v1", dir.path()));

    let storage = Backend::from_config(config).unwrap();
    let receipt = storage
        .store("reports/2024/q1.txt", &mut &b"quarterly"[..], &Options::default())
        .unwrap();
    assert_eq!(receipt.digest, hash_data(b"quarterly", HashAlgorithm::Sha256));
    assert_eq!(receipt.digest.len(), HashAlgorithm::Sha256.output_len());

    assert_eq!(
        fs::read(dir.path().join("reports/2024/q1.txt")).unwrap(),
        b"quarterly"
    );
    assert_eq!(storage.rebuild().unwrap(), 1);
}

#[test]
fn test_startup_rebuild() {
    let dir = TempDir::new().unwrap();
    {
        let storage = StorageBuilder::new("boot")
            .volume(VolumeConfig::new("v1", dir.path()))
            .build()
            .unwrap();
        for i in 0..4 {
            storage
                .store("0.0|page.1", &mut format!("doc {}", i).as_bytes(), &Options::default())
                .unwrap();
        }
    }

    let buckets = Arc::new(MemoryBucketStore::new());
    let _storage = StorageBuilder::new("boot")
        .volume(VolumeConfig::new("v1", dir.path()))
        .rebuild_on_start(true)
        .bucket_store(buckets.clone())
        .build()
        .unwrap();
    assert_eq!(buckets.len(), 4);
}
