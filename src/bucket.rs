//! Metadata records produced by rebuild
//!
//! A [`Bucket`] describes one document version: the per-page file name, MIME
//! type, length and content hash as parallel arrays, plus a property bag
//! merged from every page's extraction result. Buckets are handed to a
//! [`BucketStore`], the contract of the external metadata database.

use crate::collections::FastBuildHasher;
use crate::error::{Result, TresorError};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rebuilt metadata of one document version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// Canonical uid of the document version
    pub uid: String,
    /// Properties merged across pages, later pages win on equal keys
    pub props: BTreeMap<String, String>,
    /// Object name per page
    pub file_names: Vec<String>,
    /// MIME type per page
    pub file_types: Vec<String>,
    /// Byte length per page
    pub file_lens: Vec<u64>,
    /// Hex content digest per page
    pub file_hashes: Vec<String>,
    /// Extracted full text, pages separated by a newline
    pub full_text: String,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl Bucket {
    /// Empty bucket for `uid`
    pub fn new(uid: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            uid: uid.into(),
            props: BTreeMap::new(),
            file_names: Vec::new(),
            file_types: Vec::new(),
            file_lens: Vec::new(),
            file_hashes: Vec::new(),
            full_text: String::new(),
            created_at: now,
            modified_at: now,
        }
    }

    /// Append one page, keeping the per-page arrays parallel
    pub fn push_page(
        &mut self,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        len: u64,
        hash_hex: impl Into<String>,
    ) {
        self.file_names.push(name.into());
        self.file_types.push(mime_type.into());
        self.file_lens.push(len);
        self.file_hashes.push(hash_hex.into());
        self.modified_at = Utc::now();
    }

    /// Merge extracted properties and text of one page
    pub fn merge_extraction<I>(&mut self, properties: I, text: &str)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.props.extend(properties);
        if !text.is_empty() {
            if !self.full_text.is_empty() {
                self.full_text.push('\n');
            }
            self.full_text.push_str(text);
        }
    }

    /// Number of pages recorded
    pub fn page_count(&self) -> usize {
        self.file_names.len()
    }
}

/// Persistence contract of the metadata database
pub trait BucketStore: Send + Sync {
    /// Insert or replace the bucket with the same uid
    fn save_bucket(&self, bucket: &Bucket) -> Result<()>;

    /// Load a bucket by uid
    fn load_bucket(&self, uid: &str) -> Result<Option<Bucket>>;

    /// Delete a bucket by uid; absent buckets are ignored
    fn delete_bucket(&self, uid: &str) -> Result<()>;
}

/// In-process bucket store
#[derive(Default)]
pub struct MemoryBucketStore {
    buckets: DashMap<String, Bucket, FastBuildHasher>,
}

impl MemoryBucketStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the store holds no bucket
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// All stored uids, sorted
    pub fn uids(&self) -> Vec<String> {
        let mut uids: Vec<String> = self.buckets.iter().map(|e| e.key().clone()).collect();
        uids.sort();
        uids
    }
}

impl fmt::Debug for MemoryBucketStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBucketStore")
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl BucketStore for MemoryBucketStore {
    fn save_bucket(&self, bucket: &Bucket) -> Result<()> {
        self.buckets.insert(bucket.uid.clone(), bucket.clone());
        Ok(())
    }

    fn load_bucket(&self, uid: &str) -> Result<Option<Bucket>> {
        Ok(self.buckets.get(uid).map(|b| b.value().clone()))
    }

    fn delete_bucket(&self, uid: &str) -> Result<()> {
        self.buckets.remove(uid);
        Ok(())
    }
}

/// Bucket store writing one pretty-printed JSON file per bucket
#[derive(Debug, Clone)]
pub struct JsonBucketStore {
    dir: PathBuf,
}

impl JsonBucketStore {
    /// Store buckets under `dir`, creating it if needed
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the bucket files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn bucket_path(&self, uid: &str) -> PathBuf {
        // `|` and `/` are not portable in file names
        let name: String = uid
            .chars()
            .map(|c| match c {
                '|' | '/' | '\\' | ':' => '_',
                c => c,
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }
}

impl BucketStore for JsonBucketStore {
    fn save_bucket(&self, bucket: &Bucket) -> Result<()> {
        let path = self.bucket_path(&bucket.uid);
        let json = serde_json::to_string_pretty(bucket)?;
        fs::write(&path, json)
            .map_err(|e| TresorError::database(format!("{}: {}", path.display(), e)))?;
        debug!("Saved bucket {} to {:?}", bucket.uid, path);
        Ok(())
    }

    fn load_bucket(&self, uid: &str) -> Result<Option<Bucket>> {
        let path = self.bucket_path(uid);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    fn delete_bucket(&self, uid: &str) -> Result<()> {
        let path = self.bucket_path(uid);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
