//! Content indexer contract
//!
//! Rebuild hands every stored page to an [`Indexer`] and folds the result into
//! the document's bucket. Real deployments plug in OCR / PDF / DICOM
//! extraction; [`SniffIndexer`] is the built-in fallback that only detects the
//! MIME type from magic bytes and returns UTF-8 content as full text.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes inspected for MIME detection
pub const MIME_HEADER_LEN: usize = 512;

/// Text files larger than this are not returned as full text
pub const MAX_TEXT_LEN: u64 = 1024 * 1024;

/// Page orientation reported by OCR
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    /// Not determined
    #[default]
    Unknown,
    /// Upright
    Deg0,
    /// Rotated 90 degrees clockwise
    Deg90,
    /// Upside down
    Deg180,
    /// Rotated 270 degrees clockwise
    Deg270,
}

/// Extraction result of one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexResult {
    /// Detected MIME type
    pub mime_type: String,
    /// Extracted properties (EXIF, DICOM tags, ...)
    pub properties: BTreeMap<String, String>,
    /// Optional thumbnail image
    pub thumbnail: Option<Vec<u8>>,
    /// Extracted full text
    pub full_text: String,
    /// Detected orientation
    pub orientation: Orientation,
}

/// Content inspection collaborator
pub trait Indexer: Send + Sync {
    /// Inspect the file at `path`
    fn index(&self, path: &Path) -> Result<IndexResult>;
}

/// Magic-byte MIME detector
#[derive(Debug, Clone, Copy, Default)]
pub struct SniffIndexer;

impl SniffIndexer {
    /// Create the indexer
    pub fn new() -> Self {
        Self
    }
}

impl Indexer for SniffIndexer {
    fn index(&self, path: &Path) -> Result<IndexResult> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();

        let mut header = Vec::with_capacity(MIME_HEADER_LEN);
        (&mut file).take(MIME_HEADER_LEN as u64).read_to_end(&mut header)?;

        let mime_type = detect_mime_type(&header);
        let mut result = IndexResult {
            mime_type: mime_type.to_string(),
            ..Default::default()
        };

        if mime_type.starts_with("text/") && len <= MAX_TEXT_LEN {
            let mut rest = Vec::new();
            file.read_to_end(&mut rest)?;
            header.extend_from_slice(&rest);
            result.full_text = String::from_utf8_lossy(&header).into_owned();
        }

        Ok(result)
    }
}

/// Detect a MIME type from the leading bytes of a file
pub fn detect_mime_type(header: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"II*\x00", "image/tiff"),
        (b"MM\x00*", "image/tiff"),
        (b"PK\x03\x04", "application/zip"),
        (b"<?xml", "text/xml"),
    ];

    if header.len() >= 132 && &header[128..132] == b"DICM" {
        return "application/dicom";
    }

    for &(magic, mime) in SIGNATURES {
        if header.starts_with(magic) {
            return mime;
        }
    }

    if header.is_empty() {
        return "application/octet-stream";
    }

    match std::str::from_utf8(header) {
        Ok(_) => "text/plain",
        // A multi-byte character may be cut at the end of the header
        Err(e) if e.error_len().is_none() => "text/plain",
        Err(_) => "application/octet-stream",
    }
}
