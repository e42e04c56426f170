//! Shard path layout
//!
//! The path layout is the persisted state of an archive: any tree written by a
//! previous instance must resolve to exactly the same files. [`build_path`] is
//! pure and deterministic.
//!
//! ## Hierarchical volumes
//!
//! The id is truncated at 1000^3, 1000^2, 1000^1 and 1000^0, each rendered as
//! 12 zero-padded digits, which caps every directory level at ~1000 entries:
//!
//! ```text
//! id 1234567890, v1   001000000000/001234000000/001234567000/001234567890
//! id 1, v2            000000000000/000000000000/000000000000/000000000001/000000000001
//! id 45, v2, zip      000000000000/000000000000/000000000000/000000000045.000000000001.zip
//! ```
//!
//! ## Flat volumes
//!
//! ```text
//! id 44, v2           44/000000000001
//! id 45, v2, zip      45/000000000045.000000000001.zip
//! ```
//!
//! Version 1 has no version segment; version N > 1 is encoded as `N-1`. This
//! offset is kept as-is for compatibility with existing archives.

use crate::uid::ShaUid;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Number of nested shard levels in a hierarchical volume
pub const SHARD_LEVELS: u32 = 4;

/// Entries per shard directory level
pub const SHARD_WIDTH: u64 = 1000;

/// Build the filesystem path of `uid` under `root`
///
/// `zip` selects the archive form: the whole version lives in one `.zip`
/// file and an object, if any, names an entry inside it (flat volumes mark the
/// entry with a `:` after the archive name).
pub fn build_path(root: &Path, uid: &ShaUid, flat: bool, zip: bool) -> PathBuf {
    let mut path = root.to_path_buf();

    if flat {
        path.push(uid.id.to_string());

        if zip {
            let mut name = if uid.version > 1 {
                format!("{:012}.{:012}.zip", uid.id, uid.version - 1)
            } else {
                format!("{:012}.zip", uid.id)
            };
            if uid.has_object() {
                name.push(':');
            }
            path.push(name);
        } else if uid.version > 1 {
            path.push(format!("{:012}", uid.version - 1));
        }
    } else {
        for level in (1..SHARD_LEVELS).rev() {
            path.push(format!("{:012}", shard(uid.id, level)));
        }
        let mut leaf = format!("{:012}", uid.id);

        if uid.version > 1 {
            if zip {
                leaf.push_str(&format!(".{:012}", uid.version - 1));
            } else {
                path.push(leaf);
                leaf = format!("{:012}", uid.version - 1);
            }
        }

        if zip {
            leaf.push_str(".zip");
        }
        path.push(leaf);
    }

    if uid.has_object() {
        path.push(&uid.object);
    }

    path
}

/// Id truncated to a multiple of 1000^level
fn shard(id: u64, level: u32) -> u64 {
    let unit = SHARD_WIDTH.pow(level);
    (id / unit) * unit
}

/// Highest document id present under a volume root
///
/// Hierarchical trees are descended through the numerically greatest shard
/// directory at each level, falling back to smaller siblings when a branch is
/// empty. Leaf names may be live directories, single-object files or zip
/// archives (`<id>.zip`, `<id>.<version>.zip`).
pub fn highest_id(root: &Path, flat: bool) -> io::Result<Option<u64>> {
    if flat {
        let ids = numeric_entries(root, true)?;
        return Ok(ids.into_iter().map(|(id, _)| id).max());
    }

    descend(root, SHARD_LEVELS - 1)
}

fn descend(dir: &Path, depth: u32) -> io::Result<Option<u64>> {
    if depth == 0 {
        let ids = numeric_entries(dir, false)?;
        return Ok(ids.into_iter().map(|(id, _)| id).max());
    }

    let mut shards = numeric_entries(dir, true)?;
    shards.sort_by(|a, b| b.0.cmp(&a.0));

    for (_, shard_dir) in shards {
        if let Some(id) = descend(&shard_dir, depth - 1)? {
            return Ok(Some(id));
        }
    }

    Ok(None)
}

/// Entries of `dir` whose name starts with an integer, keyed by that integer
fn numeric_entries(dir: &Path, dirs_only: bool) -> io::Result<Vec<(u64, PathBuf)>> {
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if dirs_only && !entry.file_type()?.is_dir() {
            continue;
        }

        let name = entry.file_name();
        let name = name.to_string_lossy();
        let head = name.split('.').next().unwrap_or_default();
        if let Ok(id) = head.parse::<u64>() {
            entries.push((id, entry.path()));
        }
    }

    Ok(entries)
}
