//! Document UIDs
//!
//! A UID addresses one stored artifact as `<id>.<version>` optionally followed
//! by `|<object>`:
//!
//! ```text
//! 12.3|page.1   id 12, version 3, object "page.1"
//! 12.3          the whole version 3 of document 12
//! 0.0|page.1    new document, first object
//! ```
//!
//! Id 0 asks the engine to allocate a document, version 0 asks for the next
//! version. Parsing is tolerant: a leading part without a dot leaves id and
//! version at 0, a missing `|` leaves the object empty.

use crate::error::{Result, TresorError};
use std::fmt;
use std::str::FromStr;

/// Object name prefix used for document pages
pub const PAGE: &str = "page";

/// Parsed document UID
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ShaUid {
    /// Document id, 0 = not yet assigned
    pub id: u64,
    /// Version, 0 = next version
    pub version: u32,
    /// Sub-object inside the version, empty = the version as a whole
    pub object: String,
}

impl ShaUid {
    /// Create a UID
    pub fn new(id: u64, version: u32, object: impl Into<String>) -> Self {
        Self {
            id,
            version,
            object: object.into(),
        }
    }

    /// The same id/version without the object
    pub fn without_object(&self) -> Self {
        Self {
            id: self.id,
            version: self.version,
            object: String::new(),
        }
    }

    /// The document itself: object and version cleared
    pub fn document(&self) -> Self {
        Self::new(self.id, 0, "")
    }

    /// The same id/version addressing page `n`
    pub fn page(&self, n: usize) -> Self {
        Self {
            id: self.id,
            version: self.version,
            object: page_name(n),
        }
    }

    /// Whether an object is addressed
    pub fn has_object(&self) -> bool {
        !self.object.is_empty()
    }
}

/// Object name of page `n`
pub fn page_name(n: usize) -> String {
    format!("{}.{}", PAGE, n)
}

impl FromStr for ShaUid {
    type Err = TresorError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() {
            return Err(TresorError::InvalidUid(s.to_string()));
        }

        let invalid = || TresorError::InvalidUid(s.to_string());
        let mut uid = ShaUid::default();

        let (head, object) = match s.split_once('|') {
            Some((head, object)) => (head, Some(object)),
            None => (s, None),
        };

        if head.contains('.') {
            let mut parts = head.split('.');
            let id = parts.next().unwrap_or_default();
            uid.id = id.parse().map_err(|_| invalid())?;

            if let Some(version) = parts.next() {
                uid.version = version.parse().map_err(|_| invalid())?;
            }
        }

        if let Some(object) = object {
            // Objects are path segments below the version directory
            let escapes = object.starts_with(['/', '\\'])
                || object.split(['/', '\\']).any(|part| part == "..");
            if escapes {
                return Err(invalid());
            }
            uid.object = object.to_string();
        }

        Ok(uid)
    }
}

impl fmt::Display for ShaUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.id, self.version)?;
        if !self.object.is_empty() {
            write!(f, "|{}", self.object)?;
        }
        Ok(())
    }
}
