//! Main test module for Tresor
//!
//! This module includes all test suites:
//! - Integration tests for multi-volume, multi-threaded scenarios
//! - Property-based tests for the uid grammar and path layout

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::tresor::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_content() {
        let dir = TempDir::new().unwrap();
        let storage = ShaStorage::open("empty", &[VolumeConfig::new("v1", dir.path())]).unwrap();

        let receipt = storage
            .store("0.0|page.1", &mut &b""[..], &Options::default())
            .unwrap();
        assert_eq!(receipt.size, 0);
        assert_eq!(receipt.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");

        // An empty object may be overwritten
        let again = storage
            .store(&receipt.uid, &mut &b"now filled"[..], &Options::default())
            .unwrap();
        assert_eq!(again.uid, receipt.uid);

        let mut out = Vec::new();
        storage.load(&receipt.uid, &mut out, &Options::default()).unwrap();
        assert_eq!(out, b"now filled");
    }

    #[test]
    fn test_missing_volume_path() {
        let dir = TempDir::new().unwrap();
        let result = ShaStorage::open("bad", &[VolumeConfig::new("v1", dir.path().join("nope"))]);
        assert!(matches!(result, Err(TresorError::VolumePathNotFound { .. })));
    }

    #[test]
    fn test_reserved_volume_name() {
        let dir = TempDir::new().unwrap();
        let result = ShaStorage::open("bad", &[VolumeConfig::new("UnZip", dir.path())]);
        assert!(matches!(result, Err(TresorError::InvalidVolumeName(_))));
    }

    #[test]
    fn test_large_ids_layout() {
        let dir = TempDir::new().unwrap();
        let storage = ShaStorage::open("large", &[VolumeConfig::new("v1", dir.path())]).unwrap();

        // Place a document with a large id by hand, then append to it
        let first = dir
            .path()
            .join("001000000000/001234000000/001234567000/001234567890/page.1");
        fs::create_dir_all(first.parent().unwrap()).unwrap();
        fs::write(&first, "legacy").unwrap();

        let receipt = storage
            .store("1234567890.0|page.1", &mut &b"appended"[..], &Options::default())
            .unwrap();
        assert_eq!(receipt.uid, "1234567890.2|page.1");
        assert!(dir
            .path()
            .join("001000000000/001234000000/001234567000/001234567890/000000000001/page.1")
            .is_file());
    }

    #[test]
    fn test_ids_seeded_from_existing_tree() {
        let dir = TempDir::new().unwrap();
        let legacy = dir
            .path()
            .join("000000000000/000000000000/000000001000/000000001001/page.1");
        fs::create_dir_all(legacy.parent().unwrap()).unwrap();
        fs::write(&legacy, "legacy").unwrap();

        let storage = ShaStorage::open("seeded", &[VolumeConfig::new("v1", dir.path())]).unwrap();
        let receipt = storage
            .store("0.0|page.1", &mut &b"new"[..], &Options::default())
            .unwrap();
        assert_eq!(receipt.uid, "1002.1|page.1");
    }
}
