//! Property-based testing for Tresor
//!
//! Uses proptest to check the uid grammar, the path layout and store/load
//! identity across randomly generated inputs.

use ::tresor::*;
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::{Component, Path};
use tempfile::TempDir;
use tresor::hash::hash_data;
use tresor::path::{build_path, SHARD_WIDTH};
use tresor::storage::fs::FsUid;

/// Object names as they appear in practice
fn object_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        (1usize..500).prop_map(|n| format!("page.{}", n)),
        "[a-z][a-z0-9_.-]{0,12}",
    ]
}

fn segments(path: &Path) -> Vec<String> {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Display and parse are inverse for canonical uids
    #[test]
    fn uid_roundtrip(id in any::<u64>(), version in any::<u32>(), object in object_strategy()) {
        let uid = ShaUid::new(id, version, object);
        let parsed: ShaUid = uid.to_string().parse().unwrap();
        prop_assert_eq!(parsed, uid);
    }

    /// Each shard level is the id truncated to a multiple of 1000^level
    #[test]
    fn shard_levels_bound_the_id(id in 1u64..=999_999_999_999, version in 1u32..50) {
        let path = build_path(Path::new(""), &ShaUid::new(id, version, ""), false, false);
        let parts = segments(&path);

        prop_assert_eq!(parts.len(), if version > 1 { 5 } else { 4 });
        for (i, part) in parts.iter().enumerate() {
            prop_assert_eq!(part.len(), 12);
            prop_assert!(part.bytes().all(|b| b.is_ascii_digit()));
            if i < 3 {
                let unit = SHARD_WIDTH.pow(3 - i as u32);
                let shard: u64 = part.parse().unwrap();
                prop_assert_eq!(shard % unit, 0);
                prop_assert!(shard <= id && id - shard < unit);
            }
        }
        prop_assert_eq!(parts[3].parse::<u64>().unwrap(), id);
        if version > 1 {
            prop_assert_eq!(parts[4].parse::<u32>().unwrap(), version - 1);
        }
    }

    /// Distinct uids never share a path, in every layout
    #[test]
    fn paths_are_injective(
        uids in prop::collection::vec((1u64..5_000_000, 1u32..4, object_strategy()), 2..40),
        flat in any::<bool>(),
        zip in any::<bool>(),
    ) {
        let root = Path::new("/archive");
        let mut seen = HashSet::new();
        let mut paths = HashSet::new();
        for (id, version, object) in uids {
            let uid = ShaUid::new(id, version, object);
            if seen.insert(uid.clone()) {
                let path = build_path(root, &uid, flat, zip);
                prop_assert!(path.starts_with(root));
                prop_assert!(paths.insert(path), "collision for {}", uid);
            }
        }
    }

    /// Normalizing a flat uid twice changes nothing
    #[test]
    fn fs_uid_normalization_is_stable(parts in prop::collection::vec("[a-z0-9]{1,6}", 1..5), sep in "[/\\\\@]") {
        let raw = parts.join(&sep);
        let uid: FsUid = raw.parse().unwrap();
        prop_assert_eq!(uid.as_str(), parts.join("/"));

        let again: FsUid = uid.as_str().parse().unwrap();
        prop_assert_eq!(again, uid);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Loaded bytes and digests equal what was stored
    #[test]
    fn store_load_identity(
        pages in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..2048), 1..6),
        algorithm in prop_oneof![
            Just(HashAlgorithm::Md5),
            Just(HashAlgorithm::Sha1),
            Just(HashAlgorithm::Sha256),
            Just(HashAlgorithm::Sha512),
        ],
    ) {
        let dir = TempDir::new().unwrap();
        let storage = StorageBuilder::new("prop")
            .volume(VolumeConfig::new("v1", dir.path()).flat(true))
            .hash_algorithm(algorithm)
            .build_sha()
            .unwrap();

        let first = storage
            .store("0.0|page.1", &mut &pages[0][..], &Options::default())
            .unwrap();
        let id = first.uid.parse::<ShaUid>().unwrap().id;

        for (n, content) in pages.iter().enumerate().skip(1) {
            storage
                .store(&format!("{}.1|page.{}", id, n + 1), &mut &content[..], &Options::default())
                .unwrap();
        }

        for (n, content) in pages.iter().enumerate() {
            let mut out = Vec::new();
            let receipt = storage
                .load(&format!("{}.1|page.{}", id, n + 1), &mut out, &Options::default())
                .unwrap();
            prop_assert_eq!(&out, content);
            prop_assert_eq!(receipt.size, content.len() as u64);
            prop_assert_eq!(receipt.digest, hash_data(content, algorithm));
        }
    }
}
