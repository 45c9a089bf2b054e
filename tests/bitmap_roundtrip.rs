//! Round-trip and size properties of packed bitmaps

use edgestash::bitmap::{decode, encode};
use edgestash::Codec;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn enabled_codecs() -> Vec<Codec> {
    [Codec::None, Codec::Zstd, Codec::Lz4]
        .into_iter()
        .filter(|c| c.is_enabled())
        .collect()
}

#[test]
fn test_empty_set_roundtrip() {
    for codec in enabled_codecs() {
        let blob = encode(&BTreeSet::new(), codec).unwrap();
        assert!(decode(&blob).unwrap().is_empty(), "codec {codec}");
    }
}

#[test]
fn test_singletons_roundtrip() {
    for codec in enabled_codecs() {
        for id in [0u64, 1, 7, 8, 63, 64, 65, 1_000_003] {
            let set: BTreeSet<u64> = [id].into_iter().collect();
            let blob = encode(&set, codec).unwrap();
            assert_eq!(decode(&blob).unwrap(), set, "codec {codec}, id {id}");
        }
    }
}

#[test]
fn test_large_outlier_roundtrip() {
    let set: BTreeSet<u64> = [1, 2, 3, 5_000_000].into_iter().collect();
    for codec in enabled_codecs() {
        let blob = encode(&set, codec).unwrap();
        assert_eq!(decode(&blob).unwrap(), set, "codec {codec}");
    }
}

#[test]
fn test_end_to_end_ids() {
    let set: BTreeSet<u64> = [1, 2, 3].into_iter().collect();
    let blob = encode(&set, Codec::default()).unwrap();
    assert_eq!(decode(&blob).unwrap(), set);
    // equal sets pack to equal blobs
    assert_eq!(encode(&set, Codec::default()).unwrap(), blob);
}

#[cfg(feature = "compression-zstd")]
#[test]
fn test_sparse_set_is_smaller_than_edge_strings() {
    // 200 edges spread over a 100k id space
    let set: BTreeSet<u64> = (1..=200u64).map(|i| i * 499).collect();
    let naive: usize = set
        .iter()
        .map(|id| format!("0x{:08x}=>0x{:08x}", id, id + 1).len())
        .sum();
    let blob = encode(&set, Codec::Zstd).unwrap();
    assert!(
        blob.len() * 4 < naive,
        "packed {} bytes vs {} bytes of edge strings",
        blob.len(),
        naive
    );
}

#[cfg(feature = "compression-zstd")]
#[test]
fn test_single_large_id_compresses() {
    let set: BTreeSet<u64> = [100_000].into_iter().collect();
    let blob = encode(&set, Codec::Zstd).unwrap();
    // 12.5 KB of raw bits
    assert!(blob.len() < 256, "packed {} bytes", blob.len());
}

proptest! {
    #[test]
    fn prop_roundtrip_default_codec(set in prop::collection::btree_set(0u64..50_000, 0..300)) {
        let blob = encode(&set, Codec::default()).unwrap();
        prop_assert_eq!(decode(&blob).unwrap(), set);
    }

    #[test]
    fn prop_roundtrip_uncompressed(set in prop::collection::btree_set(0u64..4_096, 0..100)) {
        let blob = encode(&set, Codec::None).unwrap();
        prop_assert_eq!(decode(&blob).unwrap(), set);
    }
}
