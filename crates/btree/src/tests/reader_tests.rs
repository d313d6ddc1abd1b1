use crate::format::HEADER_BYTES;
use crate::tests::helpers::{build, node_size_for};
use crate::{BTreeBuilder, BTreeError, BTreeReader, BTreeSlice};
use anyhow::Result;
use config::IndexConfig;
use std::fs::File;
use std::io::Cursor;
use tempfile::tempdir;

fn sample_pairs() -> Vec<(u64, u64)> {
    (0..500).map(|i| (10 + 2 * i, 4096 * i)).collect()
}

fn expected_pos(pairs: &[(u64, u64)], q: u64) -> u64 {
    pairs
        .iter()
        .rev()
        .find(|(k, _)| *k <= q)
        .map(|(_, p)| *p)
        .unwrap_or(pairs[0].1)
}

// -------------------- File reader --------------------

#[test]
fn file_reader_matches_in_memory_view() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("sample.idx");
    let pairs = sample_pairs();
    let max = node_size_for::<u64, u64>(4);

    let mut builder = BTreeBuilder::<u64, u64, _>::new(File::create(&path)?, max, 0)?;
    for (k, p) in &pairs {
        builder.add_key(*k, *p)?;
    }
    let (height, file) = builder.finish()?;
    drop(file);

    let reader = BTreeReader::<u64, u64>::open(&path)?;
    assert_eq!(reader.height(), height);
    assert!(height >= 3);

    let bytes = std::fs::read(&path)?;
    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert_eq!(reader.trailer(), tree.trailer());
    assert_eq!(reader.header(), tree.header());

    for q in 0..1020u64 {
        let expected = expected_pos(&pairs, q);
        assert_eq!(reader.lookup(&q)?, expected, "reader query {q}");
        assert_eq!(tree.lookup(&q)?, expected, "slice query {q}");
    }
    Ok(())
}

#[test]
fn reader_over_cursor() -> Result<()> {
    let pairs = sample_pairs();
    let (_, bytes) = build(&pairs, 4096, 0)?;
    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes), &IndexConfig::default())?;
    assert_eq!(reader.height(), 2);
    assert_eq!(reader.lookup(&11)?, 0);
    assert_eq!(reader.lookup(&12)?, 4096);
    assert_eq!(reader.lookup_by(|k| k.cmp(&1008))?, 4096 * 499);
    Ok(())
}

#[test]
fn node_items_expose_the_root() -> Result<()> {
    let pairs: Vec<(u64, u64)> = (1..=5).map(|k| (k, k * 10)).collect();
    let (_, bytes) = build(&pairs, node_size_for::<u64, u64>(2), 0)?;

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    let root_pos = tree.trailer().root_pos;
    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes.clone()), &IndexConfig::default())?;

    let (first, items) = reader.node_items(root_pos)?;
    assert_eq!(first, 16);
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key, 4);
    assert_eq!(items[0].pos, 64);
    Ok(())
}

#[test]
fn reader_is_shared_between_threads() -> Result<()> {
    let pairs = sample_pairs();
    let (_, bytes) = build(&pairs, node_size_for::<u64, u64>(8), 0)?;
    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes), &IndexConfig::default())?;

    std::thread::scope(|s| {
        for t in 0..4u64 {
            let reader = &reader;
            let pairs = &pairs;
            s.spawn(move || {
                for q in (t..1020).step_by(4) {
                    let pos = reader.lookup(&q).map_err(|e| e.to_string());
                    assert_eq!(pos, Ok(expected_pos(pairs, q)));
                }
            });
        }
    });
    Ok(())
}

#[test]
fn open_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let res = BTreeReader::<u64, u64>::open(dir.path().join("missing.idx"));
    assert!(matches!(res, Err(BTreeError::Io(_))));
}

// -------------------- Validation --------------------

#[test]
fn rejects_input_too_short_for_header_and_trailer() {
    let bytes = [0u8; HEADER_BYTES + 8];
    assert!(matches!(
        BTreeSlice::<u64, u64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));
    assert!(matches!(
        BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes.to_vec()), &IndexConfig::default()),
        Err(BTreeError::Format(_))
    ));
}

#[test]
fn rejects_bad_magic() -> Result<()> {
    let (_, mut bytes) = build(&sample_pairs(), 4096, 0)?;
    bytes[0] ^= 0xff;
    assert!(matches!(
        BTreeSlice::<u64, u64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));
    Ok(())
}

#[test]
fn rejects_mismatched_key_type_unless_unchecked() -> Result<()> {
    let (_, bytes) = build(&sample_pairs(), 4096, 0)?;
    assert!(matches!(
        BTreeSlice::<i64, u64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));

    let unchecked = IndexConfig {
        check_key_type: false,
        ..IndexConfig::default()
    };
    let tree = BTreeSlice::<i64, u64>::with_config(&bytes, &unchecked)?;
    assert_eq!(tree.lookup(&12)?, 4096);
    Ok(())
}

#[test]
fn rejects_mismatched_position_type() -> Result<()> {
    let (_, bytes) = build(&sample_pairs(), 4096, 0)?;
    assert!(matches!(
        BTreeSlice::<u64, i64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));
    assert!(matches!(
        BTreeReader::<u64, u32, _>::from_reader(Cursor::new(bytes), &IndexConfig::default()),
        Err(BTreeError::Format(_))
    ));
    Ok(())
}

#[test]
fn accepts_user_defined_position_type() -> Result<()> {
    let mut builder = BTreeBuilder::<u64, u64, _>::with_type_codes(
        Vec::new(),
        4096,
        0,
        <u64 as crate::TypeTag>::TYPE_CODE,
        0,
        0x40,
    )?;
    builder.add_key(1, 100)?;
    builder.add_key(2, 200)?;
    let (_, bytes) = builder.finish()?;

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert_eq!(tree.header().pos_type, 0x40);
    assert_eq!(tree.lookup(&2)?, 200);
    Ok(())
}

#[test]
fn rejects_node_size_above_read_limit() -> Result<()> {
    let (_, bytes) = build(&sample_pairs(), 4096, 0)?;
    let strict = IndexConfig {
        max_node_size: 1024,
        max_read_node_size: 1024,
        ..IndexConfig::default()
    };
    assert!(matches!(
        BTreeSlice::<u64, u64>::with_config(&bytes, &strict),
        Err(BTreeError::Format(_))
    ));
    assert!(matches!(
        BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes), &strict),
        Err(BTreeError::Format(_))
    ));
    Ok(())
}

#[test]
fn rejects_node_size_below_minimum() -> Result<()> {
    let (_, mut bytes) = build(&sample_pairs(), 4096, 0)?;
    let at = bytes.len() - 8;
    bytes[at..at + 4].copy_from_slice(&16u32.to_le_bytes());
    assert!(matches!(
        BTreeSlice::<u64, u64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));
    Ok(())
}

#[test]
fn rejects_height_larger_than_the_file() -> Result<()> {
    let (_, mut bytes) = build(&sample_pairs(), 4096, 0)?;
    let at = bytes.len() - 4;
    bytes[at..].copy_from_slice(&1_000_000u32.to_le_bytes());
    assert!(matches!(
        BTreeSlice::<u64, u64>::new(&bytes),
        Err(BTreeError::Format(_))
    ));
    Ok(())
}

#[test]
fn root_outside_node_region_fails_lookup() -> Result<()> {
    let (_, mut bytes) = build(&sample_pairs(), 4096, 0)?;
    let at = bytes.len() - 16;
    let len = bytes.len() as u64;
    bytes[at..at + 8].copy_from_slice(&len.to_le_bytes());

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert!(matches!(tree.lookup(&12), Err(BTreeError::Format(_))));

    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes.clone()), &IndexConfig::default())?;
    assert!(matches!(reader.lookup(&12), Err(BTreeError::Format(_))));

    bytes[at..at + 8].copy_from_slice(&4u64.to_le_bytes());
    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert!(matches!(tree.lookup(&12), Err(BTreeError::Format(_))));
    Ok(())
}

#[test]
fn corrupt_node_fails_lookup() -> Result<()> {
    let pairs: Vec<(u64, u64)> = (1..=5).map(|k| (k, k * 10)).collect();
    let (_, mut bytes) = build(&pairs, node_size_for::<u64, u64>(2), 0)?;
    // Second leaf at 64 holds one item; claim three.
    bytes[64 + 12..64 + 16].copy_from_slice(&3u32.to_le_bytes());

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert_eq!(tree.lookup(&2)?, 20);
    assert!(matches!(tree.lookup(&5), Err(BTreeError::Format(_))));
    Ok(())
}

// -------------------- Verification --------------------

#[test]
fn verify_counts_every_node() -> Result<()> {
    let pairs: Vec<(u64, u64)> = (1..=5).map(|k| (k, k * 10)).collect();
    let (_, bytes) = build(&pairs, node_size_for::<u64, u64>(2), 0)?;

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert_eq!(tree.verify()?, 3);
    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes), &IndexConfig::default())?;
    assert_eq!(reader.verify()?, 3);

    let (_, empty) = build::<u64, u64>(&[], 4096, 0)?;
    assert_eq!(BTreeSlice::<u64, u64>::new(&empty)?.verify()?, 0);
    Ok(())
}

#[test]
fn verify_walks_large_trees_on_both_readers() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("verify.idx");
    let mut builder = BTreeBuilder::<u64, u32, _>::new(File::create(&path)?, node_size_for::<u64, u32>(3), 0)?;
    for (k, p) in sample_pairs() {
        builder.add_key(k, p as u32)?;
    }
    drop(builder.finish()?);

    let bytes = std::fs::read(&path)?;
    let nodes = BTreeSlice::<u64, u32>::new(&bytes)?.verify()?;
    // 500 keys at four per leaf, plus the upper levels.
    assert!(nodes > 125, "only {nodes} nodes");
    assert_eq!(BTreeReader::<u64, u32>::open(&path)?.verify()?, nodes);
    Ok(())
}

#[test]
fn unsorted_node_fails_verify_and_lookup() -> Result<()> {
    let pairs: Vec<(u64, u64)> = (1..=5).map(|k| (k, k * 10)).collect();
    let (_, mut bytes) = build(&pairs, node_size_for::<u64, u64>(2), 0)?;
    // First leaf at 16 holds items (2, 20), (3, 30); make the first key 3.
    bytes[32..40].copy_from_slice(&3u64.to_le_bytes());

    let tree = BTreeSlice::<u64, u64>::new(&bytes)?;
    assert!(matches!(tree.verify(), Err(BTreeError::Format(_))));
    assert!(matches!(tree.node_at(16), Err(BTreeError::Format(_))));
    // Plain lookups skip the ordering check and stay usable on the intact leaf.
    assert_eq!(tree.lookup(&5)?, 50);

    let reader = BTreeReader::<u64, u64, _>::from_reader(Cursor::new(bytes), &IndexConfig::default())?;
    assert!(matches!(reader.verify(), Err(BTreeError::Format(_))));
    assert!(matches!(reader.node_items(16), Err(BTreeError::Format(_))));
    Ok(())
}
