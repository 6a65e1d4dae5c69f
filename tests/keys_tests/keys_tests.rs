//! Tests for the key codec
//!
//! These tests verify:
//! - Classification of ENTITY, IDGEN and INDEX keys
//! - Rejection of unknown discriminators and short keys
//! - Payload extraction with kind/shape filters

#[path = "../common/mod.rs"]
mod common;

use common::*;
use shardkv::error::KvError;
use shardkv::keys::{discriminator_of, extract_payload, Discriminator, EntryType, KeyParts};

// =============================================================================
// Classification Tests
// =============================================================================

#[test]
fn test_classify_entity_key() {
    let key = entity_key(&root_prefix(0x123, 77, 9), &[1, 2], 4, 3, EntryType::Data);

    let parts = KeyParts::classify(&key).unwrap();

    assert_eq!(
        parts,
        KeyParts::Data {
            discriminator: Discriminator::Entity,
            shard: 0x123,
            root_kind: 9,
            kind: 4,
            shape: 3,
            entry_type: EntryType::Data as u8,
        }
    );
    assert_eq!(parts.shard(), Some(0x123));
}

#[test]
fn test_classify_idgen_key() {
    let mut key = idgen_prefix(2, 1, 5);
    key.extend_from_slice(&[0, 0]);

    let parts = KeyParts::classify(&key).unwrap();

    assert_eq!(parts.discriminator(), Discriminator::IdGen);
    assert_eq!(parts.shard(), Some(2));
}

#[test]
fn test_classify_index_key() {
    let key = index_key(4, 7, b"ab", [1; 8]);

    let parts = KeyParts::classify(&key).unwrap();

    assert_eq!(parts, KeyParts::Index { kind: 4, index: 7 });
    assert_eq!(parts.shard(), None);
}

#[test]
fn test_classify_unknown_discriminator() {
    let key = [0x50, 1, 2, 3, 4, 5, 6, 7];

    let result = KeyParts::classify(&key);

    assert!(matches!(result, Err(KvError::UnknownDiscriminator(5))));
    assert!(result.unwrap_err().is_routing());
}

#[test]
fn test_classify_short_keys() {
    assert!(matches!(
        KeyParts::classify(&[0x20, 1, 0]),
        Err(KvError::KeyTooShort { discriminator: 2, len: 3 })
    ));
    assert!(matches!(
        KeyParts::classify(&[0x10, 1]),
        Err(KvError::KeyTooShort { discriminator: 1, len: 2 })
    ));
    assert!(matches!(
        KeyParts::classify(&[]),
        Err(KvError::UnknownDiscriminator(0))
    ));
}

#[test]
fn test_discriminator_of() {
    assert_eq!(discriminator_of(&[0x2f, 0]), 2);
    assert_eq!(discriminator_of(&[0x10]), 1);
    assert_eq!(discriminator_of(&[]), 0);
}

// =============================================================================
// Payload Extraction Tests
// =============================================================================

#[test]
fn test_extract_entity_data() {
    let key = entity_key(&root_prefix(2, 1, 9), &[], 4, 1, EntryType::Data);

    assert_eq!(extract_payload(&key, 0, 0), Some(key.as_slice()));
    assert_eq!(extract_payload(&key, 4, 1), Some(key.as_slice()));
}

#[test]
fn test_extract_entity_skips_non_data() {
    let prefix = root_prefix(2, 1, 9);
    let metadata = entity_key(&prefix, &[], 4, 1, EntryType::Metadata);
    let index_row = entity_key(&prefix, &[], 4, 1, EntryType::IndexRow);

    assert_eq!(extract_payload(&metadata, 0, 0), None);
    assert_eq!(extract_payload(&index_row, 0, 0), None);
}

#[test]
fn test_extract_entity_filters() {
    let key = entity_key(&root_prefix(2, 1, 9), &[], 4, 1, EntryType::Data);

    assert_eq!(extract_payload(&key, 5, 0), None);
    assert_eq!(extract_payload(&key, 0, 2), None);
    assert_eq!(extract_payload(&key, 4, 2), None);
}

#[test]
fn test_extract_index_payload() {
    let entity = [0x21, 2, 3, 4, 5, 6, 7, 8];
    let key = index_key(4, 1, b"ab", entity);

    assert_eq!(extract_payload(&key, 0, 0), Some(&entity[..]));
}

#[test]
fn test_extract_index_payload_longer_values() {
    // Values spanning more than one stride
    let entity = [9u8; 8];
    let key = index_key(4, 1, b"abcdefghijklmnopqr", entity);

    assert_eq!(extract_payload(&key, 0, 0), Some(&entity[..]));
}

#[test]
fn test_extract_index_without_boundary_returns_whole_key() {
    let key = vec![0x10, 4, 1, 7, 7, 7, 7, 7, 7, 7, 7, 7];

    assert_eq!(extract_payload(&key, 0, 0), Some(key.as_slice()));
}

#[test]
fn test_extract_idgen_and_unknown_whole_key() {
    let mut idgen = idgen_prefix(2, 1, 9);
    idgen.extend_from_slice(&[0, 0]);
    let unknown = vec![0x70, 1, 2];

    assert_eq!(extract_payload(&idgen, 3, 3), Some(idgen.as_slice()));
    assert_eq!(extract_payload(&unknown, 0, 0), Some(unknown.as_slice()));
}
