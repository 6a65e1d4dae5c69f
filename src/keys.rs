//! Key Codec
//!
//! Decodes the structure packed into raw keys. No state.
//!
//! ## Key Layouts
//! ```text
//! ENTITY / IDGEN
//! ┌──────────────┬──────────────┬─────────┬──────────┬─────┬──────────┬─────────────────┐
//! │ discrim (4b) │ shard (12b)  │ 4 bytes │ rootkind │ ... │ kind (1) │ shape(5b)|et(3b)│
//! └──────────────┴──────────────┴─────────┴──────────┴─────┴──────────┴─────────────────┘
//!   byte 0 .. 1                             byte 6          len-2      len-1
//!
//! INDEX
//! ┌──────────────┬──────────┬───────────┬─────────────────────────┬───┬──────────────┐
//! │ discrim (4b) │ kind (1) │ index (1) │ index row values ...    │ 0 │ entity key   │
//! └──────────────┴──────────┴───────────┴─────────────────────────┴───┴──────────────┘
//! ```
//!
//! The entity key at the tail of an index row is found by walking backward
//! from the end in 8-byte strides until a zero byte marks the boundary.

use crate::error::{KvError, Result};

/// Minimum key length for ENTITY/IDGEN keys (the root kind lives at byte 6)
pub const MIN_ENTITY_KEY_LEN: usize = 7;

/// Minimum key length for INDEX keys (the index id lives at byte 2)
pub const MIN_INDEX_KEY_LEN: usize = 3;

/// Stride used when searching an index row for its payload boundary
const INDEX_STRIDE: usize = 8;

/// Key-space category carried in the top 4 bits of byte 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Discriminator {
    Index = 1,
    Entity = 2,
    IdGen = 3,
}

impl Discriminator {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Discriminator::Index),
            2 => Some(Discriminator::Entity),
            3 => Some(Discriminator::IdGen),
            _ => None,
        }
    }
}

/// Entry type carried in the low 3 bits of an entity key's last byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EntryType {
    Metadata = 1,
    Data = 2,
    IndexRow = 3,
}

/// Raw 4-bit discriminator of a key, or 0 for an empty key
#[inline]
pub fn discriminator_of(key: &[u8]) -> u8 {
    key.first().map(|b| b >> 4).unwrap_or(0)
}

/// Decoded structure of a routable key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyParts {
    /// ENTITY or IDGEN key
    Data {
        discriminator: Discriminator,
        shard: u16,
        root_kind: u8,
        kind: u8,
        shape: u8,
        entry_type: u8,
    },

    /// INDEX row
    Index { kind: u8, index: u8 },
}

impl KeyParts {
    /// Classify a raw key according to its discriminator.
    ///
    /// Keys too short for their layout are rejected instead of read out of
    /// bounds, since they may come straight off the wire.
    pub fn classify(key: &[u8]) -> Result<Self> {
        let raw = discriminator_of(key);
        let discriminator =
            Discriminator::from_u8(raw).ok_or(KvError::UnknownDiscriminator(raw))?;

        match discriminator {
            Discriminator::Entity | Discriminator::IdGen => {
                if key.len() < MIN_ENTITY_KEY_LEN {
                    return Err(KvError::KeyTooShort {
                        discriminator: raw,
                        len: key.len(),
                    });
                }
                let sz = key.len();
                Ok(KeyParts::Data {
                    discriminator,
                    shard: (((key[0] & 0x0f) as u16) << 8) | key[1] as u16,
                    root_kind: key[6],
                    kind: key[sz - 2],
                    shape: key[sz - 1] >> 3,
                    entry_type: key[sz - 1] & 0x07,
                })
            }
            Discriminator::Index => {
                if key.len() < MIN_INDEX_KEY_LEN {
                    return Err(KvError::KeyTooShort {
                        discriminator: raw,
                        len: key.len(),
                    });
                }
                Ok(KeyParts::Index {
                    kind: key[1],
                    index: key[2],
                })
            }
        }
    }

    pub fn discriminator(&self) -> Discriminator {
        match self {
            KeyParts::Data { discriminator, .. } => *discriminator,
            KeyParts::Index { .. } => Discriminator::Index,
        }
    }

    /// Shard id, for ENTITY/IDGEN keys only
    pub fn shard(&self) -> Option<u16> {
        match self {
            KeyParts::Data { shard, .. } => Some(*shard),
            KeyParts::Index { .. } => None,
        }
    }
}

/// Extract the logical payload a query returns for a stored key.
///
/// Returns `None` when the row must be skipped: an ENTITY entry that is not
/// DATA, or whose kind/shape does not match a non-zero filter.
pub fn extract_payload(raw: &[u8], kind_filter: u8, shape_filter: u8) -> Option<&[u8]> {
    match Discriminator::from_u8(discriminator_of(raw)) {
        Some(Discriminator::Index) => Some(index_payload(raw)),
        Some(Discriminator::Entity) => {
            let sz = raw.len();
            if sz < 2 {
                return None;
            }
            let last = raw[sz - 1];
            if last & 0x07 != EntryType::Data as u8 {
                return None;
            }
            if shape_filter != 0 && shape_filter != last >> 3 {
                return None;
            }
            if kind_filter != 0 && kind_filter != raw[sz - 2] {
                return None;
            }
            Some(raw)
        }
        // IDGEN rows and anything outside the known key spaces come back whole
        Some(Discriminator::IdGen) | None => Some(raw),
    }
}

/// Suffix of an index row following its zero-byte boundary
fn index_payload(raw: &[u8]) -> &[u8] {
    let sz = raw.len();
    if sz <= INDEX_STRIDE {
        return raw;
    }
    let mut j = sz - 1 - INDEX_STRIDE;
    loop {
        if raw[j] == 0 {
            return &raw[j + 1..];
        }
        if j < INDEX_STRIDE {
            return raw;
        }
        j -= INDEX_STRIDE;
    }
}
