//! Error types for shardkv
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using KvError
pub type Result<T> = std::result::Result<T, KvError>;

/// Unified error type for shardkv operations
#[derive(Debug, Error)]
pub enum KvError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    Disconnected,

    // -------------------------------------------------------------------------
    // Lookup Sentinel
    // -------------------------------------------------------------------------
    /// Reported per key inside a `G` result, never as a request error
    #[error("<App_Entity_Not_Found>")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Routing Errors
    // -------------------------------------------------------------------------
    #[error("Invalid shard: {shard} (shard min {min}, shard range {range})")]
    ShardOutOfRange { shard: u16, min: u16, range: u16 },

    #[error("Unidentified discriminator: {0}")]
    UnknownDiscriminator(u8),

    #[error("Key too short for discriminator {discriminator}: {len} bytes")]
    KeyTooShort { discriminator: u8, len: usize },

    // -------------------------------------------------------------------------
    // Scan Errors
    // -------------------------------------------------------------------------
    #[error("Scan failed: {0}")]
    Scan(String),

    #[error("Invalid last filter operator: [{0}]")]
    InvalidFilterOp(u8),

    // -------------------------------------------------------------------------
    // Counter Errors
    // -------------------------------------------------------------------------
    #[error("Value for incr/decr must be 8-bytes. Got: {0} bytes")]
    InvalidValueSize(usize),

    // -------------------------------------------------------------------------
    // Instance Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Error opening {}: {message}", .path.display())]
    Open { path: PathBuf, message: String },

    #[error("Directory error at {}: {message}", .path.display())]
    Directory { path: PathBuf, message: String },

    // -------------------------------------------------------------------------
    // Protocol Errors
    // -------------------------------------------------------------------------
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid input: {0}")]
    InvalidParams(String),

    #[error("Invalid desc byte: 0x{0:x}")]
    UnknownOpcode(u8),

    #[error("Response too large: {len} bytes frames to {framed} (max {max})")]
    ResponseTooLarge { len: usize, framed: u64, max: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error message returned in a response envelope (client side)
    #[error("Server error: {0}")]
    Remote(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl KvError {
    /// True for errors raised while mapping a key to its storage instance
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            KvError::ShardOutOfRange { .. }
                | KvError::UnknownDiscriminator(_)
                | KvError::KeyTooShort { .. }
        )
    }
}

impl From<sled::Error> for KvError {
    fn from(e: sled::Error) -> Self {
        KvError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for KvError {
    fn from(e: bincode::Error) -> Self {
        KvError::Serialization(e.to_string())
    }
}
