//! # shardkv
//!
//! A sharded key-value database server with:
//! - Hierarchical binary keys routed to per-shard storage instances
//! - Ordered range queries with filter operators, offset and limit
//! - Atomic counters and batched per-instance updates
//! - Non-blocking TCP protocol with a length-prefixed binary framing
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                             │
//! │        (acceptor, readiness poller, worker threads)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ framed payloads
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 Engine (request dispatcher)                 │
//! │            N: counter  G: get  Q: query  U: update          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ ShardRouter │          │ QueryEngine │
//!   │ (key→store) │          │   (scans)   │
//!   └──────┬──────┘          └──────┬──────┘
//!          │                        │
//!          ▼                        ▼
//!   ┌───────────────────────────────────────┐
//!   │   Store (sled)  shard-N / index-I     │
//!   └───────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod engine;
pub mod keys;
pub mod locks;
pub mod network;
pub mod protocol;
pub mod query;
pub mod storage;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, OptionsTable, StoreOptions};
pub use engine::Engine;
pub use error::{KvError, Result};
pub use query::{FilterOp, Query, QueryEngine};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of shardkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
