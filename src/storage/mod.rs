//! Storage Module
//!
//! Storage instances and the router that owns them.
//!
//! ## Responsibilities
//! - Wrap the embedded ordered engine (sled) behind a small API:
//!   get, multi-get, batched atomic write, seekable cursor
//! - Map shards, root kinds and index ids to instances
//! - Open each instance directory exactly once
//!
//! ## Addressing Modes
//! ```text
//!            ┌──────────────────────┐
//!   key ───▶ │  KeyParts::classify  │
//!            └──────────┬───────────┘
//!          ENTITY/IDGEN │ INDEX
//!         ┌─────────────┴──────────────┐
//!         ▼                            ▼
//!   shard-{n}  or                 index-{i}
//!   shard-{n}/root-kind-{k}
//! ```

mod router;
mod store;

pub use router::ShardRouter;
pub use store::{Store, StoreCursor, WriteBatch};
