//! Shard Router
//!
//! Maps keys to storage instances and owns every open instance.
//!
//! ## Responsibilities
//! - Validate ENTITY/IDGEN shards against the served range
//! - Resolve a key to its instance (sharded, per-kind, or index storage)
//! - Open instances lazily with per-kind/per-index options, exactly once per
//!   directory
//! - Keep instances open for the process lifetime; flush them on shutdown
//!
//! ## Directory Layout
//! ```text
//! {basedir}/
//!   ├── shard-{n}/                  one instance per shard
//!   ├── shard-{n}/root-kind-{k}/    one instance per (shard, root kind)
//!   └── index-{i}/                  one instance per index id
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{Config, OptionsTable, StoreOptions};
use crate::error::{KvError, Result};
use crate::keys::KeyParts;
use crate::locks::KeyLockSet;

use super::Store;

/// Index ids are a single byte, so the index table has a fixed size
const INDEX_SLOTS: usize = 256;

/// Open instances, addressed three ways
///
/// Every handle is also recorded under its directory so a path is never
/// opened twice, whichever addressing mode reached it first.
struct Instances {
    shards: HashMap<u16, Arc<Store>>,
    per_kind: HashMap<(u16, u8), Arc<Store>>,
    indexes: Vec<Option<Arc<Store>>>,
    by_path: HashMap<PathBuf, Arc<Store>>,
}

impl Instances {
    fn new() -> Self {
        Self {
            shards: HashMap::new(),
            per_kind: HashMap::new(),
            indexes: vec![None; INDEX_SLOTS],
            by_path: HashMap::new(),
        }
    }
}

/// Routes keys to storage instances
///
/// ## Concurrency:
/// - `instances`: one router-wide Mutex, held only for map lookups/inserts
/// - `dir_locks`: serializes first opens of the same directory; opens of
///   different directories proceed in parallel
pub struct ShardRouter {
    basedir: PathBuf,
    shard_min: u16,
    shard_range: u16,
    per_kind: bool,
    options: OptionsTable,
    dir_locks: KeyLockSet,
    instances: Mutex<Instances>,
}

impl ShardRouter {
    /// Create a router from config. No instance is opened until first use.
    pub fn new(config: &Config) -> Self {
        Self {
            basedir: config.basedir.clone(),
            shard_min: config.shard_min,
            shard_range: config.shard_range,
            per_kind: config.per_kind,
            options: config.options.clone(),
            dir_locks: KeyLockSet::new(),
            instances: Mutex::new(Instances::new()),
        }
    }

    /// Resolve the instance a key belongs to
    pub fn route_key(&self, key: &[u8]) -> Result<Arc<Store>> {
        match KeyParts::classify(key)? {
            KeyParts::Data {
                shard, root_kind, ..
            } => {
                self.check_shard(shard)?;
                self.data_store(shard, root_kind)
            }
            KeyParts::Index { index, .. } => self.index_store(index),
        }
    }

    /// Data instance for a shard, honoring the addressing mode
    pub fn data_store(&self, shard: u16, root_kind: u8) -> Result<Arc<Store>> {
        if self.per_kind {
            self.kind_store(shard, root_kind)
        } else {
            self.shard_store(shard)
        }
    }

    /// Instance holding a whole shard (sharded mode)
    pub fn shard_store(&self, shard: u16) -> Result<Arc<Store>> {
        if let Some(store) = self.instances.lock().shards.get(&shard) {
            return Ok(Arc::clone(store));
        }

        let path = self.basedir.join(format!("shard-{}", shard));
        let store = self.open_instance(&path, self.options.default_kind())?;
        self.instances
            .lock()
            .shards
            .insert(shard, Arc::clone(&store));
        Ok(store)
    }

    /// Instance holding one root kind of a shard (per-kind mode)
    pub fn kind_store(&self, shard: u16, root_kind: u8) -> Result<Arc<Store>> {
        if let Some(store) = self.instances.lock().per_kind.get(&(shard, root_kind)) {
            return Ok(Arc::clone(store));
        }

        let shard_dir = self.basedir.join(format!("shard-{}", shard));
        ensure_dir(&shard_dir)?;
        let path = shard_dir.join(format!("root-kind-{}", root_kind));
        ensure_dir(&path)?;

        let store = self.open_instance(&path, self.options.kind(root_kind))?;
        self.instances
            .lock()
            .per_kind
            .insert((shard, root_kind), Arc::clone(&store));
        Ok(store)
    }

    /// Instance holding one index
    pub fn index_store(&self, index: u8) -> Result<Arc<Store>> {
        if let Some(store) = &self.instances.lock().indexes[index as usize] {
            return Ok(Arc::clone(store));
        }

        let path = self.basedir.join(format!("index-{}", index));
        let store = self.open_instance(&path, self.options.index(index))?;
        self.instances.lock().indexes[index as usize] = Some(Arc::clone(&store));
        Ok(store)
    }

    /// Open the instance rooted at `path`, or return it if already open
    ///
    /// Concurrent first opens of the same directory are serialized by a
    /// `db-dir:` lock; the loser finds the winner's handle in the cache.
    /// Failed opens are not cached, so a later call retries.
    pub fn open_instance(&self, path: &Path, options: &StoreOptions) -> Result<Arc<Store>> {
        let lock_name = format!("db-dir:{}", path.display());
        let _dir_guard = self.dir_locks.acquire_one(lock_name.as_bytes());

        if let Some(store) = self.instances.lock().by_path.get(path) {
            return Ok(Arc::clone(store));
        }

        if path.exists() && !path.is_dir() {
            return Err(KvError::Directory {
                path: path.to_path_buf(),
                message: "Not a directory".to_string(),
            });
        }

        // The engine open runs without the router lock held
        let store = Arc::new(Store::open(path, options)?);

        self.instances
            .lock()
            .by_path
            .insert(path.to_path_buf(), Arc::clone(&store));
        Ok(store)
    }

    /// Flush and release every instance (router teardown)
    pub fn shutdown(&self) {
        let stores: Vec<Arc<Store>> = {
            let mut instances = self.instances.lock();
            let stores = instances.by_path.values().cloned().collect();
            *instances = Instances::new();
            stores
        };

        for store in stores {
            if let Err(e) = store.flush() {
                tracing::warn!(store = %store.label(), "Flush on shutdown failed: {}", e);
            }
            tracing::info!(store = %store.label(), "Closed DB: {}", store.path().display());
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of distinct open instances
    pub fn instance_count(&self) -> usize {
        self.instances.lock().by_path.len()
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn per_kind(&self) -> bool {
        self.per_kind
    }

    pub fn options(&self) -> &OptionsTable {
        &self.options
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn check_shard(&self, shard: u16) -> Result<()> {
        let min = self.shard_min as u32;
        let shard32 = shard as u32;
        if shard32 < min || shard32 >= min + self.shard_range as u32 {
            return Err(KvError::ShardOutOfRange {
                shard,
                min: self.shard_min,
                range: self.shard_range,
            });
        }
        Ok(())
    }
}

impl Drop for ShardRouter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Make sure `path` is a directory, creating it if absent
fn ensure_dir(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(KvError::Directory {
            path: path.to_path_buf(),
            message: "Not a directory".to_string(),
        }),
        Err(_) => fs::create_dir_all(path).map_err(|e| KvError::Directory {
            path: path.to_path_buf(),
            message: format!("Error making directory: {}", e),
        }),
    }
}
