//! Storage Instance
//!
//! One handle to the embedded ordered engine (sled) rooted at a directory.
//!
//! ## Responsibilities
//! - Point get and multi-get
//! - Single put and batched atomic writes (puts + deletes)
//! - Seekable cursor with forward/backward stepping
//!
//! Instances are internally synchronized: any number of threads may read,
//! write and iterate the same `Store` concurrently.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use sled::IVec;

use crate::config::StoreOptions;
use crate::error::{KvError, Result};

/// Flush interval handed to sled; writes are not synced individually
const FLUSH_EVERY_MS: u64 = 500;

/// An open storage instance
pub struct Store {
    /// Directory the instance is rooted at
    path: PathBuf,

    /// Options label, used as log prefix
    label: String,

    /// The sled database
    db: sled::Db,
}

impl Store {
    /// Open or create an instance at `path` with the given options
    pub fn open(path: &Path, options: &StoreOptions) -> Result<Self> {
        tracing::info!(store = %options.label, "Opening DB: {} ...", path.display());

        // sled has no open-file or memtable knobs; keep them visible in the log
        tracing::debug!(
            store = %options.label,
            max_open_files = options.max_open_files,
            write_buffer_size = options.write_buffer_size,
            block_cache = options.block_cache.as_deref().unwrap_or("-"),
            cache_capacity = options.cache_capacity,
            "Store options"
        );

        let db = sled::Config::new()
            .path(path)
            .cache_capacity(options.cache_capacity)
            .flush_every_ms(Some(FLUSH_EVERY_MS))
            .open()
            .map_err(|e| {
                tracing::error!(store = %options.label, "Error Opening DB: {}: err: {}", path.display(), e);
                KvError::Open {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?;

        tracing::info!(store = %options.label, "Successfully opened DB: {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            label: options.label.clone(),
            db,
        })
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    /// Get several values at once, in key order of the request
    pub fn multi_get<K: AsRef<[u8]>>(&self, keys: &[K]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k.as_ref())).collect()
    }

    /// Put a single key-value pair
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.insert(key, value)?;
        Ok(())
    }

    /// Apply a batch atomically
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        tracing::trace!(
            store = %self.label,
            "Batch write: {} puts, {} deletes",
            batch.puts.len(),
            batch.deletes.len()
        );

        let mut sled_batch = sled::Batch::default();
        for (key, value) in batch.puts {
            sled_batch.insert(key, value);
        }
        for key in batch.deletes {
            sled_batch.remove(key);
        }
        self.db.apply_batch(sled_batch)?;
        Ok(())
    }

    /// Create an unpositioned cursor over this instance
    pub fn cursor(&self) -> StoreCursor<'_> {
        StoreCursor::new(&self.db)
    }

    /// Flush dirty data to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Number of keys stored (walks the whole instance; tests/debugging only)
    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("label", &self.label)
            .finish()
    }
}

// =============================================================================
// Write Batch
// =============================================================================

/// Puts and deletes applied together; deletes win over puts of the same key
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    puts: Vec<(Vec<u8>, Vec<u8>)>,
    deletes: Vec<Vec<u8>>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.puts.push((key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.deletes.push(key.into());
    }

    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.deletes.is_empty()
    }

    pub fn put_count(&self) -> usize {
        self.puts.len()
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.len()
    }
}

// =============================================================================
// Cursor
// =============================================================================

/// Seekable, bidirectional cursor over a store
///
/// Mirrors the classic LSM iterator contract: position with `seek` or
/// `seek_to_last`, step with `next`/`prev`, and check `valid` before reading
/// `key`. Once invalid, the cursor stays invalid. Engine failures make it
/// invalid and are reported through `status`.
pub struct StoreCursor<'a> {
    db: &'a sled::Db,

    /// Entry under the cursor, if valid
    current: Option<(IVec, IVec)>,

    /// Live iterator for forward steps, built lazily from `current`
    forward: Option<sled::Iter>,

    /// Live iterator for backward steps, built lazily from `current`
    backward: Option<sled::Iter>,

    /// First engine failure seen
    error: Option<String>,
}

impl<'a> StoreCursor<'a> {
    fn new(db: &'a sled::Db) -> Self {
        Self {
            db,
            current: None,
            forward: None,
            backward: None,
            error: None,
        }
    }

    /// Position at the first key >= `target`
    pub fn seek(&mut self, target: &[u8]) {
        let mut iter = self.db.range(target.to_vec()..);
        self.backward = None;
        self.current = None;
        let item = iter.next();
        self.forward = Some(iter);
        self.absorb(item);
    }

    /// Position at the last key
    pub fn seek_to_last(&mut self) {
        let mut iter = self.db.iter();
        self.forward = None;
        self.current = None;
        let item = iter.next_back();
        self.backward = Some(iter);
        self.absorb(item);
    }

    /// Step to the next key; no-op when invalid
    pub fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.backward = None;
        let db = self.db;
        let iter = self.forward.get_or_insert_with(|| {
            db.range::<IVec, _>((Bound::Excluded(key), Bound::Unbounded))
        });
        let item = iter.next();
        self.absorb(item);
    }

    /// Step to the previous key; no-op when invalid
    pub fn prev(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.forward = None;
        let db = self.db;
        let iter = self.backward.get_or_insert_with(|| db.range(..key));
        let item = iter.next_back();
        self.absorb(item);
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Key under the cursor. Only meaningful while `valid()`.
    pub fn key(&self) -> &[u8] {
        self.current.as_ref().map(|(k, _)| k.as_ref()).unwrap_or(&[])
    }

    /// Value under the cursor. Only meaningful while `valid()`.
    pub fn value(&self) -> &[u8] {
        self.current.as_ref().map(|(_, v)| v.as_ref()).unwrap_or(&[])
    }

    /// Engine status: the first error seen while stepping, if any
    pub fn status(&self) -> Result<()> {
        match &self.error {
            Some(message) => Err(KvError::Storage(message.clone())),
            None => Ok(()),
        }
    }

    fn absorb(&mut self, item: Option<sled::Result<(IVec, IVec)>>) {
        match item {
            Some(Ok(entry)) => self.current = Some(entry),
            Some(Err(e)) => {
                self.error.get_or_insert_with(|| e.to_string());
                self.current = None;
            }
            None => self.current = None,
        }
    }
}
