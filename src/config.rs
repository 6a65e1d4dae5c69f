//! Configuration for shardkv
//!
//! Centralized configuration with sensible defaults, plus the loader for the
//! server's line-based init file.
//!
//! ## Init File Format
//! ```text
//! basedir = /var/lib/shardkv
//! block_cache.small,hot = 8388608          # shared cache size in bytes
//! kind.default = 500, 16, 4, small          # maxOpen, writeBufMB, blockKB, cache
//! kind.3,7     = 1000, 64, 4, hot
//! index.default = 500, 8, 4, 32             # an integer cache is a size in MB
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{KvError, Result};

/// Default cache capacity per storage instance (64 MB)
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default write buffer size (16 MB)
pub const DEFAULT_WRITE_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Main configuration for a shardkv server
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all storage instances
    /// Internal structure:
    ///   {basedir}/
    ///     ├── shard-{n}/                 (sharded mode)
    ///     │   └── root-kind-{k}/         (per-kind mode)
    ///     └── index-{i}/                 (index storage)
    pub basedir: PathBuf,

    /// Open one instance per (shard, root kind) instead of one per shard
    pub per_kind: bool,

    /// Wipe `basedir` before serving
    pub clear_on_startup: bool,

    /// Per-kind and per-index engine tuning
    pub options: OptionsTable,

    // -------------------------------------------------------------------------
    // Shard Configuration
    // -------------------------------------------------------------------------
    /// First shard served by this process
    pub shard_min: u16,

    /// Number of consecutive shards served, starting at `shard_min`
    pub shard_range: u16,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address
    pub listen_addr: String,

    /// Worker threads driving connections
    pub workers: usize,

    /// Largest request payload accepted (bytes)
    pub max_frame_len: u64,

    /// Idle sleep of the readiness poller (milliseconds)
    pub poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            basedir: PathBuf::from("./shardkv_data"),
            per_kind: false,
            clear_on_startup: false,
            options: OptionsTable::default(),
            shard_min: 1,
            shard_range: 1,
            listen_addr: "127.0.0.1:9999".to_string(),
            workers: 8,
            max_frame_len: 64 * 1024 * 1024, // 64 MB
            poll_interval_ms: 1,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// True if `shard` falls inside this server's shard range
    pub fn serves_shard(&self, shard: u16) -> bool {
        let shard = shard as u32;
        let min = self.shard_min as u32;
        shard >= min && shard < min + self.shard_range as u32
    }
}

// =============================================================================
// Storage Instance Options
// =============================================================================

/// Tuning for one storage instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Name used as the instance's log prefix (e.g. `kind.3`, `index.default`)
    pub label: String,

    /// Max open file handles (-1 = unlimited)
    pub max_open_files: i32,

    /// Write buffer size (bytes)
    pub write_buffer_size: usize,

    /// Block size (bytes)
    pub block_size: usize,

    /// Named shared block cache, if the options referenced one
    pub block_cache: Option<String>,

    /// Resolved cache capacity (bytes)
    pub cache_capacity: u64,
}

impl StoreOptions {
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            label: "default".to_string(),
            max_open_files: -1,
            write_buffer_size: DEFAULT_WRITE_BUFFER_SIZE,
            block_size: 4 * 1024,
            block_cache: None,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Options resolved by kind/index id, with defaults for unlisted ids
#[derive(Debug, Clone)]
pub struct OptionsTable {
    kinds: HashMap<u8, StoreOptions>,
    indexes: HashMap<u8, StoreOptions>,
    default_kind: StoreOptions,
    default_index: StoreOptions,
    block_caches: HashMap<String, u64>,
}

impl Default for OptionsTable {
    fn default() -> Self {
        Self {
            kinds: HashMap::new(),
            indexes: HashMap::new(),
            default_kind: StoreOptions::with_label("kind.default"),
            default_index: StoreOptions::with_label("index.default"),
            block_caches: HashMap::new(),
        }
    }
}

impl OptionsTable {
    /// Options for a kind id, falling back to the kind default
    pub fn kind(&self, kind: u8) -> &StoreOptions {
        self.kinds.get(&kind).unwrap_or(&self.default_kind)
    }

    /// Options for an index id, falling back to the index default
    pub fn index(&self, index: u8) -> &StoreOptions {
        self.indexes.get(&index).unwrap_or(&self.default_index)
    }

    pub fn default_kind(&self) -> &StoreOptions {
        &self.default_kind
    }

    pub fn default_index(&self) -> &StoreOptions {
        &self.default_index
    }

    /// Size of a named block cache, if declared
    pub fn block_cache(&self, name: &str) -> Option<u64> {
        self.block_caches.get(name).copied()
    }

    pub fn set_kind(&mut self, kind: u8, options: StoreOptions) {
        self.kinds.insert(kind, options);
    }

    pub fn set_index(&mut self, index: u8, options: StoreOptions) {
        self.indexes.insert(index, options);
    }

    pub fn set_default_kind(&mut self, options: StoreOptions) {
        self.default_kind = options;
    }

    pub fn set_default_index(&mut self, options: StoreOptions) {
        self.default_index = options;
    }

    pub fn set_block_cache(&mut self, name: impl Into<String>, bytes: u64) {
        self.block_caches.insert(name.into(), bytes);
    }

    /// Parse one `kind.*` / `index.*` value: `maxOpen, writeBufMB, blockKB, cache`
    fn parse_store_options(&self, label: String, value: &str) -> Result<StoreOptions> {
        let fields: Vec<&str> = value.split(',').map(str::trim).collect();
        if fields.len() != 4 {
            return Err(KvError::Config(format!(
                "{}: expected 4 comma-separated fields, got {}",
                label,
                fields.len()
            )));
        }

        let max_open_files = parse_number::<i32>(&label, fields[0])?;
        let write_buffer_mb = parse_number::<usize>(&label, fields[1])?;
        let block_kb = parse_number::<usize>(&label, fields[2])?;
        let write_buffer_size = write_buffer_mb
            .checked_mul(1 << 20)
            .ok_or_else(|| too_large(&label, fields[1]))?;
        let block_size = block_kb
            .checked_mul(1 << 10)
            .ok_or_else(|| too_large(&label, fields[2]))?;

        // An integer cache field is an inline size in MB, anything else names
        // a previously declared block_cache
        let (block_cache, cache_capacity) = match fields[3].parse::<u64>() {
            Ok(mb) => {
                let bytes = mb
                    .checked_mul(1 << 20)
                    .ok_or_else(|| too_large(&label, fields[3]))?;
                (None, bytes)
            }
            Err(_) => {
                let name = fields[3].to_string();
                let size = self.block_cache(&name).ok_or_else(|| {
                    KvError::Config(format!("{}: unknown block cache '{}'", label, name))
                })?;
                (Some(name), size)
            }
        };

        Ok(StoreOptions {
            label,
            max_open_files,
            write_buffer_size,
            block_size,
            block_cache,
            cache_capacity,
        })
    }
}

fn parse_number<T: std::str::FromStr>(label: &str, field: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| KvError::Config(format!("{}: invalid number '{}'", label, field)))
}

fn too_large(label: &str, field: &str) -> KvError {
    KvError::Config(format!("{}: size '{}' is too large", label, field))
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the base directory (root for all storage instances)
    pub fn basedir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.basedir = path.into();
        self
    }

    /// Use one storage instance per (shard, root kind)
    pub fn per_kind(mut self, per_kind: bool) -> Self {
        self.config.per_kind = per_kind;
        self
    }

    /// Wipe the base directory on startup
    pub fn clear_on_startup(mut self, clear: bool) -> Self {
        self.config.clear_on_startup = clear;
        self
    }

    /// Set the served shard range
    pub fn shards(mut self, shard_min: u16, shard_range: u16) -> Self {
        self.config.shard_min = shard_min;
        self.config.shard_range = shard_range;
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the number of worker threads
    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count.max(1);
        self
    }

    /// Set the largest accepted request payload (in bytes)
    pub fn max_frame_len(mut self, bytes: u64) -> Self {
        self.config.max_frame_len = bytes;
        self
    }

    /// Set the readiness poller's idle sleep (in milliseconds)
    pub fn poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.poll_interval_ms = ms;
        self
    }

    /// Replace the per-kind/per-index options table
    pub fn options(mut self, options: OptionsTable) -> Self {
        self.config.options = options;
        self
    }

    /// Apply an init file read from `path`
    pub fn init_file(self, path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            KvError::Config(format!("unable to open init file {}: {}", path.display(), e))
        })?;
        self.load_init(BufReader::new(file))
    }

    /// Apply init-file lines: `basedir`, `block_cache.*`, `kind.*`, `index.*`
    pub fn load_init<R: BufRead>(mut self, reader: R) -> Result<Self> {
        for line in reader.lines() {
            let line = line?;
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((name, value)) = line.split_once('=') else {
                continue;
            };
            let (name, value) = (name.trim(), value.trim());

            if name == "basedir" {
                self.config.basedir = PathBuf::from(value);
                continue;
            }

            let Some((section, ids)) = name.split_once('.') else {
                continue;
            };
            let ids: Vec<&str> = ids.split(',').map(str::trim).collect();

            match section {
                "block_cache" => {
                    let bytes = parse_number::<u64>(name, value)?;
                    for id in ids {
                        self.config.options.set_block_cache(id, bytes);
                    }
                }
                "kind" | "index" => {
                    for id in ids {
                        let label = format!("{}.{}", section, id);
                        let options = self.config.options.parse_store_options(label, value)?;
                        let table = &mut self.config.options;
                        match (section, id, id.parse::<u8>()) {
                            ("kind", _, Ok(k)) => table.set_kind(k, options),
                            ("index", _, Ok(i)) => table.set_index(i, options),
                            ("kind", "default", _) => table.set_default_kind(options),
                            ("index", "default", _) => table.set_default_index(options),
                            _ => tracing::warn!("Ignoring options for unknown id {}.{}", section, id),
                        }
                    }
                }
                _ => tracing::debug!("Ignoring init entry: {}", name),
            }
        }
        Ok(self)
    }

    pub fn build(self) -> Config {
        self.config
    }
}
