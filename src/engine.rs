//! Engine Module
//!
//! The request dispatcher that ties routing, storage and queries together.
//!
//! ## Responsibilities
//! - Decode request envelopes and answer them with response envelopes
//! - Counters (`N`): read-modify-write under a per-key lock
//! - Multi-get (`G`), range query (`Q`) and batched update (`U`)
//! - Sort fatal errors (drop the connection) from in-band ones (answer them)

use std::fs;
use std::sync::Arc;

use crate::config::Config;
use crate::error::{KvError, Result};
use crate::locks::KeyLockSet;
use crate::network::RequestHandler;
use crate::protocol::{
    framed_len, BincodeCodec, Envelope, Request, Response, Value, ValueCodec,
};
use crate::query::{Query, QueryEngine};
use crate::storage::{ShardRouter, Store, WriteBatch};

/// Size of a stored counter value
const COUNTER_LEN: usize = 8;

/// The request dispatcher
///
/// ## Concurrency Model:
/// - Any number of workers call into the engine at once
/// - Stores synchronize their own reads and writes
/// - Counter read-modify-write cycles are serialized per key by
///   `counter_locks`; different keys proceed in parallel
pub struct Engine {
    /// Engine configuration
    config: Config,

    /// Key to storage-instance mapping; owns every open instance
    router: Arc<ShardRouter>,

    /// Per-key locks for counters
    counter_locks: KeyLockSet,

    /// Payload codec
    codec: Box<dyn ValueCodec>,
}

impl Engine {
    /// Open an engine with the given config
    ///
    /// On startup:
    /// 1. Wipe the base directory if asked to
    /// 2. Create the base directory
    /// 3. Build the router (instances open lazily on first use)
    pub fn open(config: Config) -> Result<Self> {
        if config.clear_on_startup && config.basedir.exists() {
            tracing::info!("Clearing base directory: {}", config.basedir.display());
            fs::remove_dir_all(&config.basedir)?;
        }
        fs::create_dir_all(&config.basedir)?;

        tracing::info!(
            basedir = %config.basedir.display(),
            shard_min = config.shard_min,
            shard_range = config.shard_range,
            per_kind = config.per_kind,
            "Engine ready"
        );

        let router = Arc::new(ShardRouter::new(&config));
        Ok(Self::new(config, router, Box::new(BincodeCodec)))
    }

    /// Assemble an engine from parts
    pub fn new(config: Config, router: Arc<ShardRouter>, codec: Box<dyn ValueCodec>) -> Self {
        Self {
            config,
            router,
            counter_locks: KeyLockSet::new(),
            codec,
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Add (`incr`) or subtract `delta` on the counter at `key`
    ///
    /// An absent key starts from `init`. The stored value must be exactly
    /// 8 bytes (big-endian u64); arithmetic wraps.
    pub fn incr_decr(&self, key: &[u8], incr: bool, delta: u64, init: u64) -> Result<u64> {
        let store = self.router.route_key(key)?;
        let _guard = self.counter_locks.acquire_one(key);

        let current = match store.get(key)? {
            None => init,
            Some(bytes) => {
                let raw: [u8; COUNTER_LEN] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| KvError::InvalidValueSize(bytes.len()))?;
                u64::from_be_bytes(raw)
            }
        };

        let next = if incr {
            current.wrapping_add(delta)
        } else {
            current.wrapping_sub(delta)
        };
        store.put(key, &next.to_be_bytes())?;

        tracing::trace!("IncrDecr: {} -> {}", current, next);
        Ok(next)
    }

    /// Fetch several keys, answering in request order
    ///
    /// Every key is routed before any read; the first routing failure fails
    /// the whole call.
    pub fn get_many(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        tracing::trace!("Get: #keys: {}", keys.len());
        let groups = self.group_by_store(keys.iter().map(Vec::as_slice))?;

        let mut values = vec![None; keys.len()];
        for (store, positions) in groups {
            let batch: Vec<&[u8]> = positions.iter().map(|&i| keys[i].as_slice()).collect();
            for (i, value) in positions.into_iter().zip(store.multi_get(&batch)?) {
                values[i] = value;
            }
        }
        Ok(values)
    }

    /// Run a range query on the instance `seek_low` routes to
    pub fn query(&self, query: &Query) -> Result<Vec<Vec<u8>>> {
        let store = self.router.route_key(&query.seek_low)?;
        let rows = QueryEngine::collect(&store, query)?;
        tracing::trace!("Query: #results: {}", rows.len());
        Ok(rows)
    }

    /// Apply puts and deletes, one atomic batch per storage instance
    ///
    /// Every key is routed before anything is written; a routing failure
    /// aborts the whole update.
    pub fn update(&self, puts: &[(Vec<u8>, Vec<u8>)], deletes: &[Vec<u8>]) -> Result<()> {
        tracing::trace!("Update: #Puts: {}, #Deletes: {}", puts.len(), deletes.len());
        let keys = puts
            .iter()
            .map(|(k, _)| k.as_slice())
            .chain(deletes.iter().map(Vec::as_slice));
        let groups = self.group_by_store(keys)?;

        for (store, positions) in groups {
            let mut batch = WriteBatch::new();
            for i in positions {
                match puts.get(i) {
                    Some((key, value)) => batch.put(key.as_slice(), value.as_slice()),
                    None => batch.delete(deletes[i - puts.len()].as_slice()),
                }
            }
            store.write(batch)?;
        }
        Ok(())
    }

    /// Execute a parsed request, producing its result value
    pub fn execute(&self, request: Request) -> Result<Value> {
        match request {
            Request::IncrDecr {
                key,
                incr,
                delta,
                init,
            } => Ok(Value::Uint(self.incr_decr(&key, incr, delta, init)?)),
            Request::Get { keys } => {
                let values = self
                    .get_many(&keys)?
                    .into_iter()
                    .map(|v| match v {
                        Some(bytes) => Value::Bytes(bytes),
                        None => Value::String(KvError::KeyNotFound.to_string()),
                    })
                    .collect();
                Ok(Value::Array(values))
            }
            Request::Query(query) => Ok(Value::Array(
                self.query(&query)?.into_iter().map(Value::Bytes).collect(),
            )),
            Request::Update { puts, deletes } => {
                self.update(&puts, &deletes)?;
                Ok(Value::Nil)
            }
        }
    }

    /// Answer one framed request payload with a response payload
    ///
    /// Returns `Err` only for fatal (connection-dropping) failures; every
    /// other failure is carried in the response's error slot. A result whose
    /// frame would exceed `max_frame_len` is replaced by a `ResponseTooLarge`
    /// error.
    pub fn handle_payload(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let envelope = Envelope::decode(self.codec.as_ref(), payload)?;

        let outcome = Request::parse(envelope.opcode, &envelope.params)
            .and_then(|request| self.execute(request));

        let response = match outcome {
            Ok(result) => Response::ok(envelope.id.clone(), result),
            Err(e) => {
                if e.is_routing() {
                    tracing::debug!("Request {} not routable: {}", envelope.opcode as char, e);
                } else {
                    tracing::warn!("Request {} failed: {}", envelope.opcode as char, e);
                }
                Response::error(envelope.id.clone(), &e)
            }
        };
        let encoded = self.codec.encode(&response.to_value())?;

        // Padding can push a large result past what the connection will frame
        let framed = framed_len(encoded.len())?;
        if framed <= self.config.max_frame_len {
            return Ok(encoded);
        }
        let err = KvError::ResponseTooLarge {
            len: encoded.len(),
            framed,
            max: self.config.max_frame_len,
        };
        tracing::warn!("Request {} rejected: {}", envelope.opcode as char, err);
        self.codec.encode(&Response::error(envelope.id, &err).to_value())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn router(&self) -> &Arc<ShardRouter> {
        &self.router
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Flush and release every storage instance
    pub fn close(&self) {
        self.router.shutdown();
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Route every key, grouping positions by instance in first-seen order
    fn group_by_store<'k>(
        &self,
        keys: impl Iterator<Item = &'k [u8]>,
    ) -> Result<Vec<(Arc<Store>, Vec<usize>)>> {
        let mut groups: Vec<(Arc<Store>, Vec<usize>)> = Vec::new();
        for (i, key) in keys.enumerate() {
            let store = self.router.route_key(key)?;
            match groups.iter_mut().find(|(s, _)| Arc::ptr_eq(s, &store)) {
                Some((_, positions)) => positions.push(i),
                None => groups.push((store, vec![i])),
            }
        }
        Ok(groups)
    }
}

impl RequestHandler for Engine {
    fn handle(&self, request: &[u8]) -> Result<Vec<u8>> {
        self.handle_payload(request)
    }
}
