//! Query Engine
//!
//! Ordered range scans over a single storage instance.
//!
//! ## Filter Operators
//! ```text
//! op   dir   initial skip      mid-scan skip              stop
//! ==   fwd   -                 -                          prefix != seek_low
//! >=   fwd   -                 -                          seek_high
//! >    fwd   -                 leading keys == seek_low   seek_high
//! <=   bwd   -                 -                          seek_high
//! <    bwd   one entry         leading keys == seek_low   seek_high
//! ^    fwd   seek pos if ==    -                          prefix != seek_low
//! ```
//!
//! `^` is the ancestor query. It ignores seek_high and the filter operator.
//! A cursor query (`with_cursor`) resumes exactly at seek_low, so it skips
//! nothing.

use crate::error::{KvError, Result};
use crate::keys::{discriminator_of, extract_payload};
use crate::storage::{Store, StoreCursor};

/// Filter operator of the query's last filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FilterOp {
    Eq = 1,
    Gte = 2,
    Gt = 3,
    Lte = 4,
    Lt = 5,
}

impl TryFrom<u8> for FilterOp {
    type Error = KvError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            1 => Ok(FilterOp::Eq),
            2 => Ok(FilterOp::Gte),
            3 => Ok(FilterOp::Gt),
            4 => Ok(FilterOp::Lte),
            5 => Ok(FilterOp::Lt),
            _ => Err(KvError::InvalidFilterOp(code)),
        }
    }
}

/// Parameters of one range scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub seek_low: Vec<u8>,
    /// Empty means unbounded
    pub seek_high: Vec<u8>,
    /// 0 matches every kind
    pub kind: u8,
    /// 0 matches every shape
    pub shape: u8,
    pub ancestor_only: bool,
    pub with_cursor: bool,
    /// Raw operator code; validated when the scan starts
    pub filter_op: u8,
    pub offset: usize,
    pub limit: usize,
}

impl Query {
    /// Query starting at `seek_low` with the given operator and no bounds/filters
    pub fn new(seek_low: impl Into<Vec<u8>>, filter_op: FilterOp) -> Self {
        Self {
            seek_low: seek_low.into(),
            seek_high: Vec::new(),
            kind: 0,
            shape: 0,
            ancestor_only: false,
            with_cursor: false,
            filter_op: filter_op as u8,
            offset: 0,
            limit: usize::MAX,
        }
    }

    /// Ancestor query: every descendant of `parent`, excluding `parent`
    pub fn ancestor(parent: impl Into<Vec<u8>>) -> Self {
        Self {
            ancestor_only: true,
            ..Self::new(parent, FilterOp::Eq)
        }
    }

    pub fn seek_high(mut self, high: impl Into<Vec<u8>>) -> Self {
        self.seek_high = high.into();
        self
    }

    pub fn kind(mut self, kind: u8) -> Self {
        self.kind = kind;
        self
    }

    pub fn shape(mut self, shape: u8) -> Self {
        self.shape = shape;
        self
    }

    pub fn with_cursor(mut self, with_cursor: bool) -> Self {
        self.with_cursor = with_cursor;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Scan behavior derived from a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Plan {
    forward: bool,
    /// Forward: skip the seek position if it matches. Backward: always step once.
    skip_one: bool,
    /// Skip every leading key that has seek_low as prefix
    skip_first_match: bool,
    /// End the scan at the first key without seek_low as prefix
    stop_if_not_match: bool,
    /// Honor seek_high
    bounded: bool,
}

impl Plan {
    fn for_query(query: &Query) -> Result<Self> {
        let mut plan = Plan {
            forward: true,
            skip_one: false,
            skip_first_match: false,
            stop_if_not_match: false,
            bounded: true,
        };

        if query.ancestor_only {
            plan.bounded = false;
            plan.skip_one = true;
            plan.stop_if_not_match = true;
        } else {
            match FilterOp::try_from(query.filter_op)? {
                FilterOp::Eq => plan.stop_if_not_match = true,
                FilterOp::Gte => {}
                FilterOp::Gt => plan.skip_first_match = true,
                FilterOp::Lte => plan.forward = false,
                FilterOp::Lt => {
                    plan.forward = false;
                    plan.skip_one = true;
                    plan.skip_first_match = true;
                }
            }
        }

        if query.with_cursor {
            plan.skip_one = false;
            plan.skip_first_match = false;
        }
        Ok(plan)
    }
}

/// Runs range scans
pub struct QueryEngine;

impl QueryEngine {
    /// Start a scan over `store`
    ///
    /// Fails up front on an invalid operator or an empty seek position; engine
    /// failures during the walk surface as the iterator's last item.
    pub fn scan<'a>(store: &'a Store, query: &'a Query) -> Result<Scan<'a>> {
        if query.seek_low.is_empty() {
            return Err(KvError::Scan("empty seek position".to_string()));
        }
        let plan = Plan::for_query(query)?;

        Ok(Scan {
            cursor: store.cursor(),
            query,
            plan,
            discriminator: discriminator_of(&query.seek_low),
            state: ScanState::Unpositioned,
            emitted: 0,
            scanned: 0,
        })
    }

    /// Run a scan to completion and collect its payloads
    pub fn collect(store: &Store, query: &Query) -> Result<Vec<Vec<u8>>> {
        Self::scan(store, query)?.collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Unpositioned,
    Running,
    Finished,
}

/// Lazy, finite, non-restartable sequence of query payloads
pub struct Scan<'a> {
    cursor: StoreCursor<'a>,
    query: &'a Query,
    plan: Plan,
    discriminator: u8,
    state: ScanState,
    emitted: usize,
    scanned: usize,
}

impl Scan<'_> {
    /// Rows emitted so far
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// Place the cursor on the first candidate row. Returns false if the
    /// walk is already over.
    fn position(&mut self) -> bool {
        let query = self.query;
        let seek_low = query.seek_low.as_slice();
        self.cursor.seek(seek_low);

        // Nothing at or after seek_low ends the walk in either direction
        if !self.cursor.valid() {
            return false;
        }

        if self.plan.skip_one {
            if self.plan.forward {
                if self.cursor.key().starts_with(seek_low) {
                    self.cursor.next();
                }
            } else {
                self.cursor.prev();
            }
            if !self.cursor.valid() {
                return false;
            }
        }

        if self.plan.skip_first_match {
            while self.cursor.key().starts_with(seek_low) {
                self.step();
                if !self.cursor.valid() {
                    return false;
                }
            }
        }

        for _ in 0..query.offset {
            self.step();
            if !self.cursor.valid() {
                return false;
            }
        }
        true
    }

    fn step(&mut self) {
        if self.plan.forward {
            self.cursor.next();
        } else {
            self.cursor.prev();
        }
    }

    /// True once `key` lies beyond seek_high in the scan direction
    fn past_high(&self, key: &[u8]) -> bool {
        let high = self.query.seek_high.as_slice();
        if !self.plan.bounded || high.is_empty() {
            return false;
        }
        let prefix = &key[..key.len().min(high.len())];
        if self.plan.forward {
            prefix > high
        } else {
            prefix < high
        }
    }

    fn finish(&mut self) -> Option<Result<Vec<u8>>> {
        self.state = ScanState::Finished;
        tracing::trace!("In Query: #scans: {}, #results: {}", self.scanned, self.emitted);
        match self.cursor.status() {
            Ok(()) => None,
            Err(e) => Some(Err(KvError::Scan(e.to_string()))),
        }
    }
}

impl Iterator for Scan<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            ScanState::Finished => return None,
            ScanState::Unpositioned => {
                self.state = ScanState::Running;
                if !self.position() {
                    return self.finish();
                }
            }
            ScanState::Running => {}
        }

        loop {
            if self.emitted >= self.query.limit || !self.cursor.valid() {
                return self.finish();
            }
            self.scanned += 1;

            let query = self.query;
            let key = self.cursor.key();

            // Crossed into a different key space (e.g. index rows into entities)
            if discriminator_of(key) != self.discriminator {
                return self.finish();
            }
            if self.plan.stop_if_not_match && !key.starts_with(&query.seek_low) {
                return self.finish();
            }
            if self.past_high(key) {
                return self.finish();
            }

            let payload = extract_payload(key, query.kind, query.shape).map(<[u8]>::to_vec);
            self.step();

            if let Some(payload) = payload {
                self.emitted += 1;
                return Some(Ok(payload));
            }
        }
    }
}
