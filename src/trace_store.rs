//! Per-trace records: the packed bitmap and its covered-edge count.
//!
//! ```text
//! "trc:<filename>" -> packed bitmap
//! "blk:<filename>" -> u64 covered count (big-endian)
//! ```
//!
//! Saving the same filename again replaces both records in one transaction.
//! Concurrent saves of one filename are last-writer-wins.

use crate::bitmap;
use crate::error::Result;
use crate::store::{decode_u64, encode_u64, KvStore, LmdbStore};
use std::collections::BTreeSet;

pub const TRACE_PREFIX: &str = "trc:";
pub const COUNT_PREFIX: &str = "blk:";

/// A stored trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    pub bitmap: Vec<u8>,
    /// Cardinality of the edge set at encode time
    pub covered_count: u64,
}

impl TraceRecord {
    /// Decode the bitmap into edge ids.
    pub fn ids(&self) -> Result<BTreeSet<u64>> {
        Ok(bitmap::decode(&self.bitmap)?)
    }
}

pub struct TraceStore<S: KvStore = LmdbStore> {
    store: S,
}

impl<S: KvStore> TraceStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Write both records for `filename` atomically.
    pub fn save(&self, filename: &str, bitmap: &[u8], covered_count: u64) -> Result<()> {
        let trace_key = trace_key(filename);
        let count_key = count_key(filename);
        self.store.transaction(|txn| {
            txn.put(trace_key.as_bytes(), bitmap)?;
            txn.put(count_key.as_bytes(), &encode_u64(covered_count))
        })
    }

    pub fn bitmap(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        self.store.get(trace_key(filename).as_bytes())
    }

    pub fn covered_count(&self, filename: &str) -> Result<Option<u64>> {
        let key = count_key(filename);
        self.store
            .get(key.as_bytes())?
            .map(|bytes| decode_u64(key.as_bytes(), &bytes))
            .transpose()
    }

    /// Both records for `filename`, or `None` if it was never saved.
    pub fn load(&self, filename: &str) -> Result<Option<TraceRecord>> {
        let Some(bitmap) = self.bitmap(filename)? else {
            return Ok(None);
        };
        let covered_count = self.covered_count(filename)?.unwrap_or(0);
        Ok(Some(TraceRecord {
            bitmap,
            covered_count,
        }))
    }

    /// Number of stored traces.
    pub fn trace_count(&self) -> Result<u64> {
        self.store.count_prefix(COUNT_PREFIX.as_bytes())
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

#[inline]
fn trace_key(filename: &str) -> String {
    format!("{TRACE_PREFIX}{filename}")
}

#[inline]
fn count_key(filename: &str) -> String {
    format!("{COUNT_PREFIX}{filename}")
}
