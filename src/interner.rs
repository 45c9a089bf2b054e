//! Edge interning: a durable, append-only bijection between edge keys and
//! dense integer ids.
//!
//! Layout inside the mapping store:
//!
//! ```text
//! "A=>B"  -> u64 id (big-endian)      forward record
//! "17"    -> "A=>B"                   reverse record (decimal id)
//! "idx"   -> u64 last allocated id    shared counter
//! ```
//!
//! Edge keys always contain `=>`, so they never collide with the decimal
//! reverse keys or the counter.
//!
//! A new id is allocated by incrementing the counter and writing both records
//! in the same write transaction. Other processes therefore either see the
//! counter bump together with both records, or none of the three.

use crate::error::{Error, Result};
use crate::store::{decode_u64, encode_u64, KvStore, KvTxn, LmdbStore};
use crate::trace::{EdgeId, EdgeKey};
use std::collections::BTreeSet;
use tracing::debug;

/// Reserved key of the id counter.
pub const COUNTER_KEY: &[u8] = b"idx";

pub struct EdgeInterner<S: KvStore = LmdbStore> {
    store: S,
}

impl<S: KvStore> EdgeInterner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Committed id of `key`, if it has one. Never writes.
    pub fn get(&self, key: &EdgeKey) -> Result<Option<EdgeId>> {
        self.store
            .get(key.as_bytes())?
            .map(|bytes| id_from_record(key, &bytes))
            .transpose()
    }

    /// Id of `key`, allocating the next one on first sighting.
    pub fn intern(&self, key: &EdgeKey) -> Result<EdgeId> {
        if let Some(id) = self.get(key)? {
            return Ok(id);
        }
        let id = self.store.transaction(|txn| intern_in(txn, key))?;
        debug!(edge = %key, id = %id, "interned new edge");
        Ok(id)
    }

    /// Intern a whole trace's keys.
    ///
    /// Keys that are already mapped are resolved from one read snapshot. Everything
    /// else is allocated in a single write transaction, so a failure part way
    /// through leaves no allocation from this batch behind.
    pub fn intern_all<'a, I>(&self, keys: I) -> Result<BTreeSet<EdgeId>>
    where
        I: IntoIterator<Item = &'a EdgeKey>,
    {
        let keys: Vec<&EdgeKey> = keys.into_iter().collect();
        let records = self.store.get_many(keys.iter().map(|key| key.as_bytes()))?;

        let mut ids = BTreeSet::new();
        let mut missing = Vec::new();
        for (key, record) in keys.into_iter().zip(records) {
            match record {
                Some(bytes) => {
                    ids.insert(id_from_record(key, &bytes)?);
                }
                None => missing.push(key),
            }
        }
        if missing.is_empty() {
            return Ok(ids);
        }

        let allocated = self.store.transaction(|txn| {
            let mut out = Vec::with_capacity(missing.len());
            for key in &missing {
                out.push(intern_in(txn, key)?);
            }
            Ok(out)
        })?;
        debug!(
            known = ids.len(),
            interned = allocated.len(),
            "interned trace edges"
        );
        ids.extend(allocated);
        Ok(ids)
    }

    /// Reverse lookup.
    ///
    /// Fails with [`Error::NotFound`] for an id this mapping never handed out,
    /// which means the trace and mapping stores do not belong together.
    pub fn lookup(&self, id: EdgeId) -> Result<EdgeKey> {
        let reverse = reverse_key(id);
        let bytes = self.store.get(reverse.as_bytes())?.ok_or(Error::NotFound(id))?;
        let text = String::from_utf8(bytes).map_err(|e| Error::CorruptRecord {
            key: reverse.clone(),
            reason: e.to_string(),
        })?;
        text.parse()
            .map_err(|reason| Error::CorruptRecord { key: reverse, reason })
    }

    /// Reverse lookup of a whole set; fails on the first unknown id.
    pub fn resolve_all<I>(&self, ids: I) -> Result<BTreeSet<EdgeKey>>
    where
        I: IntoIterator<Item = EdgeId>,
    {
        ids.into_iter().map(|id| self.lookup(id)).collect()
    }

    /// Number of distinct edges observed so far.
    ///
    /// Allocation is gap-free and every id has exactly one reverse record,
    /// so this is the counter's value.
    pub fn edge_count(&self) -> Result<u64> {
        match self.store.get(COUNTER_KEY)? {
            Some(bytes) => decode_u64(COUNTER_KEY, &bytes),
            None => Ok(0),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.store.close()
    }
}

fn intern_in(txn: &mut dyn KvTxn, key: &EdgeKey) -> Result<EdgeId> {
    // Re-check under the writer lock: another process may have won the race.
    if let Some(bytes) = txn.get(key.as_bytes())? {
        return id_from_record(key, &bytes);
    }
    let next = txn.increment(COUNTER_KEY)?;
    let id = EdgeId::new(next).ok_or_else(|| Error::CorruptRecord {
        key: String::from_utf8_lossy(COUNTER_KEY).into_owned(),
        reason: "counter produced id 0".into(),
    })?;
    txn.put(key.as_bytes(), &encode_u64(next))?;
    txn.put(reverse_key(id).as_bytes(), key.as_bytes())?;
    Ok(id)
}

fn id_from_record(key: &EdgeKey, bytes: &[u8]) -> Result<EdgeId> {
    let raw = decode_u64(key.as_bytes(), bytes)?;
    EdgeId::new(raw).ok_or_else(|| Error::CorruptRecord {
        key: key.to_string(),
        reason: "edge mapped to id 0".into(),
    })
}

#[inline]
fn reverse_key(id: EdgeId) -> String {
    id.get().to_string()
}
