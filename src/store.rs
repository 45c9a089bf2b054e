//! Transactional key-value store.
//!
//! Both the edge mapping and the trace records live in a store that offers
//! point reads, a counter increment and an all-or-nothing write transaction.
//! [`LmdbStore`] provides it on top of LMDB: a single writer lock spans every
//! process that opens the same environment, and readers only ever observe
//! committed transactions. That lock is the only mutual exclusion the
//! interner relies on.

use crate::error::{Error, Result};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default LMDB map size (1 GiB; the file grows sparsely up to it).
pub const DEFAULT_MAP_SIZE: usize = 1 << 30;

/// Database opened by [`LmdbStore::open`].
pub const DEFAULT_DATABASE: &str = "records";

/// Named databases one environment can hold.
const MAX_DBS: u32 = 4;

/// Writes staged inside one transaction.
///
/// Reads observe the transaction's own earlier writes.
pub trait KvTxn {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Add one to the counter stored under `key` and return the new value.
    /// An absent counter counts as 0.
    fn increment(&mut self, key: &[u8]) -> Result<u64> {
        let current = match self.get(key)? {
            Some(bytes) => decode_u64(key, &bytes)?,
            None => 0,
        };
        let next = current.checked_add(1).ok_or_else(|| Error::CorruptRecord {
            key: String::from_utf8_lossy(key).into_owned(),
            reason: "counter overflow".into(),
        })?;
        self.put(key, &encode_u64(next))?;
        Ok(next)
    }
}

/// A durable key-value store with atomic multi-key writes.
pub trait KvStore {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Read a committed value.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Read several committed values, in key order of the input.
    ///
    /// Implementations should serve the whole batch from one snapshot.
    fn get_many<'k, I>(&self, keys: I) -> Result<Vec<Option<Vec<u8>>>>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        keys.into_iter().map(|key| self.get(key)).collect()
    }

    /// Number of committed records.
    fn len(&self) -> Result<u64>;

    /// Number of committed records whose key starts with `prefix`.
    fn count_prefix(&self, prefix: &[u8]) -> Result<u64>;

    /// Run `f` inside a write transaction.
    ///
    /// The writes become visible together when `f` returns `Ok`; if `f`
    /// fails, or the commit does, none of them ever do.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn KvTxn) -> Result<T>;

    /// Flush and release the handle. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;
}

/// Encode an integer record value.
#[inline]
pub fn encode_u64(value: u64) -> [u8; 8] {
    value.to_be_bytes()
}

/// Decode an integer record value stored under `key`.
pub fn decode_u64(key: &[u8], bytes: &[u8]) -> Result<u64> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| Error::CorruptRecord {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: format!("expected 8-byte integer, found {} bytes", bytes.len()),
    })?;
    Ok(u64::from_be_bytes(arr))
}

/// One named database inside an LMDB environment.
///
/// Clones, and siblings from [`LmdbStore::database`], share the environment;
/// `close` only releases this handle's share.
#[derive(Clone)]
pub struct LmdbStore {
    name: String,
    path: PathBuf,
    env: Option<Env>,
    db: Database<Bytes, Bytes>,
}

impl LmdbStore {
    /// Open (or create) the environment at `path` with its default database.
    /// Existing data is reused.
    pub fn open<P: AsRef<Path>>(path: P, map_size: usize) -> Result<Self> {
        Self::open_database(path, map_size, DEFAULT_DATABASE)
    }

    /// Open (or create) the environment at `path` and the named `database`
    /// inside it.
    pub fn open_database<P: AsRef<Path>>(
        path: P,
        map_size: usize,
        database: &str,
    ) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        // SAFETY: the environment is only ever opened through this function,
        // with the same flags, so no process maps it with conflicting options.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(MAX_DBS)
                .open(path)?
        };
        let store = Self::in_env(env, path, database)?;
        info!(store = %store.name, path = %path.display(), "opened store");
        Ok(store)
    }

    /// Another named database in this handle's environment.
    ///
    /// Both handles commit through the same writer lock, but their key
    /// spaces are disjoint.
    pub fn database(&self, database: &str) -> Result<Self> {
        let env = self.env()?.clone();
        let store = Self::in_env(env, &self.path, database)?;
        debug!(store = %store.name, "opened sibling database");
        Ok(store)
    }

    fn in_env(env: Env, path: &Path, database: &str) -> Result<Self> {
        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env.create_database(&mut wtxn, Some(database))?;
        wtxn.commit()?;

        let dir = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name: format!("{dir}/{database}"),
            path: path.to_path_buf(),
            env: Some(env),
            db,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_closed(&self) -> bool {
        self.env.is_none()
    }

    fn env(&self) -> Result<&Env> {
        self.env.as_ref().ok_or_else(|| Error::StoreClosed {
            name: self.name.clone(),
        })
    }
}

impl fmt::Debug for LmdbStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbStore")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl KvStore for LmdbStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let rtxn = self.env()?.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.map(<[u8]>::to_vec))
    }

    fn get_many<'k, I>(&self, keys: I) -> Result<Vec<Option<Vec<u8>>>>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        let rtxn = self.env()?.read_txn()?;
        let mut values = Vec::new();
        for key in keys {
            values.push(self.db.get(&rtxn, key)?.map(<[u8]>::to_vec));
        }
        Ok(values)
    }

    fn len(&self) -> Result<u64> {
        let rtxn = self.env()?.read_txn()?;
        Ok(self.db.len(&rtxn)?)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<u64> {
        let rtxn = self.env()?.read_txn()?;
        let mut count = 0;
        for entry in self.db.iter(&rtxn)? {
            let (key, _) = entry?;
            if key.starts_with(prefix) {
                count += 1;
            }
        }
        Ok(count)
    }

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut dyn KvTxn) -> Result<T>,
    {
        let mut wtxn = self.env()?.write_txn()?;
        // Returning early drops `wtxn`, which aborts it.
        let value = f(&mut LmdbTxn {
            db: self.db,
            txn: &mut wtxn,
        })?;
        wtxn.commit()?;
        Ok(value)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(env) = self.env.take() {
            env.force_sync()?;
            debug!(store = %self.name, "closed store");
        }
        Ok(())
    }
}

struct LmdbTxn<'a, 'e> {
    db: Database<Bytes, Bytes>,
    txn: &'a mut RwTxn<'e>,
}

impl KvTxn for LmdbTxn<'_, '_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.db.get(&*self.txn, key)?.map(<[u8]>::to_vec))
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.put(&mut *self.txn, key, value)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_MAP_SIZE: usize = 16 * 1024 * 1024;

    fn open_temp() -> (TempDir, LmdbStore) {
        let dir = TempDir::new().unwrap();
        let store = LmdbStore::open(dir.path().join("kv"), TEST_MAP_SIZE).unwrap();
        (dir, store)
    }

    #[test]
    fn test_transaction_commits() {
        let (_dir, store) = open_temp();
        store
            .transaction(|txn| {
                txn.put(b"a", b"1")?;
                txn.put(b"b", b"2")
            })
            .unwrap();
        assert_eq!(store.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(store.get(b"b").unwrap().as_deref(), Some(&b"2"[..]));
        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.count_prefix(b"a").unwrap(), 1);
        assert_eq!(store.count_prefix(b"").unwrap(), 2);
    }

    #[test]
    fn test_failed_transaction_leaves_nothing() {
        let (_dir, store) = open_temp();
        let err = store
            .transaction(|txn| {
                txn.increment(b"idx")?;
                txn.put(b"a", b"1")?;
                Err::<(), _>(Error::Job("boom".into()))
            })
            .unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        assert_eq!(store.get(b"idx").unwrap(), None);
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.len().unwrap(), 0);
    }

    #[test]
    fn test_reads_see_own_writes() {
        let (_dir, store) = open_temp();
        let seen = store
            .transaction(|txn| {
                txn.put(b"k", b"v")?;
                txn.get(b"k")
            })
            .unwrap();
        assert_eq!(seen.as_deref(), Some(&b"v"[..]));
    }

    #[test]
    fn test_increment_from_absent() {
        let (_dir, store) = open_temp();
        let values = store
            .transaction(|txn| Ok((txn.increment(b"idx")?, txn.increment(b"idx")?)))
            .unwrap();
        assert_eq!(values, (1, 2));
        let stored = store.get(b"idx").unwrap().unwrap();
        assert_eq!(decode_u64(b"idx", &stored).unwrap(), 2);
    }

    #[test]
    fn test_increment_rejects_corrupt_counter() {
        let (_dir, store) = open_temp();
        store.transaction(|txn| txn.put(b"idx", b"7")).unwrap();
        let err = store.transaction(|txn| txn.increment(b"idx")).unwrap_err();
        assert!(matches!(err, Error::CorruptRecord { .. }));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_dir, mut store) = open_temp();
        store.close().unwrap();
        store.close().unwrap();
        assert!(store.is_closed());
        let err = store.get(b"a").unwrap_err();
        assert!(err.is_store_unavailable());
    }

    #[test]
    fn test_get_many_preserves_order() {
        let (_dir, store) = open_temp();
        store
            .transaction(|txn| {
                txn.put(b"a", b"1")?;
                txn.put(b"c", b"3")
            })
            .unwrap();
        let keys: [&[u8]; 3] = [b"c", b"b", b"a"];
        let values = store.get_many(keys).unwrap();
        assert_eq!(values, vec![Some(b"3".to_vec()), None, Some(b"1".to_vec())]);
        assert!(store.get_many(std::iter::empty()).unwrap().is_empty());
    }

    #[test]
    fn test_sibling_databases_are_disjoint() {
        let (_dir, lookup) = open_temp();
        let traces = lookup.database("traces").unwrap();
        lookup.transaction(|txn| txn.put(b"k", b"lookup")).unwrap();
        traces.transaction(|txn| txn.put(b"k", b"traces")).unwrap();

        assert_eq!(lookup.get(b"k").unwrap().as_deref(), Some(&b"lookup"[..]));
        assert_eq!(traces.get(b"k").unwrap().as_deref(), Some(&b"traces"[..]));
        assert_eq!(lookup.len().unwrap(), 1);
        assert_eq!(traces.len().unwrap(), 1);
        assert_eq!(lookup.path(), traces.path());
        assert_ne!(lookup.name(), traces.name());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv");
        {
            let mut store = LmdbStore::open(&path, TEST_MAP_SIZE).unwrap();
            store.transaction(|txn| txn.put(b"a", b"1")).unwrap();
            store.close().unwrap();
        }
        let store = LmdbStore::open(&path, TEST_MAP_SIZE).unwrap();
        assert_eq!(store.get(b"a").unwrap().as_deref(), Some(&b"1"[..]));
    }
}
