//! Configuration for the stores and the ingest worker.

use crate::bitmap::Codec;
use crate::error::Result;
use crate::store::{LmdbStore, DEFAULT_MAP_SIZE};
use crate::trace::MalformedLinePolicy;
use std::path::{Path, PathBuf};

/// Default store name; environments are named after it.
pub const DEFAULT_STORE_NAME: &str = "ccov";

/// Database holding the edge mapping.
pub const LOOKUP_DATABASE: &str = "lookup";

/// Database holding the trace records.
pub const TRACES_DATABASE: &str = "traces";

/// How the mapping and the trace records are spread over LMDB environments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum StoreLayout {
    /// `<name>-lookup` for the mapping, `<name>-traces` for traces
    #[default]
    Separate,
    /// One `<name>` environment holding both databases
    Shared,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory holding the environments
    pub dir: PathBuf,
    pub name: String,
    /// LMDB map size per environment
    pub map_size: usize,
    pub layout: StoreLayout,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            dir: PathBuf::from("."),
            name: DEFAULT_STORE_NAME.to_string(),
            map_size: DEFAULT_MAP_SIZE,
            layout: StoreLayout::Separate,
        }
    }
}

impl StoreConfig {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        StoreConfig {
            dir: dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    pub fn lookup_path(&self) -> PathBuf {
        match self.layout {
            StoreLayout::Separate => self.dir.join(format!("{}-lookup", self.name)),
            StoreLayout::Shared => self.dir.join(&self.name),
        }
    }

    pub fn traces_path(&self) -> PathBuf {
        match self.layout {
            StoreLayout::Separate => self.dir.join(format!("{}-traces", self.name)),
            StoreLayout::Shared => self.dir.join(&self.name),
        }
    }

    /// Open the mapping and trace stores, reusing whatever is on disk.
    ///
    /// Each component gets its own named database, so even in the shared
    /// layout an edge key can never overwrite a trace record or vice versa.
    pub fn open(&self) -> Result<(LmdbStore, LmdbStore)> {
        let lookup = LmdbStore::open_database(self.lookup_path(), self.map_size, LOOKUP_DATABASE)?;
        let traces = match self.layout {
            StoreLayout::Separate => {
                LmdbStore::open_database(self.traces_path(), self.map_size, TRACES_DATABASE)?
            }
            StoreLayout::Shared => lookup.database(TRACES_DATABASE)?,
        };
        Ok((lookup, traces))
    }
}

/// Everything the ingest worker needs.
#[derive(Clone, Debug, Default)]
pub struct IngestConfig {
    pub store: StoreConfig,
    /// Codec for newly packed bitmaps
    pub codec: Codec,
    pub malformed: MalformedLinePolicy,
}

impl IngestConfig {
    pub fn in_dir<P: AsRef<Path>>(dir: P) -> Self {
        IngestConfig {
            store: StoreConfig::in_dir(dir),
            ..Default::default()
        }
    }

    /// Fail a job on its first malformed line instead of skipping it.
    pub fn strict(mut self) -> Self {
        self.malformed = MalformedLinePolicy::Fail;
        self
    }

    pub fn shared(mut self) -> Self {
        self.store.layout = StoreLayout::Shared;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let config = StoreConfig::in_dir("/var/cov");
        assert_eq!(config.lookup_path(), PathBuf::from("/var/cov/ccov-lookup"));
        assert_eq!(config.traces_path(), PathBuf::from("/var/cov/ccov-traces"));
    }

    #[test]
    fn test_shared_paths() {
        let config = IngestConfig::in_dir("/var/cov").shared();
        assert_eq!(config.store.lookup_path(), config.store.traces_path());
    }

    #[test]
    fn test_strict_preset() {
        let config = IngestConfig::default().strict();
        assert_eq!(config.malformed, MalformedLinePolicy::Fail);
        assert_eq!(config.store.name, DEFAULT_STORE_NAME);
    }
}
