//! Edgestash - Coverage Trace Deduplication Store
//!
//! Copyright (c) 2025 Edgestash Contributors
//! Licensed under MIT License
//!
//! Interns control-flow edges observed by an instrumentation tool into dense
//! integer ids and stores every trace as a compressed bitmap over those ids.
//!
//! # Overview
//!
//! - **bitmap**: bit-vector encode/decode with a pluggable compressor
//! - **interner**: append-only `edge key <-> id` mapping with atomic allocation
//! - **trace_store**: per-trace bitmap and covered-edge count
//! - **ingest**: the worker tying a job source to the above
//!
//! Several worker processes may share one set of stores; LMDB transactions
//! are the only coordination between them.
//!
//! # Quick Start
//!
//! ```no_run
//! use edgestash::{IngestConfig, MemoryQueue, TraceIngestor, TraceJob};
//!
//! let mut ingestor = TraceIngestor::open(&IngestConfig::in_dir("/var/lib/ccov"))?;
//! let mut queue = MemoryQueue::new();
//! queue.push(TraceJob::new("run1", "A B 1\nB C 1\nB ?X 1\n"));
//!
//! let summary = ingestor.run(&mut queue)?;
//! assert_eq!(summary.processed, 1);
//! ingestor.close()?;
//! # Ok::<(), edgestash::Error>(())
//! ```

pub mod bitmap;
pub mod cli;
pub mod config;
pub mod error;
pub mod ingest;
pub mod interner;
pub mod job;
pub mod store;
pub mod trace;
pub mod trace_store;

// Re-export main types for convenience
pub use bitmap::{Codec, EdgeBitmap};
pub use config::{IngestConfig, StoreConfig, StoreLayout};
pub use error::{CodecError, Error, Result};
pub use ingest::{RunSummary, TraceIngestor, TraceSummary};
pub use interner::EdgeInterner;
pub use job::{Job, JobSource, MemoryQueue, SpoolDir, TraceJob};
pub use store::{KvStore, KvTxn, LmdbStore};
pub use trace::{EdgeId, EdgeKey, MalformedLinePolicy};
pub use trace_store::{TraceRecord, TraceStore};
