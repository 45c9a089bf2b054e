//! The ingest worker.
//!
//! One job at a time, strictly in order:
//!
//! ```text
//! reserve → parse → intern_all → encode → save → delete (ack) → processed += 1
//! ```
//!
//! A failure anywhere before the acknowledgment leaves the job with its
//! source for redelivery. Nothing is retried here.

use crate::bitmap::{self, Codec};
use crate::config::IngestConfig;
use crate::error::Result;
use crate::interner::EdgeInterner;
use crate::job::{Job, JobSource};
use crate::store::{KvStore, LmdbStore};
use crate::trace::{parse_trace, MalformedLinePolicy};
use crate::trace_store::TraceStore;
use std::collections::BTreeSet;
use tracing::{debug, error, info};

/// Outcome of persisting one trace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceSummary {
    pub filename: String,
    /// Distinct edges in the trace
    pub covered: u64,
    /// Size of the packed bitmap in bytes
    pub packed_bytes: usize,
    /// Malformed lines that were skipped
    pub skipped_lines: usize,
}

/// Outcome of draining a job source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: u64,
    /// Jobs left unacknowledged after a failure
    pub failed: u64,
}

pub struct TraceIngestor<S: KvStore = LmdbStore> {
    interner: EdgeInterner<S>,
    traces: TraceStore<S>,
    codec: Codec,
    malformed: MalformedLinePolicy,
    processed_count: u64,
}

impl TraceIngestor<LmdbStore> {
    /// Open (or reuse) the configured stores.
    pub fn open(config: &IngestConfig) -> Result<Self> {
        let (lookup, traces) = config.store.open()?;
        info!(
            lookup = %lookup.path().display(),
            traces = %traces.path().display(),
            codec = %config.codec,
            "trace ingestor ready"
        );
        Ok(Self::from_parts(
            EdgeInterner::new(lookup),
            TraceStore::new(traces),
            config.codec,
            config.malformed,
        ))
    }
}

impl<S: KvStore> TraceIngestor<S> {
    pub fn from_parts(
        interner: EdgeInterner<S>,
        traces: TraceStore<S>,
        codec: Codec,
        malformed: MalformedLinePolicy,
    ) -> Self {
        Self {
            interner,
            traces,
            codec,
            malformed,
            processed_count: 0,
        }
    }

    pub fn interner(&self) -> &EdgeInterner<S> {
        &self.interner
    }

    pub fn traces(&self) -> &TraceStore<S> {
        &self.traces
    }

    /// Jobs fully persisted and acknowledged by this worker.
    pub fn processed_count(&self) -> u64 {
        self.processed_count
    }

    /// Parse and intern raw trace output.
    pub fn create_edge_set(&self, output: &str) -> Result<(BTreeSet<u64>, usize)> {
        let parsed = parse_trace(output, self.malformed)?;
        debug!(lines = parsed.lines, edges = parsed.edges.len(), "parsed trace");
        let ids = self.interner.intern_all(&parsed.edges)?;
        Ok((ids.into_iter().map(|id| id.get()).collect(), parsed.skipped))
    }

    /// Parse, intern, encode and persist one trace. Does not touch any job.
    pub fn save_trace(&self, filename: &str, output: &str) -> Result<TraceSummary> {
        let (ids, skipped_lines) = self.create_edge_set(output)?;
        let covered = ids.len() as u64;
        let packed = bitmap::encode(&ids, self.codec)?;
        debug!(
            filename,
            covered,
            kib = packed.len() as f64 / 1024.0,
            "storing packed trace"
        );
        self.traces.save(filename, &packed, covered)?;
        Ok(TraceSummary {
            filename: filename.to_owned(),
            covered,
            packed_bytes: packed.len(),
            skipped_lines,
        })
    }

    /// Persist a reserved job and acknowledge it.
    ///
    /// On failure the job is not deleted and the error is returned unchanged.
    pub fn process_job<Q>(&mut self, source: &mut Q, job: Job) -> Result<TraceSummary>
    where
        Q: JobSource + ?Sized,
    {
        let summary = self
            .save_trace(&job.payload.filename, &job.payload.trace_output)
            .inspect_err(|e| {
                error!(job = job.id, filename = %job.payload.filename, error = %e, "trace not saved");
            })?;
        source.delete(&job).inspect_err(|e| {
            error!(job = job.id, error = %e, "trace saved but job not acknowledged");
        })?;
        self.processed_count += 1;
        Ok(summary)
    }

    /// Reserve and process the next job; `None` once the source is drained.
    pub fn process_next<Q>(&mut self, source: &mut Q) -> Result<Option<TraceSummary>>
    where
        Q: JobSource + ?Sized,
    {
        debug!("getting next trace");
        let Some(job) = source.reserve()? else {
            return Ok(None);
        };
        self.process_job(source, job).map(Some)
    }

    /// Process jobs until the source is drained.
    ///
    /// A failed job is counted and left unacknowledged; the loop moves on.
    /// Only a failure to reserve ends the run early.
    pub fn run<Q>(&mut self, source: &mut Q) -> Result<RunSummary>
    where
        Q: JobSource + ?Sized,
    {
        let mut summary = RunSummary::default();
        while let Some(job) = source.reserve()? {
            match self.process_job(source, job) {
                Ok(_) => summary.processed += 1,
                Err(_) => summary.failed += 1,
            }
        }
        info!(processed = summary.processed, failed = summary.failed, "job source drained");
        Ok(summary)
    }

    /// Flush and release both stores.
    pub fn close(&mut self) -> Result<()> {
        self.interner.close()?;
        self.traces.close()
    }
}
