//! Job sources: where raw traces come from.
//!
//! A source hands out one job at a time with [`JobSource::reserve`]. Once
//! the trace is persisted the worker acknowledges the job with
//! [`JobSource::delete`]. A job that is never deleted is the source's to
//! redeliver.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Decoded job payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceJob {
    pub filename: String,
    pub trace_output: String,
}

impl TraceJob {
    pub fn new(filename: impl Into<String>, trace_output: impl Into<String>) -> Self {
        TraceJob {
            filename: filename.into(),
            trace_output: trace_output.into(),
        }
    }
}

/// A reserved job.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    /// Source-assigned handle, unique within the source
    pub id: u64,
    pub payload: TraceJob,
}

pub trait JobSource {
    /// Next job, or `None` once the source is drained.
    fn reserve(&mut self) -> Result<Option<Job>>;

    /// Acknowledge a reserved job so it is never handed out again.
    fn delete(&mut self, job: &Job) -> Result<()>;
}

/// In-process FIFO source.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    next_id: u64,
    ready: VecDeque<Job>,
    reserved: BTreeMap<u64, TraceJob>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, payload: TraceJob) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.ready.push_back(Job { id, payload });
        id
    }

    /// Jobs not yet reserved.
    pub fn pending(&self) -> usize {
        self.ready.len()
    }

    /// Jobs reserved but never deleted.
    pub fn unacknowledged(&self) -> impl Iterator<Item = &TraceJob> {
        self.reserved.values()
    }
}

impl JobSource for MemoryQueue {
    fn reserve(&mut self) -> Result<Option<Job>> {
        let Some(job) = self.ready.pop_front() else {
            return Ok(None);
        };
        self.reserved.insert(job.id, job.payload.clone());
        Ok(Some(job))
    }

    fn delete(&mut self, job: &Job) -> Result<()> {
        self.reserved
            .remove(&job.id)
            .map(|_| ())
            .ok_or_else(|| Error::Job(format!("job {} is not reserved", job.id)))
    }
}

/// Directory of `*.json` job files.
///
/// Files are handed out in name order. Deleting a job removes its file, so
/// anything that fails stays in the directory for the next run. Files that
/// do not decode are logged and left in place.
#[derive(Debug)]
pub struct SpoolDir {
    root: PathBuf,
    queue: VecDeque<PathBuf>,
    reserved: BTreeMap<u64, PathBuf>,
    next_id: u64,
    rejected: usize,
}

impl SpoolDir {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let mut queue = VecDeque::new();
        for entry in WalkDir::new(&root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| Error::Job(e.to_string()))?;
            let is_job = entry.file_type().is_file()
                && entry.path().extension().is_some_and(|ext| ext == "json");
            if is_job {
                queue.push_back(entry.into_path());
            }
        }
        Ok(Self {
            root,
            queue,
            reserved: BTreeMap::new(),
            next_id: 0,
            rejected: 0,
        })
    }

    /// Write `job` into the spool directory at `root`.
    ///
    /// The file is named after the sanitized filename. A pending job is never
    /// replaced: when that name is taken, `~1`, `~2`, ... is appended.
    pub fn submit<P: AsRef<Path>>(root: P, job: &TraceJob) -> Result<PathBuf> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let stem: String = job
            .filename
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
            .collect();
        let body = serde_json::to_vec(job).map_err(|e| Error::Job(e.to_string()))?;

        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("{stem}.json"),
                n => format!("{stem}~{n}.json"),
            };
            let path = root.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(&body)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Jobs not yet reserved.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Files skipped because they did not decode.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl JobSource for SpoolDir {
    fn reserve(&mut self) -> Result<Option<Job>> {
        while let Some(path) = self.queue.pop_front() {
            let body = match fs::read(&path) {
                Ok(body) => body,
                // another worker took it since the directory was scanned
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "job file already taken");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            let payload: TraceJob = match serde_json::from_slice(&body) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping undecodable job file");
                    self.rejected += 1;
                    continue;
                }
            };
            self.next_id += 1;
            self.reserved.insert(self.next_id, path);
            return Ok(Some(Job {
                id: self.next_id,
                payload,
            }));
        }
        Ok(None)
    }

    fn delete(&mut self, job: &Job) -> Result<()> {
        let path = self
            .reserved
            .remove(&job.id)
            .ok_or_else(|| Error::Job(format!("job {} is not reserved", job.id)))?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "job file already removed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
