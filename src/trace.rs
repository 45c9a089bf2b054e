//! Raw trace parsing and the edge identifier types.
//!
//! A raw trace is line-oriented text, one observed edge per line:
//!
//! ```text
//! <from> <to> [count]
//! ```
//!
//! Endpoints the instrumentation could not resolve start with the sentinel
//! byte `?` and are folded into the single endpoint `OUT`.

use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// First byte of an unresolved endpoint in raw trace output.
pub const SENTINEL: u8 = b'?';

/// Endpoint name substituted for unresolved endpoints.
pub const OUT: &str = "OUT";

/// Separator between the two endpoints of an edge key.
pub const SEPARATOR: &str = "=>";

/// Opaque key of a directed control-flow edge, always of the form `from=>to`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeKey(String);

impl EdgeKey {
    pub fn new(from: &str, to: &str) -> Self {
        EdgeKey(format!("{from}{SEPARATOR}{to}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Source and target endpoints.
    pub fn endpoints(&self) -> (&str, &str) {
        self.0.split_once(SEPARATOR).unwrap_or((self.0.as_str(), ""))
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EdgeKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.contains(SEPARATOR) {
            Ok(EdgeKey(s.to_owned()))
        } else {
            Err(format!("edge key {s:?} lacks the {SEPARATOR:?} separator"))
        }
    }
}

/// Dense, strictly positive identifier assigned to an [`EdgeKey`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(u64);

impl EdgeId {
    /// `None` for zero: ids are allocated from 1.
    #[inline]
    pub const fn new(id: u64) -> Option<Self> {
        if id == 0 {
            None
        } else {
            Some(Self(id))
        }
    }

    #[inline]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do with a line that has no `to` field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum MalformedLinePolicy {
    /// Log it, count it and keep going.
    #[default]
    Skip,
    /// Fail the whole trace with [`Error::ParseAnomaly`].
    Fail,
}

/// Distinct edge keys of one raw trace.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedTrace {
    pub edges: BTreeSet<EdgeKey>,
    /// Non-blank lines seen
    pub lines: usize,
    /// Malformed lines dropped under [`MalformedLinePolicy::Skip`]
    pub skipped: usize,
}

/// Parse raw trace text into its set of edge keys.
pub fn parse_trace(output: &str, policy: MalformedLinePolicy) -> Result<ParsedTrace> {
    let mut parsed = ParsedTrace::default();

    for (idx, line) in output.lines().enumerate() {
        let mut fields = line.split_whitespace();
        let Some(from) = fields.next() else {
            continue;
        };
        parsed.lines += 1;

        let Some(to) = fields.next() else {
            match policy {
                MalformedLinePolicy::Fail => {
                    return Err(Error::ParseAnomaly {
                        line: idx + 1,
                        content: line.to_owned(),
                    });
                }
                MalformedLinePolicy::Skip => {
                    warn!(line = idx + 1, content = line, "skipping malformed trace line");
                    parsed.skipped += 1;
                    continue;
                }
            }
        };

        parsed.edges.insert(EdgeKey::new(normalize(from), normalize(to)));
    }

    Ok(parsed)
}

#[inline]
fn normalize(endpoint: &str) -> &str {
    if endpoint.as_bytes().first() == Some(&SENTINEL) {
        OUT
    } else {
        endpoint
    }
}
