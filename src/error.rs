//! Error types shared by every component.
//!
//! The ingest path never translates errors: whatever the interner, codec or
//! store reports reaches the caller unchanged, so the job source can decide
//! what non-acknowledgment means.

use crate::bitmap::Codec;
use crate::trace::EdgeId;
use std::io;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A trace line could not be split into `from` and `to` fields.
    #[error("malformed trace line {line}: {content:?}")]
    ParseAnomaly { line: usize, content: String },

    /// Reverse lookup of an id the mapping has never allocated.
    #[error("edge id {0} not found in mapping")]
    NotFound(EdgeId),

    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] heed::Error),

    #[error("store {name} is closed")]
    StoreClosed { name: String },

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("corrupt record {key:?}: {reason}")]
    CorruptRecord { key: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("job source error: {0}")]
    Job(String),
}

impl Error {
    /// Whether this failure means the store could not be reached or could not
    /// commit. Jobs failing this way are left for redelivery.
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, Error::StoreUnavailable(_) | Error::StoreClosed { .. })
    }
}

/// Failures while packing or unpacking a bitmap envelope.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("truncated bitmap envelope: {0} bytes")]
    Truncated(usize),

    #[error("bad bitmap envelope magic")]
    BadMagic,

    #[error("unknown bitmap compression codec {0}")]
    UnknownCodec(u8),

    #[error("bitmap codec {0:?} is not enabled in this build")]
    CodecDisabled(Codec),

    #[error("edge id {id} does not fit in a bitmap (limit {limit})")]
    IdOutOfRange { id: u64, limit: u64 },

    #[error("bitmap length {0} bits exceeds the supported maximum")]
    LengthOutOfRange(u64),

    #[error("bitmap size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("compression failed: {0}")]
    Compress(io::Error),

    #[error("decompression failed: {0}")]
    Decompress(String),
}
