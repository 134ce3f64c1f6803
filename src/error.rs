//! Engine error type
//!
//! One enum for every failure on the open/query/stream paths. Query-path
//! errors are per-call: the engine stays usable after any of them except
//! `Closed`.

use std::time::Duration;

/// Engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Container or stream could not be opened (fatal at construction)
    #[error("Open error: {0}")]
    Open(String),

    /// Seek target unreachable, fallback seek included
    #[error("Seek to pts {target} failed: {reason}")]
    Seek { target: i64, reason: String },

    /// Decoder or demuxer failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Stream ended before any frame could be produced
    #[error("End of stream")]
    EndOfStream,

    /// No PTS observed within the bounded wait
    #[error("Frame index unavailable after {waited:?}")]
    IndexUnavailable { waited: Duration },

    /// Streaming worker is not running
    #[error("Streaming unavailable: {0}")]
    StreamingUnavailable(String),

    /// Frame shape differs from the shape the channel was sized for
    #[error("Frame shape {found:?} does not match channel shape {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Invalid time map: {0}")]
    InvalidTimeMap(String),

    /// Zero step or otherwise unusable slice
    #[error("Invalid slice: {0}")]
    InvalidSlice(String),

    #[error("Ordinal {ordinal} out of range (len {len})")]
    OutOfRange { ordinal: usize, len: usize },

    #[error("Config error: {0}")]
    Config(String),

    /// Engine was closed
    #[error("Engine is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
