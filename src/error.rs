//! Unified Error Handling
//!
//! All fallible operations in the crate report errors through a single
//! [`ExporterError`] type. Recording operations on the hot path never
//! surface capacity exhaustion to the caller; `LaneFull` is handled
//! internally through per-lane drop counters and only appears here so that
//! the lane writers can report it upward to the façade.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for all exporter operations
#[derive(Error, Debug)]
pub enum ExporterError {
    /// I/O failure while creating, sizing, mapping or flushing the backing
    /// file. Only possible during initialization and flush.
    #[error("I/O error: {source} (path: {path:?})")]
    Io {
        source: io::Error,
        path: Option<PathBuf>,
    },

    /// The backing file does not carry the expected magic bytes or its
    /// header describes regions that do not fit the file.
    #[error("corrupt exporter file {path}: {detail}")]
    CorruptFile { path: PathBuf, detail: String },

    /// The backing file was produced by an incompatible format revision.
    #[error("unsupported format version {found}, supported version is {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// A region has no room for the next record. Recovered locally by the
    /// recording façade; callers of the public recording operations never
    /// observe this variant.
    #[error("{region} region full: record of {needed} bytes exceeds remaining capacity {remaining}")]
    LaneFull {
        region: &'static str,
        needed: usize,
        remaining: u64,
    },

    /// Malformed caller input, for example an empty instrument name or a
    /// NaN histogram bucket boundary.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A record or dictionary entry could not be decoded from the mapped
    /// bytes.
    #[error("record decode failed: {detail}")]
    Decode { detail: String },

    /// A record referenced a handle that the dictionary region does not
    /// (yet) define.
    #[error("unknown {table} handle {handle}")]
    UnknownHandle { table: &'static str, handle: u32 },

    /// Configuration validation failure.
    #[error("configuration error: {field} - {message}")]
    Configuration { field: String, message: String },
}

impl ExporterError {
    /// Wrap an `io::Error` together with the path it occurred on.
    pub fn io(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Shorthand for an [`ExporterError::InvalidArgument`].
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Shorthand for an [`ExporterError::Decode`].
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }
}

/// Convenience result alias used throughout the crate
pub type ExporterResult<T> = Result<T, ExporterError>;
