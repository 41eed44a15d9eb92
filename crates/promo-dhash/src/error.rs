//! Engine error taxonomy.
//!
//! Outcomes travel through memoized thunks that hand the same result to every
//! caller, so the error type is `Clone`; opaque upstream errors are shared
//! behind an `Arc` rather than duplicated.

use std::sync::Arc;

/// Errors surfaced by engine operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The configured backoff list was exhausted while another builder held
    /// the lease.
    #[error("lease not granted")]
    LeaseNotGranted,

    /// A cached bucket value failed to decode.
    #[error("decode entries: {0}")]
    Decode(#[from] DecodeError),

    /// The cached size-log value was not a decimal integer.
    #[error("invalid size log value")]
    InvalidSizeLog,

    /// An error surfaced by a collaborator (cache pipeline or backing store),
    /// passed through verbatim.
    #[error("{0}")]
    Upstream(Arc<anyhow::Error>),
}

impl Error {
    pub fn upstream(err: anyhow::Error) -> Error {
        Error::Upstream(Arc::new(err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Error {
        Error::upstream(err)
    }
}

/// The four ways a bucket value can be truncated. Each variant names the
/// segment that ran out of bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid entry count")]
    InvalidEntryCount,

    #[error("missing bytes for hash")]
    MissingHashBytes,

    #[error("missing data length")]
    MissingDataLength,

    #[error("missing data")]
    MissingData,
}
