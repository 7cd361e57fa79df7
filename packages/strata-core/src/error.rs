//! Error kinds shared by every component of the epoch subsystem.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// The subsystem that produced a [`StrataError`], carried for log context
/// and so callers can tell "my index is corrupt" from "my block store is
/// corrupt" without matching on the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsystem {
    Block,
    Index,
    Epoch,
    Cache,
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Subsystem::Block => "block store",
            Subsystem::Index => "index",
            Subsystem::Epoch => "epoch",
            Subsystem::Cache => "epoch cache",
        };
        f.write_str(name)
    }
}

/// Errors returned by the epoch subsystem.
#[derive(Debug, Error)]
pub enum StrataError {
    #[error("{subsystem} not found at {path:?}")]
    NotFound { subsystem: Subsystem, path: PathBuf },

    #[error("{subsystem} is read-only")]
    ReadOnly { subsystem: Subsystem },

    #[error("{subsystem}: position {position} out of bounds (record size {record_size})")]
    OutOfBounds { subsystem: Subsystem, position: u64, record_size: u64 },

    #[error("{subsystem} is corrupt: {reason}")]
    Corrupt { subsystem: Subsystem, reason: String },

    #[error("{subsystem} I/O error at {path:?}: {source}")]
    Io {
        subsystem: Subsystem,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{subsystem} is closed")]
    Closed { subsystem: Subsystem },
}

pub type Result<T> = std::result::Result<T, StrataError>;
