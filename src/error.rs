//! Sorting error types.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, SortError>;

/// Sorting error.
///
/// Every error is fatal to the current sort. The only recovery point is the
/// top level, which reports the error and discards the run file.
#[derive(Debug)]
pub enum SortError {
    /// Common I/O error (read, write, seek or create failed).
    Io(io::Error),
    /// Run file header does not start with the expected magic.
    BadMagic([u8; 4]),
    /// Run directory has no free descriptor slot left.
    DirectoryFull,
    /// Run id outside the directory range.
    InvalidRunId(usize),
    /// Fewer bytes were written than requested.
    ShortWrite {
        /// Bytes the caller asked to write.
        expected: usize,
        /// Bytes the stream accepted.
        written: usize,
    },
    /// A run's data ended before its descriptor said it would.
    Truncated {
        /// Bytes the descriptor advertises.
        expected: usize,
        /// Bytes actually read.
        actual: usize,
    },
    /// Rejected configuration value.
    InvalidConfig(&'static str),
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Io(err) => write!(f, "I/O operation failed: {}", err),
            SortError::BadMagic(magic) => write!(f, "not a run file: bad magic {:?}", magic),
            SortError::DirectoryFull => write!(f, "run directory is full"),
            SortError::InvalidRunId(id) => write!(f, "run id {} is out of range", id),
            SortError::ShortWrite { expected, written } => {
                write!(f, "short write: {} of {} bytes", written, expected)
            }
            SortError::Truncated { expected, actual } => {
                write!(f, "truncated run data: {} of {} bytes", actual, expected)
            }
            SortError::InvalidConfig(reason) => write!(f, "invalid configuration: {}", reason),
        }
    }
}

impl From<io::Error> for SortError {
    fn from(err: io::Error) -> Self {
        SortError::Io(err)
    }
}
