//! Error types for clipstream-mp4.

use std::io;
use thiserror::Error;

use crate::mp4::AtomType;

/// Result type for clipstream-mp4 operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for clipstream-mp4 operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on the source file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A leaf payload ended before the requested field.
    #[error("buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },

    /// A box declared a size extending past the available bytes.
    #[error("truncated {atom} box: size {size} exceeds {available} available bytes")]
    Truncated {
        atom: AtomType,
        size: u64,
        available: u64,
    },

    /// Missing required atom in the box tree.
    #[error("missing required atom: {0}")]
    MissingAtom(&'static str),

    /// More audio/video tracks than the splitter supports.
    #[error("too many tracks: more than {max} audio/video tracks")]
    TooManyTracks { max: usize },

    /// The requested interval contains no samples.
    #[error("empty interval: start {start_secs}s is at or past end {end_secs}s")]
    EmptyInterval { start_secs: f64, end_secs: f64 },

    /// A rewritten chunk offset does not fit in a 32-bit stco entry.
    #[error("chunk offset overflow: {offset} does not fit in 32 bits")]
    OffsetOverflow { offset: i64 },

    /// Invalid MP4 file structure.
    #[error("invalid MP4: {0}")]
    InvalidMp4(String),
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }
}
