//! clipstream-mp4: MP4/QuickTime pseudo-streaming splitter.
//!
//! Given an MP4/MOV file and a time interval `[start, end)` in seconds, this
//! crate produces a self-contained file prefix (`ftyp` + rewritten `moov` +
//! `mdat` header) and the byte range of the original media payload to append
//! after it. The concatenation is a valid, playable MP4 containing only the
//! samples in the interval. A streaming host can therefore serve arbitrary
//! seek positions with one small in-memory header and a zero-copy byte range
//! of the source file.
//!
//! # Architecture
//!
//! A split runs through a fixed pipeline:
//!
//! 1. Scan the file's top-level boxes; buffer `ftyp` and `moov`, record the
//!    `mdat` range.
//! 2. Parse the `moov` subtree into a typed tree, preserving unrecognized
//!    boxes verbatim. Non-audio/video tracks are dropped here.
//! 3. Map seconds to per-track sample ranges, snapping to sync samples so
//!    video starts on a keyframe and audio starts at the same time.
//! 4. Rewrite the six sample tables in place for the retained range and fix
//!    up the movie/track durations.
//! 5. Serialize the new header and patch every chunk offset to point into
//!    the new layout.
//!
//! # Example
//!
//! ```no_run
//! use clipstream_mp4::{split_file, SplitOptions};
//! use std::path::Path;
//!
//! # fn main() -> clipstream_mp4::Result<()> {
//! let clip = split_file(
//!     Path::new("movie.mp4"),
//!     &SplitOptions {
//!         start_secs: 60.0,
//!         end_secs: 120.0,
//!         ..SplitOptions::default()
//!     },
//! )?;
//! // Serve clip.header, then bytes
//! // [clip.mdat_offset, clip.mdat_offset + clip.mdat_size) of movie.mp4.
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod mp4;
pub mod split;

pub use error::{Error, Result};
pub use split::{split, split_file, SplitOptions, SplitResult};
