//! MP4 container parsing and rewriting.
//!
//! - `atoms` - fourcc codes, atom headers, handler types
//! - `cursor` - big-endian byte codec over slices and `BytesMut`
//! - `scan` - top-level box scan (`ftyp`/`moov`/`mdat` capture)
//! - `tables` - the six sample tables and time/keyframe mapping
//! - `moov` - the typed `moov` tree: parse, mutate, serialize
//! - `index` - per-track chunk/sample indices and the table rewriter

mod atoms;
mod cursor;
mod index;
mod moov;
mod scan;
mod tables;

pub use atoms::{Atom, AtomType, HandlerType};
pub use cursor::{begin_box, end_box, put_u24, Cursor};
pub use index::{ChunkRecord, SampleRecord};
pub use moov::{
    Hdlr, Mdhd, Mdia, Minf, Moov, Mvhd, Stbl, StcoPatch, Tkhd, Trak, UnknownAtom, Vmhd, MAX_TRACKS,
};
pub use scan::{scan, TopLevel};
pub use tables::{Ctts, CttsEntry, Stco, Stsc, StscEntry, Stss, Stsz, Stts, SttsEntry};
