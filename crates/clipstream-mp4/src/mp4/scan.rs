//! Top-level box scan.
//!
//! Walks the file's top-level boxes, capturing the three the splitter needs
//! (`ftyp`, `moov`, `mdat`) and skipping everything else by seeking to the
//! box end. The `moov` and `ftyp` boxes are read fully into memory; `mdat` is
//! recorded by range only.

use std::io::{Read, Seek, SeekFrom};

use super::atoms::{Atom, AtomType};
use crate::error::{Error, Result};

/// Maximum size of an atom buffered into memory (64 MB) to prevent OOM on
/// malformed files.
const MAX_BUFFERED_ATOM: u64 = 64 * 1024 * 1024;

/// Top-level boxes captured from a source file.
#[derive(Debug)]
pub struct TopLevel {
    pub ftyp: Atom,
    /// Full `ftyp` box bytes, header included; passed through verbatim.
    pub ftyp_data: Vec<u8>,
    pub moov: Atom,
    /// Full `moov` box bytes, header included.
    pub moov_data: Vec<u8>,
    pub mdat: Atom,
}

/// Scan the top-level boxes of an MP4 file.
///
/// Fails with [`Error::Truncated`] if a box extends past the end of the file
/// and with [`Error::MissingAtom`] if `ftyp`, `moov`, or `mdat` is absent.
pub fn scan<R: Read + Seek>(reader: &mut R, file_size: u64) -> Result<TopLevel> {
    let mut ftyp = None;
    let mut ftyp_data = Vec::new();
    let mut moov = None;
    let mut moov_data = Vec::new();
    let mut mdat = None;

    let mut pos = 0u64;
    while pos + 8 <= file_size {
        reader.seek(SeekFrom::Start(pos))?;

        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let short_size = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let atom_type = AtomType::from_bytes([header[4], header[5], header[6], header[7]]);

        let (size, header_size) = if short_size == 1 {
            let mut ext = [0u8; 8];
            reader.read_exact(&mut ext)?;
            (u64::from_be_bytes(ext), 16u8)
        } else if short_size == 0 {
            // Box extends to end of file.
            (file_size - pos, 8u8)
        } else {
            (short_size as u64, 8u8)
        };

        tracing::debug!(atom = %atom_type, size, "top-level atom");

        if size < header_size as u64 {
            break;
        }
        if pos + size > file_size {
            return Err(Error::Truncated {
                atom: atom_type,
                size,
                available: file_size - pos,
            });
        }

        let atom = Atom {
            atom_type,
            size,
            data_offset: pos + header_size as u64,
            header_size,
        };

        match atom_type {
            AtomType::FTYP => {
                ftyp_data = read_atom(reader, &atom)?;
                ftyp = Some(atom);
            }
            AtomType::MOOV => {
                moov_data = read_atom(reader, &atom)?;
                moov = Some(atom);
            }
            AtomType::MDAT => {
                mdat = Some(atom);
            }
            _ => {}
        }

        pos += size;
    }

    Ok(TopLevel {
        ftyp: ftyp.ok_or(Error::MissingAtom("ftyp"))?,
        ftyp_data,
        moov: moov.ok_or(Error::MissingAtom("moov"))?,
        moov_data,
        mdat: mdat.ok_or(Error::MissingAtom("mdat"))?,
    })
}

/// Read a whole atom, header included, rejecting oversized atoms.
fn read_atom<R: Read + Seek>(reader: &mut R, atom: &Atom) -> Result<Vec<u8>> {
    if atom.size > MAX_BUFFERED_ATOM {
        return Err(Error::invalid_mp4(format!(
            "atom {} size {} exceeds maximum {}",
            atom.atom_type, atom.size, MAX_BUFFERED_ATOM
        )));
    }
    reader.seek(SeekFrom::Start(atom.start()))?;
    let mut data = vec![0u8; atom.size as usize];
    reader.read_exact(&mut data)?;
    Ok(data)
}
