//! Big-endian byte codec.
//!
//! Reads go through a cursor over a borrowed slice; writes append to a
//! `BytesMut` and container sizes are back-patched once the payload length is
//! known. All multi-byte accesses are big-endian and alignment-free.

use bytes::{BufMut, BytesMut};

use super::atoms::AtomType;
use crate::error::{Error, Result};

/// Read cursor over a byte slice.
#[derive(Debug)]
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::BufferUnderflow {
                need: n,
                have: self.remaining(),
            });
        }
        let buf = self.buf;
        let slice = &buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    /// Remaining bytes, consuming the cursor position.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        self.pos = buf.len();
        rest
    }

    /// Fail unless at least `n` bytes remain. Used to validate a table's
    /// declared entry count before allocating for it.
    pub fn require(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(Error::BufferUnderflow {
                need: n,
                have: self.remaining(),
            });
        }
        Ok(())
    }
}

/// Write a 24-bit big-endian value.
pub fn put_u24(buf: &mut BytesMut, v: u32) {
    buf.put_uint(v as u64, 3);
}

/// Start a box: placeholder size followed by the tag. Returns the position to
/// hand back to [`end_box`].
pub fn begin_box(buf: &mut BytesMut, atom_type: AtomType) -> usize {
    let start = buf.len();
    buf.put_u32(0);
    buf.put_slice(&atom_type.0);
    start
}

/// Back-patch the size of a box started with [`begin_box`].
pub fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}
