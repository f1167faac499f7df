//! Sample table atoms.
//!
//! The six tables that describe how samples are laid out in `mdat`:
//! - `stts`: sample durations (decoding time)
//! - `stss`: sync sample numbers (keyframes)
//! - `stsc`: sample-to-chunk mapping
//! - `stsz`: sample sizes
//! - `stco`/`co64`: chunk offsets
//! - `ctts`: composition time offsets (for B-frames)
//!
//! All wire tables use 1-based sample and chunk numbers; `stsc` chunk numbers
//! are normalized to 0-based in memory and restored on write.

use bytes::{BufMut, BytesMut};

use super::cursor::{put_u24, Cursor};
use crate::error::{Error, Result};

/// One run of equally-durated samples in `stts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_duration: u32,
}

/// Decoding time-to-sample atom (`stts`).
#[derive(Debug, Clone)]
pub struct Stts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<SttsEntry>,
}

impl Stts {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 8)?;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push(SttsEntry {
                sample_count: cur.read_u32()?,
                sample_duration: cur.read_u32()?,
            });
        }

        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.sample_count);
            buf.put_u32(entry.sample_duration);
        }
    }

    /// Index of the sample whose decode window contains `ticks`, truncating
    /// within the run. A time at or past the end of the track clamps to the
    /// total sample count.
    pub fn sample_at_time(&self, ticks: u64) -> u32 {
        let mut sample = 0u32;
        let mut elapsed = 0u64;
        for entry in &self.entries {
            let run = entry.sample_count as u64 * entry.sample_duration as u64;
            if elapsed + run >= ticks {
                if entry.sample_duration == 0 {
                    return sample;
                }
                return sample + ((ticks - elapsed) / entry.sample_duration as u64) as u32;
            }
            elapsed += run;
            sample += entry.sample_count;
        }
        sample
    }

    /// Decode time of the given 0-based sample: the sum of the first `sample`
    /// durations. Clamps to the total duration when past the end.
    pub fn time_of_sample(&self, sample: u32) -> u64 {
        let mut ticks = 0u64;
        let mut seen = 0u32;
        for entry in &self.entries {
            if seen + entry.sample_count > sample {
                return ticks + (sample - seen) as u64 * entry.sample_duration as u64;
            }
            seen += entry.sample_count;
            ticks += entry.sample_count as u64 * entry.sample_duration as u64;
        }
        ticks
    }

    /// Total duration over all runs, in track ticks.
    pub fn total_duration(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.sample_count as u64 * e.sample_duration as u64)
            .sum()
    }

    /// Total sample count over all runs.
    pub fn total_samples(&self) -> u32 {
        self.entries.iter().map(|e| e.sample_count).sum()
    }
}

/// Sync sample atom (`stss`). Absent means every sample is a sync sample.
#[derive(Debug, Clone)]
pub struct Stss {
    pub version: u8,
    pub flags: u32,
    /// 1-based sample numbers, ascending.
    pub sample_numbers: Vec<u32>,
}

impl Stss {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 4)?;

        let mut sample_numbers = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            sample_numbers.push(cur.read_u32()?);
        }

        Ok(Self {
            version,
            flags,
            sample_numbers,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.sample_numbers.len() as u32);
        for &sample in &self.sample_numbers {
            buf.put_u32(sample);
        }
    }

    /// The sync sample at or before `sample` (both 1-based). If every sync
    /// sample lies past `sample` the first entry is returned; samples before
    /// the first sync are not independently decodable anyway.
    pub fn nearest_sync_before(&self, sample: u32) -> u32 {
        let mut prev = None;
        for &sync in &self.sample_numbers {
            if sync >= sample {
                if sync == sample {
                    return sync;
                }
                break;
            }
            prev = Some(sync);
        }
        prev.unwrap_or_else(|| self.sample_numbers.first().copied().unwrap_or(sample))
    }
}

/// One row of the sample-to-chunk map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    /// 0-based in memory; the wire format is 1-based.
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub description_id: u32,
}

/// Sample-to-chunk atom (`stsc`). A row applies to every chunk up to the next
/// row's `first_chunk`.
#[derive(Debug, Clone)]
pub struct Stsc {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<StscEntry>,
}

impl Stsc {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 12)?;

        // One spare slot: splitting mid-chunk can add a row to the rewritten
        // table, and rewrites must not reallocate.
        let mut entries = Vec::with_capacity(entry_count + 1);
        for _ in 0..entry_count {
            entries.push(StscEntry {
                first_chunk: cur.read_u32()?.saturating_sub(1),
                samples_per_chunk: cur.read_u32()?,
                description_id: cur.read_u32()?,
            });
        }

        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.first_chunk + 1);
            buf.put_u32(entry.samples_per_chunk);
            buf.put_u32(entry.description_id);
        }
    }
}

/// Sample size atom (`stsz`). Either a fixed `sample_size` for every sample,
/// or `sample_size == 0` with one entry per sample.
#[derive(Debug, Clone)]
pub struct Stsz {
    pub version: u8,
    pub flags: u32,
    pub sample_size: u32,
    pub sample_sizes: Vec<u32>,
}

impl Stsz {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let sample_size = cur.read_u32()?;
        let mut entry_count = cur.read_u32()? as usize;

        // fix for clayton.mp4, it mistakenly says there is 1 entry
        if sample_size != 0 && entry_count != 0 {
            entry_count = 0;
        }

        let mut sample_sizes = Vec::new();
        if sample_size == 0 {
            cur.require(entry_count * 4)?;
            sample_sizes.reserve(entry_count);
            for _ in 0..entry_count {
                sample_sizes.push(cur.read_u32()?);
            }
        }

        Ok(Self {
            version,
            flags,
            sample_size,
            sample_sizes,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.sample_size);
        if self.sample_size != 0 {
            buf.put_u32(0);
        } else {
            buf.put_u32(self.sample_sizes.len() as u32);
            for &size in &self.sample_sizes {
                buf.put_u32(size);
            }
        }
    }
}

/// Chunk offset atom (`stco`/`co64`). Offsets are widened to 64 bits in
/// memory; serialization always re-emits the 32-bit `stco` form and fails
/// with [`Error::OffsetOverflow`] when an offset does not fit.
#[derive(Debug, Clone)]
pub struct Stco {
    pub version: u8,
    pub flags: u32,
    pub chunk_offsets: Vec<u64>,
}

impl Stco {
    pub fn read_stco(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 4)?;

        let mut chunk_offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            chunk_offsets.push(cur.read_u32()? as u64);
        }

        Ok(Self {
            version,
            flags,
            chunk_offsets,
        })
    }

    pub fn read_co64(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 8)?;

        let mut chunk_offsets = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            chunk_offsets.push(cur.read_u64()?);
        }

        Ok(Self {
            version,
            flags,
            chunk_offsets,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.chunk_offsets.len() as u32);
        for &offset in &self.chunk_offsets {
            if offset > u32::MAX as u64 {
                return Err(Error::OffsetOverflow {
                    offset: offset as i64,
                });
            }
            buf.put_u32(offset as u32);
        }
        Ok(())
    }
}

/// One run of equal composition offsets in `ctts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CttsEntry {
    pub sample_count: u32,
    pub sample_offset: u32,
}

/// Composition time-to-sample atom (`ctts`).
#[derive(Debug, Clone)]
pub struct Ctts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<CttsEntry>,
}

impl Ctts {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let entry_count = cur.read_u32()? as usize;
        cur.require(entry_count * 8)?;

        let mut entries = Vec::with_capacity(entry_count);
        for _ in 0..entry_count {
            entries.push(CttsEntry {
                sample_count: cur.read_u32()?,
                sample_offset: cur.read_u32()?,
            });
        }

        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            buf.put_u32(entry.sample_count);
            buf.put_u32(entry.sample_offset);
        }
    }

    /// Total sample count over all runs.
    pub fn total_samples(&self) -> u32 {
        self.entries.iter().map(|e| e.sample_count).sum()
    }
}
