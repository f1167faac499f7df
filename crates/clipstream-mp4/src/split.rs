//! Splitter driver.
//!
//! Orchestrates a split: scan the top-level boxes, parse the `moov` tree,
//! map the requested seconds to keyframe-aligned sample ranges, rewrite the
//! sample tables, serialize the new header, and patch the chunk offsets for
//! the new layout. The caller streams the returned `mdat` byte range of the
//! original file after the header.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::Path;

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::mp4::{scan, AtomType, Moov, StcoPatch};

/// 42-byte `free` marker emitted between `ftyp` and the rewritten `moov`.
static FREE_MARKER: [u8; 42] = *b"\x00\x00\x00\x2Afreevideo served by mod_h264_streaming";

/// Split parameters.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitOptions {
    /// Interval start in seconds; `0.0` means from the start of the movie.
    pub start_secs: f64,
    /// Interval end in seconds; `0.0` means to the end of the movie.
    pub end_secs: f64,
    /// Reserved for the compressed-moov (`cmov`) emission path.
    pub client_is_flash: bool,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            start_secs: 0.0,
            end_secs: 0.0,
            client_is_flash: false,
        }
    }
}

/// Result of a split: the new file prefix plus the byte range of the source
/// file to stream after it.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize, serde::Deserialize))]
pub struct SplitResult {
    /// `ftyp` + `free` marker + rewritten `moov` + `mdat` header.
    pub header: Vec<u8>,
    /// Absolute offset of the first media byte to stream from the source.
    pub mdat_offset: u64,
    /// Number of media bytes to stream after the header.
    pub mdat_size: u64,
}

/// Split an MP4 file on disk. See [`split`].
pub fn split_file(path: &Path, options: &SplitOptions) -> Result<SplitResult> {
    let file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    split(&mut reader, file_size, options)
}

/// Split an MP4 into a rewritten header and a source byte range covering the
/// samples in `[start_secs, end_secs)`, snapped to sync samples.
///
/// The concatenation of `header` and bytes
/// `[mdat_offset, mdat_offset + mdat_size)` of the source is a valid,
/// playable MP4 containing only the requested interval.
pub fn split<R: Read + Seek>(
    reader: &mut R,
    file_size: u64,
    options: &SplitOptions,
) -> Result<SplitResult> {
    tracing::debug!(
        start_secs = options.start_secs,
        end_secs = options.end_secs,
        client_is_flash = options.client_is_flash,
        "splitting"
    );

    let top = scan(reader, file_size)?;
    let mut moov = Moov::read(&top.moov_data[top.moov.header_size as usize..])?;

    let cuts = compute_cuts(&moov, options)?;

    // Rewrite every retained track and work out how much of the media payload
    // the interval actually covers.
    let moov_timescale = moov.mvhd.timescale;
    let mut skip_from_start: Option<u64> = None;
    let mut end_offset = 0u64;
    let mut moov_duration = 0u64;

    for (trak, &(start_sample, end_sample)) in moov.traks.iter_mut().zip(&cuts) {
        if trak.mdia.mdhd.duration == 0 {
            continue;
        }

        trak.update_index(start_sample, end_sample);

        let first = trak.samples.first().map(|s| s.file_position).unwrap_or(0);
        let skip = match trak.samples.get(start_sample as usize) {
            Some(sample) => sample.file_position.saturating_sub(first),
            // The whole track lies before the cut; all of its bytes are
            // skippable.
            None => trak
                .samples
                .last()
                .map(|s| (s.file_position + s.size as u64).saturating_sub(first))
                .unwrap_or(0),
        };
        tracing::debug!(track_id = trak.tkhd.track_id, skip, "head bytes skippable");
        skip_from_start = Some(skip_from_start.map_or(skip, |s| s.min(skip)));

        if let Some(sample) = trak.samples.get(end_sample as usize) {
            end_offset = end_offset.max(sample.file_position);
        }

        let trak_duration = trak.mdia.minf.stbl.stts.total_duration();
        let trak_timescale = trak.mdia.mdhd.timescale;
        let trak_to_moov = moov_timescale as f64 / trak_timescale as f64;
        let duration = (trak_duration as f64 * trak_to_moov).round() as u64;
        trak.mdia.mdhd.duration = trak_duration;
        trak.tkhd.duration = duration;
        moov_duration = moov_duration.max(duration);
    }
    moov.mvhd.duration = moov_duration;
    let skip_from_start = skip_from_start.unwrap_or(0);

    // New prefix: ftyp verbatim, marker, rewritten moov, mdat header.
    let mut header =
        BytesMut::with_capacity((top.ftyp.size + top.moov.size) as usize + 4 * 1024);
    header.put_slice(&top.ftyp_data);
    header.put_slice(&FREE_MARKER);
    let patches = moov.write(&mut header)?;
    let new_mdat_start = header.len() as u64;

    // Every chunk offset moves by the same delta between the old and new
    // layouts.
    let delta = new_mdat_start as i64 - top.mdat.start() as i64 - skip_from_start as i64;
    tracing::debug!(delta, "shifting chunk offsets");
    shift_chunk_offsets(&mut header, &patches, delta)?;

    // Byte range of the source payload that the caller streams.
    let header_size = top.mdat.header_size as u64;
    let mdat_offset = top.mdat.start() + header_size + skip_from_start;
    let end_abs = if end_offset != 0 {
        end_offset
    } else {
        top.mdat.end()
    };
    let mdat_size = end_abs.saturating_sub(mdat_offset);

    // mdat header in the same (8- or 16-byte) form as the source.
    let new_mdat_size = header_size + mdat_size;
    if top.mdat.header_size == 16 {
        header.put_u32(1);
        header.put_slice(&AtomType::MDAT.0);
        header.put_u64(new_mdat_size);
    } else {
        header.put_u32(new_mdat_size as u32);
        header.put_slice(&AtomType::MDAT.0);
    }

    Ok(SplitResult {
        header: header.to_vec(),
        mdat_offset,
        mdat_size,
    })
}

/// Map the requested seconds to per-track `[start_sample, end_sample)`
/// ranges, snapped to sync samples.
///
/// Two passes over the tracks: the first visits only tracks with a sync
/// table and establishes the keyframe-snapped boundary; the second aligns
/// the remaining tracks (typically audio) to it. Both passes refine the
/// shared boundary ticks in track order.
fn compute_cuts(moov: &Moov, options: &SplitOptions) -> Result<Vec<(u32, u32)>> {
    let moov_timescale = moov.mvhd.timescale;
    let mut start_ticks = (options.start_secs * moov_timescale as f64).round() as u64;
    let mut end_ticks = (options.end_secs * moov_timescale as f64).round() as u64;
    let mut cuts = vec![(0u32, 0u32); moov.traks.len()];

    for pass in 0..2 {
        for (i, trak) in moov.traks.iter().enumerate() {
            let stbl = &trak.mdia.minf.stbl;
            if (pass == 0) != stbl.stss.is_some() {
                continue;
            }
            if trak.mdia.mdhd.duration == 0 {
                continue;
            }

            let trak_timescale = trak.mdia.mdhd.timescale;
            let moov_to_trak = trak_timescale as f64 / moov_timescale as f64;
            let trak_to_moov = moov_timescale as f64 / trak_timescale as f64;
            let total = trak.samples.len() as u32;

            if start_ticks == 0 {
                cuts[i].0 = 0;
            } else {
                let mut sample = stbl
                    .stts
                    .sample_at_time((start_ticks as f64 * moov_to_trak).round() as u64);
                sample = stbl.nearest_sync_before(sample + 1) - 1;
                cuts[i].0 = sample;
                start_ticks = (stbl.stts.time_of_sample(sample) as f64 * trak_to_moov).round() as u64;
                tracing::debug!(
                    track_id = trak.tkhd.track_id,
                    sample,
                    start_ticks,
                    "start snapped"
                );
            }

            if end_ticks == 0 {
                cuts[i].1 = total;
            } else {
                let mut sample = stbl
                    .stts
                    .sample_at_time((end_ticks as f64 * moov_to_trak).round() as u64);
                if sample >= total {
                    sample = total;
                } else {
                    sample = stbl.nearest_sync_before(sample + 1) - 1;
                }
                cuts[i].1 = sample;
                end_ticks = (stbl.stts.time_of_sample(sample) as f64 * trak_to_moov).round() as u64;
                tracing::debug!(
                    track_id = trak.tkhd.track_id,
                    sample,
                    end_ticks,
                    "end snapped"
                );
            }
        }
    }

    if end_ticks != 0 && start_ticks >= end_ticks {
        return Err(Error::EmptyInterval {
            start_secs: options.start_secs,
            end_secs: options.end_secs,
        });
    }

    Ok(cuts)
}

/// Add `delta` to every serialized 32-bit chunk offset in the output buffer.
fn shift_chunk_offsets(buf: &mut BytesMut, patches: &[StcoPatch], delta: i64) -> Result<()> {
    for patch in patches {
        let table = patch.payload_offset + 8;
        for entry in 0..patch.entry_count as usize {
            let at = table + entry * 4;
            let old = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
            let shifted = old as i64 + delta;
            if shifted < 0 || shifted > u32::MAX as i64 {
                return Err(Error::OffsetOverflow { offset: shifted });
            }
            buf[at..at + 4].copy_from_slice(&(shifted as u32).to_be_bytes());
        }
    }
    Ok(())
}
