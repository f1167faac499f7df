//! Per-track chunk and sample indices.
//!
//! `build_index` expands the compressed sample tables into one record per
//! chunk and per sample; `update_index` rewrites the tables in place for a
//! `[start, end)` sample range. Rewrites only shrink: they overwrite the
//! existing rows and truncate, so no table reallocates after parse (the
//! `stsc` table reserves one spare row at parse time for the mid-chunk
//! split).

use super::moov::Trak;
use super::tables::{CttsEntry, StscEntry, SttsEntry};

/// One chunk of contiguously stored samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkRecord {
    /// 0-based index of the first sample in the chunk.
    pub first_sample: u32,
    /// Number of samples in the chunk.
    pub sample_count: u32,
    pub description_id: u32,
    /// Absolute file offset of the chunk's first byte.
    pub file_offset: u64,
}

/// One decodable sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleRecord {
    /// Decode time in track ticks.
    pub pts: u64,
    /// Decode duration in track ticks.
    pub duration: u32,
    /// Size in bytes.
    pub size: u32,
    /// Absolute file offset of the sample's first byte.
    pub file_position: u64,
    /// Composition time offset in track ticks.
    pub cto: u32,
}

impl Trak {
    /// Expand the sample tables into per-chunk and per-sample records.
    ///
    /// Inconsistent tables (a `stts` or `ctts` describing more samples than
    /// exist, or chunks past the sample count) are capped at the shorter
    /// side rather than read out of range.
    pub(crate) fn build_index(&mut self) {
        let stbl = &self.mdia.minf.stbl;

        let mut chunks: Vec<ChunkRecord> = stbl
            .stco
            .chunk_offsets
            .iter()
            .map(|&file_offset| ChunkRecord {
                file_offset,
                ..ChunkRecord::default()
            })
            .collect();

        // Expand the compressed chunk map: each stsc row applies up to the
        // next row's first chunk, so walk the rows last to first.
        let mut last = chunks.len();
        for row in stbl.stsc.entries.iter().rev() {
            let first = (row.first_chunk as usize).min(last);
            for chunk in &mut chunks[first..last] {
                chunk.sample_count = row.samples_per_chunk;
                chunk.description_id = row.description_id;
            }
            last = first;
        }

        // Cumulative first-sample numbers.
        let mut total = 0u32;
        for chunk in &mut chunks {
            chunk.first_sample = total;
            total = total.saturating_add(chunk.sample_count);
        }

        let stsz = &stbl.stsz;
        let sample_count = if stsz.sample_size == 0 {
            stsz.sample_sizes.len()
        } else {
            total as usize
        };

        let mut samples = vec![SampleRecord::default(); sample_count];
        for (i, sample) in samples.iter_mut().enumerate() {
            sample.size = if stsz.sample_size == 0 {
                stsz.sample_sizes[i]
            } else {
                stsz.sample_size
            };
        }

        // Decode times and durations from stts.
        let mut i = 0;
        let mut pts = 0u64;
        'stts: for run in &stbl.stts.entries {
            for _ in 0..run.sample_count {
                if i == samples.len() {
                    break 'stts;
                }
                samples[i].pts = pts;
                samples[i].duration = run.sample_duration;
                pts += run.sample_duration as u64;
                i += 1;
            }
        }

        // Composition offsets from ctts, in lockstep.
        if let Some(ctts) = &stbl.ctts {
            let mut i = 0;
            'ctts: for run in &ctts.entries {
                for _ in 0..run.sample_count {
                    if i == samples.len() {
                        break 'ctts;
                    }
                    samples[i].cto = run.sample_offset;
                    i += 1;
                }
            }
        }

        // Byte positions: samples are laid out back to back within each chunk.
        let mut i = 0;
        'pos: for chunk in &chunks {
            let mut pos = chunk.file_offset;
            for _ in 0..chunk.sample_count {
                if i == samples.len() {
                    break 'pos;
                }
                samples[i].file_position = pos;
                pos += samples[i].size as u64;
                i += 1;
            }
        }

        self.chunks = chunks;
        self.samples = samples;
    }

    /// Rewrite the sample tables to cover samples `[start, end)` (0-based).
    ///
    /// The derived `chunks` and `samples` indices still describe the original
    /// file afterwards; the driver reads original byte positions from them
    /// once the tables are rewritten.
    pub(crate) fn update_index(&mut self, start: u32, end: u32) {
        let end = (end as usize).min(self.samples.len());
        let start = (start as usize).min(end);
        let samples = &self.samples;
        let chunks = &self.chunks;
        let stbl = &mut self.mdia.minf.stbl;

        // stts: regroup the retained range into runs of equal duration.
        {
            let entries = &mut stbl.stts.entries;
            let mut rows = 0;
            let mut s = start;
            while s < end {
                let sample_duration = samples[s].duration;
                let mut sample_count = 1;
                while s + 1 < end && samples[s + 1].duration == sample_duration {
                    sample_count += 1;
                    s += 1;
                }
                set_entry(
                    entries,
                    rows,
                    SttsEntry {
                        sample_count,
                        sample_duration,
                    },
                );
                rows += 1;
                s += 1;
            }
            entries.truncate(rows);
            debug_assert_eq!(stbl.stts.total_samples() as usize, end - start);
        }

        // ctts: same regrouping over the composition offsets.
        if let Some(ctts) = &mut stbl.ctts {
            let entries = &mut ctts.entries;
            let mut rows = 0;
            let mut s = start;
            while s < end {
                let sample_offset = samples[s].cto;
                let mut sample_count = 1;
                while s + 1 < end && samples[s + 1].cto == sample_offset {
                    sample_count += 1;
                    s += 1;
                }
                set_entry(
                    entries,
                    rows,
                    CttsEntry {
                        sample_count,
                        sample_offset,
                    },
                );
                rows += 1;
                s += 1;
            }
            entries.truncate(rows);
            debug_assert_eq!(ctts.total_samples() as usize, end - start);
        }

        // stsc + stco: the first retained chunk usually starts mid-chunk, so
        // it gets its own row; later rows are emitted only where the
        // (samples, id) pair changes, with chunk numbers rebased.
        {
            let mut i = 0;
            while i < chunks.len() {
                let chunk = &chunks[i];
                if (chunk.first_sample as usize) + (chunk.sample_count as usize) > start {
                    break;
                }
                i += 1;
            }
            let chunk_start = i;

            let stsc = &mut stbl.stsc;
            let mut rows = 0;
            if chunk_start < chunks.len() && start < end {
                let mut samples_per_chunk =
                    chunks[chunk_start].first_sample + chunks[chunk_start].sample_count
                        - start as u32;
                let mut description_id = chunks[chunk_start].description_id;
                set_entry(
                    &mut stsc.entries,
                    rows,
                    StscEntry {
                        first_chunk: 0,
                        samples_per_chunk,
                        description_id,
                    },
                );
                rows += 1;

                i = chunk_start + 1;
                while i < chunks.len() {
                    let chunk = &chunks[i];
                    if chunk.first_sample as usize >= end {
                        break;
                    }
                    if chunk.sample_count != samples_per_chunk
                        || chunk.description_id != description_id
                    {
                        samples_per_chunk = chunk.sample_count;
                        description_id = chunk.description_id;
                        set_entry(
                            &mut stsc.entries,
                            rows,
                            StscEntry {
                                first_chunk: (i - chunk_start) as u32,
                                samples_per_chunk,
                                description_id,
                            },
                        );
                        rows += 1;
                    }
                    i += 1;
                }
            }
            let chunk_end = i.max(chunk_start);
            stsc.entries.truncate(rows);

            let stco = &mut stbl.stco;
            stco.chunk_offsets.copy_within(chunk_start..chunk_end, 0);
            stco.chunk_offsets.truncate(chunk_end - chunk_start);
            // The first retained chunk starts at the first retained sample,
            // not at the original chunk boundary.
            if !stco.chunk_offsets.is_empty() && start < samples.len() {
                stco.chunk_offsets[0] = samples[start].file_position;
            }
        }

        // stss: keep syncs inside the range, renumbered from the new first
        // sample (entries stay 1-based).
        if let Some(stss) = &mut stbl.stss {
            let numbers = &mut stss.sample_numbers;
            let mut i = 0;
            while i < numbers.len() && (numbers[i] as usize) < start + 1 {
                i += 1;
            }
            let mut rows = 0;
            while i < numbers.len() {
                let sync = numbers[i];
                if sync as usize >= end + 1 {
                    break;
                }
                numbers[rows] = sync - start as u32;
                rows += 1;
                i += 1;
            }
            numbers.truncate(rows);
        }

        // stsz: shift the retained sizes down.
        let stsz = &mut stbl.stsz;
        if stsz.sample_size == 0 {
            let end = end.min(stsz.sample_sizes.len());
            let start = start.min(end);
            stsz.sample_sizes.copy_within(start..end, 0);
            stsz.sample_sizes.truncate(end - start);
        }
    }
}

/// Overwrite row `i` or append when the rewrite needs one row more than the
/// original table had (the stsc mid-chunk split, or trailing samples a short
/// table never described).
fn set_entry<T>(entries: &mut Vec<T>, i: usize, entry: T) {
    if i < entries.len() {
        entries[i] = entry;
    } else {
        entries.push(entry);
    }
}
