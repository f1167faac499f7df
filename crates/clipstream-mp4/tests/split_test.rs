//! End-to-end splitter tests over synthetic MP4 files.
//!
//! The fixture movie is 10 seconds long: a 30 fps video track (timescale
//! 3000, sync sample every 30 frames) and an audio track (timescale 8000, 20
//! ms samples), interleaved in ten chunk pairs. `mdat` precedes `moov` so the
//! chunk offsets are independent of the moov size.

use std::io::Cursor;

use clipstream_mp4::mp4::{scan, Moov};
use clipstream_mp4::{split, Error, SplitOptions};

const MDAT_PAYLOAD: u64 = 24;
const VIDEO_CHUNK_BYTES: usize = 300; // 30 samples of 10 bytes
const AUDIO_CHUNK_BYTES: usize = 400; // 50 samples of 8 bytes
const STRIDE: u64 = (VIDEO_CHUNK_BYTES + AUDIO_CHUNK_BYTES) as u64;
const CHUNKS: u64 = 10;

fn boxed(tag: &[u8; 4], payload: Vec<u8>) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    out.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
    out.extend_from_slice(tag);
    out.extend(payload);
    out
}

fn full(version: u8, flags: u32, rest: Vec<u8>) -> Vec<u8> {
    let mut out = vec![version, (flags >> 16) as u8, (flags >> 8) as u8, flags as u8];
    out.extend(rest);
    out
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn mvhd() -> Vec<u8> {
    let mut rest = u32s(&[0, 0, 1000, 10_000, 0x0001_0000]);
    rest.extend_from_slice(&0x0100u16.to_be_bytes());
    rest.extend_from_slice(&0u16.to_be_bytes());
    rest.extend(u32s(&[0, 0])); // reserved
    rest.extend(u32s(&[0x10000, 0, 0, 0, 0x10000, 0, 0, 0, 0x40000000]));
    rest.extend(u32s(&[0; 6]));
    rest.extend(u32s(&[4])); // next track id
    boxed(b"mvhd", full(0, 0, rest))
}

fn tkhd(track_id: u32, duration: u32, width: u32, height: u32) -> Vec<u8> {
    let mut rest = u32s(&[0, 0, track_id, 0, duration, 0, 0]);
    rest.extend_from_slice(&[0u8; 8]); // layer, predefined, volume, reserved
    rest.extend(u32s(&[0x10000, 0, 0, 0, 0x10000, 0, 0, 0, 0x40000000]));
    rest.extend(u32s(&[width << 16, height << 16]));
    boxed(b"tkhd", full(0, 7, rest))
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut rest = u32s(&[0, 0, timescale, duration]);
    rest.extend_from_slice(&0x55C4u16.to_be_bytes()); // 'und'
    rest.extend_from_slice(&0u16.to_be_bytes());
    boxed(b"mdhd", full(0, 0, rest))
}

fn hdlr(handler: &[u8; 4], name: &[u8]) -> Vec<u8> {
    let mut rest = u32s(&[0]);
    rest.extend_from_slice(handler);
    rest.extend(u32s(&[0, 0, 0]));
    rest.extend_from_slice(name);
    rest.push(0);
    boxed(b"hdlr", full(0, 0, rest))
}

fn stts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut rest = u32s(&[entries.len() as u32]);
    for &(count, duration) in entries {
        rest.extend(u32s(&[count, duration]));
    }
    boxed(b"stts", full(0, 0, rest))
}

fn stss(samples: &[u32]) -> Vec<u8> {
    let mut rest = u32s(&[samples.len() as u32]);
    rest.extend(u32s(samples));
    boxed(b"stss", full(0, 0, rest))
}

fn stsc(rows: &[(u32, u32, u32)]) -> Vec<u8> {
    let mut rest = u32s(&[rows.len() as u32]);
    for &(first_chunk, samples, id) in rows {
        rest.extend(u32s(&[first_chunk, samples, id]));
    }
    boxed(b"stsc", full(0, 0, rest))
}

fn stsz(sample_size: u32, sizes: &[u32]) -> Vec<u8> {
    let mut rest = u32s(&[sample_size, sizes.len() as u32]);
    rest.extend(u32s(sizes));
    boxed(b"stsz", full(0, 0, rest))
}

fn stsz_fixed(sample_size: u32) -> Vec<u8> {
    boxed(b"stsz", full(0, 0, u32s(&[sample_size, 0])))
}

fn stco(offsets: &[u64], co64: bool) -> Vec<u8> {
    if co64 {
        let mut rest = u32s(&[offsets.len() as u32]);
        for &offset in offsets {
            rest.extend_from_slice(&offset.to_be_bytes());
        }
        boxed(b"co64", full(0, 0, rest))
    } else {
        let mut rest = u32s(&[offsets.len() as u32]);
        for &offset in offsets {
            rest.extend(u32s(&[offset as u32]));
        }
        boxed(b"stco", full(0, 0, rest))
    }
}

fn ctts(entries: &[(u32, u32)]) -> Vec<u8> {
    let mut rest = u32s(&[entries.len() as u32]);
    for &(count, offset) in entries {
        rest.extend(u32s(&[count, offset]));
    }
    boxed(b"ctts", full(0, 0, rest))
}

/// Opaque stsd blob; the splitter must pass it through untouched.
fn stsd_blob() -> Vec<u8> {
    boxed(b"stsd", full(0, 0, u32s(&[1, 0xDEAD_BEEF, 0xCAFE_F00D])))
}

fn video_chunk_offsets() -> Vec<u64> {
    (0..CHUNKS).map(|k| MDAT_PAYLOAD + k * STRIDE).collect()
}

fn audio_chunk_offsets() -> Vec<u64> {
    (0..CHUNKS)
        .map(|k| MDAT_PAYLOAD + k * STRIDE + VIDEO_CHUNK_BYTES as u64)
        .collect()
}

fn video_trak(co64: bool) -> Vec<u8> {
    let mut stbl = Vec::new();
    stbl.extend(stsd_blob());
    stbl.extend(stts(&[(300, 100)]));
    stbl.extend(stss(&(0..10).map(|k| 1 + 30 * k).collect::<Vec<_>>()));
    stbl.extend(stsc(&[(1, 30, 1)]));
    stbl.extend(stsz(0, &[10; 300]));
    stbl.extend(stco(&video_chunk_offsets(), co64));
    stbl.extend(ctts(&[(300, 42)]));

    let mut minf = Vec::new();
    minf.extend(boxed(b"vmhd", full(0, 1, vec![0; 8])));
    minf.extend(boxed(b"stbl", stbl));

    let mut mdia = Vec::new();
    mdia.extend(mdhd(3000, 30_000));
    mdia.extend(hdlr(b"vide", b"VideoHandler"));
    mdia.extend(boxed(b"minf", minf));

    let mut trak = Vec::new();
    trak.extend(tkhd(1, 10_000, 640, 360));
    trak.extend(boxed(b"mdia", mdia));
    boxed(b"trak", trak)
}

fn audio_trak() -> Vec<u8> {
    let mut stbl = Vec::new();
    stbl.extend(stsd_blob());
    stbl.extend(stts(&[(500, 160)]));
    stbl.extend(stsc(&[(1, 50, 1)]));
    stbl.extend(stsz_fixed(8));
    stbl.extend(stco(&audio_chunk_offsets(), false));

    let mut minf = Vec::new();
    minf.extend(boxed(b"smhd", full(0, 0, vec![0; 4])));
    minf.extend(boxed(b"stbl", stbl));

    let mut mdia = Vec::new();
    mdia.extend(mdhd(8000, 80_000));
    mdia.extend(hdlr(b"soun", b"SoundHandler"));
    mdia.extend(boxed(b"minf", minf));

    let mut trak = Vec::new();
    trak.extend(tkhd(2, 10_000, 0, 0));
    trak.extend(boxed(b"mdia", mdia));
    boxed(b"trak", trak)
}

fn text_trak() -> Vec<u8> {
    let mut stbl = Vec::new();
    stbl.extend(stts(&[(1, 10_000)]));
    stbl.extend(stsc(&[(1, 1, 1)]));
    stbl.extend(stsz_fixed(100));
    stbl.extend(stco(&[MDAT_PAYLOAD], false));

    let mut minf = Vec::new();
    minf.extend(boxed(b"stbl", stbl));

    let mut mdia = Vec::new();
    mdia.extend(mdhd(1000, 10_000));
    mdia.extend(hdlr(b"text", b"TextHandler"));
    mdia.extend(boxed(b"minf", minf));

    let mut trak = Vec::new();
    trak.extend(tkhd(3, 10_000, 0, 0));
    trak.extend(boxed(b"mdia", mdia));
    boxed(b"trak", trak)
}

fn udta_blob() -> Vec<u8> {
    boxed(b"udta", b"some opaque user data".to_vec())
}

fn build_file(with_text_track: bool, co64: bool) -> Vec<u8> {
    let mut file = Vec::new();
    file.extend(boxed(b"ftyp", b"isom\x00\x00\x02\x00".to_vec()));

    // chunk pairs: video bytes are the chunk index, audio bytes the index
    // with the high bit set
    let mut payload = Vec::new();
    for k in 0..CHUNKS as u8 {
        payload.extend(vec![k; VIDEO_CHUNK_BYTES]);
        payload.extend(vec![0x80 | k; AUDIO_CHUNK_BYTES]);
    }
    file.extend(boxed(b"mdat", payload));

    let mut moov = Vec::new();
    moov.extend(mvhd());
    moov.extend(udta_blob());
    moov.extend(video_trak(co64));
    moov.extend(audio_trak());
    if with_text_track {
        moov.extend(text_trak());
    }
    file.extend(boxed(b"moov", moov));
    file
}

fn run_split(file: &[u8], start_secs: f64, end_secs: f64) -> clipstream_mp4::Result<(Vec<u8>, u64, u64)> {
    let result = split(
        &mut Cursor::new(file),
        file.len() as u64,
        &SplitOptions {
            start_secs,
            end_secs,
            ..SplitOptions::default()
        },
    )?;
    Ok((result.header, result.mdat_offset, result.mdat_size))
}

/// Header + streamed range, reparsed with the crate's own parser.
fn reconstruct(file: &[u8], header: &[u8], mdat_offset: u64, mdat_size: u64) -> (Vec<u8>, Moov) {
    let mut out = header.to_vec();
    out.extend_from_slice(&file[mdat_offset as usize..(mdat_offset + mdat_size) as usize]);
    let top = scan(&mut Cursor::new(&out[..]), out.len() as u64).unwrap();
    let moov = Moov::read(&top.moov_data[top.moov.header_size as usize..]).unwrap();
    (out, moov)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

#[test]
fn full_span_round_trip() {
    let file = build_file(false, false);
    let (header, mdat_offset, mdat_size) = run_split(&file, 0.0, 0.0).unwrap();

    // the whole payload is retained
    assert_eq!(mdat_offset, MDAT_PAYLOAD);
    assert_eq!(mdat_size, CHUNKS * STRIDE);

    let (out, moov) = reconstruct(&file, &header, mdat_offset, mdat_size);
    assert_eq!(moov.traks.len(), 2);
    assert_eq!(moov.mvhd.duration, 10_000);
    assert_eq!(moov.traks[0].samples.len(), 300);
    assert_eq!(moov.traks[1].samples.len(), 500);

    // chunk offsets land on the new mdat payload
    let new_top = scan(&mut Cursor::new(&out[..]), out.len() as u64).unwrap();
    assert_eq!(
        moov.traks[0].mdia.minf.stbl.stco.chunk_offsets[0],
        new_top.mdat.data_offset
    );

    // every reconstructed sample holds the same bytes as the original
    let orig_top = scan(&mut Cursor::new(&file[..]), file.len() as u64).unwrap();
    let orig_moov = Moov::read(&orig_top.moov_data[orig_top.moov.header_size as usize..]).unwrap();
    for (trak, orig_trak) in moov.traks.iter().zip(&orig_moov.traks) {
        for (sample, orig_sample) in trak.samples.iter().zip(&orig_trak.samples) {
            let new_bytes =
                &out[sample.file_position as usize..][..sample.size as usize];
            let old_bytes =
                &file[orig_sample.file_position as usize..][..orig_sample.size as usize];
            assert_eq!(new_bytes, old_bytes);
        }
    }
}

#[test]
fn interval_snaps_to_keyframe() {
    let file = build_file(false, false);
    let (header, mdat_offset, mdat_size) = run_split(&file, 1.5, 3.5).unwrap();

    // video snaps back to the sync frame at 1.0s (frame 30) and ends on the
    // sync at 3.0s (frame 90); audio follows the snapped times exactly
    let (out, moov) = reconstruct(&file, &header, mdat_offset, mdat_size);
    let video = &moov.traks[0];
    let audio = &moov.traks[1];
    assert_eq!(video.samples.len(), 60);
    assert_eq!(audio.samples.len(), 100);

    // 2 seconds retained
    assert_eq!(video.mdia.mdhd.duration, 6_000);
    assert_eq!(video.tkhd.duration, 2_000);
    assert_eq!(audio.mdia.mdhd.duration, 16_000);
    assert_eq!(moov.mvhd.duration, 2_000);

    // the first retained sample is a sync sample
    let stss = video.mdia.minf.stbl.stss.as_ref().unwrap();
    assert_eq!(stss.sample_numbers[0], 1);

    // streamed range: video chunk 1 through audio chunk 2
    assert_eq!(mdat_offset, MDAT_PAYLOAD + STRIDE);
    assert_eq!(mdat_size, 2 * STRIDE + VIDEO_CHUNK_BYTES as u64);

    // table consistency after the rewrite
    let stbl = &video.mdia.minf.stbl;
    assert_eq!(stbl.stts.total_samples(), 60);
    assert_eq!(stbl.ctts.as_ref().unwrap().total_samples(), 60);
    assert_eq!(stbl.stsz.sample_sizes.len(), 60);

    // chunk offsets point into the new mdat
    let new_top = scan(&mut Cursor::new(&out[..]), out.len() as u64).unwrap();
    assert_eq!(stbl.stco.chunk_offsets[0], new_top.mdat.data_offset);
    assert_eq!(
        audio.mdia.minf.stbl.stco.chunk_offsets[0],
        new_top.mdat.data_offset + VIDEO_CHUNK_BYTES as u64
    );

    // pts strictly monotonic
    for trak in &moov.traks {
        for pair in trak.samples.windows(2) {
            assert!(pair[0].pts < pair[1].pts);
        }
    }

    // video samples now start at original frame 30 (chunk 1, filler byte 1)
    let first = &video.samples[0];
    assert_eq!(
        &out[first.file_position as usize..][..first.size as usize],
        &[1u8; 10]
    );
    // audio samples start at original sample 50 (chunk 1, filler 0x81)
    let first = &audio.samples[0];
    assert_eq!(
        &out[first.file_position as usize..][..first.size as usize],
        &[0x81u8; 8]
    );
}

#[test]
fn co64_is_rewritten_as_stco() {
    let file = build_file(false, true);
    let (header, mdat_offset, mdat_size) = run_split(&file, 0.0, 0.0).unwrap();

    // the input carried co64 for the video track
    assert!(contains(&file, b"co64"));
    assert!(!contains(&header, b"co64"));

    let (_, moov) = reconstruct(&file, &header, mdat_offset, mdat_size);
    assert_eq!(moov.traks[0].samples.len(), 300);
}

#[test]
fn extra_text_track_is_dropped() {
    let file = build_file(true, false);
    let (header, mdat_offset, mdat_size) = run_split(&file, 1.0, 2.0).unwrap();

    let (_, moov) = reconstruct(&file, &header, mdat_offset, mdat_size);
    assert_eq!(moov.traks.len(), 2);
    assert!(!contains(&header, b"TextHandler"));
}

#[test]
fn unknown_boxes_survive_verbatim() {
    let file = build_file(false, false);
    let (header, _, _) = run_split(&file, 1.5, 3.5).unwrap();

    // moov-level unknown child
    assert!(contains(&header, &udta_blob()));
    // stbl-level unknown child (the opaque sample description)
    assert!(contains(&header, &stsd_blob()));
}

#[test]
fn empty_interval_fails() {
    let file = build_file(false, false);
    match run_split(&file, 5.0, 3.0) {
        Err(Error::EmptyInterval { .. }) => {}
        other => panic!("expected EmptyInterval, got {other:?}"),
    }
}

#[test]
fn header_carries_free_marker() {
    let file = build_file(false, false);
    let (header, _, _) = run_split(&file, 0.0, 0.0).unwrap();
    assert!(contains(&header, b"video served by mod_h264_streaming"));
    // marker sits right after the verbatim ftyp
    assert_eq!(&header[..16], &file[..16]);
    assert_eq!(&header[20..24], b"free");
}

#[test]
fn ninth_track_is_an_error() {
    let mut moov = Vec::new();
    moov.extend(mvhd());
    for _ in 0..9 {
        moov.extend(video_trak(false));
    }

    let mut file = Vec::new();
    file.extend(boxed(b"ftyp", b"isom\x00\x00\x02\x00".to_vec()));
    file.extend(boxed(b"mdat", vec![0; 64]));
    file.extend(boxed(b"moov", moov));

    match run_split(&file, 0.0, 0.0) {
        Err(Error::TooManyTracks { max: 8 }) => {}
        other => panic!("expected TooManyTracks, got {other:?}"),
    }
}
