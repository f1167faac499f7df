//! Typed `moov` tree: parse, mutate, serialize.
//!
//! The tree is parsed once, rewritten in place by the index rewriter, and
//! serialized once. Each parent exclusively owns its children. Child boxes the
//! rewriter does not model are preserved verbatim in their parent's unknown
//! list and re-emitted first, in insertion order, on serialization.

use bytes::{BufMut, BytesMut};

use super::atoms::{AtomType, HandlerType};
use super::cursor::{begin_box, end_box, put_u24, Cursor};
use super::index::{ChunkRecord, SampleRecord};
use super::tables::{Ctts, Stco, Stsc, Stss, Stsz, Stts};
use crate::error::{Error, Result};

/// Maximum number of retained (audio/video) tracks.
pub const MAX_TRACKS: usize = 8;

const MHLR: u32 = u32::from_be_bytes(*b"mhlr");

/// An unrecognized child box, kept verbatim.
#[derive(Debug, Clone)]
pub struct UnknownAtom {
    pub atom_type: AtomType,
    /// Full box bytes, header included.
    pub data: Vec<u8>,
}

/// Location of a serialized `stco` payload inside the output buffer, for the
/// in-place chunk-offset patch once the final layout is known.
#[derive(Debug, Clone, Copy)]
pub struct StcoPatch {
    pub trak_index: usize,
    /// Byte offset of the `stco` payload (version byte) in the output buffer.
    pub payload_offset: usize,
    pub entry_count: u32,
}

/// Movie header atom (`mvhd`).
#[derive(Debug, Clone)]
pub struct Mvhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    /// Ticks per second for `duration`.
    pub timescale: u32,
    pub duration: u64,
    pub rate: u32,
    pub volume: u16,
    pub reserved1: u16,
    pub reserved2: [u32; 2],
    pub matrix: [u32; 9],
    pub predefined: [u32; 6],
    pub next_track_id: u32,
}

impl Mvhd {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let (creation_time, modification_time, timescale, duration) = if version == 0 {
            (
                cur.read_u32()? as u64,
                cur.read_u32()? as u64,
                cur.read_u32()?,
                cur.read_u32()? as u64,
            )
        } else {
            (
                cur.read_u64()?,
                cur.read_u64()?,
                cur.read_u32()?,
                cur.read_u64()?,
            )
        };
        let rate = cur.read_u32()?;
        let volume = cur.read_u16()?;
        let reserved1 = cur.read_u16()?;
        let reserved2 = [cur.read_u32()?, cur.read_u32()?];
        let mut matrix = [0u32; 9];
        for m in &mut matrix {
            *m = cur.read_u32()?;
        }
        let mut predefined = [0u32; 6];
        for p in &mut predefined {
            *p = cur.read_u32()?;
        }
        let next_track_id = cur.read_u32()?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            reserved1,
            reserved2,
            matrix,
            predefined,
            next_track_id,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        if self.version == 0 {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        } else {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        }
        buf.put_u32(self.rate);
        buf.put_u16(self.volume);
        buf.put_u16(self.reserved1);
        for &r in &self.reserved2 {
            buf.put_u32(r);
        }
        for &m in &self.matrix {
            buf.put_u32(m);
        }
        for &p in &self.predefined {
            buf.put_u32(p);
        }
        buf.put_u32(self.next_track_id);
    }
}

/// Track header atom (`tkhd`).
#[derive(Debug, Clone)]
pub struct Tkhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub reserved: u32,
    /// In `mvhd` timescale ticks.
    pub duration: u64,
    pub reserved2: [u32; 2],
    pub layer: u16,
    pub predefined: u16,
    pub volume: u16,
    pub reserved3: u16,
    pub matrix: [u32; 9],
    pub width: u32,
    pub height: u32,
}

impl Tkhd {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let (creation_time, modification_time, track_id, reserved, duration) = if version == 0 {
            (
                cur.read_u32()? as u64,
                cur.read_u32()? as u64,
                cur.read_u32()?,
                cur.read_u32()?,
                cur.read_u32()? as u64,
            )
        } else {
            (
                cur.read_u64()?,
                cur.read_u64()?,
                cur.read_u32()?,
                cur.read_u32()?,
                cur.read_u64()?,
            )
        };
        let reserved2 = [cur.read_u32()?, cur.read_u32()?];
        let layer = cur.read_u16()?;
        let predefined = cur.read_u16()?;
        let volume = cur.read_u16()?;
        let reserved3 = cur.read_u16()?;
        let mut matrix = [0u32; 9];
        for m in &mut matrix {
            *m = cur.read_u32()?;
        }
        let width = cur.read_u32()?;
        let height = cur.read_u32()?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            reserved,
            duration,
            reserved2,
            layer,
            predefined,
            volume,
            reserved3,
            matrix,
            width,
            height,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        if self.version == 0 {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u32(self.duration as u32);
        } else {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u64(self.duration);
        }
        for &r in &self.reserved2 {
            buf.put_u32(r);
        }
        buf.put_u16(self.layer);
        buf.put_u16(self.predefined);
        buf.put_u16(self.volume);
        buf.put_u16(self.reserved3);
        for &m in &self.matrix {
            buf.put_u32(m);
        }
        buf.put_u32(self.width);
        buf.put_u32(self.height);
    }
}

/// Media header atom (`mdhd`).
#[derive(Debug, Clone)]
pub struct Mdhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    /// Ticks per second for this track's clock.
    pub timescale: u32,
    /// In track timescale ticks.
    pub duration: u64,
    /// ISO-639 language, unpacked to lowercase ASCII letters.
    pub language: [u8; 3],
    pub predefined: u16,
}

impl Mdhd {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let (creation_time, modification_time, timescale, duration) = if version == 0 {
            (
                cur.read_u32()? as u64,
                cur.read_u32()? as u64,
                cur.read_u32()?,
                cur.read_u32()? as u64,
            )
        } else {
            (
                cur.read_u64()?,
                cur.read_u64()?,
                cur.read_u32()?,
                cur.read_u64()?,
            )
        };
        let packed = cur.read_u16()?;
        let mut language = [0u8; 3];
        for (i, c) in language.iter_mut().enumerate() {
            *c = (((packed >> ((2 - i) * 5)) & 0x1f) + 0x60) as u8;
        }
        let predefined = cur.read_u16()?;

        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
            predefined,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        if self.version == 0 {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        } else {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        }
        let packed = ((self.language[0] as u16 - 0x60) << 10)
            | ((self.language[1] as u16 - 0x60) << 5)
            | (self.language[2] as u16 - 0x60);
        buf.put_u16(packed);
        buf.put_u16(self.predefined);
    }
}

/// Handler reference atom (`hdlr`).
#[derive(Debug, Clone)]
pub struct Hdlr {
    pub version: u8,
    pub flags: u32,
    pub predefined: u32,
    pub handler_type: [u8; 4],
    pub reserved: [u32; 3],
    /// Trailing name; Pascal-style (leading length byte) when
    /// `predefined == 'mhlr'`, otherwise the remainder of the box.
    pub name: Option<Vec<u8>>,
}

impl Hdlr {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let predefined = cur.read_u32()?;
        let mut handler_type = [0u8; 4];
        handler_type.copy_from_slice(cur.read_bytes(4)?);
        let reserved = [cur.read_u32()?, cur.read_u32()?, cur.read_u32()?];

        let name = if cur.remaining() > 0 {
            if predefined == MHLR {
                let len = (cur.read_u8()? as usize).min(cur.remaining());
                Some(cur.read_bytes(len)?.to_vec())
            } else {
                Some(cur.read_rest().to_vec())
            }
        } else {
            None
        };

        Ok(Self {
            version,
            flags,
            predefined,
            handler_type,
            reserved,
            name,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u32(self.predefined);
        buf.put_slice(&self.handler_type);
        for &r in &self.reserved {
            buf.put_u32(r);
        }
        if let Some(name) = &self.name {
            if self.predefined == MHLR {
                buf.put_u8(name.len() as u8);
            }
            buf.put_slice(name);
        }
    }

    /// Classified handler type.
    pub fn handler(&self) -> HandlerType {
        HandlerType::from_bytes(self.handler_type)
    }
}

/// Video media header atom (`vmhd`).
#[derive(Debug, Clone)]
pub struct Vmhd {
    pub version: u8,
    pub flags: u32,
    pub graphics_mode: u16,
    pub opcolor: [u16; 3],
}

impl Vmhd {
    pub fn read(cur: &mut Cursor<'_>) -> Result<Self> {
        let version = cur.read_u8()?;
        let flags = cur.read_u24()?;
        let graphics_mode = cur.read_u16()?;
        let opcolor = [cur.read_u16()?, cur.read_u16()?, cur.read_u16()?];

        Ok(Self {
            version,
            flags,
            graphics_mode,
            opcolor,
        })
    }

    pub fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.version);
        put_u24(buf, self.flags);
        buf.put_u16(self.graphics_mode);
        for &c in &self.opcolor {
            buf.put_u16(c);
        }
    }
}

/// Sample table atom (`stbl`).
#[derive(Debug, Clone)]
pub struct Stbl {
    pub unknown: Vec<UnknownAtom>,
    pub stts: Stts,
    pub stss: Option<Stss>,
    pub stsc: Stsc,
    pub stsz: Stsz,
    pub stco: Stco,
    pub ctts: Option<Ctts>,
}

impl Stbl {
    pub fn read(payload: &[u8]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut stts = None;
        let mut stss = None;
        let mut stsc = None;
        let mut stsz = None;
        let mut stco = None;
        let mut ctts = None;

        let mut walk = ChildReader::new(payload);
        while let Some(child) = walk.next()? {
            let mut cur = Cursor::new(child.payload);
            match child.atom_type {
                AtomType::STTS => stts = Some(Stts::read(&mut cur)?),
                AtomType::STSS => stss = Some(Stss::read(&mut cur)?),
                AtomType::STSC => stsc = Some(Stsc::read(&mut cur)?),
                AtomType::STSZ => stsz = Some(Stsz::read(&mut cur)?),
                AtomType::STCO => stco = Some(Stco::read_stco(&mut cur)?),
                AtomType::CO64 => stco = Some(Stco::read_co64(&mut cur)?),
                AtomType::CTTS => ctts = Some(Ctts::read(&mut cur)?),
                _ => unknown.push(child.to_unknown()),
            }
        }

        Ok(Self {
            unknown,
            stts: stts.ok_or(Error::MissingAtom("stts"))?,
            stss,
            stsc: stsc.ok_or(Error::MissingAtom("stsc"))?,
            stsz: stsz.ok_or(Error::MissingAtom("stsz"))?,
            stco: stco.ok_or(Error::MissingAtom("stco"))?,
            ctts,
        })
    }

    pub fn write(
        &self,
        buf: &mut BytesMut,
        trak_index: usize,
        patches: &mut Vec<StcoPatch>,
    ) -> Result<()> {
        let start = begin_box(buf, AtomType::STBL);
        write_unknown(&self.unknown, buf);
        {
            let child = begin_box(buf, AtomType::STTS);
            self.stts.write(buf);
            end_box(buf, child);
        }
        if let Some(stss) = &self.stss {
            let child = begin_box(buf, AtomType::STSS);
            stss.write(buf);
            end_box(buf, child);
        }
        {
            let child = begin_box(buf, AtomType::STSC);
            self.stsc.write(buf);
            end_box(buf, child);
        }
        {
            let child = begin_box(buf, AtomType::STSZ);
            self.stsz.write(buf);
            end_box(buf, child);
        }
        {
            let child = begin_box(buf, AtomType::STCO);
            patches.push(StcoPatch {
                trak_index,
                payload_offset: buf.len(),
                entry_count: self.stco.chunk_offsets.len() as u32,
            });
            self.stco.write(buf)?;
            end_box(buf, child);
        }
        if let Some(ctts) = &self.ctts {
            let child = begin_box(buf, AtomType::CTTS);
            ctts.write(buf);
            end_box(buf, child);
        }
        end_box(buf, start);
        Ok(())
    }

    /// The sync sample at or before `sample` (1-based). Without a sync table
    /// every sample is a sync sample.
    pub fn nearest_sync_before(&self, sample: u32) -> u32 {
        match &self.stss {
            Some(stss) => stss.nearest_sync_before(sample),
            None => sample,
        }
    }
}

/// Media information atom (`minf`).
#[derive(Debug, Clone)]
pub struct Minf {
    pub unknown: Vec<UnknownAtom>,
    pub vmhd: Option<Vmhd>,
    pub stbl: Stbl,
}

impl Minf {
    pub fn read(payload: &[u8]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut vmhd = None;
        let mut stbl = None;

        let mut walk = ChildReader::new(payload);
        while let Some(child) = walk.next()? {
            match child.atom_type {
                AtomType::VMHD => vmhd = Some(Vmhd::read(&mut Cursor::new(child.payload))?),
                AtomType::STBL => stbl = Some(Stbl::read(child.payload)?),
                _ => unknown.push(child.to_unknown()),
            }
        }

        Ok(Self {
            unknown,
            vmhd,
            stbl: stbl.ok_or(Error::MissingAtom("stbl"))?,
        })
    }

    pub fn write(
        &self,
        buf: &mut BytesMut,
        trak_index: usize,
        patches: &mut Vec<StcoPatch>,
    ) -> Result<()> {
        let start = begin_box(buf, AtomType::MINF);
        write_unknown(&self.unknown, buf);
        if let Some(vmhd) = &self.vmhd {
            let child = begin_box(buf, AtomType::VMHD);
            vmhd.write(buf);
            end_box(buf, child);
        }
        self.stbl.write(buf, trak_index, patches)?;
        end_box(buf, start);
        Ok(())
    }
}

/// Media atom (`mdia`).
#[derive(Debug, Clone)]
pub struct Mdia {
    pub unknown: Vec<UnknownAtom>,
    pub mdhd: Mdhd,
    pub hdlr: Hdlr,
    pub minf: Minf,
}

impl Mdia {
    pub fn read(payload: &[u8]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut mdhd = None;
        let mut hdlr = None;
        let mut minf = None;

        let mut walk = ChildReader::new(payload);
        while let Some(child) = walk.next()? {
            match child.atom_type {
                AtomType::MDHD => mdhd = Some(Mdhd::read(&mut Cursor::new(child.payload))?),
                AtomType::HDLR => hdlr = Some(Hdlr::read(&mut Cursor::new(child.payload))?),
                AtomType::MINF => minf = Some(Minf::read(child.payload)?),
                _ => unknown.push(child.to_unknown()),
            }
        }

        Ok(Self {
            unknown,
            mdhd: mdhd.ok_or(Error::MissingAtom("mdhd"))?,
            hdlr: hdlr.ok_or(Error::MissingAtom("hdlr"))?,
            minf: minf.ok_or(Error::MissingAtom("minf"))?,
        })
    }

    pub fn write(
        &self,
        buf: &mut BytesMut,
        trak_index: usize,
        patches: &mut Vec<StcoPatch>,
    ) -> Result<()> {
        let start = begin_box(buf, AtomType::MDIA);
        write_unknown(&self.unknown, buf);
        {
            let child = begin_box(buf, AtomType::MDHD);
            self.mdhd.write(buf);
            end_box(buf, child);
        }
        {
            let child = begin_box(buf, AtomType::HDLR);
            self.hdlr.write(buf);
            end_box(buf, child);
        }
        self.minf.write(buf, trak_index, patches)?;
        end_box(buf, start);
        Ok(())
    }
}

/// Track atom (`trak`) with the derived chunk and sample indices.
#[derive(Debug, Clone)]
pub struct Trak {
    pub unknown: Vec<UnknownAtom>,
    pub tkhd: Tkhd,
    pub mdia: Mdia,
    /// Derived: one record per chunk, in file order.
    pub chunks: Vec<ChunkRecord>,
    /// Derived: one record per sample, in decode order.
    pub samples: Vec<SampleRecord>,
}

impl Trak {
    pub fn read(payload: &[u8]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut tkhd = None;
        let mut mdia = None;

        let mut walk = ChildReader::new(payload);
        while let Some(child) = walk.next()? {
            match child.atom_type {
                AtomType::TKHD => tkhd = Some(Tkhd::read(&mut Cursor::new(child.payload))?),
                AtomType::MDIA => mdia = Some(Mdia::read(child.payload)?),
                _ => unknown.push(child.to_unknown()),
            }
        }

        let mut trak = Self {
            unknown,
            tkhd: tkhd.ok_or(Error::MissingAtom("tkhd"))?,
            mdia: mdia.ok_or(Error::MissingAtom("mdia"))?,
            chunks: Vec::new(),
            samples: Vec::new(),
        };
        trak.build_index();
        Ok(trak)
    }

    pub fn write(
        &self,
        buf: &mut BytesMut,
        trak_index: usize,
        patches: &mut Vec<StcoPatch>,
    ) -> Result<()> {
        let start = begin_box(buf, AtomType::TRAK);
        write_unknown(&self.unknown, buf);
        {
            let child = begin_box(buf, AtomType::TKHD);
            self.tkhd.write(buf);
            end_box(buf, child);
        }
        self.mdia.write(buf, trak_index, patches)?;
        end_box(buf, start);
        Ok(())
    }
}

/// Movie atom (`moov`).
#[derive(Debug, Clone)]
pub struct Moov {
    pub unknown: Vec<UnknownAtom>,
    pub mvhd: Mvhd,
    pub traks: Vec<Trak>,
}

impl Moov {
    /// Parse a `moov` payload (the bytes after the box header).
    ///
    /// Tracks that are not audio or video are dropped; a ninth retained track
    /// fails with [`Error::TooManyTracks`].
    pub fn read(payload: &[u8]) -> Result<Self> {
        let mut unknown = Vec::new();
        let mut mvhd = None;
        let mut traks: Vec<Trak> = Vec::new();

        let mut walk = ChildReader::new(payload);
        while let Some(child) = walk.next()? {
            match child.atom_type {
                AtomType::MVHD => mvhd = Some(Mvhd::read(&mut Cursor::new(child.payload))?),
                AtomType::TRAK => {
                    let trak = Trak::read(child.payload)?;
                    let handler = trak.mdia.hdlr.handler();
                    if !handler.is_video() && !handler.is_audio() {
                        tracing::warn!(
                            handler = %AtomType(trak.mdia.hdlr.handler_type),
                            "trak ignored (not audio or video)"
                        );
                        continue;
                    }
                    if traks.len() == MAX_TRACKS {
                        return Err(Error::TooManyTracks { max: MAX_TRACKS });
                    }
                    traks.push(trak);
                }
                _ => unknown.push(child.to_unknown()),
            }
        }

        let mvhd = mvhd.ok_or(Error::MissingAtom("mvhd"))?;
        if traks.is_empty() {
            return Err(Error::MissingAtom("trak"));
        }

        Ok(Self {
            unknown,
            mvhd,
            traks,
        })
    }

    /// Serialize the tree. Returns the location of every `stco` payload in
    /// the output for the in-place chunk-offset patch.
    pub fn write(&self, buf: &mut BytesMut) -> Result<Vec<StcoPatch>> {
        let mut patches = Vec::with_capacity(self.traks.len());
        let start = begin_box(buf, AtomType::MOOV);
        write_unknown(&self.unknown, buf);
        {
            let child = begin_box(buf, AtomType::MVHD);
            self.mvhd.write(buf);
            end_box(buf, child);
        }
        for (trak_index, trak) in self.traks.iter().enumerate() {
            trak.write(buf, trak_index, &mut patches)?;
        }
        end_box(buf, start);
        Ok(patches)
    }
}

fn write_unknown(unknown: &[UnknownAtom], buf: &mut BytesMut) {
    for atom in unknown {
        buf.put_slice(&atom.data);
    }
}

/// Sequential reader over the child boxes of a container payload.
struct ChildReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

#[derive(Debug)]
struct Child<'a> {
    atom_type: AtomType,
    raw: &'a [u8],
    payload: &'a [u8],
}

impl Child<'_> {
    fn to_unknown(&self) -> UnknownAtom {
        UnknownAtom {
            atom_type: self.atom_type,
            data: self.raw.to_vec(),
        }
    }
}

impl<'a> ChildReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn next(&mut self) -> Result<Option<Child<'a>>> {
        let buf = self.buf;
        let rest = &buf[self.pos..];
        if rest.is_empty() {
            return Ok(None);
        }
        if rest.len() < 8 {
            return Err(Error::BufferUnderflow {
                need: 8,
                have: rest.len(),
            });
        }

        let short_size = u32::from_be_bytes([rest[0], rest[1], rest[2], rest[3]]);
        let atom_type = AtomType::from_bytes([rest[4], rest[5], rest[6], rest[7]]);
        let (size, header_size) = if short_size == 1 {
            if rest.len() < 16 {
                return Err(Error::BufferUnderflow {
                    need: 16,
                    have: rest.len(),
                });
            }
            let mut ext = [0u8; 8];
            ext.copy_from_slice(&rest[8..16]);
            (u64::from_be_bytes(ext), 16usize)
        } else {
            (short_size as u64, 8usize)
        };

        if size < header_size as u64 {
            return Err(Error::invalid_mp4(format!(
                "atom {atom_type} with invalid size {size}"
            )));
        }
        if size > rest.len() as u64 {
            return Err(Error::Truncated {
                atom: atom_type,
                size,
                available: rest.len() as u64,
            });
        }

        let raw = &rest[..size as usize];
        self.pos += size as usize;
        Ok(Some(Child {
            atom_type,
            raw,
            payload: &raw[header_size..],
        }))
    }
}
