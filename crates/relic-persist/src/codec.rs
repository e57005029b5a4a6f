//! Binary reader/writer for region files.
//!
//! Layout: version, region name, world name, either two legacy corner
//! points (v1) or a chunk-section descriptor (v2), a 64-bit volume, then
//! exactly `volume` voxel records, then count-prefixed block-entity and
//! freestanding-entity lists. Little-endian fixed-width integers,
//! u32-length-prefixed UTF-8 strings. Both versions decode; only v2 is
//! produced by the engine.

use std::io::{Read, Write};

use relic_geom::{ChunkCoord, ChunkSection};
use relic_world::{BlockEntityState, EntityKind, EntityState};

use crate::RegionFileError;

pub const FORMAT_V1: i32 = 1;
pub const FORMAT_V2: i32 = 2;

/// Strings longer than this are treated as corruption rather than read.
const MAX_STRING: u32 = 1 << 20;

pub(crate) trait WireRead: Read {
    fn get_u8(&mut self) -> Result<u8, RegionFileError> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }

    fn get_i16(&mut self) -> Result<i16, RegionFileError> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(i16::from_le_bytes(b))
    }

    fn get_i32(&mut self) -> Result<i32, RegionFileError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }

    fn get_i64(&mut self) -> Result<i64, RegionFileError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }

    fn get_u32(&mut self) -> Result<u32, RegionFileError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }

    fn get_f32(&mut self) -> Result<f32, RegionFileError> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(f32::from_le_bytes(b))
    }

    fn get_f64(&mut self) -> Result<f64, RegionFileError> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }

    fn get_string(&mut self) -> Result<String, RegionFileError> {
        let len = self.get_u32()?;
        if len > MAX_STRING {
            return Err(RegionFileError::Malformed(format!(
                "string length {len} exceeds limit"
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        String::from_utf8(buf)
            .map_err(|e| RegionFileError::Malformed(format!("invalid utf-8 string: {e}")))
    }
}

impl<R: Read + ?Sized> WireRead for R {}

pub(crate) trait WireWrite: Write {
    fn put_u8(&mut self, v: u8) -> Result<(), RegionFileError> {
        Ok(self.write_all(&[v])?)
    }

    fn put_i16(&mut self, v: i16) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_i32(&mut self, v: i32) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_i64(&mut self, v: i64) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_u32(&mut self, v: u32) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_f32(&mut self, v: f32) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_f64(&mut self, v: f64) -> Result<(), RegionFileError> {
        Ok(self.write_all(&v.to_le_bytes())?)
    }

    fn put_string(&mut self, s: &str) -> Result<(), RegionFileError> {
        self.put_u32(s.len() as u32)?;
        Ok(self.write_all(s.as_bytes())?)
    }
}

impl<W: Write + ?Sized> WireWrite for W {}

/// Binary-serializable composite structures share these two traits.
pub trait CodecWrite {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError>;
}

pub trait CodecRead: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError>;
}

impl CodecWrite for ChunkSection {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        w.put_i32(self.coord.cx)?;
        w.put_i32(self.coord.cz)?;
        w.put_i32(self.x0)?;
        w.put_i32(self.y0)?;
        w.put_i32(self.z0)?;
        w.put_i32(self.x1)?;
        w.put_i32(self.y1)?;
        w.put_i32(self.z1)
    }
}

impl CodecRead for ChunkSection {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        let coord = ChunkCoord::new(r.get_i32()?, r.get_i32()?);
        Ok(ChunkSection {
            coord,
            x0: r.get_i32()?,
            y0: r.get_i32()?,
            z0: r.get_i32()?,
            x1: r.get_i32()?,
            y1: r.get_i32()?,
            z1: r.get_i32()?,
        })
    }
}

/// One persisted voxel: position, material name, auxiliary data, and the
/// packed light/skylight byte.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoxelRecord {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub type_name: String,
    pub data: i16,
    pub light: u8,
}

impl CodecWrite for VoxelRecord {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        w.put_i32(self.x)?;
        w.put_i32(self.y)?;
        w.put_i32(self.z)?;
        w.put_string(&self.type_name)?;
        w.put_i16(self.data)?;
        w.put_u8(self.light)
    }
}

impl CodecRead for VoxelRecord {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        Ok(VoxelRecord {
            x: r.get_i32()?,
            y: r.get_i32()?,
            z: r.get_i32()?,
            type_name: r.get_string()?,
            data: r.get_i16()?,
            light: r.get_u8()?,
        })
    }
}

impl CodecWrite for BlockEntityState {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        w.put_i32(self.x)?;
        w.put_i32(self.y)?;
        w.put_i32(self.z)?;
        w.put_string(&self.kind)?;
        w.put_string(&self.payload)
    }
}

impl CodecRead for BlockEntityState {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        Ok(BlockEntityState {
            x: r.get_i32()?,
            y: r.get_i32()?,
            z: r.get_i32()?,
            kind: r.get_string()?,
            payload: r.get_string()?,
        })
    }
}

impl CodecWrite for EntityState {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        w.put_string(self.kind.as_str())?;
        w.put_f64(self.x)?;
        w.put_f64(self.y)?;
        w.put_f64(self.z)?;
        w.put_f32(self.yaw)?;
        w.put_string(&self.tag)
    }
}

impl CodecRead for EntityState {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        let kind_name = r.get_string()?;
        let kind = EntityKind::from_str(&kind_name).ok_or_else(|| {
            RegionFileError::Malformed(format!("unknown entity kind {kind_name:?}"))
        })?;
        Ok(EntityState {
            kind,
            x: r.get_f64()?,
            y: r.get_f64()?,
            z: r.get_f64()?,
            yaw: r.get_f32()?,
            tag: r.get_string()?,
        })
    }
}

/// Header body: one branch on the version field, then a plain struct per
/// variant.
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderBody {
    /// v1 carried the region's two raw corner points.
    Legacy {
        lo: (f64, f64, f64),
        hi: (f64, f64, f64),
    },
    /// v2 carries the per-chunk section descriptor.
    Section(ChunkSection),
}

#[derive(Clone, Debug, PartialEq)]
pub struct RegionFileHeader {
    pub region: String,
    pub world: String,
    pub body: HeaderBody,
    pub volume: i64,
}

impl RegionFileHeader {
    pub fn version(&self) -> i32 {
        match self.body {
            HeaderBody::Legacy { .. } => FORMAT_V1,
            HeaderBody::Section(_) => FORMAT_V2,
        }
    }

    /// The section this file covers. Legacy files stored whole-region
    /// points, so their box is clipped to the chunk the file belongs to.
    pub fn section_for(&self, coord: ChunkCoord) -> Option<ChunkSection> {
        match &self.body {
            HeaderBody::Section(s) => Some(*s),
            HeaderBody::Legacy { lo, hi } => ChunkSection::clip(
                (
                    lo.0.floor() as i32,
                    lo.1.floor() as i32,
                    lo.2.floor() as i32,
                    hi.0.floor() as i32,
                    hi.1.floor() as i32,
                    hi.2.floor() as i32,
                ),
                coord,
            ),
        }
    }
}

impl CodecWrite for RegionFileHeader {
    fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        w.put_i32(self.version())?;
        w.put_string(&self.region)?;
        w.put_string(&self.world)?;
        match &self.body {
            HeaderBody::Legacy { lo, hi } => {
                w.put_f64(lo.0)?;
                w.put_f64(lo.1)?;
                w.put_f64(lo.2)?;
                w.put_f64(hi.0)?;
                w.put_f64(hi.1)?;
                w.put_f64(hi.2)?;
            }
            HeaderBody::Section(s) => s.encode(w)?,
        }
        w.put_i64(self.volume)
    }
}

impl CodecRead for RegionFileHeader {
    fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        let version = r.get_i32()?;
        let region = match version {
            FORMAT_V1 | FORMAT_V2 => r.get_string()?,
            found => return Err(RegionFileError::UnsupportedVersion { found }),
        };
        let world = r.get_string()?;
        let body = match version {
            FORMAT_V1 => HeaderBody::Legacy {
                lo: (r.get_f64()?, r.get_f64()?, r.get_f64()?),
                hi: (r.get_f64()?, r.get_f64()?, r.get_f64()?),
            },
            _ => HeaderBody::Section(ChunkSection::decode(r)?),
        };
        let volume = r.get_i64()?;
        Ok(RegionFileHeader {
            region,
            world,
            body,
            volume,
        })
    }
}

/// A fully decoded region file.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionFile {
    pub header: RegionFileHeader,
    pub records: Vec<VoxelRecord>,
    pub block_entities: Vec<BlockEntityState>,
    pub entities: Vec<EntityState>,
}

impl RegionFile {
    pub fn encode<W: Write>(&self, w: &mut W) -> Result<(), RegionFileError> {
        self.header.encode(w)?;
        for record in &self.records {
            record.encode(w)?;
        }
        w.put_u32(self.block_entities.len() as u32)?;
        for be in &self.block_entities {
            be.encode(w)?;
        }
        w.put_u32(self.entities.len() as u32)?;
        for e in &self.entities {
            e.encode(w)?;
        }
        Ok(())
    }

    /// Reads records and entity lists after the header was decoded and its
    /// volume validated by the caller.
    pub fn decode_body<R: Read>(
        header: RegionFileHeader,
        r: &mut R,
    ) -> Result<Self, RegionFileError> {
        if header.volume < 0 {
            return Err(RegionFileError::Malformed(format!(
                "negative record count {}",
                header.volume
            )));
        }
        let mut records = Vec::with_capacity(header.volume.min(1 << 20) as usize);
        for _ in 0..header.volume {
            records.push(VoxelRecord::decode(r)?);
        }
        let be_count = r.get_u32()?;
        let mut block_entities = Vec::with_capacity(be_count.min(1 << 16) as usize);
        for _ in 0..be_count {
            block_entities.push(BlockEntityState::decode(r)?);
        }
        let e_count = r.get_u32()?;
        let mut entities = Vec::with_capacity(e_count.min(1 << 16) as usize);
        for _ in 0..e_count {
            entities.push(EntityState::decode(r)?);
        }
        Ok(RegionFile {
            header,
            records,
            block_entities,
            entities,
        })
    }

    pub fn decode<R: Read>(r: &mut R) -> Result<Self, RegionFileError> {
        let header = RegionFileHeader::decode(r)?;
        Self::decode_body(header, r)
    }
}
