use anyhow::{bail, Context, Result};
use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Magic prefix of every column object.
const COLUMN_MAGIC: &[u8; 8] = b"EVENODD\0";
/// Upper bound on the serialized header, guarding reads of damaged files.
const MAX_HEADER_BYTES: u32 = 4096;

pub const HEADER_VERSION: u32 = 1;

/// Per-column metadata. Written identically to all `p+2` units of a file
/// except for `unit`, so every surviving unit can reproduce the geometry and
/// a repaired column is byte-identical to the lost one. `created_utc` is a
/// single stamp shared by all columns of one write, which keeps the header
/// length equal across units.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ColumnHeader {
    pub version: u32,
    pub prime: u32,
    pub cell_size: u32,
    pub file_len: u64,
    pub stripes: u64,
    pub unit: u32,
    pub created_utc: String,
}

impl ColumnHeader {
    /// Geometry equality: everything but the unit index.
    pub fn same_file(&self, other: &Self) -> bool {
        self.version == other.version
            && self.prime == other.prime
            && self.cell_size == other.cell_size
            && self.file_len == other.file_len
            && self.stripes == other.stripes
            && self.created_utc == other.created_utc
    }

    /// The same header re-addressed to another unit.
    pub fn for_unit(&self, unit: usize) -> Self {
        let mut h = self.clone();
        h.unit = unit as u32;
        h
    }

    /// Byte offset of the column payload: magic + length word + body + CRC.
    pub fn data_offset(&self) -> Result<u64> {
        let body = bincode::serialized_size(self).context("size column header")?;
        Ok(8 + 4 + body + 4)
    }
}

/// Layout: magic(8) | body_len: u32 LE | bincode body | crc32(body) LE.
pub fn write_header(w: &mut impl Write, hdr: &ColumnHeader) -> Result<u64> {
    let body = bincode::serialize(hdr).context("serialize column header")?;
    let mut h = Crc32::new();
    h.update(&body);
    let crc = h.finalize();
    w.write_all(COLUMN_MAGIC)?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(&body)?;
    w.write_all(&crc.to_le_bytes())?;
    Ok(8 + 4 + body.len() as u64 + 4)
}

pub fn read_header(r: &mut impl Read) -> Result<ColumnHeader> {
    let mut magic = [0u8; 8];
    r.read_exact(&mut magic).context("read column magic")?;
    if &magic != COLUMN_MAGIC {
        bail!("bad column magic");
    }
    let mut len4 = [0u8; 4];
    r.read_exact(&mut len4).context("read header length")?;
    let body_len = u32::from_le_bytes(len4);
    if body_len == 0 || body_len > MAX_HEADER_BYTES {
        bail!("implausible column header length {body_len}");
    }
    let mut body = vec![0u8; body_len as usize];
    r.read_exact(&mut body).context("read header body")?;
    let mut crc4 = [0u8; 4];
    r.read_exact(&mut crc4).context("read header crc")?;
    let mut h = Crc32::new();
    h.update(&body);
    if h.finalize() != u32::from_le_bytes(crc4) {
        bail!("column header CRC mismatch");
    }
    let hdr: ColumnHeader = bincode::deserialize(&body).context("decode column header")?;
    if hdr.version != HEADER_VERSION {
        bail!("unsupported column header version {}", hdr.version);
    }
    Ok(hdr)
}
