//! Coordinate-encoding resolution for tree sub-tables.
//!
//! A tree header carries a 3-part type tag: the external encoding
//! (what callers see), the internal encoding (node-shape tables), and
//! the storage encoding (the point-data table). The tag is resolved
//! once per tree load; all downstream decode paths are selected by a
//! single match on the resolved kind, never per element.

use byteorder::{ByteOrder, NativeEndian};

use crate::container::header::Header;
use crate::errors::{IndexError, Result};

/// One coordinate encoding, named by its 3-letter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordType {
    F64,
    F32,
    U32,
    U16,
}

impl CoordType {
    pub fn parse(tag: &str) -> Option<CoordType> {
        match tag.trim() {
            "f64" => Some(CoordType::F64),
            "f32" => Some(CoordType::F32),
            "u32" => Some(CoordType::U32),
            "u16" => Some(CoordType::U16),
            _ => None,
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            CoordType::F64 => "f64",
            CoordType::F32 => "f32",
            CoordType::U32 => "u32",
            CoordType::U16 => "u16",
        }
    }

    pub fn size(self) -> usize {
        match self {
            CoordType::F64 => 8,
            CoordType::F32 | CoordType::U32 => 4,
            CoordType::U16 => 2,
        }
    }

    /// Fixed-point encodings need a decode-range table.
    pub fn is_fixed_point(self) -> bool {
        matches!(self, CoordType::U32 | CoordType::U16)
    }
}

/// Resolved (external, internal, storage) type triple of one tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeKind {
    pub external: CoordType,
    pub internal: CoordType,
    pub storage: CoordType,
}

impl TreeKind {
    /// Resolves the type tags from a tree header.
    ///
    /// `KDT_EXT` absent or unrecognized defaults to `f64`; `KDT_INT`
    /// and `KDT_DATA` must resolve or the header does not qualify.
    pub(crate) fn resolve(header: &Header) -> Option<TreeKind> {
        let external = header
            .string("KDT_EXT")
            .and_then(CoordType::parse)
            .unwrap_or(CoordType::F64);
        let internal = CoordType::parse(header.string("KDT_INT")?)?;
        let storage = CoordType::parse(header.string("KDT_DATA")?)?;
        Some(TreeKind {
            external,
            internal,
            storage,
        })
    }
}

/// A typed array decoded once from a raw container chunk.
#[derive(Debug, Clone)]
pub enum CoordArray {
    F64(Vec<f64>),
    F32(Vec<f32>),
    U32(Vec<u32>),
    U16(Vec<u16>),
}

impl CoordArray {
    pub(crate) fn from_bytes(kind: CoordType, bytes: &[u8], count: usize) -> Result<CoordArray> {
        let need = count * kind.size();
        if bytes.len() < need {
            return Err(IndexError::CorruptTree(format!(
                "table holds {} bytes, expected {}",
                bytes.len(),
                need
            )));
        }
        let bytes = &bytes[..need];
        Ok(match kind {
            CoordType::F64 => {
                let mut v = vec![0f64; count];
                NativeEndian::read_f64_into(bytes, &mut v);
                CoordArray::F64(v)
            }
            CoordType::F32 => {
                let mut v = vec![0f32; count];
                NativeEndian::read_f32_into(bytes, &mut v);
                CoordArray::F32(v)
            }
            CoordType::U32 => {
                let mut v = vec![0u32; count];
                NativeEndian::read_u32_into(bytes, &mut v);
                CoordArray::U32(v)
            }
            CoordType::U16 => {
                let mut v = vec![0u16; count];
                NativeEndian::read_u16_into(bytes, &mut v);
                CoordArray::U16(v)
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            CoordArray::F64(v) => v.len(),
            CoordArray::F32(v) => v.len(),
            CoordArray::U32(v) => v.len(),
            CoordArray::U16(v) => v.len(),
        }
    }

    /// Raw element widened to f64, without fixed-point decoding.
    pub(crate) fn raw(&self, i: usize) -> f64 {
        match self {
            CoordArray::F64(v) => v[i],
            CoordArray::F32(v) => v[i] as f64,
            CoordArray::U32(v) => v[i] as f64,
            CoordArray::U16(v) => v[i] as f64,
        }
    }
}

/// Decode-range table of a fixed-point tree: per-dimension minima and
/// maxima plus one shared scale.
#[derive(Debug, Clone)]
pub struct DecodeRange {
    pub min: Vec<f64>,
    pub max: Vec<f64>,
    pub scale: f64,
    pub invscale: f64,
}

impl DecodeRange {
    pub(crate) fn from_bytes(bytes: &[u8], ndim: usize) -> Result<DecodeRange> {
        let count = 2 * ndim + 1;
        let need = count * 8;
        if bytes.len() < need {
            return Err(IndexError::CorruptTree(format!(
                "decode-range table holds {} bytes, expected {}",
                bytes.len(),
                need
            )));
        }
        let mut v = vec![0f64; count];
        NativeEndian::read_f64_into(&bytes[..need], &mut v);
        let scale = v[2 * ndim];
        if scale <= 0.0 || !scale.is_finite() {
            return Err(IndexError::CorruptTree(format!(
                "decode-range scale {} is not positive",
                scale
            )));
        }
        Ok(DecodeRange {
            min: v[..ndim].to_vec(),
            max: v[ndim..2 * ndim].to_vec(),
            scale,
            invscale: 1.0 / scale,
        })
    }

    pub(crate) fn decode(&self, dim: usize, raw: f64) -> f64 {
        self.min[dim] + raw * self.invscale
    }
}

/// Raw element type of the point-data table. `FIXED` is a compile-time
/// constant per instantiation, so the decode branch in the search inner
/// loop is monomorphized away.
pub(crate) trait RawCoord: Copy {
    const FIXED: bool;
    fn widen(self) -> f64;
}

impl RawCoord for f64 {
    const FIXED: bool = false;
    fn widen(self) -> f64 {
        self
    }
}

impl RawCoord for f32 {
    const FIXED: bool = false;
    fn widen(self) -> f64 {
        self as f64
    }
}

impl RawCoord for u32 {
    const FIXED: bool = true;
    fn widen(self) -> f64 {
        self as f64
    }
}

impl RawCoord for u16 {
    const FIXED: bool = true;
    fn widen(self) -> f64 {
        self as f64
    }
}
