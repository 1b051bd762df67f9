//! Read-only access to astrometric index container files.
//!
//! A container is a primary header followed by binary-table extensions.
//! [`Container::open`] enumerates every HDU up front (name, row count,
//! data byte range, endianness tag) and eagerly parses the domain
//! keywords (quad parameters, star-cut parameters, code-layout flags).
//! Table payloads are only touched by [`Container::read_chunk`], which
//! returns a zero-copy view backed by a page-aligned memory mapping.
//!
//! The descriptor list is immutable after open. The file handle is held
//! for reuse across chunk reads unless a read requests `close_after`, in
//! which case the next read lazily reopens the file. Each returned
//! [`Chunk`] owns its mapping, so error paths release every mapping they
//! established.

pub mod header;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Instant;

use memmap2::{Mmap, MmapOptions};
use tracing::debug;

use crate::errors::{IndexError, Result};
use header::{Header, BLOCK_SIZE};

/// Value whose in-memory byte order fingerprints the writing host.
const ENDIAN_DETECTOR: u32 = 0x0102_0304;

/// Mapping offsets are aligned down to this granularity; a multiple of
/// the page size on every supported platform.
const MAP_ALIGN: u64 = 1 << 16;

/// The four colon-separated hex bytes of [`ENDIAN_DETECTOR`] in host
/// memory order, as written to the `ENDIAN` keyword.
pub fn host_endian_fingerprint() -> String {
    let b = ENDIAN_DETECTOR.to_ne_bytes();
    format!("{:02x}:{:02x}:{:02x}:{:02x}", b[0], b[1], b[2], b[3])
}

/// Endianness tag of one HDU, from its `ENDIAN` keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endianness {
    /// Keyword present and equal to the host fingerprint.
    Native,
    /// Keyword present but written by a host with different byte order.
    Foreign(String),
    /// Keyword absent.
    Unspecified,
}

impl Endianness {
    pub fn matches_host(&self) -> bool {
        matches!(self, Endianness::Native)
    }
}

/// Descriptor of one HDU, recorded at open time.
#[derive(Debug)]
pub struct TableDescriptor {
    /// Position in the file, 0 = primary.
    pub extension: usize,
    /// First-column identifier (`TTYPE1`), binary tables only.
    pub name: Option<String>,
    /// Row count (`NAXIS2`).
    pub rows: usize,
    /// Byte offset of the start of the data unit.
    pub data_start: u64,
    /// Byte offset just past the data unit (heap included).
    pub data_end: u64,
    pub endian: Endianness,
    pub is_table: bool,
    header: Header,
}

impl TableDescriptor {
    pub fn header(&self) -> &Header {
        &self.header
    }
}

/// Owned view of one table's payload bytes.
///
/// Holds its own memory mapping; the view stays valid after the
/// container's file handle is released or the container is closed.
pub struct Chunk {
    map: Mmap,
    offset: usize,
    len: usize,
    rows: usize,
}

impl Chunk {
    pub fn bytes(&self) -> &[u8] {
        &self.map[self.offset..self.offset + self.len]
    }

    pub fn rows(&self) -> usize {
        self.rows
    }
}

/// Quad-table parameters from the primary header.
#[derive(Debug, Clone, Default)]
pub struct QuadParams {
    pub dimquads: usize,
    pub numquads: Option<usize>,
    pub numstars: Option<usize>,
    /// Scale bounds in radians, as stored.
    pub scale_upper: Option<f64>,
    pub scale_lower: Option<f64>,
    pub index_id: i32,
    pub healpix: i32,
    pub hp_nside: i32,
}

impl QuadParams {
    fn parse(h: &Header) -> QuadParams {
        QuadParams {
            dimquads: h.int("DIMQUADS").unwrap_or(4).max(0) as usize,
            numquads: h.int("NQUADS").map(|v| v.max(0) as usize),
            numstars: h.int("NSTARS").map(|v| v.max(0) as usize),
            scale_upper: h.float("SCALE_U"),
            scale_lower: h.float("SCALE_L"),
            index_id: h.int("INDEXID").unwrap_or(0) as i32,
            healpix: h.int("HEALPIX").unwrap_or(-1) as i32,
            hp_nside: h.int("HPNSIDE").unwrap_or(1) as i32,
        }
    }
}

/// Photometric band a star catalog was cut on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CutBand {
    R,
    B,
    J,
}

impl CutBand {
    fn parse(s: &str) -> Option<CutBand> {
        match s {
            "R" => Some(CutBand::R),
            "B" => Some(CutBand::B),
            "J" => Some(CutBand::J),
            _ => None,
        }
    }
}

/// Star-catalog cut parameters; `None` means the backing header predates
/// the field.
#[derive(Debug, Clone, Default)]
pub struct StarCutParams {
    pub nside: Option<i32>,
    pub nsweeps: Option<i32>,
    pub dedup_radius: Option<f64>,
    pub band: Option<CutBand>,
    pub margin: Option<i32>,
    pub jitter: Option<f64>,
}

impl StarCutParams {
    fn parse(h: &Header) -> StarCutParams {
        StarCutParams {
            nside: h.int("CUTNSIDE").map(|v| v as i32),
            nsweeps: h.int("CUTNSWEP").map(|v| v as i32),
            dedup_radius: h.float("CUTDEDUP"),
            band: h.string("CUTBAND").and_then(CutBand::parse),
            margin: h.int("CUTMARG").map(|v| v as i32),
            jitter: h.float("JITTER"),
        }
    }
}

/// Code-layout flags, stored but not interpreted by this layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeLayout {
    pub circle: bool,
    pub cx_less_than_dx: bool,
    pub mean_x_less_than_half: bool,
}

impl CodeLayout {
    fn parse(h: &Header) -> CodeLayout {
        CodeLayout {
            circle: h.logical("CIRCLE").unwrap_or(false),
            cx_less_than_dx: h.logical("CXDX").unwrap_or(false),
            mean_x_less_than_half: h.logical("CXDXLT1").unwrap_or(false),
        }
    }
}

/// An open index container file.
pub struct Container {
    path: PathBuf,
    file: Option<File>,
    descriptors: Vec<TableDescriptor>,
    quads: QuadParams,
    star_cut: StarCutParams,
    code_layout: CodeLayout,
}

impl Container {
    /// Opens a container and enumerates every table in it.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or any header is
    /// malformed or truncated.
    pub fn open(path: impl AsRef<Path>) -> Result<Container> {
        let t0 = Instant::now();
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_len = file.metadata()?.len();
        if file_len == 0 {
            return Err(IndexError::InvalidFormat("file is empty".to_string()));
        }

        let host = host_endian_fingerprint();
        let mut descriptors = Vec::new();
        let mut offset = 0u64;
        let mut block = [0u8; BLOCK_SIZE];

        file.seek(SeekFrom::Start(0))?;
        while offset < file_len {
            let mut hdr = Header::new();
            loop {
                if offset + BLOCK_SIZE as u64 > file_len {
                    return Err(IndexError::InvalidFormat(format!(
                        "truncated header at byte {}",
                        offset
                    )));
                }
                file.read_exact(&mut block)?;
                offset += BLOCK_SIZE as u64;
                if hdr.parse_block(&block)? {
                    break;
                }
            }

            let data_start = offset;
            let data_bytes = data_unit_bytes(&hdr);
            let data_end = data_start + data_bytes;
            if data_end > file_len {
                return Err(IndexError::InvalidFormat(format!(
                    "data unit at byte {} extends past end of file",
                    data_start
                )));
            }
            let padded = data_bytes.div_ceil(BLOCK_SIZE as u64) * BLOCK_SIZE as u64;
            offset = data_start + padded;
            file.seek(SeekFrom::Start(offset.min(file_len)))?;

            let is_table = hdr
                .string("XTENSION")
                .map(|x| x.trim() == "BINTABLE")
                .unwrap_or(false);
            let name = if is_table {
                hdr.string("TTYPE1").map(str::to_string)
            } else {
                None
            };
            let rows = hdr.int("NAXIS2").unwrap_or(0).max(0) as usize;
            let endian = match hdr.string("ENDIAN") {
                None => Endianness::Unspecified,
                Some(s) if s == host => Endianness::Native,
                Some(s) => Endianness::Foreign(s.to_string()),
            };

            descriptors.push(TableDescriptor {
                extension: descriptors.len(),
                name,
                rows,
                data_start,
                data_end,
                endian,
                is_table,
                header: hdr,
            });
        }

        if descriptors.is_empty() {
            return Err(IndexError::InvalidFormat("no tables found".to_string()));
        }

        let quads = QuadParams::parse(descriptors[0].header());
        let star_cut = StarCutParams::parse(tree_param_header(&descriptors, "stars"));
        let code_layout = CodeLayout::parse(tree_param_header(&descriptors, "codes"));

        debug!(
            path = %path.display(),
            tables = descriptors.len(),
            elapsed_us = t0.elapsed().as_micros() as u64,
            "opened index container"
        );

        Ok(Container {
            path,
            file: Some(file),
            descriptors,
            quads,
            star_cut,
            code_layout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptors(&self) -> &[TableDescriptor] {
        &self.descriptors
    }

    /// Descriptor 0.
    pub fn primary(&self) -> &TableDescriptor {
        &self.descriptors[0]
    }

    /// First binary table whose name matches exactly.
    pub fn find_table(&self, name: &str) -> Option<&TableDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.is_table && d.name.as_deref() == Some(name))
    }

    pub fn contains_table(&self, name: &str) -> bool {
        self.find_table(name).is_some()
    }

    pub fn quad_params(&self) -> &QuadParams {
        &self.quads
    }

    pub fn star_cut(&self) -> &StarCutParams {
        &self.star_cut
    }

    pub fn code_layout(&self) -> &CodeLayout {
        &self.code_layout
    }

    /// Whether the container currently holds an open file handle.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Maps and returns the payload of the named table.
    ///
    /// `rows_hint == 0` uses the row count recorded at open time. With
    /// `close_after`, the file handle is released once the mapping is
    /// established; the next read reopens the file.
    ///
    /// # Errors
    /// [`IndexError::MissingTable`] if no binary table matches the name;
    /// [`IndexError::InvalidFormat`] if the requested rows do not fit in
    /// the table's recorded byte range.
    pub fn read_chunk(
        &mut self,
        table: &str,
        item_size: usize,
        rows_hint: usize,
        close_after: bool,
    ) -> Result<Chunk> {
        let (data_start, avail, rows) = {
            let desc = self
                .find_table(table)
                .ok_or_else(|| IndexError::MissingTable(table.to_string()))?;
            let rows = if rows_hint == 0 { desc.rows } else { rows_hint };
            (desc.data_start, (desc.data_end - desc.data_start) as usize, rows)
        };

        let len = item_size.checked_mul(rows).ok_or_else(|| {
            IndexError::InvalidFormat(format!("table {} size overflows", table))
        })?;
        if len > avail {
            return Err(IndexError::InvalidFormat(format!(
                "table {} holds {} bytes, {} requested",
                table, avail, len
            )));
        }

        if self.file.is_none() {
            self.file = Some(File::open(&self.path)?);
        }
        let file = self.file.as_ref().ok_or_else(|| {
            IndexError::InvalidFormat("container is closed".to_string())
        })?;

        let aligned = data_start & !(MAP_ALIGN - 1);
        let delta = (data_start - aligned) as usize;
        let map = unsafe {
            MmapOptions::new()
                .offset(aligned)
                .len(delta + len)
                .map(file)?
        };

        if close_after {
            self.file = None;
        }

        Ok(Chunk {
            map,
            offset: delta,
            len,
            rows,
        })
    }

    /// Releases the file handle. Safe to call more than once.
    pub fn close(&mut self) {
        self.file = None;
    }
}

/// Header the star-cut / code-layout keywords are read from: the HDU of
/// the named tree when present, the primary header otherwise
/// (accommodates older single-table layouts).
fn tree_param_header<'a>(descs: &'a [TableDescriptor], tree: &str) -> &'a Header {
    descs
        .iter()
        .skip(1)
        .find(|d| d.header().string("KDT_NAME") == Some(tree))
        .map(|d| d.header())
        .unwrap_or_else(|| descs[0].header())
}

fn data_unit_bytes(h: &Header) -> u64 {
    let naxis = h.int("NAXIS").unwrap_or(0);
    if naxis <= 0 {
        return 0;
    }
    let bitpix = h.int("BITPIX").unwrap_or(8).unsigned_abs() / 8;
    let gcount = h.int("GCOUNT").unwrap_or(1).max(1) as u64;
    let pcount = h.int("PCOUNT").unwrap_or(0).max(0) as u64;
    let mut prod = 1u64;
    for axis in 1..=naxis {
        prod = prod.saturating_mul(h.int(&format!("NAXIS{}", axis)).unwrap_or(0).max(0) as u64);
    }
    bitpix.saturating_mul(gcount.saturating_mul(pcount + prod))
}
