//! Static kd-trees loaded from container tables.
//!
//! A tree is a complete binary tree over a permuted copy of the point
//! data: node 0 is the root, node `i` has children `2i+1` and `2i+2`,
//! and the last `nbottom` nodes are leaves. Leaves own contiguous slot
//! ranges of the data table, either from an explicit leaf-range table
//! or derived arithmetically. Interior nodes carry one of two shape
//! families, axis-aligned bounding boxes or split planes, and the
//! search prunes on whichever the file provides.
//!
//! Coordinates may be stored fixed-point; a decode-range table maps
//! raw integers back to external values. Node-shape tables are decoded
//! to `f64` once at load, so only the point data stays in its stored
//! encoding.

pub(crate) mod codec;
mod search;
#[cfg(test)]
pub(crate) mod testutil;

use byteorder::{ByteOrder, NativeEndian};
use tracing::debug;

use crate::container::header::Header;
use crate::container::{Chunk, Container, Endianness, TableDescriptor};
use crate::errors::{IndexError, Result};

pub use codec::{CoordArray, CoordType, DecodeRange, TreeKind};
pub use search::{SearchOptions, SearchResults};

/// Conventional name of the star-position tree.
pub const STAR_TREE_NAME: &str = "stars";
/// Conventional name of the quad-code tree.
pub const CODE_TREE_NAME: &str = "codes";

const TABLE_LR: &str = "kdtree_lr";
const TABLE_PERM: &str = "kdtree_perm";
const TABLE_BB: &str = "kdtree_bb";
const TABLE_SPLIT: &str = "kdtree_split";
const TABLE_SPLITDIM: &str = "kdtree_splitdim";
const TABLE_DATA: &str = "kdtree_data";
const TABLE_RANGE: &str = "kdtree_range";

/// Sub-table name for a tree: the bare prefix for unnamed trees,
/// `<prefix>_<tree>` otherwise.
fn chunk_name(prefix: &str, tree: Option<&str>) -> String {
    match tree {
        Some(t) => format!("{}_{}", prefix, t),
        None => prefix.to_string(),
    }
}

/// Interior-node shape tables, decoded to external coordinates.
#[derive(Debug, Clone)]
pub enum NodeShape {
    /// Per node: `ndim` minima then `ndim` maxima, all `nnodes` nodes.
    BoundingBoxes { boxes: Vec<f64> },
    /// Per interior node: split position and split dimension.
    SplitPlanes { split: Vec<f64>, dim: Vec<u8> },
}

/// One kd-tree read out of a container.
pub struct TreeIndex {
    name: Option<String>,
    kind: TreeKind,
    ndim: usize,
    ndata: usize,
    nnodes: usize,
    nbottom: usize,
    ninterior: usize,
    nlevels: usize,
    lr: Option<Vec<u32>>,
    perm: Option<Vec<u32>>,
    shape: NodeShape,
    data: CoordArray,
    range: Option<DecodeRange>,
    header: Header,
}

struct FoundTree {
    name: Option<String>,
    ndim: usize,
    ndata: usize,
    nnodes: usize,
    kind: TreeKind,
    header: Header,
}

/// Reads the tree metadata keywords out of one HDU header.
///
/// Returns `Ok(None)` when the header is not a tree header (or predates
/// the endianness tag), and an error when it is one but was written on
/// a host with different byte order.
fn qualify(desc: &TableDescriptor, legacy: bool) -> Result<Option<(usize, usize, usize, TreeKind)>> {
    let h = desc.header();
    let (k_ndim, k_ndata, k_nnodes) = if legacy {
        ("NDIM", "NDATA", "NNODES")
    } else {
        ("KDT_NDIM", "KDT_NDAT", "KDT_NNOD")
    };
    let (ndim, ndata, nnodes) = match (h.int(k_ndim), h.int(k_ndata), h.int(k_nnodes)) {
        (Some(a), Some(b), Some(c)) => (a, b, c),
        _ => return Ok(None),
    };
    if ndim <= 0 || ndata < 0 || nnodes <= 0 {
        return Ok(None);
    }
    match &desc.endian {
        Endianness::Native => {}
        Endianness::Foreign(tag) => {
            return Err(IndexError::EndianMismatch {
                file: tag.clone(),
                host: crate::container::host_endian_fingerprint(),
            })
        }
        Endianness::Unspecified => return Ok(None),
    }
    let kind = match TreeKind::resolve(h) {
        Some(k) => k,
        // the oldest files predate type tags and stored doubles throughout
        None if legacy && h.string("KDT_INT").is_none() && h.string("KDT_DATA").is_none() => {
            TreeKind {
                external: CoordType::F64,
                internal: CoordType::F64,
                storage: CoordType::F64,
            }
        }
        None => return Ok(None),
    };
    Ok(Some((ndim as usize, ndata as usize, nnodes as usize, kind)))
}

fn find_tree(container: &Container, want: Option<&str>) -> Result<FoundTree> {
    if let Some(name) = want {
        for desc in container.descriptors().iter().skip(1) {
            if desc.header().string("KDT_NAME").map(str::trim) != Some(name) {
                continue;
            }
            if let Some((ndim, ndata, nnodes, kind)) = qualify(desc, false)? {
                return Ok(FoundTree {
                    name: Some(name.to_string()),
                    ndim,
                    ndata,
                    nnodes,
                    kind,
                    header: desc.header().clone(),
                });
            }
        }
        return Err(IndexError::TreeNotFound {
            name: Some(name.to_string()),
        });
    }

    // unnamed: try the legacy primary-header layout first
    let primary = container.primary();
    if let Some((ndim, ndata, nnodes, kind)) = qualify(primary, true)? {
        return Ok(FoundTree {
            name: None,
            ndim,
            ndata,
            nnodes,
            kind,
            header: primary.header().clone(),
        });
    }
    for desc in container.descriptors().iter().skip(1) {
        if let Some((ndim, ndata, nnodes, kind)) = qualify(desc, false)? {
            let name = desc.header().string("KDT_NAME").map(|s| s.trim().to_string());
            return Ok(FoundTree {
                name,
                ndim,
                ndata,
                nnodes,
                kind,
                header: desc.header().clone(),
            });
        }
    }
    Err(IndexError::TreeNotFound { name: None })
}

fn optional(res: Result<Chunk>) -> Result<Option<Chunk>> {
    match res {
        Ok(chunk) => Ok(Some(chunk)),
        Err(IndexError::MissingTable(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

fn read_u32s(chunk: &Chunk, count: usize) -> Result<Vec<u32>> {
    let bytes = chunk.bytes();
    if bytes.len() < count * 4 {
        return Err(IndexError::CorruptTree(format!(
            "index table holds {} bytes, expected {}",
            bytes.len(),
            count * 4
        )));
    }
    let mut v = vec![0u32; count];
    NativeEndian::read_u32_into(&bytes[..count * 4], &mut v);
    Ok(v)
}

impl TreeIndex {
    /// Whether the container holds a tree with this name.
    pub fn contains(container: &Container, name: &str) -> bool {
        container
            .descriptors()
            .iter()
            .skip(1)
            .any(|d| d.header().string("KDT_NAME").map(str::trim) == Some(name))
    }

    /// Loads a tree from the container. `tree_name` of `None` takes the
    /// legacy unnamed tree if present, then the first named one.
    ///
    /// # Errors
    /// [`IndexError::TreeNotFound`] when no qualifying header exists,
    /// [`IndexError::EndianMismatch`] when one exists but was written on
    /// a foreign host, [`IndexError::MissingTable`] when the point-data
    /// table is absent, and [`IndexError::CorruptTree`] when the tables
    /// are inconsistent with the header counts.
    pub fn build(container: &mut Container, tree_name: Option<&str>) -> Result<TreeIndex> {
        let found = find_tree(container, tree_name)?;
        let FoundTree {
            name,
            ndim,
            ndata,
            nnodes,
            kind,
            header,
        } = found;

        let nbottom = (nnodes + 1) / 2;
        let ninterior = nnodes - nbottom;
        if nbottom + ninterior != nnodes || 2 * nbottom - 1 != nnodes {
            return Err(IndexError::CorruptTree(format!(
                "node count {} does not describe a complete tree",
                nnodes
            )));
        }
        let nlevels = (usize::BITS - nnodes.leading_zeros()) as usize;
        let suffix = name.as_deref();

        let lr_chunk = optional(container.read_chunk(&chunk_name(TABLE_LR, suffix), 4, nbottom, false))?;
        let perm_chunk =
            optional(container.read_chunk(&chunk_name(TABLE_PERM, suffix), 4, ndata, false))?;
        let bb_chunk = optional(container.read_chunk(
            &chunk_name(TABLE_BB, suffix),
            kind.internal.size() * ndim * 2,
            0,
            false,
        ))?;
        let split_chunk = optional(container.read_chunk(
            &chunk_name(TABLE_SPLIT, suffix),
            kind.internal.size(),
            0,
            false,
        ))?;
        let splitdim_chunk =
            optional(container.read_chunk(&chunk_name(TABLE_SPLITDIM, suffix), 1, 0, false))?;
        let data_chunk =
            container.read_chunk(&chunk_name(TABLE_DATA, suffix), kind.storage.size() * ndim, ndata, false)?;
        let range_chunk = optional(container.read_chunk(
            &chunk_name(TABLE_RANGE, suffix),
            8,
            2 * ndim + 1,
            true,
        ))?;

        let range = match range_chunk {
            Some(chunk) => Some(DecodeRange::from_bytes(chunk.bytes(), ndim)?),
            None => None,
        };
        if (kind.storage.is_fixed_point() || kind.internal.is_fixed_point()) && range.is_none() {
            return Err(IndexError::CorruptTree(
                "fixed-point tree has no decode-range table".to_string(),
            ));
        }

        let linear = header.logical("KDT_LINL").unwrap_or(false);
        let lr = match (&lr_chunk, linear) {
            (Some(chunk), false) => Some(read_u32s(chunk, nbottom)?),
            _ => None,
        };
        let perm = match &perm_chunk {
            Some(chunk) => Some(read_u32s(chunk, ndata)?),
            None => None,
        };

        let data = CoordArray::from_bytes(kind.storage, data_chunk.bytes(), ndata * ndim)?;
        let shape = resolve_shape(
            &bb_chunk,
            &split_chunk,
            &splitdim_chunk,
            &kind,
            range.as_ref(),
            ndim,
            nnodes,
            ninterior,
        )?;

        debug!(
            name = name.as_deref().unwrap_or("(unnamed)"),
            ndim,
            ndata,
            nnodes,
            nlevels,
            storage = kind.storage.code(),
            boxes = matches!(shape, NodeShape::BoundingBoxes { .. }),
            "loaded kd-tree"
        );

        Ok(TreeIndex {
            name,
            kind,
            ndim,
            ndata,
            nnodes,
            nbottom,
            ninterior,
            nlevels,
            lr,
            perm,
            shape,
            data,
            range,
            header,
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn ndata(&self) -> usize {
        self.ndata
    }

    pub fn nnodes(&self) -> usize {
        self.nnodes
    }

    pub fn nlevels(&self) -> usize {
        self.nlevels
    }

    pub fn kind(&self) -> &TreeKind {
        &self.kind
    }

    /// Header of the HDU the tree was described by.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Storage slot to external id, through the permutation table.
    pub fn external_id(&self, slot: usize) -> u32 {
        match &self.perm {
            Some(p) => p[slot],
            None => slot as u32,
        }
    }

    pub fn permutation(&self) -> Option<&[u32]> {
        self.perm.as_deref()
    }

    /// External-coordinate point at a storage slot.
    pub fn point(&self, slot: usize) -> Result<Vec<f64>> {
        if slot >= self.ndata {
            return Err(IndexError::OutOfRange {
                id: slot,
                count: self.ndata,
            });
        }
        let mut out = Vec::with_capacity(self.ndim);
        for d in 0..self.ndim {
            out.push(self.coord(slot, d));
        }
        Ok(out)
    }

    fn coord(&self, slot: usize, d: usize) -> f64 {
        let raw = self.data.raw(slot * self.ndim + d);
        match (&self.range, self.kind.storage.is_fixed_point()) {
            (Some(r), true) => r.decode(d, raw),
            _ => raw,
        }
    }

    /// Inverse of the permutation table, validated to be a bijection
    /// over `[0, ndata)`. Identity when the tree has no permutation.
    ///
    /// # Errors
    /// [`IndexError::Integrity`] when an entry is out of range or two
    /// slots map to the same external id.
    pub fn inverse_permutation(&self) -> Result<Vec<u32>> {
        let n = self.ndata;
        let perm = match &self.perm {
            Some(p) => p,
            None => return Ok((0..n as u32).collect()),
        };
        let mut inverse = vec![u32::MAX; n];
        for (slot, &id) in perm.iter().enumerate() {
            let id = id as usize;
            if id >= n {
                return Err(IndexError::Integrity(format!(
                    "slot {} maps to id {}, but there are {} points",
                    slot, id, n
                )));
            }
            if inverse[id] != u32::MAX {
                return Err(IndexError::Integrity(format!(
                    "id {} is mapped by slots {} and {}",
                    id, inverse[id], slot
                )));
            }
            inverse[id] = slot as u32;
        }
        Ok(inverse)
    }

    /// Storage-slot range `[lo, hi)` owned by a leaf (0-based among the
    /// `nbottom` leaves).
    fn leaf_bounds(&self, leaf: usize) -> (usize, usize) {
        match &self.lr {
            Some(lr) => {
                let lo = if leaf == 0 { 0 } else { lr[leaf - 1] as usize + 1 };
                (lo, lr[leaf] as usize + 1)
            }
            None => (
                leaf * self.ndata / self.nbottom,
                (leaf + 1) * self.ndata / self.nbottom,
            ),
        }
    }

    fn first_leaf(&self, mut node: usize) -> usize {
        while node < self.ninterior {
            node = 2 * node + 1;
        }
        node - self.ninterior
    }

    fn last_leaf(&self, mut node: usize) -> usize {
        while node < self.ninterior {
            node = 2 * node + 2;
        }
        node - self.ninterior
    }

    /// Storage-slot range `[lo, hi)` covered by a node's whole subtree.
    fn node_points(&self, node: usize) -> (usize, usize) {
        let (lo, _) = self.leaf_bounds(self.first_leaf(node));
        let (_, hi) = self.leaf_bounds(self.last_leaf(node));
        (lo, hi)
    }

    /// All points within squared distance `radius2` of `center`, in
    /// external coordinates.
    ///
    /// # Errors
    /// [`IndexError::DimensionMismatch`] when the center has the wrong
    /// dimensionality.
    pub fn range_search(
        &self,
        center: &[f64],
        radius2: f64,
        options: &SearchOptions,
    ) -> Result<SearchResults> {
        if center.len() != self.ndim {
            return Err(IndexError::DimensionMismatch {
                expected: self.ndim,
                actual: center.len(),
            });
        }
        if self.ndata == 0 {
            return Ok(SearchResults::empty(options.return_points));
        }
        Ok(match &self.data {
            CoordArray::F64(v) => search::run(self, v, center, radius2, options),
            CoordArray::F32(v) => search::run(self, v, center, radius2, options),
            CoordArray::U32(v) => search::run(self, v, center, radius2, options),
            CoordArray::U16(v) => search::run(self, v, center, radius2, options),
        })
    }
}

/// Number of low bits of a packed split value that hold the dimension.
fn packed_dim_bits(ndim: usize) -> u32 {
    if ndim <= 1 {
        0
    } else {
        usize::BITS - (ndim - 1).leading_zeros()
    }
}

#[allow(clippy::too_many_arguments)]
fn resolve_shape(
    bb: &Option<Chunk>,
    split: &Option<Chunk>,
    splitdim: &Option<Chunk>,
    kind: &TreeKind,
    range: Option<&DecodeRange>,
    ndim: usize,
    nnodes: usize,
    ninterior: usize,
) -> Result<NodeShape> {
    if let Some(chunk) = bb {
        // some writers emit one extra row; anything short is corrupt
        if chunk.rows() < nnodes {
            return Err(IndexError::CorruptTree(format!(
                "bounding-box table has {} rows, tree has {} nodes",
                chunk.rows(),
                nnodes
            )));
        }
        let raw = CoordArray::from_bytes(kind.internal, chunk.bytes(), nnodes * 2 * ndim)?;
        let mut boxes = Vec::with_capacity(nnodes * 2 * ndim);
        for i in 0..nnodes * 2 * ndim {
            let v = raw.raw(i);
            boxes.push(match (range, kind.internal.is_fixed_point()) {
                (Some(r), true) => r.decode(i % ndim, v),
                _ => v,
            });
        }
        return Ok(NodeShape::BoundingBoxes { boxes });
    }

    let split = match split {
        Some(chunk) => chunk,
        None => {
            return Err(IndexError::CorruptTree(
                "tree has neither bounding boxes nor split planes".to_string(),
            ))
        }
    };

    if let Some(dims) = splitdim {
        let bytes = dims.bytes();
        if bytes.len() < ninterior {
            return Err(IndexError::CorruptTree(format!(
                "split-dimension table has {} entries, tree has {} interior nodes",
                bytes.len(),
                ninterior
            )));
        }
        let dim: Vec<u8> = bytes[..ninterior].to_vec();
        if let Some(&bad) = dim.iter().find(|&&d| d as usize >= ndim) {
            return Err(IndexError::CorruptTree(format!(
                "split dimension {} out of range for {} dimensions",
                bad, ndim
            )));
        }
        let raw = CoordArray::from_bytes(kind.internal, split.bytes(), ninterior)?;
        let mut values = Vec::with_capacity(ninterior);
        for (i, &d) in dim.iter().enumerate() {
            let v = raw.raw(i);
            values.push(match (range, kind.internal.is_fixed_point()) {
                (Some(r), true) => r.decode(d as usize, v),
                _ => v,
            });
        }
        return Ok(NodeShape::SplitPlanes { split: values, dim });
    }

    // without a dimension table the split values must pack the
    // dimension into their low bits, which only integer encodings do
    let range = match (range, kind.internal.is_fixed_point()) {
        (Some(r), true) => r,
        _ => {
            return Err(IndexError::CorruptTree(
                "split planes without a dimension table require a fixed-point encoding".to_string(),
            ))
        }
    };
    let dimbits = packed_dim_bits(ndim);
    let dimmask: u64 = (1u64 << dimbits) - 1;
    let bytes = split.bytes();
    if bytes.len() < ninterior * kind.internal.size() {
        return Err(IndexError::CorruptTree(format!(
            "split table holds {} bytes, expected {}",
            bytes.len(),
            ninterior * kind.internal.size()
        )));
    }
    let mut values = Vec::with_capacity(ninterior);
    let mut dim = Vec::with_capacity(ninterior);
    for i in 0..ninterior {
        let packed: u64 = match kind.internal {
            CoordType::U32 => {
                let mut v = [0u32; 1];
                NativeEndian::read_u32_into(&bytes[i * 4..i * 4 + 4], &mut v);
                v[0] as u64
            }
            CoordType::U16 => {
                let mut v = [0u16; 1];
                NativeEndian::read_u16_into(&bytes[i * 2..i * 2 + 2], &mut v);
                v[0] as u64
            }
            _ => unreachable!("fixed-point internal encoding"),
        };
        let d = (packed & dimmask) as usize;
        if d >= ndim {
            return Err(IndexError::CorruptTree(format!(
                "packed split dimension {} out of range for {} dimensions",
                d, ndim
            )));
        }
        // the low bits are cleared, not shifted out, before decoding
        let quantized = (packed & !dimmask) as f64;
        values.push(range.decode(d, quantized));
        dim.push(d as u8);
    }
    Ok(NodeShape::SplitPlanes { split: values, dim })
}
