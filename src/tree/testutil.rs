//! In-memory tree construction for tests.
//!
//! Builds full trees by recursive median partition, producing the same
//! structures a file load would: permuted point data, a leaf-range
//! table, and either bounding boxes or split planes.

use super::codec::{CoordArray, CoordType, DecodeRange, TreeKind};
use super::{NodeShape, TreeIndex};
use crate::container::header::Header;

#[derive(Debug, Clone, Copy)]
pub(crate) enum ShapeFamily {
    Boxes,
    Splits,
}

struct Builder {
    ndim: usize,
    ninterior: usize,
    lr: Vec<u32>,
    split: Vec<f64>,
    dims: Vec<u8>,
    boxes: Vec<f64>,
}

impl Builder {
    fn partition(&mut self, items: &mut [(u32, Vec<f64>)], base: usize, node: usize, depth: usize) {
        let ndim = self.ndim;
        for d in 0..ndim {
            let mut lo = f64::INFINITY;
            let mut hi = f64::NEG_INFINITY;
            for (_, p) in items.iter() {
                lo = lo.min(p[d]);
                hi = hi.max(p[d]);
            }
            self.boxes[node * 2 * ndim + d] = lo;
            self.boxes[node * 2 * ndim + ndim + d] = hi;
        }
        if node >= self.ninterior {
            self.lr[node - self.ninterior] = (base + items.len() - 1) as u32;
            return;
        }
        let d = depth % ndim;
        items.sort_unstable_by(|a, b| a.1[d].partial_cmp(&b.1[d]).unwrap());
        let mid = items.len() / 2;
        self.split[node] = 0.5 * (items[mid - 1].1[d] + items[mid].1[d]);
        self.dims[node] = d as u8;
        let (left, right) = items.split_at_mut(mid);
        self.partition(left, base, 2 * node + 1, depth + 1);
        self.partition(right, base + mid, 2 * node + 2, depth + 1);
    }
}

fn assemble(
    points: &[Vec<f64>],
    ndim: usize,
    nlevels: usize,
) -> (Builder, Vec<(u32, Vec<f64>)>, usize, usize, usize) {
    let nnodes = (1usize << nlevels) - 1;
    let nbottom = 1usize << (nlevels - 1);
    let ninterior = nnodes - nbottom;
    assert!(points.len() >= nbottom, "need at least one point per leaf");

    let mut items: Vec<(u32, Vec<f64>)> = points
        .iter()
        .enumerate()
        .map(|(i, p)| (i as u32, p.clone()))
        .collect();
    let mut builder = Builder {
        ndim,
        ninterior,
        lr: vec![0; nbottom],
        split: vec![0.0; ninterior],
        dims: vec![0; ninterior],
        boxes: vec![0.0; nnodes * 2 * ndim],
    };
    builder.partition(&mut items, 0, 0, 0);
    (builder, items, nnodes, nbottom, ninterior)
}

pub(crate) fn build_tree(
    points: &[Vec<f64>],
    ndim: usize,
    nlevels: usize,
    family: ShapeFamily,
) -> TreeIndex {
    let (builder, items, nnodes, nbottom, ninterior) = assemble(points, ndim, nlevels);
    let perm: Vec<u32> = items.iter().map(|(i, _)| *i).collect();
    let data: Vec<f64> = items.iter().flat_map(|(_, p)| p.iter().copied()).collect();
    let shape = match family {
        ShapeFamily::Boxes => NodeShape::BoundingBoxes {
            boxes: builder.boxes,
        },
        ShapeFamily::Splits => NodeShape::SplitPlanes {
            split: builder.split,
            dim: builder.dims,
        },
    };
    TreeIndex {
        name: None,
        kind: TreeKind {
            external: CoordType::F64,
            internal: CoordType::F64,
            storage: CoordType::F64,
        },
        ndim,
        ndata: points.len(),
        nnodes,
        nbottom,
        ninterior,
        nlevels,
        lr: Some(builder.lr),
        perm: Some(perm),
        shape,
        data: CoordArray::F64(data),
        range: None,
        header: Header::new(),
    }
}

/// Builds a bounding-box tree whose point data is quantized to `u32`
/// fixed point. Returns the tree and the decoded coordinates, indexed
/// by external id, for cross-checking.
pub(crate) fn build_fixed_tree(
    points: &[Vec<f64>],
    ndim: usize,
    nlevels: usize,
) -> (TreeIndex, Vec<Vec<f64>>) {
    let scale = 1.0e6;
    let mut min = vec![f64::INFINITY; ndim];
    let mut max = vec![f64::NEG_INFINITY; ndim];
    for p in points {
        for d in 0..ndim {
            min[d] = min[d].min(p[d]);
            max[d] = max[d].max(p[d]);
        }
    }
    let range = DecodeRange {
        min: min.clone(),
        max,
        scale,
        invscale: 1.0 / scale,
    };

    let decoded: Vec<Vec<f64>> = points
        .iter()
        .map(|p| {
            (0..ndim)
                .map(|d| {
                    let raw = ((p[d] - min[d]) * scale).round();
                    range.decode(d, raw)
                })
                .collect()
        })
        .collect();

    let (builder, items, nnodes, nbottom, ninterior) = assemble(&decoded, ndim, nlevels);
    let perm: Vec<u32> = items.iter().map(|(i, _)| *i).collect();
    let raws: Vec<u32> = items
        .iter()
        .flat_map(|(_, p)| {
            p.iter()
                .enumerate()
                .map(|(d, v)| ((v - min[d]) * scale).round() as u32)
                .collect::<Vec<u32>>()
        })
        .collect();

    let tree = TreeIndex {
        name: None,
        kind: TreeKind {
            external: CoordType::F64,
            internal: CoordType::F64,
            storage: CoordType::U32,
        },
        ndim,
        ndata: points.len(),
        nnodes,
        nbottom,
        ninterior,
        nlevels,
        lr: Some(builder.lr),
        perm: Some(perm),
        shape: NodeShape::BoundingBoxes {
            boxes: builder.boxes,
        },
        data: CoordArray::U32(raws),
        range: Some(range),
        header: Header::new(),
    };
    (tree, decoded)
}
