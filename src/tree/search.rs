//! Pruned ball-query traversal over a [`TreeIndex`].
//!
//! Two node-shape families are supported. Bounding-box trees prune on
//! the squared distance from the query center to each node's box, and
//! (outside small-radius mode) bulk-accept subtrees whose box lies
//! entirely inside the query ball. Split-plane trees carry the
//! per-dimension offsets to ancestor split planes down the recursion,
//! so the squared distance to a child's region is maintained
//! incrementally. Both families test leaf points exactly in external
//! coordinates, so results are identical across encodings of the same
//! data.

use super::codec::RawCoord;
use super::{NodeShape, TreeIndex};

/// Options for [`TreeIndex::range_search`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Also return the (decoded) coordinates of every match.
    pub return_points: bool,
    /// Skip the subtree-containment bound: for small query balls almost
    /// no subtree is fully contained, so testing for it is wasted work.
    /// Results are exact either way.
    pub small_radius: bool,
}

/// Matches of one range search. `indices` holds external ids (storage
/// slots mapped through the permutation table); `points` is a flat
/// `ndim`-strided coordinate array parallel to `indices`, present when
/// the search asked for points.
#[derive(Debug, Clone)]
pub struct SearchResults {
    pub indices: Vec<u32>,
    pub points: Option<Vec<f64>>,
}

impl SearchResults {
    pub(crate) fn empty(return_points: bool) -> SearchResults {
        SearchResults {
            indices: Vec::new(),
            points: return_points.then(Vec::new),
        }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

pub(crate) fn run<T: RawCoord>(
    tree: &TreeIndex,
    data: &[T],
    center: &[f64],
    radius2: f64,
    options: &SearchOptions,
) -> SearchResults {
    let (decode_min, invscale) = match &tree.range {
        // build() guarantees a range table whenever storage is fixed-point
        Some(r) => (r.min.as_slice(), r.invscale),
        None => (&[] as &[f64], 1.0),
    };
    let mut ctx = Ctx {
        tree,
        data,
        center,
        radius2,
        decode_min,
        invscale,
        small_radius: options.small_radius,
        return_points: options.return_points,
        indices: Vec::new(),
        points: Vec::new(),
    };

    match &tree.shape {
        NodeShape::BoundingBoxes { boxes } => ctx.visit_box(0, boxes),
        NodeShape::SplitPlanes { split, dim } => {
            let mut offsets = vec![0.0; tree.ndim];
            ctx.visit_split(0, split, dim, &mut offsets, 0.0);
        }
    }

    SearchResults {
        indices: ctx.indices,
        points: options.return_points.then_some(ctx.points),
    }
}

struct Ctx<'a, T: RawCoord> {
    tree: &'a TreeIndex,
    data: &'a [T],
    center: &'a [f64],
    radius2: f64,
    decode_min: &'a [f64],
    invscale: f64,
    small_radius: bool,
    return_points: bool,
    indices: Vec<u32>,
    points: Vec<f64>,
}

impl<T: RawCoord> Ctx<'_, T> {
    #[inline]
    fn coord(&self, slot: usize, d: usize) -> f64 {
        let raw = self.data[slot * self.tree.ndim + d].widen();
        if T::FIXED {
            self.decode_min[d] + raw * self.invscale
        } else {
            raw
        }
    }

    fn push(&mut self, slot: usize) {
        self.indices.push(self.tree.external_id(slot));
        if self.return_points {
            for d in 0..self.tree.ndim {
                self.points.push(self.coord(slot, d));
            }
        }
    }

    fn scan_leaf(&mut self, leaf: usize) {
        let (lo, hi) = self.tree.leaf_bounds(leaf);
        for slot in lo..hi {
            let mut d2 = 0.0;
            for d in 0..self.tree.ndim {
                let diff = self.coord(slot, d) - self.center[d];
                d2 += diff * diff;
                if d2 > self.radius2 {
                    break;
                }
            }
            if d2 <= self.radius2 {
                self.push(slot);
            }
        }
    }

    fn accept_subtree(&mut self, node: usize) {
        let (lo, hi) = self.tree.node_points(node);
        for slot in lo..hi {
            self.push(slot);
        }
    }

    fn visit_box(&mut self, node: usize, boxes: &[f64]) {
        let ndim = self.tree.ndim;
        let b = &boxes[node * 2 * ndim..(node + 1) * 2 * ndim];
        let (low, high) = b.split_at(ndim);

        let mut dmin = 0.0;
        for d in 0..ndim {
            let x = self.center[d];
            let gap = if x < low[d] {
                low[d] - x
            } else if x > high[d] {
                x - high[d]
            } else {
                0.0
            };
            dmin += gap * gap;
        }
        if dmin > self.radius2 {
            return;
        }

        if !self.small_radius {
            let mut dmax = 0.0;
            for d in 0..ndim {
                let far = (self.center[d] - low[d]).abs().max((self.center[d] - high[d]).abs());
                dmax += far * far;
            }
            if dmax <= self.radius2 {
                self.accept_subtree(node);
                return;
            }
        }

        if node >= self.tree.ninterior {
            self.scan_leaf(node - self.tree.ninterior);
        } else {
            self.visit_box(2 * node + 1, boxes);
            self.visit_box(2 * node + 2, boxes);
        }
    }

    fn visit_split(
        &mut self,
        node: usize,
        split: &[f64],
        dim: &[u8],
        offsets: &mut [f64],
        dist2: f64,
    ) {
        if node >= self.tree.ninterior {
            self.scan_leaf(node - self.tree.ninterior);
            return;
        }

        let d = dim[node] as usize;
        let delta = self.center[d] - split[node];
        // left subtree holds coordinates <= the split position
        let (near, far) = if delta < 0.0 {
            (2 * node + 1, 2 * node + 2)
        } else {
            (2 * node + 2, 2 * node + 1)
        };

        self.visit_split(near, split, dim, offsets, dist2);

        let old = offsets[d];
        let far_dist2 = dist2 - old * old + delta * delta;
        if far_dist2 <= self.radius2 {
            offsets[d] = delta;
            self.visit_split(far, split, dim, offsets, far_dist2);
            offsets[d] = old;
        }
    }
}
