//! Star catalog: a 3-d kd-tree over unit-sphere star positions.
//!
//! Positions are unit XYZ vectors, so a cone search on the sky is a
//! Euclidean range search with the radius converted to a squared chord
//! length. Star ids are external ids; the tree stores a permuted copy
//! of the positions, and id-based lookups go through the (validated)
//! inverse permutation, computed once on first use.

use std::cell::OnceCell;

use tracing::debug;

use crate::container::{Container, StarCutParams};
use crate::errors::{IndexError, Result};
use crate::sphere;
use crate::tree::{SearchOptions, TreeIndex, STAR_TREE_NAME};

const SWEEP_TABLE: &str = "sweep";

/// Matches of one cone search, indexed in parallel.
#[derive(Debug, Clone)]
pub struct StarSearchResults {
    pub star_ids: Vec<u32>,
    pub xyz: Option<Vec<[f64; 3]>>,
    pub radec: Option<Vec<(f64, f64)>>,
}

impl StarSearchResults {
    pub fn len(&self) -> usize {
        self.star_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.star_ids.is_empty()
    }
}

/// An open star catalog.
pub struct StarCatalog {
    tree: TreeIndex,
    cut: StarCutParams,
    sweep: Option<Vec<u8>>,
    inverse: OnceCell<Vec<u32>>,
}

impl StarCatalog {
    /// Loads the star tree from a container, preferring the tree named
    /// `stars` and falling back to the unnamed tree.
    ///
    /// # Errors
    /// Propagates tree-loading errors; additionally
    /// [`IndexError::DimensionMismatch`] when the tree is not 3-d.
    pub fn open(container: &mut Container) -> Result<StarCatalog> {
        let name = TreeIndex::contains(container, STAR_TREE_NAME).then_some(STAR_TREE_NAME);
        let tree = TreeIndex::build(container, name)?;
        if tree.ndim() != 3 {
            return Err(IndexError::DimensionMismatch {
                expected: 3,
                actual: tree.ndim(),
            });
        }
        let sweep = match container.read_chunk(SWEEP_TABLE, 1, tree.ndata(), false) {
            Ok(chunk) => Some(chunk.bytes().to_vec()),
            Err(IndexError::MissingTable(_)) => None,
            Err(e) => return Err(e),
        };
        let cut = container.star_cut().clone();
        debug!(
            stars = tree.ndata(),
            sweep = sweep.is_some(),
            "opened star catalog"
        );
        Ok(StarCatalog {
            tree,
            cut,
            sweep,
            inverse: OnceCell::new(),
        })
    }

    pub fn num_stars(&self) -> usize {
        self.tree.ndata()
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    pub fn cut(&self) -> &StarCutParams {
        &self.cut
    }

    /// Sweep number of a star, when the catalog carries a sweep table.
    pub fn sweep(&self, star_id: usize) -> Option<u8> {
        self.sweep.as_ref()?.get(star_id).copied()
    }

    /// Stars within `radius2` (squared chord length) of a unit vector.
    pub fn search_radius(
        &self,
        center: &[f64; 3],
        radius2: f64,
        want_xyz: bool,
        want_radec: bool,
    ) -> Result<StarSearchResults> {
        let options = SearchOptions {
            return_points: want_xyz || want_radec,
            small_radius: true,
        };
        let found = self.tree.range_search(center, radius2, &options)?;

        let mut xyz = want_xyz.then(|| Vec::with_capacity(found.len()));
        let mut radec = want_radec.then(|| Vec::with_capacity(found.len()));
        if let Some(points) = &found.points {
            for p in points.chunks_exact(3) {
                let v = [p[0], p[1], p[2]];
                if let Some(out) = xyz.as_mut() {
                    out.push(v);
                }
                if let Some(out) = radec.as_mut() {
                    out.push(sphere::xyz_to_radec_deg(&v));
                }
            }
        }
        Ok(StarSearchResults {
            star_ids: found.indices,
            xyz,
            radec,
        })
    }

    /// Stars within `radius_deg` degrees of an RA/Dec position.
    pub fn search_radius_deg(
        &self,
        ra_deg: f64,
        dec_deg: f64,
        radius_deg: f64,
        want_xyz: bool,
        want_radec: bool,
    ) -> Result<StarSearchResults> {
        let center = sphere::radec_deg_to_xyz(ra_deg, dec_deg);
        self.search_radius(&center, sphere::deg_to_dist2(radius_deg), want_xyz, want_radec)
    }

    /// Unit-vector position of a star by external id.
    ///
    /// # Errors
    /// [`IndexError::OutOfRange`] for an id past the catalog, and
    /// [`IndexError::Integrity`] when the permutation table is corrupt.
    pub fn position(&self, star_id: usize) -> Result<[f64; 3]> {
        if star_id >= self.tree.ndata() {
            return Err(IndexError::OutOfRange {
                id: star_id,
                count: self.tree.ndata(),
            });
        }
        let slot = match self.tree.permutation() {
            Some(_) => self.inverse()?[star_id] as usize,
            None => star_id,
        };
        let p = self.tree.point(slot)?;
        Ok([p[0], p[1], p[2]])
    }

    /// RA/Dec in degrees of a star by external id.
    pub fn radec(&self, star_id: usize) -> Result<(f64, f64)> {
        Ok(sphere::xyz_to_radec_deg(&self.position(star_id)?))
    }

    fn inverse(&self) -> Result<&[u32]> {
        if let Some(v) = self.inverse.get() {
            return Ok(v);
        }
        let v = self.tree.inverse_permutation()?;
        Ok(self.inverse.get_or_init(|| v))
    }
}
