//! Quad-code catalog: a kd-tree over geometric hash codes.
//!
//! Codes live in a `2(dimquads - 2)`-dimensional unit space; the layout
//! flags record which normalization conventions the writer applied, and
//! are passed through for the matcher to interpret.

use std::cell::OnceCell;

use tracing::debug;

use crate::container::{CodeLayout, Container};
use crate::errors::{IndexError, Result};
use crate::tree::{SearchOptions, SearchResults, TreeIndex, CODE_TREE_NAME};

/// An open code catalog.
pub struct CodeCatalog {
    tree: TreeIndex,
    layout: CodeLayout,
    inverse: OnceCell<Vec<u32>>,
}

impl CodeCatalog {
    /// Loads the code tree from a container, preferring the tree named
    /// `codes` and falling back to the unnamed tree.
    pub fn open(container: &mut Container) -> Result<CodeCatalog> {
        let name = TreeIndex::contains(container, CODE_TREE_NAME).then_some(CODE_TREE_NAME);
        let tree = TreeIndex::build(container, name)?;
        let layout = *container.code_layout();
        debug!(codes = tree.ndata(), dim = tree.ndim(), "opened code catalog");
        Ok(CodeCatalog {
            tree,
            layout,
            inverse: OnceCell::new(),
        })
    }

    pub fn num_codes(&self) -> usize {
        self.tree.ndata()
    }

    /// Dimensionality of the code space.
    pub fn dim_codes(&self) -> usize {
        self.tree.ndim()
    }

    pub fn layout(&self) -> &CodeLayout {
        &self.layout
    }

    pub fn tree(&self) -> &TreeIndex {
        &self.tree
    }

    /// Codes within `radius2` (squared Euclidean distance) of a query
    /// code. Matches are external code ids, which equal quad ids.
    pub fn search_radius(
        &self,
        center: &[f64],
        radius2: f64,
        want_codes: bool,
    ) -> Result<SearchResults> {
        let options = SearchOptions {
            return_points: want_codes,
            small_radius: true,
        };
        self.tree.range_search(center, radius2, &options)
    }

    /// One code by external id.
    ///
    /// # Errors
    /// [`IndexError::OutOfRange`] for an id past the catalog, and
    /// [`IndexError::Integrity`] when the permutation table is corrupt.
    pub fn code(&self, code_id: usize) -> Result<Vec<f64>> {
        if code_id >= self.tree.ndata() {
            return Err(IndexError::OutOfRange {
                id: code_id,
                count: self.tree.ndata(),
            });
        }
        let slot = match self.tree.permutation() {
            Some(_) => self.inverse()?[code_id] as usize,
            None => code_id,
        };
        self.tree.point(slot)
    }

    fn inverse(&self) -> Result<&[u32]> {
        if let Some(v) = self.inverse.get() {
            return Ok(v);
        }
        let v = self.tree.inverse_permutation()?;
        Ok(self.inverse.get_or_init(|| v))
    }
}
