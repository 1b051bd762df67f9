//! Memory-mapped spatial index files for astrometric plate solving.
//!
//! An index container is a FITS-like binary file holding one or more
//! static kd-trees plus their domain tables: star positions on the unit
//! sphere, geometric hash codes, and the quad table tying them together.
//! The container is enumerated once on open; table payloads are read
//! through page-aligned memory mappings, never copied into RAM as a
//! whole.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`container`] | [`Container`] file reader, HDU enumeration, [`Chunk`] table views |
//! | [`tree`] | [`TreeIndex`] kd-tree loading and pruned range search |
//! | [`stars`] | [`StarCatalog`] cone search over unit-sphere positions |
//! | [`codes`] | [`CodeCatalog`] range search over hash codes |
//! | [`quads`] | [`QuadTable`] star-id groups and scale bounds |
//! | [`sphere`] | RA/Dec, unit-vector, and chord-length conversions |
//!
//! # Quick Start
//!
//! ```ignore
//! use astro_index::{Container, StarCatalog};
//!
//! let mut container = Container::open("index-4107.fits")?;
//! let stars = StarCatalog::open(&mut container)?;
//!
//! let hits = stars.search_radius_deg(83.633, -5.375, 0.5, false, true)?;
//! for (id, (ra, dec)) in hits.star_ids.iter().zip(hits.radec.as_ref().unwrap()) {
//!     println!("star {} at ({:.4}, {:.4})", id, ra, dec);
//! }
//! ```
//!
//! # File Layout
//!
//! Each kd-tree is a family of binary tables named `kdtree_<part>` or
//! `kdtree_<part>_<treename>`: header, leaf ranges, permutation, node
//! shapes (bounding boxes or split planes), point data, and an optional
//! fixed-point decode range. Every table records the byte order of the
//! writing host; reading a foreign-order file is refused rather than
//! byte-swapped.

pub mod codes;
pub mod container;
pub mod errors;
pub mod quads;
pub mod sphere;
pub mod stars;
pub mod tree;

pub use codes::CodeCatalog;
pub use container::{
    Chunk, CodeLayout, Container, CutBand, Endianness, QuadParams, StarCutParams, TableDescriptor,
};
pub use errors::{IndexError, Result};
pub use quads::QuadTable;
pub use stars::{StarCatalog, StarSearchResults};
pub use tree::{SearchOptions, SearchResults, TreeIndex};
