//! Quad table: which stars form each geometric hash quad.
//!
//! Rows are fixed-width groups of star ids, `dimquads` per quad; quad
//! ids equal row numbers and match the code catalog's external ids.
//! Scale bounds are stored in radians in the primary header.

use byteorder::{ByteOrder, NativeEndian};
use tracing::debug;

use crate::container::{Container, Endianness};
use crate::errors::{IndexError, Result};
use crate::sphere;

pub const MIN_DIMQUADS: usize = 3;
pub const MAX_DIMQUADS: usize = 8;

const QUADS_TABLE: &str = "quads";

/// An open quad table, fully decoded.
pub struct QuadTable {
    dimquads: usize,
    numquads: usize,
    numstars: usize,
    scale_upper: f64,
    scale_lower: f64,
    index_id: i32,
    healpix: i32,
    hp_nside: i32,
    quads: Vec<u32>,
}

impl QuadTable {
    /// Loads the quad table from a container.
    ///
    /// # Errors
    /// [`IndexError::MissingKeyword`] when a required primary keyword
    /// (`NQUADS`, `NSTARS`, `SCALE_U`, `SCALE_L`, `ENDIAN`) is absent,
    /// [`IndexError::EndianMismatch`] when the file was written on a
    /// foreign host, and [`IndexError::InvalidFormat`] for an
    /// out-of-bounds `DIMQUADS`.
    pub fn open(container: &mut Container) -> Result<QuadTable> {
        match &container.primary().endian {
            Endianness::Native => {}
            Endianness::Foreign(tag) => {
                return Err(IndexError::EndianMismatch {
                    file: tag.clone(),
                    host: crate::container::host_endian_fingerprint(),
                })
            }
            Endianness::Unspecified => return Err(IndexError::MissingKeyword("ENDIAN")),
        }

        let params = container.quad_params().clone();
        let numquads = params.numquads.ok_or(IndexError::MissingKeyword("NQUADS"))?;
        let numstars = params.numstars.ok_or(IndexError::MissingKeyword("NSTARS"))?;
        let scale_upper = params
            .scale_upper
            .ok_or(IndexError::MissingKeyword("SCALE_U"))?;
        let scale_lower = params
            .scale_lower
            .ok_or(IndexError::MissingKeyword("SCALE_L"))?;
        let dimquads = params.dimquads;
        if !(MIN_DIMQUADS..=MAX_DIMQUADS).contains(&dimquads) {
            return Err(IndexError::InvalidFormat(format!(
                "DIMQUADS {} out of bounds",
                dimquads
            )));
        }

        let chunk = container.read_chunk(QUADS_TABLE, dimquads * 4, numquads, true)?;
        let mut quads = vec![0u32; numquads * dimquads];
        NativeEndian::read_u32_into(&chunk.bytes()[..quads.len() * 4], &mut quads);

        debug!(quads = numquads, dimquads, "opened quad table");
        Ok(QuadTable {
            dimquads,
            numquads,
            numstars,
            scale_upper,
            scale_lower,
            index_id: params.index_id,
            healpix: params.healpix,
            hp_nside: params.hp_nside,
            quads,
        })
    }

    pub fn dimquads(&self) -> usize {
        self.dimquads
    }

    pub fn num_quads(&self) -> usize {
        self.numquads
    }

    pub fn num_stars(&self) -> usize {
        self.numstars
    }

    pub fn index_id(&self) -> i32 {
        self.index_id
    }

    pub fn healpix(&self) -> i32 {
        self.healpix
    }

    pub fn hp_nside(&self) -> i32 {
        self.hp_nside
    }

    /// Upper scale bound in radians.
    pub fn scale_upper(&self) -> f64 {
        self.scale_upper
    }

    /// Lower scale bound in radians.
    pub fn scale_lower(&self) -> f64 {
        self.scale_lower
    }

    pub fn scale_upper_arcsec(&self) -> f64 {
        sphere::rad_to_arcsec(self.scale_upper)
    }

    pub fn scale_lower_arcsec(&self) -> f64 {
        sphere::rad_to_arcsec(self.scale_lower)
    }

    /// Star ids of one quad.
    ///
    /// # Errors
    /// [`IndexError::OutOfRange`] for a quad id past the table.
    pub fn stars_of_quad(&self, quad: usize) -> Result<&[u32]> {
        if quad >= self.numquads {
            return Err(IndexError::OutOfRange {
                id: quad,
                count: self.numquads,
            });
        }
        Ok(&self.quads[quad * self.dimquads..(quad + 1) * self.dimquads])
    }

    /// Checks that every referenced star id is within the catalog.
    ///
    /// # Errors
    /// [`IndexError::CorruptQuads`] naming the first offending quad.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_DIMQUADS..=MAX_DIMQUADS).contains(&self.dimquads) {
            return Err(IndexError::InvalidFormat(format!(
                "DIMQUADS {} out of bounds",
                self.dimquads
            )));
        }
        for (quad, stars) in self.quads.chunks_exact(self.dimquads).enumerate() {
            for &star in stars {
                if star as usize >= self.numstars {
                    return Err(IndexError::CorruptQuads {
                        quad,
                        star,
                        nstars: self.numstars,
                    });
                }
            }
        }
        Ok(())
    }
}
