//! Unit-sphere angle conversions shared by the catalog layers.
//!
//! Star positions are stored as unit vectors; radii are squared chord
//! lengths on the unit sphere, so a range search is a plain Euclidean
//! ball query in 3-space.

use libm::{asin, atan2, cos, sin, sqrt};

pub const PI: f64 = std::f64::consts::PI;

const RAD_PER_DEG: f64 = PI / 180.0;
const DEG_PER_RAD: f64 = 180.0 / PI;
const ARCSEC_PER_DEG: f64 = 3600.0;

/// Converts RA/Dec in degrees to a unit-sphere XYZ vector.
pub fn radec_deg_to_xyz(ra_deg: f64, dec_deg: f64) -> [f64; 3] {
    let ra = ra_deg * RAD_PER_DEG;
    let dec = dec_deg * RAD_PER_DEG;
    let cosdec = cos(dec);
    [cosdec * cos(ra), cosdec * sin(ra), sin(dec)]
}

/// Converts a unit-sphere XYZ vector back to RA/Dec in degrees.
///
/// RA is normalized to `[0, 360)`.
pub fn xyz_to_radec_deg(xyz: &[f64; 3]) -> (f64, f64) {
    let mut ra = atan2(xyz[1], xyz[0]) * DEG_PER_RAD;
    if ra < 0.0 {
        ra += 360.0;
    }
    let dec = asin(xyz[2].clamp(-1.0, 1.0)) * DEG_PER_RAD;
    (ra, dec)
}

/// Converts an angle in degrees to the squared chord length subtended on
/// the unit sphere: `4 sin²(θ/2)`.
pub fn deg_to_dist2(deg: f64) -> f64 {
    let half = 0.5 * deg * RAD_PER_DEG;
    let s = sin(half);
    4.0 * s * s
}

/// Inverse of [`deg_to_dist2`].
pub fn dist2_to_deg(dist2: f64) -> f64 {
    let s = 0.5 * sqrt(dist2.max(0.0));
    2.0 * asin(s.clamp(-1.0, 1.0)) * DEG_PER_RAD
}

/// Converts an angle in radians to arcseconds.
pub fn rad_to_arcsec(rad: f64) -> f64 {
    rad * DEG_PER_RAD * ARCSEC_PER_DEG
}
