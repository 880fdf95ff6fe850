//! Geodetic → local tangent-plane conversion.
//!
//! Equirectangular approximation around the first fix; accurate to well under
//! a metre over the few-kilometre extent a single platform covers.

use crate::readings::GpsFix;
use serde::{Deserialize, Serialize};

/// Mean earth radius (metres).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Origin of the local east-north-up frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeoOrigin {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

impl GeoOrigin {
    pub fn from_fix(fix: &GpsFix) -> Self {
        Self {
            lat: fix.lat,
            lon: fix.lon,
            alt: fix.alt,
        }
    }

    /// Convert a fix to local `[east, north, up]` metres.
    pub fn to_local(&self, fix: &GpsFix) -> [f64; 3] {
        let east = (fix.lon - self.lon).to_radians() * EARTH_RADIUS_M * self.lat.to_radians().cos();
        let north = (fix.lat - self.lat).to_radians() * EARTH_RADIUS_M;
        [east, north, fix.alt - self.alt]
    }
}
