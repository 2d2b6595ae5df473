//! # Reference Location
//!
//! The receiver's own latitude/longitude, supplied by the operator and checked
//! once at startup. Latitude must lie in `[-90, 90]` and longitude in
//! `[-180, 360)`; longitudes east of the antimeridian are folded back into
//! `[-180, 0)`. Anything else resets both coordinates to zero.
//!
//! A location counts as "set" only when at least one coordinate is nonzero
//! after normalization, so `(0, 0)` reads exactly like no configuration at all.

use serde::Serialize;

/// A validated receiver location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ReceiverLocation {
    lat: f64,
    lon: f64,
    is_set: bool,
}

impl ReceiverLocation {
    /// Validates and normalizes an operator-supplied coordinate pair.
    pub fn validate(lat: f64, lon: f64) -> Self {
        let (lat, lon) = if !(-90.0..=90.0).contains(&lat) || !(-180.0..360.0).contains(&lon) {
            (0.0, 0.0)
        } else if lon > 180.0 {
            (lat, lon - 360.0)
        } else {
            (lat, lon)
        };

        Self {
            lat,
            lon,
            // Greenwich is lon 0.0, so either coordinate being nonzero is enough.
            is_set: lat != 0.0 || lon != 0.0,
        }
    }

    /// A location that was never configured.
    pub fn unset() -> Self {
        Self::validate(0.0, 0.0)
    }

    /// Latitude in degrees.
    pub fn latitude(&self) -> f64 {
        self.lat
    }

    /// Longitude in degrees, within `[-180, 180]`.
    pub fn longitude(&self) -> f64 {
        self.lon
    }

    /// Whether the operator supplied a usable location.
    pub fn is_set(&self) -> bool {
        self.is_set
    }
}

impl Default for ReceiverLocation {
    fn default() -> Self {
        Self::unset()
    }
}
