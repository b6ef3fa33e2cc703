//! Spherical helpers for longitude/latitude binning.
//!
//! Longitudes are degrees in [-180, 180]. Extents are measured eastward, so a
//! box from 170 to -170 is 20 degrees wide and crosses the antimeridian.

use crate::error::{DisaggError, Result};

/// Mean earth radius in km.
pub const EARTH_RADIUS: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lon: f64,
    pub lat: f64,
}

impl Point {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle (haversine) distance in km.
    pub fn distance_to(&self, other: &Point) -> f64 {
        let (lat1, lat2) = (self.lat.to_radians(), other.lat.to_radians());
        let dlat = lat2 - lat1;
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS * a.sqrt().min(1.0).asin()
    }
}

/// Eastward extent from `lon1` to `lon2`, in [-180, 180).
#[inline]
pub fn longitudinal_extent(lon1: f64, lon2: f64) -> f64 {
    (lon2 - lon1 + 180.0).rem_euclid(360.0) - 180.0
}

/// True when the segment between two longitudes crosses the antimeridian.
#[inline]
pub fn cross_idl(lon1: f64, lon2: f64) -> bool {
    lon1 * lon2 < 0.0 && (lon1 - lon2).abs() > 180.0
}

#[inline]
pub fn normalize_lon(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub west: f64,
    pub east: f64,
    pub north: f64,
    pub south: f64,
}

impl BoundingBox {
    pub fn lon_extent(&self) -> f64 {
        longitudinal_extent(self.west, self.east)
    }
}

/// Spherical bounding box of a set of points.
///
/// When the points lie on both sides of the antimeridian the west edge is the
/// smallest positive longitude and the east edge the largest negative one.
pub fn spherical_bounding_box(lons: &[f64], lats: &[f64]) -> Result<BoundingBox> {
    if lons.is_empty() || lons.len() != lats.len() {
        return Err(DisaggError::geometry(format!(
            "bounding box needs matching non-empty coordinates (lons={}, lats={})",
            lons.len(),
            lats.len()
        )));
    }
    let fmin = |xs: &[f64]| xs.iter().copied().fold(f64::INFINITY, f64::min);
    let fmax = |xs: &[f64]| xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let (north, south) = (fmax(lats), fmin(lats));
    let (mut west, mut east) = (fmin(lons), fmax(lons));
    if !(-180.0..=180.0).contains(&west) || !(-180.0..=180.0).contains(&east) {
        return Err(DisaggError::geometry(format!(
            "longitudes out of range: west={west}, east={east}"
        )));
    }
    if longitudinal_extent(west, east) < 0.0 {
        west = lons
            .iter()
            .copied()
            .filter(|&l| l > 0.0)
            .fold(f64::INFINITY, f64::min);
        east = lons
            .iter()
            .copied()
            .filter(|&l| l < 0.0)
            .fold(f64::NEG_INFINITY, f64::max);
        let inside = lons
            .iter()
            .all(|&l| longitudinal_extent(west, l) >= 0.0 && longitudinal_extent(l, east) >= 0.0);
        if !inside {
            return Err(DisaggError::geometry(
                "points collection has longitudinal extent wider than 180 deg",
            ));
        }
    }
    Ok(BoundingBox {
        west,
        east,
        north,
        south,
    })
}

/// `n` evenly spaced points on the equator going east from `west` to `east`.
///
/// Along the equator the great circle is the equator itself, so spacing in
/// longitude is spacing in arc length. Results are normalised to [-180, 180].
pub fn npoints_along_equator(west: f64, east: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![normalize_lon(west)],
        _ => {
            let mut extent = longitudinal_extent(west, east);
            if extent < 0.0 || (extent == 0.0 && west != east) {
                extent += 360.0;
            }
            let step = extent / (n - 1) as f64;
            (0..n)
                .map(|i| normalize_lon(west + step * i as f64))
                .collect()
        }
    }
}
