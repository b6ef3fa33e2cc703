//! Bin edges per (logic-tree branch, site).
//!
//! A coarse pre-pass over the ruptures near a site fills a [`SiteBounds`];
//! edges are derived from it once and then shared read-only by every task
//! touching that (branch, site).

use ahash::AHashMap;

use crate::config::DisaggConfig;
use crate::error::Result;
use crate::geo::{self, BoundingBox, Point};

/// Edges keyed by (branch id, site id).
pub type EdgesByKey = AHashMap<(usize, usize), BinEdges>;

#[derive(Debug, Clone, PartialEq)]
pub struct BinEdges {
    pub mag: Vec<f64>,
    pub dist: Vec<f64>,
    /// Eastward from west to east; may wrap across the antimeridian.
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    pub eps: Vec<f64>,
}

impl BinEdges {
    /// Matrix shape for `n_trts` tectonic region types.
    pub fn shape(&self, n_trts: usize) -> [usize; 6] {
        [
            self.mag.len() - 1,
            self.dist.len() - 1,
            self.lon.len() - 1,
            self.lat.len() - 1,
            n_trts,
            self.eps.len() - 1,
        ]
    }
}

/// `width * [floor(min / width) ..= ceil(max / width)]`, widened to one bin
/// when the range is empty.
pub fn edges_from_range(min: f64, max: f64, width: f64) -> Vec<f64> {
    let lo = (min / width).floor() as i64;
    let mut hi = (max / width).ceil() as i64;
    if hi <= lo {
        hi = lo + 1;
    }
    (lo..=hi).map(|i| width * i as f64).collect()
}

/// Longitude and latitude edges covering `bb`, with west/east snapped
/// outward to the coordinate width.
pub fn lon_lat_edges(bb: &BoundingBox, width: f64) -> (Vec<f64>, Vec<f64>) {
    let west = (bb.west / width).floor() * width;
    let mut east = (bb.east / width).ceil() * width;
    let mut extent = geo::longitudinal_extent(west, east);
    if extent < 0.0 {
        // snapping pushed a box of almost 180 degrees past the half globe
        extent += 360.0;
    }
    if extent == 0.0 {
        east = geo::normalize_lon(west + width);
        extent = width;
    }
    let n = (extent / width).round() as usize + 1;
    let lon = geo::npoints_along_equator(west, east, n.max(2));
    let lat = edges_from_range(bb.south, bb.north, width);
    (lon, lat)
}

/// Magnitude extremes of every rupture feeding a branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MagRange {
    pub min: f64,
    pub max: f64,
}

impl MagRange {
    pub fn update(range: Option<MagRange>, mag: f64) -> Option<MagRange> {
        Some(match range {
            None => MagRange { min: mag, max: mag },
            Some(r) => MagRange {
                min: r.min.min(mag),
                max: r.max.max(mag),
            },
        })
    }
}

/// Distances and closest-point extremes of the ruptures near one site.
///
/// Longitudes are tracked per sign (smallest positive, largest negative) so
/// the spherical bounding box can be rebuilt across the antimeridian without
/// keeping every point.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SiteBounds {
    count: usize,
    min_dist: f64,
    max_dist: f64,
    min_lon: f64,
    max_lon: f64,
    min_pos_lon: Option<f64>,
    max_neg_lon: Option<f64>,
    on_greenwich: bool,
    min_lat: f64,
    max_lat: f64,
}

fn opt_min(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (x, y) => x.or(y),
    }
}

fn opt_max(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (x, y) => x.or(y),
    }
}

impl SiteBounds {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn update(&mut self, distance: f64, closest: Point) {
        self.merge(&SiteBounds {
            count: 1,
            min_dist: distance,
            max_dist: distance,
            min_lon: closest.lon,
            max_lon: closest.lon,
            min_pos_lon: (closest.lon > 0.0).then_some(closest.lon),
            max_neg_lon: (closest.lon < 0.0).then_some(closest.lon),
            on_greenwich: closest.lon == 0.0,
            min_lat: closest.lat,
            max_lat: closest.lat,
        });
    }

    pub fn merge(&mut self, other: &SiteBounds) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = other.clone();
            return;
        }
        self.count += other.count;
        self.min_dist = self.min_dist.min(other.min_dist);
        self.max_dist = self.max_dist.max(other.max_dist);
        self.min_lon = self.min_lon.min(other.min_lon);
        self.max_lon = self.max_lon.max(other.max_lon);
        self.min_pos_lon = opt_min(self.min_pos_lon, other.min_pos_lon);
        self.max_neg_lon = opt_max(self.max_neg_lon, other.max_neg_lon);
        self.on_greenwich |= other.on_greenwich;
        self.min_lat = self.min_lat.min(other.min_lat);
        self.max_lat = self.max_lat.max(other.max_lat);
    }

    pub fn distance_range(&self) -> Option<(f64, f64)> {
        (!self.is_empty()).then_some((self.min_dist, self.max_dist))
    }

    /// The extremes decide the box exactly: every other longitude lies
    /// between two of them on the same side of the antimeridian.
    pub fn bounding_box(&self) -> Result<Option<BoundingBox>> {
        if self.is_empty() {
            return Ok(None);
        }
        let mut lons = vec![self.min_lon, self.max_lon];
        lons.extend(self.min_pos_lon);
        lons.extend(self.max_neg_lon);
        if self.on_greenwich {
            lons.push(0.0);
        }
        let lats = vec![self.min_lat; lons.len()];
        let mut bb = geo::spherical_bounding_box(&lons, &lats)?;
        bb.north = self.max_lat;
        Ok(Some(bb))
    }
}

/// Bin edges for one (branch, site), or `None` when no rupture is near the
/// site; the caller skips disaggregation for it.
pub fn build_bin_edges(
    bounds: &SiteBounds,
    mags: Option<MagRange>,
    cfg: &DisaggConfig,
) -> Result<Option<BinEdges>> {
    let (Some((min_dist, max_dist)), Some(mags), Some(bb)) =
        (bounds.distance_range(), mags, bounds.bounding_box()?)
    else {
        return Ok(None);
    };
    let (lon, lat) = lon_lat_edges(&bb, cfg.coordinate_bin_width);
    Ok(Some(BinEdges {
        mag: edges_from_range(mags.min, mags.max, cfg.mag_bin_width),
        dist: edges_from_range(min_dist, max_dist, cfg.distance_bin_width),
        lon,
        lat,
        eps: cfg.eps_edges(),
    }))
}
