//! Places rupture contributions into matrix cells.

use crate::error::{DisaggError, Result};
use crate::geo;

use super::collect::{ContribKey, RuptureContribution};
use super::edges::BinEdges;
use super::matrix::DisaggMatrix;

/// Bin of `edges` holding `value` (`edges[i] <= value < edges[i + 1]`).
///
/// Values outside the edges clip to the first or last bin: edges are built
/// to cover the data, so anything outside is floating-point noise at the
/// boundary. The last edge belongs to the last bin.
pub fn bin_index(value: f64, edges: &[f64]) -> Result<usize> {
    if value.is_nan() {
        return Err(DisaggError::geometry("cannot bin a NaN coordinate"));
    }
    if edges.len() < 2 {
        return Err(DisaggError::geometry(format!(
            "need at least two bin edges, got {}",
            edges.len()
        )));
    }
    let n_bins = edges.len() - 1;
    let below_or_at = edges.partition_point(|&e| e <= value);
    Ok(below_or_at.saturating_sub(1).min(n_bins - 1))
}

/// Longitude edges as eastward offsets from the first edge, so edges that
/// wrap across the antimeridian become increasing.
pub fn unwrap_lon_edges(edges: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(edges.len());
    let mut acc = 0.0;
    out.push(acc);
    for w in edges.windows(2) {
        let mut step = geo::longitudinal_extent(w[0], w[1]);
        if step < 0.0 {
            step += 360.0;
        }
        acc += step;
        out.push(acc);
    }
    out
}

/// Tolerance, in degrees, when deciding that a longitude west of the first
/// edge is really the far east end of a box of 180 degrees or more.
const LON_WRAP_TOLERANCE: f64 = 1e-9;

/// Bin of `lon` given the edges and their [`unwrap_lon_edges`] offsets.
///
/// Offsets wrap to [-180, 180), so for boxes spanning 180 degrees or more a
/// negative offset is moved a full turn east when that lands inside the box.
pub fn lon_bin_index(lon: f64, lon_edges: &[f64], unwrapped: &[f64]) -> Result<usize> {
    if lon.is_nan() {
        return Err(DisaggError::geometry("cannot bin a NaN longitude"));
    }
    let Some(&west) = lon_edges.first() else {
        return Err(DisaggError::geometry("no longitude edges"));
    };
    let span = unwrapped.last().copied().unwrap_or(0.0);
    let mut offset = geo::longitudinal_extent(west, lon);
    if offset < 0.0 && offset + 360.0 <= span + LON_WRAP_TOLERANCE {
        offset += 360.0;
    }
    bin_index(offset, unwrapped)
}

/// `(mag, dist, lon, lat, trt)` cell of every contribution.
pub fn rupture_cells(
    contribs: &[RuptureContribution],
    edges: &BinEdges,
    n_trts: usize,
) -> Result<Vec<[usize; 5]>> {
    let unwrapped = unwrap_lon_edges(&edges.lon);
    contribs
        .iter()
        .map(|c| {
            if c.trt >= n_trts {
                return Err(DisaggError::config(format!(
                    "tectonic region index {} out of range ({} types)",
                    c.trt, n_trts
                )));
            }
            Ok([
                bin_index(c.mag, &edges.mag)?,
                bin_index(c.dist, &edges.dist)?,
                lon_bin_index(c.lon, &edges.lon, &unwrapped)?,
                bin_index(c.lat, &edges.lat)?,
                c.trt,
            ])
        })
        .collect()
}

/// Matrix for one (realization, poe, imt) key: each cell's non-exceedance is
/// the product of the non-exceedances of the ruptures falling into it.
///
/// `None` when no contribution carries the key.
pub fn arrange_in_bins(
    contribs: &[RuptureContribution],
    cells: &[[usize; 5]],
    key: &ContribKey,
    edges: &BinEdges,
    n_trts: usize,
) -> Result<Option<DisaggMatrix>> {
    let mut matrix: Option<DisaggMatrix> = None;
    for (contrib, cell) in contribs.iter().zip(cells) {
        let Some(pne) = contrib.pnes.get(key) else {
            continue;
        };
        let m = matrix.get_or_insert_with(|| DisaggMatrix::empty(edges.shape(n_trts), pne.iml));
        m.accumulate(*cell, &pne.pnes)?;
    }
    Ok(matrix)
}
