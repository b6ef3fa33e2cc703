//! Marginal probability mass functions read off a disaggregation matrix.

use ndarray::{ArrayD, Axis};

use super::matrix::{DIST, DisaggMatrix, EPS, LAT, LON, MAG, TRT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PmfKind {
    Mag,
    Dist,
    Trt,
    MagDist,
    MagDistEps,
    LonLat,
    MagLonLat,
    LonLatTrt,
    MagDistTrt,
}

impl PmfKind {
    pub const ALL: [PmfKind; 9] = [
        PmfKind::Mag,
        PmfKind::Dist,
        PmfKind::Trt,
        PmfKind::MagDist,
        PmfKind::MagDistEps,
        PmfKind::LonLat,
        PmfKind::MagLonLat,
        PmfKind::LonLatTrt,
        PmfKind::MagDistTrt,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PmfKind::Mag => "Mag",
            PmfKind::Dist => "Dist",
            PmfKind::Trt => "TRT",
            PmfKind::MagDist => "Mag_Dist",
            PmfKind::MagDistEps => "Mag_Dist_Eps",
            PmfKind::LonLat => "Lon_Lat",
            PmfKind::MagLonLat => "Mag_Lon_Lat",
            PmfKind::LonLatTrt => "Lon_Lat_TRT",
            PmfKind::MagDistTrt => "Mag_Dist_TRT",
        }
    }

    /// Matrix axes kept by the projection, in output order.
    pub fn axes(self) -> &'static [usize] {
        match self {
            PmfKind::Mag => &[MAG],
            PmfKind::Dist => &[DIST],
            PmfKind::Trt => &[TRT],
            PmfKind::MagDist => &[MAG, DIST],
            PmfKind::MagDistEps => &[MAG, DIST, EPS],
            PmfKind::LonLat => &[LON, LAT],
            PmfKind::MagLonLat => &[MAG, LON, LAT],
            PmfKind::LonLatTrt => &[LON, LAT, TRT],
            PmfKind::MagDistTrt => &[MAG, DIST, TRT],
        }
    }
}

/// Exceedance probabilities over the axes kept by `kind`.
///
/// Collapsed cells combine as independent events, `1 - prod(1 - p)`, so
/// every value stays within [0, 1].
pub fn project(matrix: &DisaggMatrix, kind: PmfKind) -> ArrayD<f64> {
    let keep = kind.axes();
    let mut pne = matrix.non_exceedance().to_owned().into_dyn();
    // highest axis first so the remaining indices stay valid
    for ax in (0..6).rev().filter(|ax| !keep.contains(ax)) {
        pne = pne.map_axis(Axis(ax), |lane| lane.product());
    }
    pne.mapv_inplace(|p| 1.0 - p);
    pne
}

/// Every projection, in [`PmfKind::ALL`] order.
pub fn pmf_map(matrix: &DisaggMatrix) -> Vec<(PmfKind, ArrayD<f64>)> {
    PmfKind::ALL
        .iter()
        .map(|&kind| (kind, project(matrix, kind)))
        .collect()
}
