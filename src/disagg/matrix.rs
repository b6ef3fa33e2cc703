use ndarray::{Array6, ArrayView1, ArrayView6, Zip, s};

use crate::error::{DisaggError, Result};

pub const MAG: usize = 0;
pub const DIST: usize = 1;
pub const LON: usize = 2;
pub const LAT: usize = 3;
pub const TRT: usize = 4;
pub const EPS: usize = 5;

/// Disaggregation matrix for one result key, indexed
/// `(mag, dist, lon, lat, trt, eps)`.
///
/// Cells are stored as probabilities of non-exceedance so that combining
/// independent contributions is a plain product: a cell's exceedance is
/// `1 - pne`, and `1 - (1 - a)(1 - b)` on exceedances is `pne_a * pne_b`.
/// An empty matrix (all-zero exceedance) is the identity of [`merge`].
///
/// [`merge`]: DisaggMatrix::merge
#[derive(Debug, Clone, PartialEq)]
pub struct DisaggMatrix {
    pne: Array6<f64>,
    iml: f64,
}

impl DisaggMatrix {
    /// All-zero exceedance matrix of the given shape.
    pub fn empty(shape: [usize; 6], iml: f64) -> Self {
        Self {
            pne: Array6::ones(shape),
            iml,
        }
    }

    /// Builds a matrix from exceedance probabilities, rejecting values
    /// outside [0, 1].
    pub fn from_poes(poes: Array6<f64>, iml: f64) -> Result<Self> {
        check_probabilities(poes.iter().copied())?;
        Ok(Self {
            pne: poes.mapv(|p| 1.0 - p),
            iml,
        })
    }

    pub fn shape(&self) -> [usize; 6] {
        let s = self.pne.shape();
        [s[0], s[1], s[2], s[3], s[4], s[5]]
    }

    /// Intensity level interpolated from the hazard curve for this key.
    pub fn iml(&self) -> f64 {
        self.iml
    }

    pub fn non_exceedance(&self) -> ArrayView6<'_, f64> {
        self.pne.view()
    }

    /// Probabilities of exceedance, `1 - pne` per cell.
    pub fn poes(&self) -> Array6<f64> {
        self.pne.mapv(|p| 1.0 - p)
    }

    pub fn poe_at(&self, idx: [usize; 6]) -> f64 {
        1.0 - self.pne[idx]
    }

    /// Multiplies the per-epsilon non-exceedances of one rupture into the
    /// cell `(mag, dist, lon, lat, trt)`.
    pub fn accumulate(&mut self, cell: [usize; 5], pnes: &[f64]) -> Result<()> {
        check_probabilities(pnes.iter().copied())?;
        let [m, d, lo, la, t] = cell;
        let mut lane = self.pne.slice_mut(s![m, d, lo, la, t, ..]);
        if lane.len() != pnes.len() {
            return Err(DisaggError::ShapeMismatch {
                left: vec![lane.len()],
                right: vec![pnes.len()],
            });
        }
        Zip::from(&mut lane)
            .and(ArrayView1::from(pnes))
            .for_each(|acc, &p| *acc *= p);
        Ok(())
    }

    /// Combines an independent partial matrix into `self`:
    /// `combined = 1 - (1 - self)(1 - other)` per cell.
    pub fn merge(&mut self, other: &DisaggMatrix) -> Result<()> {
        if self.pne.shape() != other.pne.shape() {
            return Err(DisaggError::ShapeMismatch {
                left: self.pne.shape().to_vec(),
                right: other.pne.shape().to_vec(),
            });
        }
        check_probabilities(other.pne.iter().copied())?;
        Zip::from(&mut self.pne)
            .and(&other.pne)
            .for_each(|acc, &p| *acc *= p);
        Ok(())
    }
}

/// Every value must be a probability; NaN counts as a violation.
fn check_probabilities(values: impl IntoIterator<Item = f64>) -> Result<()> {
    match values.into_iter().find(|p| !(0.0..=1.0).contains(p)) {
        Some(bad) => Err(DisaggError::MergeRule { value: bad }),
        None => Ok(()),
    }
}
