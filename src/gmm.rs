//! Ground-motion models and the epsilon-band exceedance used to split a
//! rupture's contribution across standard deviations.

use std::fmt::Debug;

use ahash::AHashMap;
use smallvec::SmallVec;
use statrs::distribution::{ContinuousCDF, Normal};

use crate::error::{DisaggError, Result};

/// Per-epsilon-bin probabilities for one rupture.
pub type EpsilonProbs = SmallVec<[f64; 8]>;

/// Median and variability of ln(ground motion) for a rupture at a distance.
pub trait GroundMotionModel: Debug + Send + Sync {
    /// Mean and total standard deviation of ln(imt), natural-log units.
    fn mean_and_stddev(&self, mag: f64, distance: f64, imt: &str) -> Result<(f64, f64)>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogLinearCoeffs {
    pub c0: f64,
    pub c1: f64,
    pub c2: f64,
    pub c3: f64,
    pub sigma: f64,
}

/// `ln y = c0 + c1 * M + c2 * ln(R + c3)`, constant sigma, one coefficient
/// row per intensity measure type.
#[derive(Debug, Clone, Default)]
pub struct LogLinearGmpe {
    coeffs: AHashMap<String, LogLinearCoeffs>,
}

impl LogLinearGmpe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_imt(mut self, imt: impl Into<String>, coeffs: LogLinearCoeffs) -> Self {
        self.coeffs.insert(imt.into(), coeffs);
        self
    }
}

impl GroundMotionModel for LogLinearGmpe {
    fn mean_and_stddev(&self, mag: f64, distance: f64, imt: &str) -> Result<(f64, f64)> {
        let c = self
            .coeffs
            .get(imt)
            .ok_or_else(|| DisaggError::config(format!("no coefficients for imt {imt}")))?;
        let r = distance + c.c3;
        if r <= 0.0 {
            return Err(DisaggError::geometry(format!(
                "non-positive effective distance {r} (R={distance}, c3={})",
                c.c3
            )));
        }
        Ok((c.c0 + c.c1 * mag + c.c2 * r.ln(), c.sigma))
    }
}

/// `P(ln imt >= ln iml and epsilon in band_j)` for the `n_epsilons` equal
/// bands of a normal truncated at `truncation_level`.
///
/// The bands sum to the truncated probability of exceeding `iml`.
pub fn epsilon_band_poes(
    mean: f64,
    stddev: f64,
    iml: f64,
    truncation_level: f64,
    n_epsilons: usize,
) -> Result<EpsilonProbs> {
    if !(stddev.is_finite() && stddev > 0.0) {
        return Err(DisaggError::config(format!(
            "ground-motion stddev must be positive, got {stddev}"
        )));
    }
    if !(iml.is_finite() && iml > 0.0) {
        return Err(DisaggError::curve(format!("intensity level must be positive, got {iml}")));
    }
    let norm = Normal::new(0.0, 1.0).map_err(|e| DisaggError::config(e.to_string()))?;
    let tl = truncation_level;
    let z = (iml.ln() - mean) / stddev;
    let mass = norm.cdf(tl) - norm.cdf(-tl);
    let width = 2.0 * tl / n_epsilons as f64;

    Ok((0..n_epsilons)
        .map(|j| {
            let lo = -tl + width * j as f64;
            let hi = -tl + width * (j + 1) as f64;
            let from = lo.max(z);
            if from >= hi {
                0.0
            } else {
                ((norm.cdf(hi) - norm.cdf(from)) / mass).clamp(0.0, 1.0)
            }
        })
        .collect())
}
