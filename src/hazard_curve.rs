//! Hazard curves consumed by the disaggregation: (intensity level, poe)
//! pairs per (site, realization, imt), and the inverse lookup of the level
//! matching a target probability of exceedance.

use ahash::AHashMap;
use tracing::warn;

use crate::error::{DisaggError, Result};

/// Space in which a curve is interpolated between its levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpScale {
    #[default]
    Linear,
    Log,
}

/// What to do when a target poe is not bracketed by the curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extrapolation {
    /// Return the boundary level (lowest level for poes above the curve,
    /// highest level for poes below it).
    #[default]
    Clamp,
    /// Fail with [`DisaggError::Curve`].
    Reject,
}

impl std::str::FromStr for Extrapolation {
    type Err = DisaggError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "clamp" => Ok(Extrapolation::Clamp),
            "reject" => Ok(Extrapolation::Reject),
            other => Err(DisaggError::config(format!(
                "unknown curve extrapolation {other:?} (expected clamp|reject)"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HazardCurve {
    imls: Vec<f64>,
    poes: Vec<f64>,
    scale: InterpScale,
}

impl HazardCurve {
    /// Levels must be strictly increasing and poes non-increasing in [0, 1].
    pub fn new(imls: Vec<f64>, poes: Vec<f64>, scale: InterpScale) -> Result<Self> {
        if imls.is_empty() || imls.len() != poes.len() {
            return Err(DisaggError::curve(format!(
                "curve needs matching non-empty levels and poes (imls={}, poes={})",
                imls.len(),
                poes.len()
            )));
        }
        if imls.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(DisaggError::curve("intensity levels must be strictly increasing"));
        }
        if poes.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(DisaggError::curve("curve poes must lie in [0, 1]"));
        }
        if poes.windows(2).any(|w| w[1] > w[0]) {
            return Err(DisaggError::curve("curve poes must not increase with the level"));
        }
        if scale == InterpScale::Log && imls[0] <= 0.0 {
            return Err(DisaggError::curve("log interpolation needs positive levels"));
        }
        Ok(Self { imls, poes, scale })
    }

    pub fn imls(&self) -> &[f64] {
        &self.imls
    }

    pub fn poes(&self) -> &[f64] {
        &self.poes
    }

    pub fn is_all_zero(&self) -> bool {
        self.poes.iter().all(|&p| p == 0.0)
    }

    /// Intensity level whose probability of exceedance is `poe`.
    pub fn iml_for_poe(&self, poe: f64, policy: Extrapolation) -> Result<f64> {
        // walk the curve from the highest level down so poes ascend
        let n = self.poes.len();
        let xs = |i: usize| self.poes[n - 1 - i];
        let ys = |i: usize| self.imls[n - 1 - i];

        let (lo, hi) = (xs(0), xs(n - 1));
        if poe < lo || poe > hi {
            if policy == Extrapolation::Reject {
                return Err(DisaggError::curve(format!(
                    "poe {poe} is outside the curve range [{lo}, {hi}]"
                )));
            }
            return Ok(if poe < lo { ys(0) } else { ys(n - 1) });
        }
        if poe == hi {
            return Ok(ys(n - 1));
        }
        // first index with xs(j) > poe; exists because poe < hi
        let j = (0..n).find(|&i| xs(i) > poe).unwrap_or(n - 1);
        let (x0, x1) = (xs(j - 1), xs(j));
        let (y0, y1) = (ys(j - 1), ys(j));
        let t = (poe - x0) / (x1 - x0);
        Ok(match self.scale {
            InterpScale::Linear => y0 + t * (y1 - y0),
            InterpScale::Log => (y0.ln() + t * (y1.ln() - y0.ln())).exp(),
        })
    }
}

/// Read-only lookup `(site, realization, imt) -> curve`.
#[derive(Debug, Default, Clone)]
pub struct CurveTable {
    curves: AHashMap<(usize, usize, String), HazardCurve>,
}

impl CurveTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a curve. All-zero curves are dropped with a warning and
    /// `false` is returned.
    pub fn insert(&mut self, site_id: usize, rlz_id: usize, imt: &str, curve: HazardCurve) -> bool {
        if curve.is_all_zero() {
            warn!(
                site = site_id,
                rlz = rlz_id,
                imt,
                "hazard curve contains all zero probabilities; skipping"
            );
            return false;
        }
        self.curves.insert((site_id, rlz_id, imt.to_string()), curve);
        true
    }

    pub fn get(&self, site_id: usize, rlz_id: usize, imt: &str) -> Option<&HazardCurve> {
        self.curves.get(&(site_id, rlz_id, imt.to_string()))
    }

    pub fn has_site(&self, site_id: usize) -> bool {
        self.curves.keys().any(|(s, _, _)| *s == site_id)
    }

    pub fn len(&self) -> usize {
        self.curves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.curves.is_empty()
    }
}
