//! Disaggregation parameters.
//!
//! Scalars have defaults and can be overridden through `DISAGG_*` environment
//! variables; the poes and intensity measure types normally come with the
//! input bundle.

use crate::error::{DisaggError, Result};
use crate::hazard_curve::{Extrapolation, InterpScale};

#[derive(Debug, Clone)]
pub struct DisaggConfig {
    pub mag_bin_width: f64,
    /// km
    pub distance_bin_width: f64,
    /// degrees
    pub coordinate_bin_width: f64,
    pub truncation_level: f64,
    pub num_epsilon_bins: usize,
    /// km; sources and ruptures farther than this from a site are pruned.
    pub maximum_distance: f64,
    /// years
    pub investigation_time: f64,
    pub poes_disagg: Vec<f64>,
    /// imt name -> curve levels (increasing)
    pub intensity_measure_types_and_levels: Vec<(String, Vec<f64>)>,
    pub curve_extrapolation: Extrapolation,
    pub curve_scale: InterpScale,
    /// Sources per map task.
    pub sources_per_task: usize,
}

impl Default for DisaggConfig {
    fn default() -> Self {
        Self {
            mag_bin_width: 0.5,
            distance_bin_width: 10.0,
            coordinate_bin_width: 0.2,
            truncation_level: 3.0,
            num_epsilon_bins: 6,
            maximum_distance: 200.0,
            investigation_time: 50.0,
            poes_disagg: vec![0.1],
            intensity_measure_types_and_levels: Vec::new(),
            curve_extrapolation: Extrapolation::Clamp,
            curve_scale: InterpScale::Log,
            sources_per_task: 16,
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| DisaggError::config(format!("cannot parse {key}={raw:?}"))),
    }
}

impl DisaggConfig {
    /// Applies `DISAGG_*` overrides on top of `self`.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_parse("DISAGG_MAG_BIN_WIDTH")? {
            self.mag_bin_width = v;
        }
        if let Some(v) = env_parse("DISAGG_DISTANCE_BIN_WIDTH")? {
            self.distance_bin_width = v;
        }
        if let Some(v) = env_parse("DISAGG_COORDINATE_BIN_WIDTH")? {
            self.coordinate_bin_width = v;
        }
        if let Some(v) = env_parse("DISAGG_TRUNCATION_LEVEL")? {
            self.truncation_level = v;
        }
        if let Some(v) = env_parse("DISAGG_NUM_EPSILON_BINS")? {
            self.num_epsilon_bins = v;
        }
        if let Some(v) = env_parse("DISAGG_MAXIMUM_DISTANCE")? {
            self.maximum_distance = v;
        }
        if let Some(v) = env_parse("DISAGG_SOURCES_PER_TASK")? {
            self.sources_per_task = v;
        }
        if let Some(v) = env_parse::<Extrapolation>("DISAGG_CURVE_EXTRAPOLATION")? {
            self.curve_extrapolation = v;
        }
        if let Some(raw) = env_var("DISAGG_POES") {
            self.poes_disagg = raw
                .split(',')
                .map(|s| {
                    s.trim()
                        .parse::<f64>()
                        .map_err(|_| DisaggError::config(format!("bad poe {s:?} in DISAGG_POES")))
                })
                .collect::<Result<_>>()?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let widths = [
            ("mag_bin_width", self.mag_bin_width),
            ("distance_bin_width", self.distance_bin_width),
            ("coordinate_bin_width", self.coordinate_bin_width),
            ("maximum_distance", self.maximum_distance),
            ("investigation_time", self.investigation_time),
        ];
        for (name, v) in widths {
            if !(v.is_finite() && v > 0.0) {
                return Err(DisaggError::config(format!("{name} must be positive, got {v}")));
            }
        }
        if !(self.truncation_level.is_finite() && self.truncation_level > 0.0) {
            return Err(DisaggError::config(format!(
                "disaggregation needs a positive truncation_level, got {}",
                self.truncation_level
            )));
        }
        if self.num_epsilon_bins == 0 {
            return Err(DisaggError::config("num_epsilon_bins must be at least 1"));
        }
        if self.sources_per_task == 0 {
            return Err(DisaggError::config("sources_per_task must be at least 1"));
        }
        if self.poes_disagg.is_empty() {
            return Err(DisaggError::config("poes_disagg is empty"));
        }
        if let Some(p) = self.poes_disagg.iter().find(|p| !(**p > 0.0 && **p <= 1.0)) {
            return Err(DisaggError::config(format!("poes_disagg entry {p} is outside (0, 1]")));
        }
        if self.intensity_measure_types_and_levels.is_empty() {
            return Err(DisaggError::config("no intensity measure types configured"));
        }
        Ok(())
    }

    /// `linspace(-truncation_level, truncation_level, num_epsilon_bins + 1)`
    pub fn eps_edges(&self) -> Vec<f64> {
        let n = self.num_epsilon_bins;
        let tl = self.truncation_level;
        (0..=n)
            .map(|i| -tl + 2.0 * tl * i as f64 / n as f64)
            .collect()
    }

    pub fn imts(&self) -> impl Iterator<Item = &str> + Clone {
        self.intensity_measure_types_and_levels
            .iter()
            .map(|(imt, _)| imt.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DisaggConfig {
        DisaggConfig {
            intensity_measure_types_and_levels: vec![("PGA".into(), vec![0.1, 0.2])],
            ..DisaggConfig::default()
        }
    }

    #[test]
    fn eps_edges_are_symmetric() {
        let cfg = DisaggConfig {
            truncation_level: 3.0,
            num_epsilon_bins: 3,
            ..valid()
        };
        assert_eq!(cfg.eps_edges(), vec![-3.0, -1.0, 1.0, 3.0]);
    }

    #[test]
    fn validation_catches_bad_values() {
        assert!(valid().validate().is_ok());
        let bad = [
            DisaggConfig { distance_bin_width: 0.0, ..valid() },
            DisaggConfig { truncation_level: 0.0, ..valid() },
            DisaggConfig { num_epsilon_bins: 0, ..valid() },
            DisaggConfig { poes_disagg: vec![1.5], ..valid() },
            DisaggConfig { poes_disagg: vec![], ..valid() },
            DisaggConfig { intensity_measure_types_and_levels: vec![], ..valid() },
        ];
        for cfg in bad {
            assert!(matches!(cfg.validate(), Err(DisaggError::Config(_))), "{cfg:?}");
        }
    }

    #[test]
    fn disaggregation_needs_a_truncated_normal() {
        for tl in [0.0, -1.0, f64::INFINITY] {
            let cfg = DisaggConfig { truncation_level: tl, ..valid() };
            match cfg.validate() {
                Err(DisaggError::Config(msg)) => assert!(msg.contains("truncation_level"), "{msg}"),
                other => panic!("truncation_level {tl} accepted: {other:?}"),
            }
        }
    }
}
