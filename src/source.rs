//! Seismic sources and ruptures as seen by the disaggregation.
//!
//! The engine only needs a handful of geometric queries per rupture; anything
//! that can answer them plugs in through [`SeismicSource`] / [`Rupture`].
//! [`PointSource`] is the reference implementation used by the CLI.

use crate::error::{DisaggError, Result};
use crate::geo::Point;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Site {
    pub id: usize,
    pub location: Point,
}

/// Temporal occurrence model of a rupture.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence {
    Poissonian { annual_rate: f64, time_span: f64 },
    /// Explicit probabilities of 0, 1, 2... occurrences. Not supported by
    /// the disaggregation.
    NonParametric { probs_occur: Vec<f64> },
}

impl Occurrence {
    pub fn is_parametric(&self) -> bool {
        matches!(self, Occurrence::Poissonian { .. })
    }

    /// Probability that the rupture does not cause exceedance, given the
    /// conditional probability `poe` of exceedance per occurrence.
    pub fn probability_no_exceedance(&self, poe: f64) -> Result<f64> {
        match self {
            Occurrence::Poissonian {
                annual_rate,
                time_span,
            } => Ok((-annual_rate * time_span * poe).exp()),
            Occurrence::NonParametric { .. } => Err(DisaggError::config(
                "non-parametric ruptures are not supported by the disaggregation",
            )),
        }
    }
}

pub trait Rupture {
    fn mag(&self) -> f64;
    /// Joyner-Boore distance to the site, km.
    fn joyner_boore_distance(&self, site: &Point) -> f64;
    fn closest_point(&self, site: &Point) -> Point;
    fn occurrence(&self) -> &Occurrence;
}

pub trait SeismicSource: Send + Sync {
    type Rupture: Rupture;

    fn source_id(&self) -> &str;
    fn tectonic_region_type(&self) -> &str;
    /// Lower bound of the distance from any rupture of the source to `site`.
    fn distance_to(&self, site: &Point) -> f64;
    fn ruptures(&self) -> Result<Vec<Self::Rupture>>;
    /// False for sources whose ruptures carry non-parametric occurrence.
    fn is_parametric(&self) -> bool {
        true
    }
}

/// Ruptures of one source within `maximum_distance` of a site.
pub struct SourceRuptures<'a, S: SeismicSource> {
    pub source: &'a S,
    pub ruptures: Vec<S::Rupture>,
}

/// Source prefilter, rupture generation and rupture filter for one site.
///
/// Sources and ruptures out of range are skipped; errors carry the id of the
/// source that raised them.
pub fn ruptures_near_site<'a, S: SeismicSource>(
    sources: &'a [S],
    site: &Site,
    maximum_distance: f64,
) -> Result<Vec<SourceRuptures<'a, S>>> {
    let mut out = Vec::new();
    for source in sources {
        if source.distance_to(&site.location) > maximum_distance {
            continue;
        }
        let ruptures: Vec<S::Rupture> = source
            .ruptures()
            .map_err(|e| e.in_source(source.source_id()))?
            .into_iter()
            .filter(|r| r.joyner_boore_distance(&site.location) <= maximum_distance)
            .collect();
        if ruptures.is_empty() {
            continue;
        }
        out.push(SourceRuptures { source, ruptures });
    }
    Ok(out)
}

/// Point rupture: the epicenter is both hypocenter projection and closest point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRupture {
    pub mag: f64,
    pub epicenter: Point,
    pub depth: f64,
    pub occurrence: Occurrence,
}

impl Rupture for PointRupture {
    fn mag(&self) -> f64 {
        self.mag
    }

    fn joyner_boore_distance(&self, site: &Point) -> f64 {
        self.epicenter.distance_to(site)
    }

    fn closest_point(&self, _site: &Point) -> Point {
        self.epicenter
    }

    fn occurrence(&self) -> &Occurrence {
        &self.occurrence
    }
}

/// Point source with a discrete magnitude-frequency distribution.
#[derive(Debug, Clone, PartialEq)]
pub struct PointSource {
    pub id: String,
    pub tectonic_region_type: String,
    pub location: Point,
    pub depth: f64,
    /// (magnitude, annual rate)
    pub mfd: Vec<(f64, f64)>,
    pub time_span: f64,
}

impl SeismicSource for PointSource {
    type Rupture = PointRupture;

    fn source_id(&self) -> &str {
        &self.id
    }

    fn tectonic_region_type(&self) -> &str {
        &self.tectonic_region_type
    }

    fn distance_to(&self, site: &Point) -> f64 {
        self.location.distance_to(site)
    }

    fn ruptures(&self) -> Result<Vec<PointRupture>> {
        self.mfd
            .iter()
            .map(|&(mag, rate)| {
                if !(rate.is_finite() && rate >= 0.0) {
                    return Err(DisaggError::config(format!(
                        "invalid occurrence rate {rate} for magnitude {mag}"
                    )));
                }
                Ok(PointRupture {
                    mag,
                    epicenter: self.location,
                    depth: self.depth,
                    occurrence: Occurrence::Poissonian {
                        annual_rate: rate,
                        time_span: self.time_span,
                    },
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn source(id: &str, lon: f64, mfd: Vec<(f64, f64)>) -> PointSource {
        PointSource {
            id: id.into(),
            tectonic_region_type: "Active Shallow Crust".into(),
            location: Point::new(lon, 0.0),
            depth: 10.0,
            mfd,
            time_span: 50.0,
        }
    }

    #[test]
    fn poisson_non_exceedance() {
        let occ = Occurrence::Poissonian {
            annual_rate: 0.01,
            time_span: 50.0,
        };
        assert_abs_diff_eq!(occ.probability_no_exceedance(0.5).unwrap(), (-0.25f64).exp());
        assert_eq!(occ.probability_no_exceedance(0.0).unwrap(), 1.0);
        let np = Occurrence::NonParametric {
            probs_occur: vec![0.9, 0.1],
        };
        assert!(np.probability_no_exceedance(0.5).is_err());
    }

    #[test]
    fn far_sources_are_pruned() {
        let site = Site {
            id: 0,
            location: Point::new(0.0, 0.0),
        };
        // one degree on the equator is ~111 km
        let sources = vec![
            source("near", 0.5, vec![(5.0, 0.01), (6.0, 0.001)]),
            source("far", 5.0, vec![(5.0, 0.01)]),
        ];
        let near = ruptures_near_site(&sources, &site, 100.0).unwrap();
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].source.source_id(), "near");
        assert_eq!(near[0].ruptures.len(), 2);
        assert!(ruptures_near_site(&sources, &site, 10.0).unwrap().is_empty());
    }

    #[test]
    fn rupture_errors_name_the_source() {
        let site = Site {
            id: 0,
            location: Point::new(0.0, 0.0),
        };
        let sources = vec![source("broken", 0.1, vec![(5.0, f64::NAN)])];
        match ruptures_near_site(&sources, &site, 100.0) {
            Err(DisaggError::Source { source_id, .. }) => assert_eq!(source_id, "broken"),
            other => panic!("unexpected {:?}", other.map(|v| v.len())),
        }
    }
}
