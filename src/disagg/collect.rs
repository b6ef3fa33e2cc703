//! Per-rupture contributions for one site and their arrangement into
//! partial matrices.

use std::sync::Arc;

use ahash::AHashMap;
use itertools::iproduct;
use tracing::{debug, info};

use crate::config::DisaggConfig;
use crate::error::Result;
use crate::gmm::{self, EpsilonProbs};
use crate::hazard_curve::CurveTable;
use crate::logic_tree::{Realization, TrtMap};
use crate::source::{Rupture, SeismicSource, Site, SourceRuptures, ruptures_near_site};

use super::arrange::{arrange_in_bins, rupture_cells};
use super::edges::BinEdges;
use super::reduce::{DisaggResults, Poe, ResultKey};

/// (realization, target poe, imt) for which a non-exceedance is computed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContribKey {
    pub rlz: usize,
    pub poe: Poe,
    pub imt: Arc<str>,
}

/// Per-epsilon non-exceedance of one rupture at the level `iml`.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedPne {
    pub iml: f64,
    pub pnes: EpsilonProbs,
}

/// One rupture near the site.
#[derive(Debug, Clone, PartialEq)]
pub struct RuptureContribution {
    pub mag: f64,
    /// Joyner-Boore, km
    pub dist: f64,
    pub lon: f64,
    pub lat: f64,
    pub trt: usize,
    pub pnes: AHashMap<ContribKey, KeyedPne>,
}

/// Read-only state shared by every task of a (branch, site).
#[derive(Debug, Clone, Copy)]
pub struct CollectContext<'a> {
    pub cfg: &'a DisaggConfig,
    pub trts: &'a TrtMap,
    pub realizations: &'a [Realization],
    pub edges: &'a BinEdges,
    pub curves: &'a CurveTable,
}

/// A key together with the intensity level read off its hazard curve.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub key: ContribKey,
    pub iml: f64,
}

/// Interpolated levels for every (poe, imt, realization) with a curve at
/// the site. Missing or all-zero curves contribute no target.
pub fn disagg_targets(site: &Site, ctx: &CollectContext<'_>) -> Result<Vec<Target>> {
    let mut out = Vec::new();
    for (&poe, imt, rlz) in iproduct!(
        ctx.cfg.poes_disagg.iter(),
        ctx.cfg.imts(),
        ctx.realizations.iter()
    ) {
        let Some(curve) = ctx.curves.get(site.id, rlz.id, imt) else {
            debug!(site = site.id, rlz = rlz.id, imt, "no hazard curve, key skipped");
            continue;
        };
        let iml = curve.iml_for_poe(poe, ctx.cfg.curve_extrapolation)?;
        out.push(Target {
            key: ContribKey {
                rlz: rlz.id,
                poe: Poe::new(poe),
                imt: Arc::from(imt),
            },
            iml,
        });
    }
    Ok(out)
}

fn source_contributions<S: SeismicSource>(
    group: &SourceRuptures<'_, S>,
    site: &Site,
    targets: &[Target],
    ctx: &CollectContext<'_>,
) -> Result<Vec<RuptureContribution>> {
    let trt_name = group.source.tectonic_region_type();
    let trt = ctx.trts.index_of(trt_name)?;
    let (tl, n_eps) = (ctx.cfg.truncation_level, ctx.cfg.num_epsilon_bins);

    let mut out = Vec::with_capacity(group.ruptures.len());
    for rupture in &group.ruptures {
        let dist = rupture.joyner_boore_distance(&site.location);
        let closest = rupture.closest_point(&site.location);
        let mut pnes = AHashMap::with_capacity(targets.len());
        for rlz in ctx.realizations {
            let gsim = rlz.gsim(trt_name)?;
            for target in targets.iter().filter(|t| t.key.rlz == rlz.id) {
                let (mean, stddev) = gsim.mean_and_stddev(rupture.mag(), dist, &target.key.imt)?;
                let poes = gmm::epsilon_band_poes(mean, stddev, target.iml, tl, n_eps)?;
                let band_pnes = poes
                    .iter()
                    .map(|&p| rupture.occurrence().probability_no_exceedance(p))
                    .collect::<Result<EpsilonProbs>>()?;
                pnes.insert(
                    target.key.clone(),
                    KeyedPne {
                        iml: target.iml,
                        pnes: band_pnes,
                    },
                );
            }
        }
        out.push(RuptureContribution {
            mag: rupture.mag(),
            dist,
            lon: closest.lon,
            lat: closest.lat,
            trt,
            pnes,
        });
    }
    Ok(out)
}

/// Contributions of every rupture in `near`; a failure is reported with the
/// id of the source being processed.
pub fn collect_bins_data<S: SeismicSource>(
    near: &[SourceRuptures<'_, S>],
    site: &Site,
    targets: &[Target],
    ctx: &CollectContext<'_>,
) -> Result<Vec<RuptureContribution>> {
    let mut out = Vec::new();
    for group in near {
        let contribs = source_contributions(group, site, targets, ctx)
            .map_err(|e| e.in_source(group.source.source_id()))?;
        out.extend(contribs);
    }
    Ok(out)
}

/// Partial matrices of `sources` at `site`, one per result key.
///
/// Empty when no rupture lies within the maximum distance or no hazard
/// curve is available; neither is an error.
pub fn collect_contributions<S: SeismicSource>(
    sources: &[S],
    site: &Site,
    ctx: &CollectContext<'_>,
) -> Result<DisaggResults> {
    let mut out = DisaggResults::new();
    let targets = disagg_targets(site, ctx)?;
    if targets.is_empty() {
        return Ok(out);
    }
    let near = ruptures_near_site(sources, site, ctx.cfg.maximum_distance)?;
    if near.is_empty() {
        return Ok(out);
    }
    let n_ruptures: usize = near.iter().map(|g| g.ruptures.len()).sum();
    info!(
        site = site.id,
        lon = site.location.lon,
        lat = site.location.lat,
        "collecting bins from {} ruptures close to the site",
        n_ruptures
    );

    let contribs = collect_bins_data(&near, site, &targets, ctx)?;
    let n_trts = ctx.trts.len();
    let cells = rupture_cells(&contribs, ctx.edges, n_trts)?;
    for target in &targets {
        let Some(matrix) = arrange_in_bins(&contribs, &cells, &target.key, ctx.edges, n_trts)? else {
            continue;
        };
        let key = ResultKey {
            site_id: site.id,
            rlz_id: target.key.rlz,
            poe: target.key.poe,
            imt: target.key.imt.clone(),
            trt_names: ctx.trts.names().clone(),
        };
        out.insert_or_merge(key, matrix)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DisaggError;
    use crate::geo::Point;
    use crate::gmm::{GroundMotionModel, LogLinearCoeffs, LogLinearGmpe};
    use crate::hazard_curve::{HazardCurve, InterpScale};
    use crate::source::PointSource;
    use approx::assert_abs_diff_eq;

    const TRT: &str = "Active Shallow Crust";

    fn gmpe() -> Arc<dyn GroundMotionModel> {
        Arc::new(LogLinearGmpe::new().with_imt(
            "PGA",
            LogLinearCoeffs {
                c0: -1.0,
                c1: 0.6,
                c2: -1.1,
                c3: 10.0,
                sigma: 0.6,
            },
        ))
    }

    fn realization() -> Realization {
        let mut gsims = AHashMap::new();
        gsims.insert(TRT.to_string(), gmpe());
        Realization {
            id: 0,
            weight: 1.0,
            gsims,
        }
    }

    fn cfg() -> DisaggConfig {
        DisaggConfig {
            mag_bin_width: 0.5,
            distance_bin_width: 10.0,
            coordinate_bin_width: 0.5,
            truncation_level: 3.0,
            num_epsilon_bins: 3,
            maximum_distance: 100.0,
            poes_disagg: vec![0.1],
            intensity_measure_types_and_levels: vec![("PGA".into(), vec![0.01, 0.1, 0.5, 1.0])],
            ..DisaggConfig::default()
        }
    }

    fn curves() -> CurveTable {
        let mut t = CurveTable::new();
        t.insert(
            0,
            0,
            "PGA",
            HazardCurve::new(
                vec![0.01, 0.1, 0.5, 1.0],
                vec![0.9, 0.3, 0.02, 0.001],
                InterpScale::Log,
            )
            .unwrap(),
        );
        t
    }

    fn source(id: &str, lon: f64, trt: &str) -> PointSource {
        PointSource {
            id: id.into(),
            tectonic_region_type: trt.into(),
            location: Point::new(lon, 0.1),
            depth: 10.0,
            mfd: vec![(5.25, 0.02), (6.25, 0.004)],
            time_span: 50.0,
        }
    }

    fn edges(cfg: &DisaggConfig) -> BinEdges {
        BinEdges {
            mag: vec![5.0, 5.5, 6.0, 6.5],
            dist: vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0],
            lon: vec![0.0, 0.5],
            lat: vec![0.0, 0.5],
            eps: cfg.eps_edges(),
        }
    }

    fn site(id: usize) -> Site {
        Site {
            id,
            location: Point::new(0.0, 0.0),
        }
    }

    #[test]
    fn contributions_land_in_their_magnitude_bins() {
        let cfg = cfg();
        let trts = TrtMap::new(vec![TRT.into()]).unwrap();
        let rlzs = vec![realization()];
        let e = edges(&cfg);
        let curves = curves();
        let ctx = CollectContext {
            cfg: &cfg,
            trts: &trts,
            realizations: &rlzs,
            edges: &e,
            curves: &curves,
        };
        let out = collect_contributions(&[source("a", 0.2, TRT)], &site(0), &ctx).unwrap();
        assert_eq!(out.len(), 1);
        let key = out.keys().next().unwrap().clone();
        assert_eq!(key.site_id, 0);
        assert_eq!(&*key.imt, "PGA");
        assert_eq!(key.poe.value(), 0.1);
        let m = out.get(&key).unwrap();
        let iml = curves.get(0, 0, "PGA").unwrap().iml_for_poe(0.1, cfg.curve_extrapolation).unwrap();
        assert_abs_diff_eq!(m.iml(), iml);
        assert_eq!(m.shape(), [3, 5, 1, 1, 1, 3]);
        // ~25 km from the site
        let poes = m.poes();
        let big: f64 = poes.slice(ndarray::s![2, 2, 0, 0, 0, ..]).sum();
        let small: f64 = poes.slice(ndarray::s![0, 2, 0, 0, 0, ..]).sum();
        assert!(big > 0.0 && small > 0.0);
        assert_eq!(poes.slice(ndarray::s![1, .., .., .., .., ..]).sum(), 0.0);
        assert!(poes.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn far_site_yields_no_key() {
        let cfg = cfg();
        let trts = TrtMap::new(vec![TRT.into()]).unwrap();
        let rlzs = vec![realization()];
        let e = edges(&cfg);
        let curves = curves();
        let ctx = CollectContext {
            cfg: &cfg,
            trts: &trts,
            realizations: &rlzs,
            edges: &e,
            curves: &curves,
        };
        let out = collect_contributions(&[source("far", 5.0, TRT)], &site(0), &ctx).unwrap();
        assert!(out.is_empty());
        // site without curves
        let out = collect_contributions(&[source("a", 0.2, TRT)], &site(1), &ctx).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn failures_are_attributed_to_the_source() {
        let cfg = cfg();
        let trts = TrtMap::new(vec![TRT.into(), "Stable Continental".into()]).unwrap();
        // the realization has no model for the second region
        let rlzs = vec![realization()];
        let e = edges(&cfg);
        let curves = curves();
        let ctx = CollectContext {
            cfg: &cfg,
            trts: &trts,
            realizations: &rlzs,
            edges: &e,
            curves: &curves,
        };
        let sources = vec![source("ok", 0.2, TRT), source("stable-1", 0.3, "Stable Continental")];
        match collect_contributions(&sources, &site(0), &ctx) {
            Err(DisaggError::Source { source_id, message }) => {
                assert_eq!(source_id, "stable-1");
                assert!(message.contains("Stable Continental"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
