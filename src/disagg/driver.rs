//! Job-level orchestration: validation, the edge pre-pass and the
//! map-reduce over (branch, source chunk) tasks.

use std::time::Instant;

use ahash::AHashSet;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::DisaggConfig;
use crate::error::{DisaggError, Result};
use crate::hazard_curve::CurveTable;
use crate::logic_tree::{Realization, TrtMap};
use crate::runtime;
use crate::source::{Rupture, SeismicSource, Site, ruptures_near_site};

use super::collect::{CollectContext, collect_contributions};
use super::edges::{BinEdges, EdgesByKey, MagRange, SiteBounds, build_bin_edges};
use super::reduce::{DisaggResults, MapReduce};

/// One logic-tree branch: its sources and the realizations sampling it.
///
/// Realization ids are global: two branches never share one.
#[derive(Debug, Clone)]
pub struct SourceModel<S> {
    pub id: usize,
    pub trts: TrtMap,
    pub sources: Vec<S>,
    pub realizations: Vec<Realization>,
}

/// Outcome of [`run_disaggregation`].
#[derive(Debug, Clone)]
pub struct DisaggRun {
    pub edges: EdgesByKey,
    pub results: DisaggResults,
}

/// Rejects a job the disaggregation cannot run, before any computation.
pub fn validate_job<S: SeismicSource>(cfg: &DisaggConfig, models: &[SourceModel<S>]) -> Result<()> {
    cfg.validate()?;
    let mut rlz_ids = AHashSet::new();
    for model in models {
        if let Some(src) = model.sources.iter().find(|s| !s.is_parametric()) {
            return Err(DisaggError::config(format!(
                "source {} in branch {} has non-parametric ruptures, which cannot be disaggregated",
                src.source_id(),
                model.id
            )));
        }
        for rlz in &model.realizations {
            if !rlz_ids.insert(rlz.id) {
                return Err(DisaggError::config(format!(
                    "realization {} appears in more than one branch",
                    rlz.id
                )));
            }
        }
    }
    Ok(())
}

fn branch_mag_range<S: SeismicSource>(sources: &[S]) -> Result<Option<MagRange>> {
    let mut range = None;
    for src in sources {
        let ruptures = src.ruptures().map_err(|e| e.in_source(src.source_id()))?;
        for rup in &ruptures {
            range = MagRange::update(range, rup.mag());
        }
    }
    Ok(range)
}

fn site_bounds<S: SeismicSource>(sources: &[S], site: &Site, cfg: &DisaggConfig) -> Result<SiteBounds> {
    let mut bounds = SiteBounds::default();
    for group in ruptures_near_site(sources, site, cfg.maximum_distance)? {
        for rup in &group.ruptures {
            bounds.update(
                rup.joyner_boore_distance(&site.location),
                rup.closest_point(&site.location),
            );
        }
    }
    Ok(bounds)
}

/// Bin edges for every (branch, site) worth disaggregating.
///
/// Sites without hazard curves or without ruptures within the maximum
/// distance get no entry and are skipped by the main pass.
pub fn build_edges<S: SeismicSource>(
    cfg: &DisaggConfig,
    sites: &[Site],
    models: &[SourceModel<S>],
    curves: &CurveTable,
) -> Result<EdgesByKey> {
    let mut out = EdgesByKey::default();
    for model in models {
        let mags = branch_mag_range(&model.sources)?;
        let per_site: Vec<(usize, Option<BinEdges>)> = sites
            .par_iter()
            .map(|site| {
                if !curves.has_site(site.id) {
                    warn!(site = site.id, "no usable hazard curves, site skipped");
                    return Ok((site.id, None));
                }
                let bounds = site_bounds(&model.sources, site, cfg)?;
                Ok((site.id, build_bin_edges(&bounds, mags, cfg)?))
            })
            .collect::<Result<_>>()?;
        for (site_id, edges) in per_site {
            match edges {
                Some(edges) => {
                    let shape = edges.shape(model.trts.len());
                    info!(branch = model.id, site = site_id, ?shape, "disaggregation matrix shape");
                    out.insert((model.id, site_id), edges);
                }
                None => info!(
                    branch = model.id,
                    site = site_id,
                    "no ruptures within {} km, site skipped",
                    cfg.maximum_distance
                ),
            }
        }
    }
    Ok(out)
}

/// Runs the whole disaggregation: edges pre-pass, then one task per
/// (branch, chunk of `sources_per_task` sources), folded with
/// [`DisaggResults::merge`].
pub fn run_disaggregation<S, M>(
    cfg: &DisaggConfig,
    sites: &[Site],
    models: &[SourceModel<S>],
    curves: &CurveTable,
    executor: &M,
) -> Result<DisaggRun>
where
    S: SeismicSource,
    M: MapReduce,
{
    validate_job(cfg, models)?;
    let t0 = Instant::now();
    let edges = build_edges(cfg, sites, models, curves)?;

    let mut tasks: Vec<(usize, &[S])> = Vec::new();
    for (idx, model) in models.iter().enumerate() {
        if !sites.iter().any(|s| edges.contains_key(&(model.id, s.id))) {
            continue;
        }
        tasks.extend(model.sources.chunks(cfg.sources_per_task).map(|c| (idx, c)));
    }
    info!(
        tasks = tasks.len(),
        sites = sites.len(),
        branches = models.len(),
        "submitting disaggregation tasks"
    );

    let edges_ref = &edges;
    let results = executor.map_reduce(
        tasks,
        |(idx, chunk)| {
            let model = &models[idx];
            let mut acc = DisaggResults::new();
            for site in sites {
                let Some(site_edges) = edges_ref.get(&(model.id, site.id)) else {
                    continue;
                };
                let ctx = CollectContext {
                    cfg,
                    trts: &model.trts,
                    realizations: &model.realizations,
                    edges: site_edges,
                    curves,
                };
                acc = acc.merge(collect_contributions(chunk, site, &ctx)?)?;
            }
            Ok(acc)
        },
        DisaggResults::new,
        DisaggResults::merge,
    )?;

    info!(
        keys = results.len(),
        "disaggregation finished in {:.3}s",
        t0.elapsed().as_secs_f64()
    );
    runtime::report_memory("reduce");
    Ok(DisaggRun { edges, results })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disagg::reduce::{RayonMapReduce, SequentialMapReduce};
    use crate::geo::Point;
    use crate::gmm::{GroundMotionModel, LogLinearCoeffs, LogLinearGmpe};
    use crate::hazard_curve::{HazardCurve, InterpScale};
    use crate::source::PointSource;
    use ahash::AHashMap;
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    const TRT: &str = "Active Shallow Crust";

    fn realization(id: usize) -> Realization {
        let gmm: Arc<dyn GroundMotionModel> = Arc::new(LogLinearGmpe::new().with_imt(
            "PGA",
            LogLinearCoeffs {
                c0: -1.0,
                c1: 0.6,
                c2: -1.1,
                c3: 10.0,
                sigma: 0.6,
            },
        ));
        let mut gsims = AHashMap::new();
        gsims.insert(TRT.to_string(), gmm);
        Realization {
            id,
            weight: 1.0,
            gsims,
        }
    }

    fn cfg(sources_per_task: usize) -> DisaggConfig {
        DisaggConfig {
            coordinate_bin_width: 0.5,
            num_epsilon_bins: 3,
            maximum_distance: 100.0,
            intensity_measure_types_and_levels: vec![("PGA".into(), vec![0.01, 0.1, 0.5, 1.0])],
            sources_per_task,
            ..DisaggConfig::default()
        }
    }

    fn point_source(i: usize, lon: f64, lat: f64) -> PointSource {
        PointSource {
            id: format!("src-{i}"),
            tectonic_region_type: TRT.into(),
            location: Point::new(lon, lat),
            depth: 10.0,
            mfd: vec![(5.25, 0.02), (5.75, 0.01), (6.75, 0.002)],
            time_span: 50.0,
        }
    }

    fn model() -> SourceModel<PointSource> {
        SourceModel {
            id: 0,
            trts: TrtMap::new(vec![TRT.into()]).unwrap(),
            sources: vec![
                point_source(0, 0.2, 0.1),
                point_source(1, -0.3, 0.2),
                point_source(2, 0.1, -0.4),
                point_source(3, 0.5, 0.5),
                point_source(4, 8.0, 8.0),
            ],
            realizations: vec![realization(0), realization(1)],
        }
    }

    fn sites() -> Vec<Site> {
        vec![
            Site {
                id: 0,
                location: Point::new(0.0, 0.0),
            },
            Site {
                id: 1,
                location: Point::new(0.1, 0.1),
            },
            // no curves
            Site {
                id: 2,
                location: Point::new(0.0, 0.2),
            },
            // no ruptures nearby
            Site {
                id: 3,
                location: Point::new(30.0, 30.0),
            },
        ]
    }

    fn curves() -> CurveTable {
        let mut t = CurveTable::new();
        for site in [0, 1, 3] {
            for rlz in [0, 1] {
                t.insert(
                    site,
                    rlz,
                    "PGA",
                    HazardCurve::new(
                        vec![0.01, 0.1, 0.5, 1.0],
                        vec![0.9, 0.3 + 0.05 * rlz as f64, 0.02, 0.001],
                        InterpScale::Log,
                    )
                    .unwrap(),
                );
            }
        }
        t
    }

    fn assert_same(a: &DisaggResults, b: &DisaggResults) {
        assert_eq!(a.len(), b.len());
        for (key, m) in a.sorted() {
            let other = b.get(key).unwrap();
            assert_eq!(m.shape(), other.shape());
            for (x, y) in m.non_exceedance().iter().zip(other.non_exceedance().iter()) {
                assert_abs_diff_eq!(x, y, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn chunking_and_scheduling_do_not_change_results() {
        let (sites, models, curves) = (sites(), vec![model()], curves());
        let whole = run_disaggregation(&cfg(100), &sites, &models, &curves, &SequentialMapReduce).unwrap();
        let chunked = run_disaggregation(&cfg(1), &sites, &models, &curves, &SequentialMapReduce).unwrap();
        let parallel = run_disaggregation(
            &cfg(2),
            &sites,
            &models,
            &curves,
            &RayonMapReduce { progress: false },
        )
        .unwrap();
        assert_eq!(whole.edges, chunked.edges);
        // 2 sites x 2 realizations x 1 poe x 1 imt
        assert_eq!(whole.results.len(), 4);
        assert_same(&whole.results, &chunked.results);
        assert_same(&whole.results, &parallel.results);
    }

    #[test]
    fn skipped_sites_have_no_edges_and_no_keys() {
        let (sites, models, curves) = (sites(), vec![model()], curves());
        let run = run_disaggregation(&cfg(2), &sites, &models, &curves, &SequentialMapReduce).unwrap();
        assert!(run.edges.contains_key(&(0, 0)));
        assert!(run.edges.contains_key(&(0, 1)));
        assert!(!run.edges.contains_key(&(0, 2)));
        assert!(!run.edges.contains_key(&(0, 3)));
        assert!(run.results.keys().all(|k| k.site_id < 2));
    }

    #[test]
    fn magnitude_edges_span_the_whole_branch() {
        let (sites, models, curves) = (sites(), vec![model()], curves());
        let edges = build_edges(&cfg(1), &sites, &models, &curves).unwrap();
        let e = edges.get(&(0, 0)).unwrap();
        assert_eq!(e.mag, vec![5.0, 5.5, 6.0, 6.5, 7.0]);
        assert_eq!(e.eps.len(), 4);
        // nearest rupture ~25 km away, farthest ~79 km
        assert_eq!(e.dist.first(), Some(&20.0));
        assert_eq!(e.dist.last(), Some(&80.0));
    }

    #[derive(Debug)]
    struct NonParametric(PointSource);

    impl SeismicSource for NonParametric {
        type Rupture = crate::source::PointRupture;

        fn source_id(&self) -> &str {
            self.0.source_id()
        }

        fn tectonic_region_type(&self) -> &str {
            self.0.tectonic_region_type()
        }

        fn distance_to(&self, site: &Point) -> f64 {
            self.0.distance_to(site)
        }

        fn ruptures(&self) -> Result<Vec<Self::Rupture>> {
            self.0.ruptures()
        }

        fn is_parametric(&self) -> bool {
            false
        }
    }

    #[test]
    fn non_parametric_sources_fail_before_computing() {
        let models = vec![SourceModel {
            id: 0,
            trts: TrtMap::new(vec![TRT.into()]).unwrap(),
            sources: vec![NonParametric(point_source(9, 0.2, 0.1))],
            realizations: vec![realization(0)],
        }];
        let err = run_disaggregation(&cfg(1), &sites(), &models, &curves(), &SequentialMapReduce)
            .unwrap_err();
        match err {
            DisaggError::Config(msg) => assert!(msg.contains("src-9"), "{msg}"),
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn realization_ids_must_be_unique_across_branches() {
        let mut second = model();
        second.id = 1;
        let err = validate_job(&cfg(1), &[model(), second]).unwrap_err();
        assert!(matches!(err, DisaggError::Config(_)));
    }
}
