//! NPZ input bundle and result store.
//!
//! Input bundle (all names carry the `.npy` suffix inside the archive):
//!
//! | name | dtype | content |
//! |------|-------|---------|
//! | `meta_investigation_time` | f64 `[1]` | years |
//! | `meta_poes_disagg` | f64 | target poes |
//! | `meta_imt_data`, `meta_imt_indptr` | u8, i64 | imt names, CSR packed |
//! | `imt{k}_imls` | f64 | curve levels of imt `k` |
//! | `meta_trt_data`, `meta_trt_indptr` | u8, i64 | tectonic region names |
//! | `site_lons`, `site_lats` | f64 | one entry per site |
//! | `src_lons`, `src_lats`, `src_depths` | f64 | point sources |
//! | `src_trt` | i32 | index into the region names |
//! | `src_mfd_indptr`, `src_mags`, `src_rates` | i64, f64, f64 | magnitude-frequency bins per source |
//! | `rlz_gmpe` | f64 `[n_rlz, n_trt, n_imt, 5]` | `c0 c1 c2 c3 sigma` |
//! | `rlz_weights` | f64, optional | defaults to uniform |
//! | `curve_s{s}_r{r}_i{k}` | f64, optional | poes on `imt{k}_imls` |

use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ahash::{AHashMap, AHashSet};
use ndarray::{Array1, Array4};
use ndarray_npy::{NpzReader, NpzWriter};
use tracing::{debug, info};

use crate::config::DisaggConfig;
use crate::error::{DisaggError, Result};
use crate::geo::Point;
use crate::gmm::{GroundMotionModel, LogLinearCoeffs, LogLinearGmpe};
use crate::hazard_curve::{CurveTable, HazardCurve};
use crate::logic_tree::{Realization, TrtMap};
use crate::source::{PointSource, Site};

use super::driver::{DisaggRun, SourceModel};
use super::pmf::pmf_map;

/// Everything a CLI run needs, read from one bundle.
#[derive(Debug, Clone)]
pub struct DisaggInputs {
    pub cfg: DisaggConfig,
    pub sites: Vec<Site>,
    pub model: SourceModel<PointSource>,
    pub curves: CurveTable,
}

struct Bundle<R: Read + Seek> {
    path: String,
    npz: NpzReader<R>,
    names: AHashSet<String>,
}

impl<R: Read + Seek> Bundle<R> {
    fn new(path: &str, reader: R) -> Result<Self> {
        let mut npz = NpzReader::new(reader).map_err(|e| DisaggError::npz(path, e))?;
        let names = npz
            .names()
            .map_err(|e| DisaggError::npz(path, e))?
            .into_iter()
            .collect();
        Ok(Self {
            path: path.to_string(),
            npz,
            names,
        })
    }

    fn has(&self, name: &str) -> bool {
        self.names.contains(&format!("{name}.npy"))
    }

    fn f64s(&mut self, name: &str) -> Result<Array1<f64>> {
        self.npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| DisaggError::npz(&self.path, format!("missing {name}: {e}")))
    }

    fn i64s(&mut self, name: &str) -> Result<Array1<i64>> {
        self.npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| DisaggError::npz(&self.path, format!("missing {name}: {e}")))
    }

    fn i32s(&mut self, name: &str) -> Result<Array1<i32>> {
        self.npz
            .by_name(&format!("{name}.npy"))
            .map_err(|e| DisaggError::npz(&self.path, format!("missing {name}: {e}")))
    }

    fn strings(&mut self, prefix: &str) -> Result<Vec<String>> {
        let data: Array1<u8> = self
            .npz
            .by_name(&format!("{prefix}_data.npy"))
            .map_err(|e| DisaggError::npz(&self.path, format!("missing {prefix}_data: {e}")))?;
        let indptr = self.i64s(&format!("{prefix}_indptr"))?;
        let bytes = data.to_vec();
        indptr
            .as_slice()
            .unwrap_or(&[])
            .windows(2)
            .map(|w| {
                let (lo, hi) = (w[0] as usize, w[1] as usize);
                let chunk = bytes.get(lo..hi).ok_or_else(|| {
                    DisaggError::npz(&self.path, format!("{prefix}_indptr out of range"))
                })?;
                String::from_utf8(chunk.to_vec()).map_err(|e| DisaggError::npz(&self.path, e))
            })
            .collect()
    }
}

fn scalar(arr: &Array1<f64>, path: &str, name: &str) -> Result<f64> {
    arr.first()
        .copied()
        .ok_or_else(|| DisaggError::npz(path, format!("{name} is empty")))
}

/// Reads an input bundle; scalars not stored in it are taken from `base`.
pub fn load_inputs(path: &str, base: DisaggConfig) -> Result<DisaggInputs> {
    let f = File::open(path)?;
    let mut b = Bundle::new(path, f)?;

    let investigation_time = scalar(&b.f64s("meta_investigation_time")?, path, "meta_investigation_time")?;
    let poes_disagg = b.f64s("meta_poes_disagg")?.to_vec();
    let imt_names = b.strings("meta_imt")?;
    let mut imts = Vec::with_capacity(imt_names.len());
    for (k, name) in imt_names.into_iter().enumerate() {
        let imls = b.f64s(&format!("imt{k}_imls"))?.to_vec();
        imts.push((name, imls));
    }
    let cfg = DisaggConfig {
        investigation_time,
        poes_disagg,
        intensity_measure_types_and_levels: imts,
        ..base
    };

    let trt_names = b.strings("meta_trt")?;
    let trts = TrtMap::new(trt_names.clone())?;

    let site_lons = b.f64s("site_lons")?;
    let site_lats = b.f64s("site_lats")?;
    if site_lons.len() != site_lats.len() {
        return Err(DisaggError::npz(path, "site_lons and site_lats differ in length"));
    }
    let sites: Vec<Site> = site_lons
        .iter()
        .zip(site_lats.iter())
        .enumerate()
        .map(|(id, (&lon, &lat))| Site {
            id,
            location: Point::new(lon, lat),
        })
        .collect();

    let sources = load_sources(&mut b, &trt_names, investigation_time)?;
    let realizations = load_realizations(&mut b, &trt_names, &cfg)?;

    let mut curves = CurveTable::new();
    for site in &sites {
        for rlz in &realizations {
            for (k, (imt, imls)) in cfg.intensity_measure_types_and_levels.iter().enumerate() {
                let name = format!("curve_s{}_r{}_i{k}", site.id, rlz.id);
                if !b.has(&name) {
                    debug!(site = site.id, rlz = rlz.id, imt = imt.as_str(), "no curve in bundle");
                    continue;
                }
                let poes = b.f64s(&name)?.to_vec();
                let curve = HazardCurve::new(imls.clone(), poes, cfg.curve_scale)?;
                curves.insert(site.id, rlz.id, imt, curve);
            }
        }
    }

    info!(
        path,
        sites = sites.len(),
        sources = sources.len(),
        realizations = realizations.len(),
        curves = curves.len(),
        "inputs loaded"
    );
    Ok(DisaggInputs {
        cfg,
        sites,
        model: SourceModel {
            id: 0,
            trts,
            sources,
            realizations,
        },
        curves,
    })
}

fn load_sources<R: Read + Seek>(
    b: &mut Bundle<R>,
    trt_names: &[String],
    time_span: f64,
) -> Result<Vec<PointSource>> {
    let lons = b.f64s("src_lons")?;
    let lats = b.f64s("src_lats")?;
    let depths = b.f64s("src_depths")?;
    let trt_idx = b.i32s("src_trt")?;
    let indptr = b.i64s("src_mfd_indptr")?;
    let mags = b.f64s("src_mags")?;
    let rates = b.f64s("src_rates")?;

    let n = lons.len();
    if [lats.len(), depths.len(), trt_idx.len()].iter().any(|&l| l != n) || indptr.len() != n + 1 {
        return Err(DisaggError::npz(&b.path, "source arrays differ in length"));
    }
    (0..n)
        .map(|i| {
            let trt = usize::try_from(trt_idx[i])
                .ok()
                .and_then(|t| trt_names.get(t))
                .ok_or_else(|| {
                    DisaggError::npz(&b.path, format!("source {i} has unknown region index {}", trt_idx[i]))
                })?;
            let (lo, hi) = (indptr[i] as usize, indptr[i + 1] as usize);
            if lo > hi || hi > mags.len() || hi > rates.len() {
                return Err(DisaggError::npz(&b.path, format!("src_mfd_indptr out of range at {i}")));
            }
            let mfd = (lo..hi).map(|j| (mags[j], rates[j])).collect();
            Ok(PointSource {
                id: format!("src-{i}"),
                tectonic_region_type: trt.clone(),
                location: Point::new(lons[i], lats[i]),
                depth: depths[i],
                mfd,
                time_span,
            })
        })
        .collect()
}

fn load_realizations<R: Read + Seek>(
    b: &mut Bundle<R>,
    trt_names: &[String],
    cfg: &DisaggConfig,
) -> Result<Vec<Realization>> {
    let coeffs: Array4<f64> = b
        .npz
        .by_name("rlz_gmpe.npy")
        .map_err(|e| DisaggError::npz(&b.path, format!("missing rlz_gmpe: {e}")))?;
    let (n_rlz, n_trt, n_imt, n_coeff) = coeffs.dim();
    if n_trt != trt_names.len() || n_imt != cfg.intensity_measure_types_and_levels.len() || n_coeff != 5 {
        return Err(DisaggError::npz(
            &b.path,
            format!("rlz_gmpe has shape {:?}", coeffs.shape()),
        ));
    }
    let weights = if b.has("rlz_weights") {
        b.f64s("rlz_weights")?.to_vec()
    } else {
        vec![1.0 / n_rlz as f64; n_rlz]
    };
    if weights.len() != n_rlz {
        return Err(DisaggError::npz(&b.path, "rlz_weights does not match rlz_gmpe"));
    }

    let mut out = Vec::with_capacity(n_rlz);
    for (r, &weight) in weights.iter().enumerate() {
        let mut gsims: AHashMap<String, Arc<dyn GroundMotionModel>> = AHashMap::new();
        for (t, trt) in trt_names.iter().enumerate() {
            let mut gmpe = LogLinearGmpe::new();
            for (k, (imt, _)) in cfg.intensity_measure_types_and_levels.iter().enumerate() {
                let c = |i: usize| coeffs[[r, t, k, i]];
                gmpe = gmpe.with_imt(
                    imt,
                    LogLinearCoeffs {
                        c0: c(0),
                        c1: c(1),
                        c2: c(2),
                        c3: c(3),
                        sigma: c(4),
                    },
                );
            }
            gsims.insert(trt.clone(), Arc::new(gmpe));
        }
        out.push(Realization { id: r, weight, gsims });
    }
    Ok(out)
}

/// Destination of a finished run.
pub trait ResultStore {
    fn save(&mut self, run: &DisaggRun) -> Result<()>;
}

/// Writes one NPZ archive per run: for the `n`-th key in key order,
/// `k{n}_matrix` (exceedance), one `k{n}_{pmf}` per projection,
/// `k{n}_meta` (`site, rlz, poe, iml`), `k{n}_imt` and `k{n}_trts`
/// (newline separated); plus `edges_b{branch}_s{site}_{axis}` per edge set.
#[derive(Debug, Clone)]
pub struct NpzResultStore {
    path: PathBuf,
}

impl NpzResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultStore for NpzResultStore {
    fn save(&mut self, run: &DisaggRun) -> Result<()> {
        let path = self.path.to_string_lossy().into_owned();
        let err = |e: ndarray_npy::WriteNpzError| DisaggError::npz(&path, e);
        let f = File::create(&self.path)?;
        let mut npz = NpzWriter::new(f);

        let entries = run.results.sorted();
        npz.add_array("meta_num_keys.npy", &Array1::from_vec(vec![entries.len() as i64]))
            .map_err(err)?;
        for (n, (key, matrix)) in entries.iter().enumerate() {
            npz.add_array(format!("k{n}_matrix.npy"), &matrix.poes()).map_err(err)?;
            for (kind, pmf) in pmf_map(matrix) {
                npz.add_array(format!("k{n}_{}.npy", kind.name()), &pmf).map_err(err)?;
            }
            let meta = vec![key.site_id as f64, key.rlz_id as f64, key.poe.value(), matrix.iml()];
            npz.add_array(format!("k{n}_meta.npy"), &Array1::from_vec(meta)).map_err(err)?;
            npz.add_array(format!("k{n}_imt.npy"), &Array1::from_vec(key.imt.as_bytes().to_vec()))
                .map_err(err)?;
            let trts = key.trt_names.join("\n").into_bytes();
            npz.add_array(format!("k{n}_trts.npy"), &Array1::from_vec(trts)).map_err(err)?;
        }

        let mut edge_keys: Vec<&(usize, usize)> = run.edges.keys().collect();
        edge_keys.sort_unstable();
        for &(branch, site) in edge_keys {
            let Some(edges) = run.edges.get(&(branch, site)) else {
                continue;
            };
            let axes = [
                ("mag", &edges.mag),
                ("dist", &edges.dist),
                ("lon", &edges.lon),
                ("lat", &edges.lat),
                ("eps", &edges.eps),
            ];
            for (axis, values) in axes {
                npz.add_array(
                    format!("edges_b{branch}_s{site}_{axis}.npy"),
                    &Array1::from_vec(values.clone()),
                )
                .map_err(err)?;
            }
        }
        npz.finish().map_err(err)?;
        info!(path = %path, keys = entries.len(), "results written");
        Ok(())
    }
}
