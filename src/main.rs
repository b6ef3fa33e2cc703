use anyhow::{Context, Result, bail};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

use hazard_disagg::config::DisaggConfig;
use hazard_disagg::disagg::{NpzResultStore, RayonMapReduce, ResultStore, load_inputs, run_disaggregation};
use hazard_disagg::runtime;

struct RunArgs {
    input: PathBuf,
    results_out: PathBuf,
}

fn usage() -> ! {
    eprintln!("usage: disagg <inputs.npz> [results.npz]");
    std::process::exit(1);
}

fn default_results_path(input: &Path) -> PathBuf {
    let parent = input
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("results");
    parent.join(format!("{stem}_disagg.npz"))
}

fn parse_args() -> Result<RunArgs> {
    let mut args = env::args().skip(1);
    let first = args.next().unwrap_or_else(|| usage());
    if first == "-h" || first == "--help" {
        usage();
    }

    let input = PathBuf::from(first);
    if !input.exists() {
        bail!("input {:?} does not exist", input);
    }

    let results_out = if let Some(explicit) = args.next() {
        PathBuf::from(explicit)
    } else if let Ok(from_env) = env::var("DISAGG_RESULTS_PATH") {
        PathBuf::from(from_env)
    } else {
        default_results_path(&input)
    };

    Ok(RunArgs { input, results_out })
}

fn main() -> Result<()> {
    runtime::init_logging();
    runtime::configure_thread_pool();

    let args = parse_args()?;
    info!("reading inputs from {}", args.input.display());
    let input_path = args.input.to_string_lossy().into_owned();
    let inputs = load_inputs(&input_path, DisaggConfig::default())
        .with_context(|| format!("load {}", args.input.display()))?;
    let cfg = inputs
        .cfg
        .clone()
        .with_env_overrides()
        .context("apply DISAGG_* overrides")?;

    let run = run_disaggregation(
        &cfg,
        &inputs.sites,
        std::slice::from_ref(&inputs.model),
        &inputs.curves,
        &RayonMapReduce { progress: true },
    )
    .context("disaggregation failed")?;

    if let Some(parent) = args.results_out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create dir {}", parent.display()))?;
        }
    }
    let mut store = NpzResultStore::new(&args.results_out);
    store
        .save(&run)
        .with_context(|| format!("write {}", args.results_out.display()))?;
    info!(
        keys = run.results.len(),
        "results cached at {}",
        store.path().display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_path_sits_next_to_the_input() {
        assert_eq!(
            default_results_path(Path::new("/data/job.npz")),
            PathBuf::from("/data/job_disagg.npz")
        );
        assert_eq!(
            default_results_path(Path::new("job.npz")),
            PathBuf::from("./job_disagg.npz")
        );
    }
}
