//! Process-wide setup: rayon pool sizing, log subscriber, memory reporting.

use rayon::ThreadPoolBuilder;
use std::sync::Once;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const MB: u64 = 1024 * 1024;
const GB: u64 = 1024 * MB;

/// Environment variables consulted for the worker count, in priority order.
const THREAD_HINTS: [&str; 6] = [
    "DISAGG_THREADS",
    "RAYON_NUM_THREADS",
    "SLURM_CPUS_PER_TASK",
    "SLURM_CPUS_ON_NODE",
    "PBS_NP",
    "OMP_NUM_THREADS",
];

/// First positive count among [`THREAD_HINTS`], read through `lookup`,
/// together with the variable it came from.
fn threads_from_hints(lookup: impl Fn(&str) -> Option<String>) -> Option<(usize, &'static str)> {
    THREAD_HINTS.iter().find_map(|&key| {
        let count = lookup(key)?.trim().parse::<usize>().ok()?;
        (count > 0).then_some((count, key))
    })
}

/// Sizes the global rayon pool once from the environment (falling back to
/// the available parallelism) and returns the size in effect.
pub fn configure_thread_pool() -> usize {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let (count, hint) = threads_from_hints(|key| std::env::var(key).ok()).unwrap_or_else(|| {
            let n = std::thread::available_parallelism().map_or(1, |n| n.get());
            (n, "available_parallelism")
        });
        match ThreadPoolBuilder::new()
            .num_threads(count)
            .thread_name(|i| format!("disagg-worker-{i}"))
            .build_global()
        {
            Ok(_) => info!(threads = count, hint, "rayon pool configured"),
            Err(err) => warn!("failed to configure rayon pool ({err}); continuing with default"),
        }
    });
    rayon::current_num_threads()
}

/// Installs the stderr subscriber, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_budget_var(key: &str, multiplier: u64) -> Option<u64> {
    let raw = std::env::var(key).ok()?;
    raw.trim()
        .parse::<u64>()
        .ok()
        .map(|v| v.saturating_mul(multiplier))
}

fn memory_budget_bytes() -> Option<u64> {
    parse_budget_var("DISAGG_MAX_RSS_MB", MB).or_else(|| parse_budget_var("DISAGG_MAX_RSS_GB", GB))
}

/// Resident set size from `/proc/self/statm`; `None` off Linux.
pub fn current_rss_bytes() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/statm").ok()?;
    let mut parts = contents.split_whitespace();
    let _total = parts.next()?;
    let resident_pages: u64 = parts.next()?.parse().ok()?;
    // SAFETY: sysconf has no preconditions.
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if page_size <= 0 {
        return None;
    }
    Some(resident_pages.saturating_mul(page_size as u64))
}

fn bytes_to_gib(bytes: u64) -> f64 {
    bytes as f64 / GB as f64
}

/// Logs the current RSS, warning when it is above `DISAGG_MAX_RSS_*`.
pub fn report_memory(stage: &str) {
    let Some(rss) = current_rss_bytes() else {
        return;
    };
    match memory_budget_bytes() {
        Some(limit) if rss > limit => warn!(
            stage,
            "rss {:.2} GiB exceeds the configured limit of {:.2} GiB",
            bytes_to_gib(rss),
            bytes_to_gib(limit)
        ),
        _ => info!(stage, "rss {:.2} GiB", bytes_to_gib(rss)),
    }
}
