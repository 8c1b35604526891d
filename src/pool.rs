//! Fixed-size worker pool for independent per-input work.

use anyhow::{Context, Result};
use rayon::prelude::*;

/// Run `work` over every input on a pool of `workers` threads.
///
/// Results come back in input order no matter which worker finished first.
/// Inputs share nothing, so there is no synchronisation beyond the join.
pub fn map_independent<I, T, F>(inputs: Vec<I>, workers: usize, work: F) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(I) -> T + Send + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("hpi-worker-{i}"))
        .build()
        .context("Failed to start worker pool")?;

    Ok(pool.install(|| inputs.into_par_iter().map(work).collect()))
}
