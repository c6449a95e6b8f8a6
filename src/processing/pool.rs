//! Short-lived worker pools for fan-out over independent input segments.

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};

/// Default pool width.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Whether and how wide to fan out work for a single call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parallelism {
    /// Allow parallel execution once an input crosses its threshold.
    pub enabled: bool,
    /// Number of worker threads in the per-call pool.
    pub max_workers: usize,
}

impl Parallelism {
    /// Parallel execution with `max_workers` threads.
    pub fn new(max_workers: usize) -> Self {
        Self {
            enabled: true,
            max_workers: max_workers.max(1),
        }
    }

    /// Always run on the calling thread.
    pub fn sequential() -> Self {
        Self {
            enabled: false,
            max_workers: 1,
        }
    }

    /// True when an input of `size` items is above `threshold` and parallelism is enabled.
    pub fn applies(&self, size: usize, threshold: usize) -> bool {
        self.enabled && size > threshold
    }
}

impl Default for Parallelism {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WORKERS)
    }
}

fn build_pool(workers: usize) -> Result<ThreadPool, ThreadPoolBuildError> {
    ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|index| format!("ingest-worker-{index}"))
        .build()
}

/// Apply `f` to every item on a fresh pool and return results in input order.
///
/// The pool lives only for the duration of the call. Results are gathered positionally, so
/// scheduling never affects output order. The first error aborts the whole call.
pub(crate) fn try_map_ordered<T, R, E, F>(items: &[T], workers: usize, f: F) -> Result<Vec<R>, E>
where
    T: Sync,
    R: Send,
    E: Send + From<ThreadPoolBuildError>,
    F: Fn(&T) -> Result<R, E> + Sync + Send,
{
    let pool = build_pool(workers)?;
    tracing::trace!(items = items.len(), workers, "Fanning out to worker pool");
    pool.install(|| items.par_iter().map(|item| f(item)).collect())
}
