//! Execution strategies for per-unit tasks.
//!
//! Both strategies return results in the order of the input unit list and
//! wrap the first failure as [`Error::Aggregation`]. No partial results are
//! returned.

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::UnitId;

/// Runs one self-contained task per unit
pub trait Executor {
    fn run<T, F>(&self, unit_ids: &[UnitId], task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(UnitId) -> Result<T> + Send + Sync;
}

fn tag_failure<T>(unit: UnitId, result: Result<T>) -> Result<T> {
    result.map_err(|source| Error::Aggregation {
        unit,
        source: Box::new(source),
    })
}

/// Runs tasks one after another on the calling thread
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

impl Executor for Sequential {
    fn run<T, F>(&self, unit_ids: &[UnitId], task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(UnitId) -> Result<T> + Send + Sync,
    {
        unit_ids
            .iter()
            .map(|&unit| tag_failure(unit, task(unit)))
            .collect()
    }
}

/// Fixed-size pool of worker threads
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

impl Executor for WorkerPool {
    fn run<T, F>(&self, unit_ids: &[UnitId], task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(UnitId) -> Result<T> + Send + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("waveform-worker-{i}"))
            .build()?;

        // Indexed collect keeps input order; the first error stops the batch
        pool.install(|| {
            unit_ids
                .par_iter()
                .map(|&unit| tag_failure(unit, task(unit)))
                .collect()
        })
    }
}

/// Strategy selected from configuration
#[derive(Debug, Clone, Copy)]
pub enum ExecutionStrategy {
    Sequential(Sequential),
    WorkerPool(WorkerPool),
}

impl ExecutionStrategy {
    /// `n_jobs <= 1` runs sequentially
    pub fn from_jobs(n_jobs: usize) -> Self {
        if n_jobs <= 1 {
            Self::Sequential(Sequential)
        } else {
            Self::WorkerPool(WorkerPool::new(n_jobs))
        }
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::WorkerPool(_))
    }
}

impl Executor for ExecutionStrategy {
    fn run<T, F>(&self, unit_ids: &[UnitId], task: F) -> Result<Vec<T>>
    where
        T: Send,
        F: Fn(UnitId) -> Result<T> + Send + Sync,
    {
        match self {
            Self::Sequential(s) => s.run(unit_ids, task),
            Self::WorkerPool(p) => p.run(unit_ids, task),
        }
    }
}
