//! Load Generator
//!
//! Runs the cache-bound file loop concurrently with two CPU-bound kernels and
//! reports wall-clock time together with the cache metrics.

mod workload;

pub use workload::{
    ema, ema_workload, file_workload, random_graph, shortest_path_workload, shortest_paths,
    Graph, EMA_ALPHA, EMA_SAMPLES, GRAPH_DEGREE, GRAPH_VERTICES,
};

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::info;

use crate::cache::{CacheManager, MetricsSnapshot};
use crate::error::{Error, Result};

/// Benchmark configuration
#[derive(Debug, Clone)]
pub struct BenchConfig {
    /// EMA passes
    pub ema_repetitions: usize,
    /// Dijkstra runs
    pub sp_repetitions: usize,
    /// File loop iterations
    pub file_repetitions: usize,
    /// Backing file for the file loop
    pub path: PathBuf,
    /// Seed for sample data and graph generation
    pub seed: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ema_repetitions: 1000,
            sp_repetitions: 100,
            file_repetitions: 100,
            path: PathBuf::from("testfile.txt"),
            seed: 0x5EED,
        }
    }
}

/// Benchmark results
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    /// Wall-clock time for all workloads
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
    /// Last EMA value
    pub ema: f64,
    /// Vertices reachable from vertex 0
    pub reachable_vertices: usize,
    /// File length after the file loop
    pub file_len: u64,
    /// Cache metrics at the end of the run
    pub metrics: MetricsSnapshot,
}

fn serialize_secs<S: serde::Serializer>(
    d: &Duration,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Run the three workloads on scoped threads and wait for all of them
pub fn run(cache: &CacheManager, config: &BenchConfig) -> Result<BenchReport> {
    info!(
        ema = config.ema_repetitions,
        sp = config.sp_repetitions,
        file = config.file_repetitions,
        path = %config.path.display(),
        "starting benchmark"
    );
    let start = Instant::now();

    let (ema, sp, file) = thread::scope(|s| {
        let ema = s.spawn(|| ema_workload(config.ema_repetitions, config.seed));
        let sp = s.spawn(|| shortest_path_workload(config.sp_repetitions, config.seed));
        let file = s.spawn(|| file_workload(cache, &config.path, config.file_repetitions));
        (ema.join(), sp.join(), file.join())
    });

    let panicked = |name: &str| Error::Internal(format!("{} workload panicked", name));
    let ema = ema.map_err(|_| panicked("ema"))?;
    let reachable_vertices = sp.map_err(|_| panicked("shortest path"))?;
    let file_len = file.map_err(|_| panicked("file"))??;

    let elapsed = start.elapsed();
    info!(elapsed_secs = elapsed.as_secs_f64(), "benchmark finished");

    Ok(BenchReport {
        elapsed,
        ema,
        reachable_vertices,
        file_len,
        metrics: cache.metrics(),
    })
}

// =============================================================================
// Tests
// =============================================================================
