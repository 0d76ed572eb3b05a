//! Benchmark workloads
//!
//! Two CPU-bound kernels and one cache-bound file loop. The CPU kernels only
//! exist to compete with the file loop for cores.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::hint::black_box;
use std::io::SeekFrom;
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::cache::{CacheManager, BLOCK_SIZE};
use crate::error::Result;

/// Samples per EMA pass
pub const EMA_SAMPLES: usize = 1000;

/// EMA smoothing factor
pub const EMA_ALPHA: f64 = 0.1;

/// Vertices in the shortest-path graph
pub const GRAPH_VERTICES: usize = 1000;

/// Outgoing edges per vertex
pub const GRAPH_DEGREE: usize = 10;

/// Adjacency list: `graph[u]` holds `(v, weight)` edges
pub type Graph = Vec<Vec<(usize, u32)>>;

// =============================================================================
// Moving Average
// =============================================================================

/// Exponential moving average of `data`, seeded with the first sample
pub fn ema(data: &[f64], alpha: f64) -> Option<f64> {
    let (first, rest) = data.split_first()?;
    Some(
        rest.iter()
            .fold(*first, |acc, &x| alpha * x + (1.0 - alpha) * acc),
    )
}

/// Run the EMA over random samples `repetitions` times; returns the last value
pub fn ema_workload(repetitions: usize, seed: u64) -> f64 {
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f64> = (0..EMA_SAMPLES).map(|_| rng.random::<f64>()).collect();

    let mut result = 0.0;
    for _ in 0..repetitions {
        result = black_box(ema(black_box(&data), EMA_ALPHA)).unwrap_or_default();
    }
    debug!(repetitions, result, "ema workload finished");
    result
}

// =============================================================================
// Shortest Paths
// =============================================================================

/// Random directed graph with `degree` edges per vertex, weights in `1..=10`
pub fn random_graph<R: Rng>(vertices: usize, degree: usize, rng: &mut R) -> Graph {
    if vertices == 0 {
        return Graph::new();
    }
    (0..vertices)
        .map(|_| {
            (0..degree)
                .map(|_| (rng.random_range(0..vertices), rng.random_range(1..=10)))
                .collect()
        })
        .collect()
}

/// Dijkstra from `start`. `None` marks unreachable vertices.
pub fn shortest_paths(graph: &Graph, start: usize) -> Vec<Option<u64>> {
    let mut dist: Vec<Option<u64>> = vec![None; graph.len()];
    if start >= graph.len() {
        return dist;
    }

    let mut heap = BinaryHeap::new();
    dist[start] = Some(0);
    heap.push(Reverse((0u64, start)));

    while let Some(Reverse((d, u))) = heap.pop() {
        if dist[u].is_some_and(|best| d > best) {
            continue;
        }
        for &(v, weight) in &graph[u] {
            let candidate = d + u64::from(weight);
            if dist[v].map_or(true, |best| candidate < best) {
                dist[v] = Some(candidate);
                heap.push(Reverse((candidate, v)));
            }
        }
    }
    dist
}

/// Run Dijkstra from vertex 0 `repetitions` times; returns the reachable count
pub fn shortest_path_workload(repetitions: usize, seed: u64) -> usize {
    let mut rng = StdRng::seed_from_u64(seed);
    let graph = random_graph(GRAPH_VERTICES, GRAPH_DEGREE, &mut rng);

    let mut reachable = 0;
    for _ in 0..repetitions {
        let dist = shortest_paths(black_box(&graph), 0);
        reachable = dist.iter().filter(|d| d.is_some()).count();
    }
    debug!(repetitions, reachable, "shortest path workload finished");
    reachable
}

// =============================================================================
// File Loop
// =============================================================================

/// Append a block, read the first block back, repeat.
///
/// Each repetition writes one block at the cursor, seeks to the start, reads
/// one block and seeks to the end. Returns the file length before close.
pub fn file_workload(cache: &CacheManager, path: &Path, repetitions: usize) -> Result<u64> {
    let session = cache.open(path)?;
    let result = file_loop(cache, session, repetitions);
    let closed = cache.close(session);

    let len = result?;
    closed?;
    debug!(repetitions, len, path = %path.display(), "file workload finished");
    Ok(len)
}

fn file_loop(
    cache: &CacheManager,
    session: crate::cache::SessionId,
    repetitions: usize,
) -> Result<u64> {
    let mut block = vec![b'a'; BLOCK_SIZE];
    for _ in 0..repetitions {
        cache.write(session, &block)?;
        cache.lseek(session, SeekFrom::Start(0))?;
        cache.read(session, &mut block)?;
        cache.lseek(session, SeekFrom::End(0))?;
    }
    cache.session_len(session)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{BypassMode, CacheConfig};

    #[test]
    fn test_ema() {
        assert_eq!(ema(&[], 0.5), None);
        assert_eq!(ema(&[4.0], 0.5), Some(4.0));
        // 0.5 * 8 + 0.5 * 4 = 6
        assert_eq!(ema(&[4.0, 8.0], 0.5), Some(6.0));
    }

    #[test]
    fn test_ema_workload_is_deterministic() {
        let a = ema_workload(3, 42);
        let b = ema_workload(1, 42);
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a));
    }

    #[test]
    fn test_shortest_paths_small_graph() {
        // 0 -> 1 (4), 0 -> 2 (1), 2 -> 1 (2), 3 isolated
        let graph: Graph = vec![vec![(1, 4), (2, 1)], vec![], vec![(1, 2)], vec![]];
        let dist = shortest_paths(&graph, 0);
        assert_eq!(dist, vec![Some(0), Some(3), Some(1), None]);

        assert!(shortest_paths(&graph, 10).iter().all(Option::is_none));
    }

    #[test]
    fn test_random_graph_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let graph = random_graph(50, 4, &mut rng);
        assert_eq!(graph.len(), 50);
        for edges in &graph {
            assert_eq!(edges.len(), 4);
            for &(v, w) in edges {
                assert!(v < 50);
                assert!((1..=10).contains(&w));
            }
        }
        assert!(random_graph(0, 4, &mut rng).is_empty());
    }

    #[test]
    fn test_file_workload_grows_by_one_block_per_repetition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bench.dat");
        let cache =
            CacheManager::new(CacheConfig::with_capacity(4).bypass(BypassMode::Disabled)).unwrap();

        let len = file_workload(&cache, &path, 6).unwrap();
        assert_eq!(len, 6 * BLOCK_SIZE as u64);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
        assert_eq!(cache.open_sessions(), 0);
    }
}
