//! Cache Metrics
//!
//! Counters and latency averages updated outside the cache lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;

/// EMA smoothing factor for latencies
const LATENCY_ALPHA: f64 = 0.1;

/// Cache metrics collector
#[derive(Debug, Default)]
pub struct CacheMetrics {
    // Lookups
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,

    // Block movement
    loads: AtomicU64,
    evictions: AtomicU64,
    dirty_writebacks: AtomicU64,
    flushes: AtomicU64,
    allocation_fallbacks: AtomicU64,

    // Sessions
    sessions_opened: AtomicU64,
    sessions_closed: AtomicU64,

    // Caller-visible bytes
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,

    // Operation latencies (microseconds, exponential moving average)
    read_latency_us: AtomicU64,
    write_latency_us: AtomicU64,
    load_latency_us: AtomicU64,
    flush_latency_us: AtomicU64,
}

impl CacheMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A hit moved a block from Recent to Frequent
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self, latency: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        update_latency_ema(&self.load_latency_us, latency);
    }

    /// A block left the cache; `dirty` if it had to be written back first
    pub fn record_eviction(&self, dirty: bool) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        if dirty {
            self.dirty_writebacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A dirty block was written to its backing store
    pub fn record_flush(&self, latency: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        update_latency_ema(&self.flush_latency_us, latency);
    }

    /// A buffer allocation failed and an existing slot was recycled instead
    pub fn record_allocation_fallback(&self) {
        self.allocation_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_read(&self, bytes: usize, latency: Duration) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
        update_latency_ema(&self.read_latency_us, latency);
    }

    pub fn record_write(&self, bytes: usize, latency: Duration) {
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
        update_latency_ema(&self.write_latency_us, latency);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }

    pub fn read_latency(&self) -> Duration {
        Duration::from_micros(self.read_latency_us.load(Ordering::Relaxed))
    }

    pub fn write_latency(&self) -> Duration {
        Duration::from_micros(self.write_latency_us.load(Ordering::Relaxed))
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            promotions: self.promotions.load(Ordering::Relaxed),

            loads: self.loads.load(Ordering::Relaxed),
            evictions: self.evictions(),
            dirty_writebacks: self.dirty_writebacks.load(Ordering::Relaxed),
            flushes: self.flushes(),
            allocation_fallbacks: self.allocation_fallbacks.load(Ordering::Relaxed),

            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_closed: self.sessions_closed.load(Ordering::Relaxed),

            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),

            read_latency_us: self.read_latency_us.load(Ordering::Relaxed),
            write_latency_us: self.write_latency_us.load(Ordering::Relaxed),
            load_latency_us: self.load_latency_us.load(Ordering::Relaxed),
            flush_latency_us: self.flush_latency_us.load(Ordering::Relaxed),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.promotions,
            &self.loads,
            &self.evictions,
            &self.dirty_writebacks,
            &self.flushes,
            &self.allocation_fallbacks,
            &self.sessions_opened,
            &self.sessions_closed,
            &self.bytes_read,
            &self.bytes_written,
            &self.read_latency_us,
            &self.write_latency_us,
            &self.load_latency_us,
            &self.flush_latency_us,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

fn update_latency_ema(target: &AtomicU64, duration: Duration) {
    let new_us = duration.as_micros() as u64;

    loop {
        let current = target.load(Ordering::Relaxed);
        let updated = if current == 0 {
            new_us
        } else {
            ((1.0 - LATENCY_ALPHA) * current as f64 + LATENCY_ALPHA * new_us as f64) as u64
        };

        if target
            .compare_exchange_weak(current, updated, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            break;
        }
    }
}

/// Snapshot of all cache metrics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
    pub promotions: u64,

    pub loads: u64,
    pub evictions: u64,
    pub dirty_writebacks: u64,
    pub flushes: u64,
    pub allocation_fallbacks: u64,

    pub sessions_opened: u64,
    pub sessions_closed: u64,

    pub bytes_read: u64,
    pub bytes_written: u64,

    pub read_latency_us: u64,
    pub write_latency_us: u64,
    pub load_latency_us: u64,
    pub flush_latency_us: u64,
}

/// Latency tracker helper
pub struct LatencyTracker {
    start: Instant,
}

impl LatencyTracker {
    /// Start tracking latency
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

// =============================================================================
// Tests
// =============================================================================
