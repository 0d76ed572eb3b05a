//! direct-cache benchmark
//!
//! Runs a moving-average filter and a shortest-path search concurrently with
//! a block-append/read-back loop through the cache, then prints the elapsed
//! time and cache metrics.
//!
//! ```text
//! ┌────────────┐  ┌────────────┐  ┌──────────────────────────────┐
//! │ EMA thread │  │ SP thread  │  │ file thread                  │
//! │ (CPU)      │  │ (CPU)      │  │ write/lseek/read/lseek ──▶ cache ──▶ O_DIRECT file
//! └────────────┘  └────────────┘  └──────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use direct_cache::bench::{self, BenchConfig, BenchReport};
use direct_cache::{BypassMode, CacheConfig, CacheManager};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Benchmark the direct-I/O block cache under concurrent CPU load
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// EMA repetitions
    ema_repetitions: usize,

    /// Shortest-path repetitions (also used for the file loop)
    sp_repetitions: usize,

    /// Backing file for the file loop
    #[arg(long, env = "DIRECT_CACHE_FILE", default_value = "testfile.txt")]
    file: PathBuf,

    /// File loop repetitions (defaults to the shortest-path repetitions)
    #[arg(long, env = "DIRECT_CACHE_FILE_REPETITIONS")]
    file_repetitions: Option<usize>,

    /// Cache capacity in blocks
    #[arg(long, env = "DIRECT_CACHE_CAPACITY", default_value = "64")]
    capacity: usize,

    /// Go through the OS page cache (for filesystems that reject O_DIRECT)
    #[arg(long, env = "DIRECT_CACHE_NO_BYPASS")]
    no_bypass: bool,

    /// Seed for generated data
    #[arg(long, env = "DIRECT_CACHE_SEED", default_value = "24301")]
    seed: u64,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(report) => {
            print_report(&report, args.json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Benchmark failed: {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> direct_cache::Result<BenchReport> {
    let config = CacheConfig {
        capacity_blocks: args.capacity,
        bypass: if args.no_bypass {
            BypassMode::Disabled
        } else {
            BypassMode::Required
        },
        ..CacheConfig::default()
    };
    let cache = CacheManager::new(config)?;

    let bench_config = BenchConfig {
        ema_repetitions: args.ema_repetitions,
        sp_repetitions: args.sp_repetitions,
        file_repetitions: args.file_repetitions.unwrap_or(args.sp_repetitions),
        path: args.file.clone(),
        seed: args.seed,
    };

    let report = bench::run(&cache, &bench_config)?;
    cache.shutdown()?;
    info!("Benchmark complete");
    Ok(report)
}

fn print_report(report: &BenchReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(out) => println!("{}", out),
            Err(e) => error!("Failed to serialize report: {}", e),
        }
        return;
    }

    let m = &report.metrics;
    println!("Total elapsed time: {:.3} seconds", report.elapsed.as_secs_f64());
    println!("  ema result:          {:.6}", report.ema);
    println!("  reachable vertices:  {}", report.reachable_vertices);
    println!("  file length:         {} bytes", report.file_len);
    println!(
        "  cache:               {} hits, {} misses ({:.1}% hit ratio)",
        m.hits,
        m.misses,
        m.hit_ratio * 100.0
    );
    println!(
        "  block traffic:       {} loads, {} evictions, {} flushes",
        m.loads, m.evictions, m.flushes
    );
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
