//! tiercache - Cache Stampede Simulator
//!
//! Drives many concurrent `once` calls at a small key set, twice: a cold round
//! where every key must be computed and a warm round served from the cache.
//! Reports how many computations actually ran alongside tier statistics.
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────────┐     ┌──────────────────┐
//! │ keys×callers │────▶│ Cache (coalescing)   │────▶│ slow computation │
//! │  tasks       │     │  LRU ── in-mem remote│     │  (once per key)  │
//! └──────────────┘     └──────────────────────┘     └──────────────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tiercache::cache::{
    Cache, CacheConfig, InMemoryRemoteStore, Item, LruCache, LruConfig, RemoteStore,
};
use tiercache::{Error, Result};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tiercache - two-tier cache stampede simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of distinct keys
    #[arg(long, env = "TIERCACHE_KEYS", default_value = "8")]
    keys: u64,

    /// Concurrent callers per key
    #[arg(long, env = "TIERCACHE_CALLERS", default_value = "100")]
    callers: usize,

    /// Simulated computation latency in milliseconds
    #[arg(long, env = "TIERCACHE_COMPUTE_DELAY_MS", default_value = "50")]
    compute_delay_ms: u64,

    /// Local tier capacity (entries)
    #[arg(long, env = "TIERCACHE_LOCAL_CAPACITY", default_value = "10000")]
    local_capacity: usize,

    /// Local tier entry lifetime in seconds (0 disables expiry)
    #[arg(long, env = "TIERCACHE_LOCAL_TTL_SECS", default_value = "60")]
    local_ttl_secs: u64,

    /// Remote TTL for items that do not request one
    #[arg(long, env = "TIERCACHE_DEFAULT_TTL_SECS", default_value = "3600")]
    default_ttl_secs: u64,

    /// Run with the local tier only
    #[arg(long, env = "TIERCACHE_SKIP_REMOTE")]
    skip_remote: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting tiercache stampede simulation");
    info!("  Keys: {}", args.keys);
    info!("  Callers per key: {}", args.callers);
    info!("  Compute delay: {}ms", args.compute_delay_ms);
    info!("  Remote tier: {}", !args.skip_remote);

    let local = Arc::new(LruCache::with_config(LruConfig {
        capacity: args.local_capacity,
        expiry: (args.local_ttl_secs > 0).then(|| Duration::from_secs(args.local_ttl_secs)),
    }));
    let remote = (!args.skip_remote).then(|| Arc::new(InMemoryRemoteStore::new()));

    let mut builder = Cache::builder()
        .config(CacheConfig {
            default_ttl: Duration::from_secs(args.default_ttl_secs),
            ..CacheConfig::default()
        })
        .local(local.clone());
    if let Some(remote) = &remote {
        builder = builder.remote(remote.clone() as Arc<dyn RemoteStore>);
    }
    let cache = builder.build();

    let computations = Arc::new(AtomicU64::new(0));

    for round in ["cold", "warm"] {
        let before = computations.load(Ordering::SeqCst);
        let started = Instant::now();

        let failures = run_round(&cache, &args, &computations).await;

        info!(
            round,
            computations = computations.load(Ordering::SeqCst) - before,
            failures,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Round complete"
        );
    }

    let summary = serde_json::json!({
        "keys": args.keys,
        "callers_per_key": args.callers,
        "computations": computations.load(Ordering::SeqCst),
        "remote": cache.stats(),
        "remote_store": remote.map(|r| r.stats().object_count),
        "local": local.stats(),
    });
    let report = serde_json::to_string_pretty(&summary)
        .map_err(|e| Error::Encode(format!("stats report: {e}")))?;
    println!("{report}");

    info!("Simulation complete");
    Ok(())
}

/// Launch `keys × callers` concurrent `once` calls; returns how many failed
async fn run_round(cache: &Cache, args: &Args, computations: &Arc<AtomicU64>) -> usize {
    let delay = Duration::from_millis(args.compute_delay_ms);
    let mut tasks = JoinSet::new();

    for key in 0..args.keys {
        for _ in 0..args.callers {
            let cache = cache.clone();
            let computations = computations.clone();

            tasks.spawn(async move {
                let item = Item::new(format!("sim:{key}")).compute(move || {
                    let computations = computations.clone();
                    async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(delay).await;
                        Ok::<_, Error>(key * key)
                    }
                });
                cache.once(&item).await.map(|value| (key, value))
            });
        }
    }

    let mut failures = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok((key, value))) if value == key * key => {}
            Ok(Ok((key, value))) => {
                error!(key, value, "Unexpected cached value");
                failures += 1;
            }
            Ok(Err(e)) => {
                error!(error = %e, "once failed");
                failures += 1;
            }
            Err(e) => {
                error!(error = %e, "Caller task aborted");
                failures += 1;
            }
        }
    }
    failures
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
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
