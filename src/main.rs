//! zonepool simulator
//!
//! Drives a [`ZonePool`] on a simulated zoned device with a configurable
//! number of LSM writers and a periodic maintenance task, then prints the
//! final zone state.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       zonepool simulator                         │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │   Writers    │───▶│   ZonePool   │◀───│ Maintenance  │       │
//! │  │ (blocking)   │    │              │    │  (interval)  │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                             ▼                                    │
//! │                   InMemoryZoneBackend                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use zonepool::zoned::{NoopZoneMetrics, PrometheusZoneMetrics, ZoneMetrics};
use zonepool::{
    AllocMode, FileId, InMemoryZoneBackend, IoType, KeyRange, LevelFileCatalog,
    MemoryBackendConfig, WriteContext, WriteLifetime, ZonePool, ZonedConfig,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// zonepool - zone allocation simulator for zoned block devices
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML pool configuration file
    #[arg(long, env = "ZONEPOOL_CONFIG")]
    config: Option<PathBuf>,

    /// Allocation mode override (1 = default, 2 = caza)
    #[arg(long, env = "ZONEPOOL_ALLOC_MODE")]
    alloc_mode: Option<u32>,

    /// Finish threshold override, percent of zone capacity
    #[arg(long, env = "ZONEPOOL_FINISH_THRESHOLD")]
    finish_threshold: Option<u32>,

    /// Number of zones on the simulated device
    #[arg(long, env = "ZONEPOOL_ZONES", default_value = "64")]
    zones: u32,

    /// Zone size in bytes
    #[arg(long, env = "ZONEPOOL_ZONE_SIZE", default_value = "1048576")]
    zone_size: u64,

    /// Writable bytes per zone
    #[arg(long, env = "ZONEPOOL_ZONE_CAPACITY", default_value = "1048576")]
    zone_capacity: u64,

    /// Device block size
    #[arg(long, env = "ZONEPOOL_BLOCK_SIZE", default_value = "4096")]
    block_size: u32,

    /// Device active zone ceiling
    #[arg(long, env = "ZONEPOOL_MAX_ACTIVE", default_value = "14")]
    max_active: u32,

    /// Device open zone ceiling
    #[arg(long, env = "ZONEPOOL_MAX_OPEN", default_value = "14")]
    max_open: u32,

    /// Concurrent writers
    #[arg(long, env = "ZONEPOOL_WRITERS", default_value = "4")]
    writers: u32,

    /// Files written by each writer
    #[arg(long, env = "ZONEPOOL_FILES", default_value = "64")]
    files_per_writer: u32,

    /// Blocks per file
    #[arg(long, env = "ZONEPOOL_FILE_BLOCKS", default_value = "24")]
    file_blocks: u64,

    /// Maintenance interval in milliseconds
    #[arg(long, env = "ZONEPOOL_MAINTENANCE_MS", default_value = "50")]
    maintenance_ms: u64,

    /// Print Prometheus metrics on exit
    #[arg(long, env = "ZONEPOOL_METRICS")]
    metrics: bool,

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
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = load_config(&args)?;
    info!("Starting zonepool simulator");
    info!("  Alloc mode: {}", config.alloc_mode);
    info!("  Finish threshold: {}%", config.finish_threshold);
    info!("  Zones: {} x {} bytes", args.zones, args.zone_capacity);
    info!("  Writers: {}", args.writers);

    let backend = Arc::new(
        InMemoryZoneBackend::new(MemoryBackendConfig {
            name: "sim-zbd0".to_string(),
            nr_zones: args.zones,
            zone_size: args.zone_size,
            zone_capacity: args.zone_capacity,
            block_size: args.block_size,
            max_active_zones: args.max_active,
            max_open_zones: args.max_open,
            conventional_zones: 0,
        })
        .context("invalid simulated device geometry")?,
    );

    let prometheus = if args.metrics {
        Some(Arc::new(
            PrometheusZoneMetrics::new().context("failed to create metrics")?,
        ))
    } else {
        None
    };
    let metrics: Arc<dyn ZoneMetrics> = match &prometheus {
        Some(m) => m.clone(),
        None => Arc::new(NoopZoneMetrics),
    };

    let catalog = Arc::new(LevelFileCatalog::new());
    let pool = Arc::new(
        ZonePool::open_with(backend, config, catalog.clone(), metrics)
            .context("failed to open zone pool")?,
    );

    write_superblock(&pool).context("failed to write superblock")?;

    // Maintenance
    let (stop_tx, stop_rx) = watch::channel(false);
    let maintenance = tokio::spawn(run_maintenance(
        pool.clone(),
        Duration::from_millis(args.maintenance_ms),
        stop_rx,
    ));

    // Writers
    let writers: Vec<_> = (0..args.writers)
        .map(|id| {
            let pool = pool.clone();
            let catalog = catalog.clone();
            let files = args.files_per_writer;
            let blocks = args.file_blocks;
            tokio::task::spawn_blocking(move || run_writer(id, &pool, &catalog, files, blocks))
        })
        .collect();

    let mut failed = 0;
    for (id, result) in futures::future::join_all(writers).await.into_iter().enumerate() {
        match result {
            Ok(Ok(bytes)) => info!(writer = id, bytes, "Writer finished"),
            Ok(Err(e)) => {
                error!(writer = id, error = %e, "Writer failed");
                failed += 1;
            }
            Err(e) => {
                error!(writer = id, error = %e, "Writer panicked");
                failed += 1;
            }
        }
    }

    let _ = stop_tx.send(true);
    maintenance.await.context("maintenance task panicked")?;

    pool.reset_unused_io_zones()
        .context("final reset of unused zones failed")?;
    pool.log_zone_stats();
    pool.log_garbage_info();
    info!(
        user_bytes = pool.user_bytes_written(),
        gc_bytes = pool.gc_bytes_written(),
        free = pool.free_space(),
        used = pool.used_space(),
        reclaimable = pool.reclaimable_space(),
        "Simulation complete"
    );

    println!("{}", pool.pool_snapshot().encode_json()?);
    if let Some(prometheus) = prometheus {
        println!("{}", prometheus.render()?);
    }

    if failed > 0 {
        bail!("{} writer(s) failed", failed);
    }
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<ZonedConfig> {
    let mut config = match &args.config {
        Some(path) => ZonedConfig::from_yaml_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ZonedConfig::default(),
    };

    if let Some(mode) = args.alloc_mode {
        config.alloc_mode = AllocMode::try_from(mode)?;
    }
    if let Some(threshold) = args.finish_threshold {
        config.finish_threshold = threshold;
    }
    config.validate()?;
    Ok(config)
}

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

// =============================================================================
// Simulation
// =============================================================================

fn write_superblock(pool: &ZonePool) -> zonepool::Result<()> {
    let lease = pool.allocate_meta_zone()?;
    lease.append(&vec![0x5a; pool.block_size() as usize])?;
    info!(zone = lease.zone_id(), "Wrote superblock");
    lease.release()
}

/// Lifetime hint of an SST at `level`.
fn level_lifetime(level: u32) -> WriteLifetime {
    match level {
        0 => WriteLifetime::Medium,
        1 => WriteLifetime::Long,
        _ => WriteLifetime::Extreme,
    }
}

/// Deterministic key range for a file.
fn file_key_range(file: u64) -> KeyRange {
    let lo = (file * 7919) % 10_000;
    let hi = lo + 500;
    KeyRange::new(
        format!("key{:05}", lo).into_bytes(),
        format!("key{:05}", hi).into_bytes(),
    )
}

/// Write `files` files of `blocks` blocks each. Files older than the two
/// most recent ones are deleted as compaction would.
fn run_writer(
    id: u32,
    pool: &ZonePool,
    catalog: &LevelFileCatalog,
    files: u32,
    blocks: u64,
) -> zonepool::Result<u64> {
    let block = pool.block_size() as u64;
    let mut written = 0;
    let mut live: Vec<FileId> = Vec::new();

    for n in 0..files {
        let file = FileId(id as u64 * 1_000_000 + n as u64);
        let wal = id == 0 && n % 4 == 0;
        let level = n % 4;
        let range = file_key_range(file.0);

        let base = if wal {
            WriteContext::wal()
        } else {
            WriteContext::new(level_lifetime(level), IoType::Other)
                .with_key_range(range.clone(), level)
        }
        .with_min_capacity(block);

        let mut remaining = blocks * block;
        let mut first = true;
        while remaining > 0 {
            let wctx = if first {
                base.clone().with_file(file)
            } else {
                base.clone()
            };

            let Some(handle) = pool.allocate_io_zone(&wctx)? else {
                debug!(writer = id, "No zone available, retrying");
                std::thread::sleep(Duration::from_millis(1));
                continue;
            };

            let chunk = remaining.min(handle.capacity() / block * block);
            if chunk == 0 {
                handle.close()?;
                continue;
            }

            handle.append(&vec![n as u8; chunk as usize])?;
            pool.record_extent(&handle, file, chunk, Some(level), wctx.lifetime)?;
            handle.close()?;

            remaining -= chunk;
            written += chunk;
            first = false;
        }

        if !wal {
            catalog.register(file, level, range);
        }
        live.push(file);

        if live.len() > 2 {
            let old = live.remove(0);
            catalog.remove(old);
            pool.invalidate_file(old)?;
        }
    }

    for file in live {
        catalog.remove(file);
        pool.invalidate_file(file)?;
    }

    Ok(written)
}

/// Periodic reclaim and stats until `stop` flips.
async fn run_maintenance(pool: Arc<ZonePool>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => break,
        }

        let pool = pool.clone();
        let tick = tokio::task::spawn_blocking(move || {
            if let Err(e) = pool.reset_unused_io_zones() {
                warn!(error = %e, "Reset of unused zones failed");
            }
            pool.log_zone_stats();
            pool.log_zone_usage();
            pool.log_garbage_info();
        });

        if let Err(e) = tick.await {
            error!(error = %e, "Maintenance tick panicked");
        }
    }
}
