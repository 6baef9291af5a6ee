//! Zone metrics reporting.
//!
//! The pool reports allocation latency, write throughput and zone counts
//! through the [`ZoneMetrics`] trait. [`PrometheusZoneMetrics`] keeps them in
//! its own registry so several pools can coexist in one process.

use std::time::{Duration, Instant};

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use super::lifetime::WriteLifetime;
use crate::error::{Error, Result};

/// Allocation class used to label latency metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocKind {
    Wal,
    L0,
    NonWal,
    Meta,
}

impl AllocKind {
    /// Classify an I/O allocation. Non-WAL writes hinted medium are L0 flushes.
    pub fn for_io(wal: bool, lifetime: WriteLifetime) -> Self {
        if wal {
            AllocKind::Wal
        } else if lifetime == WriteLifetime::Medium {
            AllocKind::L0
        } else {
            AllocKind::NonWal
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AllocKind::Wal => "wal",
            AllocKind::L0 => "l0",
            AllocKind::NonWal => "non_wal",
            AllocKind::Meta => "meta",
        }
    }
}

/// Reporting seam for pool metrics.
pub trait ZoneMetrics: Send + Sync {
    /// One allocation of `kind` completed after `latency`.
    fn report_alloc(&self, kind: AllocKind, latency: Duration);

    /// One zone append of `bytes` completed after `latency`.
    fn report_write(&self, bytes: u64, latency: Duration);

    /// Current open and active zone token counts.
    fn report_zone_counts(&self, open: u32, active: u32);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopZoneMetrics;

impl ZoneMetrics for NoopZoneMetrics {
    fn report_alloc(&self, _kind: AllocKind, _latency: Duration) {}
    fn report_write(&self, _bytes: u64, _latency: Duration) {}
    fn report_zone_counts(&self, _open: u32, _active: u32) {}
}

/// Prometheus-backed metrics.
pub struct PrometheusZoneMetrics {
    registry: Registry,
    alloc_latency_seconds: HistogramVec,
    alloc_total: IntCounterVec,
    write_latency_seconds: Histogram,
    write_bytes_total: IntCounter,
    open_zones: IntGauge,
    active_zones: IntGauge,
}

fn metric_err(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}

impl PrometheusZoneMetrics {
    /// Create and register the metric set on a fresh registry.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let alloc_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "zonepool_alloc_latency_seconds",
                "Zone allocation latency in seconds",
            )
            .buckets(vec![
                0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
            &["kind"],
        )
        .map_err(metric_err)?;

        let alloc_total = IntCounterVec::new(
            Opts::new("zonepool_alloc_total", "Total zone allocations"),
            &["kind"],
        )
        .map_err(metric_err)?;

        let write_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "zonepool_write_latency_seconds",
            "Zone append latency in seconds",
        ))
        .map_err(metric_err)?;

        let write_bytes_total =
            IntCounter::new("zonepool_write_bytes_total", "Bytes appended to zones")
                .map_err(metric_err)?;

        let open_zones = IntGauge::new("zonepool_open_zones", "Open I/O zone tokens in use")
            .map_err(metric_err)?;

        let active_zones =
            IntGauge::new("zonepool_active_zones", "Active I/O zone tokens in use")
                .map_err(metric_err)?;

        registry
            .register(Box::new(alloc_latency_seconds.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(alloc_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(write_latency_seconds.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(write_bytes_total.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(open_zones.clone()))
            .map_err(metric_err)?;
        registry
            .register(Box::new(active_zones.clone()))
            .map_err(metric_err)?;

        Ok(Self {
            registry,
            alloc_latency_seconds,
            alloc_total,
            write_latency_seconds,
            write_bytes_total,
            open_zones,
            active_zones,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metric_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }
}

impl ZoneMetrics for PrometheusZoneMetrics {
    fn report_alloc(&self, kind: AllocKind, latency: Duration) {
        self.alloc_latency_seconds
            .with_label_values(&[kind.as_str()])
            .observe(latency.as_secs_f64());
        self.alloc_total.with_label_values(&[kind.as_str()]).inc();
    }

    fn report_write(&self, bytes: u64, latency: Duration) {
        self.write_latency_seconds.observe(latency.as_secs_f64());
        self.write_bytes_total.inc_by(bytes);
    }

    fn report_zone_counts(&self, open: u32, active: u32) {
        self.open_zones.set(open as i64);
        self.active_zones.set(active as i64);
    }
}

/// Measures the enclosing scope and hands the elapsed time to `report` on drop.
pub struct LatencyGuard<F: FnOnce(Duration)> {
    start: Instant,
    report: Option<F>,
}

impl<F: FnOnce(Duration)> LatencyGuard<F> {
    pub fn new(report: F) -> Self {
        Self {
            start: Instant::now(),
            report: Some(report),
        }
    }
}

impl<F: FnOnce(Duration)> Drop for LatencyGuard<F> {
    fn drop(&mut self) {
        if let Some(report) = self.report.take() {
            report(self.start.elapsed());
        }
    }
}
