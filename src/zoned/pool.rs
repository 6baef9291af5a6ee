//! Zone Pool
//!
//! Device-wide zone manager. Owns the metadata and I/O zone collections,
//! the open/active resource tokens and the sticky error status, and hands
//! out zones to the WAL, flush and migration write paths.
//!
//! # Allocation
//!
//! ```text
//! allocate_io_zone(ctx)
//!   │
//!   ├── deferred status set? ──────────────▶ return it
//!   ├── non-WAL: apply_finish_threshold()
//!   ├── wait_for_open(prioritized = WAL)
//!   │
//!   ├── AllocMode::Default
//!   │     best open zone by lifetime diff
//!   │     diff >= 50 and not an equal class:
//!   │        try active token, else finish cheapest zone until one frees
//!   │        claim an empty zone, stamp lifetime
//!   │
//!   └── AllocMode::Caza
//!         index empty:   active token → empty zone
//!         otherwise:     zone with most valid bytes of adjacent files
//!         still nothing: active token → empty zone, else best open zone
//! ```
//!
//! Zone collections are fixed after open, so scans iterate them without a
//! pool-wide lock. Every zone transition is gated by that zone's busy flag.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use crossbeam::utils::Backoff;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, instrument, warn};

use super::config::{AllocMode, ZonedConfig};
use super::extent::{ExtentId, FileId, ZoneExtentInfo};
use super::lifetime::{
    lifetime_diff, WriteLifetime, LIFETIME_CLASSES, LIFETIME_DIFF_COULD_BE_WORSE,
    LIFETIME_DIFF_NOT_GOOD,
};
use super::metrics::{AllocKind, LatencyGuard, NoopZoneMetrics, ZoneMetrics};
use super::placement::{NoPlacementQuery, PlacementIndex, PlacementQuery, WriteContext};
use super::stats::{GarbageHistogram, PoolSnapshot, SpaceUsage, ZoneSnapshot};
use super::status::DeferredStatus;
use super::tokens::{ActiveToken, OpenToken, ZoneTokens};
use super::zone::{DeviceContext, Zone, ZoneLease};
use crate::backend::ZoneBackend;
use crate::error::{Error, Result};

const MB: u64 = 1024 * 1024;

// =============================================================================
// Zone Pool
// =============================================================================

/// Zone allocation and lifecycle manager for one zoned device.
pub struct ZonePool {
    config: ZonedConfig,
    ctx: Arc<DeviceContext>,
    meta_zones: Vec<Arc<Zone>>,
    io_zones: Vec<Arc<Zone>>,
    tokens: Arc<ZoneTokens>,
    fixed_zones: [Mutex<u64>; LIFETIME_CLASSES],
    placement: PlacementIndex,
    query: Arc<dyn PlacementQuery>,
    migration: Arc<MigrationGate>,
    deferred: Arc<DeferredStatus>,
    gc_bytes_written: AtomicU64,
    started: Instant,
}

impl ZonePool {
    /// Open `backend` without a placement query or metrics.
    pub fn open(backend: Arc<dyn ZoneBackend>, config: ZonedConfig) -> Result<Self> {
        Self::open_with(
            backend,
            config,
            Arc::new(NoPlacementQuery),
            Arc::new(NoopZoneMetrics),
        )
    }

    /// Open `backend`, build the zone collections and count active zones.
    #[instrument(skip_all, fields(device = %backend.filename()))]
    pub fn open_with(
        backend: Arc<dyn ZoneBackend>,
        config: ZonedConfig,
        query: Arc<dyn PlacementQuery>,
        metrics: Arc<dyn ZoneMetrics>,
    ) -> Result<Self> {
        config.validate()?;

        if !config.readonly && !config.exclusive {
            return Err(Error::InvalidArgument(
                "Write opens must be exclusive".into(),
            ));
        }

        let limits = backend.open(config.readonly, config.exclusive)?;
        let nr_zones = backend.nr_zones();
        if nr_zones < config.min_zones {
            return Err(Error::NotSupported(format!(
                "To few zones on zoned backend ({} required, {} found)",
                config.min_zones, nr_zones
            )));
        }

        let ceiling = |device: u32| {
            if device == 0 {
                nr_zones
            } else {
                device.saturating_sub(config.reserved_zones)
            }
        };
        let max_active = ceiling(limits.max_active_zones);
        let max_open = ceiling(limits.max_open_zones);

        info!(
            nr_zones,
            max_active = limits.max_active_zones,
            max_open = limits.max_open_zones,
            "Zoned block device opened"
        );

        let infos = backend.list_zones()?;
        if infos.len() != nr_zones as usize {
            return Err(Error::io(
                "list_zones",
                format!("expected {} zones, device listed {}", nr_zones, infos.len()),
            ));
        }

        let ctx = Arc::new(DeviceContext::new(backend, metrics));
        let tokens = Arc::new(ZoneTokens::new(max_open, max_active));

        let mut meta_zones = Vec::new();
        let mut idx = 0usize;
        let mut reserved = 0u32;
        while reserved < config.meta_zones && idx < infos.len() {
            let info = &infos[idx];
            if info.is_swr() {
                if !info.is_offline() {
                    meta_zones.push(Arc::new(Zone::new(ctx.clone(), idx as u32, info)));
                }
                reserved += 1;
            }
            idx += 1;
        }

        let mut io_zones = Vec::new();
        for (i, info) in infos.iter().enumerate().skip(idx) {
            if !info.is_swr() || info.is_offline() {
                continue;
            }

            let zone = Arc::new(Zone::new(ctx.clone(), i as u32, info));
            if info.is_active() {
                tokens.adopt_active();
                if info.is_open() && !config.readonly {
                    let lease = zone.try_acquire().ok_or_else(|| {
                        Error::Internal(format!("zone {} busy during open", i))
                    })?;
                    lease.close()?;
                    lease.release()?;
                }
            }
            io_zones.push(zone);
        }

        info!(
            meta_zones = meta_zones.len(),
            io_zones = io_zones.len(),
            max_active_io = max_active,
            max_open_io = max_open,
            active = tokens.active_count(),
            mode = %config.alloc_mode,
            "Zone pool ready"
        );

        Ok(Self {
            config,
            ctx,
            meta_zones,
            io_zones,
            tokens,
            fixed_zones: std::array::from_fn(|_| Mutex::new(0)),
            placement: PlacementIndex::new(),
            query,
            migration: Arc::new(MigrationGate::default()),
            deferred: Arc::new(DeferredStatus::new()),
            gc_bytes_written: AtomicU64::new(0),
            started: Instant::now(),
        })
    }

    // ----- accessors -----

    pub fn config(&self) -> &ZonedConfig {
        &self.config
    }

    pub fn io_zones(&self) -> &[Arc<Zone>] {
        &self.io_zones
    }

    pub fn meta_zones(&self) -> &[Arc<Zone>] {
        &self.meta_zones
    }

    pub fn placement_index(&self) -> &PlacementIndex {
        &self.placement
    }

    pub fn open_io_zones(&self) -> u32 {
        self.tokens.open_count()
    }

    pub fn active_io_zones(&self) -> u32 {
        self.tokens.active_count()
    }

    pub fn max_open_io_zones(&self) -> u32 {
        self.tokens.max_open()
    }

    pub fn max_active_io_zones(&self) -> u32 {
        self.tokens.max_active()
    }

    pub fn block_size(&self) -> u32 {
        self.ctx.block_size
    }

    pub fn zone_size(&self) -> u64 {
        self.ctx.zone_size
    }

    pub fn nr_zones(&self) -> u32 {
        self.ctx.backend.nr_zones()
    }

    pub fn filename(&self) -> String {
        self.ctx.backend.filename()
    }

    /// I/O zone containing byte `offset`.
    pub fn get_io_zone(&self, offset: u64) -> Option<&Arc<Zone>> {
        self.io_zones.iter().find(|z| z.contains(offset))
    }

    fn zone_by_id(&self, zone_id: u32) -> Option<&Arc<Zone>> {
        self.io_zone_by_id(zone_id).or_else(|| {
            self.meta_zones
                .binary_search_by_key(&zone_id, |z| z.zone_id())
                .ok()
                .map(|i| &self.meta_zones[i])
        })
    }

    fn io_zone_by_id(&self, zone_id: u32) -> Option<&Arc<Zone>> {
        self.io_zones
            .binary_search_by_key(&zone_id, |z| z.zone_id())
            .ok()
            .map(|i| &self.io_zones[i])
    }

    // ----- deferred status -----

    /// `Ok` until the first fatal error, then that error forever.
    pub fn deferred_status(&self) -> Result<()> {
        self.deferred.check()
    }

    /// Record a fatal error. Only the first one sticks.
    pub fn set_deferred_status(&self, err: Error) {
        self.deferred.set(err);
    }

    // ----- byte counters -----

    pub fn add_bytes_written(&self, bytes: u64) {
        self.ctx.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_gc_bytes_written(&self, bytes: u64) {
        self.gc_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.ctx.bytes_written.load(Ordering::Relaxed)
    }

    pub fn gc_bytes_written(&self) -> u64 {
        self.gc_bytes_written.load(Ordering::Relaxed)
    }

    pub fn user_bytes_written(&self) -> u64 {
        self.total_bytes_written()
            .saturating_sub(self.gc_bytes_written())
    }

    // ----- space accounting -----

    pub fn space_usage(&self) -> SpaceUsage {
        SpaceUsage::from_snapshots(&self.zone_snapshot())
    }

    pub fn free_space(&self) -> u64 {
        self.io_zones.iter().map(|z| z.capacity()).sum()
    }

    pub fn used_space(&self) -> u64 {
        self.io_zones.iter().map(|z| z.used_capacity()).sum()
    }

    pub fn reclaimable_space(&self) -> u64 {
        self.io_zones
            .iter()
            .filter(|z| z.is_full())
            .map(|z| z.max_capacity().saturating_sub(z.used_capacity()))
            .sum()
    }

    // ----- device reads -----

    /// Read into `buf` from `offset`, retrying partial and interrupted reads.
    /// Returns bytes read, short only at the end of written data.
    pub fn read(&self, buf: &mut [u8], offset: u64, direct: bool) -> Result<usize> {
        let mut done = 0usize;
        while done < buf.len() {
            match self
                .ctx
                .backend
                .read(&mut buf[done..], offset + done as u64, direct)
            {
                Ok(0) => break,
                Ok(n) => done += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io("read", e.to_string())),
            }
        }
        Ok(done)
    }

    // =========================================================================
    // Metadata Zones
    // =========================================================================

    /// Take a metadata zone with no live data, resetting it if needed.
    #[instrument(skip(self))]
    pub fn allocate_meta_zone(&self) -> Result<ZoneLease> {
        let _latency = LatencyGuard::new(|elapsed| {
            self.ctx.metrics.report_alloc(AllocKind::Meta, elapsed)
        });

        for zone in &self.meta_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };

            if zone.is_used() {
                lease.release()?;
                continue;
            }

            if !zone.is_empty() {
                if let Err(e) = lease.reset() {
                    warn!(zone = zone.zone_id(), error = %e, "Failed resetting zone");
                    continue;
                }
            }
            return Ok(lease);
        }

        error!("Out of metadata zones, we should go to READ ONLY now.");
        Err(Error::NoSpace("Out of metadata zones".into()))
    }

    // =========================================================================
    // I/O Zone Allocation
    // =========================================================================

    /// Pick a zone for a write. `Ok(None)` means no zone could be found and
    /// the caller should retry later.
    #[instrument(skip(self, wctx), fields(lifetime = %wctx.lifetime, wal = wctx.is_wal()))]
    pub fn allocate_io_zone(&self, wctx: &WriteContext) -> Result<Option<IoZoneHandle>> {
        let kind = AllocKind::for_io(wctx.is_wal(), wctx.lifetime);
        let _latency =
            LatencyGuard::new(|elapsed| self.ctx.metrics.report_alloc(kind, elapsed));

        self.deferred.check()?;

        if !wctx.is_wal() {
            self.apply_finish_threshold()?;
        }

        let open = self.tokens.wait_for_open(wctx.is_wal());

        let allocated = match self.config.alloc_mode {
            AllocMode::Default => self.alloc_lifetime_match(wctx)?,
            AllocMode::Caza => self.alloc_content_aware(wctx)?,
        };

        let handle = allocated.map(|lease| {
            debug!(
                zone = lease.zone_id(),
                start = lease.start(),
                wp = lease.write_pointer(),
                zone_lifetime = %lease.lifetime(),
                "Allocated zone"
            );
            IoZoneHandle {
                lease,
                open: Some(open),
                tokens: self.tokens.clone(),
                deferred: self.deferred.clone(),
            }
        });

        if !wctx.is_wal() {
            self.log_zone_stats();
        }

        self.ctx
            .metrics
            .report_zone_counts(self.tokens.open_count(), self.tokens.active_count());

        Ok(handle)
    }

    /// Lifetime-diff strategy.
    fn alloc_lifetime_match(&self, wctx: &WriteContext) -> Result<Option<ZoneLease>> {
        let (mut allocated, best_diff) =
            self.best_open_zone_match(wctx.lifetime, wctx.min_capacity)?;

        if best_diff < LIFETIME_DIFF_COULD_BE_WORSE {
            return Ok(allocated);
        }

        let mut token = self.tokens.try_acquire_active();

        if let Some(lease) = allocated.take() {
            if best_diff == LIFETIME_DIFF_COULD_BE_WORSE {
                if token.is_none() {
                    debug!("Allocator: avoided a finish by relaxing lifetime diff requirement");
                }
                return Ok(Some(lease));
            }
            lease.release()?;
        }

        let backoff = Backoff::new();
        let token = loop {
            if let Some(token) = token.take().or_else(|| self.tokens.try_acquire_active()) {
                break token;
            }
            self.finish_cheapest_io_zone()?;
            backoff.snooze();
        };

        self.claim_empty_zone(token, wctx.lifetime)
    }

    /// Content-aware strategy with the cold-start fallbacks.
    fn alloc_content_aware(&self, wctx: &WriteContext) -> Result<Option<ZoneLease>> {
        let mut allocated = None;

        if self.placement.is_empty() {
            if let Some(token) = self.tokens.try_acquire_active() {
                allocated = self.claim_empty_zone(token, wctx.lifetime)?;
            }
        } else {
            allocated = self.best_content_match(wctx)?;
        }

        if allocated.is_some() {
            return Ok(allocated);
        }

        match self.tokens.try_acquire_active() {
            Some(token) => self.claim_empty_zone(token, wctx.lifetime),
            None => Ok(self
                .best_open_zone_match(wctx.lifetime, wctx.min_capacity)?
                .0),
        }
    }

    /// Scan for the written, non-full zone whose lifetime best fits. Only
    /// the winner stays leased. Returns the winning diff, or
    /// `LIFETIME_DIFF_NOT_GOOD` when nothing qualified.
    fn best_open_zone_match(
        &self,
        lifetime: WriteLifetime,
        min_capacity: u64,
    ) -> Result<(Option<ZoneLease>, u32)> {
        let mut best: Option<(ZoneLease, u32)> = None;

        for zone in &self.io_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };

            if !zone.is_used() || zone.is_full() || zone.capacity() < min_capacity {
                lease.release()?;
                continue;
            }

            let diff = lifetime_diff(zone.lifetime(), lifetime);
            let better = best.as_ref().map_or(true, |(_, best_diff)| diff < *best_diff);
            if better {
                if let Some((previous, _)) = best.replace((lease, diff)) {
                    previous.release()?;
                }
            } else {
                lease.release()?;
            }
        }

        Ok(match best {
            Some((lease, diff)) => (Some(lease), diff),
            None => (None, LIFETIME_DIFF_NOT_GOOD),
        })
    }

    /// Pick the zone holding the most valid bytes of files adjacent to the
    /// write, preferring less garbage on ties.
    ///
    /// The writing file must not have placement entries yet; callers drain
    /// its index entries before rewriting it.
    fn best_content_match(&self, wctx: &WriteContext) -> Result<Option<ZoneLease>> {
        debug_assert!(
            wctx.file
                .map_or(true, |file| !self.placement.contains_file(file)),
            "file being placed already has placement entries"
        );

        let Some(range) = &wctx.key_range else {
            return Ok(None);
        };
        let files = self.query.adjacent_overlapping_files(range, wctx.level);
        if files.is_empty() {
            return Ok(None);
        }

        let zone_ids = self.placement.zones_for(&files);
        let files: HashSet<FileId> = files.into_iter().collect();

        let mut best: Option<(&Arc<Zone>, u64, u64)> = None;
        for zone in &self.io_zones {
            if !zone_ids.contains(&zone.zone_id())
                || zone.is_full()
                || zone.is_busy()
                || zone.capacity() < wctx.min_capacity
            {
                continue;
            }

            let (valid, garbage) = zone.overlap_and_garbage(&files);
            if valid == 0 {
                continue;
            }

            let better = match best {
                None => true,
                Some((_, best_valid, best_garbage)) => {
                    valid > best_valid || (valid == best_valid && garbage < best_garbage)
                }
            };
            if better {
                best = Some((zone, valid, garbage));
            }
        }

        let Some((zone, valid, garbage)) = best else {
            return Ok(None);
        };

        let lease = zone.acquire_blocking();
        if lease.is_full() || lease.capacity() < wctx.min_capacity {
            lease.release()?;
            return Ok(None);
        }

        debug!(
            zone = zone.zone_id(),
            overlap_bytes = valid,
            garbage_bytes = garbage,
            "Content-aware zone match"
        );
        Ok(Some(lease))
    }

    /// Lease the first empty zone.
    fn allocate_empty_zone(&self) -> Result<Option<ZoneLease>> {
        for zone in &self.io_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };
            if zone.is_empty() && !zone.is_full() {
                return Ok(Some(lease));
            }
            lease.release()?;
        }
        Ok(None)
    }

    /// Open an empty zone with `token`. The token is returned if no empty
    /// zone exists.
    fn claim_empty_zone(
        &self,
        token: ActiveToken,
        lifetime: WriteLifetime,
    ) -> Result<Option<ZoneLease>> {
        match self.allocate_empty_zone()? {
            Some(lease) => {
                lease.set_lifetime(lifetime);
                token.transfer();
                Ok(Some(lease))
            }
            None => Ok(None),
        }
    }

    // =========================================================================
    // Reclaim & Backpressure
    // =========================================================================

    /// Finish every partially written zone whose remaining capacity is under
    /// the configured percentage of its max capacity.
    #[instrument(skip(self))]
    pub fn apply_finish_threshold(&self) -> Result<()> {
        let threshold = self.config.finish_threshold as u64;
        if threshold == 0 {
            return Ok(());
        }

        for zone in &self.io_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };

            let within = zone.capacity() < zone.max_capacity() * threshold / 100;
            if !(zone.is_empty() || zone.is_full()) && within {
                self.deferred.record(lease.finish())?;
                lease.release()?;
                self.tokens.put_active();
            } else {
                lease.release()?;
            }
        }
        Ok(())
    }

    /// Finish the partially written zone with the least capacity left.
    /// Succeeds without doing anything when every free zone is empty or full.
    #[instrument(skip(self))]
    pub fn finish_cheapest_io_zone(&self) -> Result<()> {
        let mut victim: Option<ZoneLease> = None;

        for zone in &self.io_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };

            if zone.is_empty() || zone.is_full() {
                lease.release()?;
                continue;
            }

            // Ties go to the zone seen last
            let cheaper = victim
                .as_ref()
                .map_or(true, |current| current.capacity() >= zone.capacity());
            if cheaper {
                if let Some(previous) = victim.replace(lease) {
                    previous.release()?;
                }
            } else {
                lease.release()?;
            }
        }

        let Some(victim) = victim else {
            info!("All non-busy zones are empty or full, skip.");
            return Ok(());
        };

        let finished = self.deferred.record(victim.finish());
        let released = victim.release();

        finished?;
        self.tokens.put_active();
        released
    }

    /// Reset every written zone that holds no live data.
    #[instrument(skip(self))]
    pub fn reset_unused_io_zones(&self) -> Result<()> {
        for zone in &self.io_zones {
            let Some(lease) = zone.try_acquire() else {
                continue;
            };

            if zone.is_empty() || zone.is_used() {
                lease.release()?;
                continue;
            }

            let full = zone.is_full();
            let reset = self.deferred.record(lease.reset());
            let released = lease.release();

            reset?;
            released?;

            if !full {
                self.tokens.put_active();
            }
        }
        Ok(())
    }

    // =========================================================================
    // Fixed Zones
    // =========================================================================

    /// Zones pinned to `lifetime`.
    pub fn occupied_zone_num(&self, lifetime: WriteLifetime) -> u64 {
        *self.fixed_zones[lifetime.index()].lock()
    }

    /// Active zones left for ordinary allocation.
    pub fn max_io_zones(&self) -> u64 {
        (self.tokens.max_active() as u64)
            .saturating_sub(self.occupied_zone_num(WriteLifetime::NotSet))
            .saturating_sub(self.occupied_zone_num(WriteLifetime::Short))
    }

    /// Pin (`delta > 0`) or unpin (`delta < 0`) zones for `lifetime`. When
    /// more zones of the class are in use than stay pinned, the ones with
    /// the least capacity left are finished.
    #[instrument(skip(self))]
    pub fn adjust_io_zones(&self, lifetime: WriteLifetime, delta: i64) -> Result<()> {
        let mut fixed = self.fixed_zones[lifetime.index()].lock();
        let target = (*fixed as i64).saturating_add(delta);

        if delta < 0 {
            let in_use = self
                .io_zones
                .iter()
                .filter(|z| Self::is_open_of_class(z, lifetime))
                .count() as i64;

            let excess = in_use - target.max(0);
            for _ in 0..excess {
                let candidate = self
                    .io_zones
                    .iter()
                    .filter(|z| Self::is_open_of_class(z, lifetime))
                    .min_by_key(|z| z.capacity());

                let Some(zone) = candidate else {
                    debug!(%lifetime, "No zone left to finish");
                    break;
                };

                let lease = zone.acquire_blocking();
                if !Self::is_open_of_class(zone, lifetime) {
                    lease.release()?;
                    continue;
                }

                if let Err(e) = self.deferred.record(lease.finish()) {
                    warn!(zone = zone.zone_id(), error = %e, "Failed finishing pinned zone");
                    return Err(e);
                }
                lease.release()?;
                self.tokens.put_active();
            }
        }

        *fixed = target.max(0) as u64;
        debug!(%lifetime, fixed = *fixed, "Adjusted pinned zones");
        Ok(())
    }

    fn is_open_of_class(zone: &Zone, lifetime: WriteLifetime) -> bool {
        zone.lifetime() == lifetime && !zone.is_empty() && !zone.is_full()
    }

    // =========================================================================
    // Migration
    // =========================================================================

    /// Wait until no migration zone is out, then pick one for a rewrite.
    /// `Ok(None)` releases the migration slot again.
    #[instrument(skip(self, wctx), fields(lifetime = %wctx.lifetime))]
    pub fn take_migrate_zone(&self, wctx: &WriteContext) -> Result<Option<MigrateZone>> {
        self.migration.enter();

        let picked = match self.config.alloc_mode {
            AllocMode::Default => self
                .best_open_zone_match(wctx.lifetime, wctx.min_capacity)
                .map(|(lease, _)| lease),
            AllocMode::Caza => self.best_content_match(wctx),
        };

        match picked {
            Ok(Some(lease)) => {
                info!(start = lease.start(), "TakeMigrateZone");
                Ok(Some(MigrateZone {
                    lease,
                    gate: self.migration.clone(),
                    tokens: self.tokens.clone(),
                    done: false,
                }))
            }
            Ok(None) => {
                self.migration.leave();
                Ok(None)
            }
            Err(e) => {
                self.migration.leave();
                Err(e)
            }
        }
    }

    /// A migration zone is currently out.
    pub fn is_migrating(&self) -> bool {
        *self.migration.migrating.lock()
    }

    // =========================================================================
    // Extent Bookkeeping
    // =========================================================================

    /// Attribute `length` written bytes in the leased zone to `file`.
    pub fn record_extent(
        &self,
        lease: &ZoneLease,
        file: FileId,
        length: u64,
        level: Option<u32>,
        lifetime: WriteLifetime,
    ) -> Result<ExtentId> {
        let zone_id = lease.zone_id();
        let id = lease.push_extent(ZoneExtentInfo::new(zone_id, file, length, lifetime, level))?;
        if self.io_zone_by_id(zone_id).is_some() {
            self.placement.add(file, zone_id);
        }
        Ok(id)
    }

    /// Invalidate one extent. Returns false if it was already invalid or its
    /// zone has been reset since it was recorded.
    pub fn invalidate_extent(&self, zone_id: u32, extent: ExtentId) -> Result<bool> {
        let zone = self
            .zone_by_id(zone_id)
            .ok_or_else(|| Error::InvalidArgument(format!("no zone {}", zone_id)))?;

        match zone.invalidate_extent(extent)? {
            Some((file, still_valid)) => {
                if !still_valid {
                    self.placement.remove(file, zone_id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Invalidate every extent of `file`. Returns bytes released.
    pub fn invalidate_file(&self, file: FileId) -> Result<u64> {
        let mut released = 0;
        for zone in self.meta_zones.iter().chain(self.io_zones.iter()) {
            released += zone.invalidate_file(file)?;
        }
        self.placement.remove_file(file);
        Ok(released)
    }

    // =========================================================================
    // Observability
    // =========================================================================

    /// State of every I/O zone.
    pub fn zone_snapshot(&self) -> Vec<ZoneSnapshot> {
        self.io_zones.iter().map(|z| ZoneSnapshot::of(z)).collect()
    }

    /// State of every metadata and I/O zone.
    pub fn pool_snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            timestamp: Utc::now(),
            meta: self.meta_zones.iter().map(|z| ZoneSnapshot::of(z)).collect(),
            io: self.zone_snapshot(),
        }
    }

    /// Garbage histogram over I/O zones not currently leased.
    pub fn garbage_histogram(&self) -> GarbageHistogram {
        let snapshots: Vec<ZoneSnapshot> = self
            .io_zones
            .iter()
            .filter(|z| !z.is_busy())
            .map(|z| ZoneSnapshot::of(z))
            .collect();
        GarbageHistogram::from_snapshots(&snapshots)
    }

    pub fn log_zone_stats(&self) {
        let mut used = 0u64;
        let mut reclaimable = 0u64;
        let mut reclaimables_max = 0u64;
        let mut active = 0u64;

        for zone in &self.io_zones {
            let zone_used = zone.used_capacity();
            used += zone_used;
            if zone_used > 0 {
                reclaimable += zone.max_capacity().saturating_sub(zone_used);
                reclaimables_max += zone.max_capacity();
            }
            if !(zone.is_full() || zone.is_empty()) {
                active += 1;
            }
        }

        info!(
            elapsed_secs = self.started.elapsed().as_secs(),
            used_mb = used / MB,
            reclaimable_mb = reclaimable / MB,
            reclaimable_pct = 100 * reclaimable / reclaimables_max.max(1),
            active,
            active_tokens = self.tokens.active_count(),
            open_tokens = self.tokens.open_count(),
            "Zone stats"
        );
    }

    pub fn log_zone_usage(&self) {
        for zone in &self.io_zones {
            let used = zone.used_capacity();
            if used > 0 {
                debug!(
                    start = format_args!("0x{:x}", zone.start()),
                    used_bytes = used,
                    used_mb = used / MB,
                    "Zone usage"
                );
            }
        }
    }

    pub fn log_garbage_info(&self) {
        let histogram = self.garbage_histogram();
        info!(histogram = %histogram, "Zone garbage stats");
    }
}

impl std::fmt::Debug for ZonePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZonePool")
            .field("device", &self.filename())
            .field("mode", &self.config.alloc_mode)
            .field("meta_zones", &self.meta_zones.len())
            .field("io_zones", &self.io_zones.len())
            .field("open", &self.tokens.open_count())
            .field("active", &self.tokens.active_count())
            .finish()
    }
}

// =============================================================================
// I/O Zone Handle
// =============================================================================

/// A leased I/O zone together with the open-zone token it was allocated
/// under.
///
/// Closing (or dropping) the handle closes the zone, returns the open token,
/// and returns the active token if the zone ended up full or was never
/// written. A failed close becomes the pool's deferred status.
pub struct IoZoneHandle {
    lease: ZoneLease,
    open: Option<OpenToken>,
    tokens: Arc<ZoneTokens>,
    deferred: Arc<DeferredStatus>,
}

impl IoZoneHandle {
    pub fn lease(&self) -> &ZoneLease {
        &self.lease
    }

    /// Close the zone and return its tokens.
    pub fn close(mut self) -> Result<()> {
        self.close_inner()
    }

    fn close_inner(&mut self) -> Result<()> {
        let Some(open) = self.open.take() else {
            return Ok(());
        };

        let returns_active = self.lease.is_full() || self.lease.is_empty();
        let closed = self.lease.close();
        let released = self.lease.release_in_place();

        open.release();
        if returns_active {
            self.tokens.put_active();
        }

        self.deferred.record(closed.and(released))
    }
}

impl Deref for IoZoneHandle {
    type Target = ZoneLease;

    fn deref(&self) -> &ZoneLease {
        &self.lease
    }
}

impl Drop for IoZoneHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close_inner() {
            error!(zone = self.lease.zone_id(), error = %e, "Failed closing I/O zone");
        }
    }
}

impl std::fmt::Debug for IoZoneHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoZoneHandle")
            .field("zone", self.lease.zone())
            .field("open", &self.open.is_some())
            .finish()
    }
}

// =============================================================================
// Migration Zone
// =============================================================================

#[derive(Debug, Default)]
struct MigrationGate {
    migrating: Mutex<bool>,
    cv: Condvar,
}

impl MigrationGate {
    fn enter(&self) {
        let mut migrating = self.migrating.lock();
        while *migrating {
            self.cv.wait(&mut migrating);
        }
        *migrating = true;
    }

    fn leave(&self) {
        *self.migrating.lock() = false;
        self.cv.notify_one();
    }
}

/// The single zone lent to background data movement.
pub struct MigrateZone {
    lease: ZoneLease,
    gate: Arc<MigrationGate>,
    tokens: Arc<ZoneTokens>,
    done: bool,
}

impl MigrateZone {
    /// Give the zone back and let the next migration proceed.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.done, true) {
            return Ok(());
        }

        // A migration that filled the zone returns the zone's active slot
        let full = self.lease.is_full();
        let released = self.lease.release_in_place();
        if full {
            self.tokens.put_active();
        }

        info!(start = self.lease.start(), "ReleaseMigrateZone");
        self.gate.leave();
        released
    }
}

impl Deref for MigrateZone {
    type Target = ZoneLease;

    fn deref(&self) -> &ZoneLease {
        &self.lease
    }
}

impl Drop for MigrateZone {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            error!(error = %e, "Failed releasing migration zone");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
