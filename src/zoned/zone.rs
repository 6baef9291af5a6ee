//! Zone entity and its busy-flag lease.
//!
//! A [`Zone`] wraps the mutable state of one physical zone. Its fields are
//! atomics so scans can read them without locking, but every mutation of
//! capacity, write pointer or lifetime goes through a [`ZoneLease`], which
//! can only exist while the zone's busy flag is held.

use std::collections::HashSet;
use std::io;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam::utils::Backoff;
use parking_lot::Mutex;
use tracing::{debug, error};

use super::extent::{ExtentId, FileId, ZoneExtentInfo};
use super::lifetime::WriteLifetime;
use super::metrics::{LatencyGuard, ZoneMetrics};
use crate::backend::{ZoneBackend, ZoneInfo};
use crate::error::{Error, Result};

// =============================================================================
// Device Context
// =============================================================================

/// Device-wide state shared by every zone.
pub(crate) struct DeviceContext {
    pub backend: Arc<dyn ZoneBackend>,
    pub zone_size: u64,
    pub block_size: u32,
    pub metrics: Arc<dyn ZoneMetrics>,
    pub bytes_written: AtomicU64,
}

impl DeviceContext {
    pub fn new(backend: Arc<dyn ZoneBackend>, metrics: Arc<dyn ZoneMetrics>) -> Self {
        Self {
            zone_size: backend.zone_size(),
            block_size: backend.block_size(),
            backend,
            metrics,
            bytes_written: AtomicU64::new(0),
        }
    }
}

// =============================================================================
// Zone
// =============================================================================

/// One physical zone.
pub struct Zone {
    ctx: Arc<DeviceContext>,
    zone_id: u32,
    start: u64,
    max_capacity: AtomicU64,
    capacity: AtomicU64,
    wp: AtomicU64,
    lifetime: AtomicU8,
    used_capacity: AtomicU64,
    busy: AtomicBool,
    extents: Mutex<ExtentList>,
}

/// Extents of the current zone generation. The generation advances on every
/// reset and is never rewound.
#[derive(Debug, Default)]
struct ExtentList {
    generation: u64,
    items: Vec<ZoneExtentInfo>,
}

impl Zone {
    pub(crate) fn new(ctx: Arc<DeviceContext>, zone_id: u32, info: &ZoneInfo) -> Self {
        let capacity = if info.is_writable() {
            info.max_capacity
                .saturating_sub(info.write_pointer.saturating_sub(info.start))
        } else {
            0
        };

        Self {
            ctx,
            zone_id,
            start: info.start,
            max_capacity: AtomicU64::new(info.max_capacity),
            capacity: AtomicU64::new(capacity),
            wp: AtomicU64::new(info.write_pointer),
            lifetime: AtomicU8::new(WriteLifetime::NotSet.as_u8()),
            used_capacity: AtomicU64::new(0),
            busy: AtomicBool::new(false),
            extents: Mutex::new(ExtentList::default()),
        }
    }

    /// Index of the zone in the device zone list.
    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn max_capacity(&self) -> u64 {
        self.max_capacity.load(Ordering::Relaxed)
    }

    /// Remaining writable bytes.
    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn write_pointer(&self) -> u64 {
        self.wp.load(Ordering::Relaxed)
    }

    pub fn lifetime(&self) -> WriteLifetime {
        WriteLifetime::from_u8(self.lifetime.load(Ordering::Relaxed))
    }

    /// Bytes of live data, maintained by the file layer.
    pub fn used_capacity(&self) -> u64 {
        self.used_capacity.load(Ordering::Relaxed)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.write_pointer() == self.start
    }

    pub fn is_full(&self) -> bool {
        self.capacity() == 0
    }

    pub fn is_used(&self) -> bool {
        self.used_capacity() > 0
    }

    /// Byte offset is inside this zone.
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.start + self.ctx.zone_size
    }

    /// Try to take the busy flag without blocking.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ZoneLease> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ZoneLease {
                zone: Arc::clone(self),
                held: true,
            })
    }

    /// Spin until the busy flag is taken.
    pub fn acquire_blocking(self: &Arc<Self>) -> ZoneLease {
        let backoff = Backoff::new();
        loop {
            if let Some(lease) = self.try_acquire() {
                return lease;
            }
            backoff.snooze();
        }
    }

    // ----- extents -----

    /// Copy of the zone's extent list.
    pub fn extents(&self) -> Vec<ZoneExtentInfo> {
        self.extents.lock().items.clone()
    }

    /// Bytes held by invalidated extents.
    pub fn garbage_bytes(&self) -> u64 {
        self.extents
            .lock()
            .items
            .iter()
            .filter(|ext| !ext.is_valid())
            .map(|ext| ext.length)
            .sum()
    }

    /// Valid bytes belonging to any of `files`, and invalid bytes, in one pass.
    pub(crate) fn overlap_and_garbage(&self, files: &HashSet<FileId>) -> (u64, u64) {
        let mut valid = 0;
        let mut garbage = 0;
        for ext in self.extents.lock().items.iter() {
            if !ext.is_valid() {
                garbage += ext.length;
            } else if files.contains(&ext.file) {
                valid += ext.length;
            }
        }
        (valid, garbage)
    }

    /// Attribute `extent` to written bytes of this zone. Every extent ever
    /// recorded since the last reset counts, valid or not, so the same bytes
    /// cannot be attributed twice.
    pub(crate) fn push_extent(&self, extent: ZoneExtentInfo) -> Result<ExtentId> {
        let mut extents = self.extents.lock();
        let written = self.write_pointer().saturating_sub(self.start);
        let attributed: u64 = extents.items.iter().map(|ext| ext.length).sum();

        match attributed.checked_add(extent.length) {
            Some(total) if total <= written => {}
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "extent of {} bytes exceeds unattributed data in zone {} ({} of {} written bytes attributed)",
                    extent.length, self.zone_id, attributed, written
                )))
            }
        }

        self.used_capacity
            .fetch_add(extent.length, Ordering::Relaxed);
        extents.items.push(extent);
        Ok(ExtentId::new(extents.generation, extents.items.len() - 1))
    }

    /// Invalidate one extent. Returns the owning file and whether that file
    /// still has valid data in this zone, or `None` if the extent was already
    /// invalid or belongs to a generation before the last reset.
    pub(crate) fn invalidate_extent(&self, id: ExtentId) -> Result<Option<(FileId, bool)>> {
        let mut extents = self.extents.lock();
        if id.generation() != extents.generation {
            debug!(zone = self.zone_id, extent = %id, "Extent reset with its zone");
            return Ok(None);
        }

        let ext = extents.items.get_mut(id.index()).ok_or_else(|| {
            Error::InvalidArgument(format!("zone {} has no extent {}", self.zone_id, id))
        })?;

        if !ext.invalidate() {
            debug!(zone = self.zone_id, extent = %id, "Extent already invalid");
            return Ok(None);
        }

        let (file, length) = (ext.file, ext.length);
        self.sub_used(length)?;

        let still_valid = extents
            .items
            .iter()
            .any(|ext| ext.is_valid() && ext.file == file);
        Ok(Some((file, still_valid)))
    }

    /// Invalidate every valid extent of `file`. Returns bytes released.
    pub(crate) fn invalidate_file(&self, file: FileId) -> Result<u64> {
        let mut extents = self.extents.lock();
        let mut released = 0;
        for ext in extents.items.iter_mut().filter(|ext| ext.file == file) {
            if ext.invalidate() {
                released += ext.length;
            }
        }
        if released > 0 {
            self.sub_used(released)?;
        }
        Ok(released)
    }

    fn sub_used(&self, length: u64) -> Result<()> {
        self.used_capacity
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_sub(length)
            })
            .map(|_| ())
            .map_err(|used| {
                Error::Corruption(format!(
                    "zone {} used capacity {} below released {}",
                    self.zone_id, used, length
                ))
            })
    }

    fn release_busy(&self) -> Result<()> {
        self.busy
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                Error::Corruption(format!("zone {} released while not busy", self.zone_id))
            })
    }
}

impl std::fmt::Debug for Zone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zone")
            .field("zone_id", &self.zone_id)
            .field("start", &self.start)
            .field("capacity", &self.capacity())
            .field("max_capacity", &self.max_capacity())
            .field("wp", &self.write_pointer())
            .field("lifetime", &self.lifetime())
            .field("used_capacity", &self.used_capacity())
            .field("busy", &self.is_busy())
            .finish()
    }
}

// =============================================================================
// Zone Lease
// =============================================================================

/// Exclusive hold on a zone's busy flag. Releases on drop.
pub struct ZoneLease {
    zone: Arc<Zone>,
    held: bool,
}

impl ZoneLease {
    pub fn zone(&self) -> &Arc<Zone> {
        &self.zone
    }

    pub fn set_lifetime(&self, lifetime: WriteLifetime) {
        self.zone
            .lifetime
            .store(lifetime.as_u8(), Ordering::Relaxed);
    }

    /// Write `data` at the write pointer.
    ///
    /// `data.len()` must fit in the remaining capacity and be a multiple of
    /// the block size. Partial backend writes are retried; on failure the
    /// zone reflects exactly the bytes that reached the device.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        let zone = &self.zone;
        let ctx = &zone.ctx;
        let size = data.len() as u64;

        if size > zone.capacity() {
            return Err(Error::NoSpace(format!(
                "append of {} bytes exceeds zone {} capacity {}",
                size,
                zone.zone_id,
                zone.capacity()
            )));
        }
        if size % ctx.block_size as u64 != 0 {
            return Err(Error::InvalidArgument(format!(
                "append of {} bytes is not aligned to block size {}",
                size, ctx.block_size
            )));
        }

        let _latency = LatencyGuard::new(|elapsed| ctx.metrics.report_write(size, elapsed));

        let mut left = data;
        while !left.is_empty() {
            let wp = zone.write_pointer();
            match ctx.backend.write(left, wp) {
                Ok(0) => {
                    return Err(Error::io(
                        "append",
                        format!("zero-length write at 0x{:x}", wp),
                    ))
                }
                Ok(n) => {
                    let n64 = n as u64;
                    zone.wp.store(wp + n64, Ordering::Relaxed);
                    zone.capacity.fetch_sub(n64, Ordering::Relaxed);
                    ctx.bytes_written.fetch_add(n64, Ordering::Relaxed);
                    left = &left[n..];
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::io("append", e.to_string())),
            }
        }

        Ok(())
    }

    /// Reset the zone. Fails if it still holds live data.
    pub fn reset(&self) -> Result<()> {
        let zone = &self.zone;
        if zone.is_used() {
            return Err(Error::InvalidArgument(format!(
                "zone {} still holds {} live bytes",
                zone.zone_id,
                zone.used_capacity()
            )));
        }

        let outcome = zone.ctx.backend.reset(zone.start)?;

        if outcome.offline {
            zone.capacity.store(0, Ordering::Relaxed);
        } else {
            zone.max_capacity
                .store(outcome.max_capacity, Ordering::Relaxed);
            zone.capacity
                .store(outcome.max_capacity, Ordering::Relaxed);
        }
        zone.wp.store(zone.start, Ordering::Relaxed);
        zone.lifetime
            .store(WriteLifetime::NotSet.as_u8(), Ordering::Relaxed);
        {
            let mut extents = zone.extents.lock();
            extents.items.clear();
            extents.generation += 1;
        }

        debug!(zone = zone.zone_id, offline = outcome.offline, "Reset zone");
        Ok(())
    }

    /// Finish the zone. Unwritten space is lost until the next reset.
    pub fn finish(&self) -> Result<()> {
        let zone = &self.zone;
        zone.ctx.backend.finish(zone.start)?;

        zone.capacity.store(0, Ordering::Relaxed);
        zone.wp
            .store(zone.start + zone.ctx.zone_size, Ordering::Relaxed);

        debug!(zone = zone.zone_id, "Finished zone");
        Ok(())
    }

    /// Close the zone. No-op when it is empty or full.
    pub fn close(&self) -> Result<()> {
        let zone = &self.zone;
        if zone.is_empty() || zone.is_full() {
            return Ok(());
        }
        zone.ctx.backend.close(zone.start)
    }

    /// Give the busy flag back.
    pub fn release(mut self) -> Result<()> {
        self.release_in_place()
    }

    /// Give the busy flag back without consuming the lease. Later calls and
    /// the drop are no-ops.
    pub(crate) fn release_in_place(&mut self) -> Result<()> {
        if !std::mem::replace(&mut self.held, false) {
            return Ok(());
        }
        self.zone.release_busy()
    }
}

impl Deref for ZoneLease {
    type Target = Zone;

    fn deref(&self) -> &Zone {
        &self.zone
    }
}

impl Drop for ZoneLease {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.zone.release_busy() {
                debug_assert!(false, "{}", e);
                error!(error = %e, "Failed to release zone lease");
            }
        }
    }
}

impl std::fmt::Debug for ZoneLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ZoneLease").field(&self.zone).finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{FaultOp, InMemoryZoneBackend, MemoryBackendConfig};
    use crate::zoned::metrics::NoopZoneMetrics;
    use assert_matches::assert_matches;
    use std::sync::atomic::AtomicU32;

    pub(crate) fn test_device(nr_zones: u32) -> (Arc<InMemoryZoneBackend>, Arc<DeviceContext>) {
        let backend = Arc::new(
            InMemoryZoneBackend::new(MemoryBackendConfig {
                nr_zones,
                zone_size: 1024,
                zone_capacity: 1000,
                block_size: 8,
                ..Default::default()
            })
            .unwrap(),
        );
        let ctx = Arc::new(DeviceContext::new(
            backend.clone(),
            Arc::new(NoopZoneMetrics),
        ));
        (backend, ctx)
    }

    fn zone_at(backend: &InMemoryZoneBackend, ctx: &Arc<DeviceContext>, idx: u32) -> Arc<Zone> {
        let info = backend.zone_info(idx).unwrap();
        Arc::new(Zone::new(ctx.clone(), idx, &info))
    }

    fn assert_accounting(zone: &Zone) {
        if !zone.is_full() {
            assert_eq!(
                zone.capacity() + (zone.write_pointer() - zone.start()),
                zone.max_capacity()
            );
        }
    }

    // ===== Lease Tests =====

    #[test]
    fn test_try_acquire_is_exclusive() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 1);

        let lease = zone.try_acquire().unwrap();
        assert!(zone.is_busy());
        assert!(zone.try_acquire().is_none());

        lease.release().unwrap();
        assert!(!zone.is_busy());

        {
            let _lease = zone.try_acquire().unwrap();
        }
        assert!(!zone.is_busy());
    }

    #[test]
    fn test_concurrent_acquire_single_holder() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let holders = AtomicU32::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                let zone = &zone;
                let holders = &holders;
                s.spawn(move || {
                    for _ in 0..1000 {
                        if let Some(lease) = zone.try_acquire() {
                            assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                            holders.fetch_sub(1, Ordering::SeqCst);
                            drop(lease);
                        }
                    }
                });
            }
        });

        assert!(!zone.is_busy());
    }

    #[test]
    fn test_acquire_blocking_waits_for_release() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();

        std::thread::scope(|s| {
            let waiter = s.spawn(|| {
                let _lease = zone.acquire_blocking();
            });
            std::thread::sleep(std::time::Duration::from_millis(10));
            drop(lease);
            waiter.join().unwrap();
        });
        assert!(!zone.is_busy());
    }

    // ===== Append Tests =====

    #[test]
    fn test_append_advances_write_pointer() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 2);
        let lease = zone.try_acquire().unwrap();

        assert!(zone.is_empty());
        lease.append(&[1u8; 64]).unwrap();
        assert_eq!(zone.write_pointer(), 2048 + 64);
        assert_eq!(zone.capacity(), 1000 - 64);
        assert!(!zone.is_empty());
        assert_accounting(&zone);
        assert_eq!(ctx.bytes_written.load(Ordering::Relaxed), 64);
    }

    #[test]
    fn test_append_no_space_leaves_state() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();
        lease.append(&vec![0u8; 992]).unwrap();

        let wp = zone.write_pointer();
        assert_matches!(lease.append(&[0u8; 16]), Err(Error::NoSpace(_)));
        assert_eq!(zone.write_pointer(), wp);
        assert_eq!(zone.capacity(), 8);
    }

    #[test]
    fn test_append_rejects_unaligned() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();
        assert_matches!(lease.append(&[0u8; 5]), Err(Error::InvalidArgument(_)));
        assert!(zone.is_empty());
    }

    #[test]
    fn test_append_retries_short_writes() {
        let (backend, ctx) = test_device(4);
        backend.set_max_write_chunk(8);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();

        lease.append(&[3u8; 40]).unwrap();
        assert_eq!(zone.write_pointer(), 40);
        assert_eq!(backend.write_count(), 5);
    }

    #[test]
    fn test_append_failure_reflects_written_bytes() {
        let (backend, ctx) = test_device(4);
        backend.set_max_write_chunk(16);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();

        lease.append(&[0u8; 16]).unwrap();
        backend.fail_next(FaultOp::Write, 1);
        assert_matches!(lease.append(&[0u8; 32]), Err(Error::Io { .. }));
        assert_eq!(zone.write_pointer(), 16);
        assert_accounting(&zone);
    }

    // ===== Lifecycle Tests =====

    #[test]
    fn test_fill_then_full() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 1);
        let lease = zone.try_acquire().unwrap();
        lease.append(&vec![0u8; 1000]).unwrap();
        assert!(zone.is_full());
    }

    #[test]
    fn test_finish_and_reset() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 1);
        let lease = zone.try_acquire().unwrap();
        lease.set_lifetime(WriteLifetime::Long);
        lease.append(&[0u8; 64]).unwrap();

        lease.finish().unwrap();
        assert!(zone.is_full());
        assert_eq!(zone.write_pointer(), 1024 + 1024);

        lease.reset().unwrap();
        assert!(zone.is_empty());
        assert_eq!(zone.capacity(), 1000);
        assert_eq!(zone.lifetime(), WriteLifetime::NotSet);
        assert_accounting(&zone);
    }

    #[test]
    fn test_reset_rejects_live_data() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();
        lease.append(&[0u8; 64]).unwrap();
        zone.push_extent(ZoneExtentInfo::new(0, FileId(1), 64, WriteLifetime::Short, None))
            .unwrap();

        assert_matches!(lease.reset(), Err(Error::InvalidArgument(_)));
        assert_eq!(backend.reset_count(), 0);
    }

    #[test]
    fn test_reset_offline_zone() {
        let (backend, ctx) = test_device(4);
        backend.set_offline_on_reset(3);
        let zone = zone_at(&backend, &ctx, 3);
        let lease = zone.try_acquire().unwrap();
        lease.append(&[0u8; 8]).unwrap();

        lease.reset().unwrap();
        assert_eq!(zone.capacity(), 0);
        assert!(zone.is_full());
    }

    #[test]
    fn test_close_skips_empty_and_full() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();

        lease.close().unwrap();
        assert_eq!(backend.close_count(), 0);

        lease.append(&[0u8; 8]).unwrap();
        lease.close().unwrap();
        assert_eq!(backend.close_count(), 1);

        lease.finish().unwrap();
        lease.close().unwrap();
        assert_eq!(backend.close_count(), 1);
    }

    #[test]
    fn test_backend_failure_propagates() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();
        backend.fail_next(FaultOp::Finish, 1);
        assert_matches!(lease.finish(), Err(Error::Io { .. }));
        assert!(!zone.is_full());
    }

    // ===== Extent Tests =====

    #[test]
    fn test_extent_accounting() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();
        lease.append(&[0u8; 184]).unwrap();

        let extent = |file, length, level| {
            zone.push_extent(ZoneExtentInfo::new(0, FileId(file), length, WriteLifetime::Short, Some(level)))
                .unwrap()
        };
        let a = extent(1, 100, 1);
        extent(1, 50, 1);
        extent(2, 30, 2);
        assert_eq!(zone.used_capacity(), 180);
        assert_matches!(
            zone.push_extent(ZoneExtentInfo::new(0, FileId(3), 8, WriteLifetime::Short, None)),
            Err(Error::InvalidArgument(_))
        );

        assert_eq!(zone.invalidate_extent(a).unwrap(), Some((FileId(1), true)));
        assert_eq!(zone.invalidate_extent(a).unwrap(), None);
        assert_eq!(zone.used_capacity(), 80);
        assert_eq!(zone.garbage_bytes(), 100);

        let files: HashSet<FileId> = [FileId(1)].into_iter().collect();
        assert_eq!(zone.overlap_and_garbage(&files), (50, 100));

        assert_eq!(zone.invalidate_file(FileId(1)).unwrap(), 50);
        assert_eq!(zone.used_capacity(), 30);
    }

    #[test]
    fn test_extent_ids_do_not_survive_reset() {
        let (backend, ctx) = test_device(4);
        let zone = zone_at(&backend, &ctx, 0);
        let lease = zone.try_acquire().unwrap();

        lease.append(&[0u8; 64]).unwrap();
        let old = zone
            .push_extent(ZoneExtentInfo::new(0, FileId(1), 64, WriteLifetime::Short, None))
            .unwrap();
        assert!(zone.invalidate_extent(old).unwrap().is_some());
        lease.reset().unwrap();

        lease.append(&[0u8; 64]).unwrap();
        let new = zone
            .push_extent(ZoneExtentInfo::new(0, FileId(2), 64, WriteLifetime::Short, None))
            .unwrap();
        assert_eq!(new.index(), old.index());
        assert_eq!(new.generation(), old.generation() + 1);

        assert_eq!(zone.invalidate_extent(old).unwrap(), None);
        assert_eq!(zone.used_capacity(), 64);
        assert!(zone.extents()[0].is_valid());
    }
}
