//! In-Memory Zoned Device
//!
//! Simulated zoned block device for tests and the simulator binary. Each
//! zone keeps its written bytes in a `BytesMut` and enforces sequential
//! writes at the write pointer the same way real hardware does.
//!
//! Faults can be injected per operation (`fail_next`), writes can be made
//! short (`set_max_write_chunk`), and zones can be forced offline, so the
//! pool's error paths are reachable without hardware.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::BytesMut;
use dashmap::DashMap;
use tracing::debug;

use super::{DeviceLimits, ResetOutcome, ZoneBackend, ZoneCondition, ZoneInfo, ZoneKind};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Geometry of the simulated device.
#[derive(Debug, Clone)]
pub struct MemoryBackendConfig {
    /// Device name reported by `filename()`
    pub name: String,

    /// Total number of zones
    pub nr_zones: u32,

    /// Distance between zone starts in bytes
    pub zone_size: u64,

    /// Writable bytes per zone (<= zone_size)
    pub zone_capacity: u64,

    /// Logical block size
    pub block_size: u32,

    /// Device active-zone ceiling (0 = unlimited)
    pub max_active_zones: u32,

    /// Device open-zone ceiling (0 = unlimited)
    pub max_open_zones: u32,

    /// Leading zones reported as conventional (not sequential-write)
    pub conventional_zones: u32,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            name: "mem-zbd0".to_string(),
            nr_zones: 64,
            zone_size: 1024 * 1024,
            zone_capacity: 1024 * 1024,
            block_size: 4096,
            max_active_zones: 14,
            max_open_zones: 14,
            conventional_zones: 0,
        }
    }
}

impl MemoryBackendConfig {
    /// Validate the geometry.
    pub fn validate(&self) -> Result<()> {
        if self.zone_size == 0 || self.nr_zones == 0 {
            return Err(Error::Config("zone_size and nr_zones must be > 0".into()));
        }
        if self.zone_capacity > self.zone_size {
            return Err(Error::Config(
                "zone_capacity must not exceed zone_size".into(),
            ));
        }
        if self.block_size == 0 || !self.block_size.is_power_of_two() {
            return Err(Error::Config("block_size must be a power of 2".into()));
        }
        Ok(())
    }
}

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultOp {
    Reset,
    Finish,
    Close,
    Write,
    Read,
}

// =============================================================================
// Device
// =============================================================================

struct ZoneCell {
    info: ZoneInfo,
    data: BytesMut,
    offline_on_reset: bool,
}

/// Simulated zoned block device.
pub struct InMemoryZoneBackend {
    config: MemoryBackendConfig,
    zones: DashMap<u32, ZoneCell>,
    faults: DashMap<FaultOp, u32>,
    max_write_chunk: AtomicU64,
    opened: AtomicBool,
    resets: AtomicU64,
    finishes: AtomicU64,
    closes: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryZoneBackend {
    /// Create a simulated device with every zone empty.
    pub fn new(config: MemoryBackendConfig) -> Result<Self> {
        config.validate()?;

        let zones = DashMap::new();
        for idx in 0..config.nr_zones {
            let start = idx as u64 * config.zone_size;
            let kind = if idx < config.conventional_zones {
                ZoneKind::Conventional
            } else {
                ZoneKind::SequentialRequired
            };
            zones.insert(
                idx,
                ZoneCell {
                    info: ZoneInfo {
                        start,
                        max_capacity: config.zone_capacity,
                        write_pointer: start,
                        kind,
                        condition: ZoneCondition::Empty,
                    },
                    data: BytesMut::new(),
                    offline_on_reset: false,
                },
            );
        }

        Ok(Self {
            config,
            zones,
            faults: DashMap::new(),
            max_write_chunk: AtomicU64::new(0),
            opened: AtomicBool::new(false),
            resets: AtomicU64::new(0),
            finishes: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        })
    }

    /// Get the device geometry.
    pub fn config(&self) -> &MemoryBackendConfig {
        &self.config
    }

    /// Make the next `count` calls of `op` fail.
    pub fn fail_next(&self, op: FaultOp, count: u32) {
        self.faults.insert(op, count);
    }

    /// Limit the bytes accepted per write call (0 = unlimited).
    pub fn set_max_write_chunk(&self, bytes: u64) {
        self.max_write_chunk.store(bytes, Ordering::Relaxed);
    }

    /// Pretend `written` bytes are already in zone `idx`, in `condition`.
    pub fn seed_zone(&self, idx: u32, written: u64, condition: ZoneCondition) {
        if let Some(mut cell) = self.zones.get_mut(&idx) {
            let written = written.min(cell.info.max_capacity);
            cell.info.write_pointer = cell.info.start + written;
            cell.info.condition = condition;
            cell.data = BytesMut::zeroed(written as usize);
        }
    }

    /// Take zone `idx` offline.
    pub fn set_offline(&self, idx: u32) {
        if let Some(mut cell) = self.zones.get_mut(&idx) {
            cell.info.condition = ZoneCondition::Offline;
            cell.info.max_capacity = 0;
        }
    }

    /// Zone `idx` goes offline the next time it is reset.
    pub fn set_offline_on_reset(&self, idx: u32) {
        if let Some(mut cell) = self.zones.get_mut(&idx) {
            cell.offline_on_reset = true;
        }
    }

    /// Current state of zone `idx`.
    pub fn zone_info(&self, idx: u32) -> Option<ZoneInfo> {
        self.zones.get(&idx).map(|cell| cell.info)
    }

    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Relaxed)
    }

    pub fn finish_count(&self) -> u64 {
        self.finishes.load(Ordering::Relaxed)
    }

    pub fn close_count(&self) -> u64 {
        self.closes.load(Ordering::Relaxed)
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn take_fault(&self, op: FaultOp) -> bool {
        let mut hit = false;
        if let Some(mut remaining) = self.faults.get_mut(&op) {
            if *remaining > 0 {
                *remaining -= 1;
                hit = true;
            }
        }
        hit
    }

    fn zone_index(&self, offset: u64) -> Option<u32> {
        let idx = offset / self.config.zone_size;
        if idx < self.config.nr_zones as u64 {
            Some(idx as u32)
        } else {
            None
        }
    }

    fn zone_index_for_start(&self, start: u64) -> Result<u32> {
        if start % self.config.zone_size != 0 {
            return Err(Error::InvalidArgument(format!(
                "0x{:x} is not a zone start",
                start
            )));
        }
        self.zone_index(start)
            .ok_or_else(|| Error::InvalidArgument(format!("no zone at 0x{:x}", start)))
    }
}

impl ZoneBackend for InMemoryZoneBackend {
    fn open(&self, readonly: bool, exclusive: bool) -> Result<DeviceLimits> {
        self.opened.store(true, Ordering::Release);
        debug!(
            device = %self.config.name,
            readonly,
            exclusive,
            "Opened in-memory zoned device"
        );
        Ok(DeviceLimits {
            max_active_zones: self.config.max_active_zones,
            max_open_zones: self.config.max_open_zones,
        })
    }

    fn list_zones(&self) -> Result<Vec<ZoneInfo>> {
        (0..self.config.nr_zones)
            .map(|idx| {
                self.zones
                    .get(&idx)
                    .map(|cell| cell.info)
                    .ok_or_else(|| Error::Internal(format!("zone {} missing", idx)))
            })
            .collect()
    }

    fn reset(&self, start: u64) -> Result<ResetOutcome> {
        self.resets.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Reset) {
            return Err(Error::io("reset", "injected reset fault"));
        }

        let idx = self.zone_index_for_start(start)?;
        let mut cell = self
            .zones
            .get_mut(&idx)
            .ok_or_else(|| Error::Internal(format!("zone {} missing", idx)))?;

        if cell.info.is_offline() {
            return Err(Error::io("reset", format!("zone {} is offline", idx)));
        }

        cell.info.write_pointer = cell.info.start;
        cell.data.clear();

        if cell.offline_on_reset {
            cell.info.condition = ZoneCondition::Offline;
            cell.info.max_capacity = 0;
            return Ok(ResetOutcome {
                offline: true,
                max_capacity: 0,
            });
        }

        cell.info.condition = ZoneCondition::Empty;
        cell.info.max_capacity = self.config.zone_capacity;
        Ok(ResetOutcome {
            offline: false,
            max_capacity: self.config.zone_capacity,
        })
    }

    fn finish(&self, start: u64) -> Result<()> {
        self.finishes.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Finish) {
            return Err(Error::io("finish", "injected finish fault"));
        }

        let idx = self.zone_index_for_start(start)?;
        let mut cell = self
            .zones
            .get_mut(&idx)
            .ok_or_else(|| Error::Internal(format!("zone {} missing", idx)))?;

        if cell.info.is_offline() {
            return Err(Error::io("finish", format!("zone {} is offline", idx)));
        }

        cell.info.condition = ZoneCondition::Full;
        cell.info.write_pointer = cell.info.start + self.config.zone_size;
        Ok(())
    }

    fn close(&self, start: u64) -> Result<()> {
        self.closes.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Close) {
            return Err(Error::io("close", "injected close fault"));
        }

        let idx = self.zone_index_for_start(start)?;
        let mut cell = self
            .zones
            .get_mut(&idx)
            .ok_or_else(|| Error::Internal(format!("zone {} missing", idx)))?;

        if cell.info.is_open() {
            cell.info.condition = ZoneCondition::Closed;
        }
        Ok(())
    }

    fn read(&self, buf: &mut [u8], offset: u64, _direct: bool) -> io::Result<usize> {
        if self.take_fault(FaultOp::Read) {
            return Err(io::Error::other("injected read fault"));
        }

        let Some(idx) = self.zone_index(offset) else {
            return Ok(0);
        };
        let Some(cell) = self.zones.get(&idx) else {
            return Ok(0);
        };

        let data_end = cell.info.start + cell.data.len() as u64;
        if offset >= data_end {
            return Ok(0);
        }

        let rel = (offset - cell.info.start) as usize;
        let n = buf.len().min((data_end - offset) as usize);
        buf[..n].copy_from_slice(&cell.data[rel..rel + n]);
        Ok(n)
    }

    fn write(&self, data: &[u8], offset: u64) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::Relaxed);
        if self.take_fault(FaultOp::Write) {
            return Err(io::Error::other("injected write fault"));
        }

        let idx = self
            .zone_index(offset)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "offset beyond device"))?;
        let mut cell = self
            .zones
            .get_mut(&idx)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "zone missing"))?;

        if !cell.info.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("zone {} is {}", idx, cell.info.condition),
            ));
        }
        if offset != cell.info.write_pointer {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "unaligned write at 0x{:x}, write pointer is 0x{:x}",
                    offset, cell.info.write_pointer
                ),
            ));
        }

        let zone_end = cell.info.start + cell.info.max_capacity;
        let remaining = zone_end - cell.info.write_pointer;
        if data.len() as u64 > remaining {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write crosses zone capacity",
            ));
        }

        let mut len = data.len() as u64;
        let chunk = self.max_write_chunk.load(Ordering::Relaxed);
        if chunk > 0 {
            len = len.min(chunk);
        }

        cell.data.extend_from_slice(&data[..len as usize]);
        cell.info.write_pointer += len;
        cell.info.condition = if cell.info.write_pointer == zone_end {
            ZoneCondition::Full
        } else {
            ZoneCondition::ImplicitOpen
        };

        Ok(len as usize)
    }

    fn block_size(&self) -> u32 {
        self.config.block_size
    }

    fn zone_size(&self) -> u64 {
        self.config.zone_size
    }

    fn nr_zones(&self) -> u32 {
        self.config.nr_zones
    }

    fn filename(&self) -> String {
        self.config.name.clone()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_device() -> InMemoryZoneBackend {
        InMemoryZoneBackend::new(MemoryBackendConfig {
            nr_zones: 4,
            zone_size: 1024,
            zone_capacity: 1000,
            block_size: 8,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_config_validation() {
        let mut config = MemoryBackendConfig::default();
        assert!(config.validate().is_ok());

        config.zone_capacity = config.zone_size + 1;
        assert!(config.validate().is_err());

        config.zone_capacity = config.zone_size;
        config.block_size = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_sequential_write_and_read() {
        let dev = small_device();

        assert_eq!(dev.write(&[7u8; 16], 1024).unwrap(), 16);
        assert_eq!(
            dev.zone_info(1).unwrap().condition,
            ZoneCondition::ImplicitOpen
        );

        // Not at the write pointer
        assert!(dev.write(&[1u8; 8], 1024).is_err());

        let mut buf = [0u8; 32];
        assert_eq!(dev.read(&mut buf, 1024, false).unwrap(), 16);
        assert_eq!(&buf[..16], &[7u8; 16]);
        assert_eq!(dev.read(&mut buf, 1040, false).unwrap(), 0);
    }

    #[test]
    fn test_write_fills_zone() {
        let dev = small_device();
        assert_eq!(dev.write(&vec![0u8; 1000], 0).unwrap(), 1000);
        assert_eq!(dev.zone_info(0).unwrap().condition, ZoneCondition::Full);
        assert!(dev.write(&[0u8; 8], 1000).is_err());
    }

    #[test]
    fn test_short_writes() {
        let dev = small_device();
        dev.set_max_write_chunk(8);
        assert_eq!(dev.write(&[0u8; 64], 0).unwrap(), 8);
        assert_eq!(dev.zone_info(0).unwrap().write_pointer, 8);
    }

    #[test]
    fn test_reset_finish_close() {
        let dev = small_device();
        dev.write(&[0u8; 64], 2048).unwrap();

        dev.close(2048).unwrap();
        assert_eq!(dev.zone_info(2).unwrap().condition, ZoneCondition::Closed);

        dev.finish(2048).unwrap();
        let info = dev.zone_info(2).unwrap();
        assert_eq!(info.condition, ZoneCondition::Full);
        assert_eq!(info.write_pointer, 2048 + 1024);

        let outcome = dev.reset(2048).unwrap();
        assert!(!outcome.offline);
        assert_eq!(outcome.max_capacity, 1000);
        assert_eq!(dev.zone_info(2).unwrap().write_pointer, 2048);
        assert_eq!(dev.reset_count(), 1);
        assert_eq!(dev.finish_count(), 1);
    }

    #[test]
    fn test_offline_on_reset() {
        let dev = small_device();
        dev.set_offline_on_reset(3);
        let outcome = dev.reset(3072).unwrap();
        assert!(outcome.offline);
        assert!(dev.zone_info(3).unwrap().is_offline());
    }

    #[test]
    fn test_fault_injection() {
        let dev = small_device();
        dev.fail_next(FaultOp::Finish, 1);
        assert!(dev.finish(0).is_err());
        assert!(dev.finish(0).is_ok());

        dev.fail_next(FaultOp::Write, 2);
        assert!(dev.write(&[0u8; 8], 1024).is_err());
        assert!(dev.write(&[0u8; 8], 1024).is_err());
        assert!(dev.write(&[0u8; 8], 1024).is_ok());
    }

    #[test]
    fn test_list_zones_and_kinds() {
        let dev = InMemoryZoneBackend::new(MemoryBackendConfig {
            nr_zones: 4,
            zone_size: 1024,
            zone_capacity: 1024,
            block_size: 8,
            conventional_zones: 1,
            ..Default::default()
        })
        .unwrap();

        let zones = dev.list_zones().unwrap();
        assert_eq!(zones.len(), 4);
        assert!(!zones[0].is_swr());
        assert!(zones[1].is_swr());
        assert_eq!(zones[3].start, 3072);
    }

    #[test]
    fn test_reset_rejects_non_zone_start() {
        let dev = small_device();
        assert!(dev.reset(10).is_err());
    }
}
