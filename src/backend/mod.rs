//! Zoned Device Backend Capability
//!
//! The pool never talks to hardware directly. Everything it needs from a
//! zoned block device (geometry, per-zone state, reset/finish/close, raw
//! sequential I/O) goes through the [`ZoneBackend`] trait.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                         ZonePool                            │
//! └──────────────────────────────┬─────────────────────────────┘
//!                                │ ZoneBackend (trait)
//!                ┌───────────────┴───────────────┐
//!                ▼                               ▼
//!     ┌─────────────────────┐         ┌─────────────────────┐
//!     │ InMemoryZoneBackend │         │ libzbd / zonefs     │
//!     │ (simulation, tests) │         │ (external driver)   │
//!     └─────────────────────┘         └─────────────────────┘
//! ```

pub mod memory;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use memory::{FaultOp, InMemoryZoneBackend, MemoryBackendConfig};

// =============================================================================
// Zone Geometry
// =============================================================================

/// Zone type as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ZoneKind {
    /// Randomly writable zone
    Conventional,
    /// Sequential write required
    SequentialRequired,
}

/// Zone condition as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ZoneCondition {
    #[default]
    Empty,
    ImplicitOpen,
    ExplicitOpen,
    Closed,
    Full,
    ReadOnly,
    Offline,
}

impl std::fmt::Display for ZoneCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneCondition::Empty => write!(f, "Empty"),
            ZoneCondition::ImplicitOpen => write!(f, "ImplicitOpen"),
            ZoneCondition::ExplicitOpen => write!(f, "ExplicitOpen"),
            ZoneCondition::Closed => write!(f, "Closed"),
            ZoneCondition::Full => write!(f, "Full"),
            ZoneCondition::ReadOnly => write!(f, "ReadOnly"),
            ZoneCondition::Offline => write!(f, "Offline"),
        }
    }
}

/// Snapshot of one zone's geometry and state, as listed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneInfo {
    /// Byte offset of the zone start
    pub start: u64,

    /// Writable bytes in the zone (may be smaller than the zone size)
    pub max_capacity: u64,

    /// Absolute write pointer
    pub write_pointer: u64,

    /// Zone type
    pub kind: ZoneKind,

    /// Zone condition
    pub condition: ZoneCondition,
}

impl ZoneInfo {
    /// Sequential write required zone.
    pub fn is_swr(&self) -> bool {
        self.kind == ZoneKind::SequentialRequired
    }

    pub fn is_offline(&self) -> bool {
        self.condition == ZoneCondition::Offline
    }

    /// Zone accepts writes at its write pointer.
    pub fn is_writable(&self) -> bool {
        !matches!(
            self.condition,
            ZoneCondition::Offline | ZoneCondition::ReadOnly | ZoneCondition::Full
        )
    }

    /// Zone consumes one of the device's active-zone resources.
    pub fn is_active(&self) -> bool {
        matches!(
            self.condition,
            ZoneCondition::ImplicitOpen | ZoneCondition::ExplicitOpen | ZoneCondition::Closed
        )
    }

    /// Zone consumes one of the device's open-zone resources.
    pub fn is_open(&self) -> bool {
        matches!(
            self.condition,
            ZoneCondition::ImplicitOpen | ZoneCondition::ExplicitOpen
        )
    }
}

/// Concurrency ceilings reported by the device. Zero means "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceLimits {
    pub max_active_zones: u32,
    pub max_open_zones: u32,
}

/// Result of a zone reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetOutcome {
    /// Zone went offline during the reset
    pub offline: bool,

    /// Writable capacity after the reset
    pub max_capacity: u64,
}

// =============================================================================
// Backend Trait
// =============================================================================

/// Capability interface of a zoned block device.
///
/// Implementations must be safe to call from many threads at once; the pool
/// guarantees that zone-level operations (`reset`, `finish`, `close`,
/// `write`) on one zone are never issued concurrently.
pub trait ZoneBackend: Send + Sync {
    /// Open the device and report its active/open zone ceilings.
    fn open(&self, readonly: bool, exclusive: bool) -> Result<DeviceLimits>;

    /// List every zone on the device, in address order.
    fn list_zones(&self) -> Result<Vec<ZoneInfo>>;

    /// Reset the zone starting at `start`.
    fn reset(&self, start: u64) -> Result<ResetOutcome>;

    /// Transition the zone starting at `start` to full.
    fn finish(&self, start: u64) -> Result<()>;

    /// Move the zone starting at `start` from open to closed.
    fn close(&self, start: u64) -> Result<()>;

    /// Read up to `buf.len()` bytes at `offset`. Returns bytes read, 0 at the
    /// end of written data.
    fn read(&self, buf: &mut [u8], offset: u64, direct: bool) -> std::io::Result<usize>;

    /// Write `data` at `offset` (which must be a zone write pointer). May
    /// write fewer bytes than requested.
    fn write(&self, data: &[u8], offset: u64) -> std::io::Result<usize>;

    /// Logical block size in bytes.
    fn block_size(&self) -> u32;

    /// Zone size in bytes (distance between zone starts).
    fn zone_size(&self) -> u64;

    /// Total number of zones.
    fn nr_zones(&self) -> u32;

    /// Device path or name, for logging.
    fn filename(&self) -> String;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn info(condition: ZoneCondition) -> ZoneInfo {
        ZoneInfo {
            start: 0,
            max_capacity: 1000,
            write_pointer: 0,
            kind: ZoneKind::SequentialRequired,
            condition,
        }
    }

    #[test]
    fn test_zone_info_flags() {
        assert!(info(ZoneCondition::Empty).is_writable());
        assert!(!info(ZoneCondition::Empty).is_active());

        let open = info(ZoneCondition::ImplicitOpen);
        assert!(open.is_active());
        assert!(open.is_open());

        let closed = info(ZoneCondition::Closed);
        assert!(closed.is_active());
        assert!(!closed.is_open());

        assert!(!info(ZoneCondition::Full).is_writable());
        assert!(info(ZoneCondition::Offline).is_offline());
        assert!(!info(ZoneCondition::ReadOnly).is_writable());
    }

    #[test]
    fn test_zone_condition_display() {
        assert_eq!(ZoneCondition::ImplicitOpen.to_string(), "ImplicitOpen");
        assert_eq!(ZoneCondition::Offline.to_string(), "Offline");
    }
}
