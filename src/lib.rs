//! zonepool - Zone Allocation for Zoned Block Devices
//!
//! Zone allocation and lifecycle manager for append-only zoned block devices
//! used as the storage substrate of an LSM-tree database. Writes with
//! similar expected lifetime are co-located to reduce write amplification,
//! the device's open/active zone ceilings are never exceeded, and zones are
//! reset once all of their data has been invalidated.
//!
//! # Architecture
//!
//! ```text
//! LSM write paths (WAL, flush, compaction)
//!            │
//!            ▼
//!      ZonePool ──── PlacementQuery (level / key-range lookups)
//!            │
//!            ▼
//!      ZoneBackend (device driver, or InMemoryZoneBackend)
//! ```
//!
//! # Modules
//!
//! - [`backend`] - Zoned device capability trait and in-memory device
//! - [`error`] - Error types
//! - [`zoned`] - Zones, tokens, allocation strategies and the zone pool

pub mod backend;
pub mod error;
pub mod zoned;

// Re-export commonly used types
pub use backend::{InMemoryZoneBackend, MemoryBackendConfig, ZoneBackend};
pub use error::{Error, Result};
pub use zoned::{
    AllocMode, FileId, IoType, IoZoneHandle, KeyRange, LevelFileCatalog, MigrateZone,
    WriteContext, WriteLifetime, ZonePool, ZonedConfig,
};

/// Crate version
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
