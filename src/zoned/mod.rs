//! Zone Allocation and Lifecycle Management
//!
//! Hands out zones of a zoned block device to the write paths of an LSM-tree
//! store while respecting the device's open/active zone ceilings.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              ZonePool                                    │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │   WAL / flush / compaction                 maintenance                   │
//! │          │                                      │                        │
//! │          ▼                                      ▼                        │
//! │  ┌─────────────────┐                 ┌──────────────────────┐            │
//! │  │ ZoneTokens      │ open / active   │ reset_unused         │            │
//! │  │ (ceilings)      │                 │ finish_cheapest      │            │
//! │  └────────┬────────┘                 │ apply_finish_thresh. │            │
//! │           ▼                          └──────────┬───────────┘            │
//! │  ┌─────────────────┐   ┌──────────────────┐     │                        │
//! │  │ Strategy        │──▶│ PlacementIndex   │     │                        │
//! │  │ lifetime / CAZA │   │ file → zones     │     │                        │
//! │  └────────┬────────┘   └──────────────────┘     │                        │
//! │           ▼                                     ▼                        │
//! │  ┌──────────┐ ┌──────────┐ ┌──────────┐ ┌──────────┐                    │
//! │  │  Zone 3  │ │  Zone 4  │ │  Zone 5  │ │  Zone N  │   (busy lease)     │
//! │  └──────────┘ └──────────┘ └──────────┘ └──────────┘                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Zone Lifecycle
//!
//! ```text
//! Empty → Writing → Full/Finished → (all data invalid) → Reset → Empty
//! ```

pub mod config;
pub mod extent;
pub mod lifetime;
pub mod metrics;
pub mod placement;
pub mod pool;
pub mod stats;
pub mod status;
pub mod tokens;
pub mod zone;

#[cfg(test)]
mod proptest;

pub use config::{AllocMode, ZonedConfig};
pub use extent::{ExtentId, FileId, ZoneExtentInfo};
pub use lifetime::{lifetime_diff, WriteLifetime};
pub use metrics::{AllocKind, NoopZoneMetrics, PrometheusZoneMetrics, ZoneMetrics};
pub use placement::{
    IoType, KeyRange, LevelFileCatalog, NoPlacementQuery, PlacementIndex, PlacementQuery,
    WriteContext,
};
pub use pool::{IoZoneHandle, MigrateZone, ZonePool};
pub use stats::{GarbageHistogram, PoolSnapshot, SpaceUsage, ZoneSnapshot};
pub use status::DeferredStatus;
pub use tokens::{ActiveToken, OpenToken, ZoneTokens};
pub use zone::{Zone, ZoneLease};

// =============================================================================
// Constants
// =============================================================================

/// Metadata zones reserved at open (two for log rollover plus a spare)
pub const META_ZONES: u32 = 3;

/// Minimum zones a device must report
pub const MIN_ZONES: u32 = 32;

/// Active/open zones held back from I/O allocation (metadata + migration)
pub const RESERVED_ZONES: u32 = 2;
