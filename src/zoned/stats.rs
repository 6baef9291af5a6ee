//! Zone snapshots, space accounting and the garbage histogram.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::lifetime::WriteLifetime;
use super::zone::Zone;
use crate::error::{Error, Result};

/// Number of garbage histogram buckets.
pub const GARBAGE_BUCKETS: usize = 12;

/// Point-in-time state of one zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone_id: u32,
    pub start: u64,
    pub capacity: u64,
    pub max_capacity: u64,
    pub wp: u64,
    pub lifetime: WriteLifetime,
    pub used_capacity: u64,
}

impl ZoneSnapshot {
    pub fn of(zone: &Zone) -> Self {
        Self {
            zone_id: zone.zone_id(),
            start: zone.start(),
            capacity: zone.capacity(),
            max_capacity: zone.max_capacity(),
            wp: zone.write_pointer(),
            lifetime: zone.lifetime(),
            used_capacity: zone.used_capacity(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.wp == self.start
    }

    pub fn is_full(&self) -> bool {
        self.capacity == 0
    }

    /// Written-but-dead fraction of the zone's max capacity.
    pub fn garbage_rate(&self) -> f64 {
        if self.max_capacity == 0 {
            return 0.0;
        }
        let written = self.wp.saturating_sub(self.start);
        written.saturating_sub(self.used_capacity) as f64 / self.max_capacity as f64
    }
}

/// Metadata and I/O zone state of a pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub timestamp: DateTime<Utc>,
    pub meta: Vec<ZoneSnapshot>,
    pub io: Vec<ZoneSnapshot>,
}

impl PoolSnapshot {
    /// Render `{"meta":[...],"io":[...]}`.
    pub fn encode_json(&self) -> Result<String> {
        serde_json::to_string(&serde_json::json!({
            "meta": self.meta,
            "io": self.io,
        }))
        .map_err(|e| Error::Internal(format!("encoding snapshot: {}", e)))
    }
}

/// Space usage summed over I/O zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpaceUsage {
    /// Remaining writable bytes
    pub free: u64,
    /// Live bytes
    pub used: u64,
    /// Dead bytes in full zones
    pub reclaimable: u64,
}

impl SpaceUsage {
    pub fn from_snapshots(zones: &[ZoneSnapshot]) -> Self {
        zones.iter().fold(Self::default(), |mut acc, z| {
            acc.free += z.capacity;
            acc.used += z.used_capacity;
            if z.is_full() {
                acc.reclaimable += z.max_capacity.saturating_sub(z.used_capacity);
            }
            acc
        })
    }
}

/// Zone counts by garbage percentage.
///
/// Bucket 0 holds empty zones; bucket `i` (1..=11) holds zones whose garbage
/// rate rounds into `[(i-1)*10%, i*10%)`, with anything at or past 100%
/// landing in the last bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GarbageHistogram {
    pub buckets: [u64; GARBAGE_BUCKETS],
}

impl GarbageHistogram {
    pub fn bucket_for(zone: &ZoneSnapshot) -> usize {
        if zone.is_empty() {
            return 0;
        }
        let idx = ((zone.garbage_rate() + 0.1) * 10.0) as usize;
        idx.clamp(1, GARBAGE_BUCKETS - 1)
    }

    pub fn from_snapshots<'a>(zones: impl IntoIterator<Item = &'a ZoneSnapshot>) -> Self {
        let mut hist = Self::default();
        for zone in zones {
            hist.buckets[Self::bucket_for(zone)] += 1;
        }
        hist
    }

    pub fn total(&self) -> u64 {
        self.buckets.iter().sum()
    }
}

impl std::fmt::Display for GarbageHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, count) in self.buckets.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", count)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(wp_offset: u64, capacity: u64, used: u64) -> ZoneSnapshot {
        ZoneSnapshot {
            zone_id: 0,
            start: 4096,
            capacity,
            max_capacity: 1000,
            wp: 4096 + wp_offset,
            lifetime: WriteLifetime::Short,
            used_capacity: used,
        }
    }

    #[test]
    fn test_garbage_buckets() {
        assert_eq!(GarbageHistogram::bucket_for(&snap(0, 1000, 0)), 0);
        // No garbage
        assert_eq!(GarbageHistogram::bucket_for(&snap(500, 500, 500)), 1);
        // 25% garbage
        assert_eq!(GarbageHistogram::bucket_for(&snap(500, 500, 250)), 3);
        // Fully dead
        assert_eq!(GarbageHistogram::bucket_for(&snap(1000, 0, 0)), 11);
        // Finished zone, wp past capacity
        assert_eq!(GarbageHistogram::bucket_for(&snap(1024, 0, 0)), 11);
    }

    #[test]
    fn test_histogram_display() {
        let hist = GarbageHistogram::from_snapshots(&[snap(0, 1000, 0), snap(1000, 0, 0)]);
        assert_eq!(hist.total(), 2);
        assert_eq!(hist.to_string(), "[1 0 0 0 0 0 0 0 0 0 0 1]");
    }

    #[test]
    fn test_space_usage() {
        let usage = SpaceUsage::from_snapshots(&[
            snap(0, 1000, 0),
            snap(400, 600, 300),
            snap(1000, 0, 200),
        ]);
        assert_eq!(usage.free, 1600);
        assert_eq!(usage.used, 500);
        assert_eq!(usage.reclaimable, 800);
    }

    #[test]
    fn test_encode_json_shape() {
        let snapshot = PoolSnapshot {
            timestamp: Utc::now(),
            meta: vec![snap(0, 1000, 0)],
            io: vec![],
        };
        let json: serde_json::Value = serde_json::from_str(&snapshot.encode_json().unwrap()).unwrap();
        assert_eq!(json["meta"][0]["max_capacity"], 1000);
        assert_eq!(json["io"].as_array().unwrap().len(), 0);
        assert!(json.get("timestamp").is_none());
    }
}
