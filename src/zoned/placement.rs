//! Content-aware placement: write context, level/key-range queries and the
//! file-to-zone index.

use std::collections::{BTreeSet, HashMap};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::extent::FileId;
use super::lifetime::WriteLifetime;

// =============================================================================
// Write Context
// =============================================================================

/// Inclusive user-key range of a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyRange {
    pub smallest: Bytes,
    pub largest: Bytes,
}

impl KeyRange {
    pub fn new(smallest: impl Into<Bytes>, largest: impl Into<Bytes>) -> Self {
        Self {
            smallest: smallest.into(),
            largest: largest.into(),
        }
    }

    /// Ranges share at least one key.
    pub fn overlaps(&self, other: &KeyRange) -> bool {
        self.smallest <= other.largest && other.smallest <= self.largest
    }
}

/// Which write path is asking for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoType {
    /// Write-ahead log
    Wal,
    /// Flush, compaction and everything else
    #[default]
    Other,
}

/// Everything the allocator knows about an incoming write.
#[derive(Debug, Clone, Default)]
pub struct WriteContext {
    pub lifetime: WriteLifetime,
    pub io_type: IoType,

    /// File being written, if the caller tracks one
    pub file: Option<FileId>,

    /// Key range of the file being written
    pub key_range: Option<KeyRange>,

    /// LSM level of the file; `None` disables adjacency lookups
    pub level: Option<u32>,

    /// Minimum free capacity a reused zone must have
    pub min_capacity: u64,
}

impl WriteContext {
    pub fn new(lifetime: WriteLifetime, io_type: IoType) -> Self {
        Self {
            lifetime,
            io_type,
            ..Default::default()
        }
    }

    pub fn wal() -> Self {
        Self::new(WriteLifetime::Short, IoType::Wal)
    }

    pub fn with_file(mut self, file: FileId) -> Self {
        self.file = Some(file);
        self
    }

    pub fn with_key_range(mut self, range: KeyRange, level: u32) -> Self {
        self.key_range = Some(range);
        self.level = Some(level);
        self
    }

    pub fn with_min_capacity(mut self, min_capacity: u64) -> Self {
        self.min_capacity = min_capacity;
        self
    }

    pub fn is_wal(&self) -> bool {
        self.io_type == IoType::Wal
    }
}

// =============================================================================
// Placement Query
// =============================================================================

/// Database-side lookup of files near a write in the LSM tree.
pub trait PlacementQuery: Send + Sync {
    /// Files whose key range overlaps `range` and whose level is adjacent to
    /// `level`. `None` means no adjacency lookup.
    fn adjacent_overlapping_files(&self, range: &KeyRange, level: Option<u32>) -> Vec<FileId>;
}

/// Query that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPlacementQuery;

impl PlacementQuery for NoPlacementQuery {
    fn adjacent_overlapping_files(&self, _range: &KeyRange, _level: Option<u32>) -> Vec<FileId> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
struct CatalogEntry {
    level: u32,
    range: KeyRange,
}

/// In-memory catalog of live files by level and key range.
#[derive(Debug, Default)]
pub struct LevelFileCatalog {
    files: RwLock<HashMap<FileId, CatalogEntry>>,
}

impl LevelFileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, file: FileId, level: u32, range: KeyRange) {
        self.files.write().insert(file, CatalogEntry { level, range });
    }

    pub fn remove(&self, file: FileId) -> bool {
        self.files.write().remove(&file).is_some()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

impl PlacementQuery for LevelFileCatalog {
    fn adjacent_overlapping_files(&self, range: &KeyRange, level: Option<u32>) -> Vec<FileId> {
        let Some(level) = level else {
            return Vec::new();
        };

        let mut found: Vec<FileId> = self
            .files
            .read()
            .iter()
            .filter(|(_, entry)| entry.level.abs_diff(level) == 1 && entry.range.overlaps(range))
            .map(|(file, _)| *file)
            .collect();
        found.sort_unstable();
        found
    }
}

// =============================================================================
// Placement Index
// =============================================================================

/// Which zones currently hold data of which file.
#[derive(Debug, Default)]
pub struct PlacementIndex {
    map: Mutex<HashMap<FileId, Vec<u32>>>,
}

impl PlacementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note that `file` has data in `zone_id`.
    pub fn add(&self, file: FileId, zone_id: u32) {
        let mut map = self.map.lock();
        let zones = map.entry(file).or_default();
        if !zones.contains(&zone_id) {
            zones.push(zone_id);
        }
    }

    /// Note that `file` no longer has data in `zone_id`.
    pub fn remove(&self, file: FileId, zone_id: u32) {
        let mut map = self.map.lock();
        if let Some(zones) = map.get_mut(&file) {
            zones.retain(|z| *z != zone_id);
            if zones.is_empty() {
                map.remove(&file);
            }
        }
    }

    /// Drop every entry of `file`.
    pub fn remove_file(&self, file: FileId) -> Vec<u32> {
        self.map.lock().remove(&file).unwrap_or_default()
    }

    pub fn zones_of(&self, file: FileId) -> Vec<u32> {
        self.map.lock().get(&file).cloned().unwrap_or_default()
    }

    /// Union of the zones holding any of `files`.
    pub fn zones_for(&self, files: &[FileId]) -> BTreeSet<u32> {
        let map = self.map.lock();
        files
            .iter()
            .filter_map(|file| map.get(file))
            .flatten()
            .copied()
            .collect()
    }

    pub fn contains_file(&self, file: FileId) -> bool {
        self.map.lock().contains_key(&file)
    }

    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }
}
