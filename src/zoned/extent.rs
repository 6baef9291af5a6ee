//! Extent provenance records kept per zone.

use serde::{Deserialize, Serialize};

use super::lifetime::WriteLifetime;

/// Identifier of a database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:06}", self.0)
    }
}

/// Handle to an extent recorded in a zone.
///
/// Carries the zone generation it was recorded in, so a handle kept across a
/// zone reset never resolves to a newer extent at the same position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtentId {
    generation: u64,
    index: usize,
}

impl ExtentId {
    pub(crate) fn new(generation: u64, index: usize) -> Self {
        Self { generation, index }
    }

    /// Zone generation (number of resets seen) the extent was recorded in.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Position in the zone's extent list.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl std::fmt::Display for ExtentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.generation, self.index)
    }
}

/// One write extent attributed to a zone.
///
/// Validity only ever goes from `true` to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneExtentInfo {
    /// Zone holding the extent
    pub zone_id: u32,

    /// File the extent belongs to
    pub file: FileId,

    /// Extent length in bytes
    pub length: u64,

    /// Extent still holds live data
    valid: bool,

    /// Lifetime hint the data was written with
    pub lifetime: WriteLifetime,

    /// LSM level of the owning file, if known
    pub level: Option<u32>,
}

impl ZoneExtentInfo {
    pub fn new(
        zone_id: u32,
        file: FileId,
        length: u64,
        lifetime: WriteLifetime,
        level: Option<u32>,
    ) -> Self {
        Self {
            zone_id,
            file,
            length,
            valid: true,
            lifetime,
            level,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Mark the extent invalid. Returns false if it already was.
    pub fn invalidate(&mut self) -> bool {
        std::mem::replace(&mut self.valid, false)
    }
}
