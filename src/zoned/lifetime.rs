//! Write lifetime classes and the lifetime-diff heuristic.

use serde::{Deserialize, Serialize};

/// Score returned when a zone is a bad fit for a write.
pub const LIFETIME_DIFF_NOT_GOOD: u32 = 100;

/// Score returned when a zone's class equals the write's hint.
pub const LIFETIME_DIFF_COULD_BE_WORSE: u32 = 50;

/// Number of lifetime classes.
pub const LIFETIME_CLASSES: usize = 6;

/// Expected lifetime of written data, ordered from unknown to longest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WriteLifetime {
    #[default]
    NotSet = 0,
    None = 1,
    Short = 2,
    Medium = 3,
    Long = 4,
    Extreme = 5,
}

impl WriteLifetime {
    /// All classes in numeric order.
    pub const ALL: [WriteLifetime; LIFETIME_CLASSES] = [
        WriteLifetime::NotSet,
        WriteLifetime::None,
        WriteLifetime::Short,
        WriteLifetime::Medium,
        WriteLifetime::Long,
        WriteLifetime::Extreme,
    ];

    /// Decode a stored class. Out-of-range values map to `NotSet`.
    pub fn from_u8(value: u8) -> Self {
        Self::ALL
            .get(value as usize)
            .copied()
            .unwrap_or(WriteLifetime::NotSet)
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Index into per-class tables.
    pub fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for WriteLifetime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteLifetime::NotSet => write!(f, "not_set"),
            WriteLifetime::None => write!(f, "none"),
            WriteLifetime::Short => write!(f, "short"),
            WriteLifetime::Medium => write!(f, "medium"),
            WriteLifetime::Long => write!(f, "long"),
            WriteLifetime::Extreme => write!(f, "extreme"),
        }
    }
}

/// Score how well a zone holding `zone` data fits a write hinted `file`.
///
/// Lower is better. A zone whose class is longer than the hint scores the
/// distance between them; an equal class scores
/// [`LIFETIME_DIFF_COULD_BE_WORSE`]; a shorter class, or any mismatch when
/// the hint is unset, scores [`LIFETIME_DIFF_NOT_GOOD`].
pub fn lifetime_diff(zone: WriteLifetime, file: WriteLifetime) -> u32 {
    if matches!(file, WriteLifetime::NotSet | WriteLifetime::None) {
        return if zone == file { 0 } else { LIFETIME_DIFF_NOT_GOOD };
    }

    if zone > file {
        return (zone.as_u8() - file.as_u8()) as u32;
    }
    if zone == file {
        return LIFETIME_DIFF_COULD_BE_WORSE;
    }

    LIFETIME_DIFF_NOT_GOOD
}
