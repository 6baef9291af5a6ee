//! Zone pool configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{META_ZONES, MIN_ZONES, RESERVED_ZONES};
use crate::error::{Error, Result};

/// Allocation strategy used by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocMode {
    /// Lifetime-diff matching (mode 1)
    Default,
    /// Content-aware zone allocation (mode 2)
    #[default]
    Caza,
}

impl TryFrom<u32> for AllocMode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(AllocMode::Default),
            2 => Ok(AllocMode::Caza),
            other => Err(Error::Config(format!("unknown zone_alloc_mode {}", other))),
        }
    }
}

impl std::fmt::Display for AllocMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AllocMode::Default => write!(f, "default"),
            AllocMode::Caza => write!(f, "caza"),
        }
    }
}

/// Configuration for [`ZonePool`](super::ZonePool).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonedConfig {
    /// Allocation strategy
    pub alloc_mode: AllocMode,

    /// Finish zones whose remaining capacity drops below this percentage
    /// of their max capacity (0 disables)
    pub finish_threshold: u32,

    /// Sequential-write zones reserved for metadata
    pub meta_zones: u32,

    /// Minimum number of zones the device must report
    pub min_zones: u32,

    /// Subtracted from the device active/open ceilings
    pub reserved_zones: u32,

    /// Open the device read-only
    pub readonly: bool,

    /// Open the device exclusively
    pub exclusive: bool,
}

impl Default for ZonedConfig {
    fn default() -> Self {
        Self {
            alloc_mode: AllocMode::Caza,
            finish_threshold: 0,
            meta_zones: META_ZONES,
            min_zones: MIN_ZONES,
            reserved_zones: RESERVED_ZONES,
            readonly: false,
            exclusive: true,
        }
    }
}

impl ZonedConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Parse and validate YAML text. Missing fields take their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let config: ZonedConfig =
            serde_yaml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.meta_zones < 2 {
            return Err(Error::Config(
                "meta_zones must be at least 2 for safe log rollover".into(),
            ));
        }
        if self.finish_threshold > 100 {
            return Err(Error::Config(
                "finish_threshold is a percentage (0-100)".into(),
            ));
        }
        if self.min_zones == 0 {
            return Err(Error::Config("min_zones must be > 0".into()));
        }
        Ok(())
    }

    /// Configuration with the lifetime-diff strategy.
    pub fn default_mode() -> Self {
        Self {
            alloc_mode: AllocMode::Default,
            ..Default::default()
        }
    }

    /// Configuration for read-only inspection of a device.
    pub fn read_only() -> Self {
        Self {
            readonly: true,
            exclusive: false,
            ..Default::default()
        }
    }
}
