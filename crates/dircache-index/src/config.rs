//! Index configuration.

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// On-disk format version of the index file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum IndexVersion {
    /// Fixed-width records, NUL-padded to 8 bytes.
    V2,
    /// Version 2 plus a second flags word for skip-worktree/intent-to-add.
    V3,
    /// Version 3 with prefix-compressed paths and no padding.
    V4,
}

impl IndexVersion {
    pub fn as_u32(&self) -> u32 {
        match self {
            Self::V2 => 2,
            Self::V3 => 3,
            Self::V4 => 4,
        }
    }
}

impl TryFrom<u32> for IndexVersion {
    type Error = IndexError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Self::V2),
            3 => Ok(Self::V3),
            4 => Ok(Self::V4),
            other => Err(IndexError::UnsupportedVersion(other)),
        }
    }
}

impl From<IndexVersion> for u32 {
    fn from(version: IndexVersion) -> Self {
        version.as_u32()
    }
}

impl std::fmt::Display for IndexVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// How [`Builder::finish`](crate::Builder::finish) treats two entries with
/// the same (path, stage).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Fail with [`IndexError::DuplicateEntry`].
    #[default]
    Reject,
    /// Keep the entry that was added last.
    LastWins,
}

/// Flush strategy for the lock file before it replaces the index.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncMode {
    /// Rely on OS page-cache buffering (fastest, least durable).
    #[default]
    OsDefault,
    /// `fsync` the lock file before the rename.
    EveryWrite,
}

/// Configuration for an [`Index`](crate::Index).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Format version for an index created from scratch. An index read
    /// from disk keeps the version it was read with.
    pub version: IndexVersion,
    /// Duplicate resolution applied by the builder.
    pub duplicate_policy: DuplicatePolicy,
    /// Durability of `write()`.
    pub sync_mode: SyncMode,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            version: IndexVersion::V2,
            duplicate_policy: DuplicatePolicy::Reject,
            sync_mode: SyncMode::OsDefault,
        }
    }
}

impl IndexConfig {
    /// Parse a TOML fragment; missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> IndexResult<Self> {
        toml::from_str(s).map_err(|e| IndexError::Config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = IndexConfig::default();
        assert_eq!(c.version, IndexVersion::V2);
        assert_eq!(c.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(c.sync_mode, SyncMode::OsDefault);
    }

    #[test]
    fn parse_toml_overrides() {
        let c = IndexConfig::from_toml_str(
            r#"
            version = 4
            duplicate_policy = "last-wins"
            sync_mode = "every-write"
            "#,
        )
        .unwrap();
        assert_eq!(c.version, IndexVersion::V4);
        assert_eq!(c.duplicate_policy, DuplicatePolicy::LastWins);
        assert_eq!(c.sync_mode, SyncMode::EveryWrite);
    }

    #[test]
    fn empty_toml_is_default() {
        assert_eq!(IndexConfig::from_toml_str("").unwrap(), IndexConfig::default());
    }

    #[test]
    fn unknown_version_is_config_error() {
        let err = IndexConfig::from_toml_str("version = 5").unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn version_conversions() {
        assert_eq!(IndexVersion::try_from(3).unwrap(), IndexVersion::V3);
        assert!(matches!(
            IndexVersion::try_from(1),
            Err(IndexError::UnsupportedVersion(1))
        ));
        assert_eq!(u32::from(IndexVersion::V4), 4);
    }
}
