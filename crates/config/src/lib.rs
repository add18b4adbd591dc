//! # Config - sstable writer settings
//!
//! Tunables for the table write path, with defaults that suit a flush and
//! overrides read from the environment:
//!
//! ```text
//! SSTABLE_DATA_DIR          table directory                 (default: "data/sstables")
//! SSTABLE_BLOOM_FP_CHANCE   filter false-positive chance    (default: 0.01)
//! SSTABLE_COLUMN_INDEX_KB   promoted index block size, KiB  (default: 64)
//! SSTABLE_FORMAT_VERSION    table format version            (default: "nb")
//! SSTABLE_SYNC              fsync components on finish      (default: "true")
//! ```
//!
//! Values that fail to parse or validate are errors; nothing silently falls
//! back to a default.

use log::debug;
use std::path::PathBuf;
use thiserror::Error;

/// Format versions this build can write. `ma` uses the legacy filter encoding.
pub const SUPPORTED_VERSIONS: &[&str] = &["ma", "nb"];

pub const DEFAULT_BLOOM_FP_CHANCE: f64 = 0.01;
/// Largest fp chance below `1.0` that still sizes a filter with at least one
/// hash function for any key count. Between this and `1.0` the hash count
/// rounds to zero once a table is large enough.
pub const MAX_BLOOM_FP_CHANCE: f64 = 0.7;
pub const DEFAULT_COLUMN_INDEX_SIZE: usize = 64 * 1024;
pub const DEFAULT_FORMAT_VERSION: &str = "nb";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq)]
pub struct SSTableConfig {
    /// Directory new tables are written into.
    pub data_dir: PathBuf,
    /// Target false-positive chance for the partition key filter. `1.0`
    /// disables the filter.
    pub bloom_fp_chance: f64,
    /// Bytes of partition data per promoted index block.
    pub column_index_size: usize,
    /// Format version stamped on new tables.
    pub format_version: String,
    /// fsync every component before the table is committed.
    pub sync_on_finish: bool,
}

impl Default for SSTableConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/sstables"),
            bloom_fp_chance: DEFAULT_BLOOM_FP_CHANCE,
            column_index_size: DEFAULT_COLUMN_INDEX_SIZE,
            format_version: DEFAULT_FORMAT_VERSION.to_string(),
            sync_on_finish: true,
        }
    }
}

impl SSTableConfig {
    /// Defaults overridden by `SSTABLE_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(v) = lookup("SSTABLE_DATA_DIR") {
            cfg.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SSTABLE_BLOOM_FP_CHANCE") {
            cfg.bloom_fp_chance = parse("SSTABLE_BLOOM_FP_CHANCE", &v)?;
        }
        if let Some(v) = lookup("SSTABLE_COLUMN_INDEX_KB") {
            let kb: usize = parse("SSTABLE_COLUMN_INDEX_KB", &v)?;
            cfg.column_index_size = kb.saturating_mul(1024);
        }
        if let Some(v) = lookup("SSTABLE_FORMAT_VERSION") {
            cfg.format_version = v;
        }
        if let Some(v) = lookup("SSTABLE_SYNC") {
            cfg.sync_on_finish = parse("SSTABLE_SYNC", &v)?;
        }

        cfg.validate()?;
        debug!("loaded {:?}", cfg);
        Ok(cfg)
    }

    /// Checks every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        let fp = self.bloom_fp_chance;
        if !(fp > 0.0 && (fp <= MAX_BLOOM_FP_CHANCE || fp == 1.0)) {
            return Err(ConfigError::Invalid {
                key: "bloom_fp_chance",
                value: fp.to_string(),
                reason: format!("must be in (0, {}] or exactly 1", MAX_BLOOM_FP_CHANCE),
            });
        }
        if self.column_index_size == 0 {
            return Err(ConfigError::Invalid {
                key: "column_index_size",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }
        if !SUPPORTED_VERSIONS.contains(&self.format_version.as_str()) {
            return Err(ConfigError::Invalid {
                key: "format_version",
                value: self.format_version.clone(),
                reason: format!("expected one of {:?}", SUPPORTED_VERSIONS),
            });
        }
        Ok(())
    }
}

fn parse<T>(key: &'static str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = SSTableConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.format_version, "nb");
        assert_eq!(cfg.column_index_size, 64 * 1024);
    }

    #[test]
    fn overrides_apply() {
        let cfg = SSTableConfig::from_lookup(lookup(&[
            ("SSTABLE_DATA_DIR", "/tmp/x"),
            ("SSTABLE_BLOOM_FP_CHANCE", "0.1"),
            ("SSTABLE_COLUMN_INDEX_KB", "4"),
            ("SSTABLE_FORMAT_VERSION", "ma"),
            ("SSTABLE_SYNC", "false"),
        ]))
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/x"));
        assert_eq!(cfg.bloom_fp_chance, 0.1);
        assert_eq!(cfg.column_index_size, 4096);
        assert_eq!(cfg.format_version, "ma");
        assert!(!cfg.sync_on_finish);
    }

    #[test]
    fn unparsable_value_is_an_error() {
        let err = SSTableConfig::from_lookup(lookup(&[("SSTABLE_SYNC", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("SSTABLE_SYNC"));
    }

    #[test]
    fn fp_chance_bounds() {
        assert!(SSTableConfig::from_lookup(lookup(&[("SSTABLE_BLOOM_FP_CHANCE", "0")])).is_err());
        assert!(SSTableConfig::from_lookup(lookup(&[("SSTABLE_BLOOM_FP_CHANCE", "1.5")])).is_err());
        assert!(SSTableConfig::from_lookup(lookup(&[("SSTABLE_BLOOM_FP_CHANCE", "1.0")])).is_ok());
        assert!(SSTableConfig::from_lookup(lookup(&[("SSTABLE_BLOOM_FP_CHANCE", "0.7")])).is_ok());
    }

    #[test]
    fn fp_chance_that_sizes_no_hash_functions_rejected() {
        for fp in ["0.75", "0.9", "0.99"] {
            let err = SSTableConfig::from_lookup(lookup(&[("SSTABLE_BLOOM_FP_CHANCE", fp)]))
                .unwrap_err();
            assert!(err.to_string().contains("bloom_fp_chance"), "{}", err);
        }
    }

    #[test]
    fn zero_column_index_rejected() {
        assert!(SSTableConfig::from_lookup(lookup(&[("SSTABLE_COLUMN_INDEX_KB", "0")])).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let err =
            SSTableConfig::from_lookup(lookup(&[("SSTABLE_FORMAT_VERSION", "zz")])).unwrap_err();
        assert!(err.to_string().contains("format_version"));
    }
}
