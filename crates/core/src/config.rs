//! Collection configuration via `vireo.toml`
//!
//! Each collection keeps a config file in its data directory. On first open
//! a commented default file is created; to change settings, edit the file
//! and restart.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file name placed in the collection data directory.
pub const CONFIG_FILE_NAME: &str = "vireo.toml";

/// Per-collection configuration loaded from `vireo.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Collection name; tags bundle files, locks, and log lines.
    pub collection: String,
    /// Directory scanned for document bundles.
    pub index_bundle_dir: PathBuf,
    /// Directory scanned for user bundles (recommend side).
    pub user_bundle_dir: PathBuf,
    /// Directory scanned for order bundles (recommend side).
    pub order_bundle_dir: PathBuf,
    /// Bundle body encoding. Only `"utf-8"` is accepted.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Cron expression driving the recommend flush/rebuild tick.
    #[serde(default = "default_cron")]
    pub cron: String,
    /// Numerator of the realtime-mode threshold, in MiB.
    #[serde(default = "default_realtime_size_mb")]
    pub realtime_size_mb: u64,
    /// Denominator of the realtime-mode threshold, in documents.
    #[serde(default = "default_realtime_doc_base")]
    pub realtime_doc_base: u64,
    /// Hard ceiling for realtime mode: larger bundle loads index in batch
    /// mode regardless of the per-document threshold.
    #[serde(default = "default_max_realtime_mb")]
    pub max_realtime_mb: u64,
    /// Backup trigger: copy current into next once this many MiB of bundles
    /// have been absorbed since the last backup.
    #[serde(default = "default_backup_threshold_mb")]
    pub backup_threshold_mb: u64,
    /// Property whose value is counted per source after each build pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_source_field: Option<String>,
    /// Whether order ingestion rebuilds frequent item sets.
    #[serde(default)]
    pub freq_item_sets: bool,
    /// Whether mutations are mirrored to the log server.
    #[serde(default)]
    pub forward_to_log_server: bool,
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_cron() -> String {
    "0 3 * * *".to_string()
}

fn default_realtime_size_mb() -> u64 {
    50
}

fn default_realtime_doc_base() -> u64 {
    500_000
}

fn default_max_realtime_mb() -> u64 {
    50
}

fn default_backup_threshold_mb() -> u64 {
    200
}

impl CollectionConfig {
    /// A config rooted at `base`, with the conventional bundle directory
    /// layout (`bundle/index`, `bundle/user`, `bundle/order`).
    pub fn for_collection(name: impl Into<String>, base: &Path) -> Self {
        CollectionConfig {
            collection: name.into(),
            index_bundle_dir: base.join("bundle").join("index"),
            user_bundle_dir: base.join("bundle").join("user"),
            order_bundle_dir: base.join("bundle").join("order"),
            encoding: default_encoding(),
            cron: default_cron(),
            realtime_size_mb: default_realtime_size_mb(),
            realtime_doc_base: default_realtime_doc_base(),
            max_realtime_mb: default_max_realtime_mb(),
            backup_threshold_mb: default_backup_threshold_mb(),
            product_source_field: None,
            freq_item_sets: false,
            forward_to_log_server: false,
        }
    }

    /// The realtime-mode threshold in MiB per existing document.
    ///
    /// A bundle load enters realtime mode iff
    /// `size_mb / num_docs <= threshold && size_mb <= max_realtime_mb`.
    pub fn realtime_threshold(&self) -> f64 {
        self.realtime_size_mb as f64 / self.realtime_doc_base.max(1) as f64
    }

    /// Validate settings that can only fail at startup.
    pub fn validate(&self) -> EngineResult<()> {
        if self.collection.is_empty() {
            return Err(EngineError::invalid_config("collection name is empty"));
        }
        if !self.encoding.eq_ignore_ascii_case("utf-8") {
            return Err(EngineError::invalid_config(format!(
                "unsupported encoding '{}', expected \"utf-8\"",
                self.encoding
            )));
        }
        Ok(())
    }

    /// Read and parse config from a file path.
    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CollectionConfig = toml::from_str(&content).map_err(|e| {
            EngineError::invalid_config(format!(
                "failed to parse '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> EngineResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            EngineError::invalid_config(format!("failed to serialize config: {}", e))
        })?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Write this config only if no file exists at the path yet.
    pub fn write_default_if_missing(&self, path: &Path) -> EngineResult<()> {
        if !path.exists() {
            self.write_to_file(path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_are_valid() {
        let config = CollectionConfig::for_collection("b5mp", Path::new("/tmp/b5mp"));
        config.validate().unwrap();
        assert_eq!(config.backup_threshold_mb, 200);
        assert_eq!(config.max_realtime_mb, 50);
    }

    #[test]
    fn realtime_threshold_is_ratio_of_tunables() {
        let mut config = CollectionConfig::for_collection("c", Path::new("/tmp/c"));
        config.realtime_size_mb = 50;
        config.realtime_doc_base = 500_000;
        assert!((config.realtime_threshold() - 0.0001).abs() < 1e-12);
    }

    #[test]
    fn rejects_non_utf8_encoding() {
        let mut config = CollectionConfig::for_collection("c", Path::new("/tmp/c"));
        config.encoding = "gbk".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = CollectionConfig::for_collection("c", dir.path());
        config.cron = "*/5 * * * *".to_string();
        config.freq_item_sets = true;
        config.write_to_file(&path).unwrap();

        let loaded = CollectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.collection, "c");
        assert_eq!(loaded.cron, "*/5 * * * *");
        assert!(loaded.freq_item_sets);
    }

    #[test]
    fn write_default_does_not_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut first = CollectionConfig::for_collection("keep-me", dir.path());
        first.write_to_file(&path).unwrap();

        let second = CollectionConfig::for_collection("other", dir.path());
        second.write_default_if_missing(&path).unwrap();

        let loaded = CollectionConfig::from_file(&path).unwrap();
        assert_eq!(loaded.collection, "keep-me");
        first.validate().unwrap();
    }

    #[test]
    fn missing_optional_fields_use_defaults() {
        let toml_str = r#"
collection = "c"
index_bundle_dir = "/tmp/c/bundle/index"
user_bundle_dir = "/tmp/c/bundle/user"
order_bundle_dir = "/tmp/c/bundle/order"
"#;
        let config: CollectionConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.encoding, "utf-8");
        assert_eq!(config.realtime_doc_base, 500_000);
        assert!(!config.forward_to_log_server);
    }
}
