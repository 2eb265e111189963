use crate::errors::{StoreError, StoreResult};
use crate::index::DEFAULT_INDEX_KEY;
use crate::validation::merge_json;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const INDEX_DB_ENV: &str = "DECK_STORE_INDEX_DB";
pub const LOG_DIR_ENV: &str = "DECK_STORE_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSettings {
    pub index_db_path: PathBuf,
    pub log_dir: PathBuf,
    /// Used when `RUST_LOG` is not set.
    pub log_filter: String,
    pub index_key: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::with_data_dir(Path::new(".deck-store"))
    }
}

impl StoreSettings {
    pub fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            index_db_path: data_dir.join("index.db"),
            log_dir: data_dir.join("logs"),
            log_filter: "info".to_string(),
            index_key: DEFAULT_INDEX_KEY.to_string(),
        }
    }

    /// Defaults for `data_dir`, overlaid with the optional JSON settings file
    /// (partial documents are fine), then with environment overrides.
    pub fn load(data_dir: &Path, settings_file: Option<&Path>) -> StoreResult<Self> {
        let mut settings = Self::with_data_dir(data_dir);
        if let Some(path) = settings_file.filter(|path| path.exists()) {
            let raw = fs::read_to_string(path)?;
            let update: serde_json::Value = serde_json::from_str(&raw).map_err(|error| {
                StoreError::Corrupt(format!("invalid settings file {}: {}", path.to_string_lossy(), error))
            })?;
            let mut merged = serde_json::to_value(&settings)?;
            merge_json(&mut merged, update);
            settings = serde_json::from_value(merged).map_err(|error| {
                StoreError::Corrupt(format!("invalid settings file {}: {}", path.to_string_lossy(), error))
            })?;
        }
        settings.apply_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(INDEX_DB_ENV).filter(|value| !value.trim().is_empty()) {
            self.index_db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup(LOG_DIR_ENV).filter(|value| !value.trim().is_empty()) {
            self.log_dir = PathBuf::from(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_settings_file_overlays_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("settings.json");
        fs::write(&file, r#"{"logFilter": "debug"}"#).expect("write settings");

        let mut settings = StoreSettings::load(dir.path(), Some(&file)).expect("load");
        settings.apply_overrides(|_| None);
        assert_eq!(settings.log_filter, "debug");
        assert_eq!(settings.index_key, DEFAULT_INDEX_KEY);
    }

    #[test]
    fn missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = StoreSettings::load(dir.path(), Some(&dir.path().join("absent.json"))).expect("load");
        assert_eq!(settings.log_filter, "info");
    }

    #[test]
    fn malformed_settings_file_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("settings.json");
        fs::write(&file, "{").expect("write settings");
        let error = StoreSettings::load(dir.path(), Some(&file)).expect_err("malformed");
        assert_eq!(error.code(), "CORRUPT");
    }

    #[test]
    fn environment_overrides_paths() {
        let mut settings = StoreSettings::with_data_dir(Path::new("/data"));
        settings.apply_overrides(|name| match name {
            INDEX_DB_ENV => Some("/elsewhere/index.db".to_string()),
            _ => None,
        });
        assert_eq!(settings.index_db_path, PathBuf::from("/elsewhere/index.db"));
        assert_eq!(settings.log_dir, PathBuf::from("/data/logs"));
    }
}
