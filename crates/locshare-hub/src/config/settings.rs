//! Persisted hub settings (`settings.json` in the data directory).

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub listen_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_retention_days: Option<i64>,
}

pub fn settings_file_path(data_dir: &Path) -> PathBuf {
    data_dir.join("settings.json")
}

/// Read settings from file. A missing file yields defaults; a file that
/// exists but does not parse is an error (to avoid silent data loss).
pub fn read_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
    Ok(settings)
}

/// Write settings atomically (temp file + rename).
pub fn write_settings(path: &Path, settings: &Settings) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(settings)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("locshare-hub-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = temp_dir();
        let settings = read_settings(&settings_file_path(&dir)).unwrap();
        assert!(settings.listen_port.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn round_trip_preserves_fields() {
        let dir = temp_dir();
        let path = settings_file_path(&dir);
        let settings = Settings {
            listen_host: Some("0.0.0.0".into()),
            listen_port: Some(8080),
            cors_origins: Some(vec!["https://app.example".into()]),
            history_retention_days: Some(7),
        };

        write_settings(&path, &settings).unwrap();
        let loaded = read_settings(&path).unwrap();
        assert_eq!(loaded.listen_host.as_deref(), Some("0.0.0.0"));
        assert_eq!(loaded.listen_port, Some(8080));
        assert_eq!(loaded.history_retention_days, Some(7));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = temp_dir();
        let path = settings_file_path(&dir);
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_settings(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
