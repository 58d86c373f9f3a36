//! Agent configuration: environment variables layered over a settings file.
//!
//! Priority: env > settings file > default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Persisted agent settings (`~/.locshare/settings.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fixed_location: Option<FixedLocation>,
}

/// Position reported by agents without a live position sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub address: String,
    #[serde(default = "default_accuracy")]
    pub accuracy_meters: f64,
}

fn default_accuracy() -> f64 {
    50.0
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

/// Read-modify-write the settings file.
pub fn update_settings(path: &Path, f: impl FnOnce(&mut Settings)) -> Result<()> {
    let mut settings = read_settings(path)?;
    f(&mut settings);
    write_settings(path, &settings)
}

/// Resolved agent configuration.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub hub_url: String,
    pub auth_token: String,
    pub home_dir: PathBuf,
    pub settings_file: PathBuf,
    pub db_file: PathBuf,
    pub location_interval_secs: u64,
    pub battery_interval_secs: u64,
    pub fixed_location: Option<FixedLocation>,
}

impl Configuration {
    /// Create configuration from environment variables and defaults.
    pub fn create() -> Result<Self> {
        let hub_url =
            std::env::var("LOCSHARE_HUB_URL").unwrap_or_else(|_| "http://localhost:3020".into());
        let auth_token = std::env::var("LOCSHARE_TOKEN").unwrap_or_default();

        // Home directory: LOCSHARE_HOME env > ~/.locshare
        let home_dir = if let Ok(home) = std::env::var("LOCSHARE_HOME") {
            if home.starts_with('~') {
                if let Some(user_home) = dirs_next::home_dir() {
                    user_home.join(&home[2..])
                } else {
                    PathBuf::from(home)
                }
            } else {
                PathBuf::from(home)
            }
        } else {
            let user_home = dirs_next::home_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
            user_home.join(".locshare")
        };

        std::fs::create_dir_all(&home_dir)
            .with_context(|| format!("failed to create {}", home_dir.display()))?;

        let settings_file = settings_file_path(&home_dir);
        let db_file = home_dir.join("readings.db");

        Ok(Self {
            hub_url,
            auth_token,
            home_dir,
            settings_file,
            db_file,
            location_interval_secs: 30,
            battery_interval_secs: 60,
            fixed_location: None,
        })
    }

    /// Load settings from file and merge with env-based config.
    pub fn load_with_settings(&mut self) -> Result<()> {
        let settings = read_settings(&self.settings_file)?;

        if std::env::var("LOCSHARE_HUB_URL").is_err()
            && let Some(ref url) = settings.hub_url
        {
            self.hub_url = url.clone();
        }

        if self.auth_token.is_empty() {
            if let Some(ref token) = settings.auth_token {
                tracing::debug!("auth token loaded from settings file");
                self.auth_token = token.clone();
            }
        } else {
            tracing::debug!("auth token loaded from environment variable");
        }

        if let Some(secs) = settings.location_interval_secs {
            self.location_interval_secs = secs;
        }
        if let Some(secs) = settings.battery_interval_secs {
            self.battery_interval_secs = secs;
        }
        self.fixed_location = settings.fixed_location;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("locshare-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn missing_settings_file_yields_defaults() {
        let dir = temp_dir();
        let settings = read_settings(&settings_file_path(&dir)).unwrap();
        assert!(settings.hub_url.is_none());
        assert!(settings.auth_token.is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn settings_round_trip_preserves_fields() {
        let dir = temp_dir();
        let path = settings_file_path(&dir);
        let settings = Settings {
            hub_url: Some("http://hub.example:3020".into()),
            auth_token: Some("tok".into()),
            location_interval_secs: Some(15),
            battery_interval_secs: None,
            fixed_location: Some(FixedLocation {
                latitude: 52.37,
                longitude: 4.89,
                address: "Amsterdam".into(),
                accuracy_meters: 20.0,
            }),
        };

        write_settings(&path, &settings).unwrap();
        let loaded = read_settings(&path).unwrap();
        assert_eq!(loaded.hub_url.as_deref(), Some("http://hub.example:3020"));
        assert_eq!(loaded.location_interval_secs, Some(15));
        assert_eq!(loaded.fixed_location.unwrap().address, "Amsterdam");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = temp_dir();
        let path = settings_file_path(&dir);
        std::fs::write(&path, "{not json").unwrap();
        assert!(read_settings(&path).is_err());
        std::fs::remove_dir_all(&dir).ok();
    }
}
