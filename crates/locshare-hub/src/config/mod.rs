pub mod jwt_secret;
pub mod settings;

use anyhow::Result;
use std::path::PathBuf;

/// How long persisted location history is retained.
pub const DEFAULT_HISTORY_RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct Configuration {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub listen_host: String,
    pub listen_port: u16,
    pub cors_origins: Vec<String>,
    pub history_retention_days: i64,
}

impl Configuration {
    /// Resolve configuration with priority env > settings file > default.
    pub fn create() -> Result<Self> {
        // Resolve data directory: LOCSHARE_HUB_HOME env or ~/.locshare-hub
        let data_dir = if let Ok(home) = std::env::var("LOCSHARE_HUB_HOME") {
            PathBuf::from(home)
        } else {
            let home = dirs_next::home_dir()
                .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
            home.join(".locshare-hub")
        };
        std::fs::create_dir_all(&data_dir)?;

        let stored = settings::read_settings(&settings::settings_file_path(&data_dir))?;

        // Resolve database path: DB_PATH env or {data_dir}/locshare.db
        let db_path = if let Ok(p) = std::env::var("DB_PATH") {
            PathBuf::from(p)
        } else {
            data_dir.join("locshare.db")
        };

        let listen_host = std::env::var("LOCSHARE_LISTEN_HOST")
            .ok()
            .or(stored.listen_host)
            .unwrap_or_else(|| "127.0.0.1".into());
        let listen_port = std::env::var("LOCSHARE_LISTEN_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .or(stored.listen_port)
            .unwrap_or(3020);

        let cors_origins = std::env::var("LOCSHARE_CORS_ORIGINS")
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .ok()
            .or(stored.cors_origins)
            .unwrap_or_else(|| vec!["*".to_string()]);

        let history_retention_days = std::env::var("LOCSHARE_HISTORY_RETENTION_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .or(stored.history_retention_days)
            .unwrap_or(DEFAULT_HISTORY_RETENTION_DAYS);

        Ok(Configuration {
            data_dir,
            db_path,
            listen_host,
            listen_port,
            cors_origins,
            history_retention_days,
        })
    }
}
