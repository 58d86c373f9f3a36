pub mod batteries;
pub mod connections;
pub mod locations;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

const SCHEMA_VERSION: i64 = 1;

const REQUIRED_TABLES: &[&str] = &["user_connections", "locations", "batteries"];

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir).with_context(|| {
                format!("failed to create database directory {}", dir.display())
            })?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700));
            }
        }

        let conn =
            Connection::open(path).with_context(|| format!("failed to open database at {path}"))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory database")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.configure_pragmas()?;
        store.initialize_schema()?;

        Ok(store)
    }

    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
            )
            .context("failed to configure database pragmas")?;

        debug!("database pragmas configured");
        Ok(())
    }

    fn get_schema_version(&self) -> Result<i64> {
        let version: i64 = self
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("failed to read schema version")?;
        Ok(version)
    }

    fn set_schema_version(&self, version: i64) -> Result<()> {
        self.conn()
            .pragma_update(None, "user_version", version)
            .context("failed to set schema version")?;
        Ok(())
    }

    fn initialize_schema(&self) -> Result<()> {
        let current_version = self.get_schema_version()?;

        if current_version == 0 {
            self.create_tables()?;
            self.set_schema_version(SCHEMA_VERSION)?;
            info!("created database schema v{SCHEMA_VERSION}");
            return Ok(());
        }

        self.assert_required_tables()?;

        Ok(())
    }

    fn assert_required_tables(&self) -> Result<()> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1")
            .context("failed to prepare table check query")?;

        let missing: Vec<&str> = REQUIRED_TABLES
            .iter()
            .filter(|&&table| !stmt.exists(rusqlite::params![table]).unwrap_or(false))
            .copied()
            .collect();

        if !missing.is_empty() {
            anyhow::bail!(
                "SQLite schema is missing required tables ({}). \
                 Back up and rebuild the database.",
                missing.join(", ")
            );
        }

        Ok(())
    }

    fn create_tables(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS user_connections (
                user_id INTEGER NOT NULL,
                peer_id INTEGER NOT NULL,
                nickname TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                PRIMARY KEY (user_id, peer_id)
            );
            CREATE INDEX IF NOT EXISTS idx_connections_peer ON user_connections(peer_id);

            CREATE TABLE IF NOT EXISTS locations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                address TEXT NOT NULL DEFAULT '',
                accuracy REAL NOT NULL DEFAULT 0,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_locations_user_time ON locations(user_id, timestamp);

            CREATE TABLE IF NOT EXISTS batteries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                battery_level INTEGER NOT NULL,
                is_charging INTEGER NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_batteries_user_time ON batteries(user_id, timestamp);",
            )
            .context("failed to create tables")?;

        Ok(())
    }
}
