//! Durable local queue of pending telemetry readings.
//!
//! Every sampled reading lands here first, network or no network. The store
//! is bounded: past the per-stream cap the oldest rows are evicted. Rows
//! survive process restarts; the sync scheduler drains them oldest-first.

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use locshare_shared::readings::{BatteryReading, LocationReading, Reading};

const SCHEMA_VERSION: i64 = 1;

/// Retention caps per stream, oldest evicted first.
pub const LOCATION_CAP: usize = 100;
pub const BATTERY_CAP: usize = 200;

pub struct ReadingStore {
    conn: Mutex<Connection>,
}

impl ReadingStore {
    pub fn new(path: &str) -> Result<Self> {
        let db_path = Path::new(path);
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create database directory {}", dir.display()))?;
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

    fn conn(&self) -> MutexGuard<'_, Connection> {
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
        debug!("reading store pragmas configured");
        Ok(())
    }

    fn initialize_schema(&self) -> Result<()> {
        let current: i64 = self
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .context("failed to read schema version")?;

        if current == 0 {
            self.conn()
                .execute_batch(
                    "CREATE TABLE IF NOT EXISTS location_readings (
                    id TEXT PRIMARY KEY,
                    timestamp INTEGER NOT NULL,
                    latitude REAL NOT NULL,
                    longitude REAL NOT NULL,
                    address TEXT NOT NULL,
                    accuracy_meters REAL NOT NULL,
                    synced INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_location_pending
                    ON location_readings(synced, timestamp);

                CREATE TABLE IF NOT EXISTS battery_readings (
                    id TEXT PRIMARY KEY,
                    timestamp INTEGER NOT NULL,
                    level_percent INTEGER NOT NULL,
                    is_charging INTEGER NOT NULL,
                    synced INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_battery_pending
                    ON battery_readings(synced, timestamp);",
                )
                .context("failed to create reading tables")?;
            self.conn()
                .pragma_update(None, "user_version", SCHEMA_VERSION)
                .context("failed to set schema version")?;
            info!("created reading store schema v{SCHEMA_VERSION}");
        }

        Ok(())
    }

    /// Append a location reading and evict the oldest rows beyond the cap.
    /// Never touches the network.
    pub fn enqueue_location(&self, reading: &LocationReading) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO location_readings
                (id, timestamp, latitude, longitude, address, accuracy_meters, synced)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                reading.id,
                reading.timestamp,
                reading.latitude,
                reading.longitude,
                reading.address,
                reading.accuracy_meters,
                reading.synced as i64,
            ],
        )
        .context("failed to insert location reading")?;
        evict_beyond_cap(&conn, "location_readings", LOCATION_CAP)?;
        Ok(())
    }

    /// Append a battery reading and evict the oldest rows beyond the cap.
    pub fn enqueue_battery(&self, reading: &BatteryReading) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO battery_readings
                (id, timestamp, level_percent, is_charging, synced)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                reading.id,
                reading.timestamp,
                reading.level_percent as i64,
                reading.is_charging as i64,
                reading.synced as i64,
            ],
        )
        .context("failed to insert battery reading")?;
        evict_beyond_cap(&conn, "battery_readings", BATTERY_CAP)?;
        Ok(())
    }

    /// Unsynced location readings in capture order (oldest first).
    pub fn pending_locations(&self) -> Result<Vec<LocationReading>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, latitude, longitude, address, accuracy_meters, synced
             FROM location_readings WHERE synced = 0 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let synced: i64 = row.get("synced")?;
                Ok(LocationReading {
                    id: row.get("id")?,
                    timestamp: row.get("timestamp")?,
                    latitude: row.get("latitude")?,
                    longitude: row.get("longitude")?,
                    address: row.get("address")?,
                    accuracy_meters: row.get("accuracy_meters")?,
                    synced: synced == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Unsynced battery readings in capture order (oldest first).
    pub fn pending_batteries(&self) -> Result<Vec<BatteryReading>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, level_percent, is_charging, synced
             FROM battery_readings WHERE synced = 0 ORDER BY timestamp ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let level: i64 = row.get("level_percent")?;
                let charging: i64 = row.get("is_charging")?;
                let synced: i64 = row.get("synced")?;
                Ok(BatteryReading {
                    id: row.get("id")?,
                    timestamp: row.get("timestamp")?,
                    level_percent: level as u8,
                    is_charging: charging == 1,
                    synced: synced == 1,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Flip the synced flag. Idempotent: a no-op when the id is absent or
    /// already synced.
    pub fn mark_location_synced(&self, id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE location_readings SET synced = 1 WHERE id = ?1",
                rusqlite::params![id],
            )
            .context("failed to mark location reading synced")?;
        Ok(())
    }

    pub fn mark_battery_synced(&self, id: &str) -> Result<()> {
        self.conn()
            .execute(
                "UPDATE battery_readings SET synced = 1 WHERE id = ?1",
                rusqlite::params![id],
            )
            .context("failed to mark battery reading synced")?;
        Ok(())
    }

    /// All unsynced readings across both streams, oldest first.
    pub fn pending_unsynced(&self) -> Result<Vec<Reading>> {
        let mut all: Vec<Reading> = self
            .pending_locations()?
            .into_iter()
            .map(Reading::Location)
            .chain(self.pending_batteries()?.into_iter().map(Reading::Battery))
            .collect();
        all.sort_by_key(|r| r.timestamp());
        Ok(all)
    }

    /// Empty the store. Used on logout.
    pub fn clear_all(&self) -> Result<()> {
        self.conn()
            .execute_batch("DELETE FROM location_readings; DELETE FROM battery_readings;")
            .context("failed to clear reading store")?;
        Ok(())
    }

    /// Number of readings still waiting to be synced, both streams combined.
    pub fn pending_count(&self) -> Result<usize> {
        let conn = self.conn();
        let locations: i64 = conn.query_row(
            "SELECT COUNT(*) FROM location_readings WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        let batteries: i64 = conn.query_row(
            "SELECT COUNT(*) FROM battery_readings WHERE synced = 0",
            [],
            |row| row.get(0),
        )?;
        Ok((locations + batteries) as usize)
    }
}

fn evict_beyond_cap(conn: &Connection, table: &str, cap: usize) -> Result<()> {
    // Keep the newest `cap` rows by timestamp, synced or not.
    let sql = format!(
        "DELETE FROM {table} WHERE id NOT IN
            (SELECT id FROM {table} ORDER BY timestamp DESC, id DESC LIMIT ?1)"
    );
    conn.execute(&sql, rusqlite::params![cap as i64])
        .with_context(|| format!("failed to evict old rows from {table}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> ReadingStore {
        ReadingStore::new_in_memory().unwrap()
    }

    fn location_at(timestamp: i64) -> LocationReading {
        let mut r = LocationReading::capture(52.0, 4.0, "test", 5.0);
        r.timestamp = timestamp;
        r
    }

    fn battery_at(timestamp: i64) -> BatteryReading {
        let mut r = BatteryReading::capture(50, false);
        r.timestamp = timestamp;
        r
    }

    #[test]
    fn pending_returns_capture_order() {
        let store = test_store();
        // Enqueue out of order; pending must come back timestamp-ascending.
        for ts in [30, 10, 20] {
            store.enqueue_location(&location_at(ts)).unwrap();
        }
        let pending = store.pending_locations().unwrap();
        let timestamps: Vec<i64> = pending.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
    }

    #[test]
    fn mark_synced_is_idempotent() {
        let store = test_store();
        let r = location_at(10);
        store.enqueue_location(&r).unwrap();

        store.mark_location_synced(&r.id).unwrap();
        assert!(store.pending_locations().unwrap().is_empty());

        // Second call and unknown ids are no-ops, never errors.
        store.mark_location_synced(&r.id).unwrap();
        store.mark_location_synced("loc_missing").unwrap();
        assert!(store.pending_locations().unwrap().is_empty());
    }

    #[test]
    fn synced_flag_survives_round_trip() {
        let store = test_store();
        let a = battery_at(10);
        let b = battery_at(20);
        store.enqueue_battery(&a).unwrap();
        store.enqueue_battery(&b).unwrap();

        store.mark_battery_synced(&a.id).unwrap();
        let pending = store.pending_batteries().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, b.id);
    }

    #[test]
    fn eviction_keeps_newest_rows() {
        let store = test_store();
        for ts in 0..(LOCATION_CAP as i64 + 10) {
            store.enqueue_location(&location_at(ts)).unwrap();
        }
        let pending = store.pending_locations().unwrap();
        assert_eq!(pending.len(), LOCATION_CAP);
        // The 10 oldest were evicted.
        assert_eq!(pending[0].timestamp, 10);
    }

    #[test]
    fn pending_unsynced_merges_streams_oldest_first() {
        let store = test_store();
        store.enqueue_location(&location_at(30)).unwrap();
        store.enqueue_battery(&battery_at(10)).unwrap();
        store.enqueue_location(&location_at(20)).unwrap();

        let all = store.pending_unsynced().unwrap();
        let timestamps: Vec<i64> = all.iter().map(|r| r.timestamp()).collect();
        assert_eq!(timestamps, vec![10, 20, 30]);
        assert!(matches!(all[0], Reading::Battery(_)));
        assert!(!all[0].synced());
        assert!(all[0].id().starts_with("bat_"));
    }

    #[test]
    fn clear_all_empties_both_streams() {
        let store = test_store();
        store.enqueue_location(&location_at(1)).unwrap();
        store.enqueue_battery(&battery_at(1)).unwrap();
        assert_eq!(store.pending_count().unwrap(), 2);

        store.clear_all().unwrap();
        assert_eq!(store.pending_count().unwrap(), 0);
    }
}
