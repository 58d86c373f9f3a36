use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accuracy: f64,
    pub timestamp: i64,
}

pub fn add_location(
    conn: &Connection,
    user_id: i64,
    latitude: f64,
    longitude: f64,
    address: &str,
    accuracy: f64,
    timestamp: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO locations (user_id, latitude, longitude, address, accuracy, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![user_id, latitude, longitude, address, accuracy, timestamp],
    )?;
    Ok(())
}

pub fn get_latest(conn: &Connection, user_id: i64) -> Option<LocationRecord> {
    conn.query_row(
        "SELECT user_id, latitude, longitude, address, accuracy, timestamp
         FROM locations WHERE user_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1",
        rusqlite::params![user_id],
        map_row,
    )
    .ok()
}

/// Persisted locations in chronological order, optionally bounded.
pub fn get_history(
    conn: &Connection,
    user_id: i64,
    start_time: Option<i64>,
    end_time: Option<i64>,
) -> Vec<LocationRecord> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT user_id, latitude, longitude, address, accuracy, timestamp
         FROM locations
         WHERE user_id = ?1 AND timestamp >= ?2 AND timestamp <= ?3
         ORDER BY timestamp ASC",
    ) else {
        return Vec::new();
    };
    stmt.query_map(
        rusqlite::params![
            user_id,
            start_time.unwrap_or(0),
            end_time.unwrap_or(i64::MAX)
        ],
        map_row,
    )
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub fn delete_older_than(conn: &Connection, cutoff: i64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM locations WHERE timestamp < ?1",
        rusqlite::params![cutoff],
    )?;
    Ok(n)
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LocationRecord> {
    Ok(LocationRecord {
        user_id: row.get(0)?,
        latitude: row.get(1)?,
        longitude: row.get(2)?,
        address: row.get(3)?,
        accuracy: row.get(4)?,
        timestamp: row.get(5)?,
    })
}
