use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryRecord {
    pub user_id: i64,
    pub battery_level: u8,
    pub is_charging: bool,
    pub timestamp: i64,
}

pub fn add_battery(
    conn: &Connection,
    user_id: i64,
    battery_level: u8,
    is_charging: bool,
    timestamp: i64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO batteries (user_id, battery_level, is_charging, timestamp)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![user_id, battery_level as i64, is_charging as i64, timestamp],
    )?;
    Ok(())
}

pub fn get_latest(conn: &Connection, user_id: i64) -> Option<BatteryRecord> {
    conn.query_row(
        "SELECT user_id, battery_level, is_charging, timestamp
         FROM batteries WHERE user_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1",
        rusqlite::params![user_id],
        |row| {
            let level: i64 = row.get(1)?;
            let charging: i64 = row.get(2)?;
            Ok(BatteryRecord {
                user_id: row.get(0)?,
                battery_level: level as u8,
                is_charging: charging == 1,
                timestamp: row.get(3)?,
            })
        },
    )
    .ok()
}

/// Persisted battery readings in chronological order, optionally bounded.
pub fn get_history(
    conn: &Connection,
    user_id: i64,
    start_time: Option<i64>,
    end_time: Option<i64>,
) -> Vec<BatteryRecord> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT user_id, battery_level, is_charging, timestamp
         FROM batteries
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
        |row| {
            let level: i64 = row.get(1)?;
            let charging: i64 = row.get(2)?;
            Ok(BatteryRecord {
                user_id: row.get(0)?,
                battery_level: level as u8,
                is_charging: charging == 1,
                timestamp: row.get(3)?,
            })
        },
    )
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

pub fn delete_older_than(conn: &Connection, cutoff: i64) -> Result<usize> {
    let n = conn.execute(
        "DELETE FROM batteries WHERE timestamp < ?1",
        rusqlite::params![cutoff],
    )?;
    Ok(n)
}
