//! Directed connection edges: `user_id` watches `peer_id`.
//!
//! Delivery is gated on these edges. `peers_of` answers "whose telemetry can
//! this user see"; `watchers_of` answers "who receives this user's pushes".
//! The nickname lives on the edge: it is the watcher's display name for the
//! peer, not a property of the peer (accounts live in the auth service).

use anyhow::Result;
use rusqlite::Connection;
use serde::Serialize;

use locshare_shared::now_millis;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPeer {
    pub user_id: i64,
    pub nickname: String,
}

/// Idempotent: re-adding an existing edge refreshes the nickname and keeps
/// the original `created_at`.
pub fn add_connection(conn: &Connection, user_id: i64, peer_id: i64, nickname: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO user_connections (user_id, peer_id, nickname, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id, peer_id) DO UPDATE SET nickname = excluded.nickname",
        rusqlite::params![user_id, peer_id, nickname, now_millis()],
    )?;
    Ok(())
}

pub fn remove_connection(conn: &Connection, user_id: i64, peer_id: i64) -> bool {
    conn.execute(
        "DELETE FROM user_connections WHERE user_id = ?1 AND peer_id = ?2",
        rusqlite::params![user_id, peer_id],
    )
    .map(|n| n > 0)
    .unwrap_or(false)
}

pub fn are_connected(conn: &Connection, user_id: i64, peer_id: i64) -> bool {
    conn.query_row(
        "SELECT 1 FROM user_connections WHERE user_id = ?1 AND peer_id = ?2",
        rusqlite::params![user_id, peer_id],
        |_| Ok(()),
    )
    .is_ok()
}

/// Peers this user watches, with the nicknames they gave them.
pub fn peers_of(conn: &Connection, user_id: i64) -> Vec<ConnectedPeer> {
    let Ok(mut stmt) = conn.prepare(
        "SELECT peer_id, nickname FROM user_connections
         WHERE user_id = ?1 ORDER BY nickname",
    ) else {
        return Vec::new();
    };
    stmt.query_map(rusqlite::params![user_id], |row| {
        Ok(ConnectedPeer {
            user_id: row.get(0)?,
            nickname: row.get(1)?,
        })
    })
    .map(|rows| rows.filter_map(|r| r.ok()).collect())
    .unwrap_or_default()
}

/// User ids that watch this user.
pub fn watchers_of(conn: &Connection, user_id: i64) -> Vec<i64> {
    let Ok(mut stmt) =
        conn.prepare("SELECT user_id FROM user_connections WHERE peer_id = ?1")
    else {
        return Vec::new();
    };
    stmt.query_map(rusqlite::params![user_id], |row| row.get(0))
        .map(|rows| rows.filter_map(|r| r.ok()).collect())
        .unwrap_or_default()
}
