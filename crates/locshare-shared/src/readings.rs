//! Telemetry readings captured on the device.
//!
//! A reading is immutable once captured: only the `synced` flag ever changes,
//! and only from `false` to `true` when the hub has acknowledged it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::now_millis;

/// One location sample.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationReading {
    pub id: String,
    pub timestamp: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accuracy_meters: f64,
    #[serde(default)]
    pub synced: bool,
}

impl LocationReading {
    pub fn capture(latitude: f64, longitude: f64, address: impl Into<String>, accuracy_meters: f64) -> Self {
        Self {
            id: format!("loc_{}", Uuid::new_v4()),
            timestamp: now_millis(),
            latitude,
            longitude,
            address: address.into(),
            accuracy_meters,
            synced: false,
        }
    }
}

/// One battery sample. `level_percent` is 0..=100.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BatteryReading {
    pub id: String,
    pub timestamp: i64,
    pub level_percent: u8,
    pub is_charging: bool,
    #[serde(default)]
    pub synced: bool,
}

impl BatteryReading {
    pub fn capture(level_percent: u8, is_charging: bool) -> Self {
        Self {
            id: format!("bat_{}", Uuid::new_v4()),
            timestamp: now_millis(),
            level_percent,
            is_charging,
            synced: false,
        }
    }
}

/// Either kind of reading, for code paths that handle both streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Reading {
    Location(LocationReading),
    Battery(BatteryReading),
}

impl Reading {
    pub fn id(&self) -> &str {
        match self {
            Reading::Location(r) => &r.id,
            Reading::Battery(r) => &r.id,
        }
    }

    pub fn timestamp(&self) -> i64 {
        match self {
            Reading::Location(r) => r.timestamp,
            Reading::Battery(r) => r.timestamp,
        }
    }

    pub fn synced(&self) -> bool {
        match self {
            Reading::Location(r) => r.synced,
            Reading::Battery(r) => r.synced,
        }
    }
}
