//! Real-time events pushed from the hub to a user's live channels.
//!
//! Every event carries the subject's user id; the hub delivers it only to
//! users who hold a connection edge to that subject.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum PushEvent {
    #[serde(rename = "location-updated")]
    LocationUpdated {
        #[serde(rename = "userId")]
        user_id: i64,
        latitude: f64,
        longitude: f64,
        address: String,
        accuracy: f64,
        timestamp: i64,
    },
    #[serde(rename = "battery-updated")]
    BatteryUpdated {
        #[serde(rename = "userId")]
        user_id: i64,
        #[serde(rename = "batteryLevel")]
        battery_level: u8,
        #[serde(rename = "isCharging")]
        is_charging: bool,
        timestamp: i64,
    },
    #[serde(rename = "user-online")]
    UserOnline {
        #[serde(rename = "userId")]
        user_id: i64,
    },
    #[serde(rename = "user-offline")]
    UserOffline {
        #[serde(rename = "userId")]
        user_id: i64,
    },
}

impl PushEvent {
    /// The user this event is about.
    pub fn subject(&self) -> i64 {
        match self {
            PushEvent::LocationUpdated { user_id, .. }
            | PushEvent::BatteryUpdated { user_id, .. }
            | PushEvent::UserOnline { user_id }
            | PushEvent::UserOffline { user_id } => *user_id,
        }
    }

    /// Event name used on the wire envelope.
    pub fn event_name(&self) -> &'static str {
        match self {
            PushEvent::LocationUpdated { .. } => "location-updated",
            PushEvent::BatteryUpdated { .. } => "battery-updated",
            PushEvent::UserOnline { .. } => "user-online",
            PushEvent::UserOffline { .. } => "user-offline",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_event_tagged_serde() {
        let ev = PushEvent::BatteryUpdated {
            user_id: 7,
            battery_level: 55,
            is_charging: false,
            timestamp: 1000,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"battery-updated\""));
        assert!(json.contains("\"batteryLevel\":55"));
        let back: PushEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
        assert_eq!(back.subject(), 7);
    }

    #[test]
    fn presence_events_carry_only_user_id() {
        let ev = PushEvent::UserOffline { user_id: 3 };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"type":"user-offline","userId":3}"#);
    }
}
