//! Envelope format for the live channel.
//!
//! Both directions speak the same frame: an event name plus a JSON payload,
//! with an optional request id. The agent's `update-location` and
//! `update-battery` frames carry an id and the hub answers each with an ack
//! frame (same id, event name suffixed). Hub-to-agent pushes such as
//! `location-updated` omit the id and are never acked.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

const ACK_SUFFIX: &str = ":ack";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub event: String,
    pub data: Value,
}

impl WsMessage {
    /// One-way frame without an id. Nothing comes back for it.
    pub fn event(event: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            event: event.into(),
            data,
        }
    }

    /// Frame with a fresh request id, returned alongside so the sender can
    /// match the eventual ack.
    pub fn request(event: impl Into<String>, data: Value) -> (Self, String) {
        let id = Uuid::new_v4().to_string();
        (
            Self {
                id: Some(id.clone()),
                event: event.into(),
                data,
            },
            id,
        )
    }

    /// Reply to a request: echoes its id under `"{event}:ack"`.
    pub fn ack(id: impl Into<String>, event: &str, data: Value) -> Self {
        Self {
            id: Some(id.into()),
            event: format!("{event}{ACK_SUFFIX}"),
            data,
        }
    }

    pub fn is_ack(&self) -> bool {
        self.event.ends_with(ACK_SUFFIX)
    }
}
