pub mod registry;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::{
    Router,
    extract::{
        Query, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};
use uuid::Uuid;

use locshare_shared::ws_protocol::WsMessage;

use crate::sync::TelemetryEngine;
use registry::{PresenceChange, SubscriberRegistry, WsOutMessage};

/// Shared state for WebSocket handlers.
#[derive(Clone)]
pub struct WsState {
    pub engine: Arc<TelemetryEngine>,
    pub registry: Arc<SubscriberRegistry>,
    pub jwt_secret: Vec<u8>,
}

pub fn ws_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", axum::routing::get(ws_upgrade))
        .with_state(state)
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();

    let user_id = match verify_jwt(&token, &state.jwt_secret) {
        Some(uid) => uid,
        None => {
            warn!("live channel rejected (invalid token)");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_ws(socket, state, user_id))
        .into_response()
}

fn verify_jwt(token: &str, secret: &[u8]) -> Option<i64> {
    use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};

    #[derive(serde::Deserialize)]
    #[allow(dead_code)]
    struct Claims {
        uid: i64,
        exp: u64,
    }

    let validation = Validation::new(Algorithm::HS256);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation).ok()?;
    Some(data.claims.uid)
}

async fn handle_ws(socket: WebSocket, state: WsState, user_id: i64) {
    let conn_id = Uuid::new_v4().to_string();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = unbounded_channel::<WsOutMessage>();
    // Acks go back on this connection only, not every channel of the user.
    let ack_tx = out_tx.clone();

    let presence = state
        .registry
        .add_channel(user_id, conn_id.clone(), out_tx)
        .await;
    debug!(conn_id = %conn_id, user_id, "live channel connected");
    if presence == PresenceChange::Changed {
        state.engine.handle_user_online(user_id).await;
    }

    // Outgoing message pump
    let conn_id_out = conn_id.clone();
    let out_task = tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            let result = match msg {
                WsOutMessage::Text(text) => ws_tx.send(Message::Text(text.into())).await,
                WsOutMessage::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            };
            if let Err(e) = result {
                debug!(conn_id = %conn_id_out, error = %e, "WebSocket send failed, closing outgoing pump");
                break;
            }
        }
    });

    // Incoming message processing
    while let Some(msg) = ws_rx.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(_) => break,
        };

        let text = match msg {
            Message::Text(t) => t.to_string(),
            Message::Close(_) => break,
            Message::Ping(_) => continue,
            Message::Pong(_) => continue,
            _ => continue,
        };

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(_) => continue,
        };

        let event = match parsed.get("event").and_then(|v| v.as_str()) {
            Some(e) => e.to_string(),
            None => continue,
        };
        let data = parsed.get("data").cloned().unwrap_or(Value::Null);
        let request_id = parsed.get("id").and_then(|v| v.as_str()).map(String::from);

        let response = handle_event(user_id, &event, data, &state.engine).await;

        if let Some(rid) = request_id {
            let ack = WsMessage::ack(rid, &event, response.unwrap_or(Value::Null));
            let _ = ack_tx.send(WsOutMessage::Text(
                serde_json::to_string(&ack).unwrap_or_default(),
            ));
        }
    }

    debug!(conn_id = %conn_id, user_id, "live channel disconnected");
    let presence = state.registry.remove_channel(user_id, &conn_id).await;
    if presence == PresenceChange::Changed {
        state.engine.handle_user_offline(user_id).await;
    }
    out_task.abort();
}

/// Dispatch one live-channel event. This is the notifying leg: updates
/// ingested here are the ones fanned out to watchers, while the HTTP routes
/// only store. A malformed payload acks with a typed error so the sender can
/// tell it apart from success.
async fn handle_event(
    user_id: i64,
    event: &str,
    data: Value,
    engine: &TelemetryEngine,
) -> Option<Value> {
    fn missing(field: &str) -> Option<Value> {
        Some(json!({ "ok": false, "error": format!("missing or invalid {field}") }))
    }

    match event {
        "update-location" => {
            let Some(latitude) = data.get("latitude").and_then(|v| v.as_f64()) else {
                return missing("latitude");
            };
            let Some(longitude) = data.get("longitude").and_then(|v| v.as_f64()) else {
                return missing("longitude");
            };
            let Some(timestamp) = data.get("timestamp").and_then(|v| v.as_i64()) else {
                return missing("timestamp");
            };
            let address = data
                .get("address")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            let accuracy = data.get("accuracy").and_then(|v| v.as_f64()).unwrap_or(0.0);

            match engine
                .publish_location(user_id, latitude, longitude, address, accuracy, timestamp)
                .await
            {
                Ok(record) => Some(json!({ "ok": true, "timestamp": record.timestamp })),
                Err(e) => Some(json!({ "ok": false, "error": e.0 })),
            }
        }
        "update-battery" => {
            let Some(battery_level) = data.get("batteryLevel").and_then(|v| v.as_u64()) else {
                return missing("batteryLevel");
            };
            let Some(timestamp) = data.get("timestamp").and_then(|v| v.as_i64()) else {
                return missing("timestamp");
            };
            let is_charging = data
                .get("isCharging")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if battery_level > u8::MAX as u64 {
                return Some(json!({ "ok": false, "error": "battery level out of range" }));
            }

            match engine
                .publish_battery(user_id, battery_level as u8, is_charging, timestamp)
                .await
            {
                Ok(record) => Some(json!({ "ok": true, "timestamp": record.timestamp })),
                Err(e) => Some(json!({ "ok": false, "error": e.0 })),
            }
        }
        _ => {
            debug!(user_id, event, "unknown live channel event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, connections};

    const ALICE: i64 = 1;
    const BOB: i64 = 2;

    fn engine() -> Arc<TelemetryEngine> {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let registry = Arc::new(SubscriberRegistry::new());
        Arc::new(TelemetryEngine::new(store, registry))
    }

    #[tokio::test]
    async fn update_location_event_persists_and_acks() {
        let engine = engine();
        let data = json!({
            "latitude": 52.0, "longitude": 4.3, "address": "Delft",
            "accuracy": 10.0, "timestamp": 1234
        });

        let response = handle_event(ALICE, "update-location", data, &engine).await;
        assert_eq!(response.unwrap()["ok"], json!(true));
        assert_eq!(engine.latest_location(ALICE).await.unwrap().timestamp, 1234);
    }

    #[tokio::test]
    async fn update_battery_event_rejects_bad_level() {
        let engine = engine();
        let data = json!({ "batteryLevel": 150, "isCharging": false, "timestamp": 1234 });

        let response = handle_event(ALICE, "update-battery", data, &engine)
            .await
            .unwrap();
        assert_eq!(response["ok"], json!(false));
        assert!(engine.latest_battery(ALICE).await.is_none());
    }

    #[tokio::test]
    async fn malformed_event_payload_acks_with_error() {
        let engine = engine();
        let response = handle_event(ALICE, "update-location", json!({}), &engine)
            .await
            .unwrap();
        assert_eq!(response["ok"], json!(false));
        assert!(
            response["error"]
                .as_str()
                .unwrap()
                .contains("missing or invalid")
        );

        // Wrong type counts as missing too.
        let response = handle_event(
            ALICE,
            "update-battery",
            json!({ "batteryLevel": "full", "timestamp": 1 }),
            &engine,
        )
        .await
        .unwrap();
        assert_eq!(response["ok"], json!(false));
        assert!(engine.latest_battery(ALICE).await.is_none());
    }

    #[tokio::test]
    async fn synced_reading_is_delivered_to_watchers_exactly_once() {
        // One background-synced reading takes two legs: HTTP ingestion, then
        // the client's live-channel push. Only the push leg notifies, so a
        // watcher sees the reading once.
        let store = Arc::new(Store::new_in_memory().unwrap());
        let registry = Arc::new(SubscriberRegistry::new());
        connections::add_connection(&store.conn(), BOB, ALICE, "alice").unwrap();
        let engine = Arc::new(TelemetryEngine::new(store, registry.clone()));

        let (bob_tx, mut bob_rx) = tokio::sync::mpsc::unbounded_channel();
        registry.add_channel(BOB, "b1".into(), bob_tx).await;

        // HTTP leg.
        engine
            .ingest_location(ALICE, 52.0, 4.3, "Delft", 10.0, 1234)
            .await
            .unwrap();
        // Live-channel push leg with the same payload.
        let data = json!({
            "latitude": 52.0, "longitude": 4.3, "address": "Delft",
            "accuracy": 10.0, "timestamp": 1234
        });
        let response = handle_event(ALICE, "update-location", data, &engine)
            .await
            .unwrap();
        assert_eq!(response["ok"], json!(true));

        let mut delivered = 0;
        while let Ok(msg) = bob_rx.try_recv() {
            if let WsOutMessage::Text(text) = msg
                && text.contains("location-updated")
            {
                delivered += 1;
            }
        }
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn ingest_over_ws_matches_http_semantics() {
        // A reading accepted over the live channel is visible to a watcher's
        // pull query, same as HTTP ingestion.
        let store = Arc::new(Store::new_in_memory().unwrap());
        let registry = Arc::new(SubscriberRegistry::new());
        connections::add_connection(&store.conn(), BOB, ALICE, "alice").unwrap();
        let engine = Arc::new(TelemetryEngine::new(store.clone(), registry));

        let data = json!({ "batteryLevel": 64, "isCharging": true, "timestamp": 99 });
        handle_event(ALICE, "update-battery", data, &engine).await;

        assert!(connections::are_connected(&store.conn(), BOB, ALICE));
        let latest = engine.latest_battery(ALICE).await.unwrap();
        assert_eq!(latest.battery_level, 64);
        assert!(latest.is_charging);
    }
}
