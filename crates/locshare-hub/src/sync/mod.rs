//! Core ingestion and fan-out logic, shared by the HTTP routes and the
//! WebSocket handlers.

pub mod latest_cache;

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use locshare_shared::push_event::PushEvent;
use locshare_shared::ws_protocol::WsMessage;

use crate::store::batteries::{self, BatteryRecord};
use crate::store::locations::{self, LocationRecord};
use crate::store::{Store, connections};
use crate::ws::registry::SubscriberRegistry;
use latest_cache::LatestCache;

/// An ingestion payload the hub refuses to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestError(pub String);

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for IngestError {}

pub struct TelemetryEngine {
    store: Arc<Store>,
    registry: Arc<SubscriberRegistry>,
    cache: Mutex<LatestCache>,
}

impl TelemetryEngine {
    pub fn new(store: Arc<Store>, registry: Arc<SubscriberRegistry>) -> Self {
        Self {
            store,
            registry,
            cache: Mutex::new(LatestCache::new()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Validate, persist, and cache one location reading. Returns the
    /// persisted record. Does not notify watchers: the HTTP ingestion path
    /// only stores, and the client follows up with a live-channel push that
    /// goes through [`publish_location`](Self::publish_location). Fanning
    /// out here too would deliver every background-synced reading twice.
    pub async fn ingest_location(
        &self,
        user_id: i64,
        latitude: f64,
        longitude: f64,
        address: &str,
        accuracy: f64,
        timestamp: i64,
    ) -> Result<LocationRecord, IngestError> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(IngestError(format!("latitude out of range: {latitude}")));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(IngestError(format!("longitude out of range: {longitude}")));
        }
        if timestamp <= 0 {
            return Err(IngestError(format!("invalid timestamp: {timestamp}")));
        }

        let record = LocationRecord {
            user_id,
            latitude,
            longitude,
            address: address.to_string(),
            accuracy,
            timestamp,
        };

        locations::add_location(
            &self.store.conn(),
            user_id,
            latitude,
            longitude,
            address,
            accuracy,
            timestamp,
        )
        .map_err(|e| {
            warn!(user_id, error = %e, "failed to persist location");
            IngestError("storage failure".into())
        })?;

        let fresh = self.cache.lock().await.update_location(record.clone());
        if !fresh {
            debug!(user_id, timestamp, "stale location, cache not advanced");
        }

        Ok(record)
    }

    /// Ingest a location reading and fan it out to watchers. The live
    /// channel's `update-location` events land here.
    pub async fn publish_location(
        &self,
        user_id: i64,
        latitude: f64,
        longitude: f64,
        address: &str,
        accuracy: f64,
        timestamp: i64,
    ) -> Result<LocationRecord, IngestError> {
        let record = self
            .ingest_location(user_id, latitude, longitude, address, accuracy, timestamp)
            .await?;

        self.fanout(PushEvent::LocationUpdated {
            user_id,
            latitude,
            longitude,
            address: address.to_string(),
            accuracy,
            timestamp,
        })
        .await;

        Ok(record)
    }

    /// Validate, persist, and cache one battery reading. Store-only, same
    /// split as [`ingest_location`](Self::ingest_location).
    pub async fn ingest_battery(
        &self,
        user_id: i64,
        battery_level: u8,
        is_charging: bool,
        timestamp: i64,
    ) -> Result<BatteryRecord, IngestError> {
        if battery_level > 100 {
            return Err(IngestError(format!(
                "battery level out of range: {battery_level}"
            )));
        }
        if timestamp <= 0 {
            return Err(IngestError(format!("invalid timestamp: {timestamp}")));
        }

        let record = BatteryRecord {
            user_id,
            battery_level,
            is_charging,
            timestamp,
        };

        batteries::add_battery(
            &self.store.conn(),
            user_id,
            battery_level,
            is_charging,
            timestamp,
        )
        .map_err(|e| {
            warn!(user_id, error = %e, "failed to persist battery");
            IngestError("storage failure".into())
        })?;

        let fresh = self.cache.lock().await.update_battery(record.clone());
        if !fresh {
            debug!(user_id, timestamp, "stale battery, cache not advanced");
        }

        Ok(record)
    }

    /// Ingest a battery reading and fan it out to watchers.
    pub async fn publish_battery(
        &self,
        user_id: i64,
        battery_level: u8,
        is_charging: bool,
        timestamp: i64,
    ) -> Result<BatteryRecord, IngestError> {
        let record = self
            .ingest_battery(user_id, battery_level, is_charging, timestamp)
            .await?;

        self.fanout(PushEvent::BatteryUpdated {
            user_id,
            battery_level,
            is_charging,
            timestamp,
        })
        .await;

        Ok(record)
    }

    /// Latest location: cache first, database on a cold start.
    pub async fn latest_location(&self, user_id: i64) -> Option<LocationRecord> {
        if let Some(record) = self.cache.lock().await.location(user_id).cloned() {
            return Some(record);
        }
        let record = locations::get_latest(&self.store.conn(), user_id)?;
        self.cache.lock().await.update_location(record.clone());
        Some(record)
    }

    pub async fn latest_battery(&self, user_id: i64) -> Option<BatteryRecord> {
        if let Some(record) = self.cache.lock().await.battery(user_id).cloned() {
            return Some(record);
        }
        let record = batteries::get_latest(&self.store.conn(), user_id)?;
        self.cache.lock().await.update_battery(record.clone());
        Some(record)
    }

    /// Presence transition: the user's first channel arrived.
    pub async fn handle_user_online(&self, user_id: i64) {
        info!(user_id, "user online");
        self.fanout(PushEvent::UserOnline { user_id }).await;
    }

    /// Presence transition: the user's last channel left.
    pub async fn handle_user_offline(&self, user_id: i64) {
        info!(user_id, "user offline");
        self.fanout(PushEvent::UserOffline { user_id }).await;
    }

    /// Deliver an event to every watcher of its subject. Watchers without a
    /// live channel are skipped silently; they pull the latest state on
    /// reconnect.
    async fn fanout(&self, event: PushEvent) {
        let subject = event.subject();
        let watchers = connections::watchers_of(&self.store.conn(), subject);
        if watchers.is_empty() {
            return;
        }

        let data = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "failed to serialize push event");
                return;
            }
        };
        let msg = WsMessage::event(event.event_name(), data);
        let json = match serde_json::to_string(&msg) {
            Ok(j) => j,
            Err(_) => return,
        };

        let mut delivered = 0;
        for watcher in &watchers {
            delivered += self.registry.send_to_user(*watcher, &json).await;
        }
        debug!(
            subject,
            event = event.event_name(),
            watchers = watchers.len(),
            delivered,
            "fanned out push event"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::registry::WsOutMessage;
    use tokio::sync::mpsc::unbounded_channel;

    const ALICE: i64 = 1;
    const BOB: i64 = 2;
    const CAROL: i64 = 3;

    fn engine() -> (Arc<TelemetryEngine>, Arc<Store>, Arc<SubscriberRegistry>) {
        let store = Arc::new(Store::new_in_memory().unwrap());
        let registry = Arc::new(SubscriberRegistry::new());
        (
            Arc::new(TelemetryEngine::new(store.clone(), registry.clone())),
            store,
            registry,
        )
    }

    fn connect(store: &Store, watcher: i64, subject: i64) {
        connections::add_connection(&store.conn(), watcher, subject, "peer").unwrap();
    }

    #[tokio::test]
    async fn out_of_range_battery_is_rejected_without_side_effects() {
        let (engine, _store, _) = engine();

        engine.ingest_battery(ALICE, 80, false, 100).await.unwrap();
        let err = engine
            .ingest_battery(ALICE, 150, false, 200)
            .await
            .unwrap_err();
        assert!(err.0.contains("battery level"));

        // Neither cache nor database advanced past the valid reading.
        let latest = engine.latest_battery(ALICE).await.unwrap();
        assert_eq!(latest.battery_level, 80);
        assert_eq!(latest.timestamp, 100);
    }

    #[tokio::test]
    async fn invalid_coordinates_are_rejected() {
        let (engine, _store, _) = engine();

        let err = engine
            .ingest_location(ALICE, 91.0, 0.0, "", 1.0, 100)
            .await
            .unwrap_err();
        assert!(err.0.contains("latitude"));
        let err = engine
            .ingest_location(ALICE, 0.0, -181.0, "", 1.0, 100)
            .await
            .unwrap_err();
        assert!(err.0.contains("longitude"));
        assert!(engine.latest_location(ALICE).await.is_none());
    }

    #[tokio::test]
    async fn fanout_reaches_watchers_only() {
        let (engine, store, registry) = engine();
        connect(&store, BOB, ALICE); // bob watches alice
        // carol has no edge to alice

        let (bob_tx, mut bob_rx) = unbounded_channel();
        let (carol_tx, mut carol_rx) = unbounded_channel();
        registry.add_channel(BOB, "b1".into(), bob_tx).await;
        registry.add_channel(CAROL, "c1".into(), carol_tx).await;

        engine
            .publish_location(ALICE, 52.0, 4.0, "Delft", 5.0, 100)
            .await
            .unwrap();

        let WsOutMessage::Text(json) = bob_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        assert!(json.contains("location-updated"));
        assert!(json.contains("Delft"));
        assert!(carol_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dead_watcher_channel_does_not_stop_others() {
        let (engine, store, registry) = engine();
        connect(&store, BOB, ALICE);
        connect(&store, CAROL, ALICE);

        let (dead_tx, dead_rx) = unbounded_channel();
        drop(dead_rx);
        let (live_tx, mut live_rx) = unbounded_channel();
        registry.add_channel(BOB, "b1".into(), dead_tx).await;
        registry.add_channel(CAROL, "c1".into(), live_tx).await;

        engine.publish_battery(ALICE, 42, true, 100).await.unwrap();

        assert!(live_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn store_only_ingest_does_not_notify_watchers() {
        let (engine, store, registry) = engine();
        connect(&store, BOB, ALICE);

        let (bob_tx, mut bob_rx) = unbounded_channel();
        registry.add_channel(BOB, "b1".into(), bob_tx).await;

        engine
            .ingest_location(ALICE, 52.0, 4.0, "Delft", 5.0, 100)
            .await
            .unwrap();
        engine.ingest_battery(ALICE, 42, true, 100).await.unwrap();

        // Persisted and cached, but nothing pushed.
        assert!(engine.latest_location(ALICE).await.is_some());
        assert!(engine.latest_battery(ALICE).await.is_some());
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn latest_falls_back_to_database_on_cold_cache() {
        let (_, store, registry) = engine();
        locations::add_location(&store.conn(), ALICE, 52.0, 4.0, "Delft", 5.0, 100).unwrap();

        // Fresh engine simulates a restart with an empty cache.
        let fresh = TelemetryEngine::new(store.clone(), registry);
        let latest = fresh.latest_location(ALICE).await.unwrap();
        assert_eq!(latest.address, "Delft");
    }

    #[tokio::test]
    async fn presence_events_reach_watchers() {
        let (engine, store, registry) = engine();
        connect(&store, BOB, ALICE);

        let (bob_tx, mut bob_rx) = unbounded_channel();
        registry.add_channel(BOB, "b1".into(), bob_tx).await;

        engine.handle_user_online(ALICE).await;
        let WsOutMessage::Text(json) = bob_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        assert!(json.contains("user-online"));

        engine.handle_user_offline(ALICE).await;
        let WsOutMessage::Text(json) = bob_rx.try_recv().unwrap() else {
            panic!("expected text frame");
        };
        assert!(json.contains("user-offline"));
    }
}
