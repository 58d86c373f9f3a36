//! Background sync: drains the reading store against the hub on a fixed
//! interval.
//!
//! Each cycle processes every pending reading oldest-first, one ingestion
//! call in flight at a time. A transient failure stops the rest of that
//! stream for the cycle so a younger reading is never marked synced while an
//! older one is still pending; the next cycle retries from the same reading.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info, warn};

use locshare_shared::readings::{BatteryReading, LocationReading};

use crate::api::ApiError;
use crate::store::ReadingStore;

/// Fixed cycle interval. Retries are cheap and idempotent per reading id, so
/// no exponential backoff across cycles.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Delay between successive ingestion calls within one cycle, to bound the
/// request rate.
pub const PACING_DELAY: Duration = Duration::from_millis(500);

/// Server-side ingestion of a single reading.
pub trait Ingest: Send + Sync + 'static {
    fn ingest_location(
        &self,
        reading: &LocationReading,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
    fn ingest_battery(
        &self,
        reading: &BatteryReading,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;
}

/// The live real-time channel, used to gate sync cycles and to push each
/// successfully ingested payload to peers.
pub trait LiveLink: Send + Sync + 'static {
    fn is_connected(&self) -> impl Future<Output = bool> + Send;
    fn push_location(&self, reading: &LocationReading) -> impl Future<Output = ()> + Send;
    fn push_battery(&self, reading: &BatteryReading) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Syncing,
    Stopped,
}

/// What one sync cycle did. Returned for observability and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Cycle skipped wholesale because the live channel was down.
    pub skipped_offline: bool,
    /// Readings ingested and marked synced.
    pub synced: usize,
    /// Readings permanently rejected by validation and retired.
    pub dropped: usize,
    /// Readings left pending behind a transient failure.
    pub blocked: usize,
}

pub struct SyncScheduler<I, C> {
    store: Arc<ReadingStore>,
    ingest: Arc<I>,
    channel: Arc<C>,
    pacing: Duration,
    state: std::sync::Mutex<SchedulerState>,
    shutdown: Notify,
    shutdown_flag: AtomicBool,
}

impl<I: Ingest, C: LiveLink> SyncScheduler<I, C> {
    pub fn new(store: Arc<ReadingStore>, ingest: Arc<I>, channel: Arc<C>) -> Self {
        Self {
            store,
            ingest,
            channel,
            pacing: PACING_DELAY,
            state: std::sync::Mutex::new(SchedulerState::Idle),
            shutdown: Notify::new(),
            shutdown_flag: AtomicBool::new(false),
        }
    }

    #[cfg(test)]
    fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap()
    }

    /// Spawn the periodic sync loop. The first cycle runs immediately.
    /// Returns a handle that resolves when the loop has stopped.
    pub fn start(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = scheduler.shutdown.notified() => break,
                }
                if scheduler.shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                // A running cycle always completes; stop only suppresses the
                // next one.
                let report = scheduler.run_cycle().await;
                debug!(?report, "sync cycle finished");
            }
            *scheduler.state.lock().unwrap() = SchedulerState::Stopped;
            info!("sync scheduler stopped");
        })
    }

    /// Request cooperative shutdown. An in-flight cycle finishes first.
    pub fn stop(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        // notify_one stores a permit, so a stop issued before the loop first
        // awaits is not lost.
        self.shutdown.notify_one();
    }

    /// Run one sync cycle to completion.
    pub async fn run_cycle(&self) -> CycleReport {
        if self.shutdown_flag.load(Ordering::Relaxed) {
            return CycleReport::default();
        }

        // No partial progress while the live channel is down: peers could not
        // receive the post-ingest push, and connectivity is likely degraded
        // anyway.
        if !self.channel.is_connected().await {
            info!("live channel disconnected, skipping sync cycle");
            return CycleReport {
                skipped_offline: true,
                ..CycleReport::default()
            };
        }

        *self.state.lock().unwrap() = SchedulerState::Syncing;
        let mut report = CycleReport::default();
        self.drain_locations(&mut report).await;
        self.drain_batteries(&mut report).await;
        *self.state.lock().unwrap() = SchedulerState::Idle;
        report
    }

    async fn drain_locations(&self, report: &mut CycleReport) {
        let pending = match self.store.pending_locations() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to read pending locations");
                return;
            }
        };

        let total = pending.len();
        for (index, reading) in pending.iter().enumerate() {
            match self.ingest.ingest_location(reading).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_location_synced(&reading.id) {
                        warn!(reading_id = %reading.id, error = %e, "failed to persist synced flag");
                    }
                    self.channel.push_location(reading).await;
                    report.synced += 1;
                }
                Err(ApiError::Validation(msg)) => {
                    // Permanently malformed: retrying forever would wedge the
                    // queue behind it, so retire it and move on.
                    warn!(reading_id = %reading.id, timestamp = reading.timestamp, error = %msg,
                        "location reading rejected by validation, dropping");
                    if let Err(e) = self.store.mark_location_synced(&reading.id) {
                        warn!(reading_id = %reading.id, error = %e, "failed to retire rejected reading");
                    }
                    report.dropped += 1;
                }
                Err(ApiError::Transient(msg)) => {
                    warn!(reading_id = %reading.id, timestamp = reading.timestamp, error = %msg,
                        "location ingest failed, retrying next cycle");
                    report.blocked += total - index;
                    return;
                }
            }
            if index + 1 < total {
                time::sleep(self.pacing).await;
            }
        }
    }

    async fn drain_batteries(&self, report: &mut CycleReport) {
        let pending = match self.store.pending_batteries() {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to read pending batteries");
                return;
            }
        };

        let total = pending.len();
        for (index, reading) in pending.iter().enumerate() {
            match self.ingest.ingest_battery(reading).await {
                Ok(()) => {
                    if let Err(e) = self.store.mark_battery_synced(&reading.id) {
                        warn!(reading_id = %reading.id, error = %e, "failed to persist synced flag");
                    }
                    self.channel.push_battery(reading).await;
                    report.synced += 1;
                }
                Err(ApiError::Validation(msg)) => {
                    warn!(reading_id = %reading.id, timestamp = reading.timestamp, error = %msg,
                        "battery reading rejected by validation, dropping");
                    if let Err(e) = self.store.mark_battery_synced(&reading.id) {
                        warn!(reading_id = %reading.id, error = %e, "failed to retire rejected reading");
                    }
                    report.dropped += 1;
                }
                Err(ApiError::Transient(msg)) => {
                    warn!(reading_id = %reading.id, timestamp = reading.timestamp, error = %msg,
                        "battery ingest failed, retrying next cycle");
                    report.blocked += total - index;
                    return;
                }
            }
            if index + 1 < total {
                time::sleep(self.pacing).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct ScriptedIngest {
        /// reading id → error to return. Missing ids succeed.
        failures: Mutex<HashMap<String, ApiError>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedIngest {
        fn fail(&self, id: &str, error: ApiError) {
            self.failures.lock().unwrap().insert(id.to_string(), error);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, id: &str) -> Result<(), ApiError> {
            self.calls.lock().unwrap().push(id.to_string());
            match self.failures.lock().unwrap().get(id) {
                Some(e) => Err(e.clone()),
                None => Ok(()),
            }
        }
    }

    impl Ingest for ScriptedIngest {
        async fn ingest_location(&self, reading: &LocationReading) -> Result<(), ApiError> {
            self.record(&reading.id)
        }

        async fn ingest_battery(&self, reading: &BatteryReading) -> Result<(), ApiError> {
            self.record(&reading.id)
        }
    }

    #[derive(Default)]
    struct FakeChannel {
        connected: AtomicBool,
        pushes: Mutex<Vec<String>>,
    }

    impl FakeChannel {
        fn online() -> Self {
            let c = Self::default();
            c.connected.store(true, Ordering::Relaxed);
            c
        }

        fn pushes(&self) -> Vec<String> {
            self.pushes.lock().unwrap().clone()
        }
    }

    impl LiveLink for FakeChannel {
        async fn is_connected(&self) -> bool {
            self.connected.load(Ordering::Relaxed)
        }

        async fn push_location(&self, reading: &LocationReading) {
            self.pushes.lock().unwrap().push(reading.id.clone());
        }

        async fn push_battery(&self, reading: &BatteryReading) {
            self.pushes.lock().unwrap().push(reading.id.clone());
        }
    }

    fn scheduler(
        store: Arc<ReadingStore>,
        ingest: Arc<ScriptedIngest>,
        channel: Arc<FakeChannel>,
    ) -> SyncScheduler<ScriptedIngest, FakeChannel> {
        SyncScheduler::new(store, ingest, channel).with_pacing(Duration::ZERO)
    }

    fn location_at(timestamp: i64) -> LocationReading {
        let mut r = LocationReading::capture(52.0, 4.0, "test", 5.0);
        r.timestamp = timestamp;
        r
    }

    #[tokio::test]
    async fn offline_skips_cycle_entirely() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        store.enqueue_location(&location_at(0)).unwrap();
        let ingest = Arc::new(ScriptedIngest::default());
        let channel = Arc::new(FakeChannel::default()); // disconnected

        let report = scheduler(store.clone(), ingest.clone(), channel)
            .run_cycle()
            .await;

        assert!(report.skipped_offline);
        assert!(ingest.calls().is_empty());
        assert_eq!(store.pending_locations().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reconnect_drains_in_capture_order() {
        // Three readings queued while offline; one cycle after reconnect
        // ingests and pushes all of them oldest-first.
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let readings: Vec<_> = [0, 10, 20].iter().map(|&t| location_at(t)).collect();
        for r in &readings {
            store.enqueue_location(r).unwrap();
        }
        let ingest = Arc::new(ScriptedIngest::default());
        let channel = Arc::new(FakeChannel::online());

        let report = scheduler(store.clone(), ingest.clone(), channel.clone())
            .run_cycle()
            .await;

        assert_eq!(report.synced, 3);
        let expected: Vec<String> = readings.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ingest.calls(), expected);
        assert_eq!(channel.pushes(), expected);
        assert!(store.pending_locations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_blocks_younger_readings() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let older = location_at(0);
        let younger = location_at(10);
        store.enqueue_location(&older).unwrap();
        store.enqueue_location(&younger).unwrap();

        let ingest = Arc::new(ScriptedIngest::default());
        ingest.fail(&older.id, ApiError::Transient("timeout".into()));
        let channel = Arc::new(FakeChannel::online());

        let report = scheduler(store.clone(), ingest.clone(), channel.clone())
            .run_cycle()
            .await;

        // t=0 failed, so t=10 was never attempted this cycle.
        assert_eq!(ingest.calls(), vec![older.id.clone()]);
        assert_eq!(report.blocked, 2);
        assert_eq!(report.synced, 0);
        assert!(channel.pushes().is_empty());

        let pending = store.pending_locations().unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, older.id);
    }

    #[tokio::test]
    async fn validation_rejection_drops_and_continues() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let bad = location_at(0);
        let good = location_at(10);
        store.enqueue_location(&bad).unwrap();
        store.enqueue_location(&good).unwrap();

        let ingest = Arc::new(ScriptedIngest::default());
        ingest.fail(&bad.id, ApiError::Validation("out of range".into()));
        let channel = Arc::new(FakeChannel::online());

        let report = scheduler(store.clone(), ingest.clone(), channel.clone())
            .run_cycle()
            .await;

        assert_eq!(report.dropped, 1);
        assert_eq!(report.synced, 1);
        // The rejected reading is retired, not retried forever.
        assert!(store.pending_locations().unwrap().is_empty());
        // Only the accepted reading was pushed to peers.
        assert_eq!(channel.pushes(), vec![good.id]);
    }

    #[tokio::test]
    async fn location_failure_does_not_block_battery_stream() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let loc = location_at(0);
        store.enqueue_location(&loc).unwrap();
        let mut bat = BatteryReading::capture(70, true);
        bat.timestamp = 5;
        store.enqueue_battery(&bat).unwrap();

        let ingest = Arc::new(ScriptedIngest::default());
        ingest.fail(&loc.id, ApiError::Transient("refused".into()));
        let channel = Arc::new(FakeChannel::online());

        let report = scheduler(store.clone(), ingest.clone(), channel)
            .run_cycle()
            .await;

        // The streams are independent: the battery reading still synced.
        assert_eq!(report.synced, 1);
        assert_eq!(report.blocked, 1);
        assert!(store.pending_batteries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_is_cooperative() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let ingest = Arc::new(ScriptedIngest::default());
        let channel = Arc::new(FakeChannel::online());
        let scheduler = Arc::new(scheduler(store, ingest, channel));

        let handle = scheduler.start(Duration::from_secs(3600));
        scheduler.stop();
        handle.await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }
}
