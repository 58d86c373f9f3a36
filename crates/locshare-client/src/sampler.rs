//! Periodic samplers that capture device state into the reading store.
//!
//! Two independent loops, one per stream. A capture failure (sensor gone,
//! permission revoked) is logged and skipped for that tick only; the next
//! tick is the retry. Enqueue failures are swallowed the same way: losing a
//! single reading is acceptable, killing the sampler is not.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::time;
use tracing::{debug, info, warn};

use locshare_shared::readings::{BatteryReading, LocationReading};

use crate::store::ReadingStore;

/// A captured location fix, before it becomes a reading.
#[derive(Debug, Clone)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accuracy_meters: f64,
}

/// A captured battery state.
#[derive(Debug, Clone)]
pub struct BatteryState {
    pub level_percent: u8,
    pub is_charging: bool,
}

/// External position sensor.
pub trait LocationSource: Send + Sync + 'static {
    fn capture(&self) -> impl Future<Output = Result<LocationFix>> + Send;
}

/// External battery sensor.
pub trait BatterySource: Send + Sync + 'static {
    fn capture(&self) -> impl Future<Output = Result<BatteryState>> + Send;
}

/// Shared stop signal for the sampler loops.
#[derive(Default)]
pub struct SamplerShutdown {
    notify: Notify,
    flag: AtomicBool,
}

impl SamplerShutdown {
    pub fn stop(&self) {
        self.flag.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    fn stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// One location tick: capture once, enqueue, never retry mid-tick.
pub async fn location_tick<S: LocationSource>(store: &ReadingStore, source: &S) {
    match source.capture().await {
        Ok(fix) => {
            let reading =
                LocationReading::capture(fix.latitude, fix.longitude, fix.address, fix.accuracy_meters);
            if let Err(e) = store.enqueue_location(&reading) {
                warn!(reading_id = %reading.id, error = %e, "failed to enqueue location reading");
            } else {
                debug!(reading_id = %reading.id, "location reading enqueued");
            }
        }
        Err(e) => {
            warn!(error = %e, "location capture failed, skipping tick");
        }
    }
}

/// One battery tick.
pub async fn battery_tick<S: BatterySource>(store: &ReadingStore, source: &S) {
    match source.capture().await {
        Ok(state) => {
            let reading = BatteryReading::capture(state.level_percent, state.is_charging);
            if let Err(e) = store.enqueue_battery(&reading) {
                warn!(reading_id = %reading.id, error = %e, "failed to enqueue battery reading");
            } else {
                debug!(reading_id = %reading.id, level = reading.level_percent, "battery reading enqueued");
            }
        }
        Err(e) => {
            warn!(error = %e, "battery capture failed, skipping tick");
        }
    }
}

/// Spawn the location sampler loop. A running tick finishes before shutdown
/// takes effect.
pub fn spawn_location_sampler<S: LocationSource>(
    store: Arc<ReadingStore>,
    source: S,
    interval: Duration,
    shutdown: Arc<SamplerShutdown>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notify.notified() => break,
            }
            if shutdown.stopped() {
                break;
            }
            location_tick(&store, &source).await;
        }
        info!("location sampler stopped");
    })
}

/// Spawn the battery sampler loop.
pub fn spawn_battery_sampler<S: BatterySource>(
    store: Arc<ReadingStore>,
    source: S,
    interval: Duration,
    shutdown: Arc<SamplerShutdown>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.notify.notified() => break,
            }
            if shutdown.stopped() {
                break;
            }
            battery_tick(&store, &source).await;
        }
        info!("battery sampler stopped");
    })
}

/// Position configured once in settings. Suitable for stationary devices; a
/// real mobile deployment would plug in a GPS-backed source instead.
#[derive(Debug, Clone)]
pub struct FixedLocationSource {
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accuracy_meters: f64,
}

impl LocationSource for FixedLocationSource {
    async fn capture(&self) -> Result<LocationFix> {
        Ok(LocationFix {
            latitude: self.latitude,
            longitude: self.longitude,
            address: self.address.clone(),
            accuracy_meters: self.accuracy_meters,
        })
    }
}

/// Battery state from /sys/class/power_supply on Linux.
#[derive(Debug, Clone)]
pub struct SysfsBatterySource {
    base: PathBuf,
}

impl SysfsBatterySource {
    pub fn new() -> Self {
        Self {
            base: PathBuf::from("/sys/class/power_supply/BAT0"),
        }
    }

    #[cfg(test)]
    fn at(base: PathBuf) -> Self {
        Self { base }
    }
}

impl Default for SysfsBatterySource {
    fn default() -> Self {
        Self::new()
    }
}

impl BatterySource for SysfsBatterySource {
    async fn capture(&self) -> Result<BatteryState> {
        let capacity_path = self.base.join("capacity");
        let status_path = self.base.join("status");

        let capacity = tokio::fs::read_to_string(&capacity_path)
            .await
            .with_context(|| format!("failed to read {}", capacity_path.display()))?;
        let level_percent: u8 = capacity
            .trim()
            .parse()
            .with_context(|| format!("invalid battery capacity {capacity:?}"))?;

        let status = tokio::fs::read_to_string(&status_path)
            .await
            .unwrap_or_default();
        let is_charging = matches!(status.trim(), "Charging" | "Full");

        Ok(BatteryState {
            level_percent: level_percent.min(100),
            is_charging,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct FailingLocation;

    impl LocationSource for FailingLocation {
        async fn capture(&self) -> Result<LocationFix> {
            bail!("sensor unavailable")
        }
    }

    #[tokio::test]
    async fn tick_enqueues_captured_fix() {
        let store = ReadingStore::new_in_memory().unwrap();
        let source = FixedLocationSource {
            latitude: 51.5,
            longitude: -0.1,
            address: "London".into(),
            accuracy_meters: 25.0,
        };

        location_tick(&store, &source).await;

        let pending = store.pending_locations().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].address, "London");
    }

    #[tokio::test]
    async fn capture_failure_skips_tick_without_panicking() {
        let store = ReadingStore::new_in_memory().unwrap();
        location_tick(&store, &FailingLocation).await;
        assert!(store.pending_locations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sampler_loop_stops_cooperatively() {
        let store = Arc::new(ReadingStore::new_in_memory().unwrap());
        let shutdown = Arc::new(SamplerShutdown::default());
        let source = FixedLocationSource {
            latitude: 0.0,
            longitude: 0.0,
            address: String::new(),
            accuracy_meters: 1.0,
        };

        let handle = spawn_location_sampler(
            store.clone(),
            source,
            Duration::from_millis(10),
            shutdown.clone(),
        );
        tokio::time::sleep(Duration::from_millis(35)).await;
        shutdown.stop();
        handle.await.unwrap();

        assert!(!store.pending_locations().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sysfs_battery_source_parses_capacity_and_status() {
        let dir = std::env::temp_dir().join(format!("locshare-bat-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("capacity"), "87\n").unwrap();
        std::fs::write(dir.join("status"), "Charging\n").unwrap();

        let source = SysfsBatterySource::at(dir.clone());
        let state = source.capture().await.unwrap();
        assert_eq!(state.level_percent, 87);
        assert!(state.is_charging);

        std::fs::remove_dir_all(&dir).ok();
    }
}
