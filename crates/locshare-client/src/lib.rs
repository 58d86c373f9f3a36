pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod sampler;
pub mod scheduler;
pub mod store;
pub mod view;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use locshare_shared::push_event::PushEvent;

use crate::api::ApiClient;
use crate::channel::{ChannelConfig, LiveChannel};
use crate::config::Configuration;
use crate::sampler::{FixedLocationSource, SamplerShutdown, SysfsBatterySource};
use crate::scheduler::{SYNC_INTERVAL, SyncScheduler};
use crate::store::ReadingStore;

/// Run the telemetry agent until interrupted: samplers fill the local queue,
/// the scheduler drains it, the live channel carries pushes both ways.
pub async fn run_agent() -> Result<()> {
    let mut config = Configuration::create()?;
    config.load_with_settings()?;

    if config.auth_token.is_empty() {
        bail!("no auth token configured; run `locshare auth login` or set LOCSHARE_TOKEN");
    }

    info!(hub_url = %config.hub_url, "starting telemetry agent");

    let store = Arc::new(
        ReadingStore::new(&config.db_file.to_string_lossy())
            .context("failed to open reading store")?,
    );
    let pending = store.pending_unsynced()?;
    if let Some(oldest) = pending.first() {
        info!(
            pending = pending.len(),
            oldest_timestamp = oldest.timestamp(),
            "readings queued from a previous run"
        );
    }

    let api = Arc::new(ApiClient::new(&config.hub_url, &config.auth_token)?);

    let channel = Arc::new(LiveChannel::new(ChannelConfig {
        hub_url: config.hub_url.clone(),
        auth_token: config.auth_token.clone(),
        max_reconnect_attempts: None,
    }));
    register_peer_handlers(&channel).await;
    channel.connect().await;
    if !channel.wait_connected(Duration::from_secs(5)).await {
        warn!("hub not reachable yet, readings will queue locally");
    }

    let sampler_shutdown = Arc::new(SamplerShutdown::default());
    let mut sampler_handles = Vec::new();

    match config.fixed_location.clone() {
        Some(fixed) => {
            sampler_handles.push(sampler::spawn_location_sampler(
                store.clone(),
                FixedLocationSource {
                    latitude: fixed.latitude,
                    longitude: fixed.longitude,
                    address: fixed.address,
                    accuracy_meters: fixed.accuracy_meters,
                },
                Duration::from_secs(config.location_interval_secs),
                sampler_shutdown.clone(),
            ));
        }
        None => {
            warn!("no fixed location configured, location sampling disabled");
        }
    }
    sampler_handles.push(sampler::spawn_battery_sampler(
        store.clone(),
        SysfsBatterySource::new(),
        Duration::from_secs(config.battery_interval_secs),
        sampler_shutdown.clone(),
    ));

    let scheduler = Arc::new(SyncScheduler::new(store.clone(), api, channel.clone()));
    let scheduler_handle = scheduler.start(SYNC_INTERVAL);

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    sampler_shutdown.stop();
    scheduler.stop();
    for handle in sampler_handles {
        let _ = handle.await;
    }
    let _ = scheduler_handle.await;
    channel.close().await;

    info!(pending = store.pending_count()?, "agent stopped");
    Ok(())
}

/// Log server-pushed peer events. A richer frontend would render these; the
/// agent surfaces them in its log stream.
async fn register_peer_handlers(channel: &LiveChannel) {
    for event in [
        "location-updated",
        "battery-updated",
        "user-online",
        "user-offline",
    ] {
        channel
            .on(event, move |data| {
                // The envelope data is the tagged event itself.
                match serde_json::from_value::<PushEvent>(data) {
                    Ok(PushEvent::LocationUpdated {
                        user_id,
                        latitude,
                        longitude,
                        ..
                    }) => {
                        info!(user_id, latitude, longitude, "peer location updated");
                    }
                    Ok(PushEvent::BatteryUpdated {
                        user_id,
                        battery_level,
                        is_charging,
                        ..
                    }) => {
                        info!(user_id, battery_level, is_charging, "peer battery updated");
                    }
                    Ok(PushEvent::UserOnline { user_id }) => {
                        info!(user_id, "peer online");
                    }
                    Ok(PushEvent::UserOffline { user_id }) => {
                        info!(user_id, "peer offline");
                    }
                    Err(e) => {
                        warn!(event, error = %e, "unparseable push event");
                    }
                }
            })
            .await;
    }
}
