//! Reconnecting WebSocket client for the hub's live channel.
//!
//! Carries outbound `update-location` / `update-battery` events and delivers
//! server-pushed peer events to registered handlers. There is no offline
//! buffer here: durability for telemetry lives in the reading store, and a
//! push that finds the channel down is simply dropped (the reading has
//! already been ingested over HTTP).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::{Mutex, Notify, RwLock, mpsc};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use locshare_shared::readings::{BatteryReading, LocationReading};
use locshare_shared::ws_protocol::WsMessage;

use crate::scheduler::LiveLink;

const PING_INTERVAL: Duration = Duration::from_secs(25);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub hub_url: String,
    pub auth_token: String,
    /// Max reconnection attempts (None = unlimited). Resets after each
    /// successful connection.
    pub max_reconnect_attempts: Option<usize>,
}

fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

type EventHandler = Box<dyn Fn(Value) + Send + Sync>;

pub struct LiveChannel {
    config: ChannelConfig,
    state: Arc<RwLock<ConnectionState>>,
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
    event_handlers: Arc<RwLock<HashMap<String, EventHandler>>>,
    connected_notify: Arc<Notify>,
    shutdown: Arc<Notify>,
    shutdown_flag: Arc<AtomicBool>,
    last_activity: Arc<AtomicU64>,
}

impl LiveChannel {
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            tx: Arc::new(Mutex::new(None)),
            event_handlers: Arc::new(RwLock::new(HashMap::new())),
            connected_notify: Arc::new(Notify::new()),
            shutdown: Arc::new(Notify::new()),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            last_activity: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a handler for a server-pushed event.
    pub async fn on(
        &self,
        event: impl Into<String>,
        handler: impl Fn(Value) + Send + Sync + 'static,
    ) {
        self.event_handlers
            .write()
            .await
            .insert(event.into(), Box::new(handler));
    }

    /// Send an event envelope carrying a request id. The hub acks it; the
    /// read loop discards acks, so this does not wait for the reply. Dropped
    /// when disconnected.
    pub async fn emit(&self, event: impl Into<String>, data: Value) {
        let (msg, _id) = WsMessage::request(event, data);
        let json = match serde_json::to_string(&msg) {
            Ok(j) => j,
            Err(_) => return,
        };
        let tx_guard = self.tx.lock().await;
        if let Some(tx) = tx_guard.as_ref() {
            let _ = tx.send(Message::Text(json.into()));
        } else {
            debug!(event = %msg.event, "live channel down, dropping request");
        }
    }

    /// Start the client with auto-reconnection, heartbeat, and connect
    /// timeout.
    pub async fn connect(&self) {
        let config = self.config.clone();
        let state = self.state.clone();
        let tx_holder = self.tx.clone();
        let event_handlers = self.event_handlers.clone();
        let connected_notify = self.connected_notify.clone();
        let shutdown = self.shutdown.clone();
        let shutdown_flag = self.shutdown_flag.clone();
        let last_activity = self.last_activity.clone();

        tokio::spawn(async move {
            let mut backoff = Duration::from_secs(1);
            let max_backoff = Duration::from_secs(5);
            let mut attempts: usize = 0;

            loop {
                if shutdown_flag.load(Ordering::Relaxed) {
                    break;
                }
                if let Some(max) = config.max_reconnect_attempts
                    && attempts >= max
                {
                    warn!(attempts, "max reconnection attempts reached, giving up");
                    break;
                }
                attempts += 1;

                *state.write().await = ConnectionState::Connecting;

                let ws_url = format!(
                    "{}/ws?token={}",
                    config
                        .hub_url
                        .replace("http://", "ws://")
                        .replace("https://", "wss://"),
                    urlencoding::encode(&config.auth_token),
                );

                debug!(attempt = attempts, "connecting live channel");

                let connect_result =
                    time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(&ws_url)).await;

                let ws_stream = match connect_result {
                    Ok(Ok((stream, _))) => stream,
                    Ok(Err(e)) => {
                        warn!(attempt = attempts, error = %e, "live channel connect failed, will retry");
                        Self::wait_backoff(&shutdown_flag, &shutdown, &mut backoff, max_backoff)
                            .await;
                        continue;
                    }
                    Err(_) => {
                        warn!(
                            attempt = attempts,
                            "live channel connect timed out ({}s), will retry",
                            CONNECT_TIMEOUT.as_secs()
                        );
                        Self::wait_backoff(&shutdown_flag, &shutdown, &mut backoff, max_backoff)
                            .await;
                        continue;
                    }
                };

                info!("live channel connected");
                *state.write().await = ConnectionState::Connected;
                backoff = Duration::from_secs(1);
                attempts = 0;
                last_activity.store(epoch_ms(), Ordering::Relaxed);

                let (mut write, mut read) = ws_stream.split();
                let (send_tx, mut send_rx) = mpsc::unbounded_channel::<Message>();
                *tx_holder.lock().await = Some(send_tx.clone());
                connected_notify.notify_waiters();

                // --- Write task ---
                let write_shutdown = shutdown_flag.clone();
                let write_task = async {
                    while let Some(msg) = send_rx.recv().await {
                        if write_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        if write.send(msg).await.is_err() {
                            break;
                        }
                    }
                };

                // --- Ping task (heartbeat) ---
                let ping_tx = send_tx.clone();
                let ping_shutdown = shutdown_flag.clone();
                let ping_task = async {
                    let mut interval = time::interval(PING_INTERVAL);
                    interval.tick().await; // skip first immediate tick
                    loop {
                        interval.tick().await;
                        if ping_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        if ping_tx.send(Message::Ping(vec![].into())).is_err() {
                            break;
                        }
                    }
                };

                // --- Watchdog task (detect dead connection) ---
                let wd_activity = last_activity.clone();
                let wd_shutdown = shutdown_flag.clone();
                let dead_timeout = PING_INTERVAL + PONG_TIMEOUT;
                let watchdog_task = async {
                    let mut interval = time::interval(Duration::from_secs(5));
                    loop {
                        interval.tick().await;
                        if wd_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        let last = wd_activity.load(Ordering::Relaxed);
                        if epoch_ms().saturating_sub(last) > dead_timeout.as_millis() as u64 {
                            warn!(
                                "no activity for {}s, live channel presumed dead",
                                dead_timeout.as_secs()
                            );
                            break;
                        }
                    }
                };

                // --- Read task ---
                let read_handlers = event_handlers.clone();
                let read_shutdown = shutdown_flag.clone();
                let read_activity = last_activity.clone();
                let read_task = async {
                    while let Some(msg) = read.next().await {
                        if read_shutdown.load(Ordering::Relaxed) {
                            break;
                        }
                        read_activity.store(epoch_ms(), Ordering::Relaxed);

                        match msg {
                            Ok(Message::Text(text)) => {
                                let text_str: &str = &text;
                                if let Ok(ws_msg) = serde_json::from_str::<WsMessage>(text_str) {
                                    // Acks for our own updates carry nothing
                                    // the client acts on.
                                    if ws_msg.is_ack() {
                                        continue;
                                    }
                                    if let Some(handler) =
                                        read_handlers.read().await.get(&ws_msg.event)
                                    {
                                        handler(ws_msg.data);
                                    }
                                }
                            }
                            Ok(Message::Pong(_)) => {}
                            Ok(Message::Close(_)) => break,
                            Err(e) => {
                                warn!(error = %e, "live channel read error");
                                break;
                            }
                            _ => {}
                        }
                    }
                };

                tokio::select! {
                    _ = write_task => {},
                    _ = read_task => {},
                    _ = ping_task => {},
                    _ = watchdog_task => {},
                    _ = shutdown.notified() => {
                        *state.write().await = ConnectionState::Disconnected;
                        *tx_holder.lock().await = None;
                        return;
                    }
                }

                *state.write().await = ConnectionState::Disconnected;
                *tx_holder.lock().await = None;

                info!("live channel disconnected, scheduling reconnect");
                Self::wait_backoff(&shutdown_flag, &shutdown, &mut backoff, max_backoff).await;
            }
        });
    }

    async fn wait_backoff(
        shutdown_flag: &AtomicBool,
        shutdown: &Notify,
        backoff: &mut Duration,
        max_backoff: Duration,
    ) {
        if shutdown_flag.load(Ordering::Relaxed) {
            return;
        }
        debug!(
            backoff_ms = backoff.as_millis() as u64,
            "waiting before reconnect"
        );
        tokio::select! {
            _ = time::sleep(*backoff) => {},
            _ = shutdown.notified() => {},
        }
        *backoff = (*backoff * 2).min(max_backoff);
    }

    /// Disconnect and stop reconnection.
    pub async fn close(&self) {
        self.shutdown_flag.store(true, Ordering::Relaxed);
        self.shutdown.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Wait until connected (or timeout).
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        if *self.state.read().await == ConnectionState::Connected {
            return true;
        }
        tokio::time::timeout(timeout, self.connected_notify.notified())
            .await
            .is_ok()
    }
}

impl LiveLink for LiveChannel {
    async fn is_connected(&self) -> bool {
        *self.state.read().await == ConnectionState::Connected
    }

    async fn push_location(&self, reading: &LocationReading) {
        self.emit(
            "update-location",
            json!({
                "latitude": reading.latitude,
                "longitude": reading.longitude,
                "address": reading.address,
                "accuracy": reading.accuracy_meters,
                "timestamp": reading.timestamp,
            }),
        )
        .await;
    }

    async fn push_battery(&self, reading: &BatteryReading) {
        self.emit(
            "update-battery",
            json!({
                "batteryLevel": reading.level_percent,
                "isCharging": reading.is_charging,
                "timestamp": reading.timestamp,
            }),
        )
        .await;
    }
}
