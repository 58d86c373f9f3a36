//! Typed HTTP client for the hub's ingestion and read-back endpoints.
//!
//! Every call carries the bearer auth token and a bounded timeout. Failures
//! are classified into [`ApiError::Validation`] (4xx, non-retryable) and
//! [`ApiError::Transient`] (network, timeout, 5xx) so the sync scheduler can
//! decide between dropping and retrying.

use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use locshare_shared::readings::{BatteryReading, LocationReading};

use crate::scheduler::Ingest;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub enum ApiError {
    /// The hub rejected the payload (4xx). Retrying cannot succeed.
    Validation(String),
    /// Network failure, timeout, or server error. Retrying may succeed.
    Transient(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "validation rejected: {msg}"),
            ApiError::Transient(msg) => write!(f, "transient failure: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Successful ingestion response: the hub echoes the persisted timestamp.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAck {
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub user_id: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub accuracy: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatteryRecord {
    pub user_id: i64,
    pub battery_level: u8,
    pub is_charging: bool,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUser {
    pub user_id: i64,
    pub nickname: String,
    #[serde(default)]
    pub is_online: bool,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()?,
            base_url: base_url.into(),
            token: token.into(),
        })
    }

    /// `POST /api/location/update`
    pub async fn update_location(&self, reading: &LocationReading) -> Result<IngestAck, ApiError> {
        let body = json!({
            "latitude": reading.latitude,
            "longitude": reading.longitude,
            "address": reading.address,
            "accuracy": reading.accuracy_meters,
            "timestamp": reading.timestamp,
            "readingId": reading.id,
        });
        self.post_json("/api/location/update", &body).await
    }

    /// `POST /api/battery/update`
    pub async fn update_battery(&self, reading: &BatteryReading) -> Result<IngestAck, ApiError> {
        let body = json!({
            "batteryLevel": reading.level_percent,
            "isCharging": reading.is_charging,
            "timestamp": reading.timestamp,
            "readingId": reading.id,
        });
        self.post_json("/api/battery/update", &body).await
    }

    /// `GET /api/location/latest`, the caller's own latest location.
    pub async fn latest_location(&self) -> Result<Option<LocationRecord>> {
        self.get_optional("/api/location/latest").await
    }

    /// `GET /api/battery/latest`
    pub async fn latest_battery(&self) -> Result<Option<BatteryRecord>> {
        self.get_optional("/api/battery/latest").await
    }

    /// `GET /api/location/latest/{userId}`, a connected peer's latest
    /// location. The offline-peer pull fallback.
    pub async fn latest_location_of(&self, user_id: i64) -> Result<Option<LocationRecord>> {
        self.get_optional(&format!("/api/location/latest/{user_id}"))
            .await
    }

    pub async fn latest_battery_of(&self, user_id: i64) -> Result<Option<BatteryRecord>> {
        self.get_optional(&format!("/api/battery/latest/{user_id}"))
            .await
    }

    /// `GET /api/location/history?startTime=&endTime=`
    pub async fn location_history(
        &self,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<LocationRecord>> {
        let mut url = format!("{}/api/location/history", self.base_url);
        let mut params = Vec::new();
        if let Some(start) = start_time {
            params.push(format!("startTime={start}"));
        }
        if let Some(end) = end_time {
            params.push(format!("endTime={end}"));
        }
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /api/battery/history?startTime=&endTime=`
    pub async fn battery_history(
        &self,
        start_time: Option<i64>,
        end_time: Option<i64>,
    ) -> Result<Vec<BatteryRecord>> {
        let mut url = format!("{}/api/battery/history", self.base_url);
        let mut params = Vec::new();
        if let Some(start) = start_time {
            params.push(format!("startTime={start}"));
        }
        if let Some(end) = end_time {
            params.push(format!("endTime={end}"));
        }
        if !params.is_empty() {
            url = format!("{url}?{}", params.join("&"));
        }

        let resp = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// `GET /api/user/connected-users`, the peer set whose updates this
    /// user will receive.
    pub async fn connected_users(&self) -> Result<Vec<ConnectedUser>> {
        let resp = self
            .http
            .get(format!("{}/api/user/connected-users", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<IngestAck, ApiError> {
        let resp = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ApiError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json()
                .await
                .map_err(|e| ApiError::Transient(format!("malformed ack: {e}")));
        }

        let message = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message.or(b.error))
            .unwrap_or_else(|| format!("HTTP {status}"));

        if status.is_client_error() {
            Err(ApiError::Validation(message))
        } else {
            warn!(%status, path, "ingestion request failed");
            Err(ApiError::Transient(message))
        }
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let resp = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.token)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = resp.error_for_status()?;
        Ok(Some(resp.json().await?))
    }
}

impl Ingest for ApiClient {
    async fn ingest_location(&self, reading: &LocationReading) -> Result<(), ApiError> {
        self.update_location(reading).await.map(|_| ())
    }

    async fn ingest_battery(&self, reading: &BatteryReading) -> Result<(), ApiError> {
        self.update_battery(reading).await.map(|_| ())
    }
}
