use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::{batteries, connections};
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/battery/update", post(update_battery))
        .route("/battery/latest", get(latest_battery))
        .route("/battery/latest/{userId}", get(latest_battery_of))
        .route("/battery/history", get(battery_history))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateBatteryBody {
    battery_level: u8,
    #[serde(default)]
    is_charging: bool,
    timestamp: i64,
}

async fn update_battery(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Result<Json<UpdateBatteryBody>, axum::extract::rejection::JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let body = match body {
        Ok(Json(b)) => b,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Invalid body"})),
            );
        }
    };

    match state
        .engine
        .ingest_battery(
            auth.user_id,
            body.battery_level,
            body.is_charging,
            body.timestamp,
        )
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({ "timestamp": record.timestamp })),
        ),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({"error": e.0}))),
    }
}

async fn latest_battery(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> (StatusCode, Json<Value>) {
    match state.engine.latest_battery(auth.user_id).await {
        Some(record) => (
            StatusCode::OK,
            Json(serde_json::to_value(&record).unwrap_or(Value::Null)),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No battery state recorded"})),
        ),
    }
}

async fn latest_battery_of(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    if !connections::are_connected(&state.store.conn(), auth.user_id, user_id) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Not connected to this user"})),
        );
    }

    match state.engine.latest_battery(user_id).await {
        Some(record) => (
            StatusCode::OK,
            Json(serde_json::to_value(&record).unwrap_or(Value::Null)),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No battery state recorded"})),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    start_time: Option<i64>,
    end_time: Option<i64>,
}

async fn battery_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<Value>) {
    let records = batteries::get_history(
        &state.store.conn(),
        auth.user_id,
        query.start_time,
        query.end_time,
    );
    (
        StatusCode::OK,
        Json(serde_json::to_value(&records).unwrap_or(Value::Null)),
    )
}
