use axum::{
    Json, Router,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::{connections, locations};
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/location/update", post(update_location))
        .route("/location/latest", get(latest_location))
        .route("/location/latest/{userId}", get(latest_location_of))
        .route("/location/history", get(location_history))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateLocationBody {
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    address: String,
    #[serde(default)]
    accuracy: f64,
    timestamp: i64,
}

async fn update_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Result<Json<UpdateLocationBody>, axum::extract::rejection::JsonRejection>,
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
        .ingest_location(
            auth.user_id,
            body.latitude,
            body.longitude,
            &body.address,
            body.accuracy,
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

async fn latest_location(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> (StatusCode, Json<Value>) {
    match state.engine.latest_location(auth.user_id).await {
        Some(record) => (
            StatusCode::OK,
            Json(serde_json::to_value(&record).unwrap_or(Value::Null)),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No location recorded"})),
        ),
    }
}

async fn latest_location_of(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    // Peer queries are gated on a connection edge.
    if !connections::are_connected(&state.store.conn(), auth.user_id, user_id) {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"error": "Not connected to this user"})),
        );
    }

    match state.engine.latest_location(user_id).await {
        Some(record) => (
            StatusCode::OK,
            Json(serde_json::to_value(&record).unwrap_or(Value::Null)),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No location recorded"})),
        ),
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    start_time: Option<i64>,
    end_time: Option<i64>,
}

async fn location_history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<Value>) {
    let records = locations::get_history(
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
