use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::store::connections;
use crate::web::AppState;
use crate::web::middleware::auth::AuthContext;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/user/connected-users", get(connected_users))
        .route("/user/connections", post(add_connection))
        .route("/user/connections/{userId}", delete(remove_connection))
}

/// Peers this user watches, annotated with live presence.
async fn connected_users(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> (StatusCode, Json<Value>) {
    let peers = connections::peers_of(&state.store.conn(), auth.user_id);

    let mut out = Vec::with_capacity(peers.len());
    for peer in peers {
        let is_online = state.registry.is_online(peer.user_id).await;
        out.push(json!({
            "userId": peer.user_id,
            "nickname": peer.nickname,
            "isOnline": is_online,
        }));
    }
    (StatusCode::OK, Json(Value::Array(out)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddConnectionBody {
    user_id: i64,
    nickname: String,
}

async fn add_connection(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    body: Result<Json<AddConnectionBody>, axum::extract::rejection::JsonRejection>,
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

    if body.user_id == auth.user_id {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Cannot connect to yourself"})),
        );
    }

    if body.nickname.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Nickname is required"})),
        );
    }

    // User ids come from tokens the auth service issued; the hub does not
    // keep an account table to check them against.
    let conn = state.store.conn();
    match connections::add_connection(&conn, auth.user_id, body.user_id, body.nickname.trim()) {
        Ok(()) => (StatusCode::OK, Json(json!({ "ok": true }))),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

async fn remove_connection(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(user_id): Path<i64>,
) -> (StatusCode, Json<Value>) {
    let removed = connections::remove_connection(&state.store.conn(), auth.user_id, user_id);
    if removed {
        (StatusCode::OK, Json(json!({ "ok": true })))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Connection not found"})),
        )
    }
}
