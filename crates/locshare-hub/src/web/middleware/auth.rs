use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::web::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    pub uid: i64,
    pub exp: u64,
}

/// Auth context extracted from JWT, stored in request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
}

/// JWT auth middleware for /api routes.
pub async fn jwt_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    let path = req.uri().path();

    if !path.starts_with("/api/") {
        return Ok(next.run(req).await);
    }

    let token = match extract_bearer_token(&req) {
        Some(t) => t,
        None => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Missing authorization token"})),
            )
                .into_response());
        }
    };

    let validation = Validation::new(Algorithm::HS256);
    let key = DecodingKey::from_secret(&state.jwt_secret);

    let data = match decode::<JwtClaims>(&token, &key, &validation) {
        Ok(d) => d,
        Err(_) => {
            return Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid token"})),
            )
                .into_response());
        }
    };

    req.extensions_mut().insert(AuthContext {
        user_id: data.claims.uid,
    });

    Ok(next.run(req).await)
}

fn extract_bearer_token(req: &Request) -> Option<String> {
    req.headers()
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(|s| s.to_string())
}
