pub mod battery;
pub mod location;
pub mod users;

use axum::Router;

use crate::web::AppState;

/// All routes mounted under /api.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(location::router())
        .merge(battery::router())
        .merge(users::router())
}
