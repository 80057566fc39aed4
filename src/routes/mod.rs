pub mod callback;

use axum::routing::post;
use axum::Router;

use crate::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/internal/validation/callback", post(callback::handle))
        .with_state(state)
}
