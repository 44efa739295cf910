//! Route table

use std::sync::Arc;

use axum::routing::{get, patch, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers::{
    correct_field, create_session, delete_session, edit_item, get_session, health,
    list_features, list_sessions, retry_session, session_status, AppState,
};
use crate::service::SessionService;

/// Build the HTTP router over `service`.
pub fn router(service: Arc<SessionService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/features", get(list_features))
        .route(
            "/:feature/sessions",
            post(create_session).get(list_sessions),
        )
        .route(
            "/:feature/sessions/:id",
            get(get_session).delete(delete_session),
        )
        .route("/:feature/sessions/:id/status", get(session_status))
        .route("/:feature/sessions/:id/retry", post(retry_session))
        .route("/:feature/sessions/:id/items/:item_id", patch(edit_item))
        .route("/:feature/sessions/:id/fields/:field", put(correct_field))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { service })
}
