//! HTTP interface
//!
//! Thin axum layer over [`crate::service::SessionService`]. Handlers only
//! parse requests and map [`crate::error::OrchestratorError`] to responses.

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, AppState, OWNER_HEADER};
pub use routes::router;
