//! Request handlers and error mapping

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::error;

use crate::error::{FieldIssue, OrchestratorError};
use crate::service::{Page, SessionService};
use crate::session::{PollStatus, ResultItem, Session, SessionId};

/// Header carrying the caller's owner id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// Lifecycle service
    pub service: Arc<SessionService>,
}

/// An [`OrchestratorError`] rendered as a JSON response.
#[derive(Debug)]
pub struct ApiError(pub OrchestratorError);

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OrchestratorError::Validation(_) => StatusCode::BAD_REQUEST,
            OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
            OrchestratorError::InvalidState(_) => StatusCode::CONFLICT,
            OrchestratorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }

        let details = match &self.0 {
            OrchestratorError::Validation(issues) => json!(issues),
            _ => json!([]),
        };
        let body = json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn owner(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Malformed ids are indistinguishable from unknown ones.
fn session_id(raw: &str) -> ApiResult<SessionId> {
    SessionId::parse(raw)
        .ok_or_else(|| OrchestratorError::not_found(format!("Session {raw}")).into())
}

fn json_body(payload: Result<Json<Value>, JsonRejection>) -> ApiResult<Value> {
    payload.map(|Json(v)| v).map_err(|rejection| {
        OrchestratorError::Validation(vec![FieldIssue::new("body", rejection.body_text())]).into()
    })
}

/// Query parameters of the list endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Sessions to skip
    #[serde(default)]
    pub skip: usize,
    /// Page size
    pub limit: Option<usize>,
}

/// `POST /:feature/sessions`
pub async fn create_session(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Session>)> {
    // Unknown features are reported before body problems
    if state.service.registry().get(&feature).is_none() {
        return Err(OrchestratorError::not_found(format!("Unknown feature '{feature}'")).into());
    }
    let input = json_body(payload)?;
    let session = state.service.create(&feature, owner(&headers), input)?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// `GET /:feature/sessions`
pub async fn list_sessions(
    State(state): State<AppState>,
    Path(feature): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ApiResult<Json<Page>> {
    let page = state
        .service
        .list(&feature, owner(&headers), params.skip, params.limit)?;
    Ok(Json(page))
}

/// `GET /:feature/sessions/:id`
pub async fn get_session(
    State(state): State<AppState>,
    Path((feature, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Session>> {
    let session = state
        .service
        .get(&feature, session_id(&id)?, owner(&headers))?;
    Ok(Json(session))
}

/// `GET /:feature/sessions/:id/status`
pub async fn session_status(
    State(state): State<AppState>,
    Path((feature, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<PollStatus>> {
    let status = state
        .service
        .status(&feature, session_id(&id)?, owner(&headers))?;
    Ok(Json(status))
}

/// `POST /:feature/sessions/:id/retry`
pub async fn retry_session(
    State(state): State<AppState>,
    Path((feature, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Session>> {
    let session = state
        .service
        .retry(&feature, session_id(&id)?, owner(&headers))?;
    Ok(Json(session))
}

/// `DELETE /:feature/sessions/:id`
pub async fn delete_session(
    State(state): State<AppState>,
    Path((feature, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    state
        .service
        .delete(&feature, session_id(&id)?, owner(&headers))?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PATCH /:feature/sessions/:id/items/:item_id`
pub async fn edit_item(
    State(state): State<AppState>,
    Path((feature, id, item_id)): Path<(String, String, String)>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<ResultItem>> {
    let id = session_id(&id)?;
    let patch = json_body(payload)?;
    let item = state
        .service
        .edit_item(&feature, id, &item_id, patch, owner(&headers))?;
    Ok(Json(item))
}

/// `PUT /:feature/sessions/:id/fields/:field`
pub async fn correct_field(
    State(state): State<AppState>,
    Path((feature, id, field)): Path<(String, String, String)>,
    headers: HeaderMap,
    payload: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Session>> {
    let id = session_id(&id)?;
    let value = json_body(payload)?;
    let session = state
        .service
        .correct_field(&feature, id, &field, value, owner(&headers))?;
    Ok(Json(session))
}

/// One registered pipeline as listed by `GET /features`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FeatureInfo {
    /// Feature key
    pub kind: String,
    /// Human-readable title
    pub title: String,
    /// Stages in order
    pub stages: Vec<StageInfo>,
}

/// One stage in a [`FeatureInfo`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageInfo {
    /// Stage name
    pub name: String,
    /// Whether the stage can be skipped for some inputs
    pub optional: bool,
}

/// `GET /features`
pub async fn list_features(State(state): State<AppState>) -> Json<Vec<FeatureInfo>> {
    let features = state
        .service
        .registry()
        .iter()
        .map(|def| FeatureInfo {
            kind: def.kind.clone(),
            title: def.title.clone(),
            stages: def
                .stages
                .iter()
                .map(|s| StageInfo {
                    name: s.name.clone(),
                    optional: s.is_optional(),
                })
                .collect(),
        })
        .collect();
    Json(features)
}

/// `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
