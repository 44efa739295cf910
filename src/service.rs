//! Session lifecycle API
//!
//! Synchronous entry points used by the HTTP layer. `create` and `retry`
//! persist the accepted request and spawn exactly one detached executor run;
//! they never wait for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::error::{FieldIssue, OrchestratorError, Result};
use crate::pipeline::{PipelineDefinition, PipelineExecutor, PipelineRegistry, RunRequest};
use crate::session::{
    PollStatus, ResultItem, RunId, Session, SessionFilter, SessionId, SessionResult, SessionStatus,
    SessionStore,
};

/// One page of a session listing.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// Sessions on this page, newest first
    pub items: Vec<Session>,
    /// Offset this page starts at
    pub skip: usize,
    /// Page size applied after clamping
    pub limit: usize,
    /// Whether sessions exist past this page
    pub has_more: bool,
}

/// A run this process is currently driving.
#[derive(Debug, Clone)]
struct ActiveRun {
    run: RunId,
    cancel: CancellationToken,
}

type ActiveRuns = Arc<Mutex<HashMap<SessionId, ActiveRun>>>;

/// Creates, inspects, retries and deletes sessions.
pub struct SessionService {
    registry: Arc<PipelineRegistry>,
    store: Arc<dyn SessionStore>,
    executor: Arc<PipelineExecutor>,
    limits: LimitsConfig,
    active: ActiveRuns,
}

impl SessionService {
    /// Create a service over `store` running the pipelines in `registry`.
    #[must_use]
    pub fn new(
        registry: PipelineRegistry,
        store: Arc<dyn SessionStore>,
        executor: PipelineExecutor,
        limits: LimitsConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            executor: Arc::new(executor),
            limits,
            active: Arc::default(),
        }
    }

    /// Registered pipelines.
    #[must_use]
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Number of runs this process is driving.
    #[must_use]
    pub fn active_runs(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn definition(&self, kind: &str) -> Result<Arc<PipelineDefinition>> {
        self.registry
            .get(kind)
            .ok_or_else(|| OrchestratorError::not_found(format!("Unknown feature '{kind}'")))
    }

    /// Fetch a session, hiding other kinds and other owners.
    fn visible(&self, kind: &str, id: SessionId, owner: Option<&str>) -> Result<Session> {
        match self.store.get(id)? {
            Some(session) if session.kind == kind && session.visible_to(owner) => Ok(session),
            _ => Err(OrchestratorError::not_found(format!("Session {id}"))),
        }
    }

    /// Validate `input`, persist a pending session and start its first run.
    pub fn create(&self, kind: &str, owner: Option<&str>, input: Value) -> Result<Session> {
        let definition = self.definition(kind)?;
        definition
            .schema
            .validate(&input)
            .map_err(OrchestratorError::Validation)?;

        let run = RunId::new();
        let session = Session::new(kind, owner.map(str::to_string), input, run);
        self.store.insert(&session)?;

        info!(session_id = %session.id, kind, "Session created");
        self.spawn_run(session.id, run, definition);
        Ok(session)
    }

    /// Full session record.
    pub fn get(&self, kind: &str, id: SessionId, owner: Option<&str>) -> Result<Session> {
        self.definition(kind)?;
        self.visible(kind, id, owner)
    }

    /// Status projection for polling clients.
    pub fn status(&self, kind: &str, id: SessionId, owner: Option<&str>) -> Result<PollStatus> {
        self.get(kind, id, owner).map(|s| s.poll_status())
    }

    /// Sessions of `kind`, newest first.
    ///
    /// `limit` defaults to the configured page size and is clamped to
    /// `1..=max_page_size`. A page past the end is empty.
    pub fn list(
        &self,
        kind: &str,
        owner: Option<&str>,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Page> {
        self.definition(kind)?;
        let limit = limit
            .unwrap_or(self.limits.default_page_size)
            .clamp(1, self.limits.max_page_size.max(1));

        let filter = SessionFilter {
            kind: Some(kind),
            owner,
        };
        let mut items = self.store.list(&filter, skip, limit + 1)?;
        let has_more = items.len() > limit;
        items.truncate(limit);

        Ok(Page {
            items,
            skip,
            limit,
            has_more,
        })
    }

    /// Cancel any active run, then remove the session and its sub-results.
    pub fn delete(&self, kind: &str, id: SessionId, owner: Option<&str>) -> Result<()> {
        self.get(kind, id, owner)?;

        let active = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        if let Some(active) = active {
            debug!(session_id = %id, run = %active.run, "Cancelling active run");
            active.cancel.cancel();
        }

        if !self.store.delete(id)? {
            return Err(OrchestratorError::not_found(format!("Session {id}")));
        }
        info!(session_id = %id, kind, "Session deleted");
        Ok(())
    }

    /// Reset a failed session and start a new run from the first stage.
    ///
    /// The reset and the claim on the session happen in one store write, so
    /// a second retry racing this one sees `pending` and is refused.
    pub fn retry(&self, kind: &str, id: SessionId, owner: Option<&str>) -> Result<Session> {
        let definition = self.definition(kind)?;
        self.visible(kind, id, owner)?;

        let run = RunId::new();
        let max_retries = self.limits.max_retries;
        let session = self.store.update(id, &mut |s| {
            if s.status != SessionStatus::Failed {
                return Err(OrchestratorError::invalid_state(format!(
                    "Session {} is '{}'; only failed sessions can be retried",
                    s.id, s.status
                )));
            }
            if s.active_run.is_some() {
                return Err(OrchestratorError::invalid_state(format!(
                    "Session {} already has a run in flight",
                    s.id
                )));
            }
            if s.run_count > max_retries {
                return Err(OrchestratorError::invalid_state(format!(
                    "Session {} reached the retry limit of {max_retries}",
                    s.id
                )));
            }
            s.reset_for_retry(run);
            Ok(())
        })?;

        info!(session_id = %id, kind, run_count = session.run_count, "Session retried");
        self.spawn_run(id, run, definition);
        Ok(session)
    }

    /// Merge a user edit into one sub-result of a completed session.
    pub fn edit_item(
        &self,
        kind: &str,
        id: SessionId,
        item_id: &str,
        patch: Value,
        owner: Option<&str>,
    ) -> Result<ResultItem> {
        self.get(kind, id, owner)?;
        let Value::Object(patch) = patch else {
            return Err(OrchestratorError::Validation(vec![FieldIssue::new(
                "patch",
                "must be a JSON object",
            )]));
        };

        let mut edited = None;
        self.store.update(id, &mut |s| {
            if s.status != SessionStatus::Completed {
                return Err(OrchestratorError::invalid_state(format!(
                    "Session {} is '{}'; items can only be edited once completed",
                    s.id, s.status
                )));
            }
            let item = s
                .result
                .edit_item(item_id, patch.clone())
                .ok_or_else(|| OrchestratorError::not_found(format!("Item '{item_id}'")))?
                .clone();
            self.check_result_size(&s.result, "patch")?;
            edited = Some(item);
            Ok(())
        })?;

        edited.ok_or_else(|| OrchestratorError::not_found(format!("Item '{item_id}'")))
    }

    /// Record a user correction that later runs keep.
    pub fn correct_field(
        &self,
        kind: &str,
        id: SessionId,
        field: &str,
        value: Value,
        owner: Option<&str>,
    ) -> Result<Session> {
        self.get(kind, id, owner)?;
        if field.trim().is_empty() {
            return Err(OrchestratorError::Validation(vec![FieldIssue::new(
                "field",
                "is required",
            )]));
        }

        self.store.update(id, &mut |s| {
            if !s.status.is_terminal() {
                return Err(OrchestratorError::invalid_state(format!(
                    "Session {} is '{}'; fields can only be corrected when finished",
                    s.id, s.status
                )));
            }
            s.result.set_sticky(field, value.clone(), s.run_count);
            self.check_result_size(&s.result, "value")
        })
    }

    /// User edits are held to the same size limit as stage output.
    fn check_result_size(&self, result: &SessionResult, field: &str) -> Result<()> {
        if result.encoded_len() > self.limits.max_result_bytes {
            return Err(OrchestratorError::Validation(vec![FieldIssue::new(
                field,
                format!(
                    "would grow the result past the {} byte limit",
                    self.limits.max_result_bytes
                ),
            )]));
        }
        Ok(())
    }

    /// Fail sessions left mid-run by a previous process.
    ///
    /// Call once at startup, before serving requests. Returns how many
    /// sessions were marked failed.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let stale: Vec<SessionId> = {
            let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            self.store
                .list(&SessionFilter::default(), 0, usize::MAX)?
                .into_iter()
                .filter(|s| !s.status.is_terminal() && !active.contains_key(&s.id))
                .map(|s| s.id)
                .collect()
        };

        let mut recovered = 0;
        for id in stale {
            let outcome = self.store.update(id, &mut |s| {
                if s.status.is_terminal() {
                    return Err(OrchestratorError::invalid_state("already finished"));
                }
                s.mark_failed(
                    "Run interrupted by restart".to_string(),
                    "Interrupted".to_string(),
                );
                Ok(())
            });
            match outcome {
                Ok(_) => recovered += 1,
                Err(OrchestratorError::NotFound(_) | OrchestratorError::InvalidState(_)) => {}
                Err(e) => return Err(e),
            }
        }

        if recovered > 0 {
            warn!(recovered, "Marked interrupted sessions as failed");
        }
        Ok(recovered)
    }

    fn spawn_run(&self, session_id: SessionId, run: RunId, definition: Arc<PipelineDefinition>) {
        let cancel = CancellationToken::new();
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                session_id,
                ActiveRun {
                    run,
                    cancel: cancel.clone(),
                },
            );

        let executor = Arc::clone(&self.executor);
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            let end = executor
                .run(RunRequest {
                    session_id,
                    run,
                    definition,
                    cancel,
                })
                .await;
            debug!(session_id = %session_id, run = %run, ?end, "Run finished");

            let mut table = active.lock().unwrap_or_else(PoisonError::into_inner);
            if table.get(&session_id).is_some_and(|a| a.run == run) {
                table.remove(&session_id);
            }
        });
    }
}
