//! Pipeline executor
//!
//! Walks one session through its pipeline definition: invokes each planned
//! stage, merges its output, advances status and progress, and converts any
//! failure into a terminal `failed` record. Every write is a single atomic
//! store update guarded by the run's in-flight marker.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::error::{summarize_failure, OrchestratorError};
use crate::log::{RunLog, RunOutcome};
use crate::pipeline::definition::{PipelineDefinition, StageContext, StageDescriptor};
use crate::pipeline::template::{expand_template, stage_vars};
use crate::session::{RunId, Session, SessionId, SessionStatus, SessionStore, StageOutput};

/// Bounds applied to every run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Timeout for stages that declare none
    pub stage_timeout: Duration,
    /// Whole-run budget, checked before each stage
    pub run_budget: Duration,
    /// Largest serialized result allowed
    pub max_result_bytes: usize,
    /// Longest stored error message
    pub max_error_len: usize,
}

impl From<&LimitsConfig> for ExecutorSettings {
    fn from(limits: &LimitsConfig) -> Self {
        Self {
            stage_timeout: limits.stage_timeout(),
            run_budget: limits.run_budget(),
            max_result_bytes: limits.max_result_bytes,
            max_error_len: limits.max_error_len,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from(&LimitsConfig::default())
    }
}

/// Everything needed to drive one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Session to process
    pub session_id: SessionId,
    /// In-flight marker claimed for this run
    pub run: RunId,
    /// Pipeline to walk
    pub definition: Arc<PipelineDefinition>,
    /// Signalled when the session is deleted
    pub cancel: CancellationToken,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEnd {
    /// All stages succeeded and outputs are complete
    Completed,
    /// The session was marked failed with this message
    Failed(String),
    /// Cancellation was observed; nothing further was written
    Cancelled,
    /// The run stopped without reaching a terminal write
    Aborted(String),
}

/// Reasons a run stops writing
enum Halt {
    /// Record deleted or cancellation observed
    Cancelled,
    /// Another run claimed the session
    LeaseLost,
    /// The store refused the write
    Store(OrchestratorError),
}

/// Releases the in-flight marker on exit paths that skip the terminal write.
struct LeaseGuard {
    store: Arc<dyn SessionStore>,
    session_id: SessionId,
    run: RunId,
    armed: bool,
}

impl LeaseGuard {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let run = self.run;
        let released = self.store.update(self.session_id, &mut |s| {
            if s.active_run != Some(run) {
                return Err(OrchestratorError::invalid_state("lease already released"));
            }
            if s.status.is_terminal() {
                s.active_run = None;
            } else {
                let message = "Run ended unexpectedly".to_string();
                s.mark_failed(message, "Failed".to_string());
            }
            Ok(())
        });
        match released {
            Ok(_) => warn!(session_id = %self.session_id, run = %run, "Released abandoned run"),
            Err(OrchestratorError::NotFound(_) | OrchestratorError::InvalidState(_)) => {}
            Err(e) => warn!(session_id = %self.session_id, error = %e, "Failed to release run"),
        }
    }
}

/// Drives sessions through their pipelines
pub struct PipelineExecutor {
    store: Arc<dyn SessionStore>,
    settings: ExecutorSettings,
    run_log: Option<Arc<RunLog>>,
}

impl PipelineExecutor {
    /// Create an executor writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>, settings: ExecutorSettings) -> Self {
        Self {
            store,
            settings,
            run_log: None,
        }
    }

    /// Also append finished runs to `run_log`.
    #[must_use]
    pub fn with_run_log(mut self, run_log: Arc<RunLog>) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Bounds in effect.
    #[must_use]
    pub const fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Execute one run to its end.
    ///
    /// Never returns an error: failures are written into the session and
    /// reported through [`RunEnd`].
    #[tracing::instrument(
        name = "pipeline_run",
        skip_all,
        fields(session_id = %request.session_id, kind = %request.definition.kind, run = %request.run)
    )]
    pub async fn run(&self, request: RunRequest) -> RunEnd {
        let started = Instant::now();
        let RunRequest {
            session_id,
            run,
            definition,
            cancel,
        } = request;

        let session = match self.store.get(session_id) {
            Ok(Some(session)) => session,
            Ok(None) => {
                debug!("Session deleted before the run started");
                return RunEnd::Cancelled;
            }
            Err(e) => return RunEnd::Aborted(format!("Failed to load session: {e}")),
        };

        if session.active_run != Some(run) {
            warn!("Run does not hold the session, not starting");
            return RunEnd::Aborted("run does not hold the session".to_string());
        }

        let mut guard = LeaseGuard {
            store: Arc::clone(&self.store),
            session_id,
            run,
            armed: true,
        };

        let input = Arc::new(session.input.clone());
        let plan = definition.plan(&input);
        let total = plan.len();
        let run_number = session.run_count;
        let mut result = session.result;

        info!(stages = total, "Run started");

        for (index, stage) in plan.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Self::cancelled(&mut guard);
            }

            if started.elapsed() > self.settings.run_budget {
                let message = format!(
                    "Run exceeded its {}s time budget before stage '{}'",
                    self.settings.run_budget.as_secs(),
                    stage.name
                );
                return self
                    .fail(&mut guard, &definition.kind, run_number, message, started);
            }

            let vars = stage_vars(&input, &stage.name, index + 1, total);
            let message = expand_template(&stage.message, &vars);
            if let Err(halt) = self.persist(session_id, run, &mut |s| {
                s.progress_message.clone_from(&message);
                Ok(())
            }) {
                return Self::halted(&mut guard, halt);
            }

            debug!(stage = %stage.name, "Stage started");

            let ctx = StageContext {
                session_id,
                kind: definition.kind.clone(),
                stage: stage.name.clone(),
                run: run_number,
                input: Arc::clone(&input),
                result: result.clone(),
            };

            // A stage already in flight finishes on its own task; once
            // cancellation is observed its output is discarded.
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return Self::cancelled(&mut guard),
                outcome = self.invoke(stage, ctx) => outcome,
            };

            if cancel.is_cancelled() {
                return Self::cancelled(&mut guard);
            }

            let output = match outcome {
                Ok(output) => output,
                Err(e) => {
                    let message = summarize_failure(&e, self.settings.max_error_len);
                    return self
                        .fail(&mut guard, &definition.kind, run_number, message, started);
                }
            };

            let mut merged = result.clone();
            merged.merge(&stage.name, run_number, output);
            if merged.encoded_len() > self.settings.max_result_bytes {
                let message = format!(
                    "Stage '{}' output exceeds the {} byte result limit",
                    stage.name, self.settings.max_result_bytes
                );
                return self
                    .fail(&mut guard, &definition.kind, run_number, message, started);
            }

            let status = SessionStatus::Stage(stage.name.clone());
            if let Err(halt) = self.persist(session_id, run, &mut |s| {
                s.result = merged.clone();
                s.status = status.clone();
                s.progress_step += 1;
                Ok(())
            }) {
                return Self::halted(&mut guard, halt);
            }
            result = merged;

            info!(stage = %stage.name, step = index + 1, total, "Stage completed");
        }

        let missing = definition.missing_outputs(&input, &result);
        if !missing.is_empty() {
            let message = format!(
                "Pipeline finished without required output: {}",
                missing.join(", ")
            );
            return self
                .fail(&mut guard, &definition.kind, run_number, message, started);
        }

        match self.persist(session_id, run, &mut |s| {
            s.mark_completed();
            Ok(())
        }) {
            Ok(session) => {
                guard.disarm();
                info!("Run completed");
                self.log_outcome(&session, &definition.kind, run_number, None, started);
                RunEnd::Completed
            }
            Err(halt) => Self::halted(&mut guard, halt),
        }
    }

    /// Run a stage function on its own task under its timeout.
    ///
    /// Errors, panics and timeouts all come back as stage failures.
    async fn invoke(&self, stage: &StageDescriptor, ctx: StageContext) -> anyhow::Result<StageOutput> {
        let timeout = stage.timeout.unwrap_or(self.settings.stage_timeout);
        let mut handle = tokio::spawn((stage.function)(ctx));

        match tokio::time::timeout(timeout, &mut handle).await {
            Err(_) => {
                handle.abort();
                Err(anyhow!(
                    "Stage '{}' timed out after {}s",
                    stage.name,
                    timeout.as_secs()
                ))
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                Err(anyhow!("Stage '{}' panicked", stage.name))
            }
            Ok(Err(join_err)) => Err(anyhow!("Stage '{}' was aborted: {join_err}", stage.name)),
            Ok(Ok(outcome)) => outcome.with_context(|| format!("Stage '{}' failed", stage.name)),
        }
    }

    /// One atomic write, valid only while this run holds the session.
    fn persist(
        &self,
        session_id: SessionId,
        run: RunId,
        mutate: &mut dyn FnMut(&mut Session) -> crate::error::Result<()>,
    ) -> Result<Session, Halt> {
        let outcome = self.store.update(session_id, &mut |s| {
            if s.active_run != Some(run) {
                return Err(OrchestratorError::invalid_state("run no longer holds the session"));
            }
            mutate(s)
        });
        match outcome {
            Ok(session) => Ok(session),
            Err(OrchestratorError::NotFound(_)) => Err(Halt::Cancelled),
            Err(OrchestratorError::InvalidState(_)) => Err(Halt::LeaseLost),
            Err(e) => Err(Halt::Store(e)),
        }
    }

    /// Terminal failure write. The partial result is kept.
    fn fail(
        &self,
        guard: &mut LeaseGuard,
        kind: &str,
        run_number: u32,
        message: String,
        started: Instant,
    ) -> RunEnd {
        warn!(error = %message, "Run failed");
        let run = guard.run;
        let written = self.persist(guard.session_id, run, &mut |s| {
            let progress = match &s.status {
                SessionStatus::Stage(name) => format!("Failed after stage '{name}'"),
                _ => "Failed".to_string(),
            };
            s.mark_failed(message.clone(), progress);
            Ok(())
        });

        match written {
            Ok(session) => {
                guard.disarm();
                self.log_outcome(&session, kind, run_number, Some(message.clone()), started);
                RunEnd::Failed(message)
            }
            Err(halt) => Self::halted(guard, halt),
        }
    }

    fn cancelled(guard: &mut LeaseGuard) -> RunEnd {
        Self::halted(guard, Halt::Cancelled)
    }

    fn halted(guard: &mut LeaseGuard, halt: Halt) -> RunEnd {
        match halt {
            Halt::Cancelled => {
                // The record is gone or going; there is nothing to release
                guard.disarm();
                info!("Cancellation observed, stopping run");
                RunEnd::Cancelled
            }
            Halt::LeaseLost => {
                guard.disarm();
                warn!("Run lost its claim on the session");
                RunEnd::Aborted("run no longer holds the session".to_string())
            }
            Halt::Store(e) => {
                // Leave the guard armed so it releases the marker on drop
                warn!(error = %e, "Store write failed, abandoning run");
                RunEnd::Aborted(format!("store write failed: {e}"))
            }
        }
    }

    fn log_outcome(
        &self,
        session: &Session,
        kind: &str,
        run_number: u32,
        error: Option<String>,
        started: Instant,
    ) {
        let Some(run_log) = &self.run_log else {
            return;
        };
        let outcome = RunOutcome {
            session_id: session.id,
            kind: kind.to_string(),
            run: run_number,
            status: session.status.clone(),
            stages_completed: session.progress_step,
            error,
            timestamp: Utc::now(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        if let Err(e) = run_log.append(&outcome) {
            warn!(error = %e, "Failed to append run log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::definition::stage_fn;
    use crate::pipeline::schema::InputSchema;
    use crate::session::MemoryStore;
    use crate::testutil::{failing_stage, output_stage, panicking_stage, sleeping_stage};
    use serde_json::json;
    use tempfile::TempDir;

    fn definition(stages: Vec<StageDescriptor>) -> Arc<PipelineDefinition> {
        Arc::new(PipelineDefinition::new("test", "Test", InputSchema::new(), stages).unwrap())
    }

    fn setup(input: serde_json::Value) -> (Arc<MemoryStore>, Session) {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new("test", None, input, RunId::new());
        store.insert(&session).unwrap();
        (store, session)
    }

    fn request(session: &Session, definition: Arc<PipelineDefinition>) -> RunRequest {
        RunRequest {
            session_id: session.id,
            run: session.active_run.unwrap(),
            definition,
            cancel: CancellationToken::new(),
        }
    }

    fn executor(store: &Arc<MemoryStore>) -> PipelineExecutor {
        PipelineExecutor::new(store.clone(), ExecutorSettings::default())
    }

    #[tokio::test]
    async fn test_runs_all_stages_to_completion() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![
            output_stage("one", "a").produces(&["one"]),
            output_stage("two", "b").produces(&["two"]),
            output_stage("three", "c"),
        ]);

        let end = executor(&store).run(request(&session, def)).await;
        assert_eq!(end, RunEnd::Completed);

        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.progress_step, 3);
        assert!(stored.error_message.is_none());
        assert!(stored.completed_at.is_some());
        assert!(stored.active_run.is_none());
        assert_eq!(stored.result.field("one"), Some(&json!("a")));
        assert_eq!(stored.result.field("three"), Some(&json!("c")));
    }

    #[tokio::test]
    async fn test_stage_two_failure_keeps_stage_one_output() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![
            output_stage("one", "a"),
            failing_stage("two", "backend unavailable"),
            output_stage("three", "c"),
        ]);

        let end = executor(&store).run(request(&session, def)).await;
        assert!(matches!(end, RunEnd::Failed(_)));

        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.progress_step, 1);
        assert_eq!(stored.result.field("one"), Some(&json!("a")));
        assert!(stored.result.field("three").is_none());
        assert_eq!(
            stored.error_message.as_deref(),
            Some("Stage 'two' failed: backend unavailable")
        );
        assert_eq!(stored.progress_message, "Failed after stage 'one'");
        assert!(stored.completed_at.is_some());
        assert!(stored.active_run.is_none());
    }

    #[tokio::test]
    async fn test_skipped_stage_emits_no_transition() {
        let (store, session) = setup(json!({"problem": "p"}));
        let def = definition(vec![
            output_stage("enrich", "e").when_input_has("context"),
            output_stage("generate", "g"),
        ]);

        executor(&store).run(request(&session, def)).await;

        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.progress_step, 1);
        assert!(stored.result.field("enrich").is_none());
    }

    #[tokio::test]
    async fn test_stage_timeout_becomes_failure() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![
            sleeping_stage("slow", Duration::from_secs(60)).timeout(Duration::from_millis(20))
        ]);

        let end = executor(&store).run(request(&session, def)).await;
        assert!(matches!(end, RunEnd::Failed(ref m) if m.contains("timed out")));
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.progress_step, 0);
    }

    #[tokio::test]
    async fn test_stage_panic_becomes_failure() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![panicking_stage("boom")]);

        let end = executor(&store).run(request(&session, def)).await;
        assert_eq!(end, RunEnd::Failed("Stage 'boom' panicked".to_string()));
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert!(stored.active_run.is_none());
    }

    #[tokio::test]
    async fn test_missing_required_output_fails_completion() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![output_stage("one", "a").produces(&["ideas"])]);

        let end = executor(&store).run(request(&session, def)).await;
        assert_eq!(
            end,
            RunEnd::Failed("Pipeline finished without required output: ideas".to_string())
        );
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.progress_step, 1);
        assert_eq!(stored.status, SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_result_size_limit_enforced() {
        let (store, session) = setup(json!({}));
        let big = "x".repeat(4096);
        let def = definition(vec![stage_fn_descriptor("bloat", move || {
            StageOutput::new().field("blob", json!(big.clone()))
        })]);

        let settings = ExecutorSettings {
            max_result_bytes: 1024,
            ..ExecutorSettings::default()
        };
        let end = PipelineExecutor::new(store.clone(), settings)
            .run(request(&session, def))
            .await;

        assert!(matches!(end, RunEnd::Failed(ref m) if m.contains("1024 byte result limit")));
        let stored = store.get(session.id).unwrap().unwrap();
        assert!(stored.result.field("blob").is_none());
    }

    fn stage_fn_descriptor<F>(name: &str, make: F) -> StageDescriptor
    where
        F: Fn() -> StageOutput + Send + Sync + 'static,
    {
        let make = Arc::new(make);
        StageDescriptor::new(
            name,
            "Working",
            stage_fn(move |_| {
                let make = Arc::clone(&make);
                async move { Ok(make()) }
            }),
        )
    }

    #[tokio::test]
    async fn test_stage_sees_output_carried_over_from_earlier_run() {
        let store = Arc::new(MemoryStore::new());
        let mut session = Session::new("test", None, json!({}), RunId::new());
        session
            .result
            .merge("two", 1, StageOutput::new().field("two", json!("old")));
        session.run_count = 2;
        store.insert(&session).unwrap();

        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_stage = Arc::clone(&seen);
        let def = definition(vec![
            StageDescriptor::new(
                "one",
                "Running {{stage}}",
                stage_fn(move |ctx| {
                    let carried = ctx.result.fields.get("two").map(|f| (f.run, ctx.run));
                    *seen_in_stage.lock().unwrap() = carried;
                    async { Ok(StageOutput::new().field("one", json!("new"))) }
                }),
            ),
            output_stage("two", "fresh"),
        ]);

        let end = executor(&store).run(request(&session, def)).await;
        assert_eq!(end, RunEnd::Completed);
        assert_eq!(*seen.lock().unwrap(), Some((1, 2)));

        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.result.field("two"), Some(&json!("fresh")));
        assert_eq!(stored.result.fields["two"].run, 2);
    }

    #[tokio::test]
    async fn test_progress_message_uses_template() {
        let (store, session) = setup(json!({"product": "Acme"}));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_stage = Arc::clone(&seen);
        let store_in_stage = store.clone();
        let id = session.id;
        let def = definition(vec![
            StageDescriptor::new(
                "generate",
                "Step {{step}}/{{total}}: ideas for {{product}}",
                stage_fn(move |_| {
                    let seen = Arc::clone(&seen_in_stage);
                    let store = store_in_stage.clone();
                    async move {
                        let current = store.get(id)?.context("session missing")?;
                        seen.lock().unwrap().push(current.progress_message);
                        Ok(StageOutput::new())
                    }
                }),
            ),
            output_stage("cluster", "c"),
        ]);

        executor(&store).run(request(&session, def)).await;
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            ["Step 1/2: ideas for Acme".to_string()]
        );
    }

    #[tokio::test]
    async fn test_run_without_lease_does_not_start() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![output_stage("one", "a")]);
        let mut req = request(&session, def);
        req.run = RunId::new();

        let end = executor(&store).run(req).await;
        assert!(matches!(end, RunEnd::Aborted(_)));
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Pending);
        assert_eq!(stored.active_run, session.active_run);
    }

    #[tokio::test]
    async fn test_cancel_before_start_writes_nothing() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![output_stage("one", "a")]);
        let req = request(&session, def);
        req.cancel.cancel();

        let end = executor(&store).run(req).await;
        assert_eq!(end, RunEnd::Cancelled);
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.progress_step, 0);
        assert_eq!(stored.updated_at, session.updated_at);
    }

    #[tokio::test]
    async fn test_cancel_mid_stage_discards_output() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![
            sleeping_stage("slow", Duration::from_millis(200)),
            output_stage("after", "x"),
        ]);
        let req = request(&session, def);
        let cancel = req.cancel.clone();

        let exec = executor(&store);
        let handle = tokio::spawn(async move { exec.run(req).await });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        assert_eq!(handle.await.unwrap(), RunEnd::Cancelled);

        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.progress_step, 0);
        assert_eq!(stored.status, SessionStatus::Pending);
        assert!(stored.result.fields.is_empty());
    }

    #[tokio::test]
    async fn test_deleted_session_stops_run() {
        let (store, session) = setup(json!({}));
        let store_in_stage = store.clone();
        let id = session.id;
        let def = definition(vec![
            StageDescriptor::new(
                "delete-self",
                "Working",
                stage_fn(move |_| {
                    let store = store_in_stage.clone();
                    async move {
                        store.delete(id)?;
                        Ok(StageOutput::new().field("x", json!(1)))
                    }
                }),
            ),
            output_stage("never", "n"),
        ]);

        let end = executor(&store).run(request(&session, def)).await;
        assert_eq!(end, RunEnd::Cancelled);
        assert!(store.get(session.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_budget_checked_between_stages() {
        let (store, session) = setup(json!({}));
        let def = definition(vec![
            sleeping_stage("slow", Duration::from_millis(50)),
            output_stage("next", "n"),
        ]);
        let settings = ExecutorSettings {
            run_budget: Duration::from_millis(10),
            ..ExecutorSettings::default()
        };

        let end = PipelineExecutor::new(store.clone(), settings)
            .run(request(&session, def))
            .await;

        assert!(matches!(end, RunEnd::Failed(ref m) if m.contains("time budget")));
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.progress_step, 1);
    }

    #[tokio::test]
    async fn test_finished_runs_are_logged() {
        let tmp = TempDir::new().unwrap();
        let run_log = Arc::new(RunLog::new(tmp.path()).unwrap());
        let (store, session) = setup(json!({}));
        let def = definition(vec![output_stage("one", "a"), failing_stage("two", "nope")]);

        PipelineExecutor::new(store.clone(), ExecutorSettings::default())
            .with_run_log(Arc::clone(&run_log))
            .run(request(&session, def))
            .await;

        let entries = run_log.read_all().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].session_id, session.id);
        assert_eq!(entries[0].status, SessionStatus::Failed);
        assert_eq!(entries[0].stages_completed, 1);
        assert_eq!(entries[0].run, 1);
    }

    #[tokio::test]
    async fn test_lease_guard_fails_abandoned_session() {
        let (store, session) = setup(json!({}));
        {
            let _guard = LeaseGuard {
                store: store.clone(),
                session_id: session.id,
                run: session.active_run.unwrap(),
                armed: true,
            };
        }
        let stored = store.get(session.id).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Failed);
        assert_eq!(stored.error_message.as_deref(), Some("Run ended unexpectedly"));
        assert!(stored.active_run.is_none());
    }
}
