//! Connection test engine.
//!
//! A run loads one group from the [`ProfileStore`], fans the profiles out to
//! a probe strategy through the [`runner`], aggregates completions in a
//! single task that owns the counters, and persists the classified results
//! when the run ends. Progress is published on a `watch` channel.

pub mod classify;
pub mod progress;
pub mod runner;

pub use self::progress::{ProfileOutcome, ProgressSnapshot, TestState};
pub use self::runner::RunnerExit;

use crate::config::TestSettings;
use crate::probes::{ProbeBackend, ProbeKind};
use crate::profile::{GroupId, ProfileId, ProfileStatus, StatusUpdate};
use crate::storage::ProfileStore;
use progress::ProgressPublisher;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to load profiles of group {group}: {source}")]
    Store {
        group: GroupId,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("test run task failed: {0}")]
    Join(String),
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub group: GroupId,
    pub kind: ProbeKind,
    pub total: usize,
    /// Completed probes, in completion order.
    pub outcomes: Vec<ProfileOutcome>,
    pub cancelled: bool,
    pub writes_attempted: usize,
    pub writes_failed: usize,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.is_success()).count()
    }
}

/// Handle to one in-flight run.
pub struct RunHandle {
    id: Uuid,
    group: GroupId,
    kind: ProbeKind,
    token: CancellationToken,
    join: JoinHandle<RunReport>,
}

impl RunHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group(&self) -> GroupId {
        self.group
    }

    pub fn kind(&self) -> ProbeKind {
        self.kind
    }

    /// Stop dispatching new probes. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this run, for callers that hand `self` to `wait`.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for the run, including persistence, to finish.
    pub async fn wait(self) -> Result<RunReport, EngineError> {
        self.join.await.map_err(|e| EngineError::Join(e.to_string()))
    }
}

struct ActiveRun {
    id: Uuid,
    token: CancellationToken,
}

/// Runs connection tests for one observer surface. At most one run is
/// active at a time; starting a new one cancels the previous.
pub struct TestEngine {
    store: Arc<dyn ProfileStore>,
    backend: Arc<dyn ProbeBackend>,
    settings: Arc<TestSettings>,
    state: Arc<watch::Sender<TestState>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

impl TestEngine {
    pub fn new(
        store: Arc<dyn ProfileStore>,
        backend: Arc<dyn ProbeBackend>,
        settings: TestSettings,
    ) -> Self {
        let (state, _) = watch::channel(TestState::Idle);
        Self {
            store,
            backend,
            settings: Arc::new(settings),
            state: Arc::new(state),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Observe progress. Only the latest state is kept.
    pub fn subscribe(&self) -> watch::Receiver<TestState> {
        self.state.subscribe()
    }

    /// Current state without subscribing.
    pub fn state(&self) -> TestState {
        self.state.borrow().clone()
    }

    /// Start testing every profile of `group` with `kind`.
    pub async fn start(&self, group: GroupId, kind: ProbeKind) -> Result<RunHandle, EngineError> {
        // Halt the previous run's dispatch before loading.
        self.cancel();

        let profiles = self
            .store
            .profiles_in_group(group)
            .await
            .map_err(|e| EngineError::Store {
                group,
                source: e.into(),
            })?;

        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();
        let previous = lock(&self.active).replace(ActiveRun {
            id: run_id,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let publisher =
            ProgressPublisher::begin(self.state.clone(), run_id, group, kind, profiles.len());

        info!(run = %run_id, %group, %kind, total = profiles.len(), concurrency = self.settings.concurrency, "Connection test started");

        let ctx = RunContext {
            run_id,
            group,
            kind,
            store: self.store.clone(),
            backend: self.backend.clone(),
            settings: self.settings.clone(),
            token: token.clone(),
            active: self.active.clone(),
        };
        let join = tokio::spawn(drive(ctx, publisher, profiles));

        Ok(RunHandle {
            id: run_id,
            group,
            kind,
            token,
            join,
        })
    }

    /// Cancel the active run, if any. Idempotent.
    pub fn cancel(&self) {
        if let Some(run) = lock(&self.active).as_ref() {
            if !run.token.is_cancelled() {
                info!(run = %run.id, "Connection test cancelled");
            }
            run.token.cancel();
        }
    }

    /// Reset every tested profile of `group` to the initial state.
    pub async fn clear_results(&self, group: GroupId) -> anyhow::Result<usize> {
        let profiles = self.store.profiles_in_group(group).await?;
        let reset = StatusUpdate::reset();
        let mut cleared = 0;
        for profile in profiles
            .iter()
            .filter(|p| p.status != ProfileStatus::Initial)
        {
            match self.store.update_result(profile.id, &reset).await {
                Ok(()) => cleared += 1,
                Err(e) => error!(profile = %profile.id, error = %e, "Failed to clear test result"),
            }
        }
        if cleared > 0 {
            self.store.notify_group_changed(group).await;
        }
        info!(%group, cleared, "Test results cleared");
        Ok(cleared)
    }

    /// Delete profiles whose last test did not pass.
    pub async fn delete_unavailable(&self, group: GroupId) -> anyhow::Result<Vec<ProfileId>> {
        let ids: Vec<ProfileId> = self
            .store
            .profiles_in_group(group)
            .await?
            .into_iter()
            .filter(|p| {
                !matches!(p.status, ProfileStatus::Initial | ProfileStatus::Available)
            })
            .map(|p| p.id)
            .collect();
        if ids.is_empty() {
            return Ok(ids);
        }

        let removed = self.store.delete_profiles(group, &ids).await?;
        if removed != ids.len() {
            warn!(%group, expected = ids.len(), removed, "Some profiles were already gone");
        }
        self.store.notify_group_changed(group).await;
        info!(%group, removed, "Unavailable profiles deleted");
        Ok(ids)
    }
}

struct RunContext {
    run_id: Uuid,
    group: GroupId,
    kind: ProbeKind,
    store: Arc<dyn ProfileStore>,
    backend: Arc<dyn ProbeBackend>,
    settings: Arc<TestSettings>,
    token: CancellationToken,
    active: Arc<Mutex<Option<ActiveRun>>>,
}

fn lock(active: &Mutex<Option<ActiveRun>>) -> std::sync::MutexGuard<'_, Option<ActiveRun>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Aggregation task for one run.
async fn drive(
    ctx: RunContext,
    mut publisher: ProgressPublisher,
    profiles: Vec<crate::profile::Profile>,
) -> RunReport {
    let total = profiles.len();
    let limit = ctx.settings.concurrency.max(1);
    let (tx, mut rx) = mpsc::channel(limit);

    let runner = tokio::spawn(runner::run(
        profiles,
        ctx.kind,
        limit,
        ctx.backend.clone(),
        ctx.settings.clone(),
        ctx.token.clone(),
        tx,
    ));

    let mut outcomes = Vec::with_capacity(total);
    while let Some(completed) = rx.recv().await {
        // After cancellation results are kept for persistence but not shown.
        publisher.record(&completed, !ctx.token.is_cancelled());
        outcomes.push(completed);
    }

    let exit = match runner.await {
        Ok(exit) => exit,
        Err(e) => {
            error!(run = %ctx.run_id, error = %e, "runner task failed");
            RunnerExit::Cancelled {
                dispatched: outcomes.len(),
                skipped: total - outcomes.len(),
            }
        }
    };
    let cancelled = matches!(exit, RunnerExit::Cancelled { .. });

    let (writes_attempted, writes_failed) = persist(&*ctx.store, ctx.group, &outcomes).await;

    publisher.finish();
    {
        let mut active = lock(&ctx.active);
        if active.as_ref().map(|run| run.id) == Some(ctx.run_id) {
            *active = None;
        }
    }

    info!(
        run = %ctx.run_id,
        group = %ctx.group,
        processed = publisher.processed(),
        total,
        cancelled,
        writes_failed,
        "Connection test finished"
    );

    RunReport {
        run_id: ctx.run_id,
        group: ctx.group,
        kind: ctx.kind,
        total,
        outcomes,
        cancelled,
        writes_attempted,
        writes_failed,
    }
}

/// Write every outcome back to the store. A failed write is logged and the
/// rest continue. Returns `(attempted, failed)`.
async fn persist(
    store: &dyn ProfileStore,
    group: GroupId,
    outcomes: &[ProfileOutcome],
) -> (usize, usize) {
    let mut failed = 0;
    for completed in outcomes {
        let update = classify::classify(&completed.outcome);
        if let Err(e) = store.update_result(completed.profile.id, &update).await {
            failed += 1;
            error!(profile = %completed.profile.id, error = %e, "Failed to save test result");
        }
    }
    if !outcomes.is_empty() {
        store.notify_group_changed(group).await;
    }
    (outcomes.len(), failed)
}
