//! Progress snapshots published while a test run is active.

use crate::probes::{Outcome, ProbeKind};
use crate::profile::{GroupId, Profile};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

/// One profile together with the outcome of probing it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileOutcome {
    pub profile: Profile,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    /// The most recently completed profile.
    pub latest: Option<ProfileOutcome>,
    pub processed: usize,
    pub total: usize,
}

/// What observers of the engine see. Only the latest value is retained.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum TestState {
    /// No active run.
    #[default]
    Idle,
    Running {
        run_id: Uuid,
        group: GroupId,
        kind: ProbeKind,
        snapshot: ProgressSnapshot,
    },
}

impl TestState {
    pub fn is_idle(&self) -> bool {
        matches!(self, TestState::Idle)
    }

    pub fn run_id(&self) -> Option<Uuid> {
        match self {
            TestState::Running { run_id, .. } => Some(*run_id),
            TestState::Idle => None,
        }
    }

    pub fn snapshot(&self) -> Option<&ProgressSnapshot> {
        match self {
            TestState::Running { snapshot, .. } => Some(snapshot),
            TestState::Idle => None,
        }
    }
}

/// Writes one run's progress into the shared state channel.
///
/// Owned by the run's aggregation task, which is the only writer of
/// `processed`. Updates are dropped once another run has taken over the
/// channel.
pub(crate) struct ProgressPublisher {
    state: Arc<watch::Sender<TestState>>,
    run_id: Uuid,
    group: GroupId,
    kind: ProbeKind,
    total: usize,
    processed: usize,
}

impl ProgressPublisher {
    /// Publish the initial `0 / total` snapshot, replacing whatever was there.
    pub(crate) fn begin(
        state: Arc<watch::Sender<TestState>>,
        run_id: Uuid,
        group: GroupId,
        kind: ProbeKind,
        total: usize,
    ) -> Self {
        let publisher = Self {
            state,
            run_id,
            group,
            kind,
            total,
            processed: 0,
        };
        publisher.state.send_replace(publisher.running(None));
        publisher
    }

    /// Count one completion and, if `emit`, publish it as the latest result.
    pub(crate) fn record(&mut self, completed: &ProfileOutcome, emit: bool) {
        self.processed = (self.processed + 1).min(self.total);
        if emit {
            let next = self.running(Some(completed.clone()));
            self.publish_if_current(next);
        }
    }

    /// Publish the terminal `Idle` state.
    pub(crate) fn finish(&self) {
        self.publish_if_current(TestState::Idle);
    }

    pub(crate) fn processed(&self) -> usize {
        self.processed
    }

    fn running(&self, latest: Option<ProfileOutcome>) -> TestState {
        TestState::Running {
            run_id: self.run_id,
            group: self.group,
            kind: self.kind,
            snapshot: ProgressSnapshot {
                latest,
                processed: self.processed,
                total: self.total,
            },
        }
    }

    fn publish_if_current(&self, next: TestState) {
        let run_id = self.run_id;
        self.state.send_if_modified(|state| {
            if state.run_id() == Some(run_id) {
                *state = next;
                true
            } else {
                false
            }
        });
    }
}
