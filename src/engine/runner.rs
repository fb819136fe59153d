//! Bounded-concurrency fan-out of probes over a profile list.

use super::progress::ProfileOutcome;
use crate::config::TestSettings;
use crate::probes::{self, FailureReason, Outcome, ProbeBackend, ProbeKind};
use crate::profile::Profile;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// How the runner ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerExit {
    /// Empty profile list; no probes were started.
    NothingToDo,
    Completed { dispatched: usize },
    /// Cancellation stopped dispatch; `skipped` profiles were never probed.
    Cancelled { dispatched: usize, skipped: usize },
}

/// Probe every profile with at most `limit` probes in flight.
///
/// Each finished probe is sent on `tx` as soon as it completes, so the
/// receiver sees completion order. Cancellation stops new dispatch only;
/// probes already started run to the end and are still delivered.
pub async fn run(
    profiles: Vec<Profile>,
    kind: ProbeKind,
    limit: usize,
    backend: Arc<dyn ProbeBackend>,
    settings: Arc<TestSettings>,
    token: CancellationToken,
    tx: mpsc::Sender<ProfileOutcome>,
) -> RunnerExit {
    let total = profiles.len();
    if total == 0 {
        debug!(%kind, "no profiles to probe");
        return RunnerExit::NothingToDo;
    }

    let limit = limit.max(1);
    let semaphore = Arc::new(Semaphore::new(limit));
    let mut join_set = JoinSet::new();
    let mut dispatched = 0;

    for profile in profiles {
        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        dispatched += 1;
        let backend = backend.clone();
        let settings = settings.clone();
        let tx = tx.clone();

        join_set.spawn(async move {
            let _permit = permit;
            let outcome = AssertUnwindSafe(probes::probe(kind, &profile, &*backend, &settings))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    error!(profile = %profile.id, "probe task panicked");
                    Outcome::failure(FailureReason::Generic(Some("probe task panicked".into())))
                });
            debug!(profile = %profile.id, %outcome, "probe finished");
            // Receiver gone means nobody is aggregating any more.
            let _ = tx.send(ProfileOutcome { profile, outcome }).await;
        });

        // Reap finished tasks so the set stays at most `limit` long.
        while let Some(res) = join_set.try_join_next() {
            if let Err(e) = res {
                error!(error = %e, "probe task failed");
            }
        }
    }

    while let Some(res) = join_set.join_next().await {
        if let Err(e) = res {
            error!(error = %e, "probe task failed");
        }
    }

    if dispatched < total {
        info!(%kind, dispatched, skipped = total - dispatched, "dispatch stopped by cancellation");
        RunnerExit::Cancelled {
            dispatched,
            skipped: total - dispatched,
        }
    } else {
        RunnerExit::Completed { dispatched }
    }
}
