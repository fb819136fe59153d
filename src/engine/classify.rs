//! Mapping from probe outcomes to the persisted profile status.

use crate::probes::{FailureReason, Outcome};
use crate::profile::{ProfileStatus, StatusUpdate};

/// Status recorded for a failed probe.
pub fn status_for(reason: &FailureReason) -> ProfileStatus {
    match reason {
        FailureReason::ConnectionRefused
        | FailureReason::IcmpUnavailable
        | FailureReason::NetworkUnreachable
        | FailureReason::Timeout => ProfileStatus::Unreachable,
        FailureReason::PluginNotFound(_)
        | FailureReason::DomainNotFound
        | FailureReason::InvalidConfig => ProfileStatus::Invalid,
        FailureReason::Generic(_) | FailureReason::TcpUnavailable => ProfileStatus::Unavailable,
    }
}

/// Build the `(status, latency, error)` triple to persist for an outcome.
pub fn classify(outcome: &Outcome) -> StatusUpdate {
    match outcome {
        Outcome::Success { latency_ms } => StatusUpdate {
            status: ProfileStatus::Available,
            latency_ms: *latency_ms,
            error: None,
        },
        Outcome::Failure { reason } => StatusUpdate {
            status: status_for(reason),
            latency_ms: 0,
            error: Some(reason.to_string()),
        },
    }
}
