//! proxyping -- connectivity testing for saved proxy profiles.
//!
//! This crate provides the probe strategies (ICMP, TCP, URL through the
//! proxy), the bounded-concurrency test engine with progress streaming and
//! cancellation, and a SQLite profile store.

pub mod config;
pub mod engine;
pub mod probes;
pub mod profile;
pub mod storage;

use anyhow::Result;
use std::sync::Arc;

pub use engine::{RunHandle, RunReport, TestEngine, TestState};
pub use probes::{FailureReason, Outcome, ProbeKind};
pub use profile::{GroupId, Profile, ProfileId, ProfileStatus};

/// Wire the SQLite store and the system backend into an engine.
pub fn open_engine(config: &config::AppConfig) -> Result<(TestEngine, storage::SqliteStore)> {
    config.test.validate()?;

    tracing::info!(db = %config.database.path.display(), "Initializing profile store");
    let store = storage::SqliteStore::open(&config.database.path)?;
    let backend = probes::SystemBackend::from_system_conf(config.plugins.search_dirs.clone())?;

    let engine = TestEngine::new(
        Arc::new(store.clone()),
        Arc::new(backend),
        config.test.clone(),
    );
    Ok((engine, store))
}
