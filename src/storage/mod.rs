//! Profile storage -- the store trait used by the test engine and the
//! bundled SQLite implementation.

pub mod schema;

use crate::profile::{GroupId, Profile, ProfileId, ProfileStatus, Protocol, StatusUpdate};
use anyhow::{Context, Result};
use chrono::Utc;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::path::Path;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Where profiles live. The engine only reads profiles and writes results.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// All profiles of a group, in user order.
    async fn profiles_in_group(&self, group: GroupId) -> Result<Vec<Profile>>;

    /// Persist the result of testing one profile.
    async fn update_result(&self, profile: ProfileId, update: &StatusUpdate) -> Result<()>;

    /// Remove profiles from a group. Returns how many rows went away.
    async fn delete_profiles(&self, group: GroupId, ids: &[ProfileId]) -> Result<usize>;

    /// Announce that data in `group` changed.
    async fn notify_group_changed(&self, group: GroupId);
}

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &Path) -> Result<Pool> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// SQLite-backed profile store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
    changes: broadcast::Sender<GroupId>,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { pool, changes }
    }

    pub fn open(path: &Path) -> Result<Self> {
        info!(path = %path.display(), "Opening profile database");
        Ok(Self::new(open_pool(path)?))
    }

    /// Single-connection in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let pool = R2D2Pool::builder()
            .max_size(1)
            .build(SqliteConnectionManager::memory())?;
        let conn = pool.get()?;
        schema::migrate(&conn)?;
        drop(conn);
        Ok(Self::new(pool))
    }

    /// Receive a group id every time a group's data changes.
    pub fn subscribe_changes(&self) -> broadcast::Receiver<GroupId> {
        self.changes.subscribe()
    }

    /// Insert a new, untested profile.
    pub fn add_profile(
        &self,
        group: GroupId,
        name: &str,
        server: &str,
        port: u16,
        protocol: &Protocol,
    ) -> Result<Profile> {
        let conn = self.pool.get()?;
        let protocol_json = serde_json::to_string(protocol)?;
        conn.execute(
            "INSERT INTO profiles (group_id, name, server, port, protocol_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![group.0, name, server, port, protocol_json, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert profile")?;

        let id = ProfileId(conn.last_insert_rowid());
        debug!(profile = %id, group = %group, "profile added");
        Ok(Profile::new(id, group, name, server, port, protocol.clone()))
    }

    /// Load a group synchronously.
    pub fn list(&self, group: GroupId) -> Result<Vec<Profile>> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, group_id, name, server, port, protocol_json, status, latency_ms, error
             FROM profiles WHERE group_id = ?1 ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![group.0], row_to_parts)?;

        let mut profiles = Vec::new();
        for r in rows {
            let (mut profile, protocol_json) = r?;
            profile.protocol = serde_json::from_str(&protocol_json).with_context(|| {
                format!("profile {} has an unreadable protocol column", profile.id)
            })?;
            profiles.push(profile);
        }
        Ok(profiles)
    }

    fn write_result(&self, profile: ProfileId, update: &StatusUpdate) -> Result<()> {
        let conn = self.pool.get()?;
        let changed = conn.execute(
            "UPDATE profiles SET status = ?1, latency_ms = ?2, error = ?3, tested_at = ?4
             WHERE id = ?5",
            params![
                update.status.code(),
                update.latency_ms,
                update.error,
                Utc::now().to_rfc3339(),
                profile.0
            ],
        )?;
        if changed == 0 {
            anyhow::bail!("Profile {} not found", profile);
        }
        Ok(())
    }

    fn remove(&self, group: GroupId, ids: &[ProfileId]) -> Result<usize> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM profiles WHERE group_id = ?1 AND id = ?2")?;
            for id in ids {
                removed += stmt.execute(params![group.0, id.0])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }
}

/// Row mapping; the protocol column is decoded by the caller so that a bad
/// JSON value surfaces as an anyhow error with context.
fn row_to_parts(row: &Row<'_>) -> rusqlite::Result<(Profile, String)> {
    let port: i64 = row.get(4)?;
    let latency: i64 = row.get(7)?;
    let profile = Profile {
        id: ProfileId(row.get(0)?),
        group_id: GroupId(row.get(1)?),
        name: row.get(2)?,
        server: row.get(3)?,
        port: u16::try_from(port).unwrap_or(0),
        protocol: Protocol::Direct,
        status: ProfileStatus::from_code(row.get(6)?),
        latency_ms: u32::try_from(latency).unwrap_or(0),
        error: row.get(8)?,
    };
    Ok((profile, row.get(5)?))
}

// SQLite calls block, so they run on the blocking pool.
#[async_trait::async_trait]
impl ProfileStore for SqliteStore {
    async fn profiles_in_group(&self, group: GroupId) -> Result<Vec<Profile>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.list(group)).await?
    }

    async fn update_result(&self, profile: ProfileId, update: &StatusUpdate) -> Result<()> {
        let store = self.clone();
        let update = update.clone();
        tokio::task::spawn_blocking(move || store.write_result(profile, &update)).await?
    }

    async fn delete_profiles(&self, group: GroupId, ids: &[ProfileId]) -> Result<usize> {
        let store = self.clone();
        let ids = ids.to_vec();
        tokio::task::spawn_blocking(move || store.remove(group, &ids)).await?
    }

    async fn notify_group_changed(&self, group: GroupId) {
        debug!(%group, "group data changed");
        // No subscribers is fine.
        let _ = self.changes.send(group);
    }
}
