// Presence tracking: which users are actively connected to a workflow.
//
// Backed by PostgreSQL when the relay shares a database with other
// processes, or by an in-process map otherwise. Callers never branch on the
// backend. Presence is best-effort: backend failures degrade to logged
// no-ops and must not block the edit or autosave paths. Reads of entries
// written by another process through the Postgres backend are eventually
// consistent; that is a known limitation, not a bug.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// How long a presence entry survives without a refreshing join.
pub const PRESENCE_TTL_SECONDS: i64 = 3600;

type MemoryPresence = HashMap<Uuid, HashMap<Uuid, DateTime<Utc>>>;

#[derive(Clone)]
pub enum PresenceTracker {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryPresence>>),
}

impl PresenceTracker {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    /// Record `user_id` as active on a workflow. Re-joining refreshes the
    /// entry's expiry instead of duplicating it.
    pub async fn join(&self, workflow_id: Uuid, user_id: Uuid) {
        let expires_at = Utc::now() + Duration::seconds(PRESENCE_TTL_SECONDS);
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO workflow_presence (workflow_id, user_id, expires_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (workflow_id, user_id)
                    DO UPDATE SET expires_at = EXCLUDED.expires_at
                    "#,
                )
                .bind(workflow_id)
                .bind(user_id)
                .bind(expires_at)
                .execute(pool)
                .await;

                if let Err(error) = result {
                    warn!(
                        error = ?error,
                        workflow_id = %workflow_id,
                        user_id = %user_id,
                        "presence join failed; continuing without it"
                    );
                }
            }
            Self::Memory(state) => {
                let now = Utc::now();
                let mut guard = state.write().await;
                let bucket = guard.entry(workflow_id).or_default();
                bucket.retain(|_, entry_expires_at| *entry_expires_at > now);
                bucket.insert(user_id, expires_at);
            }
        }
    }

    /// Remove `user_id` from a workflow's presence; no-op when absent. The
    /// in-process backend drops the per-workflow bucket once it empties.
    pub async fn leave(&self, workflow_id: Uuid, user_id: Uuid) {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query(
                    "DELETE FROM workflow_presence \
                     WHERE workflow_id = $1 AND (user_id = $2 OR expires_at <= now())",
                )
                .bind(workflow_id)
                .bind(user_id)
                .execute(pool)
                .await;

                if let Err(error) = result {
                    warn!(
                        error = ?error,
                        workflow_id = %workflow_id,
                        user_id = %user_id,
                        "presence leave failed; entry will expire via TTL"
                    );
                }
            }
            Self::Memory(state) => {
                let now = Utc::now();
                let mut guard = state.write().await;
                if let Some(bucket) = guard.get_mut(&workflow_id) {
                    bucket.remove(&user_id);
                    bucket.retain(|_, expires_at| *expires_at > now);
                    if bucket.is_empty() {
                        guard.remove(&workflow_id);
                    }
                }
            }
        }
    }

    /// Non-expired users on a workflow, sorted for deterministic event
    /// payloads. Expiry is enforced at read time, not left to sweeps.
    pub async fn active_users(&self, workflow_id: Uuid) -> Vec<Uuid> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query_scalar::<_, Uuid>(
                    "SELECT user_id FROM workflow_presence \
                     WHERE workflow_id = $1 AND expires_at > now() \
                     ORDER BY user_id",
                )
                .bind(workflow_id)
                .fetch_all(pool)
                .await;

                match result {
                    Ok(users) => users,
                    Err(error) => {
                        warn!(
                            error = ?error,
                            workflow_id = %workflow_id,
                            "presence read failed; reporting no active users"
                        );
                        Vec::new()
                    }
                }
            }
            Self::Memory(state) => {
                let now = Utc::now();
                let guard = state.read().await;
                let mut users: Vec<Uuid> = guard
                    .get(&workflow_id)
                    .map(|bucket| {
                        bucket
                            .iter()
                            .filter(|(_, expires_at)| **expires_at > now)
                            .map(|(user_id, _)| *user_id)
                            .collect()
                    })
                    .unwrap_or_default();
                users.sort();
                users
            }
        }
    }

    /// Insert an entry with an explicit expiry, to exercise TTL behavior.
    #[cfg(test)]
    pub(crate) async fn insert_for_tests(
        &self,
        workflow_id: Uuid,
        user_id: Uuid,
        expires_at: DateTime<Utc>,
    ) {
        if let Self::Memory(state) = self {
            state.write().await.entry(workflow_id).or_default().insert(user_id, expires_at);
        }
    }
}
