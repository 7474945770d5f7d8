// Workflow document store.
//
// PostgreSQL when the relay runs with a shared database, in-process memory
// otherwise. Both backends expose the same contract: lookup by id and a
// save whose validation can be relaxed for the autosave path. This core
// never deletes workflows.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::Utc;
use runbook_common::types::Workflow;
use sqlx::{PgPool, Row};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Clone)]
pub enum WorkflowStore {
    Postgres(PgPool),
    Memory(Arc<MemoryWorkflowStore>),
}

#[derive(Debug, Default)]
pub struct MemoryWorkflowStore {
    workflows: RwLock<HashMap<Uuid, Workflow>>,
    #[cfg(test)]
    fail_saves: std::sync::atomic::AtomicBool,
}

impl WorkflowStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(MemoryWorkflowStore::default()))
    }

    pub async fn find_workflow(&self, workflow_id: Uuid) -> anyhow::Result<Option<Workflow>> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query(
                    r#"
                    SELECT title, description, owner_id, editor_ids, steps, created_at, updated_at
                    FROM workflows
                    WHERE id = $1
                    "#,
                )
                .bind(workflow_id)
                .fetch_optional(pool)
                .await
                .context("failed to query workflow")?;

                row.map(|row| -> anyhow::Result<Workflow> {
                    let steps: serde_json::Value = row.try_get("steps")?;
                    Ok(Workflow {
                        id: workflow_id,
                        title: row.try_get("title")?,
                        description: row.try_get("description")?,
                        owner_id: row.try_get("owner_id")?,
                        editor_ids: row.try_get("editor_ids")?,
                        steps: serde_json::from_value(steps)
                            .context("stored steps are not a valid step list")?,
                        created_at: row.try_get("created_at")?,
                        updated_at: row.try_get("updated_at")?,
                    })
                })
                .transpose()
            }
            Self::Memory(store) => Ok(store.workflows.read().await.get(&workflow_id).cloned()),
        }
    }

    /// Upsert a workflow. With `validate: false` (the autosave path) an
    /// incomplete or otherwise-invalid workflow is still saved; the
    /// validated path enforces the minimal document rules.
    pub async fn save(&self, workflow: &Workflow, validate: bool) -> anyhow::Result<()> {
        if validate {
            validate_workflow(workflow)?;
        }

        match self {
            Self::Postgres(pool) => {
                let steps = serde_json::to_value(&workflow.steps)
                    .context("failed to serialize workflow steps")?;
                sqlx::query(
                    r#"
                    INSERT INTO workflows
                        (id, title, description, owner_id, editor_ids, steps, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, now())
                    ON CONFLICT (id) DO UPDATE
                    SET title = EXCLUDED.title,
                        description = EXCLUDED.description,
                        editor_ids = EXCLUDED.editor_ids,
                        steps = EXCLUDED.steps,
                        updated_at = now()
                    "#,
                )
                .bind(workflow.id)
                .bind(&workflow.title)
                .bind(&workflow.description)
                .bind(workflow.owner_id)
                .bind(&workflow.editor_ids)
                .bind(steps)
                .bind(workflow.created_at)
                .execute(pool)
                .await
                .context("failed to persist workflow")?;
                Ok(())
            }
            Self::Memory(store) => {
                #[cfg(test)]
                if store.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
                    bail!("simulated storage failure");
                }

                let mut workflow = workflow.clone();
                workflow.updated_at = Utc::now();
                store.workflows.write().await.insert(workflow.id, workflow);
                Ok(())
            }
        }
    }

    /// Make every subsequent in-memory save fail, to exercise the autosave
    /// error path. No-op for the Postgres backend.
    #[cfg(test)]
    pub(crate) fn fail_saves_for_tests(&self, fail: bool) {
        if let Self::Memory(store) = self {
            store.fail_saves.store(fail, std::sync::atomic::Ordering::SeqCst);
        }
    }
}

fn validate_workflow(workflow: &Workflow) -> anyhow::Result<()> {
    if workflow.title.trim().is_empty() {
        bail!("workflow title must not be blank");
    }
    for (index, step) in workflow.steps.iter().enumerate() {
        if step.kind.trim().is_empty() {
            bail!("step {index} is missing a type");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbook_common::step::normalize_steps;
    use serde_json::json;

    fn draft(owner: Uuid) -> Workflow {
        Workflow::new("Draft", owner)
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_workflow() {
        let store = WorkflowStore::in_memory();
        assert!(store.find_workflow(Uuid::new_v4()).await.expect("lookup should succeed").is_none());
    }

    #[tokio::test]
    async fn save_then_find_roundtrips() {
        let store = WorkflowStore::in_memory();
        let workflow = draft(Uuid::new_v4());
        store.save(&workflow, false).await.expect("save should succeed");

        let found = store
            .find_workflow(workflow.id)
            .await
            .expect("lookup should succeed")
            .expect("workflow should exist");
        assert_eq!(found.title, "Draft");
        assert_eq!(found.owner_id, workflow.owner_id);
    }

    #[tokio::test]
    async fn relaxed_save_accepts_invalid_workflow() {
        let store = WorkflowStore::in_memory();
        let mut workflow = draft(Uuid::new_v4());
        workflow.title = String::new();
        workflow.steps = normalize_steps(Some(&json!([{"prompt": "untyped"}])));

        store.save(&workflow, false).await.expect("relaxed save should accept invalid state");
    }

    #[tokio::test]
    async fn validated_save_rejects_blank_title_and_untyped_steps() {
        let store = WorkflowStore::in_memory();

        let mut blank_title = draft(Uuid::new_v4());
        blank_title.title = "  ".to_string();
        assert!(store.save(&blank_title, true).await.is_err());

        let mut untyped_step = draft(Uuid::new_v4());
        untyped_step.steps = normalize_steps(Some(&json!([{"prompt": "untyped"}])));
        assert!(store.save(&untyped_step, true).await.is_err());
    }

    #[tokio::test]
    async fn save_replaces_previous_state() {
        let store = WorkflowStore::in_memory();
        let mut workflow = draft(Uuid::new_v4());
        store.save(&workflow, false).await.expect("save should succeed");

        workflow.title = "Renamed".to_string();
        workflow.steps = normalize_steps(Some(&json!([{"type": "action"}])));
        store.save(&workflow, false).await.expect("save should succeed");

        let found = store
            .find_workflow(workflow.id)
            .await
            .expect("lookup should succeed")
            .expect("workflow should exist");
        assert_eq!(found.title, "Renamed");
        assert_eq!(found.steps.len(), 1);
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_error() {
        let store = WorkflowStore::in_memory();
        store.fail_saves_for_tests(true);
        assert!(store.save(&draft(Uuid::new_v4()), false).await.is_err());

        store.fail_saves_for_tests(false);
        assert!(store.save(&draft(Uuid::new_v4()), false).await.is_ok());
    }
}
