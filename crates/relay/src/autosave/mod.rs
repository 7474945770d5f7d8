// Autosave persistence: the lenient save path for in-progress edits.

use runbook_common::step::Step;
use runbook_common::types::Workflow;
use thiserror::Error;

use crate::store::WorkflowStore;

/// Failure applying an autosave snapshot to the workflow store. Carries a
/// human-readable message for the autosave status event.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct PersistError {
    message: String,
}

impl PersistError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Apply an autosave snapshot to the workflow.
///
/// A blank title keeps the previous one — the title is never overwritten
/// with emptiness. The step sequence is replaced wholesale: the last
/// autosave wins, there is no merge. The save runs with validation relaxed
/// so an incomplete draft still persists.
pub async fn persist(
    store: &WorkflowStore,
    workflow: &mut Workflow,
    title: Option<&str>,
    steps: Vec<Step>,
) -> Result<(), PersistError> {
    if let Some(title) = title {
        if !title.trim().is_empty() {
            workflow.title = title.to_string();
        }
    }
    workflow.steps = steps;

    store
        .save(workflow, false)
        .await
        .map_err(|error| PersistError { message: format!("autosave failed: {error:#}") })
}
