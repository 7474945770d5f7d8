// Core domain types shared across the Runbook crates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::step::Step;

/// A collaboratively edited workflow document: a title, a description, and
/// an ordered sequence of typed steps. Step order is semantically meaningful
/// (it defines execution order), so reordering is itself an edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workflow {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub owner_id: Uuid,
    /// Users besides the owner who hold the edit capability.
    #[serde(default)]
    pub editor_ids: Vec<Uuid>,
    #[serde(default)]
    pub steps: Vec<Step>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(title: impl Into<String>, owner_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: String::new(),
            owner_id,
            editor_ids: Vec::new(),
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Capability check: the owner and listed editors may modify the
    /// workflow; everyone else is rejected at the channel boundary.
    pub fn can_edit(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id || self.editor_ids.contains(&user_id)
    }
}

/// User attribution attached to broadcast events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    pub id: Uuid,
    pub email: String,
    /// Display name derived from the email local part.
    pub name: String,
}

impl UserInfo {
    pub fn new(id: Uuid, email: impl Into<String>) -> Self {
        let email = email.into();
        let name = display_name_from_email(&email);
        Self { id, email, name }
    }
}

/// Derive a display name from an email address: the local part is split on
/// `.`, `_`, and `-`, and each word is capitalized.
pub fn display_name_from_email(email: &str) -> String {
    let local_part = email.split('@').next().unwrap_or_default();
    local_part
        .split(['.', '_', '-'])
        .filter(|word| !word.is_empty())
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_capitalizes_dotted_local_part() {
        assert_eq!(display_name_from_email("ada.lovelace@example.com"), "Ada Lovelace");
    }

    #[test]
    fn display_name_splits_on_underscores_and_hyphens() {
        assert_eq!(display_name_from_email("grace_hopper@example.com"), "Grace Hopper");
        assert_eq!(display_name_from_email("jean-luc@example.com"), "Jean Luc");
    }

    #[test]
    fn display_name_single_word() {
        assert_eq!(display_name_from_email("alan@example.com"), "Alan");
    }

    #[test]
    fn display_name_without_at_sign_uses_whole_string() {
        assert_eq!(display_name_from_email("ada.lovelace"), "Ada Lovelace");
    }

    #[test]
    fn display_name_collapses_empty_words() {
        assert_eq!(display_name_from_email("a..b@example.com"), "A B");
        assert_eq!(display_name_from_email("@example.com"), "");
    }

    #[test]
    fn user_info_derives_name_from_email() {
        let user = UserInfo::new(Uuid::new_v4(), "mary.shelley@example.com");
        assert_eq!(user.name, "Mary Shelley");
        assert_eq!(user.email, "mary.shelley@example.com");
    }

    #[test]
    fn owner_and_editors_can_edit() {
        let owner = Uuid::new_v4();
        let editor = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let mut workflow = Workflow::new("Incident response", owner);
        workflow.editor_ids.push(editor);

        assert!(workflow.can_edit(owner));
        assert!(workflow.can_edit(editor));
        assert!(!workflow.can_edit(stranger));
    }

    #[test]
    fn workflow_roundtrip_json() {
        let workflow = Workflow::new("Deploy checklist", Uuid::new_v4());
        let json = serde_json::to_value(&workflow).expect("workflow should serialize");
        let parsed: Workflow = serde_json::from_value(json).expect("workflow should deserialize");
        assert_eq!(workflow, parsed);
    }
}
