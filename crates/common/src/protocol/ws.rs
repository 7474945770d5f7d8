// WebSocket message types for the runbook-collab.v1 protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::UserInfo;

/// Outcome of an autosave attempt, reported on the autosave topic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AutosaveOutcome {
    Saved,
    Error,
}

/// All message types in the runbook-collab.v1 WebSocket protocol.
///
/// Update frames are bidirectional: clients send them without attribution,
/// the relay republishes them with `user` and `timestamp` attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsMessage {
    /// Client -> Server: initial handshake carrying the access token.
    Hello { access_token: String },

    /// Server -> Client: handshake acknowledgement.
    HelloAck { server_time: String },

    /// Bidirectional: title/description change, fanned out on `main`.
    /// The field name is opaque passthrough; nothing is persisted here.
    WorkflowMetadataUpdate {
        field: String,
        value: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<UserInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Bidirectional: single-step edit, fanned out on `main`. Pure fan-out:
    /// the payload is not normalized and the sender is not excluded.
    StepUpdate {
        step_index: usize,
        step_data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user: Option<UserInfo>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },

    /// Client -> Server: lenient snapshot of the in-progress edit.
    Autosave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        steps: Option<serde_json::Value>,
    },

    /// Server -> Client: autosave outcome on the `autosave` topic.
    AutosaveStatus {
        status: AutosaveOutcome,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        errors: Option<Vec<String>>,
        timestamp: String,
    },

    /// Server -> Client: a user joined, on the `presence` topic.
    UserJoined { user: UserInfo, active_users: Vec<Uuid>, timestamp: String },

    /// Server -> Client: a user left, on the `presence` topic.
    UserLeft { user: UserInfo, active_users: Vec<Uuid>, timestamp: String },

    /// Server -> Client: error.
    Error { code: String, message: String, retryable: bool },
}
