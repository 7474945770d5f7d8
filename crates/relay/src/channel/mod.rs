// Session channel: the per-connection state machine that authorizes and
// routes collaborative-edit traffic for one workflow.
//
// Subscribe is a hard authorization gate: a caller without the edit
// capability never joins topics or presence. In-channel messages are softer
// — an unauthorized or orphaned update is silently dropped so a stale
// client cannot break the session for everyone else.

use chrono::Utc;
use runbook_common::protocol::ws::{AutosaveOutcome, WsMessage};
use runbook_common::step::normalize_steps;
use runbook_common::types::{UserInfo, Workflow};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::autosave;
use crate::broadcast::{BroadcastRouter, Topic};
use crate::presence::PresenceTracker;
use crate::store::WorkflowStore;

/// Why a subscribe attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("workflow not found")]
    NotFound,
    #[error("caller lacks edit access to this workflow")]
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelState {
    Unsubscribed,
    Subscribed { workflow_id: Uuid },
    /// Terminal: the subscribe was rejected and the transport closes the
    /// connection.
    Rejected,
}

pub struct SessionChannel {
    conn_id: Uuid,
    user: UserInfo,
    store: WorkflowStore,
    presence: PresenceTracker,
    router: BroadcastRouter,
    state: ChannelState,
}

impl SessionChannel {
    pub fn new(
        user: UserInfo,
        store: WorkflowStore,
        presence: PresenceTracker,
        router: BroadcastRouter,
    ) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            user,
            store,
            presence,
            router,
            state: ChannelState::Unsubscribed,
        }
    }

    pub fn user(&self) -> &UserInfo {
        &self.user
    }

    /// Bind this connection to a workflow.
    ///
    /// `NotFound` leaves the channel unsubscribed. `Forbidden` is terminal:
    /// no topic is joined and no presence entry is created. On success the
    /// connection is registered on all three topics, presence records the
    /// join, and a `user_joined` event goes out on the presence topic.
    pub async fn subscribe(
        &mut self,
        workflow_id: Uuid,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) -> Result<(), SubscribeError> {
        if self.state != ChannelState::Unsubscribed {
            warn!(conn_id = %self.conn_id, state = ?self.state, "ignoring duplicate subscribe");
            return Ok(());
        }

        let workflow = match self.store.find_workflow(workflow_id).await {
            Ok(Some(workflow)) => workflow,
            Ok(None) => return Err(SubscribeError::NotFound),
            Err(error) => {
                warn!(error = ?error, workflow_id = %workflow_id, "workflow lookup failed on subscribe");
                return Err(SubscribeError::NotFound);
            }
        };

        if !workflow.can_edit(self.user.id) {
            self.state = ChannelState::Rejected;
            return Err(SubscribeError::Forbidden);
        }

        self.router.register(workflow_id, self.conn_id, sender).await;
        self.presence.join(workflow_id, self.user.id).await;
        let active_users = self.presence.active_users(workflow_id).await;
        self.router
            .publish(
                workflow_id,
                Topic::Presence,
                WsMessage::UserJoined {
                    user: self.user.clone(),
                    active_users,
                    timestamp: Utc::now().to_rfc3339(),
                },
            )
            .await;

        self.state = ChannelState::Subscribed { workflow_id };
        Ok(())
    }

    /// Release the connection's topic registrations and presence entry.
    ///
    /// Safe to call repeatedly. When the workflow has vanished since the
    /// subscribe, the presence side is a silent no-op.
    pub async fn unsubscribe(&mut self) {
        let ChannelState::Subscribed { workflow_id } = self.state else {
            return;
        };
        self.state = ChannelState::Unsubscribed;

        self.router.unregister(workflow_id, self.conn_id).await;

        match self.store.find_workflow(workflow_id).await {
            Ok(Some(_)) => {
                self.presence.leave(workflow_id, self.user.id).await;
                let active_users = self.presence.active_users(workflow_id).await;
                self.router
                    .publish(
                        workflow_id,
                        Topic::Presence,
                        WsMessage::UserLeft {
                            user: self.user.clone(),
                            active_users,
                            timestamp: Utc::now().to_rfc3339(),
                        },
                    )
                    .await;
            }
            Ok(None) => {}
            Err(error) => {
                warn!(error = ?error, workflow_id = %workflow_id, "workflow lookup failed on unsubscribe");
            }
        }
    }

    /// Fan out a title/description change on the main topic. The field name
    /// is opaque passthrough and nothing is persisted here; autosave carries
    /// the durable state.
    pub async fn handle_metadata_update(&self, field: String, value: Value) {
        let Some(workflow_id) = self.authorized_workflow_id().await else {
            return;
        };
        self.router
            .publish(
                workflow_id,
                Topic::Main,
                WsMessage::WorkflowMetadataUpdate {
                    field,
                    value,
                    user: Some(self.user.clone()),
                    timestamp: Some(Utc::now().to_rfc3339()),
                },
            )
            .await;
    }

    /// Fan out a single-step edit on the main topic. Pure fan-out: the
    /// payload is not normalized and the sender receives its own broadcast;
    /// suppressing the echo is a client concern.
    pub async fn handle_step_update(&self, step_index: usize, step_data: Value) {
        let Some(workflow_id) = self.authorized_workflow_id().await else {
            return;
        };
        self.router
            .publish(
                workflow_id,
                Topic::Main,
                WsMessage::StepUpdate {
                    step_index,
                    step_data,
                    user: Some(self.user.clone()),
                    timestamp: Some(Utc::now().to_rfc3339()),
                },
            )
            .await;
    }

    /// Normalize and persist an autosave snapshot, reporting the outcome on
    /// the autosave topic. A storage failure degrades to a visible error
    /// status instead of a fault, so a failed save never disconnects the
    /// client.
    pub async fn handle_autosave(&self, title: Option<String>, steps: Option<Value>) {
        let ChannelState::Subscribed { workflow_id } = self.state else {
            return;
        };
        let Some(mut workflow) = self.authorized_workflow(workflow_id).await else {
            return;
        };

        let normalized = normalize_steps(steps.as_ref());
        let outcome =
            autosave::persist(&self.store, &mut workflow, title.as_deref(), normalized).await;

        let message = match outcome {
            Ok(()) => WsMessage::AutosaveStatus {
                status: AutosaveOutcome::Saved,
                errors: None,
                timestamp: Utc::now().to_rfc3339(),
            },
            Err(error) => {
                warn!(
                    workflow_id = %workflow_id,
                    user_id = %self.user.id,
                    error = %error,
                    "autosave failed"
                );
                WsMessage::AutosaveStatus {
                    status: AutosaveOutcome::Error,
                    errors: Some(vec![error.message().to_string()]),
                    timestamp: Utc::now().to_rfc3339(),
                }
            }
        };

        self.router.publish(workflow_id, Topic::Autosave, message).await;
    }

    async fn authorized_workflow_id(&self) -> Option<Uuid> {
        let ChannelState::Subscribed { workflow_id } = self.state else {
            return None;
        };
        self.authorized_workflow(workflow_id).await.map(|workflow| workflow.id)
    }

    /// Per-message capability check. A vanished workflow, a revoked
    /// capability, or a store failure all drop the message silently.
    async fn authorized_workflow(&self, workflow_id: Uuid) -> Option<Workflow> {
        match self.store.find_workflow(workflow_id).await {
            Ok(Some(workflow)) if workflow.can_edit(self.user.id) => Some(workflow),
            Ok(Some(_)) => {
                debug!(
                    workflow_id = %workflow_id,
                    user_id = %self.user.id,
                    "dropping message from non-editor"
                );
                None
            }
            Ok(None) => None,
            Err(error) => {
                warn!(error = ?error, workflow_id = %workflow_id, "workflow lookup failed; dropping message");
                None
            }
        }
    }
}
