// Per-workflow fan-out across three named topics.
//
// Delivery is fire-and-forget: nothing is queued for connections that are
// not registered at publish time, so a late subscriber never sees earlier
// messages. Each connection drains one unbounded queue, which preserves
// publish order per publisher within a topic.

use std::collections::HashMap;
use std::sync::Arc;

use runbook_common::protocol::ws::WsMessage;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// The three broadcast streams of a workflow session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Metadata and step edits.
    Main,
    /// Autosave status reports.
    Autosave,
    /// Join/leave events.
    Presence,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Main, Topic::Autosave, Topic::Presence];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Autosave => "autosave",
            Self::Presence => "presence",
        }
    }
}

type TopicRegistry = HashMap<(Uuid, Topic), HashMap<Uuid, mpsc::UnboundedSender<WsMessage>>>;

#[derive(Debug, Clone, Default)]
pub struct BroadcastRouter {
    topics: Arc<RwLock<TopicRegistry>>,
}

impl BroadcastRouter {
    /// Register a connection on all three topics of a workflow. The
    /// registration happens under one lock, so a subscriber is never
    /// observable on a strict subset of the topics.
    pub async fn register(
        &self,
        workflow_id: Uuid,
        conn_id: Uuid,
        sender: mpsc::UnboundedSender<WsMessage>,
    ) {
        let mut guard = self.topics.write().await;
        for topic in Topic::ALL {
            guard.entry((workflow_id, topic)).or_default().insert(conn_id, sender.clone());
        }
    }

    /// Remove a connection from every topic of a workflow, dropping empty
    /// topic buckets so finished workflows do not accumulate.
    pub async fn unregister(&self, workflow_id: Uuid, conn_id: Uuid) {
        let mut guard = self.topics.write().await;
        for topic in Topic::ALL {
            if let Some(bucket) = guard.get_mut(&(workflow_id, topic)) {
                bucket.remove(&conn_id);
                if bucket.is_empty() {
                    guard.remove(&(workflow_id, topic));
                }
            }
        }
    }

    /// Deliver `message` to every connection currently registered on the
    /// topic. Returns how many connections accepted it; connections whose
    /// receiving end is gone are skipped.
    pub async fn publish(&self, workflow_id: Uuid, topic: Topic, message: WsMessage) -> usize {
        let recipients: Vec<mpsc::UnboundedSender<WsMessage>> = {
            let guard = self.topics.read().await;
            guard
                .get(&(workflow_id, topic))
                .map(|bucket| bucket.values().cloned().collect())
                .unwrap_or_default()
        };

        let mut sent_count = 0;
        for recipient in recipients {
            if recipient.send(message.clone()).is_ok() {
                sent_count += 1;
            }
        }

        sent_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn status_message(label: &str) -> WsMessage {
        WsMessage::Error {
            code: label.to_string(),
            message: String::new(),
            retryable: false,
        }
    }

    fn subscriber() -> (Uuid, mpsc::UnboundedSender<WsMessage>, mpsc::UnboundedReceiver<WsMessage>)
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Uuid::new_v4(), sender, receiver)
    }

    #[tokio::test]
    async fn publish_reaches_registered_connections() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();
        let (conn_1, sender_1, mut receiver_1) = subscriber();
        let (conn_2, sender_2, mut receiver_2) = subscriber();

        router.register(workflow, conn_1, sender_1).await;
        router.register(workflow, conn_2, sender_2).await;

        let delivered = router.publish(workflow, Topic::Main, status_message("m1")).await;
        assert_eq!(delivered, 2);
        assert!(receiver_1.try_recv().is_ok());
        assert!(receiver_2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn late_subscriber_does_not_receive_past_messages() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();

        let delivered = router.publish(workflow, Topic::Main, status_message("early")).await;
        assert_eq!(delivered, 0);

        let (conn, sender, mut receiver) = subscriber();
        router.register(workflow, conn, sender).await;
        assert!(receiver.try_recv().is_err());

        router.publish(workflow, Topic::Main, status_message("late")).await;
        let received = receiver.try_recv().expect("live message should arrive");
        assert_eq!(received, status_message("late"));
    }

    #[tokio::test]
    async fn messages_arrive_in_publish_order_per_topic() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();
        let (conn, sender, mut receiver) = subscriber();
        router.register(workflow, conn, sender).await;

        for index in 0..10 {
            router.publish(workflow, Topic::Main, status_message(&index.to_string())).await;
        }

        for index in 0..10 {
            let received = receiver.try_recv().expect("message should arrive");
            assert_eq!(received, status_message(&index.to_string()));
        }
    }

    #[tokio::test]
    async fn workflows_do_not_cross_talk() {
        let router = BroadcastRouter::default();
        let workflow_a = Uuid::new_v4();
        let workflow_b = Uuid::new_v4();
        let (conn, sender, mut receiver) = subscriber();
        router.register(workflow_a, conn, sender).await;

        let delivered = router.publish(workflow_b, Topic::Main, status_message("b")).await;
        assert_eq!(delivered, 0);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_removes_the_connection_from_all_topics() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();
        let (conn, sender, mut receiver) = subscriber();
        router.register(workflow, conn, sender).await;

        router.unregister(workflow, conn).await;

        for topic in Topic::ALL {
            let delivered = router.publish(workflow, topic, status_message("gone")).await;
            assert_eq!(delivered, 0);
        }
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_topic_buckets_are_dropped() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();
        let (conn, sender, _receiver) = subscriber();
        router.register(workflow, conn, sender).await;
        router.unregister(workflow, conn).await;

        assert!(router.topics.read().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_receiver_is_not_counted() {
        let router = BroadcastRouter::default();
        let workflow = Uuid::new_v4();
        let (conn_live, sender_live, mut receiver_live) = subscriber();
        let (conn_dead, sender_dead, receiver_dead) = subscriber();
        drop(receiver_dead);

        router.register(workflow, conn_live, sender_live).await;
        router.register(workflow, conn_dead, sender_dead).await;

        let message = WsMessage::AutosaveStatus {
            status: runbook_common::protocol::ws::AutosaveOutcome::Saved,
            errors: None,
            timestamp: Utc::now().to_rfc3339(),
        };
        let delivered = router.publish(workflow, Topic::Autosave, message).await;
        assert_eq!(delivered, 1);
        assert!(receiver_live.try_recv().is_ok());
    }
}
