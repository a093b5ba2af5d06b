use std::sync::Arc;

use tracing::{debug, trace};

use lexchat_db::Database;
use lexchat_types::events::ServerEvent;
use lexchat_types::models::{Message, Participant};

use crate::registry::Registry;

/// Terminal state of an accepted send: either the receiver's live
/// connection got the message, or it stays persisted-only until they fetch
/// history on next connect. Persistence is the queue; there is no retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
}

/// Why a send attempt was rejected. Every variant is reported only to the
/// sender's own connection; a failed send leaves no partial state behind.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("sender and receiver are the same participant")]
    SelfSend,

    #[error("claimed sender does not match the connection identity")]
    UnauthorizedSender,

    #[error("failed to persist message")]
    Persistence(#[source] anyhow::Error),
}

/// Route one send attempt: persist, then deliver if the receiver is
/// online. The store write is the only awaited suspension point; a stale
/// or closed receiver channel downgrades to `Queued`, never to an error,
/// because the message is already durable.
pub async fn deliver_message(
    registry: &Registry,
    db: &Arc<Database>,
    sender: Participant,
    receiver: Participant,
    content: String,
) -> Result<(Message, DeliveryOutcome), RouterError> {
    if sender == receiver {
        return Err(RouterError::SelfSend);
    }

    // Run the blocking insert off the async runtime
    let db = db.clone();
    let row = tokio::task::spawn_blocking(move || db.insert_message(sender, receiver, &content))
        .await
        .map_err(|e| RouterError::Persistence(anyhow::anyhow!("insert task failed: {}", e)))?
        .map_err(RouterError::Persistence)?;

    let message = row.into_message();

    let delivered = registry
        .send_to(receiver, ServerEvent::MessageReceive(message.clone()))
        .await;

    let outcome = if delivered {
        DeliveryOutcome::Delivered
    } else {
        DeliveryOutcome::Queued
    };

    debug!(
        "message {} from {} to {}: {:?}",
        message.id, sender, receiver, outcome
    );

    Ok((message, outcome))
}

/// Forward a typing signal if the receiver is online, otherwise drop it.
/// Ephemeral by design: no persistence, no ack, no delivery guarantee.
pub async fn relay_typing(
    registry: &Registry,
    sender: Participant,
    receiver: Participant,
    is_typing: bool,
) {
    let forwarded = registry
        .send_to(receiver, ServerEvent::TypingUpdate { sender, is_typing })
        .await;
    trace!(
        "typing signal {} -> {} (typing={}, forwarded={})",
        sender, receiver, is_typing, forwarded
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexchat_types::models::ParticipantKind;

    fn user(id: i64) -> Participant {
        Participant::new(id, ParticipantKind::User)
    }

    fn lawyer(id: i64) -> Participant {
        Participant::new(id, ParticipantKind::Lawyer)
    }

    fn test_db() -> Arc<Database> {
        Arc::new(Database::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn offline_receiver_queues_without_delivery() {
        let registry = Registry::new();
        let db = test_db();

        let (message, outcome) =
            deliver_message(&registry, &db, user(10), lawyer(20), "Hello".into())
                .await
                .unwrap();

        assert_eq!(outcome, DeliveryOutcome::Queued);
        assert!(!message.read);

        // Persisted regardless: the receiver finds it in history later
        let history = db.conversation_messages(user(10), lawyer(20), 50, 0).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "Hello");
        assert!(!history[0].is_read);
    }

    #[tokio::test]
    async fn online_receiver_gets_the_stored_message() {
        let registry = Registry::new();
        let db = test_db();

        let (_conn, mut rx) = registry.register(lawyer(20), "Brief & Case".into()).await;

        let (message, outcome) =
            deliver_message(&registry, &db, user(10), lawyer(20), "Hello".into())
                .await
                .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Delivered);

        match rx.recv().await.unwrap() {
            ServerEvent::MessageReceive(received) => {
                assert_eq!(received.id, message.id);
                assert_eq!(received.content, "Hello");
                assert_eq!(received.sender, user(10));
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Exactly one row exists; delivery does not duplicate persistence
        let history = db.conversation_messages(user(10), lawyer(20), 50, 0).unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn self_send_is_rejected_before_persistence() {
        let registry = Registry::new();
        let db = test_db();

        let err = deliver_message(&registry, &db, user(10), user(10), "note to self".into())
            .await
            .unwrap_err();
        assert!(matches!(err, RouterError::SelfSend));

        let history = db.conversation_messages(user(10), user(10), 50, 0).unwrap();
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn sends_on_one_connection_keep_store_order() {
        let registry = Registry::new();
        let db = test_db();

        let (m1, _) = deliver_message(&registry, &db, user(10), lawyer(20), "first".into())
            .await
            .unwrap();
        let (m2, _) = deliver_message(&registry, &db, user(10), lawyer(20), "second".into())
            .await
            .unwrap();

        assert!(m1.id < m2.id);
        assert!(m1.created_at <= m2.created_at);
    }

    #[tokio::test]
    async fn stale_receiver_channel_downgrades_to_queued() {
        let registry = Registry::new();
        let db = test_db();

        let (_conn, rx) = registry.register(lawyer(20), "Brief & Case".into()).await;
        drop(rx); // connection task is gone but the entry lingers

        let (_message, outcome) =
            deliver_message(&registry, &db, user(10), lawyer(20), "Hello".into())
                .await
                .unwrap();
        assert_eq!(outcome, DeliveryOutcome::Queued);
    }

    #[tokio::test]
    async fn typing_signals_are_dropped_for_offline_receivers() {
        let registry = Registry::new();

        // No receiver registered: nothing to assert beyond "does not hang
        // or error"
        relay_typing(&registry, user(10), lawyer(20), true).await;

        let (_conn, mut rx) = registry.register(lawyer(20), "Brief & Case".into()).await;
        relay_typing(&registry, user(10), lawyer(20), true).await;
        relay_typing(&registry, user(10), lawyer(20), false).await;

        match rx.recv().await.unwrap() {
            ServerEvent::TypingUpdate { sender, is_typing } => {
                assert_eq!(sender, user(10));
                assert!(is_typing);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ServerEvent::TypingUpdate { is_typing, .. } => assert!(!is_typing),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
