use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use lexchat_types::events::{ClientCommand, ServerEvent};
use lexchat_types::models::{Message, Participant};

/// A typing indicator is cleared after this long without a fresh signal,
/// so a lost stop-typing event cannot leave a partner "typing" forever.
pub const TYPING_TIMEOUT: Duration = Duration::from_secs(3);

/// One locally-sent message and where it stands against the server.
/// The echo is shown immediately; the ack swaps it for the stored record,
/// an error marks it failed so the UI can offer retry instead of silently
/// dropping it.
#[derive(Debug, Clone, PartialEq)]
pub enum LocalEcho {
    Pending {
        local_id: u64,
        receiver: Participant,
        content: String,
    },
    Confirmed(Message),
    Failed { local_id: u64, reason: String },
}

impl LocalEcho {
    pub fn is_pending(&self) -> bool {
        matches!(self, LocalEcho::Pending { .. })
    }
}

/// Client-side session state for one live connection: the optimistic echo
/// ledger, peer presence, and typing indicators. Pure state machine: all
/// IO stays in [`crate::connector`], so reconciliation is testable without
/// a server or a clock.
pub struct ChatSession {
    identity: Option<(Participant, String)>,
    next_local_id: u64,
    outbox: Vec<LocalEcho>,
    incoming: Vec<Message>,
    online: HashSet<Participant>,
    typing: HashMap<Participant, Instant>,
}

impl ChatSession {
    pub fn new() -> Self {
        Self {
            identity: None,
            next_local_id: 1,
            outbox: Vec::new(),
            incoming: Vec::new(),
            online: HashSet::new(),
            typing: HashMap::new(),
        }
    }

    /// The participant this session is authenticated as, once `Ready`.
    pub fn identity(&self) -> Option<Participant> {
        self.identity.as_ref().map(|(p, _)| *p)
    }

    /// Queue an optimistic echo and build the command to put on the wire.
    pub fn send_message(&mut self, receiver: Participant, content: &str) -> (u64, ClientCommand) {
        let local_id = self.next_local_id;
        self.next_local_id += 1;

        self.outbox.push(LocalEcho::Pending {
            local_id,
            receiver,
            content: content.to_string(),
        });

        let cmd = ClientCommand::SendMessage {
            receiver_id: receiver.id,
            receiver_kind: receiver.kind,
            content: content.to_string(),
            sender_id: None,
            sender_kind: None,
        };

        (local_id, cmd)
    }

    /// Fold one server event into the session. Acks and errors resolve the
    /// oldest pending echo first: the server processes sends from one
    /// connection in order, so responses arrive in send order too.
    pub fn apply_event(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::Ready { participant, name } => {
                self.identity = Some((participant, name));
            }

            ServerEvent::MessageSent(message) => {
                if let Some(slot) = self.outbox.iter_mut().find(|e| e.is_pending()) {
                    *slot = LocalEcho::Confirmed(message);
                }
            }

            ServerEvent::MessageError { reason } => {
                if let Some(idx) = self.outbox.iter().position(|e| e.is_pending()) {
                    if let LocalEcho::Pending { local_id, .. } = &self.outbox[idx] {
                        let local_id = *local_id;
                        self.outbox[idx] = LocalEcho::Failed { local_id, reason };
                    }
                }
            }

            ServerEvent::MessageReceive(message) => {
                // A real message ends any typing indicator from its sender
                self.typing.remove(&message.sender);
                self.incoming.push(message);
            }

            ServerEvent::PresenceUpdate { participant, online, .. } => {
                if online {
                    self.online.insert(participant);
                } else {
                    self.online.remove(&participant);
                    self.typing.remove(&participant);
                }
            }

            ServerEvent::TypingUpdate { sender, is_typing } => {
                if is_typing {
                    self.typing.insert(sender, now);
                } else {
                    self.typing.remove(&sender);
                }
            }
        }
    }

    pub fn is_online(&self, participant: Participant) -> bool {
        self.online.contains(&participant)
    }

    /// Peers currently typing, dropping indicators older than
    /// [`TYPING_TIMEOUT`], the local recovery for a lost stop signal.
    pub fn typing_peers(&self, now: Instant) -> Vec<Participant> {
        self.typing
            .iter()
            .filter(|(_, seen)| now.duration_since(**seen) < TYPING_TIMEOUT)
            .map(|(p, _)| *p)
            .collect()
    }

    pub fn outbox(&self) -> &[LocalEcho] {
        &self.outbox
    }

    pub fn incoming(&self) -> &[Message] {
        &self.incoming
    }

    pub fn pending_count(&self) -> usize {
        self.outbox.iter().filter(|e| e.is_pending()).count()
    }

    /// Drop a failed echo after the user dismisses or retries it.
    pub fn discard_failed(&mut self, local_id: u64) {
        self.outbox
            .retain(|e| !matches!(e, LocalEcho::Failed { local_id: id, .. } if *id == local_id));
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lexchat_types::models::ParticipantKind;

    fn user(id: i64) -> Participant {
        Participant::new(id, ParticipantKind::User)
    }

    fn lawyer(id: i64) -> Participant {
        Participant::new(id, ParticipantKind::Lawyer)
    }

    fn stored(id: i64, sender: Participant, receiver: Participant, content: &str) -> Message {
        Message {
            id,
            sender,
            receiver,
            content: content.to_string(),
            read: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn ack_confirms_the_oldest_pending_echo() {
        let mut session = ChatSession::new();
        let now = Instant::now();

        let (first_id, _) = session.send_message(lawyer(20), "first");
        let (_second_id, _) = session.send_message(lawyer(20), "second");
        assert_eq!(session.pending_count(), 2);

        let server_msg = stored(41, user(10), lawyer(20), "first");
        session.apply_event(ServerEvent::MessageSent(server_msg.clone()), now);

        assert_eq!(session.pending_count(), 1);
        match &session.outbox()[0] {
            LocalEcho::Confirmed(m) => assert_eq!(m.id, 41),
            other => panic!("expected confirmation, got {:?}", other),
        }
        // The second echo is still waiting on its own ack
        match &session.outbox()[1] {
            LocalEcho::Pending { content, .. } => assert_eq!(content, "second"),
            other => panic!("expected pending, got {:?}", other),
        }
        let _ = first_id;
    }

    #[test]
    fn error_fails_the_pending_echo_with_its_local_id() {
        let mut session = ChatSession::new();
        let now = Instant::now();

        let (local_id, _) = session.send_message(lawyer(20), "doomed");
        session.apply_event(
            ServerEvent::MessageError { reason: "failed to persist message".into() },
            now,
        );

        match &session.outbox()[0] {
            LocalEcho::Failed { local_id: id, reason } => {
                assert_eq!(*id, local_id);
                assert_eq!(reason, "failed to persist message");
            }
            other => panic!("expected failure, got {:?}", other),
        }

        session.discard_failed(local_id);
        assert!(session.outbox().is_empty());
    }

    #[test]
    fn typing_indicator_expires_without_a_stop_signal() {
        let mut session = ChatSession::new();
        let start = Instant::now();

        session.apply_event(
            ServerEvent::TypingUpdate { sender: lawyer(20), is_typing: true },
            start,
        );
        assert_eq!(session.typing_peers(start), vec![lawyer(20)]);

        // The stop signal is lost; the local timeout clears it anyway
        let later = start + TYPING_TIMEOUT;
        assert!(session.typing_peers(later).is_empty());
    }

    #[test]
    fn stop_typing_clears_immediately() {
        let mut session = ChatSession::new();
        let now = Instant::now();

        session.apply_event(
            ServerEvent::TypingUpdate { sender: lawyer(20), is_typing: true },
            now,
        );
        session.apply_event(
            ServerEvent::TypingUpdate { sender: lawyer(20), is_typing: false },
            now,
        );
        assert!(session.typing_peers(now).is_empty());
    }

    #[test]
    fn incoming_message_clears_typing_and_is_kept() {
        let mut session = ChatSession::new();
        let now = Instant::now();

        session.apply_event(
            ServerEvent::TypingUpdate { sender: lawyer(20), is_typing: true },
            now,
        );
        session.apply_event(
            ServerEvent::MessageReceive(stored(7, lawyer(20), user(10), "here it is")),
            now,
        );

        assert!(session.typing_peers(now).is_empty());
        assert_eq!(session.incoming().len(), 1);
        assert_eq!(session.incoming()[0].content, "here it is");
    }

    #[test]
    fn presence_tracks_online_set() {
        let mut session = ChatSession::new();
        let now = Instant::now();

        session.apply_event(
            ServerEvent::PresenceUpdate { participant: lawyer(20), name: "Brief & Case".into(), online: true },
            now,
        );
        assert!(session.is_online(lawyer(20)));

        session.apply_event(
            ServerEvent::PresenceUpdate { participant: lawyer(20), name: "Brief & Case".into(), online: false },
            now,
        );
        assert!(!session.is_online(lawyer(20)));
    }

    #[test]
    fn ready_binds_identity() {
        let mut session = ChatSession::new();
        session.apply_event(
            ServerEvent::Ready { participant: user(10), name: "Ada".into() },
            Instant::now(),
        );
        assert_eq!(session.identity(), Some(user(10)));
    }
}
