use serde::{Deserialize, Serialize};

use crate::models::{Message, Participant, ParticipantKind};

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Send a message to another participant.
    ///
    /// `sender_id`/`sender_kind` are optional legacy fields: when present
    /// they are cross-checked against the identity bound to the connection
    /// and the send is rejected on mismatch. The payload's claimed sender
    /// is never authoritative.
    SendMessage {
        receiver_id: i64,
        receiver_kind: ParticipantKind,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_kind: Option<ParticipantKind>,
    },

    /// Started typing in the conversation with `receiver`
    Typing {
        receiver_id: i64,
        receiver_kind: ParticipantKind,
    },

    /// Stopped typing in the conversation with `receiver`
    StopTyping {
        receiver_id: i64,
        receiver_kind: ParticipantKind,
    },
}

/// Events sent FROM server TO client over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerEvent {
    /// Server confirms successful authentication
    Ready { participant: Participant, name: String },

    /// A message addressed to this participant arrived
    MessageReceive(Message),

    /// Ack to the sender: the message was persisted (delivery to the
    /// receiver may or may not have happened; persistence is the queue)
    MessageSent(Message),

    /// A send attempt failed; nothing was persisted
    MessageError { reason: String },

    /// A participant came online or went offline
    PresenceUpdate {
        participant: Participant,
        name: String,
        online: bool,
    },

    /// The partner started or stopped typing. Never persisted; a lost
    /// stop signal is recovered by a client-side timeout.
    TypingUpdate { sender: Participant, is_typing: bool },
}
