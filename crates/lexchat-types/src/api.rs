use serde::{Deserialize, Serialize};

use crate::models::{Message, ParticipantKind};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway identify
/// handshake. Canonical definition lives here to eliminate duplication.
/// Tokens are issued by the external auth service; this core only
/// validates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub kind: ParticipantKind,
    pub name: String,
    pub exp: usize,
}

impl Claims {
    pub fn participant(&self) -> crate::models::Participant {
        crate::models::Participant::new(self.sub, self.kind)
    }
}

// -- Chat REST surface --

/// One row of `GET /chat/conversations`: the newest message per distinct
/// partner plus the count of messages still unread by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub partner_id: i64,
    pub partner_type: ParticipantKind,
    pub partner_name: String,
    pub last_message: String,
    pub last_message_at: chrono::DateTime<chrono::Utc>,
    pub unread_count: i64,
}

/// One row of `GET /chat/messages/{partner_id}/{partner_type}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: i64,
    pub sender_id: i64,
    pub sender_type: ParticipantKind,
    pub receiver_id: i64,
    pub receiver_type: ParticipantKind,
    pub content: String,
    pub read: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<Message> for MessageResponse {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            sender_id: m.sender.id,
            sender_type: m.sender.kind,
            receiver_id: m.receiver.id,
            receiver_type: m.receiver.kind,
            content: m.content,
            read: m.read,
            created_at: m.created_at,
        }
    }
}

/// Response of `PUT /chat/messages/read/{partner_id}/{partner_type}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadResponse {
    pub updated: usize,
}

/// Response of `GET /chat/unread`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub unread: i64,
}
