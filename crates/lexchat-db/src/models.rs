//! Database row types that map directly to SQLite rows.
//! Distinct from the lexchat-types wire models to keep the DB layer
//! independent; conversion to wire types is lenient about corrupt rows.

use lexchat_types::models::{Message, Participant, ParticipantKind};
use tracing::warn;

pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub sender_kind: String,
    pub receiver_id: i64,
    pub receiver_kind: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: String,
}

/// Newest message per distinct partner, plus the caller's unread count
/// for that partner. Built by [`crate::queries`], not stored as a table.
pub struct ConversationRow {
    pub partner_id: i64,
    pub partner_kind: String,
    pub partner_name: String,
    pub last_message: String,
    pub last_message_at: String,
    pub unread_count: i64,
}

impl MessageRow {
    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            sender: Participant::new(self.sender_id, parse_kind(&self.sender_kind, self.id)),
            receiver: Participant::new(self.receiver_id, parse_kind(&self.receiver_kind, self.id)),
            content: self.content,
            read: self.is_read,
            created_at: parse_timestamp(&self.created_at, self.id),
        }
    }
}

pub(crate) fn parse_kind(raw: &str, message_id: i64) -> ParticipantKind {
    ParticipantKind::parse(raw).unwrap_or_else(|| {
        warn!("Corrupt participant kind '{}' on message {}", raw, message_id);
        ParticipantKind::User
    })
}

pub(crate) fn parse_timestamp(raw: &str, message_id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite's datetime() stores "YYYY-MM-DD HH:MM:SS" without a
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", raw, message_id, e);
            chrono::DateTime::default()
        })
}
