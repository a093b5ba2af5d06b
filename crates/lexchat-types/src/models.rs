use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Account type of a chat participant. Numeric ids are only unique within
/// a kind, so a bare id never identifies anyone; see [`Participant`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticipantKind {
    User,
    Lawyer,
}

impl ParticipantKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Lawyer => "lawyer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "lawyer" => Some(Self::Lawyer),
            _ => None,
        }
    }
}

impl std::fmt::Display for ParticipantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat participant: the (id, kind) pair is the identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: i64,
    pub kind: ParticipantKind,
}

impl Participant {
    pub fn new(id: i64, kind: ParticipantKind) -> Self {
        Self { id, kind }
    }
}

impl std::fmt::Display for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

/// A persisted message. Immutable once stored except for `read`, which only
/// ever transitions false -> true when the receiver opens the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub sender: Participant,
    pub receiver: Participant,
    pub content: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}
