use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tracing::{error, warn};

use lexchat_types::api::{
    Claims, ConversationSummary, MarkReadResponse, MessageResponse, UnreadCountResponse,
};
use lexchat_types::models::{Participant, ParticipantKind};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    50
}

/// `GET /chat/conversations`: one row per distinct partner, newest
/// conversation first, with the caller's unread count per partner.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationSummary>>, StatusCode> {
    let me = claims.participant();

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || db.conversations_for(me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("conversation query failed for {}: {}", me, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let conversations = rows
        .into_iter()
        .map(|row| ConversationSummary {
            partner_id: row.partner_id,
            partner_type: ParticipantKind::parse(&row.partner_kind).unwrap_or_else(|| {
                warn!("Corrupt partner kind '{}' in conversation row", row.partner_kind);
                ParticipantKind::User
            }),
            partner_name: row.partner_name,
            last_message: row.last_message,
            last_message_at: parse_timestamp(&row.last_message_at),
            unread_count: row.unread_count,
        })
        .collect();

    Ok(Json(conversations))
}

/// `GET /chat/messages/{partner_id}/{partner_type}?limit=&offset=`:
/// the conversation with one partner, oldest first, offset-paginated.
pub async fn get_messages(
    State(state): State<AppState>,
    Path((partner_id, partner_type)): Path<(i64, ParticipantKind)>,
    Query(query): Query<HistoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, StatusCode> {
    let me = claims.participant();
    let partner = Participant::new(partner_id, partner_type);
    let limit = query.limit.min(200);
    let offset = query.offset;

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.conversation_messages(me, partner, limit, offset)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?
    .map_err(|e| {
        error!("history query failed for {} <-> {}: {}", me, partner, e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let messages = rows
        .into_iter()
        .map(|row| MessageResponse::from(row.into_message()))
        .collect();

    Ok(Json(messages))
}

/// `PUT /chat/messages/read/{partner_id}/{partner_type}`: mark every
/// unread message from the partner as read. Safe to repeat.
pub async fn mark_read(
    State(state): State<AppState>,
    Path((partner_id, partner_type)): Path<(i64, ParticipantKind)>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<MarkReadResponse>, StatusCode> {
    let me = claims.participant();
    let partner = Participant::new(partner_id, partner_type);

    let db = state.db.clone();
    let updated = tokio::task::spawn_blocking(move || db.mark_conversation_read(me, partner))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("mark read failed for {} <- {}: {}", me, partner, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(MarkReadResponse { updated }))
}

/// `GET /chat/unread`: total unread messages for the caller's badge.
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<UnreadCountResponse>, StatusCode> {
    let me = claims.participant();

    let db = state.db.clone();
    let unread = tokio::task::spawn_blocking(move || db.unread_total(me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("unread query failed for {}: {}", me, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(Json(UnreadCountResponse { unread }))
}

fn parse_timestamp(raw: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt conversation timestamp '{}': {}", raw, e);
            chrono::DateTime::default()
        })
}
