use std::collections::HashMap;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

use lexchat_types::models::Participant;

use crate::Database;
use crate::models::{ConversationRow, MessageRow};

impl Database {
    // -- Messages --

    /// Append a message to the store. The row is durable before this
    /// returns; live delivery always happens after, never instead.
    pub fn insert_message(
        &self,
        sender: Participant,
        receiver: Participant,
        content: &str,
    ) -> Result<MessageRow> {
        self.with_conn(|conn| {
            let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            conn.execute(
                "INSERT INTO messages (sender_id, sender_kind, receiver_id, receiver_kind, content, is_read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
                rusqlite::params![
                    sender.id,
                    sender.kind.as_str(),
                    receiver.id,
                    receiver.kind.as_str(),
                    content,
                    created_at
                ],
            )?;

            Ok(MessageRow {
                id: conn.last_insert_rowid(),
                sender_id: sender.id,
                sender_kind: sender.kind.as_str().to_string(),
                receiver_id: receiver.id,
                receiver_kind: receiver.kind.as_str().to_string(),
                content: content.to_string(),
                is_read: false,
                created_at,
            })
        })
    }

    /// Both directions of the conversation between `a` and `b`, ordered
    /// oldest -> newest, paginated. Message ids are monotonic within the
    /// store, so ordering by id is ordering by insertion.
    pub fn conversation_messages(
        &self,
        a: Participant,
        b: Participant,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_conversation_messages(conn, a, b, limit, offset))
    }

    /// One row per distinct partner: the newest message of the pair plus
    /// how many of their messages the caller has not read yet, ordered by
    /// most recent message first.
    pub fn conversations_for(&self, participant: Participant) -> Result<Vec<ConversationRow>> {
        self.with_conn(|conn| {
            let mut rows = query_latest_per_partner(conn, participant)?;
            let unread = query_unread_by_partner(conn, participant)?;

            for row in rows.iter_mut() {
                row.unread_count = unread
                    .get(&(row.partner_id, row.partner_kind.clone()))
                    .copied()
                    .unwrap_or(0);
            }

            Ok(rows)
        })
    }

    /// Mark every unread message from `sender` to `receiver` as read.
    /// Monotonic and idempotent: already-read rows are untouched, so a
    /// second call is a no-op. Returns the number of rows flipped.
    pub fn mark_conversation_read(
        &self,
        receiver: Participant,
        sender: Participant,
    ) -> Result<usize> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE messages SET is_read = 1
                 WHERE receiver_id = ?1 AND receiver_kind = ?2
                   AND sender_id = ?3 AND sender_kind = ?4
                   AND is_read = 0",
                rusqlite::params![
                    receiver.id,
                    receiver.kind.as_str(),
                    sender.id,
                    sender.kind.as_str()
                ],
            )?;
            Ok(updated)
        })
    }

    /// Total unread messages addressed to `participant`, for the badge.
    pub fn unread_total(&self, participant: Participant) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE receiver_id = ?1 AND receiver_kind = ?2 AND is_read = 0",
                rusqlite::params![participant.id, participant.kind.as_str()],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Participants (directory mirror) --

    /// Refresh the display-name mirror for a participant. Called at
    /// gateway identify; the external directory stays authoritative.
    pub fn upsert_participant(&self, participant: Participant, display_name: &str) -> Result<()> {
        self.with_conn(|conn| {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
            conn.execute(
                "INSERT INTO participants (id, kind, display_name, last_seen_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id, kind) DO UPDATE SET
                     display_name = excluded.display_name,
                     last_seen_at = excluded.last_seen_at",
                rusqlite::params![
                    participant.id,
                    participant.kind.as_str(),
                    display_name,
                    now
                ],
            )?;
            Ok(())
        })
    }
}

fn query_conversation_messages(
    conn: &Connection,
    a: Participant,
    b: Participant,
    limit: u32,
    offset: u32,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, sender_id, sender_kind, receiver_id, receiver_kind, content, is_read, created_at
         FROM messages
         WHERE (sender_id = ?1 AND sender_kind = ?2 AND receiver_id = ?3 AND receiver_kind = ?4)
            OR (sender_id = ?3 AND sender_kind = ?4 AND receiver_id = ?1 AND receiver_kind = ?2)
         ORDER BY id ASC
         LIMIT ?5 OFFSET ?6",
    )?;

    let rows = stmt
        .query_map(
            rusqlite::params![
                a.id,
                a.kind.as_str(),
                b.id,
                b.kind.as_str(),
                limit,
                offset
            ],
            map_message_row,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_latest_per_partner(conn: &Connection, p: Participant) -> Result<Vec<ConversationRow>> {
    // The inner query picks the newest message id per unordered pair; the
    // LEFT JOIN resolves the partner's display name from the directory
    // mirror (falls back to 'unknown' for partners never seen here).
    let mut stmt = conn.prepare(
        "SELECT
            CASE WHEN m.sender_id = ?1 AND m.sender_kind = ?2 THEN m.receiver_id ELSE m.sender_id END AS partner_id,
            CASE WHEN m.sender_id = ?1 AND m.sender_kind = ?2 THEN m.receiver_kind ELSE m.sender_kind END AS partner_kind,
            COALESCE(p.display_name, 'unknown') AS partner_name,
            m.content,
            m.created_at
         FROM messages m
         JOIN (
            SELECT MAX(id) AS last_id
            FROM messages
            WHERE (sender_id = ?1 AND sender_kind = ?2)
               OR (receiver_id = ?1 AND receiver_kind = ?2)
            GROUP BY
                CASE WHEN sender_id = ?1 AND sender_kind = ?2 THEN receiver_id ELSE sender_id END,
                CASE WHEN sender_id = ?1 AND sender_kind = ?2 THEN receiver_kind ELSE sender_kind END
         ) latest ON m.id = latest.last_id
         LEFT JOIN participants p
            ON p.id = CASE WHEN m.sender_id = ?1 AND m.sender_kind = ?2 THEN m.receiver_id ELSE m.sender_id END
           AND p.kind = CASE WHEN m.sender_id = ?1 AND m.sender_kind = ?2 THEN m.receiver_kind ELSE m.sender_kind END
         ORDER BY m.id DESC",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![p.id, p.kind.as_str()], |row| {
            Ok(ConversationRow {
                partner_id: row.get(0)?,
                partner_kind: row.get(1)?,
                partner_name: row.get(2)?,
                last_message: row.get(3)?,
                last_message_at: row.get(4)?,
                unread_count: 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_unread_by_partner(
    conn: &Connection,
    p: Participant,
) -> Result<HashMap<(i64, String), i64>> {
    let mut stmt = conn.prepare(
        "SELECT sender_id, sender_kind, COUNT(*)
         FROM messages
         WHERE receiver_id = ?1 AND receiver_kind = ?2 AND is_read = 0
         GROUP BY sender_id, sender_kind",
    )?;

    let mut unread = HashMap::new();
    let rows = stmt.query_map(rusqlite::params![p.id, p.kind.as_str()], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?))
    })?;

    for row in rows {
        let (id, kind, count) = row?;
        unread.insert((id, kind), count);
    }

    Ok(unread)
}

fn map_message_row(row: &rusqlite::Row<'_>) -> std::result::Result<MessageRow, rusqlite::Error> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        sender_kind: row.get(2)?,
        receiver_id: row.get(3)?,
        receiver_kind: row.get(4)?,
        content: row.get(5)?,
        is_read: row.get(6)?,
        created_at: row.get(7)?,
    })
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

    #[test]
    fn insert_assigns_id_and_unread() {
        let db = Database::open_in_memory().unwrap();
        let row = db.insert_message(user(10), lawyer(20), "Hello").unwrap();

        assert!(row.id > 0);
        assert!(!row.is_read);
        assert_eq!(row.content, "Hello");

        // Exactly one row, retrievable from either side of the pair
        let from_a = db.conversation_messages(user(10), lawyer(20), 50, 0).unwrap();
        let from_b = db.conversation_messages(lawyer(20), user(10), 50, 0).unwrap();
        assert_eq!(from_a.len(), 1);
        assert_eq!(from_b.len(), 1);
        assert_eq!(from_a[0].id, row.id);
    }

    #[test]
    fn history_is_oldest_first_and_restartable() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            db.insert_message(user(10), lawyer(20), &format!("m{}", i)).unwrap();
            db.insert_message(lawyer(20), user(10), &format!("r{}", i)).unwrap();
        }

        let page1 = db.conversation_messages(user(10), lawyer(20), 4, 0).unwrap();
        let page2 = db.conversation_messages(user(10), lawyer(20), 4, 4).unwrap();
        assert_eq!(page1.len(), 4);
        assert_eq!(page1[0].content, "m0");
        assert_eq!(page1[1].content, "r0");
        assert_eq!(page2[0].content, "m2");

        let ids: Vec<i64> = page1.iter().chain(page2.iter()).map(|m| m.id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn history_does_not_leak_other_conversations() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(user(10), lawyer(20), "for 20").unwrap();
        db.insert_message(user(10), lawyer(30), "for 30").unwrap();
        // Same numeric id, different kind: a distinct participant
        db.insert_message(user(10), user(20), "for user 20").unwrap();

        let msgs = db.conversation_messages(user(10), lawyer(20), 50, 0).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "for 20");
    }

    #[test]
    fn created_at_is_monotonic_per_sender() {
        let db = Database::open_in_memory().unwrap();
        let m1 = db.insert_message(user(10), lawyer(20), "first").unwrap();
        let m2 = db.insert_message(user(10), lawyer(20), "second").unwrap();
        assert!(m1.created_at <= m2.created_at);
        assert!(m1.id < m2.id);
    }

    #[test]
    fn conversations_group_by_partner_and_count_unread() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_participant(user(10), "Ada Client").unwrap();
        db.upsert_participant(lawyer(20), "Brief & Case LLP").unwrap();

        db.insert_message(user(10), lawyer(20), "Hello").unwrap();
        db.insert_message(user(10), lawyer(20), "Are you there?").unwrap();
        db.insert_message(lawyer(30), lawyer(20), "peer note").unwrap();

        let convos = db.conversations_for(lawyer(20)).unwrap();
        assert_eq!(convos.len(), 2);

        // Most recent conversation first
        assert_eq!(convos[0].partner_id, 30);
        assert_eq!(convos[0].partner_kind, "lawyer");
        assert_eq!(convos[0].partner_name, "unknown");
        assert_eq!(convos[0].unread_count, 1);

        assert_eq!(convos[1].partner_id, 10);
        assert_eq!(convos[1].partner_kind, "user");
        assert_eq!(convos[1].partner_name, "Ada Client");
        assert_eq!(convos[1].last_message, "Are you there?");
        assert_eq!(convos[1].unread_count, 2);
    }

    #[test]
    fn unread_counts_only_messages_addressed_to_caller() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(user(10), lawyer(20), "in").unwrap();
        db.insert_message(lawyer(20), user(10), "out").unwrap();

        let convos = db.conversations_for(lawyer(20)).unwrap();
        assert_eq!(convos.len(), 1);
        // Only the inbound message counts; our own unread reply does not.
        assert_eq!(convos[0].unread_count, 1);
        assert_eq!(convos[0].last_message, "out");
    }

    #[test]
    fn mark_read_is_idempotent_and_scoped() {
        let db = Database::open_in_memory().unwrap();
        db.insert_message(user(10), lawyer(20), "one").unwrap();
        db.insert_message(user(10), lawyer(20), "two").unwrap();
        db.insert_message(user(30), lawyer(20), "other sender").unwrap();

        let first = db.mark_conversation_read(lawyer(20), user(10)).unwrap();
        assert_eq!(first, 2);

        let second = db.mark_conversation_read(lawyer(20), user(10)).unwrap();
        assert_eq!(second, 0);

        // Unread count matches a single call, and the other conversation
        // is untouched
        assert_eq!(db.unread_total(lawyer(20)).unwrap(), 1);
        let convos = db.conversations_for(lawyer(20)).unwrap();
        let from_10 = convos.iter().find(|c| c.partner_id == 10).unwrap();
        assert_eq!(from_10.unread_count, 0);
    }

    #[test]
    fn upsert_participant_refreshes_name() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_participant(user(10), "Old Name").unwrap();
        db.upsert_participant(user(10), "New Name").unwrap();
        db.insert_message(user(10), lawyer(20), "hi").unwrap();

        let convos = db.conversations_for(lawyer(20)).unwrap();
        assert_eq!(convos[0].partner_name, "New Name");
    }

    #[test]
    fn row_converts_to_wire_message() {
        let db = Database::open_in_memory().unwrap();
        let row = db.insert_message(user(10), lawyer(20), "Hello").unwrap();
        let created = row.created_at.clone();
        let msg = row.into_message();

        assert_eq!(msg.sender, user(10));
        assert_eq!(msg.receiver, lawyer(20));
        assert!(!msg.read);
        assert_eq!(
            msg.created_at,
            created.parse::<chrono::DateTime<chrono::Utc>>().unwrap()
        );
    }
}
