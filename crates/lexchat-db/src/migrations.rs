use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            sender_id       INTEGER NOT NULL,
            sender_kind     TEXT NOT NULL,
            receiver_id     INTEGER NOT NULL,
            receiver_kind   TEXT NOT NULL,
            content         TEXT NOT NULL,
            is_read         INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_sender
            ON messages(sender_id, sender_kind, id);

        CREATE INDEX IF NOT EXISTS idx_messages_receiver
            ON messages(receiver_id, receiver_kind, is_read, id);

        -- Mirror of the external directory, refreshed at gateway identify.
        -- Only used to resolve partner display names in conversation lists.
        CREATE TABLE IF NOT EXISTS participants (
            id              INTEGER NOT NULL,
            kind            TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            last_seen_at    TEXT NOT NULL,
            PRIMARY KEY (id, kind)
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
