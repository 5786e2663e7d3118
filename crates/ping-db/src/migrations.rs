use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS credentials (
            user_id     TEXT PRIMARY KEY,
            email       TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Every document lives here; child collections use slash paths
        -- such as chats/{chat_id}/messages.
        CREATE TABLE IF NOT EXISTS documents (
            collection  TEXT NOT NULL,
            id          TEXT NOT NULL,
            data        TEXT NOT NULL CHECK (json_valid(data)),
            updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (collection, id)
        );

        CREATE INDEX IF NOT EXISTS idx_documents_timestamp
            ON documents(collection, json_extract(data, '$.timestamp'));

        CREATE TABLE IF NOT EXISTS blobs (
            id          TEXT PRIMARY KEY,
            owner_id    TEXT NOT NULL,
            size        INTEGER NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
