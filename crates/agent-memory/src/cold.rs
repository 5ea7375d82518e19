// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Durable cold-tier row store. Backed by a single SQLite connection guarded
//! by a mutex, which stands in for the row-level locking a real relational
//! store gives us on the `sessions` row used to assign the next sequence
//! number — serializing writers here buys the same no-gap, no-duplicate
//! guarantee without a server round trip.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::message::{decode_message, encode_message, Message};

#[derive(Debug, thiserror::Error)]
pub enum ColdTierError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored message is corrupt: {0}")]
    Corrupt(#[from] crate::message::DecodeError),
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type ColdResult<T> = Result<T, ColdTierError>;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub session_id: String,
    pub agent_name: Option<String>,
    pub user_id: Option<String>,
    pub status: String,
    pub created_at: chrono::DateTime<Utc>,
    pub updated_at: chrono::DateTime<Utc>,
    pub metadata: Value,
    pub message_count: i64,
    pub next_sequence: i64,
}

fn parse_session_row(r: &rusqlite::Row) -> rusqlite::Result<SessionRow> {
    let created_at: String = r.get(4)?;
    let updated_at: String = r.get(5)?;
    let metadata: String = r.get(6)?;
    Ok(SessionRow {
        session_id: r.get(0)?,
        agent_name: r.get(1)?,
        user_id: r.get(2)?,
        status: r.get(3)?,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        updated_at: updated_at.parse().unwrap_or_else(|_| Utc::now()),
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        message_count: r.get(7)?,
        next_sequence: r.get(8)?,
    })
}

const SESSION_COLUMNS: &str =
    "session_id, agent_name, user_id, status, created_at, updated_at, metadata, message_count, next_sequence";

/// Durable session + message store. One connection, serialized behind a
/// `Mutex`; all calls are dispatched to a blocking pool since rusqlite is
/// synchronous.
pub struct ColdTier {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id     TEXT PRIMARY KEY,
    agent_name     TEXT,
    user_id        TEXT,
    status         TEXT NOT NULL DEFAULT 'active',
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    metadata       TEXT NOT NULL DEFAULT '{}',
    message_count  INTEGER NOT NULL DEFAULT 0,
    next_sequence  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    id          TEXT NOT NULL,
    session_id  TEXT NOT NULL,
    sequence    INTEGER NOT NULL,
    message_type TEXT NOT NULL,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence),
    UNIQUE (session_id, sequence),
    FOREIGN KEY (session_id) REFERENCES sessions(session_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, sequence);
"#;

impl ColdTier {
    /// Open (creating if absent) a SQLite database at `path` and ensure the
    /// schema exists.
    pub fn open(path: impl AsRef<Path>) -> ColdResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> ColdResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn create_session(
        &self,
        session_id: &str,
        agent_name: Option<&str>,
        user_id: Option<&str>,
        metadata: Value,
    ) -> ColdResult<()> {
        let agent_name = agent_name.map(str::to_string);
        let user_id = user_id.map(str::to_string);
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (session_id, agent_name, user_id, status, created_at, updated_at, metadata, message_count, next_sequence)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?4, ?5, 0, 0)
                 ON CONFLICT(session_id) DO NOTHING",
                params![session_id, agent_name, user_id, now, metadata.to_string()],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> ColdResult<Option<SessionRow>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1"),
                    params![session_id],
                    parse_session_row,
                )
                .optional()?;
            Ok(row)
        })
        .await
    }

    /// List sessions ordered by most recently updated, for thread listing.
    pub async fn list_sessions(&self, limit: i64, offset: i64) -> ColdResult<Vec<SessionRow>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2"
            ))?;
            let rows = stmt.query_map(params![limit, offset], parse_session_row)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
    }

    /// Update a session's status (`active|closed|archived`) and bump `updated_at`.
    pub async fn set_status(&self, session_id: &str, status: &str) -> ColdResult<()> {
        let session_id = session_id.to_string();
        let status = status.to_string();
        self.with_conn(move |conn| {
            let now = Utc::now().to_rfc3339();
            let changed = conn.execute(
                "UPDATE sessions SET status = ?2, updated_at = ?3 WHERE session_id = ?1",
                params![session_id, status, now],
            )?;
            if changed == 0 {
                return Err(ColdTierError::SessionNotFound(session_id));
            }
            Ok(())
        })
        .await
    }

    /// Append messages, assigning each the next sequence number in a single
    /// transaction — the transaction boundary is what prevents two
    /// concurrent writers from being handed the same sequence number.
    pub async fn append_messages(&self, session_id: &str, messages: Vec<Message>) -> ColdResult<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let next_sequence: Option<i64> = tx
                .query_row(
                    "SELECT next_sequence FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?;
            let mut seq = next_sequence
                .ok_or_else(|| ColdTierError::SessionNotFound(session_id.clone()))?;
            let now = Utc::now().to_rfc3339();
            for m in &messages {
                tx.execute(
                    "INSERT INTO messages (id, session_id, sequence, message_type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![m.id().to_string(), session_id, seq, m.type_tag(), encode_message(m).to_string(), now],
                )?;
                seq += 1;
            }
            tx.execute(
                "UPDATE sessions SET next_sequence = ?2, updated_at = ?3, message_count = message_count + ?4 WHERE session_id = ?1",
                params![session_id, seq, now, messages.len() as i64],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn get_messages(&self, session_id: &str) -> ColdResult<Vec<Message>> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT payload FROM messages WHERE session_id = ?1 ORDER BY sequence ASC",
            )?;
            let rows = stmt.query_map(params![session_id], |r| r.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                let payload: String = row?;
                let value: Value = serde_json::from_str(&payload).map_err(crate::message::DecodeError::from)?;
                out.push(decode_message(&value)?);
            }
            Ok(out)
        })
        .await
    }

    /// Overwrite-style checkpoint: replace the full message log for
    /// `session_id` with `messages`, rather than appending. Used to
    /// reconcile a hot-tier snapshot into durable storage.
    pub async fn replace_messages(&self, session_id: &str, messages: Vec<Message>) -> ColdResult<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM sessions WHERE session_id = ?1",
                    params![session_id],
                    |r| r.get(0),
                )
                .optional()?;
            if exists.is_none() {
                return Err(ColdTierError::SessionNotFound(session_id));
            }
            tx.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
            let now = Utc::now().to_rfc3339();
            for (seq, m) in messages.iter().enumerate() {
                tx.execute(
                    "INSERT INTO messages (id, session_id, sequence, message_type, payload, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![m.id().to_string(), session_id, seq as i64, m.type_tag(), encode_message(m).to_string(), now],
                )?;
            }
            tx.execute(
                "UPDATE sessions SET next_sequence = ?2, updated_at = ?3, message_count = ?2 WHERE session_id = ?1",
                params![session_id, messages.len() as i64, now],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    pub async fn delete_session(&self, session_id: &str) -> ColdResult<()> {
        let session_id = session_id.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM messages WHERE session_id = ?1", params![session_id])?;
            conn.execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
            Ok(())
        })
        .await
    }

    async fn with_conn<F, T>(&self, f: F) -> ColdResult<T>
    where
        F: FnOnce(&mut Connection) -> ColdResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap();
            f(&mut guard)
        })
        .await?
    }
}
