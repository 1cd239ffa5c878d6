// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 Quay Contributors

//! Single-file SQLite persistence: projects, sessions, buffer snapshots,
//! and notes. One connection in WAL mode behind an async mutex; every
//! buffer flush is a single transaction.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

/// Durable store shared by the session manager and the buffer engine.
///
/// Failure to open the store at startup is fatal; all later failures are
/// surfaced to callers, logged, and retried on the next tick.
pub struct Store {
    conn: Mutex<Connection>,
}

/// A persisted project row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectRecord {
    pub id: String,
    pub name: String,
    pub path: String,
    pub created_at: u64,
}

/// A persisted session row. The descriptor and metadata are serialized JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub kind: String,
    pub project_id: String,
    pub status: String,
    pub descriptor: String,
    pub created_at: u64,
    pub updated_at: u64,
    pub last_active_at: u64,
    pub exit_code: Option<i32>,
    pub metadata: String,
}

/// A persisted scrollback snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferRecord {
    pub session_id: String,
    pub content: String,
    pub total_lines: u64,
    pub last_flush_at: u64,
}

/// A persisted note row.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    pub id: String,
    pub project_id: String,
    pub body: String,
    pub created_at: u64,
}

impl Store {
    /// Open (or create) the store file and ensure all tables exist.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        create_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        create_tables(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // -- projects -----------------------------------------------------------

    pub async fn upsert_project(&self, record: &ProjectRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO projects (id, name, path, created_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET name = ?2, path = ?3",
            params![record.id, record.name, record.path, record.created_at],
        )?;
        Ok(())
    }

    pub async fn get_project(&self, id: &str) -> anyhow::Result<Option<ProjectRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, name, path, created_at FROM projects WHERE id = ?1",
                params![id],
                |row| {
                    Ok(ProjectRecord {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        path: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub async fn list_projects(&self) -> anyhow::Result<Vec<ProjectRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT id, name, path, created_at FROM projects ORDER BY created_at")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProjectRecord {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    path: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete a project and its notes. Sessions are terminated by the
    /// session manager before this is called.
    pub async fn delete_project(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM notes WHERE project_id = ?1", params![id])?;
        let n = conn.execute("DELETE FROM projects WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // -- sessions -----------------------------------------------------------

    pub async fn upsert_session(&self, record: &SessionRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions
               (id, kind, project_id, status, descriptor, created_at, updated_at,
                last_active_at, exit_code, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
               status = ?4, descriptor = ?5, updated_at = ?7,
               last_active_at = ?8, exit_code = ?9, metadata = ?10",
            params![
                record.id,
                record.kind,
                record.project_id,
                record.status,
                record.descriptor,
                record.created_at,
                record.updated_at,
                record.last_active_at,
                record.exit_code,
                record.metadata,
            ],
        )?;
        Ok(())
    }

    pub async fn load_sessions(&self) -> anyhow::Result<Vec<SessionRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, kind, project_id, status, descriptor, created_at, updated_at,
                    last_active_at, exit_code, metadata
             FROM sessions ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SessionRecord {
                    id: row.get(0)?,
                    kind: row.get(1)?,
                    project_id: row.get(2)?,
                    status: row.get(3)?,
                    descriptor: row.get(4)?,
                    created_at: row.get(5)?,
                    updated_at: row.get(6)?,
                    last_active_at: row.get(7)?,
                    exit_code: row.get(8)?,
                    metadata: row.get(9)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn delete_session(&self, id: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM buffers WHERE session_id = ?1", params![id])?;
        let n = conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(n > 0)
    }

    // -- buffers ------------------------------------------------------------

    /// Persist one session's scrollback as a single transaction.
    pub async fn save_buffer(&self, record: &BufferRecord) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO buffers (session_id, content, total_lines, last_flush_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
               content = ?2, total_lines = ?3, last_flush_at = ?4",
            params![record.session_id, record.content, record.total_lines, record.last_flush_at],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub async fn load_buffer(&self, session_id: &str) -> anyhow::Result<Option<BufferRecord>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT session_id, content, total_lines, last_flush_at
                 FROM buffers WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(BufferRecord {
                        session_id: row.get(0)?,
                        content: row.get(1)?,
                        total_lines: row.get(2)?,
                        last_flush_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -- notes --------------------------------------------------------------

    pub async fn add_note(&self, record: &NoteRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO notes (id, project_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![record.id, record.project_id, record.body, record.created_at],
        )?;
        Ok(())
    }

    pub async fn list_notes(&self, project_id: &str) -> anyhow::Result<Vec<NoteRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, project_id, body, created_at FROM notes
             WHERE project_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt
            .query_map(params![project_id], |row| {
                Ok(NoteRecord {
                    id: row.get(0)?,
                    project_id: row.get(1)?,
                    body: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn create_tables(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS projects (
            id          TEXT PRIMARY KEY,
            name        TEXT NOT NULL,
            path        TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sessions (
            id              TEXT PRIMARY KEY,
            kind            TEXT NOT NULL,
            project_id      TEXT NOT NULL,
            status          TEXT NOT NULL,
            descriptor      TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            updated_at      INTEGER NOT NULL,
            last_active_at  INTEGER NOT NULL,
            exit_code       INTEGER,
            metadata        TEXT NOT NULL DEFAULT '{}'
        );

        CREATE TABLE IF NOT EXISTS buffers (
            session_id     TEXT PRIMARY KEY,
            content        TEXT NOT NULL,
            total_lines    INTEGER NOT NULL,
            last_flush_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notes (
            id          TEXT PRIMARY KEY,
            project_id  TEXT NOT NULL,
            body        TEXT NOT NULL,
            created_at  INTEGER NOT NULL
        );
        ",
    )
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
