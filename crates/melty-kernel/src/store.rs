//! SQLite persistence for tasks.
//!
//! A task's persisted form IS its dehydrated form: everything needed to
//! rebuild a [`TaskSnapshot`] with phase `Dehydrated`. Conversations are
//! normalized into a `joules` table; the focused-file list and per-joule
//! changesets are small and stay as JSON columns.

use std::path::Path;

use rusqlite::{params, Connection};

use melty_types::changeset::Changeset;
use melty_types::conversation::{Conversation, Joule, JouleAuthor};
use melty_types::ids::TaskId;
use melty_types::task::{TaskMode, TaskPhase, TaskSnapshot};

/// Errors from the task store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    mode        TEXT NOT NULL,
    branch      TEXT,
    melty_files TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    updated_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS joules (
    task_id    TEXT NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
    order_idx  INTEGER NOT NULL,
    author     TEXT NOT NULL,
    text       TEXT NOT NULL,
    changeset  TEXT,
    commit_id  TEXT,
    complete   INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (task_id, order_idx)
);

CREATE INDEX IF NOT EXISTS idx_joules_task ON joules(task_id);
CREATE INDEX IF NOT EXISTS idx_tasks_updated ON tasks(updated_at);
"#;

/// SQLite-backed task store.
pub struct TaskStore {
    conn: Connection,
}

impl TaskStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // =========================================================================
    // Task CRUD
    // =========================================================================

    /// Save a task (insert or replace). The stored phase is always
    /// `Dehydrated`; live phases are runtime-only.
    pub fn save(&self, snapshot: &TaskSnapshot) -> StoreResult<()> {
        let id = snapshot.id.to_string();
        let melty_files = serde_json::to_string(&snapshot.melty_files)?;

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT OR REPLACE INTO tasks (id, name, mode, branch, melty_files, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                snapshot.name,
                snapshot.mode.to_string(),
                snapshot.branch,
                melty_files,
                snapshot.created_at as i64,
                snapshot.updated_at as i64,
            ],
        )?;

        tx.execute("DELETE FROM joules WHERE task_id = ?1", params![id])?;
        for (order_idx, joule) in snapshot.conversation.joules.iter().enumerate() {
            let changeset = joule
                .changeset
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            tx.execute(
                "INSERT INTO joules (task_id, order_idx, author, text, changeset, commit_id, complete, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    order_idx as i64,
                    joule.author.to_string(),
                    joule.text,
                    changeset,
                    joule.commit,
                    joule.complete as i32,
                    joule.created_at as i64,
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    /// Load one task, or `None` if it was never saved.
    pub fn load(&self, id: TaskId) -> StoreResult<Option<TaskSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, mode, branch, melty_files, created_at, updated_at
             FROM tasks WHERE id = ?1",
        )?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let snapshot = self.row_to_snapshot(row)?;
        Ok(Some(snapshot))
    }

    /// Load every task, most recently updated first.
    pub fn load_all(&self) -> StoreResult<Vec<TaskSnapshot>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, mode, branch, melty_files, created_at, updated_at
             FROM tasks ORDER BY updated_at DESC",
        )?;
        let mut rows = stmt.query([])?;
        let mut snapshots = Vec::new();
        while let Some(row) = rows.next()? {
            snapshots.push(self.row_to_snapshot(row)?);
        }
        Ok(snapshots)
    }

    /// Delete a task and its joules. Returns whether a row existed.
    pub fn delete(&self, id: TaskId) -> StoreResult<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
        Ok(affected > 0)
    }

    // =========================================================================
    // Row conversion
    // =========================================================================

    fn row_to_snapshot(&self, row: &rusqlite::Row<'_>) -> StoreResult<TaskSnapshot> {
        let id_str: String = row.get(0)?;
        let name: String = row.get(1)?;
        let mode_str: String = row.get(2)?;
        let branch: Option<String> = row.get(3)?;
        let melty_files_json: String = row.get(4)?;
        let created_at: i64 = row.get(5)?;
        let updated_at: i64 = row.get(6)?;

        let id = TaskId::parse(&id_str)
            .map_err(|_| StoreError::Corrupt(format!("bad task id: {id_str}")))?;
        let mode: TaskMode = mode_str
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("unknown task mode: {mode_str}")))?;
        let melty_files: Vec<String> = serde_json::from_str(&melty_files_json)?;

        Ok(TaskSnapshot {
            id,
            name,
            mode,
            phase: TaskPhase::Dehydrated,
            conversation: self.load_conversation(&id_str)?,
            melty_files,
            branch,
            created_at: created_at as u64,
            updated_at: updated_at as u64,
        })
    }

    fn load_conversation(&self, task_id: &str) -> StoreResult<Conversation> {
        let mut stmt = self.conn.prepare(
            "SELECT author, text, changeset, commit_id, complete, created_at
             FROM joules WHERE task_id = ?1 ORDER BY order_idx",
        )?;
        let mut rows = stmt.query(params![task_id])?;
        let mut joules = Vec::new();
        while let Some(row) = rows.next()? {
            let author_str: String = row.get(0)?;
            let text: String = row.get(1)?;
            let changeset_json: Option<String> = row.get(2)?;
            let commit: Option<String> = row.get(3)?;
            let complete: i32 = row.get(4)?;
            let created_at: i64 = row.get(5)?;

            let author = match author_str.as_str() {
                "human" => JouleAuthor::Human,
                "bot" => JouleAuthor::Bot,
                "error" => JouleAuthor::Error,
                other => {
                    return Err(StoreError::Corrupt(format!("unknown joule author: {other}")))
                }
            };
            let changeset: Option<Changeset> = changeset_json
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?;

            joules.push(Joule {
                author,
                text,
                changeset,
                commit,
                complete: complete != 0,
                created_at: created_at as u64,
            });
        }
        Ok(Conversation { joules })
    }
}
