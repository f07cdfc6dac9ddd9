//! SQLite-backed index store.
//!
//! One `sessions` table mirrors the manifest; nested manifest structures
//! (phase history, commits, artifacts, completed list) are stored as JSON text.
//! A connection is opened per operation on the blocking pool so async callers
//! never hold a connection across an await.

use super::{IndexStore, StoreError, StoreResult};
use crate::models::IndexRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const SELECT_COLUMNS: &str = "id, session_slug, project_id, title, description, session_type, \
     working_dir, session_dir, current_phase, status, phase_history, \
     checkpoints_total, checkpoints_completed, checkpoints_completed_list, current_checkpoint, \
     git_branch, git_worktree, git_base_branch, \
     spec_exists, plan_exists, plan_readable_exists, \
     commits, artifacts, manifest_updated_at";

#[derive(Debug, Clone)]
pub struct SqliteIndexStore {
    path: PathBuf,
}

impl SqliteIndexStore {
    /// Open (creating if needed) the database at `path` and ensure the schema
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let store = Self { path: path.into() };
        store.with_connection(init_schema)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&mut Connection) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut conn = open_connection(&self.path)?;
        op(&mut conn)
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.with_connection(op)).await?
    }
}

#[async_trait]
impl IndexStore for SqliteIndexStore {
    async fn get_by_slug(&self, slug: &str) -> StoreResult<Option<IndexRecord>> {
        let slug = slug.to_string();
        self.run(move |conn| select_by_slug(conn, &slug)).await
    }

    async fn create(&self, record: IndexRecord) -> StoreResult<IndexRecord> {
        self.run(move |conn| {
            // Immediate: concurrent creates of one slug serialize on the write lock
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            if select_by_slug(&tx, &record.session_slug)?.is_some() {
                return Err(StoreError::DuplicateSlug(record.session_slug));
            }
            insert_record(&tx, &record)?;
            tx.commit()?;
            Ok(record)
        })
        .await
    }

    async fn update(&self, id: Uuid, mut record: IndexRecord) -> StoreResult<IndexRecord> {
        record.id = id;
        self.run(move |conn| {
            let changed = update_record(conn, &record)?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }
            Ok(record)
        })
        .await
    }

    async fn list(&self) -> StoreResult<Vec<IndexRecord>> {
        self.run(|conn| {
            let sql = format!("SELECT {} FROM sessions ORDER BY session_slug ASC", SELECT_COLUMNS);
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([])?;

            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(read_record(row)?);
            }
            Ok(records)
        })
        .await
    }
}

// =============================================================================
// Schema and statements
// =============================================================================

fn open_connection(path: &Path) -> StoreResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;

    Ok(conn)
}

fn init_schema(conn: &mut Connection) -> StoreResult<()> {
    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            session_slug TEXT NOT NULL UNIQUE,
            project_id TEXT,
            title TEXT,
            description TEXT,
            session_type TEXT NOT NULL,
            working_dir TEXT NOT NULL,
            session_dir TEXT NOT NULL,
            current_phase TEXT NOT NULL,
            status TEXT NOT NULL,
            phase_history TEXT NOT NULL,
            checkpoints_total INTEGER NOT NULL DEFAULT 0,
            checkpoints_completed INTEGER NOT NULL DEFAULT 0,
            checkpoints_completed_list TEXT NOT NULL,
            current_checkpoint INTEGER,
            git_branch TEXT,
            git_worktree TEXT,
            git_base_branch TEXT,
            spec_exists INTEGER NOT NULL DEFAULT 0,
            plan_exists INTEGER NOT NULL DEFAULT 0,
            plan_readable_exists INTEGER NOT NULL DEFAULT 0,
            commits TEXT NOT NULL,
            artifacts TEXT NOT NULL,
            manifest_updated_at TEXT
         );
         CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_id);
         CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
         COMMIT;",
    )?;
    Ok(())
}

fn select_by_slug(conn: &Connection, slug: &str) -> StoreResult<Option<IndexRecord>> {
    let sql = format!("SELECT {} FROM sessions WHERE session_slug = ?1", SELECT_COLUMNS);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![slug])?;
    match rows.next()? {
        Some(row) => Ok(Some(read_record(row)?)),
        None => Ok(None),
    }
}

fn insert_record(conn: &Connection, record: &IndexRecord) -> StoreResult<()> {
    let encoded = Encoded::new(record)?;
    conn.execute(
        "INSERT INTO sessions (
            id, session_slug, project_id, title, description, session_type,
            working_dir, session_dir, current_phase, status, phase_history,
            checkpoints_total, checkpoints_completed, checkpoints_completed_list, current_checkpoint,
            git_branch, git_worktree, git_base_branch,
            spec_exists, plan_exists, plan_readable_exists,
            commits, artifacts, manifest_updated_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                   ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
        params![
            record.id.to_string(),
            record.session_slug,
            record.project_id.map(|id| id.to_string()),
            record.title,
            record.description,
            record.session_type.as_str(),
            record.working_dir,
            record.session_dir,
            record.current_phase.as_str(),
            record.status.as_str(),
            encoded.phase_history,
            record.checkpoints_total,
            record.checkpoints_completed,
            encoded.checkpoints_completed_list,
            record.current_checkpoint,
            record.git_branch,
            record.git_worktree,
            record.git_base_branch,
            record.spec_exists,
            record.plan_exists,
            record.plan_readable_exists,
            encoded.commits,
            encoded.artifacts,
            record.manifest_updated_at.map(|at| at.to_rfc3339()),
        ],
    )?;
    Ok(())
}

fn update_record(conn: &Connection, record: &IndexRecord) -> StoreResult<usize> {
    let encoded = Encoded::new(record)?;
    let changed = conn.execute(
        "UPDATE sessions SET
            session_slug = ?2, project_id = ?3, title = ?4, description = ?5, session_type = ?6,
            working_dir = ?7, session_dir = ?8, current_phase = ?9, status = ?10,
            phase_history = ?11, checkpoints_total = ?12, checkpoints_completed = ?13,
            checkpoints_completed_list = ?14, current_checkpoint = ?15,
            git_branch = ?16, git_worktree = ?17, git_base_branch = ?18,
            spec_exists = ?19, plan_exists = ?20, plan_readable_exists = ?21,
            commits = ?22, artifacts = ?23, manifest_updated_at = ?24
         WHERE id = ?1",
        params![
            record.id.to_string(),
            record.session_slug,
            record.project_id.map(|id| id.to_string()),
            record.title,
            record.description,
            record.session_type.as_str(),
            record.working_dir,
            record.session_dir,
            record.current_phase.as_str(),
            record.status.as_str(),
            encoded.phase_history,
            record.checkpoints_total,
            record.checkpoints_completed,
            encoded.checkpoints_completed_list,
            record.current_checkpoint,
            record.git_branch,
            record.git_worktree,
            record.git_base_branch,
            record.spec_exists,
            record.plan_exists,
            record.plan_readable_exists,
            encoded.commits,
            encoded.artifacts,
            record.manifest_updated_at.map(|at| at.to_rfc3339()),
        ],
    )?;
    Ok(changed)
}

/// JSON-encoded nested columns
struct Encoded {
    phase_history: String,
    checkpoints_completed_list: String,
    commits: String,
    artifacts: String,
}

impl Encoded {
    fn new(record: &IndexRecord) -> StoreResult<Self> {
        Ok(Self {
            phase_history: serde_json::to_string(&record.phase_history)?,
            checkpoints_completed_list: serde_json::to_string(&record.checkpoints_completed_list)?,
            commits: serde_json::to_string(&record.commits)?,
            artifacts: serde_json::to_string(&record.artifacts)?,
        })
    }
}

fn read_record(row: &Row<'_>) -> StoreResult<IndexRecord> {
    let id: String = row.get("id")?;
    let project_id: Option<String> = row.get("project_id")?;
    let session_type: String = row.get("session_type")?;
    let current_phase: String = row.get("current_phase")?;
    let status: String = row.get("status")?;
    let phase_history: String = row.get("phase_history")?;
    let completed_list: String = row.get("checkpoints_completed_list")?;
    let commits: String = row.get("commits")?;
    let artifacts: String = row.get("artifacts")?;
    let manifest_updated_at: Option<String> = row.get("manifest_updated_at")?;

    Ok(IndexRecord {
        id: parse_uuid(&id)?,
        session_slug: row.get("session_slug")?,
        project_id: project_id.as_deref().map(parse_uuid).transpose()?,
        title: row.get("title")?,
        description: row.get("description")?,
        session_type: session_type.parse().map_err(StoreError::Corrupt)?,
        working_dir: row.get("working_dir")?,
        session_dir: row.get("session_dir")?,
        current_phase: current_phase.parse().map_err(StoreError::Corrupt)?,
        status: status.parse().map_err(StoreError::Corrupt)?,
        phase_history: serde_json::from_str(&phase_history)?,
        checkpoints_total: row.get("checkpoints_total")?,
        checkpoints_completed: row.get("checkpoints_completed")?,
        checkpoints_completed_list: serde_json::from_str(&completed_list)?,
        current_checkpoint: row.get("current_checkpoint")?,
        git_branch: row.get("git_branch")?,
        git_worktree: row.get("git_worktree")?,
        git_base_branch: row.get("git_base_branch")?,
        spec_exists: row.get("spec_exists")?,
        plan_exists: row.get("plan_exists")?,
        plan_readable_exists: row.get("plan_readable_exists")?,
        commits: serde_json::from_str(&commits)?,
        artifacts: serde_json::from_str(&artifacts)?,
        manifest_updated_at: manifest_updated_at.map(parse_rfc3339).transpose()?,
    })
}

fn parse_uuid(value: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| StoreError::Corrupt(format!("bad id '{}': {}", value, err)))
}

fn parse_rfc3339(value: String) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Corrupt(format!("bad timestamp '{}': {}", value, err)))
}
