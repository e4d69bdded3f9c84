use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::Catalog;
use super::crypto::SecretBox;
use super::models::*;
use crate::errors::CatalogError;

/// Async-safe SQLite catalog.
///
/// Wraps `CatalogDb` behind `Arc<Mutex>` and runs every query on tokio's
/// blocking pool so SQLite I/O never stalls async worker threads.
#[derive(Clone)]
pub struct SqliteCatalog {
    inner: Arc<std::sync::Mutex<CatalogDb>>,
}

impl SqliteCatalog {
    pub fn new(db: CatalogDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open (or create) the catalog file.
    pub fn open(path: &Path, secret: &str) -> Result<Self> {
        Ok(Self::new(CatalogDb::new(path, SecretBox::new(secret))?))
    }

    /// In-memory catalog without encryption (for tests).
    pub fn new_in_memory() -> Result<Self> {
        Ok(Self::new(CatalogDb::new_in_memory(SecretBox::new(""))?))
    }

    /// Run a closure against the database on a blocking thread.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&CatalogDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|_| CatalogError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .context("Catalog task panicked")?
    }
}

pub struct CatalogDb {
    conn: Connection,
    secrets: SecretBox,
}

impl CatalogDb {
    pub fn new(path: &Path, secrets: SecretBox) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open catalog at {}", path.display()))?;
        let db = Self { conn, secrets };
        db.init()?;
        Ok(db)
    }

    pub fn new_in_memory(secrets: SecretBox) -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn, secrets };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS projects (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL DEFAULT '',
                    repository_url TEXT NOT NULL,
                    repository_login TEXT NOT NULL DEFAULT '',
                    repository_password TEXT NOT NULL DEFAULT '',
                    repository_branch TEXT NOT NULL DEFAULT 'master',
                    inventory TEXT NOT NULL DEFAULT 'main.yml',
                    inventory_list TEXT NOT NULL DEFAULT '[]',
                    variables TEXT NOT NULL DEFAULT '',
                    variables_list TEXT NOT NULL DEFAULT '[]',
                    variables_main INTEGER NOT NULL DEFAULT 0,
                    variables_vault INTEGER NOT NULL DEFAULT 0,
                    vault_password TEXT NOT NULL DEFAULT '',
                    collections_list TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS playbooks (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    filename TEXT NOT NULL,
                    name TEXT NOT NULL DEFAULT '',
                    description TEXT NOT NULL DEFAULT '',
                    locked INTEGER NOT NULL DEFAULT 0,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS project_updates (
                    id TEXT PRIMARY KEY,
                    project_id TEXT NOT NULL REFERENCES projects(id),
                    date TEXT NOT NULL,
                    success INTEGER NOT NULL,
                    revision TEXT NOT NULL,
                    log TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS playbook_runs (
                    id TEXT PRIMARY KEY,
                    playbook_id TEXT NOT NULL REFERENCES playbooks(id),
                    user_id TEXT NOT NULL,
                    mode TEXT NOT NULL,
                    start_time TEXT NOT NULL,
                    finish_time TEXT,
                    result TEXT NOT NULL,
                    inventory_file TEXT NOT NULL DEFAULT '',
                    variables_file TEXT NOT NULL DEFAULT '',
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS run_results (
                    id TEXT PRIMARY KEY,
                    run_id TEXT NOT NULL REFERENCES playbook_runs(id),
                    output TEXT NOT NULL DEFAULT '',
                    error TEXT NOT NULL DEFAULT '',
                    deleted INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_playbooks_project ON playbooks(project_id);
                CREATE INDEX IF NOT EXISTS idx_project_updates_project ON project_updates(project_id, date);
                CREATE INDEX IF NOT EXISTS idx_playbook_runs_playbook ON playbook_runs(playbook_id, start_time);
                CREATE INDEX IF NOT EXISTS idx_run_results_run ON run_results(run_id);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Projects ──────────────────────────────────────────────────────

    const PROJECT_COLUMNS: &'static str = "id, name, description, repository_url, repository_login,
        repository_password, repository_branch, inventory, inventory_list, variables,
        variables_list, variables_main, variables_vault, vault_password, collections_list,
        created_at";

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE deleted = 0 ORDER BY name, id",
            Self::PROJECT_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], ProjectRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter()
            .map(|r| r.into_project(&self.secrets))
            .collect()
    }

    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let sql = format!(
            "SELECT {} FROM projects WHERE id = ?1 AND deleted = 0",
            Self::PROJECT_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![id], ProjectRow::read)
            .optional()?;
        row.map(|r| r.into_project(&self.secrets)).transpose()
    }

    pub fn insert_project(&self, p: &Project) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO projects (id, name, description, repository_url, repository_login,
                    repository_password, repository_branch, inventory, inventory_list, variables,
                    variables_list, variables_main, variables_vault, vault_password,
                    collections_list, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    p.id,
                    p.name,
                    p.description,
                    p.repository_url,
                    p.repository_login,
                    self.secrets.encrypt(&p.repository_password)?,
                    p.repository_branch,
                    p.inventory,
                    to_json(&p.inventory_list)?,
                    p.variables,
                    to_json(&p.variables_list)?,
                    p.variables_main,
                    p.variables_vault,
                    self.secrets.encrypt(&p.vault_password)?,
                    to_json(&p.collections_list)?,
                    ts(&p.created_at),
                ],
            )
            .with_context(|| format!("Failed to insert project {}", p.id))?;
        Ok(())
    }

    pub fn update_project(&self, p: &Project) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE projects SET name = ?2, description = ?3, repository_url = ?4,
                repository_login = ?5, repository_password = ?6, repository_branch = ?7,
                inventory = ?8, inventory_list = ?9, variables = ?10, variables_list = ?11,
                variables_main = ?12, variables_vault = ?13, vault_password = ?14,
                collections_list = ?15
             WHERE id = ?1 AND deleted = 0",
            params![
                p.id,
                p.name,
                p.description,
                p.repository_url,
                p.repository_login,
                self.secrets.encrypt(&p.repository_password)?,
                p.repository_branch,
                p.inventory,
                to_json(&p.inventory_list)?,
                p.variables,
                to_json(&p.variables_list)?,
                p.variables_main,
                p.variables_vault,
                self.secrets.encrypt(&p.vault_password)?,
                to_json(&p.collections_list)?,
            ],
        )?;
        ensure_changed(changed, "Project", &p.id)
    }

    pub fn delete_project(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE projects SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        ensure_changed(changed, "Project", id)
    }

    pub fn project_has_locked_playbooks(&self, project_id: &str) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM playbooks WHERE project_id = ?1 AND locked = 1 AND deleted = 0",
            params![project_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // ── Playbooks ─────────────────────────────────────────────────────

    pub fn list_playbooks(&self, project_id: &str) -> Result<Vec<Playbook>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, filename, name, description, locked FROM playbooks
             WHERE project_id = ?1 AND deleted = 0 ORDER BY name, filename",
        )?;
        let playbooks = stmt
            .query_map(params![project_id], read_playbook)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playbooks)
    }

    pub fn get_playbook(&self, id: &str) -> Result<Option<Playbook>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, project_id, filename, name, description, locked FROM playbooks
                 WHERE id = ?1 AND deleted = 0",
                params![id],
                read_playbook,
            )
            .optional()?)
    }

    pub fn insert_playbook(&self, b: &Playbook) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO playbooks (id, project_id, filename, name, description, locked)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![b.id, b.project_id, b.filename, b.name, b.description, b.locked],
            )
            .with_context(|| format!("Failed to insert playbook {}", b.filename))?;
        Ok(())
    }

    pub fn update_playbook(&self, b: &Playbook) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE playbooks SET filename = ?2, name = ?3, description = ?4
             WHERE id = ?1 AND deleted = 0",
            params![b.id, b.filename, b.name, b.description],
        )?;
        ensure_changed(changed, "Playbook", &b.id)
    }

    pub fn delete_playbook(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE playbooks SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        ensure_changed(changed, "Playbook", id)
    }

    pub fn set_playbook_lock(&self, id: &str, locked: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE playbooks SET locked = ?2 WHERE id = ?1 AND deleted = 0",
            params![id, locked],
        )?;
        ensure_changed(changed, "Playbook", id)
    }

    pub fn try_lock_playbook(&self, id: &str) -> Result<bool> {
        let changed = self.conn.execute(
            "UPDATE playbooks SET locked = 1 WHERE id = ?1 AND locked = 0 AND deleted = 0",
            params![id],
        )?;
        Ok(changed == 1)
    }

    // ── Project updates ───────────────────────────────────────────────

    pub fn insert_project_update(&self, u: &ProjectUpdate) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO project_updates (id, project_id, date, success, revision, log)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![u.id, u.project_id, ts(&u.date), u.success, u.revision, u.log],
            )
            .with_context(|| format!("Failed to insert update for project {}", u.project_id))?;
        Ok(())
    }

    pub fn list_project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, date, success, revision, log FROM project_updates
             WHERE project_id = ?1 AND deleted = 0 ORDER BY date DESC, rowid DESC",
        )?;
        let rows = stmt
            .query_map(params![project_id], ProjectUpdateRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ProjectUpdateRow::into_update).collect()
    }

    pub fn latest_project_update(&self, project_id: &str) -> Result<Option<ProjectUpdate>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, project_id, date, success, revision, log FROM project_updates
                 WHERE project_id = ?1 AND deleted = 0 ORDER BY date DESC, rowid DESC LIMIT 1",
                params![project_id],
                ProjectUpdateRow::read,
            )
            .optional()?;
        row.map(ProjectUpdateRow::into_update).transpose()
    }

    pub fn delete_project_update(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE project_updates SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        ensure_changed(changed, "Project update", id)
    }

    // ── Runs ──────────────────────────────────────────────────────────

    const RUN_COLUMNS: &'static str = "id, playbook_id, user_id, mode, start_time, finish_time,
        result, inventory_file, variables_file";

    pub fn insert_run(&self, r: &PlaybookRun) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO playbook_runs (id, playbook_id, user_id, mode, start_time,
                    finish_time, result, inventory_file, variables_file)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    r.id,
                    r.playbook_id,
                    r.user_id,
                    r.mode.as_str(),
                    ts(&r.start_time),
                    r.finish_time.as_ref().map(ts),
                    r.result.as_str(),
                    r.inventory_file,
                    r.variables_file,
                ],
            )
            .with_context(|| format!("Failed to insert run for playbook {}", r.playbook_id))?;
        Ok(())
    }

    pub fn update_run(&self, r: &PlaybookRun) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE playbook_runs SET finish_time = ?2, result = ?3 WHERE id = ?1 AND deleted = 0",
            params![r.id, r.finish_time.as_ref().map(ts), r.result.as_str()],
        )?;
        ensure_changed(changed, "Run", &r.id)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<PlaybookRun>> {
        let sql = format!(
            "SELECT {} FROM playbook_runs WHERE id = ?1 AND deleted = 0",
            Self::RUN_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![id], RunRow::read)
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn latest_run(&self, playbook_id: &str) -> Result<Option<PlaybookRun>> {
        let sql = format!(
            "SELECT {} FROM playbook_runs WHERE playbook_id = ?1 AND deleted = 0
             ORDER BY start_time DESC, rowid DESC LIMIT 1",
            Self::RUN_COLUMNS
        );
        let row = self
            .conn
            .query_row(&sql, params![playbook_id], RunRow::read)
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    pub fn list_runs(&self, playbook_id: &str) -> Result<Vec<PlaybookRun>> {
        let sql = format!(
            "SELECT {} FROM playbook_runs WHERE playbook_id = ?1 AND deleted = 0
             ORDER BY start_time DESC, rowid DESC",
            Self::RUN_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![playbook_id], RunRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RunRow::into_run).collect()
    }

    pub fn delete_run(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE playbook_runs SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        ensure_changed(changed, "Run", id)
    }

    // ── Results ───────────────────────────────────────────────────────

    pub fn insert_run_result(&self, r: &RunResult) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO run_results (id, run_id, output, error) VALUES (?1, ?2, ?3, ?4)",
                params![r.id, r.run_id, r.output, r.error],
            )
            .with_context(|| format!("Failed to insert result for run {}", r.run_id))?;
        Ok(())
    }

    pub fn get_run_result(&self, run_id: &str) -> Result<Option<RunResult>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, run_id, output, error FROM run_results
                 WHERE run_id = ?1 AND deleted = 0",
                params![run_id],
                |row| {
                    Ok(RunResult {
                        id: row.get(0)?,
                        run_id: row.get(1)?,
                        output: row.get(2)?,
                        error: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn delete_run_result(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE run_results SET deleted = 1 WHERE id = ?1 AND deleted = 0",
            params![id],
        )?;
        ensure_changed(changed, "Run result", id)
    }
}

// ── Catalog trait ─────────────────────────────────────────────────────

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        self.call(|db| db.list_projects()).await
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let id = id.to_string();
        self.call(move |db| db.get_project(&id)).await
    }

    async fn insert_project(&self, project: &Project) -> Result<()> {
        let project = project.clone();
        self.call(move |db| db.insert_project(&project)).await
    }

    async fn update_project(&self, project: &Project) -> Result<()> {
        let project = project.clone();
        self.call(move |db| db.update_project(&project)).await
    }

    async fn delete_project(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.delete_project(&id)).await
    }

    async fn project_has_locked_playbooks(&self, project_id: &str) -> Result<bool> {
        let id = project_id.to_string();
        self.call(move |db| db.project_has_locked_playbooks(&id)).await
    }

    async fn list_playbooks(&self, project_id: &str) -> Result<Vec<Playbook>> {
        let id = project_id.to_string();
        self.call(move |db| db.list_playbooks(&id)).await
    }

    async fn get_playbook(&self, id: &str) -> Result<Option<Playbook>> {
        let id = id.to_string();
        self.call(move |db| db.get_playbook(&id)).await
    }

    async fn insert_playbook(&self, playbook: &Playbook) -> Result<()> {
        let playbook = playbook.clone();
        self.call(move |db| db.insert_playbook(&playbook)).await
    }

    async fn update_playbook(&self, playbook: &Playbook) -> Result<()> {
        let playbook = playbook.clone();
        self.call(move |db| db.update_playbook(&playbook)).await
    }

    async fn delete_playbook(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.delete_playbook(&id)).await
    }

    async fn set_playbook_lock(&self, id: &str, locked: bool) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.set_playbook_lock(&id, locked)).await
    }

    async fn try_lock_playbook(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.call(move |db| db.try_lock_playbook(&id)).await
    }

    async fn insert_project_update(&self, update: &ProjectUpdate) -> Result<()> {
        let update = update.clone();
        self.call(move |db| db.insert_project_update(&update)).await
    }

    async fn list_project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>> {
        let id = project_id.to_string();
        self.call(move |db| db.list_project_updates(&id)).await
    }

    async fn latest_project_update(&self, project_id: &str) -> Result<Option<ProjectUpdate>> {
        let id = project_id.to_string();
        self.call(move |db| db.latest_project_update(&id)).await
    }

    async fn delete_project_update(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.delete_project_update(&id)).await
    }

    async fn insert_run(&self, run: &PlaybookRun) -> Result<()> {
        let run = run.clone();
        self.call(move |db| db.insert_run(&run)).await
    }

    async fn update_run(&self, run: &PlaybookRun) -> Result<()> {
        let run = run.clone();
        self.call(move |db| db.update_run(&run)).await
    }

    async fn get_run(&self, id: &str) -> Result<Option<PlaybookRun>> {
        let id = id.to_string();
        self.call(move |db| db.get_run(&id)).await
    }

    async fn latest_run(&self, playbook_id: &str) -> Result<Option<PlaybookRun>> {
        let id = playbook_id.to_string();
        self.call(move |db| db.latest_run(&id)).await
    }

    async fn list_runs(&self, playbook_id: &str) -> Result<Vec<PlaybookRun>> {
        let id = playbook_id.to_string();
        self.call(move |db| db.list_runs(&id)).await
    }

    async fn delete_run(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.delete_run(&id)).await
    }

    async fn insert_run_result(&self, result: &RunResult) -> Result<()> {
        let result = result.clone();
        self.call(move |db| db.insert_run_result(&result)).await
    }

    async fn get_run_result(&self, run_id: &str) -> Result<Option<RunResult>> {
        let id = run_id.to_string();
        self.call(move |db| db.get_run_result(&id)).await
    }

    async fn delete_run_result(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.call(move |db| db.delete_run_result(&id)).await
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("Invalid timestamp '{}'", s))?
        .with_timezone(&Utc))
}

fn to_json(list: &[String]) -> Result<String> {
    serde_json::to_string(list).context("Failed to encode list")
}

fn from_json(s: &str) -> Result<Vec<String>> {
    serde_json::from_str(s).with_context(|| format!("Invalid list column '{}'", s))
}

fn ensure_changed(changed: usize, entity: &'static str, id: &str) -> Result<()> {
    if changed == 0 {
        return Err(CatalogError::NotFound {
            entity,
            id: id.to_string(),
        }
        .into());
    }
    Ok(())
}

fn read_playbook(row: &Row<'_>) -> rusqlite::Result<Playbook> {
    Ok(Playbook {
        id: row.get(0)?,
        project_id: row.get(1)?,
        filename: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        locked: row.get(5)?,
    })
}

/// Raw `projects` row before list decoding and secret decryption.
struct ProjectRow {
    id: String,
    name: String,
    description: String,
    repository_url: String,
    repository_login: String,
    repository_password: String,
    repository_branch: String,
    inventory: String,
    inventory_list: String,
    variables: String,
    variables_list: String,
    variables_main: bool,
    variables_vault: bool,
    vault_password: String,
    collections_list: String,
    created_at: String,
}

impl ProjectRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            repository_url: row.get(3)?,
            repository_login: row.get(4)?,
            repository_password: row.get(5)?,
            repository_branch: row.get(6)?,
            inventory: row.get(7)?,
            inventory_list: row.get(8)?,
            variables: row.get(9)?,
            variables_list: row.get(10)?,
            variables_main: row.get(11)?,
            variables_vault: row.get(12)?,
            vault_password: row.get(13)?,
            collections_list: row.get(14)?,
            created_at: row.get(15)?,
        })
    }

    fn into_project(self, secrets: &SecretBox) -> Result<Project> {
        Ok(Project {
            repository_password: secrets
                .decrypt(&self.repository_password)
                .with_context(|| format!("Project {} repository password", self.id))?,
            vault_password: secrets
                .decrypt(&self.vault_password)
                .with_context(|| format!("Project {} vault password", self.id))?,
            inventory_list: from_json(&self.inventory_list)?,
            variables_list: from_json(&self.variables_list)?,
            collections_list: from_json(&self.collections_list)?,
            created_at: parse_ts(&self.created_at)?,
            id: self.id,
            name: self.name,
            description: self.description,
            repository_url: self.repository_url,
            repository_login: self.repository_login,
            repository_branch: self.repository_branch,
            inventory: self.inventory,
            variables: self.variables,
            variables_main: self.variables_main,
            variables_vault: self.variables_vault,
        })
    }
}

struct ProjectUpdateRow {
    id: String,
    project_id: String,
    date: String,
    success: bool,
    revision: String,
    log: String,
}

impl ProjectUpdateRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            project_id: row.get(1)?,
            date: row.get(2)?,
            success: row.get(3)?,
            revision: row.get(4)?,
            log: row.get(5)?,
        })
    }

    fn into_update(self) -> Result<ProjectUpdate> {
        Ok(ProjectUpdate {
            date: parse_ts(&self.date)?,
            id: self.id,
            project_id: self.project_id,
            success: self.success,
            revision: self.revision,
            log: self.log,
        })
    }
}

struct RunRow {
    id: String,
    playbook_id: String,
    user_id: String,
    mode: String,
    start_time: String,
    finish_time: Option<String>,
    result: String,
    inventory_file: String,
    variables_file: String,
}

impl RunRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            playbook_id: row.get(1)?,
            user_id: row.get(2)?,
            mode: row.get(3)?,
            start_time: row.get(4)?,
            finish_time: row.get(5)?,
            result: row.get(6)?,
            inventory_file: row.get(7)?,
            variables_file: row.get(8)?,
        })
    }

    fn into_run(self) -> Result<PlaybookRun> {
        Ok(PlaybookRun {
            mode: RunMode::from_str(&self.mode).map_err(CatalogError::Invalid)?,
            result: RunState::from_str(&self.result).map_err(CatalogError::Invalid)?,
            start_time: parse_ts(&self.start_time)?,
            finish_time: self.finish_time.as_deref().map(parse_ts).transpose()?,
            id: self.id,
            playbook_id: self.playbook_id,
            user_id: self.user_id,
            inventory_file: self.inventory_file,
            variables_file: self.variables_file,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Result<(CatalogDb, Project, Playbook)> {
        let db = CatalogDb::new_in_memory(SecretBox::new(""))?;
        let project = Project::new("infra", "https://example.com/infra.git");
        db.insert_project(&project)?;
        let playbook = Playbook::new(&project.id, "site.yml", "Site", "Everything");
        db.insert_playbook(&playbook)?;
        Ok((db, project, playbook))
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let db = CatalogDb::new_in_memory(SecretBox::new(""))?;
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<_>>()?;
        for table in [
            "playbook_runs",
            "playbooks",
            "project_updates",
            "projects",
            "run_results",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
        // migrations are idempotent
        db.run_migrations()?;
        Ok(())
    }

    #[test]
    fn test_project_roundtrip_with_lists() -> Result<()> {
        let db = CatalogDb::new_in_memory(SecretBox::new(""))?;
        let mut project = Project::new("infra", "https://example.com/infra.git");
        project.inventory_list = vec!["main.yml".into(), "prod.yml".into()];
        project.collections_list = vec!["community.general".into()];
        project.variables_vault = true;
        db.insert_project(&project)?;

        let loaded = db.get_project(&project.id)?.expect("project");
        assert_eq!(loaded.inventory_list, project.inventory_list);
        assert_eq!(loaded.collections_list, project.collections_list);
        assert!(loaded.variables_vault);
        assert_eq!(loaded.repository_branch, "master");
        Ok(())
    }

    #[test]
    fn test_secrets_encrypted_at_rest() -> Result<()> {
        let db = CatalogDb::new_in_memory(SecretBox::new("k"))?;
        let mut project = Project::new("infra", "https://example.com/infra.git");
        project.repository_password = "repo-pass".into();
        project.vault_password = "vault-pass".into();
        db.insert_project(&project)?;

        let (raw_repo, raw_vault): (String, String) = db.conn.query_row(
            "SELECT repository_password, vault_password FROM projects WHERE id = ?1",
            params![project.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_ne!(raw_repo, "repo-pass");
        assert_ne!(raw_vault, "vault-pass");

        let loaded = db.get_project(&project.id)?.expect("project");
        assert_eq!(loaded.repository_password, "repo-pass");
        assert_eq!(loaded.vault_password, "vault-pass");
        Ok(())
    }

    #[test]
    fn test_soft_deleted_project_hidden() -> Result<()> {
        let (db, project, _) = seeded()?;
        let other = Project::new("apps", "https://example.com/apps.git");
        db.insert_project(&other)?;
        assert_eq!(db.list_projects()?.len(), 2);

        db.delete_project(&project.id)?;
        let remaining = db.list_projects()?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, other.id);
        assert!(db.get_project(&project.id)?.is_none());

        let err = db.delete_project(&project.id).unwrap_err();
        assert!(err.to_string().contains("not found"));
        Ok(())
    }

    #[test]
    fn test_update_playbook_preserves_lock() -> Result<()> {
        let (db, _, mut playbook) = seeded()?;
        db.set_playbook_lock(&playbook.id, true)?;

        playbook.name = "Renamed".into();
        playbook.locked = false;
        db.update_playbook(&playbook)?;

        let loaded = db.get_playbook(&playbook.id)?.expect("playbook");
        assert_eq!(loaded.name, "Renamed");
        assert!(loaded.locked);
        Ok(())
    }

    #[test]
    fn test_locked_playbook_predicate() -> Result<()> {
        let (db, project, playbook) = seeded()?;
        assert!(!db.project_has_locked_playbooks(&project.id)?);
        db.set_playbook_lock(&playbook.id, true)?;
        assert!(db.project_has_locked_playbooks(&project.id)?);
        db.delete_playbook(&playbook.id)?;
        assert!(!db.project_has_locked_playbooks(&project.id)?);
        Ok(())
    }

    #[test]
    fn test_try_lock_is_exclusive() -> Result<()> {
        let (db, _, playbook) = seeded()?;
        assert!(db.try_lock_playbook(&playbook.id)?);
        assert!(!db.try_lock_playbook(&playbook.id)?);
        db.set_playbook_lock(&playbook.id, false)?;
        assert!(db.try_lock_playbook(&playbook.id)?);
        assert!(!db.try_lock_playbook("missing")?);
        Ok(())
    }

    #[test]
    fn test_playbooks_ordered_by_name_then_filename() -> Result<()> {
        let (db, project, _) = seeded()?;
        db.insert_playbook(&Playbook::new(&project.id, "b.yml", "", ""))?;
        db.insert_playbook(&Playbook::new(&project.id, "a.yml", "", ""))?;
        let names: Vec<String> = db
            .list_playbooks(&project.id)?
            .into_iter()
            .map(|p| p.filename)
            .collect();
        assert_eq!(names, vec!["a.yml", "b.yml", "site.yml"]);
        Ok(())
    }

    #[test]
    fn test_project_updates_newest_first() -> Result<()> {
        let (db, project, _) = seeded()?;
        let mut first = ProjectUpdate {
            id: new_id(),
            project_id: project.id.clone(),
            date: Utc::now() - chrono::Duration::minutes(5),
            success: false,
            revision: UNKNOWN_REVISION.into(),
            log: "> git clone\n\nfatal\n\n".into(),
        };
        db.insert_project_update(&first)?;
        let second = ProjectUpdate {
            id: new_id(),
            date: Utc::now(),
            success: true,
            revision: "abc123 init".into(),
            ..first.clone()
        };
        db.insert_project_update(&second)?;

        let updates = db.list_project_updates(&project.id)?;
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].id, second.id);
        assert_eq!(
            db.latest_project_update(&project.id)?.map(|u| u.id),
            Some(second.id.clone())
        );

        db.delete_project_update(&second.id)?;
        first.date = updates[1].date;
        assert_eq!(db.latest_project_update(&project.id)?, Some(first));
        Ok(())
    }

    #[test]
    fn test_run_lifecycle_and_result() -> Result<()> {
        let (db, project, playbook) = seeded()?;
        let mut run = PlaybookRun::start(&project, &playbook, RunMode::Execute, "u-1");
        db.insert_run(&run)?;

        let loaded = db.get_run(&run.id)?.expect("run");
        assert_eq!(loaded.result, RunState::Running);
        assert!(loaded.finish_time.is_none());

        run.finish(true);
        db.update_run(&run)?;
        let loaded = db.get_run(&run.id)?.expect("run");
        assert_eq!(loaded.result, RunState::Success);
        assert!(loaded.finish_time.is_some());
        assert_eq!(loaded.mode, RunMode::Execute);

        let result = RunResult {
            id: run.id.clone(),
            run_id: run.id.clone(),
            output: "{}".into(),
            error: String::new(),
        };
        db.insert_run_result(&result)?;
        assert_eq!(db.get_run_result(&run.id)?, Some(result.clone()));
        db.delete_run_result(&result.id)?;
        assert!(db.get_run_result(&run.id)?.is_none());
        Ok(())
    }

    #[test]
    fn test_latest_run() -> Result<()> {
        let (db, project, playbook) = seeded()?;
        assert!(db.latest_run(&playbook.id)?.is_none());

        let mut older = PlaybookRun::start(&project, &playbook, RunMode::Check, "u-1");
        older.start_time = Utc::now() - chrono::Duration::hours(1);
        db.insert_run(&older)?;
        let newer = PlaybookRun::start(&project, &playbook, RunMode::Execute, "u-2");
        db.insert_run(&newer)?;

        assert_eq!(db.latest_run(&playbook.id)?.map(|r| r.id), Some(newer.id.clone()));
        assert_eq!(db.list_runs(&playbook.id)?.len(), 2);

        db.delete_run(&newer.id)?;
        assert_eq!(db.latest_run(&playbook.id)?.map(|r| r.id), Some(older.id));
        Ok(())
    }

    #[tokio::test]
    async fn test_async_handle_delegates() -> Result<()> {
        let catalog = SqliteCatalog::new_in_memory()?;
        let project = Project::new("infra", "https://example.com/infra.git");
        catalog.insert_project(&project).await?;
        let projects = catalog.list_projects().await?;
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "infra");
        assert!(catalog.get_project("nope").await?.is_none());
        Ok(())
    }

    #[test]
    fn test_open_file_database() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("ensemble.db");
        let project = Project::new("infra", "https://example.com/infra.git");
        {
            let db = CatalogDb::new(&path, SecretBox::new("k"))?;
            db.insert_project(&project)?;
        }
        let db = CatalogDb::new(&path, SecretBox::new("k"))?;
        assert!(db.get_project(&project.id)?.is_some());
        Ok(())
    }
}
