//! Persisted catalog of projects, playbooks, sync history and runs.
//!
//! The core only talks to the `Catalog` trait. `SqliteCatalog` is the
//! bundled implementation; credentials are decrypted on read and encrypted
//! on write by the implementation, never by callers.

pub mod crypto;
pub mod db;
pub mod models;

use anyhow::Result;
use async_trait::async_trait;

pub use db::SqliteCatalog;
pub use models::*;

#[async_trait]
pub trait Catalog: Send + Sync {
    // Projects
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn get_project(&self, id: &str) -> Result<Option<Project>>;
    async fn insert_project(&self, project: &Project) -> Result<()>;
    async fn update_project(&self, project: &Project) -> Result<()>;
    async fn delete_project(&self, id: &str) -> Result<()>;
    async fn project_has_locked_playbooks(&self, project_id: &str) -> Result<bool>;

    // Playbooks
    async fn list_playbooks(&self, project_id: &str) -> Result<Vec<Playbook>>;
    async fn get_playbook(&self, id: &str) -> Result<Option<Playbook>>;
    async fn insert_playbook(&self, playbook: &Playbook) -> Result<()>;
    /// Writes filename, name and description. The lock flag is left alone.
    async fn update_playbook(&self, playbook: &Playbook) -> Result<()>;
    async fn delete_playbook(&self, id: &str) -> Result<()>;
    async fn set_playbook_lock(&self, id: &str, locked: bool) -> Result<()>;
    /// Set the lock only if it is currently clear. Returns whether this
    /// call took it.
    async fn try_lock_playbook(&self, id: &str) -> Result<bool>;

    // Project updates
    async fn insert_project_update(&self, update: &ProjectUpdate) -> Result<()>;
    /// Newest first.
    async fn list_project_updates(&self, project_id: &str) -> Result<Vec<ProjectUpdate>>;
    async fn latest_project_update(&self, project_id: &str) -> Result<Option<ProjectUpdate>>;
    async fn delete_project_update(&self, id: &str) -> Result<()>;

    // Runs
    async fn insert_run(&self, run: &PlaybookRun) -> Result<()>;
    async fn update_run(&self, run: &PlaybookRun) -> Result<()>;
    async fn get_run(&self, id: &str) -> Result<Option<PlaybookRun>>;
    async fn latest_run(&self, playbook_id: &str) -> Result<Option<PlaybookRun>>;
    /// Newest first.
    async fn list_runs(&self, playbook_id: &str) -> Result<Vec<PlaybookRun>>;
    async fn delete_run(&self, id: &str) -> Result<()>;

    // Results
    async fn insert_run_result(&self, result: &RunResult) -> Result<()>;
    async fn get_run_result(&self, run_id: &str) -> Result<Option<RunResult>>;
    async fn delete_run_result(&self, id: &str) -> Result<()>;
}
