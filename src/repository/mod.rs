//! Repository synchronization.
//!
//! `SyncManager::update` brings one project's working copy up to date and
//! refreshes its catalog entries:
//!
//! ```text
//! mkdir -p <root>/<project id>
//! git clone --branch <branch> <url> .      (first sync only)
//! git remote set-url origin <url>
//! git reset --hard
//! git pull
//! git checkout <branch>
//! git log --oneline -n 1                   → revision
//! inventories/, vars/, collections.txt     → project metadata
//! *.yml in the project root                → playbook records
//! ```
//!
//! The first failing git step stops the sync. Every attempt that passes the
//! locked-playbook check leaves exactly one `ProjectUpdate` record.

pub mod git;
pub mod metadata;
pub mod playbooks;

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::catalog::{Catalog, Project, ProjectUpdate, UNKNOWN_REVISION, new_id};
use crate::errors::SyncError;
use crate::exec::{CommandExecutor, CommandOutput, ShellCommand};
use git::GitCommands;
use metadata::{MetadataError, ProjectMetadata};

#[derive(Debug, Clone)]
pub struct RepositoryConfig {
    /// Directory containing one working copy per project.
    pub root: PathBuf,
    pub git: String,
}

impl RepositoryConfig {
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }
}

/// Per-project mutexes so two syncs of one project never overlap.
#[derive(Default, Clone)]
struct SyncLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SyncLocks {
    async fn acquire(&self, project_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(project_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Log, revision and outcome accumulated over one sync attempt.
struct SyncAttempt {
    log: String,
    revision: String,
}

impl SyncAttempt {
    fn new() -> Self {
        Self {
            log: String::new(),
            revision: UNKNOWN_REVISION.to_string(),
        }
    }

    fn section(&mut self, title: &str, body: &str) {
        let _ = write!(self.log, "> {}\n\n{}\n\n", title, body);
    }

    /// Record a step's output and report whether it succeeded.
    fn step(&mut self, title: &str, output: &CommandOutput) -> bool {
        self.section(title, output.combined().trim_end());
        output.success
    }

    fn into_update(self, project_id: &str, success: bool) -> ProjectUpdate {
        ProjectUpdate {
            id: new_id(),
            project_id: project_id.to_string(),
            date: Utc::now(),
            success,
            revision: self.revision,
            log: self.log,
        }
    }
}

pub struct SyncManager {
    config: RepositoryConfig,
    catalog: Arc<dyn Catalog>,
    executor: Arc<dyn CommandExecutor>,
    locks: SyncLocks,
}

impl SyncManager {
    pub fn new(
        config: RepositoryConfig,
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config,
            catalog,
            executor,
            locks: SyncLocks::default(),
        }
    }

    /// Sync every project in turn. Failures are logged and skipped.
    pub async fn update_all(&self) {
        let projects = match self.catalog.list_projects().await {
            Ok(projects) => projects,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "unable to list projects");
                return;
            }
        };
        for project in projects {
            tracing::info!(project_id = %project.id, name = %project.name, "updating project");
            match self.update(&project).await {
                Ok(update) if update.success => {
                    tracing::info!(project_id = %project.id, revision = %update.revision, "project updated")
                }
                Ok(_) => tracing::warn!(project_id = %project.id, "project update failed, see history"),
                Err(e) => tracing::warn!(
                    project_id = %project.id,
                    error = %format!("{:#}", e),
                    "unable to update project"
                ),
            }
        }
    }

    /// Sync one project and return the recorded attempt.
    ///
    /// `Ok` with `success == false` means a git step or the repository layout
    /// failed; the reason is in the record's log. `Err` means the project was
    /// rejected up front (locked playbooks, nothing recorded) or the
    /// environment failed (the attempt is still recorded first).
    pub async fn update(&self, project: &Project) -> Result<ProjectUpdate, SyncError> {
        let _guard = self.locks.acquire(&project.id).await;

        if self
            .catalog
            .project_has_locked_playbooks(&project.id)
            .await
            .context("Failed to check playbook locks")?
        {
            return Err(SyncError::LockedPlaybooks {
                project_id: project.id.clone(),
            });
        }

        let mut attempt = SyncAttempt::new();
        let outcome = self.run_steps(project.clone(), &mut attempt).await;
        let success = matches!(outcome, Ok(true));
        let update = attempt.into_update(&project.id, success);

        let recorded = self.catalog.insert_project_update(&update).await;
        match (outcome, recorded) {
            (Ok(_), Ok(())) => Ok(update),
            (Ok(_), Err(e)) => Err(SyncError::Infrastructure(
                e.context(format!("Unable to save update for project {}", project.id)),
            )),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(record_err)) => {
                tracing::error!(
                    project_id = %project.id,
                    error = %format!("{:#}", record_err),
                    "unable to save project update"
                );
                Err(e)
            }
        }
    }

    /// Run the sync steps. `Ok(false)` stops at a recorded failure.
    async fn run_steps(
        &self,
        mut project: Project,
        attempt: &mut SyncAttempt,
    ) -> Result<bool, SyncError> {
        let dir = self.config.project_dir(&project.id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create project directory {}", dir.display()))?;

        let git = GitCommands::new(&self.config.git);
        let url = project.remote_url();
        let branch = project.repository_branch.clone();

        let mut steps: Vec<(&str, ShellCommand)> = Vec::new();
        if !git::has_working_copy(&dir) {
            steps.push(("git clone", git.clone_branch(&branch, &url)));
        }
        steps.push(("git remote set-url", git.set_remote(&url)));
        steps.push(("git reset", git.reset_hard()));
        steps.push(("git pull", git.pull()));
        steps.push(("git checkout", git.checkout(&branch)));

        for (title, cmd) in steps {
            let output = self.executor.execute(&cmd, &dir).await?;
            if !attempt.step(title, &output) {
                tracing::warn!(project_id = %project.id, step = title, "git step failed");
                return Ok(false);
            }
        }

        let output = self.executor.execute(&git.revision(), &dir).await?;
        if !output.success {
            attempt.step("git log", &output);
            return Ok(false);
        }
        attempt.revision = git::truncate_revision(&output.stdout);
        let _ = writeln!(attempt.log, "> current revision: {}", attempt.revision);

        let metadata = match ProjectMetadata::discover(&dir) {
            Ok(metadata) => metadata,
            Err(e @ MetadataError::MainInventoryMissing { .. }) => {
                attempt.section("project metadata", &e.to_string());
                return Ok(false);
            }
            Err(e) => return Err(SyncError::Infrastructure(e.into())),
        };
        metadata.apply(&mut project);
        self.catalog
            .update_project(&project)
            .await
            .with_context(|| format!("Failed to save project {}", project.id))?;

        let discovered = playbooks::scan(&dir)?;
        let summary = playbooks::reconcile(self.catalog.as_ref(), &project.id, discovered)
            .await
            .context("Failed to reconcile playbooks")?;
        attempt.section("playbooks", &summary.to_string());

        Ok(true)
    }
}
