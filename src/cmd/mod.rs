//! CLI command implementations.
//!
//! | Module     | Commands handled                              |
//! |------------|-----------------------------------------------|
//! | `project`  | `Init`, `Project`                             |
//! | `sync`     | `Sync`, `Playbooks`, `Lock`, `Unlock`         |
//! | `run`      | `Run`, `Runs`, `Result`                       |
//! | `history`  | `History`                                     |

pub mod history;
pub mod project;
pub mod run;
pub mod sync;

pub use history::cmd_history;
pub use project::{cmd_init, cmd_project};
pub use run::{cmd_result, cmd_run, cmd_runs};
pub use sync::{cmd_lock, cmd_playbooks, cmd_sync};

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};

use ensemble::catalog::{Catalog, Playbook, Project, SqliteCatalog};
use ensemble::config::EnsembleConfig;

/// Loaded configuration plus an open catalog.
pub struct Context {
    pub config: EnsembleConfig,
    pub catalog: Arc<dyn Catalog>,
}

impl Context {
    pub fn open(config_path: Option<&Path>) -> Result<Self> {
        let config = EnsembleConfig::load_or_default(config_path)?;
        let problems = config.validate();
        if !problems.is_empty() {
            bail!(
                "Invalid configuration:\n  {}\nRun `ensemble init` to create one.",
                problems.join("\n  ")
            );
        }
        config.ensure_directories()?;
        let catalog = SqliteCatalog::open(&config.database, &config.secret)
            .with_context(|| format!("Failed to open catalog {}", config.database.display()))?;
        tracing::debug!(database = %config.database.display(), "catalog opened");
        Ok(Self {
            config,
            catalog: Arc::new(catalog),
        })
    }

    /// Look a project up by id, then by name.
    pub async fn project(&self, key: &str) -> Result<Project> {
        if let Some(project) = self.catalog.get_project(key).await? {
            return Ok(project);
        }
        let mut matches: Vec<Project> = self
            .catalog
            .list_projects()
            .await?
            .into_iter()
            .filter(|p| p.name == key)
            .collect();
        match matches.len() {
            0 => bail!("Project '{}' not found", key),
            1 => Ok(matches.remove(0)),
            n => bail!("{} projects are named '{}', use the project id", n, key),
        }
    }

    pub async fn playbook(&self, id: &str) -> Result<Playbook> {
        self.catalog
            .get_playbook(id)
            .await?
            .with_context(|| format!("Playbook '{}' not found", id))
    }
}

/// `2024-03-01 10:00:05`
pub(crate) fn format_time(time: &chrono::DateTime<chrono::Utc>) -> String {
    time.format("%Y-%m-%d %H:%M:%S").to_string()
}
