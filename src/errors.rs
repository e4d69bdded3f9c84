//! Typed error hierarchy for Ensemble.
//!
//! - `CommandError`: an external command could not be launched at all
//! - `SyncError`: repository synchronization rejections and hard failures
//! - `RunnerError`: playbook execution rejections and hard failures
//! - `CatalogError`: persistence failures
//!
//! A command that runs and exits non-zero is never an error at this level; it
//! is reported through `CommandOutput::success` and recorded in history.

use thiserror::Error;

/// Infrastructure failure of the command executor.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Failed to launch `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to collect output of `{program}`: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from `SyncManager::update`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Project {project_id} has locked playbooks")]
    LockedPlaybooks { project_id: String },

    #[error(transparent)]
    Infrastructure(#[from] anyhow::Error),
}

/// Errors from `Runner::run` and `Runner::terminate`.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Playbook {playbook_id} is locked")]
    PlaybookLocked { playbook_id: String },

    #[error("Playbook {playbook_id} not found")]
    PlaybookNotFound { playbook_id: String },

    #[error("Collection {name} installation failed:\n{output}")]
    PluginInstall { name: String, output: String },

    #[error("Playbook run process {run_id} not found")]
    RunNotFound { run_id: String },

    #[error("Failed to signal playbook run {run_id}: {source}")]
    Signal {
        run_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors raised by the catalog layer.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Invalid catalog value: {0}")]
    Invalid(String),

    #[error("Secret encryption error: {0}")]
    Crypto(String),

    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl From<CommandError> for RunnerError {
    fn from(err: CommandError) -> Self {
        RunnerError::Other(err.into())
    }
}

impl From<CommandError> for SyncError {
    fn from(err: CommandError) -> Self {
        SyncError::Infrastructure(err.into())
    }
}
