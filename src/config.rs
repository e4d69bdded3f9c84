//! Configuration for Ensemble.
//!
//! Settings are layered: `ensemble.toml` (if any) → environment (a `.env`
//! file is loaded by the binary before this runs) → CLI flags.
//!
//! ```toml
//! path = "/var/lib/ensemble/projects"
//! database = "/var/lib/ensemble/ensemble.db"
//! secret = "change-me"
//! auth_sock = "/run/ensemble/agent.sock"
//!
//! [tools]
//! git = "git"
//! galaxy = "ansible-galaxy"
//! playbook = "ansible-playbook"
//! baseline_collection = "ansible.posix"
//! stdout_callback = "ansible.posix.json"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::repository::RepositoryConfig;
use crate::runner::RunnerConfig;

pub const CONFIG_FILE_NAME: &str = "ensemble.toml";

pub const ENV_PATH: &str = "ENSEMBLE_PATH";
pub const ENV_DB_PATH: &str = "ENSEMBLE_DB_PATH";
pub const ENV_DB_SECRET: &str = "ENSEMBLE_DB_SECRET";
pub const ENV_KEYS_SOCK: &str = "ENSEMBLE_KEYS_SOCK";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleConfig {
    /// Root directory holding one working copy per project.
    #[serde(default)]
    pub path: PathBuf,
    /// SQLite catalog location.
    #[serde(default = "default_database")]
    pub database: PathBuf,
    /// Secret used to encrypt stored credentials. Empty stores them as-is.
    #[serde(default)]
    pub secret: String,
    /// SSH agent socket handed to playbook runs.
    #[serde(default)]
    pub auth_sock: String,
    #[serde(default)]
    pub tools: ToolsConfig,
}

/// External tool invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    #[serde(default = "default_git")]
    pub git: String,
    #[serde(default = "default_galaxy")]
    pub galaxy: String,
    #[serde(default = "default_playbook")]
    pub playbook: String,
    #[serde(default = "default_baseline_collection")]
    pub baseline_collection: String,
    #[serde(default = "default_stdout_callback")]
    pub stdout_callback: String,
}

fn default_database() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("ensemble").join("ensemble.db"))
        .unwrap_or_else(|| PathBuf::from("ensemble.db"))
}

fn default_git() -> String {
    "git".to_string()
}

fn default_galaxy() -> String {
    "ansible-galaxy".to_string()
}

fn default_playbook() -> String {
    "ansible-playbook".to_string()
}

fn default_baseline_collection() -> String {
    "ansible.posix".to_string()
}

fn default_stdout_callback() -> String {
    "ansible.posix.json".to_string()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            galaxy: default_galaxy(),
            playbook: default_playbook(),
            baseline_collection: default_baseline_collection(),
            stdout_callback: default_stdout_callback(),
        }
    }
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            database: default_database(),
            secret: String::new(),
            auth_sock: String::new(),
            tools: ToolsConfig::default(),
        }
    }
}

impl EnsembleConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).with_context(|| format!("Failed to parse {}", CONFIG_FILE_NAME))
    }

    /// Load from an explicit file, or from the first `ensemble.toml` found in
    /// the current directory or the user config directory, then apply
    /// environment overrides. Falls back to defaults when no file exists.
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load(path)?,
            None => match Self::discover() {
                Some(path) => Self::load(&path)?,
                None => Self::default(),
            },
        };
        Ok(config.with_env_overrides(|key| std::env::var(key).ok()))
    }

    fn discover() -> Option<PathBuf> {
        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Some(local);
        }
        dirs::config_dir()
            .map(|d| d.join("ensemble").join(CONFIG_FILE_NAME))
            .filter(|p| p.exists())
    }

    /// Apply `ENSEMBLE_*` overrides using the given lookup.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(path) = non_empty(ENV_PATH) {
            self.path = PathBuf::from(path);
        }
        if let Some(db) = non_empty(ENV_DB_PATH) {
            self.database = PathBuf::from(db);
        }
        if let Some(secret) = non_empty(ENV_DB_SECRET) {
            self.secret = secret;
        }
        if let Some(sock) = non_empty(ENV_KEYS_SOCK) {
            self.auth_sock = sock;
        }
        self
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize ensemble.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Validate the configuration and return any problems found.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.path.as_os_str().is_empty() {
            problems.push(format!(
                "Projects path is not set: add `path` to {} or set {}",
                CONFIG_FILE_NAME, ENV_PATH
            ));
        }
        for (name, value) in [
            ("tools.git", &self.tools.git),
            ("tools.galaxy", &self.tools.galaxy),
            ("tools.playbook", &self.tools.playbook),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{} must not be empty", name));
            }
        }
        problems
    }

    /// Create the projects root and the catalog's parent directory.
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.path)
            .with_context(|| format!("Failed to create {}", self.path.display()))?;
        if let Some(parent) = self.database.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(())
    }

    pub fn repository(&self) -> RepositoryConfig {
        RepositoryConfig {
            root: self.path.clone(),
            git: self.tools.git.clone(),
        }
    }

    /// Runner settings. An unset `auth_sock` falls back to the caller's
    /// `SSH_AUTH_SOCK`.
    pub fn runner(&self) -> RunnerConfig {
        let auth_sock = Some(self.auth_sock.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("SSH_AUTH_SOCK").ok().filter(|s| !s.is_empty()));
        RunnerConfig {
            root: self.path.clone(),
            galaxy: self.tools.galaxy.clone(),
            playbook: self.tools.playbook.clone(),
            baseline_collection: self.tools.baseline_collection.clone(),
            stdout_callback: self.tools.stdout_callback.clone(),
            auth_sock,
        }
    }
}
