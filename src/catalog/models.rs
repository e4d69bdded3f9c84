use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BRANCH: &str = "master";
pub const DEFAULT_INVENTORY: &str = "main.yml";
pub const PROJECT_UPDATE_REVISION_MAX_LENGTH: usize = 200;
pub const UNKNOWN_REVISION: &str = "unknown revision";

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub repository_url: String,
    pub repository_login: String,
    pub repository_password: String,
    pub repository_branch: String,
    /// Selected inventory file under `inventories/`.
    pub inventory: String,
    pub inventory_list: Vec<String>,
    /// Selected extra-variables file under `vars/`, empty for none.
    pub variables: String,
    pub variables_list: Vec<String>,
    pub variables_main: bool,
    pub variables_vault: bool,
    pub vault_password: String,
    pub collections_list: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(name: impl Into<String>, repository_url: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            name: name.into(),
            description: String::new(),
            repository_url: repository_url.into(),
            repository_login: String::new(),
            repository_password: String::new(),
            repository_branch: DEFAULT_BRANCH.to_string(),
            inventory: DEFAULT_INVENTORY.to_string(),
            inventory_list: Vec::new(),
            variables: String::new(),
            variables_list: Vec::new(),
            variables_main: false,
            variables_vault: false,
            vault_password: String::new(),
            collections_list: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Runs need a vault password file when `vars/vault.yml` exists.
    pub fn uses_vault(&self) -> bool {
        self.variables_vault
    }

    /// Remote URL with the stored login embedded for http(s) remotes.
    /// Other schemes (ssh, file, scp-style) are returned unchanged.
    pub fn remote_url(&self) -> String {
        if self.repository_login.is_empty() {
            return self.repository_url.clone();
        }
        let Ok(mut url) = url::Url::parse(&self.repository_url) else {
            return self.repository_url.clone();
        };
        if !matches!(url.scheme(), "http" | "https") {
            return self.repository_url.clone();
        }
        if url.set_username(&self.repository_login).is_err() {
            return self.repository_url.clone();
        }
        let password = Some(self.repository_password.as_str()).filter(|p| !p.is_empty());
        if url.set_password(password).is_err() {
            return self.repository_url.clone();
        }
        url.to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playbook {
    pub id: String,
    pub project_id: String,
    pub filename: String,
    pub name: String,
    pub description: String,
    pub locked: bool,
}

impl Playbook {
    pub fn new(
        project_id: impl Into<String>,
        filename: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id(),
            project_id: project_id.into(),
            filename: filename.into(),
            name: name.into(),
            description: description.into(),
            locked: false,
        }
    }
}

/// Audit record of one synchronization attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectUpdate {
    pub id: String,
    pub project_id: String,
    pub date: DateTime<Utc>,
    pub success: bool,
    pub revision: String,
    pub log: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Check,
    Execute,
    Syntax,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Check => "check",
            Self::Execute => "execute",
            Self::Syntax => "syntax",
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "check" => Ok(Self::Check),
            "execute" => Ok(Self::Execute),
            "syntax" => Ok(Self::Syntax),
            _ => Err(format!("Invalid run mode: {}", s)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Success,
    Failure,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl FromStr for RunState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            _ => Err(format!("Invalid run state: {}", s)),
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Only `Running` may move, and only to a terminal state.
pub fn is_valid_transition(from: RunState, to: RunState) -> bool {
    from == RunState::Running && to.is_terminal()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlaybookRun {
    pub id: String,
    pub playbook_id: String,
    pub user_id: String,
    pub mode: RunMode,
    pub start_time: DateTime<Utc>,
    pub finish_time: Option<DateTime<Utc>>,
    pub result: RunState,
    /// Inventory selected when the run started.
    pub inventory_file: String,
    /// Variables file selected when the run started.
    pub variables_file: String,
}

impl PlaybookRun {
    /// A new run in `Running` with the project's current selections.
    pub fn start(project: &Project, playbook: &Playbook, mode: RunMode, user_id: &str) -> Self {
        Self {
            id: new_id(),
            playbook_id: playbook.id.clone(),
            user_id: user_id.to_string(),
            mode,
            start_time: Utc::now(),
            finish_time: None,
            result: RunState::Running,
            inventory_file: project.inventory.clone(),
            variables_file: project.variables.clone(),
        }
    }

    /// Move to `Success` or `Failure` and stamp the finish time. Returns
    /// false, leaving the run untouched, if it already finished.
    pub fn finish(&mut self, success: bool) -> bool {
        let next = if success {
            RunState::Success
        } else {
            RunState::Failure
        };
        if !is_valid_transition(self.result, next) {
            return false;
        }
        self.result = next;
        self.finish_time = Some(Utc::now());
        true
    }
}

/// Captured output of a finished run. Shares its id with the run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunResult {
    pub id: String,
    pub run_id: String,
    pub output: String,
    pub error: String,
}
