//! Parsing of the JSON document the automation tool prints when the
//! `ansible.posix.json` stdout callback is enabled.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunReport {
    #[serde(default)]
    pub stats: BTreeMap<String, HostStats>,
    #[serde(default)]
    pub plays: Vec<PlayReport>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HostStats {
    pub ok: u32,
    pub changed: u32,
    pub ignored: u32,
    pub skipped: u32,
    pub rescued: u32,
    pub failures: u32,
    pub unreachable: u32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayReport {
    pub play: Info,
    #[serde(default)]
    pub tasks: Vec<TaskReport>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskReport {
    pub task: Info,
    #[serde(default)]
    pub hosts: BTreeMap<String, TaskResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Info {
    pub id: String,
    pub name: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Duration {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskResult {
    pub action: String,
    pub changed: bool,
    pub failed: bool,
    pub skipped: bool,
    pub msg: Option<serde_json::Value>,
    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
}

impl RunReport {
    /// Parse captured stdout. Anything printed before the JSON document
    /// (deprecation warnings and the like) is skipped.
    pub fn parse(stdout: &str) -> Result<Self> {
        let start = stdout
            .find('{')
            .context("No JSON document in playbook output")?;
        serde_json::from_str(&stdout[start..]).context("Failed to parse playbook output")
    }

    pub fn has_failures(&self) -> bool {
        self.stats
            .values()
            .any(|s| s.failures > 0 || s.unreachable > 0)
    }

    /// Tasks with at least one failed host, as `(play, task, host, message)`.
    pub fn failed_tasks(&self) -> Vec<(&str, &str, &str, String)> {
        let mut failed = Vec::new();
        for play in &self.plays {
            for task in &play.tasks {
                for (host, result) in &task.hosts {
                    if result.failed {
                        failed.push((
                            play.play.name.as_str(),
                            task.task.name.as_str(),
                            host.as_str(),
                            result.message(),
                        ));
                    }
                }
            }
        }
        failed
    }

    /// Per-host recap in the tool's own layout.
    pub fn recap(&self) -> String {
        let width = self.stats.keys().map(String::len).max().unwrap_or(0);
        let mut out = String::new();
        for (host, s) in &self.stats {
            let _ = writeln!(
                out,
                "{:<width$} : ok={} changed={} unreachable={} failed={} skipped={} rescued={} ignored={}",
                host,
                s.ok,
                s.changed,
                s.unreachable,
                s.failures,
                s.skipped,
                s.rescued,
                s.ignored,
                width = width
            );
        }
        out
    }
}

impl TaskResult {
    pub fn message(&self) -> String {
        match &self.msg {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.stderr_lines.join("\n"),
        }
    }
}
