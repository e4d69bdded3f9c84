//! Scripted `CommandExecutor` for unit tests.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{CommandExecutor, CommandOutput, ShellCommand};
use crate::errors::CommandError;

#[derive(Clone)]
pub enum FakeResponse {
    Output(CommandOutput),
    LaunchFailure,
}

impl FakeResponse {
    pub fn ok(stdout: &str) -> Self {
        Self::Output(CommandOutput {
            success: true,
            exit_code: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    pub fn fail(stderr: &str) -> Self {
        Self::Output(CommandOutput {
            success: false,
            exit_code: Some(128),
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }
}

/// Matches rules against the space-joined argument list by prefix. Commands
/// with no matching rule succeed with empty output.
#[derive(Default)]
pub struct FakeExecutor {
    rules: Vec<(String, FakeResponse)>,
    calls: Mutex<Vec<(ShellCommand, PathBuf)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, args_prefix: &str, response: FakeResponse) -> Self {
        self.rules.push((args_prefix.to_string(), response));
        self
    }

    pub fn calls(&self) -> Vec<(ShellCommand, PathBuf)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Argument lines of every call, in order.
    pub fn call_lines(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .map(|(cmd, _)| cmd.args.join(" "))
            .collect()
    }
}

#[async_trait]
impl CommandExecutor for FakeExecutor {
    async fn execute(&self, cmd: &ShellCommand, dir: &Path) -> Result<CommandOutput, CommandError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((cmd.clone(), dir.to_path_buf()));
        }
        let line = cmd.args.join(" ");
        let response = self
            .rules
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| FakeResponse::ok(""));
        match response {
            FakeResponse::Output(out) => Ok(out),
            FakeResponse::LaunchFailure => Err(CommandError::Launch {
                program: cmd.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "not installed"),
            }),
        }
    }
}
