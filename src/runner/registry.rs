//! In-memory table of live playbook processes, keyed by run id.
//!
//! The table owns each child. Reaping and removal happen under the same lock
//! that `interrupt` takes, so a signal never reaches a recycled pid.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;

use tokio::process::Child;
use tokio::sync::Mutex;

use crate::errors::RunnerError;

/// Shared between the `Runner` and its background run tasks.
#[derive(Clone, Default)]
pub struct RunRegistry {
    processes: Arc<Mutex<HashMap<String, Child>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, run_id: &str, child: Child) {
        self.processes.lock().await.insert(run_id.to_string(), child);
    }

    pub async fn remove(&self, run_id: &str) -> Option<Child> {
        self.processes.lock().await.remove(run_id)
    }

    pub async fn contains(&self, run_id: &str) -> bool {
        self.processes.lock().await.contains_key(run_id)
    }

    pub async fn run_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.processes.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Reap the run's process if it has exited, dropping its entry.
    ///
    /// Returns `Ok(None)` while the process is still running.
    pub async fn try_reap(&self, run_id: &str) -> std::io::Result<Option<ExitStatus>> {
        let mut processes = self.processes.lock().await;
        let Some(child) = processes.get_mut(run_id) else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("run {} is not tracked", run_id),
            ));
        };
        let status = child.try_wait()?;
        if status.is_some() {
            processes.remove(run_id);
        }
        Ok(status)
    }

    /// Ask the run's process to stop. The entry stays until the run task
    /// reaps the exit.
    pub async fn interrupt(&self, run_id: &str) -> Result<(), RunnerError> {
        let processes = self.processes.lock().await;
        let pid = processes
            .get(run_id)
            .and_then(Child::id)
            .ok_or_else(|| RunnerError::RunNotFound {
                run_id: run_id.to_string(),
            })?;
        send_interrupt(pid).map_err(|source| RunnerError::Signal {
            run_id: run_id.to_string(),
            source,
        })
    }

    /// Interrupt every tracked run. Returns the ids signalled.
    pub async fn interrupt_all(&self) -> Vec<String> {
        let processes = self.processes.lock().await;
        let mut signalled = Vec::new();
        for (run_id, child) in processes.iter() {
            let Some(pid) = child.id() else { continue };
            match send_interrupt(pid) {
                Ok(()) => signalled.push(run_id.clone()),
                Err(e) => tracing::warn!(run_id = %run_id, error = %e, "failed to interrupt run"),
            }
        }
        signalled
    }
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> std::io::Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid)
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(std::io::Error::from)
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "interrupting runs requires a unix platform",
    ))
}
