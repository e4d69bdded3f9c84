//! Playbook execution.
//!
//! `Runner::run` prepares a run in the caller's task and returns as soon as
//! the `Running` record exists:
//! 1. reject if the playbook is locked
//! 2. install the baseline collection and the project's collections
//! 3. write the vault password file (vault projects only)
//! 4. take the playbook lock
//! 5. insert the `Running` record
//!
//! The background task then spawns the playbook process, tracks it in the
//! `RunRegistry`, records the terminal state and the captured output, and
//! finally releases the lock and removes the vault file.

pub mod command;
pub mod lease;
pub mod registry;
pub mod report;
pub mod vault;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;

use crate::catalog::{Catalog, Playbook, PlaybookRun, Project, RunMode, RunResult};
use crate::errors::RunnerError;
use crate::exec::{self, CommandExecutor, CommandOutput, ShellCommand};
use lease::PlaybookLease;
use registry::RunRegistry;
use vault::VaultFile;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Directory containing one working copy per project.
    pub root: PathBuf,
    pub galaxy: String,
    pub playbook: String,
    /// Collection installed before every run.
    pub baseline_collection: String,
    /// Value for `ANSIBLE_STDOUT_CALLBACK`.
    pub stdout_callback: String,
    pub auth_sock: Option<String>,
}

impl RunnerConfig {
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        self.root.join(project_id)
    }
}

/// A run that has been recorded and handed to its background task.
pub struct LaunchedRun {
    /// The record as first persisted, in `Running`.
    pub run: PlaybookRun,
    task: JoinHandle<PlaybookRun>,
}

impl LaunchedRun {
    /// Wait for the background task and return the terminal record.
    pub async fn wait(self) -> Result<PlaybookRun> {
        self.task.await.context("Playbook run task failed")
    }
}

pub struct Runner {
    config: RunnerConfig,
    catalog: Arc<dyn Catalog>,
    executor: Arc<dyn CommandExecutor>,
    registry: RunRegistry,
}

impl Runner {
    pub fn new(
        config: RunnerConfig,
        catalog: Arc<dyn Catalog>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            config,
            catalog,
            executor,
            registry: RunRegistry::new(),
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// Start `playbook` and return its `Running` record.
    ///
    /// Errors are returned only for rejections and failures before the
    /// record exists. Once it exists, every outcome ends up on the record.
    pub async fn run(
        &self,
        project: &Project,
        playbook: &Playbook,
        mode: RunMode,
        user_id: &str,
    ) -> Result<LaunchedRun, RunnerError> {
        let playbook = self
            .catalog
            .get_playbook(&playbook.id)
            .await?
            .ok_or_else(|| RunnerError::PlaybookNotFound {
                playbook_id: playbook.id.clone(),
            })?;
        if playbook.locked {
            return Err(RunnerError::PlaybookLocked {
                playbook_id: playbook.id,
            });
        }

        let dir = self.config.project_dir(&project.id);
        self.install_collections(project, &dir).await?;

        let vault = if project.uses_vault() {
            Some(VaultFile::create(&project.vault_password)?)
        } else {
            None
        };

        let Some(lease) = PlaybookLease::acquire(self.catalog.clone(), &playbook.id).await? else {
            return Err(RunnerError::PlaybookLocked {
                playbook_id: playbook.id,
            });
        };

        let run = PlaybookRun::start(project, &playbook, mode, user_id);
        if let Err(e) = self.catalog.insert_run(&run).await {
            if let Err(unlock) = lease.release().await {
                tracing::warn!(playbook_id = %playbook.id, error = %format!("{:#}", unlock), "playbook unlock failed");
            }
            return Err(e.context("Failed to record playbook run").into());
        }

        let command = command::playbook_command(
            &self.config,
            project,
            &playbook,
            mode,
            vault.as_ref().map(VaultFile::path),
        );
        tracing::info!(
            run_id = %run.id,
            playbook_id = %playbook.id,
            user_id,
            mode = %mode,
            command = %command.display(),
            "starting playbook run"
        );

        let task = tokio::spawn(execute(
            self.catalog.clone(),
            self.registry.clone(),
            run.clone(),
            command,
            dir,
            lease,
            vault,
        ));
        Ok(LaunchedRun { run, task })
    }

    /// Send an interrupt to a tracked run.
    pub async fn terminate(&self, run_id: &str) -> Result<(), RunnerError> {
        self.registry.interrupt(run_id).await?;
        tracing::info!(run_id, "interrupt sent to playbook run");
        Ok(())
    }

    /// Ids of runs whose process is still alive.
    pub async fn running(&self) -> Vec<String> {
        self.registry.run_ids().await
    }

    /// Interrupt every tracked run.
    pub async fn shutdown(&self) {
        for run_id in self.registry.interrupt_all().await {
            tracing::info!(run_id = %run_id, "interrupted playbook run on shutdown");
        }
    }

    async fn install_collections(&self, project: &Project, dir: &std::path::Path) -> Result<(), RunnerError> {
        let names = std::iter::once(self.config.baseline_collection.as_str())
            .chain(project.collections_list.iter().map(String::as_str))
            .map(str::trim)
            .filter(|name| !name.is_empty());
        for name in names {
            let cmd = command::collection_install(&self.config, name);
            let output = self.executor.execute(&cmd, dir).await?;
            tracing::info!(collection = name, "collection installation log:\n{}", output.combined());
            if !output.success {
                return Err(RunnerError::PluginInstall {
                    name: name.to_string(),
                    output: output.combined(),
                });
            }
        }
        Ok(())
    }
}

/// Body of the background task for one run.
async fn execute(
    catalog: Arc<dyn Catalog>,
    registry: RunRegistry,
    mut run: PlaybookRun,
    command: ShellCommand,
    dir: PathBuf,
    lease: PlaybookLease,
    vault: Option<VaultFile>,
) -> PlaybookRun {
    let output = run_tracked(&registry, &run.id, &command, &dir).await;
    let (success, stdout, stderr) = match output {
        Ok(CommandOutput {
            success,
            stdout,
            stderr,
            ..
        }) => (success, stdout, stderr),
        Err(e) => {
            tracing::warn!(run_id = %run.id, error = %e, "playbook process failed to run");
            (false, String::new(), e.to_string())
        }
    };

    run.finish(success);
    tracing::info!(run_id = %run.id, result = %run.result, "playbook run finished");

    if let Err(e) = catalog.update_run(&run).await {
        tracing::warn!(run_id = %run.id, error = %format!("{:#}", e), "playbook run update failed");
    }
    let result = RunResult {
        id: run.id.clone(),
        run_id: run.id.clone(),
        output: stdout,
        error: stderr,
    };
    if let Err(e) = catalog.insert_run_result(&result).await {
        tracing::warn!(run_id = %run.id, error = %format!("{:#}", e), "playbook run result insert failed");
    }

    let playbook_id = lease.playbook_id().to_string();
    if let Err(e) = lease.release().await {
        tracing::warn!(playbook_id = %playbook_id, error = %format!("{:#}", e), "playbook unlock failed");
    }
    if let Some(vault) = vault
        && let Err(e) = vault.close()
    {
        tracing::warn!(run_id = %run.id, error = %format!("{:#}", e), "vault password file remove failed");
    }

    run
}

/// How often a run task checks whether its process has exited.
const EXIT_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Spawn the process, keep it in the registry until it is reaped, and
/// collect its output.
async fn run_tracked(
    registry: &RunRegistry,
    run_id: &str,
    command: &ShellCommand,
    dir: &std::path::Path,
) -> Result<CommandOutput, crate::errors::CommandError> {
    let (child, pending) = exec::spawn(command, dir)?.into_parts();
    registry.register(run_id, child).await;
    let status = loop {
        match registry.try_reap(run_id).await {
            Ok(Some(status)) => break status,
            Ok(None) => tokio::time::sleep(EXIT_POLL_INTERVAL).await,
            Err(source) => {
                registry.remove(run_id).await;
                return Err(crate::errors::CommandError::Wait {
                    program: command.program.clone(),
                    source,
                });
            }
        }
    };
    pending.collect(status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{RunState, SqliteCatalog};
    use crate::exec::ProcessExecutor;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const GALAXY_OK: &str = "#!/bin/sh\necho \"$3\" >> \"$(dirname \"$0\")/galaxy.log\"\necho \"installed $3\"\n";

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    struct Fixture {
        tools: TempDir,
        root: TempDir,
        catalog: Arc<SqliteCatalog>,
        project: Project,
        playbook: Playbook,
    }

    impl Fixture {
        async fn new() -> Self {
            let tools = tempdir().unwrap();
            let root = tempdir().unwrap();
            let catalog = Arc::new(SqliteCatalog::new_in_memory().unwrap());
            let project = Project::new("infra", "https://example.com/infra.git");
            catalog.insert_project(&project).await.unwrap();
            let playbook = Playbook::new(&project.id, "site.yml", "Site", "");
            catalog.insert_playbook(&playbook).await.unwrap();
            fs::create_dir_all(root.path().join(&project.id)).unwrap();
            Self {
                tools,
                root,
                catalog,
                project,
                playbook,
            }
        }

        fn runner(&self, galaxy: &str, playbook: &str) -> Runner {
            let config = RunnerConfig {
                root: self.root.path().to_path_buf(),
                galaxy: script(self.tools.path(), "galaxy", galaxy),
                playbook: script(self.tools.path(), "playbook", playbook),
                baseline_collection: "ansible.posix".into(),
                stdout_callback: "ansible.posix.json".into(),
                auth_sock: None,
            };
            Runner::new(config, self.catalog.clone(), Arc::new(ProcessExecutor))
        }

        fn project_dir(&self) -> PathBuf {
            self.root.path().join(&self.project.id)
        }

        async fn locked(&self) -> bool {
            self.catalog
                .get_playbook(&self.playbook.id)
                .await
                .unwrap()
                .unwrap()
                .locked
        }
    }

    async fn wait_until<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_successful_run_records_result() {
        let fx = Fixture::new().await;
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\necho \"$ANSIBLE_STDOUT_CALLBACK $*\"\necho warn >&2\n",
        );

        let launched = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap();
        assert_eq!(launched.run.result, RunState::Running);
        let run_id = launched.run.id.clone();
        let stored = fx.catalog.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(stored.user_id, "u-1");
        assert_eq!(stored.inventory_file, "main.yml");

        let finished = launched.wait().await.unwrap();
        assert_eq!(finished.result, RunState::Success);
        assert!(finished.finish_time.is_some());

        let stored = fx.catalog.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(stored.result, RunState::Success);
        let result = fx.catalog.get_run_result(&run_id).await.unwrap().unwrap();
        assert_eq!(
            result.output,
            "ansible.posix.json --inventory inventories/main.yml site.yml\n"
        );
        assert_eq!(result.error, "warn\n");
        assert!(!fx.locked().await);
        assert!(runner.running().await.is_empty());
    }

    #[tokio::test]
    async fn test_collections_installed_in_order() {
        let mut fx = Fixture::new().await;
        fx.project.collections_list =
            vec!["community.general".into(), "  ".into(), "community.docker".into()];
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\nexit 0\n");

        runner
            .run(&fx.project, &fx.playbook, RunMode::Check, "u-1")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        let log = fs::read_to_string(fx.tools.path().join("galaxy.log")).unwrap();
        assert_eq!(log, "ansible.posix\ncommunity.general\ncommunity.docker\n");
    }

    #[tokio::test]
    async fn test_failed_run_is_failure_and_unlocks() {
        let fx = Fixture::new().await;
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\necho 'fatal: host down' >&2\nexit 2\n");

        let finished = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(finished.result, RunState::Failure);
        let result = fx.catalog.get_run_result(&finished.id).await.unwrap().unwrap();
        assert_eq!(result.error, "fatal: host down\n");
        assert!(!fx.locked().await);
    }

    #[tokio::test]
    async fn test_plugin_install_failure_aborts_before_records() {
        let fx = Fixture::new().await;
        let runner = fx.runner("#!/bin/sh\necho 'ERROR! not found'\nexit 1\n", "#!/bin/sh\n");

        let err = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .err()
            .expect("run should be rejected");
        match err {
            RunnerError::PluginInstall { name, output } => {
                assert_eq!(name, "ansible.posix");
                assert!(output.contains("ERROR! not found"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(fx.catalog.latest_run(&fx.playbook.id).await.unwrap().is_none());
        assert!(!fx.locked().await);
    }

    #[tokio::test]
    async fn test_locked_playbook_rejected() {
        let fx = Fixture::new().await;
        fx.catalog.set_playbook_lock(&fx.playbook.id, true).await.unwrap();
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\n");

        let err = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .err()
            .expect("run should be rejected");
        assert!(matches!(err, RunnerError::PlaybookLocked { .. }));
        assert!(!fx.tools.path().join("galaxy.log").exists());
        assert!(fx.catalog.latest_run(&fx.playbook.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_held_while_running() {
        let fx = Fixture::new().await;
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\nwhile [ ! -f release ]; do sleep 0.05; done\necho done\n",
        );

        let launched = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap();
        let run_id = launched.run.id.clone();
        assert!(fx.locked().await);
        assert!(wait_until(|| runner.registry().contains(&run_id)).await);
        assert_eq!(runner.running().await, vec![run_id.clone()]);

        fs::write(fx.project_dir().join("release"), "").unwrap();
        let finished = launched.wait().await.unwrap();
        assert_eq!(finished.result, RunState::Success);
        assert!(!fx.locked().await);
        assert!(!runner.registry().contains(&run_id).await);
    }

    #[tokio::test]
    async fn test_back_to_back_runs_rejected() {
        let fx = Fixture::new().await;
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\nwhile [ ! -f release ]; do sleep 0.05; done\n",
        );

        let (first, second) = tokio::join!(
            runner.run(&fx.project, &fx.playbook, RunMode::Execute, "u-1"),
            runner.run(&fx.project, &fx.playbook, RunMode::Execute, "u-2"),
        );
        let (launched, rejected) = match (first, second) {
            (Ok(l), Err(e)) | (Err(e), Ok(l)) => (l, e),
            (Ok(_), Ok(_)) => panic!("both runs launched"),
            (Err(a), Err(b)) => panic!("both runs rejected: {a} / {b}"),
        };
        assert!(matches!(rejected, RunnerError::PlaybookLocked { .. }));
        assert_eq!(fx.catalog.list_runs(&fx.playbook.id).await.unwrap().len(), 1);

        fs::write(fx.project_dir().join("release"), "").unwrap();
        launched.wait().await.unwrap();
        assert!(!fx.locked().await);
    }

    #[tokio::test]
    async fn test_vault_file_lives_only_during_run() {
        let mut fx = Fixture::new().await;
        fx.project.variables_vault = true;
        fx.project.vault_password = "vault-pass".into();
        // print the password file's content and record its path
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = --vault-password-file ]; then echo \"$2\" > vault_path; cat \"$2\"; fi\n  shift\ndone\n",
        );

        let finished = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(finished.result, RunState::Success);
        let result = fx.catalog.get_run_result(&finished.id).await.unwrap().unwrap();
        assert_eq!(result.output, "vault-pass");

        let vault_path = fs::read_to_string(fx.project_dir().join("vault_path")).unwrap();
        assert!(!Path::new(vault_path.trim()).exists());
    }

    #[tokio::test]
    async fn test_vault_file_removed_after_failure() {
        let mut fx = Fixture::new().await;
        fx.project.variables_vault = true;
        fx.project.vault_password = "vault-pass".into();
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = --vault-password-file ]; then echo \"$2\" > vault_path; fi\n  shift\ndone\nexit 1\n",
        );

        let finished = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(finished.result, RunState::Failure);
        let vault_path = fs::read_to_string(fx.project_dir().join("vault_path")).unwrap();
        assert!(!Path::new(vault_path.trim()).exists());
        assert!(!fx.locked().await);
    }

    #[tokio::test]
    async fn test_terminate_interrupts_run() {
        let fx = Fixture::new().await;
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\nexec sleep 30\n");

        let launched = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap();
        let run_id = launched.run.id.clone();
        assert!(wait_until(|| runner.registry().contains(&run_id)).await);

        runner.terminate(&run_id).await.unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(10), launched.wait())
            .await
            .expect("run should end after interrupt")
            .unwrap();
        assert_eq!(finished.result, RunState::Failure);
        assert!(!fx.locked().await);

        let err = runner.terminate(&run_id).await.unwrap_err();
        assert!(matches!(err, RunnerError::RunNotFound { .. }));
    }

    #[tokio::test]
    async fn test_run_leaves_registry_once_process_exits() {
        let fx = Fixture::new().await;
        let runner = fx.runner(
            GALAXY_OK,
            "#!/bin/sh\n(while [ ! -f release ]; do sleep 0.05; done; echo late) &\necho early\ntouch started\n",
        );

        let launched = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap();
        let run_id = launched.run.id.clone();
        assert!(wait_until(|| async { fx.project_dir().join("started").exists() }).await);
        tokio::time::sleep(Duration::from_millis(300)).await;

        // The output pipe is still held open by the background job.
        assert!(!runner.registry().contains(&run_id).await);
        let err = runner.terminate(&run_id).await.unwrap_err();
        assert!(matches!(err, RunnerError::RunNotFound { .. }));
        assert!(fx.locked().await);

        fs::write(fx.project_dir().join("release"), "").unwrap();
        let finished = launched.wait().await.unwrap();
        assert_eq!(finished.result, RunState::Success);
        let result = fx.catalog.get_run_result(&finished.id).await.unwrap().unwrap();
        assert_eq!(result.output, "early\nlate\n");
    }

    #[tokio::test]
    async fn test_terminate_unknown_run() {
        let fx = Fixture::new().await;
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\n");
        let err = runner.terminate("no-such-run").await.unwrap_err();
        assert!(matches!(err, RunnerError::RunNotFound { .. }));
        assert!(runner.running().await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_playbook_binary_recorded_as_failure() {
        let fx = Fixture::new().await;
        let mut runner = fx.runner(GALAXY_OK, "#!/bin/sh\n");
        runner.config.playbook = "/nonexistent/ansible-playbook".into();

        let finished = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert_eq!(finished.result, RunState::Failure);
        let result = fx.catalog.get_run_result(&finished.id).await.unwrap().unwrap();
        assert!(result.error.contains("/nonexistent/ansible-playbook"));
        assert!(!fx.locked().await);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_all() {
        let fx = Fixture::new().await;
        let runner = fx.runner(GALAXY_OK, "#!/bin/sh\nexec sleep 30\n");
        let launched = runner
            .run(&fx.project, &fx.playbook, RunMode::Execute, "u-1")
            .await
            .unwrap();
        let run_id = launched.run.id.clone();
        assert!(wait_until(|| runner.registry().contains(&run_id)).await);

        runner.shutdown().await;
        let finished = tokio::time::timeout(Duration::from_secs(10), launched.wait())
            .await
            .expect("run should end after shutdown")
            .unwrap();
        assert_eq!(finished.result, RunState::Failure);
    }
}
