use std::path::Path;

use crate::catalog::{Playbook, Project, RunMode};
use crate::exec::ShellCommand;

use super::RunnerConfig;

/// `<galaxy> collection install <name>`
pub fn collection_install(config: &RunnerConfig, name: &str) -> ShellCommand {
    ShellCommand::new(&config.galaxy).args(["collection", "install", name])
}

/// The playbook invocation for one run, relative to the project directory.
pub fn playbook_command(
    config: &RunnerConfig,
    project: &Project,
    playbook: &Playbook,
    mode: RunMode,
    vault_file: Option<&Path>,
) -> ShellCommand {
    let mut cmd = ShellCommand::new(&config.playbook);

    match mode {
        RunMode::Check => cmd = cmd.args(["--check", "--diff"]),
        RunMode::Syntax => cmd = cmd.arg("--syntax-check"),
        RunMode::Execute => {}
    }

    cmd = cmd.args(["--inventory".to_string(), format!("inventories/{}", project.inventory)]);

    if let Some(vault) = vault_file {
        cmd = cmd
            .args(["--extra-vars", "@vars/vault.yml", "--vault-password-file"])
            .arg(vault.to_string_lossy());
    }
    if project.variables_main {
        cmd = cmd.args(["--extra-vars", "@vars/main.yml"]);
    }
    if !project.variables.is_empty() {
        cmd = cmd.args(["--extra-vars".to_string(), format!("@vars/{}", project.variables)]);
    }

    cmd = cmd
        .arg(&playbook.filename)
        .env("ANSIBLE_STDOUT_CALLBACK", &config.stdout_callback);
    if let Some(sock) = &config.auth_sock {
        cmd = cmd.env("SSH_AUTH_SOCK", sock);
    }
    cmd
}
