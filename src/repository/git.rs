//! Git step commands for a project working copy.

use std::path::Path;

use crate::catalog::PROJECT_UPDATE_REVISION_MAX_LENGTH;
use crate::exec::ShellCommand;

/// Builds the git invocations used by a sync.
pub struct GitCommands<'a> {
    git: &'a str,
}

impl<'a> GitCommands<'a> {
    pub fn new(git: &'a str) -> Self {
        Self { git }
    }

    fn cmd(&self) -> ShellCommand {
        ShellCommand::new(self.git)
    }

    /// Clone `branch` of `url` into the current directory.
    pub fn clone_branch(&self, branch: &str, url: &str) -> ShellCommand {
        self.cmd().args(["clone", "--branch", branch, url, "."])
    }

    pub fn set_remote(&self, url: &str) -> ShellCommand {
        self.cmd().args(["remote", "set-url", "origin", url])
    }

    pub fn reset_hard(&self) -> ShellCommand {
        self.cmd().args(["reset", "--hard"])
    }

    pub fn pull(&self) -> ShellCommand {
        self.cmd().arg("pull")
    }

    pub fn checkout(&self, branch: &str) -> ShellCommand {
        self.cmd().args(["checkout", branch])
    }

    pub fn revision(&self) -> ShellCommand {
        self.cmd().args(["log", "--oneline", "-n", "1"])
    }
}

/// Whether `dir` already holds a working copy.
pub fn has_working_copy(dir: &Path) -> bool {
    dir.join(".git").is_dir()
}

/// First line of `git log --oneline` output, capped at the stored length.
pub fn truncate_revision(output: &str) -> String {
    output
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .chars()
        .take(PROJECT_UPDATE_REVISION_MAX_LENGTH)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_command() {
        let cmd = GitCommands::new("git").clone_branch("main", "https://example.com/r.git");
        assert_eq!(cmd.program, "git");
        assert_eq!(
            cmd.args,
            vec!["clone", "--branch", "main", "https://example.com/r.git", "."]
        );
    }

    #[test]
    fn test_step_commands() {
        let git = GitCommands::new("/usr/bin/git");
        assert_eq!(git.set_remote("u").display(), "/usr/bin/git remote set-url origin u");
        assert_eq!(git.reset_hard().display(), "/usr/bin/git reset --hard");
        assert_eq!(git.pull().display(), "/usr/bin/git pull");
        assert_eq!(git.checkout("master").display(), "/usr/bin/git checkout master");
        assert_eq!(git.revision().display(), "/usr/bin/git log --oneline -n 1");
    }

    #[test]
    fn test_logged_remote_hides_stored_password() {
        let mut project = crate::catalog::Project::new("infra", "https://git.example.com/infra.git");
        project.repository_login = "deploy".into();
        project.repository_password = "hunter2".into();
        let git = GitCommands::new("git");

        let set_remote = git.set_remote(&project.remote_url());
        assert!(set_remote.args.iter().any(|a| a.contains("hunter2")));
        assert!(!set_remote.display().contains("hunter2"));
        assert!(
            !git.clone_branch("master", &project.remote_url())
                .display()
                .contains("hunter2")
        );
    }

    #[test]
    fn test_truncate_revision_long_line() {
        let line = format!("abc1234 {}", "x".repeat(400));
        let rev = truncate_revision(&format!("{}\n", line));
        assert_eq!(rev.chars().count(), PROJECT_UPDATE_REVISION_MAX_LENGTH);
        assert!(rev.starts_with("abc1234 x"));
    }

    #[test]
    fn test_truncate_revision_short_and_multibyte() {
        assert_eq!(truncate_revision("abc1234 init\n"), "abc1234 init");
        assert_eq!(truncate_revision(""), "");
        let wide = "é".repeat(300);
        assert_eq!(truncate_revision(&wide).chars().count(), 200);
    }

    #[test]
    fn test_has_working_copy() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!has_working_copy(dir.path()));
        std::fs::create_dir(dir.path().join(".git")).unwrap();
        assert!(has_working_copy(dir.path()));
    }
}
