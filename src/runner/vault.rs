//! Scratch file holding a project's vault password for one run.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;

/// Owner-only temp file, removed when closed or dropped.
#[derive(Debug)]
pub struct VaultFile {
    file: NamedTempFile,
}

impl VaultFile {
    pub fn create(password: &str) -> Result<Self> {
        let mut file = tempfile::Builder::new()
            .prefix("ensemble-vault-")
            .tempfile()
            .context("Failed to create vault password file")?;
        restrict(file.path())?;
        file.write_all(password.as_bytes())
            .and_then(|_| file.flush())
            .context("Failed to write vault password file")?;
        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Remove the file, reporting failure instead of ignoring it.
    pub fn close(self) -> Result<()> {
        self.file
            .close()
            .context("Failed to remove vault password file")
    }
}

#[cfg(unix)]
fn restrict(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict vault password file")
}

#[cfg(not(unix))]
fn restrict(_path: &Path) -> Result<()> {
    Ok(())
}
