//! Discovery of inventories, variable files and collections in a working copy.
//!
//! Layout:
//! ```text
//! inventories/main.yml   required
//! inventories/*          selectable inventories
//! vars/main.yml          always loaded when present
//! vars/vault.yml         encrypted, needs the vault password
//! vars/*.yml             selectable extra variables
//! collections.txt        one collection per line
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::catalog::{DEFAULT_INVENTORY, Project};

static VARIABLES_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.+\.yml$").expect("valid variables file regex"));

const RESERVED_VARIABLES: [&str; 2] = ["main.yml", "vault.yml"];

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("main inventory file not found: {}", path.display())]
    MainInventoryMissing { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub inventories: Vec<String>,
    pub variables: Vec<String>,
    pub variables_main: bool,
    pub variables_vault: bool,
    pub collections: Vec<String>,
}

impl ProjectMetadata {
    pub fn discover(dir: &Path) -> Result<Self, MetadataError> {
        let inventories_dir = dir.join("inventories");
        let main_inventory = inventories_dir.join(DEFAULT_INVENTORY);
        if !main_inventory.is_file() {
            return Err(MetadataError::MainInventoryMissing {
                path: main_inventory,
            });
        }

        let vars_dir = dir.join("vars");
        let variables = if vars_dir.is_dir() {
            list_names(&vars_dir, true)?
                .into_iter()
                .filter(|name| VARIABLES_FILE.is_match(name))
                .filter(|name| !RESERVED_VARIABLES.contains(&name.as_str()))
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self {
            inventories: list_names(&inventories_dir, false)?,
            variables,
            variables_main: vars_dir.join("main.yml").is_file(),
            variables_vault: vars_dir.join("vault.yml").is_file(),
            collections: read_collections(&dir.join("collections.txt"))?,
        })
    }

    /// Copy the discovered values onto `project`, resetting selections that
    /// no longer exist.
    pub fn apply(self, project: &mut Project) {
        if !self.inventories.contains(&project.inventory) {
            project.inventory = DEFAULT_INVENTORY.to_string();
        }
        if !self.variables.contains(&project.variables) {
            project.variables = String::new();
        }
        project.inventory_list = self.inventories;
        project.variables_list = self.variables;
        project.variables_main = self.variables_main;
        project.variables_vault = self.variables_vault;
        project.collections_list = self.collections;
    }
}

/// Sorted entry names of a directory, optionally regular files only.
fn list_names(dir: &Path, files_only: bool) -> Result<Vec<String>, MetadataError> {
    let io_err = |source| MetadataError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        if files_only && !entry.file_type().map_err(io_err)?.is_file() {
            continue;
        }
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(names)
}

fn read_collections(path: &Path) -> Result<Vec<String>, MetadataError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(MetadataError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}
