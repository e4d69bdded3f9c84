//! Playbook discovery and catalog reconciliation.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};

use crate::catalog::{Catalog, Playbook};

/// A playbook file found in the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPlaybook {
    pub filename: String,
    pub name: String,
    pub description: String,
}

/// Parse the leading `#` comment block of a playbook, stopping at the first
/// `---` marker or the first non-comment line. The first comment line is the
/// name; the rest form the description.
pub fn parse_header(content: &str) -> (String, String) {
    let mut comments = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line == "---" {
            break;
        }
        if line.is_empty() {
            continue;
        }
        let Some(text) = line.strip_prefix('#') else {
            break;
        };
        let text = text.trim();
        if !text.is_empty() {
            comments.push(text);
        }
    }
    let mut iter = comments.into_iter();
    let name = iter.next().unwrap_or_default().to_string();
    let description = iter.collect::<Vec<_>>().join("\n");
    (name, description)
}

/// `*.yml` files directly in `dir`, sorted by filename.
pub fn scan(dir: &Path) -> Result<Vec<DiscoveredPlaybook>> {
    let mut found = BTreeMap::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "yml") {
            continue;
        }
        let filename = entry.file_name().to_string_lossy().into_owned();
        // Headers are decoded lossily.
        let bytes = std::fs::read(&path)
            .with_context(|| format!("Failed to read playbook {}", path.display()))?;
        let (name, description) = parse_header(&String::from_utf8_lossy(&bytes));
        found.insert(
            filename.clone(),
            DiscoveredPlaybook {
                filename,
                name,
                description,
            },
        );
    }
    Ok(found.into_values().collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for ReconcileSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} updated, {} removed, {} unchanged",
            self.added, self.updated, self.removed, self.unchanged
        )
    }
}

/// Bring the project's playbook records in line with the files on disk,
/// matching by filename. Matched records keep their lock flag.
pub async fn reconcile(
    catalog: &dyn Catalog,
    project_id: &str,
    discovered: Vec<DiscoveredPlaybook>,
) -> Result<ReconcileSummary> {
    let mut summary = ReconcileSummary::default();
    let mut existing: HashMap<String, Playbook> = catalog
        .list_playbooks(project_id)
        .await?
        .into_iter()
        .map(|p| (p.filename.clone(), p))
        .collect();

    for found in discovered {
        match existing.remove(&found.filename) {
            Some(mut record) => {
                if record.name == found.name && record.description == found.description {
                    summary.unchanged += 1;
                    continue;
                }
                record.name = found.name;
                record.description = found.description;
                catalog.update_playbook(&record).await?;
                summary.updated += 1;
            }
            None => {
                let record =
                    Playbook::new(project_id, found.filename, found.name, found.description);
                catalog.insert_playbook(&record).await?;
                summary.added += 1;
            }
        }
    }

    for stale in existing.into_values() {
        tracing::debug!(project_id, filename = %stale.filename, "removing stale playbook");
        catalog.delete_playbook(&stale.id).await?;
        summary.removed += 1;
    }

    Ok(summary)
}
