//! Execution lock on a playbook, held for the lifetime of one run.

use std::sync::Arc;

use anyhow::Result;

use crate::catalog::Catalog;

/// Holds the catalog lock flag of a playbook.
///
/// `release` clears the flag. If the lease is dropped without being released
/// (the run task panicked or was aborted), the flag is cleared from a spawned
/// task instead.
pub struct PlaybookLease {
    catalog: Arc<dyn Catalog>,
    playbook_id: String,
    released: bool,
}

impl PlaybookLease {
    /// Take the lock if it is free. `None` means another holder has it.
    pub async fn acquire(catalog: Arc<dyn Catalog>, playbook_id: &str) -> Result<Option<Self>> {
        if !catalog.try_lock_playbook(playbook_id).await? {
            return Ok(None);
        }
        Ok(Some(Self {
            catalog,
            playbook_id: playbook_id.to_string(),
            released: false,
        }))
    }

    pub fn playbook_id(&self) -> &str {
        &self.playbook_id
    }

    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.catalog.set_playbook_lock(&self.playbook_id, false).await
    }
}

impl Drop for PlaybookLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let catalog = self.catalog.clone();
        let playbook_id = std::mem::take(&mut self.playbook_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = catalog.set_playbook_lock(&playbook_id, false).await {
                        tracing::warn!(playbook_id = %playbook_id, error = %format!("{:#}", e), "playbook unlock failed");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(playbook_id = %playbook_id, "playbook lease dropped outside a runtime, lock left set");
            }
        }
    }
}
