//! Removes file store objects nothing refers to anymore.
//!
//! Roots are pinned game backups, files of every visible loadout, and the
//! hashes recorded in each installation's disk and applied snapshots.

use async_trait::async_trait;
use loadout_core::{Hash, ItemKind};
use loadout_infra::FileStore;
use loadout_persistence::LoadoutDataStore;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::sync::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GcMode {
    DoNotRun,
    #[default]
    RunSynchronously,
    RunInBackground,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    pub examined: u64,
    pub kept: u64,
    pub removed: u64,
}

#[async_trait]
pub trait GarbageCollector: Send + Sync {
    async fn run(&self) -> Result<GcReport, SyncError>;
}

/// Starts a collection on the runtime and returns immediately.
pub fn run_async(gc: Arc<dyn GarbageCollector>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        match gc.run().await {
            Ok(report) => debug!("Background GC removed {} objects", report.removed),
            Err(e) => error!("Background GC failed: {}", e),
        }
    })
}

pub async fn run_with_mode(
    gc: &Arc<dyn GarbageCollector>,
    mode: GcMode,
) -> Result<Option<GcReport>, SyncError> {
    match mode {
        GcMode::DoNotRun => Ok(None),
        GcMode::RunSynchronously => gc.run().await.map(Some),
        GcMode::RunInBackground => {
            run_async(gc.clone());
            Ok(None)
        }
    }
}

pub struct StoreGarbageCollector {
    store: Arc<dyn LoadoutDataStore>,
    files: Arc<dyn FileStore>,
    running: tokio::sync::Mutex<()>,
}

impl StoreGarbageCollector {
    pub fn new(store: Arc<dyn LoadoutDataStore>, files: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            files,
            running: tokio::sync::Mutex::new(()),
        }
    }

    fn roots(&self) -> Result<HashSet<Hash>, SyncError> {
        let mut roots = self.store.pinned_hashes(None)?;
        for install in self.store.list_installs()? {
            for loadout in self.store.list_loadouts(install.id)? {
                if !loadout.is_visible() {
                    continue;
                }
                roots.extend(loadout.items.values().filter_map(|item| match &item.kind {
                    ItemKind::File { hash, .. } => Some(*hash),
                    _ => None,
                }));
            }
            roots.extend(self.store.disk_state(install.id)?.iter().map(|e| e.hash));
            roots.extend(self.store.applied_state(install.id)?.iter().map(|e| e.hash));
        }
        Ok(roots)
    }
}

#[async_trait]
impl GarbageCollector for StoreGarbageCollector {
    async fn run(&self) -> Result<GcReport, SyncError> {
        let _guard = self.running.lock().await;
        let roots = self.roots()?;
        let stored = self.files.list_hashes().await?;

        let mut report = GcReport {
            examined: stored.len() as u64,
            ..Default::default()
        };
        for hash in stored {
            if roots.contains(&hash) {
                report.kept += 1;
                continue;
            }
            if self.files.remove(hash).await? {
                debug!("Collected {}", hash);
                report.removed += 1;
            }
        }
        info!(
            "GC examined {} objects, kept {}, removed {}",
            report.examined, report.kept, report.removed
        );
        Ok(report)
    }
}
