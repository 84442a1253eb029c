use camino::{Utf8Path, Utf8PathBuf};
use chrono::Utc;
use loadout_config::{OVERRIDES_GROUP_NAME, REIFIED_DELETE_REASON};
use loadout_core::{
    Action, DiskStateEntry, GameInstallMetadata, GamePath, GroupKind, Hash, IntrinsicFile,
    ItemId, ItemKind, Loadout, LoadoutSourceItemType, Signature, SyncTree,
};
use loadout_infra::io_utils::{replace_file, temp_sibling};
use loadout_infra::{BackupRequest, ExtractRequest, FileStore, StoreEvent};
use loadout_persistence::{LoadoutDataStore, StoreOp, StoreTransaction};
use loadout_scanner::StateIndexer;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::sync::cleanup::remove_empty_directories;
use crate::sync::{SyncError, SyncReport, SyncResult};

/// Carries out the actions of a processed sync tree.
///
/// Every database change is staged into one [`StoreTransaction`] that is
/// committed only after all filesystem work succeeded. An error drops the
/// staged transaction; files already written stay and are reconciled by the
/// next pass.
pub struct ActionExecutor {
    store: Arc<dyn LoadoutDataStore>,
    files: Arc<dyn FileStore>,
    max_backup_size: u64,
    cancel: CancellationToken,
    progress: Option<Sender<StoreEvent>>,
}

/// Working state of one pass.
struct RunState {
    disk: BTreeMap<GamePath, DiskStateEntry>,
    emptied: BTreeSet<GamePath>,
    tx: StoreTransaction,
    report: SyncReport,
}

impl RunState {
    fn new(tree: &SyncTree) -> Self {
        let disk = tree
            .iter()
            .filter_map(|(path, node)| {
                node.disk.map(|part| {
                    let entry = DiskStateEntry {
                        path: path.clone(),
                        hash: part.hash,
                        size: part.size,
                        last_modified: part.last_modified,
                    };
                    (path.clone(), entry)
                })
            })
            .collect();
        Self {
            disk,
            emptied: BTreeSet::new(),
            tx: StoreTransaction::new(),
            report: SyncReport::default(),
        }
    }

    fn stage_disk_state(&mut self, install: &GameInstallMetadata) {
        self.tx.push(StoreOp::ClearDiskState(install.id));
        for entry in self.disk.values() {
            self.tx.put_disk_entry(install.id, entry.clone());
        }
    }
}

fn resolve(install: &GameInstallMetadata, path: &GamePath) -> Result<Utf8PathBuf, SyncError> {
    install
        .resolve(path)
        .ok_or_else(|| SyncError::UnresolvedPath(path.clone()))
}

fn is_loadout_only(action: Action) -> bool {
    matches!(
        action,
        Action::IngestFromDisk
            | Action::AdaptLoadout
            | Action::WriteIntrinsic
            | Action::AddReifiedDelete
    )
}

impl ActionExecutor {
    pub fn new(store: Arc<dyn LoadoutDataStore>, files: Arc<dyn FileStore>) -> Self {
        Self {
            store,
            files,
            max_backup_size: loadout_config::MAX_BACKUP_SIZE,
            cancel: CancellationToken::new(),
            progress: None,
        }
    }

    pub fn with_max_backup_size(mut self, limit: u64) -> Self {
        self.max_backup_size = limit;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Sender<StoreEvent>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Applies `loadout` to the installation and records it as the last
    /// synchronized loadout.
    pub async fn run_actions(
        &self,
        tree: &SyncTree,
        mut install: GameInstallMetadata,
        mut loadout: Loadout,
        intrinsics: &[Box<dyn IntrinsicFile>],
    ) -> Result<(GameInstallMetadata, SyncResult), SyncError> {
        let before = loadout.clone();
        let mut run = RunState::new(tree);

        for action in tree.all_actions().iter() {
            match action {
                Action::DoNothing => {}
                Action::BackupFile => self.backup(tree, &install, &mut run).await?,
                Action::IngestFromDisk => ingest(tree, &mut loadout, &mut run),
                Action::AdaptLoadout => {
                    adapt(tree, &install, &mut loadout, intrinsics, &mut run).await?
                }
                Action::DeleteFromDisk => delete(tree, &install, &mut run).await?,
                Action::ExtractToDisk => self.extract(tree, &install, &mut run).await?,
                Action::WriteIntrinsic => {
                    write_intrinsics(tree, &install, &loadout, intrinsics, &mut run).await?
                }
                Action::AddReifiedDelete => reify_deletes(tree, &mut loadout, &mut run),
                Action::WarnOfUnableToExtract | Action::WarnOfConflict => {
                    warn_all(tree, action, &mut run)
                }
            }
        }

        let now = Utc::now();
        if loadout.items != before.items || loadout.ini_files != before.ini_files {
            loadout.revision += 1;
        }
        loadout.last_applied_at = Some(now);
        install.last_synced_loadout = Some(loadout.id);
        install.last_synced_at = Some(now);

        run.stage_disk_state(&install);
        run.tx.push(StoreOp::SnapshotApplied(install.id));
        run.tx.put_loadout(&loadout);
        run.tx.put_install(&install);

        let report = self.finish(&install, run).await?;
        info!(
            "Applied loadout {} ({}): {} extracted, {} deleted, {} ingested, {} backed up",
            loadout.name,
            loadout.id,
            report.files_extracted,
            report.files_deleted,
            report.files_ingested,
            report.files_backed_up
        );
        Ok((install, SyncResult { loadout, report }))
    }

    /// Applies a tree that has no loadout behind it, such as the vanilla game
    /// state. Clears the installation's last synchronized loadout.
    pub async fn run_install_actions(
        &self,
        tree: &SyncTree,
        mut install: GameInstallMetadata,
    ) -> Result<(GameInstallMetadata, SyncReport), SyncError> {
        let actions = tree.all_actions();
        if let Some(action) = actions.iter().find(|a| is_loadout_only(*a)) {
            return Err(SyncError::InvalidAction(action.name()));
        }

        let mut run = RunState::new(tree);
        for action in actions.iter() {
            match action {
                Action::BackupFile => self.backup(tree, &install, &mut run).await?,
                Action::DeleteFromDisk => delete(tree, &install, &mut run).await?,
                Action::ExtractToDisk => self.extract(tree, &install, &mut run).await?,
                Action::WarnOfUnableToExtract | Action::WarnOfConflict => {
                    warn_all(tree, action, &mut run)
                }
                _ => {}
            }
        }

        install.last_synced_loadout = None;
        install.last_synced_at = None;
        run.stage_disk_state(&install);
        run.tx.push(StoreOp::ClearApplied(install.id));
        run.tx.put_install(&install);

        let report = self.finish(&install, run).await?;
        info!(
            "Reset {}: {} extracted, {} deleted, {} backed up",
            install.game, report.files_extracted, report.files_deleted, report.files_backed_up
        );
        Ok((install, report))
    }

    async fn finish(
        &self,
        install: &GameInstallMetadata,
        run: RunState,
    ) -> Result<SyncReport, SyncError> {
        let RunState {
            disk,
            emptied,
            tx,
            mut report,
        } = run;
        debug!("Committing {} staged operations", tx.len());
        self.store.commit(tx)?;

        if !emptied.is_empty() {
            let install = install.clone();
            report.directories_removed = tokio::task::spawn_blocking(move || {
                remove_empty_directories(&install, &emptied, &disk)
            })
            .await
            .map_err(|e| SyncError::Task(e.to_string()))?;
        }
        Ok(report)
    }

    async fn backup(
        &self,
        tree: &SyncTree,
        install: &GameInstallMetadata,
        run: &mut RunState,
    ) -> Result<(), SyncError> {
        let mut seen: HashSet<Hash> = HashSet::new();
        let mut requests = Vec::new();
        let mut total = 0u64;

        for (path, node) in tree.flagged(Action::BackupFile) {
            let Some(disk) = node.disk else {
                continue;
            };
            // Vanilla content stays reachable even once no snapshot lists it.
            let vanilla = node.source == LoadoutSourceItemType::Game
                && node.loadout.is_some_and(|part| part.hash == disk.hash);
            if vanilla {
                run.tx.pin(install.id, disk.hash);
            }
            if node.signature.has(Signature::DISK_ARCHIVED) || !seen.insert(disk.hash) {
                continue;
            }
            total += disk.size;
            requests.push(BackupRequest {
                source: resolve(install, path)?,
                hash: disk.hash,
                size: disk.size,
            });
        }

        if total > self.max_backup_size {
            return Err(SyncError::BackupTooLarge {
                total,
                limit: self.max_backup_size,
            });
        }

        let count = requests.len() as u64;
        debug!("Backing up {} files ({} bytes)", count, total);
        self.files.backup_files(requests).await?;
        run.report.files_backed_up += count;
        run.report.bytes_backed_up += total;
        Ok(())
    }

    async fn extract(
        &self,
        tree: &SyncTree,
        install: &GameInstallMetadata,
        run: &mut RunState,
    ) -> Result<(), SyncError> {
        let mut requests = Vec::new();
        let mut targets = Vec::new();
        for (path, node) in tree.flagged(Action::ExtractToDisk) {
            let Some(part) = node.loadout else {
                continue;
            };
            let destination = resolve(install, path)?;
            requests.push(ExtractRequest {
                hash: part.hash,
                destination: destination.clone(),
            });
            targets.push((path.clone(), destination, part.hash, part.size));
        }
        if requests.is_empty() {
            return Ok(());
        }

        self.files
            .extract_files(requests, &self.cancel, self.progress.clone())
            .await?;

        for (path, destination, hash, size) in targets {
            mark_executable(&path, &destination)?;
            // Read back exactly what the OS recorded so the next index pass
            // recognizes the file without hashing it.
            let meta = tokio::fs::metadata(&destination).await?;
            run.disk.insert(
                path.clone(),
                DiskStateEntry {
                    path,
                    hash,
                    size,
                    last_modified: StateIndexer::mtime(&meta),
                },
            );
            run.report.files_extracted += 1;
        }
        Ok(())
    }
}

/// The Overrides group, created on first use.
fn overrides_group(loadout: &mut Loadout) -> ItemId {
    match loadout.overrides_group() {
        Some(id) => id,
        None => loadout.add_group(OVERRIDES_GROUP_NAME, None, GroupKind::Overrides),
    }
}

/// Items under Overrides that target `path`.
fn overrides_at(loadout: &Loadout, path: &GamePath) -> Vec<(ItemId, bool)> {
    loadout
        .targeted_items()
        .filter(|item| item.target() == Some(path) && loadout.is_in_overrides(item.id))
        .map(|item| (item.id, matches!(item.kind, ItemKind::Deleted { .. })))
        .collect()
}

fn ingest(tree: &SyncTree, loadout: &mut Loadout, run: &mut RunState) {
    for (path, node) in tree.flagged(Action::IngestFromDisk) {
        let Some(disk) = node.disk else {
            continue;
        };
        let kind = ItemKind::File {
            target: path.clone(),
            hash: disk.hash,
            size: disk.size,
        };
        match overrides_at(loadout, path).first() {
            Some((id, _)) => {
                if let Some(item) = loadout.item_mut(*id) {
                    item.kind = kind;
                }
            }
            None => {
                let group = overrides_group(loadout);
                loadout.add_file(group, path.clone(), disk.hash, disk.size);
            }
        }
        debug!("Ingested {} as {}", path, disk.hash);
        run.report.files_ingested += 1;
    }
}

async fn adapt(
    tree: &SyncTree,
    install: &GameInstallMetadata,
    loadout: &mut Loadout,
    intrinsics: &[Box<dyn IntrinsicFile>],
    run: &mut RunState,
) -> Result<(), SyncError> {
    for (path, _) in tree.flagged(Action::AdaptLoadout) {
        let Some(file) = intrinsics.iter().find(|f| f.path() == path) else {
            warn!("No intrinsic file registered for {}", path);
            continue;
        };
        let data = tokio::fs::read(resolve(install, path)?).await?;
        file.ingest(&data, loadout)?;
        run.report.intrinsics_adapted += 1;
    }
    Ok(())
}

async fn delete(
    tree: &SyncTree,
    install: &GameInstallMetadata,
    run: &mut RunState,
) -> Result<(), SyncError> {
    for (path, node) in tree.flagged(Action::DeleteFromDisk) {
        let abs = resolve(install, path)?;
        match tokio::fs::remove_file(&abs).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} was already gone", abs);
            }
            Err(e) => return Err(e.into()),
        }
        run.report.files_deleted += 1;

        if !node.has(Action::ExtractToDisk) {
            run.disk.remove(path);
            run.emptied.insert(path.parent());
        }
    }
    Ok(())
}

async fn write_intrinsics(
    tree: &SyncTree,
    install: &GameInstallMetadata,
    loadout: &Loadout,
    intrinsics: &[Box<dyn IntrinsicFile>],
    run: &mut RunState,
) -> Result<(), SyncError> {
    let mut buffer = Vec::new();
    for (path, _) in tree.flagged(Action::WriteIntrinsic) {
        let Some(file) = intrinsics.iter().find(|f| f.path() == path) else {
            warn!("No intrinsic file registered for {}", path);
            continue;
        };
        buffer.clear();
        file.write(loadout, &mut buffer)?;

        let destination = resolve(install, path)?;
        write_replacing(&destination, &buffer).await?;
        let meta = tokio::fs::metadata(&destination).await?;
        run.disk.insert(
            path.clone(),
            DiskStateEntry {
                path: path.clone(),
                hash: Hash::of_bytes(&buffer),
                size: buffer.len() as u64,
                last_modified: StateIndexer::mtime(&meta),
            },
        );
        run.report.intrinsics_written += 1;
    }
    Ok(())
}

fn reify_deletes(tree: &SyncTree, loadout: &mut Loadout, run: &mut RunState) {
    for (path, _) in tree.flagged(Action::AddReifiedDelete) {
        let existing = overrides_at(loadout, path);
        if existing.iter().any(|(_, tombstone)| *tombstone) {
            continue;
        }
        if existing.is_empty() {
            let group = overrides_group(loadout);
            loadout.add_deleted(group, path.clone(), REIFIED_DELETE_REASON);
        } else {
            for (id, _) in existing {
                loadout.remove_item(id);
            }
        }
        debug!("Recorded removal of {}", path);
        run.report.reified_deletes += 1;
    }
}

fn warn_all(tree: &SyncTree, action: Action, run: &mut RunState) {
    for (path, node) in tree.flagged(action) {
        match action {
            Action::WarnOfUnableToExtract => warn!(
                "Cannot restore {}: its content is not in the file store ({})",
                path, node.signature
            ),
            _ => warn!(
                "Conflicting changes at {} ({}), leaving it untouched",
                path, node.signature
            ),
        }
        run.report.warnings += 1;
    }
}

async fn write_replacing(destination: &Utf8Path, data: &[u8]) -> Result<(), SyncError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_sibling(destination, "tmp");
    tokio::fs::write(&tmp, data).await?;
    replace_file(&tmp, destination).await?;
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &GamePath, destination: &Utf8Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if !loadout_config::EXECUTABLE_EXTENSIONS.contains(&path.extension().as_str()) {
        return Ok(());
    }
    let mut perms = std::fs::metadata(destination)?.permissions();
    perms.set_mode(perms.mode() | 0o111);
    std::fs::set_permissions(destination, perms)
}

#[cfg(not(unix))]
fn mark_executable(_path: &GamePath, _destination: &Utf8Path) -> std::io::Result<()> {
    Ok(())
}
