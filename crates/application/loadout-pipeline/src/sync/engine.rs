use futures::stream::{self, StreamExt, TryStreamExt};
use loadout_config::{DEFAULT_GAME_VERSION, FILE_STORE_CONCURRENCY, USER_COLLECTION_NAME};
use loadout_core::{
    disk_diff, DiskDiffEntry, DiskStateEntry, GameInstallId, GameInstallMetadata, GamePath,
    GameStore, GroupKind, Hash, IniFiles, IntrinsicFile, IntrinsicProvider, ItemId, ItemKind,
    Loadout, LoadoutId, LoadoutKind, LocatorId, SyncTree, SyncTreeBuilder,
};
use loadout_infra::{FileHashes, FileStore, GameLocator, StoreEvent};
use loadout_persistence::{LoadoutDataStore, StoreOp, StoreTransaction};
use loadout_scanner::{ProgressCb, ScanStrategy, StateIndexer};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::gc::{self, GarbageCollector, GcMode, StoreGarbageCollector};
use crate::sync::execute::ActionExecutor;
use crate::sync::{SyncError, SyncOptions, SyncReport, SyncResult};

/// Which snapshot stands in for the state the last pass left behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreviousState {
    /// The applied snapshot, when the installation has a synchronized loadout.
    LastApplied,
    /// The disk as it is now. Used when a loadout takes over an installation.
    CurrentDisk,
}

type InstallLocks = HashMap<GameInstallId, Arc<tokio::sync::Mutex<()>>>;

/// Reconciles loadouts with the files of their game installations.
pub struct LoadoutSynchronizer {
    store: Arc<dyn LoadoutDataStore>,
    files: Arc<dyn FileStore>,
    hashes: Arc<dyn FileHashes>,
    locator: Arc<dyn GameLocator>,
    intrinsics: Arc<dyn IntrinsicProvider>,
    gc: Arc<dyn GarbageCollector>,
    options: SyncOptions,
    cancel: CancellationToken,
    progress: Option<Sender<StoreEvent>>,
    scan_progress: Option<ProgressCb>,
    locks: std::sync::Mutex<InstallLocks>,
}

impl LoadoutSynchronizer {
    pub fn new(
        store: Arc<dyn LoadoutDataStore>,
        files: Arc<dyn FileStore>,
        hashes: Arc<dyn FileHashes>,
        locator: Arc<dyn GameLocator>,
    ) -> Self {
        let gc = Arc::new(StoreGarbageCollector::new(store.clone(), files.clone()));
        Self {
            store,
            files,
            hashes,
            locator,
            intrinsics: Arc::new(IniFiles),
            gc,
            options: SyncOptions::default(),
            cancel: CancellationToken::new(),
            progress: None,
            scan_progress: None,
            locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: Arc<dyn IntrinsicProvider>) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn with_garbage_collector(mut self, gc: Arc<dyn GarbageCollector>) -> Self {
        self.gc = gc;
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

    pub fn with_scan_progress(mut self, cb: ProgressCb) -> Self {
        self.scan_progress = Some(cb);
        self
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn executor(&self) -> ActionExecutor {
        let executor = ActionExecutor::new(self.store.clone(), self.files.clone())
            .with_max_backup_size(self.options.max_backup_size)
            .with_cancellation(self.cancel.clone());
        match &self.progress {
            Some(tx) => executor.with_progress(tx.clone()),
            None => executor,
        }
    }

    fn install_lock(&self, id: GameInstallId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(id).or_default().clone()
    }

    fn load_install(&self, id: GameInstallId) -> Result<GameInstallMetadata, SyncError> {
        self.store
            .get_install(id)?
            .ok_or(SyncError::UnknownInstall(id))
    }

    fn load_loadout(&self, id: LoadoutId) -> Result<Loadout, SyncError> {
        self.store
            .get_loadout(id)?
            .ok_or(SyncError::UnknownLoadout(id))
    }

    /// The loadout last applied to the installation, if it still exists and
    /// is not marked deleted.
    pub fn current_loadout(&self, install: GameInstallId) -> Result<Option<Loadout>, SyncError> {
        let install = self.load_install(install)?;
        let Some(id) = install.last_synced_loadout else {
            return Ok(None);
        };
        Ok(self.store.get_loadout(id)?.filter(|l| l.is_visible()))
    }

    /// Brings the stored disk state in line with the filesystem.
    pub async fn rescan_files(
        &self,
        install: GameInstallId,
        ignore_modified_dates: bool,
    ) -> Result<GameInstallMetadata, SyncError> {
        let lock = self.install_lock(install);
        let _guard = lock.lock().await;
        let (install, _) = self.reindex(install, ignore_modified_dates).await?;
        Ok(install)
    }

    /// Re-indexes without taking the installation lock. Commits only when
    /// something changed or the installation was never scanned before.
    async fn reindex(
        &self,
        id: GameInstallId,
        ignore_modified_dates: bool,
    ) -> Result<(GameInstallMetadata, Vec<DiskStateEntry>), SyncError> {
        let mut install = self.load_install(id)?;
        let previous = self.store.disk_state(id)?;

        let mut indexer =
            StateIndexer::new(self.hashes.clone()).with_threads(self.options.hash_threads);
        if let Some(cb) = &self.scan_progress {
            indexer = indexer.with_progress(cb.clone());
        }
        let strategy = ScanStrategy::from_ignore_modified_dates(ignore_modified_dates);
        let cancel = self.cancel.clone();
        let scanned = install.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            indexer.reindex(&scanned, &previous, strategy, &cancel)
        })
        .await
        .map_err(|e| SyncError::Task(e.to_string()))??;

        if outcome.changed || install.initial_scan_at.is_none() {
            let now = chrono::Utc::now();
            install.last_scanned_at = Some(now);
            if install.initial_scan_at.is_none() {
                install.initial_scan_at = Some(now);
            }
            let mut tx = StoreTransaction::new();
            tx.push(StoreOp::ClearDiskState(id));
            for entry in &outcome.entries {
                tx.put_disk_entry(id, entry.clone());
            }
            tx.put_install(&install);
            self.store.commit(tx)?;
            debug!("Stored {} disk entries for {}", outcome.entries.len(), install.game);
        }
        Ok((install, outcome.entries))
    }

    fn previous_state(
        &self,
        install: &GameInstallMetadata,
        disk: &[DiskStateEntry],
        mode: PreviousState,
    ) -> Result<Vec<DiskStateEntry>, SyncError> {
        match mode {
            PreviousState::CurrentDisk => Ok(disk.to_vec()),
            PreviousState::LastApplied if install.last_synced_loadout.is_some() => {
                Ok(self.store.applied_state(install.id)?)
            }
            PreviousState::LastApplied => Ok(Vec::new()),
        }
    }

    async fn build_tree(
        &self,
        install: &GameInstallMetadata,
        loadout: &Loadout,
        disk: &[DiskStateEntry],
        previous: &[DiskStateEntry],
    ) -> Result<(SyncTree, Vec<Box<dyn IntrinsicFile>>), SyncError> {
        let locator_ids = dedup_locator_ids(&loadout.locator_ids, &install.game);
        let game_files = self.hashes.game_files(&install.store, &locator_ids);
        let intrinsics = self.intrinsics.intrinsic_files(loadout);

        let mut tree = SyncTreeBuilder::new(loadout)
            .with_game_files(&game_files)
            .with_intrinsics(&intrinsics)
            .build(disk, previous)?;
        self.process_tree(&mut tree, install).await?;
        Ok((tree, intrinsics))
    }

    /// Computes signatures and actions, asking the file store once per
    /// distinct hash whether it is archived.
    async fn process_tree(
        &self,
        tree: &mut SyncTree,
        install: &GameInstallMetadata,
    ) -> Result<(), SyncError> {
        let mut hashes: HashSet<Hash> = HashSet::new();
        for (_, node) in tree.iter() {
            for part in [node.loadout, node.disk, node.previous].into_iter().flatten() {
                if !part.hash.is_zero() {
                    hashes.insert(part.hash);
                }
            }
        }

        let files = self.files.clone();
        let checked: Vec<(Hash, bool)> = stream::iter(hashes)
            .map(|hash| {
                let files = files.clone();
                async move { files.have_file(hash).await.map(|have| (hash, have)) }
            })
            .buffer_unordered(FILE_STORE_CONCURRENCY)
            .try_collect()
            .await?;
        let archived: HashSet<Hash> = checked
            .into_iter()
            .filter_map(|(hash, have)| have.then_some(hash))
            .collect();

        tree.process(|h| archived.contains(h), |p| install.is_backup_ignored(p));
        Ok(())
    }

    /// One reindex-plan-execute pass. The caller holds the installation lock.
    async fn sync_pass_locked(
        &self,
        loadout: Loadout,
        mode: PreviousState,
    ) -> Result<SyncResult, SyncError> {
        let (install, disk) = self
            .reindex(loadout.installation, self.options.ignore_modified_dates)
            .await?;
        let previous = self.previous_state(&install, &disk, mode)?;
        let (tree, intrinsics) = self.build_tree(&install, &loadout, &disk, &previous).await?;
        debug!("Planned actions for {}: {}", loadout.name, tree.all_actions());

        let (_, result) = self
            .executor()
            .run_actions(&tree, install, loadout, &intrinsics)
            .await?;
        Ok(result)
    }

    async fn collect_garbage(&self, mode: GcMode) {
        if let Err(e) = gc::run_with_mode(&self.gc, mode).await {
            warn!("Garbage collection failed: {}", e);
        }
    }

    /// Applies a loadout. Switching away from another valid loadout first
    /// ingests and removes that loadout, then activates this one.
    pub async fn synchronize(&self, loadout: LoadoutId) -> Result<SyncResult, SyncError> {
        let installation = self.load_loadout(loadout)?.installation;
        let result = {
            let lock = self.install_lock(installation);
            let _guard = lock.lock().await;
            self.synchronize_locked(loadout).await?
        };
        self.collect_garbage(self.options.gc_mode).await;
        Ok(result)
    }

    // Everything below the lock re-reads the loadout and installation, so a
    // caller that waited on the lock sees what the previous holder committed.
    async fn synchronize_locked(&self, id: LoadoutId) -> Result<SyncResult, SyncError> {
        let loadout = self.load_loadout(id)?;
        let install = self.load_install(loadout.installation)?;

        if let Some(active) = install.last_synced_loadout.filter(|active| *active != id) {
            if self.store.get_loadout(active)?.is_some() {
                info!("Switching {} from loadout {} to {}", install.game, active, id);
                let mut report = self
                    .deactivate_locked(install.id)
                    .await?
                    .unwrap_or_default();
                let activated = self.activate_locked(id).await?;
                report.merge(&activated.report);
                return Ok(SyncResult {
                    loadout: activated.loadout,
                    report,
                });
            }
        }

        // Applied before, then deactivated: the disk holds the vanilla reset.
        if install.last_synced_loadout.is_none() && loadout.last_applied_at.is_some() {
            info!("Reactivating loadout {} on {}", loadout.name, install.game);
            return self.activate_locked(id).await;
        }

        self.synchronize_loadout_locked(id).await
    }

    async fn synchronize_loadout_locked(&self, id: LoadoutId) -> Result<SyncResult, SyncError> {
        let loadout = self.update_locator_ids(self.load_loadout(id)?).await?;
        let mut result = self
            .sync_pass_locked(loadout, PreviousState::LastApplied)
            .await?;
        result.loadout = self.reprocess_overrides(result.loadout)?;
        Ok(result)
    }

    /// Whether applying the loadout would change anything, judged from the
    /// last scan without touching the filesystem.
    pub async fn should_synchronize(&self, loadout: LoadoutId) -> Result<bool, SyncError> {
        let loadout = self.load_loadout(loadout)?;
        let install = self.load_install(loadout.installation)?;
        if install.last_synced_loadout != Some(loadout.id) {
            return Ok(true);
        }
        let tree = self.last_scanned_tree(&install, &loadout).await?;
        Ok(tree.needs_work())
    }

    /// Per-path changes applying the loadout would make to the last scanned disk state.
    pub async fn loadout_to_disk_diff(
        &self,
        loadout: LoadoutId,
    ) -> Result<Vec<DiskDiffEntry>, SyncError> {
        let loadout = self.load_loadout(loadout)?;
        let install = self.load_install(loadout.installation)?;
        let tree = self.last_scanned_tree(&install, &loadout).await?;
        Ok(disk_diff(&tree))
    }

    async fn last_scanned_tree(
        &self,
        install: &GameInstallMetadata,
        loadout: &Loadout,
    ) -> Result<SyncTree, SyncError> {
        let disk = self.store.disk_state(install.id)?;
        let mode = if install.last_synced_loadout == Some(loadout.id) {
            PreviousState::LastApplied
        } else {
            PreviousState::CurrentDisk
        };
        let previous = self.previous_state(install, &disk, mode)?;
        let (tree, _) = self.build_tree(install, loadout, &disk, &previous).await?;
        Ok(tree)
    }

    /// Ingests the active loadout, then restores the vanilla game files of
    /// the build the locator reports now. Returns `None` when no loadout was
    /// active.
    pub async fn deactivate_current_loadout(
        &self,
        install: GameInstallId,
    ) -> Result<Option<SyncReport>, SyncError> {
        let report = {
            let lock = self.install_lock(install);
            let _guard = lock.lock().await;
            self.deactivate_locked(install).await?
        };
        self.collect_garbage(self.options.gc_mode).await;
        Ok(report)
    }

    async fn deactivate_locked(
        &self,
        install: GameInstallId,
    ) -> Result<Option<SyncReport>, SyncError> {
        let metadata = self.load_install(install)?;
        let Some(active) = metadata.last_synced_loadout else {
            return Ok(None);
        };

        let mut report = SyncReport::default();
        if self.store.get_loadout(active)?.is_some() {
            report.merge(&self.synchronize_loadout_locked(active).await?.report);
        } else {
            warn!("Active loadout {} no longer exists, resetting without ingesting", active);
        }

        let metadata = self.load_install(install)?;
        let locator_ids = match self.locate(&metadata).await {
            Some((_, ids)) => ids,
            None => dedup_locator_ids(&metadata.locator_ids, &metadata.game),
        };
        report.merge(&self.reset_locked(install, &locator_ids).await?);
        Ok(Some(report))
    }

    /// Applies a loadout to an installation no loadout currently owns. Files
    /// on disk count as already applied, so anything the loadout does not
    /// contain is backed up and removed.
    pub async fn activate_loadout(&self, loadout: LoadoutId) -> Result<SyncResult, SyncError> {
        let installation = self.load_loadout(loadout)?.installation;
        let result = {
            let lock = self.install_lock(installation);
            let _guard = lock.lock().await;
            self.activate_locked(loadout).await?
        };
        self.collect_garbage(self.options.gc_mode).await;
        Ok(result)
    }

    async fn activate_locked(&self, id: LoadoutId) -> Result<SyncResult, SyncError> {
        let loadout = self.load_loadout(id)?;
        self.sync_pass_locked(loadout, PreviousState::CurrentDisk).await
    }

    /// Makes the installation match the catalogue's vanilla files for the
    /// given build.
    pub async fn reset_to_original_game_state(
        &self,
        install: GameInstallId,
        locator_ids: &[LocatorId],
    ) -> Result<SyncReport, SyncError> {
        let report = {
            let lock = self.install_lock(install);
            let _guard = lock.lock().await;
            self.reset_locked(install, locator_ids).await?
        };
        self.collect_garbage(self.options.gc_mode).await;
        Ok(report)
    }

    async fn reset_locked(
        &self,
        install: GameInstallId,
        locator_ids: &[LocatorId],
    ) -> Result<SyncReport, SyncError> {
        let (metadata, disk) = self.reindex(install, false).await?;
        let game_files = self.hashes.game_files(&metadata.store, locator_ids);
        let mut tree = SyncTreeBuilder::game_only()
            .with_game_files(&game_files)
            .build(&disk, &disk)?;
        self.process_tree(&mut tree, &metadata).await?;

        let (_, report) = self.executor().run_install_actions(&tree, metadata).await?;
        Ok(report)
    }

    /// Creates a loadout with the default user collection and the build
    /// currently installed. Applies it right away when nothing else is active.
    pub async fn create_loadout(
        &self,
        install: GameInstallId,
        name: Option<&str>,
    ) -> Result<Loadout, SyncError> {
        let (loadout, applied) = {
            let lock = self.install_lock(install);
            let _guard = lock.lock().await;

            let metadata = self.load_install(install)?;
            let short_name = self.next_short_name(install)?;
            let name = match name {
                Some(name) => name.to_string(),
                None => format!("Loadout {}", short_name.to_uppercase()),
            };

            let mut loadout = Loadout::new(install, name, short_name);
            loadout.add_group(
                USER_COLLECTION_NAME,
                None,
                GroupKind::UserCollection { read_only: false },
            );
            match self.locate(&metadata).await {
                Some((store, ids)) => {
                    loadout.game_version = self.vanity_version(&store, &ids);
                    loadout.locator_ids = ids;
                }
                None => loadout.game_version = DEFAULT_GAME_VERSION.to_string(),
            }

            let mut tx = StoreTransaction::new();
            tx.put_loadout(&loadout);
            self.store.commit(tx)?;
            info!("Created loadout {} ({}) for {}", loadout.name, loadout.id, metadata.game);

            let has_active = match metadata.last_synced_loadout {
                Some(id) => self.store.get_loadout(id)?.is_some_and(|l| l.is_visible()),
                None => false,
            };
            if has_active {
                (loadout, false)
            } else {
                (self.synchronize_locked(loadout.id).await?.loadout, true)
            }
        };
        if applied {
            self.collect_garbage(self.options.gc_mode).await;
        }
        Ok(loadout)
    }

    pub fn copy_loadout(&self, loadout: LoadoutId) -> Result<Loadout, SyncError> {
        let source = self.load_loadout(loadout)?;
        let short_name = self.next_short_name(source.installation)?;

        let mut copy = source.clone();
        copy.id = LoadoutId::new();
        copy.name = format!("{} (copy)", source.name);
        copy.short_name = short_name;
        copy.kind = LoadoutKind::Default;
        copy.revision = 0;
        copy.last_applied_at = None;

        let mut tx = StoreTransaction::new();
        tx.put_loadout(&copy);
        self.store.commit(tx)?;
        info!("Copied loadout {} to {} ({})", source.name, copy.name, copy.id);
        Ok(copy)
    }

    /// Hides the loadout, optionally deactivates it, then removes it.
    pub async fn delete_loadout(
        &self,
        loadout: LoadoutId,
        gc_mode: GcMode,
        deactivate_if_active: bool,
    ) -> Result<(), SyncError> {
        let installation = self.load_loadout(loadout)?.installation;
        {
            let lock = self.install_lock(installation);
            let _guard = lock.lock().await;
            self.delete_locked(loadout, deactivate_if_active).await?;
        }
        self.collect_garbage(gc_mode).await;
        Ok(())
    }

    async fn delete_locked(&self, id: LoadoutId, deactivate_if_active: bool) -> Result<(), SyncError> {
        let mut doomed = self.load_loadout(id)?;
        doomed.kind = LoadoutKind::Deleted;
        let mut tx = StoreTransaction::new();
        tx.put_loadout(&doomed);
        self.store.commit(tx)?;

        let metadata = self.load_install(doomed.installation)?;
        if deactivate_if_active && metadata.last_synced_loadout == Some(id) {
            self.deactivate_locked(metadata.id).await?;
        }

        let mut tx = StoreTransaction::new();
        tx.push(StoreOp::RemoveLoadout(id));
        self.store.commit(tx)?;
        info!("Deleted loadout {} ({})", doomed.name, id);
        Ok(())
    }

    /// Stops managing the installation: every loadout is deleted and all
    /// recorded state is dropped. With `clean_game_folder` the vanilla files
    /// are restored first.
    pub async fn unmanage(
        &self,
        install: GameInstallId,
        run_gc: bool,
        clean_game_folder: bool,
    ) -> Result<(), SyncError> {
        {
            let lock = self.install_lock(install);
            let _guard = lock.lock().await;
            self.unmanage_locked(install, clean_game_folder).await?;
        }
        if run_gc {
            self.collect_garbage(GcMode::RunSynchronously).await;
        }
        Ok(())
    }

    async fn unmanage_locked(
        &self,
        install: GameInstallId,
        clean_game_folder: bool,
    ) -> Result<(), SyncError> {
        let metadata = self.load_install(install)?;
        if clean_game_folder && metadata.last_synced_loadout.is_some() {
            self.deactivate_locked(install).await?;
        }

        let loadouts = self.store.list_loadouts(install)?;
        let mut tx = StoreTransaction::new();
        for loadout in &loadouts {
            let mut hidden = loadout.clone();
            hidden.kind = LoadoutKind::Deleted;
            tx.put_loadout(&hidden);
        }
        self.store.commit(tx)?;

        for loadout in &loadouts {
            info!("Deleting loadout {} - {}", loadout.name, loadout.short_name);
            self.delete_locked(loadout.id, clean_game_folder).await?;
        }

        let mut metadata = self.load_install(install)?;
        metadata.last_synced_loadout = None;
        metadata.last_synced_at = None;
        metadata.last_scanned_at = None;
        metadata.initial_scan_at = None;

        let mut tx = StoreTransaction::new();
        tx.push(StoreOp::ClearPins(install));
        tx.push(StoreOp::ClearDiskState(install));
        tx.push(StoreOp::ClearApplied(install));
        tx.put_install(&metadata);
        self.store.commit(tx)?;
        info!("Stopped managing {}", metadata.game);
        Ok(())
    }

    /// The installation's store entry and its distinct locator ids, or `None`
    /// when the game can no longer be found for that store.
    async fn locate(&self, install: &GameInstallMetadata) -> Option<(GameStore, Vec<LocatorId>)> {
        let results = self.locator.find(install).await;
        let Some(found) = results.into_iter().find(|r| r.store == install.store) else {
            error!("Found no installation of {} for store {} anymore", install.game, install.store);
            return None;
        };
        let ids = dedup_locator_ids(&found.locator_ids, &install.game);
        Some((found.store, ids))
    }

    fn vanity_version(&self, store: &GameStore, ids: &[LocatorId]) -> String {
        match self.hashes.vanity_version(store, ids) {
            Some(version) => version,
            None => {
                warn!("Found no vanity version for locator ids {:?} ({})", ids, store);
                DEFAULT_GAME_VERSION.to_string()
            }
        }
    }

    /// Records the build the locator reports now on the loadout, with its
    /// vanity version, and on the installation.
    pub async fn update_locator_ids(&self, mut loadout: Loadout) -> Result<Loadout, SyncError> {
        let mut install = self.load_install(loadout.installation)?;
        let Some((store, ids)) = self.locate(&install).await else {
            return Ok(loadout);
        };

        let mut tx = StoreTransaction::new();
        if !same_locator_ids(&loadout.locator_ids, &ids) {
            info!(
                "Locator ids of {} changed from {:?} to {:?}",
                loadout.name, loadout.locator_ids, ids
            );
            loadout.game_version = self.vanity_version(&store, &ids);
            loadout.locator_ids = ids.clone();
            tx.put_loadout(&loadout);
        }
        if !same_locator_ids(&install.locator_ids, &ids) {
            debug!("Installed build of {} is now {:?}", install.game, ids);
            install.locator_ids = ids;
            tx.put_install(&install);
        }
        if !tx.is_empty() {
            self.store.commit(tx)?;
        }
        Ok(loadout)
    }

    /// Drops override files whose path and content are now vanilla game
    /// files of the loadout's build, pinning their content.
    pub fn reprocess_overrides(&self, mut loadout: Loadout) -> Result<Loadout, SyncError> {
        let install = self.load_install(loadout.installation)?;
        let vanilla: HashSet<(GamePath, Hash)> = self
            .hashes
            .game_files(&install.store, &loadout.locator_ids)
            .into_iter()
            .map(|file| (file.path, file.hash))
            .collect();
        if vanilla.is_empty() {
            return Ok(loadout);
        }

        let promoted: Vec<(ItemId, Hash)> = loadout
            .targeted_items()
            .filter(|item| loadout.is_in_overrides(item.id))
            .filter_map(|item| match &item.kind {
                ItemKind::File { target, hash, .. }
                    if vanilla.contains(&(target.clone(), *hash)) =>
                {
                    Some((item.id, *hash))
                }
                _ => None,
            })
            .collect();
        if promoted.is_empty() {
            return Ok(loadout);
        }

        let mut tx = StoreTransaction::new();
        for (id, hash) in &promoted {
            loadout.remove_item(*id);
            tx.pin(install.id, *hash);
        }
        loadout.revision += 1;
        tx.put_loadout(&loadout);
        self.store.commit(tx)?;
        info!("Promoted {} override files of {} to game files", promoted.len(), loadout.name);
        Ok(loadout)
    }

    fn next_short_name(&self, install: GameInstallId) -> Result<String, SyncError> {
        let taken: Vec<String> = self
            .store
            .list_loadouts(install)?
            .into_iter()
            .filter(|l| l.is_visible())
            .map(|l| l.short_name)
            .collect();
        Ok(first_free_short_name(&taken))
    }
}

/// Keeps the first occurrence of each id.
fn dedup_locator_ids(ids: &[LocatorId], game: &str) -> Vec<LocatorId> {
    let mut seen = HashSet::new();
    let distinct: Vec<LocatorId> = ids.iter().filter(|id| seen.insert(*id)).cloned().collect();
    if distinct.len() != ids.len() {
        warn!("Duplicate locator ids {:?} for {}", ids, game);
    }
    distinct
}

fn same_locator_ids(a: &[LocatorId], b: &[LocatorId]) -> bool {
    a.iter().all(|id| b.contains(id)) && b.iter().all(|id| a.contains(id))
}

/// `a`..`z`, then `aa`, `ab`, and so on.
fn short_name(mut n: usize) -> String {
    let mut chars = Vec::new();
    loop {
        chars.push((b'a' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    chars.iter().rev().collect()
}

fn first_free_short_name(taken: &[String]) -> String {
    let mut n = 0;
    loop {
        let candidate = short_name(n);
        if !taken.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
