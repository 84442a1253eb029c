use crate::context::AppContext;
use crate::CliGcMode;
use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use humansize::{format_size, DECIMAL};
use indicatif::{ProgressBar, ProgressStyle};
use loadout_core::{
    DiskDiffEntry, FileChangeType, GameInstallMetadata, GamePath, GameStore, GroupKind, Hash,
    ItemId, ItemKind, Loadout, LocatorId,
};
use loadout_infra::{hash_file, BackupRequest, CatalogueVersion, FileStore};
use loadout_persistence::{LoadoutDataStore, StoreTransaction};
use loadout_pipeline::{
    GarbageCollector, GcReport, ProgressTracker, ScanStats, StoreGarbageCollector, SyncOptions,
    SyncReport, SyncResult,
};
use std::sync::Arc;
use std::time::Duration;

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn scan_progress(pb: &ProgressBar) -> loadout_scanner::ProgressCb {
    let pb = pb.clone();
    Arc::new(move |stats: ScanStats| {
        pb.set_message(format!(
            "Indexed {}/{} files ({})",
            stats.files_scanned,
            stats.total_files,
            format_size(stats.bytes_processed, DECIMAL)
        ));
    })
}

fn print_report(report: &SyncReport) {
    println!("   Extracted:        {}", report.files_extracted);
    println!("   Deleted:          {}", report.files_deleted);
    println!("   Ingested:         {}", report.files_ingested);
    println!(
        "   Backed up:        {} ({})",
        report.files_backed_up,
        format_size(report.bytes_backed_up, DECIMAL)
    );
    if report.intrinsics_written > 0 || report.intrinsics_adapted > 0 {
        println!(
            "   Generated files:  {} written, {} adapted",
            report.intrinsics_written, report.intrinsics_adapted
        );
    }
    if report.reified_deletes > 0 {
        println!("   Recorded deletes: {}", report.reified_deletes);
    }
    if report.warnings > 0 {
        println!("   Warnings:         {} (run with --verbose for details)", report.warnings);
    }
}

pub fn cmd_install_add(
    ctx: &AppContext,
    game: String,
    store: String,
    root: Utf8PathBuf,
    locator_ids: Vec<String>,
) -> Result<GameInstallMetadata> {
    if !root.is_dir() {
        bail!("Game folder {} does not exist", root);
    }
    if ctx
        .store
        .list_installs()?
        .iter()
        .any(|i| i.game.eq_ignore_ascii_case(&game))
    {
        bail!("An installation of '{}' is already managed", game);
    }

    let mut install = GameInstallMetadata::new(game, GameStore::new(store), root);
    install.locator_ids = locator_ids.into_iter().map(LocatorId).collect();
    let mut tx = StoreTransaction::new();
    tx.put_install(&install);
    ctx.store.commit(tx)?;

    println!("Installation '{}' ({}) registered.", install.game, install.id);
    Ok(install)
}

pub fn cmd_install_list(ctx: &AppContext) -> Result<()> {
    let installs = ctx.store.list_installs()?;
    if installs.is_empty() {
        println!("No installations found.");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<12} {:<40}", "GAME", "STORE", "ACTIVE", "PATH");
    println!("{:-<24} {:-<10} {:-<12} {:-<40}", "", "", "", "");
    for install in installs {
        let active = match install.last_synced_loadout {
            Some(id) => ctx
                .store
                .get_loadout(id)?
                .map(|l| l.short_name)
                .unwrap_or_else(|| "?".into()),
            None => "-".into(),
        };
        let root = install
            .location_root(&loadout_core::LocationId::game())
            .map(|p| p.to_string())
            .unwrap_or_default();
        println!(
            "{:<24} {:<10} {:<12} {:<40}",
            install.game,
            install.store.to_string(),
            active,
            root
        );
    }
    Ok(())
}

pub async fn cmd_loadout_create(
    ctx: &AppContext,
    install: &str,
    name: Option<String>,
) -> Result<Loadout> {
    let install = ctx.find_install(install)?;
    let sync = ctx.synchronizer(SyncOptions::default())?;
    let loadout = sync.create_loadout(install.id, name.as_deref()).await?;
    println!(
        "Loadout '{}' [{}] created for {} (game version {}).",
        loadout.name, loadout.short_name, install.game, loadout.game_version
    );
    Ok(loadout)
}

pub fn cmd_loadout_list(ctx: &AppContext, install: &str) -> Result<()> {
    let install = ctx.find_install(install)?;
    let loadouts: Vec<Loadout> = ctx
        .store
        .list_loadouts(install.id)?
        .into_iter()
        .filter(|l| l.is_visible())
        .collect();
    if loadouts.is_empty() {
        println!("No loadouts found.");
        return Ok(());
    }

    println!("{:<6} {:<28} {:<12} {:<6} {:<6}", "SHORT", "NAME", "VERSION", "REV", "ACTIVE");
    println!("{:-<6} {:-<28} {:-<12} {:-<6} {:-<6}", "", "", "", "", "");
    for l in loadouts {
        let active = if install.last_synced_loadout == Some(l.id) { "*" } else { "" };
        println!(
            "{:<6} {:<28} {:<12} {:<6} {:<6}",
            l.short_name, l.name, l.game_version, l.revision, active
        );
    }
    Ok(())
}

pub fn cmd_loadout_copy(ctx: &AppContext, install: &str, loadout: &str) -> Result<Loadout> {
    let install = ctx.find_install(install)?;
    let source = ctx.find_loadout(&install, loadout)?;
    let sync = ctx.synchronizer(SyncOptions::default())?;
    let copy = sync.copy_loadout(source.id)?;
    println!("Loadout '{}' copied to '{}' [{}].", source.name, copy.name, copy.short_name);
    Ok(copy)
}

pub async fn cmd_loadout_delete(
    ctx: &AppContext,
    install: &str,
    loadout: &str,
    gc: CliGcMode,
) -> Result<()> {
    let install = ctx.find_install(install)?;
    let loadout = ctx.find_loadout(&install, loadout)?;
    let sync = ctx.synchronizer(SyncOptions::default())?;
    sync.delete_loadout(loadout.id, gc.into(), true).await?;
    println!("Loadout '{}' removed.", loadout.name);
    Ok(())
}

/// Stores `source` and places it at `target` inside the named mod of the
/// loadout, creating the mod group when missing.
pub async fn cmd_loadout_add_file(
    ctx: &AppContext,
    install: &str,
    loadout: &str,
    mod_name: &str,
    source: Utf8PathBuf,
    target: &str,
) -> Result<Hash> {
    let install = ctx.find_install(install)?;
    let mut loadout = ctx.find_loadout(&install, loadout)?;
    let target =
        GamePath::game(target).with_context(|| format!("Invalid target path '{}'", target))?;

    let hashed = source.clone();
    let (hash, size) = tokio::task::spawn_blocking(move || hash_file(&hashed))
        .await?
        .with_context(|| format!("Failed to hash {}", source))?;
    ctx.files
        .backup_files(vec![BackupRequest { source, hash, size }])
        .await?;

    let existing_group = loadout
        .items
        .values()
        .find(|i| i.name == mod_name && matches!(i.kind, ItemKind::Group(GroupKind::Mod)))
        .map(|i| i.id);
    let group = match existing_group {
        Some(id) => id,
        None => loadout.add_group(mod_name, None, GroupKind::Mod),
    };
    let replaced: Vec<ItemId> = loadout
        .children(group)
        .filter(|i| i.target() == Some(&target))
        .map(|i| i.id)
        .collect();
    for id in replaced {
        loadout.remove_item(id);
    }
    loadout.add_file(group, target.clone(), hash, size);
    loadout.revision += 1;

    let mut tx = StoreTransaction::new();
    tx.put_loadout(&loadout);
    ctx.store.commit(tx)?;

    println!(
        "Added {} ({}) to '{}' in loadout '{}'.",
        target,
        format_size(size, DECIMAL),
        mod_name,
        loadout.name
    );
    Ok(hash)
}

pub async fn cmd_diff(
    ctx: &AppContext,
    install: &str,
    loadout: &str,
    json: bool,
) -> Result<Vec<DiskDiffEntry>> {
    let install = ctx.find_install(install)?;
    let loadout = ctx.find_loadout(&install, loadout)?;

    let pb = spinner();
    let sync = ctx
        .synchronizer(SyncOptions::default())?
        .with_scan_progress(scan_progress(&pb));
    sync.rescan_files(install.id, false).await?;
    pb.finish_and_clear();

    let diff = sync.loadout_to_disk_diff(loadout.id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&diff)?);
        return Ok(diff);
    }

    println!(":: Changes applying '{}' would make", loadout.name);
    let mut changed = 0usize;
    for entry in &diff {
        let marker = match entry.change {
            FileChangeType::None => continue,
            FileChangeType::Added => '+',
            FileChangeType::Modified => '~',
            FileChangeType::Removed => '-',
        };
        changed += 1;
        println!("   {} {} ({})", marker, entry.path, format_size(entry.size, DECIMAL));
    }
    if changed == 0 {
        println!("   Status: Up to date");
    }
    Ok(diff)
}

pub async fn cmd_sync(
    ctx: &AppContext,
    install: &str,
    loadout: &str,
    threads: usize,
    max_backup_mb: Option<u64>,
    ignore_modified_dates: bool,
    gc: CliGcMode,
) -> Result<SyncResult> {
    let install = ctx.find_install(install)?;
    let loadout = ctx.find_loadout(&install, loadout)?;
    println!(":: Synchronizing '{}' to {}...", loadout.name, install.game);

    let options = SyncOptions {
        max_backup_size: max_backup_mb
            .map(|mb| mb * 1024 * 1024)
            .unwrap_or(loadout_config::MAX_BACKUP_SIZE),
        hash_threads: loadout_config::clamp_threads(threads),
        ignore_modified_dates,
        gc_mode: gc.into(),
    };

    let (tx, mut rx) = tokio::sync::mpsc::channel(100);
    let sync = ctx.synchronizer(options)?.with_progress(tx);
    let id = loadout.id;
    let sync_handle = tokio::spawn(async move { sync.synchronize(id).await });

    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-"),
    );

    let mut tracker = ProgressTracker::new();
    while let Some(ev) = rx.recv().await {
        tracker.update(ev);
        let snap = tracker.get_snapshot();
        pb.set_length(snap.total_files);
        pb.set_position(snap.extracted_files);
        pb.set_message(format!("{}/s", format_size(snap.speed_bps, DECIMAL)));
    }

    let result = sync_handle.await??;
    pb.finish_and_clear();

    println!(":: Loadout '{}' applied", result.loadout.name);
    print_report(&result.report);
    Ok(result)
}

pub async fn cmd_rescan(ctx: &AppContext, install: &str, force: bool) -> Result<usize> {
    let install = ctx.find_install(install)?;
    let pb = spinner();
    let sync = ctx
        .synchronizer(SyncOptions::default())?
        .with_scan_progress(scan_progress(&pb));
    sync.rescan_files(install.id, force).await?;
    pb.finish_with_message("Scan complete.");

    let count = ctx.store.disk_state(install.id)?.len();
    println!(":: Indexed {} files of {}", count, install.game);
    Ok(count)
}

pub async fn cmd_deactivate(ctx: &AppContext, install: &str) -> Result<Option<SyncReport>> {
    let install = ctx.find_install(install)?;
    let sync = ctx.synchronizer(SyncOptions::default())?;
    let report = sync.deactivate_current_loadout(install.id).await?;
    match &report {
        Some(report) => {
            println!(":: Restored the original files of {}", install.game);
            print_report(report);
        }
        None => println!("No loadout is active for {}.", install.game),
    }
    Ok(report)
}

pub async fn cmd_unmanage(
    ctx: &AppContext,
    install: &str,
    keep_files: bool,
    skip_gc: bool,
) -> Result<()> {
    let install = ctx.find_install(install)?;
    let sync = ctx.synchronizer(SyncOptions::default())?;
    sync.unmanage(install.id, !skip_gc, !keep_files).await?;
    println!("{} is no longer managed.", install.game);
    Ok(())
}

pub async fn cmd_gc(ctx: &AppContext) -> Result<GcReport> {
    let gc = StoreGarbageCollector::new(ctx.store.clone(), ctx.files.clone());
    let report = gc.run().await?;
    println!(
        ":: Garbage collection: {} examined, {} kept, {} removed",
        report.examined, report.kept, report.removed
    );
    Ok(report)
}

/// Records every file below `root` as the vanilla content of a build.
pub async fn cmd_catalogue_import(
    ctx: &AppContext,
    root: Utf8PathBuf,
    store: String,
    locator_ids: Vec<String>,
    version: String,
) -> Result<usize> {
    if locator_ids.is_empty() {
        bail!("At least one locator id is required");
    }
    println!(":: Cataloguing {}", root);

    let ids: Vec<LocatorId> = locator_ids.into_iter().map(LocatorId).collect();
    let store = GameStore::new(store);
    let scanned = root.clone();
    let entry = tokio::task::spawn_blocking(move || {
        CatalogueVersion::from_directory(&scanned, store, ids, version)
    })
    .await?
    .with_context(|| format!("Failed to catalogue {}", root))?;
    let count = entry.files.len();

    let mut catalogue = ctx.load_catalogue()?;
    catalogue.add_version(entry);
    let path = ctx.catalogue_path();
    catalogue
        .save(&path)
        .with_context(|| format!("Failed to write {}", path))?;

    println!("   Recorded {} files in {}", count, path);
    Ok(count)
}
