mod common;

use common::Harness;
use filetime::FileTime;
use loadout_core::{GamePath, GroupKind, Hash, ItemKind, Loadout};
use loadout_infra::FileStore;
use loadout_persistence::LoadoutDataStore;
use loadout_pipeline::{ProgressTracker, SyncError, SyncOptions, SyncReport};
use tokio_util::sync::CancellationToken;

const VANILLA_EXE: &[u8] = b"vanilla game executable";

fn overrides_file<'a>(loadout: &'a Loadout, path: &GamePath) -> Option<&'a ItemKind> {
    loadout
        .targeted_items()
        .find(|item| item.target() == Some(path) && loadout.is_in_overrides(item.id))
        .map(|item| &item.kind)
}

#[tokio::test]
async fn first_sync_extracts_mod_files_and_backs_up_vanilla() {
    let h = Harness::new();
    h.write_game("game.exe", VANILLA_EXE);
    let plugin = h.archive(b"plugin data").await;

    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Cool Mod", None, GroupKind::Mod);
    loadout.add_file(group, GamePath::game("Data/plugin.esp").unwrap(), plugin, 11);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[("game.exe", VANILLA_EXE)]));
    let result = sync.synchronize(loadout.id).await.unwrap();

    assert_eq!(h.read_game("Data/plugin.esp").unwrap(), b"plugin data");
    assert_eq!(result.report.files_extracted, 1);
    assert_eq!(result.report.files_backed_up, 1);
    assert!(h.files.have_file(Hash::of_bytes(VANILLA_EXE)).await.unwrap());

    let pins = h.store.pinned_hashes(Some(h.install.id)).unwrap();
    assert!(pins.contains(&Hash::of_bytes(VANILLA_EXE)));

    let install = h.stored_install();
    assert_eq!(install.last_synced_loadout, Some(loadout.id));
    assert!(install.last_synced_at.is_some());
    assert!(install.initial_scan_at.is_some());
    assert_eq!(
        h.store.applied_state(h.install.id).unwrap(),
        h.store.disk_state(h.install.id).unwrap()
    );
    assert!(h.loadout(loadout.id).last_applied_at.is_some());
}

#[tokio::test]
async fn second_sync_is_a_no_op() {
    let h = Harness::new();
    h.write_game("game.exe", VANILLA_EXE);
    let plugin = h.archive(b"plugin data").await;

    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Cool Mod", None, GroupKind::Mod);
    loadout.add_file(group, GamePath::game("Data/plugin.esp").unwrap(), plugin, 11);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[("game.exe", VANILLA_EXE)]));
    sync.synchronize(loadout.id).await.unwrap();
    let revision = h.loadout(loadout.id).revision;

    assert!(!sync.should_synchronize(loadout.id).await.unwrap());
    let again = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(again.report, SyncReport::default());
    assert!(!again.report.touched_disk());
    assert_eq!(h.loadout(loadout.id).revision, revision);
}

#[tokio::test]
async fn new_disk_files_are_ingested_into_overrides() {
    let h = Harness::new();
    let loadout = h.new_loadout("Main", "a");
    let sync = h.synchronizer(Harness::catalogue(&[]));
    sync.synchronize(loadout.id).await.unwrap();

    let contents = b"[General]\nbEnableX=1\n";
    h.write_game("extra.ini", contents);
    let result = sync.synchronize(loadout.id).await.unwrap();

    assert_eq!(result.report.files_ingested, 1);
    assert_eq!(result.report.files_backed_up, 1);
    assert!(result.loadout.overrides_group().is_some());

    let path = GamePath::game("extra.ini").unwrap();
    match overrides_file(&result.loadout, &path) {
        Some(ItemKind::File { hash, size, .. }) => {
            assert_eq!(*hash, Hash::of_bytes(contents));
            assert_eq!(*size, contents.len() as u64);
        }
        other => panic!("expected an override file, got {:?}", other),
    }
    assert!(h.files.have_file(Hash::of_bytes(contents)).await.unwrap());
    assert_eq!(h.loadout(loadout.id).revision, result.loadout.revision);

    let again = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(again.report, SyncReport::default());
}

#[tokio::test]
async fn concurrent_syncs_of_one_loadout_keep_ingested_files() {
    let h = Harness::new();
    let loadout = h.new_loadout("Main", "a");
    let sync = h.synchronizer(Harness::catalogue(&[]));
    sync.synchronize(loadout.id).await.unwrap();

    let contents = b"user notes";
    h.write_game("notes.txt", contents);
    let (first, second) = tokio::join!(
        sync.synchronize(loadout.id),
        sync.synchronize(loadout.id)
    );
    first.unwrap();
    second.unwrap();

    // Whichever pass waited must see the override the other one committed.
    assert_eq!(h.read_game("notes.txt").unwrap(), contents);
    let stored = h.loadout(loadout.id);
    let path = GamePath::game("notes.txt").unwrap();
    match overrides_file(&stored, &path) {
        Some(ItemKind::File { hash, .. }) => assert_eq!(*hash, Hash::of_bytes(contents)),
        other => panic!("expected an override file, got {:?}", other),
    }
    assert!(!sync.should_synchronize(loadout.id).await.unwrap());
}

#[tokio::test]
async fn activation_backs_up_unarchived_files_before_replacing_them() {
    let h = Harness::new();
    let edited = b"hand edited settings";
    h.write_game("settings.cfg", edited);
    assert!(!h.files.have_file(Hash::of_bytes(edited)).await.unwrap());

    let mut loadout = h.new_loadout("Main", "a");
    let shipped = h.archive(b"mod settings").await;
    let group = loadout.add_group("Settings Mod", None, GroupKind::Mod);
    loadout.add_file(group, GamePath::game("settings.cfg").unwrap(), shipped, 12);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[]));
    let result = sync.activate_loadout(loadout.id).await.unwrap();

    assert_eq!(h.read_game("settings.cfg").unwrap(), b"mod settings");
    assert_eq!(result.report.files_backed_up, 1);
    assert!(h.files.have_file(Hash::of_bytes(edited)).await.unwrap());
}

#[tokio::test]
async fn later_mod_wins_a_conflict() {
    let h = Harness::new();
    let first = h.archive(b"readme from a").await;
    let second = h.archive(b"readme from b").await;

    let mut loadout = h.new_loadout("Main", "a");
    let readme = GamePath::game("readme.txt").unwrap();
    let mod_a = loadout.add_group("Mod A", None, GroupKind::Mod);
    loadout.add_file(mod_a, readme.clone(), first, 13);
    let mod_b = loadout.add_group("Mod B", None, GroupKind::Mod);
    loadout.add_file(mod_b, readme, second, 13);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[]));
    sync.synchronize(loadout.id).await.unwrap();

    assert_eq!(h.read_game("readme.txt").unwrap(), b"readme from b");
}

#[tokio::test]
async fn files_deleted_by_the_user_become_tombstones() {
    let h = Harness::new();
    let plugin = h.archive(b"plugin data").await;
    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Cool Mod", None, GroupKind::Mod);
    let target = GamePath::game("Data/plugin.esp").unwrap();
    loadout.add_file(group, target.clone(), plugin, 11);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[]));
    sync.synchronize(loadout.id).await.unwrap();
    std::fs::remove_file(h.game_path("Data/plugin.esp")).unwrap();

    let result = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(result.report.reified_deletes, 1);
    assert!(matches!(
        overrides_file(&result.loadout, &target),
        Some(ItemKind::Deleted { .. })
    ));
    assert!(h.read_game("Data/plugin.esp").is_none());

    // The tombstone now owns the path, so nothing comes back.
    let again = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(again.report, SyncReport::default());
    assert!(h.read_game("Data/plugin.esp").is_none());
}

#[tokio::test]
async fn disabling_a_mod_removes_its_files_and_empty_folders() {
    let h = Harness::new();
    h.write_game("game.exe", VANILLA_EXE);
    let texture = h.archive(b"sky texture").await;
    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Sky Mod", None, GroupKind::Mod);
    loadout.add_file(group, GamePath::game("Data/Textures/sky.dds").unwrap(), texture, 11);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[("game.exe", VANILLA_EXE)]));
    sync.synchronize(loadout.id).await.unwrap();
    assert!(h.read_game("Data/Textures/sky.dds").is_some());

    let mut loadout = h.loadout(loadout.id);
    loadout.set_enabled(group, false);
    h.put_loadout(&loadout);

    let result = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(result.report.files_deleted, 1);
    assert_eq!(result.report.directories_removed, 1);
    assert!(!h.game_path("Data").exists());
    assert!(h.game_path("game.exe").exists());
    // Still referenced by the disabled mod.
    assert!(h.files.have_file(texture).await.unwrap());
}

#[tokio::test]
async fn oversized_backups_abort_before_touching_anything() {
    let h = Harness::new();
    h.write_game("big.bin", b"0123456789");
    let loadout = h.new_loadout("Main", "a");

    let options = SyncOptions {
        max_backup_size: 4,
        ..Default::default()
    };
    let sync = h.synchronizer_with(Harness::catalogue(&[]), options);
    let err = sync.synchronize(loadout.id).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::BackupTooLarge { total: 10, limit: 4 }
    ));
    assert_eq!(h.stored_install().last_synced_loadout, None);
    assert!(h.loadout(loadout.id).overrides_group().is_none());
    assert!(h.files.list_hashes().await.unwrap().is_empty());
    assert_eq!(h.read_game("big.bin").unwrap(), b"0123456789");
}

#[tokio::test]
async fn ini_files_are_written_and_adapted_from_disk_edits() {
    let h = Harness::new();
    let path = GamePath::game("settings.ini").unwrap();
    let mut loadout = h.new_loadout("Main", "a");
    loadout
        .ini_files
        .entry(path.clone())
        .or_default()
        .set("Display", "Width", "1920");
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[]));
    let result = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(result.report.intrinsics_written, 1);
    assert_eq!(h.read_game("settings.ini").unwrap(), b"[Display]\nWidth=1920\n");

    // Same size as before, so move the timestamp to force a rehash.
    h.write_game("settings.ini", b"[Display]\nWidth=2560\n");
    filetime::set_file_mtime(
        h.game_path("settings.ini"),
        FileTime::from_unix_time(1_000_000, 0),
    )
    .unwrap();

    let result = sync.synchronize(loadout.id).await.unwrap();
    assert_eq!(result.report.intrinsics_adapted, 1);
    assert_eq!(result.report.files_ingested, 0);
    assert_eq!(
        result.loadout.ini_files[&path].get("Display", "Width"),
        Some("2560")
    );
    assert!(result.loadout.revision > loadout.revision);
    assert_eq!(h.read_game("settings.ini").unwrap(), b"[Display]\nWidth=2560\n");
}

#[tokio::test]
async fn cancelled_sync_commits_nothing() {
    let h = Harness::new();
    h.write_game("game.exe", VANILLA_EXE);
    let loadout = h.new_loadout("Main", "a");

    let cancel = CancellationToken::new();
    cancel.cancel();
    let sync = h
        .synchronizer(Harness::catalogue(&[]))
        .with_cancellation(cancel);
    let err = sync.synchronize(loadout.id).await.unwrap_err();

    assert!(err.is_cancelled());
    let install = h.stored_install();
    assert!(install.initial_scan_at.is_none());
    assert!(install.last_synced_loadout.is_none());
    assert!(h.store.disk_state(h.install.id).unwrap().is_empty());
}

#[tokio::test]
async fn extraction_reports_progress() {
    let h = Harness::new();
    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Cool Mod", None, GroupKind::Mod);
    for name in ["Data/a.esp", "Data/b.esp"] {
        let hash = h.archive(name.as_bytes()).await;
        loadout.add_file(group, GamePath::game(name).unwrap(), hash, name.len() as u64);
    }
    h.put_loadout(&loadout);

    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let sync = h.synchronizer(Harness::catalogue(&[])).with_progress(tx);
    sync.synchronize(loadout.id).await.unwrap();
    drop(sync);

    let mut tracker = ProgressTracker::new();
    while let Some(event) = rx.recv().await {
        tracker.update(event);
    }
    let snapshot = tracker.get_snapshot();
    assert!(tracker.is_done());
    assert_eq!(snapshot.total_files, 2);
    assert_eq!(snapshot.extracted_bytes, 20);
}

#[cfg(unix)]
#[tokio::test]
async fn scripts_are_made_executable() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new();
    let script = h.archive(b"#!/bin/sh\necho hi\n").await;
    let plugin = h.archive(b"plugin data").await;
    let mut loadout = h.new_loadout("Main", "a");
    let group = loadout.add_group("Tools", None, GroupKind::Mod);
    loadout.add_file(group, GamePath::game("tools/run.sh").unwrap(), script, 18);
    loadout.add_file(group, GamePath::game("Data/plugin.esp").unwrap(), plugin, 11);
    h.put_loadout(&loadout);

    let sync = h.synchronizer(Harness::catalogue(&[]));
    sync.synchronize(loadout.id).await.unwrap();

    let mode = |rel: &str| std::fs::metadata(h.game_path(rel)).unwrap().permissions().mode();
    assert_ne!(mode("tools/run.sh") & 0o111, 0);
    assert_eq!(mode("Data/plugin.esp") & 0o111, 0);
}
