use camino::Utf8PathBuf;
use loadout_cli::context::AppContext;
use loadout_cli::{commands, CliGcMode};
use loadout_core::FileChangeType;
use loadout_infra::FileStore;
use tempfile::tempdir;

const GAME: &str = "Test Game";

#[tokio::test]
async fn full_user_lifecycle_workflow() {
    let work_dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(work_dir.path().to_path_buf()).unwrap();
    let data_dir = root.join("data");
    let game_dir = root.join("game");
    std::fs::create_dir_all(&game_dir).unwrap();
    std::fs::write(game_dir.join("game.exe"), b"vanilla game executable").unwrap();
    let staged = root.join("plugin.esp");
    std::fs::write(&staged, b"plugin data").unwrap();

    let ctx = AppContext::open(Some(data_dir.clone())).expect("open data dir");

    // Phase 1: catalogue the clean game and register it
    let recorded = commands::cmd_catalogue_import(
        &ctx,
        game_dir.clone(),
        "steam".into(),
        vec!["100".into()],
        "1.0".into(),
    )
    .await
    .expect("catalogue import failed");
    assert_eq!(recorded, 1);
    assert!(ctx.catalogue_path().exists(), "Catalogue must be saved");

    commands::cmd_install_add(
        &ctx,
        GAME.into(),
        "steam".into(),
        game_dir.clone(),
        vec!["100".into()],
    )
    .expect("install add failed");
    assert!(
        commands::cmd_install_add(&ctx, GAME.into(), "steam".into(), game_dir.clone(), vec![])
            .is_err(),
        "Registering the same game twice must fail"
    );

    // Phase 2: the first loadout is applied on creation
    let loadout = commands::cmd_loadout_create(&ctx, GAME, None)
        .await
        .expect("loadout create failed");
    assert_eq!(loadout.short_name, "a");
    assert_eq!(loadout.game_version, "1.0");
    let install = ctx.find_install(GAME).unwrap();
    assert_eq!(install.last_synced_loadout, Some(loadout.id));

    // Phase 3: add a mod file and preview it
    commands::cmd_loadout_add_file(
        &ctx,
        GAME,
        "a",
        "Plugin Mod",
        staged.clone(),
        "Data/plugin.esp",
    )
    .await
    .expect("add file failed");

    let diff = commands::cmd_diff(&ctx, GAME, "a", false)
        .await
        .expect("diff failed");
    let added: Vec<_> = diff
        .iter()
        .filter(|e| e.change == FileChangeType::Added)
        .map(|e| e.path.path().to_string())
        .collect();
    assert_eq!(added, vec!["Data/plugin.esp".to_string()]);
    assert!(!game_dir.join("Data/plugin.esp").exists(), "Diff must not touch disk");

    // Phase 4: apply it
    let result = commands::cmd_sync(&ctx, GAME, "a", 2, None, false, CliGcMode::Off)
        .await
        .expect("sync failed");
    assert_eq!(result.report.files_extracted, 1);
    assert_eq!(
        std::fs::read(game_dir.join("Data/plugin.esp")).unwrap(),
        b"plugin data"
    );

    let diff = commands::cmd_diff(&ctx, GAME, "a", true)
        .await
        .expect("second diff failed");
    assert!(
        diff.iter().all(|e| e.change == FileChangeType::None),
        "System should be clean"
    );

    // Phase 5: deactivate back to vanilla
    let report = commands::cmd_deactivate(&ctx, GAME)
        .await
        .expect("deactivate failed");
    assert!(report.is_some());
    assert!(!game_dir.join("Data/plugin.esp").exists());
    assert_eq!(
        std::fs::read(game_dir.join("game.exe")).unwrap(),
        b"vanilla game executable"
    );
    assert!(commands::cmd_deactivate(&ctx, GAME).await.unwrap().is_none());

    // Phase 6: the loadout still owns its files
    let gc = commands::cmd_gc(&ctx).await.expect("gc failed");
    assert_eq!(gc.removed, 0);
    let plugin = loadout_core::Hash::of_bytes(b"plugin data");
    assert!(ctx.files.have_file(plugin).await.unwrap());

    // Phase 7: a fresh context sees the same state
    drop(ctx);
    let ctx = AppContext::open(Some(data_dir)).expect("reopen data dir");
    let reopened = ctx.find_loadout(&ctx.find_install(GAME).unwrap(), "a").unwrap();
    assert_eq!(reopened.id, loadout.id);
}

#[tokio::test]
async fn unknown_names_are_reported() {
    let work_dir = tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(work_dir.path().to_path_buf()).unwrap();
    let ctx = AppContext::open(Some(root.join("data"))).unwrap();

    let err = commands::cmd_rescan(&ctx, "Missing Game", false)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Missing Game"));
    assert!(commands::cmd_install_add(
        &ctx,
        GAME.into(),
        "steam".into(),
        root.join("nowhere"),
        vec![]
    )
    .is_err());
}
