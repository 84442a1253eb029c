use loadout_core::{
    disk_diff, Action, Actions, DiskStateEntry, FileChangeType, GameFile, GameInstallId, GamePath,
    GroupKind, Hash, IniDocument, IniFile, IntrinsicFile, Loadout, SyncTree, SyncTreeBuilder,
};
use std::collections::HashSet;

// --- Helpers ---

fn entry(path: &GamePath, data: &[u8]) -> DiskStateEntry {
    DiskStateEntry {
        path: path.clone(),
        hash: Hash::of_bytes(data),
        size: data.len() as u64,
        last_modified: 1_700_000_000_000_000_000,
    }
}

fn process(tree: &mut SyncTree, archived: &[Hash]) {
    let archived: HashSet<Hash> = archived.iter().copied().collect();
    tree.process(|h| archived.contains(h), |_| false);
}

fn new_loadout() -> Loadout {
    Loadout::new(GameInstallId::new(), "Loadout A", "a")
}

// --- Scenarios ---

#[test]
fn first_extract_of_a_new_plugin() {
    let path = GamePath::game("plugin.esp").unwrap();
    let mut l = new_loadout();
    let group = l.add_group("Plugin Mod", None, GroupKind::Mod);
    let h1 = Hash::of_bytes(b"plugin v1");
    l.add_file(group, path.clone(), h1, 9);

    let mut tree = SyncTreeBuilder::new(&l).build(&[], &[]).unwrap();
    process(&mut tree, &[h1]);

    let node = tree.get(&path).unwrap();
    assert_eq!(node.signature.shorthand(), "xxA_xxX_i");
    assert_eq!(node.actions, Actions::EXTRACT_TO_DISK);
}

#[test]
fn unarchived_loadout_file_cannot_be_extracted() {
    let path = GamePath::game("plugin.esp").unwrap();
    let mut l = new_loadout();
    let group = l.add_group("Plugin Mod", None, GroupKind::Mod);
    l.add_file(group, path.clone(), Hash::of_bytes(b"plugin v1"), 9);

    let mut tree = SyncTreeBuilder::new(&l).build(&[], &[]).unwrap();
    process(&mut tree, &[]);
    assert_eq!(tree.get(&path).unwrap().actions, Actions::WARN_OF_UNABLE_TO_EXTRACT);
}

#[test]
fn new_file_on_disk_is_backed_up_and_ingested() {
    let path = GamePath::game("extra.ini").unwrap();
    let l = new_loadout();
    let disk = [entry(&path, b"[Section]\nkey=1\n")];

    let mut tree = SyncTreeBuilder::new(&l).build(&disk, &[]).unwrap();
    process(&mut tree, &[]);

    let node = tree.get(&path).unwrap();
    assert!(node.has(Action::BackupFile));
    assert!(node.has(Action::IngestFromDisk));
    assert!(!node.has(Action::DeleteFromDisk));
}

#[test]
fn newer_mod_owns_a_conflicting_readme() {
    let path = GamePath::game("readme.txt").unwrap();
    let mut l = new_loadout();
    let older = l.add_group("Older Mod", None, GroupKind::Mod);
    let newer = l.add_group("Newer Mod", None, GroupKind::Mod);
    l.add_file(older, path.clone(), Hash::of_bytes(b"old readme"), 10);
    let winner = l.add_file(newer, path.clone(), Hash::of_bytes(b"new readme"), 10);

    let tree = SyncTreeBuilder::new(&l).build(&[], &[]).unwrap();
    let part = tree.get(&path).unwrap().loadout.unwrap();
    assert_eq!(part.item, Some(winner));
    assert_eq!(part.hash, Hash::of_bytes(b"new readme"));
}

#[test]
fn synced_state_needs_nothing() {
    let path = GamePath::game("data/mod.pak").unwrap();
    let data = b"pak contents";
    let mut l = new_loadout();
    let group = l.add_group("Mod", None, GroupKind::Mod);
    l.add_file(group, path.clone(), Hash::of_bytes(data), data.len() as u64);
    let state = [entry(&path, data)];

    let mut tree = SyncTreeBuilder::new(&l).build(&state, &state).unwrap();
    process(&mut tree, &[Hash::of_bytes(data)]);

    assert_eq!(tree.get(&path).unwrap().signature.shorthand(), "AAA_XXX_i");
    assert!(!tree.needs_work());
}

#[test]
fn changed_loadout_backs_up_the_unarchived_disk_copy_first() {
    let path = GamePath::game("data/config.xml").unwrap();
    let mut l = new_loadout();
    let group = l.add_group("Mod", None, GroupKind::Mod);
    let replacement = Hash::of_bytes(b"v2");
    l.add_file(group, path.clone(), replacement, 2);
    let state = [entry(&path, b"v1")];

    let mut tree = SyncTreeBuilder::new(&l).build(&state, &state).unwrap();
    process(&mut tree, &[replacement]);

    let node = tree.get(&path).unwrap();
    let order: Vec<Action> = node.actions.iter().collect();
    assert_eq!(
        order,
        vec![Action::BackupFile, Action::DeleteFromDisk, Action::ExtractToDisk]
    );
}

#[test]
fn tombstone_removes_a_vanilla_file() {
    let path = GamePath::game("intro.bik").unwrap();
    let data = b"movie";
    let game = vec![GameFile {
        path: path.clone(),
        hash: Hash::of_bytes(data),
        size: data.len() as u64,
    }];
    let mut l = new_loadout();
    let overrides = l.add_group("Overrides", None, GroupKind::Overrides);
    l.add_deleted(overrides, path.clone(), "Reified delete");
    let state = [entry(&path, data)];

    let mut tree = SyncTreeBuilder::new(&l)
        .with_game_files(&game)
        .build(&state, &state)
        .unwrap();
    process(&mut tree, &[Hash::of_bytes(data)]);
    assert_eq!(tree.get(&path).unwrap().actions, Actions::DELETE_FROM_DISK);

    // Once gone from disk the tombstone keeps it gone.
    let mut tree = SyncTreeBuilder::new(&l)
        .with_game_files(&game)
        .build(&[], &state)
        .unwrap();
    process(&mut tree, &[Hash::of_bytes(data)]);
    assert_eq!(tree.get(&path).unwrap().actions, Actions::DO_NOTHING);
}

#[test]
fn user_deletion_of_a_synced_file_is_reified() {
    let path = GamePath::game("shaders.cache").unwrap();
    let data = b"cache";
    let mut l = new_loadout();
    let group = l.add_group("Mod", None, GroupKind::Mod);
    l.add_file(group, path.clone(), Hash::of_bytes(data), data.len() as u64);

    let mut tree = SyncTreeBuilder::new(&l)
        .build(&[], &[entry(&path, data)])
        .unwrap();
    process(&mut tree, &[Hash::of_bytes(data)]);
    assert_eq!(tree.get(&path).unwrap().actions, Actions::ADD_REIFIED_DELETE);
    assert!(disk_diff(&tree).is_empty());
}

#[test]
fn edited_ini_is_adapted_back_into_the_loadout() {
    let path = GamePath::game("settings.ini").unwrap();
    let mut l = new_loadout();
    let mut doc = IniDocument::default();
    doc.set("Video", "Width", "1280");
    l.ini_files.insert(path.clone(), doc);

    let ini: Vec<Box<dyn IntrinsicFile>> = vec![Box::new(IniFile::new(path.clone()))];
    let mut written = Vec::new();
    ini[0].write(&l, &mut written).unwrap();
    let previous = [entry(&path, &written)];
    let edited = [entry(&path, b"[Video]\nWidth=1920\n")];

    let mut tree = SyncTreeBuilder::new(&l)
        .with_intrinsics(&ini)
        .build(&edited, &previous)
        .unwrap();
    process(&mut tree, &[]);
    assert_eq!(
        tree.get(&path).unwrap().actions,
        Action::AdaptLoadout | Action::WriteIntrinsic
    );

    ini[0].ingest(b"[Video]\nWidth=1920\n", &mut l).unwrap();
    assert_eq!(l.ini_files[&path].get("video", "width"), Some("1920"));
}

#[test]
fn diff_reports_extractions_as_added() {
    let path = GamePath::game("plugin.esp").unwrap();
    let mut l = new_loadout();
    let group = l.add_group("Plugin Mod", None, GroupKind::Mod);
    let h1 = Hash::of_bytes(b"plugin v1");
    l.add_file(group, path.clone(), h1, 9);

    let mut tree = SyncTreeBuilder::new(&l).build(&[], &[]).unwrap();
    process(&mut tree, &[h1]);
    let diff = disk_diff(&tree);
    assert_eq!(diff.len(), 1);
    assert_eq!(diff[0].change, FileChangeType::Added);
    assert_eq!(diff[0].hash, h1);
}
