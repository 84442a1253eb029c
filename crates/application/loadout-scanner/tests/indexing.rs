use camino::Utf8PathBuf;
use filetime::FileTime;
use loadout_core::{
    DiskStateEntry, GameFile, GameInstallMetadata, GamePath, GameStore, Hash, LocationId, LocatorId,
};
use loadout_infra::{minimal_hash, CatalogueVersion, FileHashCatalogue, FileHashes, KnownFile};
use loadout_scanner::{ScanError, ScanStrategy, StateIndexer};
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

struct Fixture {
    _dir: tempfile::TempDir,
    root: Utf8PathBuf,
    install: GameInstallMetadata,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().join("game")).unwrap();
    fs::create_dir_all(&root).unwrap();
    let install = GameInstallMetadata::new("Test Game", GameStore::new("steam"), root.clone());
    Fixture {
        _dir: dir,
        root,
        install,
    }
}

fn write(root: &Utf8PathBuf, rel: &str, data: &[u8]) -> Utf8PathBuf {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, data).unwrap();
    path
}

fn indexer() -> StateIndexer {
    StateIndexer::new(Arc::new(FileHashCatalogue::default())).with_threads(2)
}

#[test]
fn indexes_every_location_and_skips_ignored_folders() {
    let mut fx = fixture();
    write(&fx.root, "game.exe", b"exe");
    write(&fx.root, "Data/plugin.esp", b"plugin");
    write(&fx.root, "Cache/shader.bin", b"cache");

    let saves = fx.root.parent().unwrap().join("saves");
    write(&saves, "slot1.sav", b"save");
    fx.install.locations.insert(LocationId::new("Saves"), saves);
    fx.install
        .locations
        .insert(LocationId::new("Missing"), fx.root.join("does-not-exist"));
    fx.install
        .ignored_index_folders
        .push(GamePath::game("Cache").unwrap());

    let outcome = indexer()
        .reindex(&fx.install, &[], ScanStrategy::SmartCache, &CancellationToken::new())
        .unwrap();

    let paths: Vec<String> = outcome.entries.iter().map(|e| e.path.to_string()).collect();
    assert_eq!(
        paths,
        vec!["{Game}/Data/plugin.esp", "{Game}/game.exe", "{Saves}/slot1.sav"]
    );
    assert!(outcome.changed);
    let exe = &outcome.entries[1];
    assert_eq!(exe.hash, Hash::of_bytes(b"exe"));
    assert_eq!(exe.size, 3);
}

#[test]
fn unchanged_mtime_and_size_reuse_previous_entry() {
    let fx = fixture();
    let file = write(&fx.root, "config.ini", b"a=1");
    filetime::set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let mtime = StateIndexer::mtime(&fs::metadata(&file).unwrap());

    // A stale hash is kept as long as the cheap checks agree.
    let stale = DiskStateEntry {
        path: GamePath::game("config.ini").unwrap(),
        hash: Hash::of_bytes(b"stale"),
        size: 3,
        last_modified: mtime,
    };
    let cancel = CancellationToken::new();

    let outcome = indexer()
        .reindex(&fx.install, &[stale.clone()], ScanStrategy::SmartCache, &cancel)
        .unwrap();
    assert_eq!(outcome.entries, vec![stale.clone()]);
    assert!(!outcome.changed);
    assert_eq!(outcome.stats.files_cached, 1);

    let forced = indexer()
        .reindex(&fx.install, &[stale], ScanStrategy::ForceRehash, &cancel)
        .unwrap();
    assert_eq!(forced.entries[0].hash, Hash::of_bytes(b"a=1"));
    assert!(forced.changed);
    assert_eq!(forced.stats.files_cached, 0);
}

#[test]
fn removed_files_are_retracted() {
    let fx = fixture();
    let keep = write(&fx.root, "keep.txt", b"keep");
    let gone = write(&fx.root, "gone.txt", b"gone");
    let cancel = CancellationToken::new();

    let first = indexer()
        .reindex(&fx.install, &[], ScanStrategy::SmartCache, &cancel)
        .unwrap();
    assert_eq!(first.entries.len(), 2);

    let again = indexer()
        .reindex(&fx.install, &first.entries, ScanStrategy::SmartCache, &cancel)
        .unwrap();
    assert!(!again.changed);

    fs::remove_file(&gone).unwrap();
    let after = indexer()
        .reindex(&fx.install, &first.entries, ScanStrategy::SmartCache, &cancel)
        .unwrap();
    assert!(after.changed);
    assert_eq!(after.entries.len(), 1);
    assert_eq!(after.entries[0].path, fx.install.to_game_path(&keep).unwrap());
}

/// Deletes each file the moment the indexer asks about it, after the walk
/// has already listed it.
struct DeletingHashes {
    root: Utf8PathBuf,
}

impl FileHashes for DeletingHashes {
    fn candidates(&self, path: &GamePath, size: u64) -> Vec<KnownFile> {
        let _ = fs::remove_file(self.root.join(path.path()));
        vec![KnownFile {
            path: path.clone(),
            size,
            minimal_hash: Hash::of_bytes(b"minimal"),
            hash: Hash::of_bytes(b"full"),
        }]
    }

    fn game_files(&self, _store: &GameStore, _locator_ids: &[LocatorId]) -> Vec<GameFile> {
        Vec::new()
    }

    fn vanity_version(&self, _store: &GameStore, _locator_ids: &[LocatorId]) -> Option<String> {
        None
    }
}

#[test]
fn files_deleted_during_the_scan_are_retracted() {
    let fx = fixture();
    write(&fx.root, "Logs/session.log", b"short lived");
    let hashes = DeletingHashes {
        root: fx.root.clone(),
    };

    let outcome = StateIndexer::new(Arc::new(hashes))
        .reindex(&fx.install, &[], ScanStrategy::ForceRehash, &CancellationToken::new())
        .unwrap();

    assert!(outcome.entries.is_empty());
    assert!(!fx.root.join("Logs/session.log").exists());
}

#[test]
fn catalogue_match_resolves_full_hash_from_minimal_hash() {
    let fx = fixture();
    let exe = write(&fx.root, "game.exe", b"vanilla exe");
    let path = GamePath::game("game.exe").unwrap();
    let minimal = minimal_hash(&exe).unwrap();

    // A recorded full hash that differs from the real content proves the
    // catalogue answered instead of a full read.
    let recorded = Hash::of_bytes(b"recorded by catalogue");
    let mut catalogue = FileHashCatalogue::default();
    catalogue.add_version(CatalogueVersion {
        store: GameStore::new("steam"),
        locator_ids: vec![LocatorId("1".into())],
        vanity_version: "1.0".into(),
        files: vec![KnownFile {
            path: path.clone(),
            size: 11,
            minimal_hash: minimal,
            hash: recorded,
        }],
    });

    let outcome = StateIndexer::new(Arc::new(catalogue.clone()))
        .reindex(&fx.install, &[], ScanStrategy::SmartCache, &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.entries[0].hash, recorded);
    assert_eq!(outcome.stats.files_matched, 1);

    // Two builds agree on the minimal hash but not on the content.
    catalogue.add_version(CatalogueVersion {
        store: GameStore::new("steam"),
        locator_ids: vec![LocatorId("2".into())],
        vanity_version: "1.1".into(),
        files: vec![KnownFile {
            path,
            size: 11,
            minimal_hash: minimal,
            hash: Hash::of_bytes(b"another build"),
        }],
    });
    let outcome = StateIndexer::new(Arc::new(catalogue))
        .reindex(&fx.install, &[], ScanStrategy::SmartCache, &CancellationToken::new())
        .unwrap();
    assert_eq!(outcome.entries[0].hash, Hash::of_bytes(b"vanilla exe"));
    assert_eq!(outcome.stats.files_matched, 0);
}

#[test]
fn cancelled_scan_returns_cancelled() {
    let fx = fixture();
    write(&fx.root, "a.txt", b"a");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = indexer()
        .reindex(&fx.install, &[], ScanStrategy::SmartCache, &cancel)
        .unwrap_err();
    assert!(matches!(err, ScanError::Cancelled));
}
