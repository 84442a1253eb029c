#![allow(dead_code)]

use camino::Utf8PathBuf;
use loadout_core::{
    GameInstallMetadata, GamePath, GameStore, Hash, Loadout, LoadoutId, LocatorId,
};
use loadout_infra::{
    BackupRequest, CatalogueVersion, FileHashCatalogue, FileStore, KnownFile, LocalFileStore,
    LocatorResult, RecordedGameLocator,
};
use loadout_persistence::{LoadoutDataStore, RedbLoadoutDataStore, StoreTransaction};
use loadout_pipeline::{LoadoutSynchronizer, SyncOptions};
use std::sync::Arc;

pub const BUILD: &str = "100";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .with_test_writer()
        .try_init();
}

/// A managed installation in a temporary directory with its own database
/// and file store.
pub struct Harness {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
    pub game_root: Utf8PathBuf,
    pub store: Arc<RedbLoadoutDataStore>,
    pub files: Arc<LocalFileStore>,
    pub install: GameInstallMetadata,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let game_root = root.join("game");
        std::fs::create_dir_all(&game_root).unwrap();

        let data = root.join("data");
        let store = Arc::new(RedbLoadoutDataStore::new(data.clone()));
        let files =
            Arc::new(LocalFileStore::new(data.join(loadout_config::FILE_STORE_DIR_NAME)).unwrap());

        let mut install =
            GameInstallMetadata::new("Test Game", GameStore::new("steam"), game_root.clone());
        install.locator_ids.push(LocatorId(BUILD.into()));
        let mut tx = StoreTransaction::new();
        tx.put_install(&install);
        store.commit(tx).unwrap();

        Self {
            _dir: dir,
            root,
            game_root,
            store,
            files,
            install,
        }
    }

    /// A catalogue listing `vanilla` as the files of build [`BUILD`].
    pub fn catalogue(vanilla: &[(&str, &[u8])]) -> FileHashCatalogue {
        if vanilla.is_empty() {
            return FileHashCatalogue::default();
        }
        Self::catalogue_builds(&[(BUILD, "1.0", vanilla)])
    }

    /// A catalogue with one steam build per `(locator id, version, files)`.
    pub fn catalogue_builds(builds: &[(&str, &str, &[(&str, &[u8])])]) -> FileHashCatalogue {
        let mut catalogue = FileHashCatalogue::default();
        for (build, version, files) in builds {
            catalogue.add_version(CatalogueVersion {
                store: GameStore::new("steam"),
                locator_ids: vec![LocatorId(build.to_string())],
                vanity_version: version.to_string(),
                files: files
                    .iter()
                    .map(|(path, data)| KnownFile {
                        path: GamePath::game(path).unwrap(),
                        size: data.len() as u64,
                        minimal_hash: Hash::of_bytes(data),
                        hash: Hash::of_bytes(data),
                    })
                    .collect(),
            });
        }
        catalogue
    }

    /// Reports `build` as the installed build from now on.
    pub fn report_build(locator: &RecordedGameLocator, build: &str) {
        locator.set(
            "Test Game",
            vec![LocatorResult {
                store: GameStore::new("steam"),
                locator_ids: vec![LocatorId(build.into())],
            }],
        );
    }

    pub fn synchronizer_located(
        &self,
        catalogue: FileHashCatalogue,
        locator: Arc<RecordedGameLocator>,
    ) -> LoadoutSynchronizer {
        LoadoutSynchronizer::new(
            self.store.clone(),
            self.files.clone(),
            Arc::new(catalogue),
            locator,
        )
    }

    pub fn synchronizer(&self, catalogue: FileHashCatalogue) -> LoadoutSynchronizer {
        self.synchronizer_with(catalogue, SyncOptions::default())
    }

    pub fn synchronizer_with(
        &self,
        catalogue: FileHashCatalogue,
        options: SyncOptions,
    ) -> LoadoutSynchronizer {
        LoadoutSynchronizer::new(
            self.store.clone(),
            self.files.clone(),
            Arc::new(catalogue),
            Arc::new(RecordedGameLocator::new()),
        )
        .with_options(options)
    }

    pub fn game_path(&self, rel: &str) -> Utf8PathBuf {
        self.game_root.join(rel)
    }

    pub fn write_game(&self, rel: &str, data: &[u8]) {
        let path = self.game_path(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }

    pub fn read_game(&self, rel: &str) -> Option<Vec<u8>> {
        std::fs::read(self.game_path(rel)).ok()
    }

    /// Puts `data` into the file store, as if it came from a downloaded mod.
    pub async fn archive(&self, data: &[u8]) -> Hash {
        let hash = Hash::of_bytes(data);
        let staging = self.root.join("staging");
        std::fs::create_dir_all(&staging).unwrap();
        let source = staging.join(hash.to_hex());
        std::fs::write(&source, data).unwrap();
        self.files
            .backup_files(vec![BackupRequest {
                source,
                hash,
                size: data.len() as u64,
            }])
            .await
            .unwrap();
        hash
    }

    /// An empty loadout for build [`BUILD`], already stored.
    pub fn new_loadout(&self, name: &str, short_name: &str) -> Loadout {
        let mut loadout = Loadout::new(self.install.id, name, short_name);
        loadout.locator_ids.push(LocatorId(BUILD.into()));
        loadout.game_version = "1.0".into();
        self.put_loadout(&loadout);
        loadout
    }

    pub fn put_loadout(&self, loadout: &Loadout) {
        let mut tx = StoreTransaction::new();
        tx.put_loadout(loadout);
        self.store.commit(tx).unwrap();
    }

    pub fn loadout(&self, id: LoadoutId) -> Loadout {
        self.store.get_loadout(id).unwrap().unwrap()
    }

    pub fn stored_install(&self) -> GameInstallMetadata {
        self.store.get_install(self.install.id).unwrap().unwrap()
    }
}
