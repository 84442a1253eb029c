use anyhow::{anyhow, bail, Context, Result};
use camino::Utf8PathBuf;
use directories::ProjectDirs;
use loadout_config::{CATALOGUE_FILE_NAME, FILE_STORE_DIR_NAME};
use loadout_core::{GameInstallMetadata, Loadout};
use loadout_infra::{FileHashCatalogue, LocalFileStore, RecordedGameLocator};
use loadout_persistence::{DbState, LoadoutDataStore, RedbLoadoutDataStore, StorageErrorKind};
use loadout_pipeline::{LoadoutSynchronizer, SyncOptions};
use std::sync::Arc;
use tracing::warn;

const QUALIFIER: &str = "com";
const ORG: &str = "loadout";
const APP: &str = "manager";

/// The database, file store and catalogue living in one data directory.
pub struct AppContext {
    pub data_dir: Utf8PathBuf,
    pub store: Arc<RedbLoadoutDataStore>,
    pub files: Arc<LocalFileStore>,
}

impl AppContext {
    /// Opens `data_dir`, or the platform data directory when `None`.
    pub fn open(data_dir: Option<Utf8PathBuf>) -> Result<Self> {
        let data_dir = match data_dir {
            Some(dir) => dir,
            None => default_data_dir()?,
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir))?;

        let store = Arc::new(RedbLoadoutDataStore::new(data_dir.clone()));
        let state = match store.validate() {
            Ok(state) => state,
            Err(e) if e.kind() == StorageErrorKind::Busy => {
                bail!("The state database is in use by another process")
            }
            Err(e) => return Err(e).context("Failed to open the state database"),
        };
        match state {
            DbState::Missing | DbState::Valid => {}
            DbState::Busy => bail!("The state database is in use by another process"),
            DbState::Corrupt => warn!(
                "The state database in {} was corrupt and has been set aside, starting fresh",
                data_dir
            ),
            DbState::NewerSchema { found, supported } => bail!(
                "The state database uses schema {} but this build supports up to {}",
                found,
                supported
            ),
        }

        let files = LocalFileStore::new(data_dir.join(FILE_STORE_DIR_NAME))
            .context("Failed to open the file store")?;

        Ok(Self {
            data_dir,
            store,
            files: Arc::new(files),
        })
    }

    pub fn catalogue_path(&self) -> Utf8PathBuf {
        self.data_dir.join(CATALOGUE_FILE_NAME)
    }

    pub fn load_catalogue(&self) -> Result<FileHashCatalogue> {
        let path = self.catalogue_path();
        FileHashCatalogue::load(&path).with_context(|| format!("Failed to read {}", path))
    }

    pub fn synchronizer(&self, options: SyncOptions) -> Result<LoadoutSynchronizer> {
        let catalogue = self.load_catalogue()?;
        Ok(LoadoutSynchronizer::new(
            self.store.clone(),
            self.files.clone(),
            Arc::new(catalogue),
            Arc::new(RecordedGameLocator::new()),
        )
        .with_options(options))
    }

    /// Looks an installation up by game name (case-insensitive) or id.
    pub fn find_install(&self, name_or_id: &str) -> Result<GameInstallMetadata> {
        self.store
            .list_installs()?
            .into_iter()
            .find(|i| i.game.eq_ignore_ascii_case(name_or_id) || i.id.to_string() == name_or_id)
            .ok_or_else(|| anyhow!("Installation '{}' not found", name_or_id))
    }

    /// Looks a visible loadout up by short name, name or id.
    pub fn find_loadout(&self, install: &GameInstallMetadata, name: &str) -> Result<Loadout> {
        self.store
            .list_loadouts(install.id)?
            .into_iter()
            .filter(|l| l.is_visible())
            .find(|l| {
                l.short_name == name
                    || l.name.eq_ignore_ascii_case(name)
                    || l.id.to_string() == name
            })
            .ok_or_else(|| anyhow!("Loadout '{}' not found for {}", name, install.game))
    }
}

fn default_data_dir() -> Result<Utf8PathBuf> {
    let proj_dirs = ProjectDirs::from(QUALIFIER, ORG, APP)
        .ok_or_else(|| anyhow!("Could not determine data directory"))?;
    Utf8PathBuf::from_path_buf(proj_dirs.data_dir().to_path_buf())
        .map_err(|p| anyhow!("Data directory {} is not valid UTF-8", p.display()))
}
