//! Known hashes of vanilla game files, per store and build.

use crate::hashing::{hash_file, minimal_hash, HashError};
use camino::{Utf8Path, Utf8PathBuf};
use loadout_core::{GameFile, GamePath, GameStore, Hash, LocationId, LocatorId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum CatalogueError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("catalogue is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Hash(#[from] HashError),
    #[error("{0} is not valid UTF-8")]
    NonUtf8Path(String),
}

/// Hashes recorded for one file of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownFile {
    pub path: GamePath,
    pub size: u64,
    pub minimal_hash: Hash,
    pub hash: Hash,
}

/// One build of a game as published by a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueVersion {
    pub store: GameStore,
    pub locator_ids: Vec<LocatorId>,
    pub vanity_version: String,
    pub files: Vec<KnownFile>,
}

impl CatalogueVersion {
    fn matches(&self, store: &GameStore, locator_ids: &[LocatorId]) -> bool {
        &self.store == store && self.locator_ids.iter().any(|id| locator_ids.contains(id))
    }

    /// Records every file below `root` as a clean `Game` location.
    pub fn from_directory(
        root: &Utf8Path,
        store: GameStore,
        locator_ids: Vec<LocatorId>,
        vanity_version: impl Into<String>,
    ) -> Result<Self, CatalogueError> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root).follow_links(false) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let abs = Utf8PathBuf::from_path_buf(entry.path().to_path_buf())
                .map_err(|p| CatalogueError::NonUtf8Path(p.display().to_string()))?;
            let Ok(rel) = abs.strip_prefix(root) else {
                continue;
            };
            let Ok(path) = GamePath::new(LocationId::game(), rel.as_str()) else {
                warn!("Skipping unrepresentable path {}", abs);
                continue;
            };
            let (hash, size) = hash_file(&abs)?;
            files.push(KnownFile {
                path,
                size,
                minimal_hash: minimal_hash(&abs)?,
                hash,
            });
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Catalogued {} files under {}", files.len(), root);

        Ok(Self {
            store,
            locator_ids,
            vanity_version: vanity_version.into(),
            files,
        })
    }
}

/// Lookup interface used by indexing and synchronization.
pub trait FileHashes: Send + Sync {
    /// Distinct known hashes for a path with the given size, across all builds.
    fn candidates(&self, path: &GamePath, size: u64) -> Vec<KnownFile>;

    /// Vanilla files of the builds identified by `locator_ids`, sorted by path.
    /// A path present in several builds appears once per distinct content.
    fn game_files(&self, store: &GameStore, locator_ids: &[LocatorId]) -> Vec<GameFile>;

    fn vanity_version(&self, store: &GameStore, locator_ids: &[LocatorId]) -> Option<String>;
}

/// JSON-backed catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHashCatalogue {
    pub versions: Vec<CatalogueVersion>,
}

impl FileHashCatalogue {
    pub fn load(path: &Utf8Path) -> Result<Self, CatalogueError> {
        if !path.exists() {
            debug!("No catalogue at {}, starting empty", path);
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Utf8Path) -> Result<(), CatalogueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Adds a build, replacing an existing one with an overlapping locator id.
    pub fn add_version(&mut self, version: CatalogueVersion) {
        self.versions
            .retain(|v| !v.matches(&version.store, &version.locator_ids));
        self.versions.push(version);
    }
}

impl FileHashes for FileHashCatalogue {
    fn candidates(&self, path: &GamePath, size: u64) -> Vec<KnownFile> {
        let mut found: Vec<KnownFile> = Vec::new();
        for file in self.versions.iter().flat_map(|v| v.files.iter()) {
            if &file.path == path && file.size == size && !found.iter().any(|f| f == file) {
                found.push(file.clone());
            }
        }
        found
    }

    fn game_files(&self, store: &GameStore, locator_ids: &[LocatorId]) -> Vec<GameFile> {
        let mut seen: BTreeMap<(GamePath, Hash), u64> = BTreeMap::new();
        for version in self.versions.iter().filter(|v| v.matches(store, locator_ids)) {
            for file in &version.files {
                seen.insert((file.path.clone(), file.hash), file.size);
            }
        }
        seen.into_iter()
            .map(|((path, hash), size)| GameFile { path, hash, size })
            .collect()
    }

    fn vanity_version(&self, store: &GameStore, locator_ids: &[LocatorId]) -> Option<String> {
        self.versions
            .iter()
            .find(|v| v.matches(store, locator_ids))
            .map(|v| v.vanity_version.clone())
    }
}
