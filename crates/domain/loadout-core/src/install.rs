use crate::loadout::{GameInstallId, LoadoutId, LocatorId};
use crate::path::{GamePath, LocationId};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The storefront an installation came from (`steam`, `gog`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameStore(pub String);

impl GameStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }
}

impl fmt::Display for GameStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A game installation registered for management.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameInstallMetadata {
    pub id: GameInstallId,
    pub game: String,
    pub store: GameStore,
    /// Absolute root of each logical location.
    pub locations: BTreeMap<LocationId, Utf8PathBuf>,
    /// Build identifiers last reported for this installation.
    #[serde(default)]
    pub locator_ids: Vec<LocatorId>,
    #[serde(default)]
    pub ignored_backup_folders: Vec<GamePath>,
    #[serde(default)]
    pub ignored_index_folders: Vec<GamePath>,
    pub last_synced_loadout: Option<LoadoutId>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub initial_scan_at: Option<DateTime<Utc>>,
}

impl GameInstallMetadata {
    pub fn new(game: impl Into<String>, store: GameStore, game_root: impl Into<Utf8PathBuf>) -> Self {
        let mut locations = BTreeMap::new();
        locations.insert(LocationId::game(), game_root.into());
        Self {
            id: GameInstallId::new(),
            game: game.into(),
            store,
            locations,
            locator_ids: Vec::new(),
            ignored_backup_folders: Vec::new(),
            ignored_index_folders: Vec::new(),
            last_synced_loadout: None,
            last_synced_at: None,
            last_scanned_at: None,
            initial_scan_at: None,
        }
    }

    pub fn location_root(&self, location: &LocationId) -> Option<&Utf8Path> {
        self.locations.get(location).map(|p| p.as_path())
    }

    /// Absolute filesystem path for a game path, if its location is registered.
    pub fn resolve(&self, path: &GamePath) -> Option<Utf8PathBuf> {
        let root = self.location_root(path.location())?;
        if path.is_root() {
            return Some(root.to_path_buf());
        }
        Some(root.join(path.path()))
    }

    /// The game path of an absolute path under one of the location roots.
    /// The most specific root wins when roots are nested.
    pub fn to_game_path(&self, absolute: &Utf8Path) -> Option<GamePath> {
        self.locations
            .iter()
            .filter_map(|(location, root)| {
                let rel = absolute.strip_prefix(root).ok()?;
                Some((root.as_str().len(), location, rel))
            })
            .max_by_key(|(len, _, _)| *len)
            .and_then(|(_, location, rel)| GamePath::new(location.clone(), rel.as_str()).ok())
    }

    pub fn is_backup_ignored(&self, path: &GamePath) -> bool {
        self.ignored_backup_folders
            .iter()
            .any(|folder| path.starts_with(folder))
    }

    pub fn is_index_ignored(&self, path: &GamePath) -> bool {
        self.ignored_index_folders
            .iter()
            .any(|folder| path.starts_with(folder))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_both_directions() {
        let mut install = GameInstallMetadata::new("Skyrim", GameStore::new("Steam"), "/games/skyrim");
        install
            .locations
            .insert(LocationId::new("Saves"), Utf8PathBuf::from("/home/me/saves"));

        let path = GamePath::game("Data/plugin.esp").unwrap();
        let abs = install.resolve(&path).unwrap();
        assert_eq!(abs, Utf8PathBuf::from("/games/skyrim/Data/plugin.esp"));
        assert_eq!(install.to_game_path(&abs), Some(path));

        let save = Utf8Path::new("/home/me/saves/slot1.ess");
        assert_eq!(
            install.to_game_path(save).unwrap().to_string(),
            "{Saves}/slot1.ess"
        );
        assert_eq!(install.store.0, "steam");
    }

    #[test]
    fn ignored_folders_match_by_segment() {
        let mut install = GameInstallMetadata::new("Game", GameStore::new("gog"), "/g");
        install
            .ignored_backup_folders
            .push(GamePath::game("Data/Cache").unwrap());
        assert!(install.is_backup_ignored(&GamePath::game("Data/Cache/x.bin").unwrap()));
        assert!(!install.is_backup_ignored(&GamePath::game("Data/CacheOther/x.bin").unwrap()));
        assert!(!install.is_index_ignored(&GamePath::game("Data/Cache/x.bin").unwrap()));
    }
}
