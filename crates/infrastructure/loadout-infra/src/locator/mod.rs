use async_trait::async_trait;
use loadout_core::{GameInstallMetadata, GameStore, LocatorId};
use std::collections::HashMap;
use std::sync::RwLock;

/// A store's report of which build is installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatorResult {
    pub store: GameStore,
    pub locator_ids: Vec<LocatorId>,
}

#[async_trait]
pub trait GameLocator: Send + Sync {
    /// Every store installation found for the game. Empty when nothing is found.
    async fn find(&self, install: &GameInstallMetadata) -> Vec<LocatorResult>;
}

/// Reports the build recorded on the installation itself, unless an
/// explicit override was registered for it.
#[derive(Default)]
pub struct RecordedGameLocator {
    overrides: RwLock<HashMap<String, Vec<LocatorResult>>>,
}

impl RecordedGameLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces what is reported for `game`.
    pub fn set(&self, game: impl Into<String>, results: Vec<LocatorResult>) {
        if let Ok(mut map) = self.overrides.write() {
            map.insert(game.into(), results);
        }
    }
}

#[async_trait]
impl GameLocator for RecordedGameLocator {
    async fn find(&self, install: &GameInstallMetadata) -> Vec<LocatorResult> {
        if let Ok(map) = self.overrides.read() {
            if let Some(results) = map.get(&install.game) {
                return results.clone();
            }
        }
        if install.locator_ids.is_empty() {
            return Vec::new();
        }
        vec![LocatorResult {
            store: install.store.clone(),
            locator_ids: install.locator_ids.clone(),
        }]
    }
}
