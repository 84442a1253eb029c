//! Removal of folders left empty after files were deleted from disk.

use camino::Utf8Path;
use loadout_core::{DiskStateEntry, GameInstallMetadata, GamePath};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// For each folder that lost a file, removes its highest ancestor below the
/// location root that holds no remaining disk-state file. Returns how many
/// directory trees were removed.
pub fn remove_empty_directories(
    install: &GameInstallMetadata,
    emptied: &BTreeSet<GamePath>,
    remaining: &BTreeMap<GamePath, DiskStateEntry>,
) -> u64 {
    let mut in_use: HashSet<GamePath> = HashSet::new();
    for path in remaining.keys() {
        let mut dir = path.parent();
        while !dir.is_root() && in_use.insert(dir.clone()) {
            dir = dir.parent();
        }
    }

    let mut removed_roots: Vec<GamePath> = Vec::new();
    let mut removed = 0;

    for folder in emptied {
        if removed_roots.iter().any(|done| folder.starts_with(done)) {
            continue;
        }

        // Unused ancestors, nearest first.
        let mut chain = Vec::new();
        let mut dir = folder.clone();
        while !dir.is_root() && !in_use.contains(&dir) {
            chain.push(dir.clone());
            dir = dir.parent();
        }

        for candidate in chain.iter().rev() {
            let Some(abs) = install.resolve(candidate) else {
                break;
            };
            if !abs.is_dir() || holds_location_root(install, &abs) {
                continue;
            }
            if contains_files(&abs) {
                debug!("Keeping {}, it still holds unindexed files", abs);
                continue;
            }
            match std::fs::remove_dir_all(&abs) {
                Ok(()) => {
                    debug!("Removed empty directory {}", abs);
                    removed_roots.push(candidate.clone());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove empty directory {}: {}", abs, e),
            }
            break;
        }
    }
    removed
}

fn holds_location_root(install: &GameInstallMetadata, dir: &Utf8Path) -> bool {
    install.locations.values().any(|root| root.starts_with(dir))
}

fn contains_files(dir: &Utf8Path) -> bool {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .any(|entry| match entry {
            Ok(entry) => !entry.file_type().is_dir(),
            // Anything unreadable counts as occupied.
            Err(_) => true,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use loadout_core::{GameStore, Hash};

    fn setup() -> (tempfile::TempDir, GameInstallMetadata) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().join("game")).unwrap();
        std::fs::create_dir_all(&root).unwrap();
        let install = GameInstallMetadata::new("Game", GameStore::new("steam"), root);
        (dir, install)
    }

    fn entry(path: &GamePath) -> DiskStateEntry {
        DiskStateEntry {
            path: path.clone(),
            hash: Hash::ZERO,
            size: 0,
            last_modified: 0,
        }
    }

    #[test]
    fn removes_highest_unused_ancestor() {
        let (_dir, install) = setup();
        let root = install.resolve(&GamePath::root(loadout_core::LocationId::game())).unwrap();
        std::fs::create_dir_all(root.join("Data/Mods/Deep/Er")).unwrap();
        std::fs::create_dir_all(root.join("Data/Textures")).unwrap();
        std::fs::write(root.join("Data/Textures/sky.dds"), b"sky").unwrap();

        let kept = GamePath::game("Data/Textures/sky.dds").unwrap();
        let remaining = BTreeMap::from([(kept.clone(), entry(&kept))]);
        let emptied = BTreeSet::from([GamePath::game("Data/Mods/Deep/Er").unwrap()]);

        assert_eq!(remove_empty_directories(&install, &emptied, &remaining), 1);
        assert!(!root.join("Data/Mods").exists());
        assert!(root.join("Data/Textures/sky.dds").exists());
    }

    #[test]
    fn keeps_folders_with_unindexed_files() {
        let (_dir, install) = setup();
        let root = install.resolve(&GamePath::root(loadout_core::LocationId::game())).unwrap();
        std::fs::create_dir_all(root.join("Logs/Old")).unwrap();
        std::fs::write(root.join("Logs/latest.log"), b"log").unwrap();

        let emptied = BTreeSet::from([GamePath::game("Logs/Old").unwrap()]);
        assert_eq!(remove_empty_directories(&install, &emptied, &BTreeMap::new()), 1);
        assert!(root.join("Logs/latest.log").exists());
        assert!(!root.join("Logs/Old").exists());
    }

    #[test]
    fn never_removes_the_location_root() {
        let (_dir, install) = setup();
        let root = install.resolve(&GamePath::root(loadout_core::LocationId::game())).unwrap();
        let emptied = BTreeSet::from([GamePath::root(loadout_core::LocationId::game())]);
        assert_eq!(remove_empty_directories(&install, &emptied, &BTreeMap::new()), 0);
        assert!(root.exists());
    }
}
