use crate::actions::{Action, Actions};
use crate::hash::Hash;
use crate::path::GamePath;
use crate::tree::{SyncNode, SyncTree};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileChangeType {
    None,
    Added,
    Modified,
    Removed,
}

/// What applying a loadout would do to one path, as shown to a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiskDiffEntry {
    pub path: GamePath,
    pub change: FileChangeType,
    pub hash: Hash,
    pub size: u64,
}

/// Summarizes a processed tree as per-path changes, sorted by path.
/// Paths whose only action is a reified delete are omitted.
pub fn disk_diff(tree: &SyncTree) -> Vec<DiskDiffEntry> {
    let mut entries: Vec<DiskDiffEntry> = tree
        .iter()
        .filter_map(|(path, node)| classify(path, node))
        .collect();
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn classify(path: &GamePath, node: &SyncNode) -> Option<DiskDiffEntry> {
    let loadout = node.loadout.map(|p| (p.hash, p.size));
    let disk = node.disk.map(|p| (p.hash, p.size));
    let zero = (Hash::ZERO, 0);

    let (change, (hash, size)) = if node.has(Action::DoNothing) {
        (FileChangeType::None, loadout.or(disk).unwrap_or(zero))
    } else if node.has(Action::WarnOfUnableToExtract) {
        (FileChangeType::Added, loadout.unwrap_or(zero))
    } else if node.has(Action::ExtractToDisk) {
        let change = if node.has(Action::DeleteFromDisk) {
            FileChangeType::Modified
        } else {
            FileChangeType::Added
        };
        (change, loadout.unwrap_or(zero))
    } else if node.has(Action::DeleteFromDisk) {
        (FileChangeType::Removed, disk.unwrap_or(zero))
    } else if node.has(Action::IngestFromDisk) {
        (FileChangeType::None, disk.unwrap_or(zero))
    } else if node.actions == Actions::ADD_REIFIED_DELETE {
        return None;
    } else {
        (FileChangeType::None, zero)
    };

    Some(DiskDiffEntry {
        path: path.clone(),
        change,
        hash,
        size,
    })
}
