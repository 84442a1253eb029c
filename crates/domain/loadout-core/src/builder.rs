use crate::conflict::should_win;
use crate::hash::Hash;
use crate::intrinsic::{IntrinsicError, IntrinsicFile};
use crate::loadout::{ItemKind, Loadout};
use crate::tree::{LoadoutSourceItemType, SyncNodePart, SyncTree};
use crate::{DiskStateEntry, GameFile};
use tracing::{debug, warn};

/// Assembles the three-way view of an installation.
///
/// Layers are applied in a fixed order: vanilla game files, then enabled
/// loadout files and tombstones, then intrinsic files, and finally the
/// previous and current disk snapshots.
pub struct SyncTreeBuilder<'a> {
    loadout: Option<&'a Loadout>,
    game_files: Vec<&'a GameFile>,
    intrinsics: &'a [Box<dyn IntrinsicFile>],
}

impl<'a> SyncTreeBuilder<'a> {
    pub fn new(loadout: &'a Loadout) -> Self {
        Self {
            loadout: Some(loadout),
            game_files: Vec::new(),
            intrinsics: &[],
        }
    }

    /// A builder whose desired state is only the vanilla game files.
    pub fn game_only() -> Self {
        Self {
            loadout: None,
            game_files: Vec::new(),
            intrinsics: &[],
        }
    }

    pub fn with_game_files(mut self, files: &'a [GameFile]) -> Self {
        let mut sorted: Vec<&GameFile> = files.iter().collect();
        sorted.sort_by(|a, b| a.path.cmp(&b.path));
        self.game_files = sorted;
        self
    }

    pub fn with_intrinsics(mut self, intrinsics: &'a [Box<dyn IntrinsicFile>]) -> Self {
        self.intrinsics = intrinsics;
        self
    }

    pub fn build(
        &self,
        disk: &[DiskStateEntry],
        previous: &[DiskStateEntry],
    ) -> Result<SyncTree, IntrinsicError> {
        let mut tree = SyncTree::new();

        self.add_game_files(&mut tree);
        if let Some(loadout) = self.loadout {
            add_loadout_items(&mut tree, loadout);
            self.add_intrinsics(&mut tree, loadout)?;
        }
        drop_tombstone_parts(&mut tree);
        merge_states(&mut tree, disk, previous);

        debug!("Built sync tree with {} nodes", tree.len());
        Ok(tree)
    }

    fn add_game_files(&self, tree: &mut SyncTree) {
        for file in &self.game_files {
            let (idx, existed) = tree.entry(&file.path);
            if existed {
                // TODO: pick the winner by locator id priority instead of path order
                warn!("Duplicate game file {}, keeping the later entry", file.path);
            }
            let node = tree.node_mut(idx);
            node.loadout = Some(SyncNodePart::new(file.hash, file.size));
            node.source = LoadoutSourceItemType::Game;
        }
    }

    fn add_intrinsics(&self, tree: &mut SyncTree, loadout: &Loadout) -> Result<(), IntrinsicError> {
        let mut seen = std::collections::HashSet::new();
        let mut buffer = Vec::new();
        for file in self.intrinsics {
            let path = file.path();
            if !seen.insert(path.clone()) {
                warn!("Intrinsic file {} registered twice, keeping the later one", path);
            }

            buffer.clear();
            file.write(loadout, &mut buffer)?;

            let (idx, _) = tree.entry(path);
            let node = tree.node_mut(idx);
            node.loadout = Some(SyncNodePart::new(Hash::of_bytes(&buffer), buffer.len() as u64));
            node.source = LoadoutSourceItemType::Intrinsic;
            node.adaptable = file.supports_ingest();
        }
        Ok(())
    }
}

fn add_loadout_items(tree: &mut SyncTree, loadout: &Loadout) {
    for item in loadout.targeted_items() {
        if !loadout.is_enabled(item.id) {
            continue;
        }

        let (target, part, source) = match &item.kind {
            ItemKind::File { target, hash, size } => (
                target,
                SyncNodePart::from_item(item.id, *hash, *size),
                LoadoutSourceItemType::Loadout,
            ),
            ItemKind::Deleted { target, .. } => (
                target,
                SyncNodePart::from_item(item.id, Hash::ZERO, 0),
                LoadoutSourceItemType::Deleted,
            ),
            ItemKind::Group(_) => continue,
        };

        let (idx, existed) = tree.entry(target);
        let node = tree.node_mut(idx);

        if existed {
            if let Some(existing) = node.loadout {
                if !should_win(loadout, &existing, node.source, &part, source) {
                    debug!("{} keeps {:?} over item {}", target, existing.item, item.id);
                    continue;
                }
                debug!("{} replaced by item {}", target, item.id);
            }
        }

        node.loadout = Some(part);
        node.source = source;
    }
}

fn drop_tombstone_parts(tree: &mut SyncTree) {
    for (_, node) in tree.iter_mut() {
        if node.source == LoadoutSourceItemType::Deleted {
            node.loadout = None;
        }
    }
}

/// Records the previous snapshot, then the current disk state, on the
/// matching nodes, creating nodes for paths the loadout does not know.
pub fn merge_states(tree: &mut SyncTree, disk: &[DiskStateEntry], previous: &[DiskStateEntry]) {
    for entry in previous {
        let (idx, _) = tree.entry(&entry.path);
        tree.node_mut(idx).previous = Some(SyncNodePart::from(entry));
    }
    for entry in disk {
        let (idx, _) = tree.entry(&entry.path);
        tree.node_mut(idx).disk = Some(SyncNodePart::from(entry));
    }
}
