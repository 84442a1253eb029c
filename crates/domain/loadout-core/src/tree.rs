use crate::actions::{Action, Actions};
use crate::hash::Hash;
use crate::loadout::ItemId;
use crate::path::GamePath;
use crate::signature::{map_actions, Signature, SignatureBuilder};
use crate::DiskStateEntry;
use std::collections::HashMap;

/// One side's view of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncNodePart {
    pub hash: Hash,
    pub size: u64,
    /// Nanoseconds since the Unix epoch; zero for parts that never touched disk.
    pub last_modified: i64,
    /// The loadout item that contributed this part, for loadout parts.
    pub item: Option<ItemId>,
}

impl SyncNodePart {
    pub fn new(hash: Hash, size: u64) -> Self {
        Self {
            hash,
            size,
            last_modified: 0,
            item: None,
        }
    }

    pub fn from_item(item: ItemId, hash: Hash, size: u64) -> Self {
        Self {
            item: Some(item),
            ..Self::new(hash, size)
        }
    }
}

impl From<&DiskStateEntry> for SyncNodePart {
    fn from(entry: &DiskStateEntry) -> Self {
        Self {
            hash: entry.hash,
            size: entry.size,
            last_modified: entry.last_modified,
            item: None,
        }
    }
}

/// Where a node's loadout part came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadoutSourceItemType {
    /// A file authored into the loadout, or no loadout part at all.
    #[default]
    Loadout,
    /// A vanilla game file.
    Game,
    /// A tombstone. The node carries no loadout part.
    Deleted,
    /// Generated at sync time.
    Intrinsic,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncNode {
    pub loadout: Option<SyncNodePart>,
    pub disk: Option<SyncNodePart>,
    pub previous: Option<SyncNodePart>,
    pub source: LoadoutSourceItemType,
    /// Intrinsic files only: whether disk edits can be parsed back.
    pub adaptable: bool,
    pub signature: Signature,
    pub actions: Actions,
}

impl SyncNode {
    pub fn has(&self, action: Action) -> bool {
        self.actions.contains(action)
    }
}

/// Arena of sync nodes keyed by path. Nodes are addressed by index and never
/// removed during a pass; iteration follows insertion order.
#[derive(Debug, Clone, Default)]
pub struct SyncTree {
    paths: Vec<GamePath>,
    nodes: Vec<SyncNode>,
    index: HashMap<GamePath, usize>,
}

impl SyncTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node for `path`, inserting an empty node first when
    /// missing. The flag reports whether the node already existed.
    pub fn entry(&mut self, path: &GamePath) -> (usize, bool) {
        if let Some(&idx) = self.index.get(path) {
            return (idx, true);
        }
        let idx = self.nodes.len();
        self.paths.push(path.clone());
        self.nodes.push(SyncNode::default());
        self.index.insert(path.clone(), idx);
        (idx, false)
    }

    pub fn insert(&mut self, path: GamePath, node: SyncNode) -> usize {
        let (idx, _) = self.entry(&path);
        self.nodes[idx] = node;
        idx
    }

    pub fn index_of(&self, path: &GamePath) -> Option<usize> {
        self.index.get(path).copied()
    }

    pub fn get(&self, path: &GamePath) -> Option<&SyncNode> {
        self.index_of(path).map(|idx| &self.nodes[idx])
    }

    pub fn get_mut(&mut self, path: &GamePath) -> Option<&mut SyncNode> {
        let idx = self.index_of(path)?;
        Some(&mut self.nodes[idx])
    }

    pub fn node(&self, idx: usize) -> &SyncNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut SyncNode {
        &mut self.nodes[idx]
    }

    pub fn path(&self, idx: usize) -> &GamePath {
        &self.paths[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GamePath, &SyncNode)> {
        self.paths.iter().zip(self.nodes.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&GamePath, &mut SyncNode)> {
        self.paths.iter().zip(self.nodes.iter_mut())
    }

    /// Nodes flagged with `action`.
    pub fn flagged(&self, action: Action) -> impl Iterator<Item = (&GamePath, &SyncNode)> {
        self.iter().filter(move |(_, node)| node.has(action))
    }

    /// Union of every node's actions.
    pub fn all_actions(&self) -> Actions {
        self.nodes
            .iter()
            .fold(Actions::EMPTY, |acc, node| acc | node.actions)
    }

    /// True when some node needs more than `DoNothing`.
    pub fn needs_work(&self) -> bool {
        self.nodes.iter().any(|node| !node.actions.is_noop())
    }

    /// Computes every node's signature and actions.
    ///
    /// `archived` answers whether the file store holds a hash; `ignored` marks
    /// paths excluded from backups.
    pub fn process<A, I>(&mut self, archived: A, ignored: I)
    where
        A: Fn(&Hash) -> bool,
        I: Fn(&GamePath) -> bool,
    {
        for (path, node) in self.paths.iter().zip(self.nodes.iter_mut()) {
            let loadout_hash = node.loadout.map(|p| p.hash).filter(|h| !h.is_zero());
            let builder = SignatureBuilder {
                disk_hash: node.disk.map(|p| p.hash),
                prev_hash: node.previous.map(|p| p.hash),
                loadout_hash,
                disk_archived: node.disk.is_some_and(|p| archived(&p.hash)),
                prev_archived: node.previous.is_some_and(|p| archived(&p.hash)),
                loadout_archived: loadout_hash.is_some_and(|h| archived(&h)),
                path_is_ignored: ignored(path),
                intrinsic_ingests: node.adaptable,
            };
            node.signature = builder.build();
            node.actions = map_actions(node.signature, node.source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_reuses_existing_nodes() {
        let mut tree = SyncTree::new();
        let p = GamePath::game("a.txt").unwrap();
        let (first, existed) = tree.entry(&p);
        assert!(!existed);
        tree.node_mut(first).disk = Some(SyncNodePart::new(Hash::ZERO, 0));
        let (second, existed) = tree.entry(&p);
        assert!(existed);
        assert_eq!(first, second);
        assert_eq!(tree.len(), 1);
        assert!(tree.get(&p).unwrap().disk.is_some());
    }

    #[test]
    fn zero_hash_disk_file_is_still_present() {
        let mut tree = SyncTree::new();
        let p = GamePath::game("empty.txt").unwrap();
        tree.insert(
            p.clone(),
            SyncNode {
                disk: Some(SyncNodePart::new(Hash::ZERO, 0)),
                ..Default::default()
            },
        );
        tree.process(|_| true, |_| false);
        assert_eq!(tree.get(&p).unwrap().actions, Actions::INGEST_FROM_DISK);
    }
}
