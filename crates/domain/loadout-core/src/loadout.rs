use crate::hash::Hash;
use crate::intrinsic::IniDocument;
use crate::path::GamePath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoadoutId(pub Uuid);

impl LoadoutId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for LoadoutId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoadoutId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameInstallId(pub Uuid);

impl GameInstallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameInstallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameInstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of an item inside one loadout. Allocated monotonically, so a
/// higher id always means a more recently created item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Store-specific identifier of an installed game build (a depot manifest, a
/// package version, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocatorId(pub String);

impl fmt::Display for LocatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DownloadId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoadoutKind {
    #[default]
    Default,
    /// Marked for deletion; hidden from listings.
    Deleted,
}

/// A download that belongs to a specific collection revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDownload {
    pub id: DownloadId,
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleKind {
    /// `source` is installed before `other`, so `other` wins conflicts.
    Before,
    /// `source` is installed after `other`, so `source` wins conflicts.
    After,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRule {
    pub source: DownloadId,
    pub other: DownloadId,
    pub kind: RuleKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupKind {
    Mod,
    /// Holds files adopted from disk and reified deletes.
    Overrides,
    UserCollection { read_only: bool },
    CollectionItem { download: CollectionDownload },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Group(GroupKind),
    File { target: GamePath, hash: Hash, size: u64 },
    Deleted { target: GamePath, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadoutItem {
    pub id: ItemId,
    pub name: String,
    pub parent: Option<ItemId>,
    pub enabled: bool,
    pub kind: ItemKind,
}

impl LoadoutItem {
    pub fn target(&self) -> Option<&GamePath> {
        match &self.kind {
            ItemKind::File { target, .. } | ItemKind::Deleted { target, .. } => Some(target),
            ItemKind::Group(_) => None,
        }
    }

    pub fn group_kind(&self) -> Option<&GroupKind> {
        match &self.kind {
            ItemKind::Group(kind) => Some(kind),
            _ => None,
        }
    }
}

/// A user's intended state for one game installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loadout {
    pub id: LoadoutId,
    pub name: String,
    pub short_name: String,
    pub installation: GameInstallId,
    pub locator_ids: Vec<LocatorId>,
    pub game_version: String,
    pub kind: LoadoutKind,
    pub revision: u64,
    pub last_applied_at: Option<DateTime<Utc>>,
    pub next_item_id: u64,
    pub items: BTreeMap<ItemId, LoadoutItem>,
    #[serde(default)]
    pub collection_rules: Vec<CollectionRule>,
    #[serde(default)]
    pub ini_files: BTreeMap<GamePath, IniDocument>,
}

impl Loadout {
    pub fn new(installation: GameInstallId, name: impl Into<String>, short_name: impl Into<String>) -> Self {
        Self {
            id: LoadoutId::new(),
            name: name.into(),
            short_name: short_name.into(),
            installation,
            locator_ids: Vec::new(),
            game_version: String::new(),
            kind: LoadoutKind::Default,
            revision: 0,
            last_applied_at: None,
            next_item_id: 1,
            items: BTreeMap::new(),
            collection_rules: Vec::new(),
            ini_files: BTreeMap::new(),
        }
    }

    pub fn is_visible(&self) -> bool {
        self.kind != LoadoutKind::Deleted
    }

    pub fn allocate_id(&mut self) -> ItemId {
        let id = ItemId(self.next_item_id);
        self.next_item_id += 1;
        id
    }

    fn insert(&mut self, name: String, parent: Option<ItemId>, kind: ItemKind) -> ItemId {
        let id = self.allocate_id();
        self.items.insert(
            id,
            LoadoutItem {
                id,
                name,
                parent,
                enabled: true,
                kind,
            },
        );
        id
    }

    pub fn add_group(&mut self, name: impl Into<String>, parent: Option<ItemId>, kind: GroupKind) -> ItemId {
        self.insert(name.into(), parent, ItemKind::Group(kind))
    }

    pub fn add_file(&mut self, parent: ItemId, target: GamePath, hash: Hash, size: u64) -> ItemId {
        let name = target.file_name().to_string();
        self.insert(name, Some(parent), ItemKind::File { target, hash, size })
    }

    pub fn add_deleted(&mut self, parent: ItemId, target: GamePath, reason: impl Into<String>) -> ItemId {
        let name = target.file_name().to_string();
        self.insert(
            name,
            Some(parent),
            ItemKind::Deleted {
                target,
                reason: reason.into(),
            },
        )
    }

    pub fn item(&self, id: ItemId) -> Option<&LoadoutItem> {
        self.items.get(&id)
    }

    pub fn item_mut(&mut self, id: ItemId) -> Option<&mut LoadoutItem> {
        self.items.get_mut(&id)
    }

    /// Removes one item. Children are left in place.
    pub fn remove_item(&mut self, id: ItemId) -> Option<LoadoutItem> {
        self.items.remove(&id)
    }

    /// Removes an item and everything below it.
    pub fn remove_recursive(&mut self, id: ItemId) -> usize {
        let mut doomed = vec![id];
        let mut i = 0;
        while i < doomed.len() {
            let parent = doomed[i];
            doomed.extend(
                self.items
                    .values()
                    .filter(|item| item.parent == Some(parent))
                    .map(|item| item.id),
            );
            i += 1;
        }
        doomed
            .into_iter()
            .filter(|id| self.items.remove(id).is_some())
            .count()
    }

    pub fn set_enabled(&mut self, id: ItemId, enabled: bool) -> bool {
        match self.items.get_mut(&id) {
            Some(item) => {
                item.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// The item itself followed by each of its ancestors.
    pub fn this_and_parents(&self, id: ItemId) -> ThisAndParents<'_> {
        ThisAndParents {
            loadout: self,
            next: Some(id),
            remaining: self.items.len(),
        }
    }

    /// An item is active only when it and every ancestor are enabled.
    pub fn is_enabled(&self, id: ItemId) -> bool {
        self.this_and_parents(id).all(|item| item.enabled)
    }

    pub fn is_in_overrides(&self, id: ItemId) -> bool {
        self.this_and_parents(id)
            .any(|item| matches!(item.group_kind(), Some(GroupKind::Overrides)))
    }

    /// The collection download the item was installed from, if any.
    pub fn collection_download(&self, id: ItemId) -> Option<CollectionDownload> {
        self.this_and_parents(id).find_map(|item| match item.group_kind() {
            Some(GroupKind::CollectionItem { download }) => Some(*download),
            _ => None,
        })
    }

    pub fn overrides_group(&self) -> Option<ItemId> {
        self.items
            .values()
            .find(|item| matches!(item.group_kind(), Some(GroupKind::Overrides)))
            .map(|item| item.id)
    }

    pub fn children(&self, parent: ItemId) -> impl Iterator<Item = &LoadoutItem> {
        self.items
            .values()
            .filter(move |item| item.parent == Some(parent))
    }

    /// Files and tombstones, in ascending id order.
    pub fn targeted_items(&self) -> impl Iterator<Item = &LoadoutItem> {
        self.items.values().filter(|item| item.target().is_some())
    }

    pub fn rules(&self, source: DownloadId, other: DownloadId) -> impl Iterator<Item = &CollectionRule> {
        self.collection_rules
            .iter()
            .filter(move |rule| rule.source == source && rule.other == other)
    }
}

pub struct ThisAndParents<'a> {
    loadout: &'a Loadout,
    next: Option<ItemId>,
    // Bounds the walk so a corrupt parent cycle cannot loop forever.
    remaining: usize,
}

impl<'a> Iterator for ThisAndParents<'a> {
    type Item = &'a LoadoutItem;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let item = self.loadout.items.get(&self.next?)?;
        self.remaining -= 1;
        self.next = item.parent;
        Some(item)
    }
}
