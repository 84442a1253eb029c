use serde::{Deserialize, Serialize};

pub mod actions;
pub mod builder;
pub mod conflict;
pub mod diff;
pub mod hash;
pub mod install;
pub mod intrinsic;
pub mod loadout;
pub mod path;
pub mod signature;
pub mod tree;

pub use actions::{Action, Actions};
pub use builder::{merge_states, SyncTreeBuilder};
pub use diff::{disk_diff, DiskDiffEntry, FileChangeType};
pub use intrinsic::{IniDocument, IniFile, IniFiles, IntrinsicError, IntrinsicFile, IntrinsicProvider};
pub use hash::Hash;
pub use install::{GameInstallMetadata, GameStore};
pub use loadout::{
    CollectionDownload, CollectionRule, DownloadId, GameInstallId, GroupKind, ItemId, ItemKind,
    Loadout, LoadoutId, LoadoutItem, LoadoutKind, LocatorId, RuleKind,
};
pub use path::{GamePath, LocationId, PathError};
pub use signature::{Signature, SignatureBuilder};
pub use tree::{LoadoutSourceItemType, SyncNode, SyncNodePart, SyncTree};

/// Last observed state of one file on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskStateEntry {
    pub path: GamePath,
    pub hash: Hash,
    pub size: u64,
    /// Nanoseconds since the Unix epoch.
    pub last_modified: i64,
}

/// A file shipped with a specific game build, as listed by the hash catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameFile {
    pub path: GamePath,
    pub hash: Hash,
    pub size: u64,
}
