use std::collections::HashSet;

use loadout_core::{
    DiskStateEntry, GameInstallId, GameInstallMetadata, Hash, Loadout, LoadoutId,
};

pub const CURRENT_SCHEMA: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbState {
    Missing,
    Valid,
    Busy,
    Corrupt,
    NewerSchema { found: u32, supported: u32 },
}

/// One staged mutation. Operations apply in the order they were staged.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    PutInstall(GameInstallMetadata),
    PutLoadout(Loadout),
    RemoveLoadout(LoadoutId),
    PutDiskEntry(GameInstallId, DiskStateEntry),
    ClearDiskState(GameInstallId),
    /// Replace the applied snapshot with the disk state as of this point.
    SnapshotApplied(GameInstallId),
    ClearApplied(GameInstallId),
    Pin(GameInstallId, Hash),
    ClearPins(GameInstallId),
}

/// Mutations staged in memory and applied atomically by
/// [`LoadoutDataStore::commit`]. Dropping it discards everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreTransaction {
    ops: Vec<StoreOp>,
}

impl StoreTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: StoreOp) {
        self.ops.push(op);
    }

    pub fn put_install(&mut self, install: &GameInstallMetadata) {
        self.push(StoreOp::PutInstall(install.clone()));
    }

    pub fn put_loadout(&mut self, loadout: &Loadout) {
        self.push(StoreOp::PutLoadout(loadout.clone()));
    }

    pub fn put_disk_entry(&mut self, install: GameInstallId, entry: DiskStateEntry) {
        self.push(StoreOp::PutDiskEntry(install, entry));
    }

    pub fn pin(&mut self, install: GameInstallId, hash: Hash) {
        self.push(StoreOp::Pin(install, hash));
    }

    pub fn ops(&self) -> &[StoreOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

pub trait LoadoutDataStore: Send + Sync {
    fn validate(&self) -> Result<DbState, crate::StorageError>;

    fn get_install(&self, id: GameInstallId) -> Result<Option<GameInstallMetadata>, crate::StorageError>;
    fn list_installs(&self) -> Result<Vec<GameInstallMetadata>, crate::StorageError>;

    fn get_loadout(&self, id: LoadoutId) -> Result<Option<Loadout>, crate::StorageError>;
    /// Every stored loadout of `install`, including ones marked deleted.
    fn list_loadouts(&self, install: GameInstallId) -> Result<Vec<Loadout>, crate::StorageError>;

    /// Last indexed state of the installation's files, sorted by path.
    fn disk_state(&self, install: GameInstallId) -> Result<Vec<DiskStateEntry>, crate::StorageError>;
    /// Disk state as of the last loadout application, sorted by path.
    fn applied_state(&self, install: GameInstallId) -> Result<Vec<DiskStateEntry>, crate::StorageError>;

    /// Pinned hashes of one installation, or of all of them.
    fn pinned_hashes(&self, install: Option<GameInstallId>) -> Result<HashSet<Hash>, crate::StorageError>;

    /// Applies every staged op in one write transaction.
    fn commit(&self, tx: StoreTransaction) -> Result<(), crate::StorageError>;
}
