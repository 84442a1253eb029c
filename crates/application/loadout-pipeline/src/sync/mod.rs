use loadout_core::{GameInstallId, GamePath, IntrinsicError, Loadout, LoadoutId};
use loadout_infra::FileStoreError;
use loadout_persistence::StorageError;
use loadout_scanner::ScanError;
use serde::{Deserialize, Serialize};

use crate::gc::GcMode;

pub mod cleanup;
pub mod engine;
pub mod execute;

pub use engine::LoadoutSynchronizer;
pub use execute::ActionExecutor;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Upper bound on the bytes one pass may copy into the file store.
    pub max_backup_size: u64,
    pub hash_threads: usize,
    /// Re-hash every file during re-indexing instead of trusting mtime and size.
    pub ignore_modified_dates: bool,
    /// Garbage collection after each applied pass.
    pub gc_mode: GcMode,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_backup_size: loadout_config::MAX_BACKUP_SIZE,
            hash_threads: loadout_config::DEFAULT_HASH_THREADS,
            ignore_modified_dates: false,
            gc_mode: GcMode::RunSynchronously,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub files_backed_up: u64,
    pub bytes_backed_up: u64,
    pub files_ingested: u64,
    pub intrinsics_adapted: u64,
    pub files_deleted: u64,
    pub files_extracted: u64,
    pub intrinsics_written: u64,
    pub reified_deletes: u64,
    pub warnings: u64,
    pub directories_removed: u64,
}

impl SyncReport {
    pub fn merge(&mut self, other: &SyncReport) {
        self.files_backed_up += other.files_backed_up;
        self.bytes_backed_up += other.bytes_backed_up;
        self.files_ingested += other.files_ingested;
        self.intrinsics_adapted += other.intrinsics_adapted;
        self.files_deleted += other.files_deleted;
        self.files_extracted += other.files_extracted;
        self.intrinsics_written += other.intrinsics_written;
        self.reified_deletes += other.reified_deletes;
        self.warnings += other.warnings;
        self.directories_removed += other.directories_removed;
    }

    pub fn touched_disk(&self) -> bool {
        self.files_deleted + self.files_extracted + self.intrinsics_written > 0
    }
}

#[derive(Debug, Clone)]
pub struct SyncResult {
    pub loadout: Loadout,
    pub report: SyncReport,
}

/// High-level error type for synchronization passes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("File store error: {0}")]
    FileStore(#[from] FileStoreError),
    #[error("Indexing error: {0}")]
    Scan(#[from] ScanError),
    #[error("Intrinsic file error: {0}")]
    Intrinsic(#[from] IntrinsicError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Backing up {total} bytes would exceed the limit of {limit} bytes")]
    BackupTooLarge { total: u64, limit: u64 },
    #[error("Unknown game installation {0}")]
    UnknownInstall(GameInstallId),
    #[error("Unknown loadout {0}")]
    UnknownLoadout(LoadoutId),
    #[error("{0} has no registered location on this installation")]
    UnresolvedPath(GamePath),
    #[error("{0} cannot run without a loadout")]
    InvalidAction(&'static str),
    #[error("Worker task failed: {0}")]
    Task(String),
}

impl SyncError {
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            SyncError::Scan(ScanError::Cancelled) | SyncError::FileStore(FileStoreError::Cancelled)
        )
    }
}
