pub mod gc;
pub mod sync;
pub mod tracker;

// Re-export core engine components
pub use gc::{GarbageCollector, GcMode, GcReport, StoreGarbageCollector};
pub use sync::{
    ActionExecutor, LoadoutSynchronizer, SyncError, SyncOptions, SyncReport, SyncResult,
};
pub use tracker::{ExtractSnapshot, ProgressTracker};

// Re-export scanner types often needed by consumers
pub use loadout_scanner::{ScanStats, ScanStrategy};
