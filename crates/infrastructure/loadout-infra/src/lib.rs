pub mod catalogue;
pub mod hashing;
pub mod io_utils;
pub mod locator;
pub mod store;

// Re-exports for convenience
pub use catalogue::{CatalogueError, CatalogueVersion, FileHashCatalogue, FileHashes, KnownFile};
pub use hashing::{hash_file, minimal_hash, HashError};
pub use locator::{GameLocator, LocatorResult, RecordedGameLocator};
pub use store::{BackupRequest, ExtractRequest, FileStore, FileStoreError, LocalFileStore, StoreEvent};
