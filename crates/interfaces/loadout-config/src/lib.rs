//! Central configuration constants for runtime limits and defaults.

/// Largest total number of bytes a single synchronization pass may back up.
/// A pass over this limit is rejected before anything is touched. 2 GiB.
pub const MAX_BACKUP_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// Default number of worker threads used for hashing during re-indexing.
pub const DEFAULT_HASH_THREADS: usize = 4;

/// Minimum allowed worker threads.
pub const MIN_HASH_THREADS: usize = 1;

/// Maximum allowed worker threads.
pub const MAX_HASH_THREADS: usize = 16;

/// Number of files restored or backed up concurrently by the file store.
pub const FILE_STORE_CONCURRENCY: usize = 8;

/// Bytes read from each sampled region when computing a minimal hash.
pub const MINIMAL_HASH_CHUNK: u64 = 64 * 1024;

/// Chunk size for streaming full-content hashes.
pub const HASH_BUFFER_SIZE: usize = 1024 * 1024;

/// Extensions (lowercase, with dot; empty means none) that receive `+x` after extraction on Unix.
pub const EXECUTABLE_EXTENSIONS: &[&str] = &[
    "", ".sh", ".bin", ".run", ".py", ".pl", ".php", ".rb", ".out", ".elf",
];

/// Name of the group created in every loadout to hold ingested files and reified deletes.
pub const OVERRIDES_GROUP_NAME: &str = "Overrides";

/// Name of the default user collection created with every loadout.
pub const USER_COLLECTION_NAME: &str = "My Mods";

/// Reason recorded on tombstones created from files the user removed on disk.
pub const REIFIED_DELETE_REASON: &str = "Reified delete";

/// File name of the state database inside the data directory.
pub const DATABASE_FILE_NAME: &str = "loadouts.redb";

/// Directory name of the content-addressed file store inside the data directory.
pub const FILE_STORE_DIR_NAME: &str = "archives";

/// File name of the JSON hash catalogue inside the data directory.
pub const CATALOGUE_FILE_NAME: &str = "catalogue.json";

/// Convenience function to clamp a thread value into allowed range.
pub fn clamp_threads(v: usize) -> usize {
    v.clamp(MIN_HASH_THREADS, MAX_HASH_THREADS)
}

/// Game version recorded on a loadout when the catalogue has no vanity version for its build.
pub const DEFAULT_GAME_VERSION: &str = "Unknown";
