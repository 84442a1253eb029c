use camino::Utf8PathBuf;
use loadout_core::{DiskStateEntry, GameInstallMetadata, GamePath, Hash};
use loadout_infra::{hash_file, minimal_hash, FileHashes, HashError};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Scan cancelled")]
    Cancelled,
    #[error("Hashing error: {0}")]
    Hash(#[from] HashError),
    #[error("Failed to start hashing workers: {0}")]
    ThreadPool(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStrategy {
    /// Keep the previous entry if mtime and size match.
    SmartCache,
    /// Ignore modification dates and re-hash everything.
    ForceRehash,
}

impl ScanStrategy {
    pub fn from_ignore_modified_dates(ignore: bool) -> Self {
        if ignore {
            Self::ForceRehash
        } else {
            Self::SmartCache
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ScanStats {
    pub files_scanned: u64,
    pub files_cached: u64,
    /// Files resolved through the catalogue's minimal hash.
    pub files_matched: u64,
    pub total_files: u64,
    pub bytes_processed: u64,
    pub total_bytes: u64,
}

#[derive(Default)]
struct Counters {
    scanned: AtomicU64,
    cached: AtomicU64,
    matched: AtomicU64,
    bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self, total_files: u64, total_bytes: u64) -> ScanStats {
        ScanStats {
            files_scanned: self.scanned.load(Ordering::Relaxed),
            files_cached: self.cached.load(Ordering::Relaxed),
            files_matched: self.matched.load(Ordering::Relaxed),
            total_files,
            bytes_processed: self.bytes.load(Ordering::Relaxed),
            total_bytes,
        }
    }
}

pub type ProgressCb = Arc<dyn Fn(ScanStats) + Send + Sync>;

/// Result of one re-index pass.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// Every indexed file, sorted by path.
    pub entries: Vec<DiskStateEntry>,
    /// Whether `entries` differs from the previous snapshot.
    pub changed: bool,
    pub stats: ScanStats,
}

/// Walks an installation's locations and produces its disk state.
pub struct StateIndexer {
    hashes: Arc<dyn FileHashes>,
    threads: usize,
    on_progress: Option<ProgressCb>,
}

struct Candidate {
    path: GamePath,
    absolute: Utf8PathBuf,
    size: u64,
    mtime: i64,
}

impl StateIndexer {
    pub fn new(hashes: Arc<dyn FileHashes>) -> Self {
        Self {
            hashes,
            threads: loadout_config::DEFAULT_HASH_THREADS,
            on_progress: None,
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = loadout_config::clamp_threads(threads);
        self
    }

    pub fn with_progress(mut self, cb: ProgressCb) -> Self {
        self.on_progress = Some(cb);
        self
    }

    /// Nanoseconds since the Unix epoch, or 0 when the platform can't tell.
    pub fn mtime(meta: &fs::Metadata) -> i64 {
        meta.modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0)
    }

    pub fn reindex(
        &self,
        install: &GameInstallMetadata,
        previous: &[DiskStateEntry],
        strategy: ScanStrategy,
        cancel: &CancellationToken,
    ) -> Result<IndexOutcome, ScanError> {
        info!("Indexing {} ({:?})", install.game, strategy);

        let files = self.collect(install, cancel)?;
        let total_files = files.len() as u64;
        let total_bytes = files.iter().map(|c| c.size).sum::<u64>();

        let known: HashMap<&GamePath, &DiskStateEntry> =
            previous.iter().map(|e| (&e.path, e)).collect();

        let counters = Counters::default();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| ScanError::ThreadPool(e.to_string()))?;

        let results: Result<Vec<Option<DiskStateEntry>>, ScanError> = pool.install(|| {
            files
                .par_iter()
                .map(|candidate| {
                    if cancel.is_cancelled() {
                        return Err(ScanError::Cancelled);
                    }
                    let entry = self.index_one(candidate, &known, strategy, &counters)?;
                    if let Some(cb) = &self.on_progress {
                        cb(counters.snapshot(total_files, total_bytes));
                    }
                    Ok(entry)
                })
                .collect()
        });
        let mut entries: Vec<DiskStateEntry> = results?.into_iter().flatten().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let mut before: Vec<&DiskStateEntry> = previous.iter().collect();
        before.sort_by(|a, b| a.path.cmp(&b.path));
        let changed = before.len() != entries.len()
            || before.iter().zip(entries.iter()).any(|(a, b)| *a != b);

        let stats = counters.snapshot(total_files, total_bytes);
        if let Some(cb) = &self.on_progress {
            cb(stats.clone());
        }
        debug!(
            "Indexed {} files ({} cached, {} via catalogue), changed: {}",
            stats.files_scanned, stats.files_cached, stats.files_matched, changed
        );

        Ok(IndexOutcome {
            entries,
            changed,
            stats,
        })
    }

    fn collect(
        &self,
        install: &GameInstallMetadata,
        cancel: &CancellationToken,
    ) -> Result<Vec<Candidate>, ScanError> {
        let mut found: BTreeMap<GamePath, Candidate> = BTreeMap::new();

        for (location, root) in &install.locations {
            if !root.is_dir() {
                debug!("Skipping missing location {} at {}", location, root);
                continue;
            }
            for entry in WalkDir::new(root).follow_links(false).into_iter() {
                if cancel.is_cancelled() {
                    return Err(ScanError::Cancelled);
                }
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!("Skipping unreadable entry under {}: {}", root, e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(absolute) = Utf8PathBuf::from_path_buf(entry.path().to_path_buf()) else {
                    warn!("Skipping non UTF-8 path {}", entry.path().display());
                    continue;
                };
                // Nested roots resolve to the most specific location.
                let Some(path) = install.to_game_path(&absolute) else {
                    continue;
                };
                if install.is_index_ignored(&path) || found.contains_key(&path) {
                    continue;
                }
                let meta = match entry.metadata() {
                    Ok(meta) => meta,
                    Err(e) => {
                        debug!("File vanished during walk {}: {}", absolute, e);
                        continue;
                    }
                };
                found.insert(
                    path.clone(),
                    Candidate {
                        path,
                        absolute,
                        size: meta.len(),
                        mtime: Self::mtime(&meta),
                    },
                );
            }
        }
        Ok(found.into_values().collect())
    }

    fn index_one(
        &self,
        candidate: &Candidate,
        known: &HashMap<&GamePath, &DiskStateEntry>,
        strategy: ScanStrategy,
        counters: &Counters,
    ) -> Result<Option<DiskStateEntry>, ScanError> {
        counters.scanned.fetch_add(1, Ordering::Relaxed);
        counters.bytes.fetch_add(candidate.size, Ordering::Relaxed);

        if strategy == ScanStrategy::SmartCache {
            if let Some(prev) = known.get(&candidate.path) {
                if prev.last_modified == candidate.mtime && prev.size == candidate.size {
                    counters.cached.fetch_add(1, Ordering::Relaxed);
                    return Ok(Some((*prev).clone()));
                }
            }
        }

        let hash = match self.hash_candidate(candidate, counters) {
            Ok(hash) => hash,
            // Deleted between the walk and hashing: same as never found.
            Err(ScanError::Hash(HashError::Io(e))) if e.kind() == ErrorKind::NotFound => {
                debug!("File vanished before hashing {}", candidate.absolute);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        trace!("Hashed {} -> {}", candidate.path, hash);

        Ok(Some(DiskStateEntry {
            path: candidate.path.clone(),
            hash,
            size: candidate.size,
            last_modified: candidate.mtime,
        }))
    }

    fn hash_candidate(&self, candidate: &Candidate, counters: &Counters) -> Result<Hash, ScanError> {
        match self.catalogue_hash(candidate)? {
            Some(hash) => {
                counters.matched.fetch_add(1, Ordering::Relaxed);
                Ok(hash)
            }
            None => Ok(hash_file(&candidate.absolute)?.0),
        }
    }

    /// Resolves the full hash from the catalogue when exactly one known
    /// content agrees with the file's minimal hash.
    fn catalogue_hash(&self, candidate: &Candidate) -> Result<Option<Hash>, ScanError> {
        let known = self.hashes.candidates(&candidate.path, candidate.size);
        if known.is_empty() {
            return Ok(None);
        }
        let minimal = minimal_hash(&candidate.absolute)?;
        let mut agreeing: Vec<Hash> = known
            .iter()
            .filter(|k| k.minimal_hash == minimal)
            .map(|k| k.hash)
            .collect();
        agreeing.sort();
        agreeing.dedup();
        match agreeing.as_slice() {
            [hash] => Ok(Some(*hash)),
            [] => Ok(None),
            _ => {
                debug!("Minimal hash collision for {}, hashing in full", candidate.path);
                Ok(None)
            }
        }
    }
}

