//! Content-addressed storage for backed-up and archived file contents.
//!
//! Objects live at `{root}/objects/{h[0..2]}/{h[2..4]}/{h[4..]}` keyed by the
//! hex MD5 of their content. Writes go through a unique temporary file and
//! an atomic rename, so concurrent writers of the same content are harmless.

use crate::io_utils::{replace_file, temp_sibling};
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use futures::stream::{self, StreamExt, TryStreamExt};
use loadout_config::{FILE_STORE_CONCURRENCY, HASH_BUFFER_SIZE};
use loadout_core::Hash;
use md5::Context;
use std::fs::{self, File};
use std::io::{Read, Write};
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object {0} is not in the file store")]
    NotFound(Hash),
    #[error("content of {path} hashed to {actual}, expected {expected}")]
    HashMismatch {
        path: Utf8PathBuf,
        expected: Hash,
        actual: Hash,
    },
    #[error("operation cancelled")]
    Cancelled,
    #[error("worker task failed: {0}")]
    Task(String),
}

/// A file on disk to copy into the store under its known hash.
#[derive(Debug, Clone)]
pub struct BackupRequest {
    pub source: Utf8PathBuf,
    pub hash: Hash,
    pub size: u64,
}

/// A stored object to restore at an absolute destination.
#[derive(Debug, Clone)]
pub struct ExtractRequest {
    pub hash: Hash,
    pub destination: Utf8PathBuf,
}

#[derive(Debug)]
pub enum StoreEvent {
    Started { total_files: usize },
    FileDone { destination: Utf8PathBuf, bytes: u64 },
}

#[async_trait]
pub trait FileStore: Send + Sync {
    async fn have_file(&self, hash: Hash) -> Result<bool, FileStoreError>;

    /// Copies each source into the store unless its hash is already present.
    /// The content is re-hashed while copying; a mismatch fails the call.
    async fn backup_files(&self, files: Vec<BackupRequest>) -> Result<(), FileStoreError>;

    async fn extract_files(
        &self,
        files: Vec<ExtractRequest>,
        cancel: &CancellationToken,
        progress: Option<Sender<StoreEvent>>,
    ) -> Result<(), FileStoreError>;

    async fn read_file(&self, hash: Hash) -> Result<Vec<u8>, FileStoreError>;

    async fn list_hashes(&self) -> Result<Vec<Hash>, FileStoreError>;

    /// Returns false when the object was not present.
    async fn remove(&self, hash: Hash) -> Result<bool, FileStoreError>;
}

pub struct LocalFileStore {
    root: Utf8PathBuf,
    concurrency: usize,
}

impl LocalFileStore {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Result<Self, FileStoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("objects"))?;
        debug!("File store initialized at {}", root);
        Ok(Self {
            root,
            concurrency: FILE_STORE_CONCURRENCY,
        })
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    fn object_path(&self, hash: &Hash) -> Utf8PathBuf {
        object_path(&self.root, hash)
    }
}

fn object_path(root: &Utf8Path, hash: &Hash) -> Utf8PathBuf {
    let hex = hash.to_hex();
    let (shard1, rest) = hex.split_at(2);
    let (shard2, name) = rest.split_at(2);
    root.join("objects").join(shard1).join(shard2).join(name)
}

/// Streams `source` into `dest`, returning the MD5 of what was copied.
fn copy_hashing(source: &Utf8Path, dest: &Utf8Path) -> Result<Hash, FileStoreError> {
    let mut input = File::open(source)?;
    let mut output = File::create(dest)?;
    let mut hasher = Context::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.consume(&buf[..n]);
        output.write_all(&buf[..n])?;
    }
    output.sync_all()?;
    Ok(Hash::from_bytes(hasher.finalize().0))
}

fn backup_one(root: &Utf8Path, request: &BackupRequest) -> Result<(), FileStoreError> {
    let target = object_path(root, &request.hash);
    if target.exists() {
        trace!("Object {} already stored", request.hash);
        return Ok(());
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = temp_sibling(&target, "tmp");
    let actual = match copy_hashing(&request.source, &tmp) {
        Ok(hash) => hash,
        Err(e) => {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
    };
    if actual != request.hash {
        let _ = fs::remove_file(&tmp);
        return Err(FileStoreError::HashMismatch {
            path: request.source.clone(),
            expected: request.hash,
            actual,
        });
    }

    if let Err(e) = fs::rename(&tmp, &target) {
        let _ = fs::remove_file(&tmp);
        // Another writer stored the same content first.
        if !target.exists() {
            return Err(e.into());
        }
    }
    debug!("Stored {} ({} bytes) from {}", request.hash, request.size, request.source);
    Ok(())
}

async fn extract_one(
    root: Utf8PathBuf,
    request: ExtractRequest,
    cancel: CancellationToken,
) -> Result<(Utf8PathBuf, u64), FileStoreError> {
    if cancel.is_cancelled() {
        return Err(FileStoreError::Cancelled);
    }

    let source = object_path(&root, &request.hash);
    let destination = request.destination.clone();
    let hash = request.hash;
    let (tmp, bytes) = tokio::task::spawn_blocking(move || {
        if !source.exists() {
            return Err(FileStoreError::NotFound(hash));
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = temp_sibling(&destination, "extract");
        match fs::copy(&source, &tmp) {
            Ok(bytes) => Ok((tmp, bytes)),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(FileStoreError::Io(e))
            }
        }
    })
    .await
    .map_err(|e| FileStoreError::Task(e.to_string()))??;

    replace_file(&tmp, &request.destination).await?;
    trace!("Extracted {} to {}", request.hash, request.destination);
    Ok((request.destination, bytes))
}

#[async_trait]
impl FileStore for LocalFileStore {
    async fn have_file(&self, hash: Hash) -> Result<bool, FileStoreError> {
        Ok(tokio::fs::try_exists(self.object_path(&hash)).await?)
    }

    async fn backup_files(&self, files: Vec<BackupRequest>) -> Result<(), FileStoreError> {
        if files.is_empty() {
            return Ok(());
        }
        debug!("Backing up {} files", files.len());

        stream::iter(files)
            .map(|request| {
                let root = self.root.clone();
                async move {
                    tokio::task::spawn_blocking(move || backup_one(&root, &request))
                        .await
                        .map_err(|e| FileStoreError::Task(e.to_string()))?
                }
            })
            .buffer_unordered(self.concurrency)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn extract_files(
        &self,
        files: Vec<ExtractRequest>,
        cancel: &CancellationToken,
        progress: Option<Sender<StoreEvent>>,
    ) -> Result<(), FileStoreError> {
        if let Some(tx) = &progress {
            let _ = tx
                .send(StoreEvent::Started {
                    total_files: files.len(),
                })
                .await;
        }

        stream::iter(files)
            .map(|request| extract_one(self.root.clone(), request, cancel.clone()))
            .buffer_unordered(self.concurrency)
            .and_then(|(destination, bytes)| {
                let tx = progress.clone();
                async move {
                    if let Some(tx) = tx {
                        let _ = tx.send(StoreEvent::FileDone { destination, bytes }).await;
                    }
                    Ok::<(), FileStoreError>(())
                }
            })
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    async fn read_file(&self, hash: Hash) -> Result<Vec<u8>, FileStoreError> {
        let path = self.object_path(&hash);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound(hash))
            }
            Err(e) => return Err(e.into()),
        };
        let actual = Hash::of_bytes(&data);
        if actual != hash {
            warn!("Stored object {} is corrupt", hash);
            return Err(FileStoreError::HashMismatch {
                path,
                expected: hash,
                actual,
            });
        }
        Ok(data)
    }

    async fn list_hashes(&self) -> Result<Vec<Hash>, FileStoreError> {
        let objects = self.root.join("objects");
        tokio::task::spawn_blocking(move || {
            let mut hashes = Vec::new();
            for entry in walkdir::WalkDir::new(&objects).min_depth(3).max_depth(3) {
                let entry = entry.map_err(std::io::Error::from)?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(rel) = entry.path().strip_prefix(&objects) else {
                    continue;
                };
                let hex: String = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect();
                match hex.parse::<Hash>() {
                    Ok(hash) => hashes.push(hash),
                    Err(_) => trace!("Skipping non-object {}", entry.path().display()),
                }
            }
            hashes.sort();
            Ok(hashes)
        })
        .await
        .map_err(|e| FileStoreError::Task(e.to_string()))?
    }

    async fn remove(&self, hash: Hash) -> Result<bool, FileStoreError> {
        match tokio::fs::remove_file(self.object_path(&hash)).await {
            Ok(()) => {
                debug!("Removed object {}", hash);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
