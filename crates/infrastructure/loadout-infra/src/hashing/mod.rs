use camino::Utf8Path;
use loadout_config::{HASH_BUFFER_SIZE, MINIMAL_HASH_CHUNK};
use loadout_core::Hash;
use md5::Context;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Full-content MD5 of a file, streamed in fixed chunks. Returns the hash and
/// the number of bytes read.
pub fn hash_file(path: &Utf8Path) -> Result<(Hash, u64), HashError> {
    let file = File::open(path)?;
    hash_reader(file)
}

pub fn hash_reader<R: Read>(mut reader: R) -> Result<(Hash, u64), HashError> {
    let mut hasher = Context::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.consume(&buf[..n]);
        total += n as u64;
    }
    Ok((Hash::from_bytes(hasher.finalize().0), total))
}

/// Cheap fingerprint used to match files against the hash catalogue without
/// reading them in full.
///
/// Small files (up to three chunks) are hashed whole. Larger files hash the
/// first, middle and last [`MINIMAL_HASH_CHUNK`] bytes. The little-endian size
/// is always mixed in last.
pub fn minimal_hash(path: &Utf8Path) -> Result<Hash, HashError> {
    let mut file = File::open(path)?;
    let size = file.metadata()?.len();
    let mut hasher = Context::new();

    if size <= MINIMAL_HASH_CHUNK * 3 {
        let mut data = Vec::with_capacity(size as usize);
        file.read_to_end(&mut data)?;
        hasher.consume(&data);
    } else {
        let mut chunk = vec![0u8; MINIMAL_HASH_CHUNK as usize];
        let middle = size / 2 - MINIMAL_HASH_CHUNK / 2;
        for offset in [0, middle, size - MINIMAL_HASH_CHUNK] {
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut chunk)?;
            hasher.consume(&chunk);
        }
    }

    hasher.consume(size.to_le_bytes());
    Ok(Hash::from_bytes(hasher.finalize().0))
}
