use camino::{Utf8Path, Utf8PathBuf};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const MAX_REPLACE_ATTEMPTS: u32 = 8;
const MAX_BACKOFF: Duration = Duration::from_millis(2000);

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A hidden, process-unique path next to `path`, e.g. `.a.esp.4242-7.tmp`.
pub fn temp_sibling(path: &Utf8Path, suffix: &str) -> Utf8PathBuf {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = format!(
        ".{}.{}-{}.{}",
        path.file_name().unwrap_or("file"),
        std::process::id(),
        n,
        suffix
    );
    match path.parent() {
        Some(parent) => parent.join(name),
        None => Utf8PathBuf::from(name),
    }
}

/// Moves `tmp` over `destination`. A read-only destination (common for
/// shipped game files) is made writable first. Transient failures from
/// scanners or launchers holding the file are retried with backoff. On
/// final failure `tmp` is removed.
pub async fn replace_file(tmp: &Utf8Path, destination: &Utf8Path) -> std::io::Result<()> {
    let mut attempt = 0u32;
    let mut backoff = Duration::from_millis(50);

    loop {
        let err = match tokio::fs::rename(tmp, destination).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        if err.kind() == ErrorKind::PermissionDenied && clear_readonly(destination).await {
            debug!("Cleared read-only flag on {}", destination);
            continue;
        }

        attempt += 1;
        if attempt >= MAX_REPLACE_ATTEMPTS {
            let _ = tokio::fs::remove_file(tmp).await;
            return Err(err);
        }
        debug!(
            "Replacing {} failed ({}), retrying in {:?}",
            destination, err, backoff
        );
        tokio::time::sleep(backoff).await;
        backoff = std::cmp::min(backoff * 2, MAX_BACKOFF);
    }
}

/// True when `path` existed read-only and is now writable.
async fn clear_readonly(path: &Utf8Path) -> bool {
    let Ok(meta) = tokio::fs::metadata(path).await else {
        return false;
    };
    let mut perms = meta.permissions();
    if !perms.readonly() {
        return false;
    }
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(false);
    tokio::fs::set_permissions(path, perms).await.is_ok()
}
