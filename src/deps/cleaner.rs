//! Deleting cached modules one by one, and the frontend's `node_modules`.

use serde::Serialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::encode::cache_dir_for;
use super::manifest::DependencyDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCleanTally {
    pub success: usize,
    pub fail: usize,
}

impl CacheCleanTally {
    pub fn total(&self) -> usize {
        self.success + self.fail
    }
}

/// Remove the cache directory of every descriptor. A path that does not
/// exist counts as success; a failure is counted and the run continues.
/// `go.sum` lives in the project, not the cache, and is never touched.
pub fn clean_modules(cache_root: &Path, modules: &[DependencyDescriptor]) -> CacheCleanTally {
    let mut tally = CacheCleanTally::default();
    for module in modules {
        let dir = cache_dir_for(cache_root, &module.cache_key());
        match remove_tree(&dir) {
            Ok(()) => tally.success += 1,
            Err(e) => {
                tracing::warn!("Failed to delete {}: {}", dir.display(), e);
                tally.fail += 1;
            }
        }
    }
    tracing::info!("Module cache clean: {} removed, {} failed", tally.success, tally.fail);
    tally
}

/// Blocking removal run on the blocking pool.
pub async fn clean_modules_async(cache_root: PathBuf, modules: Vec<DependencyDescriptor>) -> CacheCleanTally {
    let total = modules.len();
    tokio::task::spawn_blocking(move || clean_modules(&cache_root, &modules))
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Cache clean task panicked: {}", e);
            CacheCleanTally { success: 0, fail: total }
        })
}

/// Delete `web/node_modules`. Returns whether anything was removed.
pub async fn clean_frontend_cache(node_modules: PathBuf) -> std::io::Result<bool> {
    if !tokio::fs::metadata(&node_modules).await.map(|m| m.is_dir()).unwrap_or(false) {
        return Ok(false);
    }
    tokio::task::spawn_blocking(move || remove_tree(&node_modules).map(|_| true))
        .await
        .map_err(|e| std::io::Error::new(ErrorKind::Other, e))?
}

/// `remove_dir_all` tolerating a missing path. The Go module cache marks
/// its trees read-only, so a permission failure gets one retry after the
/// tree is made writable.
fn remove_tree(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) if e.kind() == ErrorKind::PermissionDenied => {
            make_writable(path);
            match std::fs::remove_dir_all(path) {
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                other => other,
            }
        }
        Err(e) => Err(e),
    }
}

fn make_writable(path: &Path) {
    let Ok(meta) = std::fs::symlink_metadata(path) else { return };
    if meta.file_type().is_symlink() {
        return;
    }
    let mut perms = meta.permissions();
    if perms.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        let _ = std::fs::set_permissions(path, perms);
    }
    if meta.is_dir() {
        if let Ok(entries) = std::fs::read_dir(path) {
            for entry in entries.flatten() {
                make_writable(&entry.path());
            }
        }
    }
}
