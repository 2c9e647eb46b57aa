//! Is the module cache populated enough to start the backend without a
//! download? Answered by probing directories, never by asking the toolchain,
//! since `go list` and friends would happily fetch what is missing.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::encode::cache_dir_for;
use super::manifest::DependencyDescriptor;

/// Upper bound on simultaneous directory checks (file handle budget).
pub const MAX_CONCURRENT_CHECKS: usize = 20;

/// `exist >= max(1, N * 90 / 100)`, integer arithmetic.
pub fn meets_threshold(exist: usize, total: usize) -> bool {
    exist >= (total * 90 / 100).max(1)
}

/// Count descriptors whose encoded `module@version` directory exists under
/// `cache_root`. Checks run concurrently, at most [`MAX_CONCURRENT_CHECKS`]
/// at a time, and all of them finish before the count is returned.
pub async fn count_cached(cache_root: &Path, deps: &[DependencyDescriptor]) -> usize {
    let dirs = deps.iter().map(|dep| cache_dir_for(cache_root, &dep.cache_key())).collect();
    count_with(MAX_CONCURRENT_CHECKS, dirs, |dir| async move {
        tokio::fs::metadata(&dir).await.map(|m| m.is_dir()).unwrap_or(false)
    })
    .await
}

/// Run `check_dir` over `dirs` with at most `limit` in flight; count the `true`s.
pub(crate) async fn count_with<F, Fut>(limit: usize, dirs: Vec<PathBuf>, check_dir: F) -> usize
where
    F: Fn(PathBuf) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let limiter = Arc::new(Semaphore::new(limit.max(1)));
    let mut checks = JoinSet::new();

    for dir in dirs {
        let limiter = limiter.clone();
        let check = check_dir(dir);
        checks.spawn(async move {
            let _permit = limiter.acquire_owned().await.ok()?;
            Some(check.await)
        });
    }

    let mut exist = 0;
    while let Some(joined) = checks.join_next().await {
        if let Ok(Some(true)) = joined {
            exist += 1;
        }
    }
    exist
}

/// Full verdict for a descriptor list. Returns `(exist, total, installed)`.
pub async fn verify(cache_root: &Path, deps: &[DependencyDescriptor]) -> (usize, usize, bool) {
    let exist = count_cached(cache_root, deps).await;
    let total = deps.len();
    let installed = meets_threshold(exist, total);
    tracing::debug!("Module cache: {}/{} present, installed = {}", exist, total, installed);
    (exist, total, installed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_edges() {
        // N=0: 최소 1개는 있어야 함
        assert!(!meets_threshold(0, 0));
        assert!(meets_threshold(1, 1));
        assert!(!meets_threshold(0, 1));
        // 9 * 90 / 100 = 8
        assert!(meets_threshold(8, 9));
        assert!(!meets_threshold(7, 9));
        assert!(meets_threshold(90, 100));
        assert!(!meets_threshold(89, 100));
        assert!(meets_threshold(1, 2));
    }

    fn make_cache(root: &Path, present: &[&DependencyDescriptor]) {
        for dep in present {
            std::fs::create_dir_all(cache_dir_for(root, &dep.cache_key())).unwrap();
        }
    }

    #[tokio::test]
    async fn test_counts_encoded_directories() {
        let dir = tempfile::tempdir().unwrap();
        let upper = DependencyDescriptor::new("github.com/Masterminds/semver/v3", "v3.2.1");
        let plain = DependencyDescriptor::new("golang.org/x/net", "v0.25.0");
        let absent = DependencyDescriptor::new("github.com/gin-gonic/gin", "v1.10.0");
        make_cache(dir.path(), &[&upper, &plain]);
        // 인코딩 없이 만든 경로는 인정되지 않음
        std::fs::create_dir_all(dir.path().join("github.com/gin-gonic/gin@v1.9.0")).unwrap();

        assert!(dir.path().join("github.com/!masterminds/semver/v3@v3.2.1").is_dir());
        let n = count_cached(dir.path(), &[upper, plain, absent]).await;
        assert_eq!(n, 2);
    }

    #[tokio::test]
    async fn test_file_is_not_a_cached_module() {
        let dir = tempfile::tempdir().unwrap();
        let dep = DependencyDescriptor::new("example.com/m", "v1.0.0");
        std::fs::create_dir_all(dir.path().join("example.com")).unwrap();
        std::fs::write(dir.path().join("example.com/m@v1.0.0"), b"").unwrap();
        assert_eq!(count_cached(dir.path(), &[dep]).await, 0);
    }

    #[tokio::test]
    async fn test_many_modules_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let deps: Vec<_> = (0..50).map(|i| DependencyDescriptor::new(format!("example.com/Mod{}", i), "v1.0.0")).collect();
        let present: Vec<_> = deps.iter().take(45).collect();
        make_cache(dir.path(), &present);

        let (exist, total, installed) = verify(dir.path(), &deps).await;
        assert_eq!((exist, total), (45, 50));
        assert!(installed);

        let (_, _, installed) = verify(dir.path(), &deps[40..]).await;
        // 10개 중 5개만 존재
        assert!(!installed);
    }

    #[tokio::test]
    async fn test_directory_checks_are_bounded() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let dirs: Vec<PathBuf> = (0..100).map(|i| PathBuf::from(format!("m{}", i))).collect();

        let n = count_with(MAX_CONCURRENT_CHECKS, dirs, |dir| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                // 짝수 번호만 존재하는 것으로 취급
                dir.to_string_lossy()[1..].parse::<usize>().unwrap() % 2 == 0
            }
        })
        .await;

        assert_eq!(n, 50);
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= MAX_CONCURRENT_CHECKS, "peak {} exceeds limit", peak);
        assert!(peak > 1, "checks should overlap");
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_cache_root() {
        let deps = vec![DependencyDescriptor::new("a/b", "v1")];
        let (exist, _, installed) = verify(Path::new("/definitely/not/here"), &deps).await;
        assert_eq!(exist, 0);
        assert!(!installed);
    }
}
