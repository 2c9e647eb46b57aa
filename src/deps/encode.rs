//! Case-folding escape used by the module cache layout.
//!
//! Module paths are case-sensitive but the cache may live on a
//! case-insensitive filesystem, so every uppercase ASCII letter is stored
//! as `!` followed by its lowercase form
//! (`github.com/Masterminds/semver` → `github.com/!masterminds/semver`).

use std::path::{Path, PathBuf};

pub fn encode_module_path(module_path: &str) -> String {
    let mut encoded = String::with_capacity(module_path.len() + 4);
    for ch in module_path.chars() {
        if ch.is_ascii_uppercase() {
            encoded.push('!');
            encoded.push(ch.to_ascii_lowercase());
        } else {
            encoded.push(ch);
        }
    }
    encoded
}

/// Absolute cache directory for an encoded `module@version` key. Each `/`
/// segment becomes a path component so the result is native on Windows too.
pub fn cache_dir_for(cache_root: &Path, key: &str) -> PathBuf {
    let encoded = encode_module_path(key);
    encoded
        .split('/')
        .filter(|s| !s.is_empty())
        .fold(cache_root.to_path_buf(), |acc, seg| acc.join(seg))
}
