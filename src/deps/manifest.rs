//! Reading dependency lists: the `go.mod` manifest and the resolved
//! `go list -m all` listing.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::config::ConfigError;

/// One `(module, version)` pair. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyDescriptor {
    pub module: String,
    pub version: String,
}

impl DependencyDescriptor {
    pub fn new(module: impl Into<String>, version: impl Into<String>) -> Self {
        Self { module: module.into(), version: version.into() }
    }

    /// `module@version`, the unencoded cache directory key.
    pub fn cache_key(&self) -> String {
        format!("{}@{}", self.module, self.version)
    }
}

fn is_local_path(module: &str) -> bool {
    module.starts_with("./") || module.starts_with("../")
}

fn strip_comment(line: &str) -> &str {
    match line.find("//") {
        Some(i) => line[..i].trim(),
        None => line.trim(),
    }
}

/// Parse every `require` entry of a go.mod file, block form and single-line
/// form, indirect dependencies included. Local paths are skipped.
pub fn parse_go_mod(content: &str) -> Vec<DependencyDescriptor> {
    let mut deps = Vec::new();
    let mut in_require = false;

    for raw in content.lines() {
        let line = strip_comment(raw);
        if line.is_empty() {
            continue;
        }

        if in_require {
            if line == ")" {
                in_require = false;
                continue;
            }
            push_pair(&mut deps, line.split_whitespace());
            continue;
        }

        if let Some(rest) = line.strip_prefix("require") {
            let rest = rest.trim();
            if rest.starts_with('(') {
                in_require = true;
                // `require (` may be followed by an entry on the same line
                push_pair(&mut deps, rest[1..].split_whitespace());
            } else if !rest.is_empty() {
                push_pair(&mut deps, rest.split_whitespace());
            }
        }
    }
    deps
}

fn push_pair<'a>(deps: &mut Vec<DependencyDescriptor>, mut fields: impl Iterator<Item = &'a str>) {
    if let (Some(module), Some(version)) = (fields.next(), fields.next()) {
        if !is_local_path(module) {
            deps.push(DependencyDescriptor::new(module, version));
        }
    }
}

/// `module` directive of a go.mod file.
pub fn parse_module_path(content: &str) -> Option<String> {
    content.lines().map(strip_comment).find_map(|l| {
        l.strip_prefix("module")
            .filter(|rest| rest.starts_with(char::is_whitespace))
            .map(|rest| rest.trim().trim_matches('"').to_string())
    })
}

pub fn read_manifest(path: &Path) -> Result<Vec<DependencyDescriptor>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::io(path, e))?;
    Ok(parse_go_mod(&content))
}

/// Parse `go list -m all` output. The project's own module (matched by
/// prefix) and version-less lines are skipped; for `old v => new v'`
/// replacements the left-hand pair is what the cache holds under its name.
pub fn parse_module_list(output: &str, main_module_prefix: Option<&str>) -> Vec<DependencyDescriptor> {
    output
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .filter(|l| match main_module_prefix {
            Some(prefix) if !prefix.is_empty() => !l.starts_with(prefix),
            _ => true,
        })
        .filter_map(|l| {
            let mut fields = l.split_whitespace();
            let module = fields.next()?;
            let version = fields.next().filter(|v| *v != "=>")?;
            Some(DependencyDescriptor::new(module, version))
        })
        .collect()
}
