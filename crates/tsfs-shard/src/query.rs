//! Identifier filters used when enumerating shards.
//!
//! A filter answers two questions: whether a concrete identifier matches,
//! and how a directory's accumulated identifier path relates to the
//! filter, so whole subtrees can be pruned during a walk.

use crate::FsId;

/// Relationship between a directory's identifier path and a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMatch {
    /// Identifiers with exactly this path may match.
    Complete,
    /// Some descendant path may match; keep walking.
    Prefix,
    /// Nothing at or below this path can match.
    NoMatch,
}

/// Predicate over identifiers with directory-prefix pruning.
pub trait IdFilter: Send + Sync {
    fn matches(&self, id: &FsId) -> bool;
    fn match_path(&self, path: &str) -> PathMatch;
}

/// Filter selecting one identifier path (optionally with every path
/// beneath it) and, optionally, names matching a `*` glob.
#[derive(Debug, Clone)]
pub struct PathQuery {
    path: String,
    recursive: bool,
    name_glob: Option<String>,
}

impl PathQuery {
    /// Match identifiers whose path equals `path`.
    pub fn exact(path: impl Into<String>) -> Self {
        Self {
            path: normalize(path.into()),
            recursive: false,
            name_glob: None,
        }
    }

    /// Match identifiers whose path is `path` or lies beneath it.
    pub fn under(path: impl Into<String>) -> Self {
        Self {
            path: normalize(path.into()),
            recursive: true,
            name_glob: None,
        }
    }

    /// Restrict names to those matching `glob` (`*` matches any run).
    pub fn with_names(mut self, glob: impl Into<String>) -> Self {
        self.name_glob = Some(glob.into());
        self
    }
}

fn normalize(mut path: String) -> String {
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    path
}

fn is_strict_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor == "/" {
        return path != "/";
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

impl IdFilter for PathQuery {
    fn matches(&self, id: &FsId) -> bool {
        if self.match_path(id.path()) != PathMatch::Complete {
            return false;
        }
        match &self.name_glob {
            Some(glob) => glob_match(glob.as_bytes(), id.name().as_bytes()),
            None => true,
        }
    }

    fn match_path(&self, path: &str) -> PathMatch {
        if path == self.path || (self.recursive && is_strict_ancestor(&self.path, path)) {
            PathMatch::Complete
        } else if is_strict_ancestor(path, &self.path) {
            PathMatch::Prefix
        } else {
            PathMatch::NoMatch
        }
    }
}

/// Glob matching with `*` as the only metacharacter.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pattern.len() && pattern[p] == text[t] {
            p += 1;
            t += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == b'*')
}
