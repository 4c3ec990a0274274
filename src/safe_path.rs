//! Containment checks for paths derived from untrusted input.
//!
//! Archive entry names and request sub-paths both go through [`SafeRoot::join`],
//! so write-time and read-time checks cannot drift apart.

use std::path::{Component, Path, PathBuf};

use crate::errors::SafePathError;

/// A canonicalized directory that relative paths are resolved beneath.
#[derive(Debug, Clone)]
pub struct SafeRoot {
    root: PathBuf,
}

impl SafeRoot {
    /// Canonicalize `root`, which must already exist.
    pub fn new(root: &Path) -> Result<Self, SafePathError> {
        let root = root.canonicalize().map_err(|source| SafePathError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve `relative` beneath the root.
    ///
    /// The returned path is absolute, has symlinks resolved for every component
    /// that exists on disk, and is guaranteed to lie within the root.
    pub fn join(&self, relative: &str) -> Result<PathBuf, SafePathError> {
        let normalized = normalize(relative)?;
        let candidate = self.root.join(&normalized);
        let resolved = resolve_existing_prefix(&candidate)?;

        if !resolved.starts_with(&self.root) {
            return Err(SafePathError::Escape {
                path: relative.to_string(),
            });
        }
        Ok(resolved)
    }
}

/// Lexically normalize an untrusted relative path.
///
/// `..` may only cancel a segment pushed earlier in the same path; climbing above
/// the start, absolute paths and drive prefixes are all escapes.
fn normalize(relative: &str) -> Result<PathBuf, SafePathError> {
    let unified = relative.replace('\\', "/");
    let escape = || SafePathError::Escape {
        path: relative.to_string(),
    };

    let mut out = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    Ok(out)
}

/// Canonicalize the deepest ancestor of `candidate` that exists and re-append the rest.
fn resolve_existing_prefix(candidate: &Path) -> Result<PathBuf, SafePathError> {
    let mut existing = candidate;
    let mut tail = Vec::new();

    while std::fs::symlink_metadata(existing).is_err() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|source| SafePathError::Io {
            path: existing.to_path_buf(),
            source,
        })?;
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

/// Whether `name` is usable as a single directory segment directly under a root.
pub fn is_single_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}
