//! Read-only resolution of site files for serving.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::SafePathError;
use crate::safe_path::{SafeRoot, is_single_segment};

/// Entry files tried, in order, when a directory is requested.
pub const INDEX_FILES: &[&str] = &["index.html", "index.htm"];

/// Body returned for a site root that has nothing to browse.
pub const NO_INDEX_MESSAGE: &str =
    "This site was deployed, but it has no index.html to show. It may be a service started by its start command.";

/// Outcome of resolving a request against a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// A regular file inside the site directory.
    File(PathBuf),
    /// Root requested but the site has no entry file.
    NoIndexFallback,
    NotFound,
    /// The request tried to leave the site directory.
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct SiteContent {
    storage_root: PathBuf,
}

impl SiteContent {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn resolve(&self, directory_name: &str, sub_path: &str) -> Resolution {
        if !is_single_segment(directory_name) {
            warn!(site = %directory_name, "Rejected invalid site name");
            return Resolution::Rejected(format!("invalid site name '{}'", directory_name));
        }

        let site_dir = self.storage_root.join(directory_name);
        if !site_dir.is_dir() {
            return Resolution::NotFound;
        }
        let root = match SafeRoot::new(&site_dir) {
            Ok(root) => root,
            Err(_) => return Resolution::NotFound,
        };

        // Request paths are rooted at the site, so a leading slash means the site root.
        let sub_path = sub_path.trim_start_matches('/');
        let target = match root.join(sub_path) {
            Ok(path) => path,
            Err(SafePathError::Escape { path }) => {
                warn!(site = %directory_name, path = %path, "Rejected path outside site directory");
                return Resolution::Rejected(format!("path '{}' leaves the site", path));
            }
            Err(SafePathError::Io { .. }) => return Resolution::NotFound,
        };

        if target.is_file() {
            return Resolution::File(target);
        }
        if target.is_dir() {
            if let Some(index) = find_index(&target) {
                return Resolution::File(index);
            }
            if target == root.path() {
                return Resolution::NoIndexFallback;
            }
        }
        Resolution::NotFound
    }
}

fn find_index(dir: &Path) -> Option<PathBuf> {
    INDEX_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
}
