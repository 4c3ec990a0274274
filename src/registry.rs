//! Site identity and metadata records.
//!
//! Each site lives in `<storage_root>/<directory_name>/` with a `metadata.json`
//! record at its root. The directory is always created before the record, and
//! every record write is a full temp-file-then-rename replace.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::RegistryError;
use crate::safe_path::is_single_segment;

pub const METADATA_FILE: &str = "metadata.json";

/// One deployed project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: Uuid,
    pub display_name: String,
    pub directory_name: String,
    pub created_at: DateTime<Utc>,
    pub start_command: String,
    pub running: bool,
    pub source_archive_ref: String,
}

/// A reserved site directory that has no metadata record yet.
#[derive(Debug, Clone)]
pub struct SiteAllocation {
    pub id: Uuid,
    pub display_name: String,
    pub directory_name: String,
    pub path: PathBuf,
}

/// Why a directory under the storage root was left out of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SkipReason {
    NotADirectory,
    MissingMetadata,
    Unreadable(String),
    Corrupt(String),
}

/// One directory seen while listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SiteEntry {
    Listed(Site),
    Skipped {
        directory_name: String,
        reason: SkipReason,
    },
}

/// Turn a display name into a filesystem-safe token: anything outside
/// `[A-Za-z0-9_-]` becomes `_`, then the whole thing is lowercased.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct SiteRegistry {
    storage_root: PathBuf,
}

impl SiteRegistry {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
        }
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn site_dir(&self, directory_name: &str) -> PathBuf {
        self.storage_root.join(directory_name)
    }

    /// Reserve a fresh id and create its directory.
    ///
    /// The directory is created exclusively; an existing directory with the same
    /// name fails the allocation instead of being reused.
    pub fn allocate(&self, display_name: &str) -> Result<SiteAllocation, RegistryError> {
        fs::create_dir_all(&self.storage_root).map_err(|source| RegistryError::Io {
            path: self.storage_root.clone(),
            source,
        })?;

        let id = Uuid::new_v4();
        let directory_name = format!("{}-{}", sanitize_name(display_name), id);
        let path = self.site_dir(&directory_name);
        fs::create_dir(&path).map_err(|source| RegistryError::Io {
            path: path.clone(),
            source,
        })?;

        debug!(site = %directory_name, "Allocated site directory");
        Ok(SiteAllocation {
            id,
            display_name: display_name.to_string(),
            directory_name,
            path,
        })
    }

    /// Write the metadata record for an allocated (and populated) directory.
    pub fn commit(
        &self,
        allocation: SiteAllocation,
        start_command: &str,
        source_archive_ref: &str,
    ) -> Result<Site, RegistryError> {
        let site = Site {
            id: allocation.id,
            display_name: allocation.display_name,
            directory_name: allocation.directory_name,
            created_at: Utc::now(),
            start_command: start_command.to_string(),
            running: false,
            source_archive_ref: source_archive_ref.to_string(),
        };
        self.write_record(&site)?;
        info!(site = %site.directory_name, id = %site.id, "Site registered");
        Ok(site)
    }

    /// Allocate and immediately commit a site with an empty directory.
    pub fn create_site(
        &self,
        display_name: &str,
        start_command: &str,
        source_archive_ref: &str,
    ) -> Result<Site, RegistryError> {
        let allocation = self.allocate(display_name)?;
        self.commit(allocation, start_command, source_archive_ref)
    }

    /// Best-effort removal of an allocation whose population failed.
    pub fn discard(&self, allocation: &SiteAllocation) {
        if let Err(e) = fs::remove_dir_all(&allocation.path) {
            warn!(
                site = %allocation.directory_name,
                error = %e,
                "Failed to remove abandoned site directory"
            );
        }
    }

    /// Set `running` and rewrite the whole record.
    pub fn update_running(&self, site: &mut Site, running: bool) -> Result<(), RegistryError> {
        site.running = running;
        self.write_record(site)?;
        debug!(site = %site.directory_name, running, "Updated running state");
        Ok(())
    }

    pub fn get_site(&self, directory_name: &str) -> Result<Site, RegistryError> {
        if !is_single_segment(directory_name) {
            return Err(RegistryError::InvalidDirectoryName(
                directory_name.to_string(),
            ));
        }
        let dir = self.site_dir(directory_name);
        if !dir.is_dir() {
            return Err(RegistryError::NotFound {
                directory_name: directory_name.to_string(),
            });
        }
        read_record(&dir.join(METADATA_FILE), directory_name)
    }

    /// Every directory under the storage root, each either listed or skipped
    /// with a reason. A missing storage root lists as empty.
    pub fn list_sites(&self) -> Result<Vec<SiteEntry>, RegistryError> {
        let read_dir = match fs::read_dir(&self.storage_root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.storage_root.clone(),
                    source,
                });
            }
        };

        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = match dir_entry {
                Ok(e) => e,
                Err(e) => {
                    warn!(error = %e, "Failed to read storage root entry");
                    continue;
                }
            };
            let directory_name = dir_entry.file_name().to_string_lossy().to_string();
            let path = dir_entry.path();

            if !path.is_dir() {
                entries.push(SiteEntry::Skipped {
                    directory_name,
                    reason: SkipReason::NotADirectory,
                });
                continue;
            }

            let entry = match read_record(&path.join(METADATA_FILE), &directory_name) {
                Ok(site) => SiteEntry::Listed(site),
                Err(RegistryError::NotFound { .. }) => SiteEntry::Skipped {
                    directory_name,
                    reason: SkipReason::MissingMetadata,
                },
                Err(RegistryError::MetadataCorrupt { source, .. }) => SiteEntry::Skipped {
                    directory_name,
                    reason: SkipReason::Corrupt(source.to_string()),
                },
                Err(other) => SiteEntry::Skipped {
                    directory_name,
                    reason: SkipReason::Unreadable(other.to_string()),
                },
            };
            if let SiteEntry::Skipped {
                directory_name,
                reason,
            } = &entry
            {
                debug!(site = %directory_name, ?reason, "Skipping directory in listing");
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Only the sites that listed successfully.
    pub fn sites(&self) -> Result<Vec<Site>, RegistryError> {
        Ok(self
            .list_sites()?
            .into_iter()
            .filter_map(|entry| match entry {
                SiteEntry::Listed(site) => Some(site),
                SiteEntry::Skipped { .. } => None,
            })
            .collect())
    }

    fn write_record(&self, site: &Site) -> Result<(), RegistryError> {
        let dir = self.site_dir(&site.directory_name);
        let path = dir.join(METADATA_FILE);
        let io_err = |source| RegistryError::Io {
            path: path.clone(),
            source,
        };

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        serde_json::to_writer_pretty(&mut tmp, site)
            .map_err(|e| io_err(std::io::Error::other(e)))?;
        tmp.write_all(b"\n").map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        Ok(())
    }
}

fn read_record(path: &Path, directory_name: &str) -> Result<Site, RegistryError> {
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(RegistryError::NotFound {
                directory_name: directory_name.to_string(),
            });
        }
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content).map_err(|source| RegistryError::MetadataCorrupt {
        path: path.to_path_buf(),
        source,
    })
}
