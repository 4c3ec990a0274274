//! Zip extraction into a site directory.
//!
//! Every entry name is resolved through [`SafeRoot`] before anything is written,
//! and the first entry that would land outside the destination aborts the run.
//! Files written earlier in the same run are left behind.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};
use zip::ZipArchive;
use zip::result::ZipError;

use crate::errors::{ExtractError, SafePathError};
use crate::safe_path::SafeRoot;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// What a successful extraction wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractSummary {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Extracts zip archives, optionally bounded by a byte cap.
#[derive(Debug, Clone, Default)]
pub struct ArchiveExtractor {
    max_bytes: Option<u64>,
}

impl ArchiveExtractor {
    pub fn new(max_bytes: Option<u64>) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.max_bytes
    }

    /// Extract `archive_path` into `destination`, which must already exist.
    pub fn extract(
        &self,
        archive_path: &Path,
        destination: &Path,
    ) -> Result<ExtractSummary, ExtractError> {
        let root = SafeRoot::new(destination).map_err(|e| match e {
            SafePathError::Io { path, source } => ExtractError::Io { path, source },
            SafePathError::Escape { path } => ExtractError::PathEscape { entry: path },
        })?;

        let file = File::open(archive_path).map_err(|source| ExtractError::Io {
            path: archive_path.to_path_buf(),
            source,
        })?;
        let compressed_len = file
            .metadata()
            .map_err(|source| ExtractError::Io {
                path: archive_path.to_path_buf(),
                source,
            })?
            .len();
        self.check_limit(compressed_len)?;

        let mut archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(archive_path, e))?;

        let declared = declared_size(&mut archive, archive_path)?;
        self.check_limit(declared)?;

        let mut summary = ExtractSummary::default();
        for index in 0..archive.len() {
            let mut entry = archive
                .by_index(index)
                .map_err(|e| zip_error(archive_path, e))?;
            let name = entry.name().to_string();

            let target = root.join(&name).map_err(|e| match e {
                SafePathError::Escape { .. } => {
                    warn!(entry = %name, destination = %destination.display(), "Archive entry escapes destination");
                    ExtractError::PathEscape {
                        entry: name.clone(),
                    }
                }
                SafePathError::Io { path, source } => ExtractError::Io { path, source },
            })?;

            if entry.is_dir() {
                create_dir(&target)?;
                summary.directories += 1;
                continue;
            }
            if target == root.path() {
                debug!(entry = %name, "Skipping entry that names the destination itself");
                continue;
            }

            if let Some(parent) = target.parent() {
                create_dir(parent)?;
            }
            let written = self.copy_entry(&mut entry, &name, &target, summary.bytes)?;
            summary.bytes += written;
            summary.files += 1;

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                let perms = fs::Permissions::from_mode((mode & 0o777) | 0o600);
                fs::set_permissions(&target, perms).map_err(|source| ExtractError::Io {
                    path: target.clone(),
                    source,
                })?;
            }
        }

        info!(
            archive = %archive_path.display(),
            destination = %destination.display(),
            files = summary.files,
            bytes = summary.bytes,
            "Archive extracted"
        );
        Ok(summary)
    }

    fn check_limit(&self, actual: u64) -> Result<(), ExtractError> {
        match self.max_bytes {
            Some(limit) if actual > limit => Err(ExtractError::SizeLimit { limit, actual }),
            _ => Ok(()),
        }
    }

    /// Stream one entry to disk, counting against the cap as bytes arrive so a
    /// header that under-reports its size cannot push past it.
    fn copy_entry(
        &self,
        entry: &mut impl Read,
        name: &str,
        target: &Path,
        already_written: u64,
    ) -> Result<u64, ExtractError> {
        let mut out = File::create(target).map_err(|source| ExtractError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut written = 0u64;
        loop {
            let n = entry
                .read(&mut buf)
                .map_err(|e| ExtractError::CorruptArchive(format!("entry '{}': {}", name, e)))?;
            if n == 0 {
                break;
            }
            written += n as u64;
            self.check_limit(already_written + written)?;
            out.write_all(&buf[..n])
                .map_err(|source| ExtractError::Io {
                    path: target.to_path_buf(),
                    source,
                })?;
        }
        out.flush().map_err(|source| ExtractError::Io {
            path: target.to_path_buf(),
            source,
        })?;
        Ok(written)
    }
}

fn declared_size<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    archive_path: &Path,
) -> Result<u64, ExtractError> {
    let mut total = 0u64;
    for index in 0..archive.len() {
        let entry = archive
            .by_index_raw(index)
            .map_err(|e| zip_error(archive_path, e))?;
        total = total.saturating_add(entry.size());
    }
    Ok(total)
}

fn create_dir(path: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(path).map_err(|source| ExtractError::Io {
        path: PathBuf::from(path),
        source,
    })
}

fn zip_error(archive_path: &Path, err: ZipError) -> ExtractError {
    match err {
        ZipError::Io(source)
            if matches!(
                source.kind(),
                std::io::ErrorKind::UnexpectedEof | std::io::ErrorKind::InvalidData
            ) =>
        {
            ExtractError::CorruptArchive(source.to_string())
        }
        ZipError::Io(source) => ExtractError::Io {
            path: archive_path.to_path_buf(),
            source,
        },
        other => ExtractError::CorruptArchive(other.to_string()),
    }
}
