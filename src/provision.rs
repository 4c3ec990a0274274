//! One upload, end to end: allocate → extract → register → (maybe) launch.
//!
//! The order is fixed. A metadata record only appears once the extracted tree
//! is complete, and a process only starts once the record exists. A failed
//! extraction never produces a record.

use std::path::PathBuf;

use serde::Serialize;
use tracing::{info, warn};

use crate::archive::{ArchiveExtractor, ExtractSummary};
use crate::config::Config;
use crate::errors::ProvisionError;
use crate::launcher::ProcessLauncher;
use crate::registry::{Site, SiteRegistry};

/// An upload whose archive is already staged on disk.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub archive_path: PathBuf,
    pub display_name: String,
    pub start_command: Option<String>,
    /// `Some(false)` suppresses the launch even when a start command is given.
    pub deploy: Option<bool>,
    pub source_archive_ref: String,
}

impl UploadRequest {
    fn start_command(&self) -> &str {
        self.start_command.as_deref().map(str::trim).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LaunchReport {
    NotRequested,
    Launched { pid: u32 },
    Failed { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    pub site: Site,
    pub summary: ExtractSummary,
    pub launch: LaunchReport,
}

#[derive(Debug, Clone)]
pub struct Provisioner {
    extractor: ArchiveExtractor,
    registry: SiteRegistry,
    launcher: ProcessLauncher,
}

impl Provisioner {
    pub fn new(config: &Config) -> Self {
        let registry = SiteRegistry::new(&config.storage_root);
        Self {
            extractor: ArchiveExtractor::new(Some(config.upload_limit_bytes)),
            launcher: ProcessLauncher::new(registry.clone(), config.shell.clone()),
            registry,
        }
    }

    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    /// Run the whole pipeline for one upload.
    ///
    /// Launching requires a tokio runtime context; the rest is blocking I/O.
    pub fn provision(&self, request: UploadRequest) -> Result<Provisioned, ProvisionError> {
        if request.display_name.trim().is_empty() {
            return Err(ProvisionError::Validation("Web name is required".into()));
        }
        let start_command = request.start_command().to_string();

        let allocation = self.registry.allocate(&request.display_name)?;
        let summary = match self
            .extractor
            .extract(&request.archive_path, &allocation.path)
        {
            Ok(summary) => summary,
            Err(e) => {
                warn!(site = %allocation.directory_name, error = %e, "Extraction failed, discarding site");
                self.registry.discard(&allocation);
                return Err(e.into());
            }
        };

        let mut site = self
            .registry
            .commit(allocation, &start_command, &request.source_archive_ref)?;

        let launch = if start_command.is_empty() || request.deploy == Some(false) {
            LaunchReport::NotRequested
        } else {
            match self.launcher.launch(&mut site) {
                Ok(handle) => LaunchReport::Launched { pid: handle.pid },
                Err(e) => {
                    warn!(site = %site.directory_name, error = %e, "Site created but start command failed");
                    LaunchReport::Failed {
                        message: e.to_string(),
                    }
                }
            }
        };

        info!(
            site = %site.directory_name,
            files = summary.files,
            running = site.running,
            "Site provisioned"
        );
        Ok(Provisioned {
            site,
            summary,
            launch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testing::write_zip;
    use crate::content::{Resolution, SiteContent};
    use crate::errors::ExtractError;
    use crate::registry::SiteEntry;
    use std::fs;

    struct Fixture {
        dir: tempfile::TempDir,
        config: Config,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            storage_root: dir.path().join("sites"),
            uploads_dir: dir.path().join("uploads"),
            ..Config::default()
        };
        config.ensure_directories().unwrap();
        Fixture { dir, config }
    }

    impl Fixture {
        fn request(&self, name: &str, entries: &[(&str, &[u8])], start: Option<&str>) -> UploadRequest {
            let archive_path = self.config.uploads_dir.join(format!("{}.zip", uuid::Uuid::new_v4()));
            write_zip(&archive_path, entries);
            UploadRequest {
                source_archive_ref: archive_path.file_name().unwrap().to_string_lossy().to_string(),
                archive_path,
                display_name: name.to_string(),
                start_command: start.map(str::to_string),
                deploy: None,
            }
        }

        fn site_dirs(&self) -> Vec<PathBuf> {
            fs::read_dir(&self.config.storage_root)
                .unwrap()
                .map(|e| e.unwrap().path())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_demo_without_start_command() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("demo", &[("server.js", b"require('http')")], None);

        let provisioned = provisioner.provision(request).unwrap();
        assert_eq!(provisioned.launch, LaunchReport::NotRequested);

        let entries = provisioner.registry().list_sites().unwrap();
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            SiteEntry::Listed(site) => {
                assert_eq!(site.display_name, "demo");
                assert!(!site.running);
                assert_eq!(site.start_command, "");
            }
            other => panic!("Expected a listed site, got {:?}", other),
        }

        let content = SiteContent::new(&fx.config.storage_root);
        assert_eq!(
            content.resolve(&provisioned.site.directory_name, ""),
            Resolution::NoIndexFallback
        );
    }

    #[tokio::test]
    async fn test_svc_with_start_command_is_running() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("svc", &[("README", b"svc")], Some("true"));

        let provisioned = provisioner.provision(request).unwrap();

        assert!(matches!(provisioned.launch, LaunchReport::Launched { .. }));
        assert!(provisioned.site.running);
        let stored = provisioner
            .registry()
            .get_site(&provisioned.site.directory_name)
            .unwrap();
        assert!(stored.running);
        assert_eq!(stored.start_command, "true");
    }

    #[tokio::test]
    async fn test_deploy_false_skips_launch() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let mut request = fx.request("svc", &[("README", b"svc")], Some("true"));
        request.deploy = Some(false);

        let provisioned = provisioner.provision(request).unwrap();

        assert_eq!(provisioned.launch, LaunchReport::NotRequested);
        assert!(!provisioned.site.running);
        assert_eq!(provisioned.site.start_command, "true");
    }

    #[tokio::test]
    async fn test_launch_failure_keeps_site_registered() {
        let mut fx = fixture();
        fx.config.shell = "/nonexistent/shell".into();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("svc", &[("README", b"svc")], Some("npm start"));

        let provisioned = provisioner.provision(request).unwrap();

        assert!(matches!(provisioned.launch, LaunchReport::Failed { .. }));
        let stored = provisioner
            .registry()
            .get_site(&provisioned.site.directory_name)
            .unwrap();
        assert!(!stored.running);
    }

    #[tokio::test]
    async fn test_truncated_archive_leaves_no_site() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("broken", &[("index.html", b"<h1>hi</h1>")], None);
        let bytes = fs::read(&request.archive_path).unwrap();
        fs::write(&request.archive_path, &bytes[..bytes.len() / 2]).unwrap();

        let err = provisioner.provision(request).unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Extract(ExtractError::CorruptArchive(_))
        ));
        assert!(
            fx.site_dirs()
                .iter()
                .all(|d| !d.join(crate::registry::METADATA_FILE).exists())
        );
        assert!(provisioner.registry().sites().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_escaping_archive_is_rejected_and_not_registered() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("evil", &[("../../../pwned.txt", b"x")], None);

        let err = provisioner.provision(request).unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Extract(ExtractError::PathEscape { .. })
        ));
        assert!(!fx.dir.path().join("pwned.txt").exists());
        assert!(provisioner.registry().sites().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blank_name_is_validation_error() {
        let fx = fixture();
        let provisioner = Provisioner::new(&fx.config);
        let request = fx.request("   ", &[("a.txt", b"a")], None);

        let err = provisioner.provision(request).unwrap_err();

        assert!(matches!(err, ProvisionError::Validation(_)));
        assert!(fx.site_dirs().is_empty());
    }

    #[tokio::test]
    async fn test_size_limit_is_enforced() {
        let mut fx = fixture();
        fx.config.upload_limit_bytes = 100;
        let provisioner = Provisioner::new(&fx.config);
        let payload = vec![b'z'; 5_000];
        let request = fx.request("big", &[("big.bin", &payload)], None);

        let err = provisioner.provision(request).unwrap_err();

        assert!(matches!(
            err,
            ProvisionError::Extract(ExtractError::SizeLimit { .. })
        ));
    }
}
