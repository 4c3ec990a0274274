use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default cap on an uploaded archive, compressed or extracted.
pub const DEFAULT_UPLOAD_LIMIT_BYTES: u64 = 200 * 1024 * 1024;

/// File looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "siterunner.toml";

/// Resolved configuration passed into every component at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory holding one subdirectory per site.
    pub storage_root: PathBuf,
    /// Directory where uploaded archives are staged and kept.
    pub uploads_dir: PathBuf,
    pub upload_limit_bytes: u64,
    /// Interpreter used to run start commands (`<shell> -c <cmd>`).
    pub shell: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("sites"),
            uploads_dir: PathBuf::from("uploads"),
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT_BYTES,
            shell: "sh".to_string(),
        }
    }
}

/// Raw TOML structure for `siterunner.toml`
#[derive(Debug, Deserialize)]
struct ConfigToml {
    storage: Option<StorageSection>,
    launch: Option<LaunchSection>,
}

#[derive(Debug, Deserialize)]
struct StorageSection {
    root: Option<PathBuf>,
    uploads_dir: Option<PathBuf>,
    max_upload_bytes: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct LaunchSection {
    shell: Option<String>,
}

/// Values that override the file, typically from CLI flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub storage_root: Option<PathBuf>,
    pub uploads_dir: Option<PathBuf>,
    pub upload_limit_bytes: Option<u64>,
    pub shell: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file.
    /// Returns defaults if the file doesn't exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        let toml: ConfigToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        let mut config = Self::default();
        if let Some(storage) = toml.storage {
            if let Some(root) = storage.root {
                config.storage_root = root;
            }
            if let Some(uploads_dir) = storage.uploads_dir {
                config.uploads_dir = uploads_dir;
            }
            if let Some(max) = storage.max_upload_bytes {
                config.upload_limit_bytes = max;
            }
        }
        if let Some(shell) = toml.launch.and_then(|l| l.shell) {
            config.shell = shell;
        }

        Ok(config)
    }

    /// Layer overrides on top of the loaded values.
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(root) = overrides.storage_root {
            self.storage_root = root;
        }
        if let Some(uploads_dir) = overrides.uploads_dir {
            self.uploads_dir = uploads_dir;
        }
        if let Some(limit) = overrides.upload_limit_bytes {
            self.upload_limit_bytes = limit;
        }
        if let Some(shell) = overrides.shell {
            self.shell = shell;
        }
        self
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage_root).with_context(|| {
            format!(
                "Failed to create storage root {}",
                self.storage_root.display()
            )
        })?;
        std::fs::create_dir_all(&self.uploads_dir).with_context(|| {
            format!(
                "Failed to create uploads directory {}",
                self.uploads_dir.display()
            )
        })?;
        Ok(())
    }
}
