use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use siterunner::config::{Config, ConfigOverrides, DEFAULT_CONFIG_FILE};

mod cmd;

#[derive(Parser)]
#[command(name = "siterunner")]
#[command(version, about = "Upload, unpack, start and serve zipped web projects")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the config file (defaults to ./siterunner.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding one subdirectory per site
    #[arg(long, global = true, env = "SITERUNNER_STORAGE_ROOT")]
    pub storage_root: Option<PathBuf>,

    /// Directory where uploaded archives are staged
    #[arg(long, global = true, env = "SITERUNNER_UPLOADS_DIR")]
    pub uploads_dir: Option<PathBuf>,

    /// Maximum archive size, compressed or extracted
    #[arg(long, global = true, env = "SITERUNNER_MAX_UPLOAD_BYTES")]
    pub max_upload_bytes: Option<u64>,

    /// Shell used to run start commands
    #[arg(long, global = true, env = "SITERUNNER_SHELL")]
    pub shell: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server
    Serve {
        /// Address to bind
        #[arg(long, env = "HOST", default_value = "127.0.0.1")]
        host: String,

        /// Port to serve on
        #[arg(short, long, env = "PORT", default_value = "3000")]
        port: u16,

        /// Allow cross-origin requests
        #[arg(long)]
        cors: bool,
    },
    /// Provision a site from a local zip archive
    Deploy {
        /// Path to the project archive (.zip)
        archive: PathBuf,

        /// Display name of the site
        #[arg(short, long)]
        name: String,

        /// Command to start the site in the background
        #[arg(short, long)]
        start: Option<String>,

        /// Record the start command without running it
        #[arg(long)]
        no_launch: bool,
    },
    /// List all sites
    List,
    /// Show one site's metadata record
    Show {
        /// Directory name of the site
        directory: String,
    },
}

impl Cli {
    /// Defaults, then the config file, then flags and environment.
    pub fn load_config(&self) -> Result<Config> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if self.config.is_some() && !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }

        let config = Config::load(&path)?.with_overrides(ConfigOverrides {
            storage_root: self.storage_root.clone(),
            uploads_dir: self.uploads_dir.clone(),
            upload_limit_bytes: self.max_upload_bytes,
            shell: self.shell.clone(),
        });
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "siterunner=debug,tower_http=debug"
    } else {
        "siterunner=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.load_config().context("Failed to load configuration")?;

    match &cli.command {
        Commands::Serve { host, port, cors } => {
            cmd::cmd_serve(config, host.clone(), *port, *cors).await?;
        }
        Commands::Deploy {
            archive,
            name,
            start,
            no_launch,
        } => {
            cmd::cmd_deploy(&config, archive, name, start.as_deref(), *no_launch).await?;
        }
        Commands::List => cmd::cmd_list(&config)?,
        Commands::Show { directory } => cmd::cmd_show(&config, directory)?,
    }

    Ok(())
}
