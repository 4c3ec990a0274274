//! Local provisioning command — `siterunner deploy`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::warn;

use siterunner::config::Config;
use siterunner::provision::{LaunchReport, Provisioner, UploadRequest};

pub async fn cmd_deploy(
    config: &Config,
    archive: &Path,
    name: &str,
    start: Option<&str>,
    no_launch: bool,
) -> Result<()> {
    if !archive.is_file() {
        anyhow::bail!("Archive not found: {}", archive.display());
    }
    config.ensure_directories()?;

    // Same staging as an HTTP upload: the archive is kept as the source artifact.
    let stored_name = format!("{}.zip", uuid::Uuid::new_v4());
    let staged = config.uploads_dir.join(&stored_name);
    std::fs::copy(archive, &staged)
        .with_context(|| format!("Failed to stage {}", archive.display()))?;

    let request = UploadRequest {
        archive_path: staged.clone(),
        display_name: name.to_string(),
        start_command: start.map(str::to_string),
        deploy: Some(!no_launch),
        source_archive_ref: stored_name,
    };

    let provisioner = Provisioner::new(config);
    let provisioned = match provisioner.provision(request) {
        Ok(provisioned) => provisioned,
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(&staged) {
                warn!(path = %staged.display(), error = %remove_err, "Failed to remove staged archive");
            }
            return Err(e).context("Deploy failed");
        }
    };

    let site = &provisioned.site;
    println!(
        "{} Deployed {} ({} files)",
        console::style("✓").green(),
        console::style(&site.display_name).bold(),
        provisioned.summary.files
    );
    println!("  Directory: {}", site.directory_name);
    println!(
        "  Path:      {}",
        config.storage_root.join(&site.directory_name).display()
    );
    match &provisioned.launch {
        LaunchReport::NotRequested => println!("  Start:     not launched"),
        LaunchReport::Launched { pid } => {
            println!("  Start:     `{}` running as pid {}", site.start_command, pid)
        }
        LaunchReport::Failed { message } => println!(
            "  Start:     {} {}",
            console::style("failed:").red(),
            message
        ),
    }
    Ok(())
}
