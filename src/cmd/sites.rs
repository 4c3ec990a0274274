//! Site listing and inspection commands.

use anyhow::{Context, Result};

use siterunner::config::Config;
use siterunner::registry::{SiteEntry, SiteRegistry, SkipReason};

pub fn cmd_list(config: &Config) -> Result<()> {
    let registry = SiteRegistry::new(&config.storage_root);
    let entries = registry.list_sites().with_context(|| {
        format!(
            "Failed to list sites in {}",
            config.storage_root.display()
        )
    })?;

    if entries.is_empty() {
        println!();
        println!("No sites found. Run 'siterunner deploy <archive> --name <name>' to add one.");
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{:<32} {:<20} {:<8} {:<20} Start command",
        "Directory", "Name", "Running", "Created"
    );
    println!(
        "{:<32} {:<20} {:<8} {:<20} -------------",
        "--------------------------------", "--------------------", "-------", "--------------------"
    );

    for entry in &entries {
        match entry {
            SiteEntry::Listed(site) => {
                let running = if site.running {
                    console::style("yes").green()
                } else {
                    console::style("no").dim()
                };
                println!(
                    "{:<32} {:<20} {:<8} {:<20} {}",
                    site.directory_name,
                    site.display_name,
                    running,
                    site.created_at.format("%Y-%m-%d %H:%M:%S"),
                    site.start_command
                );
            }
            SiteEntry::Skipped {
                directory_name,
                reason,
            } => {
                println!(
                    "{:<32} {}",
                    directory_name,
                    console::style(format!("skipped: {}", describe(reason))).yellow()
                );
            }
        }
    }
    println!();
    Ok(())
}

pub fn cmd_show(config: &Config, directory: &str) -> Result<()> {
    let registry = SiteRegistry::new(&config.storage_root);
    let site = registry
        .get_site(directory)
        .with_context(|| format!("Failed to load site '{}'", directory))?;
    println!("{}", serde_json::to_string_pretty(&site)?);
    Ok(())
}

fn describe(reason: &SkipReason) -> String {
    match reason {
        SkipReason::NotADirectory => "not a directory".to_string(),
        SkipReason::MissingMetadata => "no metadata record".to_string(),
        SkipReason::Unreadable(detail) => format!("unreadable ({})", detail),
        SkipReason::Corrupt(detail) => format!("corrupt metadata ({})", detail),
    }
}
