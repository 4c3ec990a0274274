//! Fire-and-forget start commands.
//!
//! [`ProcessLauncher::launch`] spawns a site's start command through a shell,
//! inside the site directory, in its own process group with all standard
//! streams discarded, then drops the child handle. It never waits on,
//! monitors, restarts, or limits the process. Once a launch succeeds the
//! site's `running` flag is `true` for good; noticing that the process later
//! died would be the job of a separate supervisor.

use std::process::Stdio;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::process::Command;
use tracing::{info, warn};

use crate::errors::LaunchError;
use crate::registry::{Site, SiteRegistry};

/// What is known about a launched process at the moment it was spawned.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessHandle {
    pub pid: u32,
    pub command: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    registry: SiteRegistry,
    shell: String,
}

impl ProcessLauncher {
    pub fn new(registry: SiteRegistry, shell: impl Into<String>) -> Self {
        Self {
            registry,
            shell: shell.into(),
        }
    }

    /// Spawn `site.start_command` and mark the site running.
    ///
    /// Must be called from within a tokio runtime, which reaps the child
    /// once it exits.
    pub fn launch(&self, site: &mut Site) -> Result<ProcessHandle, LaunchError> {
        let command = site.start_command.trim().to_string();
        if command.is_empty() {
            return Err(LaunchError::EmptyCommand {
                directory_name: site.directory_name.clone(),
            });
        }

        let working_dir = self.registry.site_dir(&site.directory_name);
        let mut std_cmd = std::process::Command::new(&self.shell);
        std_cmd
            .arg("-c")
            .arg(&command)
            .current_dir(&working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group: signals sent to the server do not reach the site.
            std_cmd.process_group(0);
        }
        let mut cmd = Command::from(std_cmd);
        cmd.kill_on_drop(false);

        let child = cmd.spawn().map_err(|source| {
            warn!(site = %site.directory_name, command = %command, error = %source, "Failed to spawn start command");
            LaunchError::Spawn {
                command: command.clone(),
                source,
            }
        })?;
        let pid = child.id().unwrap_or_default();
        drop(child);

        info!(site = %site.directory_name, pid, command = %command, "Start command launched");

        self.registry
            .update_running(site, true)
            .map_err(|source| LaunchError::Record { pid, source })?;

        Ok(ProcessHandle {
            pid,
            command,
            started_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn setup(start: &str) -> (tempfile::TempDir, SiteRegistry, Site) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SiteRegistry::new(dir.path().join("sites"));
        let site = registry.create_site("svc", start, "a.zip").unwrap();
        (dir, registry, site)
    }

    async fn wait_for(path: &std::path::Path) -> bool {
        for _ in 0..100 {
            if path.exists() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_launch_marks_site_running() {
        let (_dir, registry, mut site) = setup("true");
        let launcher = ProcessLauncher::new(registry.clone(), "sh");

        let handle = launcher.launch(&mut site).unwrap();

        assert!(handle.pid > 0);
        assert_eq!(handle.command, "true");
        assert!(site.running);
        assert!(registry.get_site(&site.directory_name).unwrap().running);
    }

    #[tokio::test]
    async fn test_launch_runs_in_site_directory() {
        let (_dir, registry, mut site) = setup("echo launched > marker.txt");
        let launcher = ProcessLauncher::new(registry.clone(), "sh");

        launcher.launch(&mut site).unwrap();

        let marker = registry.site_dir(&site.directory_name).join("marker.txt");
        assert!(wait_for(&marker).await, "marker file never appeared");
    }

    #[tokio::test]
    async fn test_launch_does_not_wait_for_long_running_process() {
        let (_dir, registry, mut site) = setup("sleep 30");
        let launcher = ProcessLauncher::new(registry, "sh");

        let started = std::time::Instant::now();
        let handle = launcher.launch(&mut site).unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        #[cfg(unix)]
        {
            let _ = std::process::Command::new("kill")
                .arg(handle.pid.to_string())
                .status();
        }
    }

    #[tokio::test]
    async fn test_launch_missing_shell_leaves_site_stopped() {
        let (_dir, registry, mut site) = setup("true");
        let launcher = ProcessLauncher::new(registry.clone(), "/nonexistent/shell");

        let err = launcher.launch(&mut site).unwrap_err();

        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(!site.running);
        assert!(!registry.get_site(&site.directory_name).unwrap().running);
    }

    #[tokio::test]
    async fn test_launch_empty_command_is_rejected() {
        let (_dir, registry, mut site) = setup("   ");
        let launcher = ProcessLauncher::new(registry, "sh");

        let err = launcher.launch(&mut site).unwrap_err();
        assert!(matches!(err, LaunchError::EmptyCommand { .. }));
        assert!(!site.running);
    }
}
