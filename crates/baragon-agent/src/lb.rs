//! Load balancer hooks: config check and reload.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use baragon_core::config::LoadBalancerConfig;

use crate::error::{LbError, LbResult};

/// Environment variable pointing the check command at staged files.
pub const STAGING_DIR_ENV: &str = "BARAGON_STAGING_DIR";
/// Environment variable holding the live config root.
pub const ROOT_PATH_ENV: &str = "BARAGON_ROOT_PATH";

/// The load balancer process on this node.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Check config. With `staging`, check the freshly rendered files in
    /// that directory (laid out like the config root); without, check the
    /// live config.
    async fn check_configs(&self, staging: Option<&Path>) -> LbResult<()>;

    /// Make the load balancer pick up the live config.
    async fn reload(&self) -> LbResult<()>;
}

/// Runs configured shell commands. A command that is not configured
/// always succeeds.
pub struct CommandLoadBalancer {
    root_path: PathBuf,
    check_command: Option<String>,
    reload_command: Option<String>,
}

impl CommandLoadBalancer {
    pub fn new(config: &LoadBalancerConfig) -> Self {
        Self {
            root_path: config.root_path.clone(),
            check_command: config.check_config_command.clone(),
            reload_command: config.reload_config_command.clone(),
        }
    }

    async fn run(&self, command: &str, staging: Option<&Path>) -> LbResult<()> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .env(ROOT_PATH_ENV, &self.root_path)
            .kill_on_drop(true);
        if let Some(dir) = staging {
            cmd.env(STAGING_DIR_ENV, dir);
        }

        debug!(%command, "running load balancer command");
        let output = cmd.output().await.map_err(|e| LbError::Spawn {
            command: command.to_string(),
            reason: e.to_string(),
        })?;

        if output.status.success() {
            return Ok(());
        }

        let mut text = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if text.is_empty() {
            text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        Err(LbError::CommandFailed {
            command: command.to_string(),
            status: output.status.to_string(),
            output: text,
        })
    }
}

#[async_trait]
impl LoadBalancer for CommandLoadBalancer {
    async fn check_configs(&self, staging: Option<&Path>) -> LbResult<()> {
        match &self.check_command {
            Some(command) => self.run(command, staging).await,
            None => Ok(()),
        }
    }

    async fn reload(&self) -> LbResult<()> {
        match &self.reload_command {
            Some(command) => {
                self.run(command, None).await?;
                info!(%command, "load balancer reloaded");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lb(check: Option<&str>, reload: Option<&str>) -> CommandLoadBalancer {
        CommandLoadBalancer {
            root_path: PathBuf::from("/tmp"),
            check_command: check.map(str::to_string),
            reload_command: reload.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn unconfigured_commands_succeed() {
        let lb = lb(None, None);
        lb.check_configs(None).await.unwrap();
        lb.reload().await.unwrap();
    }

    #[tokio::test]
    async fn failing_check_reports_output() {
        let lb = lb(Some("echo 'unexpected }' >&2; exit 3"), None);
        let err = lb.check_configs(None).await.unwrap_err();
        match err {
            LbError::CommandFailed { output, status, .. } => {
                assert_eq!(output, "unexpected }");
                assert!(status.contains('3'));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn check_sees_staging_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.conf"), "ok").unwrap();

        let lb = lb(Some("test -f \"$BARAGON_STAGING_DIR/a.conf\""), None);
        lb.check_configs(Some(dir.path())).await.unwrap();
        assert!(lb.check_configs(None).await.is_err());
    }

    #[tokio::test]
    async fn reload_runs_command() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("reloaded");
        let lb = lb(None, Some(&format!("touch {}", marker.display())));
        lb.reload().await.unwrap();
        assert!(marker.exists());
    }
}
