use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

pub const DEFAULT_RESTART_COMMAND: &str = "docker container start master";
pub const DEFAULT_SHUTDOWN_COMMAND: &str = "docker-compose down";

/// Process supervision the watchdog delegates to.
#[async_trait]
pub trait FleetControl: Send + Sync {
    async fn restart_master(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;
}

/// Runs shell command lines through `sh -c`.
#[derive(Debug, Clone)]
pub struct ShellFleet {
    pub restart_command: String,
    pub shutdown_command: String,
}

impl Default for ShellFleet {
    fn default() -> Self {
        Self {
            restart_command: DEFAULT_RESTART_COMMAND.to_string(),
            shutdown_command: DEFAULT_SHUTDOWN_COMMAND.to_string(),
        }
    }
}

async fn run_shell(command: &str) -> Result<()> {
    info!("[STANDBY] Running `{command}`");
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .status()
        .await
        .with_context(|| format!("spawning `{command}`"))?;
    if !status.success() {
        bail!("`{command}` exited with {status}");
    }
    Ok(())
}

#[async_trait]
impl FleetControl for ShellFleet {
    async fn restart_master(&self) -> Result<()> {
        run_shell(&self.restart_command).await
    }

    async fn shutdown(&self) -> Result<()> {
        run_shell(&self.shutdown_command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_failing_commands() {
        let fleet = ShellFleet {
            restart_command: "true".into(),
            shutdown_command: "exit 3".into(),
        };
        fleet.restart_master().await.unwrap();
        assert!(fleet.shutdown().await.is_err());
    }
}
