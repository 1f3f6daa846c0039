use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use common::args::MirrorArgs;

use crate::fleet::{ShellFleet, DEFAULT_RESTART_COMMAND, DEFAULT_SHUTDOWN_COMMAND};
use crate::watchdog::WatchdogConfig;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Registration address of the watched master.
    #[arg(short, long, env = "MASTER_ADDR", default_value = "master:8030")]
    pub master_addr: String,

    /// Directory holding the checkpoint artifacts.
    #[arg(long, default_value = "state")]
    pub state_dir: PathBuf,

    /// Directory for the standby log.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Seconds to wait before the first probe.
    #[arg(long, default_value = "10")]
    pub grace_secs: u64,

    /// Seconds between probes.
    #[arg(long, default_value = "7")]
    pub poll_secs: u64,

    /// Consecutive failed probes that trigger a restart.
    #[arg(long, default_value = "3")]
    pub failure_threshold: u32,

    /// Shell command that restarts the master.
    #[arg(long, default_value = DEFAULT_RESTART_COMMAND)]
    pub restart_command: String,

    /// Shell command that stops every node once the job is done.
    #[arg(long, default_value = DEFAULT_SHUTDOWN_COMMAND)]
    pub shutdown_command: String,

    #[command(flatten)]
    pub mirror: MirrorArgs,
}

impl Args {
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            grace: Duration::from_secs(self.grace_secs),
            poll_interval: Duration::from_secs(self.poll_secs),
            failure_threshold: self.failure_threshold,
            ..WatchdogConfig::new(&self.master_addr)
        }
    }

    pub fn fleet(&self) -> ShellFleet {
        ShellFleet {
            restart_command: self.restart_command.clone(),
            shutdown_command: self.shutdown_command.clone(),
        }
    }
}
