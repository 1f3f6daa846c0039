use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use common::args::MirrorArgs;

use crate::dispatch::DispatchPolicy;
use crate::recovery::MasterOptions;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Job configuration file.
    #[arg(short, long, default_value = "config/config.json")]
    pub config: PathBuf,

    /// Address the registration server binds to.
    #[arg(short, long, default_value = "0.0.0.0:8030")]
    pub listen: String,

    /// Directory holding the checkpoint artifacts.
    #[arg(long, default_value = "state")]
    pub state_dir: PathBuf,

    /// Directory shared with the reducers.
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Directory for the master log and the failed task record.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Seconds to wait between planning and the map phase.
    #[arg(long, default_value = "0")]
    pub pre_map_pause_secs: u64,

    /// Passes over the mapper pool before a chunk is given up.
    #[arg(long, default_value = "5")]
    pub max_retries: usize,

    /// Pause between passes, in milliseconds.
    #[arg(long, default_value = "2000")]
    pub retry_delay_ms: u64,

    /// Timeout for dialing a mapper, in milliseconds.
    #[arg(long, default_value = "3000")]
    pub dial_timeout_ms: u64,

    /// How long to wait for the roster to fill up, in seconds.
    #[arg(long, default_value = "30")]
    pub registration_deadline_secs: u64,

    #[command(flatten)]
    pub mirror: MirrorArgs,
}

impl Args {
    pub fn options(&self) -> MasterOptions {
        MasterOptions {
            dispatch: DispatchPolicy {
                max_retries: self.max_retries,
                retry_delay: Duration::from_millis(self.retry_delay_ms),
                dial_timeout: Duration::from_millis(self.dial_timeout_ms),
            },
            registration_deadline: Duration::from_secs(self.registration_deadline_secs),
            pre_map_pause: Duration::from_secs(self.pre_map_pause_secs),
            ..MasterOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_dispatch_policy() {
        let args = Args::parse_from(["mrsort-master"]);
        let options = args.options();
        assert_eq!(options.dispatch.max_retries, 5);
        assert_eq!(options.dispatch.retry_delay, Duration::from_secs(2));
        assert_eq!(options.dispatch.dial_timeout, Duration::from_secs(3));
        assert_eq!(options.registration_deadline, Duration::from_secs(30));
        assert!(options.pre_map_pause.is_zero());
    }
}
