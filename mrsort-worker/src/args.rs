use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use common::config::Role;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Address other nodes use to reach this worker (`host:port`).
    #[arg(short, long, env = "WORKER_ADDR")]
    pub address: String,

    /// Socket to bind. Defaults to all interfaces on the advertised port.
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Role announced to the master.
    #[arg(short, long, env = "ROLE", default_value = "mapper")]
    pub role: Role,

    /// Master to register with. Without it the worker waits to be found
    /// through the master's config file.
    #[arg(short, long, env = "MASTER_ADDR")]
    pub master_addr: Option<String>,

    /// Directory reducer temp files are appended to.
    #[arg(long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Directory for the worker log and the failed task record.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Artificial delay before each map task, in milliseconds.
    #[arg(long, default_value = "0")]
    pub map_delay_ms: u64,

    /// Timeout for dialing reducers and the master, in milliseconds.
    #[arg(long, default_value = "3000")]
    pub dial_timeout_ms: u64,

    /// How long to keep retrying registration, in seconds.
    #[arg(long, default_value = "30")]
    pub register_deadline_secs: u64,
}

impl Args {
    pub fn listen_addr(&self) -> String {
        if let Some(listen) = &self.listen {
            return listen.clone();
        }
        match self.address.rsplit_once(':') {
            Some((_, port)) => format!("0.0.0.0:{port}"),
            None => self.address.clone(),
        }
    }

    pub fn map_delay(&self) -> Duration {
        Duration::from_millis(self.map_delay_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn register_deadline(&self) -> Duration {
        Duration::from_secs(self.register_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listen_defaults_to_advertised_port() {
        let args = Args::parse_from(["mrsort-worker", "--address", "reducer2:50052"]);
        assert_eq!(args.listen_addr(), "0.0.0.0:50052");

        let args = Args::parse_from([
            "mrsort-worker",
            "--address",
            "reducer2:50052",
            "--listen",
            "127.0.0.1:7000",
            "--role",
            "reducer",
        ]);
        assert_eq!(args.listen_addr(), "127.0.0.1:7000");
        assert_eq!(args.role, Role::Reducer);
    }
}
