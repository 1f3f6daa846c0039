use std::path::PathBuf;

use clap::{Parser, Subcommand};
use common::args::MirrorArgs;

//
// For parsing user specified command.
//
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Directory holding the checkpoint artifacts.
    #[arg(long, global = true, default_value = "state")]
    pub state_dir: PathBuf,

    #[command(flatten)]
    pub mirror: MirrorArgs,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show the job stage, chunk progress, reducer ranges and completion flag.
    Status,
    /// List the saved worker roster.
    Workers,
    /// Remove every checkpoint artifact, including the completion flag.
    Reset {
        /// Also delete reducer temp files and the final output in this directory.
        #[arg(long)]
        purge_output: Option<PathBuf>,
    },
}
