use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::logging;
use tracing::{error, info};

use mrsort_standby::args::Args;
use mrsort_standby::Watchdog;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("standby", args.log_dir.as_deref())?;

    let store = Arc::new(args.mirror.checkpoint_store(&args.state_dir)?);
    let mut watchdog = Watchdog::new(args.watchdog_config(), store, args.fleet());

    match watchdog.run().await {
        Ok(outcome) => {
            info!(
                "[STANDBY] Watch ended: {outcome:?} after {} restarts",
                watchdog.restarts()
            );
            Ok(())
        }
        Err(e) => {
            error!("[STANDBY] Watch failed: {e:#}");
            Err(e)
        }
    }
}
