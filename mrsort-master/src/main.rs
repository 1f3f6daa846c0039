use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use common::config::Config;
use common::failures::FailureLog;
use common::logging;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mrsort_master::args::Args;
use mrsort_master::{serve, Master, MasterService};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("master", args.log_dir.as_deref())?;

    let config = Config::load(&args.config)?;
    info!(
        "Loaded {} ({} mappers, {} reducers, {} keys in [{}, {}])",
        args.config.display(),
        config.settings.num_mappers,
        config.settings.num_reducers,
        config.settings.count,
        config.settings.xi,
        config.settings.xf
    );

    let store = Arc::new(args.mirror.checkpoint_store(&args.state_dir)?);
    let failures = match &args.log_dir {
        Some(dir) => FailureLog::in_dir(dir),
        None => FailureLog::disabled(),
    };
    let master = Master::new(config, store.clone(), &args.output_dir)
        .with_options(args.options())
        .with_failure_log(failures);

    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("Master listening on {}", args.listen);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(
        MasterService::new(master.registry(), store),
        listener,
        shutdown.clone(),
    ));

    let outcome = master.run().await;
    shutdown.cancel();
    if let Err(e) = server.await.context("registration server task")? {
        error!("Registration server failed: {e}");
    }

    match outcome {
        Ok(path) => {
            info!("Master finished ({path})");
            Ok(())
        }
        Err(e) => {
            error!("Master failed: {e:#}");
            Err(e)
        }
    }
}
