use anyhow::{Context, Result};
use clap::Parser;
use common::config::WorkerConfig;
use common::failures::FailureLog;
use common::{logging, sanitize_addr};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mrsort_worker::args::Args;
use mrsort_worker::register::{register_with_master, REGISTER_INTERVAL};
use mrsort_worker::{serve, WorkerService};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let component = format!("worker_{}", sanitize_addr(&args.address));
    logging::init(&component, args.log_dir.as_deref())?;

    let failures = match &args.log_dir {
        Some(dir) => FailureLog::in_dir(dir),
        None => FailureLog::disabled(),
    };
    let service = WorkerService::new(&args.address, args.role, &args.output_dir)
        .with_map_delay(args.map_delay())
        .with_dial_timeout(args.dial_timeout())
        .with_failure_log(failures);

    let listen = args.listen_addr();
    let listener = TcpListener::bind(&listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!("Worker {} ({}) listening on {listen}", args.address, args.role);

    let shutdown = CancellationToken::new();
    let server = tokio::spawn(serve(service, listener, shutdown.clone()));

    if let Some(master) = &args.master_addr {
        let me = WorkerConfig::new(args.role, &args.address);
        if let Err(e) = register_with_master(
            master,
            &me,
            args.dial_timeout(),
            args.register_deadline(),
            REGISTER_INTERVAL,
        )
        .await
        {
            error!("{e:#}");
            shutdown.cancel();
            return Err(e);
        }
    }

    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("listening for shutdown signal")?;
            info!("Worker server exited...");
            shutdown.cancel();
        }
        res = server => {
            res.context("worker server task")??;
        }
    }

    Ok(())
}
