mod args;
use args::{Args, Commands};

mod core;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let store = args.mirror.checkpoint_store(&args.state_dir)?;

    match args.command {
        Commands::Status => print!("{}", core::status(&store).await),
        Commands::Workers => print!("{}", core::workers(&store).await),
        Commands::Reset { purge_output } => {
            print!("{}", core::reset(&store, purge_output.as_deref()).await?)
        }
    }

    Ok(())
}
