//! chainscan: replays an on-disk block database and reconstructs per-address
//! balances and the unspent-output set, writing monthly checkpoints and
//! statistical reports.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::error;

use chainscan::config::init_global_config;
use chainscan::pipeline;
use chainscan::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[clap(name = "chainscan")]
#[clap(
    about = "Reconstruct address balances and the UTXO set from a raw block database",
    long_about = None
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replay up to END_BLOCK blocks from DATA_DIR/blocks, writing
    /// checkpoints and reports to OUT_DIR
    Parse {
        end_block: u32,
        data_dir: PathBuf,
        out_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    init_global_config()?;
    init_tracing();

    match cli.command {
        Command::Parse {
            end_block,
            data_dir,
            out_dir,
        } => {
            if let Err(e) = pipeline::run(end_block, &data_dir, &out_dir).await {
                error!(error = %e, "fatal");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
