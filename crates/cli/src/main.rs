//! fsstream CLI - fsstream command

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod bookmark;
mod cmd;
mod logging;
mod output;
mod rescan;
mod settings;

/// fsstream - File system event streams from the command line
#[derive(Parser)]
#[command(name = "fsstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch paths and print events until interrupted
    Watch(cmd::watch::WatchArgs),
    /// Decode a raw event flag value without watching anything
    Decode {
        /// Raw flags, hex (0x...) or decimal
        flags: String,
        /// Path to attach to the decoded events
        #[arg(long, default_value = "/")]
        path: String,
        /// Event id to attach to the decoded events
        #[arg(long, default_value_t = 0)]
        id: u64,
        /// Decode as if the stream was created with mark-self
        #[arg(long)]
        mark_self: bool,
        /// Print JSON lines instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = logging::init(cli.log_dir.as_deref())?;

    match cli.command {
        Commands::Watch(args) => cmd::watch::run(args).await,
        Commands::Decode {
            flags,
            path,
            id,
            mark_self,
            json,
        } => cmd::decode::run(&flags, &path, id, mark_self, json),
    }
}
