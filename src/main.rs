//! erldbg - a command-line debugger for Erlang nodes
//!
//! Launches a node (or attaches to a running one) with the debugger agent
//! loaded and drives it from an interactive prompt.

use clap::Parser;
use commands::Commands;
use erldbg::{cli, commands, common::logging};

#[derive(Parser)]
#[command(name = "erldbg", about = "Command-line debugger for Erlang nodes")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; the guard keeps the file writer alive
    let guard = match cli.command.log_dir() {
        Some(dir) => match logging::init_with_file(&dir) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log directory {}: {e}", dir.display());
                std::process::exit(1);
            }
        },
        None => {
            logging::init_cli();
            None
        }
    };

    let result = cli::dispatch(cli.command).await;
    // Flush the file log before exiting
    drop(guard);

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
    // The prompt may still be blocked reading stdin
    std::process::exit(0);
}
