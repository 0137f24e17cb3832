mod cli;
mod handlers;
mod utils;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    }

    match cli.command {
        Command::Version => {
            println!("tapo {}", env!("CARGO_PKG_VERSION"));
            println!("tapo-core {}", tapo_core::VERSION);
        }
        Command::On(args) => {
            handlers::handle_power(args, true, cli.username, cli.password_stdin).await
        }
        Command::Off(args) => {
            handlers::handle_power(args, false, cli.username, cli.password_stdin).await
        }
        Command::Status(args) => {
            handlers::handle_status(args, cli.username, cli.password_stdin).await
        }
        Command::Info(args) => handlers::handle_info(args, cli.username, cli.password_stdin).await,
    }
}
