//! brokerctl - operator CLI for brokerd
//!
//! Runs commands under a distributed lock and talks to the provisioner's
//! operational API.

use clap::Parser;

mod client;
mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cli.init_tracing();

    match cli.run().await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error::print_error(&e);
            std::process::exit(error::exit_code(&e));
        }
    }
}
