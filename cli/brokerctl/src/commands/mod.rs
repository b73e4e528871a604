//! CLI commands.

mod lock;
mod orphans;
mod varz;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// brokerd operator CLI.
#[derive(Debug, Parser)]
#[command(name = "brokerctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Provisioner operational API base URL.
    #[arg(
        long,
        global = true,
        env = "BROKER_API_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    api_url: String,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, env = "BROKER_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run commands under a distributed lock.
    Lock(lock::LockCommand),

    /// Show provisioner stats.
    Varz(varz::VarzCommand),

    /// Inspect, check and purge orphans.
    Orphans(orphans::OrphansCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Logs go to stderr so command output stays parseable.
    pub fn init_tracing(&self) {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.log_level.as_str()));
        let registry = tracing_subscriber::registry().with(filter);
        if self.log_json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    /// Run the command and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let ctx = CommandContext {
            format: self.format,
            api_url: self.api_url,
        };

        match self.command {
            Commands::Lock(cmd) => cmd.run(ctx).await,
            Commands::Varz(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Orphans(cmd) => cmd.run(ctx).await.map(|_| 0),
            Commands::Version => {
                println!("brokerctl {}", env!("CARGO_PKG_VERSION"));
                Ok(0)
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub format: OutputFormat,
    pub api_url: String,
}

impl CommandContext {
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.api_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_lock_run_takes_trailing_command() {
        let cli = Cli::try_parse_from([
            "brokerctl",
            "lock",
            "run",
            "--name",
            "nightly-backup",
            "--ttl",
            "30",
            "--",
            "pg_dump",
            "--verbose",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Lock(_)));
        assert_eq!(cli.format, OutputFormat::Table);
    }

    #[test]
    fn test_lock_run_requires_command() {
        let parsed = Cli::try_parse_from(["brokerctl", "lock", "run", "--name", "x"]);
        assert!(parsed.is_err());
    }
}
