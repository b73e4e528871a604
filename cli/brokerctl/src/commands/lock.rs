//! Distributed lock commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use brokerd_lock::{lock_key, CoordinationStore, DistributedLock, EtcdStore, LockConfig, LockError};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tabled::Tabled;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::CliError;
use crate::output::{print_json, print_table, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct LockCommand {
    #[command(subcommand)]
    command: LockSubcommand,
}

#[derive(Debug, Subcommand)]
enum LockSubcommand {
    /// Run a command while holding the named lock.
    Run(RunArgs),

    /// Show who holds the named lock and until when.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
struct EtcdArgs {
    /// etcd endpoints, comma separated.
    #[arg(
        long = "etcd-endpoints",
        env = "BROKER_ETCD_ENDPOINTS",
        value_delimiter = ',',
        default_value = "http://127.0.0.1:2379"
    )]
    endpoints: Vec<String>,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Lock name.
    #[arg(long)]
    name: String,

    /// Seconds to wait for the lock.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Seconds the command may run before it is killed.
    #[arg(long, default_value_t = 600, value_parser = clap::value_parser!(u64).range(1..))]
    ttl: u64,

    /// Lease length in seconds.
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    lease: u64,

    #[command(flatten)]
    etcd: EtcdArgs,

    /// Command and arguments, after `--`.
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[derive(Debug, Args)]
struct InspectArgs {
    /// Lock name.
    #[arg(long)]
    name: String,

    #[command(flatten)]
    etcd: EtcdArgs,
}

impl LockCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<i32> {
        match self.command {
            LockSubcommand::Run(args) => run_locked(args).await,
            LockSubcommand::Inspect(args) => inspect(ctx, args).await.map(|_| 0),
        }
    }
}

impl RunArgs {
    fn lock_config(&self) -> LockConfig {
        LockConfig {
            acquire_timeout: Duration::from_secs(self.timeout),
            lease: Duration::from_secs(self.lease),
            ttl: Duration::from_secs(self.ttl),
            ..LockConfig::default()
        }
    }
}

async fn connect(etcd: &EtcdArgs) -> Result<EtcdStore, CliError> {
    EtcdStore::connect(&etcd.endpoints)
        .await
        .map_err(|e| CliError::Lock(LockError::Store(e)))
}

/// Exit code is the child's, or 1 if it was killed by a signal.
async fn run_locked(args: RunArgs) -> Result<i32> {
    let store = connect(&args.etcd).await?;
    let lock = DistributedLock::new(args.name.clone(), Arc::new(store), args.lock_config());
    let Some((program, rest)) = args.command.split_first() else {
        anyhow::bail!("no command given");
    };

    let status = lock
        .run(|lease| async move {
            let mut child = Command::new(program).args(rest).kill_on_drop(true).spawn()?;
            info!(lock = %lease.name(), pid = child.id(), "Command started under lock");

            let mut check = tokio::time::interval(Duration::from_secs(1));
            let mut warned = false;
            loop {
                tokio::select! {
                    status = child.wait() => return status,
                    _ = check.tick() => {
                        if !warned && !lease.is_held() {
                            warn!(lock = %lease.name(), "Lease lost, command keeps running");
                            warned = true;
                        }
                    }
                }
            }
        })
        .await
        .map_err(CliError::from)?
        .with_context(|| format!("Failed to run {program}"))?;

    Ok(status.code().unwrap_or(1))
}

#[derive(Debug, Serialize, Tabled)]
struct LockRow {
    #[tabled(rename = "Name")]
    name: String,

    #[tabled(rename = "Key")]
    key: String,

    #[tabled(rename = "State")]
    state: &'static str,

    #[tabled(rename = "Expires", display = "crate::output::display_option")]
    expires_at: Option<DateTime<Utc>>,
}

impl LockRow {
    fn from_value(name: &str, value: Option<&str>, now: DateTime<Utc>) -> Self {
        let expires_at = value
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(DateTime::from_timestamp_millis);
        let state = match (value, expires_at) {
            (None, _) => "free",
            (Some(_), Some(at)) if at > now => "held",
            (Some(_), _) => "expired",
        };
        Self {
            name: name.to_string(),
            key: lock_key(name),
            state,
            expires_at,
        }
    }
}

async fn inspect(ctx: CommandContext, args: InspectArgs) -> Result<()> {
    let store = connect(&args.etcd).await?;
    let value = store
        .get(&lock_key(&args.name))
        .await
        .map_err(|e| CliError::Lock(LockError::Store(e)))?;

    let row = LockRow::from_value(&args.name, value.as_deref(), Utc::now());
    match ctx.format {
        OutputFormat::Table => print_table(&[row]),
        OutputFormat::Json => print_json(&row),
    }
    Ok(())
}
