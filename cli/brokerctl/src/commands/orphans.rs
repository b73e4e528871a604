//! Orphan commands.

use anyhow::Result;
use brokerd_reconcile::OrphanSet;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::{print_info, print_json, print_success, print_table, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct OrphansCommand {
    #[command(subcommand)]
    command: OrphansSubcommand,
}

#[derive(Debug, Subcommand)]
enum OrphansSubcommand {
    /// List confirmed orphans.
    List,

    /// Start a sweep. Confirmation follows after the configured delay.
    Check,

    /// Purge confirmed orphans.
    Purge(PurgeArgs),
}

#[derive(Debug, Args)]
struct PurgeArgs {
    /// Only purge orphans on this node.
    #[arg(long)]
    node: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct OrphanReport {
    in_progress: Option<String>,
    #[serde(default)]
    last_sweep: Option<serde_json::Value>,
    instance_count: usize,
    binding_count: usize,
    orphans: OrphanSet,
}

#[derive(Debug, Serialize, Deserialize)]
struct SweepStarted {
    sweep_id: String,
    confirm_after_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PurgeSummary {
    nodes: Vec<String>,
    batches: usize,
    instances: usize,
    bindings: usize,
}

#[derive(Debug, Tabled)]
struct OrphanRow {
    #[tabled(rename = "Node")]
    node: String,

    #[tabled(rename = "Kind")]
    kind: &'static str,

    #[tabled(rename = "Identity")]
    identity: String,
}

fn rows(set: &OrphanSet) -> Vec<OrphanRow> {
    let mut rows = Vec::new();
    for (node, ids) in &set.instances {
        rows.extend(ids.iter().map(|id| OrphanRow {
            node: node.clone(),
            kind: "instance",
            identity: id.clone(),
        }));
    }
    for (node, bindings) in &set.bindings {
        rows.extend(bindings.iter().map(|creds| OrphanRow {
            node: node.clone(),
            kind: "binding",
            identity: format!(
                "{}/{}",
                creds.name().unwrap_or("?"),
                creds.username().unwrap_or("?")
            ),
        }));
    }
    rows
}

/// The part of `set` that lives on `node`.
fn only_node(set: OrphanSet, node: &str) -> OrphanSet {
    let mut selection = OrphanSet::default();
    if let Some(ids) = set.instances.get(node) {
        selection.instances.insert(node.to_string(), ids.clone());
    }
    if let Some(bindings) = set.bindings.get(node) {
        selection.bindings.insert(node.to_string(), bindings.clone());
    }
    selection
}

impl OrphansCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            OrphansSubcommand::List => list(ctx).await,
            OrphansSubcommand::Check => check(ctx).await,
            OrphansSubcommand::Purge(args) => purge(ctx, args).await,
        }
    }
}

async fn list(ctx: CommandContext) -> Result<()> {
    let report: OrphanReport = ctx.client()?.get("/orphans").await?;
    match ctx.format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            print_table(&rows(&report.orphans));
            if let Some(sweep) = report.in_progress {
                print_info(&format!("Sweep {sweep} awaiting confirmation"));
            }
        }
    }
    Ok(())
}

async fn check(ctx: CommandContext) -> Result<()> {
    let started: SweepStarted = ctx
        .client()?
        .post::<_, serde_json::Value>("/orphans/check", None)
        .await?;
    match ctx.format {
        OutputFormat::Json => print_json(&started),
        OutputFormat::Table => print_success(&format!(
            "Sweep {} started, confirming in {}s",
            started.sweep_id, started.confirm_after_secs
        )),
    }
    Ok(())
}

async fn purge(ctx: CommandContext, args: PurgeArgs) -> Result<()> {
    let client = ctx.client()?;
    let summary: PurgeSummary = match args.node.as_deref() {
        None => client.post::<_, OrphanSet>("/orphans/purge", None).await?,
        Some(node) => {
            let report: OrphanReport = client.get("/orphans").await?;
            let selection = only_node(report.orphans, node);
            if selection.is_empty() {
                print_info(&format!("No confirmed orphans on {node}"));
                return Ok(());
            }
            client.post("/orphans/purge", Some(&selection)).await?
        }
    };

    match ctx.format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => print_success(&format!(
            "Purged {} instances and {} bindings on {} node(s) in {} batch(es)",
            summary.instances,
            summary.bindings,
            summary.nodes.len(),
            summary.batches
        )),
    }
    Ok(())
}
