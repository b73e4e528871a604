//! Provisioner stats.

use anyhow::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use tabled::Tabled;

use crate::output::{print_info, print_json, print_table, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct VarzCommand {}

#[derive(Debug, Serialize, Deserialize)]
struct Varz {
    service: String,
    nodes: Vec<NodeRow>,
    instances: usize,
    bindings: usize,
    orphan_instances: usize,
    orphan_bindings: usize,
    #[serde(default)]
    last_sweep: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    id: String,

    #[tabled(rename = "Plan")]
    plan: String,

    #[tabled(rename = "Capacity")]
    available_capacity: i64,

    #[tabled(rename = "Unit")]
    capacity_unit: i64,

    #[tabled(rename = "Pending")]
    pending_requests: u32,

    #[tabled(rename = "Versions", display = "join")]
    supported_versions: Vec<String>,

    #[tabled(rename = "Last seen")]
    last_seen: String,
}

fn join(versions: &[String]) -> String {
    versions.join(",")
}

impl VarzCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let varz: Varz = ctx.client()?.get("/varz").await?;

        match ctx.format {
            OutputFormat::Json => print_json(&varz),
            OutputFormat::Table => {
                print_table(&varz.nodes);
                print_info(&format!(
                    "{}: {} instances, {} bindings, {} orphan instances, {} orphan bindings",
                    varz.service,
                    varz.instances,
                    varz.bindings,
                    varz.orphan_instances,
                    varz.orphan_bindings
                ));
            }
        }
        Ok(())
    }
}
