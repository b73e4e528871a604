use std::collections::BTreeSet;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use brokerd_reconcile::{DEFAULT_CONFIRM_DELAY, DEFAULT_MAX_PAYLOAD_BYTES};

/// Where the canonical handle store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleStoreConfig {
    pub url: String,
    pub label: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Prefix of every bus subject.
    pub service_name: String,
    /// How long a node gets to answer a request.
    pub node_timeout: Duration,
    /// Nodes not heard from for this long are dropped.
    pub stale_node_threshold: Duration,
    pub prune_interval: Duration,
    /// Period of automatic orphan sweeps. `None` disables them.
    pub orphan_check_interval: Option<Duration>,
    /// Delay between staging and confirming orphans.
    pub orphan_confirm_delay: Duration,
    pub max_payload_bytes: usize,
    /// How long recovery waits for all rebinds.
    pub recovery_bind_timeout: Duration,
    /// Plans allowed to provision on nodes with no capacity left.
    pub over_provisioning_plans: BTreeSet<String>,
    pub handle_store: Option<HandleStoreConfig>,
    /// Bus the service binary connects to.
    pub nats_url: String,
    /// Address of the operational API.
    pub listen_addr: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "svc".to_string(),
            node_timeout: Duration::from_secs(5),
            stale_node_threshold: Duration::from_secs(300),
            prune_interval: Duration::from_secs(30),
            orphan_check_interval: None,
            orphan_confirm_delay: DEFAULT_CONFIRM_DELAY,
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            recovery_bind_timeout: Duration::from_secs(10),
            over_provisioning_plans: BTreeSet::new(),
            handle_store: None,
            nats_url: "nats://127.0.0.1:4222".to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from `BROKER_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from any variable lookup. Unset variables take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let vars = Vars(&lookup);

        let config = Self {
            service_name: vars.get("BROKER_SERVICE_NAME").unwrap_or(defaults.service_name),
            node_timeout: vars
                .secs("BROKER_NODE_TIMEOUT_SECS")?
                .unwrap_or(defaults.node_timeout),
            stale_node_threshold: vars
                .secs("BROKER_NODE_STALE_SECS")?
                .unwrap_or(defaults.stale_node_threshold),
            prune_interval: vars
                .secs("BROKER_NODE_PRUNE_INTERVAL_SECS")?
                .unwrap_or(defaults.prune_interval),
            orphan_check_interval: vars.secs("BROKER_ORPHAN_CHECK_INTERVAL_SECS")?,
            orphan_confirm_delay: vars
                .secs("BROKER_ORPHAN_CONFIRM_DELAY_SECS")?
                .unwrap_or(defaults.orphan_confirm_delay),
            max_payload_bytes: vars
                .parsed::<usize>("BROKER_MAX_PAYLOAD_BYTES")?
                .unwrap_or(defaults.max_payload_bytes),
            recovery_bind_timeout: vars
                .secs("BROKER_RECOVERY_BIND_TIMEOUT_SECS")?
                .unwrap_or(defaults.recovery_bind_timeout),
            over_provisioning_plans: vars
                .get("BROKER_OVER_PROVISION_PLANS")
                .map(|v| parse_plan_list(&v))
                .unwrap_or_default(),
            handle_store: match vars.get("BROKER_HANDLES_URL") {
                Some(url) => Some(HandleStoreConfig {
                    url,
                    label: vars
                        .get("BROKER_SERVICE_LABEL")
                        .context("BROKER_SERVICE_LABEL is required with BROKER_HANDLES_URL")?,
                    token: vars.get("BROKER_SERVICE_TOKEN"),
                }),
                None => None,
            },
            nats_url: vars.get("BROKER_NATS_URL").unwrap_or(defaults.nats_url),
            listen_addr: vars.get("BROKER_LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            log_level: vars.get("BROKER_LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values the workers cannot run with.
    pub fn validate(&self) -> Result<()> {
        let durations = [
            ("node_timeout", Some(self.node_timeout)),
            ("stale_node_threshold", Some(self.stale_node_threshold)),
            ("prune_interval", Some(self.prune_interval)),
            ("orphan_check_interval", self.orphan_check_interval),
            ("recovery_bind_timeout", Some(self.recovery_bind_timeout)),
        ];
        for (name, value) in durations {
            if value.is_some_and(|d| d.is_zero()) {
                bail!("{name} must be greater than zero");
            }
        }
        if self.max_payload_bytes == 0 {
            bail!("max_payload_bytes must be greater than zero");
        }
        Ok(())
    }

    pub fn allows_over_provisioning(&self, plan: &str) -> bool {
        self.over_provisioning_plans.contains(plan)
    }
}

struct Vars<'a, F>(&'a F);

impl<F: Fn(&str) -> Option<String>> Vars<'_, F> {
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
    }

    fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(name) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .with_context(|| format!("invalid value for {name}: {raw:?}")),
            None => Ok(None),
        }
    }

    fn secs(&self, name: &str) -> Result<Option<Duration>> {
        match self.parsed::<u64>(name)? {
            Some(0) => Err(anyhow!("{name} must be at least 1 second")),
            other => Ok(other.map(Duration::from_secs)),
        }
    }
}

fn parse_plan_list(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}
