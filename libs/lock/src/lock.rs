//! Acquire, renew, run, release.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::{CoordinationStore, LockError, StoreError};

/// Floor for the renewal period, regardless of lease length.
pub const MIN_RENEW_INTERVAL: Duration = Duration::from_secs(1);

/// Store key for a lock name.
pub fn lock_key(name: &str) -> String {
    format!("brokerd:lock:{name}")
}

/// Lock timing.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long to keep polling before giving up with `QueueTimeout`.
    pub acquire_timeout: Duration,
    /// Length of one lease. The holder renews at half this period.
    pub lease: Duration,
    /// Hard ceiling on the critical section.
    pub ttl: Duration,
    /// Delay between acquisition attempts.
    pub poll_interval: Duration,
    /// Time given to the renewal task to stop before it is aborted.
    pub stop_grace: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(10),
            lease: Duration::from_secs(10),
            ttl: Duration::from_secs(600),
            poll_interval: Duration::from_secs(1),
            stop_grace: Duration::from_secs(2),
        }
    }
}

impl LockConfig {
    fn renew_interval(&self) -> Duration {
        (self.lease / 2).max(MIN_RENEW_INTERVAL)
    }

    /// A zero lease is claimable by anyone the moment it is written.
    pub fn validate(&self) -> Result<(), LockError> {
        let fields = [
            ("acquire_timeout", self.acquire_timeout),
            ("lease", self.lease),
            ("ttl", self.ttl),
            ("poll_interval", self.poll_interval),
        ];
        match fields.iter().find(|(_, d)| d.is_zero()) {
            Some((name, _)) => Err(LockError::InvalidConfig(format!(
                "{name} must be greater than zero"
            ))),
            None => Ok(()),
        }
    }
}

/// Handle passed to the critical section.
///
/// `is_held` turns false once the renewal task notices the key was taken
/// over, disappeared, or could no longer be renewed. The body decides what
/// to do about it.
#[derive(Debug, Clone)]
pub struct Lease {
    name: Arc<str>,
    alive: Arc<AtomicBool>,
}

impl Lease {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_held(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }
}

/// Named lock over a shared store.
pub struct DistributedLock {
    name: String,
    key: String,
    store: Arc<dyn CoordinationStore>,
    config: LockConfig,
}

impl DistributedLock {
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn CoordinationStore>,
        config: LockConfig,
    ) -> Self {
        let name = name.into();
        Self {
            key: lock_key(&name),
            name,
            store,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Run `body` while holding the lock.
    ///
    /// Returns the body's output, `QueueTimeout` if the lock was never
    /// acquired, or `JobTimeout` if the body outlived the ttl and was dropped.
    /// The lock is released in every case where it was acquired.
    #[instrument(skip(self, body), fields(lock = %self.name))]
    pub async fn run<F, Fut, T>(&self, body: F) -> Result<T, LockError>
    where
        F: FnOnce(Lease) -> Fut,
        Fut: Future<Output = T>,
    {
        self.config.validate()?;
        let expiration = self.acquire().await?;
        debug!(expiration, "Lock acquired");

        let lease = Lease {
            name: Arc::from(self.name.as_str()),
            alive: Arc::new(AtomicBool::new(true)),
        };
        let mut renewal = self.spawn_renewal(expiration, lease.alive.clone());

        let outcome = tokio::time::timeout(self.config.ttl, body(lease)).await;
        if outcome.is_err() {
            warn!(ttl = ?self.config.ttl, "Critical section exceeded ttl, aborted");
        }

        renewal.stop(self.config.stop_grace).await;
        self.release(renewal.written()).await;

        outcome.map_err(|_| LockError::JobTimeout {
            name: self.name.clone(),
            ttl: self.config.ttl,
        })
    }

    async fn acquire(&self) -> Result<i64, LockError> {
        let started = Instant::now();
        let lease_ms = duration_ms(self.config.lease);

        loop {
            let expiration = now_ms().saturating_add(lease_ms);
            let value = expiration.to_string();
            if self
                .store
                .compare_and_set(&self.key, None, Some(&value))
                .await?
            {
                return Ok(expiration);
            }

            if let Some(current) = self.store.get(&self.key).await? {
                // Unparseable values count as expired.
                let held_until = current.parse::<i64>().unwrap_or(0);
                if held_until < now_ms() {
                    let expiration = now_ms().saturating_add(lease_ms);
                    let value = expiration.to_string();
                    if self
                        .store
                        .compare_and_set(&self.key, Some(&current), Some(&value))
                        .await?
                    {
                        info!(previous = held_until, "Claimed expired lock");
                        return Ok(expiration);
                    }
                }
            }

            let waited = started.elapsed();
            if waited >= self.config.acquire_timeout {
                return Err(LockError::QueueTimeout {
                    name: self.name.clone(),
                    waited,
                });
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn spawn_renewal(&self, expiration: i64, alive: Arc<AtomicBool>) -> Renewal {
        let owned = Arc::new(AtomicI64::new(expiration));
        let attempted = Arc::new(AtomicI64::new(expiration));
        let (stop_tx, stop_rx) = watch::channel(false);
        let renewer = Renewer {
            store: self.store.clone(),
            key: self.key.clone(),
            lease: self.config.lease,
            every: self.config.renew_interval(),
            owned: owned.clone(),
            attempted: attempted.clone(),
            alive,
        };
        let task = tokio::spawn(renewer.run(stop_rx));
        Renewal {
            stop_tx,
            task,
            owned,
            attempted,
        }
    }

    /// Delete the key only if it still holds a value this holder wrote. A
    /// key taken over by someone else is left alone.
    async fn release(&self, written: [i64; 2]) {
        let current = match self.store.get(&self.key).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                debug!("Lock already gone at release");
                return;
            }
            Err(e) => {
                warn!(error = %e, "Failed to release lock, lease will expire");
                return;
            }
        };
        if !written.iter().any(|v| v.to_string() == current) {
            info!("Lock no longer ours at release, leaving key");
            return;
        }

        match self
            .store
            .compare_and_set(&self.key, Some(&current), None)
            .await
        {
            Ok(true) => debug!("Lock released"),
            Ok(false) => info!("Lock no longer ours at release, leaving key"),
            Err(e) => warn!(error = %e, "Failed to release lock, lease will expire"),
        }
    }
}

/// Owner's side of the renewal task.
struct Renewal {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
    owned: Arc<AtomicI64>,
    attempted: Arc<AtomicI64>,
}

impl Renewal {
    /// The last confirmed value and the one a renewal may have written before
    /// it was aborted.
    fn written(&self) -> [i64; 2] {
        [
            self.owned.load(Ordering::Acquire),
            self.attempted.load(Ordering::Acquire),
        ]
    }

    async fn stop(&mut self, grace: Duration) {
        let _ = self.stop_tx.send(true);
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!("Renewal task did not stop in time, aborting");
            self.task.abort();
        }
    }
}

impl Drop for Renewal {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Renewer {
    store: Arc<dyn CoordinationStore>,
    key: String,
    lease: Duration,
    every: Duration,
    owned: Arc<AtomicI64>,
    attempted: Arc<AtomicI64>,
    alive: Arc<AtomicBool>,
}

impl Renewer {
    async fn run(self, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.every) => {}
                _ = stop.changed() => break,
            }

            match self.renew_once().await {
                Ok(true) => {}
                Ok(false) => {
                    info!(key = %self.key, "Lease lost, stopping renewal");
                    self.alive.store(false, Ordering::Release);
                    break;
                }
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Lease renewal failed, abandoning lease");
                    self.alive.store(false, Ordering::Release);
                    break;
                }
            }
        }
    }

    /// One renewal step. `Ok(false)` means the lease is gone.
    async fn renew_once(&self) -> Result<bool, StoreError> {
        let Some(current) = self.store.get(&self.key).await? else {
            return Ok(false);
        };
        let owned = self.owned.load(Ordering::Acquire);
        let stored = current.parse::<i64>().unwrap_or(i64::MAX);
        if stored > owned {
            return Ok(false);
        }

        let next = now_ms().saturating_add(duration_ms(self.lease));
        let value = next.to_string();
        self.attempted.store(next, Ordering::Release);
        if self
            .store
            .compare_and_set(&self.key, Some(&current), Some(&value))
            .await?
        {
            self.owned.store(next, Ordering::Release);
        }
        // A lost CAS race shows up as a newer value on the next tick.
        Ok(true)
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
