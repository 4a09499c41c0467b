use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use mailroom_common::{Mail, Signal, internal};
use mailroom_pipeline::{CompositeProcessor, Outcome, ProcessingReference};
use mailroom_spool::{BackingStore, SpooledMailId};
use mailroom_tracing::traced;
use serde::Deserialize;
use tokio::{
    sync::{Notify, Semaphore, broadcast},
    task::JoinSet,
};

use crate::context::SpoolContext;

const fn default_scan_interval() -> u64 {
    5
}

const fn default_max_concurrent() -> usize {
    8
}

const fn default_max_attempts() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpoolerConfig {
    /// How often to rescan the spool when nothing wakes the spooler (in seconds)
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,

    /// How many mails may be in the pipeline at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// How many abandoned runs a spooled mail gets before it is left alone
    ///
    /// Attempts are counted per process; a restart gives every mail a fresh
    /// set.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SpoolerConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// What a single pass over the spool did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Mails whose every copy completed, now removed from the spool
    pub completed: usize,
    /// Mails that were abandoned or could not be read, kept for a retry
    pub failed: usize,
    /// Mails skipped because they ran out of attempts
    pub exhausted: usize,
}

/// Feeds spooled mails through the router
///
/// A mail stays in the spool until its whole lineage completes. Abandoned
/// lineages keep their entry and are retried on a later pass, up to
/// `max_attempts` times.
#[derive(Debug)]
pub struct Spooler {
    config: SpoolerConfig,
    store: Arc<dyn BackingStore>,
    wake: Arc<Notify>,
    attempts: Arc<DashMap<SpooledMailId, u32>>,
    permits: Arc<Semaphore>,
}

impl Spooler {
    #[must_use]
    pub fn new(config: SpoolerConfig, store: Arc<dyn BackingStore>) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Self {
            config,
            store,
            wake: Arc::new(Notify::new()),
            attempts: Arc::new(DashMap::new()),
            permits,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SpoolerConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    /// A mailet context that spools sent mails and wakes this spooler
    ///
    /// # Errors
    /// If called outside of a tokio runtime
    pub fn context(&self) -> anyhow::Result<SpoolContext> {
        SpoolContext::new(Arc::clone(&self.store), Arc::clone(&self.wake))
    }

    /// Number of abandoned runs recorded for `id`
    #[must_use]
    pub fn attempts(&self, id: &SpooledMailId) -> u32 {
        self.attempts.get(id).map_or(0, |attempts| *attempts)
    }

    /// Spool a new inbound mail and wake the scanner
    ///
    /// # Errors
    /// If the mail could not be written to the spool
    pub async fn submit(&self, mail: Mail) -> anyhow::Result<SpooledMailId> {
        let id = self.store.write(&mail).await?;
        internal!(level = DEBUG, "Accepted {} as {id}", mail.name());
        self.wake.notify_one();

        Ok(id)
    }

    /// Run every eligible spooled mail through `router` once
    ///
    /// Returns after every mail picked up in this pass has finished.
    ///
    /// # Errors
    /// If the spool cannot be listed
    #[traced(instrument(level = tracing::Level::DEBUG, skip_all), timing(precision = "ms"))]
    pub async fn process_pending(
        &self,
        router: &Arc<CompositeProcessor>,
    ) -> anyhow::Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut workers: JoinSet<(SpooledMailId, anyhow::Result<Outcome>)> = JoinSet::new();

        for id in self.store.list().await? {
            if self.attempts(&id) >= self.config.max_attempts {
                summary.exhausted += 1;
                continue;
            }

            let permit = Arc::clone(&self.permits).acquire_owned().await?;
            let store = Arc::clone(&self.store);
            let router = Arc::clone(router);

            workers.spawn(async move {
                let outcome = process_one(store, router, &id).await;
                drop(permit);
                (id, outcome)
            });
        }

        while let Some(joined) = workers.join_next().await {
            let (id, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    tracing::error!(target: "mailroom::spooler", error = %e, "Spool worker failed");
                    summary.failed += 1;
                    continue;
                }
            };

            match outcome {
                Ok(Outcome::Completed) => {
                    self.attempts.remove(&id);
                    summary.completed += 1;
                }
                Ok(Outcome::Abandoned) => {
                    self.record_failure(&id, "lineage abandoned");
                    summary.failed += 1;
                }
                Err(e) => {
                    self.record_failure(&id, &e.to_string());
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    fn record_failure(&self, id: &SpooledMailId, reason: &str) {
        let mut attempts = self.attempts.entry(id.clone()).or_insert(0);
        *attempts += 1;

        if *attempts >= self.config.max_attempts {
            tracing::error!(
                target: "mailroom::spooler",
                %id,
                attempts = *attempts,
                reason,
                "Giving up on spooled mail, leaving it in the spool"
            );
        } else {
            tracing::warn!(
                target: "mailroom::spooler",
                %id,
                attempts = *attempts,
                reason,
                "Spooled mail failed, will retry"
            );
        }
    }

    /// Scan the spool until shutdown
    ///
    /// A pass runs every `scan_interval_secs`, and immediately whenever a
    /// mail is submitted or sent by a mailet. A pass in progress finishes
    /// before the shutdown signal is seen.
    ///
    /// # Errors
    /// This currently only returns `Ok`; failed passes are logged and retried
    #[traced(instrument(level = tracing::Level::TRACE, skip_all))]
    pub async fn serve(
        &self,
        router: Arc<CompositeProcessor>,
        mut shutdown: broadcast::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        internal!("Spooler starting");

        let mut timer =
            tokio::time::interval(Duration::from_secs(self.config.scan_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = timer.tick() => self.pass(&router).await,
                () = self.wake.notified() => self.pass(&router).await,
                sig = shutdown.recv() => {
                    match sig {
                        Ok(Signal::Shutdown | Signal::Finalised) | Err(broadcast::error::RecvError::Closed) => {
                            internal!(level = INFO, "Spooler received shutdown signal");
                            break;
                        }
                        Err(e) => {
                            tracing::debug!(target: "mailroom::spooler", "Shutdown channel: {e}");
                        }
                    }
                }
            }
        }

        internal!("Spooler shutdown complete");

        Ok(())
    }

    async fn pass(&self, router: &Arc<CompositeProcessor>) {
        match self.process_pending(router).await {
            Ok(summary) if summary == ScanSummary::default() => {
                tracing::trace!(target: "mailroom::spooler", "Spool is empty");
            }
            Ok(summary) => {
                tracing::info!(
                    target: "mailroom::spooler",
                    completed = summary.completed,
                    failed = summary.failed,
                    exhausted = summary.exhausted,
                    "Processed spool"
                );
            }
            Err(e) => {
                tracing::error!(target: "mailroom::spooler", error = %e, "Error scanning spool");
            }
        }
    }
}

/// Route one spooled mail and remove it once its lineage completed
async fn process_one(
    store: Arc<dyn BackingStore>,
    router: Arc<CompositeProcessor>,
    id: &SpooledMailId,
) -> anyhow::Result<Outcome> {
    let mail = store.read(id).await?;
    let name = mail.name().to_string();

    let reference = ProcessingReference::new(mail);
    let completion = reference.completion();

    let routed = tokio::task::spawn_blocking(move || router.route(reference)).await?;
    if let Err(error) = routed {
        tracing::warn!(target: "mailroom::spooler", %id, mail = %name, %error, "Processing failed");
    }

    let outcome = completion.wait().await;
    if outcome == Outcome::Completed {
        store.delete(id).await?;
        tracing::debug!(target: "mailroom::spooler", %id, mail = %name, "Processing complete");
    }

    Ok(outcome)
}
