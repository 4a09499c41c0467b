use std::{
    sync::{Arc, LazyLock},
    time::Duration,
};

use mailroom_common::{Signal, internal, logging};
use mailroom_pipeline::{
    CompositeProcessor, LoggingListener, MailetContext, PipelineConfig, ProcessorListener,
    Registry,
};
use mailroom_spool::SpoolConfig;
use mailroom_tracing::traced;
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::spooler::{Spooler, SpoolerConfig};

const fn default_slow_stage_threshold() -> u64 {
    100
}

#[derive(Debug, Deserialize)]
pub struct Mailroom {
    #[serde(default)]
    pipeline: PipelineConfig,
    #[serde(default)]
    spool: SpoolConfig,
    #[serde(default)]
    spooler: SpoolerConfig,
    /// Matcher or mailet calls slower than this are logged (in milliseconds)
    #[serde(default = "default_slow_stage_threshold")]
    slow_stage_threshold_ms: u64,
}

impl Default for Mailroom {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            spool: SpoolConfig::default(),
            spooler: SpoolerConfig::default(),
            slow_stage_threshold_ms: default_slow_stage_threshold(),
        }
    }
}

pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> = LazyLock::new(|| {
    let (sender, _receiver) = broadcast::channel(64);
    sender
});

/// Wait for SIGINT or SIGTERM, then tell every service to stop
///
/// Returns early only if a second interrupt arrives while the services are
/// still finishing up.
#[traced(instrument(level = tracing::Level::TRACE))]
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            internal!(level = INFO, "Interrupted, finishing the current spool pass (interrupt again to exit now)");
        }
        _ = terminate.recv() => {
            internal!(level = INFO, "Terminated, finishing the current spool pass");
        }
    };

    SHUTDOWN_BROADCAST
        .send(Signal::Shutdown)
        .map_err(|e| anyhow::anyhow!("Unable to broadcast shutdown: {e}"))?;

    tokio::signal::ctrl_c().await?;
    internal!(level = WARN, "Interrupted again, exiting without waiting");

    Ok(())
}

impl Mailroom {
    #[must_use]
    pub const fn pipeline(&self) -> &PipelineConfig {
        &self.pipeline
    }

    #[must_use]
    pub const fn spool(&self) -> &SpoolConfig {
        &self.spool
    }

    #[must_use]
    pub const fn spooler(&self) -> &SpoolerConfig {
        &self.spooler
    }

    /// Open the spool and build the router on top of it
    ///
    /// Must be called from within a tokio runtime, which mailets use to
    /// reach the spool.
    ///
    /// # Errors
    /// If the spool cannot be opened or the pipeline is misconfigured
    pub fn init(self, registry: &Registry) -> anyhow::Result<(Spooler, Arc<CompositeProcessor>)> {
        let store = self.spool.into_backing_store()?;
        let spooler = Spooler::new(self.spooler, store);

        let context: Arc<dyn MailetContext> = Arc::new(spooler.context()?);
        let router = Arc::new(self.pipeline.build(registry, &context)?);

        let listener: Arc<dyn ProcessorListener> = Arc::new(LoggingListener::new(
            Duration::from_millis(self.slow_stage_threshold_ms),
        ));
        router.add_listener(&listener);

        Ok((spooler, router))
    }

    /// Run this controller, and everything it controls
    ///
    /// # Errors
    ///
    /// This function will return an error if the spool or the pipeline fail
    /// to initialise.
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, err), timing(precision = "s"))]
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let (spooler, router) = self.init(&Registry::with_defaults())?;

        internal!(
            level = INFO,
            "Controller running with processors {:?}",
            router.states()
        );

        let ret = tokio::select! {
            r = spooler.serve(Arc::clone(&router), SHUTDOWN_BROADCAST.subscribe()) => {
                r
            }
            r = shutdown() => {
                r
            }
        };

        internal!("Shutting down...");
        router.destroy();

        ret
    }
}
