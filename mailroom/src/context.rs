use std::sync::Arc;

use mailroom_common::{Mail, internal, state};
use mailroom_pipeline::{MailetContext, MailetError};
use mailroom_spool::BackingStore;
use tokio::{runtime::Handle, sync::Notify};

/// Mailet context backed by the spool
///
/// Mails sent by mailets are written to the spool before `send_mail`
/// returns, so they survive the lineage that produced them. The spooler is
/// woken afterwards to pick them up.
///
/// Mailets run on tokio's blocking pool, where blocking on the runtime is
/// allowed; calling `send_mail` from inside an async task panics.
#[derive(Debug, Clone)]
pub struct SpoolContext {
    store: Arc<dyn BackingStore>,
    wake: Arc<Notify>,
    handle: Handle,
}

impl SpoolContext {
    /// # Errors
    /// If called outside of a tokio runtime
    pub fn new(store: Arc<dyn BackingStore>, wake: Arc<Notify>) -> anyhow::Result<Self> {
        Ok(Self {
            store,
            wake,
            handle: Handle::try_current()?,
        })
    }
}

impl MailetContext for SpoolContext {
    fn send_mail(&self, mut mail: Mail) -> Result<(), MailetError> {
        if mail.state() != state::ROOT {
            mail.set_state(state::ROOT);
        }

        let id = self
            .handle
            .block_on(self.store.write(&mail))
            .map_err(|e| MailetError::Send(format!("unable to spool {}: {e}", mail.name())))?;

        internal!(level = DEBUG, "Spooled {} as {id}", mail.name());
        self.wake.notify_one();

        Ok(())
    }
}
