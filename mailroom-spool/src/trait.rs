use async_trait::async_trait;
use mailroom_common::Mail;

use crate::{Result, types::SpooledMailId};

/// Storage behind the spool
///
/// Implementations must be safe to share between the spooler's workers.
#[async_trait]
pub trait BackingStore: Send + Sync + std::fmt::Debug {
    /// Store a mail, returning its new id
    async fn write(&self, mail: &Mail) -> Result<SpooledMailId>;

    /// Every stored id, oldest first
    async fn list(&self) -> Result<Vec<SpooledMailId>>;

    async fn read(&self, id: &SpooledMailId) -> Result<Mail>;

    /// Replace a stored mail
    async fn update(&self, id: &SpooledMailId, mail: &Mail) -> Result<()>;

    async fn delete(&self, id: &SpooledMailId) -> Result<()>;
}
