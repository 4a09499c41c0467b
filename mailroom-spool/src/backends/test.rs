use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use mailroom_common::Mail;
use tokio::sync::Notify;

use super::memory::MemoryBackingStore;
use crate::{SpoolError, r#trait::BackingStore, types::SpooledMailId};

/// Memory store that signals every change, for tests that wait on the spool
#[derive(Debug, Clone, Default)]
pub struct TestBackingStore {
    pub(crate) inner: MemoryBackingStore,
    notify: Arc<Notify>,
}

impl TestBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Wait until `condition` holds for the number of stored mails
    ///
    /// # Errors
    /// If `timeout` passes first
    pub async fn wait_until(
        &self,
        condition: impl Fn(usize) -> bool + Send,
        timeout: Duration,
    ) -> crate::Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                if condition(self.inner.len()) {
                    return;
                }
                notified.await;
            }
        })
        .await
        .map_err(|_| {
            SpoolError::Internal(format!(
                "Timed out after {timeout:?} with {} mails spooled",
                self.inner.len()
            ))
        })
    }

    /// # Errors
    /// If `timeout` passes before `expected` mails are stored
    pub async fn wait_for_count(&self, expected: usize, timeout: Duration) -> crate::Result<()> {
        self.wait_until(|len| len >= expected, timeout).await
    }

    /// # Errors
    /// If `timeout` passes before the store drains
    pub async fn wait_for_empty(&self, timeout: Duration) -> crate::Result<()> {
        self.wait_until(|len| len == 0, timeout).await
    }
}

#[async_trait]
impl BackingStore for TestBackingStore {
    async fn write(&self, mail: &Mail) -> crate::Result<SpooledMailId> {
        let id = self.inner.write(mail).await?;
        self.notify.notify_waiters();
        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMailId>> {
        self.inner.list().await
    }

    async fn read(&self, id: &SpooledMailId) -> crate::Result<Mail> {
        self.inner.read(id).await
    }

    async fn update(&self, id: &SpooledMailId, mail: &Mail) -> crate::Result<()> {
        self.inner.update(id, mail).await?;
        self.notify.notify_waiters();
        Ok(())
    }

    async fn delete(&self, id: &SpooledMailId) -> crate::Result<()> {
        self.inner.delete(id).await?;
        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_for_count() {
        let store = TestBackingStore::new();
        let writer = store.clone();

        let handle = tokio::spawn(async move {
            for i in 0..3 {
                writer.write(&Mail::builder(format!("m{i}")).build()).await.unwrap();
            }
        });

        store.wait_for_count(3, Duration::from_secs(5)).await.unwrap();
        handle.await.unwrap();
        assert_eq!(store.len(), 3);

        assert!(
            store
                .wait_for_empty(Duration::from_millis(10))
                .await
                .is_err()
        );
    }
}
