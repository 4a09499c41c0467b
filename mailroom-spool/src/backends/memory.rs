use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use mailroom_common::Mail;

use crate::{SpoolError, r#trait::BackingStore, types::SpooledMailId};

/// In-memory backing store
///
/// Mails live in a `HashMap` behind an `RwLock`. An optional capacity makes
/// writes fail once that many mails are stored.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackingStore {
    pub(crate) mails: Arc<RwLock<HashMap<SpooledMailId, Mail>>>,
    capacity: Option<usize>,
}

impl MemoryBackingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            mails: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Number of stored mails, recovering the data from a poisoned lock
    #[must_use]
    pub fn len(&self) -> usize {
        self.mails
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> Option<usize> {
        self.capacity
    }
}

#[async_trait]
impl BackingStore for MemoryBackingStore {
    async fn write(&self, mail: &Mail) -> crate::Result<SpooledMailId> {
        let id = SpooledMailId::generate();
        let mut mails = self.mails.write()?;

        if let Some(capacity) = self.capacity
            && mails.len() >= capacity
        {
            return Err(SpoolError::CapacityExceeded {
                len: mails.len(),
                capacity,
            });
        }

        mails.insert(id.clone(), mail.clone());
        Ok(id)
    }

    async fn list(&self) -> crate::Result<Vec<SpooledMailId>> {
        let mut ids = self.mails.read()?.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }

    async fn read(&self, id: &SpooledMailId) -> crate::Result<Mail> {
        self.mails
            .read()?
            .get(id)
            .cloned()
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }

    async fn update(&self, id: &SpooledMailId, mail: &Mail) -> crate::Result<()> {
        match self.mails.write()?.get_mut(id) {
            Some(stored) => {
                *stored = mail.clone();
                Ok(())
            }
            None => Err(SpoolError::NotFound(id.clone())),
        }
    }

    async fn delete(&self, id: &SpooledMailId) -> crate::Result<()> {
        self.mails
            .write()?
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SpoolError::NotFound(id.clone()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashSet;

    use mailroom_common::MailAddress;
    use pretty_assertions::assert_eq;

    use super::*;

    fn mail(name: &str) -> Mail {
        Mail::builder(name)
            .recipients([MailAddress::parse("a@x.com").unwrap()])
            .message("Subject: memory\r\n\r\nbody\r\n")
            .build()
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let store = MemoryBackingStore::new();
        let id = store.write(&mail("m1")).await.unwrap();

        assert_eq!(store.list().await.unwrap(), vec![id.clone()]);
        assert_eq!(store.read(&id).await.unwrap().name(), "m1");

        let mut changed = mail("m1");
        changed.set_state("transport");
        store.update(&id, &changed).await.unwrap();
        assert_eq!(store.read(&id).await.unwrap().state(), "transport");

        store.delete(&id).await.unwrap();
        assert!(store.is_empty());
        assert!(store.read(&id).await.unwrap_err().is_not_found());
        assert!(store.delete(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let store = MemoryBackingStore::with_capacity(2);
        store.write(&mail("1")).await.unwrap();
        store.write(&mail("2")).await.unwrap();

        let error = store.write(&mail("3")).await.unwrap_err();
        assert!(matches!(error, SpoolError::CapacityExceeded { len: 2, capacity: 2 }));

        let ids = store.list().await.unwrap();
        store.delete(&ids[0]).await.unwrap();
        assert!(store.write(&mail("3")).await.is_ok());
        assert_eq!(store.capacity(), Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_writes_get_unique_ids() {
        let store = MemoryBackingStore::new();

        let handles = (0..100)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.write(&mail(&format!("m{i}"))).await })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let ids = store.list().await.unwrap();
        assert_eq!(ids.len(), 100);
        assert_eq!(ids.iter().collect::<HashSet<_>>().len(), 100);

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }
}
