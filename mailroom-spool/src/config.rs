use std::{path::Path, sync::Arc};

use serde::Deserialize;

use crate::{
    backends::{FileBackingStore, MemoryBackingStore},
    r#trait::BackingStore,
};

/// Which backing store to run the spool on
///
/// ```ron
/// spool: (type: "File", path: "/var/spool/mailroom"),
/// spool: (type: "Memory", capacity: Some(1000)),
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SpoolConfig {
    File(FileBackingStore),
    Memory(MemoryConfig),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of mails to hold; unlimited when absent
    #[serde(default)]
    pub capacity: Option<usize>,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self::File(FileBackingStore::default())
    }
}

impl SpoolConfig {
    /// The spool directory, for file-backed spools
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(store) => Some(store.path()),
            Self::Memory(_) => None,
        }
    }

    /// Initialise the configured store
    ///
    /// # Errors
    /// If a file spool directory cannot be prepared
    pub fn into_backing_store(self) -> crate::Result<Arc<dyn BackingStore>> {
        match self {
            Self::File(store) => {
                store.init()?;
                Ok(Arc::new(store))
            }
            Self::Memory(config) => Ok(config.capacity.map_or_else(
                || Arc::new(MemoryBackingStore::new()) as Arc<dyn BackingStore>,
                |capacity| Arc::new(MemoryBackingStore::with_capacity(capacity)),
            )),
        }
    }
}
