//! At-least-once store for inbound mail
//!
//! Mails stay in the spool until the pipeline has finished every copy split
//! from them; a crash or a failed lineage leaves the entry in place to be
//! picked up again.

pub mod backends;
pub mod config;
pub mod error;
pub mod r#trait;
pub mod types;

pub use backends::{FileBackingStore, FileBackingStoreBuilder, MemoryBackingStore, TestBackingStore};
pub use config::{MemoryConfig, SpoolConfig};
pub use error::{Result, SerializationError, SpoolError, ValidationError};
pub use r#trait::BackingStore;
pub use types::SpooledMailId;
