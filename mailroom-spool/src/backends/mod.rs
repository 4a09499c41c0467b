//! Backing store implementations
//!
//! - `file`: one `.eml` body and one `.bin` envelope per mail, for production
//! - `memory`: a map behind a lock, for development and tests
//! - `test`: the memory store plus notifications for test synchronisation

pub mod file;
pub mod memory;
pub mod test;

pub use file::{FileBackingStore, FileBackingStoreBuilder};
pub use memory::MemoryBackingStore;
pub use test::TestBackingStore;
