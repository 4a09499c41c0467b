pub mod context;
pub mod controller;
pub mod spooler;

pub use context::SpoolContext;
pub use controller::Mailroom;
pub use spooler::{ScanSummary, Spooler, SpoolerConfig};
