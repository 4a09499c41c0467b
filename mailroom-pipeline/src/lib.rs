//! Matcher/mailet routing engine
//!
//! A [`CompositeProcessor`] routes each mail to the [`StateProcessor`] bound
//! to its state. Processors run ordered [`MatcherMailetPair`]s, splitting a
//! mail whenever a matcher selects only some of its recipients, and hand
//! mails back to the router whenever a mailet moves them to another state.
//! [`ProcessingReference`] tracks all copies split from one inbound mail.

pub mod config;
pub mod error;
pub mod listener;
pub mod mailet;
pub mod mailets;
pub mod matcher;
pub mod matchers;
pub mod pair;
pub mod processor;
pub mod reference;
pub mod registry;
pub mod router;

pub use config::{CompositeMatcherConfig, PairConfig, PipelineConfig, ProcessorConfig};
pub use error::{ConfigError, MailetError, MatcherError, PipelineError};
pub use listener::{LoggingListener, ProcessorListener, StatisticsListener};
pub use mailet::{DetachedContext, Mailet, MailetConfig, MailetContext};
pub use matcher::{MatchResult, Matcher, MatcherConfig};
pub use pair::{MailetPolicy, MatcherMailetPair, MatcherPolicy};
pub use processor::{MailProcessor, StateProcessor};
pub use reference::{Completion, Outcome, ProcessingReference, ReleaseHook};
pub use registry::Registry;
pub use router::CompositeProcessor;
