//! Matchers shipped with the pipeline

mod composite;
mod standard;

pub use composite::{CompositeMatcher, MatcherInverter, Operator};
pub use standard::{
    All, HasAttribute, HasHeader, HostIs, RecipientIs, SenderIs, SenderIsNull, SizeGreaterThan,
};
