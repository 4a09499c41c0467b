//! Mailets shipped with the pipeline

mod standard;

pub use standard::{
    AddHeader, Forward, LogMessage, Null, RemoveMailAttribute, SetMailAttribute, ToProcessor,
};
