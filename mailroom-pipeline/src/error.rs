use mailroom_common::{AddressError, MessageError};
use thiserror::Error;

/// Failure raised by a matcher while evaluating a mail
#[derive(Debug, Error)]
pub enum MatcherError {
    #[error("Invalid condition for {matcher}: {reason}")]
    InvalidCondition { matcher: String, reason: String },

    #[error("Matcher returned invalid recipient {recipient}: {source}")]
    InvalidRecipient {
        recipient: String,
        #[source]
        source: AddressError,
    },

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure raised by a mailet while servicing a mail
#[derive(Debug, Error)]
pub enum MailetError {
    #[error("Missing required parameter '{parameter}' for mailet {mailet}")]
    MissingParameter { mailet: String, parameter: String },

    #[error("Invalid parameter '{parameter}' for mailet {mailet}: {reason}")]
    InvalidParameter {
        mailet: String,
        parameter: String,
        reason: String,
    },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("Unable to send mail: {0}")]
    Send(String),

    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Problems found while building processors and the router
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Processor is missing its state")]
    MissingState,

    #[error("State '{0}' is reserved and cannot have a processor")]
    ReservedState(String),

    #[error("State '{0}' is configured more than once")]
    DuplicateState(String),

    #[error("No processor configured for the '{0}' state")]
    MissingRootProcessor(String),

    #[error("Mailet {mailet} in state '{state}' sets both match and notmatch")]
    MatchAndNotMatch { state: String, mailet: String },

    #[error("Composite matcher '{name}' is declared more than once in state '{state}'")]
    DuplicateCompositeMatcher { state: String, name: String },

    #[error("Unknown matcher '{0}'")]
    UnknownMatcher(String),

    #[error("Unknown mailet '{0}'")]
    UnknownMailet(String),

    #[error("Matcher '{0}' expects child matchers")]
    MissingChildren(String),

    #[error("Matcher '{0}' does not take child matchers")]
    NotComposite(String),

    #[error("Unable to create matcher {name}: {source}")]
    Matcher {
        name: String,
        #[source]
        source: MatcherError,
    },

    #[error("Unable to create mailet {name}: {source}")]
    Mailet {
        name: String,
        #[source]
        source: MailetError,
    },
}

/// Failures that escape a processor and stop the lineage
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No processor for state '{state}' (mail {mail})")]
    UnknownState { state: String, mail: String },

    #[error("Matcher {matcher} failed on mail {mail}: {source}")]
    Matcher {
        matcher: String,
        mail: String,
        #[source]
        source: MatcherError,
    },

    #[error("Mailet {mailet} failed on mail {mail}: {source}")]
    Mailet {
        mailet: String,
        mail: String,
        #[source]
        source: MailetError,
    },
}

impl PipelineError {
    /// Whether the failure comes from the router table rather than a stage
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::UnknownState { .. })
    }

    /// Name of the mail that was being processed
    #[must_use]
    pub fn mail(&self) -> &str {
        match self {
            Self::UnknownState { mail, .. }
            | Self::Matcher { mail, .. }
            | Self::Mailet { mail, .. } => mail,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_classification() {
        let unknown = PipelineError::UnknownState {
            state: "transport".to_string(),
            mail: "m1".to_string(),
        };
        assert!(unknown.is_configuration());
        assert_eq!(unknown.mail(), "m1");
        assert_eq!(
            unknown.to_string(),
            "No processor for state 'transport' (mail m1)"
        );

        let failed = PipelineError::Mailet {
            mailet: "Forward".to_string(),
            mail: "m2".to_string(),
            source: MailetError::Failed("boom".to_string()),
        };
        assert!(!failed.is_configuration());
        assert_eq!(failed.to_string(), "Mailet Forward failed on mail m2: boom");
    }
}
