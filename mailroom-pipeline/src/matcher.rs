use std::fmt::{self, Debug};

use mailroom_common::{Mail, MailAddress};

use crate::error::MatcherError;

/// Outcome of running a matcher against a mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// Nothing matched
    None,
    /// Every current recipient matched; the mail is processed in place
    All,
    /// The listed recipients matched
    Recipients(Vec<MailAddress>),
}

impl MatchResult {
    /// Build a result from a per-recipient predicate
    pub fn from_predicate(mail: &Mail, predicate: impl Fn(&MailAddress) -> bool) -> Self {
        let matched = mail
            .recipients()
            .iter()
            .filter(|recipient| predicate(recipient))
            .cloned()
            .collect::<Vec<_>>();

        Self::from_subset(mail, matched)
    }

    /// Classify `matched`, which must be drawn from the mail's recipients
    pub fn from_subset(mail: &Mail, matched: Vec<MailAddress>) -> Self {
        if matched.is_empty() {
            Self::None
        } else if matched.len() == mail.recipients().len() {
            Self::All
        } else {
            Self::Recipients(matched)
        }
    }

    /// A whole-mail decision: `All` when `matches`, otherwise `None`
    #[must_use]
    pub const fn when(matches: bool) -> Self {
        if matches { Self::All } else { Self::None }
    }

    /// The matched recipients, resolved against `mail`
    #[must_use]
    pub fn resolve(&self, mail: &Mail) -> Vec<MailAddress> {
        match self {
            Self::None => Vec::new(),
            Self::All => mail.recipients().to_vec(),
            Self::Recipients(recipients) => recipients
                .iter()
                .filter(|recipient| mail.recipients().contains(recipient))
                .cloned()
                .collect(),
        }
    }
}

/// Decides which of a mail's recipients a stage applies to
///
/// Matchers are shared read-only between every mail flowing through their
/// processor and must not keep per-mail state.
pub trait Matcher: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// If the matcher is unable to decide for this mail
    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError>;

    fn info(&self) -> String {
        self.name().to_string()
    }

    /// Called once when the owning router shuts down
    fn destroy(&self) {}
}

impl Debug for dyn Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self.info())
    }
}

/// Construction parameters for a matcher: `Name` or `Name=condition`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatcherConfig {
    name: String,
    condition: Option<String>,
}

impl MatcherConfig {
    pub fn new(name: impl Into<String>, condition: Option<String>) -> Self {
        Self {
            name: name.into(),
            condition,
        }
    }

    /// Split a declaration such as `RecipientIs=a@x.com,b@x.com`
    #[must_use]
    pub fn parse(declaration: &str) -> Self {
        match declaration.split_once('=') {
            Some((name, condition)) => Self::new(name.trim(), Some(condition.trim().to_string())),
            None => Self::new(declaration.trim(), None),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn condition(&self) -> Option<&str> {
        self.condition.as_deref()
    }

    /// The condition text, rejecting a missing or blank one
    ///
    /// # Errors
    /// If no condition was given
    pub fn required_condition(&self) -> Result<&str, MatcherError> {
        self.condition()
            .filter(|condition| !condition.is_empty())
            .ok_or_else(|| MatcherError::InvalidCondition {
                matcher: self.name.clone(),
                reason: "a condition is required".to_string(),
            })
    }

    /// How this matcher is shown in logs
    #[must_use]
    pub fn display_name(&self) -> String {
        self.condition.as_ref().map_or_else(
            || self.name.clone(),
            |condition| format!("{}={condition}", self.name),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn address(s: &str) -> MailAddress {
        MailAddress::parse(s).unwrap()
    }

    fn mail() -> Mail {
        Mail::builder("m")
            .recipients([address("a@x.com"), address("b@y.com")])
            .build()
    }

    #[test]
    fn test_parse_declaration() {
        let config = MatcherConfig::parse("RecipientIs=a@x.com,b@x.com");
        assert_eq!(config.name(), "RecipientIs");
        assert_eq!(config.condition(), Some("a@x.com,b@x.com"));
        assert_eq!(config.display_name(), "RecipientIs=a@x.com,b@x.com");

        let bare = MatcherConfig::parse("All");
        assert_eq!(bare.name(), "All");
        assert!(bare.condition().is_none());
        assert!(bare.required_condition().is_err());
    }

    #[test]
    fn test_from_predicate_classifies() {
        let mail = mail();
        assert_eq!(MatchResult::from_predicate(&mail, |_| true), MatchResult::All);
        assert_eq!(MatchResult::from_predicate(&mail, |_| false), MatchResult::None);
        assert_eq!(
            MatchResult::from_predicate(&mail, |r| r.domain == "y.com"),
            MatchResult::Recipients(vec![address("b@y.com")])
        );
    }

    #[test]
    fn test_resolve_drops_foreign_addresses() {
        let mail = mail();
        let result = MatchResult::Recipients(vec![address("b@y.com"), address("z@z.com")]);
        assert_eq!(result.resolve(&mail), vec![address("b@y.com")]);
        assert_eq!(MatchResult::All.resolve(&mail).len(), 2);
        assert!(MatchResult::None.resolve(&mail).is_empty());
    }
}
