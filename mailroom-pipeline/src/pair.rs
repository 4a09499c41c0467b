use std::fmt::{self, Display};

use mailroom_common::state;

use crate::{mailet::Mailet, matcher::Matcher};

/// What to do when a matcher fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatcherPolicy {
    /// Treat the failure as an empty match
    NoMatch,
    /// Treat the failure as a full match
    MatchAll,
    /// Abort processing and return the error to the caller
    Propagate,
    /// Move the mail to the named state
    State(String),
}

impl Default for MatcherPolicy {
    fn default() -> Self {
        Self::State(state::ERROR.to_string())
    }
}

impl MatcherPolicy {
    #[must_use]
    pub fn parse(policy: Option<&str>) -> Self {
        match policy.map(str::trim) {
            None | Some("") => Self::default(),
            Some(value) if value.eq_ignore_ascii_case("nomatch") => Self::NoMatch,
            Some(value) if value.eq_ignore_ascii_case("matchall") => Self::MatchAll,
            Some(value) if value.eq_ignore_ascii_case("propagate") => Self::Propagate,
            Some(value) => Self::State(value.to_string()),
        }
    }
}

impl Display for MatcherPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMatch => f.write_str("nomatch"),
            Self::MatchAll => f.write_str("matchall"),
            Self::Propagate => f.write_str("propagate"),
            Self::State(state) => f.write_str(state),
        }
    }
}

/// What to do when a mailet fails
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailetPolicy {
    /// Carry on as if the mailet succeeded
    Ignore,
    /// Abort processing and return the error to the caller
    Propagate,
    /// Move the mail to the named state
    State(String),
}

impl Default for MailetPolicy {
    fn default() -> Self {
        Self::State(state::ERROR.to_string())
    }
}

impl MailetPolicy {
    #[must_use]
    pub fn parse(policy: Option<&str>) -> Self {
        match policy.map(str::trim) {
            None | Some("") => Self::default(),
            Some(value) if value.eq_ignore_ascii_case("ignore") => Self::Ignore,
            Some(value) if value.eq_ignore_ascii_case("propagate") => Self::Propagate,
            Some(value) => Self::State(value.to_string()),
        }
    }
}

impl Display for MailetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ignore => f.write_str("ignore"),
            Self::Propagate => f.write_str("propagate"),
            Self::State(state) => f.write_str(state),
        }
    }
}

/// One stage of a processor: a matcher, the mailet it guards, and the
/// failure policy of each
#[derive(Debug)]
pub struct MatcherMailetPair {
    matcher: Box<dyn Matcher>,
    mailet: Box<dyn Mailet>,
    on_matcher_exception: MatcherPolicy,
    on_mailet_exception: MailetPolicy,
}

impl MatcherMailetPair {
    pub fn new(matcher: Box<dyn Matcher>, mailet: Box<dyn Mailet>) -> Self {
        Self {
            matcher,
            mailet,
            on_matcher_exception: MatcherPolicy::default(),
            on_mailet_exception: MailetPolicy::default(),
        }
    }

    #[must_use]
    pub fn on_matcher_exception(mut self, policy: MatcherPolicy) -> Self {
        self.on_matcher_exception = policy;
        self
    }

    #[must_use]
    pub fn on_mailet_exception(mut self, policy: MailetPolicy) -> Self {
        self.on_mailet_exception = policy;
        self
    }

    #[must_use]
    pub fn matcher(&self) -> &dyn Matcher {
        self.matcher.as_ref()
    }

    #[must_use]
    pub fn mailet(&self) -> &dyn Mailet {
        self.mailet.as_ref()
    }

    #[must_use]
    pub const fn matcher_policy(&self) -> &MatcherPolicy {
        &self.on_matcher_exception
    }

    #[must_use]
    pub const fn mailet_policy(&self) -> &MailetPolicy {
        &self.on_mailet_exception
    }

    pub(crate) fn destroy(&self) {
        self.matcher.destroy();
        self.mailet.destroy();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_matcher_policy_parse() {
        assert_eq!(MatcherPolicy::parse(None), MatcherPolicy::State("error".to_string()));
        assert_eq!(MatcherPolicy::parse(Some("NoMatch")), MatcherPolicy::NoMatch);
        assert_eq!(MatcherPolicy::parse(Some("matchall")), MatcherPolicy::MatchAll);
        assert_eq!(MatcherPolicy::parse(Some("propagate")), MatcherPolicy::Propagate);
        assert_eq!(
            MatcherPolicy::parse(Some("quarantine")),
            MatcherPolicy::State("quarantine".to_string())
        );
    }

    #[test]
    fn test_mailet_policy_parse() {
        assert_eq!(MailetPolicy::parse(Some(" ")), MailetPolicy::default());
        assert_eq!(MailetPolicy::parse(Some("IGNORE")), MailetPolicy::Ignore);
        assert_eq!(MailetPolicy::parse(Some("propagate")), MailetPolicy::Propagate);
        assert_eq!(MailetPolicy::parse(Some("spam")).to_string(), "spam");
    }
}
