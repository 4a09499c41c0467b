use std::fmt::{self, Display};

use mailroom_common::{Mail, MailAddress};

use crate::{
    error::MatcherError,
    matcher::{MatchResult, Matcher},
};

/// How a composite matcher combines its children
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Recipients every child matched
    And,
    /// Recipients any child matched
    Or,
    /// Recipients no child matched
    Not,
    /// Recipients an odd number of children matched
    Xor,
}

impl Operator {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "And" => Some(Self::And),
            "Or" => Some(Self::Or),
            "Not" => Some(Self::Not),
            "Xor" => Some(Self::Xor),
            _ => None,
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::And => "And",
            Self::Or => "Or",
            Self::Not => "Not",
            Self::Xor => "Xor",
        })
    }
}

/// A named matcher built from child matchers
pub struct CompositeMatcher {
    name: String,
    operator: Operator,
    children: Vec<Box<dyn Matcher>>,
}

impl fmt::Debug for CompositeMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeMatcher")
            .field("name", &self.name)
            .field("operator", &self.operator)
            .field("children", &self.children)
            .finish()
    }
}

impl CompositeMatcher {
    pub fn new(
        name: impl Into<String>,
        operator: Operator,
        children: Vec<Box<dyn Matcher>>,
    ) -> Self {
        Self {
            name: name.into(),
            operator,
            children,
        }
    }

    #[must_use]
    pub const fn operator(&self) -> Operator {
        self.operator
    }

    fn child_matches(&self, mail: &Mail) -> Result<Vec<Vec<MailAddress>>, MatcherError> {
        self.children
            .iter()
            .map(|child| child.match_mail(mail).map(|result| result.resolve(mail)))
            .collect()
    }
}

impl Matcher for CompositeMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        let matches = self.child_matches(mail)?;
        let matched_by = |recipient: &MailAddress| {
            matches
                .iter()
                .filter(|matched| matched.contains(recipient))
                .count()
        };

        let result = match self.operator {
            Operator::And => {
                MatchResult::from_predicate(mail, |r| !matches.is_empty() && matched_by(r) == matches.len())
            }
            Operator::Or => MatchResult::from_predicate(mail, |r| matched_by(r) > 0),
            Operator::Not => MatchResult::from_predicate(mail, |r| matched_by(r) == 0),
            Operator::Xor => MatchResult::from_predicate(mail, |r| matched_by(r) % 2 == 1),
        };

        Ok(result)
    }

    fn info(&self) -> String {
        let children = self
            .children
            .iter()
            .map(|child| child.info())
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}:{}({children})", self.name, self.operator)
    }

    fn destroy(&self) {
        for child in &self.children {
            child.destroy();
        }
    }
}

/// The complement of a matcher, used for `notmatch`
pub struct MatcherInverter {
    name: String,
    inner: Box<dyn Matcher>,
}

impl fmt::Debug for MatcherInverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MatcherInverter").field(&self.inner).finish()
    }
}

impl MatcherInverter {
    pub fn new(inner: Box<dyn Matcher>) -> Self {
        Self {
            name: format!("!{}", inner.name()),
            inner,
        }
    }
}

impl Matcher for MatcherInverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(match self.inner.match_mail(mail)? {
            MatchResult::None => MatchResult::All,
            MatchResult::All => MatchResult::None,
            result @ MatchResult::Recipients(_) => {
                let matched = result.resolve(mail);
                MatchResult::from_predicate(mail, |recipient| !matched.contains(recipient))
            }
        })
    }

    fn info(&self) -> String {
        format!("!{}", self.inner.info())
    }

    fn destroy(&self) {
        self.inner.destroy();
    }
}
