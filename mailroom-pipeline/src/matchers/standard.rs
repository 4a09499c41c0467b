use mailroom_common::{Mail, MailAddress, address};

use crate::{
    error::MatcherError,
    matcher::{MatchResult, Matcher, MatcherConfig},
};

fn invalid(config: &MatcherConfig, reason: impl Into<String>) -> MatcherError {
    MatcherError::InvalidCondition {
        matcher: config.name().to_string(),
        reason: reason.into(),
    }
}

fn addresses(config: &MatcherConfig) -> Result<Vec<MailAddress>, MatcherError> {
    let list = address::parse_list(config.required_condition()?)
        .map_err(|err| invalid(config, err.to_string()))?;

    if list.is_empty() {
        return Err(invalid(config, "at least one address is required"));
    }

    Ok(list)
}

/// Matches every recipient
#[derive(Debug)]
pub struct All {
    name: String,
}

impl Default for All {
    fn default() -> Self {
        Self {
            name: "All".to_string(),
        }
    }
}

impl All {
    #[must_use]
    pub fn new(config: &MatcherConfig) -> Self {
        Self {
            name: config.display_name(),
        }
    }
}

impl Matcher for All {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, _mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::All)
    }
}

/// `RecipientIs=a@x.com,b@y.com`: recipients in the list
#[derive(Debug)]
pub struct RecipientIs {
    name: String,
    addresses: Vec<MailAddress>,
}

impl RecipientIs {
    /// # Errors
    /// If the condition is not a list of addresses
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        Ok(Self {
            name: config.display_name(),
            addresses: addresses(config)?,
        })
    }
}

impl Matcher for RecipientIs {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::from_predicate(mail, |recipient| {
            self.addresses.contains(recipient)
        }))
    }
}

/// `SenderIs=a@x.com`: the whole mail, when the sender is listed
#[derive(Debug)]
pub struct SenderIs {
    name: String,
    senders: Vec<MailAddress>,
}

impl SenderIs {
    /// # Errors
    /// If the condition is not a list of addresses
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        Ok(Self {
            name: config.display_name(),
            senders: addresses(config)?,
        })
    }
}

impl Matcher for SenderIs {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::when(
            mail.sender()
                .is_some_and(|sender| self.senders.contains(sender)),
        ))
    }
}

/// The whole mail, when it has a null reverse path (bounces)
#[derive(Debug)]
pub struct SenderIsNull {
    name: String,
}

impl SenderIsNull {
    #[must_use]
    pub fn new(config: &MatcherConfig) -> Self {
        Self {
            name: config.display_name(),
        }
    }
}

impl Matcher for SenderIsNull {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::when(mail.sender().is_none()))
    }
}

/// `HostIs=example.com,example.org`: recipients at one of the domains
#[derive(Debug)]
pub struct HostIs {
    name: String,
    hosts: Vec<String>,
}

impl HostIs {
    /// # Errors
    /// If no domain is given
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        let hosts = config
            .required_condition()?
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();

        if hosts.is_empty() {
            return Err(invalid(config, "at least one domain is required"));
        }

        Ok(Self {
            name: config.display_name(),
            hosts,
        })
    }
}

impl Matcher for HostIs {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::from_predicate(mail, |recipient| {
            self.hosts.contains(&recipient.host())
        }))
    }
}

/// `HasAttribute=name` or `HasAttribute=name,value`
#[derive(Debug)]
pub struct HasAttribute {
    name: String,
    attribute: String,
    value: Option<String>,
}

impl HasAttribute {
    /// # Errors
    /// If no attribute name is given
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        let condition = config.required_condition()?;
        let (attribute, value) = match condition.split_once(',') {
            Some((attribute, value)) => (attribute.trim(), Some(value.trim().to_string())),
            None => (condition.trim(), None),
        };

        if attribute.is_empty() {
            return Err(invalid(config, "attribute name is empty"));
        }

        Ok(Self {
            name: config.display_name(),
            attribute: attribute.to_string(),
            value,
        })
    }
}

impl Matcher for HasAttribute {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        let found = mail.attribute(&self.attribute).is_some_and(|value| {
            self.value
                .as_ref()
                .is_none_or(|expected| value.to_string() == *expected)
        });

        Ok(MatchResult::when(found))
    }
}

/// `HasHeader=X-Spam-Flag` or `HasHeader=X-Spam-Flag=YES+X-Other`
///
/// Every `+` separated condition must hold. Values compare case-insensitively.
#[derive(Debug)]
pub struct HasHeader {
    name: String,
    conditions: Vec<(String, Option<String>)>,
}

impl HasHeader {
    /// # Errors
    /// If no header name is given
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        let conditions = config
            .required_condition()?
            .split('+')
            .map(|condition| match condition.split_once('=') {
                Some((header, value)) => (header.trim().to_string(), Some(value.trim().to_string())),
                None => (condition.trim().to_string(), None),
            })
            .collect::<Vec<_>>();

        if conditions.iter().any(|(header, _)| header.is_empty()) {
            return Err(invalid(config, "header name is empty"));
        }

        Ok(Self {
            name: config.display_name(),
            conditions,
        })
    }
}

impl Matcher for HasHeader {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        let Some(message) = mail.message() else {
            return Ok(MatchResult::None);
        };

        for (header, expected) in &self.conditions {
            let found = match (message.header(header)?, expected) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(value), Some(expected)) => value.trim().eq_ignore_ascii_case(expected),
            };

            if !found {
                return Ok(MatchResult::None);
            }
        }

        Ok(MatchResult::All)
    }
}

/// `SizeGreaterThan=1m`: the whole mail, when its message is larger
///
/// Sizes are bytes, or kilobytes/megabytes with a `k` or `m` suffix.
#[derive(Debug)]
pub struct SizeGreaterThan {
    name: String,
    limit: usize,
}

impl SizeGreaterThan {
    /// # Errors
    /// If the condition is not a size
    pub fn new(config: &MatcherConfig) -> Result<Self, MatcherError> {
        let condition = config.required_condition()?.trim().to_ascii_lowercase();
        let (digits, multiplier) = if let Some(digits) = condition.strip_suffix('k') {
            (digits, 1024)
        } else if let Some(digits) = condition.strip_suffix('m') {
            (digits, 1024 * 1024)
        } else {
            (condition.as_str(), 1)
        };

        let limit = digits
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|size| size.checked_mul(multiplier))
            .filter(|size| *size > 0)
            .ok_or_else(|| invalid(config, format!("'{condition}' is not a positive size")))?;

        Ok(Self {
            name: config.display_name(),
            limit,
        })
    }
}

impl Matcher for SizeGreaterThan {
    fn name(&self) -> &str {
        &self.name
    }

    fn match_mail(&self, mail: &Mail) -> Result<MatchResult, MatcherError> {
        Ok(MatchResult::when(mail.message_size() > self.limit))
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
            .sender(Some(address("boss@corp.com")))
            .recipients([address("a@local.com"), address("b@Remote.org")])
            .message("Subject: hi\r\nX-Spam-Flag: YES\r\n\r\nbody\r\n")
            .attribute("score", 7)
            .build()
    }

    #[test]
    fn test_recipient_is() {
        let matcher = RecipientIs::new(&MatcherConfig::parse("RecipientIs=a@local.com, z@z.com")).unwrap();
        assert_eq!(
            matcher.match_mail(&mail()).unwrap(),
            MatchResult::Recipients(vec![address("a@local.com")])
        );
        assert!(RecipientIs::new(&MatcherConfig::parse("RecipientIs")).is_err());
        assert!(RecipientIs::new(&MatcherConfig::parse("RecipientIs=not an address")).is_err());
    }

    #[test]
    fn test_host_is_case_insensitive() {
        let matcher = HostIs::new(&MatcherConfig::parse("HostIs=remote.org")).unwrap();
        assert_eq!(
            matcher.match_mail(&mail()).unwrap(),
            MatchResult::Recipients(vec![address("b@Remote.org")])
        );

        let both = HostIs::new(&MatcherConfig::parse("HostIs=local.com,REMOTE.org")).unwrap();
        assert_eq!(both.match_mail(&mail()).unwrap(), MatchResult::All);
    }

    #[test]
    fn test_sender_matchers() {
        let sender_is = SenderIs::new(&MatcherConfig::parse("SenderIs=boss@corp.com")).unwrap();
        assert_eq!(sender_is.match_mail(&mail()).unwrap(), MatchResult::All);

        let null = SenderIsNull::new(&MatcherConfig::parse("SenderIsNull"));
        assert_eq!(null.match_mail(&mail()).unwrap(), MatchResult::None);

        let mut bounce = mail();
        bounce.set_sender(None);
        assert_eq!(null.match_mail(&bounce).unwrap(), MatchResult::All);
        assert_eq!(sender_is.match_mail(&bounce).unwrap(), MatchResult::None);
    }

    #[test]
    fn test_has_attribute() {
        let present = HasAttribute::new(&MatcherConfig::parse("HasAttribute=score")).unwrap();
        assert_eq!(present.match_mail(&mail()).unwrap(), MatchResult::All);

        let valued = HasAttribute::new(&MatcherConfig::parse("HasAttribute=score, 8")).unwrap();
        assert_eq!(valued.match_mail(&mail()).unwrap(), MatchResult::None);
    }

    #[test]
    fn test_has_header() {
        let flag = HasHeader::new(&MatcherConfig::parse("HasHeader=X-Spam-Flag=yes")).unwrap();
        assert_eq!(flag.match_mail(&mail()).unwrap(), MatchResult::All);

        let both = HasHeader::new(&MatcherConfig::parse("HasHeader=Subject+X-Missing")).unwrap();
        assert_eq!(both.match_mail(&mail()).unwrap(), MatchResult::None);

        let mut empty = mail();
        empty.dispose();
        assert_eq!(flag.match_mail(&empty).unwrap(), MatchResult::None);
    }

    #[test]
    fn test_size_greater_than() {
        let small = SizeGreaterThan::new(&MatcherConfig::parse("SizeGreaterThan=10")).unwrap();
        assert_eq!(small.match_mail(&mail()).unwrap(), MatchResult::All);

        let large = SizeGreaterThan::new(&MatcherConfig::parse("SizeGreaterThan=1k")).unwrap();
        assert_eq!(large.match_mail(&mail()).unwrap(), MatchResult::None);

        assert!(SizeGreaterThan::new(&MatcherConfig::parse("SizeGreaterThan=lots")).is_err());
        assert!(SizeGreaterThan::new(&MatcherConfig::parse("SizeGreaterThan=0")).is_err());
    }
}
