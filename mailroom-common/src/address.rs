//! RFC 5321 mail addresses
//!
//! Addresses enter the pipeline from envelopes (`<user@example.com>`), from
//! configuration (`RecipientIs=user@example.com`) and from matchers. All three
//! go through the same grammar:
//!
//! ```text
//! Path           = "<" [ A-d-l ":" ] Mailbox ">"
//! Mailbox        = Local-part "@" ( Domain / address-literal )
//! Local-part     = Dot-string / Quoted-string
//! Domain         = sub-domain *("." sub-domain)
//! sub-domain     = Let-dig [Ldh-str]
//! ```
//!
//! Size limits: path 256 octets, local-part 64 octets, domain 255 octets.

use std::{
    fmt::{self, Display},
    net::{Ipv4Addr, Ipv6Addr},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

pub type Result<T> = std::result::Result<T, AddressError>;

const MAX_PATH: usize = 256;
const MAX_LOCAL_PART: usize = 64;
const MAX_DOMAIN: usize = 255;

/// A mailbox, `local-part@domain`
///
/// The fields are public so matchers and mailets can build addresses cheaply;
/// [`MailAddress::verify`] re-checks such hand-built values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MailAddress {
    pub local_part: String,
    pub domain: String,
}

impl MailAddress {
    /// Parse a bare mailbox or an angle-bracket forward path
    ///
    /// # Errors
    /// If the input is not a valid mailbox
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();

        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        if trimmed.len() > MAX_PATH {
            return Err(AddressError::PathTooLong);
        }

        if trimmed.starts_with('<') {
            parse_path(trimmed)
        } else {
            parse_mailbox(trimmed)
        }
    }

    /// Parse a reverse path, where `<>` is the null sender
    ///
    /// # Errors
    /// If the input is neither `<>` nor a valid mailbox
    pub fn parse_reverse_path(input: &str) -> Result<Option<Self>> {
        if input.trim() == "<>" {
            return Ok(None);
        }

        Self::parse(input).map(Some)
    }

    /// Check that this address still satisfies the mailbox grammar
    ///
    /// # Errors
    /// The first grammar violation found
    pub fn verify(&self) -> Result<()> {
        let reparsed = parse_mailbox(&self.to_string())?;
        if reparsed == *self {
            Ok(())
        } else {
            Err(AddressError::MissingAtSign)
        }
    }

    /// The domain, lower-cased for comparisons
    #[must_use]
    pub fn host(&self) -> String {
        self.domain.to_ascii_lowercase()
    }
}

impl Display for MailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local_part, self.domain)
    }
}

impl FromStr for MailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Parse a comma separated list of mailboxes, as found in matcher conditions
///
/// # Errors
/// The first entry that fails to parse
pub fn parse_list(input: &str) -> Result<Vec<MailAddress>> {
    input
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(MailAddress::parse)
        .collect()
}

/// `<mailbox>` or `<source-route:mailbox>`; the source route is discarded
fn parse_path(input: &str) -> Result<MailAddress> {
    let Some(content) = input
        .strip_prefix('<')
        .and_then(|rest| rest.strip_suffix('>'))
    else {
        return Err(AddressError::MissingCloseBracket);
    };

    let mailbox =
        find_source_route_colon(content).map_or(content, |colon| &content[colon + 1..]);

    parse_mailbox(mailbox)
}

fn find_source_route_colon(input: &str) -> Option<usize> {
    let mut in_brackets = false;
    let mut in_quotes = false;
    let mut last_colon = None;

    for (i, ch) in input.char_indices() {
        match ch {
            '"' if !in_brackets => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            ':' if !in_brackets && !in_quotes => last_colon = Some(i),
            _ => {}
        }
    }

    last_colon
}

fn parse_mailbox(input: &str) -> Result<MailAddress> {
    let at = find_unquoted_at(input)?;

    let local_part = &input[..at];
    let domain = &input[at + 1..];

    if local_part.len() > MAX_LOCAL_PART {
        return Err(AddressError::LocalPartTooLong);
    }
    if domain.len() > MAX_DOMAIN {
        return Err(AddressError::DomainTooLong);
    }

    parse_local_part(local_part)?;
    if domain.starts_with('[') {
        parse_address_literal(domain)?;
    } else {
        parse_domain(domain)?;
    }

    Ok(MailAddress {
        local_part: local_part.to_string(),
        domain: domain.to_string(),
    })
}

/// The last `@` outside quotes and address literals separates the parts
fn find_unquoted_at(input: &str) -> Result<usize> {
    let mut in_quotes = false;
    let mut in_brackets = false;
    let mut escaped = false;
    let mut at = None;

    for (i, ch) in input.char_indices() {
        match ch {
            '"' if !escaped && !in_brackets => in_quotes = !in_quotes,
            '[' if !in_quotes => in_brackets = true,
            ']' if !in_quotes => in_brackets = false,
            '@' if !in_quotes && !in_brackets => at = Some(i),
            _ => {}
        }

        escaped = ch == '\\' && !escaped;
    }

    at.ok_or(AddressError::MissingAtSign)
}

fn parse_local_part(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(AddressError::InvalidLocalPart("Empty local-part".to_string()));
    }

    if input.starts_with('"') {
        parse_quoted_string(input)
    } else {
        parse_dot_string(input)
    }
}

fn parse_dot_string(input: &str) -> Result<()> {
    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot start or end with '.'".to_string(),
        ));
    }

    if input.contains("..") {
        return Err(AddressError::InvalidLocalPart(
            "Dot-string cannot contain consecutive dots".to_string(),
        ));
    }

    if let Some(ch) = input.chars().find(|&ch| ch != '.' && !is_atext(ch)) {
        return Err(AddressError::InvalidLocalPart(format!(
            "Invalid character '{ch}' in atom"
        )));
    }

    Ok(())
}

fn parse_quoted_string(input: &str) -> Result<()> {
    if input.len() < 2 || !input.ends_with('"') {
        return Err(AddressError::UnclosedQuotedString);
    }

    let mut chars = input[1..input.len() - 1].chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some(next) if next.is_ascii_graphic() || next == ' ' => {}
                Some(next) => {
                    return Err(AddressError::InvalidQuotedString(format!(
                        "Invalid quoted-pair: \\{next}"
                    )));
                }
                None => {
                    return Err(AddressError::InvalidQuotedString(
                        "Backslash at end of quoted string".to_string(),
                    ));
                }
            }
        } else if !is_qtext_smtp(ch) {
            return Err(AddressError::InvalidQuotedString(format!(
                "Invalid character '{ch}' in quoted string"
            )));
        }
    }

    Ok(())
}

fn parse_domain(input: &str) -> Result<()> {
    if input.is_empty() {
        return Err(AddressError::InvalidDomain("Empty domain".to_string()));
    }

    if input.starts_with('.') || input.ends_with('.') {
        return Err(AddressError::InvalidDomain(
            "Domain cannot start or end with '.'".to_string(),
        ));
    }

    input.split('.').try_for_each(parse_subdomain)
}

fn parse_subdomain(input: &str) -> Result<()> {
    let (Some(first), Some(last)) = (input.chars().next(), input.chars().last()) else {
        return Err(AddressError::InvalidDomain("Empty subdomain".to_string()));
    };

    if !first.is_ascii_alphanumeric() {
        return Err(AddressError::InvalidDomain(format!(
            "Subdomain must start with letter or digit, got '{first}'"
        )));
    }

    if !last.is_ascii_alphanumeric() {
        return Err(AddressError::InvalidDomain(format!(
            "Subdomain must end with letter or digit, got '{last}'"
        )));
    }

    if let Some(ch) = input
        .chars()
        .find(|&ch| !ch.is_ascii_alphanumeric() && ch != '-')
    {
        return Err(AddressError::InvalidDomain(format!(
            "Invalid character '{ch}' in subdomain"
        )));
    }

    Ok(())
}

/// `[IPv4]`, `[IPv6:...]` or a general `[tag:value]` literal
fn parse_address_literal(input: &str) -> Result<()> {
    let Some(content) = input
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return Err(AddressError::InvalidAddressLiteral(
            "Address literal must be enclosed in brackets".to_string(),
        ));
    };

    if content.parse::<Ipv4Addr>().is_ok() {
        return Ok(());
    }

    if let Some(ipv6) = content.strip_prefix("IPv6:")
        && ipv6.parse::<Ipv6Addr>().is_ok()
    {
        return Ok(());
    }

    match content.split_once(':') {
        Some((tag, value)) if !tag.is_empty() && !value.is_empty() => Ok(()),
        _ => Err(AddressError::InvalidAddressLiteral(format!(
            "Invalid address literal format: {content}"
        ))),
    }
}

#[inline]
const fn is_atext(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(
            ch,
            '!' | '#'
                | '$'
                | '%'
                | '&'
                | '\''
                | '*'
                | '+'
                | '-'
                | '/'
                | '='
                | '?'
                | '^'
                | '_'
                | '`'
                | '{'
                | '|'
                | '}'
                | '~'
        )
}

/// Printable ASCII except backslash and quote
#[inline]
const fn is_qtext_smtp(ch: char) -> bool {
    matches!(ch as u32, 32..=33 | 35..=91 | 93..=126)
}
