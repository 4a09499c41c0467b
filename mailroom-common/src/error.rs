//! Error types for the mailroom-common crate.

use thiserror::Error;

/// Errors that can occur while parsing or verifying a mail address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Empty address")]
    Empty,

    #[error("Path exceeds 256 octets")]
    PathTooLong,

    #[error("Local-part exceeds 64 octets")]
    LocalPartTooLong,

    #[error("Domain exceeds 255 octets")]
    DomainTooLong,

    #[error("Missing closing angle bracket '>'")]
    MissingCloseBracket,

    #[error("Missing '@' separator in mailbox")]
    MissingAtSign,

    #[error("Invalid local-part: {0}")]
    InvalidLocalPart(String),

    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("Invalid address literal: {0}")]
    InvalidAddressLiteral(String),

    #[error("Unclosed quoted string in local-part")]
    UnclosedQuotedString,

    #[error("Invalid quoted string: {0}")]
    InvalidQuotedString(String),
}

/// Errors that can occur while inspecting a message body.
#[derive(Debug, Error)]
pub enum MessageError {
    /// The header block could not be parsed.
    #[error("Malformed headers: {0}")]
    MalformedHeaders(#[from] mailparse::MailParseError),

    /// The header name or value cannot be placed in a header line.
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_error_display() {
        assert_eq!(
            AddressError::InvalidDomain("Empty domain".to_string()).to_string(),
            "Invalid domain: Empty domain"
        );
        assert_eq!(AddressError::PathTooLong.to_string(), "Path exceeds 256 octets");
    }

    #[test]
    fn test_invalid_header_display() {
        let err = MessageError::InvalidHeader {
            name: "X-Bad\r\n".to_string(),
            reason: "contains a line break",
        };
        assert!(err.to_string().contains("contains a line break"));
    }
}
