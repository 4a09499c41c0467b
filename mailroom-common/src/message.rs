use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::error::MessageError;

/// The raw RFC 5322 message carried by a [`crate::Mail`]
///
/// The bytes are shared between every split copy of a mail. Editing goes
/// through [`Message::with_header`], which produces a new buffer and leaves
/// the other copies untouched.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    data: Arc<[u8]>,
}

impl Message {
    #[must_use]
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Number of mails currently holding this body
    #[must_use]
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.data)
    }

    /// The value of the first header called `name`, case-insensitive
    ///
    /// # Errors
    /// If the header block is malformed
    pub fn header(&self, name: &str) -> Result<Option<String>, MessageError> {
        let (headers, _) = mailparse::parse_headers(&self.data)?;

        Ok(headers
            .iter()
            .find(|header| header.get_key_ref().eq_ignore_ascii_case(name))
            .map(mailparse::MailHeader::get_value))
    }

    /// Whether any header called `name` is present
    ///
    /// # Errors
    /// If the header block is malformed
    pub fn has_header(&self, name: &str) -> Result<bool, MessageError> {
        self.header(name).map(|value| value.is_some())
    }

    /// A copy of this message with `name: value` prepended to the headers
    ///
    /// # Errors
    /// If the name is empty or either part contains a line break
    pub fn with_header(&self, name: &str, value: &str) -> Result<Self, MessageError> {
        let invalid = |reason| MessageError::InvalidHeader {
            name: name.to_string(),
            reason,
        };

        if name.is_empty() {
            return Err(invalid("empty header name"));
        }
        if name.contains([':', ' ']) {
            return Err(invalid("header name contains ':' or a space"));
        }
        if name.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(invalid("contains a line break"));
        }

        let line = format!("{name}: {value}\r\n");
        let mut data = Vec::with_capacity(line.len() + self.data.len());
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(&self.data);

        Ok(Self::new(data))
    }
}

impl Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("size", &self.data.len())
            .field("holders", &self.holders())
            .finish()
    }
}

impl From<&str> for Message {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<Vec<u8>> for Message {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const SAMPLE: &str = "Subject: Hello\r\nX-Spam-Flag: NO\r\n\r\nBody text\r\n";

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let message = Message::from(SAMPLE);
        assert_eq!(message.header("subject").unwrap().as_deref(), Some("Hello"));
        assert!(message.has_header("X-SPAM-FLAG").unwrap());
        assert!(!message.has_header("X-Missing").unwrap());
    }

    #[test]
    fn test_with_header_copies_on_write() {
        let original = Message::from(SAMPLE);
        let shared = original.clone();
        assert_eq!(original.holders(), 2);

        let edited = original.with_header("X-Processed", "yes").unwrap();
        assert_eq!(edited.header("X-Processed").unwrap().as_deref(), Some("yes"));
        assert!(!shared.has_header("X-Processed").unwrap());
        assert_eq!(edited.holders(), 1);
        assert!(edited.size() > shared.size());
    }

    #[test]
    fn test_with_header_rejects_injection() {
        let message = Message::from(SAMPLE);
        assert!(message.with_header("X-Bad", "a\r\nBcc: evil@x.com").is_err());
        assert!(message.with_header("", "value").is_err());
        assert!(message.with_header("Bad Name", "value").is_err());
    }
}
