use std::time::SystemTime;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{address::MailAddress, attribute::AttributeValue, message::Message};

/// Well-known processing states
pub mod state {
    /// Entry state of every inbound mail
    pub const ROOT: &str = "root";
    /// Terminal state: no further routing, pending disposal
    pub const GHOST: &str = "ghost";
    /// Default destination for failed stages
    pub const ERROR: &str = "error";
    pub const TRANSPORT: &str = "transport";
    pub const LOCAL_DELIVERY: &str = "local-delivery";
}

/// A unit of work in the pipeline: envelope, message and routing metadata
///
/// The pipeline owns a `Mail` exclusively while it runs; mailets receive it by
/// mutable reference. Splitting produces independent copies through
/// [`Mail::duplicate_for`] which share only the message bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mail {
    name: String,
    sender: Option<MailAddress>,
    recipients: Vec<MailAddress>,
    state: String,
    message: Option<Message>,
    attributes: AHashMap<String, AttributeValue>,
    error_message: Option<String>,
    remote_addr: String,
    remote_host: String,
    last_updated: SystemTime,
}

impl Mail {
    #[must_use]
    pub fn builder(name: impl Into<String>) -> MailBuilder {
        MailBuilder::new(name)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub const fn sender(&self) -> Option<&MailAddress> {
        self.sender.as_ref()
    }

    pub fn set_sender(&mut self, sender: Option<MailAddress>) {
        self.sender = sender;
    }

    #[must_use]
    pub fn recipients(&self) -> &[MailAddress] {
        &self.recipients
    }

    /// Replace the recipients, dropping duplicates but keeping first-seen order
    pub fn set_recipients(&mut self, recipients: impl IntoIterator<Item = MailAddress>) {
        self.recipients.clear();
        for recipient in recipients {
            if !self.recipients.contains(&recipient) {
                self.recipients.push(recipient);
            }
        }
    }

    /// Add a recipient; returns `false` if it was already present
    pub fn add_recipient(&mut self, recipient: MailAddress) -> bool {
        if self.recipients.contains(&recipient) {
            false
        } else {
            self.recipients.push(recipient);
            true
        }
    }

    /// Remove every recipient in `addresses`; returns how many were removed
    pub fn remove_recipients(&mut self, addresses: &[MailAddress]) -> usize {
        let before = self.recipients.len();
        self.recipients.retain(|recipient| !addresses.contains(recipient));
        before - self.recipients.len()
    }

    #[must_use]
    pub fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn set_state(&mut self, state: impl Into<String>) {
        self.state = state.into();
        self.last_updated = SystemTime::now();
    }

    #[must_use]
    pub fn is_ghost(&self) -> bool {
        self.state == state::GHOST
    }

    #[must_use]
    pub const fn message(&self) -> Option<&Message> {
        self.message.as_ref()
    }

    pub fn set_message(&mut self, message: Message) {
        self.message = Some(message);
    }

    /// Detach the message, e.g. to store it apart from the envelope
    pub fn take_message(&mut self) -> Option<Message> {
        self.message.take()
    }

    #[must_use]
    pub fn message_size(&self) -> usize {
        self.message.as_ref().map_or(0, Message::size)
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    /// Set an attribute, returning the previous value
    pub fn set_attribute(
        &mut self,
        name: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Option<AttributeValue> {
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<AttributeValue> {
        self.attributes.remove(name)
    }

    #[must_use]
    pub fn has_attribute(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn remove_all_attributes(&mut self) {
        self.attributes.clear();
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    #[must_use]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    #[must_use]
    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    #[must_use]
    pub const fn last_updated(&self) -> SystemTime {
        self.last_updated
    }

    /// A copy of this mail addressed to `recipients` only
    ///
    /// Name, state, attributes and diagnostics are carried over; the message
    /// bytes are shared, not copied.
    #[must_use]
    pub fn duplicate_for(&self, recipients: Vec<MailAddress>) -> Self {
        let mut copy = Self {
            name: self.name.clone(),
            sender: self.sender.clone(),
            recipients: Vec::with_capacity(recipients.len()),
            state: self.state.clone(),
            message: self.message.clone(),
            attributes: self.attributes.clone(),
            error_message: self.error_message.clone(),
            remote_addr: self.remote_addr.clone(),
            remote_host: self.remote_host.clone(),
            last_updated: SystemTime::now(),
        };
        copy.set_recipients(recipients);
        copy
    }

    /// Release the resources held by this copy
    ///
    /// Drops this copy's handle on the message bytes and its attributes; the
    /// bytes themselves are freed once no other copy holds them.
    pub fn dispose(&mut self) {
        self.message = None;
        self.attributes.clear();
    }
}

/// Builder for inbound mails
#[derive(Debug)]
pub struct MailBuilder {
    mail: Mail,
}

impl MailBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            mail: Mail {
                name: name.into(),
                sender: None,
                recipients: Vec::new(),
                state: state::ROOT.to_string(),
                message: None,
                attributes: AHashMap::new(),
                error_message: None,
                remote_addr: "127.0.0.1".to_string(),
                remote_host: "localhost".to_string(),
                last_updated: SystemTime::now(),
            },
        }
    }

    #[must_use]
    pub fn sender(mut self, sender: Option<MailAddress>) -> Self {
        self.mail.sender = sender;
        self
    }

    #[must_use]
    pub fn recipients(mut self, recipients: impl IntoIterator<Item = MailAddress>) -> Self {
        self.mail.set_recipients(recipients);
        self
    }

    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.mail.state = state.into();
        self
    }

    #[must_use]
    pub fn message(mut self, message: impl Into<Message>) -> Self {
        self.mail.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.mail.attributes.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn remote(mut self, addr: impl Into<String>, host: impl Into<String>) -> Self {
        self.mail.remote_addr = addr.into();
        self.mail.remote_host = host.into();
        self
    }

    #[must_use]
    pub fn build(self) -> Mail {
        self.mail
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

    fn sample() -> Mail {
        Mail::builder("mail-1")
            .sender(Some(address("sender@example.com")))
            .recipients([address("a@x.com"), address("b@x.com"), address("a@x.com")])
            .message("Subject: test\r\n\r\nhello\r\n")
            .attribute("origin", "test")
            .build()
    }

    #[test]
    fn test_recipients_are_an_ordered_set() {
        let mail = sample();
        assert_eq!(
            mail.recipients(),
            &[address("a@x.com"), address("b@x.com")][..]
        );
        assert_eq!(mail.state(), state::ROOT);
    }

    #[test]
    fn test_duplicate_shares_body_but_not_recipients() {
        let mut mail = sample();
        let copy = mail.duplicate_for(vec![address("b@x.com")]);

        assert_eq!(copy.name(), mail.name());
        assert_eq!(copy.state(), mail.state());
        assert_eq!(copy.attribute("origin"), mail.attribute("origin"));
        assert_eq!(mail.message().unwrap().holders(), 2);

        mail.remove_recipients(&[address("b@x.com")]);
        assert_eq!(mail.recipients(), &[address("a@x.com")][..]);
        assert_eq!(copy.recipients(), &[address("b@x.com")][..]);
    }

    #[test]
    fn test_dispose_releases_body_handle() {
        let mut mail = sample();
        let copy = mail.duplicate_for(vec![address("a@x.com")]);
        assert_eq!(copy.message().unwrap().holders(), 2);

        mail.dispose();
        assert!(mail.message().is_none());
        assert!(!mail.has_attribute("origin"));
        assert_eq!(copy.message().unwrap().holders(), 1);
    }

    #[test]
    fn test_add_and_remove_recipients() {
        let mut mail = sample();
        assert!(!mail.add_recipient(address("a@x.com")));
        assert!(mail.add_recipient(address("c@y.com")));
        assert_eq!(mail.remove_recipients(&[address("a@x.com"), address("z@z.com")]), 1);
        assert_eq!(mail.recipients().len(), 2);
    }

    #[test]
    fn test_set_state_bumps_timestamp() {
        let mut mail = sample();
        let before = mail.last_updated();
        mail.set_state(state::GHOST);
        assert!(mail.is_ghost());
        assert!(mail.last_updated() >= before);
    }
}
