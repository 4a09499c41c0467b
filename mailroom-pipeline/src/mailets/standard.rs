use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use mailroom_common::{Mail, MailAddress, address, state};

use crate::{
    error::MailetError,
    mailet::{Mailet, MailetConfig, MailetContext},
};

/// Ghosts the mail
#[derive(Debug)]
pub struct Null {
    name: String,
}

impl Default for Null {
    fn default() -> Self {
        Self {
            name: "Null".to_string(),
        }
    }
}

impl Null {
    #[must_use]
    pub fn new(config: &MailetConfig) -> Self {
        Self {
            name: config.name().to_string(),
        }
    }
}

impl Mailet for Null {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        mail.set_state(state::GHOST);
        Ok(())
    }
}

/// Moves the mail to `processor`, optionally recording `notice`
#[derive(Debug)]
pub struct ToProcessor {
    name: String,
    processor: String,
    notice: Option<String>,
}

impl ToProcessor {
    /// # Errors
    /// If `processor` is missing
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        Ok(Self {
            name: config.name().to_string(),
            processor: config.required_parameter("processor")?.trim().to_string(),
            notice: config.parameter("notice").map(ToString::to_string),
        })
    }
}

impl Mailet for ToProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        tracing::debug!(
            target: "mailroom::mailet",
            mail = mail.name(),
            processor = %self.processor,
            "Sending mail to processor"
        );

        if let Some(notice) = &self.notice {
            mail.set_error_message(notice.clone());
        }

        mail.set_state(self.processor.clone());
        Ok(())
    }

    fn info(&self) -> String {
        format!("{} -> {}", self.name, self.processor)
    }
}

/// Sets every parameter as a string attribute
#[derive(Debug)]
pub struct SetMailAttribute {
    name: String,
    attributes: Vec<(String, String)>,
}

impl SetMailAttribute {
    /// # Errors
    /// If no attribute is given
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        let mut attributes = config
            .parameters()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<Vec<_>>();
        attributes.sort();

        if attributes.is_empty() {
            return Err(MailetError::MissingParameter {
                mailet: config.name().to_string(),
                parameter: "<attribute name>".to_string(),
            });
        }

        Ok(Self {
            name: config.name().to_string(),
            attributes,
        })
    }
}

impl Mailet for SetMailAttribute {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        for (name, value) in &self.attributes {
            mail.set_attribute(name.clone(), value.as_str());
        }
        Ok(())
    }
}

/// Removes the attributes listed in `name`
#[derive(Debug)]
pub struct RemoveMailAttribute {
    name: String,
    attributes: Vec<String>,
}

impl RemoveMailAttribute {
    /// # Errors
    /// If `name` is missing
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        let attributes = config
            .required_parameter("name")?
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string)
            .collect();

        Ok(Self {
            name: config.name().to_string(),
            attributes,
        })
    }
}

impl Mailet for RemoveMailAttribute {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        for attribute in &self.attributes {
            mail.remove_attribute(attribute);
        }
        Ok(())
    }
}

/// Prepends `name: value` to the message headers
#[derive(Debug)]
pub struct AddHeader {
    name: String,
    header: String,
    value: String,
}

impl AddHeader {
    /// # Errors
    /// If `name` or `value` is missing
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        Ok(Self {
            name: config.name().to_string(),
            header: config.required_parameter("name")?.trim().to_string(),
            value: config.required_parameter("value")?.to_string(),
        })
    }
}

impl Mailet for AddHeader {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        let Some(message) = mail.message() else {
            return Err(MailetError::Failed(format!(
                "mail {} has no message to add {} to",
                mail.name(),
                self.header
            )));
        };

        let edited = message.with_header(&self.header, &self.value)?;
        mail.set_message(edited);
        Ok(())
    }
}

/// Logs the envelope, and optionally headers and body, at info level
#[derive(Debug)]
pub struct LogMessage {
    name: String,
    headers: bool,
    body: bool,
    max_length: usize,
    comment: Option<String>,
}

const DEFAULT_MAX_LENGTH: usize = 2048;

impl LogMessage {
    /// # Errors
    /// If a flag is not a boolean, or `maxLength` is not a number
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        let max_length = match config.parameter("maxLength") {
            None => DEFAULT_MAX_LENGTH,
            Some(value) => value.trim().parse().map_err(|_| MailetError::InvalidParameter {
                mailet: config.name().to_string(),
                parameter: "maxLength".to_string(),
                reason: format!("'{value}' is not a number"),
            })?,
        };

        Ok(Self {
            name: config.name().to_string(),
            headers: config.bool_parameter("headers", true)?,
            body: config.bool_parameter("body", true)?,
            max_length,
            comment: config.parameter("comment").map(ToString::to_string),
        })
    }

    fn excerpt(&self, mail: &Mail) -> Option<String> {
        let message = mail.message()?;
        let bytes = message.as_bytes();
        let split = bytes
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map_or(bytes.len(), |position| position + 4);
        let (headers, body) = bytes.split_at(split);

        let mut excerpt = String::new();
        if self.headers {
            excerpt.push_str(&String::from_utf8_lossy(headers));
        }
        if self.body {
            let end = body.len().min(self.max_length);
            excerpt.push_str(&String::from_utf8_lossy(&body[..end]));
        }

        Some(excerpt)
    }
}

impl Mailet for LogMessage {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        let sender = mail
            .sender()
            .map_or_else(|| "<>".to_string(), ToString::to_string);
        let recipients = mail
            .recipients()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");

        tracing::info!(
            target: "mailroom::mailet",
            mail = mail.name(),
            state = mail.state(),
            %sender,
            %recipients,
            comment = self.comment.as_deref().unwrap_or_default(),
            excerpt = %self.excerpt(mail).unwrap_or_default(),
            "Logging mail"
        );
        Ok(())
    }
}

/// Sends a copy of the mail to `forwardTo`, ghosting the original unless
/// `passThrough` is set
pub struct Forward {
    name: String,
    forward_to: Vec<MailAddress>,
    pass_through: bool,
    context: Arc<dyn MailetContext>,
    sent: AtomicU64,
}

impl Debug for Forward {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forward")
            .field("name", &self.name)
            .field("forward_to", &self.forward_to)
            .field("pass_through", &self.pass_through)
            .finish_non_exhaustive()
    }
}

impl Forward {
    /// # Errors
    /// If `forwardTo` is missing or holds an invalid address
    pub fn new(config: &MailetConfig) -> Result<Self, MailetError> {
        let forward_to = address::parse_list(config.required_parameter("forwardTo")?)?;

        Ok(Self {
            name: config.name().to_string(),
            forward_to,
            pass_through: config.bool_parameter("passThrough", false)?,
            context: config.context(),
            sent: AtomicU64::new(0),
        })
    }
}

impl Mailet for Forward {
    fn name(&self) -> &str {
        &self.name
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        let sequence = self.sent.fetch_add(1, Ordering::Relaxed);
        let mut forwarded = mail.duplicate_for(self.forward_to.clone());
        forwarded.set_name(format!("{}-forward-{sequence}", mail.name()));
        forwarded.set_state(state::ROOT);

        self.context.send_mail(forwarded)?;

        if !self.pass_through {
            mail.set_state(state::GHOST);
        }
        Ok(())
    }

    fn info(&self) -> String {
        let targets = self
            .forward_to
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} -> {targets}", self.name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mailet::DetachedContext;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<Mail>>,
    }

    impl MailetContext for Outbox {
        fn send_mail(&self, mail: Mail) -> Result<(), MailetError> {
            self.sent.lock().push(mail);
            Ok(())
        }
    }

    fn config(name: &str, params: &[(&str, &str)], context: Arc<dyn MailetContext>) -> MailetConfig {
        MailetConfig::new(
            name,
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            context,
        )
    }

    fn detached(name: &str, params: &[(&str, &str)]) -> MailetConfig {
        config(name, params, Arc::new(DetachedContext))
    }

    fn mail() -> Mail {
        Mail::builder("m")
            .recipients([MailAddress::parse("a@x.com").unwrap()])
            .message("Subject: hi\r\n\r\nbody\r\n")
            .attribute("keep", "1")
            .attribute("drop", "2")
            .build()
    }

    #[test]
    fn test_to_processor() {
        let mailet = ToProcessor::new(&detached(
            "ToProcessor",
            &[("processor", "spam"), ("notice", "flagged")],
        ))
        .unwrap();
        let mut mail = mail();
        mailet.service(&mut mail).unwrap();
        assert_eq!(mail.state(), "spam");
        assert_eq!(mail.error_message(), Some("flagged"));

        assert!(ToProcessor::new(&detached("ToProcessor", &[])).is_err());
    }

    #[test]
    fn test_attribute_mailets() {
        let mut mail = mail();
        SetMailAttribute::new(&detached("SetMailAttribute", &[("org.tag", "yes")]))
            .unwrap()
            .service(&mut mail)
            .unwrap();
        RemoveMailAttribute::new(&detached("RemoveMailAttribute", &[("name", "drop, missing")]))
            .unwrap()
            .service(&mut mail)
            .unwrap();

        assert_eq!(mail.attribute("org.tag").and_then(|v| v.as_str()), Some("yes"));
        assert!(mail.has_attribute("keep"));
        assert!(!mail.has_attribute("drop"));
    }

    #[test]
    fn test_add_header_is_copy_on_write() {
        let mut mail = mail();
        let original = mail.message().cloned().unwrap();
        AddHeader::new(&detached("AddHeader", &[("name", "X-Seen"), ("value", "1")]))
            .unwrap()
            .service(&mut mail)
            .unwrap();

        assert_eq!(
            mail.message().unwrap().header("X-Seen").unwrap().as_deref(),
            Some("1")
        );
        assert!(!original.has_header("X-Seen").unwrap());
    }

    #[test]
    fn test_forward_sends_copy_and_ghosts() {
        let outbox = Arc::new(Outbox::default());
        let mailet = Forward::new(&config(
            "Forward",
            &[("forwardTo", "archive@x.com, audit@y.com")],
            outbox.clone(),
        ))
        .unwrap();

        let mut mail = mail();
        mail.set_state("transport");
        mailet.service(&mut mail).unwrap();
        assert!(mail.is_ghost());

        let sent = outbox.sent.lock();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].name(), "m-forward-0");
        assert_eq!(sent[0].state(), state::ROOT);
        assert_eq!(sent[0].recipients().len(), 2);
    }

    #[test]
    fn test_forward_pass_through() {
        let outbox = Arc::new(Outbox::default());
        let mailet = Forward::new(&config(
            "Forward",
            &[("forwardTo", "archive@x.com"), ("passThrough", "true")],
            outbox,
        ))
        .unwrap();

        let mut mail = mail();
        mailet.service(&mut mail).unwrap();
        assert_eq!(mail.state(), state::ROOT);
    }

    #[test]
    fn test_forward_without_spool_fails() {
        let mailet = Forward::new(&detached("Forward", &[("forwardTo", "a@b.com")])).unwrap();
        let mut mail = mail();
        assert!(matches!(mailet.service(&mut mail), Err(MailetError::Send(_))));
        assert!(!mail.is_ghost());
    }

    #[test]
    fn test_log_message_excerpt() {
        let mailet = LogMessage::new(&detached("LogMessage", &[("headers", "false"), ("maxLength", "2")])).unwrap();
        assert_eq!(mailet.excerpt(&mail()).unwrap(), "bo");
        assert!(LogMessage::new(&detached("LogMessage", &[("maxLength", "x")])).is_err());
    }
}
