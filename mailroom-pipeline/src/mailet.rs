use std::{
    fmt::{self, Debug},
    sync::Arc,
};

use ahash::AHashMap;
use mailroom_common::{Mail, state};

use crate::error::MailetError;

/// Services the container offers to mailets
pub trait MailetContext: Send + Sync {
    /// Submit a brand new mail, entering at the root state
    ///
    /// # Errors
    /// If the mail could not be accepted
    fn send_mail(&self, mail: Mail) -> Result<(), MailetError>;

    fn log(&self, message: &str) {
        tracing::info!(target: "mailroom::mailet", "{message}");
    }
}

/// A context that refuses to send anything, for pipelines without a spool
#[derive(Debug, Default, Clone, Copy)]
pub struct DetachedContext;

impl MailetContext for DetachedContext {
    fn send_mail(&self, mail: Mail) -> Result<(), MailetError> {
        Err(MailetError::Send(format!(
            "no spool is attached, dropping {}",
            mail.name()
        )))
    }
}

/// Acts on a mail once its matcher has selected it
pub trait Mailet: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// If the mailet could not process the mail
    fn service(&self, mail: &mut Mail) -> Result<(), MailetError>;

    fn info(&self) -> String {
        self.name().to_string()
    }

    /// Called once when the owning router shuts down
    fn destroy(&self) {}
}

impl Debug for dyn Mailet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mailet({})", self.info())
    }
}

/// Construction parameters for a mailet
#[derive(Clone)]
pub struct MailetConfig {
    name: String,
    params: AHashMap<String, String>,
    context: Arc<dyn MailetContext>,
}

impl Debug for MailetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailetConfig")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl MailetConfig {
    pub fn new(
        name: impl Into<String>,
        params: AHashMap<String, String>,
        context: Arc<dyn MailetContext>,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            context,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// # Errors
    /// If the parameter is missing or blank
    pub fn required_parameter(&self, key: &str) -> Result<&str, MailetError> {
        self.parameter(key)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| MailetError::MissingParameter {
                mailet: self.name.clone(),
                parameter: key.to_string(),
            })
    }

    /// A `true`/`false`/`yes`/`no` parameter
    ///
    /// # Errors
    /// If the parameter is present but not a boolean
    pub fn bool_parameter(&self, key: &str, default: bool) -> Result<bool, MailetError> {
        match self.parameter(key).map(str::trim) {
            None => Ok(default),
            Some(value) if value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") => {
                Ok(true)
            }
            Some(value) if value.eq_ignore_ascii_case("false") || value.eq_ignore_ascii_case("no") => {
                Ok(false)
            }
            Some(value) => Err(MailetError::InvalidParameter {
                mailet: self.name.clone(),
                parameter: key.to_string(),
                reason: format!("expected a boolean, got '{value}'"),
            }),
        }
    }

    #[must_use]
    pub fn context(&self) -> Arc<dyn MailetContext> {
        Arc::clone(&self.context)
    }
}

/// Implicit last stage of every processor
///
/// Any mail still in the processor's state at this point has nowhere left to
/// go and is ghosted.
#[derive(Debug, Default)]
pub struct TerminatingMailet;

impl Mailet for TerminatingMailet {
    fn name(&self) -> &str {
        "Terminating%Mailet%Name"
    }

    fn service(&self, mail: &mut Mail) -> Result<(), MailetError> {
        if mail.state() != state::ERROR {
            tracing::warn!(
                target: "mailroom::pipeline",
                mail = mail.name(),
                state = mail.state(),
                "Message reached the end of this processor, and is automatically deleted. \
                 This may indicate a configuration error."
            );
        }

        mail.set_state(state::GHOST);
        Ok(())
    }

    fn info(&self) -> String {
        "Terminating Mailet".to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config(params: &[(&str, &str)]) -> MailetConfig {
        MailetConfig::new(
            "Test",
            params
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            Arc::new(DetachedContext),
        )
    }

    #[test]
    fn test_parameters() {
        let config = config(&[("flag", "Yes"), ("blank", " "), ("other", "maybe")]);
        assert!(config.bool_parameter("flag", false).unwrap());
        assert!(!config.bool_parameter("missing", false).unwrap());
        assert!(config.bool_parameter("other", false).is_err());
        assert!(config.required_parameter("blank").is_err());
        assert!(config.required_parameter("flag").is_ok());
    }

    #[test]
    fn test_terminating_mailet_ghosts() {
        let mut mail = Mail::builder("m").state("transport").build();
        TerminatingMailet.service(&mut mail).unwrap();
        assert!(mail.is_ghost());

        let mut failed = Mail::builder("m").state(state::ERROR).build();
        TerminatingMailet.service(&mut failed).unwrap();
        assert!(failed.is_ghost());
    }

    #[test]
    fn test_detached_context_refuses() {
        let mail = Mail::builder("m").build();
        assert!(matches!(
            DetachedContext.send_mail(mail),
            Err(MailetError::Send(_))
        ));
    }
}
