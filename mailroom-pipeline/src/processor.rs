use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
    time::{Duration, Instant},
};

use mailroom_common::{Mail, MailAddress, state};
use mailroom_tracing::traced;

use crate::{
    error::{MailetError, MatcherError, PipelineError},
    listener::{Listeners, ProcessorListener},
    mailet::{Mailet, TerminatingMailet},
    matcher::{MatchResult, Matcher},
    matchers::All,
    pair::{MailetPolicy, MatcherMailetPair, MatcherPolicy},
    reference::ProcessingReference,
};

/// Anything a processor can hand a mail to when its state changes
pub trait MailProcessor: Send + Sync {
    /// Process `mail` as the start of a new lineage
    ///
    /// # Errors
    /// If processing failed and the failure was configured to propagate
    fn service(&self, mail: Mail) -> Result<(), PipelineError>;
}

/// Record a failed stage on the mail and move it to `next_state`
pub(crate) fn handle_exception(mail: &mut Mail, stage: &str, next_state: &str, error: &dyn Display) {
    tracing::error!(
        target: "mailroom::pipeline",
        mail = mail.name(),
        stage,
        recipients = ?mail.recipients(),
        state = mail.state(),
        next_state,
        %error,
        "Exception calling {stage}"
    );

    mail.set_state(next_state);
    mail.set_error_message(format!("Exception calling {stage}: {error}"));
}

/// The ordered chain of stages bound to one state
///
/// Built once and shared read-only; every mail entering the state runs the
/// pairs in declaration order, ending with an implicit terminating stage.
pub struct StateProcessor {
    state: String,
    pairs: Vec<MatcherMailetPair>,
    listeners: Listeners,
}

impl Debug for StateProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateProcessor")
            .field("state", &self.state)
            .field("pairs", &self.pairs)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl StateProcessor {
    pub fn new(state: impl Into<String>, mut pairs: Vec<MatcherMailetPair>) -> Self {
        pairs.push(MatcherMailetPair::new(
            Box::new(All::default()),
            Box::new(TerminatingMailet),
        ));

        Self {
            state: state.into(),
            pairs,
            listeners: Listeners::default(),
        }
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Configured matchers, in order, including the terminating stage
    pub fn matchers(&self) -> impl Iterator<Item = &dyn Matcher> {
        self.pairs.iter().map(MatcherMailetPair::matcher)
    }

    /// Configured mailets, in order, including the terminating stage
    pub fn mailets(&self) -> impl Iterator<Item = &dyn Mailet> {
        self.pairs.iter().map(MatcherMailetPair::mailet)
    }

    pub fn add_listener(&self, listener: Arc<dyn ProcessorListener>) {
        self.listeners.add(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ProcessorListener>) -> bool {
        self.listeners.remove(listener)
    }

    #[must_use]
    pub const fn listeners(&self) -> &Listeners {
        &self.listeners
    }

    /// Run `reference` and every copy split from it through this state
    ///
    /// Copies leaving for another state are handed to `router` before this
    /// returns. On error the copies still held here are abandoned.
    ///
    /// # Errors
    /// If a stage failed with a `propagate` policy, or a hand-off failed
    #[traced(instrument(level = tracing::Level::TRACE, skip_all, fields(state = %self.state)), timing(precision = "us"))]
    pub fn process(
        &self,
        mut reference: ProcessingReference,
        router: &dyn MailProcessor,
    ) -> Result<(), PipelineError> {
        if reference.mail().is_ghost() || !reference.mail().has_recipients() {
            reference.mail_mut().set_state(state::GHOST);
            reference.dispose();
            return Ok(());
        }

        let mut live = vec![reference];

        for pair in &self.pairs {
            if live.is_empty() {
                break;
            }

            let mut next = Vec::with_capacity(live.len());
            for reference in live {
                self.run_pair(pair, reference, router, &mut next)?;
            }
            live = next;
        }

        for reference in live {
            reference.dispose();
        }

        Ok(())
    }

    fn run_pair(
        &self,
        pair: &MatcherMailetPair,
        mut reference: ProcessingReference,
        router: &dyn MailProcessor,
        next: &mut Vec<ProcessingReference>,
    ) -> Result<(), PipelineError> {
        let Some(matched) = self.run_matcher(pair, &mut reference)? else {
            // the matcher failure moved the mail elsewhere
            return self.settle(reference, router, next);
        };

        if matched.is_empty() {
            next.push(reference);
            return Ok(());
        }

        let mut target = if matched.len() == reference.mail().recipients().len() {
            reference
        } else {
            let copy = reference.split_for_addresses(&matched);
            next.push(reference);
            copy
        };

        self.run_mailet(pair, &mut target)?;
        self.settle(target, router, next)
    }

    /// The recipients `pair` applies to, or `None` when a failure changed
    /// the mail's state
    fn run_matcher(
        &self,
        pair: &MatcherMailetPair,
        reference: &mut ProcessingReference,
    ) -> Result<Option<Vec<MailAddress>>, PipelineError> {
        let matcher = pair.matcher();
        let mail = reference.mail_mut();
        let recipients = mail.recipients().to_vec();

        let started = Instant::now();
        let result = matcher
            .match_mail(mail)
            .and_then(|result| Self::accept(matcher, mail, result));
        let elapsed = started.elapsed();

        let (matched, error) = match result {
            Ok(matched) => (Some(matched), None),
            Err(error) => match pair.matcher_policy() {
                MatcherPolicy::NoMatch => (Some(Vec::new()), Some(error)),
                MatcherPolicy::MatchAll => (Some(recipients.clone()), Some(error)),
                MatcherPolicy::Propagate => {
                    self.notify_matcher(matcher, mail, &recipients, &[], elapsed, Some(&error));
                    return Err(PipelineError::Matcher {
                        matcher: matcher.info(),
                        mail: mail.name().to_string(),
                        source: error,
                    });
                }
                MatcherPolicy::State(next_state) => {
                    handle_exception(mail, &matcher.info(), next_state, &error);
                    (None, Some(error))
                }
            },
        };

        self.notify_matcher(
            matcher,
            mail,
            &recipients,
            matched.as_deref().unwrap_or_default(),
            elapsed,
            error.as_ref(),
        );

        Ok(matched)
    }

    /// Check a matcher's answer against the mail it was asked about
    fn accept(
        matcher: &dyn Matcher,
        mail: &Mail,
        result: MatchResult,
    ) -> Result<Vec<MailAddress>, MatcherError> {
        let listed = match result {
            MatchResult::None => return Ok(Vec::new()),
            MatchResult::All => return Ok(mail.recipients().to_vec()),
            MatchResult::Recipients(listed) => listed,
        };

        for recipient in &listed {
            recipient
                .verify()
                .map_err(|source| MatcherError::InvalidRecipient {
                    recipient: recipient.to_string(),
                    source,
                })?;
        }

        let mut matched = Vec::with_capacity(listed.len());
        for recipient in listed {
            if !mail.recipients().contains(&recipient) {
                tracing::debug!(
                    target: "mailroom::pipeline",
                    matcher = %matcher.info(),
                    mail = mail.name(),
                    %recipient,
                    "Ignoring matched address that is not a recipient"
                );
            } else if !matched.contains(&recipient) {
                matched.push(recipient);
            }
        }

        Ok(matched)
    }

    fn run_mailet(
        &self,
        pair: &MatcherMailetPair,
        reference: &mut ProcessingReference,
    ) -> Result<(), PipelineError> {
        let mailet = pair.mailet();
        let mail = reference.mail_mut();

        let started = Instant::now();
        let result = mailet.service(mail);
        let elapsed = started.elapsed();

        let error = match result {
            Ok(()) => None,
            Err(error) => {
                match pair.mailet_policy() {
                    MailetPolicy::Ignore => {
                        if let Some(source) = mail
                            .recipients()
                            .iter()
                            .find_map(|recipient| recipient.verify().err())
                        {
                            handle_exception(mail, &mailet.info(), state::ERROR, &source);
                        }
                    }
                    MailetPolicy::Propagate => {
                        self.notify_mailet(mailet, mail, elapsed, Some(&error));
                        return Err(PipelineError::Mailet {
                            mailet: mailet.info(),
                            mail: mail.name().to_string(),
                            source: error,
                        });
                    }
                    MailetPolicy::State(next_state) => {
                        handle_exception(mail, &mailet.info(), next_state, &error);
                    }
                }
                Some(error)
            }
        };

        self.notify_mailet(mailet, mail, elapsed, error.as_ref());
        Ok(())
    }

    /// Decide where a copy goes after a stage touched it
    fn settle(
        &self,
        mut reference: ProcessingReference,
        router: &dyn MailProcessor,
        next: &mut Vec<ProcessingReference>,
    ) -> Result<(), PipelineError> {
        let mail = reference.mail_mut();

        if mail.is_ghost() || !mail.has_recipients() {
            if !mail.is_ghost() {
                mail.set_state(state::GHOST);
            }
            tracing::trace!(
                target: "mailroom::pipeline",
                mail = mail.name(),
                "Disposing ghosted copy"
            );
            reference.dispose();
        } else if mail.state() == self.state {
            next.push(reference);
        } else {
            tracing::debug!(
                target: "mailroom::pipeline",
                mail = mail.name(),
                from = %self.state,
                to = mail.state(),
                "State changed"
            );
            reference.hand_off(|mail| router.service(mail))?;
        }

        Ok(())
    }

    fn notify_matcher(
        &self,
        matcher: &dyn Matcher,
        mail: &Mail,
        recipients: &[MailAddress],
        matched: &[MailAddress],
        elapsed: Duration,
        error: Option<&MatcherError>,
    ) {
        for listener in self.listeners.snapshot() {
            listener.after_matcher(matcher, mail.name(), recipients, matched, elapsed, error);
        }
    }

    fn notify_mailet(
        &self,
        mailet: &dyn Mailet,
        mail: &Mail,
        elapsed: Duration,
        error: Option<&MailetError>,
    ) {
        for listener in self.listeners.snapshot() {
            listener.after_mailet(mailet, mail.name(), mail.state(), elapsed, error);
        }
    }

    pub(crate) fn destroy(&self) {
        for pair in &self.pairs {
            pair.destroy();
        }
    }
}
