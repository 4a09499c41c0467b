use std::sync::Arc;

use ahash::AHashMap;
use mailroom_common::{Mail, internal, state};

use crate::{
    error::{ConfigError, PipelineError},
    listener::ProcessorListener,
    processor::{MailProcessor, StateProcessor},
    reference::{Completion, ProcessingReference},
};

/// Routes mails to the processor bound to their current state
///
/// The table is fixed once built. Processors call back into the router
/// whenever a mail changes state; there is no cycle detection.
#[derive(Debug)]
pub struct CompositeProcessor {
    processors: AHashMap<String, Arc<StateProcessor>>,
}

impl CompositeProcessor {
    /// Build the routing table
    ///
    /// # Errors
    /// If a state is blank, reserved or repeated, or there is no root
    /// processor
    pub fn new(processors: impl IntoIterator<Item = StateProcessor>) -> Result<Self, ConfigError> {
        let mut table = AHashMap::new();

        for processor in processors {
            let name = processor.state().to_string();
            if name.trim().is_empty() {
                return Err(ConfigError::MissingState);
            }
            if name == state::GHOST {
                return Err(ConfigError::ReservedState(name));
            }
            if table.contains_key(&name) {
                return Err(ConfigError::DuplicateState(name));
            }
            table.insert(name, Arc::new(processor));
        }

        if !table.contains_key(state::ROOT) {
            return Err(ConfigError::MissingRootProcessor(state::ROOT.to_string()));
        }
        if !table.contains_key(state::ERROR) {
            internal!(
                level = WARN,
                "No processor configured for the '{}' state; failing mails will reach no stage",
                state::ERROR
            );
        }

        Ok(Self { processors: table })
    }

    #[must_use]
    pub fn processor(&self, state: &str) -> Option<&Arc<StateProcessor>> {
        self.processors.get(state)
    }

    /// Configured states, sorted
    #[must_use]
    pub fn states(&self) -> Vec<&str> {
        let mut states = self.processors.keys().map(String::as_str).collect::<Vec<_>>();
        states.sort_unstable();
        states
    }

    /// Attach `listener` to every processor
    pub fn add_listener(&self, listener: &Arc<dyn ProcessorListener>) {
        for processor in self.processors.values() {
            processor.add_listener(Arc::clone(listener));
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ProcessorListener>) {
        for processor in self.processors.values() {
            processor.remove_listener(listener);
        }
    }

    /// Dispatch `reference` by its mail's state
    ///
    /// Ghosted mails are disposed without reaching a processor.
    ///
    /// # Errors
    /// If no processor handles the mail's state, or processing propagated a
    /// failure
    pub fn route(&self, reference: ProcessingReference) -> Result<(), PipelineError> {
        let mail = reference.mail();
        if mail.is_ghost() {
            reference.dispose();
            return Ok(());
        }

        let Some(processor) = self.processors.get(mail.state()) else {
            let error = PipelineError::UnknownState {
                state: mail.state().to_string(),
                mail: mail.name().to_string(),
            };
            tracing::error!(target: "mailroom::pipeline", %error, "Unable to route mail");
            reference.abandon();
            return Err(error);
        };

        processor.process(reference, self)
    }

    /// Start a new lineage for `mail` and return a handle on its end
    ///
    /// # Errors
    /// See [`CompositeProcessor::route`]
    pub fn submit(&self, mail: Mail) -> Result<Completion, PipelineError> {
        let reference = ProcessingReference::new(mail);
        let completion = reference.completion();
        self.route(reference)?;
        Ok(completion)
    }

    /// Tear down every matcher and mailet
    pub fn destroy(&self) {
        for (state, processor) in &self.processors {
            internal!(level = DEBUG, "Destroying processor {state}");
            processor.destroy();
        }
    }
}

impl MailProcessor for CompositeProcessor {
    fn service(&self, mail: Mail) -> Result<(), PipelineError> {
        self.route(ProcessingReference::new(mail))
    }
}
