use ahash::AHashMap;

use crate::{
    error::{ConfigError, MailetError, MatcherError},
    mailet::{Mailet, MailetConfig},
    mailets,
    matcher::{Matcher, MatcherConfig},
    matchers::{self, CompositeMatcher, Operator},
};

type MatcherFactory =
    Box<dyn Fn(&MatcherConfig) -> Result<Box<dyn Matcher>, MatcherError> + Send + Sync>;
type CompositeFactory = Box<dyn Fn(&str, Vec<Box<dyn Matcher>>) -> Box<dyn Matcher> + Send + Sync>;
type MailetFactory =
    Box<dyn Fn(&MailetConfig) -> Result<Box<dyn Mailet>, MailetError> + Send + Sync>;

/// Resolves matcher and mailet names from configuration to factories
///
/// Built once at startup; [`Registry::with_defaults`] knows every matcher
/// and mailet shipped with the pipeline.
#[derive(Default)]
pub struct Registry {
    matchers: AHashMap<String, MatcherFactory>,
    composites: AHashMap<String, CompositeFactory>,
    mailets: AHashMap<String, MailetFactory>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut matchers = self.matchers.keys().collect::<Vec<_>>();
        matchers.sort();
        let mut composites = self.composites.keys().collect::<Vec<_>>();
        composites.sort();
        let mut mailets = self.mailets.keys().collect::<Vec<_>>();
        mailets.sort();

        f.debug_struct("Registry")
            .field("matchers", &matchers)
            .field("composites", &composites)
            .field("mailets", &mailets)
            .finish()
    }
}

fn boxed<M: Matcher + 'static>(matcher: M) -> Box<dyn Matcher> {
    Box::new(matcher)
}

fn boxed_mailet<M: Mailet + 'static>(mailet: M) -> Box<dyn Mailet> {
    Box::new(mailet)
}

impl Registry {
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::default();

        registry.register_matcher("All", |config| Ok(boxed(matchers::All::new(config))));
        registry.register_matcher("RecipientIs", |config| {
            matchers::RecipientIs::new(config).map(boxed)
        });
        registry.register_matcher("SenderIs", |config| matchers::SenderIs::new(config).map(boxed));
        registry.register_matcher("SenderIsNull", |config| {
            Ok(boxed(matchers::SenderIsNull::new(config)))
        });
        registry.register_matcher("HostIs", |config| matchers::HostIs::new(config).map(boxed));
        registry.register_matcher("HasAttribute", |config| {
            matchers::HasAttribute::new(config).map(boxed)
        });
        registry.register_matcher("HasHeader", |config| matchers::HasHeader::new(config).map(boxed));
        registry.register_matcher("SizeGreaterThan", |config| {
            matchers::SizeGreaterThan::new(config).map(boxed)
        });

        for operator in [Operator::And, Operator::Or, Operator::Not, Operator::Xor] {
            registry.register_composite(operator.to_string(), move |name, children| {
                boxed(CompositeMatcher::new(name, operator, children))
            });
        }

        registry.register_mailet("Null", |config| Ok(boxed_mailet(mailets::Null::new(config))));
        registry.register_mailet("ToProcessor", |config| {
            mailets::ToProcessor::new(config).map(boxed_mailet)
        });
        registry.register_mailet("SetMailAttribute", |config| {
            mailets::SetMailAttribute::new(config).map(boxed_mailet)
        });
        registry.register_mailet("RemoveMailAttribute", |config| {
            mailets::RemoveMailAttribute::new(config).map(boxed_mailet)
        });
        registry.register_mailet("AddHeader", |config| {
            mailets::AddHeader::new(config).map(boxed_mailet)
        });
        registry.register_mailet("LogMessage", |config| {
            mailets::LogMessage::new(config).map(boxed_mailet)
        });
        registry.register_mailet("Forward", |config| {
            mailets::Forward::new(config).map(boxed_mailet)
        });

        registry
    }

    pub fn register_matcher<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&MatcherConfig) -> Result<Box<dyn Matcher>, MatcherError> + Send + Sync + 'static,
    {
        self.matchers.insert(name.into(), Box::new(factory));
    }

    pub fn register_composite<F>(&mut self, operator: impl Into<String>, factory: F)
    where
        F: Fn(&str, Vec<Box<dyn Matcher>>) -> Box<dyn Matcher> + Send + Sync + 'static,
    {
        self.composites.insert(operator.into(), Box::new(factory));
    }

    pub fn register_mailet<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&MailetConfig) -> Result<Box<dyn Mailet>, MailetError> + Send + Sync + 'static,
    {
        self.mailets.insert(name.into(), Box::new(factory));
    }

    #[must_use]
    pub fn is_composite(&self, operator: &str) -> bool {
        self.composites.contains_key(operator)
    }

    /// # Errors
    /// If the matcher is unknown or rejects its condition
    pub fn create_matcher(&self, config: &MatcherConfig) -> Result<Box<dyn Matcher>, ConfigError> {
        if self.is_composite(config.name()) {
            return Err(ConfigError::MissingChildren(config.name().to_string()));
        }

        let factory = self
            .matchers
            .get(config.name())
            .ok_or_else(|| ConfigError::UnknownMatcher(config.name().to_string()))?;

        factory(config).map_err(|source| ConfigError::Matcher {
            name: config.display_name(),
            source,
        })
    }

    /// # Errors
    /// If `operator` does not name a composite matcher
    pub fn create_composite(
        &self,
        operator: &str,
        name: &str,
        children: Vec<Box<dyn Matcher>>,
    ) -> Result<Box<dyn Matcher>, ConfigError> {
        match self.composites.get(operator) {
            Some(factory) => Ok(factory(name, children)),
            None if self.matchers.contains_key(operator) => {
                Err(ConfigError::NotComposite(operator.to_string()))
            }
            None => Err(ConfigError::UnknownMatcher(operator.to_string())),
        }
    }

    /// # Errors
    /// If the mailet is unknown or rejects its parameters
    pub fn create_mailet(&self, config: &MailetConfig) -> Result<Box<dyn Mailet>, ConfigError> {
        let factory = self
            .mailets
            .get(config.name())
            .ok_or_else(|| ConfigError::UnknownMailet(config.name().to_string()))?;

        factory(config).map_err(|source| ConfigError::Mailet {
            name: config.name().to_string(),
            source,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use ahash::AHashMap;

    use super::*;
    use crate::mailet::DetachedContext;

    #[test]
    fn test_defaults_resolve() {
        let registry = Registry::with_defaults();
        let matcher = registry
            .create_matcher(&MatcherConfig::parse("HostIs=example.com"))
            .unwrap();
        assert_eq!(matcher.name(), "HostIs=example.com");

        let mailet = registry
            .create_mailet(&MailetConfig::new(
                "Null",
                AHashMap::new(),
                Arc::new(DetachedContext),
            ))
            .unwrap();
        assert_eq!(mailet.name(), "Null");
    }

    #[test]
    fn test_unknown_names() {
        let registry = Registry::with_defaults();
        assert!(matches!(
            registry.create_matcher(&MatcherConfig::parse("Bogus")),
            Err(ConfigError::UnknownMatcher(name)) if name == "Bogus"
        ));
        assert!(matches!(
            registry.create_matcher(&MatcherConfig::parse("And")),
            Err(ConfigError::MissingChildren(_))
        ));
        assert!(matches!(
            registry.create_composite("HostIs", "x", Vec::new()),
            Err(ConfigError::NotComposite(_))
        ));
        assert!(matches!(
            registry.create_mailet(&MailetConfig::new(
                "Bogus",
                AHashMap::new(),
                Arc::new(DetachedContext)
            )),
            Err(ConfigError::UnknownMailet(_))
        ));
    }

    #[test]
    fn test_factory_errors_carry_name() {
        let registry = Registry::with_defaults();
        let error = registry
            .create_matcher(&MatcherConfig::parse("SizeGreaterThan=huge"))
            .err()
            .unwrap();
        assert!(error.to_string().starts_with("Unable to create matcher SizeGreaterThan=huge"));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = Registry::default();
        registry.register_matcher("Nothing", |config| {
            Ok(Box::new(crate::matchers::All::new(config)) as Box<dyn Matcher>)
        });
        assert!(registry.create_matcher(&MatcherConfig::parse("Nothing")).is_ok());
        assert!(registry.create_matcher(&MatcherConfig::parse("All")).is_err());
    }
}
