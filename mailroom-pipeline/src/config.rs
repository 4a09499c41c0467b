use std::{collections::BTreeMap, sync::Arc};

use ahash::AHashSet;
use mailroom_common::{internal, state};
use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    mailet::{MailetConfig, MailetContext},
    matcher::{Matcher, MatcherConfig},
    matchers::MatcherInverter,
    pair::{MailetPolicy, MatcherMailetPair, MatcherPolicy},
    processor::StateProcessor,
    registry::Registry,
    router::CompositeProcessor,
};

const fn default_matcher() -> &'static str {
    "All"
}

/// Every processor of a pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub processors: Vec<ProcessorConfig>,
}

/// The stages bound to one state
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub state: String,
    /// Named composite matchers, usable by later composites and by any pair
    #[serde(default)]
    pub matchers: Vec<CompositeMatcherConfig>,
    #[serde(default)]
    pub mailets: Vec<PairConfig>,
}

/// `And`, `Or`, `Not` or `Xor` over child matcher declarations
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompositeMatcherConfig {
    pub name: String,
    pub operator: String,
    #[serde(default)]
    pub matchers: Vec<String>,
}

/// One matcher/mailet stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PairConfig {
    pub mailet: String,
    #[serde(default, rename = "match")]
    pub matcher: Option<String>,
    #[serde(default)]
    pub notmatch: Option<String>,
    #[serde(default)]
    pub on_match_exception: Option<String>,
    #[serde(default)]
    pub on_mailet_exception: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl PipelineConfig {
    /// Build the router for every configured processor
    ///
    /// # Errors
    /// The first invalid processor, stage or routing table problem
    pub fn build(
        &self,
        registry: &Registry,
        context: &Arc<dyn MailetContext>,
    ) -> Result<CompositeProcessor, ConfigError> {
        let processors = self
            .processors
            .iter()
            .map(|processor| processor.build(registry, context))
            .collect::<Result<Vec<_>, _>>()?;

        CompositeProcessor::new(processors)
    }
}

impl ProcessorConfig {
    /// # Errors
    /// If the state is missing or reserved, or a stage cannot be built
    pub fn build(
        &self,
        registry: &Registry,
        context: &Arc<dyn MailetContext>,
    ) -> Result<StateProcessor, ConfigError> {
        if self.state.trim().is_empty() {
            return Err(ConfigError::MissingState);
        }
        if self.state == state::GHOST {
            return Err(ConfigError::ReservedState(self.state.clone()));
        }

        let mut names = AHashSet::new();
        for composite in &self.matchers {
            if !names.insert(composite.name.as_str()) {
                return Err(ConfigError::DuplicateCompositeMatcher {
                    state: self.state.clone(),
                    name: composite.name.clone(),
                });
            }
        }

        let pairs = self
            .mailets
            .iter()
            .map(|pair| self.build_pair(pair, registry, context))
            .collect::<Result<Vec<_>, _>>()?;

        internal!(
            level = DEBUG,
            "Built processor {} with {} stages",
            self.state,
            pairs.len()
        );

        Ok(StateProcessor::new(self.state.clone(), pairs))
    }

    fn build_pair(
        &self,
        pair: &PairConfig,
        registry: &Registry,
        context: &Arc<dyn MailetContext>,
    ) -> Result<MatcherMailetPair, ConfigError> {
        let matcher = match (&pair.matcher, &pair.notmatch) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::MatchAndNotMatch {
                    state: self.state.clone(),
                    mailet: pair.mailet.clone(),
                });
            }
            (Some(declaration), None) => {
                Self::resolve(declaration, &self.matchers, registry)?
            }
            (None, Some(declaration)) => Box::new(MatcherInverter::new(Self::resolve(
                declaration,
                &self.matchers,
                registry,
            )?)),
            (None, None) => Self::resolve(default_matcher(), &self.matchers, registry)?,
        };

        let params = pair
            .params
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let mailet =
            registry.create_mailet(&MailetConfig::new(&pair.mailet, params, Arc::clone(context)))?;

        Ok(MatcherMailetPair::new(matcher, mailet)
            .on_matcher_exception(MatcherPolicy::parse(pair.on_match_exception.as_deref()))
            .on_mailet_exception(MailetPolicy::parse(pair.on_mailet_exception.as_deref())))
    }

    /// Build the matcher for `declaration`
    ///
    /// A bare name found in `composites` builds that composite, whose own
    /// children may only refer to composites declared before it.
    fn resolve(
        declaration: &str,
        composites: &[CompositeMatcherConfig],
        registry: &Registry,
    ) -> Result<Box<dyn Matcher>, ConfigError> {
        let config = MatcherConfig::parse(declaration);

        if config.condition().is_none()
            && let Some(position) = composites
                .iter()
                .position(|composite| composite.name == config.name())
        {
            let composite = &composites[position];
            let earlier = &composites[..position];
            let children = composite
                .matchers
                .iter()
                .map(|child| Self::resolve(child, earlier, registry))
                .collect::<Result<Vec<_>, _>>()?;

            return registry.create_composite(&composite.operator, &composite.name, children);
        }

        registry.create_matcher(&config)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mailet::DetachedContext;

    fn context() -> Arc<dyn MailetContext> {
        Arc::new(DetachedContext)
    }

    fn parse(config: &str) -> PipelineConfig {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(config)
            .unwrap()
    }

    const SAMPLE: &str = r#"(
        processors: [
            (
                state: "root",
                matchers: [
                    (name: "Local", operator: "Or", matchers: ["HostIs=local.com", "HostIs=local.org"]),
                    (name: "LocalOrBounce", operator: "Or", matchers: ["Local", "SenderIsNull"]),
                ],
                mailets: [
                    (mailet: "SetMailAttribute", match: "Local", params: { "local": "true" }),
                    (mailet: "ToProcessor", notmatch: "LocalOrBounce", params: { "processor": "transport" }),
                    (mailet: "ToProcessor", params: { "processor": "local-delivery" }, on_mailet_exception: "ignore"),
                ],
            ),
            (state: "transport", mailets: [(mailet: "Null")]),
            (state: "local-delivery", mailets: [(mailet: "Null")]),
            (state: "error", mailets: [(mailet: "LogMessage", params: { "body": "false" }), (mailet: "Null")]),
        ],
    )"#;

    #[test]
    fn test_parse_sample() {
        let config = parse(SAMPLE);
        assert_eq!(config.processors.len(), 4);

        let root = &config.processors[0];
        assert_eq!(root.mailets[0].matcher.as_deref(), Some("Local"));
        assert_eq!(root.mailets[1].notmatch.as_deref(), Some("LocalOrBounce"));
        assert_eq!(root.mailets[2].on_mailet_exception.as_deref(), Some("ignore"));
    }

    #[test]
    fn test_build_sample() {
        let router = parse(SAMPLE)
            .build(&Registry::with_defaults(), &context())
            .unwrap();

        assert_eq!(router.states(), vec!["error", "local-delivery", "root", "transport"]);

        let root = router.processor("root").unwrap();
        let matchers = root.matchers().map(|matcher| matcher.info()).collect::<Vec<_>>();
        assert_eq!(
            matchers,
            vec![
                "Local:Or(HostIs=local.com, HostIs=local.org)",
                "!LocalOrBounce:Or(Local:Or(HostIs=local.com, HostIs=local.org), SenderIsNull)",
                "All",
                "All",
            ]
        );
        assert_eq!(root.mailets().count(), 4);
    }

    #[test]
    fn test_match_and_notmatch_rejected() {
        let config = parse(
            r#"(processors: [(state: "root", mailets: [(mailet: "Null", match: "All", notmatch: "All")])])"#,
        );
        assert!(matches!(
            config.build(&Registry::with_defaults(), &context()),
            Err(ConfigError::MatchAndNotMatch { .. })
        ));
    }

    #[test]
    fn test_state_validation() {
        let registry = Registry::with_defaults();

        let missing = parse(r#"(processors: [(mailets: [])])"#);
        assert!(matches!(missing.build(&registry, &context()), Err(ConfigError::MissingState)));

        let ghost = parse(r#"(processors: [(state: "ghost")])"#);
        assert!(matches!(ghost.build(&registry, &context()), Err(ConfigError::ReservedState(_))));

        let duplicate = parse(r#"(processors: [(state: "root"), (state: "root")])"#);
        assert!(matches!(
            duplicate.build(&registry, &context()),
            Err(ConfigError::DuplicateState(_))
        ));

        let rootless = parse(r#"(processors: [(state: "transport")])"#);
        assert!(matches!(
            rootless.build(&registry, &context()),
            Err(ConfigError::MissingRootProcessor(_))
        ));
    }

    #[test]
    fn test_composite_names_are_unique_and_ordered() {
        let registry = Registry::with_defaults();

        let duplicate = parse(
            r#"(processors: [(state: "root", matchers: [
                (name: "X", operator: "Or", matchers: ["All"]),
                (name: "X", operator: "And", matchers: ["All"]),
            ])])"#,
        );
        assert!(matches!(
            duplicate.build(&registry, &context()),
            Err(ConfigError::DuplicateCompositeMatcher { .. })
        ));

        let forward_reference = parse(
            r#"(processors: [(state: "root", matchers: [
                (name: "A", operator: "Or", matchers: ["B"]),
                (name: "B", operator: "Or", matchers: ["All"]),
            ], mailets: [(mailet: "Null", match: "A")])])"#,
        );
        assert!(matches!(
            forward_reference.build(&registry, &context()),
            Err(ConfigError::UnknownMatcher(name)) if name == "B"
        ));
    }
}
