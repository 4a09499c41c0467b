use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use mailroom_common::MailAddress;
use parking_lot::RwLock;

use crate::{
    error::{MailetError, MatcherError},
    mailet::Mailet,
    matcher::Matcher,
};

/// Observes every matcher and mailet invocation of a processor
pub trait ProcessorListener: Send + Sync {
    #[allow(unused_variables)]
    fn after_matcher(
        &self,
        matcher: &dyn Matcher,
        mail: &str,
        recipients: &[MailAddress],
        matched: &[MailAddress],
        elapsed: Duration,
        error: Option<&MatcherError>,
    ) {
    }

    #[allow(unused_variables)]
    fn after_mailet(
        &self,
        mailet: &dyn Mailet,
        mail: &str,
        state: &str,
        elapsed: Duration,
        error: Option<&MailetError>,
    ) {
    }
}

/// The listeners attached to a processor
#[derive(Default)]
pub struct Listeners {
    inner: RwLock<Vec<Arc<dyn ProcessorListener>>>,
}

impl Listeners {
    pub fn add(&self, listener: Arc<dyn ProcessorListener>) {
        self.inner.write().push(listener);
    }

    /// Detach `listener`; returns `false` if it was not attached
    pub fn remove(&self, listener: &Arc<dyn ProcessorListener>) -> bool {
        let mut inner = self.inner.write();
        let before = inner.len();
        inner.retain(|attached| !Arc::ptr_eq(attached, listener));
        inner.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// A copy of the current list, so callbacks run without the lock held
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn ProcessorListener>> {
        self.inner.read().clone()
    }
}

/// Logs every stage, warning when one is slower than `threshold`
#[derive(Debug, Clone, Copy)]
pub struct LoggingListener {
    threshold: Duration,
}

impl Default for LoggingListener {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

impl LoggingListener {
    #[must_use]
    pub const fn new(threshold: Duration) -> Self {
        Self { threshold }
    }
}

impl ProcessorListener for LoggingListener {
    fn after_matcher(
        &self,
        matcher: &dyn Matcher,
        mail: &str,
        recipients: &[MailAddress],
        matched: &[MailAddress],
        elapsed: Duration,
        error: Option<&MatcherError>,
    ) {
        if let Some(error) = error {
            tracing::error!(
                target: "mailroom::pipeline",
                matcher = %matcher.info(),
                mail,
                ?elapsed,
                %error,
                "Matcher failed"
            );
        } else if elapsed > self.threshold {
            tracing::warn!(
                target: "mailroom::pipeline",
                matcher = %matcher.info(),
                mail,
                ?elapsed,
                "Slow matcher"
            );
        } else {
            tracing::debug!(
                target: "mailroom::pipeline",
                matcher = %matcher.info(),
                mail,
                recipients = recipients.len(),
                matched = matched.len(),
                ?elapsed,
                "Matcher ran"
            );
        }
    }

    fn after_mailet(
        &self,
        mailet: &dyn Mailet,
        mail: &str,
        state: &str,
        elapsed: Duration,
        error: Option<&MailetError>,
    ) {
        if let Some(error) = error {
            tracing::error!(
                target: "mailroom::pipeline",
                mailet = %mailet.info(),
                mail,
                ?elapsed,
                %error,
                "Mailet failed"
            );
        } else if elapsed > self.threshold {
            tracing::warn!(
                target: "mailroom::pipeline",
                mailet = %mailet.info(),
                mail,
                ?elapsed,
                "Slow mailet"
            );
        } else {
            tracing::debug!(
                target: "mailroom::pipeline",
                mailet = %mailet.info(),
                mail,
                state,
                ?elapsed,
                "Mailet ran"
            );
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Matcher,
    Mailet,
}

/// Aggregated timings of one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStatistics {
    pub invocations: u64,
    pub errors: u64,
    pub total: Duration,
    pub max: Duration,
}

impl StageStatistics {
    fn record(&mut self, elapsed: Duration, failed: bool) {
        self.invocations += 1;
        if failed {
            self.errors += 1;
        }
        self.total += elapsed;
        self.max = self.max.max(elapsed);
    }

    #[must_use]
    pub fn mean(&self) -> Duration {
        u32::try_from(self.invocations)
            .ok()
            .filter(|count| *count > 0)
            .map_or(Duration::ZERO, |count| self.total / count)
    }
}

/// Collects per-stage counters across every mail
#[derive(Debug, Default)]
pub struct StatisticsListener {
    stages: DashMap<(Stage, String), StageStatistics>,
}

impl StatisticsListener {
    #[must_use]
    pub fn get(&self, stage: Stage, name: &str) -> Option<StageStatistics> {
        self.stages
            .get(&(stage, name.to_string()))
            .map(|entry| *entry.value())
    }

    /// Every stage seen so far, sorted by name
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Stage, String, StageStatistics)> {
        let mut stages = self
            .stages
            .iter()
            .map(|entry| {
                let (stage, name) = entry.key();
                (*stage, name.clone(), *entry.value())
            })
            .collect::<Vec<_>>();
        stages.sort_by(|a, b| a.1.cmp(&b.1));
        stages
    }

    fn record(&self, stage: Stage, name: String, elapsed: Duration, failed: bool) {
        self.stages
            .entry((stage, name))
            .or_default()
            .record(elapsed, failed);
    }
}

impl ProcessorListener for StatisticsListener {
    fn after_matcher(
        &self,
        matcher: &dyn Matcher,
        _mail: &str,
        _recipients: &[MailAddress],
        _matched: &[MailAddress],
        elapsed: Duration,
        error: Option<&MatcherError>,
    ) {
        self.record(Stage::Matcher, matcher.info(), elapsed, error.is_some());
    }

    fn after_mailet(
        &self,
        mailet: &dyn Mailet,
        _mail: &str,
        _state: &str,
        elapsed: Duration,
        error: Option<&MailetError>,
    ) {
        self.record(Stage::Mailet, mailet.info(), elapsed, error.is_some());
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::mailets::Null;

    #[test]
    fn test_statistics_accumulate() {
        let statistics = StatisticsListener::default();
        let mailet = Null::default();

        statistics.after_mailet(&mailet, "m1", "ghost", Duration::from_millis(4), None);
        statistics.after_mailet(
            &mailet,
            "m2",
            "error",
            Duration::from_millis(8),
            Some(&MailetError::Failed("x".to_string())),
        );

        let stats = statistics.get(Stage::Mailet, "Null").unwrap_or_default();
        assert_eq!(stats.invocations, 2);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.max, Duration::from_millis(8));
        assert_eq!(stats.mean(), Duration::from_millis(6));
        assert!(statistics.get(Stage::Matcher, "Null").is_none());
    }

    #[test]
    fn test_listeners_add_remove() {
        let listeners = Listeners::default();
        let first: Arc<dyn ProcessorListener> = Arc::new(LoggingListener::default());
        let second: Arc<dyn ProcessorListener> = Arc::new(StatisticsListener::default());

        listeners.add(Arc::clone(&first));
        listeners.add(Arc::clone(&second));
        assert_eq!(listeners.len(), 2);

        assert!(listeners.remove(&first));
        assert!(!listeners.remove(&first));
        assert_eq!(listeners.snapshot().len(), 1);
    }
}
