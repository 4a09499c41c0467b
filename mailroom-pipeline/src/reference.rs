use std::{
    fmt::{self, Debug},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use mailroom_common::{Mail, MailAddress};
use parking_lot::Mutex;
use tokio::sync::watch;

/// How a lineage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every copy was disposed or completed
    Completed,
    /// At least one copy was dropped by a failure
    Abandoned,
}

/// Runs once when the last copy of a lineage is released
pub type ReleaseHook = Box<dyn FnOnce(&str, Outcome) -> anyhow::Result<()> + Send>;

/// State shared by every copy split from one inbound mail
struct Lineage {
    name: String,
    in_flight: AtomicUsize,
    abandoned: AtomicBool,
    hook: Mutex<Option<ReleaseHook>>,
    outcome: watch::Sender<Option<Outcome>>,
}

impl Lineage {
    fn acquire(&self) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement the live count, finishing the lineage when it hits zero
    fn release(&self, abandoned: bool) -> bool {
        if abandoned {
            self.abandoned.store(true, Ordering::Release);
        }

        match self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                count.checked_sub(1)
            }) {
            Ok(1) => {
                self.finish();
                true
            }
            Ok(_) => false,
            Err(_) => {
                tracing::error!(
                    target: "mailroom::pipeline",
                    mail = %self.name,
                    "Lineage released more copies than it holds"
                );
                false
            }
        }
    }

    fn finish(&self) {
        let outcome = if self.abandoned.load(Ordering::Acquire) {
            Outcome::Abandoned
        } else {
            Outcome::Completed
        };

        if let Some(hook) = self.hook.lock().take()
            && let Err(err) = hook(&self.name, outcome)
        {
            tracing::error!(
                target: "mailroom::pipeline",
                mail = %self.name,
                error = %err,
                "Release hook failed"
            );
        }

        self.outcome.send_replace(Some(outcome));
    }
}

/// One live copy's claim on its lineage
///
/// Dropping a claim that was never released counts as an abandoned copy.
struct Claim {
    lineage: Arc<Lineage>,
    released: bool,
}

impl Claim {
    fn new(lineage: Arc<Lineage>) -> Self {
        Self {
            lineage,
            released: false,
        }
    }

    fn release(mut self, abandoned: bool) -> bool {
        self.released = true;
        self.lineage.release(abandoned)
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                target: "mailroom::pipeline",
                mail = %self.lineage.name,
                "Mail copy dropped without being completed"
            );
            self.lineage.release(true);
        }
    }
}

/// A mail plus its membership in a lineage of split copies
///
/// A fresh reference starts a lineage with one live copy. The lineage is
/// finished once every copy has been disposed, completed or abandoned.
pub struct ProcessingReference {
    mail: Mail,
    claim: Claim,
}

impl Debug for ProcessingReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingReference")
            .field("mail", &self.mail.name())
            .field("state", &self.mail.state())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

impl ProcessingReference {
    #[must_use]
    pub fn new(mail: Mail) -> Self {
        Self::start(mail, None)
    }

    /// Start a lineage whose end runs `hook`
    #[must_use]
    pub fn with_release_hook(mail: Mail, hook: ReleaseHook) -> Self {
        Self::start(mail, Some(hook))
    }

    fn start(mail: Mail, hook: Option<ReleaseHook>) -> Self {
        let (outcome, _) = watch::channel(None);
        let lineage = Arc::new(Lineage {
            name: mail.name().to_string(),
            in_flight: AtomicUsize::new(1),
            abandoned: AtomicBool::new(false),
            hook: Mutex::new(hook),
            outcome,
        });

        Self {
            mail,
            claim: Claim::new(lineage),
        }
    }

    #[must_use]
    pub const fn mail(&self) -> &Mail {
        &self.mail
    }

    pub const fn mail_mut(&mut self) -> &mut Mail {
        &mut self.mail
    }

    /// Live copies in this lineage, including this one
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.claim.lineage.in_flight.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn completion(&self) -> Completion {
        Completion {
            receiver: self.claim.lineage.outcome.subscribe(),
        }
    }

    /// Move `addresses` into a new copy of the same lineage
    ///
    /// The new copy keeps this mail's name and state; the addresses are
    /// removed from this copy's recipients.
    pub fn split_for_addresses(&mut self, addresses: &[MailAddress]) -> Self {
        let copy = self.mail.duplicate_for(addresses.to_vec());
        self.mail.remove_recipients(addresses);
        self.claim.lineage.acquire();

        Self {
            mail: copy,
            claim: Claim::new(Arc::clone(&self.claim.lineage)),
        }
    }

    /// Release this copy's resources and leave the lineage
    ///
    /// Returns `true` if this was the last live copy.
    pub fn dispose(self) -> bool {
        let Self { mut mail, claim } = self;
        mail.dispose();
        claim.release(false)
    }

    /// Leave the lineage without touching the mail's resources
    ///
    /// Returns `true` if this was the last live copy.
    pub fn complete(self) -> bool {
        self.claim.release(false)
    }

    /// Leave the lineage and mark it as failed
    pub fn abandon(self) -> bool {
        self.claim.release(true)
    }

    /// Give the mail to `f`, then settle this copy by its result
    ///
    /// This copy completes when `f` succeeds and is abandoned when it fails.
    ///
    /// # Errors
    /// Whatever `f` returns
    pub fn hand_off<T, E>(self, f: impl FnOnce(Mail) -> Result<T, E>) -> Result<T, E> {
        let Self { mail, claim } = self;
        let result = f(mail);
        claim.release(result.is_err());
        result
    }
}

/// Observes the end of a lineage
#[derive(Debug, Clone)]
pub struct Completion {
    receiver: watch::Receiver<Option<Outcome>>,
}

impl Completion {
    /// The outcome, if the lineage has finished
    #[must_use]
    pub fn outcome(&self) -> Option<Outcome> {
        *self.receiver.borrow()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.outcome().is_some()
    }

    /// Wait for the lineage to finish
    pub async fn wait(mut self) -> Outcome {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => (*outcome).unwrap_or(Outcome::Abandoned),
            Err(_) => Outcome::Abandoned,
        }
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

    fn mail() -> Mail {
        Mail::builder("lineage")
            .recipients([address("a@x.com"), address("b@x.com"), address("c@x.com")])
            .message("Subject: hi\r\n\r\nbody\r\n")
            .build()
    }

    #[test]
    fn test_split_then_dispose_is_zero_sum() {
        let mut original = ProcessingReference::new(mail());
        let completion = original.completion();

        let first = original.split_for_addresses(&[address("a@x.com")]);
        let second = original.split_for_addresses(&[address("b@x.com")]);
        assert_eq!(original.in_flight(), 3);
        assert_eq!(original.mail().recipients(), &[address("c@x.com")][..]);
        assert_eq!(first.mail().name(), original.mail().name());

        assert!(!first.dispose());
        assert!(!second.complete());
        assert_eq!(completion.outcome(), None);
        assert!(original.dispose());
        assert_eq!(completion.outcome(), Some(Outcome::Completed));
    }

    #[test]
    fn test_split_copies_share_body() {
        let mut original = ProcessingReference::new(mail());
        let copy = original.split_for_addresses(&[address("a@x.com")]);
        assert_eq!(original.mail().message().unwrap().holders(), 2);

        copy.dispose();
        assert_eq!(original.mail().message().unwrap().holders(), 1);
        original.complete();
    }

    #[test]
    fn test_drop_marks_lineage_abandoned() {
        let mut original = ProcessingReference::new(mail());
        let completion = original.completion();
        let copy = original.split_for_addresses(&[address("a@x.com")]);

        drop(copy);
        assert_eq!(original.in_flight(), 1);
        assert!(original.complete());
        assert_eq!(completion.outcome(), Some(Outcome::Abandoned));
    }

    #[test]
    fn test_release_hook_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let mut original = ProcessingReference::with_release_hook(
            mail(),
            Box::new(move |name, outcome| {
                assert_eq!(name, "lineage");
                assert_eq!(outcome, Outcome::Completed);
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        );

        let copy = original.split_for_addresses(&[address("a@x.com")]);
        copy.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        original.dispose();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_release_hook_is_contained() {
        let reference = ProcessingReference::with_release_hook(
            mail(),
            Box::new(|_, _| Err(anyhow::anyhow!("storage unavailable"))),
        );
        let completion = reference.completion();

        assert!(reference.dispose());
        assert_eq!(completion.outcome(), Some(Outcome::Completed));
    }

    #[test]
    fn test_hand_off_settles_by_result() {
        let reference = ProcessingReference::new(mail());
        let completion = reference.completion();
        let result: Result<(), &str> = reference.hand_off(|_| Err("no route"));
        assert!(result.is_err());
        assert_eq!(completion.outcome(), Some(Outcome::Abandoned));

        let reference = ProcessingReference::new(mail());
        let completion = reference.completion();
        let name: Result<String, ()> = reference.hand_off(|mail| Ok(mail.name().to_string()));
        assert_eq!(name.unwrap(), "lineage");
        assert_eq!(completion.outcome(), Some(Outcome::Completed));
    }

    #[tokio::test]
    async fn test_completion_wait() {
        let reference = ProcessingReference::new(mail());
        let completion = reference.completion();

        let waiter = tokio::spawn(completion.wait());
        tokio::task::yield_now().await;
        reference.dispose();

        assert_eq!(waiter.await.unwrap(), Outcome::Completed);
    }

    #[test]
    fn test_concurrent_release() {
        let mut original = ProcessingReference::new(mail());
        let completion = original.completion();
        let copies = (0..16)
            .map(|_| original.split_for_addresses(&[]))
            .collect::<Vec<_>>();

        let finals = std::thread::scope(|scope| {
            copies
                .into_iter()
                .map(|copy| scope.spawn(move || copy.dispose()))
                .collect::<Vec<_>>()
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|last| *last)
                .count()
        });

        assert_eq!(finals, 0);
        assert!(original.dispose());
        assert_eq!(completion.outcome(), Some(Outcome::Completed));
    }
}
