use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::credential::{Credential, CredentialStore};
use crate::pr::{FetchError, Fetcher, PrStats, Subject};

type Outcome = Result<PrStats, FetchError>;

/// What the cache knows about one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Pending,
    Resolved(PrStats),
    Failed(FetchError),
}

enum Slot {
    /// A fetch is in flight; joiners wait for the leader to publish.
    Pending(watch::Receiver<Option<Outcome>>),
    Resolved(PrStats),
    Failed(FetchError),
}

enum Claim {
    Done(Outcome),
    Join(watch::Receiver<Option<Outcome>>),
    Lead(watch::Sender<Option<Outcome>>),
}

/// Process-wide memo of PR statistics, one fetch per subject per session.
///
/// Entries move `Absent -> Pending -> Resolved | Failed` and never go back:
/// there is no expiry and failures are not retried. The `Absent -> Pending`
/// step happens under the lock before the first await, so two callers can
/// never both start a fetch for the same subject.
pub struct SubjectCache {
    fetcher: Arc<dyn Fetcher>,
    credentials: Arc<CredentialStore>,
    slots: Mutex<HashMap<Subject, Slot>>,
}

impl SubjectCache {
    pub fn new(fetcher: Arc<dyn Fetcher>, credentials: Arc<CredentialStore>) -> Self {
        Self {
            fetcher,
            credentials,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Subject, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self, subject: &Subject) -> CacheState {
        match self.slots().get(subject) {
            None => CacheState::Absent,
            Some(Slot::Pending(_)) => CacheState::Pending,
            Some(Slot::Resolved(stats)) => CacheState::Resolved(*stats),
            Some(Slot::Failed(err)) => CacheState::Failed(err.clone()),
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots().len()
    }

    /// Statistics for `subject`, fetching them at most once per session.
    ///
    /// Concurrent callers for the same subject share the first caller's
    /// fetch and all observe its result.
    #[instrument(skip_all, fields(subject = %subject))]
    pub async fn resolve(&self, subject: &Subject, credential: &Credential) -> Outcome {
        let claim = {
            let mut slots = self.slots();
            match slots.get(subject) {
                Some(Slot::Resolved(stats)) => Claim::Done(Ok(*stats)),
                Some(Slot::Failed(err)) => Claim::Done(Err(err.clone())),
                Some(Slot::Pending(receiver)) => Claim::Join(receiver.clone()),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    slots.insert(subject.clone(), Slot::Pending(receiver));
                    Claim::Lead(sender)
                }
            }
        };

        match claim {
            Claim::Done(outcome) => outcome,
            Claim::Join(receiver) => {
                debug!("joining in-flight fetch");
                join(receiver).await
            }
            Claim::Lead(sender) => {
                let outcome = self.fetcher.fetch(subject, credential).await;
                self.settle(subject, &outcome);
                sender.send_replace(Some(outcome.clone()));
                outcome
            }
        }
    }

    /// The outcome of a fetch already requested for `subject`, waiting for it
    /// when still in flight. `None` when nothing was ever requested; never
    /// starts a fetch and needs no credential.
    pub async fn settled(&self, subject: &Subject) -> Option<Outcome> {
        let receiver = match self.slots().get(subject) {
            None => return None,
            Some(Slot::Resolved(stats)) => return Some(Ok(*stats)),
            Some(Slot::Failed(err)) => return Some(Err(err.clone())),
            Some(Slot::Pending(receiver)) => receiver.clone(),
        };
        Some(join(receiver).await)
    }

    fn settle(&self, subject: &Subject, outcome: &Outcome) {
        let slot = match outcome {
            Ok(stats) => {
                debug!(additions = stats.additions, deletions = stats.deletions, files = stats.changed_files, "resolved");
                Slot::Resolved(*stats)
            }
            Err(err) => {
                match err {
                    FetchError::Unauthorized(_) => {
                        self.credentials.invalidate();
                        warn!(subject = %subject, "{err}");
                    }
                    FetchError::NotFound => debug!(subject = %subject, "{err}"),
                    FetchError::Transport(_) | FetchError::Malformed(_) => warn!(subject = %subject, "{err}"),
                }
                Slot::Failed(err.clone())
            }
        };
        self.slots().insert(subject.clone(), slot);
    }
}

async fn join(mut receiver: watch::Receiver<Option<Outcome>>) -> Outcome {
    match receiver.wait_for(Option::is_some).await {
        Ok(published) => published
            .clone()
            .unwrap_or_else(|| Err(FetchError::Transport("fetch abandoned".to_string()))),
        Err(_) => Err(FetchError::Transport("fetch abandoned".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::credential::tests::store_with;
    use async_trait::async_trait;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Answers every fetch with the same outcome, optionally holding each
    /// request until released.
    pub struct ScriptedFetcher {
        pub outcome: Outcome,
        pub calls: AtomicUsize,
        pub gate: Option<Notify>,
        pub fetched: Mutex<Vec<Subject>>,
    }

    impl ScriptedFetcher {
        pub fn answering(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                gate: None,
                fetched: Mutex::new(Vec::new()),
            })
        }

        pub fn gated(outcome: Outcome) -> Arc<Self> {
            Arc::new(Self {
                outcome,
                calls: AtomicUsize::new(0),
                gate: Some(Notify::new()),
                fetched: Mutex::new(Vec::new()),
            })
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        /// How many fetches were issued for `subject`.
        pub fn fetches_for(&self, subject: &Subject) -> usize {
            self.fetched.lock().unwrap().iter().filter(|s| *s == subject).count()
        }

        pub fn release(&self) {
            if let Some(gate) = &self.gate {
                gate.notify_waiters();
            }
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, subject: &Subject, _credential: &Credential) -> Outcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fetched.lock().unwrap().push(subject.clone());
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.outcome.clone()
        }
    }

    pub const STATS: PrStats = PrStats {
        additions: 800,
        deletions: 300,
        changed_files: 15,
    };

    fn subject() -> Subject {
        Subject::new("o", "r", 1)
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_fetch() {
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let cache = SubjectCache::new(fetcher.clone(), store_with(Some("t")));
        let credential = Credential::new("t");
        let s = subject();

        let results = tokio::join!(
            cache.resolve(&s, &credential),
            cache.resolve(&s, &credential),
            cache.resolve(&s, &credential),
            cache.resolve(&s, &credential),
        );
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(results, (Ok(STATS), Ok(STATS), Ok(STATS), Ok(STATS)));
        assert_eq!(cache.state(&s), CacheState::Resolved(STATS));

        assert_eq!(cache.resolve(&s, &credential).await, Ok(STATS));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_state_is_pending_while_in_flight() {
        let fetcher = ScriptedFetcher::gated(Ok(STATS));
        let cache = Arc::new(SubjectCache::new(fetcher.clone(), store_with(Some("t"))));
        assert_eq!(cache.state(&subject()), CacheState::Absent);

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve(&subject(), &Credential::new("t")).await })
        };
        let joiner = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve(&subject(), &Credential::new("t")).await })
        };
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        assert_eq!(cache.state(&subject()), CacheState::Pending);

        fetcher.release();
        assert_eq!(leader.await.unwrap(), Ok(STATS));
        assert_eq!(joiner.await.unwrap(), Ok(STATS));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_clears_credential_and_is_not_retried() {
        let fetcher = ScriptedFetcher::answering(Err(FetchError::Unauthorized(401)));
        let credentials = store_with(Some("expired"));
        let cache = SubjectCache::new(fetcher.clone(), credentials.clone());
        let credential = Credential::new("expired");

        assert_eq!(cache.resolve(&subject(), &credential).await, Err(FetchError::Unauthorized(401)));
        assert!(credentials.current().is_none());
        assert_eq!(cache.state(&subject()), CacheState::Failed(FetchError::Unauthorized(401)));

        assert_eq!(cache.resolve(&subject(), &credential).await, Err(FetchError::Unauthorized(401)));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_not_found_keeps_credential() {
        let fetcher = ScriptedFetcher::answering(Err(FetchError::NotFound));
        let credentials = store_with(Some("t"));
        let cache = SubjectCache::new(fetcher, credentials.clone());
        assert_eq!(cache.resolve(&subject(), &Credential::new("t")).await, Err(FetchError::NotFound));
        assert!(credentials.current().is_some());
    }

    #[tokio::test]
    async fn test_subjects_are_independent() {
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let cache = SubjectCache::new(fetcher.clone(), store_with(Some("t")));
        let credential = Credential::new("t");
        cache.resolve(&Subject::new("o", "r", 1), &credential).await.unwrap();
        cache.resolve(&Subject::new("o", "r", 2), &credential).await.unwrap();
        cache.resolve(&Subject::new("o", "other", 1), &credential).await.unwrap();
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn test_abandoned_leader_leaves_entry_pending() {
        let fetcher = ScriptedFetcher::gated(Ok(STATS));
        let cache = Arc::new(SubjectCache::new(fetcher.clone(), store_with(Some("t"))));
        let credential = Credential::new("t");
        let s = subject();
        {
            let leader = cache.resolve(&s, &credential);
            tokio::pin!(leader);
            assert!(poll_once(leader.as_mut()).await.is_none());
        }
        assert_eq!(cache.state(&subject()), CacheState::Pending);
        assert_eq!(
            cache.resolve(&subject(), &credential).await,
            Err(FetchError::Transport("fetch abandoned".to_string()))
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_settled_never_fetches() {
        let fetcher = ScriptedFetcher::gated(Ok(STATS));
        let cache = Arc::new(SubjectCache::new(fetcher.clone(), store_with(Some("t"))));
        assert_eq!(cache.settled(&subject()).await, None);
        assert_eq!(fetcher.calls(), 0);

        let leader = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.resolve(&subject(), &Credential::new("t")).await })
        };
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        let waiter = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.settled(&subject()).await })
        };
        fetcher.release();
        assert_eq!(leader.await.unwrap(), Ok(STATS));
        assert_eq!(waiter.await.unwrap(), Some(Ok(STATS)));
        assert_eq!(cache.settled(&subject()).await, Some(Ok(STATS)));
        assert_eq!(fetcher.calls(), 1);
    }

    /// Poll a future exactly once.
    async fn poll_once<F: Future + Unpin>(future: F) -> Option<F::Output> {
        let mut future = future;
        std::future::poll_fn(|cx| {
            std::task::Poll::Ready(match std::pin::Pin::new(&mut future).poll(cx) {
                std::task::Poll::Ready(output) => Some(output),
                std::task::Poll::Pending => None,
            })
        })
        .await
    }
}
