use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, instrument, trace};

use crate::cache::{CacheState, SubjectCache};
use crate::credential::{Credential, CredentialStore};
use crate::dom::{Document, MutationRecord, NodeId, ObserverId, Subscription};
use crate::host::{HostPage, Markup};
use crate::overlay::{BadgeContent, BadgeKind, BadgeRequest, Placement, Reconciler, RenderOutcome, POPOVER_CLASS, SUBJECT_ATTR};
use crate::pr::Subject;

/// What one pass over the listing did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub rows: usize,
    /// Rows whose link did not yield a subject.
    pub skipped: usize,
    pub age_badges: usize,
    pub complexity_badges: usize,
    /// Subjects handed to a background resolve.
    pub resolves_started: usize,
    pub credential_missing: bool,
}

struct RowPlan {
    subject: Subject,
    opened_at: Option<DateTime<Utc>>,
    has_age: bool,
    has_complexity: bool,
}

/// Badges every row of a pulls listing and keeps doing so as the host adds
/// rows. One watcher per list view; the router stops it on navigation.
pub struct RowWatcher {
    page: Arc<HostPage>,
    markup: Arc<Markup>,
    cache: Arc<SubjectCache>,
    credentials: Arc<CredentialStore>,
    reconciler: Arc<Reconciler>,
    active: AtomicBool,
    observer: Mutex<Option<ObserverId>>,
    waiting: Mutex<HashSet<Subject>>,
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RowWatcher {
    pub fn new(
        page: Arc<HostPage>,
        markup: Arc<Markup>,
        cache: Arc<SubjectCache>,
        credentials: Arc<CredentialStore>,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            page,
            markup,
            cache,
            credentials,
            reconciler,
            active: AtomicBool::new(true),
            observer: Mutex::new(None),
            waiting: Mutex::new(HashSet::new()),
            in_flight: Mutex::new(Vec::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Subscribe to the body and rescan whenever the host adds something
    /// other than our own badges to the listing. The body survives the host
    /// rebuilding the listing wholesale; the container may not.
    pub fn start(self: &Arc<Self>) {
        if !self.is_active() {
            return;
        }
        let subscription = self.page.observe_body();
        if let Some(previous) = lock(&self.observer).replace(subscription.id()) {
            self.page.disconnect(previous);
        }
        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.watch(subscription).await });
    }

    async fn watch(self: Arc<Self>, mut subscription: Subscription) {
        while let Some(first) = subscription.next().await {
            if !self.is_active() {
                return;
            }
            let mut records = vec![first];
            records.extend(subscription.drain());
            if !self.has_foreign_additions(&records) {
                continue;
            }
            let report = self.scan().await;
            debug!(?report, "rescanned after host mutation");
        }
    }

    /// Added nodes inside the current list container, or a whole new
    /// container, that are not ours.
    fn has_foreign_additions(&self, records: &[MutationRecord]) -> bool {
        self.page.dom(|doc| {
            let container = self.markup.list_container(doc);
            records
                .iter()
                .flat_map(|record| record.added.iter().copied())
                .filter(|&node| doc.contains(container, node) || doc.contains(node, container))
                .any(|node| BadgeKind::of(doc, node).is_none() && !doc.has_class(node, POPOVER_CLASS))
        })
    }

    /// Badge every row currently in the listing. Rows already carrying their
    /// badges are left alone; complexity badges for subjects not yet resolved
    /// are rendered by background tasks (see [`RowWatcher::drain`]).
    #[instrument(skip_all)]
    pub async fn scan(self: &Arc<Self>) -> ScanReport {
        let mut report = ScanReport::default();
        if !self.is_active() {
            return report;
        }

        let plans = self.page.dom(|doc| {
            let rows = self.markup.rows(doc);
            report.rows = rows.len();
            rows.into_iter()
                .filter_map(|row| {
                    let Some((_, subject)) = self.markup.row_subject(doc, row) else {
                        report.skipped += 1;
                        return None;
                    };
                    Some(RowPlan {
                        opened_at: self.markup.row_opened_at(doc, row),
                        has_age: row_has_badge(doc, row, BadgeKind::Age, &subject),
                        has_complexity: row_has_badge(doc, row, BadgeKind::Complexity, &subject),
                        subject,
                    })
                })
                .collect::<Vec<_>>()
        });

        for plan in plans.iter().filter(|plan| !plan.has_age) {
            let Some(opened_at) = plan.opened_at else {
                trace!(subject = %plan.subject, "row has no timestamp");
                continue;
            };
            let outcome = self.reconciler.render(BadgeRequest {
                subject: plan.subject.clone(),
                placement: Placement::ListRow,
                content: BadgeContent::Age { opened_at },
            });
            if matches!(outcome, RenderOutcome::Inserted(_)) {
                report.age_badges += 1;
            }
        }

        let mut seen = HashSet::new();
        let wanted: Vec<Subject> = plans
            .into_iter()
            .filter(|plan| !plan.has_complexity)
            .map(|plan| plan.subject)
            .filter(|subject| seen.insert(subject.clone()))
            .collect();

        // Only subjects nobody has asked about yet need a credential.
        let mut unfetched = Vec::new();
        for subject in wanted {
            match self.cache.state(&subject) {
                CacheState::Resolved(stats) => {
                    if self.render_complexity(subject, BadgeContent::Complexity(stats)) {
                        report.complexity_badges += 1;
                    }
                }
                CacheState::Failed(_) => {}
                CacheState::Pending => {
                    if self.spawn_resolve(subject, None) {
                        report.resolves_started += 1;
                    }
                }
                CacheState::Absent => unfetched.push(subject),
            }
        }
        if unfetched.is_empty() {
            return report;
        }

        let Some(credential) = self.credentials.get_or_prompt().await else {
            debug!(rows = unfetched.len(), "no credential, complexity badges skipped");
            report.credential_missing = true;
            return report;
        };
        // The prompt suspends; the view may have changed meanwhile.
        if !self.is_active() {
            return report;
        }
        for subject in unfetched {
            if self.spawn_resolve(subject, Some(credential.clone())) {
                report.resolves_started += 1;
            }
        }
        report
    }

    fn render_complexity(self: &Arc<Self>, subject: Subject, content: BadgeContent) -> bool {
        let outcome = self.reconciler.render(BadgeRequest {
            subject,
            placement: Placement::ListRow,
            content,
        });
        matches!(outcome, RenderOutcome::Inserted(_))
    }

    /// At most one waiting task per subject. Without a credential the task
    /// only joins a fetch already in flight.
    fn spawn_resolve(self: &Arc<Self>, subject: Subject, credential: Option<Credential>) -> bool {
        if !lock(&self.waiting).insert(subject.clone()) {
            return false;
        }
        let watcher = Arc::clone(self);
        let task = tokio::spawn(async move {
            let outcome = match &credential {
                Some(credential) => Some(watcher.cache.resolve(&subject, credential).await),
                None => watcher.cache.settled(&subject).await,
            };
            lock(&watcher.waiting).remove(&subject);
            match outcome {
                Some(Ok(stats)) if watcher.is_active() => {
                    watcher.render_complexity(subject, BadgeContent::Complexity(stats));
                }
                Some(Ok(_)) => debug!(%subject, "watcher stopped before stats arrived"),
                // Already logged by the cache.
                Some(Err(_)) | None => {}
            }
        });
        lock(&self.in_flight).push(task);
        true
    }

    /// Disconnect the observer. Resolves already in flight finish but render
    /// nothing.
    pub fn stop(&self) {
        self.active.store(false, Ordering::Release);
        if let Some(id) = lock(&self.observer).take() {
            self.page.disconnect(id);
        }
    }

    /// Wait until every background resolve started so far has finished.
    pub async fn drain(&self) {
        loop {
            let tasks = std::mem::take(&mut *lock(&self.in_flight));
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                let _ = task.await;
            }
        }
    }
}

fn row_has_badge(doc: &Document, row: NodeId, kind: BadgeKind, subject: &Subject) -> bool {
    let wanted = subject.to_string();
    doc.descendants(row)
        .into_iter()
        .any(|node| doc.has_class(node, kind.marker()) && doc.attr(node, SUBJECT_ATTR) == Some(wanted.as_str()))
}
