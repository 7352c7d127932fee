use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument};

use crate::cache::SubjectCache;
use crate::credential::CredentialStore;
use crate::host::{HostPage, Markup, Navigation};
use crate::overlay::{BadgeContent, BadgeRequest, Placement, Reconciler};
use crate::pr::{subject_from_path, Subject};
use crate::watcher::RowWatcher;

/// Which kind of page a path shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum View {
    /// `/{owner}/{repo}/pull/{number}`
    Detail(Subject),
    /// `/{owner}/{repo}/pulls...`
    List { owner: String, repo: String },
    Inactive,
}

impl View {
    pub fn detect(path: &str) -> View {
        if let Some(subject) = subject_from_path(path) {
            return View::Detail(subject);
        }
        let mut segments = path.strip_prefix('/').unwrap_or("").split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(owner), Some(repo), Some(section))
                if !owner.is_empty() && !repo.is_empty() && section.starts_with("pulls") =>
            {
                View::List {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                }
            }
            _ => View::Inactive,
        }
    }
}

impl std::fmt::Display for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            View::Detail(subject) => write!(f, "detail {subject}"),
            View::List { owner, repo } => write!(f, "list {owner}/{repo}"),
            View::Inactive => write!(f, "inactive"),
        }
    }
}

struct ActiveView {
    view: View,
    watcher: Option<Arc<RowWatcher>>,
    tasks: Vec<JoinHandle<()>>,
}

/// Owns the lifecycle of every observer the engine installs. Each route
/// transition tears down the previous view before the next one starts, and
/// bumps an epoch so late results from the old view render nothing.
pub struct Router {
    page: Arc<HostPage>,
    markup: Arc<Markup>,
    cache: Arc<SubjectCache>,
    credentials: Arc<CredentialStore>,
    reconciler: Arc<Reconciler>,
    epoch: AtomicU64,
    /// Epoch of the last route whose view is set up.
    routed: watch::Sender<u64>,
    active: Mutex<Option<ActiveView>>,
}

impl Router {
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
            epoch: AtomicU64::new(0),
            routed: watch::Sender::new(0),
            active: Mutex::new(None),
        }
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveView>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch() == epoch
    }

    pub fn current_view(&self) -> Option<View> {
        self.active().as_ref().map(|active| active.view.clone())
    }

    /// Wait until the route numbered `epoch` has been set up.
    pub async fn routed(&self, epoch: u64) {
        let mut routed = self.routed.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = routed.wait_for(|&done| done >= epoch).await;
    }

    /// Switch to the view for `path`. For listings this returns after the
    /// first scan; background resolves continue until [`Router::idle`].
    #[instrument(skip(self))]
    pub async fn route(self: &Arc<Self>, path: &str) -> View {
        self.teardown();
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        let view = View::detect(path);
        info!(?view, epoch, "routing");

        match &view {
            View::Inactive => {
                *self.active() = Some(ActiveView {
                    view: view.clone(),
                    watcher: None,
                    tasks: Vec::new(),
                });
            }
            View::Detail(subject) => {
                let router = Arc::clone(self);
                let subject = subject.clone();
                let task = tokio::spawn(async move { router.badge_detail(subject, epoch).await });
                *self.active() = Some(ActiveView {
                    view: view.clone(),
                    watcher: None,
                    tasks: vec![task],
                });
            }
            View::List { .. } => {
                let watcher = Arc::new(RowWatcher::new(
                    self.page.clone(),
                    self.markup.clone(),
                    self.cache.clone(),
                    self.credentials.clone(),
                    self.reconciler.clone(),
                ));
                *self.active() = Some(ActiveView {
                    view: view.clone(),
                    watcher: Some(watcher.clone()),
                    tasks: Vec::new(),
                });
                watcher.start();
                let report = watcher.scan().await;
                debug!(?report, "initial scan");
            }
        }
        self.routed.send_modify(|routed| *routed = (*routed).max(epoch));
        view
    }

    async fn badge_detail(self: Arc<Self>, subject: Subject, epoch: u64) {
        // Known or in-flight subjects need no credential.
        let outcome = match self.cache.settled(&subject).await {
            Some(outcome) => outcome,
            None => {
                let Some(credential) = self.credentials.get_or_prompt().await else {
                    debug!(%subject, "no credential, size badge skipped");
                    return;
                };
                if !self.is_current(epoch) {
                    return;
                }
                self.cache.resolve(&subject, &credential).await
            }
        };
        let Ok(stats) = outcome else {
            return;
        };
        if !self.is_current(epoch) {
            debug!(%subject, "navigated away before stats arrived");
            return;
        }
        for content in [BadgeContent::Size(stats), BadgeContent::Complexity(stats)] {
            self.reconciler.render(BadgeRequest {
                subject: subject.clone(),
                placement: Placement::DetailTitle,
                content,
            });
        }
    }

    /// Stop the current view's watcher and badge guards. In-flight fetches
    /// keep running and still fill the cache.
    fn teardown(&self) {
        let previous = self.active().take();
        if let Some(watcher) = previous.and_then(|active| active.watcher) {
            watcher.stop();
        }
        self.reconciler.teardown();
    }

    /// Wait for the current view's outstanding work.
    pub async fn idle(&self) {
        let (tasks, watcher) = match self.active().as_mut() {
            Some(active) => (std::mem::take(&mut active.tasks), active.watcher.clone()),
            None => return,
        };
        for task in tasks {
            let _ = task.await;
        }
        if let Some(watcher) = watcher {
            watcher.drain().await;
        }
    }

    /// Route the current location, then every navigation signal until the
    /// host goes away.
    pub async fn run(self: &Arc<Self>, mut navigation: mpsc::UnboundedReceiver<Navigation>) {
        self.route(&self.page.location()).await;
        while let Some(Navigation { path }) = navigation.recv().await {
            self.route(&path).await;
        }
        self.teardown();
        debug!("navigation stream closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{ScriptedFetcher, STATS};
    use crate::credential::tests::store_with;
    use crate::host::snapshot::{append_row, build_detail_page, build_list_page, SnapshotRow};
    use crate::overlay::tests::{count_badges, settle};
    use crate::overlay::BadgeKind;
    use crate::pr::Fetcher;
    use chrono::{DateTime, Duration, Utc};

    #[test]
    fn test_detect_views() {
        assert_eq!(View::detect("/o/r/pull/12"), View::Detail(Subject::new("o", "r", 12)));
        assert_eq!(View::detect("/o/r/pull/12/"), View::Detail(Subject::new("o", "r", 12)));
        let list = View::List {
            owner: "o".to_string(),
            repo: "r".to_string(),
        };
        assert_eq!(View::detect("/o/r/pulls"), list);
        assert_eq!(View::detect("/o/r/pulls/review-requested"), list);
        assert_eq!(View::detect("/o/r/pull/12/files"), View::Inactive);
        assert_eq!(View::detect("/o/r/issues"), View::Inactive);
        assert_eq!(View::detect("/o/r"), View::Inactive);
        assert_eq!(View::detect("/"), View::Inactive);
    }

    fn opened() -> DateTime<Utc> {
        "2026-10-01T00:00:00Z".parse().unwrap()
    }

    fn row(number: u64) -> SnapshotRow {
        SnapshotRow {
            number,
            title: format!("PR {number}"),
            href: format!("/o/r/pull/{number}"),
            opened_at: Some(opened()),
        }
    }

    fn router(page: &Arc<HostPage>, fetcher: Arc<dyn Fetcher>) -> (Arc<Router>, Arc<SubjectCache>) {
        let markup = Arc::new(Markup::github().unwrap());
        let credentials = store_with(Some("t"));
        let cache = Arc::new(SubjectCache::new(fetcher, credentials.clone()));
        let reconciler = Arc::new(Reconciler::new(page.clone(), markup.clone()));
        let router = Arc::new(Router::new(page.clone(), markup, cache.clone(), credentials, reconciler));
        (router, cache)
    }

    fn list_page() -> Arc<HostPage> {
        let page = Arc::new(HostPage::new("/o/r/pulls"));
        page.freeze_clock(opened() + Duration::hours(26));
        page.dom(|doc| build_list_page(doc, &[row(1), row(2)]));
        page
    }

    /// What the host does on a client-side transition to a PR page.
    fn render_detail(page: &HostPage, title: &str) {
        page.dom(|doc| {
            doc.clear_children(doc.body());
            build_detail_page(doc, title, Some("Open"));
        });
    }

    #[tokio::test]
    async fn test_detail_renders_size_and_complexity_once() {
        let page = Arc::new(HostPage::new("/o/r/pull/7"));
        render_detail(&page, "Fix");
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let (router, _) = router(&page, fetcher.clone());

        router.route("/o/r/pull/7").await;
        router.idle().await;

        assert_eq!(count_badges(&page, BadgeKind::Size), 1);
        assert_eq!(count_badges(&page, BadgeKind::Complexity), 1);
        assert_eq!(fetcher.fetches_for(&Subject::new("o", "r", 7)), 1);

        // Host re-render wipes the heading; the badges come back from memory.
        page.dom(|doc| {
            let title = doc.query_selector(doc.root(), &Markup::github().unwrap().detail_title).unwrap();
            doc.clear_children(title);
        });
        settle().await;
        assert_eq!(count_badges(&page, BadgeKind::Size), 1);
        assert_eq!(count_badges(&page, BadgeKind::Complexity), 1);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_list_to_detail_transition() {
        let page = list_page();
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let (router, _) = router(&page, fetcher.clone());

        router.route("/o/r/pulls").await;
        router.idle().await;
        assert_eq!(count_badges(&page, BadgeKind::Age), 2);
        assert_eq!(count_badges(&page, BadgeKind::Complexity), 2);

        render_detail(&page, "PR 5");
        router.route("/o/r/pull/5").await;
        router.idle().await;
        settle().await;

        assert_eq!(fetcher.fetches_for(&Subject::new("o", "r", 5)), 1);
        assert_eq!(count_badges(&page, BadgeKind::Size), 1);
        // Only the detail badges' guards remain; the list observer is gone.
        assert_eq!(page.dom(|doc| doc.observer_count()), 2);

        // A listing fragment appearing now triggers no row work.
        page.dom(|doc| {
            let list = doc.create_element("div");
            doc.set_attr(list, "class", "js-issue-list");
            doc.append_child(doc.body(), list);
            append_row(doc, list, &row(9));
        });
        settle().await;
        assert_eq!(count_badges(&page, BadgeKind::Age), 0);
        assert_eq!(fetcher.fetches_for(&Subject::new("o", "r", 9)), 0);
    }

    #[tokio::test]
    async fn test_late_detail_result_renders_nothing() {
        let page = Arc::new(HostPage::new("/o/r/pull/1"));
        render_detail(&page, "Slow");
        let fetcher = ScriptedFetcher::gated(Ok(STATS));
        let (router, cache) = router(&page, fetcher.clone());

        router.route("/o/r/pull/1").await;
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        let stale = {
            let mut active = router.active();
            std::mem::take(&mut active.as_mut().unwrap().tasks)
        };

        router.route("/o/r/issues").await;
        fetcher.release();
        for task in stale {
            task.await.unwrap();
        }

        // Navigation never cancels the fetch; the cache is filled regardless.
        assert_eq!(cache.state(&Subject::new("o", "r", 1)), crate::cache::CacheState::Resolved(STATS));
        assert_eq!(count_badges(&page, BadgeKind::Size), 0);
    }

    #[tokio::test]
    async fn test_cache_survives_navigation() {
        let page = Arc::new(HostPage::new("/o/r/pull/3"));
        render_detail(&page, "Three");
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let (router, _) = router(&page, fetcher.clone());

        router.route("/o/r/pull/3").await;
        router.idle().await;
        router.route("/o/r/pulls").await;
        router.idle().await;
        render_detail(&page, "Three");
        router.route("/o/r/pull/3").await;
        router.idle().await;

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(count_badges(&page, BadgeKind::Size), 1);
    }

    #[tokio::test]
    async fn test_run_follows_navigation_signals() {
        let page = list_page();
        let fetcher = ScriptedFetcher::answering(Ok(STATS));
        let (router, _) = router(&page, fetcher.clone());
        let events = page.navigation_events().unwrap();

        let runner = {
            let router = router.clone();
            tokio::spawn(async move { router.run(events).await })
        };
        while router.current_view().is_none() {
            tokio::task::yield_now().await;
        }
        router.idle().await;
        assert_eq!(count_badges(&page, BadgeKind::Age), 2);

        render_detail(&page, "PR 2");
        page.navigate("/o/r/pull/2");
        while router.current_view() != Some(View::Detail(Subject::new("o", "r", 2))) {
            tokio::task::yield_now().await;
        }
        router.idle().await;
        assert_eq!(count_badges(&page, BadgeKind::Size), 1);
        // Resolved while on the listing; no second fetch.
        assert_eq!(fetcher.fetches_for(&Subject::new("o", "r", 2)), 1);

        runner.abort();
    }
}
