use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cache::SubjectCache;
use crate::credential::CredentialStore;
use crate::dom::{Document, NodeId};
use crate::host::{HostPage, Markup};
use crate::overlay::Reconciler;
use crate::pr::Fetcher;
use crate::router::{Router, View};

/// Everything that lives for as long as the page does. Built once at
/// startup; navigation never replaces any of it.
pub struct Session {
    pub page: Arc<HostPage>,
    pub markup: Arc<Markup>,
    pub reconciler: Arc<Reconciler>,
    pub router: Arc<Router>,
    runner: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn new(page: Arc<HostPage>, markup: Markup, fetcher: Arc<dyn Fetcher>, credentials: Arc<CredentialStore>) -> Self {
        let markup = Arc::new(markup);
        let cache = Arc::new(SubjectCache::new(fetcher, credentials.clone()));
        let reconciler = Arc::new(Reconciler::new(page.clone(), markup.clone()));
        let router = Arc::new(Router::new(
            page.clone(),
            markup.clone(),
            cache,
            credentials,
            reconciler.clone(),
        ));
        Self {
            page,
            markup,
            reconciler,
            router,
            runner: Mutex::new(None),
        }
    }

    /// Badge the page as it is now and wait for every fetch it needs.
    pub async fn badge_once(&self) -> View {
        let view = self.router.route(&self.page.location()).await;
        self.router.idle().await;
        view
    }

    /// Follow the page through client-side navigations to each of `steps`.
    /// Every step rebuilds the document the way the host would, fires the
    /// navigation signal and waits for the new view to be badged. Returns the
    /// view the page ends on; the router keeps following it until
    /// [`Session::close`].
    pub async fn browse<F>(&self, steps: &[String], mut rebuild: F) -> View
    where
        F: FnMut(&mut Document, &View),
    {
        let Some(events) = self.page.navigation_events() else {
            warn!("navigation signal already taken, badging the current page only");
            return self.badge_once().await;
        };
        let mut epoch = self.router.epoch() + 1;
        let router = Arc::clone(&self.router);
        let runner = tokio::spawn(async move { router.run(events).await });
        *self.runner.lock().unwrap_or_else(PoisonError::into_inner) = Some(runner);

        self.router.routed(epoch).await;
        self.router.idle().await;
        for path in steps {
            let view = View::detect(path);
            self.page.dom(|doc| rebuild(doc, &view));
            self.page.navigate(path.as_str());
            epoch += 1;
            self.router.routed(epoch).await;
            self.router.idle().await;
            debug!(%view, handles = self.reconciler.handle_count(), "view settled");
        }
        self.router.current_view().unwrap_or(View::Inactive)
    }

    /// The host page goes away: close the navigation signal and wait for the
    /// router to tear the last view down.
    pub async fn close(&self) {
        self.page.unload();
        let runner = self.runner.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(runner) = runner {
            let _ = runner.await;
        }
    }

    pub fn pointer_enter(&self, badge: NodeId) -> Option<NodeId> {
        self.reconciler.show_detail(badge)
    }

    pub fn pointer_leave(&self) -> bool {
        self.reconciler.hide_detail()
    }
}
