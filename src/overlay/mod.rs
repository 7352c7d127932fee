//! Overlay reconciliation: render each badge once and keep it attached while
//! the host rebuilds the markup around it.

pub mod badge;
pub mod popover;

pub use badge::{BadgeContent, BadgeKind, SUBJECT_ATTR, TIER_ATTR};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

use crate::dom::{Document, NodeId, ObserverId, Subscription};
use crate::host::{HostPage, Markup};
use crate::pr::{subject_from_path, Subject};

pub const POPOVER_CLASS: &str = "gh-pr-popover";

/// Where a badge goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Appended inside the title of a single pull request page.
    DetailTitle,
    /// Right after the title link of the subject's row in a listing.
    ListRow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BadgeRequest {
    pub subject: Subject,
    pub placement: Placement,
    pub content: BadgeContent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BadgeKey {
    pub subject: Subject,
    pub placement: Placement,
    pub kind: BadgeKind,
}

impl BadgeRequest {
    pub fn key(&self) -> BadgeKey {
        BadgeKey {
            subject: self.subject.clone(),
            placement: self.placement,
            kind: self.content.kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderOutcome {
    Inserted(NodeId),
    /// A badge for this subject was already in the container.
    AlreadyPresent(NodeId),
    /// The page has no place for the badge yet. Not an error.
    AnchorMissing,
}

/// A badge the reconciler is responsible for. Outlives the element: when the
/// host destroys it, `node` moves to the replacement.
#[derive(Debug)]
pub struct BadgeHandle {
    pub request: BadgeRequest,
    pub node: Option<NodeId>,
    /// Physical elements created for this handle so far.
    pub renders: u32,
    guard: Option<ObserverId>,
}

enum Health {
    Attached,
    Detached,
    Forgotten,
}

enum Anchor {
    After(NodeId),
    Inside(NodeId),
}

pub struct Reconciler {
    page: Arc<HostPage>,
    markup: Arc<Markup>,
    handles: Mutex<HashMap<BadgeKey, BadgeHandle>>,
    popover: Mutex<Option<NodeId>>,
}

impl Reconciler {
    pub fn new(page: Arc<HostPage>, markup: Arc<Markup>) -> Self {
        Self {
            page,
            markup,
            handles: Mutex::new(HashMap::new()),
            popover: Mutex::new(None),
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<BadgeKey, BadgeHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Render `request` unless an equivalent badge is already attached, then
    /// guard it against removal. Must run inside a tokio runtime.
    pub fn render(self: &Arc<Self>, request: BadgeRequest) -> RenderOutcome {
        let outcome = self.place(&request);
        match outcome {
            RenderOutcome::Inserted(node) | RenderOutcome::AlreadyPresent(node) => {
                self.track(request, Some(node), matches!(outcome, RenderOutcome::Inserted(_)));
            }
            RenderOutcome::AnchorMissing => {
                debug!(subject = %request.subject, kind = ?request.content.kind(), "no anchor for badge yet");
            }
        }
        outcome
    }

    fn place(&self, request: &BadgeRequest) -> RenderOutcome {
        // Both read the page; take them before locking the document.
        let mode = self.page.display_mode();
        let now = self.page.now();
        let spec = request.content.spec(mode, now);

        self.page.dom(|doc| {
            let Some((container, anchor)) = self.locate(doc, request) else {
                return RenderOutcome::AnchorMissing;
            };
            if let Some(existing) = find_badge(doc, container, spec.kind, &request.subject) {
                return RenderOutcome::AlreadyPresent(existing);
            }
            let badge = spec.build(doc, &request.subject);
            match anchor {
                Anchor::After(reference) => {
                    if !doc.insert_after(reference, badge) {
                        return RenderOutcome::AnchorMissing;
                    }
                }
                Anchor::Inside(parent) => doc.append_child(parent, badge),
            }
            trace!(subject = %request.subject, label = %spec.label, "badge inserted");
            RenderOutcome::Inserted(badge)
        })
    }

    fn locate(&self, doc: &Document, request: &BadgeRequest) -> Option<(NodeId, Anchor)> {
        match request.placement {
            Placement::DetailTitle => {
                let title = self.markup.detail_title(doc)?;
                Some((title, Anchor::Inside(title)))
            }
            Placement::ListRow => {
                let (row, link) = self.markup.find_row(doc, &request.subject)?;
                let container = doc.parent(link).unwrap_or(row);
                Some((container, Anchor::After(last_trailing_badge(doc, link))))
            }
        }
    }

    fn track(self: &Arc<Self>, request: BadgeRequest, node: Option<NodeId>, inserted: bool) {
        let key = request.key();
        let needs_guard = {
            let mut handles = self.handles();
            let handle = handles.entry(key.clone()).or_insert_with(|| BadgeHandle {
                request,
                node: None,
                renders: 0,
                guard: None,
            });
            handle.node = node;
            if inserted {
                handle.renders += 1;
            }
            handle.guard.is_none()
        };
        if needs_guard {
            self.install_guard(key);
        }
    }

    /// Watch the body, the one ancestor the host never replaces, for the
    /// badge disappearing.
    fn install_guard(self: &Arc<Self>, key: BadgeKey) {
        let subscription = self.page.observe_body();
        {
            let mut handles = self.handles();
            let Some(handle) = handles.get_mut(&key) else {
                self.page.disconnect(subscription.id());
                return;
            };
            handle.guard = Some(subscription.id());
        }
        let reconciler = Arc::clone(self);
        tokio::spawn(async move { reconciler.guard(key, subscription).await });
    }

    /// One guard for the handle's whole life: it repairs as often as the
    /// host removes the badge and ends when the handle is forgotten.
    async fn guard(self: Arc<Self>, key: BadgeKey, mut subscription: Subscription) {
        while subscription.next().await.is_some() {
            subscription.drain();
            match self.health(&key) {
                Health::Attached => continue,
                Health::Forgotten => return,
                Health::Detached => {
                    if self.repair(&key) {
                        debug!(subject = %key.subject, kind = ?key.kind, "badge removed by host, re-rendered");
                    }
                }
            }
        }
    }

    fn health(&self, key: &BadgeKey) -> Health {
        let node = match self.handles().get(key) {
            None => return Health::Forgotten,
            Some(handle) => handle.node,
        };
        match node {
            Some(node) if self.page.dom(|doc| doc.is_connected(node)) => Health::Attached,
            _ => Health::Detached,
        }
    }

    /// Re-render a detached badge from the data it already holds. The handle
    /// stays registered even when the anchor is gone, so its guard keeps
    /// waiting for the host to put the anchor back. A title badge is only put
    /// back while the location still shows its pull request.
    fn repair(self: &Arc<Self>, key: &BadgeKey) -> bool {
        let Some(request) = self.handles().get(key).map(|handle| handle.request.clone()) else {
            return false;
        };
        if request.placement == Placement::DetailTitle
            && subject_from_path(&self.page.location()).as_ref() != Some(&request.subject)
        {
            trace!(subject = %request.subject, "page moved on, title badge not restored");
            self.track(request, None, false);
            return false;
        }
        match self.place(&request) {
            RenderOutcome::Inserted(node) => {
                self.track(request, Some(node), true);
                true
            }
            RenderOutcome::AlreadyPresent(node) => {
                self.track(request, Some(node), false);
                true
            }
            RenderOutcome::AnchorMissing => {
                self.track(request, None, false);
                false
            }
        }
    }

    /// One synchronous pass over every handle, restoring detached badges.
    /// Returns how many were put back.
    pub fn reconcile_all(self: &Arc<Self>) -> usize {
        let keys: Vec<BadgeKey> = self.handles().keys().cloned().collect();
        keys.into_iter()
            .filter(|key| matches!(self.health(key), Health::Detached))
            .filter(|key| self.repair(key))
            .count()
    }

    pub fn handle_count(&self) -> usize {
        self.handles().len()
    }

    /// Number of physical elements created for `key`, if it is tracked.
    #[cfg(test)]
    pub fn renders(&self, key: &BadgeKey) -> Option<u32> {
        self.handles().get(key).map(|handle| handle.renders)
    }

    /// Disconnect every guard and forget every handle.
    pub fn teardown(&self) {
        let handles: Vec<BadgeHandle> = self.handles().drain().map(|(_, handle)| handle).collect();
        for guard in handles.iter().filter_map(|handle| handle.guard) {
            self.page.disconnect(guard);
        }
        self.hide_detail();
        debug!(badges = handles.len(), "overlay torn down");
    }

    /// Open the hover panel for a badge this reconciler rendered.
    pub fn show_detail(&self, badge: NodeId) -> Option<NodeId> {
        let content = self
            .handles()
            .values()
            .find(|handle| handle.node == Some(badge))
            .map(|handle| handle.request.content.clone())?;
        self.hide_detail();

        let now = self.page.now();
        let viewport = self.page.viewport();
        let panel = self.page.dom(|doc| {
            let state = self.markup.page_state(doc);
            let lines = content.detail_lines(now, state.as_deref());
            let height = popover::panel_height(lines.len());
            let anchor = doc.rect(badge).unwrap_or_default();
            let (left, top) = popover::position(anchor, popover::PANEL_WIDTH, height, viewport);

            let panel = doc.create_element("div");
            doc.set_attr(panel, "class", POPOVER_CLASS);
            doc.set_attr(
                panel,
                "style",
                format!(
                    "position: fixed; left: {left}px; top: {top}px; width: {}px; z-index: 100; white-space: pre-line",
                    popover::PANEL_WIDTH
                ),
            );
            doc.set_text(panel, lines.join("\n"));
            doc.append_child(doc.body(), panel);
            panel
        });
        *self.popover.lock().unwrap_or_else(PoisonError::into_inner) = Some(panel);
        Some(panel)
    }

    pub fn hide_detail(&self) -> bool {
        let panel = self.popover.lock().unwrap_or_else(PoisonError::into_inner).take();
        match panel {
            Some(panel) => {
                self.page.dom(|doc| doc.remove(panel));
                true
            }
            None => false,
        }
    }
}

/// Badges already following `link` stay in render order: a new one goes
/// after the last of them.
fn last_trailing_badge(doc: &Document, link: NodeId) -> NodeId {
    let Some(parent) = doc.parent(link) else {
        return link;
    };
    doc.children(parent)
        .iter()
        .skip_while(|&&child| child != link)
        .skip(1)
        .take_while(|&&child| BadgeKind::of(doc, child).is_some())
        .last()
        .copied()
        .unwrap_or(link)
}

/// A badge of `kind` for `subject` directly or deeper inside `container`.
fn find_badge(doc: &Document, container: NodeId, kind: BadgeKind, subject: &Subject) -> Option<NodeId> {
    let wanted = subject.to_string();
    doc.descendants(container)
        .into_iter()
        .find(|&node| doc.has_class(node, kind.marker()) && doc.attr(node, SUBJECT_ATTR) == Some(wanted.as_str()))
}
