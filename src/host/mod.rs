//! The host page as the engine sees it: a document it does not control, a
//! location that changes under client-side routing, a signal fired after each
//! route transition, a color-scheme preference and a viewport.

pub mod markup;
pub mod snapshot;

pub use markup::Markup;
pub use snapshot::Snapshot;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::debug;

use crate::classify::DisplayMode;
use crate::dom::{Document, ObserverId, Subscription};

/// Emitted by the host once a client-side route transition has completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Navigation {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
        }
    }
}

pub struct HostPage {
    document: Mutex<Document>,
    location: Mutex<String>,
    navigation_tx: Mutex<Option<mpsc::UnboundedSender<Navigation>>>,
    navigation_rx: Mutex<Option<mpsc::UnboundedReceiver<Navigation>>>,
    prefers_dark: AtomicBool,
    viewport: Mutex<Viewport>,
    frozen_now: Mutex<Option<DateTime<Utc>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl HostPage {
    pub fn new(path: impl Into<String>) -> Self {
        Self::with_document(path, Document::new())
    }

    pub fn with_document(path: impl Into<String>, document: Document) -> Self {
        let (navigation_tx, navigation_rx) = mpsc::unbounded_channel();
        Self {
            document: Mutex::new(document),
            location: Mutex::new(path.into()),
            navigation_tx: Mutex::new(Some(navigation_tx)),
            navigation_rx: Mutex::new(Some(navigation_rx)),
            prefers_dark: AtomicBool::new(false),
            viewport: Mutex::new(Viewport::default()),
            frozen_now: Mutex::new(None),
        }
    }

    /// Run `f` with exclusive access to the document. Never hold this across
    /// an await point.
    pub fn dom<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut lock(&self.document))
    }

    pub fn location(&self) -> String {
        lock(&self.location).clone()
    }

    /// Host-side client navigation: swap the location, then fire the signal.
    pub fn navigate(&self, path: impl Into<String>) {
        let path = path.into();
        *lock(&self.location) = path.clone();
        debug!(%path, "host navigation");
        if let Some(tx) = lock(&self.navigation_tx).as_ref() {
            // The receiver only disappears when the session has shut down.
            let _ = tx.send(Navigation { path });
        }
    }

    /// The page is going away: no further navigation signals. The signal
    /// stream ends once queued ones are consumed.
    pub fn unload(&self) {
        lock(&self.navigation_tx).take();
    }

    /// The navigation signal stream. Handed out once.
    pub fn navigation_events(&self) -> Option<mpsc::UnboundedReceiver<Navigation>> {
        lock(&self.navigation_rx).take()
    }

    pub fn set_prefers_dark(&self, dark: bool) {
        self.prefers_dark.store(dark, Ordering::Relaxed);
    }

    /// Explicit `data-color-mode` on the root element wins; `auto` or no
    /// attribute defers to the system preference.
    pub fn display_mode(&self) -> DisplayMode {
        let explicit = self.dom(|doc| doc.attr(doc.root(), "data-color-mode").map(str::to_string));
        match explicit.as_deref() {
            Some("light") => DisplayMode::Light,
            Some("dark") => DisplayMode::Dark,
            _ if self.prefers_dark.load(Ordering::Relaxed) => DisplayMode::Dark,
            _ => DisplayMode::Light,
        }
    }

    pub fn viewport(&self) -> Viewport {
        *lock(&self.viewport)
    }

    pub fn set_viewport(&self, viewport: Viewport) {
        *lock(&self.viewport) = viewport;
    }

    pub fn now(&self) -> DateTime<Utc> {
        (*lock(&self.frozen_now)).unwrap_or_else(Utc::now)
    }

    /// Pin the page clock, for reproducible ages.
    pub fn freeze_clock(&self, at: DateTime<Utc>) {
        *lock(&self.frozen_now) = Some(at);
    }

    /// Subscribe to everything under the body, the one element the host
    /// never replaces.
    pub fn observe_body(&self) -> Subscription {
        self.dom(|doc| doc.observe(doc.body()))
    }

    pub fn disconnect(&self, id: ObserverId) -> bool {
        self.dom(|doc| doc.disconnect(id))
    }
}
