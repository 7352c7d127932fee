//! Headless stand-ins for GitHub pages, built from a TOML description.
//!
//! ```toml
//! color_mode = "dark"
//! prefers_dark = true
//! now = "2026-10-18T12:00:00Z"
//! navigate = ["/org/repo/pull/42"]
//!
//! [viewport]
//! width = 1024
//! height = 700
//!
//! [[rows]]
//! number = 42
//! title = "Add OAuth2 login flow"
//! href = "/org/repo/pull/42"
//! opened_at = "2026-10-16T09:00:00Z"
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use super::{HostPage, Viewport};
use crate::dom::{Document, NodeId};
use crate::router::View;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read snapshot file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse snapshot file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Snapshot {
    /// Value of the root `data-color-mode` attribute.
    pub color_mode: Option<String>,

    /// Detail page title.
    pub title: Option<String>,

    /// Detail page state label (Open, Merged, ...).
    pub state: Option<String>,

    /// Clock the page reports. Real time when unset.
    pub now: Option<DateTime<Utc>>,

    /// System color-scheme preference, consulted when the page has no
    /// explicit mode.
    #[serde(default)]
    pub prefers_dark: bool,

    pub viewport: Option<Viewport>,

    /// Paths the user navigates to, in order, after the first page.
    #[serde(default)]
    pub navigate: Vec<String>,

    #[serde(default)]
    pub rows: Vec<SnapshotRow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRow {
    pub number: u64,
    pub title: String,
    pub href: String,
    pub opened_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn load_from(path: &Path) -> Result<Snapshot, SnapshotError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Build the document for a list (`detail == false`) or detail page.
    pub fn to_document(&self, detail: bool) -> Document {
        let mut doc = Document::new();
        if let Some(mode) = &self.color_mode {
            doc.set_attr(doc.root(), "data-color-mode", mode.as_str());
        }
        if detail {
            build_detail_page(&mut doc, self.title.as_deref().unwrap_or("Pull request"), self.state.as_deref());
        } else {
            build_list_page(&mut doc, &self.rows);
        }
        doc
    }

    /// Carry the page-level settings over to `page`.
    pub fn apply(&self, page: &HostPage) {
        if let Some(now) = self.now {
            page.freeze_clock(now);
        }
        page.set_prefers_dark(self.prefers_dark);
        if let Some(viewport) = self.viewport {
            page.set_viewport(viewport);
        }
    }

    /// What the host renders after navigating to `view`. A detail page takes
    /// its title from the listing row for the same number when there is one.
    pub fn rebuild(&self, doc: &mut Document, view: &View) {
        doc.clear_children(doc.body());
        match view {
            View::Detail(subject) => {
                let title = self
                    .rows
                    .iter()
                    .find(|row| row.number == subject.number)
                    .map(|row| row.title.as_str())
                    .or(self.title.as_deref())
                    .unwrap_or("Pull request");
                build_detail_page(doc, title, self.state.as_deref());
            }
            View::List { .. } => {
                build_list_page(doc, &self.rows);
            }
            View::Inactive => {}
        }
    }
}

fn element(doc: &mut Document, parent: NodeId, tag: &str, attrs: &[(&str, &str)]) -> NodeId {
    let node = doc.create_element(tag);
    for (name, value) in attrs {
        doc.set_attr(node, name, *value);
    }
    doc.append_child(parent, node);
    node
}

/// Append one list row shaped like GitHub's markup and return it.
pub fn append_row(doc: &mut Document, list: NodeId, row: &SnapshotRow) -> NodeId {
    let id = format!("issue_{}", row.number);
    let node = element(doc, list, "div", &[("id", id.as_str()), ("class", "Box-row js-issue-row")]);
    let main = element(doc, node, "div", &[("class", "flex-auto")]);
    let link = element(
        doc,
        main,
        "a",
        &[
            ("class", "Link--primary markdown-title"),
            ("href", row.href.as_str()),
            ("data-hovercard-type", "pull_request"),
        ],
    );
    doc.set_text(link, row.title.as_str());
    let meta = element(doc, main, "span", &[("class", "opened-by")]);
    doc.set_text(meta, format!("#{} opened ", row.number));
    if let Some(opened_at) = row.opened_at {
        let time = element(doc, meta, "relative-time", &[("datetime", opened_at.to_rfc3339().as_str())]);
        doc.set_text(time, opened_at.format("%b %-d, %Y").to_string());
    }
    node
}

/// A pulls listing: toolbar, issue list and one row per entry.
pub fn build_list_page(doc: &mut Document, rows: &[SnapshotRow]) -> NodeId {
    let body = doc.body();
    let toolbar = element(doc, body, "div", &[("id", "js-issues-toolbar")]);
    let list = element(doc, toolbar, "div", &[("class", "js-issue-list")]);
    for row in rows {
        append_row(doc, list, row);
    }
    list
}

/// A single pull request page header. Returns the title element.
pub fn build_detail_page(doc: &mut Document, title: &str, state: Option<&str>) -> NodeId {
    let body = doc.body();
    let header = element(doc, body, "div", &[("id", "partial-discussion-header")]);
    let heading = element(doc, header, "h1", &[("class", "gh-header-title")]);
    let text = element(doc, heading, "bdi", &[("class", "js-issue-title markdown-title")]);
    doc.set_text(text, title);
    if let Some(state) = state {
        let label = element(doc, header, "span", &[("class", "State State--open")]);
        doc.set_text(label, state);
    }
    heading
}
