use chrono::{DateTime, Utc};

use crate::dom::{Document, NodeId, Selector, SelectorError};
use crate::pr::{subject_from_href, Subject};

/// Where things live in GitHub's pull request pages.
#[derive(Debug, Clone)]
pub struct Markup {
    pub rows: Selector,
    pub row_timestamp: Selector,
    pub row_title: Selector,
    pub list_container: Selector,
    pub detail_title: Selector,
    pub page_state: Selector,
}

impl Markup {
    pub fn github() -> Result<Self, SelectorError> {
        Ok(Self {
            rows: "[id^='issue_'], .js-issue-row".parse()?,
            row_timestamp: "relative-time[datetime], time[datetime]".parse()?,
            row_title: "a.markdown-title, a[data-hovercard-type='pull_request'], .js-issue-row-title a".parse()?,
            list_container: ".js-issue-list, #js-issues-toolbar".parse()?,
            detail_title: ".js-issue-title, [data-testid='issue-title'], h1.gh-header-title".parse()?,
            page_state: ".State, [data-testid='header-state']".parse()?,
        })
    }

    pub fn rows(&self, doc: &Document) -> Vec<NodeId> {
        doc.query_selector_all(doc.root(), &self.rows)
    }

    /// The row's title link and the subject its href points at.
    pub fn row_subject(&self, doc: &Document, row: NodeId) -> Option<(NodeId, Subject)> {
        let title = doc.query_selector(row, &self.row_title)?;
        let subject = subject_from_href(doc.attr(title, "href")?)?;
        Some((title, subject))
    }

    /// The row's open timestamp, from its ISO 8601 `datetime` attribute.
    pub fn row_opened_at(&self, doc: &Document, row: NodeId) -> Option<DateTime<Utc>> {
        let time = doc.query_selector(row, &self.row_timestamp)?;
        let raw = doc.attr(time, "datetime")?;
        DateTime::parse_from_rfc3339(raw).ok().map(|t| t.with_timezone(&Utc))
    }

    /// The currently attached row for `subject`, with its title link.
    pub fn find_row(&self, doc: &Document, subject: &Subject) -> Option<(NodeId, NodeId)> {
        self.rows(doc).into_iter().find_map(|row| {
            let (title, found) = self.row_subject(doc, row)?;
            (&found == subject).then_some((row, title))
        })
    }

    /// The subtree rows are inserted into; the body when the page has none.
    pub fn list_container(&self, doc: &Document) -> NodeId {
        doc.query_selector(doc.root(), &self.list_container)
            .unwrap_or_else(|| doc.body())
    }

    pub fn detail_title(&self, doc: &Document) -> Option<NodeId> {
        doc.query_selector(doc.root(), &self.detail_title)
    }

    /// Open / Closed / Merged / Draft, as the page shows it.
    pub fn page_state(&self, doc: &Document) -> Option<String> {
        let node = doc.query_selector(doc.root(), &self.page_state)?;
        let text = doc.text_content(node).trim().to_string();
        (!text.is_empty()).then_some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::snapshot::{build_detail_page, build_list_page, SnapshotRow};

    fn row(number: u64, opened_at: &str) -> SnapshotRow {
        SnapshotRow {
            number,
            title: format!("PR {number}"),
            href: format!("/o/r/pull/{number}"),
            opened_at: Some(opened_at.parse().unwrap()),
        }
    }

    #[test]
    fn test_rows_and_subjects() {
        let markup = Markup::github().unwrap();
        let mut doc = Document::new();
        build_list_page(&mut doc, &[row(1, "2026-01-01T00:00:00Z"), row(2, "2026-01-02T00:00:00Z")]);

        let rows = markup.rows(&doc);
        assert_eq!(rows.len(), 2);
        let (_, subject) = markup.row_subject(&doc, rows[1]).unwrap();
        assert_eq!(subject, Subject::new("o", "r", 2));
        assert_eq!(
            markup.row_opened_at(&doc, rows[0]),
            Some("2026-01-01T00:00:00Z".parse().unwrap())
        );
        assert_eq!(markup.find_row(&doc, &Subject::new("o", "r", 2)).map(|(r, _)| r), Some(rows[1]));
        assert!(markup.find_row(&doc, &Subject::new("o", "r", 3)).is_none());
        // First match in document order: the toolbar wrapping the list.
        assert_eq!(doc.attr(markup.list_container(&doc), "id"), Some("js-issues-toolbar"));
    }

    #[test]
    fn test_row_without_link_has_no_subject() {
        let markup = Markup::github().unwrap();
        let mut doc = Document::new();
        let bare = doc.create_element("div");
        doc.set_attr(bare, "class", "js-issue-row");
        doc.append_child(doc.body(), bare);
        assert!(markup.row_subject(&doc, bare).is_none());
        assert!(markup.row_opened_at(&doc, bare).is_none());
        assert_eq!(markup.list_container(&doc), doc.body());
    }

    #[test]
    fn test_detail_title_and_state() {
        let markup = Markup::github().unwrap();
        let mut doc = Document::new();
        build_detail_page(&mut doc, "Add OAuth2 login flow", Some("Open"));
        let title = markup.detail_title(&doc).unwrap();
        assert_eq!(doc.text_content(title).trim(), "Add OAuth2 login flow");
        assert_eq!(markup.page_state(&doc).as_deref(), Some("Open"));
    }
}
