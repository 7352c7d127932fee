use crate::classify::DisplayMode;
use crate::overlay::BadgeKind;
use crate::router::View;

/// One badge as it ended up in the document.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeLine {
    pub kind: BadgeKind,
    /// Text shown on the badge, e.g. `size/XL`
    pub label: String,
    /// Tier name from `data-pr-tier`
    pub tier: String,
    /// Hover title
    pub tooltip: String,
    /// Palette colors parsed back out of the inline style
    pub background: Option<String>,
    pub foreground: Option<String>,
    /// Lines of the hover panel
    pub panel: Vec<String>,
}

/// Every badge belonging to one pull request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportEntry {
    /// `owner/repo#number`
    pub subject: String,
    /// Title text from the row link or page heading, without badge labels
    pub title: Option<String>,
    pub badges: Vec<BadgeLine>,
}

/// What the engine left on one page.
#[derive(Debug)]
pub struct Report {
    pub path: String,
    pub view: View,
    pub mode: DisplayMode,
    /// In document order of each subject's first badge
    pub entries: Vec<ReportEntry>,
}

impl Report {
    pub fn badge_count(&self) -> usize {
        self.entries.iter().map(|entry| entry.badges.len()).sum()
    }
}
