use chrono::{DateTime, Utc};

use crate::classify::{classify, Age, DisplayMode, Metric, Tier};
use crate::dom::{Document, NodeId};
use crate::pr::{PrStats, Subject};

const FONT_STACK: &str = "-apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif";

/// Attribute holding the subject a badge belongs to (`owner/repo#n`).
pub const SUBJECT_ATTR: &str = "data-pr-subject";
pub const TIER_ATTR: &str = "data-pr-tier";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadgeKind {
    Age,
    Size,
    Complexity,
}

impl BadgeKind {
    pub const ALL: [BadgeKind; 3] = [BadgeKind::Age, BadgeKind::Size, BadgeKind::Complexity];

    /// Stable class every badge of this kind carries.
    pub fn marker(&self) -> &'static str {
        match self {
            BadgeKind::Age => "gh-pr-age",
            BadgeKind::Size => "gh-pr-size",
            BadgeKind::Complexity => "gh-pr-complexity",
        }
    }

    pub fn of(doc: &Document, node: NodeId) -> Option<BadgeKind> {
        Self::ALL.into_iter().find(|kind| doc.has_class(node, kind.marker()))
    }
}

impl std::fmt::Display for BadgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BadgeKind::Age => write!(f, "Age"),
            BadgeKind::Size => write!(f, "Size"),
            BadgeKind::Complexity => write!(f, "Complexity"),
        }
    }
}

/// The data a badge displays. Kept by the reconciler so the badge can be
/// rebuilt without going back to the network.
#[derive(Debug, Clone, PartialEq)]
pub enum BadgeContent {
    Age { opened_at: DateTime<Utc> },
    Size(PrStats),
    Complexity(PrStats),
}

/// A badge ready to be turned into an element: label, hover title and the
/// tier it was classified into under the current display mode.
#[derive(Debug, Clone, PartialEq)]
pub struct BadgeSpec {
    pub kind: BadgeKind,
    pub label: String,
    pub tooltip: String,
    pub tier: Tier,
}

impl BadgeContent {
    pub fn kind(&self) -> BadgeKind {
        match self {
            BadgeContent::Age { .. } => BadgeKind::Age,
            BadgeContent::Size(_) => BadgeKind::Size,
            BadgeContent::Complexity(_) => BadgeKind::Complexity,
        }
    }

    pub fn spec(&self, mode: DisplayMode, now: DateTime<Utc>) -> BadgeSpec {
        match self {
            BadgeContent::Age { opened_at } => {
                let age = Age::between(*opened_at, now);
                BadgeSpec {
                    kind: BadgeKind::Age,
                    label: age.label(),
                    tooltip: age.description(),
                    tier: age.tier(mode),
                }
            }
            BadgeContent::Size(stats) => {
                let tier = classify(Metric::Size, mode, stats.total_lines());
                BadgeSpec {
                    kind: BadgeKind::Size,
                    label: format!("size/{}", tier.name),
                    tooltip: size_summary(stats),
                    tier,
                }
            }
            BadgeContent::Complexity(stats) => {
                let score = stats.complexity_score();
                let tier = classify(Metric::Complexity, mode, u64::from(score));
                BadgeSpec {
                    kind: BadgeKind::Complexity,
                    label: format!("{} {}", tier.name, score),
                    tooltip: format!("Complexity {}/100: {}", score, size_summary(stats)),
                    tier,
                }
            }
        }
    }

    /// Lines for the hover panel.
    pub fn detail_lines(&self, now: DateTime<Utc>, state: Option<&str>) -> Vec<String> {
        let mut lines = match self {
            BadgeContent::Age { opened_at } => {
                let age = Age::between(*opened_at, now);
                vec![
                    age.description(),
                    format!("Opened {}", opened_at.format("%Y-%m-%d %H:%M UTC")),
                ]
            }
            BadgeContent::Size(stats) | BadgeContent::Complexity(stats) => vec![
                format!(
                    "{} lines changed (+{} / \u{2212}{})",
                    group_thousands(stats.total_lines()),
                    group_thousands(stats.additions),
                    group_thousands(stats.deletions)
                ),
                format!(
                    "{} file{} changed",
                    group_thousands(stats.changed_files),
                    if stats.changed_files == 1 { "" } else { "s" }
                ),
                format!("Complexity score {}/100", stats.complexity_score()),
            ],
        };
        if let Some(state) = state {
            lines.push(format!("State: {state}"));
        }
        lines
    }
}

fn size_summary(stats: &PrStats) -> String {
    format!(
        "{} lines ({}+ / {}\u{2212}) across {} files",
        group_thousands(stats.total_lines()),
        group_thousands(stats.additions),
        group_thousands(stats.deletions),
        stats.changed_files
    )
}

/// `1234567` -> `1,234,567`.
pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

impl BadgeSpec {
    pub fn style(&self) -> String {
        let palette = self.tier.palette;
        let shape: &[&str] = match self.kind {
            BadgeKind::Size => &["padding: 2px 8px", "border-radius: 12px", "font-size: 12px", "margin-left: 8px"],
            BadgeKind::Age | BadgeKind::Complexity => &[
                "padding-inline: 6px",
                "border-radius: 8px",
                "font-size: 11px",
                "margin-left: 6px",
                "line-height: 18px",
            ],
        };
        let mut rules = vec![
            "display: inline-flex".to_string(),
            "align-items: center".to_string(),
            format!("background: {}", palette.background),
            format!("color: {}", palette.foreground),
            format!("border: 1px solid {}", palette.border),
            "font-weight: 600".to_string(),
            format!("font-family: {FONT_STACK}"),
            "vertical-align: middle".to_string(),
            "cursor: default".to_string(),
        ];
        rules.extend(shape.iter().map(|rule| rule.to_string()));
        rules.join("; ")
    }

    /// Create the detached element for this badge.
    pub fn build(&self, doc: &mut Document, subject: &Subject) -> NodeId {
        let badge = doc.create_element("span");
        doc.set_attr(badge, "class", self.kind.marker());
        doc.set_attr(badge, SUBJECT_ATTR, subject.to_string());
        doc.set_attr(badge, TIER_ATTR, self.tier.name);
        doc.set_attr(badge, "title", self.tooltip.as_str());
        doc.set_attr(badge, "style", self.style());
        doc.set_text(badge, self.label.as_str());
        badge
    }
}
