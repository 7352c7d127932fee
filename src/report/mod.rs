pub mod types;

pub use types::{BadgeLine, Report, ReportEntry};

use crate::dom::{Document, NodeId};
use crate::host::Markup;
use crate::overlay::{BadgeKind, SUBJECT_ATTR, TIER_ATTR};
use crate::router::View;
use crate::session::Session;
use colored::Colorize;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    FileWrite(#[from] std::io::Error),
}

/// Collect every badge in the page's document, grouped by subject, with the
/// hover panel each one opens.
pub fn build(session: &Session, view: &View) -> Report {
    let page = &session.page;
    let restored = session.reconciler.reconcile_all();
    if restored > 0 {
        debug!(restored, "badges put back before reporting");
    }
    let mode = page.display_mode();
    let found = page.dom(|doc| {
        let mut found: Vec<(ReportEntry, Vec<NodeId>)> = Vec::new();
        for node in doc.descendants(doc.root()) {
            let Some(kind) = BadgeKind::of(doc, node) else {
                continue;
            };
            let Some(subject) = doc.attr(node, SUBJECT_ATTR) else {
                continue;
            };
            let line = badge_line(doc, node, kind);
            match found.iter_mut().find(|(entry, _)| entry.subject == subject) {
                Some((entry, nodes)) => {
                    entry.badges.push(line);
                    nodes.push(node);
                }
                None => found.push((
                    ReportEntry {
                        subject: subject.to_string(),
                        title: title_for(doc, &session.markup, node),
                        badges: vec![line],
                    },
                    vec![node],
                )),
            }
        }
        found
    });

    let entries = found
        .into_iter()
        .map(|(mut entry, nodes)| {
            for (line, node) in entry.badges.iter_mut().zip(nodes) {
                line.panel = hover_panel(session, node);
            }
            entry
        })
        .collect();

    Report {
        path: page.location(),
        view: view.clone(),
        mode,
        entries,
    }
}

/// Hover `badge` and read what its panel shows. Empty for badges the engine
/// no longer tracks.
fn hover_panel(session: &Session, badge: NodeId) -> Vec<String> {
    let Some(panel) = session.pointer_enter(badge) else {
        return Vec::new();
    };
    let lines = session
        .page
        .dom(|doc| doc.text(panel).lines().map(str::to_string).collect());
    session.pointer_leave();
    lines
}

fn badge_line(doc: &Document, node: NodeId, kind: BadgeKind) -> BadgeLine {
    let style = doc.attr(node, "style").unwrap_or_default();
    BadgeLine {
        kind,
        label: doc.text(node).to_string(),
        tier: doc.attr(node, TIER_ATTR).unwrap_or_default().to_string(),
        tooltip: doc.attr(node, "title").unwrap_or_default().to_string(),
        background: style_value(style, "background"),
        foreground: style_value(style, "color"),
        panel: Vec::new(),
    }
}

/// The row link text for list badges, the heading text for detail badges.
fn title_for(doc: &Document, markup: &Markup, badge: NodeId) -> Option<String> {
    if let Some(row) = doc.closest(badge, &markup.rows) {
        let (link, _) = markup.row_subject(doc, row)?;
        return Some(doc.text_content(link).trim().to_string());
    }
    let heading = doc.closest(badge, &markup.detail_title)?;
    let text: String = doc
        .children(heading)
        .iter()
        .filter(|&&child| BadgeKind::of(doc, child).is_none())
        .map(|&child| doc.text_content(child))
        .collect();
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Value of one declaration in an inline style, e.g. `color` -> `#1a7f37`.
fn style_value(style: &str, property: &str) -> Option<String> {
    style.split(';').find_map(|declaration| {
        let (name, value) = declaration.split_once(':')?;
        (name.trim() == property).then(|| value.trim().to_string())
    })
}

/// Output the report to terminal (default) or to a markdown file.
#[instrument(skip(report), fields(path = %report.path, badges = report.badge_count()))]
pub fn output(report: &Report, output_path: Option<&Path>) -> Result<(), ReportError> {
    match output_path {
        None => {
            debug!("writing report to terminal");
            print_terminal_report(report);
            Ok(())
        }
        Some(path) => {
            debug!(path = %path.display(), "writing report to file");
            write_markdown_report(report, path)
        }
    }
}

/// Format and print the report to the terminal, each badge in its own
/// palette:
///
/// Page: /org/repo/pulls (list org/repo, light mode)
///
/// org/repo#42: "Add OAuth2 login flow"
///    1d    Critical 93
///   Open for 1 day
///   Complexity 93/100: 1,100 lines (800+ / 300−) across 15 files
fn print_terminal_report(report: &Report) {
    println!();
    println!("Page: {} ({}, {} mode)", report.path, report.view, report.mode);
    println!();

    if report.entries.is_empty() {
        println!("  No badges rendered.");
        println!();
        return;
    }

    for entry in &report.entries {
        match &entry.title {
            Some(title) => println!("{}: \"{}\"", entry.subject.bold(), title),
            None => println!("{}", entry.subject.bold()),
        }
        let chips: Vec<String> = entry.badges.iter().map(|badge| colorize_badge(badge).to_string()).collect();
        println!("  {}", chips.join(" "));
        for badge in &entry.badges {
            if !badge.tooltip.is_empty() {
                println!("  {}", badge.tooltip.dimmed());
            }
        }
        println!();
    }

    println!("═══ {} badges on {} pull requests ═══", report.badge_count(), report.entries.len());
    println!();
}

/// Write the report as a markdown file.
///
/// # Badges on /org/repo/pulls
/// **View:** list org/repo | **Mode:** light
///
/// ## org/repo#42: "Add OAuth2 login flow"
/// - **Age** `1d` (fresh): Open for 1 day
///   - Opened 2026-10-17 09:00 UTC
fn write_markdown_report(report: &Report, path: &Path) -> Result<(), ReportError> {
    let mut md = String::new();
    md.push_str(&format!("# Badges on {}\n\n", report.path));
    md.push_str(&format!("**View:** {} | **Mode:** {}\n\n", report.view, report.mode));

    if report.entries.is_empty() {
        md.push_str("No badges rendered.\n");
    }

    for entry in &report.entries {
        match &entry.title {
            Some(title) => md.push_str(&format!("## {}: \"{}\"\n\n", entry.subject, title)),
            None => md.push_str(&format!("## {}\n\n", entry.subject)),
        }
        for badge in &entry.badges {
            md.push_str(&format!("- **{}** `{}` ({})", badge.kind, badge.label, badge.tier));
            if !badge.tooltip.is_empty() {
                md.push_str(&format!(": {}", badge.tooltip));
            }
            md.push('\n');
            for line in badge.panel.iter().filter(|line| **line != badge.tooltip) {
                md.push_str(&format!("  - {}\n", line));
            }
        }
        md.push('\n');
    }

    std::fs::write(path, md)?;
    Ok(())
}

/// Render a badge label on its tier background. Falls back to bold text
/// when the palette cannot be read.
fn colorize_badge(badge: &BadgeLine) -> colored::ColoredString {
    let text = format!(" {} ", badge.label);
    match (
        badge.background.as_deref().and_then(parse_hex),
        badge.foreground.as_deref().and_then(parse_hex),
    ) {
        (Some((br, bg, bb)), Some((fr, fg, fb))) => text.on_truecolor(br, bg, bb).truecolor(fr, fg, fb).bold(),
        _ => text.bold(),
    }
}

fn parse_hex(color: &str) -> Option<(u8, u8, u8)> {
    let hex = color.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}
