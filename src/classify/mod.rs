pub mod types;

pub use types::{DisplayMode, Metric, Palette, Tier, TierTable};

use chrono::{DateTime, Utc};

/// Ages at or beyond this many days render as `99d+`.
const AGE_LABEL_CAP_DAYS: u64 = 99;

const fn palette(background: &'static str, foreground: &'static str, border: &'static str) -> Palette {
    Palette {
        background,
        foreground,
        border,
    }
}

const fn solid(background: &'static str, foreground: &'static str) -> Palette {
    palette(background, foreground, background)
}

const fn tier(name: &'static str, max: Option<u64>, palette: Palette) -> Tier {
    Tier { name, max, palette }
}

/// Size bands over total changed lines.
pub fn size_tiers(mode: DisplayMode) -> TierTable {
    let colors = match mode {
        DisplayMode::Light => [
            solid("#1a7f37", "#ffffff"),
            solid("#4c9d0e", "#ffffff"),
            solid("#9a6700", "#ffffff"),
            solid("#cf6c0f", "#ffffff"),
            solid("#d1242f", "#ffffff"),
            solid("#6e1c1c", "#ffffff"),
        ],
        DisplayMode::Dark => [
            solid("#238636", "#f0f6fc"),
            solid("#46954a", "#f0f6fc"),
            solid("#9e6a03", "#f0f6fc"),
            solid("#bd561d", "#f0f6fc"),
            solid("#da3633", "#f0f6fc"),
            solid("#8e1519", "#f0f6fc"),
        ],
    };
    TierTable::new(
        vec![
            tier("XS", Some(10), colors[0]),
            tier("S", Some(50), colors[1]),
            tier("M", Some(250), colors[2]),
            tier("L", Some(500), colors[3]),
            tier("XL", Some(1000), colors[4]),
        ],
        tier("XXL", None, colors[5]),
    )
}

/// Complexity bands over the `0..=100` score.
pub fn complexity_tiers(mode: DisplayMode) -> TierTable {
    let colors = match mode {
        DisplayMode::Light => [
            palette("#dafbe1", "#1a7f37", "#1a7f37"),
            palette("#fff8c5", "#9a6700", "#9a6700"),
            palette("#fff1e5", "#cf6c0f", "#cf6c0f"),
            palette("#ffebe9", "#d1242f", "#d1242f"),
        ],
        DisplayMode::Dark => [
            palette("#0f2f1a", "#3fb950", "#238636"),
            palette("#2e2a0f", "#d29922", "#9e6a03"),
            palette("#3a2310", "#f0883e", "#bd561d"),
            palette("#3c1618", "#f85149", "#da3633"),
        ],
    };
    TierTable::new(
        vec![
            tier("Low", Some(25), colors[0]),
            tier("Medium", Some(50), colors[1]),
            tier("High", Some(75), colors[2]),
        ],
        tier("Critical", Some(100), colors[3]),
    )
}

/// Age bands over whole days open, cut at 3/7/14/30 days.
pub fn age_tiers(mode: DisplayMode) -> TierTable {
    let colors = match mode {
        DisplayMode::Light => [
            palette("#dafbe1", "#1a7f37", "#1a7f37"),
            palette("#fff8c5", "#9a6700", "#9a6700"),
            palette("#fff1e5", "#cf6c0f", "#cf6c0f"),
            palette("#ffebe9", "#d1242f", "#d1242f"),
            palette("#ffebe9", "#6e1c1c", "#6e1c1c"),
        ],
        DisplayMode::Dark => [
            palette("#0f2f1a", "#3fb950", "#238636"),
            palette("#2e2a0f", "#d29922", "#9e6a03"),
            palette("#3a2310", "#f0883e", "#bd561d"),
            palette("#3c1618", "#f85149", "#da3633"),
            palette("#3c1618", "#ff7b72", "#8e1519"),
        ],
    };
    TierTable::new(
        vec![
            tier("fresh", Some(3), colors[0]),
            tier("week", Some(7), colors[1]),
            tier("fortnight", Some(14), colors[2]),
            tier("month", Some(30), colors[3]),
        ],
        tier("stale", None, colors[4]),
    )
}

pub fn tiers(metric: Metric, mode: DisplayMode) -> TierTable {
    match metric {
        Metric::Size => size_tiers(mode),
        Metric::Complexity => complexity_tiers(mode),
        Metric::Age => age_tiers(mode),
    }
}

/// Classify `value` for `metric`. Tables are rebuilt per call so a display
/// mode change takes effect on the next render.
pub fn classify(metric: Metric, mode: DisplayMode, value: u64) -> Tier {
    *tiers(metric, mode).classify(value)
}

/// Time a pull request has been open, in whole hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Age {
    pub hours: u64,
}

impl Age {
    /// Timestamps in the future count as zero.
    pub fn between(opened_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let hours = (now - opened_at).num_hours().max(0) as u64;
        Self { hours }
    }

    pub fn days(&self) -> u64 {
        self.hours / 24
    }

    pub fn label(&self) -> String {
        let days = self.days();
        if self.hours < 1 {
            "<1h".to_string()
        } else if self.hours < 24 {
            format!("{}h", self.hours)
        } else if days >= AGE_LABEL_CAP_DAYS {
            format!("{}d+", AGE_LABEL_CAP_DAYS)
        } else {
            format!("{}d", days)
        }
    }

    pub fn description(&self) -> String {
        let days = self.days();
        if days == 0 {
            format!("Open for {} hour{}", self.hours, if self.hours == 1 { "" } else { "s" })
        } else {
            format!("Open for {} day{}", days, if days == 1 { "" } else { "s" })
        }
    }

    pub fn tier(&self, mode: DisplayMode) -> Tier {
        classify(Metric::Age, mode, self.days())
    }
}
