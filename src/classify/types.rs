/// Which color table to render with. Read from the host on every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Light,
    Dark,
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisplayMode::Light => write!(f, "light"),
            DisplayMode::Dark => write!(f, "dark"),
        }
    }
}

/// The quantity a tier table classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Total changed lines.
    Size,
    /// Complexity score, `0..=100`.
    Complexity,
    /// Whole days since the PR was opened.
    Age,
}

/// CSS colors for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub background: &'static str,
    pub foreground: &'static str,
    pub border: &'static str,
}

/// A named band. `max` is the inclusive upper bound; `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tier {
    pub name: &'static str,
    pub max: Option<u64>,
    pub palette: Palette,
}

impl Tier {
    fn admits(&self, value: u64) -> bool {
        self.max.map_or(true, |max| value <= max)
    }
}

/// Ordered bands plus the top band every overflowing value falls into.
#[derive(Debug, Clone)]
pub struct TierTable {
    bands: Vec<Tier>,
    top: Tier,
}

impl TierTable {
    pub(crate) fn new(bands: Vec<Tier>, top: Tier) -> Self {
        Self { bands, top }
    }

    /// First band whose bound admits `value`; the top band when none does.
    pub fn classify(&self, value: u64) -> &Tier {
        self.bands.iter().find(|tier| tier.admits(value)).unwrap_or(&self.top)
    }

    pub fn tiers(&self) -> impl Iterator<Item = &Tier> {
        self.bands.iter().chain(std::iter::once(&self.top))
    }
}
