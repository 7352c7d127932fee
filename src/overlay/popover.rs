use crate::dom::Rect;
use crate::host::Viewport;

/// Minimum distance kept between the panel and the viewport edges.
pub const VIEWPORT_MARGIN: f64 = 8.0;
const GAP: f64 = 6.0;
pub const PANEL_WIDTH: f64 = 280.0;
const LINE_HEIGHT: f64 = 20.0;
const PADDING: f64 = 16.0;

pub fn panel_height(lines: usize) -> f64 {
    lines as f64 * LINE_HEIGHT + PADDING
}

/// Top-left corner for a `width` x `height` panel attached to `anchor`.
///
/// Prefers just below the badge, flips above when that would run off the
/// bottom, then clamps both axes into the viewport.
pub fn position(anchor: Rect, width: f64, height: f64, viewport: Viewport) -> (f64, f64) {
    let mut top = anchor.y + anchor.height + GAP;
    if top + height > viewport.height - VIEWPORT_MARGIN {
        top = anchor.y - GAP - height;
    }
    let left = clamp(anchor.x, viewport.width - width - VIEWPORT_MARGIN);
    let top = clamp(top, viewport.height - height - VIEWPORT_MARGIN);
    (left, top)
}

fn clamp(value: f64, max: f64) -> f64 {
    value.min(max).max(VIEWPORT_MARGIN)
}
