//! Viewport-aware placement for menus and previews.
//!
//! Placement is a single measure/correct pass per axis: the content is put next to
//! its anchor, its box is measured once, and any overflow on each axis is corrected
//! once. Oversized content may still overflow afterwards.

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self {
            left,
            top,
            right: left + width,
            bottom: top + height,
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn size(&self) -> Size {
        Size {
            width: self.width(),
            height: self.height(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1280.0,
            height: 800.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
        }
    }
}

/// Which side of the anchor the overlay opens on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Below the anchor, left edges aligned, in document coordinates (menus).
    Below,
    /// Right of the anchor, vertically centred on its bottom edge, in viewport
    /// coordinates (previews).
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Edge {
    Px(f64),
    Auto,
}

impl Edge {
    pub fn css(&self) -> String {
        match self {
            Edge::Px(value) => format!("{}px", value),
            Edge::Auto => "auto".to_string(),
        }
    }

    fn px(&self) -> Option<f64> {
        match self {
            Edge::Px(value) => Some(*value),
            Edge::Auto => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub left: Edge,
    pub top: Edge,
    pub right: Edge,
    pub bottom: Edge,
}

impl Placement {
    pub fn left_px(&self) -> Option<f64> {
        self.left.px()
    }

    pub fn top_px(&self) -> Option<f64> {
        self.top.px()
    }

    pub fn right_px(&self) -> Option<f64> {
        self.right.px()
    }
}

/// Computes where to put `content` next to `anchor`.
///
/// `anchor` is in viewport coordinates. With `allow_axis_swap`, horizontal overflow
/// flips the overlay to be right-anchored at the anchor's left edge instead of being
/// shifted.
pub fn place(
    anchor: Rect,
    content: Size,
    side: Side,
    viewport: &Viewport,
    allow_axis_swap: bool,
) -> Placement {
    // Offsets that convert this placement's coordinates to viewport coordinates.
    let (origin_x, origin_y) = match side {
        Side::Below => (viewport.scroll_x, viewport.scroll_y),
        Side::Right => (0.0, 0.0),
    };

    let (mut left, mut top) = match side {
        Side::Below => (anchor.left + origin_x, anchor.bottom + origin_y),
        Side::Right => (anchor.right, anchor.bottom - content.height * 0.5),
    };

    let measured = Rect::new(left - origin_x, top - origin_y, content.width, content.height);
    if measured.bottom > viewport.height {
        top = match side {
            Side::Below => anchor.top + origin_y - content.height,
            Side::Right => top - (measured.bottom - viewport.height),
        };
    } else if measured.top < 0.0 {
        top -= measured.top;
    }

    let measured = Rect::new(left - origin_x, top - origin_y, content.width, content.height);
    if measured.right > viewport.width {
        if allow_axis_swap {
            return Placement {
                left: Edge::Auto,
                top: Edge::Px(top),
                right: Edge::Px(viewport.width - anchor.left),
                bottom: Edge::Auto,
            };
        }
        left = match side {
            Side::Below => anchor.right + origin_x - content.width,
            Side::Right => left - (measured.right - viewport.width),
        };
    } else if measured.left < 0.0 {
        left -= measured.left;
    }

    Placement {
        left: Edge::Px(left),
        top: Edge::Px(top),
        right: Edge::Auto,
        bottom: Edge::Auto,
    }
}
