use crate::buffer::RectParams;

/// Half-open pixel rectangle `[left, right) × [top, bottom)` inside a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedactionRegion {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl RedactionRegion {
    /// Clamp a detector box to a `width` × `height` frame
    ///
    /// Coordinates are truncated to whole pixels first. Returns `None` when
    /// nothing of the box is left inside the frame, or when any coordinate
    /// is not finite.
    pub fn clamp(rect: &RectParams, width: u32, height: u32) -> Option<Self> {
        let coords = [rect.left, rect.top, rect.width, rect.height];
        if !coords.iter().all(|c| c.is_finite()) {
            return None;
        }

        // f64 holds any sum of two finite f32 without overflow
        let left = f64::from(rect.left).trunc();
        let top = f64::from(rect.top).trunc();
        let right = (left + f64::from(rect.width).trunc()).min(f64::from(width));
        let bottom = (top + f64::from(rect.height).trunc()).min(f64::from(height));
        let left = left.max(0.0);
        let top = top.max(0.0);

        if right <= left || bottom <= top {
            return None;
        }
        Some(Self {
            left: left as u32,
            top: top as u32,
            right: right as u32,
            bottom: bottom as u32,
        })
    }

    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        (self.left..self.right).contains(&x) && (self.top..self.bottom).contains(&y)
    }
}

impl std::fmt::Display for RedactionRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {})-({}, {}) {}x{}",
            self.left,
            self.top,
            self.right,
            self.bottom,
            self.width(),
            self.height()
        )
    }
}
