//! Compositing of display overlays onto pixels
//!
//! This is the renderer side of the fill strategy: the engine only attaches
//! rectangles to the frame metadata, something downstream has to draw them.

use image::Rgba;

use crate::buffer::{Color, FrameMeta, RectOverlay, SurfaceView};
use crate::redact::region::RedactionRegion;

/// Overlay covering `region` with an opaque black box and no border
pub fn opaque_fill(region: &RedactionRegion) -> RectOverlay {
    RectOverlay {
        left: region.left,
        top: region.top,
        width: region.width(),
        height: region.height(),
        border_width: 0,
        has_bg_color: true,
        bg_color: Color::BLACK,
    }
}

fn blend(dst: &mut Rgba<u8>, color: Color) {
    let [r, g, b, _] = color.to_rgba8();
    let alpha = color.alpha.clamp(0.0, 1.0);
    for (channel, value) in dst.0.iter_mut().take(3).zip([r, g, b]) {
        *channel = (*channel as f32 * (1.0 - alpha) + value as f32 * alpha).round() as u8;
    }
}

/// Draw the filled overlays of `frame` onto `image`
///
/// Rectangles are clipped to the image. Returns how many were drawn.
pub fn render_overlays(image: &mut SurfaceView<'_>, frame: &FrameMeta) -> usize {
    let (width, height) = image.dimensions();
    let mut drawn = 0;

    for rect in frame.display_meta().iter().flat_map(|d| d.rects()) {
        if !rect.has_bg_color {
            continue;
        }
        let right = rect.left.saturating_add(rect.width).min(width);
        let bottom = rect.top.saturating_add(rect.height).min(height);
        if rect.left >= right || rect.top >= bottom {
            continue;
        }

        for y in rect.top..bottom {
            for x in rect.left..right {
                blend(image.get_pixel_mut(x, y), rect.bg_color);
            }
        }
        drawn += 1;
    }
    drawn
}
