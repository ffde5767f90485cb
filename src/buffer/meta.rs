//! Inference metadata attached to a batched buffer
//!
//! The hierarchy is Batch → Frame → Object. It is produced upstream by the
//! inference stage; probes only borrow it for the duration of one callback.

use serde::Deserialize;

/// Maximum number of rectangles a single display record carries
pub const MAX_RECTS_PER_DISPLAY_META: usize = 16;

/// Axis-aligned box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct RectParams {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl RectParams {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }
}

/// One detected object
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ObjectMeta {
    pub class_id: i32,
    #[serde(default)]
    pub confidence: f32,
    #[serde(flatten)]
    pub rect: RectParams,
}

impl ObjectMeta {
    pub fn new(class_id: i32, confidence: f32, rect: RectParams) -> Self {
        Self {
            class_id,
            confidence,
            rect,
        }
    }
}

/// RGBA colour with components in `0.0..=1.0`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        red: 0.0,
        green: 0.0,
        blue: 0.0,
        alpha: 1.0,
    };

    pub fn to_rgba8(self) -> [u8; 4] {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [
            channel(self.red),
            channel(self.green),
            channel(self.blue),
            channel(self.alpha),
        ]
    }
}

/// Rectangle drawn by a downstream renderer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectOverlay {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    pub border_width: u32,
    pub has_bg_color: bool,
    pub bg_color: Color,
}

/// A bounded group of overlays attached to one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisplayMeta {
    rects: Vec<RectOverlay>,
}

impl DisplayMeta {
    pub fn rects(&self) -> &[RectOverlay] {
        &self.rects
    }

    pub fn is_full(&self) -> bool {
        self.rects.len() >= MAX_RECTS_PER_DISPLAY_META
    }

    /// Append an overlay, handing it back when the record is full
    pub fn push(&mut self, rect: RectOverlay) -> Result<(), RectOverlay> {
        if self.is_full() {
            return Err(rect);
        }
        self.rects.push(rect);
        Ok(())
    }
}

/// Metadata of one frame inside a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameMeta {
    /// Index of this frame's surface in the batched buffer
    pub batch_id: usize,
    pub frame_num: u64,
    pub source_id: u32,
    pub width: u32,
    pub height: u32,
    objects: Vec<ObjectMeta>,
    display: Vec<DisplayMeta>,
}

impl FrameMeta {
    pub fn new(batch_id: usize, width: u32, height: u32) -> Self {
        Self {
            batch_id,
            width,
            height,
            ..Default::default()
        }
    }

    pub fn with_objects(mut self, objects: Vec<ObjectMeta>) -> Self {
        self.objects = objects;
        self
    }

    pub fn add_object(&mut self, object: ObjectMeta) {
        self.objects.push(object);
    }

    pub fn objects(&self) -> impl ExactSizeIterator<Item = &ObjectMeta> {
        self.objects.iter()
    }

    pub fn display_meta(&self) -> &[DisplayMeta] {
        &self.display
    }

    /// Attach an overlay, opening a new display record when the last one is full
    pub fn add_overlay(&mut self, rect: RectOverlay) {
        let rect = match self.display.last_mut() {
            Some(meta) => match meta.push(rect) {
                Ok(()) => return,
                Err(rect) => rect,
            },
            None => rect,
        };

        self.display.push(DisplayMeta { rects: vec![rect] });
    }

    pub fn overlay_count(&self) -> usize {
        self.display.iter().map(|m| m.rects.len()).sum()
    }
}

/// Metadata of a whole batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchMeta {
    frames: Vec<FrameMeta>,
}

impl BatchMeta {
    pub fn new(frames: Vec<FrameMeta>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> impl ExactSizeIterator<Item = &FrameMeta> {
        self.frames.iter()
    }

    pub fn frames_mut(&mut self) -> impl ExactSizeIterator<Item = &mut FrameMeta> {
        self.frames.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
