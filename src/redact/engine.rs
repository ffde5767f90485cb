use std::collections::BTreeSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::buffer::{Buffer, FrameMeta, Surface};
use crate::error::{FrameError, PipelineError, Result};
use crate::pipeline::health::RedactionHealth;
use crate::pipeline::port::{BufferProbe, PortRef, ProbeReturn};
use crate::redact::blur::{blur_region, BlurKernel, KernelSize};
use crate::redact::overlay::opaque_fill;
use crate::redact::region::RedactionRegion;

/// Class identifiers redacted when nothing else is configured
pub const DEFAULT_CLASSES: [i32; 2] = [0, 1];

/// How a region is hidden
#[derive(Debug, Clone, PartialEq)]
pub enum RedactStrategy {
    /// Blur the pixels in place
    Blur(BlurKernel),
    /// Attach an opaque rectangle for a downstream renderer
    Fill,
}

impl RedactStrategy {
    /// Parse `blur` or `fill`; `kernel` only matters for blur
    pub fn parse(name: &str, kernel: KernelSize) -> Result<Self> {
        match name {
            "blur" => Ok(RedactStrategy::Blur(BlurKernel::new(kernel)?)),
            "fill" => Ok(RedactStrategy::Fill),
            other => Err(PipelineError::InvalidConfig(format!(
                "unknown redaction strategy '{}', expected blur or fill",
                other
            ))),
        }
    }
}

impl Default for RedactStrategy {
    fn default() -> Self {
        RedactStrategy::Blur(BlurKernel::default())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedactConfig {
    /// Object classes to hide
    pub classes: BTreeSet<i32>,
    pub strategy: RedactStrategy,
}

impl Default for RedactConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_CLASSES.into_iter().collect(),
            strategy: RedactStrategy::default(),
        }
    }
}

/// What happened to one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameReport {
    pub applied: usize,
    pub discarded: usize,
}

/// Hides detected objects of selected classes
///
/// Installed as a probe on a port, it runs once per buffer in the
/// streaming context.
#[derive(Debug, Clone)]
pub struct RedactionEngine {
    config: RedactConfig,
    health: Arc<RedactionHealth>,
}

impl RedactionEngine {
    pub fn new(config: RedactConfig) -> Self {
        Self::with_health(config, Arc::new(RedactionHealth::new()))
    }

    pub fn with_health(config: RedactConfig, health: Arc<RedactionHealth>) -> Self {
        Self { config, health }
    }

    pub fn config(&self) -> &RedactConfig {
        &self.config
    }

    pub fn health(&self) -> &Arc<RedactionHealth> {
        &self.health
    }

    /// Regions of `frame` to redact, plus how many boxes collapsed to nothing
    pub fn regions(&self, frame: &FrameMeta) -> (Vec<RedactionRegion>, usize) {
        let mut discarded = 0;
        let regions: Vec<_> = frame
            .objects()
            .filter(|object| self.config.classes.contains(&object.class_id))
            .filter_map(|object| {
                let region = RedactionRegion::clamp(&object.rect, frame.width, frame.height);
                if region.is_none() {
                    discarded += 1;
                }
                region
            })
            .collect();
        (regions, discarded)
    }

    /// Redact one frame
    ///
    /// Nothing is touched when no object qualifies. The blur strategy needs
    /// the frame's packed surface; the fill strategy only writes metadata.
    pub fn redact_frame(
        &self,
        frame: &mut FrameMeta,
        surface: Option<&mut Surface>,
    ) -> std::result::Result<FrameReport, FrameError> {
        let (regions, discarded) = self.regions(frame);
        if regions.is_empty() {
            return Ok(FrameReport {
                applied: 0,
                discarded,
            });
        }

        match &self.config.strategy {
            RedactStrategy::Blur(kernel) => {
                let surface = surface.ok_or(FrameError::MissingSurface {
                    frame_num: frame.frame_num,
                    batch_id: frame.batch_id,
                })?;
                if (surface.width(), surface.height()) != (frame.width, frame.height) {
                    return Err(FrameError::SurfaceMismatch {
                        frame_num: frame.frame_num,
                        expected: (frame.width, frame.height),
                        actual: (surface.width(), surface.height()),
                    });
                }
                let format = surface.format();
                let mut view = surface.view_mut().ok_or(FrameError::UnsupportedPixelFormat {
                    frame_num: frame.frame_num,
                    format,
                })?;
                for region in &regions {
                    blur_region(&mut view, region, kernel);
                }
            }
            RedactStrategy::Fill => {
                for region in &regions {
                    frame.add_overlay(opaque_fill(region));
                }
            }
        }

        debug!("Frame {}: redacted {} region(s)", frame.frame_num, regions.len());
        Ok(FrameReport {
            applied: regions.len(),
            discarded,
        })
    }

    /// Redact every frame of a batched buffer
    ///
    /// A frame that cannot be processed is logged, counted and left as is;
    /// the others are still redacted. Returns the number of regions applied.
    pub fn redact_buffer(&self, buffer: &mut Buffer) -> usize {
        self.health.record_buffer();

        let (batch, surfaces) = buffer.parts_mut();
        let Some(batch) = batch else {
            debug!("Buffer without batch metadata, nothing to redact");
            return 0;
        };

        let mut applied = 0;
        for frame in batch.frames_mut() {
            let surface = surfaces.get_mut(frame.batch_id).and_then(Option::as_mut);
            match self.redact_frame(frame, surface) {
                Ok(report) => {
                    self.health
                        .record_frame(report.applied as u64, report.discarded as u64);
                    applied += report.applied;
                }
                Err(e) => {
                    warn!("Skipping frame: {}", e);
                    self.health.record_skipped_frame();
                }
            }
        }
        applied
    }
}

impl BufferProbe for RedactionEngine {
    fn on_buffer(&mut self, _port: &PortRef, buffer: &mut Buffer) -> ProbeReturn {
        self.redact_buffer(buffer);
        ProbeReturn::Pass
    }
}
