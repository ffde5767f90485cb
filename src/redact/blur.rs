//! Gaussian blur confined to a rectangle
//!
//! The kernel is applied separably, horizontal then vertical. Samples that
//! fall outside the rectangle are reflected back into it (`dcb|abcd|cba`),
//! so pixels outside the rectangle are never read nor written.

use std::str::FromStr;

use image::Rgba;
use serde::Deserialize;

use crate::buffer::SurfaceView;
use crate::error::{PipelineError, Result};
use crate::redact::region::RedactionRegion;

/// Kernel width and height used when none is configured
pub const DEFAULT_KERNEL_SIZE: u32 = 51;

/// Kernel dimensions in taps
///
/// Settings accept `51`, `[51, 31]` or `"51x31"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "KernelSizeRepr")]
pub struct KernelSize {
    pub width: u32,
    pub height: u32,
}

impl KernelSize {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
}

impl Default for KernelSize {
    fn default() -> Self {
        Self::square(DEFAULT_KERNEL_SIZE)
    }
}

impl std::fmt::Display for KernelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for KernelSize {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidConfig(format!("kernel size '{}' is not N or WxH", s));
        let dim = |part: &str| part.trim().parse::<u32>().map_err(|_| invalid());
        match s.split_once(['x', 'X']) {
            Some((width, height)) => Ok(Self {
                width: dim(width)?,
                height: dim(height)?,
            }),
            None => Ok(Self::square(dim(s)?)),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum KernelSizeRepr {
    Square(u32),
    Pair([u32; 2]),
    Text(String),
}

impl TryFrom<KernelSizeRepr> for KernelSize {
    type Error = PipelineError;

    fn try_from(repr: KernelSizeRepr) -> Result<Self> {
        match repr {
            KernelSizeRepr::Square(size) => Ok(Self::square(size)),
            KernelSizeRepr::Pair([width, height]) => Ok(Self { width, height }),
            KernelSizeRepr::Text(text) => text.parse(),
        }
    }
}

/// Normalised 1-D Gaussian weights for each axis
#[derive(Debug, Clone, PartialEq)]
pub struct BlurKernel {
    size: KernelSize,
    horizontal: Vec<f32>,
    vertical: Vec<f32>,
}

impl BlurKernel {
    /// Kernel of `size.width` × `size.height` taps; both must be odd and at least 3
    pub fn new(size: KernelSize) -> Result<Self> {
        for (axis, taps) in [("width", size.width), ("height", size.height)] {
            if taps < 3 || taps % 2 == 0 {
                return Err(PipelineError::InvalidConfig(format!(
                    "blur kernel {} must be odd and at least 3, got {}",
                    axis, taps
                )));
            }
        }

        Ok(Self::gaussian(size))
    }

    pub fn square(size: u32) -> Result<Self> {
        Self::new(KernelSize::square(size))
    }

    fn gaussian(size: KernelSize) -> Self {
        Self {
            size,
            horizontal: Self::weights_for(size.width),
            vertical: Self::weights_for(size.height),
        }
    }

    fn weights_for(taps: u32) -> Vec<f32> {
        let sigma = Self::sigma_for(taps);
        let radius = (taps / 2) as i32;
        let mut weights: Vec<f32> = (-radius..=radius)
            .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
            .collect();
        let sum: f32 = weights.iter().sum();
        weights.iter_mut().for_each(|w| *w /= sum);
        weights
    }

    /// Sigma derived from the tap count
    fn sigma_for(taps: u32) -> f32 {
        0.3 * ((taps as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }

    pub fn size(&self) -> KernelSize {
        self.size
    }

    /// Horizontal and vertical sigma
    pub fn sigma(&self) -> (f32, f32) {
        (Self::sigma_for(self.size.width), Self::sigma_for(self.size.height))
    }

    pub fn horizontal(&self) -> &[f32] {
        &self.horizontal
    }

    pub fn vertical(&self) -> &[f32] {
        &self.vertical
    }
}

impl Default for BlurKernel {
    fn default() -> Self {
        Self::gaussian(KernelSize::default())
    }
}

/// Mirror an index into `0..len` without repeating the edge sample
fn reflect_101(mut i: i64, len: i64) -> usize {
    if len == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= len {
            i = 2 * len - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Blur every channel of `region` in place
///
/// `region` must lie inside the image.
pub fn blur_region(image: &mut SurfaceView<'_>, region: &RedactionRegion, kernel: &BlurKernel) {
    let (w, h) = (region.width() as usize, region.height() as usize);
    let radius_x = (kernel.horizontal().len() / 2) as i64;
    let radius_y = (kernel.vertical().len() / 2) as i64;

    let mut src = Vec::with_capacity(w * h);
    for y in 0..h as u32 {
        for x in 0..w as u32 {
            let p = image.get_pixel(region.left + x, region.top + y);
            src.push(p.0.map(f32::from));
        }
    }

    let mut horizontal = vec![[0f32; 4]; w * h];
    for y in 0..h {
        let row = &src[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = [0f32; 4];
            for (k, weight) in kernel.horizontal().iter().enumerate() {
                let sample = row[reflect_101(x as i64 + k as i64 - radius_x, w as i64)];
                for c in 0..4 {
                    acc[c] += weight * sample[c];
                }
            }
            horizontal[y * w + x] = acc;
        }
    }

    for y in 0..h {
        for x in 0..w {
            let mut acc = [0f32; 4];
            for (k, weight) in kernel.vertical().iter().enumerate() {
                let sy = reflect_101(y as i64 + k as i64 - radius_y, h as i64);
                let sample = horizontal[sy * w + x];
                for c in 0..4 {
                    acc[c] += weight * sample[c];
                }
            }
            let pixel = Rgba(acc.map(|v| v.round().clamp(0.0, 255.0) as u8));
            image.put_pixel(region.left + x as u32, region.top + y as u32, pixel);
        }
    }
}
