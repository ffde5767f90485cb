//! Buffers moving through the streaming context
//!
//! A batched buffer carries one pixel surface per frame plus the batch
//! metadata written by the inference stage.

pub mod meta;

use bytes::BytesMut;
use image::{ImageBuffer, Rgba};

pub use meta::{
    BatchMeta, Color, DisplayMeta, FrameMeta, ObjectMeta, RectOverlay, RectParams,
    MAX_RECTS_PER_DISPLAY_META,
};

/// Mutable, zero-copy view of a packed 4-channel surface
pub type SurfaceView<'a> = ImageBuffer<Rgba<u8>, &'a mut [u8]>;

/// Pixel layout of a surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba,
    Bgrx,
    Nv12,
}

impl PixelFormat {
    /// Whether pixels are packed as four 8-bit channels
    pub fn is_packed_4ch(&self) -> bool {
        matches!(self, PixelFormat::Rgba | PixelFormat::Bgrx)
    }
}

/// Pixel memory of one frame
#[derive(Debug, Clone)]
pub struct Surface {
    width: u32,
    height: u32,
    format: PixelFormat,
    data: BytesMut,
}

impl Surface {
    /// Wrap existing pixel memory
    ///
    /// Returns `None` when `data` is too short for a packed surface of the
    /// given size.
    pub fn from_raw(width: u32, height: u32, format: PixelFormat, data: BytesMut) -> Option<Self> {
        if format.is_packed_4ch() && data.len() < width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            width,
            height,
            format,
            data,
        })
    }

    /// A surface filled with a single RGBA value
    pub fn filled(width: u32, height: u32, pixel: [u8; 4]) -> Self {
        let mut data = BytesMut::with_capacity(width as usize * height as usize * 4);
        for _ in 0..(width as usize * height as usize) {
            data.extend_from_slice(&pixel);
        }
        Self {
            width,
            height,
            format: PixelFormat::Rgba,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow the pixels as an image view; `None` for planar layouts
    pub fn view_mut(&mut self) -> Option<SurfaceView<'_>> {
        if !self.format.is_packed_4ch() {
            return None;
        }
        let len = self.width as usize * self.height as usize * 4;
        ImageBuffer::from_raw(self.width, self.height, &mut self.data[..len])
    }

    pub fn into_bytes(self) -> BytesMut {
        self.data
    }
}

/// A unit of media crossing a port
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    /// Presentation timestamp in nanoseconds
    pub pts: Option<u64>,
    surfaces: Vec<Option<Surface>>,
    batch: Option<BatchMeta>,
}

impl Buffer {
    pub fn new(surfaces: Vec<Option<Surface>>, batch: BatchMeta) -> Self {
        Self {
            pts: None,
            surfaces,
            batch: Some(batch),
        }
    }

    pub fn batch_meta(&self) -> Option<&BatchMeta> {
        self.batch.as_ref()
    }

    pub fn surface(&self, batch_id: usize) -> Option<&Surface> {
        self.surfaces.get(batch_id).and_then(Option::as_ref)
    }

    /// Split borrow of metadata and surfaces, so frames can be walked while
    /// their pixels are mutated
    pub fn parts_mut(&mut self) -> (Option<&mut BatchMeta>, &mut [Option<Surface>]) {
        (self.batch.as_mut(), &mut self.surfaces)
    }

    pub fn into_surfaces(self) -> Vec<Option<Surface>> {
        self.surfaces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_writes_through() {
        let mut surface = Surface::filled(4, 2, [1, 2, 3, 255]);
        {
            let mut view = surface.view_mut().unwrap();
            view.put_pixel(3, 1, Rgba([9, 9, 9, 9]));
        }
        let bytes = surface.as_bytes();
        assert_eq!(&bytes[..4], &[1, 2, 3, 255]);
        assert_eq!(&bytes[bytes.len() - 4..], &[9, 9, 9, 9]);
    }

    #[test]
    fn test_short_memory_is_rejected() {
        let data = BytesMut::from(&[0u8; 10][..]);
        assert!(Surface::from_raw(2, 2, PixelFormat::Rgba, data).is_none());
    }

    #[test]
    fn test_planar_has_no_packed_view() {
        let data = BytesMut::from(&[0u8; 6][..]);
        let mut surface = Surface::from_raw(2, 2, PixelFormat::Nv12, data).unwrap();
        assert!(surface.view_mut().is_none());
    }
}
