//! Screen capture contract and frame representation
//!
//! A [`ScreenSource`] lists the available monitors and grabs raw pixels for a
//! rectangle of the virtual screen. Frames keep the source's native channel
//! layout; [`Frame::pixel`] is the single place it gets normalized to RGB.

pub mod x11;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub use self::x11::X11Capture;

/// Rectangle in virtual-screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(left: i32, top: i32, width: u32, height: u32) -> Self {
        Self { left, top, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A selectable capture target
///
/// Index 0 is the whole virtual screen, 1..n are the individual outputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Monitor {
    pub index: u32,
    pub name: String,
    pub primary: bool,
    pub bounds: Region,
}

/// Byte order of one pixel in a captured buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    /// 4 bytes: blue, green, red, padding (X11 ZPixmap, LSB-first servers)
    Bgrx,
    /// 4 bytes: padding, red, green, blue (X11 ZPixmap, MSB-first servers)
    Xrgb,
    /// 3 bytes: red, green, blue
    Rgb,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Bgrx | PixelLayout::Xrgb => 4,
            PixelLayout::Rgb => 3,
        }
    }

    #[inline]
    fn to_rgb(self, px: &[u8]) -> [u8; 3] {
        match self {
            PixelLayout::Bgrx => [px[2], px[1], px[0]],
            PixelLayout::Xrgb => [px[1], px[2], px[3]],
            PixelLayout::Rgb => [px[0], px[1], px[2]],
        }
    }
}

/// Raw pixels for one cycle
#[derive(Debug, Clone)]
pub struct Frame {
    width: usize,
    height: usize,
    stride: usize,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap a tightly packed buffer (`stride = width * bytes_per_pixel`)
    pub fn new(width: usize, height: usize, layout: PixelLayout, data: Vec<u8>) -> Result<Self> {
        let stride = width * layout.bytes_per_pixel();
        Self::with_stride(width, height, stride, layout, data)
    }

    pub fn with_stride(
        width: usize,
        height: usize,
        stride: usize,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self> {
        if stride < width * layout.bytes_per_pixel() {
            bail!("Row stride {} too small for {} pixels of {:?}", stride, width, layout);
        }
        let needed = stride * height;
        if data.len() < needed {
            bail!(
                "Pixel buffer too short for {}x{} frame: got {} bytes, need {}",
                width,
                height,
                data.len(),
                needed
            );
        }
        Ok(Self { width, height, stride, layout, data })
    }

    /// Build an RGB frame from rows of pixels
    #[cfg(test)]
    pub fn from_rgb_rows(rows: &[Vec<[u8; 3]>]) -> Result<Self> {
        let height = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|row| row.len() != width) {
            bail!("Rows of a frame must all have the same length");
        }
        let data = rows.iter().flatten().flatten().copied().collect();
        Self::new(width, height, PixelLayout::Rgb, data)
    }

    /// A frame of a single color
    #[cfg(test)]
    pub fn uniform(width: usize, height: usize, rgb: [u8; 3]) -> Self {
        let data = std::iter::repeat_n(rgb, width * height).flatten().collect();
        Self { width, height, stride: width * 3, layout: PixelLayout::Rgb, data }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Pixel at (x, y) in RGB order, whatever the source layout
    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let bpp = self.layout.bytes_per_pixel();
        let start = y * self.stride + x * bpp;
        self.layout.to_rgb(&self.data[start..start + bpp])
    }
}

/// Screen-capture collaborator
///
/// Implementations keep their connection open across calls; the sync loop
/// owns one instance for the whole run.
pub trait ScreenSource {
    /// Index 0 is the whole virtual screen
    fn monitors(&mut self) -> Result<Vec<Monitor>>;

    fn capture_region(&mut self, region: Region) -> Result<Frame>;
}
