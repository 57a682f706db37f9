//! Render target abstraction and the RGBA pixel buffer handed across the
//! host boundary.

use crate::error::{BridgeError, Result};
use crate::platform::PlatformSendSync;

/// Bytes per RGBA pixel.
pub const BYTES_PER_PIXEL: usize = 4;

/// Tightly packed RGBA image with top-left origin.
///
/// The byte length is always exactly `width * height * 4`; every constructor
/// enforces it. Buffers are returned to callers by value, the engine keeps no
/// reference after handing one out.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap existing RGBA bytes, rejecting a length mismatch.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = Self::expected_len(width, height);
        if data.len() != expected {
            return Err(BridgeError::InvalidBuffer {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer of the given size with every pixel set to `rgba`.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            data.extend_from_slice(&rgba);
        }
        Self {
            width,
            height,
            data,
        }
    }

    /// Byte length required for a `width` x `height` RGBA image.
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * BYTES_PER_PIXEL
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// RGBA value at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * BYTES_PER_PIXEL;
        let px = &self.data[offset..offset + BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Host render target (Android `Surface`, `CAMetalLayer`, a desktop window).
///
/// The engine converts every presented video frame to RGBA before calling
/// [`present`](RenderSurface::present). Sessions hold only a weak reference
/// to the surface, so dropping the host's last `Arc` detaches it.
pub trait RenderSurface: PlatformSendSync {
    /// Present one frame. Called from the session's decode worker.
    fn present(&self, frame: &PixelBuffer) -> Result<()>;

    /// Size the surface wants frames scaled to. `None` keeps the decoded size.
    fn preferred_size(&self) -> Option<(u32, u32)> {
        None
    }
}
