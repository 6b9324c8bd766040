use crate::{CaptureError, DisplayError, SegmentBacking, SharedSegment};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    #[default]
    LsbFirst,
    MsbFirst,
}

/// Bit masks selecting each colour channel of a packed pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelMasks {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
}

impl Default for ChannelMasks {
    fn default() -> Self {
        Self {
            red: 0x00FF_0000,
            green: 0x0000_FF00,
            blue: 0x0000_00FF,
        }
    }
}

/// Split a packed pixel into R, G, B bytes.
///
/// Red is shifted right 16 bits, green 8, blue not at all, each truncated to
/// the low byte after masking.
#[inline]
pub fn unpack_rgb(pixel: u32, masks: &ChannelMasks) -> [u8; 3] {
    [
        ((pixel & masks.red) >> 16) as u8,
        ((pixel & masks.green) >> 8) as u8,
        (pixel & masks.blue) as u8,
    ]
}

/// ZPixmap image descriptor: how pixels are laid out in the shared segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub depth: u8,
    pub bits_per_pixel: u8,

    /// Row stride, including scanline padding
    pub bytes_per_line: u32,

    pub byte_order: ByteOrder,
    pub masks: ChannelMasks,
}

impl ImageLayout {
    /// Build a layout whose rows are padded to `scanline_pad` bits.
    pub fn new(
        width: u32,
        height: u32,
        depth: u8,
        bits_per_pixel: u8,
        scanline_pad: u8,
        byte_order: ByteOrder,
        masks: ChannelMasks,
    ) -> Result<Self, DisplayError> {
        if !matches!(bits_per_pixel, 8 | 16 | 24 | 32) {
            return Err(DisplayError::Unsupported(format!(
                "{bits_per_pixel} bits per pixel is not supported"
            )));
        }

        if scanline_pad == 0 || scanline_pad % 8 != 0 {
            return Err(DisplayError::Unsupported(format!(
                "scanline pad of {scanline_pad} bits is not supported"
            )));
        }

        let pad = scanline_pad as u64;
        let row_bits = width as u64 * bits_per_pixel as u64;
        let bytes_per_line = row_bits.div_ceil(pad) * pad / 8;
        let bytes_per_line = u32::try_from(bytes_per_line)
            .map_err(|_| DisplayError::Unsupported(format!("image row of {width} pixels is too wide")))?;

        Ok(Self {
            width,
            height,
            depth,
            bits_per_pixel,
            bytes_per_line,
            byte_order,
            masks,
        })
    }

    /// Bytes of shared memory this image occupies.
    pub fn byte_len(&self) -> usize {
        self.bytes_per_line as usize * self.height as usize
    }

    pub fn bytes_per_pixel(&self) -> usize {
        self.bits_per_pixel as usize / 8
    }

    /// Byte offset of pixel `(x, y)` within the segment.
    pub fn offset(&self, x: u32, y: u32) -> usize {
        y as usize * self.bytes_per_line as usize + x as usize * self.bytes_per_pixel()
    }
}

/// An image descriptor bound to the shared segment that stores its pixels.
#[derive(Debug)]
pub struct ShmImage {
    layout: ImageLayout,
    segment: SharedSegment,
}

impl ShmImage {
    /// Allocate a segment of exactly `layout.byte_len()` bytes for `layout`.
    pub fn allocate(layout: ImageLayout, backing: SegmentBacking) -> std::io::Result<Self> {
        let segment = SharedSegment::allocate(backing, layout.byte_len())?;
        Ok(Self { layout, segment })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn segment(&self) -> &SharedSegment {
        &self.segment
    }

    pub fn segment_mut(&mut self) -> &mut SharedSegment {
        &mut self.segment
    }

    /// Bytes of packed RGB the whole image unpacks to.
    pub fn rgb_len(&self) -> usize {
        self.layout.width as usize * self.layout.height as usize * 3
    }

    /// Packed pixel value at `(x, y)`.
    ///
    /// `None` if `(x, y)` is outside the image or the segment is unmapped.
    pub fn pixel(&self, x: u32, y: u32) -> Option<u32> {
        if x >= self.layout.width || y >= self.layout.height {
            return None;
        }

        let offset = self.layout.offset(x, y);
        let bytes = self
            .segment
            .as_slice()
            .get(offset..offset + self.layout.bytes_per_pixel())?;

        let pixel = match self.layout.byte_order {
            ByteOrder::LsbFirst => bytes
                .iter()
                .rev()
                .fold(0, |acc, b| (acc << 8) | *b as u32),
            ByteOrder::MsbFirst => bytes.iter().fold(0, |acc, b| (acc << 8) | *b as u32),
        };
        Some(pixel)
    }

    /// Unpack the whole image into `out` as tightly packed R, G, B bytes.
    ///
    /// Pixels are visited row by row through logical coordinates, so any row
    /// padding in the segment never reaches `out`. Writes exactly
    /// [`rgb_len`](Self::rgb_len) bytes and leaves the rest of `out` alone.
    pub fn write_rgb(&self, out: &mut [u8]) -> Result<(), CaptureError> {
        let expected = self.rgb_len();
        if out.len() < expected {
            return Err(CaptureError::BufferTooSmall {
                expected,
                actual: out.len(),
            });
        }

        if self.segment.as_slice().len() < self.layout.byte_len() {
            return Err(CaptureError::NotInitialized);
        }

        let (width, height) = (self.layout.width, self.layout.height);
        let masks = self.layout.masks;
        let coords = (0..height).flat_map(|y| (0..width).map(move |x| (x, y)));

        for (dst, (x, y)) in out[..expected].chunks_exact_mut(3).zip(coords) {
            let pixel = self.pixel(x, y).ok_or(CaptureError::NotInitialized)?;
            dst.copy_from_slice(&unpack_rgb(pixel, &masks));
        }

        Ok(())
    }
}
