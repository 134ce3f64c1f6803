//! Decoded frame buffers
//!
//! **Layout**: every buffer is row-major `H×W×3` f32, RGB, normalized to
//! `[0, 1]`. Sources convert into this layout once, only for frames that
//! are actually returned to a caller.
//!
//! **Used by**: SeekPlanner (cursor frame), SharedFrameChannel (frame slot),
//! ConsumerSync (display buffer), `read_slice` (stacked output).

use crate::error::{EngineError, Result};

/// Number of channels in every buffer (RGB)
pub const CHANNELS: usize = 3;

/// `H×W×3` f32 pixel buffer
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FrameBuffer {
    /// Black buffer of the given size
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height * CHANNELS],
        }
    }

    /// Wrap existing samples. Length must be `width * height * 3`.
    pub fn from_vec(width: usize, height: usize, data: Vec<f32>) -> Result<Self> {
        if data.len() != width * height * CHANNELS {
            return Err(EngineError::Decode(format!(
                "Buffer length {} does not match {}x{}x{}",
                data.len(),
                height,
                width,
                CHANNELS
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Convert packed RGB24 rows (with stride) into normalized floats.
    pub fn from_rgb8(width: usize, height: usize, rgb: &[u8], stride: usize) -> Result<Self> {
        let row_bytes = width * CHANNELS;
        if stride < row_bytes || rgb.len() < stride * height.saturating_sub(1) + row_bytes {
            return Err(EngineError::Decode(format!(
                "RGB24 plane too small for {}x{} (stride {}, {} bytes)",
                width,
                height,
                stride,
                rgb.len()
            )));
        }
        let mut data = Vec::with_capacity(row_bytes * height);
        for y in 0..height {
            let row = &rgb[y * stride..y * stride + row_bytes];
            data.extend(row.iter().map(|&v| v as f32 / 255.0));
        }
        Ok(Self { width, height, data })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Shape as `(height, width)`
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// RGB sample at `(x, y)`
    pub fn pixel(&self, x: usize, y: usize) -> Option<[f32; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y * self.width + x) * CHANNELS;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Quantize back to 8-bit RGB (for PNG export)
    pub fn to_rgb8(&self) -> Vec<u8> {
        self.data
            .iter()
            .map(|&v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect()
    }
}

/// Frame produced by the decode path
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// Presentation timestamp in stream time base units
    pub pts: i64,
    /// Presentation time in seconds, as reported by the container
    pub time: f64,
    pub pixels: FrameBuffer,
}

/// Contiguous `(count, H, W, 3)` block returned by slice reads
#[derive(Debug, Clone, PartialEq)]
pub struct FrameStack {
    pub count: usize,
    pub height: usize,
    pub width: usize,
    /// Ordinal of each stacked frame, in output order
    pub ordinals: Vec<usize>,
    pub data: Vec<f32>,
}

impl FrameStack {
    pub fn with_capacity(count: usize, height: usize, width: usize) -> Self {
        Self {
            count: 0,
            height,
            width,
            ordinals: Vec::with_capacity(count),
            data: Vec::with_capacity(count * height * width * CHANNELS),
        }
    }

    /// Append one frame; shape must match the stack.
    pub fn push(&mut self, ordinal: usize, frame: &FrameBuffer) -> Result<()> {
        if frame.shape() != (self.height, self.width) {
            return Err(EngineError::ShapeMismatch {
                expected: (self.height, self.width),
                found: frame.shape(),
            });
        }
        self.data.extend_from_slice(frame.as_slice());
        self.ordinals.push(ordinal);
        self.count += 1;
        Ok(())
    }

    fn frame_len(&self) -> usize {
        self.height * self.width * CHANNELS
    }

    /// Samples of the `i`-th stacked frame
    pub fn frame(&self, i: usize) -> Option<&[f32]> {
        if i >= self.count {
            return None;
        }
        let n = self.frame_len();
        Some(&self.data[i * n..(i + 1) * n])
    }

    /// Reverse frame order in place (negative-step slices)
    pub fn reverse(&mut self) {
        let n = self.frame_len();
        if n == 0 || self.count < 2 {
            self.ordinals.reverse();
            return;
        }
        let mut out = Vec::with_capacity(self.data.len());
        for chunk in self.data.chunks_exact(n).rev() {
            out.extend_from_slice(chunk);
        }
        self.data = out;
        self.ordinals.reverse();
    }
}
