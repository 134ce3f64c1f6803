//! Video sources - demux, decode and seek primitives
//!
//! A source owns exactly one open decode context. It is never shared:
//! every component that decodes (serving path, index builders, streaming
//! worker) opens its own through a [`SourceFactory`]. Dropping a source
//! releases its native resources.
//!
//! [`FrameStream`] turns the packet/decode primitives into a lazy sequence
//! of decoded frames that restarts from the seek point after every seek.

use std::collections::VecDeque;

use crate::error::Result;
use crate::frame::FrameBuffer;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
pub mod synthetic;

#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::{FfmpegFactory, FfmpegSource};
pub use synthetic::{ContainerFlavor, SyntheticSource, SyntheticVideo};

/// Static stream properties read at open time
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: usize,
    pub height: usize,
    /// Average frame rate
    pub fps: f64,
    /// Stream time base as `(num, den)`
    pub time_base: (i32, i32),
    /// PTS of the first frame, if the container reports one
    pub start_pts: Option<i64>,
    /// Frame count stored in the container (known a priori)
    pub declared_frames: Option<usize>,
    /// Frame count estimated from duration × fps
    pub estimated_frames: Option<usize>,
}

impl StreamInfo {
    /// Seconds per time base tick
    pub fn tick(&self) -> f64 {
        let (num, den) = self.time_base;
        if den == 0 {
            0.0
        } else {
            num as f64 / den as f64
        }
    }

    pub fn pts_to_secs(&self, pts: i64) -> f64 {
        pts as f64 * self.tick()
    }

    /// Decimal digits needed to represent one time base tick
    pub fn time_digits(&self) -> u32 {
        let tick = self.tick();
        if tick <= 0.0 {
            return 6;
        }
        // tolerance keeps exact powers of ten (1/1000) from rounding up a digit
        (-tick.log10() - 1e-9).ceil().clamp(0.0, 9.0) as u32
    }

    /// Best frame count known without decoding
    pub fn frame_count_hint(&self) -> Option<usize> {
        self.declared_frames.or(self.estimated_frames)
    }
}

/// Timing metadata of a decoded (not yet converted) frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameMeta {
    pub pts: i64,
    /// Container-reported presentation time in seconds
    pub time: f64,
    pub is_key: bool,
}

/// Decoded frame handle owned by a source
pub trait SourceFrame {
    fn meta(&self) -> FrameMeta;
}

/// One open decode context for one video stream
pub trait VideoSource: Send {
    type Packet: Send;
    type Frame: SourceFrame + Send;

    fn info(&self) -> &StreamInfo;

    /// Next packet of this stream, `None` at end of stream
    fn read_packet(&mut self) -> Result<Option<Self::Packet>>;

    /// Feed one packet (or `None` to drain) and collect output frames
    fn decode(&mut self, packet: Option<&Self::Packet>, out: &mut Vec<Self::Frame>) -> Result<()>;

    /// Reposition the demuxer. With `backward`, lands on the nearest keyframe
    /// at or before `target_pts`. Resets decoder state.
    fn seek(&mut self, target_pts: i64, backward: bool) -> Result<()>;

    /// Ask the decoder to drop non-keyframes (keyframe indexing)
    fn set_skip_non_key(&mut self, skip: bool);

    /// Convert a decoded frame into an `H×W×3` f32 buffer
    fn to_buffer(&mut self, frame: &Self::Frame) -> Result<FrameBuffer>;
}

/// Opens fresh, exclusively owned sources for one file/stream
pub trait SourceFactory: Clone + Send + Sync + 'static {
    type Source: VideoSource + 'static;

    fn open(&self) -> Result<Self::Source>;

    /// Short label for logs and thread names
    fn describe(&self) -> String;
}

/// Lazy decoded-frame sequence over a source
pub struct FrameStream<S: VideoSource> {
    source: S,
    queue: VecDeque<S::Frame>,
    scratch: Vec<S::Frame>,
    drained: bool,
}

impl<S: VideoSource> FrameStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            queue: VecDeque::new(),
            scratch: Vec::new(),
            drained: false,
        }
    }

    pub fn info(&self) -> &StreamInfo {
        self.source.info()
    }

    /// True once the decoder has been drained at end of stream
    pub fn is_exhausted(&self) -> bool {
        self.drained && self.queue.is_empty()
    }

    /// Next decoded frame, `None` once the stream is exhausted
    pub fn next_frame(&mut self) -> Result<Option<S::Frame>> {
        loop {
            if let Some(frame) = self.queue.pop_front() {
                return Ok(Some(frame));
            }
            if self.drained {
                return Ok(None);
            }
            match self.source.read_packet()? {
                Some(packet) => self.source.decode(Some(&packet), &mut self.scratch)?,
                None => {
                    self.source.decode(None, &mut self.scratch)?;
                    self.drained = true;
                }
            }
            self.queue.extend(self.scratch.drain(..));
        }
    }

    /// Seek and restart the sequence from the new position
    pub fn seek(&mut self, target_pts: i64, backward: bool) -> Result<()> {
        self.queue.clear();
        self.scratch.clear();
        self.drained = false;
        self.source.seek(target_pts, backward)
    }

    pub fn to_buffer(&mut self, frame: &S::Frame) -> Result<FrameBuffer> {
        self.source.to_buffer(frame)
    }

    pub fn set_skip_non_key(&mut self, skip: bool) {
        self.source.set_skip_non_key(skip);
    }
}

/// Round seconds to `digits` decimals
pub fn round_time(secs: f64, digits: u32) -> f64 {
    let scale = 10f64.powi(digits as i32);
    (secs * scale).round() / scale
}
