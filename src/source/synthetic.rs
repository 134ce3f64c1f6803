//! In-memory video source
//!
//! Behaves like a demuxer + decoder over a fixed-GOP stream: one packet per
//! frame, keyframes every `gop` frames, backward seeks land on the nearest
//! preceding keyframe. Pixel values encode the frame ordinal so callers can
//! check which frame they received. Used by tests, benchmarks and demos
//! that must run without native media files.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{FrameMeta, SourceFactory, SourceFrame, StreamInfo, VideoSource};
use crate::error::{EngineError, Result};
use crate::frame::FrameBuffer;

/// Time base conventions of common containers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerFlavor {
    /// 1/90000 time base, frame count stored in the header
    Mp4,
    /// Millisecond time base, no stored frame count
    Mkv,
    /// One tick per frame, frame count stored in the header
    Avi,
}

/// Shared counters, visible through every clone of a [`SyntheticVideo`]
#[derive(Debug, Default)]
pub struct SyntheticStats {
    pub opens: AtomicUsize,
    pub seeks: AtomicUsize,
    pub decoded: AtomicUsize,
}

/// Description of a synthetic stream; also its [`SourceFactory`]
#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    frames: usize,
    width: usize,
    height: usize,
    fps: f64,
    gop: usize,
    flavor: ContainerFlavor,
    start_pts: i64,
    decode_delay: Option<Duration>,
    fail_open: bool,
    fail_seeks: Arc<AtomicUsize>,
    empty_seeks: Arc<AtomicUsize>,
    estimated: Option<usize>,
    crash_next: Arc<AtomicBool>,
    stats: Arc<SyntheticStats>,
}

impl SyntheticVideo {
    /// MP4-flavored stream with a keyframe every 10 frames
    pub fn new(frames: usize, width: usize, height: usize, fps: f64) -> Self {
        Self {
            frames,
            width,
            height,
            fps,
            gop: 10,
            flavor: ContainerFlavor::Mp4,
            start_pts: 0,
            decode_delay: None,
            fail_open: false,
            fail_seeks: Arc::new(AtomicUsize::new(0)),
            empty_seeks: Arc::new(AtomicUsize::new(0)),
            estimated: None,
            crash_next: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(SyntheticStats::default()),
        }
    }

    pub fn with_gop(mut self, gop: usize) -> Self {
        self.gop = gop.max(1);
        self
    }

    pub fn with_flavor(mut self, flavor: ContainerFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn with_start_pts(mut self, start_pts: i64) -> Self {
        self.start_pts = start_pts;
        self
    }

    /// Report `n` as the duration-based frame estimate instead of the true count
    pub fn with_estimated_frames(mut self, n: usize) -> Self {
        self.estimated = Some(n);
        self
    }

    /// Sleep this long per decoded packet
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.decode_delay = Some(delay);
        self
    }

    pub fn with_failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Make the next `n` seeks (across all sources of this video) fail
    pub fn fail_next_seeks(&self, n: usize) {
        self.fail_seeks.store(n, Ordering::SeqCst);
    }

    /// The next `n` successful seeks land at end of stream (no packets follow)
    pub fn truncate_next_seeks(&self, n: usize) {
        self.empty_seeks.store(n, Ordering::SeqCst);
    }

    /// The next opened source panics on its first decode call
    pub fn crash_next_open(&self) {
        self.crash_next.store(true, Ordering::SeqCst);
    }

    pub fn stats(&self) -> &SyntheticStats {
        &self.stats
    }

    pub fn seeks(&self) -> usize {
        self.stats.seeks.load(Ordering::SeqCst)
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn time_base(&self) -> (i32, i32) {
        match self.flavor {
            ContainerFlavor::Mp4 => (1, 90_000),
            ContainerFlavor::Mkv => (1, 1000),
            ContainerFlavor::Avi => {
                // one tick per frame; non-integer rates use a millisecond-ish base
                if self.fps.fract() == 0.0 && self.fps > 0.0 {
                    (1, self.fps as i32)
                } else {
                    (1, 1000)
                }
            }
        }
    }

    /// PTS of frame `i`
    pub fn pts_of(&self, i: usize) -> i64 {
        let (num, den) = self.time_base();
        let ticks = i as f64 * den as f64 / (self.fps * num as f64);
        self.start_pts + ticks.round() as i64
    }

    pub fn is_key(&self, i: usize) -> bool {
        i % self.gop == 0
    }

    /// Recover the ordinal encoded in a buffer produced by this source
    pub fn ordinal_of(buffer: &FrameBuffer) -> Option<usize> {
        let [r, g, b] = buffer.pixel(0, 0)?;
        let byte = |v: f32| (v * 255.0).round() as usize;
        Some(byte(r) | (byte(g) << 8) | (byte(b) << 16))
    }

    fn info(&self) -> StreamInfo {
        let declared = match self.flavor {
            ContainerFlavor::Mkv => None,
            ContainerFlavor::Mp4 | ContainerFlavor::Avi => Some(self.frames),
        };
        StreamInfo {
            width: self.width,
            height: self.height,
            fps: self.fps,
            time_base: self.time_base(),
            start_pts: Some(self.start_pts),
            declared_frames: declared,
            estimated_frames: Some(self.estimated.unwrap_or(self.frames)),
        }
    }
}

impl SourceFactory for SyntheticVideo {
    type Source = SyntheticSource;

    fn open(&self) -> Result<SyntheticSource> {
        if self.fail_open {
            return Err(EngineError::Open("synthetic source configured to fail".into()));
        }
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(SyntheticSource {
            info: self.info(),
            video: self.clone(),
            position: 0,
            skip_non_key: false,
            crash: self.crash_next.swap(false, Ordering::SeqCst),
        })
    }

    fn describe(&self) -> String {
        format!("synthetic:{}f@{}:{:?}", self.frames, self.fps, self.flavor)
    }
}

/// Packet of a synthetic stream (one per frame)
#[derive(Debug, Clone, Copy)]
pub struct SyntheticPacket {
    index: usize,
}

/// Decoded synthetic frame
#[derive(Debug, Clone, Copy)]
pub struct SyntheticFrame {
    index: usize,
    meta: FrameMeta,
}

impl SyntheticFrame {
    pub fn index(&self) -> usize {
        self.index
    }
}

impl SourceFrame for SyntheticFrame {
    fn meta(&self) -> FrameMeta {
        self.meta
    }
}

/// Open synthetic stream
#[derive(Debug)]
pub struct SyntheticSource {
    video: SyntheticVideo,
    info: StreamInfo,
    position: usize,
    skip_non_key: bool,
    crash: bool,
}

impl VideoSource for SyntheticSource {
    type Packet = SyntheticPacket;
    type Frame = SyntheticFrame;

    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<SyntheticPacket>> {
        if self.position >= self.video.frames {
            return Ok(None);
        }
        let packet = SyntheticPacket {
            index: self.position,
        };
        self.position += 1;
        Ok(Some(packet))
    }

    fn decode(&mut self, packet: Option<&SyntheticPacket>, out: &mut Vec<SyntheticFrame>) -> Result<()> {
        if self.crash {
            panic!("synthetic decoder crashed");
        }
        let Some(packet) = packet else {
            return Ok(());
        };
        if let Some(delay) = self.video.decode_delay {
            std::thread::sleep(delay);
        }
        let i = packet.index;
        let is_key = self.video.is_key(i);
        if self.skip_non_key && !is_key {
            return Ok(());
        }
        self.video.stats.decoded.fetch_add(1, Ordering::Relaxed);
        let pts = self.video.pts_of(i);
        out.push(SyntheticFrame {
            index: i,
            meta: FrameMeta {
                pts,
                time: self.info.pts_to_secs(pts),
                is_key,
            },
        });
        Ok(())
    }

    fn seek(&mut self, target_pts: i64, backward: bool) -> Result<()> {
        self.video.stats.seeks.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .video
            .fail_seeks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::Seek {
                target: target_pts,
                reason: "injected failure".into(),
            });
        }

        let video = &self.video;
        let keyframes = (0..video.frames).filter(|&i| video.is_key(i));
        let landing = if backward {
            keyframes
                .take_while(|&i| video.pts_of(i) <= target_pts)
                .last()
                .or(if video.frames > 0 { Some(0) } else { None })
        } else {
            keyframes.into_iter().find(|&i| video.pts_of(i) >= target_pts)
        };
        let truncated = landing.is_some()
            && video
                .empty_seeks
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
        match landing {
            Some(_) if truncated => {
                self.position = video.frames;
                Ok(())
            }
            Some(i) => {
                self.position = i;
                Ok(())
            }
            None => Err(EngineError::Seek {
                target: target_pts,
                reason: "no keyframe in seek direction".into(),
            }),
        }
    }

    fn set_skip_non_key(&mut self, skip: bool) {
        self.skip_non_key = skip;
    }

    fn to_buffer(&mut self, frame: &SyntheticFrame) -> Result<FrameBuffer> {
        let i = frame.index;
        let channel = |shift: usize| ((i >> shift) & 0xff) as f32 / 255.0;
        let rgb = [channel(0), channel(8), channel(16)];
        let mut buffer = FrameBuffer::new(self.info.width, self.info.height);
        for px in buffer.as_mut_slice().chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test: pts spacing follows the container time base
    #[test]
    fn test_flavor_pts() {
        let mp4 = SyntheticVideo::new(10, 2, 2, 25.0);
        assert_eq!(mp4.pts_of(1), 3600);

        let mkv = SyntheticVideo::new(10, 2, 2, 30.0).with_flavor(ContainerFlavor::Mkv);
        assert_eq!(mkv.pts_of(1), 33);
        assert_eq!(mkv.pts_of(2), 67);

        let avi = SyntheticVideo::new(10, 2, 2, 25.0).with_flavor(ContainerFlavor::Avi);
        assert_eq!(avi.time_base(), (1, 25));
        assert_eq!(avi.pts_of(7), 7);
    }

    /// Test: pixel encoding round-trips the ordinal
    #[test]
    fn test_ordinal_encoding() {
        let video = SyntheticVideo::new(70_000, 2, 2, 25.0);
        let mut source = video.open().unwrap();
        for i in [0usize, 1, 255, 256, 65_537] {
            let frame = SyntheticFrame {
                index: i,
                meta: FrameMeta { pts: video.pts_of(i), time: 0.0, is_key: false },
            };
            let buf = source.to_buffer(&frame).unwrap();
            assert_eq!(SyntheticVideo::ordinal_of(&buf), Some(i));
        }
    }

    /// Test: skip-non-key decoding yields keyframes only
    #[test]
    fn test_skip_non_key() {
        let video = SyntheticVideo::new(20, 2, 2, 25.0).with_gop(5);
        let mut source = video.open().unwrap();
        source.set_skip_non_key(true);
        let mut out = Vec::new();
        while let Some(p) = source.read_packet().unwrap() {
            source.decode(Some(&p), &mut out).unwrap();
        }
        let idx: Vec<usize> = out.iter().map(|f| f.index()).collect();
        assert_eq!(idx, vec![0, 5, 10, 15]);
    }

    /// Test: injected seek failures are consumed one per seek
    #[test]
    fn test_fail_seeks() {
        let video = SyntheticVideo::new(20, 2, 2, 25.0);
        let mut source = video.open().unwrap();
        video.fail_next_seeks(1);
        assert!(source.seek(0, true).is_err());
        assert!(source.seek(0, true).is_ok());
        assert_eq!(video.seeks(), 2);
        // forward seek past the last keyframe fails
        assert!(source.seek(video.pts_of(19), false).is_err());
    }

    /// Test: truncated seek leaves nothing to read, the next seek is normal
    #[test]
    fn test_truncate_next_seeks() {
        let video = SyntheticVideo::new(20, 2, 2, 25.0).with_gop(5);
        let mut source = video.open().unwrap();
        video.truncate_next_seeks(1);
        source.seek(video.pts_of(7), true).unwrap();
        assert!(source.read_packet().unwrap().is_none());
        source.seek(video.pts_of(7), true).unwrap();
        assert_eq!(source.read_packet().unwrap().map(|p| p.index), Some(5));
    }

    /// Test: start pts offsets every frame, estimate override is reported
    #[test]
    fn test_start_pts_and_estimate() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0).with_start_pts(1234).with_estimated_frames(6);
        assert_eq!(video.pts_of(0), 1234);
        assert_eq!(video.pts_of(1), 1234 + 3600);
        let source = video.open().unwrap();
        assert_eq!(source.info().start_pts, Some(1234));
        assert_eq!(source.info().estimated_frames, Some(6));
        assert_eq!(source.info().declared_frames, Some(10));
    }
}
