//! FFmpeg-backed video source
//!
//! Opens the N-th video stream of a container, demuxes its packets, decodes
//! with frame threading and converts selected frames to RGB24 → f32.
//! Seeks go through `av_seek_frame` on the stream's own time base so the
//! caller's PTS values can be used directly.

use std::path::{Path, PathBuf};
use std::sync::Once;

use log::{debug, trace, warn};
use playa_ffmpeg as ffmpeg;

use super::{FrameMeta, SourceFactory, SourceFrame, StreamInfo, VideoSource};
use crate::error::{EngineError, Result};
use crate::frame::FrameBuffer;

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        if let Err(e) = ffmpeg::init() {
            warn!("FFmpeg init failed: {}", e);
        }
        unsafe {
            // Silence FFmpeg's own stderr output
            ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_QUIET);
        }
    });
}

fn rational(r: ffmpeg::Rational) -> f64 {
    if r.denominator() == 0 {
        0.0
    } else {
        r.numerator() as f64 / r.denominator() as f64
    }
}

/// Opens `FfmpegSource`s for one file and video stream
#[derive(Debug, Clone)]
pub struct FfmpegFactory {
    path: PathBuf,
    stream_index: usize,
    decode_threads: usize,
}

impl FfmpegFactory {
    /// `stream_index` counts video streams only (0 = first video stream)
    pub fn new(path: impl Into<PathBuf>, stream_index: usize) -> Self {
        Self {
            path: path.into(),
            stream_index,
            decode_threads: 0,
        }
    }

    pub fn with_decode_threads(mut self, threads: usize) -> Self {
        self.decode_threads = threads;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceFactory for FfmpegFactory {
    type Source = FfmpegSource;

    fn open(&self) -> Result<FfmpegSource> {
        FfmpegSource::open(&self.path, self.stream_index, self.decode_threads)
    }

    fn describe(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());
        format!("{}#v{}", name, self.stream_index)
    }
}

/// Decoded FFmpeg frame plus its timing
pub struct FfmpegFrame {
    frame: ffmpeg::util::frame::video::Video,
    meta: FrameMeta,
}

impl SourceFrame for FfmpegFrame {
    fn meta(&self) -> FrameMeta {
        self.meta
    }
}

/// One open container + decoder for a single video stream
pub struct FfmpegSource {
    path: PathBuf,
    ictx: ffmpeg::format::context::Input,
    decoder: ffmpeg::decoder::Video,
    scaler: Option<ffmpeg::software::scaling::Context>,
    stream_index: usize,
    info: StreamInfo,
    last_pts: i64,
}

// SAFETY: every FFmpeg context here is owned by this value alone and only
// touched through `&mut self`; a source moves between threads but is never
// used from two at once.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    pub fn open(path: &Path, video_index: usize, decode_threads: usize) -> Result<Self> {
        init_ffmpeg();

        let ictx = ffmpeg::format::input(&path)
            .map_err(|e| EngineError::Open(format!("Failed to open {}: {}", path.display(), e)))?;

        let stream = ictx
            .streams()
            .filter(|s| s.parameters().medium() == ffmpeg::media::Type::Video)
            .nth(video_index)
            .ok_or_else(|| {
                EngineError::Open(format!(
                    "{} has no video stream #{}",
                    path.display(),
                    video_index
                ))
            })?;
        let stream_index = stream.index();

        let mut decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| EngineError::Open(format!("Failed to create decoder context: {}", e)))?;

        unsafe {
            (*decoder_ctx.as_mut_ptr()).thread_type = ffmpeg::ffi::FF_THREAD_FRAME;
            (*decoder_ctx.as_mut_ptr()).thread_count = decode_threads as i32;
        }

        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| EngineError::Open(format!("Failed to create video decoder: {}", e)))?;

        let fps_rational = stream.avg_frame_rate();
        let fps = match rational(fps_rational) {
            f if f > 0.0 => f,
            _ => rational(stream.rate()),
        };
        let time_base = stream.time_base();
        let tb = (time_base.numerator(), time_base.denominator());

        let declared = match stream.frames() {
            n if n > 0 => Some(n as usize),
            _ => None,
        };
        let duration = stream.duration();
        let estimated = if duration > 0 && fps > 0.0 {
            Some((duration as f64 * rational(time_base) * fps).round() as usize)
        } else {
            None
        };
        let start_pts = match stream.start_time() {
            t if t != ffmpeg::ffi::AV_NOPTS_VALUE => Some(t),
            _ => None,
        };

        let info = StreamInfo {
            width: decoder.width() as usize,
            height: decoder.height() as usize,
            fps,
            time_base: tb,
            start_pts,
            declared_frames: declared,
            estimated_frames: estimated,
        };
        debug!(
            "Opened {} stream {}: {}x{} @ {:.3} fps, tb {}/{}, frames {:?} (est {:?})",
            path.display(),
            stream_index,
            info.width,
            info.height,
            info.fps,
            tb.0,
            tb.1,
            declared,
            estimated
        );

        Ok(Self {
            path: path.to_path_buf(),
            ictx,
            decoder,
            scaler: None,
            stream_index,
            info,
            last_pts: start_pts.unwrap_or(0) - 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn scaler(&mut self) -> Result<&mut ffmpeg::software::scaling::Context> {
        if self.scaler.is_none() {
            let scaler = ffmpeg::software::scaling::Context::get(
                self.decoder.format(),
                self.decoder.width(),
                self.decoder.height(),
                ffmpeg::format::Pixel::RGB24,
                self.decoder.width(),
                self.decoder.height(),
                ffmpeg::software::scaling::Flags::BILINEAR,
            )
            .map_err(|e| EngineError::Decode(format!("Failed to create scaler: {}", e)))?;
            self.scaler = Some(scaler);
        }
        self.scaler
            .as_mut()
            .ok_or_else(|| EngineError::Decode("scaler unavailable".into()))
    }
}

impl VideoSource for FfmpegSource {
    type Packet = ffmpeg::Packet;
    type Frame = FfmpegFrame;

    fn info(&self) -> &StreamInfo {
        &self.info
    }

    fn read_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        let mut packet = ffmpeg::Packet::empty();
        loop {
            match packet.read(&mut self.ictx) {
                Ok(()) if packet.stream() == self.stream_index => return Ok(Some(packet)),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(EngineError::Decode(format!("Demux failed: {}", e))),
            }
        }
    }

    fn decode(&mut self, packet: Option<&ffmpeg::Packet>, out: &mut Vec<FfmpegFrame>) -> Result<()> {
        let sent = match packet {
            Some(p) => self.decoder.send_packet(p),
            None => self.decoder.send_eof(),
        };
        match sent {
            Ok(()) | Err(ffmpeg::Error::Eof) => {}
            Err(ffmpeg::Error::InvalidData) => {
                // Corrupt packet: skip it, decoder recovers on the next keyframe
                trace!("Dropping invalid packet in {}", self.path.display());
                return Ok(());
            }
            Err(e) => return Err(EngineError::Decode(format!("Failed to send packet: {}", e))),
        }

        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            let pts = decoded
                .pts()
                .or_else(|| decoded.timestamp())
                .unwrap_or(self.last_pts + 1);
            self.last_pts = pts;
            let meta = FrameMeta {
                pts,
                time: self.info.pts_to_secs(pts),
                is_key: decoded.is_key(),
            };
            out.push(FfmpegFrame {
                frame: std::mem::replace(&mut decoded, ffmpeg::util::frame::video::Video::empty()),
                meta,
            });
        }
        Ok(())
    }

    fn seek(&mut self, target_pts: i64, backward: bool) -> Result<()> {
        let flags = if backward {
            ffmpeg::ffi::AVSEEK_FLAG_BACKWARD as i32
        } else {
            0
        };
        let ret = unsafe {
            ffmpeg::ffi::av_seek_frame(
                self.ictx.as_mut_ptr(),
                self.stream_index as i32,
                target_pts,
                flags,
            )
        };
        if ret < 0 {
            return Err(EngineError::Seek {
                target: target_pts,
                reason: format!("av_seek_frame returned {}", ret),
            });
        }
        self.decoder.flush();
        trace!("Seeked {} to pts {} (backward={})", self.path.display(), target_pts, backward);
        Ok(())
    }

    fn set_skip_non_key(&mut self, skip: bool) {
        unsafe {
            (*self.decoder.as_mut_ptr()).skip_frame = if skip {
                ffmpeg::ffi::AVDiscard::AVDISCARD_NONKEY
            } else {
                ffmpeg::ffi::AVDiscard::AVDISCARD_DEFAULT
            };
        }
    }

    fn to_buffer(&mut self, frame: &FfmpegFrame) -> Result<FrameBuffer> {
        let width = self.info.width;
        let height = self.info.height;
        let mut rgb = ffmpeg::util::frame::video::Video::empty();
        self.scaler()?
            .run(&frame.frame, &mut rgb)
            .map_err(|e| EngineError::Decode(format!("Failed to scale frame: {}", e)))?;
        FrameBuffer::from_rgb8(width, height, rgb.data(0), rgb.stride(0))
    }
}
