//! FRAMEDEX - time-indexed video frame access and streaming
//!
//! Resolve experiment timestamps or frame ordinals to decoded frames of a
//! compressed video without decoding the whole file, and stream frames to a
//! render loop without blocking it.

// Core engine (indices, planner, streaming, events)
pub mod core;

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod source;
pub mod time_map;

pub use config::EngineConfig;
pub use core::channel::Trigger;
pub use core::consumer::{ConsumerSync, SyncEvent, TickOutcome};
pub use core::event_bus::{downcast_event, EventBus};
pub use engine::{Engine, FrameSlice, IndexProgress};
pub use error::{EngineError, Result};
pub use frame::{DecodedFrame, FrameBuffer, FrameStack};
pub use source::{SourceFactory, StreamInfo, SyntheticVideo, VideoSource};
pub use time_map::TimeMap;

#[cfg(feature = "ffmpeg")]
pub use source::FfmpegFactory;

/// Engine over an FFmpeg-opened file
#[cfg(feature = "ffmpeg")]
pub type VideoEngine = Engine<FfmpegFactory>;
