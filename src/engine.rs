//! Engine - time-indexed frame access over one video stream
//!
//! Owns every resource of one opened stream:
//! - serving-path SeekPlanner (own source)
//! - FrameIndex + KeyframeIndex and their builder threads (own sources)
//! - optional StreamingWorker (own source) and the update channel
//! - the TimeMap translating experiment timestamps to ordinals
//!
//! All of it is released once, by `close()` or on drop.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Sender};
use log::{debug, info, warn};

use crate::config::EngineConfig;
use crate::core::channel::{FrameUpdate, StreamRequest, Trigger};
use crate::core::consumer::ConsumerSync;
use crate::core::event_bus::EventBus;
use crate::core::index::{IndexBuilders, IndexMode, PtsIndex};
use crate::core::planner::SeekPlanner;
use crate::core::worker::StreamingWorker;
use crate::error::{EngineError, Result};
use crate::frame::{DecodedFrame, FrameStack};
use crate::source::{SourceFactory, StreamInfo, VideoSource};
use crate::time_map::{SharedTimeMap, TimeMap};

#[cfg(feature = "ffmpeg")]
use crate::source::FfmpegFactory;

/// Ordinal range with slice semantics (negative indices count from the end)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlice {
    pub start: Option<isize>,
    pub stop: Option<isize>,
    pub step: isize,
}

impl FrameSlice {
    /// `[start, stop)` with step 1
    pub fn new(start: isize, stop: isize) -> Self {
        Self {
            start: Some(start),
            stop: Some(stop),
            step: 1,
        }
    }

    /// Whole range with the given step (`step = -1` reverses)
    pub fn full(step: isize) -> Self {
        Self {
            start: None,
            stop: None,
            step,
        }
    }

    pub fn with_step(mut self, step: isize) -> Self {
        self.step = step;
        self
    }

    /// Concrete ordinals for a sequence of `len` frames, bounds clamped
    pub fn indices(&self, len: usize) -> Result<Vec<usize>> {
        let step = self.step;
        if step == 0 {
            return Err(EngineError::InvalidSlice("step cannot be zero".into()));
        }
        let len = len as isize;
        let (lower, upper) = if step > 0 { (0, len) } else { (-1, len - 1) };
        let clamp = |bound: Option<isize>, default: isize| match bound {
            None => default,
            Some(v) if v < 0 => (v + len).max(lower),
            Some(v) => v.min(upper),
        };
        let start = clamp(self.start, if step > 0 { lower } else { upper });
        let stop = clamp(self.stop, if step > 0 { upper } else { lower });

        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Ok(out)
    }
}

/// Index build progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexProgress {
    pub frames: usize,
    pub keyframes: usize,
    pub complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeOrigin {
    /// Supplied by the caller
    Explicit,
    /// Synthesized from an exact frame count
    Exact,
    /// Synthesized from an estimate; replaced once the index completes
    Estimated,
}

/// Frame access engine over one stream
pub struct Engine<F: SourceFactory> {
    factory: F,
    config: EngineConfig,
    info: StreamInfo,
    frames: Arc<PtsIndex>,
    keyframes: Arc<PtsIndex>,
    planner: Option<SeekPlanner<F::Source>>,
    builders: Option<IndexBuilders>,
    time_map: TimeMap,
    /// Same map, as seen by streaming consumers
    shared_map: SharedTimeMap,
    time_origin: TimeOrigin,
    events: EventBus,
    streaming: Option<StreamingWorker>,
    updates: Option<Sender<FrameUpdate>>,
    closed: bool,
}

#[cfg(feature = "ffmpeg")]
impl Engine<FfmpegFactory> {
    /// Open `path`, video stream `stream_index`, config from `FRAMEDEX_CONFIG` or defaults
    pub fn open(path: impl Into<std::path::PathBuf>, stream_index: usize, time: Option<Vec<f64>>) -> Result<Self> {
        let config = EngineConfig::from_env_or_default()?;
        Self::open_with_config(path, stream_index, time, config)
    }

    pub fn open_with_config(
        path: impl Into<std::path::PathBuf>,
        stream_index: usize,
        time: Option<Vec<f64>>,
        config: EngineConfig,
    ) -> Result<Self> {
        let factory = FfmpegFactory::new(path, stream_index).with_decode_threads(config.decode_threads);
        Self::with_factory(factory, time, config)
    }
}

impl<F: SourceFactory> Engine<F> {
    /// Open the serving source, start index builders and set up the time map.
    pub fn with_factory(factory: F, time: Option<Vec<f64>>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let source = factory.open()?;
        let info = source.info().clone();

        let (mode, capacity) = match info.declared_frames {
            Some(n) => (IndexMode::Fixed(n), n),
            None => (
                IndexMode::Dynamic {
                    flush_every: config.flush_every,
                },
                0,
            ),
        };
        let frames = Arc::new(PtsIndex::with_capacity(capacity));
        let keyframes = Arc::new(PtsIndex::new());
        let builders = IndexBuilders::spawn(&factory, Arc::clone(&frames), Arc::clone(&keyframes), mode)?;

        let (time_map, time_origin) = match time {
            Some(times) => {
                let map = TimeMap::new(times)?;
                if let Some(n) = info.declared_frames {
                    if n != map.len() {
                        warn!(
                            "{}: time map has {} entries but the stream declares {} frames",
                            factory.describe(),
                            map.len(),
                            n
                        );
                    }
                }
                (map, TimeOrigin::Explicit)
            }
            None => match info.declared_frames {
                Some(n) => (TimeMap::synthesize(n, info.fps), TimeOrigin::Exact),
                None => {
                    let estimate = info.estimated_frames.unwrap_or(1);
                    warn!(
                        "{}: frame count unknown while the index is building, estimating {} frames",
                        factory.describe(),
                        estimate
                    );
                    (TimeMap::synthesize(estimate, info.fps), TimeOrigin::Estimated)
                }
            },
        };

        let planner = SeekPlanner::new(source, Arc::clone(&frames), Arc::clone(&keyframes), &config);
        info!(
            "Opened {}: {}x{} @ {:.3} fps, {} frames",
            factory.describe(),
            info.width,
            info.height,
            info.fps,
            time_map.len()
        );

        Ok(Self {
            factory,
            config,
            info,
            frames,
            keyframes,
            planner: Some(planner),
            builders: Some(builders),
            shared_map: SharedTimeMap::new(time_map.clone()),
            time_map,
            time_origin,
            events: EventBus::new(),
            streaming: None,
            updates: None,
            closed: false,
        })
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Bus carrying outbound `SyncEvent`s
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn refresh_time_map(&mut self) {
        if self.time_origin == TimeOrigin::Estimated && self.frames.is_complete() {
            self.time_map = TimeMap::synthesize(self.frames.len(), self.info.fps);
            self.shared_map.store(self.time_map.clone());
            self.time_origin = TimeOrigin::Exact;
            debug!("Time map rebuilt from exact frame count {}", self.frames.len());
        }
    }

    /// Current time map (rebuilt from the exact count once known)
    pub fn time_map(&mut self) -> &TimeMap {
        self.refresh_time_map();
        &self.time_map
    }

    /// Best known frame count, never blocks on the index
    pub fn len(&self) -> usize {
        if self.frames.is_complete() {
            return self.frames.len();
        }
        match (self.time_origin, self.info.declared_frames) {
            (TimeOrigin::Explicit, _) => self.time_map.len(),
            (_, Some(n)) => n,
            (_, None) => self.time_map.len().max(self.frames.len()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordinal shown at experiment timestamp `ts` (clipped to the map)
    pub fn ordinal_at(&mut self, ts: f64) -> usize {
        self.time_map().to_ordinal(ts)
    }

    /// Experiment timestamp of `ordinal` (clipped to the map)
    pub fn timestamp_of(&mut self, ordinal: usize) -> f64 {
        self.time_map().timestamp(ordinal)
    }

    pub fn index_progress(&self) -> IndexProgress {
        IndexProgress {
            frames: self.frames.len(),
            keyframes: self.keyframes.len(),
            complete: self.frames.is_complete() && self.keyframes.is_complete(),
        }
    }

    /// Block until both indices finished building or `timeout` passed
    pub fn wait_for_index(&self, timeout: Duration) -> bool {
        self.frames.wait_complete(timeout) && self.keyframes.wait_complete(timeout)
    }

    fn planner(&mut self) -> Result<&mut SeekPlanner<F::Source>> {
        self.planner.as_mut().ok_or(EngineError::Closed)
    }

    // ========== Query surface ==========

    /// Frame shown at experiment timestamp `ts`
    pub fn get(&mut self, ts: f64) -> Result<&DecodedFrame> {
        let ordinal = self.ordinal_at(ts);
        self.frame(ordinal)
    }

    /// Frame at `ordinal`
    pub fn frame(&mut self, ordinal: usize) -> Result<&DecodedFrame> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.refresh_time_map();
        if self.frames.is_complete() && ordinal >= self.frames.len() {
            return Err(EngineError::OutOfRange {
                ordinal,
                len: self.frames.len(),
            });
        }
        self.planner()?.get(ordinal)
    }

    /// Ordinal range covering `[start_ts, stop_ts)`
    pub fn get_slice(&mut self, start_ts: f64, stop_ts: f64) -> FrameSlice {
        let start = self.ordinal_at(start_ts);
        let stop = self.ordinal_at(stop_ts);
        FrameSlice::new(start as isize, stop.max(start) as isize)
    }

    /// Frames selected by `slice`, stacked `(count, H, W, 3)`
    pub fn read_slice(&mut self, slice: FrameSlice) -> Result<FrameStack> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        let ordinals = slice.indices(self.len())?;
        self.planner()?.get_many(&ordinals)
    }

    /// Scrub one keyframe backward or forward from the current position
    pub fn key_frame(&mut self, backward: bool) -> Result<(usize, &DecodedFrame)> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.planner()?.get_key_frame(backward)
    }

    // ========== Streaming ==========

    /// Start the streaming worker (if enabled) and return the consumer
    /// that receives its frames.
    pub fn start_streaming(&mut self) -> Result<ConsumerSync> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        if let Some(mut old) = self.streaming.take() {
            old.shutdown();
        }
        let (tx, rx) = unbounded();
        if self.config.streaming {
            let worker = StreamingWorker::spawn(
                &self.factory,
                Arc::clone(&self.frames),
                Arc::clone(&self.keyframes),
                &self.config,
                tx.clone(),
            )?;
            self.streaming = Some(worker);
        } else {
            debug!("Streaming disabled, requests use the direct path");
        }
        self.updates = Some(tx);
        let shape = (self.info.height, self.info.width);
        self.refresh_time_map();
        Ok(ConsumerSync::new(rx, shape, self.shared_map.clone(), self.events.emitter()))
    }

    /// Streaming worker is running
    pub fn is_streaming(&self) -> bool {
        self.streaming.as_ref().is_some_and(|w| w.is_alive())
    }

    fn dispatch(&mut self, request: StreamRequest) -> Result<()> {
        if self.closed {
            return Err(EngineError::Closed);
        }
        self.refresh_time_map();
        if let Some(worker) = &self.streaming {
            if worker.is_alive() {
                return worker.request(request);
            }
            warn!("Streaming worker is gone, falling back to direct decoding");
            self.streaming = None;
            return Err(EngineError::StreamingUnavailable(
                "worker stopped, later requests use the direct path".into(),
            ));
        }
        let Some(updates) = self.updates.clone() else {
            return Err(EngineError::StreamingUnavailable("start_streaming was not called".into()));
        };

        let update = match request {
            StreamRequest::Frame { ordinal, trigger } => FrameUpdate {
                ordinal,
                pixels: self.frame(ordinal)?.pixels.clone(),
                trigger,
            },
            StreamRequest::KeyFrame { backward, trigger } => {
                let (ordinal, frame) = self.key_frame(backward)?;
                FrameUpdate {
                    ordinal,
                    pixels: frame.pixels.clone(),
                    trigger,
                }
            }
        };
        if updates.send(update).is_err() {
            debug!("Consumer dropped, discarding direct update");
        }
        Ok(())
    }

    /// Ask for `ordinal` to be delivered to the consumer; newest request wins
    pub fn request(&mut self, ordinal: usize, trigger: Trigger) -> Result<()> {
        self.dispatch(StreamRequest::Frame { ordinal, trigger })
    }

    /// Ask for a keyframe scrub to be delivered to the consumer
    pub fn request_key_frame(&mut self, backward: bool, trigger: Trigger) -> Result<()> {
        self.dispatch(StreamRequest::KeyFrame { backward, trigger })
    }

    // ========== Lifecycle ==========

    /// Stop all threads (bounded join) and release every source. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let timeout = self.config.join_timeout();
        if let Some(mut worker) = self.streaming.take() {
            if !worker.shutdown() {
                warn!("Streaming worker did not stop within {:?}", timeout);
            }
        }
        self.updates = None;
        if let Some(mut builders) = self.builders.take() {
            if !builders.shutdown(timeout) {
                warn!("Index builders did not stop within {:?}", timeout);
            }
        }
        self.planner = None;
        debug!("Closed {}", self.factory.describe());
    }
}

impl<F: SourceFactory> Drop for Engine<F> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consumer::{SyncEvent, TickOutcome};
    use crate::core::event_bus::downcast_event;
    use crate::source::{ContainerFlavor, SyntheticVideo};
    use std::time::Instant;

    fn ordinal(frame: &DecodedFrame) -> usize {
        SyntheticVideo::ordinal_of(&frame.pixels).unwrap()
    }

    /// Test: 100 frames at one frame per time unit
    /// Validates: timestamp lookups resolve and clip to the right frames
    #[test]
    fn test_hundred_frame_scenario() {
        let video = SyntheticVideo::new(100, 4, 4, 1.0).with_flavor(ContainerFlavor::Avi);
        let time: Vec<f64> = (0..100).map(|i| i as f64).collect();
        let mut engine = Engine::with_factory(video, Some(time), EngineConfig::default()).unwrap();

        for (ts, expected) in [(0.0, 0), (0.1, 0), (1.0, 1), (1.6, 1), (99.6, 99), (111.0, 99)] {
            assert_eq!(ordinal(engine.get(ts).unwrap()), expected, "ts {}", ts);
        }
        assert_eq!(engine.len(), 100);
    }

    /// Test: synthesized time map for a stream with a declared count
    #[test]
    fn test_synthesized_time_map() {
        let video = SyntheticVideo::new(50, 2, 2, 25.0);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        assert_eq!(engine.len(), 50);
        assert_eq!(engine.ordinal_at(1.0), 25);
        assert_eq!(ordinal(engine.get(1.0).unwrap()), 25);
        assert_eq!(engine.timestamp_of(10), 0.4);
    }

    /// Test: unknown frame count is estimated, then replaced by the exact count
    #[test]
    fn test_time_map_refresh() {
        let video = SyntheticVideo::new(90, 2, 2, 30.0).with_flavor(ContainerFlavor::Mkv);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        assert!(engine.wait_for_index(Duration::from_secs(5)));
        assert_eq!(engine.time_map().len(), 90);
        assert_eq!(engine.len(), 90);
        let progress = engine.index_progress();
        assert!(progress.complete);
        assert_eq!(progress.frames, 90);
        assert_eq!(progress.keyframes, 9);
    }

    /// Test: 1000 increasing requests while the index is still building
    /// Validates: no failure, resolved ordinals never go backwards
    #[test]
    fn test_rapid_gets_during_indexing() {
        let video = SyntheticVideo::new(1200, 2, 2, 30.0)
            .with_flavor(ContainerFlavor::Mkv)
            .with_gop(12)
            .with_decode_delay(Duration::from_micros(100));
        let config = EngineConfig {
            flush_every: 8,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_factory(video, None, config).unwrap();

        let mut last = 0;
        for o in 0..1000 {
            let got = ordinal(engine.frame(o).unwrap());
            assert!(got >= last, "ordinal went backwards: {} after {}", got, last);
            last = got;
        }
        assert_eq!(last, 999);
    }

    /// Test: slice read equals individual reads, negative step reverses
    #[test]
    fn test_read_slice() {
        let video = SyntheticVideo::new(40, 3, 2, 10.0).with_gop(6);
        let mut engine = Engine::with_factory(video.clone(), None, EngineConfig::default()).unwrap();

        let slice = engine.get_slice(0.5, 1.5);
        assert_eq!(slice, FrameSlice::new(5, 15));
        let stack = engine.read_slice(slice).unwrap();
        assert_eq!(stack.count, 10);
        assert_eq!(stack.ordinals, (5..15).collect::<Vec<_>>());

        let mut other = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        for (i, o) in (5..15).enumerate() {
            assert_eq!(stack.frame(i), Some(other.frame(o).unwrap().pixels.as_slice()));
        }

        // stop past the end is clamped
        let tail = engine.read_slice(FrameSlice::new(35, 100)).unwrap();
        assert_eq!(tail.count, 5);

        let rev = engine.read_slice(FrameSlice::new(2, 8).with_step(-1)).unwrap();
        assert_eq!(rev.count, 0);
        let rev = engine.read_slice(FrameSlice { start: Some(8), stop: Some(2), step: -2 }).unwrap();
        assert_eq!(rev.ordinals, vec![8, 6, 4]);

        assert!(matches!(
            engine.read_slice(FrameSlice::full(0)),
            Err(EngineError::InvalidSlice(_))
        ));
    }

    /// Test: open bounds and negative indices, as `video[-5:]`, `video[::-3]`, `video[-1::-2]`
    #[test]
    fn test_read_slice_open_bounds() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0).with_gop(4);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();

        let tail = FrameSlice { start: Some(-5), stop: None, step: 1 };
        assert_eq!(engine.read_slice(tail).unwrap().ordinals, vec![5, 6, 7, 8, 9]);

        let rev = engine.read_slice(FrameSlice::full(-3)).unwrap();
        assert_eq!(rev.ordinals, vec![9, 6, 3, 0]);
        assert_eq!(rev.frame(1).map(|d| d.len()), Some(2 * 2 * 3));

        let odd = FrameSlice { start: Some(-1), stop: None, step: -2 };
        let stack = engine.read_slice(odd).unwrap();
        assert_eq!(stack.ordinals, vec![9, 7, 5, 3, 1]);
        for (i, o) in stack.ordinals.iter().enumerate() {
            let buffer = crate::frame::FrameBuffer::from_vec(2, 2, stack.frame(i).unwrap().to_vec()).unwrap();
            assert_eq!(SyntheticVideo::ordinal_of(&buffer), Some(*o));
        }
    }

    #[test]
    fn test_slice_indices() {
        assert_eq!(FrameSlice::full(1).indices(4).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(FrameSlice::full(-1).indices(4).unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(FrameSlice::new(-2, 10).indices(4).unwrap(), vec![2, 3]);
        assert_eq!(FrameSlice::full(3).indices(7).unwrap(), vec![0, 3, 6]);
        assert!(FrameSlice::new(3, 1).indices(4).unwrap().is_empty());
    }

    /// Test: open failure is fatal at construction
    #[test]
    fn test_open_error() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0).with_failing_open();
        let result = Engine::with_factory(video, None, EngineConfig::default());
        assert!(matches!(result, Err(EngineError::Open(_))));
    }

    /// Test: invalid explicit time map is rejected
    #[test]
    fn test_invalid_time_map() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0);
        let result = Engine::with_factory(video, Some(vec![1.0, 0.0]), EngineConfig::default());
        assert!(matches!(result, Err(EngineError::InvalidTimeMap(_))));
    }

    /// Test: complete index rejects ordinals past the end
    #[test]
    fn test_out_of_range() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        assert!(engine.wait_for_index(Duration::from_secs(5)));
        assert!(matches!(engine.frame(10), Err(EngineError::OutOfRange { .. })));
        assert_eq!(ordinal(engine.frame(9).unwrap()), 9);
    }

    /// Test: streamed request reaches the consumer and emits a sync event
    #[test]
    fn test_streaming_roundtrip() {
        let video = SyntheticVideo::new(60, 2, 2, 25.0);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        let mut consumer = engine.start_streaming().unwrap();
        assert!(engine.is_streaming());

        engine.request(42, Trigger::LocalKey).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut outcome = TickOutcome::Idle;
        while Instant::now() < deadline {
            outcome = consumer.tick();
            if outcome != TickOutcome::Idle {
                break;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(outcome, TickOutcome::Applied { ordinal: 42, synced: true });
        assert_eq!(SyntheticVideo::ordinal_of(consumer.display()), Some(42));
        assert_eq!(consumer.timestamp_text(), "1.680");

        let events = engine.events().poll();
        assert_eq!(downcast_event::<SyncEvent>(&events[0]).map(|e| e.ordinal), Some(42));

        // direct path
        consumer.set_frame(&mut engine, 7).unwrap();
        assert_eq!(consumer.ordinal(), Some(7));
        assert_eq!(SyntheticVideo::ordinal_of(consumer.display()), Some(7));
    }

    /// Test: consumer started while the frame count is only estimated
    /// Validates: streamed timestamps follow the exact map once the index completes
    #[test]
    fn test_streaming_sees_refreshed_time_map() {
        let video = SyntheticVideo::new(90, 2, 2, 30.0)
            .with_flavor(ContainerFlavor::Mkv)
            .with_estimated_frames(60);
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        let mut consumer = engine.start_streaming().unwrap();
        assert!(engine.wait_for_index(Duration::from_secs(5)));

        engine.request(80, Trigger::LocalKey).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut outcome = TickOutcome::Idle;
        while outcome == TickOutcome::Idle && Instant::now() < deadline {
            outcome = consumer.tick();
            std::thread::sleep(Duration::from_millis(2));
        }
        assert_eq!(outcome, TickOutcome::Applied { ordinal: 80, synced: true });
        assert_eq!(consumer.timestamp_text(), "2.667");
        let events = engine.events().poll();
        let sync = downcast_event::<SyncEvent>(&events[0]).unwrap();
        assert!((sync.timestamp - 80.0 / 30.0).abs() < 1e-9);
    }

    /// Test: crashed worker is reported once, then requests go direct
    #[test]
    fn test_worker_crash_fallback() {
        let video = SyntheticVideo::new(30, 2, 2, 25.0);
        let mut engine = Engine::with_factory(video.clone(), None, EngineConfig::default()).unwrap();
        assert!(engine.wait_for_index(Duration::from_secs(5)));

        video.crash_next_open();
        let mut consumer = engine.start_streaming().unwrap();
        engine.request(5, Trigger::Unknown).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while engine.is_streaming() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!engine.is_streaming());
        assert!(matches!(
            engine.request(6, Trigger::Unknown),
            Err(EngineError::StreamingUnavailable(_))
        ));

        engine.request(7, Trigger::SyncEventReceived).unwrap();
        assert_eq!(consumer.tick(), TickOutcome::Applied { ordinal: 7, synced: false });
    }

    /// Test: close while the worker is mid-decode
    /// Validates: returns within the join timeout, engine refuses further queries
    #[test]
    fn test_close_mid_decode() {
        let video = SyntheticVideo::new(3000, 2, 2, 25.0)
            .with_gop(3000)
            .with_decode_delay(Duration::from_millis(1));
        let mut engine = Engine::with_factory(video, None, EngineConfig::default()).unwrap();
        let _consumer = engine.start_streaming().unwrap();
        engine.request(2999, Trigger::Unknown).unwrap();
        std::thread::sleep(Duration::from_millis(30));

        let started = Instant::now();
        engine.close();
        let join = engine.config().join_timeout();
        // streaming and builder joins each bounded by the timeout
        assert!(started.elapsed() < join * 2 + Duration::from_millis(200));
        assert!(engine.is_closed());
        assert!(matches!(engine.frame(0), Err(EngineError::Closed)));
        assert!(matches!(engine.request(1, Trigger::Unknown), Err(EngineError::Closed)));

        // idempotent
        engine.close();
    }

    /// Test: streaming disabled routes requests through the direct path
    #[test]
    fn test_streaming_disabled() {
        let video = SyntheticVideo::new(20, 2, 2, 25.0);
        let config = EngineConfig {
            streaming: false,
            ..EngineConfig::default()
        };
        let mut engine = Engine::with_factory(video, None, config).unwrap();
        assert!(matches!(
            engine.request(1, Trigger::Unknown),
            Err(EngineError::StreamingUnavailable(_))
        ));
        let mut consumer = engine.start_streaming().unwrap();
        assert!(!engine.is_streaming());
        engine.request_key_frame(false, Trigger::LocalKey).unwrap();
        assert!(matches!(consumer.tick(), TickOutcome::Applied { synced: true, .. }));
    }
}
