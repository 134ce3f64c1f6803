//! SeekPlanner - ordinal -> decoded frame with minimal decode work
//!
//! **Why**: seeking is expensive (decoder flush + keyframe decode), linear
//! decode is expensive for long jumps. The planner keeps a cursor on the
//! last decoded frame and, per request, picks the cheapest of:
//! - reuse the cursor (same ordinal as last time)
//! - decode forward from the cursor
//! - seek backward to the nearest keyframe, then decode forward
//!
//! Target PTS comes from the FrameIndex when it already covers the ordinal,
//! otherwise it is extrapolated from the PTS observed so far and decoded
//! frames are compared by rounded playback time instead of exact PTS.
//!
//! **Used by**: Engine (direct path), StreamingWorker (its own instance)

use std::cmp::Ordering;
use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::core::index::PtsIndex;
use crate::error::{EngineError, Result};
use crate::frame::{DecodedFrame, FrameStack};
use crate::source::{round_time, FrameMeta, FrameStream, SourceFrame, StreamInfo, VideoSource};

/// Last successfully decoded frame and the ordinal it was resolved for
#[derive(Debug, Default)]
pub struct DecodeCursor {
    pub last_ordinal: Option<usize>,
    pub last_frame: Option<DecodedFrame>,
}

impl DecodeCursor {
    pub fn pts(&self) -> Option<i64> {
        self.last_frame.as_ref().map(|f| f.pts)
    }
}

/// Re-seeks allowed when a seek lands past the target
const MAX_BACKOFFS: usize = 3;

/// What decoded frames are compared against
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    /// Exact PTS from the FrameIndex
    Pts(i64),
    /// Rounded playback time (extrapolated target)
    Time { secs: f64, digits: u32 },
}

impl Target {
    fn compare(&self, meta: &FrameMeta) -> Ordering {
        match *self {
            Target::Pts(pts) => meta.pts.cmp(&pts),
            Target::Time { secs, digits } => round_time(meta.time, digits)
                .partial_cmp(&secs)
                .unwrap_or(Ordering::Less),
        }
    }
}

/// Resolved request: where to seek and what to stop at
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPlan {
    pub ordinal: usize,
    pub target_pts: i64,
    pub target: Target,
    /// Seek before decoding forward
    pub seek: bool,
}

impl SeekPlan {
    /// True when the target came from extrapolation
    pub fn use_time(&self) -> bool {
        matches!(self.target, Target::Time { .. })
    }
}

/// Candidate for "the frame before the first frame past the target"
enum Pick<F> {
    Cursor,
    Raw(F),
}

/// Stateful ordinal -> frame resolver over one exclusively owned source
pub struct SeekPlanner<S: VideoSource> {
    stream: FrameStream<S>,
    info: StreamInfo,
    frames: Arc<PtsIndex>,
    keyframes: Arc<PtsIndex>,
    cursor: DecodeCursor,
    /// Frame decoded past the last target, replayed on the next forward request
    lookahead: Option<S::Frame>,
    /// Stream position is unknown (error mid-decode, stale return)
    force_seek: bool,
    /// Checked once per decoded frame
    cancel: Option<Arc<AtomicBool>>,
    index_wait: Duration,
    window: usize,
    keyframe_sample: usize,
    digits: u32,
}

impl<S: VideoSource> SeekPlanner<S> {
    pub fn new(source: S, frames: Arc<PtsIndex>, keyframes: Arc<PtsIndex>, config: &EngineConfig) -> Self {
        let info = source.info().clone();
        let digits = config.time_digits.unwrap_or_else(|| info.time_digits());
        Self {
            stream: FrameStream::new(source),
            info,
            frames,
            keyframes,
            cursor: DecodeCursor::default(),
            lookahead: None,
            force_seek: false,
            cancel: None,
            index_wait: config.index_wait(),
            window: config.extrapolation_window,
            keyframe_sample: config.keyframe_sample,
            digits,
        }
    }

    /// Abort in-flight decodes with `EngineError::Closed` once `flag` is raised
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn cursor(&self) -> &DecodeCursor {
        &self.cursor
    }

    /// Decimal digits used for time-mode comparisons
    pub fn time_digits(&self) -> u32 {
        self.digits
    }

    // ========== Planning ==========

    /// Resolve `ordinal` to a target and decide whether a seek is needed.
    pub fn plan(&self, ordinal: usize) -> Result<SeekPlan> {
        let (target_pts, target) = self.resolve_target(ordinal)?;
        Ok(SeekPlan {
            ordinal,
            target_pts,
            target,
            seek: self.need_seek(target_pts, &target),
        })
    }

    fn resolve_target(&self, ordinal: usize) -> Result<(i64, Target)> {
        if let Some(pts) = self.frames.get(ordinal) {
            return Ok((pts, Target::Pts(pts)));
        }
        if self.frames.is_complete() {
            return Err(EngineError::OutOfRange {
                ordinal,
                len: self.frames.len(),
            });
        }
        if !self.frames.wait_for_len(2, self.index_wait) {
            // a tiny stream may have finished with fewer than two entries
            if let Some(pts) = self.frames.get(ordinal) {
                return Ok((pts, Target::Pts(pts)));
            }
            return Err(EngineError::IndexUnavailable {
                waited: self.index_wait,
            });
        }
        // the index may have caught up while we waited
        if let Some(pts) = self.frames.get(ordinal) {
            return Ok((pts, Target::Pts(pts)));
        }

        let (Some(first), Some(step)) = (self.frames.first(), self.frames.avg_recent_step(self.window)) else {
            return Err(EngineError::IndexUnavailable {
                waited: self.index_wait,
            });
        };
        let target_pts = first + (step * ordinal as f64).round() as i64;
        let start_secs = self.info.pts_to_secs(first);
        let secs = if self.info.fps > 0.0 {
            start_secs + ordinal as f64 / self.info.fps
        } else {
            self.info.pts_to_secs(target_pts)
        };
        let target = Target::Time {
            secs: round_time(secs, self.digits),
            digits: self.digits,
        };
        trace!("Extrapolated ordinal {} -> pts {} ({:?})", ordinal, target_pts, target);
        Ok((target_pts, target))
    }

    /// Seeks that cannot be avoided: no usable decode position, or the
    /// cursor is already past the target.
    fn must_seek(&self, target: &Target) -> bool {
        if self.force_seek {
            return true;
        }
        if self.lookahead.is_none() && self.stream.is_exhausted() {
            return true;
        }
        match &self.cursor.last_frame {
            None => true,
            Some(frame) => {
                let meta = FrameMeta {
                    pts: frame.pts,
                    time: frame.time,
                    is_key: false,
                };
                target.compare(&meta) == Ordering::Greater
            }
        }
    }

    fn need_seek(&self, target_pts: i64, target: &Target) -> bool {
        if self.must_seek(target) {
            return true;
        }
        if self.keyframes.is_empty() {
            return true;
        }
        if self.keyframes.is_building() && self.keyframes.last().is_some_and(|k| k < target_pts) {
            return true;
        }
        match (self.keyframes.at_or_before(target_pts), self.cursor.pts()) {
            (Some(kf), Some(cur)) => kf > cur,
            _ => false,
        }
    }

    // ========== Decoding ==========

    /// Backward seek with one fallback to the earliest known PTS.
    fn seek_to(&mut self, target_pts: i64) -> Result<()> {
        self.lookahead = None;
        match self.stream.seek(target_pts, true) {
            Ok(()) => {
                self.force_seek = false;
                Ok(())
            }
            Err(e) => {
                let fallback = self.frames.first().or(self.info.start_pts).unwrap_or(0);
                warn!("Seek to pts {} failed ({}), retrying at pts {}", target_pts, e, fallback);
                match self.stream.seek(fallback, true) {
                    Ok(()) => {
                        self.force_seek = false;
                        Ok(())
                    }
                    Err(e2) => {
                        self.force_seek = true;
                        Err(EngineError::Seek {
                            target: target_pts,
                            reason: format!("{}; fallback seek to {} failed: {}", e, fallback, e2),
                        })
                    }
                }
            }
        }
    }

    fn next_raw(&mut self) -> Result<Option<S::Frame>> {
        if let Some(frame) = self.lookahead.take() {
            return Ok(Some(frame));
        }
        self.stream.next_frame()
    }

    /// Decode forward until the first frame at or past `target`.
    /// Returns the frame at the target, or the one before it on overshoot.
    /// `None` only at end of stream with no candidate.
    fn decode_until(&mut self, target: &Target, mut prev: Option<Pick<S::Frame>>) -> Result<Option<Pick<S::Frame>>> {
        loop {
            if self.cancel.as_ref().is_some_and(|c| c.load(atomic::Ordering::Relaxed)) {
                return Err(EngineError::Closed);
            }
            let Some(frame) = self.next_raw()? else {
                return Ok(prev);
            };
            match target.compare(&frame.meta()) {
                Ordering::Less => prev = Some(Pick::Raw(frame)),
                Ordering::Equal => return Ok(Some(Pick::Raw(frame))),
                Ordering::Greater => {
                    return Ok(Some(match prev {
                        Some(p) => {
                            self.lookahead = Some(frame);
                            p
                        }
                        None => Pick::Raw(frame),
                    }));
                }
            }
        }
    }

    fn last_good_pts(&self) -> i64 {
        self.cursor
            .pts()
            .or_else(|| self.frames.last())
            .or(self.info.start_pts)
            .unwrap_or(0)
    }

    fn fetch(&mut self, ordinal: usize, may_seek: bool) -> Result<&DecodedFrame> {
        if self.cursor.last_ordinal == Some(ordinal) && !self.force_seek {
            if self.cursor.last_frame.is_some() {
                trace!("Cursor hit for ordinal {}", ordinal);
                return self.cursor_frame();
            }
        }

        let (target_pts, target) = self.resolve_target(ordinal)?;
        let mut seeked = if may_seek {
            self.need_seek(target_pts, &target)
        } else {
            self.must_seek(&target)
        };

        let mut prev = None;
        if seeked {
            debug!("Ordinal {}: seeking to pts {}", ordinal, target_pts);
            self.seek_to(target_pts)?;
        } else if self.cursor.last_frame.is_some() {
            prev = Some(Pick::Cursor);
        }

        let stream_start = self.frames.first().or(self.info.start_pts).unwrap_or(i64::MIN);
        let mut backoffs = 0;
        let mut recovered = false;
        let pick = loop {
            let result = self.decode_until(&target, prev.take());
            let picked = match result {
                Ok(p) => p,
                Err(e) => {
                    self.lookahead = None;
                    self.force_seek = true;
                    return Err(e);
                }
            };
            if let Some(pick) = picked {
                // extrapolated seek landed past the target: back off one keyframe
                if let Pick::Raw(raw) = &pick {
                    let meta = raw.meta();
                    if seeked
                        && backoffs < MAX_BACKOFFS
                        && meta.pts > stream_start
                        && target.compare(&meta) == Ordering::Greater
                    {
                        backoffs += 1;
                        debug!("Seek for ordinal {} landed past target at pts {}, backing off", ordinal, meta.pts);
                        if self.seek_to(meta.pts - 1).is_ok() {
                            continue;
                        }
                    }
                }
                break pick;
            }
            if !recovered {
                recovered = true;
                let good = self.last_good_pts();
                debug!("End of stream before ordinal {}, re-seeking to pts {}", ordinal, good);
                if self.seek_to(good).is_ok() {
                    seeked = true;
                    continue;
                }
            }
            self.force_seek = true;
            if self.cursor.last_frame.is_some() {
                warn!(
                    "Could not decode ordinal {}, returning last good frame (ordinal {:?})",
                    ordinal, self.cursor.last_ordinal
                );
                return self.cursor_frame();
            }
            return Err(EngineError::EndOfStream);
        };

        let frame = match pick {
            Pick::Cursor => self.cursor.last_frame.take(),
            Pick::Raw(raw) => {
                let meta = raw.meta();
                let pixels = match self.stream.to_buffer(&raw) {
                    Ok(p) => p,
                    Err(e) => {
                        self.force_seek = true;
                        return Err(e);
                    }
                };
                Some(DecodedFrame {
                    pts: meta.pts,
                    time: meta.time,
                    pixels,
                })
            }
        };
        self.cursor.last_ordinal = Some(ordinal);
        self.cursor.last_frame = frame;
        self.cursor_frame()
    }

    fn cursor_frame(&self) -> Result<&DecodedFrame> {
        self.cursor.last_frame.as_ref().ok_or(EngineError::EndOfStream)
    }

    /// Decoded frame for `ordinal`
    pub fn get(&mut self, ordinal: usize) -> Result<&DecodedFrame> {
        self.fetch(ordinal, true)
    }

    /// Decode `ordinals` with a single seek decision at the first one,
    /// then continuous forward decode. Output follows the given order.
    pub fn get_many(&mut self, ordinals: &[usize]) -> Result<FrameStack> {
        let mut sorted: Vec<usize> = ordinals.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let (h, w) = (self.info.height, self.info.width);
        let mut ascending = FrameStack::with_capacity(sorted.len(), h, w);
        for (i, &ordinal) in sorted.iter().enumerate() {
            let frame = self.fetch(ordinal, i == 0)?;
            ascending.push(ordinal, &frame.pixels)?;
        }

        let is_sorted = ordinals.windows(2).all(|p| p[0] < p[1]);
        if is_sorted {
            return Ok(ascending);
        }
        let is_reversed = ordinals.windows(2).all(|p| p[0] > p[1]);
        if is_reversed {
            ascending.reverse();
            return Ok(ascending);
        }

        let mut out = FrameStack::with_capacity(ordinals.len(), h, w);
        for &ordinal in ordinals {
            let Ok(pos) = sorted.binary_search(&ordinal) else {
                continue;
            };
            if let Some(data) = ascending.frame(pos) {
                let buffer = crate::frame::FrameBuffer::from_vec(w, h, data.to_vec())?;
                out.push(ordinal, &buffer)?;
            }
        }
        Ok(out)
    }

    /// Coarse scrub: jump one keyframe backward or forward from the cursor
    /// and decode the first frame there. Returns the frame and its ordinal.
    /// With nothing decoded yet, both directions land on the first keyframe.
    pub fn get_key_frame(&mut self, backward: bool) -> Result<(usize, &DecodedFrame)> {
        let waited = self.index_wait;
        let spaced = self.keyframes.wait_for_len(2, waited);
        let Some(first_kf) = self.keyframes.first() else {
            return Err(EngineError::IndexUnavailable { waited });
        };

        let spacing = self.keyframes.avg_leading_step(self.keyframe_sample);
        let target = match (self.cursor.pts(), spacing) {
            (None, _) => first_kf,
            (Some(cur_pts), Some(spacing)) if spaced => {
                let cur_kf = self.keyframes.at_or_before(cur_pts).unwrap_or(first_kf);
                if backward {
                    cur_kf - (spacing / 2.0).round() as i64
                } else {
                    cur_kf + (spacing * 1.5).round() as i64
                }
            }
            // whole stream is one GOP
            (Some(_), _) if self.keyframes.is_complete() => first_kf,
            _ => return Err(EngineError::IndexUnavailable { waited }),
        };
        debug!("Key frame scrub (backward={}) to pts {}", backward, target);

        self.seek_to(target)?;
        let raw = match self.stream.next_frame() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.force_seek = true;
                return Err(EngineError::EndOfStream);
            }
            Err(e) => {
                self.force_seek = true;
                return Err(e);
            }
        };
        let meta = raw.meta();
        let pixels = self.stream.to_buffer(&raw)?;
        let ordinal = self.estimate_ordinal(meta.pts);
        self.cursor.last_ordinal = Some(ordinal);
        self.cursor.last_frame = Some(DecodedFrame {
            pts: meta.pts,
            time: meta.time,
            pixels,
        });
        Ok((ordinal, self.cursor_frame()?))
    }

    /// Ordinal of a decoded PTS: exact when indexed, projected otherwise
    pub fn estimate_ordinal(&self, pts: i64) -> usize {
        if let Some(o) = self.frames.ordinal_of(pts) {
            if self.frames.get(o) == Some(pts) {
                return o;
            }
        }
        let first = self.frames.first().or(self.info.start_pts).unwrap_or(0);
        if let Some(step) = self.frames.avg_recent_step(self.window) {
            if step > 0.0 {
                return ((pts - first) as f64 / step).round().max(0.0) as usize;
            }
        }
        let secs = self.info.pts_to_secs(pts - first);
        (secs * self.info.fps).round().max(0.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ContainerFlavor, SourceFactory, SyntheticSource, SyntheticVideo};

    fn complete_indices(video: &SyntheticVideo) -> (Arc<PtsIndex>, Arc<PtsIndex>) {
        let n = video.frame_count();
        let frames = PtsIndex::from_entries((0..n).map(|i| video.pts_of(i)).collect());
        let keys = PtsIndex::from_entries((0..n).filter(|&i| video.is_key(i)).map(|i| video.pts_of(i)).collect());
        (Arc::new(frames), Arc::new(keys))
    }

    fn planner(video: &SyntheticVideo) -> SeekPlanner<SyntheticSource> {
        let (frames, keys) = complete_indices(video);
        SeekPlanner::new(video.open().unwrap(), frames, keys, &EngineConfig::default())
    }

    fn ordinal(frame: &DecodedFrame) -> usize {
        SyntheticVideo::ordinal_of(&frame.pixels).unwrap()
    }

    /// Test: every ordinal round-trips for each container flavor
    /// Validates: resolved frame matches the requested ordinal (random order)
    #[test]
    fn test_round_trip_all_flavors() {
        for flavor in [ContainerFlavor::Mp4, ContainerFlavor::Mkv, ContainerFlavor::Avi] {
            let video = SyntheticVideo::new(60, 4, 2, 30.0).with_flavor(flavor).with_gop(7);
            let mut p = planner(&video);
            let order: Vec<usize> = (0..60).map(|i| (i * 37) % 60).collect();
            for o in order {
                assert_eq!(ordinal(p.get(o).unwrap()), o, "{:?} ordinal {}", flavor, o);
            }
            for o in 0..60 {
                assert_eq!(ordinal(p.get(o).unwrap()), o, "{:?} sequential {}", flavor, o);
            }
        }
    }

    /// Test: extrapolated targets resolve the same frames as exact ones
    /// Validates: time-mode comparison with derived rounding digits
    #[test]
    fn test_extrapolated_round_trip() {
        for flavor in [ContainerFlavor::Mp4, ContainerFlavor::Mkv, ContainerFlavor::Avi] {
            let video = SyntheticVideo::new(80, 2, 2, 30.0).with_flavor(flavor).with_gop(9);
            // index knows only the first few frames and is still building
            let frames = PtsIndex::new();
            frames.publish(&(0..12).map(|i| video.pts_of(i)).collect::<Vec<_>>());
            let keys = PtsIndex::from_entries((0..80).step_by(9).map(|i| video.pts_of(i)).collect());
            let mut p = SeekPlanner::new(
                video.open().unwrap(),
                Arc::new(frames),
                Arc::new(keys),
                &EngineConfig::default(),
            );
            assert!(p.plan(50).unwrap().use_time());
            for o in [50, 13, 79, 40, 41, 42, 12] {
                assert_eq!(ordinal(p.get(o).unwrap()), o, "{:?} ordinal {}", flavor, o);
            }
        }
    }

    /// Test: repeated request hits the cursor
    /// Validates: bit-identical pixels, no extra decode or seek
    #[test]
    fn test_repeat_get_identical() {
        let video = SyntheticVideo::new(40, 3, 3, 25.0);
        let mut p = planner(&video);
        let first = p.get(17).unwrap().clone();
        let seeks = video.seeks();
        let decoded = video.stats().decoded.load(std::sync::atomic::Ordering::SeqCst);

        let second = p.get(17).unwrap();
        assert_eq!(&first, second);
        assert_eq!(video.seeks(), seeks);
        assert_eq!(video.stats().decoded.load(std::sync::atomic::Ordering::SeqCst), decoded);
    }

    /// Test: request for a keyframe ordinal seeks straight to that keyframe
    /// Validates: seek target is the keyframe pts, exactly one frame decoded
    #[test]
    fn test_keyframe_fast_path() {
        let video = SyntheticVideo::new(100, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        p.get(3).unwrap();

        let plan = p.plan(40).unwrap();
        assert!(plan.seek);
        assert_eq!(plan.target_pts, video.pts_of(40));
        assert_eq!(plan.target, Target::Pts(video.pts_of(40)));

        let decoded = video.stats().decoded.load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(ordinal(p.get(40).unwrap()), 40);
        assert_eq!(video.stats().decoded.load(std::sync::atomic::Ordering::SeqCst), decoded + 1);
    }

    /// Test: short forward step within a GOP decodes without seeking
    #[test]
    fn test_forward_without_seek() {
        let video = SyntheticVideo::new(100, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        p.get(21).unwrap();
        let seeks = video.seeks();
        assert!(!p.plan(25).unwrap().seek);
        for o in 22..30 {
            assert_eq!(ordinal(p.get(o).unwrap()), o);
        }
        assert_eq!(video.seeks(), seeks);
        // backward request always seeks
        assert!(p.plan(5).unwrap().seek);
    }

    /// Test: failing seek retries at the earliest pts
    /// Validates: one injected failure is recovered, two surface a Seek error
    #[test]
    fn test_seek_fallback() {
        let video = SyntheticVideo::new(50, 2, 2, 25.0);
        let mut p = planner(&video);

        video.fail_next_seeks(1);
        assert_eq!(ordinal(p.get(33).unwrap()), 33);

        video.fail_next_seeks(2);
        let err = p.get(12).unwrap_err();
        assert!(matches!(err, EngineError::Seek { .. }));

        // engine stays usable after a failed query
        assert_eq!(ordinal(p.get(12).unwrap()), 12);
    }

    /// Test: no pts observed within the wait fails instead of hanging
    #[test]
    fn test_index_unavailable() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0);
        let config = EngineConfig {
            index_wait_ms: 20,
            ..EngineConfig::default()
        };
        let mut p = SeekPlanner::new(
            video.open().unwrap(),
            Arc::new(PtsIndex::new()),
            Arc::new(PtsIndex::new()),
            &config,
        );
        assert!(matches!(p.get(3), Err(EngineError::IndexUnavailable { .. })));
    }

    /// Test: ordinal past a complete index is rejected
    #[test]
    fn test_out_of_range() {
        let video = SyntheticVideo::new(10, 2, 2, 25.0);
        let mut p = planner(&video);
        assert!(matches!(
            p.get(10),
            Err(EngineError::OutOfRange { ordinal: 10, len: 10 })
        ));
    }

    /// Test: extrapolated ordinal past the real end clips to the last frame
    #[test]
    fn test_extrapolation_past_end() {
        let video = SyntheticVideo::new(30, 2, 2, 25.0);
        let frames = PtsIndex::new();
        frames.publish(&(0..5).map(|i| video.pts_of(i)).collect::<Vec<_>>());
        let (_, keys) = complete_indices(&video);
        let mut p = SeekPlanner::new(video.open().unwrap(), Arc::new(frames), keys, &EngineConfig::default());
        assert_eq!(ordinal(p.get(45).unwrap()), 29);
        // the next request decodes again from a fresh seek
        assert_eq!(ordinal(p.get(28).unwrap()), 28);
    }

    /// Test: batch decode equals individual gets, in requested order
    #[test]
    fn test_get_many_matches_get() {
        let video = SyntheticVideo::new(64, 3, 2, 25.0).with_gop(8);
        let mut p = planner(&video);
        let seeks = video.seeks();
        let stack = p.get_many(&(5..29).collect::<Vec<_>>()).unwrap();
        assert_eq!(stack.count, 24);
        assert_eq!(video.seeks(), seeks + 1);

        let mut q = planner(&video);
        for (i, o) in (5..29).enumerate() {
            let single = q.get(o).unwrap();
            assert_eq!(stack.frame(i), Some(single.pixels.as_slice()));
        }

        let rev = p.get_many(&[20, 10, 0]).unwrap();
        assert_eq!(rev.ordinals, vec![20, 10, 0]);
    }

    /// Test: keyframe scrub steps one GOP at a time
    #[test]
    fn test_key_frame_scrub() {
        let video = SyntheticVideo::new(100, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        p.get(35).unwrap();

        let (o, frame) = p.get_key_frame(false).unwrap();
        assert_eq!(o, 40);
        assert_eq!(ordinal(frame), 40);

        let (o, _) = p.get_key_frame(true).unwrap();
        assert_eq!(o, 30);
        let (o, _) = p.get_key_frame(true).unwrap();
        assert_eq!(o, 20);

        // clamps at both ends
        p.get(2).unwrap();
        assert_eq!(p.get_key_frame(true).unwrap().0, 0);
        p.get(95).unwrap();
        assert_eq!(p.get_key_frame(false).unwrap().0, 90);
    }

    /// Test: stream with a single keyframe
    /// Validates: both scrub directions clamp to that keyframe
    #[test]
    fn test_key_frame_single_gop() {
        let video = SyntheticVideo::new(20, 2, 2, 25.0).with_gop(100);
        let mut p = planner(&video);
        p.get(5).unwrap();

        let (o, frame) = p.get_key_frame(true).unwrap();
        assert_eq!(o, 0);
        assert_eq!(ordinal(frame), 0);

        p.get(17).unwrap();
        assert_eq!(p.get_key_frame(false).unwrap().0, 0);
    }

    /// Test: scrub before any decode starts at the first keyframe
    #[test]
    fn test_key_frame_without_cursor() {
        let video = SyntheticVideo::new(50, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        assert_eq!(p.get_key_frame(false).unwrap().0, 0);
        assert_eq!(p.get_key_frame(false).unwrap().0, 10);

        let mut q = planner(&video);
        assert_eq!(q.get_key_frame(true).unwrap().0, 0);
    }

    /// Test: seek lands at end of stream, re-seek to the last good frame recovers
    #[test]
    fn test_eos_recovery_succeeds() {
        let video = SyntheticVideo::new(60, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        p.get(3).unwrap();
        let seeks = video.seeks();

        video.truncate_next_seeks(1);
        assert_eq!(ordinal(p.get(40).unwrap()), 40);
        assert_eq!(video.seeks(), seeks + 2);
    }

    /// Test: recovery re-seek also comes back empty
    /// Validates: last good frame is returned unchanged, next request seeks again
    #[test]
    fn test_eos_recovery_returns_stale_frame() {
        let video = SyntheticVideo::new(60, 2, 2, 25.0).with_gop(10);
        let mut p = planner(&video);
        let previous = p.get(3).unwrap().clone();

        video.truncate_next_seeks(2);
        let stale = p.get(40).unwrap();
        assert_eq!(stale, &previous);
        assert_eq!(ordinal(stale), 3);

        let seeks = video.seeks();
        assert_eq!(ordinal(p.get(41).unwrap()), 41);
        assert_eq!(video.seeks(), seeks + 1);
    }

    /// Test: nothing decodable and no cursor frame
    /// Validates: EndOfStream, planner usable afterwards
    #[test]
    fn test_eos_without_cursor() {
        let video = SyntheticVideo::new(30, 2, 2, 25.0);
        let mut p = planner(&video);

        video.truncate_next_seeks(2);
        assert!(matches!(p.get(5), Err(EngineError::EndOfStream)));
        assert!(p.cursor().last_frame.is_none());

        assert_eq!(ordinal(p.get(5).unwrap()), 5);
    }

    /// Test: stream whose first pts is not zero
    /// Validates: exact and extrapolated targets resolve for every flavor
    #[test]
    fn test_nonzero_start_pts() {
        for flavor in [ContainerFlavor::Mp4, ContainerFlavor::Mkv, ContainerFlavor::Avi] {
            let video = SyntheticVideo::new(60, 2, 2, 30.0)
                .with_flavor(flavor)
                .with_gop(8)
                .with_start_pts(1234);

            let mut exact = planner(&video);
            for o in [0, 31, 59, 7] {
                assert_eq!(ordinal(exact.get(o).unwrap()), o, "{:?} exact {}", flavor, o);
            }

            let frames = PtsIndex::new();
            frames.publish(&(0..10).map(|i| video.pts_of(i)).collect::<Vec<_>>());
            let (_, keys) = complete_indices(&video);
            let mut p = SeekPlanner::new(video.open().unwrap(), Arc::new(frames), keys, &EngineConfig::default());
            for o in [45, 12, 59, 30, 31] {
                assert_eq!(ordinal(p.get(o).unwrap()), o, "{:?} extrapolated {}", flavor, o);
            }
        }
    }
}
