//! PTS indices and their background builders
//!
//! `PtsIndex` is the published, read-only view: a `Mutex<Vec<i64>>` snapshot
//! plus an atomic length and build state. Builders fill a private back
//! buffer and publish chunks into the snapshot; the lock is only held for
//! those short copies and for reads, never across a decode call.
//!
//! Two builders run per engine, each on its own thread with its own source:
//! - **FrameIndex**: decodes every frame, records its PTS. Fixed-size mode
//!   (frame count known) publishes each entry as it lands; dynamic mode
//!   publishes every `flush_every` frames.
//! - **KeyframeIndex**: decodes with non-keyframes skipped, publishes each
//!   keyframe PTS immediately.
//!
//! Both stop promptly when the shared stop flag is raised.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::source::{FrameStream, SourceFactory, SourceFrame};

const STATE_BUILDING: u8 = 0;
const STATE_COMPLETE: u8 = 1;
const STATE_ABORTED: u8 = 2;

/// Build state of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    Building,
    /// Source exhausted, every entry published
    Complete,
    /// Builder stopped early (cancelled or failed)
    Aborted,
}

/// Lock-protected, append-only PTS table
#[derive(Debug)]
pub struct PtsIndex {
    entries: Mutex<Vec<i64>>,
    published: Condvar,
    len: AtomicUsize,
    state: AtomicU8,
}

impl Default for PtsIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl PtsIndex {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Preallocated index (fixed-size mode)
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(Vec::with_capacity(capacity)),
            published: Condvar::new(),
            len: AtomicUsize::new(0),
            state: AtomicU8::new(STATE_BUILDING),
        }
    }

    /// Index that is already complete (tests, precomputed tables)
    pub fn from_entries(entries: Vec<i64>) -> Self {
        let index = Self::with_capacity(entries.len());
        index.publish(&entries);
        index.finish();
        index
    }

    // ========== Writer side (builders only) ==========

    pub(crate) fn publish(&self, chunk: &[i64]) {
        if chunk.is_empty() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.extend_from_slice(chunk);
        self.len.store(entries.len(), Ordering::Release);
        drop(entries);
        self.published.notify_all();
    }

    pub(crate) fn finish(&self) {
        self.set_state(STATE_COMPLETE);
    }

    pub(crate) fn abort(&self) {
        self.set_state(STATE_ABORTED);
    }

    fn set_state(&self, state: u8) {
        let _guard = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        self.state.store(state, Ordering::Release);
        self.published.notify_all();
    }

    // ========== Reader side ==========

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> IndexState {
        match self.state.load(Ordering::Acquire) {
            STATE_COMPLETE => IndexState::Complete,
            STATE_ABORTED => IndexState::Aborted,
            _ => IndexState::Building,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state() == IndexState::Complete
    }

    pub fn is_building(&self) -> bool {
        self.state() == IndexState::Building
    }

    pub fn get(&self, i: usize) -> Option<i64> {
        self.lock().get(i).copied()
    }

    pub fn first(&self) -> Option<i64> {
        self.lock().first().copied()
    }

    pub fn last(&self) -> Option<i64> {
        self.lock().last().copied()
    }

    /// Copy of the published entries
    pub fn snapshot(&self) -> Vec<i64> {
        self.lock().clone()
    }

    /// Mean of the last `window` PTS steps (needs at least two entries)
    pub fn avg_recent_step(&self, window: usize) -> Option<f64> {
        let entries = self.lock();
        let n = entries.len();
        if n < 2 {
            return None;
        }
        let steps = window.max(1).min(n - 1);
        let span = entries[n - 1] - entries[n - 1 - steps];
        Some(span as f64 / steps as f64)
    }

    /// Mean of the first `count` PTS steps (needs at least two entries)
    pub fn avg_leading_step(&self, count: usize) -> Option<f64> {
        let entries = self.lock();
        let n = entries.len().min(count.max(2));
        if n < 2 {
            return None;
        }
        Some((entries[n - 1] - entries[0]) as f64 / (n - 1) as f64)
    }

    /// Largest entry `<= pts`
    pub fn at_or_before(&self, pts: i64) -> Option<i64> {
        let entries = self.lock();
        let right = entries.partition_point(|&p| p <= pts);
        right.checked_sub(1).map(|i| entries[i])
    }

    /// Ordinal of the last entry `<= pts`
    pub fn ordinal_of(&self, pts: i64) -> Option<usize> {
        let entries = self.lock();
        entries.partition_point(|&p| p <= pts).checked_sub(1)
    }

    /// Block until at least `n` entries are published, the build ends, or `timeout` passes.
    /// Returns whether `n` entries are available.
    pub fn wait_for_len(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        loop {
            if entries.len() >= n {
                return true;
            }
            if !self.is_building() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            entries = self
                .published
                .wait_timeout(entries, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Block until the build ends or `timeout` passes. Returns whether it completed.
    pub fn wait_complete(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        loop {
            match self.state() {
                IndexState::Complete => return true,
                IndexState::Aborted => return false,
                IndexState::Building => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            entries = self
                .published
                .wait_timeout(entries, deadline - now)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<i64>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// FrameIndex construction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    /// Frame count known a priori: stop at `frames`
    Fixed(usize),
    /// Frame count unknown: publish every `flush_every` frames
    Dynamic { flush_every: usize },
}

fn build_frame_index<F: SourceFactory>(
    factory: &F,
    index: &PtsIndex,
    mode: IndexMode,
    stop: &AtomicBool,
) -> Result<bool> {
    let mut stream = FrameStream::new(factory.open()?);
    let mut pending: Vec<i64> = Vec::new();
    let mut count = 0usize;

    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = stream.next_frame()? else {
            index.publish(&pending);
            if let IndexMode::Fixed(expected) = mode {
                if count < expected {
                    warn!(
                        "{}: stream ended after {} of {} declared frames",
                        factory.describe(),
                        count,
                        expected
                    );
                }
            }
            return Ok(true);
        };
        let pts = frame.meta().pts;
        count += 1;
        match mode {
            IndexMode::Fixed(expected) => {
                index.publish(&[pts]);
                if count >= expected {
                    return Ok(true);
                }
            }
            IndexMode::Dynamic { flush_every } => {
                pending.push(pts);
                if pending.len() >= flush_every {
                    index.publish(&pending);
                    pending.clear();
                }
            }
        }
    }
    index.publish(&pending);
    Ok(false)
}

fn build_keyframe_index<F: SourceFactory>(factory: &F, index: &PtsIndex, stop: &AtomicBool) -> Result<bool> {
    let mut stream = FrameStream::new(factory.open()?);
    stream.set_skip_non_key(true);
    while !stop.load(Ordering::Relaxed) {
        let Some(frame) = stream.next_frame()? else {
            return Ok(true);
        };
        let meta = frame.meta();
        if meta.is_key {
            index.publish(&[meta.pts]);
        }
    }
    Ok(false)
}

fn spawn_builder<F>(name: String, index: Arc<PtsIndex>, build: F) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce(&PtsIndex) -> Result<bool> + Send + 'static,
{
    thread::Builder::new().name(name.clone()).spawn(move || {
        trace!("{} started", name);
        match build(&index) {
            Ok(true) => {
                index.finish();
                info!("{} complete: {} entries", name, index.len());
            }
            Ok(false) => {
                index.abort();
                debug!("{} cancelled at {} entries", name, index.len());
            }
            Err(e) => {
                index.abort();
                error!("{} failed after {} entries: {}", name, index.len(), e);
            }
        }
    })
}

/// Running index builders, stopped and joined on `shutdown`/drop
pub struct IndexBuilders {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl IndexBuilders {
    /// Spawn both builders, each with its own source from `factory`.
    pub fn spawn<F: SourceFactory>(
        factory: &F,
        frames: Arc<PtsIndex>,
        keyframes: Arc<PtsIndex>,
        mode: IndexMode,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(2);

        let (f, s) = (factory.clone(), Arc::clone(&stop));
        handles.push(spawn_builder("framedex-frame-index".into(), frames, move |index| {
            build_frame_index(&f, index, mode, &s)
        })?);

        let (f, s) = (factory.clone(), Arc::clone(&stop));
        handles.push(spawn_builder("framedex-keyframe-index".into(), keyframes, move |index| {
            build_keyframe_index(&f, index, &s)
        })?);

        debug!("Index builders started for {} ({:?})", factory.describe(), mode);
        Ok(Self { stop, handles })
    }

    /// Raise the stop flag and join with a bounded timeout.
    /// Returns false if some builder did not finish in time.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        join_all(std::mem::take(&mut self.handles), timeout, "index builder")
    }
}

impl Drop for IndexBuilders {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.shutdown(Duration::from_millis(500));
        }
    }
}

/// Poll-join threads until `timeout`; unfinished threads are detached.
pub(crate) fn join_all(handles: Vec<JoinHandle<()>>, timeout: Duration, what: &str) -> bool {
    let deadline = Instant::now() + timeout;
    let total = handles.len();
    for handle in handles {
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!("{} shutdown timeout reached, detaching remaining threads", what);
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        if handle.join().is_err() {
            warn!("{} thread panicked", what);
        }
    }
    trace!("All {} {} threads stopped", total, what);
    true
}
