//! StreamingWorker - isolated decode thread for the render path
//!
//! Owns its own source and SeekPlanner (never shared with the serving
//! path), services one request at a time from the channel's pending slot
//! and writes results into the frame slot. A second "reader" thread waits
//! on the frame-ready signal, copies frames out and forwards them to the
//! consumer as [`FrameUpdate`]s.
//!
//! Shutdown: raise the stop flag, close the request slot, join both
//! threads with a bounded timeout. A thread still decoding past the
//! timeout is detached; it stops at its next decode step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{debug, trace, warn};

use crate::config::EngineConfig;
use crate::core::channel::{FrameUpdate, SharedFrameChannel, StreamRequest};
use crate::core::index::{join_all, PtsIndex};
use crate::core::planner::SeekPlanner;
use crate::error::{EngineError, Result};
use crate::source::SourceFactory;

/// Reader poll interval while waiting for the frame-ready signal
const READER_POLL: Duration = Duration::from_millis(20);

/// Handle to a running worker + reader thread pair
pub struct StreamingWorker {
    channel: Arc<SharedFrameChannel>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl StreamingWorker {
    /// Open a dedicated source and start both threads.
    /// Updates are delivered to `updates`.
    pub fn spawn<F: SourceFactory>(
        factory: &F,
        frames: Arc<PtsIndex>,
        keyframes: Arc<PtsIndex>,
        config: &EngineConfig,
        updates: Sender<FrameUpdate>,
    ) -> Result<Self> {
        let source = factory.open()?;
        let stop = Arc::new(AtomicBool::new(false));
        let planner = SeekPlanner::new(source, frames, keyframes, config).with_cancel(Arc::clone(&stop));
        let info = planner.info();
        let channel = Arc::new(SharedFrameChannel::new(info.height, info.width));

        let worker = {
            let channel = Arc::clone(&channel);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(format!("framedex-stream-{}", factory.describe()))
                .spawn(move || run_worker(planner, &channel, &stop))?
        };
        let reader = {
            let channel = Arc::clone(&channel);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("framedex-stream-reader".into())
                .spawn(move || run_reader(&channel, &stop, updates))?
        };

        debug!("Streaming worker started for {}", factory.describe());
        Ok(Self {
            channel,
            stop,
            worker: Some(worker),
            reader: Some(reader),
            join_timeout: config.join_timeout(),
        })
    }

    /// Worker thread is running (not stopped, not crashed)
    pub fn is_alive(&self) -> bool {
        !self.stop.load(Ordering::Relaxed) && self.worker.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Queue a request, replacing any that has not been picked up yet
    pub fn request(&self, request: StreamRequest) -> Result<()> {
        if !self.is_alive() {
            return Err(EngineError::StreamingUnavailable("worker thread is not running".into()));
        }
        self.channel.request(request);
        Ok(())
    }

    /// Stop both threads; returns false if the join timed out
    pub fn shutdown(&mut self) -> bool {
        self.stop.store(true, Ordering::SeqCst);
        self.channel.requests().close();
        self.channel.frame_ready().set();
        let handles: Vec<JoinHandle<()>> = self.worker.take().into_iter().chain(self.reader.take()).collect();
        if handles.is_empty() {
            return true;
        }
        join_all(handles, self.join_timeout, "streaming")
    }
}

impl Drop for StreamingWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker<S: crate::source::VideoSource>(
    mut planner: SeekPlanner<S>,
    channel: &SharedFrameChannel,
    stop: &AtomicBool,
) {
    trace!("Streaming worker started");
    while let Some(request) = channel.requests().take() {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let result = match request {
            StreamRequest::Frame { ordinal, trigger } => planner
                .get(ordinal)
                .and_then(|frame| channel.publish(ordinal, &frame.pixels, trigger)),
            StreamRequest::KeyFrame { backward, trigger } => planner
                .get_key_frame(backward)
                .and_then(|(ordinal, frame)| channel.publish(ordinal, &frame.pixels, trigger)),
        };
        match result {
            Ok(()) => {}
            Err(EngineError::Closed) => break,
            // query errors skip one update, the worker keeps serving
            Err(e) => warn!("Streaming request {:?} failed: {}", request, e),
        }
    }
    trace!("Streaming worker stopped");
}

fn run_reader(channel: &SharedFrameChannel, stop: &AtomicBool, updates: Sender<FrameUpdate>) {
    trace!("Streaming reader started");
    while !stop.load(Ordering::Relaxed) {
        if !channel.frame_ready().wait_timeout(READER_POLL) {
            continue;
        }
        channel.frame_ready().clear();
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match channel.read_update() {
            Ok(Some(update)) => {
                if updates.send(update).is_err() {
                    // consumer dropped
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to read streamed frame: {}", e),
        }
    }
    trace!("Streaming reader stopped");
}
