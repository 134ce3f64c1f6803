//! SharedFrameChannel - worker -> consumer frame handoff
//!
//! One fixed-size frame slot (pixels + ordinal) behind a mutex, a single
//! pending-request slot with exchange semantics (newest request replaces
//! any unserviced one), a response channel and a frame-ready signal.
//!
//! Writer protocol (worker): lock slot, copy pixels + ordinal, send the
//! response, unlock, raise the signal. Because the response is sent under
//! the slot lock, a reader that drains responses under the same lock
//! always pairs the slot with the trigger of the write that produced it.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::trace;

use crate::error::{EngineError, Result};
use crate::frame::{FrameBuffer, CHANNELS};

/// Why a frame update was requested; decides whether the consumer
/// broadcasts a sync event after applying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Trigger {
    Initialization,
    /// Local scrub (keyboard stepping)
    LocalKey,
    ZoomToPoint,
    /// Update caused by another view's sync event
    SyncEventReceived,
    /// Explicit jump to a known ordinal (direct path)
    SetFrame,
    #[default]
    Unknown,
}

impl Trigger {
    /// Updates caused locally are broadcast to linked views
    pub fn emits_sync(self) -> bool {
        matches!(self, Trigger::LocalKey | Trigger::ZoomToPoint)
    }
}

/// Request for the streaming worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StreamRequest {
    /// Decode an exact ordinal
    Frame { ordinal: usize, trigger: Trigger },
    /// Coarse keyframe scrub
    KeyFrame { backward: bool, trigger: Trigger },
}

impl StreamRequest {
    pub fn trigger(&self) -> Trigger {
        match *self {
            StreamRequest::Frame { trigger, .. } | StreamRequest::KeyFrame { trigger, .. } => trigger,
        }
    }
}

/// Worker -> reader notice that the slot holds a new frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamResponse {
    pub ordinal: usize,
    pub trigger: Trigger,
}

/// Copied-out frame, ready to apply on the render thread
#[derive(Debug, Clone, PartialEq)]
pub struct FrameUpdate {
    pub ordinal: usize,
    pub pixels: FrameBuffer,
    pub trigger: Trigger,
}

/// Fixed-size frame region, allocated once from the stream shape
#[derive(Debug)]
pub struct FrameSlot {
    pixels: Box<[f32]>,
    ordinal: f32,
}

#[derive(Debug, Default)]
struct PendingState {
    request: Option<StreamRequest>,
    closed: bool,
}

/// Single-slot request mailbox: newest request wins
#[derive(Debug, Default)]
pub struct PendingRequest {
    state: Mutex<PendingState>,
    wake: Condvar,
}

impl PendingRequest {
    /// Store `request`, returning the unserviced request it replaced
    pub fn submit(&self, request: StreamRequest) -> Option<StreamRequest> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let superseded = state.request.replace(request);
        drop(state);
        self.wake.notify_one();
        superseded
    }

    /// Block until a request is available; `None` once closed
    pub fn take(&self) -> Option<StreamRequest> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if state.closed {
                return None;
            }
            if let Some(request) = state.request.take() {
                return Some(request);
            }
            state = self.wake.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking take
    pub fn try_take(&self) -> Option<StreamRequest> {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).request.take()
    }

    /// Wake the waiter and refuse further requests
    pub fn close(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.wake.notify_all();
    }
}

/// Level-triggered flag with blocking wait
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    wake: Condvar,
}

impl Signal {
    pub fn set(&self) {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.wake.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner()) = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wait until set or `timeout`; returns the flag state
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let flag = self.flag.lock().unwrap_or_else(|e| e.into_inner());
        let (flag, _) = self
            .wake
            .wait_timeout_while(flag, timeout, |set| !*set)
            .unwrap_or_else(|e| e.into_inner());
        *flag
    }
}

/// Frame handoff between one streaming worker and one consumer
#[derive(Debug)]
pub struct SharedFrameChannel {
    height: usize,
    width: usize,
    slot: Mutex<FrameSlot>,
    requests: PendingRequest,
    responses_tx: Sender<StreamResponse>,
    responses_rx: Receiver<StreamResponse>,
    frame_ready: Signal,
}

impl SharedFrameChannel {
    /// Allocate the slot for `height × width` frames
    pub fn new(height: usize, width: usize) -> Self {
        let (responses_tx, responses_rx) = unbounded();
        Self {
            height,
            width,
            slot: Mutex::new(FrameSlot {
                pixels: vec![0.0; height * width * CHANNELS].into_boxed_slice(),
                ordinal: -1.0,
            }),
            requests: PendingRequest::default(),
            responses_tx,
            responses_rx,
            frame_ready: Signal::default(),
        }
    }

    /// `(height, width)` the slot was sized for
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn requests(&self) -> &PendingRequest {
        &self.requests
    }

    pub fn frame_ready(&self) -> &Signal {
        &self.frame_ready
    }

    /// Newest-wins request submission
    pub fn request(&self, request: StreamRequest) {
        if let Some(old) = self.requests.submit(request) {
            trace!("Request {:?} superseded by {:?}", old, request);
        }
    }

    // ========== Writer side ==========

    /// Copy a decoded frame into the slot, queue its response and raise the signal.
    pub fn publish(&self, ordinal: usize, pixels: &FrameBuffer, trigger: Trigger) -> Result<()> {
        if pixels.shape() != self.shape() {
            return Err(EngineError::ShapeMismatch {
                expected: self.shape(),
                found: pixels.shape(),
            });
        }
        {
            let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
            slot.pixels.copy_from_slice(pixels.as_slice());
            slot.ordinal = ordinal as f32;
            // receiver lives in self, send cannot fail
            let _ = self.responses_tx.send(StreamResponse { ordinal, trigger });
        }
        self.frame_ready.set();
        Ok(())
    }

    // ========== Reader side ==========

    /// Copy out the slot paired with its newest response.
    /// `None` when the slot was already consumed.
    pub fn read_update(&self) -> Result<Option<FrameUpdate>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let Some(response) = self.responses_rx.try_iter().last() else {
            return Ok(None);
        };
        let ordinal = slot.ordinal as usize;
        let trigger = if ordinal == response.ordinal {
            response.trigger
        } else {
            Trigger::Unknown
        };
        let pixels = FrameBuffer::from_vec(self.width, self.height, slot.pixels.to_vec())?;
        Ok(Some(FrameUpdate {
            ordinal,
            pixels,
            trigger,
        }))
    }

    /// Raw ordinal slot value (`-1` before the first frame)
    pub fn slot_ordinal(&self) -> f32 {
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).ordinal
    }
}
