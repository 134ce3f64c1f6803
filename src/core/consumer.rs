//! ConsumerSync - render-loop side of frame streaming
//!
//! Called once per render tick. Applies at most one pending frame update
//! (pixels + timestamp text), broadcasts a [`SyncEvent`] when the update
//! came from a local gesture, otherwise redraws only if asked to.
//!
//! **Used by**: host render loops, CLI demos, the Python binding

use crossbeam_channel::{Receiver, TryRecvError};
use log::{trace, warn};

use crate::core::channel::{FrameUpdate, Trigger};
use crate::core::event_bus::EventEmitter;
use crate::engine::Engine;
use crate::error::Result;
use crate::frame::FrameBuffer;
use crate::source::SourceFactory;
use crate::time_map::SharedTimeMap;

/// Broadcast to linked views after a local scrub or zoom
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
    pub ordinal: usize,
    /// Experiment timestamp of `ordinal`
    pub timestamp: f64,
    pub trigger: Trigger,
}

/// Result of one `tick()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing pending, no redraw requested
    Idle,
    /// No update, but a requested redraw is due
    Redraw,
    /// An update was applied; `synced` if a SyncEvent went out
    Applied { ordinal: usize, synced: bool },
}

/// Display state fed by the streaming worker or the direct path
#[derive(Debug)]
pub struct ConsumerSync {
    updates: Receiver<FrameUpdate>,
    display: FrameBuffer,
    ordinal: Option<usize>,
    timestamp_text: String,
    time_map: SharedTimeMap,
    events: EventEmitter,
    redraw: bool,
}

impl ConsumerSync {
    pub fn new(
        updates: Receiver<FrameUpdate>,
        shape: (usize, usize),
        time_map: SharedTimeMap,
        events: EventEmitter,
    ) -> Self {
        let (height, width) = shape;
        Self {
            updates,
            display: FrameBuffer::new(width, height),
            ordinal: None,
            timestamp_text: String::new(),
            time_map,
            events,
            redraw: false,
        }
    }

    /// Drain at most one pending update and apply it.
    pub fn tick(&mut self) -> TickOutcome {
        match self.updates.try_recv() {
            Ok(update) => self.apply(update),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                if std::mem::take(&mut self.redraw) {
                    TickOutcome::Redraw
                } else {
                    TickOutcome::Idle
                }
            }
        }
    }

    fn apply(&mut self, update: FrameUpdate) -> TickOutcome {
        if update.pixels.shape() != self.display.shape() {
            warn!(
                "Dropping frame {} with shape {:?} (display is {:?})",
                update.ordinal,
                update.pixels.shape(),
                self.display.shape()
            );
            return TickOutcome::Idle;
        }
        let timestamp = self.time_map.load().timestamp(update.ordinal);
        self.display = update.pixels;
        self.ordinal = Some(update.ordinal);
        self.timestamp_text = format!("{:.3}", timestamp);
        self.redraw = false;

        let synced = update.trigger.emits_sync();
        if synced {
            self.events.emit(SyncEvent {
                ordinal: update.ordinal,
                timestamp,
                trigger: update.trigger,
            });
        }
        trace!("Applied frame {} ({:?})", update.ordinal, update.trigger);
        TickOutcome::Applied {
            ordinal: update.ordinal,
            synced,
        }
    }

    /// Direct path: decode `ordinal` on the caller's thread and show it now.
    pub fn set_frame<F: SourceFactory>(&mut self, engine: &mut Engine<F>, ordinal: usize) -> Result<()> {
        let pixels = engine.frame(ordinal)?.pixels.clone();
        self.apply(FrameUpdate {
            ordinal,
            pixels,
            trigger: Trigger::SetFrame,
        });
        Ok(())
    }

    /// Ask for a redraw on the next idle tick
    pub fn request_redraw(&mut self) {
        self.redraw = true;
    }

    pub fn display(&self) -> &FrameBuffer {
        &self.display
    }

    pub fn ordinal(&self) -> Option<usize> {
        self.ordinal
    }

    pub fn timestamp_text(&self) -> &str {
        &self.timestamp_text
    }
}
