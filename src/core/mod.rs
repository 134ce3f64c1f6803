//! Core engine modules - indices, seek planning, streaming, events
//!
//! Everything here is independent of the media backend: it works against
//! the `VideoSource`/`SourceFactory` traits from `crate::source`.

pub mod channel;
pub mod consumer;
pub mod event_bus;
pub mod index;
pub mod planner;
pub mod worker;

// Re-exports for convenience
pub use channel::{FrameUpdate, SharedFrameChannel, StreamRequest, Trigger};
pub use consumer::{ConsumerSync, SyncEvent, TickOutcome};
pub use event_bus::{downcast_event, BoxedEvent, EventBus, EventEmitter};
pub use index::{IndexBuilders, IndexMode, IndexState, PtsIndex};
pub use planner::{DecodeCursor, SeekPlan, SeekPlanner, Target};
pub use worker::StreamingWorker;
