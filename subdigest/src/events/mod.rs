//! Task events published on every accepted status change.
//!
//! The registry remains the source of truth; sinks are a push-style view
//! over the same changes for logging and live subscribers.

mod sink;

pub use sink::{
    BroadcastEventSink, CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink,
    TaskEvent, TaskEventKind,
};
