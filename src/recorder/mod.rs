//! Recording lifecycle
//!
//! `machine` holds the state machine itself; `service` runs it on a single
//! task so user commands and timer ticks are applied strictly in order.

pub(crate) mod machine;
mod service;

pub use machine::{Recorder, RecorderConfig, RecordingState, StateKind, Tick};
pub use service::{spawn, RecorderCommand, RecorderHandle, RecorderSnapshot};
