//! The capture → encode → send pipeline.
//!
//! [`frame_slot`] is the bounded hand-off ring between the capture callback
//! and the scheduler; [`scheduler`] is the pacing loop that drives the
//! encoder from it and pushes encoded frames into the transport.

pub mod frame_slot;
pub mod scheduler;

pub use frame_slot::{Frame, FrameSlot};
pub use scheduler::{FenceSync, PipelineScheduler, VideoOutput};
