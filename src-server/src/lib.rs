//! AirDesk streaming server.
//!
//! A low-latency remote-desktop pipeline: the host monitor is captured
//! into a ring of GPU textures, hardware-encoded, and delivered together
//! with audio, cursor shape and bidirectional input over five WebRTC data
//! channels to a single browser peer.
//!
//! The hot path is plain OS threads with explicit synchronization; the
//! only async runtime in the process is the transport's private worker
//! pool.

pub mod audio;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod input;
pub mod pipeline;
pub mod platform;
pub mod server;
pub mod signaling;
pub mod transport;
