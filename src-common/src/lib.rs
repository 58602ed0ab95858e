//! AirDesk Common Library
//!
//! Shared types and the binary wire protocol spoken between the AirDesk
//! streaming server and its browser client: control messages, video packet
//! framing with XOR parity, audio/mic packet headers, and input events.

pub mod logging;
pub mod protocol;
pub mod time;
pub mod types;

pub use types::*;

/// Server version string advertised to peers on connect.
pub const AIRDESK_VERSION: &str = env!("CARGO_PKG_VERSION");
