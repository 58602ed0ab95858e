//! Audio sub-pipelines.
//!
//! [`capture`] takes the system loopback mix, resamples it to 48 kHz and
//! encodes 10 ms Opus frames into a bounded queue the send thread drains.
//! [`mic`] is the symmetric inbound path: peer Opus packets are decoded,
//! resampled to the render device rate and written to a (usually virtual)
//! output device.

pub mod capture;
pub mod mic;
pub mod resample;

#[cfg(windows)]
pub(crate) mod wasapi;

/// Pipeline sample rate for both directions.
pub const SAMPLE_RATE: u32 = 48_000;

/// Opus frame length in samples per channel (10 ms at 48 kHz).
pub const FRAME_SAMPLES: usize = 480;

/// Upper bound for one encoded Opus packet.
pub const MAX_OPUS_PACKET: usize = 4_000;
