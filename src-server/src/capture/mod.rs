//! Monitor capture.
//!
//! The Windows backend drives Windows.Graphics.Capture into a pool of
//! D3D11 textures with fence-based synchronization; other platforms get a
//! stub that fails construction, so the portable pipeline above it stays
//! buildable and testable everywhere.

pub mod monitor;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use windows::{CaptureTexture, DeviceHandles, ScreenCapture};
#[cfg(windows)]
pub(crate) use windows::gpu_sync::GpuSync;

#[cfg(not(windows))]
mod stub;
#[cfg(not(windows))]
pub use stub::{CaptureTexture, DeviceHandles, ScreenCapture};

/// Invoked when the capture observes a new frame size: (width, height,
/// current target fps). The pipeline recreates the encoder from it.
pub type ResolutionChangeCallback = Box<dyn Fn(u32, u32, u32) + Send + Sync>;

/// Texture-pool size; one bit per slot in the frame ring's mask.
pub const TEXTURE_POOL: usize = 6;

/// Bound on waiting for in-flight capture callbacks during teardown.
pub const CALLBACK_DRAIN_MS: u64 = 500;
