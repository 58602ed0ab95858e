//! Capture stub for platforms without a backend.

use super::monitor::MonitorSet;
use super::ResolutionChangeCallback;
use crate::error::InitError;
use crate::pipeline::FrameSlot;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;

/// Placeholder texture handle.
pub type CaptureTexture = ();

/// Placeholder device capability handles.
#[derive(Clone)]
pub struct DeviceHandles;

pub struct ScreenCapture;

impl ScreenCapture {
    pub fn new(
        _slot: Arc<FrameSlot<CaptureTexture>>,
        _monitors: Arc<MonitorSet>,
        _target_fps: Arc<AtomicU32>,
        _monitor: u8,
        _cursor_capture: bool,
    ) -> Result<Self, InitError> {
        Err(InitError::Capture(
            "monitor capture is only available on Windows".into(),
        ))
    }

    pub fn set_resolution_change_callback(&self, _cb: ResolutionChangeCallback) {}

    pub fn start(&self) {}

    pub fn pause(&self) {}

    pub fn switch_monitor(&self, _index: u8) -> bool {
        false
    }

    pub fn set_fps(&self, _fps: u32) -> bool {
        false
    }

    pub fn refresh_host_fps(&self) -> u32 {
        60
    }

    pub fn host_fps(&self) -> u32 {
        60
    }

    pub fn width(&self) -> u32 {
        0
    }

    pub fn height(&self) -> u32 {
        0
    }

    pub fn monitor_index(&self) -> u8 {
        0
    }

    pub fn is_capturing(&self) -> bool {
        false
    }

    pub fn generation(&self) -> u64 {
        0
    }

    pub fn set_cursor_capture(&self, _enabled: bool) {}

    pub fn wait_ready(&self, _fence: u64) -> bool {
        true
    }

    pub fn device_handles(&self) -> DeviceHandles {
        DeviceHandles
    }
}
