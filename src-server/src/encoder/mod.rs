//! Hardware video encoding.
//!
//! Three vendor backends (NVENC, QSV, AMF) share one contract through
//! [`EncoderOps`]; vendor-specific tuning lives in a table keyed by
//! (vendor, codec) in [`tuning`]. The FFmpeg/D3D11VA implementation is
//! Windows-only; everything here is the portable surface the scheduler and
//! server are written against.

pub mod tuning;

#[cfg(windows)]
pub mod ffmpeg;

use airdesk_common::{Codec, GpuVendor};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// One encoded frame: concatenated NAL/OBU packets for a single input.
#[derive(Debug, Clone, Default)]
pub struct EncodedFrame {
    pub data: Vec<u8>,
    /// Input capture timestamp, microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Wall-clock encode duration.
    pub encode_time_us: u32,
    pub is_key: bool,
}

/// The encoder operation contract shared by all vendor backends.
pub trait EncoderOps<T>: Send {
    /// Encode one frame. `force_key` requests an IDR/keyframe; the encoder
    /// also keys the very first frame on its own. Returns `None` when the
    /// encoder produced no output (startup latency or a transient failure).
    fn encode(&mut self, texture: &T, timestamp: i64, force_key: bool) -> Option<&EncodedFrame>;

    /// Reconfigure bitrate/time-base for a new frame rate. Returns whether
    /// anything changed; a change forces the next frame to be a keyframe.
    fn update_fps(&mut self, fps: u32) -> bool;

    /// Drain pending packets and reset encoder buffers; the next frame
    /// will be a keyframe.
    fn flush(&mut self);

    /// Fence-based predicate: has the GPU finished consuming the last
    /// submitted input texture?
    fn is_encode_complete(&self) -> bool;

    fn vendor(&self) -> GpuVendor;
    fn codec(&self) -> Codec;
}

/// Shared slot holding the current encoder.
///
/// FPS, codec and resolution changes re-create the encoder under this
/// lock; the `ready` flag lets the scheduler sample availability without
/// taking it.
pub struct EncoderCell<T> {
    inner: Mutex<Option<Box<dyn EncoderOps<T>>>>,
    ready: AtomicBool,
}

impl<T> Default for EncoderCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EncoderCell<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn lock(&self) -> MutexGuard<'_, Option<Box<dyn EncoderOps<T>>>> {
        self.inner.lock().unwrap()
    }

    /// Install a new encoder and mark the cell ready.
    pub fn install(&self, encoder: Box<dyn EncoderOps<T>>) {
        let mut guard = self.inner.lock().unwrap();
        *guard = Some(encoder);
        self.ready.store(true, Ordering::Release);
    }

    /// Drop the current encoder (entered while a replacement is built).
    pub fn clear(&self) {
        self.ready.store(false, Ordering::Release);
        let mut guard = self.inner.lock().unwrap();
        *guard = None;
    }
}

/// Target bit rate for a resolution/rate combination, in bits per second.
/// Max rate and VBV buffer are both twice this.
pub fn target_bitrate(width: u32, height: u32, fps: u32) -> i64 {
    (0.18085 * width as f64 * height as f64 * fps as f64) as i64
}

/// FFmpeg encoder names by vendor and codec.
pub fn encoder_name(vendor: GpuVendor, codec: Codec) -> Option<&'static str> {
    const NAMES: [[&str; 3]; 3] = [
        ["av1_nvenc", "hevc_nvenc", "h264_nvenc"],
        ["av1_qsv", "hevc_qsv", "h264_qsv"],
        ["av1_amf", "hevc_amf", "h264_amf"],
    ];
    let row = match vendor {
        GpuVendor::Nvidia => 0,
        GpuVendor::Intel => 1,
        GpuVendor::Amd => 2,
        GpuVendor::Unknown => return None,
    };
    Some(NAMES[row][codec.to_wire() as usize])
}

/// Probe order: the detected vendor first, then the remaining two.
pub fn vendor_priority(detected: GpuVendor) -> Vec<GpuVendor> {
    let mut order = Vec::with_capacity(3);
    if detected != GpuVendor::Unknown {
        order.push(detected);
    }
    for v in [GpuVendor::Nvidia, GpuVendor::Intel, GpuVendor::Amd] {
        if v != detected {
            order.push(v);
        }
    }
    order
}

/// Map a DXGI adapter vendor id to a [`GpuVendor`].
pub fn vendor_from_adapter_id(vendor_id: u32) -> GpuVendor {
    match vendor_id {
        0x10DE => GpuVendor::Nvidia,
        0x8086 => GpuVendor::Intel,
        0x1002 => GpuVendor::Amd,
        _ => GpuVendor::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitrate_formula() {
        // 1920x1080 @ 60: ~22.5 Mbps
        let br = target_bitrate(1920, 1080, 60);
        assert_eq!(br, (0.18085f64 * 1920.0 * 1080.0 * 60.0) as i64);
        assert!(br > 22_000_000 && br < 23_000_000);
    }

    #[test]
    fn test_encoder_name_matrix() {
        assert_eq!(
            encoder_name(GpuVendor::Nvidia, Codec::Av1),
            Some("av1_nvenc")
        );
        assert_eq!(
            encoder_name(GpuVendor::Intel, Codec::H265),
            Some("hevc_qsv")
        );
        assert_eq!(encoder_name(GpuVendor::Amd, Codec::H264), Some("h264_amf"));
        assert_eq!(encoder_name(GpuVendor::Unknown, Codec::H264), None);
    }

    #[test]
    fn test_vendor_priority_detected_first() {
        assert_eq!(
            vendor_priority(GpuVendor::Amd),
            vec![GpuVendor::Amd, GpuVendor::Nvidia, GpuVendor::Intel]
        );
        assert_eq!(
            vendor_priority(GpuVendor::Unknown),
            vec![GpuVendor::Nvidia, GpuVendor::Intel, GpuVendor::Amd]
        );
    }

    #[test]
    fn test_vendor_from_adapter_id() {
        assert_eq!(vendor_from_adapter_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(vendor_from_adapter_id(0x8086), GpuVendor::Intel);
        assert_eq!(vendor_from_adapter_id(0x1002), GpuVendor::Amd);
        assert_eq!(vendor_from_adapter_id(0x1414), GpuVendor::Unknown);
    }

    #[test]
    fn test_encoder_cell_ready_tracking() {
        let cell: EncoderCell<u32> = EncoderCell::new();
        assert!(!cell.is_ready());
        assert!(cell.lock().is_none());
        cell.clear();
        assert!(!cell.is_ready());
    }
}
