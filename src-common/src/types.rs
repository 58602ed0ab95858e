//! Shared types for capture, encoding and the wire protocol.

use serde::{Deserialize, Serialize};

/// Video codec identifiers as carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// AV1 (wire value 0)
    Av1,
    /// H.265 / HEVC (wire value 1)
    H265,
    /// H.264 / AVC (wire value 2)
    H264,
}

impl Codec {
    /// Parse a wire byte. Values outside 0..=2 are rejected.
    pub fn from_wire(v: u8) -> Option<Self> {
        match v {
            0 => Some(Codec::Av1),
            1 => Some(Codec::H265),
            2 => Some(Codec::H264),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Codec::Av1 => 0,
            Codec::H265 => 1,
            Codec::H264 => 2,
        }
    }

    /// Bit in the capability bitmap advertised to peers.
    pub fn cap_bit(self) -> u8 {
        1 << self.to_wire()
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Codec::Av1 => "AV1",
            Codec::H265 => "H.265/HEVC",
            Codec::H264 => "H.264/AVC",
        }
    }

    /// Parse from a configuration string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "av1" => Some(Codec::Av1),
            "h265" | "hevc" => Some(Codec::H265),
            "h264" | "avc" => Some(Codec::H264),
            _ => None,
        }
    }
}

/// GPU vendor detected from the adapter id, used for encoder selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Intel,
    Amd,
    Unknown,
}

impl GpuVendor {
    pub fn display_name(self) -> &'static str {
        match self {
            GpuVendor::Nvidia => "NVIDIA NVENC",
            GpuVendor::Intel => "Intel QSV",
            GpuVendor::Amd => "AMD AMF",
            GpuVendor::Unknown => "Unknown",
        }
    }
}

/// Cursor shape classification reported over the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Default,
    Text,
    Pointer,
    Wait,
    Progress,
    Crosshair,
    Move,
    EwResize,
    NsResize,
    NwseResize,
    NeswResize,
    NotAllowed,
    Help,
    None,
    Custom,
}

impl CursorShape {
    pub fn to_wire(self) -> u8 {
        match self {
            CursorShape::Default => 0,
            CursorShape::Text => 1,
            CursorShape::Pointer => 2,
            CursorShape::Wait => 3,
            CursorShape::Progress => 4,
            CursorShape::Crosshair => 5,
            CursorShape::Move => 6,
            CursorShape::EwResize => 7,
            CursorShape::NsResize => 8,
            CursorShape::NwseResize => 9,
            CursorShape::NeswResize => 10,
            CursorShape::NotAllowed => 11,
            CursorShape::Help => 12,
            CursorShape::None => 13,
            CursorShape::Custom => 255,
        }
    }

    /// The standard shapes in wire order; used to map cached OS cursor
    /// handles back to a classification.
    pub const STANDARD: [CursorShape; 13] = [
        CursorShape::Default,
        CursorShape::Text,
        CursorShape::Pointer,
        CursorShape::Wait,
        CursorShape::Progress,
        CursorShape::Crosshair,
        CursorShape::Move,
        CursorShape::EwResize,
        CursorShape::NsResize,
        CursorShape::NwseResize,
        CursorShape::NeswResize,
        CursorShape::NotAllowed,
        CursorShape::Help,
    ];
}

/// Information about a display monitor.
///
/// Rebuilt by enumeration; the primary monitor sorts first and indices are
/// renumbered densely after the sort. Consumers hold only the index and
/// dereference under the monitor-set lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorInfo {
    /// Opaque platform handle (HMONITOR on Windows)
    pub handle: isize,
    /// Dense index after the primary-first sort
    pub index: u8,
    /// Width in physical pixels
    pub width: u32,
    /// Height in physical pixels
    pub height: u32,
    /// Refresh rate in Hz
    pub refresh_hz: u32,
    /// Whether this is the primary monitor
    pub is_primary: bool,
    /// Friendly name for UI (falls back to the GDI device name)
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_wire_roundtrip() {
        for c in [Codec::Av1, Codec::H265, Codec::H264] {
            assert_eq!(Codec::from_wire(c.to_wire()), Some(c));
        }
        assert_eq!(Codec::from_wire(3), None);
        assert_eq!(Codec::from_wire(7), None);
    }

    #[test]
    fn test_codec_cap_bits() {
        assert_eq!(Codec::Av1.cap_bit(), 0b001);
        assert_eq!(Codec::H265.cap_bit(), 0b010);
        assert_eq!(Codec::H264.cap_bit(), 0b100);
    }

    #[test]
    fn test_cursor_wire_values() {
        assert_eq!(CursorShape::Default.to_wire(), 0);
        assert_eq!(CursorShape::None.to_wire(), 13);
        assert_eq!(CursorShape::Custom.to_wire(), 255);
        assert_eq!(CursorShape::STANDARD.len(), 13);
    }
}
