//! Binary wire protocol.
//!
//! All messages are little-endian byte sequences introduced by a 4-byte
//! magic. The magics are ASCII tags encoded as `u32` values, matching what
//! the browser client writes into its DataViews.
//!
//! Message framing per channel:
//! - `control`: exact-size messages, see [`control`]
//! - `video`: chunked encoded frames with XOR parity, see [`framing`]
//! - `audio`/`mic`: a 16-byte header followed by an Opus packet, see
//!   [`packet`]
//! - `input`: fixed-layout event messages, see [`input`]

pub mod control;
pub mod framing;
pub mod input;
pub mod packet;

// Control channel, client -> server
pub const MSG_PING: u32 = 0x504E_4750;
pub const MSG_FPS_SET: u32 = 0x4650_5343;
pub const MSG_CODEC_SET: u32 = 0x434F_4443;
pub const MSG_REQUEST_KEY: u32 = 0x4B45_5952;
pub const MSG_MONITOR_SET: u32 = 0x4D4F_4E53;
pub const MSG_CLIPBOARD_DATA: u32 = 0x434C_4950;
pub const MSG_CLIPBOARD_GET: u32 = 0x434C_4754;
pub const MSG_CURSOR_CAPTURE: u32 = 0x4355_5243;
pub const MSG_AUDIO_ENABLE: u32 = 0x4155_4445;
pub const MSG_MIC_ENABLE: u32 = 0x4D49_4345;

// Control channel, server -> client
pub const MSG_HOST_INFO: u32 = 0x484F_5354;
pub const MSG_FPS_ACK: u32 = 0x4650_5341;
pub const MSG_CODEC_ACK: u32 = 0x434F_4441;
pub const MSG_CODEC_CAPS: u32 = 0x434F_4350;
pub const MSG_MONITOR_LIST: u32 = 0x4D4F_4E4C;
pub const MSG_KICKED: u32 = 0x4B49_434B;
pub const MSG_CURSOR_SHAPE: u32 = 0x4355_5253;
pub const MSG_VERSION: u32 = 0x5645_5253;

// Audio and mic channels
pub const MSG_AUDIO_DATA: u32 = 0x4155_4449;
pub const MSG_MIC_DATA: u32 = 0x4D49_4344;

// Input channel
pub const MSG_MOUSE_MOVE: u32 = 0x4D4F_5645;
pub const MSG_MOUSE_MOVE_REL: u32 = 0x4D4F_5652;
pub const MSG_MOUSE_BTN: u32 = 0x4D42_544E;
pub const MSG_MOUSE_WHEEL: u32 = 0x4D57_484C;
pub const MSG_KEY: u32 = 0x4B45_5920;

/// Maximum clipboard payload in either direction (1 MiB).
pub const MAX_CLIPBOARD_BYTES: usize = 1_048_576;

/// Read the leading magic of a message, if present.
pub fn read_magic(data: &[u8]) -> Option<u32> {
    data.get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub(crate) fn read_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

pub(crate) fn read_i16(data: &[u8], off: usize) -> i16 {
    i16::from_le_bytes([data[off], data[off + 1]])
}

pub(crate) fn read_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

pub(crate) fn read_i64(data: &[u8], off: usize) -> i64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&data[off..off + 8]);
    i64::from_le_bytes(b)
}

pub(crate) fn read_f32(data: &[u8], off: usize) -> f32 {
    f32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magics_are_ascii_tags() {
        // Each magic spells a 4-char ASCII tag when read as LE bytes.
        let tag = |m: u32| -> String {
            m.to_le_bytes().iter().map(|&b| b as char).collect()
        };
        assert_eq!(tag(MSG_PING), "PGNP");
        assert_eq!(tag(MSG_AUDIO_DATA), "IDUA");
        assert_eq!(tag(MSG_MIC_DATA), "DCIM");
        assert_eq!(tag(MSG_VERSION), "SREV");
        assert_eq!(tag(MSG_KICKED), "KCIK");
    }

    #[test]
    fn test_read_magic_short_input() {
        assert_eq!(read_magic(&[1, 2, 3]), None);
        assert_eq!(read_magic(&[]), None);
        let ping = MSG_PING.to_le_bytes();
        assert_eq!(read_magic(&ping), Some(MSG_PING));
    }
}
