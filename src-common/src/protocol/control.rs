//! Control channel messages.
//!
//! Inbound messages have exact sizes; anything malformed, truncated or
//! carrying an out-of-range value is dropped by returning `None` from
//! [`parse`]. Outbound messages are built into fresh byte vectors.

use super::*;
use crate::types::{Codec, CursorShape, MonitorInfo};

/// Monitor names are capped on the wire.
pub const MAX_MONITOR_NAME: usize = 63;

/// A validated inbound control message.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMsg {
    /// 16-byte ping, echoed back verbatim with the host timestamp appended.
    Ping { echo: [u8; 16] },
    /// Requested frame rate and mode (mode 1 = follow host refresh).
    FpsSet { fps: u16, mode: u8 },
    /// Codec switch request; out-of-range codec bytes never parse.
    CodecSet { codec: Codec },
    RequestKey,
    MonitorSet { index: u8 },
    /// Clipboard write, length-prefixed, capped at 1 MiB.
    ClipboardData { data: Vec<u8> },
    ClipboardGet,
    CursorCapture { enabled: bool },
    AudioEnable { enabled: bool },
    MicEnable { enabled: bool },
}

/// Parse one inbound control message. `None` means "drop it".
pub fn parse(data: &[u8]) -> Option<ControlMsg> {
    let magic = read_magic(data)?;
    match magic {
        MSG_PING => {
            if data.len() != 16 {
                return None;
            }
            let mut echo = [0u8; 16];
            echo.copy_from_slice(data);
            Some(ControlMsg::Ping { echo })
        }
        MSG_FPS_SET => {
            if data.len() != 7 {
                return None;
            }
            let fps = read_u16(data, 4);
            let mode = data[6];
            if !(1..=240).contains(&fps) || mode > 2 {
                return None;
            }
            Some(ControlMsg::FpsSet { fps, mode })
        }
        MSG_CODEC_SET => {
            if data.len() != 5 {
                return None;
            }
            Codec::from_wire(data[4]).map(|codec| ControlMsg::CodecSet { codec })
        }
        MSG_REQUEST_KEY => Some(ControlMsg::RequestKey),
        MSG_MONITOR_SET => {
            if data.len() != 5 {
                return None;
            }
            Some(ControlMsg::MonitorSet { index: data[4] })
        }
        MSG_CLIPBOARD_DATA => {
            if data.len() < 8 {
                return None;
            }
            let len = read_u32(data, 4) as usize;
            if len == 0 || len > MAX_CLIPBOARD_BYTES || data.len() < 8 + len {
                return None;
            }
            Some(ControlMsg::ClipboardData {
                data: data[8..8 + len].to_vec(),
            })
        }
        MSG_CLIPBOARD_GET => Some(ControlMsg::ClipboardGet),
        MSG_CURSOR_CAPTURE => (data.len() == 5).then(|| ControlMsg::CursorCapture {
            enabled: data[4] != 0,
        }),
        MSG_AUDIO_ENABLE => (data.len() == 5).then(|| ControlMsg::AudioEnable {
            enabled: data[4] != 0,
        }),
        MSG_MIC_ENABLE => (data.len() == 5).then(|| ControlMsg::MicEnable {
            enabled: data[4] != 0,
        }),
        _ => None,
    }
}

/// 24-byte ping reply: the 16 received bytes followed by the host timestamp.
pub fn ping_reply(echo: &[u8; 16], host_ts_us: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(24);
    buf.extend_from_slice(echo);
    buf.extend_from_slice(&(host_ts_us as u64).to_le_bytes());
    buf
}

pub fn fps_ack(fps: u16, mode: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(7);
    buf.extend_from_slice(&MSG_FPS_ACK.to_le_bytes());
    buf.extend_from_slice(&fps.to_le_bytes());
    buf.push(mode);
    buf
}

pub fn codec_ack(codec: Codec) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.extend_from_slice(&MSG_CODEC_ACK.to_le_bytes());
    buf.push(codec.to_wire());
    buf
}

pub fn codec_caps(bitmap: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.extend_from_slice(&MSG_CODEC_CAPS.to_le_bytes());
    buf.push(bitmap);
    buf
}

pub fn host_info(host_fps: u16) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6);
    buf.extend_from_slice(&MSG_HOST_INFO.to_le_bytes());
    buf.extend_from_slice(&host_fps.to_le_bytes());
    buf
}

/// Monitor list: count, current index, then per monitor index, dimensions,
/// refresh rate, primary flag and a length-prefixed name (≤ 63 bytes).
pub fn monitor_list(monitors: &[MonitorInfo], current: u8) -> Vec<u8> {
    let mut buf = Vec::with_capacity(6 + monitors.len() * 74);
    buf.extend_from_slice(&MSG_MONITOR_LIST.to_le_bytes());
    buf.push(monitors.len() as u8);
    buf.push(current);
    for m in monitors {
        buf.push(m.index);
        buf.extend_from_slice(&(m.width as u16).to_le_bytes());
        buf.extend_from_slice(&(m.height as u16).to_le_bytes());
        buf.extend_from_slice(&(m.refresh_hz as u16).to_le_bytes());
        buf.push(m.is_primary as u8);
        let name = m.name.as_bytes();
        let n = name.len().min(MAX_MONITOR_NAME);
        buf.push(n as u8);
        buf.extend_from_slice(&name[..n]);
    }
    buf
}

pub fn version(ver: &str) -> Vec<u8> {
    let v = ver.as_bytes();
    let n = v.len().min(u8::MAX as usize);
    let mut buf = Vec::with_capacity(5 + n);
    buf.extend_from_slice(&MSG_VERSION.to_le_bytes());
    buf.push(n as u8);
    buf.extend_from_slice(&v[..n]);
    buf
}

pub fn kicked() -> Vec<u8> {
    MSG_KICKED.to_le_bytes().to_vec()
}

pub fn cursor_shape(shape: CursorShape) -> Vec<u8> {
    let mut buf = Vec::with_capacity(5);
    buf.extend_from_slice(&MSG_CURSOR_SHAPE.to_le_bytes());
    buf.push(shape.to_wire());
    buf
}

pub fn clipboard_data(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + data.len());
    buf.extend_from_slice(&MSG_CLIPBOARD_DATA.to_le_bytes());
    buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
    buf.extend_from_slice(data);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(magic: u32, payload: &[u8]) -> Vec<u8> {
        let mut m = magic.to_le_bytes().to_vec();
        m.extend_from_slice(payload);
        m
    }

    #[test]
    fn test_ping_parse_and_reply() {
        let ping = msg(MSG_PING, &[7u8; 12]);
        let parsed = parse(&ping).unwrap();
        let ControlMsg::Ping { echo } = parsed else {
            panic!("expected ping");
        };
        let reply = ping_reply(&echo, 123_456);
        assert_eq!(reply.len(), 24);
        assert_eq!(&reply[..16], &ping[..]);
        assert_eq!(u64::from_le_bytes(reply[16..].try_into().unwrap()), 123_456);
    }

    #[test]
    fn test_ping_wrong_size_dropped() {
        assert_eq!(parse(&msg(MSG_PING, &[0u8; 11])), None);
        assert_eq!(parse(&msg(MSG_PING, &[0u8; 13])), None);
    }

    #[test]
    fn test_fps_set_bounds() {
        let mut p = 60u16.to_le_bytes().to_vec();
        p.push(0);
        assert_eq!(
            parse(&msg(MSG_FPS_SET, &p)),
            Some(ControlMsg::FpsSet { fps: 60, mode: 0 })
        );

        let mut p = 0u16.to_le_bytes().to_vec();
        p.push(0);
        assert_eq!(parse(&msg(MSG_FPS_SET, &p)), None);

        let mut p = 241u16.to_le_bytes().to_vec();
        p.push(0);
        assert_eq!(parse(&msg(MSG_FPS_SET, &p)), None);

        let mut p = 60u16.to_le_bytes().to_vec();
        p.push(3); // invalid mode
        assert_eq!(parse(&msg(MSG_FPS_SET, &p)), None);
    }

    #[test]
    fn test_codec_set_out_of_range_dropped() {
        assert_eq!(
            parse(&msg(MSG_CODEC_SET, &[1])),
            Some(ControlMsg::CodecSet { codec: Codec::H265 })
        );
        assert_eq!(parse(&msg(MSG_CODEC_SET, &[7])), None);
    }

    #[test]
    fn test_clipboard_length_validation() {
        let mut p = 5u32.to_le_bytes().to_vec();
        p.extend_from_slice(b"hello");
        assert_eq!(
            parse(&msg(MSG_CLIPBOARD_DATA, &p)),
            Some(ControlMsg::ClipboardData {
                data: b"hello".to_vec()
            })
        );

        // Declared length longer than the payload
        let mut p = 6u32.to_le_bytes().to_vec();
        p.extend_from_slice(b"hello");
        assert_eq!(parse(&msg(MSG_CLIPBOARD_DATA, &p)), None);

        // Oversized declaration
        let p = ((MAX_CLIPBOARD_BYTES + 1) as u32).to_le_bytes().to_vec();
        assert_eq!(parse(&msg(MSG_CLIPBOARD_DATA, &p)), None);
    }

    #[test]
    fn test_unknown_magic_ignored() {
        assert_eq!(parse(&msg(0xDEAD_BEEF, &[1, 2, 3])), None);
        assert_eq!(parse(&[1, 2]), None);
    }

    #[test]
    fn test_monitor_list_layout() {
        let monitors = vec![MonitorInfo {
            handle: 0,
            index: 0,
            width: 2560,
            height: 1440,
            refresh_hz: 144,
            is_primary: true,
            name: "Main Display".to_string(),
        }];
        let buf = monitor_list(&monitors, 0);
        assert_eq!(read_magic(&buf), Some(MSG_MONITOR_LIST));
        assert_eq!(buf[4], 1); // count
        assert_eq!(buf[5], 0); // current
        assert_eq!(buf[6], 0); // index
        assert_eq!(read_u16(&buf, 7), 2560);
        assert_eq!(read_u16(&buf, 9), 1440);
        assert_eq!(read_u16(&buf, 11), 144);
        assert_eq!(buf[13], 1); // primary
        assert_eq!(buf[14] as usize, "Main Display".len());
        assert_eq!(&buf[15..], b"Main Display");
    }

    #[test]
    fn test_monitor_name_truncated_to_63() {
        let monitors = vec![MonitorInfo {
            handle: 0,
            index: 0,
            width: 1920,
            height: 1080,
            refresh_hz: 60,
            is_primary: false,
            name: "x".repeat(100),
        }];
        let buf = monitor_list(&monitors, 0);
        assert_eq!(buf[14] as usize, MAX_MONITOR_NAME);
        assert_eq!(buf.len(), 15 + MAX_MONITOR_NAME);
    }

    #[test]
    fn test_version_message() {
        let buf = version("1.0.0");
        assert_eq!(read_magic(&buf), Some(MSG_VERSION));
        assert_eq!(buf[4], 5);
        assert_eq!(&buf[5..], b"1.0.0");
    }
}
