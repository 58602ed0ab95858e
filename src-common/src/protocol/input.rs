//! Input channel events.
//!
//! Fixed-layout messages injected by the client. Truncated messages are
//! reported distinctly from unknown magics so the receiver can log them
//! differently; both are dropped.

use super::*;

/// A decoded input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    /// Absolute move, both axes normalized to [0, 1].
    MouseMove { x: f32, y: f32 },
    MouseMoveRel { dx: i16, dy: i16 },
    /// Buttons 0..=4 (left, right, middle, x1, x2).
    MouseButton { button: u8, down: bool },
    MouseWheel { dx: i16, dy: i16 },
    Key { key_code: u16, scan_code: u16, down: bool },
}

/// Why an input message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputParseError {
    Truncated,
    UnknownMagic(u32),
}

const MOUSE_MOVE_SIZE: usize = 12;
const MOUSE_MOVE_REL_SIZE: usize = 8;
const MOUSE_BTN_SIZE: usize = 6;
const MOUSE_WHEEL_SIZE: usize = 8;
const KEY_SIZE: usize = 9;

pub fn parse(data: &[u8]) -> Result<InputEvent, InputParseError> {
    let magic = read_magic(data).ok_or(InputParseError::Truncated)?;
    match magic {
        MSG_MOUSE_MOVE => {
            if data.len() < MOUSE_MOVE_SIZE {
                return Err(InputParseError::Truncated);
            }
            Ok(InputEvent::MouseMove {
                x: read_f32(data, 4),
                y: read_f32(data, 8),
            })
        }
        MSG_MOUSE_MOVE_REL => {
            if data.len() < MOUSE_MOVE_REL_SIZE {
                return Err(InputParseError::Truncated);
            }
            Ok(InputEvent::MouseMoveRel {
                dx: read_i16(data, 4),
                dy: read_i16(data, 6),
            })
        }
        MSG_MOUSE_BTN => {
            if data.len() < MOUSE_BTN_SIZE {
                return Err(InputParseError::Truncated);
            }
            Ok(InputEvent::MouseButton {
                button: data[4],
                down: data[5] != 0,
            })
        }
        MSG_MOUSE_WHEEL => {
            if data.len() < MOUSE_WHEEL_SIZE {
                return Err(InputParseError::Truncated);
            }
            Ok(InputEvent::MouseWheel {
                dx: read_i16(data, 4),
                dy: read_i16(data, 6),
            })
        }
        MSG_KEY => {
            if data.len() < KEY_SIZE {
                return Err(InputParseError::Truncated);
            }
            Ok(InputEvent::Key {
                key_code: read_u16(data, 4),
                scan_code: read_u16(data, 6),
                down: data[8] != 0,
            })
        }
        other => Err(InputParseError::UnknownMagic(other)),
    }
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
    fn test_mouse_move_parse() {
        let mut p = 0.5f32.to_le_bytes().to_vec();
        p.extend_from_slice(&1.0f32.to_le_bytes());
        assert_eq!(
            parse(&msg(MSG_MOUSE_MOVE, &p)),
            Ok(InputEvent::MouseMove { x: 0.5, y: 1.0 })
        );
    }

    #[test]
    fn test_relative_move_negative_deltas() {
        let mut p = (-10i16).to_le_bytes().to_vec();
        p.extend_from_slice(&3i16.to_le_bytes());
        assert_eq!(
            parse(&msg(MSG_MOUSE_MOVE_REL, &p)),
            Ok(InputEvent::MouseMoveRel { dx: -10, dy: 3 })
        );
    }

    #[test]
    fn test_key_parse() {
        let mut p = 65u16.to_le_bytes().to_vec();
        p.extend_from_slice(&30u16.to_le_bytes());
        p.push(1);
        assert_eq!(
            parse(&msg(MSG_KEY, &p)),
            Ok(InputEvent::Key {
                key_code: 65,
                scan_code: 30,
                down: true
            })
        );
    }

    #[test]
    fn test_truncated_dropped() {
        assert_eq!(
            parse(&msg(MSG_MOUSE_MOVE, &[0u8; 7])),
            Err(InputParseError::Truncated)
        );
        assert_eq!(
            parse(&msg(MSG_KEY, &[0u8; 4])),
            Err(InputParseError::Truncated)
        );
        assert_eq!(parse(&[1, 2, 3]), Err(InputParseError::Truncated));
    }

    #[test]
    fn test_unknown_magic_reported() {
        assert_eq!(
            parse(&msg(0x1234_5678, &[0u8; 8])),
            Err(InputParseError::UnknownMagic(0x1234_5678))
        );
    }
}
