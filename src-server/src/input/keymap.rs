//! Keycode translation and the keyboard safety filter.
//!
//! Clients send keycodes in the JavaScript `KeyboardEvent.keyCode` space;
//! these map to Windows virtual-key codes before synthesis. The safety
//! filter suppresses the Win keys and the Ctrl+Alt+Delete chord while
//! tracking modifier state from the event stream itself.

// Virtual-key codes used by the table and the filter.
pub const VK_BACK: u16 = 0x08;
pub const VK_TAB: u16 = 0x09;
pub const VK_RETURN: u16 = 0x0D;
pub const VK_SHIFT: u16 = 0x10;
pub const VK_CONTROL: u16 = 0x11;
pub const VK_MENU: u16 = 0x12;
pub const VK_PAUSE: u16 = 0x13;
pub const VK_CAPITAL: u16 = 0x14;
pub const VK_ESCAPE: u16 = 0x1B;
pub const VK_SPACE: u16 = 0x20;
pub const VK_PRIOR: u16 = 0x21;
pub const VK_NEXT: u16 = 0x22;
pub const VK_END: u16 = 0x23;
pub const VK_HOME: u16 = 0x24;
pub const VK_LEFT: u16 = 0x25;
pub const VK_UP: u16 = 0x26;
pub const VK_RIGHT: u16 = 0x27;
pub const VK_DOWN: u16 = 0x28;
pub const VK_SNAPSHOT: u16 = 0x2C;
pub const VK_INSERT: u16 = 0x2D;
pub const VK_DELETE: u16 = 0x2E;
pub const VK_LWIN: u16 = 0x5B;
pub const VK_RWIN: u16 = 0x5C;
pub const VK_APPS: u16 = 0x5D;
pub const VK_NUMPAD0: u16 = 0x60;
pub const VK_MULTIPLY: u16 = 0x6A;
pub const VK_ADD: u16 = 0x6B;
pub const VK_SUBTRACT: u16 = 0x6D;
pub const VK_DECIMAL: u16 = 0x6E;
pub const VK_DIVIDE: u16 = 0x6F;
pub const VK_F1: u16 = 0x70;
pub const VK_NUMLOCK: u16 = 0x90;
pub const VK_SCROLL: u16 = 0x91;
pub const VK_LCONTROL: u16 = 0xA2;
pub const VK_RCONTROL: u16 = 0xA3;
pub const VK_LMENU: u16 = 0xA4;
pub const VK_RMENU: u16 = 0xA5;
pub const VK_OEM_1: u16 = 0xBA;
pub const VK_OEM_PLUS: u16 = 0xBB;
pub const VK_OEM_COMMA: u16 = 0xBC;
pub const VK_OEM_MINUS: u16 = 0xBD;
pub const VK_OEM_PERIOD: u16 = 0xBE;
pub const VK_OEM_2: u16 = 0xBF;
pub const VK_OEM_3: u16 = 0xC0;
pub const VK_OEM_4: u16 = 0xDB;
pub const VK_OEM_5: u16 = 0xDC;
pub const VK_OEM_6: u16 = 0xDD;
pub const VK_OEM_7: u16 = 0xDE;

/// Map a JavaScript keycode to a virtual-key code. Letters and digits map
/// straight through; unknown codes return `None` and are dropped.
pub fn js_key_to_vk(key: u16) -> Option<u16> {
    if (65..=90).contains(&key) || (48..=57).contains(&key) {
        return Some(key);
    }
    let vk = match key {
        8 => VK_BACK,
        9 => VK_TAB,
        13 => VK_RETURN,
        16 => VK_SHIFT,
        17 => VK_CONTROL,
        18 => VK_MENU,
        19 => VK_PAUSE,
        20 => VK_CAPITAL,
        27 => VK_ESCAPE,
        32 => VK_SPACE,
        33 => VK_PRIOR,
        34 => VK_NEXT,
        35 => VK_END,
        36 => VK_HOME,
        37 => VK_LEFT,
        38 => VK_UP,
        39 => VK_RIGHT,
        40 => VK_DOWN,
        44 => VK_SNAPSHOT,
        45 => VK_INSERT,
        46 => VK_DELETE,
        91 => VK_LWIN,
        92 => VK_RWIN,
        96..=105 => VK_NUMPAD0 + (key - 96),
        106 => VK_MULTIPLY,
        107 => VK_ADD,
        109 => VK_SUBTRACT,
        110 => VK_DECIMAL,
        111 => VK_DIVIDE,
        112..=123 => VK_F1 + (key - 112),
        144 => VK_NUMLOCK,
        145 => VK_SCROLL,
        186 => VK_OEM_1,
        187 => VK_OEM_PLUS,
        188 => VK_OEM_COMMA,
        189 => VK_OEM_MINUS,
        190 => VK_OEM_PERIOD,
        191 => VK_OEM_2,
        192 => VK_OEM_3,
        219 => VK_OEM_4,
        220 => VK_OEM_5,
        221 => VK_OEM_6,
        222 => VK_OEM_7,
        _ => return None,
    };
    Some(vk)
}

/// Keys that need the extended-key flag when synthesized.
pub fn is_extended(vk: u16) -> bool {
    matches!(
        vk,
        VK_INSERT
            | VK_DELETE
            | VK_HOME
            | VK_END
            | VK_PRIOR
            | VK_NEXT
            | VK_LEFT
            | VK_RIGHT
            | VK_UP
            | VK_DOWN
            | VK_LWIN
            | VK_RWIN
            | VK_APPS
            | VK_DIVIDE
            | VK_NUMLOCK
    )
}

/// Tracks modifier state and rejects key combinations that must never be
/// injected into the host session.
#[derive(Debug, Default)]
pub struct BlockedKeyFilter {
    ctrl_down: bool,
    alt_down: bool,
}

impl BlockedKeyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update modifier state and report whether the event is blocked.
    pub fn check(&mut self, vk: u16, down: bool) -> bool {
        if matches!(vk, VK_CONTROL | VK_LCONTROL | VK_RCONTROL) {
            self.ctrl_down = down;
        }
        if matches!(vk, VK_MENU | VK_LMENU | VK_RMENU) {
            self.alt_down = down;
        }
        matches!(vk, VK_LWIN | VK_RWIN)
            || (self.ctrl_down && self.alt_down && vk == VK_DELETE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letters_and_digits_pass_through() {
        assert_eq!(js_key_to_vk(65), Some(65)); // A
        assert_eq!(js_key_to_vk(90), Some(90)); // Z
        assert_eq!(js_key_to_vk(48), Some(48)); // 0
    }

    #[test]
    fn test_function_and_numpad_ranges() {
        assert_eq!(js_key_to_vk(112), Some(VK_F1));
        assert_eq!(js_key_to_vk(123), Some(VK_F1 + 11)); // F12
        assert_eq!(js_key_to_vk(96), Some(VK_NUMPAD0));
        assert_eq!(js_key_to_vk(105), Some(VK_NUMPAD0 + 9));
    }

    #[test]
    fn test_unknown_keycode_dropped() {
        assert_eq!(js_key_to_vk(250), None);
        assert_eq!(js_key_to_vk(7), None);
    }

    #[test]
    fn test_extended_keys() {
        assert!(is_extended(VK_DELETE));
        assert!(is_extended(VK_LEFT));
        assert!(!is_extended(VK_RETURN));
        assert!(!is_extended(65));
    }

    #[test]
    fn test_win_keys_always_blocked() {
        let mut f = BlockedKeyFilter::new();
        assert!(f.check(VK_LWIN, true));
        assert!(f.check(VK_RWIN, false));
    }

    #[test]
    fn test_ctrl_alt_delete_blocked() {
        let mut f = BlockedKeyFilter::new();
        // Delete alone is fine.
        assert!(!f.check(VK_DELETE, true));
        f.check(VK_CONTROL, true);
        f.check(VK_MENU, true);
        assert!(f.check(VK_DELETE, true));
        // Releasing a modifier unblocks it again.
        f.check(VK_MENU, false);
        assert!(!f.check(VK_DELETE, true));
    }
}
