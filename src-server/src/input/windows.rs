//! Windows input synthesis, cursor inspection and clipboard access.

use airdesk_common::CursorShape;
use std::sync::OnceLock;
use tracing::{debug, warn};
use windows::Win32::Foundation::{HANDLE, HGLOBAL, HWND};
use windows::Win32::Graphics::Gdi::{GetMonitorInfoW, HMONITOR, MONITORINFO};
use windows::Win32::System::DataExchange::{
    CloseClipboard, EmptyClipboard, GetClipboardData, IsClipboardFormatAvailable, OpenClipboard,
    SetClipboardData,
};
use windows::Win32::System::Memory::{GlobalAlloc, GlobalLock, GlobalUnlock, GMEM_MOVEABLE};
use windows::Win32::UI::Input::KeyboardAndMouse::{
    MapVirtualKeyW, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT,
    KEYBD_EVENT_FLAGS, KEYEVENTF_EXTENDEDKEY, KEYEVENTF_KEYUP, MAPVK_VK_TO_VSC,
    MOUSEEVENTF_ABSOLUTE, MOUSEEVENTF_HWHEEL, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP,
    MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_MOVE, MOUSEEVENTF_RIGHTDOWN,
    MOUSEEVENTF_RIGHTUP, MOUSEEVENTF_VIRTUALDESK, MOUSEEVENTF_WHEEL, MOUSEEVENTF_XDOWN,
    MOUSEEVENTF_XUP, MOUSEINPUT, MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{
    GetCursorInfo, GetSystemMetrics, LoadCursorW, CURSORINFO, CURSOR_SHOWING, IDC_APPSTARTING,
    IDC_ARROW, IDC_CROSS, IDC_HAND, IDC_HELP, IDC_IBEAM, IDC_NO, IDC_SIZEALL, IDC_SIZENESW,
    IDC_SIZENS, IDC_SIZENWSE, IDC_SIZEWE, IDC_WAIT, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN,
    SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN,
};

const WHEEL_DELTA: i32 = 120;
const XBUTTON1: i32 = 1;
const XBUTTON2: i32 = 2;
const CF_UNICODETEXT: u32 = 13;

fn send(inputs: &[INPUT]) -> bool {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent != inputs.len() as u32 {
        debug!("SendInput sent {}/{}", sent, inputs.len());
        return false;
    }
    true
}

fn mouse_input(dx: i32, dy: i32, mouse_data: i32, flags: u32) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx,
                dy,
                mouseData: mouse_data,
                dwFlags: MOUSE_EVENT_FLAGS(flags),
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

/// The virtual screen rectangle (x, y, w, h).
pub fn virtual_screen() -> (i32, i32, i32, i32) {
    unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN),
            GetSystemMetrics(SM_CYVIRTUALSCREEN),
        )
    }
}

/// Monitor rectangle (x, y, w, h) for an HMONITOR handle.
pub fn monitor_bounds(handle: isize) -> Option<(i32, i32, i32, i32)> {
    let mut info = MONITORINFO {
        cbSize: std::mem::size_of::<MONITORINFO>() as u32,
        ..Default::default()
    };
    let ok = unsafe { GetMonitorInfoW(HMONITOR(handle as *mut _), &mut info) }.as_bool();
    if !ok {
        warn!("GetMonitorInfoW failed for handle {:#x}", handle);
        return None;
    }
    let r = info.rcMonitor;
    Some((r.left, r.top, r.right - r.left, r.bottom - r.top))
}

pub fn send_mouse_absolute(ax: i32, ay: i32) -> bool {
    let flags = MOUSEEVENTF_MOVE.0 | MOUSEEVENTF_ABSOLUTE.0 | MOUSEEVENTF_VIRTUALDESK.0;
    send(&[mouse_input(ax, ay, 0, flags)])
}

pub fn send_mouse_relative(dx: i16, dy: i16) -> bool {
    send(&[mouse_input(dx as i32, dy as i32, 0, MOUSEEVENTF_MOVE.0)])
}

pub fn send_mouse_button(button: u8, down: bool) -> bool {
    let flags = match (button, down) {
        (0, true) => MOUSEEVENTF_LEFTDOWN.0,
        (0, false) => MOUSEEVENTF_LEFTUP.0,
        (1, true) => MOUSEEVENTF_RIGHTDOWN.0,
        (1, false) => MOUSEEVENTF_RIGHTUP.0,
        (2, true) => MOUSEEVENTF_MIDDLEDOWN.0,
        (2, false) => MOUSEEVENTF_MIDDLEUP.0,
        (3 | 4, true) => MOUSEEVENTF_XDOWN.0,
        (3 | 4, false) => MOUSEEVENTF_XUP.0,
        _ => return false,
    };
    let data = match button {
        3 => XBUTTON1,
        4 => XBUTTON2,
        _ => 0,
    };
    send(&[mouse_input(0, 0, data, flags)])
}

pub fn send_mouse_wheel(dx: i16, dy: i16) -> bool {
    let mut ok = true;
    if dy != 0 {
        let amount = -(dy as i32) * WHEEL_DELTA / 100;
        ok &= send(&[mouse_input(0, 0, amount, MOUSEEVENTF_WHEEL.0)]);
    }
    if dx != 0 {
        let amount = dx as i32 * WHEEL_DELTA / 100;
        ok &= send(&[mouse_input(0, 0, amount, MOUSEEVENTF_HWHEEL.0)]);
    }
    ok
}

pub fn send_key(vk: u16, scan: u16, down: bool, extended: bool) -> bool {
    let scan = if scan != 0 {
        scan
    } else {
        unsafe { MapVirtualKeyW(vk as u32, MAPVK_VK_TO_VSC) as u16 }
    };
    let mut flags = 0u32;
    if !down {
        flags |= KEYEVENTF_KEYUP.0;
    }
    if extended {
        flags |= KEYEVENTF_EXTENDEDKEY.0;
    }
    let input = INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: scan,
                dwFlags: KEYBD_EVENT_FLAGS(flags),
                time: 0,
                dwExtraInfo: 0,
            },
        },
    };
    send(&[input])
}

fn standard_cursors() -> &'static [isize; 13] {
    static CACHE: OnceLock<[isize; 13]> = OnceLock::new();
    CACHE.get_or_init(|| {
        let ids = [
            IDC_ARROW,
            IDC_IBEAM,
            IDC_HAND,
            IDC_WAIT,
            IDC_APPSTARTING,
            IDC_CROSS,
            IDC_SIZEALL,
            IDC_SIZEWE,
            IDC_SIZENS,
            IDC_SIZENWSE,
            IDC_SIZENESW,
            IDC_NO,
            IDC_HELP,
        ];
        let mut handles = [0isize; 13];
        for (slot, id) in handles.iter_mut().zip(ids) {
            *slot = unsafe { LoadCursorW(None, id) }
                .map(|h| h.0 as isize)
                .unwrap_or(0);
        }
        handles
    })
}

/// Classify the current OS cursor against the cached standard handles.
pub fn cursor_shape() -> Option<CursorShape> {
    let mut info = CURSORINFO {
        cbSize: std::mem::size_of::<CURSORINFO>() as u32,
        ..Default::default()
    };
    if unsafe { GetCursorInfo(&mut info) }.is_err() {
        return None;
    }
    if (info.flags & CURSOR_SHOWING).0 != 0 {
        let handle = info.hCursor.0 as isize;
        for (i, &cached) in standard_cursors().iter().enumerate() {
            if cached != 0 && cached == handle {
                return Some(CursorShape::STANDARD[i]);
            }
        }
        Some(CursorShape::Custom)
    } else {
        Some(CursorShape::None)
    }
}

/// Write UTF-8 text to the clipboard as Unicode text.
pub fn set_clipboard_text(text: &str) -> bool {
    unsafe {
        if OpenClipboard(HWND::default()).is_err() {
            warn!("OpenClipboard failed");
            return false;
        }
        let result = (|| {
            EmptyClipboard().ok()?;
            let wide: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
            let bytes = wide.len() * 2;
            let hmem: HGLOBAL = GlobalAlloc(GMEM_MOVEABLE, bytes).ok()?;
            let ptr = GlobalLock(hmem) as *mut u16;
            if ptr.is_null() {
                return None;
            }
            std::ptr::copy_nonoverlapping(wide.as_ptr(), ptr, wide.len());
            let _ = GlobalUnlock(hmem);
            SetClipboardData(CF_UNICODETEXT, HANDLE(hmem.0)).ok()?;
            Some(())
        })();
        let _ = CloseClipboard();
        result.is_some()
    }
}

/// Read Unicode text from the clipboard as UTF-8. Empty string when the
/// clipboard holds no text.
pub fn get_clipboard_text() -> String {
    unsafe {
        if OpenClipboard(HWND::default()).is_err() {
            return String::new();
        }
        let result = (|| {
            IsClipboardFormatAvailable(CF_UNICODETEXT).ok()?;
            let handle = GetClipboardData(CF_UNICODETEXT).ok()?;
            let hglobal = HGLOBAL(handle.0);
            let ptr = GlobalLock(hglobal) as *const u16;
            if ptr.is_null() {
                return None;
            }
            let mut len = 0usize;
            while *ptr.add(len) != 0 {
                len += 1;
            }
            let text = String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len));
            let _ = GlobalUnlock(hglobal);
            Some(text)
        })();
        let _ = CloseClipboard();
        result.unwrap_or_default()
    }
}
