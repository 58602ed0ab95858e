//! Input injection.
//!
//! Stateful synthesizer for mouse, keyboard and clipboard events received
//! over the input channel, plus cursor-shape reporting back to the peer.
//! Every operation is rate limited inside a sliding one-second window and
//! keyboard events pass a safety filter before synthesis.

pub mod keymap;
pub mod rate_limit;

#[cfg(windows)]
mod windows;

use airdesk_common::protocol::input::{self as wire, InputEvent, InputParseError};
use airdesk_common::{CursorShape, MonitorInfo};
use keymap::BlockedKeyFilter;
use rate_limit::{Axis, RateLimiter};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Snapshot of injection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub moves: u64,
    pub clicks: u64,
    pub keys: u64,
    pub dropped_moves: u64,
    pub dropped_clicks: u64,
    pub dropped_keys: u64,
    pub blocked_keys: u64,
}

/// Map normalized coordinates on the active monitor to virtual-screen
/// absolute units (0..65535 per axis).
fn to_absolute(
    nx: f32,
    ny: f32,
    monitor: (i32, i32, i32, i32),
    vscreen: (i32, i32, i32, i32),
) -> (i32, i32) {
    let (mx, my, mw, mh) = monitor;
    let (vx, vy, vw, vh) = vscreen;
    let px = mx + (nx.clamp(0.0, 1.0) * mw as f32) as i32;
    let py = my + (ny.clamp(0.0, 1.0) * mh as f32) as i32;
    let ax = (px - vx) as i64 * 65_535 / vw.max(1) as i64;
    let ay = (py - vy) as i64 * 65_535 / vh.max(1) as i64;
    (ax as i32, ay as i32)
}

pub struct InputInjector {
    enabled: AtomicBool,
    mon_x: AtomicI32,
    mon_y: AtomicI32,
    mon_w: AtomicI32,
    mon_h: AtomicI32,
    limiter: RateLimiter,
    filter: Mutex<BlockedKeyFilter>,
    last_cursor: AtomicU8,
    total_moves: AtomicU64,
    total_clicks: AtomicU64,
    total_keys: AtomicU64,
    blocked_keys: AtomicU64,
}

impl Default for InputInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl InputInjector {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            mon_x: AtomicI32::new(0),
            mon_y: AtomicI32::new(0),
            mon_w: AtomicI32::new(1920),
            mon_h: AtomicI32::new(1080),
            limiter: RateLimiter::new(),
            filter: Mutex::new(BlockedKeyFilter::new()),
            last_cursor: AtomicU8::new(CursorShape::Default.to_wire()),
            total_moves: AtomicU64::new(0),
            total_clicks: AtomicU64::new(0),
            total_keys: AtomicU64::new(0),
            blocked_keys: AtomicU64::new(0),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
        info!("Input injection enabled");
    }

    pub fn set_monitor_bounds(&self, x: i32, y: i32, w: i32, h: i32) {
        self.mon_x.store(x, Ordering::Release);
        self.mon_y.store(y, Ordering::Release);
        self.mon_w.store(w, Ordering::Release);
        self.mon_h.store(h, Ordering::Release);
        debug!("Input bounds set to {},{} {}x{}", x, y, w, h);
    }

    /// Re-read the monitor rectangle from its OS handle.
    pub fn update_from_monitor(&self, info: &MonitorInfo) {
        #[cfg(windows)]
        if let Some((x, y, w, h)) = windows::monitor_bounds(info.handle) {
            self.set_monitor_bounds(x, y, w, h);
            return;
        }
        self.set_monitor_bounds(0, 0, info.width as i32, info.height as i32);
    }

    fn bounds(&self) -> (i32, i32, i32, i32) {
        (
            self.mon_x.load(Ordering::Acquire),
            self.mon_y.load(Ordering::Acquire),
            self.mon_w.load(Ordering::Acquire),
            self.mon_h.load(Ordering::Acquire),
        )
    }

    /// Decode and apply one raw input-channel message.
    pub fn handle_message(&self, data: &[u8]) -> bool {
        match wire::parse(data) {
            Ok(event) => self.handle_event(event),
            Err(InputParseError::Truncated) => {
                warn!("Input message truncated ({} bytes)", data.len());
                false
            }
            Err(InputParseError::UnknownMagic(magic)) => {
                debug!("Unknown input message {:#010x}", magic);
                false
            }
        }
    }

    pub fn handle_event(&self, event: InputEvent) -> bool {
        match event {
            InputEvent::MouseMove { x, y } => self.mouse_move(x, y),
            InputEvent::MouseMoveRel { dx, dy } => self.mouse_move_rel(dx, dy),
            InputEvent::MouseButton { button, down } => self.mouse_button(button, down),
            InputEvent::MouseWheel { dx, dy } => self.mouse_wheel(dx, dy),
            InputEvent::Key {
                key_code,
                scan_code,
                down,
            } => self.key(key_code, scan_code, down),
        }
    }

    pub fn mouse_move(&self, nx: f32, ny: f32) -> bool {
        if !self.enabled.load(Ordering::Acquire) || !self.limiter.allow(Axis::Move) {
            return false;
        }
        let (ax, ay) = to_absolute(nx, ny, self.bounds(), self.virtual_screen());
        if self.inject_absolute(ax, ay) {
            self.total_moves.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn mouse_move_rel(&self, dx: i16, dy: i16) -> bool {
        if !self.enabled.load(Ordering::Acquire)
            || !self.limiter.allow(Axis::Move)
            || (dx == 0 && dy == 0)
        {
            return false;
        }
        if self.inject_relative(dx, dy) {
            self.total_moves.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn mouse_button(&self, button: u8, down: bool) -> bool {
        if !self.enabled.load(Ordering::Acquire) || button > 4 || !self.limiter.allow(Axis::Click)
        {
            return false;
        }
        if self.inject_button(button, down) {
            self.total_clicks.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    pub fn mouse_wheel(&self, dx: i16, dy: i16) -> bool {
        if !self.enabled.load(Ordering::Acquire) || !self.limiter.allow(Axis::Click) {
            return false;
        }
        self.inject_wheel(dx, dy)
    }

    pub fn key(&self, js_key: u16, scan: u16, down: bool) -> bool {
        if !self.enabled.load(Ordering::Acquire) || !self.limiter.allow(Axis::Key) {
            return false;
        }
        let Some(vk) = keymap::js_key_to_vk(js_key) else {
            debug!("Unknown JS keycode {}", js_key);
            return false;
        };
        if self.filter.lock().unwrap().check(vk, down) {
            if down {
                self.blocked_keys.fetch_add(1, Ordering::Relaxed);
                debug!("Blocked key VK={:#04x}", vk);
            }
            return false;
        }
        if self.inject_key(vk, scan, down, keymap::is_extended(vk)) {
            self.total_keys.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Centered absolute move, bypassing rate limits. Used after control
    /// handoffs so Windows redraws the cursor on the streamed monitor.
    pub fn wiggle_center(&self) {
        if !self.enabled.load(Ordering::Acquire) {
            return;
        }
        let (ax, ay) = to_absolute(0.5, 0.5, self.bounds(), self.virtual_screen());
        self.inject_absolute(ax, ay);
    }

    /// Poll the OS cursor shape; `Some` only when it changed since the
    /// last report.
    pub fn current_cursor(&self) -> Option<CursorShape> {
        let shape = self.os_cursor_shape()?;
        let prev = self.last_cursor.swap(shape.to_wire(), Ordering::AcqRel);
        (prev != shape.to_wire()).then_some(shape)
    }

    /// UTF-8 clipboard write, capped at 1 MiB.
    pub fn set_clipboard(&self, text: &str) -> bool {
        if text.is_empty() {
            return false;
        }
        if text.len() > airdesk_common::protocol::MAX_CLIPBOARD_BYTES {
            warn!("Clipboard text too large ({} bytes)", text.len());
            return false;
        }
        self.os_set_clipboard(text)
    }

    pub fn get_clipboard(&self) -> String {
        self.os_get_clipboard()
    }

    pub fn stats(&self) -> InputStats {
        InputStats {
            moves: self.total_moves.load(Ordering::Relaxed),
            clicks: self.total_clicks.load(Ordering::Relaxed),
            keys: self.total_keys.load(Ordering::Relaxed),
            dropped_moves: self.limiter.dropped_moves.load(Ordering::Relaxed),
            dropped_clicks: self.limiter.dropped_clicks.load(Ordering::Relaxed),
            dropped_keys: self.limiter.dropped_keys.load(Ordering::Relaxed),
            blocked_keys: self.blocked_keys.load(Ordering::Relaxed),
        }
    }

    #[cfg(windows)]
    fn virtual_screen(&self) -> (i32, i32, i32, i32) {
        windows::virtual_screen()
    }

    #[cfg(not(windows))]
    fn virtual_screen(&self) -> (i32, i32, i32, i32) {
        let (x, y, w, h) = self.bounds();
        (x, y, w, h)
    }

    #[cfg(windows)]
    fn inject_absolute(&self, ax: i32, ay: i32) -> bool {
        windows::send_mouse_absolute(ax, ay)
    }

    #[cfg(windows)]
    fn inject_relative(&self, dx: i16, dy: i16) -> bool {
        windows::send_mouse_relative(dx, dy)
    }

    #[cfg(windows)]
    fn inject_button(&self, button: u8, down: bool) -> bool {
        windows::send_mouse_button(button, down)
    }

    #[cfg(windows)]
    fn inject_wheel(&self, dx: i16, dy: i16) -> bool {
        windows::send_mouse_wheel(dx, dy)
    }

    #[cfg(windows)]
    fn inject_key(&self, vk: u16, scan: u16, down: bool, extended: bool) -> bool {
        windows::send_key(vk, scan, down, extended)
    }

    #[cfg(windows)]
    fn os_cursor_shape(&self) -> Option<CursorShape> {
        windows::cursor_shape()
    }

    #[cfg(windows)]
    fn os_set_clipboard(&self, text: &str) -> bool {
        windows::set_clipboard_text(text)
    }

    #[cfg(windows)]
    fn os_get_clipboard(&self) -> String {
        windows::get_clipboard_text()
    }

    // Non-Windows stubs: synthesis succeeds as a no-op so the rate-limit
    // and filter layers stay testable; clipboard and cursor report
    // nothing.
    #[cfg(not(windows))]
    fn inject_absolute(&self, _ax: i32, _ay: i32) -> bool {
        true
    }

    #[cfg(not(windows))]
    fn inject_relative(&self, _dx: i16, _dy: i16) -> bool {
        true
    }

    #[cfg(not(windows))]
    fn inject_button(&self, _button: u8, _down: bool) -> bool {
        true
    }

    #[cfg(not(windows))]
    fn inject_wheel(&self, _dx: i16, _dy: i16) -> bool {
        true
    }

    #[cfg(not(windows))]
    fn inject_key(&self, _vk: u16, _scan: u16, _down: bool, _extended: bool) -> bool {
        true
    }

    #[cfg(not(windows))]
    fn os_cursor_shape(&self) -> Option<CursorShape> {
        None
    }

    #[cfg(not(windows))]
    fn os_set_clipboard(&self, _text: &str) -> bool {
        false
    }

    #[cfg(not(windows))]
    fn os_get_clipboard(&self) -> String {
        String::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_absolute_corners() {
        let mon = (0, 0, 1920, 1080);
        let vs = (0, 0, 1920, 1080);
        assert_eq!(to_absolute(0.0, 0.0, mon, vs), (0, 0));
        let (ax, ay) = to_absolute(1.0, 1.0, mon, vs);
        assert_eq!((ax, ay), (65_535, 65_535));
    }

    #[test]
    fn test_to_absolute_clamps_inputs() {
        let mon = (0, 0, 1920, 1080);
        let vs = (0, 0, 1920, 1080);
        assert_eq!(to_absolute(-0.5, 2.0, mon, vs), (0, 65_535));
    }

    #[test]
    fn test_to_absolute_secondary_monitor() {
        // Monitor to the right of a 1920-wide primary on a 3840-wide
        // virtual screen: its left edge is the midpoint.
        let mon = (1920, 0, 1920, 1080);
        let vs = (0, 0, 3840, 1080);
        let (ax, _) = to_absolute(0.0, 0.0, mon, vs);
        assert_eq!(ax, 65_535 / 2);
        let (ax, _) = to_absolute(1.0, 0.0, mon, vs);
        assert_eq!(ax, 65_535);
    }

    #[test]
    fn test_disabled_injector_drops_everything() {
        let inj = InputInjector::new();
        assert!(!inj.mouse_move(0.5, 0.5));
        assert!(!inj.key(65, 0, true));
        assert_eq!(inj.stats().moves, 0);
    }

    // Exercises the synthesis path; on Windows this would inject real
    // events, so it runs against the no-op backend only.
    #[cfg(not(windows))]
    #[test]
    fn test_rate_limit_move_burst() {
        let inj = InputInjector::new();
        inj.enable();
        let mut sent = 0u64;
        for _ in 0..600 {
            if inj.mouse_move(0.5, 0.5) {
                sent += 1;
            }
        }
        let stats = inj.stats();
        // Cap applies within the 1-second window.
        assert_eq!(stats.moves, 500);
        assert_eq!(stats.dropped_moves, 100);
        assert_eq!(sent, 500);
    }

    #[test]
    fn test_blocked_keys_counted() {
        let inj = InputInjector::new();
        inj.enable();
        // JS keycode 91 = left Win key.
        assert!(!inj.key(91, 0, true));
        assert_eq!(inj.stats().blocked_keys, 1);
        assert_eq!(inj.stats().keys, 0);
    }

    #[test]
    fn test_zero_relative_move_ignored() {
        let inj = InputInjector::new();
        inj.enable();
        assert!(!inj.mouse_move_rel(0, 0));
    }

    #[test]
    fn test_button_range_checked() {
        let inj = InputInjector::new();
        inj.enable();
        assert!(!inj.mouse_button(5, true));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_handle_message_dispatch() {
        use airdesk_common::protocol::MSG_MOUSE_BTN;
        let inj = InputInjector::new();
        inj.enable();
        let mut msg = MSG_MOUSE_BTN.to_le_bytes().to_vec();
        msg.extend_from_slice(&[0, 1]); // left button down
        assert!(inj.handle_message(&msg));
        assert_eq!(inj.stats().clicks, 1);
        // Truncated
        assert!(!inj.handle_message(&msg[..5]));
    }

    #[test]
    fn test_oversized_clipboard_rejected() {
        let inj = InputInjector::new();
        let big = "x".repeat(airdesk_common::protocol::MAX_CLIPBOARD_BYTES + 1);
        assert!(!inj.set_clipboard(&big));
        assert!(!inj.set_clipboard(""));
    }
}
