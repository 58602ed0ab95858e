//! Monitor enumeration.
//!
//! The attached-monitor set is owned by the server and shared by
//! reference with the capture and the transport's list replies. It is
//! rebuilt by [`MonitorSet::refresh`] and guarded by its own mutex;
//! consumers copy out what they need and release. The primary monitor
//! sorts first and indices are renumbered densely after the sort, so an
//! index is stable between two enumerations of the same hardware.

use airdesk_common::MonitorInfo;
use std::sync::Mutex;
use tracing::info;

#[cfg(windows)]
pub(crate) use windows_impl::refresh_rate_for_handle;

/// The process-wide set of attached monitors.
#[derive(Default)]
pub struct MonitorSet {
    monitors: Mutex<Vec<MonitorInfo>>,
}

impl MonitorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-enumerate attached monitors and replace the set.
    pub fn refresh(&self) {
        let mut monitors = enumerate();
        sort_and_renumber(&mut monitors);
        info!("Monitor list refreshed: {} monitor(s)", monitors.len());
        *self.monitors.lock().unwrap() = monitors;
    }

    /// Run `f` with the list held under its lock.
    pub fn with<R>(&self, f: impl FnOnce(&[MonitorInfo]) -> R) -> R {
        let guard = self.monitors.lock().unwrap();
        f(&guard)
    }

    /// Copy of the monitor at `index`, if any.
    pub fn at(&self, index: u8) -> Option<MonitorInfo> {
        self.with(|list| list.get(index as usize).cloned())
    }

    pub fn len(&self) -> usize {
        self.with(|list| list.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Owned copy of the whole list (for wire serialization).
    pub fn snapshot(&self) -> Vec<MonitorInfo> {
        self.with(<[MonitorInfo]>::to_vec)
    }
}

/// Primary first, then declared order; indices renumbered densely.
fn sort_and_renumber(monitors: &mut [MonitorInfo]) {
    monitors.sort_by(|a, b| b.is_primary.cmp(&a.is_primary));
    for (i, m) in monitors.iter_mut().enumerate() {
        m.index = i as u8;
    }
}

#[cfg(windows)]
fn enumerate() -> Vec<MonitorInfo> {
    windows_impl::list_monitors()
}

#[cfg(not(windows))]
fn enumerate() -> Vec<MonitorInfo> {
    Vec::new()
}

#[cfg(windows)]
mod windows_impl {
    use airdesk_common::MonitorInfo;
    use std::ffi::OsString;
    use std::os::windows::ffi::OsStringExt;
    use windows::core::PCWSTR;
    use windows::Win32::Foundation::{BOOL, LPARAM, RECT, TRUE};
    use windows::Win32::Graphics::Gdi::{
        EnumDisplayDevicesW, EnumDisplayMonitors, EnumDisplaySettingsW, GetMonitorInfoW, DEVMODEW,
        DISPLAY_DEVICEW, ENUM_CURRENT_SETTINGS, HDC, HMONITOR, MONITORINFOEXW,
    };

    const DISPLAY_DEVICE_ACTIVE: u32 = 0x0000_0001;

    /// List all connected monitors with dimensions, refresh rate and a
    /// friendly name.
    pub fn list_monitors() -> Vec<MonitorInfo> {
        let mut monitors: Vec<MonitorInfo> = Vec::new();
        unsafe {
            let _ = EnumDisplayMonitors(
                HDC::default(),
                None,
                Some(enum_monitor_callback),
                LPARAM(&mut monitors as *mut Vec<MonitorInfo> as isize),
            );
        }
        monitors
    }

    unsafe extern "system" fn enum_monitor_callback(
        hmonitor: HMONITOR,
        _hdc: HDC,
        _rect: *mut RECT,
        lparam: LPARAM,
    ) -> BOOL {
        let monitors = &mut *(lparam.0 as *mut Vec<MonitorInfo>);

        let mut monitor_info = MONITORINFOEXW::default();
        monitor_info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;

        if GetMonitorInfoW(hmonitor, &mut monitor_info as *mut _ as *mut _).as_bool() {
            let rect = monitor_info.monitorInfo.rcMonitor;
            let is_primary = (monitor_info.monitorInfo.dwFlags & 1) != 0; // MONITORINFOF_PRIMARY

            let device_name_raw = &monitor_info.szDevice;
            let device_name_len = device_name_raw
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(device_name_raw.len());
            let device_name = OsString::from_wide(&device_name_raw[..device_name_len])
                .to_string_lossy()
                .to_string();

            let refresh_hz = current_refresh_rate(&monitor_info.szDevice).unwrap_or(60);

            let display_name = get_display_friendly_name(&device_name)
                .unwrap_or_else(|| format_monitor_name(&device_name, is_primary));

            monitors.push(MonitorInfo {
                handle: hmonitor.0 as isize,
                index: 0, // renumbered after sort
                width: (rect.right - rect.left) as u32,
                height: (rect.bottom - rect.top) as u32,
                refresh_hz,
                is_primary,
                name: display_name,
            });
        }

        TRUE
    }

    /// Current mode refresh rate for a GDI device name.
    fn current_refresh_rate(device: &[u16; 32]) -> Option<u32> {
        let mut mode = DEVMODEW {
            dmSize: std::mem::size_of::<DEVMODEW>() as u16,
            ..Default::default()
        };
        let ok = unsafe {
            EnumDisplaySettingsW(PCWSTR(device.as_ptr()), ENUM_CURRENT_SETTINGS, &mut mode)
        }
        .as_bool();
        ok.then_some(mode.dmDisplayFrequency)
    }

    /// Refresh rate for an HMONITOR, re-read from the current mode.
    pub fn refresh_rate_for_handle(handle: isize) -> Option<u32> {
        let mut monitor_info = MONITORINFOEXW::default();
        monitor_info.monitorInfo.cbSize = std::mem::size_of::<MONITORINFOEXW>() as u32;
        let ok = unsafe {
            GetMonitorInfoW(
                HMONITOR(handle as *mut _),
                &mut monitor_info as *mut _ as *mut _,
            )
        }
        .as_bool();
        if !ok {
            return None;
        }
        current_refresh_rate(&monitor_info.szDevice)
    }

    /// Adapter string for a GDI device name, when the display
    /// configuration APIs cooperate.
    fn get_display_friendly_name(device_name: &str) -> Option<String> {
        unsafe {
            let mut device = DISPLAY_DEVICEW {
                cb: std::mem::size_of::<DISPLAY_DEVICEW>() as u32,
                ..Default::default()
            };

            let mut index = 0u32;
            while EnumDisplayDevicesW(None, index, &mut device, 0).as_bool() {
                let current_name_len = device
                    .DeviceName
                    .iter()
                    .position(|&c| c == 0)
                    .unwrap_or(device.DeviceName.len());
                let current_name = OsString::from_wide(&device.DeviceName[..current_name_len])
                    .to_string_lossy()
                    .to_string();

                if current_name == device_name && (device.StateFlags & DISPLAY_DEVICE_ACTIVE) != 0
                {
                    let adapter_name_len = device
                        .DeviceString
                        .iter()
                        .position(|&c| c == 0)
                        .unwrap_or(device.DeviceString.len());
                    if adapter_name_len > 0 {
                        return Some(
                            OsString::from_wide(&device.DeviceString[..adapter_name_len])
                                .to_string_lossy()
                                .to_string(),
                        );
                    }
                }
                index += 1;
            }
        }
        None
    }

    /// GDI device-name fallback: `\\.\DISPLAY1` becomes "Display 1".
    fn format_monitor_name(device_name: &str, is_primary: bool) -> String {
        let suffix = if is_primary { " (Primary)" } else { "" };
        if let Ok(num) = device_name
            .chars()
            .filter(|c| c.is_ascii_digit())
            .collect::<String>()
            .parse::<u32>()
        {
            format!("Display {}{}", num, suffix)
        } else {
            format!("{}{}", device_name, suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(is_primary: bool, name: &str) -> MonitorInfo {
        MonitorInfo {
            handle: 0,
            index: 99,
            width: 1920,
            height: 1080,
            refresh_hz: 60,
            is_primary,
            name: name.to_string(),
        }
    }

    #[test]
    fn test_primary_sorts_first() {
        let mut list = vec![
            monitor(false, "Second"),
            monitor(true, "Main"),
            monitor(false, "Third"),
        ];
        sort_and_renumber(&mut list);
        assert!(list[0].is_primary);
        assert_eq!(list[0].name, "Main");
        // Declared order preserved among non-primaries.
        assert_eq!(list[1].name, "Second");
        assert_eq!(list[2].name, "Third");
    }

    #[test]
    fn test_indices_renumbered_densely() {
        let mut list = vec![monitor(false, "A"), monitor(true, "B")];
        sort_and_renumber(&mut list);
        assert_eq!(list[0].index, 0);
        assert_eq!(list[1].index, 1);
    }

    #[test]
    fn test_set_accessors() {
        let set = MonitorSet::new();
        assert!(set.is_empty());
        assert!(set.at(0).is_none());
        {
            let mut list = vec![monitor(false, "A"), monitor(true, "B")];
            sort_and_renumber(&mut list);
            *set.monitors.lock().unwrap() = list;
        }
        assert_eq!(set.len(), 2);
        assert_eq!(set.at(0).unwrap().name, "B");
        assert_eq!(set.snapshot().len(), 2);
    }

    #[cfg(windows)]
    #[test]
    fn test_refresh_returns_at_least_one() {
        let set = MonitorSet::new();
        set.refresh();
        assert!(set.len() >= 1, "Should have at least one monitor");
        set.with(|list| {
            for m in list {
                assert!(m.width > 0, "Monitor width should be positive");
                assert!(m.height > 0, "Monitor height should be positive");
            }
            if list.iter().any(|m| m.is_primary) {
                assert!(list[0].is_primary, "Primary monitor should be first");
            }
        });
    }
}
