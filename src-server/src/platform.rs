//! Process and thread scheduling helpers.

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadPriority {
    TimeCritical,
    BelowNormal,
}

/// Raise or lower the calling thread's scheduling priority. Hot pipeline
/// threads (scheduler, audio) run time-critical; the cursor poller runs
/// below normal. No-op on platforms without a real backend.
#[cfg(windows)]
pub fn set_current_thread_priority(priority: ThreadPriority) {
    use windows::Win32::System::Threading::{
        GetCurrentThread, SetThreadPriority, THREAD_PRIORITY_BELOW_NORMAL,
        THREAD_PRIORITY_TIME_CRITICAL,
    };

    let value = match priority {
        ThreadPriority::TimeCritical => THREAD_PRIORITY_TIME_CRITICAL,
        ThreadPriority::BelowNormal => THREAD_PRIORITY_BELOW_NORMAL,
    };
    unsafe {
        if SetThreadPriority(GetCurrentThread(), value).is_err() {
            debug!("SetThreadPriority({:?}) failed", priority);
        }
    }
}

#[cfg(not(windows))]
pub fn set_current_thread_priority(_priority: ThreadPriority) {}

/// Bump the whole process above normal so encode deadlines survive a busy
/// desktop.
#[cfg(windows)]
pub fn raise_process_priority() {
    use windows::Win32::System::Threading::{
        GetCurrentProcess, SetPriorityClass, ABOVE_NORMAL_PRIORITY_CLASS,
    };
    unsafe {
        if SetPriorityClass(GetCurrentProcess(), ABOVE_NORMAL_PRIORITY_CLASS).is_err() {
            warn!("SetPriorityClass failed");
        } else {
            debug!("Process priority set to ABOVE_NORMAL");
        }
    }
}

#[cfg(not(windows))]
pub fn raise_process_priority() {}

/// Set Per-Monitor DPI Awareness v2 for consistent coordinate handling.
///
/// Must run before any other Windows API call so monitor enumeration and
/// input mapping see physical pixel coordinates.
#[cfg(windows)]
pub fn set_dpi_awareness() {
    use windows::Win32::UI::HiDpi::{
        SetProcessDpiAwarenessContext, DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2,
    };

    unsafe {
        let result = SetProcessDpiAwarenessContext(DPI_AWARENESS_CONTEXT_PER_MONITOR_AWARE_V2);
        if result.is_err() {
            // Can fail if already set by a manifest; not fatal.
            warn!("SetProcessDpiAwarenessContext failed (may already be set)");
        }
    }
}

#[cfg(not(windows))]
pub fn set_dpi_awareness() {}
