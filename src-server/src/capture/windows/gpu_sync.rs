//! Device-fence synchronization with a flush fallback.
//!
//! Init probes for `ID3D11Device5`/`ID3D11DeviceContext4`; when fences are
//! unavailable (older runtimes) every signal reports value 0 and waits
//! degrade to a context flush, which still orders the copy ahead of any
//! later read on the immediate context.

use super::DeviceHandles;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, info, warn};
use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0};
use windows::Win32::Graphics::Direct3D11::{
    ID3D11Device5, ID3D11DeviceContext4, ID3D11Fence, D3D11_FENCE_FLAG_SHARED,
};
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};

struct OwnedEvent(HANDLE);

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.0);
        }
    }
}

pub struct GpuSync {
    fence: Option<ID3D11Fence>,
    context4: Option<ID3D11DeviceContext4>,
    value: AtomicU64,
    // One auto-reset event shared by all waiters; the mutex serializes
    // SetEventOnCompletion/wait pairs.
    event: Mutex<Option<OwnedEvent>>,
}

// The fence and context are only touched through multithread-protected
// D3D11 calls.
unsafe impl Send for GpuSync {}
unsafe impl Sync for GpuSync {}

impl GpuSync {
    /// Probe the device for fence support. Absence is not an error; the
    /// flush path takes over.
    pub fn new(device: &DeviceHandles) -> Self {
        let fenced = (|| -> windows::core::Result<(ID3D11Fence, ID3D11DeviceContext4)> {
            let device5: ID3D11Device5 = device.device.cast()?;
            let context4: ID3D11DeviceContext4 = device.context.cast()?;
            let fence: ID3D11Fence =
                unsafe { device5.CreateFence(0, D3D11_FENCE_FLAG_SHARED) }?;
            Ok((fence, context4))
        })();

        match fenced {
            Ok((fence, context4)) => {
                let event = unsafe { CreateEventW(None, false, false, None) };
                match event {
                    Ok(handle) => {
                        info!("GpuSync: using D3D11 fence-based synchronization");
                        Self {
                            fence: Some(fence),
                            context4: Some(context4),
                            value: AtomicU64::new(0),
                            event: Mutex::new(Some(OwnedEvent(handle))),
                        }
                    }
                    Err(e) => {
                        warn!("GpuSync: CreateEventW failed ({:?}), using flush sync", e);
                        Self::flush_only()
                    }
                }
            }
            Err(e) => {
                debug!("GpuSync: fences unavailable ({:?}), using flush sync", e);
                Self::flush_only()
            }
        }
    }

    fn flush_only() -> Self {
        Self {
            fence: None,
            context4: None,
            value: AtomicU64::new(0),
            event: Mutex::new(None),
        }
    }

    /// Signal the fence after the commands queued so far. Returns the
    /// fence value (0 on the flush path) and whether the consumer must
    /// synchronize before reading.
    pub fn signal(&self) -> (u64, bool) {
        if let (Some(fence), Some(context4)) = (&self.fence, &self.context4) {
            let value = self.value.fetch_add(1, Ordering::AcqRel) + 1;
            if let Err(e) = unsafe { context4.Signal(fence, value) } {
                warn!("GpuSync: Signal failed: {:?}", e);
                return (0, true);
            }
            return (value, true);
        }
        (0, true)
    }

    /// Non-blocking completion check.
    pub fn complete(&self, value: u64) -> bool {
        match &self.fence {
            Some(fence) => unsafe { fence.GetCompletedValue() } >= value,
            None => true,
        }
    }

    /// Wait up to `timeout_ms` for the fence to reach `value`. On the
    /// flush path this flushes the immediate context instead.
    pub fn wait(&self, value: u64, device: &DeviceHandles, timeout_ms: u32) -> bool {
        if let Some(fence) = &self.fence {
            if unsafe { fence.GetCompletedValue() } >= value {
                return true;
            }
            let guard = self.event.lock().unwrap();
            let Some(event) = guard.as_ref() else {
                return false;
            };
            if let Err(e) = unsafe { fence.SetEventOnCompletion(value, event.0) } {
                warn!("GpuSync: SetEventOnCompletion failed: {:?}", e);
                return false;
            }
            let result = unsafe { WaitForSingleObject(event.0, timeout_ms) };
            // Re-read completion after a timeout.
            return result == WAIT_OBJECT_0 || unsafe { fence.GetCompletedValue() } >= value;
        }

        let _guard = device.multithread_guard();
        unsafe { device.context.Flush() };
        true
    }
}
