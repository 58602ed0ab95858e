//! Windows.Graphics.Capture backend.
//!
//! Owns the D3D11 device shared with the encoder, a per-monitor capture
//! session and a pool of six BGRA textures. The OS invokes the frame
//! callback on a WinRT threadpool thread; each event copies the incoming
//! surface into a free pool slot, signals the device fence and pushes the
//! frame into the ring. A monitor switch bumps the capture generation,
//! drains in-flight callbacks (bounded) and re-initializes the session.

pub(crate) mod gpu_sync;

use super::monitor::MonitorSet;
use super::{monitor, ResolutionChangeCallback, CALLBACK_DRAIN_MS, TEXTURE_POOL};
use crate::error::InitError;
use crate::pipeline::{Frame, FrameSlot};
use airdesk_common::time::now_us;
use gpu_sync::GpuSync;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicIsize, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use windows::core::{IInspectable, Interface};
use windows::Foundation::TypedEventHandler;
use windows::Graphics::Capture::{
    Direct3D11CaptureFramePool, GraphicsCaptureItem, GraphicsCaptureSession,
};
use windows::Graphics::DirectX::Direct3D11::IDirect3DDevice;
use windows::Graphics::DirectX::DirectXPixelFormat;
use windows::Graphics::SizeInt32;
use windows::Win32::Graphics::Direct3D::{
    D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL, D3D_FEATURE_LEVEL_11_0, D3D_FEATURE_LEVEL_11_1,
    D3D_FEATURE_LEVEL_12_0, D3D_FEATURE_LEVEL_12_1,
};
use windows::Win32::Graphics::Direct3D11::{
    D3D11CreateDevice, ID3D11Device, ID3D11DeviceContext, ID3D11Multithread, ID3D11Texture2D,
    D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_CREATE_DEVICE_BGRA_SUPPORT,
    D3D11_CREATE_DEVICE_VIDEO_SUPPORT, D3D11_RESOURCE_MISC_SHARED, D3D11_SDK_VERSION,
    D3D11_TEXTURE2D_DESC, D3D11_USAGE_DEFAULT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::IDXGIDevice;
use windows::Win32::System::Com::{CoInitializeEx, COINIT_MULTITHREADED};
use windows::Win32::System::WinRT::Direct3D11::{
    CreateDirect3D11DeviceFromDXGIDevice, IDirect3DDxgiInterfaceAccess,
};
use windows::Win32::System::WinRT::Graphics::Capture::IGraphicsCaptureItemInterop;

/// A pooled D3D11 texture handle travelling through the frame ring.
///
/// The device runs with multithread protection enabled, so sharing the
/// COM pointer across the capture callback, scheduler and encoder threads
/// is sound.
#[derive(Clone)]
pub struct CaptureTexture(pub(crate) ID3D11Texture2D);

unsafe impl Send for CaptureTexture {}
unsafe impl Sync for CaptureTexture {}

/// Opaque device capability handles the encoder shares with the capture
/// to avoid cross-device copies.
#[derive(Clone)]
pub struct DeviceHandles {
    pub(crate) device: ID3D11Device,
    pub(crate) context: ID3D11DeviceContext,
    pub(crate) multithread: Option<ID3D11Multithread>,
}

unsafe impl Send for DeviceHandles {}
unsafe impl Sync for DeviceHandles {}

/// RAII scope for the device multithread lock.
pub(crate) struct MultithreadGuard<'a>(Option<&'a ID3D11Multithread>);

impl Drop for MultithreadGuard<'_> {
    fn drop(&mut self) {
        if let Some(mt) = self.0 {
            unsafe { mt.Leave() };
        }
    }
}

impl DeviceHandles {
    pub(crate) fn multithread_guard(&self) -> MultithreadGuard<'_> {
        if let Some(mt) = &self.multithread {
            unsafe { mt.Enter() };
            MultithreadGuard(Some(mt))
        } else {
            MultithreadGuard(None)
        }
    }
}

struct SessionState {
    item: GraphicsCaptureItem,
    frame_pool: Direct3D11CaptureFramePool,
    session: GraphicsCaptureSession,
    frame_event_token: i64,
    width: u32,
    height: u32,
    tex_pool: Vec<CaptureTexture>,
    tex_fences: [u64; TEXTURE_POOL],
    tex_idx: usize,
}

struct CaptureInner {
    slot: Arc<FrameSlot<CaptureTexture>>,
    monitors: Arc<MonitorSet>,
    device: DeviceHandles,
    winrt_device: IDirect3DDevice,
    sync: GpuSync,
    session: Mutex<Option<SessionState>>,
    on_resolution_change: Mutex<Option<Arc<ResolutionChangeCallback>>>,
    running: AtomicBool,
    capturing: AtomicBool,
    started: AtomicBool,
    generation: AtomicU64,
    callbacks_active: AtomicI32,
    target_fps: Arc<AtomicU32>,
    host_fps: AtomicU32,
    monitor_index: AtomicU32,
    monitor_handle: AtomicIsize,
    cursor_capture: AtomicBool,
}

// All COM access goes through the multithread-protected device or WinRT
// agile objects.
unsafe impl Send for CaptureInner {}
unsafe impl Sync for CaptureInner {}

pub struct ScreenCapture {
    inner: Arc<CaptureInner>,
}

impl ScreenCapture {
    /// Create the D3D11 device, probe fence support and open a capture
    /// session on the requested monitor (primary when out of range).
    pub fn new(
        slot: Arc<FrameSlot<CaptureTexture>>,
        monitors: Arc<MonitorSet>,
        target_fps: Arc<AtomicU32>,
        monitor_index: u8,
        cursor_capture: bool,
    ) -> Result<Self, InitError> {
        // MTA COM; WinRT capture objects are agile.
        unsafe {
            let _ = CoInitializeEx(None, COINIT_MULTITHREADED);
        }

        let device = create_device()?;
        let winrt_device = create_winrt_device(&device)?;
        let sync = GpuSync::new(&device);

        monitors.refresh();
        let target = monitors
            .at(monitor_index)
            .or_else(|| monitors.at(0))
            .ok_or_else(|| InitError::Capture("no monitors found".into()))?;

        let inner = Arc::new(CaptureInner {
            slot,
            monitors,
            device,
            winrt_device,
            sync,
            session: Mutex::new(None),
            on_resolution_change: Mutex::new(None),
            running: AtomicBool::new(true),
            capturing: AtomicBool::new(false),
            started: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            callbacks_active: AtomicI32::new(0),
            target_fps,
            host_fps: AtomicU32::new(60),
            monitor_index: AtomicU32::new(target.index as u32),
            monitor_handle: AtomicIsize::new(target.handle),
            cursor_capture: AtomicBool::new(cursor_capture),
        });

        inner.init_monitor(&inner, target.handle, false)?;
        info!(
            "Capture: {}x{} @ {}Hz",
            inner.width(),
            inner.height(),
            inner.host_fps.load(Ordering::Acquire)
        );
        Ok(Self { inner })
    }

    pub fn set_resolution_change_callback(&self, cb: ResolutionChangeCallback) {
        *self.inner.on_resolution_change.lock().unwrap() = Some(Arc::new(cb));
    }

    /// Start (or resume) capturing. Idempotent.
    pub fn start(&self) {
        let inner = &self.inner;
        if inner.capturing.load(Ordering::Acquire) {
            return;
        }
        let mut guard = inner.session.lock().unwrap();
        inner.slot.reset();
        let Some(state) = guard.as_mut() else {
            return;
        };
        state.tex_fences = [0; TEXTURE_POOL];
        state.tex_idx = 0;

        if !inner.started.swap(true, Ordering::AcqRel) {
            if let Err(e) = state.session.StartCapture() {
                error!("StartCapture failed: {:?}", e);
                inner.started.store(false, Ordering::Release);
                return;
            }
        }
        inner.capturing.store(true, Ordering::Release);
        info!("Capture started");
    }

    /// Stop delivering frames; callbacks observe the flag and drop events.
    pub fn pause(&self) {
        self.inner.capturing.store(false, Ordering::Release);
        debug!("Capture paused");
    }

    /// Tear down the current session and re-open on another monitor.
    pub fn switch_monitor(&self, index: u8) -> bool {
        let inner = &self.inner;
        let Some(target) = inner.monitors.at(index) else {
            warn!(
                "Invalid monitor index {} (have {})",
                index,
                inner.monitors.len()
            );
            return false;
        };
        if inner.monitor_index.load(Ordering::Acquire) == index as u32
            && inner.monitor_handle.load(Ordering::Acquire) == target.handle
        {
            return true;
        }
        info!("Switching to monitor {} ({})", index, target.name);

        let was_capturing = inner.capturing.swap(false, Ordering::AcqRel);
        let new_gen = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;
        inner.slot.set_generation(new_gen);
        inner.slot.wake();

        inner.close_session();
        inner.wait_callbacks(Duration::from_millis(CALLBACK_DRAIN_MS));
        std::thread::sleep(Duration::from_millis(5));
        inner.slot.wake();
        inner.slot.reset();

        match inner.init_monitor(inner, target.handle, true) {
            Ok(()) => {
                inner.monitor_index.store(index as u32, Ordering::Release);
                inner.monitor_handle.store(target.handle, Ordering::Release);
                let (w, h) = (inner.width(), inner.height());
                inner.fire_resolution_change(w, h);
                if was_capturing {
                    self.start();
                }
                info!("Monitor switch complete");
                true
            }
            Err(e) => {
                error!("Monitor switch failed: {}", e);
                false
            }
        }
    }

    /// Store the pacing target. The OS session is not re-tuned; the
    /// scheduler consumes this.
    pub fn set_fps(&self, fps: u32) -> bool {
        if !(1..=240).contains(&fps) {
            warn!("Invalid FPS {} (must be 1-240)", fps);
            return false;
        }
        let old = self.inner.target_fps.swap(fps, Ordering::AcqRel);
        if old != fps {
            debug!("FPS changed from {} to {}", old, fps);
        }
        true
    }

    /// Re-read the OS refresh rate for the current monitor.
    pub fn refresh_host_fps(&self) -> u32 {
        let handle = self.inner.monitor_handle.load(Ordering::Acquire);
        if let Some(hz) = monitor_refresh_rate(handle) {
            let old = self.inner.host_fps.swap(hz, Ordering::AcqRel);
            if old != hz {
                info!("Host refresh rate changed from {} to {} Hz", old, hz);
            }
        }
        self.inner.host_fps.load(Ordering::Acquire)
    }

    pub fn host_fps(&self) -> u32 {
        self.inner.host_fps.load(Ordering::Acquire)
    }

    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    pub fn monitor_index(&self) -> u8 {
        self.inner.monitor_index.load(Ordering::Acquire) as u8
    }

    pub fn is_capturing(&self) -> bool {
        self.inner.capturing.load(Ordering::Acquire)
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Wait for a frame's copy fence before the encoder reads the texture.
    pub fn wait_ready(&self, fence: u64) -> bool {
        self.inner.sync.wait(fence, &self.inner.device, 16)
    }

    pub fn set_cursor_capture(&self, enabled: bool) {
        let inner = &self.inner;
        inner.cursor_capture.store(enabled, Ordering::Release);
        let guard = inner.session.lock().unwrap();
        if let Some(state) = guard.as_ref() {
            if let Err(e) = state.session.SetIsCursorCaptureEnabled(enabled) {
                warn!("SetIsCursorCaptureEnabled failed: {:?}", e);
            } else {
                debug!("Cursor capture {}", if enabled { "enabled" } else { "disabled" });
            }
        }
    }

    pub fn device_handles(&self) -> DeviceHandles {
        self.inner.device.clone()
    }
}

impl Drop for ScreenCapture {
    fn drop(&mut self) {
        let inner = &self.inner;
        inner.running.store(false, Ordering::Release);
        inner.capturing.store(false, Ordering::Release);
        inner.generation.fetch_add(1, Ordering::AcqRel);
        inner.close_session();
        inner.wait_callbacks(Duration::from_millis(CALLBACK_DRAIN_MS));
        debug!("Capture destroyed");
    }
}

impl CaptureInner {
    fn width(&self) -> u32 {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.width)
            .unwrap_or(0)
    }

    fn height(&self) -> u32 {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.height)
            .unwrap_or(0)
    }

    fn fire_resolution_change(&self, width: u32, height: u32) {
        let cb = self.on_resolution_change.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(width, height, self.target_fps.load(Ordering::Acquire));
        }
    }

    /// Build a fresh capture session for `monitor_handle` and install it.
    fn init_monitor(
        &self,
        self_arc: &Arc<CaptureInner>,
        monitor_handle: isize,
        keep_fps: bool,
    ) -> Result<(), InitError> {
        let host_fps = monitor_refresh_rate(monitor_handle).unwrap_or_else(|| {
            warn!("Failed to read monitor refresh rate, assuming 60Hz");
            60
        });
        self.host_fps.store(host_fps, Ordering::Release);
        if !keep_fps {
            self.target_fps.store(host_fps, Ordering::Release);
        }

        let interop = windows::core::factory::<GraphicsCaptureItem, IGraphicsCaptureItemInterop>()
            .map_err(|e| InitError::Capture(format!("capture interop factory: {:?}", e)))?;
        let item: GraphicsCaptureItem = unsafe {
            interop.CreateForMonitor(windows::Win32::Graphics::Gdi::HMONITOR(
                monitor_handle as *mut _,
            ))
        }
        .map_err(|e| InitError::Capture(format!("CreateForMonitor: {:?}", e)))?;

        let size = item
            .Size()
            .map_err(|e| InitError::Capture(format!("item size: {:?}", e)))?;
        let (width, height) = (size.Width as u32, size.Height as u32);
        info!("Monitor size: {}x{} @ {}Hz", width, height, host_fps);

        let tex_pool = self.create_texture_pool(width, height)?;

        let frame_pool = Direct3D11CaptureFramePool::CreateFreeThreaded(
            &self.winrt_device,
            DirectXPixelFormat::B8G8R8A8UIntNormalized,
            4,
            size,
        )
        .map_err(|e| InitError::Capture(format!("frame pool: {:?}", e)))?;

        let weak = Arc::downgrade(self_arc);
        let frame_event_token = frame_pool
            .FrameArrived(&TypedEventHandler::<
                Direct3D11CaptureFramePool,
                IInspectable,
            >::new(move |pool, _| {
                if let (Some(inner), Some(pool)) = (Weak::upgrade(&weak), pool.as_ref()) {
                    inner.on_frame(pool);
                }
                Ok(())
            }))
            .map_err(|e| InitError::Capture(format!("FrameArrived: {:?}", e)))?;

        let session = frame_pool
            .CreateCaptureSession(&item)
            .map_err(|e| InitError::Capture(format!("capture session: {:?}", e)))?;
        let _ = session.SetIsCursorCaptureEnabled(self.cursor_capture.load(Ordering::Acquire));
        if session.SetIsBorderRequired(false).is_err() {
            debug!("SetIsBorderRequired not supported");
        }

        self.started.store(false, Ordering::Release);
        self.monitor_handle.store(monitor_handle, Ordering::Release);
        let new_gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.slot.set_generation(new_gen);

        *self.session.lock().unwrap() = Some(SessionState {
            item,
            frame_pool,
            session,
            frame_event_token,
            width,
            height,
            tex_pool,
            tex_fences: [0; TEXTURE_POOL],
            tex_idx: 0,
        });
        Ok(())
    }

    fn create_texture_pool(&self, width: u32, height: u32) -> Result<Vec<CaptureTexture>, InitError> {
        let desc = D3D11_TEXTURE2D_DESC {
            Width: width,
            Height: height,
            MipLevels: 1,
            ArraySize: 1,
            Format: DXGI_FORMAT_B8G8R8A8_UNORM,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: (D3D11_BIND_SHADER_RESOURCE.0 | D3D11_BIND_RENDER_TARGET.0) as u32,
            CPUAccessFlags: 0,
            MiscFlags: D3D11_RESOURCE_MISC_SHARED.0 as u32,
        };
        let mut pool = Vec::with_capacity(TEXTURE_POOL);
        for i in 0..TEXTURE_POOL {
            let mut texture: Option<ID3D11Texture2D> = None;
            unsafe {
                self.device
                    .device
                    .CreateTexture2D(&desc, None, Some(&mut texture))
            }
            .map_err(|e| InitError::Capture(format!("texture pool slot {}: {:?}", i, e)))?;
            pool.push(CaptureTexture(texture.ok_or_else(|| {
                InitError::Capture(format!("texture pool slot {} was null", i))
            })?));
        }
        Ok(pool)
    }

    fn close_session(&self) {
        let state = self.session.lock().unwrap().take();
        if let Some(state) = state {
            let _ = state.frame_pool.RemoveFrameArrived(state.frame_event_token);
            if let Err(e) = state.session.Close() {
                debug!("session.Close failed: {:?}", e);
            }
            if let Err(e) = state.frame_pool.Close() {
                debug!("frame_pool.Close failed: {:?}", e);
            }
            drop(state.item);
        }
    }

    fn wait_callbacks(&self, timeout: Duration) {
        let start = Instant::now();
        while self.callbacks_active.load(Ordering::Acquire) > 0 {
            if start.elapsed() > timeout {
                warn!("Timeout waiting for capture callbacks to complete");
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Prefer a slot that is both free and GPU-complete; otherwise take
    /// any free slot after a short bounded fence wait.
    fn find_tex(&self, state: &mut SessionState) -> Option<usize> {
        for i in 0..TEXTURE_POOL {
            let idx = (state.tex_idx + i) % TEXTURE_POOL;
            if !self.slot.is_in_flight(idx as u8) && self.sync.complete(state.tex_fences[idx]) {
                state.tex_idx = idx + 1;
                return Some(idx);
            }
        }
        for i in 0..TEXTURE_POOL {
            let idx = (state.tex_idx + i) % TEXTURE_POOL;
            if !self.slot.is_in_flight(idx as u8) {
                if state.tex_fences[idx] > 0 && !self.sync.complete(state.tex_fences[idx]) {
                    debug!("Waiting for texture pool slot {} fence", idx);
                    self.sync.wait(state.tex_fences[idx], &self.device, 4);
                }
                state.tex_idx = idx + 1;
                return Some(idx);
            }
        }
        warn!("No available texture in pool");
        None
    }

    fn on_frame(self: &Arc<Self>, pool: &Direct3D11CaptureFramePool) {
        if !self.running.load(Ordering::Acquire) || !self.capturing.load(Ordering::Acquire) {
            return;
        }
        let gen = self.generation.load(Ordering::Acquire);
        self.callbacks_active.fetch_add(1, Ordering::AcqRel);
        let _guard = CallbackGuard(&self.callbacks_active);

        let frame = match pool.TryGetNextFrame() {
            Ok(f) => f,
            Err(e) => {
                warn!("TryGetNextFrame failed: {:?}", e);
                return;
            }
        };

        let mut session_guard = self.session.lock().unwrap();
        let Some(state) = session_guard.as_mut() else {
            return;
        };
        if !self.running.load(Ordering::Acquire) || !self.capturing.load(Ordering::Acquire) {
            return;
        }
        if gen != self.generation.load(Ordering::Acquire) {
            debug!("Frame generation mismatch, discarding");
            return;
        }

        let content = match frame.ContentSize() {
            Ok(s) => s,
            Err(_) => return,
        };
        if content.Width as u32 != state.width || content.Height as u32 != state.height {
            let (new_w, new_h) = (content.Width as u32, content.Height as u32);
            info!(
                "Resolution changed from {}x{} to {}x{}",
                state.width, state.height, new_w, new_h
            );
            if self.handle_resize(state, new_w, new_h).is_ok() {
                drop(session_guard);
                self.fire_resolution_change(new_w, new_h);
            }
            return;
        }

        let timestamp = now_us();
        let src: ID3D11Texture2D = match frame
            .Surface()
            .and_then(|surface| surface.cast::<IDirect3DDxgiInterfaceAccess>())
            .and_then(|access| unsafe { access.GetInterface::<ID3D11Texture2D>() })
        {
            Ok(t) => t,
            Err(e) => {
                warn!("Failed to get D3D11 texture from frame: {:?}", e);
                return;
            }
        };

        let Some(idx) = self.find_tex(state) else {
            return;
        };
        let dst = state.tex_pool[idx].clone();

        let (fence, needs_sync) = {
            let _mt = self.device.multithread_guard();
            unsafe {
                self.device.context.CopyResource(&dst.0, &src);
                self.device.context.Flush();
            }
            self.sync.signal()
        };
        state.tex_fences[idx] = fence;

        self.slot.push(Frame {
            texture: dst,
            timestamp,
            fence,
            pool_index: idx as u8,
            needs_sync,
            generation: gen,
        });
    }

    /// A display-mode change invalidates the session's buffers: rebuild
    /// the texture pool, resize the frame pool and fence off everything
    /// still in flight via a generation bump.
    fn handle_resize(
        &self,
        state: &mut SessionState,
        width: u32,
        height: u32,
    ) -> Result<(), InitError> {
        let tex_pool = self.create_texture_pool(width, height)?;
        state
            .frame_pool
            .Recreate(
                &self.winrt_device,
                DirectXPixelFormat::B8G8R8A8UIntNormalized,
                4,
                SizeInt32 {
                    Width: width as i32,
                    Height: height as i32,
                },
            )
            .map_err(|e| InitError::Capture(format!("frame pool recreate: {:?}", e)))?;

        state.tex_pool = tex_pool;
        state.tex_fences = [0; TEXTURE_POOL];
        state.tex_idx = 0;
        state.width = width;
        state.height = height;

        let new_gen = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.slot.set_generation(new_gen);
        self.slot.reset();
        self.slot.wake();
        Ok(())
    }
}

struct CallbackGuard<'a>(&'a AtomicI32);

impl Drop for CallbackGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

fn create_device() -> Result<DeviceHandles, InitError> {
    let levels = [
        D3D_FEATURE_LEVEL_12_1,
        D3D_FEATURE_LEVEL_12_0,
        D3D_FEATURE_LEVEL_11_1,
        D3D_FEATURE_LEVEL_11_0,
    ];
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let mut level = D3D_FEATURE_LEVEL::default();

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_VIDEO_SUPPORT,
            Some(&levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            Some(&mut level),
            Some(&mut context),
        )
    }
    .map_err(|e| InitError::Capture(format!("D3D11CreateDevice: {:?}", e)))?;

    let device = device.ok_or_else(|| InitError::Capture("D3D11 device was null".into()))?;
    let context = context.ok_or_else(|| InitError::Capture("D3D11 context was null".into()))?;
    info!("D3D11 device created, feature level {:#06x}", level.0);

    let multithread: Option<ID3D11Multithread> = device.cast().ok();
    match &multithread {
        Some(mt) => unsafe {
            let _ = mt.SetMultithreadProtected(true);
        },
        None => warn!("ID3D11Multithread not available"),
    }

    Ok(DeviceHandles {
        device,
        context,
        multithread,
    })
}

fn create_winrt_device(device: &DeviceHandles) -> Result<IDirect3DDevice, InitError> {
    let dxgi: IDXGIDevice = device
        .device
        .cast()
        .map_err(|e| InitError::Capture(format!("IDXGIDevice: {:?}", e)))?;
    let inspectable = unsafe { CreateDirect3D11DeviceFromDXGIDevice(&dxgi) }
        .map_err(|e| InitError::Capture(format!("WinRT device: {:?}", e)))?;
    inspectable
        .cast()
        .map_err(|e| InitError::Capture(format!("IDirect3DDevice cast: {:?}", e)))
}

fn monitor_refresh_rate(handle: isize) -> Option<u32> {
    monitor::refresh_rate_for_handle(handle)
}
