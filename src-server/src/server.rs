//! Top-level server wiring.
//!
//! Owns every component and routes events between them: components hold
//! no back-pointers; the transport publishes events through plain
//! closures installed here, and the pipeline reaches the transport only
//! through the scheduler's output trait. Worker threads: pipeline
//! scheduler (time-critical), audio sender, cursor poller (below
//! normal), and the wiggle debouncer.

use crate::audio::capture::AudioCapture;
use crate::audio::mic::MicPlayback;
use crate::capture::monitor::MonitorSet;
use crate::capture::{CaptureTexture, ScreenCapture};
use crate::config::AppConfig;
use crate::encoder::EncoderCell;
use crate::error::InitError;
use crate::input::InputInjector;
use crate::pipeline::{FenceSync, FrameSlot, PipelineScheduler, VideoOutput};
use crate::platform::{set_current_thread_priority, ThreadPriority};
use crate::signaling::{self, OfferError};
use crate::transport::{Transport, TransportHooks};
use airdesk_common::time::now_ms;
use airdesk_common::Codec;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Joining worker threads is bounded; stragglers are detached.
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between a wiggle request and its execution.
const WIGGLE_DEBOUNCE_MS: i64 = 100;

struct CaptureFence(Arc<ScreenCapture>);

impl FenceSync for CaptureFence {
    fn wait_ready(&self, fence: u64) -> bool {
        self.0.wait_ready(fence)
    }
}

pub struct Server {
    run: Arc<AtomicBool>,
    slot: Arc<FrameSlot<CaptureTexture>>,
    capture: Arc<ScreenCapture>,
    encoder: Arc<EncoderCell<CaptureTexture>>,
    transport: Arc<Transport>,
    input: Arc<InputInjector>,
    audio: Option<Arc<AudioCapture>>,
    mic: Option<Arc<MicPlayback>>,
    target_fps: Arc<AtomicU32>,
    threads: Vec<(JoinHandle<()>, &'static str)>,
}

impl Server {
    /// Build every component and wire the event routes. Fatal failures
    /// (no capture device, no transport) abort startup; audio and mic are
    /// optional.
    pub fn new(config: AppConfig) -> Result<Self, InitError> {
        let run = Arc::new(AtomicBool::new(true));
        let target_fps = Arc::new(AtomicU32::new(config.target_fps));
        let slot: Arc<FrameSlot<CaptureTexture>> = Arc::new(FrameSlot::new());
        let monitors = Arc::new(MonitorSet::new());

        let capture = Arc::new(ScreenCapture::new(
            Arc::clone(&slot),
            Arc::clone(&monitors),
            Arc::clone(&target_fps),
            config.monitor,
            config.cursor_capture,
        )?);

        let input = Arc::new(InputInjector::new());
        input.enable();
        if let Some(m) = monitors.at(capture.monitor_index()) {
            input.update_from_monitor(&m);
        }

        let codec_caps = probe_codec_caps(&capture);
        let codec = if codec_caps & config.codec.cap_bit() != 0 {
            config.codec
        } else {
            pick_supported_codec(codec_caps).unwrap_or(config.codec)
        };
        if codec != config.codec {
            warn!(
                "Configured codec {} unsupported, using {}",
                config.codec.display_name(),
                codec.display_name()
            );
        }
        let cur_codec = Arc::new(AtomicU8::new(codec.to_wire()));

        let audio = match AudioCapture::new() {
            Ok(a) => Some(Arc::new(a)),
            Err(e) => {
                warn!("AudioCapture unavailable: {}", e);
                None
            }
        };
        let mic = match MicPlayback::new(&config.mic_device) {
            Ok(m) => Some(Arc::new(m)),
            Err(e) => {
                info!("MicPlayback unavailable: {}", e);
                None
            }
        };

        // Initial streaming state from configuration; the peer can toggle
        // both at runtime.
        if let Some(audio) = &audio {
            audio.set_streaming(config.audio_enabled);
        }
        if let Some(mic) = &mic {
            mic.set_streaming(config.mic_enabled);
        }

        let encoder: Arc<EncoderCell<CaptureTexture>> = Arc::new(EncoderCell::new());
        let cursor_capture = Arc::new(AtomicBool::new(config.cursor_capture));
        let wiggle_request = Arc::new(AtomicI64::new(0));

        let hooks = build_hooks(HookContext {
            capture: Arc::clone(&capture),
            encoder: Arc::clone(&encoder),
            slot: Arc::clone(&slot),
            monitors: Arc::clone(&monitors),
            input: Arc::clone(&input),
            audio: audio.clone(),
            mic: mic.clone(),
            target_fps: Arc::clone(&target_fps),
            cur_codec: Arc::clone(&cur_codec),
            codec_caps,
            cursor_capture: Arc::clone(&cursor_capture),
            wiggle_request: Arc::clone(&wiggle_request),
        });

        let transport = Arc::new(Transport::new(hooks, codec)?);

        // Recreate the encoder whenever the capture reports a new size.
        {
            let encoder = Arc::clone(&encoder);
            let capture_for_cb = Arc::clone(&capture);
            let cur_codec = Arc::clone(&cur_codec);
            capture.set_resolution_change_callback(Box::new(move |w, h, fps| {
                info!("Resolution change detected: {}x{} @ {}fps", w, h, fps);
                let codec =
                    Codec::from_wire(cur_codec.load(Ordering::Acquire)).unwrap_or(Codec::Av1);
                make_encoder(&encoder, &capture_for_cb, w, h, fps, codec);
            }));
        }

        let mut server = Self {
            run,
            slot,
            capture,
            encoder,
            transport,
            input,
            audio,
            mic,
            target_fps,
            threads: Vec::new(),
        };
        server.spawn_threads(Arc::clone(&wiggle_request), cursor_capture);
        Ok(server)
    }

    /// The surface the external HTTPS signaling layer calls for
    /// `POST /api/offer`.
    pub fn handle_offer(&self, body: &str) -> Result<String, OfferError> {
        signaling::handle_offer(&self.transport, body)
    }

    pub fn host_fps(&self) -> u32 {
        self.capture.host_fps()
    }

    pub fn mic_device(&self) -> Option<&str> {
        self.mic.as_deref().map(MicPlayback::device_name)
    }

    fn spawn_threads(
        &mut self,
        wiggle_request: Arc<AtomicI64>,
        cursor_capture: Arc<AtomicBool>,
    ) {
        if let Some(audio) = &self.audio {
            audio.start();
        }
        if let Some(mic) = &self.mic {
            mic.start();
        }

        // Pipeline scheduler.
        {
            let scheduler = PipelineScheduler::new(
                Arc::clone(&self.slot),
                Arc::clone(&self.encoder),
                Arc::clone(&self.transport) as Arc<dyn VideoOutput>,
                Arc::new(CaptureFence(Arc::clone(&self.capture))),
                Arc::clone(&self.target_fps),
                Arc::clone(&self.run),
            );
            let handle = std::thread::Builder::new()
                .name("pipeline".into())
                .spawn(move || {
                    set_current_thread_priority(ThreadPriority::TimeCritical);
                    scheduler.run();
                })
                .expect("spawn pipeline thread");
            self.threads.push((handle, "pipeline"));
        }

        // Audio sender: loopback queue → audio channel.
        if let Some(audio) = self.audio.clone() {
            let run = Arc::clone(&self.run);
            let transport = Arc::clone(&self.transport);
            let handle = std::thread::Builder::new()
                .name("audio-send".into())
                .spawn(move || {
                    debug!("Audio send thread started");
                    let mut sent: u64 = 0;
                    while run.load(Ordering::Acquire) {
                        if !transport.is_streaming() {
                            std::thread::sleep(Duration::from_millis(10));
                            continue;
                        }
                        if let Some(pkt) = audio.pop_packet(Duration::from_millis(5)) {
                            if transport.send_audio(&pkt.data, pkt.timestamp, pkt.samples) {
                                sent += 1;
                            }
                        }
                    }
                    info!("Audio send thread exiting (sent {} packets)", sent);
                })
                .expect("spawn audio-send thread");
            self.threads.push((handle, "audio-send"));
        }

        // Cursor poller: report shape transitions while the OS cursor is
        // excluded from frames.
        {
            let run = Arc::clone(&self.run);
            let transport = Arc::clone(&self.transport);
            let input = Arc::clone(&self.input);
            let handle = std::thread::Builder::new()
                .name("cursor-poll".into())
                .spawn(move || {
                    set_current_thread_priority(ThreadPriority::BelowNormal);
                    debug!("Cursor thread started");
                    while run.load(Ordering::Acquire) {
                        if !transport.is_streaming() || cursor_capture.load(Ordering::Acquire) {
                            std::thread::sleep(Duration::from_millis(50));
                            continue;
                        }
                        if let Some(shape) = input.current_cursor() {
                            transport.send_cursor_shape(shape);
                        }
                        std::thread::sleep(Duration::from_millis(33));
                    }
                    debug!("Cursor thread exiting");
                })
                .expect("spawn cursor-poll thread");
            self.threads.push((handle, "cursor-poll"));
        }

        // Wiggle debouncer: executes a centered move 100 ms after the
        // latest request.
        {
            let run = Arc::clone(&self.run);
            let input = Arc::clone(&self.input);
            let handle = std::thread::Builder::new()
                .name("wiggle".into())
                .spawn(move || {
                    while run.load(Ordering::Acquire) {
                        std::thread::sleep(Duration::from_millis(50));
                        let requested = wiggle_request.load(Ordering::Acquire);
                        if requested > 0 && now_ms() - requested >= WIGGLE_DEBOUNCE_MS {
                            wiggle_request.store(0, Ordering::Release);
                            input.wiggle_center();
                            debug!("Wiggle executed");
                        }
                    }
                })
                .expect("spawn wiggle thread");
            self.threads.push((handle, "wiggle"));
        }
    }

    /// Block until `stop` flips the run flag (signal handler).
    pub fn run_until_shutdown(&self) {
        while self.run.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    pub fn run_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.run)
    }

    /// Stop all threads, close the peer and release devices.
    pub fn shutdown(&mut self) {
        info!("Initiating shutdown...");
        self.run.store(false, Ordering::Release);
        if let Some(audio) = &self.audio {
            audio.stop();
        }
        if let Some(mic) = &self.mic {
            mic.stop();
        }
        self.capture.pause();
        self.slot.wake();
        self.transport.shutdown();

        for (handle, name) in self.threads.drain(..) {
            join_with_timeout(handle, name, JOIN_TIMEOUT);
        }
        info!("Shutdown complete");
    }
}

fn join_with_timeout(handle: JoinHandle<()>, name: &str, timeout: Duration) {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(timeout).is_err() {
        warn!("Timeout waiting for {} thread ({:?}); detaching", name, timeout);
    } else {
        debug!("Joined {} thread", name);
    }
}

fn probe_codec_caps(capture: &ScreenCapture) -> u8 {
    #[cfg(windows)]
    {
        crate::encoder::ffmpeg::probe_support(&capture.device_handles())
    }
    #[cfg(not(windows))]
    {
        let _ = capture;
        0
    }
}

fn pick_supported_codec(caps: u8) -> Option<Codec> {
    [Codec::Av1, Codec::H265, Codec::H264]
        .into_iter()
        .find(|c| caps & c.cap_bit() != 0)
}

/// Replace the current encoder. Never called while holding the cell lock.
fn make_encoder(
    cell: &EncoderCell<CaptureTexture>,
    capture: &ScreenCapture,
    width: u32,
    height: u32,
    fps: u32,
    codec: Codec,
) -> bool {
    cell.clear();
    #[cfg(windows)]
    {
        match crate::encoder::ffmpeg::FfmpegEncoder::new(
            width,
            height,
            fps,
            &capture.device_handles(),
            codec,
        ) {
            Ok(enc) => {
                cell.install(Box::new(enc));
                info!(
                    "Encoder created: {}x{} @ {}fps, codec={}",
                    width,
                    height,
                    fps,
                    codec.display_name()
                );
                true
            }
            Err(e) => {
                error!("Encoder creation failed: {}", e);
                false
            }
        }
    }
    #[cfg(not(windows))]
    {
        let _ = (capture, width, height, fps, codec);
        error!("Hardware encoding is only available on Windows");
        false
    }
}

struct HookContext {
    capture: Arc<ScreenCapture>,
    encoder: Arc<EncoderCell<CaptureTexture>>,
    slot: Arc<FrameSlot<CaptureTexture>>,
    monitors: Arc<MonitorSet>,
    input: Arc<InputInjector>,
    audio: Option<Arc<AudioCapture>>,
    mic: Option<Arc<MicPlayback>>,
    target_fps: Arc<AtomicU32>,
    cur_codec: Arc<AtomicU8>,
    codec_caps: u8,
    cursor_capture: Arc<AtomicBool>,
    wiggle_request: Arc<AtomicI64>,
}

fn build_hooks(ctx: HookContext) -> TransportHooks {
    let HookContext {
        capture,
        encoder,
        slot,
        monitors,
        input,
        audio,
        mic,
        target_fps,
        cur_codec,
        codec_caps,
        cursor_capture,
        wiggle_request,
    } = ctx;

    let current_codec = {
        let cur_codec = Arc::clone(&cur_codec);
        move || Codec::from_wire(cur_codec.load(Ordering::Acquire)).unwrap_or(Codec::Av1)
    };

    TransportHooks {
        on_fps_change: {
            let capture = Arc::clone(&capture);
            let encoder = Arc::clone(&encoder);
            let slot = Arc::clone(&slot);
            let current_codec = current_codec.clone();
            Box::new(move |fps, mode| {
                info!("FPS change: {} (mode={})", fps, mode);
                capture.set_fps(fps);
                let updated = {
                    let mut guard = encoder.lock();
                    match guard.as_mut() {
                        Some(enc) => {
                            enc.update_fps(fps);
                            true
                        }
                        None => false,
                    }
                };
                if !updated {
                    make_encoder(
                        &encoder,
                        &capture,
                        capture.width(),
                        capture.height(),
                        fps,
                        current_codec(),
                    );
                }
                if !capture.is_capturing() {
                    capture.start();
                }
                slot.wake();
            })
        },
        get_host_fps: {
            let capture = Arc::clone(&capture);
            Box::new(move || capture.refresh_host_fps())
        },
        get_monitor: {
            let capture = Arc::clone(&capture);
            Box::new(move || capture.monitor_index())
        },
        get_monitor_list: {
            let monitors = Arc::clone(&monitors);
            Box::new(move || monitors.snapshot())
        },
        on_monitor_change: {
            let capture = Arc::clone(&capture);
            let monitors = Arc::clone(&monitors);
            let input = Arc::clone(&input);
            let wiggle_request = Arc::clone(&wiggle_request);
            Box::new(move |index| {
                if !capture.switch_monitor(index) {
                    warn!("Monitor switch to {} failed", index);
                    return false;
                }
                if let Some(m) = monitors.at(index) {
                    input.update_from_monitor(&m);
                }
                wiggle_request.store(now_ms(), Ordering::Release);
                info!("Monitor switched to {}", index);
                true
            })
        },
        on_connected: {
            let slot = Arc::clone(&slot);
            let wiggle_request = Arc::clone(&wiggle_request);
            Box::new(move || {
                info!("Client connected");
                slot.wake();
                wiggle_request.store(now_ms(), Ordering::Release);
            })
        },
        on_disconnect: {
            let capture = Arc::clone(&capture);
            let slot = Arc::clone(&slot);
            let audio = audio.clone();
            Box::new(move || {
                info!("Client disconnected");
                capture.pause();
                slot.wake();
                if let Some(audio) = &audio {
                    audio.set_streaming(false);
                }
            })
        },
        on_codec_change: {
            let capture = Arc::clone(&capture);
            let encoder = Arc::clone(&encoder);
            let target_fps = Arc::clone(&target_fps);
            let cur_codec = Arc::clone(&cur_codec);
            let current_codec = current_codec.clone();
            Box::new(move |codec| {
                if codec == current_codec() {
                    return true;
                }
                if codec_caps & codec.cap_bit() == 0 {
                    warn!("Codec {} not supported", codec.display_name());
                    return false;
                }
                let ok = make_encoder(
                    &encoder,
                    &capture,
                    capture.width(),
                    capture.height(),
                    target_fps.load(Ordering::Acquire),
                    codec,
                );
                if ok {
                    cur_codec.store(codec.to_wire(), Ordering::Release);
                    info!("Codec changed to {}", codec.display_name());
                }
                ok
            })
        },
        get_codec_caps: Box::new(move || codec_caps),
        get_clipboard: {
            let input = Arc::clone(&input);
            Box::new(move || input.get_clipboard())
        },
        set_clipboard: {
            let input = Arc::clone(&input);
            Box::new(move |text| input.set_clipboard(text))
        },
        on_cursor_capture: {
            let capture = Arc::clone(&capture);
            Box::new(move |enabled| {
                cursor_capture.store(enabled, Ordering::Release);
                capture.set_cursor_capture(enabled);
                debug!("Cursor capture: {}", if enabled { "enabled" } else { "disabled" });
            })
        },
        on_audio_enable: {
            let audio = audio.clone();
            Box::new(move |enabled| match &audio {
                Some(audio) => {
                    audio.set_streaming(enabled);
                    info!("Audio streaming: {}", if enabled { "enabled" } else { "disabled" });
                }
                None => debug!("Audio enable requested but capture unavailable"),
            })
        },
        on_mic_enable: {
            let mic = mic.clone();
            Box::new(move |enabled| match &mic {
                Some(mic) => {
                    mic.set_streaming(enabled);
                    info!("Mic streaming: {}", if enabled { "enabled" } else { "disabled" });
                }
                None => debug!("Mic enable requested but playback unavailable"),
            })
        },
        on_input: {
            let input = Arc::clone(&input);
            Box::new(move |data| {
                input.handle_message(data);
            })
        },
        on_mic_data: {
            let mic = mic.clone();
            Box::new(move |data| {
                if let Some(mic) = &mic {
                    if mic.is_initialized() {
                        mic.push_packet(data);
                    }
                }
            })
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_supported_codec_order() {
        assert_eq!(pick_supported_codec(0b111), Some(Codec::Av1));
        assert_eq!(pick_supported_codec(0b110), Some(Codec::H265));
        assert_eq!(pick_supported_codec(0b100), Some(Codec::H264));
        assert_eq!(pick_supported_codec(0), None);
    }

    #[test]
    fn test_join_with_timeout_joins_fast_thread() {
        let handle = std::thread::spawn(|| {});
        join_with_timeout(handle, "test", Duration::from_secs(1));
    }

    #[test]
    fn test_join_with_timeout_detaches_stuck_thread() {
        let handle = std::thread::spawn(|| std::thread::sleep(Duration::from_secs(10)));
        let start = std::time::Instant::now();
        join_with_timeout(handle, "stuck", Duration::from_millis(50));
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
