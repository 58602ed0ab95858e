//! Peer microphone → host output device.
//!
//! Received Opus packets are decoded to mono 48 kHz, resampled to the
//! render device rate, fanned out to the device channel count and written
//! through WASAPI. The target device is located by a case-insensitive
//! substring match over friendly names (a virtual cable, typically); the
//! default output is used when no match exists.

use super::SAMPLE_RATE;
use crate::error::InitError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Inbound packets held ahead of decode.
const MAX_QUEUE: usize = 20;

/// Render write attempts per packet before giving up.
#[cfg(windows)]
const MAX_WRITE_ATTEMPTS: u32 = 50;

#[derive(Default)]
pub struct MicStats {
    pub packets_received: AtomicU64,
    pub packets_decoded: AtomicU64,
    pub decode_errors: AtomicU64,
    pub samples_written: AtomicU64,
    pub buffer_overruns: AtomicU64,
}

struct Shared {
    queue: Mutex<VecDeque<Vec<u8>>>,
    available: Condvar,
    running: AtomicBool,
    streaming: AtomicBool,
    stats: MicStats,
}

impl Shared {
    fn pop(&self, timeout: Duration) -> Option<Vec<u8>> {
        let guard = self.queue.lock().unwrap();
        let (mut guard, _) = self
            .available
            .wait_timeout_while(guard, timeout, |q| {
                q.is_empty() && self.running.load(Ordering::Acquire)
            })
            .unwrap();
        guard.pop_front()
    }
}

/// Microphone playback onto a named render device.
pub struct MicPlayback {
    shared: Arc<Shared>,
    device_name: String,
    device_rate: u32,
    device_channels: usize,
    initialized: bool,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Substring the playback thread re-resolves the device with.
    target: String,
}

impl MicPlayback {
    /// Locate the target render device and validate its format. The
    /// playback thread is not spawned until [`start`](Self::start).
    pub fn new(target_device: &str) -> Result<Self, InitError> {
        let (device_name, device_rate, device_channels) = probe_device(target_device)?;
        info!(
            "MicPlayback: {}Hz -> {}Hz, {}ch, device: {}",
            SAMPLE_RATE, device_rate, device_channels, device_name
        );
        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(MAX_QUEUE)),
                available: Condvar::new(),
                running: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
                stats: MicStats::default(),
            }),
            device_name,
            device_rate,
            device_channels,
            initialized: true,
            thread: Mutex::new(None),
            target: target_device.to_string(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        let target = self.target.clone();
        let device_rate = self.device_rate;
        let device_channels = self.device_channels;
        let handle = std::thread::Builder::new()
            .name("mic-playback".into())
            .spawn(move || playback_thread(shared, target, device_rate, device_channels))
            .expect("spawn mic-playback thread");
        *self.thread.lock().unwrap() = Some(handle);
        info!("MicPlayback: started");
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.streaming.store(false, Ordering::Release);
        self.shared.available.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.shared.queue.lock().unwrap().clear();
        let s = &self.shared.stats;
        info!(
            "MicPlayback: stopped (recv:{} dec:{} err:{} written:{} overruns:{})",
            s.packets_received.load(Ordering::Relaxed),
            s.packets_decoded.load(Ordering::Relaxed),
            s.decode_errors.load(Ordering::Relaxed),
            s.samples_written.load(Ordering::Relaxed),
            s.buffer_overruns.load(Ordering::Relaxed),
        );
    }

    pub fn set_streaming(&self, streaming: bool) {
        let was = self.shared.streaming.swap(streaming, Ordering::AcqRel);
        if streaming && !was {
            self.shared.queue.lock().unwrap().clear();
            debug!("MicPlayback: streaming enabled");
        } else if !streaming && was {
            debug!("MicPlayback: streaming disabled");
        }
    }

    /// Queue one raw mic packet from the transport (cap 20, drop-oldest).
    /// Dropped silently while streaming is off or the header is short.
    pub fn push_packet(&self, data: &[u8]) {
        if !self.shared.streaming.load(Ordering::Acquire)
            || data.len() < airdesk_common::protocol::packet::MEDIA_HEADER_SIZE
        {
            return;
        }
        let mut q = self.shared.queue.lock().unwrap();
        if q.len() >= MAX_QUEUE {
            q.pop_front();
        }
        q.push_back(data.to_vec());
        self.shared.available.notify_one();
    }

    pub fn stats(&self) -> &MicStats {
        &self.shared.stats
    }
}

#[cfg(windows)]
fn probe_device(target: &str) -> Result<(String, u32, usize), InitError> {
    use super::wasapi;
    use windows::Win32::Media::Audio::IAudioClient;
    use windows::Win32::System::Com::{CoUninitialize, CLSCTX_ALL};

    let owns_com = wasapi::com_init();
    let result = (|| {
        let enumerator = wasapi::device_enumerator()
            .map_err(|e| InitError::Audio(format!("device enumerator: {:?}", e)))?;
        let (device, name) = match wasapi::find_render_device(&enumerator, target) {
            Some(found) => found,
            None => {
                info!("MicPlayback: '{}' not found, using default output", target);
                let device = wasapi::default_render_device(&enumerator)
                    .map_err(|e| InitError::Audio(format!("default endpoint: {:?}", e)))?;
                (device, "(default output)".to_string())
            }
        };
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| InitError::Audio(format!("IAudioClient activation: {:?}", e)))?;
        let format = wasapi::mix_format(&client)
            .map_err(|e| InitError::Audio(format!("GetMixFormat: {:?}", e)))?;
        Ok((name, format.sample_rate, format.channels as usize))
    })();
    if owns_com {
        unsafe { CoUninitialize() };
    }
    result
}

#[cfg(not(windows))]
fn probe_device(_target: &str) -> Result<(String, u32, usize), InitError> {
    Err(InitError::Audio(
        "mic playback is only available on Windows".into(),
    ))
}

#[cfg(windows)]
fn playback_thread(shared: Arc<Shared>, target: String, device_rate: u32, channels: usize) {
    use super::resample::LinearResampler;
    use super::wasapi;
    use super::FRAME_SAMPLES;
    use airdesk_common::protocol::packet::MicPacketHeader;
    use windows::Win32::Media::Audio::{
        IAudioClient, IAudioRenderClient, AUDCLNT_SHAREMODE_SHARED,
        AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM, AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY,
    };
    use windows::Win32::System::Com::{CoTaskMemFree, CoUninitialize, CLSCTX_ALL};

    crate::platform::set_current_thread_priority(crate::platform::ThreadPriority::TimeCritical);
    let owns_com = wasapi::com_init();

    let setup: windows::core::Result<(IAudioClient, IAudioRenderClient)> = (|| {
        let enumerator = wasapi::device_enumerator()?;
        let device = match wasapi::find_render_device(&enumerator, &target) {
            Some((device, _)) => device,
            None => wasapi::default_render_device(&enumerator)?,
        };
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };
        unsafe {
            let wf = client.GetMixFormat()?;
            // 300 ms shared-mode buffer with engine-side conversion; retry
            // plain when the auto-converter is unavailable.
            let flags = AUDCLNT_STREAMFLAGS_AUTOCONVERTPCM | AUDCLNT_STREAMFLAGS_SRC_DEFAULT_QUALITY;
            let hr = client.Initialize(AUDCLNT_SHAREMODE_SHARED, flags, 3_000_000, 0, wf, None);
            if hr.is_err() {
                warn!("MicPlayback: Initialize with auto-conversion failed, retrying plain");
                let retry = client.Initialize(AUDCLNT_SHAREMODE_SHARED, 0, 3_000_000, 0, wf, None);
                CoTaskMemFree(Some(wf as *const _));
                retry?;
            } else {
                CoTaskMemFree(Some(wf as *const _));
            }
            client.Start()?;
        }
        let render: IAudioRenderClient = unsafe { client.GetService()? };
        Ok((client, render))
    })();

    let (client, render) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            warn!("MicPlayback init failed: {:?}", e);
            shared.running.store(false, Ordering::Release);
            if owns_com {
                unsafe { CoUninitialize() };
            }
            return;
        }
    };

    let mut decoder = match opus::Decoder::new(SAMPLE_RATE, opus::Channels::Mono) {
        Ok(d) => d,
        Err(e) => {
            warn!("Opus decoder creation failed: {}", e);
            shared.running.store(false, Ordering::Release);
            if owns_com {
                unsafe { CoUninitialize() };
            }
            return;
        }
    };

    let mut resampler = LinearResampler::new(SAMPLE_RATE, device_rate, 1);
    let mut pcm = vec![0i16; FRAME_SAMPLES];
    let mut decoded = vec![0f32; FRAME_SAMPLES];

    while shared.running.load(Ordering::Acquire) {
        if !shared.streaming.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let Some(pkt) = shared.pop(Duration::from_millis(5)) else {
            continue;
        };
        let Some(header) = MicPacketHeader::parse(&pkt) else {
            debug!("MicPlayback: invalid packet ({} bytes)", pkt.len());
            continue;
        };
        shared.stats.packets_received.fetch_add(1, Ordering::Relaxed);

        let samples = match decoder.decode(header.payload(&pkt), &mut pcm, false) {
            Ok(n) if n > 0 => n,
            Ok(_) => continue,
            Err(e) => {
                let errs = shared.stats.decode_errors.fetch_add(1, Ordering::Relaxed) + 1;
                if errs % 100 == 1 {
                    warn!("MicPlayback: Opus decode error: {} (total {})", e, errs);
                }
                continue;
            }
        };
        shared.stats.packets_decoded.fetch_add(1, Ordering::Relaxed);

        for i in 0..samples {
            decoded[i] = pcm[i] as f32 / 32768.0;
        }
        resampler.process_mono(&decoded[..samples], channels);

        let mut attempts = 0u32;
        while !resampler.buf.is_empty()
            && shared.running.load(Ordering::Acquire)
            && attempts < MAX_WRITE_ATTEMPTS
        {
            attempts += 1;
            let (buffer_frames, padding) = unsafe {
                match (client.GetBufferSize(), client.GetCurrentPadding()) {
                    (Ok(b), Ok(p)) => (b, p),
                    _ => break,
                }
            };
            let available = buffer_frames - padding;
            if available == 0 {
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            let to_write = (available as usize).min(resampler.buf.len() / channels);
            if to_write == 0 {
                break;
            }
            unsafe {
                let Ok(dst) = render.GetBuffer(to_write as u32) else {
                    break;
                };
                let out = std::slice::from_raw_parts_mut(dst as *mut f32, to_write * channels);
                out.copy_from_slice(&resampler.buf[..to_write * channels]);
                if render.ReleaseBuffer(to_write as u32, 0).is_err() {
                    break;
                }
            }
            resampler.buf.drain(..to_write * channels);
            shared
                .stats
                .samples_written
                .fetch_add(to_write as u64, Ordering::Relaxed);
        }

        // Overrun: keep four frames of backlog at most.
        let limit = FRAME_SAMPLES * channels * 10;
        if resampler.buf.len() > limit {
            let keep = FRAME_SAMPLES * channels * 4;
            let drop = resampler.buf.len() - keep;
            resampler.buf.drain(..drop);
            shared.stats.buffer_overruns.fetch_add(1, Ordering::Relaxed);
        }
    }

    unsafe {
        let _ = client.Stop();
    }
    if owns_com {
        unsafe { CoUninitialize() };
    }
    debug!("MicPlayback: loop thread exiting");
}

#[cfg(not(windows))]
fn playback_thread(shared: Arc<Shared>, _target: String, _rate: u32, _channels: usize) {
    shared.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;
    use airdesk_common::protocol::packet::{MicPacketHeader, MEDIA_HEADER_SIZE};
    use airdesk_common::protocol::MSG_MIC_DATA;

    fn shared() -> Shared {
        Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            streaming: AtomicBool::new(true),
            stats: MicStats::default(),
        }
    }

    fn mic_packet(ts: i64, payload: &[u8]) -> Vec<u8> {
        let mut pkt = MSG_MIC_DATA.to_le_bytes().to_vec();
        pkt.extend_from_slice(&ts.to_le_bytes());
        pkt.extend_from_slice(&480u16.to_le_bytes());
        pkt.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn test_queue_cap_drops_oldest() {
        let s = shared();
        for i in 0..(MAX_QUEUE as i64 + 5) {
            let pkt = mic_packet(i, &[0u8; 8]);
            let mut q = s.queue.lock().unwrap();
            if q.len() >= MAX_QUEUE {
                q.pop_front();
            }
            q.push_back(pkt);
        }
        let q = s.queue.lock().unwrap();
        assert_eq!(q.len(), MAX_QUEUE);
        let first = MicPacketHeader::parse(q.front().unwrap()).unwrap();
        assert_eq!(first.timestamp, 5);
    }

    #[test]
    fn test_pop_times_out_empty() {
        let s = shared();
        assert!(s.pop(Duration::from_millis(5)).is_none());
    }

    #[test]
    fn test_header_size_gate() {
        // push_packet's cheap pre-filter: anything shorter than the header
        // never enters the queue.
        assert!(MEDIA_HEADER_SIZE > 8);
        let short = vec![0u8; MEDIA_HEADER_SIZE - 1];
        assert!(MicPacketHeader::parse(&short).is_none());
    }
}
