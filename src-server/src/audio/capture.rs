//! System loopback capture → Opus packet queue.
//!
//! A dedicated thread pulls the render mix through WASAPI loopback,
//! resamples it to 48 kHz, encodes 10 ms Opus frames and pushes them into
//! a bounded queue. The send thread pops with a short timeout so shutdown
//! never blocks on silence. Streaming can be toggled independently of
//! capture; while disabled, samples are discarded at the resampler.

use super::resample::LinearResampler;
use super::{FRAME_SAMPLES, MAX_OPUS_PACKET, SAMPLE_RATE};
use crate::error::InitError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One encoded audio frame ready for the wire.
#[derive(Debug, Clone)]
pub struct AudioPacket {
    pub data: Vec<u8>,
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp: i64,
    /// Samples per channel in this packet.
    pub samples: u16,
}

/// Encoded packets held between the capture and send threads.
const MAX_QUEUE: usize = 4;

/// Consecutive OS failures before backing off for 50 ms.
#[cfg(windows)]
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

struct Shared {
    queue: Mutex<VecDeque<AudioPacket>>,
    available: Condvar,
    running: AtomicBool,
    capturing: AtomicBool,
    streaming: AtomicBool,
}

impl Shared {
    fn push(&self, pkt: AudioPacket) {
        let mut q = self.queue.lock().unwrap();
        if q.len() >= MAX_QUEUE {
            q.pop_front();
        }
        q.push_back(pkt);
        self.available.notify_one();
    }

    fn clear(&self) {
        self.queue.lock().unwrap().clear();
    }
}

/// Resample → clamp → Opus encode stage, independent of the OS capture.
pub(crate) struct Packetizer {
    resampler: LinearResampler,
    encoder: opus::Encoder,
    channels: usize,
    pcm: Vec<i16>,
    out: Vec<u8>,
}

impl Packetizer {
    pub(crate) fn new(src_rate: u32, channels: usize) -> Result<Self, InitError> {
        let opus_channels = match channels {
            1 => opus::Channels::Mono,
            2 => opus::Channels::Stereo,
            n => return Err(InitError::Audio(format!("unsupported channel count {}", n))),
        };
        let mut encoder =
            opus::Encoder::new(SAMPLE_RATE, opus_channels, opus::Application::LowDelay)
                .map_err(|e| InitError::Audio(format!("Opus encoder: {}", e)))?;
        encoder
            .set_bitrate(opus::Bitrate::Bits(96_000))
            .map_err(|e| InitError::Audio(format!("set_bitrate: {}", e)))?;
        if let Err(e) = encoder.set_complexity(3) {
            warn!("Opus set_complexity failed: {}", e);
        }
        if let Err(e) = encoder.set_signal(opus::Signal::Music) {
            warn!("Opus set_signal failed: {}", e);
        }

        Ok(Self {
            resampler: LinearResampler::new(src_rate, SAMPLE_RATE, channels),
            encoder,
            channels,
            pcm: vec![0i16; FRAME_SAMPLES * channels],
            out: vec![0u8; MAX_OPUS_PACKET],
        })
    }

    pub(crate) fn reset(&mut self) {
        self.resampler.reset();
    }

    /// Feed interleaved f32 samples; every completed 10 ms frame is
    /// encoded and handed to `sink`.
    pub(crate) fn process(
        &mut self,
        samples: &[f32],
        timestamp: i64,
        mut sink: impl FnMut(AudioPacket),
    ) {
        self.resampler.process(samples);

        let frame_len = FRAME_SAMPLES * self.channels;
        // Backpressure: never hold more than six frames of resampled
        // audio; trim to two so the stream re-converges on live.
        let max_buf = frame_len * 6;
        if self.resampler.buf.len() > max_buf {
            let excess = self.resampler.buf.len() - frame_len * 2;
            self.resampler.buf.drain(..excess);
        }

        while self.resampler.buf.len() >= frame_len {
            for (dst, src) in self.pcm.iter_mut().zip(self.resampler.buf.iter()) {
                *dst = (src.clamp(-1.0, 1.0) * 32767.0) as i16;
            }
            self.resampler.buf.drain(..frame_len);

            match self.encoder.encode(&self.pcm, &mut self.out) {
                Ok(bytes) if bytes > 0 => sink(AudioPacket {
                    data: self.out[..bytes].to_vec(),
                    timestamp,
                    samples: FRAME_SAMPLES as u16,
                }),
                Ok(_) => {}
                Err(e) => debug!("Opus encode failed: {}", e),
            }
        }
    }
}

/// System audio capture with an Opus packet queue.
pub struct AudioCapture {
    shared: Arc<Shared>,
    sys_rate: u32,
    channels: usize,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AudioCapture {
    /// Probe the default render endpoint. Fails when the platform has no
    /// loopback source; the server treats audio as unavailable then.
    pub fn new() -> Result<Self, InitError> {
        let (sys_rate, channels) = probe_mix_format()?;
        info!("Audio: {}Hz -> {}Hz, {}ch", sys_rate, SAMPLE_RATE, channels);
        Ok(Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(VecDeque::with_capacity(MAX_QUEUE)),
                available: Condvar::new(),
                running: AtomicBool::new(false),
                capturing: AtomicBool::new(false),
                streaming: AtomicBool::new(false),
            }),
            sys_rate,
            channels,
            thread: Mutex::new(None),
        })
    }

    /// Spawn the capture thread (idempotent).
    pub fn start(&self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.capturing.store(true, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        let sys_rate = self.sys_rate;
        let channels = self.channels;
        let handle = std::thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || capture_thread(shared, sys_rate, channels))
            .expect("spawn audio-capture thread");
        *self.thread.lock().unwrap() = Some(handle);
        info!("AudioCapture: started");
    }

    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.capturing.store(false, Ordering::Release);
        self.shared.streaming.store(false, Ordering::Release);
        self.shared.available.notify_all();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        info!("AudioCapture: stopped");
    }

    /// Toggle outbound streaming. Enabling drops any queued packets so the
    /// peer starts on live audio.
    pub fn set_streaming(&self, streaming: bool) {
        let was = self.shared.streaming.swap(streaming, Ordering::AcqRel);
        if streaming && !was {
            self.shared.clear();
        }
    }

    /// Pop one packet, waiting up to `timeout`. `None` on timeout or when
    /// the capture is shutting down.
    pub fn pop_packet(&self, timeout: Duration) -> Option<AudioPacket> {
        let shared = &self.shared;
        let guard = shared.queue.lock().unwrap();
        let (mut guard, _) = shared
            .available
            .wait_timeout_while(guard, timeout, |q| {
                q.is_empty() && shared.running.load(Ordering::Acquire)
            })
            .unwrap();
        guard.pop_front()
    }
}

#[cfg(windows)]
fn probe_mix_format() -> Result<(u32, usize), InitError> {
    use super::wasapi;
    use windows::Win32::Media::Audio::IAudioClient;
    use windows::Win32::System::Com::{CoUninitialize, CLSCTX_ALL};

    let owns_com = wasapi::com_init();
    let result = (|| {
        let enumerator = wasapi::device_enumerator()
            .map_err(|e| InitError::Audio(format!("device enumerator: {:?}", e)))?;
        let device = wasapi::default_render_device(&enumerator)
            .map_err(|e| InitError::Audio(format!("default render endpoint: {:?}", e)))?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None) }
            .map_err(|e| InitError::Audio(format!("IAudioClient activation: {:?}", e)))?;
        let format = wasapi::mix_format(&client)
            .map_err(|e| InitError::Audio(format!("GetMixFormat: {:?}", e)))?;
        if !format.is_float {
            warn!("Loopback mix format is not float; capture may be silent");
        }
        Ok((format.sample_rate, (format.channels as usize).min(2)))
    })();
    if owns_com {
        unsafe { CoUninitialize() };
    }
    result
}

#[cfg(not(windows))]
fn probe_mix_format() -> Result<(u32, usize), InitError> {
    Err(InitError::Audio(
        "system loopback capture is only available on Windows".into(),
    ))
}

#[cfg(windows)]
fn capture_thread(shared: Arc<Shared>, sys_rate: u32, channels: usize) {
    use super::wasapi;
    use airdesk_common::time::now_us;
    use windows::Win32::Media::Audio::{
        IAudioCaptureClient, IAudioClient, AUDCLNT_SHAREMODE_SHARED, AUDCLNT_STREAMFLAGS_LOOPBACK,
    };

    // AUDCLNT_BUFFERFLAGS_SILENT
    const BUFFER_FLAG_SILENT: u32 = 0x2;
    use windows::Win32::System::Com::{CoUninitialize, CLSCTX_ALL};

    crate::platform::set_current_thread_priority(crate::platform::ThreadPriority::TimeCritical);
    let owns_com = wasapi::com_init();

    let result: windows::core::Result<(IAudioClient, IAudioCaptureClient)> = (|| {
        let enumerator = wasapi::device_enumerator()?;
        let device = wasapi::default_render_device(&enumerator)?;
        let client: IAudioClient = unsafe { device.Activate(CLSCTX_ALL, None)? };
        unsafe {
            let wf = client.GetMixFormat()?;
            let hr = client.Initialize(
                AUDCLNT_SHAREMODE_SHARED,
                AUDCLNT_STREAMFLAGS_LOOPBACK,
                300_000,
                0,
                wf,
                None,
            );
            windows::Win32::System::Com::CoTaskMemFree(Some(wf as *const _));
            hr?;
            client.Start()?;
        }
        let capture: IAudioCaptureClient = unsafe { client.GetService()? };
        Ok((client, capture))
    })();

    let (client, capture) = match result {
        Ok(pair) => pair,
        Err(e) => {
            warn!("Audio capture init failed: {:?}", e);
            shared.running.store(false, Ordering::Release);
            if owns_com {
                unsafe { CoUninitialize() };
            }
            return;
        }
    };

    let mut packetizer = match Packetizer::new(sys_rate, channels) {
        Ok(p) => p,
        Err(e) => {
            warn!("Audio packetizer init failed: {}", e);
            shared.running.store(false, Ordering::Release);
            if owns_com {
                unsafe { CoUninitialize() };
            }
            return;
        }
    };

    let mut silence: Vec<f32> = Vec::new();
    let mut consecutive_errors: u32 = 0;
    let mut was_streaming = false;

    while shared.running.load(Ordering::Acquire) {
        if !shared.capturing.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(10));
            continue;
        }

        let streaming = shared.streaming.load(Ordering::Acquire);
        if streaming && !was_streaming {
            packetizer.reset();
            shared.clear();
        }
        was_streaming = streaming;

        let mut packet_len = match unsafe { capture.GetNextPacketSize() } {
            Ok(n) => n,
            Err(_) => {
                consecutive_errors += 1;
                if consecutive_errors > MAX_CONSECUTIVE_ERRORS {
                    std::thread::sleep(Duration::from_millis(50));
                }
                continue;
            }
        };
        consecutive_errors = 0;

        while packet_len > 0 && shared.running.load(Ordering::Acquire) {
            let mut data: *mut u8 = std::ptr::null_mut();
            let mut frames: u32 = 0;
            let mut flags: u32 = 0;
            if unsafe { capture.GetBuffer(&mut data, &mut frames, &mut flags, None, None) }
                .is_err()
            {
                break;
            }

            if !data.is_null() && frames > 0 && streaming {
                let ts = now_us();
                if flags & BUFFER_FLAG_SILENT != 0 {
                    silence.clear();
                    silence.resize(frames as usize * channels, 0.0);
                    packetizer.process(&silence, ts, |pkt| shared.push(pkt));
                } else {
                    let samples = unsafe {
                        std::slice::from_raw_parts(data as *const f32, frames as usize * channels)
                    };
                    packetizer.process(samples, ts, |pkt| shared.push(pkt));
                }
            }

            let _ = unsafe { capture.ReleaseBuffer(frames) };
            packet_len = match unsafe { capture.GetNextPacketSize() } {
                Ok(n) => n,
                Err(_) => break,
            };
        }
        std::thread::sleep(Duration::from_millis(2));
    }

    unsafe {
        let _ = client.Stop();
    }
    if owns_com {
        unsafe { CoUninitialize() };
    }
    debug!("Audio capture thread exiting");
}

#[cfg(not(windows))]
fn capture_thread(shared: Arc<Shared>, _sys_rate: u32, _channels: usize) {
    shared.running.store(false, Ordering::Release);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packetizer_emits_10ms_frames() {
        let mut p = Packetizer::new(48_000, 2).unwrap();
        let mut packets = Vec::new();
        // 25 ms of stereo audio at the pipeline rate → two full frames.
        let samples = vec![0.1f32; 1200 * 2];
        p.process(&samples, 42, |pkt| packets.push(pkt));
        assert_eq!(packets.len(), 2);
        for pkt in &packets {
            assert_eq!(pkt.samples as usize, FRAME_SAMPLES);
            assert_eq!(pkt.timestamp, 42);
            assert!(!pkt.data.is_empty());
            assert!(pkt.data.len() <= MAX_OPUS_PACKET);
        }
    }

    #[test]
    fn test_packetizer_resamples_to_pipeline_rate() {
        // 96 kHz input: 960 source frames become 480 output samples = one
        // Opus frame.
        let mut p = Packetizer::new(96_000, 1).unwrap();
        let mut packets = Vec::new();
        p.process(&vec![0.0f32; 960], 0, |pkt| packets.push(pkt));
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_packetizer_clamps_backlog() {
        let mut p = Packetizer::new(48_000, 1).unwrap();
        let mut count = 0usize;
        // One enormous block; the internal buffer trims to stay bounded,
        // so the packet count stays well below the untrimmed 100.
        p.process(&vec![0.0f32; FRAME_SAMPLES * 100], 0, |_| count += 1);
        assert!(count <= 8, "expected bounded output, got {count}");
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let shared = Shared {
            queue: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
            running: AtomicBool::new(true),
            capturing: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
        };
        for i in 0..6i64 {
            shared.push(AudioPacket {
                data: vec![0],
                timestamp: i,
                samples: 480,
            });
        }
        let q = shared.queue.lock().unwrap();
        assert_eq!(q.len(), MAX_QUEUE);
        assert_eq!(q.front().unwrap().timestamp, 2);
        assert_eq!(q.back().unwrap().timestamp, 5);
    }

    #[test]
    fn test_unsupported_channel_count_rejected() {
        assert!(Packetizer::new(48_000, 6).is_err());
    }
}
