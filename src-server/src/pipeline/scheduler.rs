//! The pacing loop driving the encoder from the frame ring.
//!
//! One long-lived thread pops frames, discards anything from a stale
//! capture generation, coalesces bursts down to the target frame rate and
//! hands due frames to the encoder, sending the output through the
//! transport. At most one frame (the held "previous frame") survives an
//! iteration.

use crate::encoder::{EncoderCell, EncodedFrame};
use crate::pipeline::{Frame, FrameSlot};
use airdesk_common::time::now_us;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where encoded frames go; implemented by the transport.
pub trait VideoOutput: Send + Sync {
    /// A peer is connected with all channels open and wants frames.
    fn is_streaming(&self) -> bool;
    /// Consume the latched keyframe request, if any.
    fn take_needs_key(&self) -> bool;
    /// Chunk and queue one encoded frame. False when the peer is gone.
    fn send_frame(&self, frame: &EncodedFrame) -> bool;
}

/// Fence wait against the capture device, bounded at 16 ms.
pub trait FenceSync: Send + Sync {
    fn wait_ready(&self, fence: u64) -> bool;
}

pub struct PipelineScheduler<T> {
    slot: Arc<FrameSlot<T>>,
    encoder: Arc<EncoderCell<T>>,
    output: Arc<dyn VideoOutput>,
    fence: Arc<dyn FenceSync>,
    target_fps: Arc<AtomicU32>,
    run: Arc<AtomicBool>,
}

impl<T: Send + 'static> PipelineScheduler<T> {
    pub fn new(
        slot: Arc<FrameSlot<T>>,
        encoder: Arc<EncoderCell<T>>,
        output: Arc<dyn VideoOutput>,
        fence: Arc<dyn FenceSync>,
        target_fps: Arc<AtomicU32>,
        run: Arc<AtomicBool>,
    ) -> Self {
        Self {
            slot,
            encoder,
            output,
            fence,
            target_fps,
            run,
        }
    }

    fn period_us(&self) -> i64 {
        let fps = self.target_fps.load(Ordering::Acquire).max(1);
        1_000_000 / fps as i64
    }

    fn release(&self, frame: Frame<T>) {
        self.slot.mark_released(frame.pool_index);
        drop(frame);
    }

    /// Encode one frame under the encoder lock and ship the result.
    /// Returns whether the transport accepted a frame.
    fn encode_and_send(&self, frame: &Frame<T>, force_key: bool) -> bool {
        let mut guard = self.encoder.lock();
        let Some(encoder) = guard.as_mut() else {
            return false;
        };
        if !self.output.is_streaming() {
            return false;
        }
        match encoder.encode(&frame.texture, frame.timestamp, force_key) {
            Some(out) => self.output.send_frame(out),
            None => false,
        }
    }

    /// Spin briefly until the encoder's own fence reports the input
    /// texture consumed, so the pool slot can be reused.
    fn wait_encode_complete(&self) {
        let guard = self.encoder.lock();
        if let Some(encoder) = guard.as_ref() {
            for _ in 0..8 {
                if encoder.is_encode_complete() {
                    break;
                }
                std::thread::sleep(Duration::from_micros(500));
            }
        }
    }

    pub fn run(self) {
        let mut pf: Option<Frame<T>> = None;
        let mut was_streaming = false;
        let mut period = self.period_us();
        let mut next_ts: i64 = 0;
        let mut last_gen = self.slot.generation();
        let mut frames_encoded: u64 = 0;
        let mut frames_dropped: u64 = 0;

        debug!("Scheduler thread started");

        while self.run.load(Ordering::Acquire) {
            let Some(fd) = self.slot.pop() else {
                continue;
            };
            let now = now_us();

            let cur_gen = self.slot.generation();
            if cur_gen != last_gen {
                if let Some(old) = pf.take() {
                    self.release(old);
                }
                last_gen = cur_gen;
                next_ts = 0;
                debug!("Scheduler: generation changed to {}", cur_gen);
            }

            if fd.generation != cur_gen {
                self.release(fd);
                frames_dropped += 1;
                continue;
            }

            let is_streaming = self.output.is_streaming() && self.encoder.is_ready();
            if is_streaming && !was_streaming {
                if let Some(encoder) = self.encoder.lock().as_mut() {
                    encoder.flush();
                }
                period = self.period_us();
                next_ts = 0;
                if let Some(old) = pf.take() {
                    self.release(old);
                }
                info!(
                    "Scheduler: streaming started (fps={}, period={}us)",
                    self.target_fps.load(Ordering::Acquire),
                    period
                );
            }
            was_streaming = is_streaming;

            if !is_streaming {
                self.release(fd);
                continue;
            }

            period = self.period_us();
            let needs_key = self.output.take_needs_key();

            if next_ts == 0 {
                next_ts = fd.timestamp;
            }

            if needs_key {
                if let Some(old) = pf.take() {
                    self.release(old);
                }
                if fd.needs_sync && !self.fence.wait_ready(fd.fence) {
                    self.release(fd);
                    frames_dropped += 1;
                    continue;
                }
                if self.encode_and_send(&fd, true) {
                    next_ts = fd.timestamp + period;
                    frames_encoded += 1;
                }
                self.wait_encode_complete();
                self.release(fd);
                continue;
            }

            // Too early relative to the pacing deadline: drop outright.
            if fd.timestamp - next_ts < -period * 3 / 2 {
                self.release(fd);
                frames_dropped += 1;
                continue;
            }

            // Coalesce with the held frame, keeping whichever lands closer
            // to the deadline.
            if let Some(old) = pf.take() {
                if old.generation != cur_gen {
                    self.release(old);
                    pf = Some(fd);
                } else if (fd.timestamp - next_ts).abs() < (old.timestamp - next_ts).abs() {
                    self.release(old);
                    pf = Some(fd);
                } else {
                    self.release(fd);
                    pf = Some(old);
                }
            } else {
                pf = Some(fd);
            }

            let due = pf
                .as_ref()
                .map(|f| f.timestamp >= next_ts || now >= next_ts + period / 2)
                .unwrap_or(false);

            if due {
                let frame = pf.take().unwrap();

                if frame.generation != self.slot.generation() {
                    self.release(frame);
                    continue;
                }

                // Held past usefulness: drop and catch the deadline forward
                // by whole periods.
                if now - frame.timestamp > period * 2 {
                    self.release(frame);
                    frames_dropped += 1;
                    while next_ts < now - period {
                        next_ts += period;
                    }
                    continue;
                }

                if frame.needs_sync && !self.fence.wait_ready(frame.fence) {
                    self.release(frame);
                    frames_dropped += 1;
                    continue;
                }

                if self.encode_and_send(&frame, false) {
                    frames_encoded += 1;
                }
                self.wait_encode_complete();
                self.release(frame);

                next_ts += period;
                if next_ts < now - period * 2 {
                    next_ts = now;
                }
            }
        }

        if let Some(old) = pf.take() {
            self.release(old);
        }
        if frames_dropped > frames_encoded && frames_dropped > 100 {
            warn!(
                "Scheduler exiting with high drop ratio (encoded={} dropped={})",
                frames_encoded, frames_dropped
            );
        } else {
            info!(
                "Scheduler thread exiting (encoded={} dropped={})",
                frames_encoded, frames_dropped
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::EncoderOps;
    use airdesk_common::{Codec, GpuVendor};
    use std::sync::Mutex;

    struct MockEncoder {
        out: EncodedFrame,
        calls: Arc<Mutex<Vec<(i64, bool)>>>,
        flushes: Arc<Mutex<u32>>,
    }

    impl EncoderOps<u32> for MockEncoder {
        fn encode(&mut self, _tex: &u32, ts: i64, force_key: bool) -> Option<&EncodedFrame> {
            self.calls.lock().unwrap().push((ts, force_key));
            self.out = EncodedFrame {
                data: vec![1, 2, 3],
                timestamp: ts,
                encode_time_us: 100,
                is_key: force_key,
            };
            Some(&self.out)
        }
        fn update_fps(&mut self, _fps: u32) -> bool {
            false
        }
        fn flush(&mut self) {
            *self.flushes.lock().unwrap() += 1;
        }
        fn is_encode_complete(&self) -> bool {
            true
        }
        fn vendor(&self) -> GpuVendor {
            GpuVendor::Unknown
        }
        fn codec(&self) -> Codec {
            Codec::H264
        }
    }

    struct MockOutput {
        streaming: AtomicBool,
        needs_key: AtomicBool,
        sent: Mutex<Vec<EncodedFrame>>,
    }

    impl MockOutput {
        fn new(streaming: bool, needs_key: bool) -> Self {
            Self {
                streaming: AtomicBool::new(streaming),
                needs_key: AtomicBool::new(needs_key),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    impl VideoOutput for MockOutput {
        fn is_streaming(&self) -> bool {
            self.streaming.load(Ordering::Acquire)
        }
        fn take_needs_key(&self) -> bool {
            self.needs_key.swap(false, Ordering::AcqRel)
        }
        fn send_frame(&self, frame: &EncodedFrame) -> bool {
            self.sent.lock().unwrap().push(frame.clone());
            true
        }
    }

    struct NoFence;
    impl FenceSync for NoFence {
        fn wait_ready(&self, _fence: u64) -> bool {
            true
        }
    }

    struct Rig {
        slot: Arc<FrameSlot<u32>>,
        output: Arc<MockOutput>,
        run: Arc<AtomicBool>,
        calls: Arc<Mutex<Vec<(i64, bool)>>>,
        flushes: Arc<Mutex<u32>>,
        handle: std::thread::JoinHandle<()>,
    }

    fn start(streaming: bool, needs_key: bool, fps: u32) -> Rig {
        let slot = Arc::new(FrameSlot::new());
        let cell = Arc::new(EncoderCell::new());
        let calls = Arc::new(Mutex::new(Vec::new()));
        let flushes = Arc::new(Mutex::new(0));
        cell.install(Box::new(MockEncoder {
            out: EncodedFrame::default(),
            calls: Arc::clone(&calls),
            flushes: Arc::clone(&flushes),
        }));
        let output = Arc::new(MockOutput::new(streaming, needs_key));
        let run = Arc::new(AtomicBool::new(true));
        let scheduler = PipelineScheduler::new(
            Arc::clone(&slot),
            cell,
            output.clone() as Arc<dyn VideoOutput>,
            Arc::new(NoFence),
            Arc::new(AtomicU32::new(fps)),
            Arc::clone(&run),
        );
        let handle = std::thread::spawn(move || scheduler.run());
        Rig {
            slot,
            output,
            run,
            calls,
            flushes,
            handle,
        }
    }

    impl Rig {
        fn push(&self, texture: u32, timestamp: i64, generation: u64) {
            self.slot.push(Frame {
                texture,
                timestamp,
                fence: 0,
                pool_index: (texture % 6) as u8,
                needs_sync: false,
                generation,
            });
        }

        fn stop(self) -> (Vec<(i64, bool)>, Vec<EncodedFrame>, u32) {
            // Give the loop time to drain.
            std::thread::sleep(Duration::from_millis(50));
            self.run.store(false, Ordering::Release);
            self.slot.wake();
            self.handle.join().unwrap();
            let calls = self.calls.lock().unwrap().clone();
            let sent = self.output.sent.lock().unwrap().clone();
            let flushes = *self.flushes.lock().unwrap();
            (calls, sent, flushes)
        }
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let rig = start(true, true, 60);
        let ts = now_us();
        rig.push(1, ts, 0);
        let (calls, sent, flushes) = rig.stop();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].1, "first frame must be forced key");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].is_key);
        // Rising streaming edge flushes the encoder once.
        assert_eq!(flushes, 1);
    }

    #[test]
    fn test_needs_key_consumed_once() {
        let rig = start(true, true, 30);
        let base = now_us();
        let period = 1_000_000 / 30;
        rig.push(1, base, 0);
        std::thread::sleep(Duration::from_millis(30));
        rig.push(2, base + period, 0);
        let (calls, _, _) = rig.stop();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].1);
        assert!(!calls[1].1, "second frame must not repeat the keyframe");
    }

    #[test]
    fn test_stale_generation_dropped() {
        let rig = start(true, true, 60);
        rig.slot.set_generation(5);
        // Frame stamped with an old generation never reaches the encoder.
        rig.push(1, now_us(), 4);
        std::thread::sleep(Duration::from_millis(30));
        rig.push(2, now_us(), 5);
        let (calls, sent, _) = rig.stop();
        assert_eq!(calls.len(), 1);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_not_streaming_discards() {
        let rig = start(false, true, 60);
        rig.push(1, now_us(), 0);
        rig.push(2, now_us(), 0);
        let (calls, sent, _) = rig.stop();
        assert!(calls.is_empty());
        assert!(sent.is_empty());
        // All pool slots released.
        for i in 0..6 {
            assert!(!rig.slot.is_in_flight(i));
        }
    }

    #[test]
    fn test_sent_timestamps_monotonic() {
        let rig = start(true, true, 120);
        let base = now_us();
        let period = 1_000_000 / 120;
        for i in 0..6 {
            rig.push(i as u32, base + i * period, 0);
            std::thread::sleep(Duration::from_millis(10));
        }
        let (_, sent, _) = rig.stop();
        assert!(!sent.is_empty());
        for pair in sent.windows(2) {
            assert!(pair[1].timestamp >= pair[0].timestamp);
        }
    }

    #[test]
    fn test_too_early_frame_dropped() {
        let rig = start(true, true, 60);
        let base = now_us();
        let period = 1_000_000 / 60;
        // Keyframe anchors next_ts = base + period.
        rig.push(1, base, 0);
        std::thread::sleep(Duration::from_millis(30));
        // More than 1.5 periods behind the anchor: dropped without encode.
        rig.push(2, base - period * 2, 0);
        std::thread::sleep(Duration::from_millis(30));
        let (calls, _, _) = rig.stop();
        assert_eq!(calls.len(), 1);
        // Dropped frame's pool slot was released.
        assert!(!rig.slot.is_in_flight(2));
    }
}
