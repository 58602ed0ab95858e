//! Bounded frame ring between the capture callback and the scheduler.
//!
//! Capacity is fixed at four. Pushing into a full ring drops the oldest
//! frame; the consumer blocks on a latched signal (auto-reset event
//! semantics: a `wake()` with nothing queued lets one `pop` return `None`,
//! which is how shutdown and generation changes unblock the scheduler).
//!
//! Pool bookkeeping: a 32-bit mask tracks which texture-pool slots are
//! referenced by frames that are queued here or held by the consumer. The
//! capture side refuses to reuse a pool slot while its bit is set.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

/// Ring capacity.
const CAPACITY: usize = 4;

/// A captured frame travelling from capture to encode.
///
/// Holds the texture by value: dropping the frame releases its reference.
#[derive(Debug)]
pub struct Frame<T> {
    pub texture: T,
    /// Capture timestamp, microseconds since the Unix epoch.
    pub timestamp: i64,
    /// GPU fence value ordering the copy into the pool texture (0 = none).
    pub fence: u64,
    /// Index of the backing texture-pool slot.
    pub pool_index: u8,
    /// Whether the consumer must wait on `fence` before reading.
    pub needs_sync: bool,
    /// Capture generation at push time; stale frames are discarded unsent.
    pub generation: u64,
}

struct SlotState<T> {
    queue: VecDeque<Frame<T>>,
    in_flight: u32,
    signaled: bool,
}

pub struct FrameSlot<T> {
    state: Mutex<SlotState<T>>,
    signal: Condvar,
    generation: AtomicU64,
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                queue: VecDeque::with_capacity(CAPACITY),
                in_flight: 0,
                signaled: false,
            }),
            signal: Condvar::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn set_generation(&self, gen: u64) {
        self.generation.store(gen, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Append a frame, dropping the oldest if the ring is full, and signal
    /// the consumer.
    pub fn push(&self, frame: Frame<T>) {
        let mut state = self.state.lock().unwrap();
        if state.queue.len() >= CAPACITY {
            if let Some(old) = state.queue.pop_front() {
                state.in_flight &= !(1u32 << old.pool_index);
            }
        }
        state.in_flight |= 1u32 << frame.pool_index;
        state.queue.push_back(frame);
        state.signaled = true;
        self.signal.notify_one();
    }

    /// Block until signaled, then take one frame. Returns `None` on a
    /// spurious wake (shutdown, generation change) with nothing queued.
    /// The popped frame's pool slot stays in-flight until
    /// [`mark_released`](Self::mark_released).
    pub fn pop(&self) -> Option<Frame<T>> {
        let mut state = self.state.lock().unwrap();
        while !state.signaled {
            state = self.signal.wait(state).unwrap();
        }
        state.signaled = false;
        let frame = state.queue.pop_front()?;
        if !state.queue.is_empty() {
            state.signaled = true;
            self.signal.notify_one();
        }
        Some(frame)
    }

    /// Clear the in-flight bit after the consumer no longer needs the
    /// frame's texture.
    pub fn mark_released(&self, pool_index: u8) {
        let mut state = self.state.lock().unwrap();
        state.in_flight &= !(1u32 << pool_index);
    }

    /// Queried by the pool allocator before reusing a slot.
    pub fn is_in_flight(&self, pool_index: u8) -> bool {
        let state = self.state.lock().unwrap();
        state.in_flight & (1u32 << pool_index) != 0
    }

    /// Drop all queued frames, clear the bitmask and the wake signal.
    pub fn reset(&self) {
        let mut state = self.state.lock().unwrap();
        state.queue.clear();
        state.in_flight = 0;
        state.signaled = false;
    }

    /// Spurious signal to unblock the consumer.
    pub fn wake(&self) {
        let mut state = self.state.lock().unwrap();
        state.signaled = true;
        self.signal.notify_one();
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> u32 {
        self.state.lock().unwrap().in_flight.count_ones()
    }

    #[cfg(test)]
    fn queue_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(id: u32, pool_index: u8, generation: u64) -> Frame<u32> {
        Frame {
            texture: id,
            timestamp: id as i64 * 16_667,
            fence: 0,
            pool_index,
            needs_sync: false,
            generation,
        }
    }

    #[test]
    fn test_push_pop_fifo() {
        let slot = FrameSlot::new();
        slot.push(frame(1, 0, 0));
        slot.push(frame(2, 1, 0));
        assert_eq!(slot.pop().unwrap().texture, 1);
        assert_eq!(slot.pop().unwrap().texture, 2);
    }

    #[test]
    fn test_overflow_drops_oldest_and_clears_bit() {
        let slot = FrameSlot::new();
        for i in 0..5u8 {
            slot.push(frame(i as u32, i, 0));
        }
        assert_eq!(slot.queue_len(), 4);
        // Frame 0 was dropped; its bit is clear, the other four are set.
        assert!(!slot.is_in_flight(0));
        assert_eq!(slot.in_flight_count(), 4);
        assert_eq!(slot.pop().unwrap().texture, 1);
    }

    #[test]
    fn test_bitmask_counts_queued_plus_held() {
        let slot = FrameSlot::new();
        slot.push(frame(1, 3, 0));
        slot.push(frame(2, 5, 0));
        assert_eq!(slot.in_flight_count(), 2);

        let held = slot.pop().unwrap();
        // Popped but not yet released: still in flight.
        assert_eq!(slot.in_flight_count(), 2);
        assert!(slot.is_in_flight(held.pool_index));

        slot.mark_released(held.pool_index);
        assert_eq!(slot.in_flight_count(), 1);
        assert!(!slot.is_in_flight(3));
        assert!(slot.is_in_flight(5));
    }

    #[test]
    fn test_wake_returns_none_when_empty() {
        let slot: Arc<FrameSlot<u32>> = Arc::new(FrameSlot::new());
        let consumer = {
            let slot = Arc::clone(&slot);
            std::thread::spawn(move || slot.pop().map(|f| f.texture))
        };
        std::thread::sleep(Duration::from_millis(20));
        slot.wake();
        assert_eq!(consumer.join().unwrap(), None);
    }

    #[test]
    fn test_pop_resignals_remaining() {
        let slot = FrameSlot::new();
        slot.push(frame(1, 0, 0));
        slot.push(frame(2, 1, 0));
        assert!(slot.pop().is_some());
        // The second frame must be poppable without another push.
        assert!(slot.pop().is_some());
        // Now empty and unsignaled: a wake produces None.
        slot.wake();
        assert!(slot.pop().is_none());
    }

    #[test]
    fn test_reset_clears_everything() {
        let slot = FrameSlot::new();
        slot.push(frame(1, 0, 0));
        slot.push(frame(2, 1, 0));
        slot.reset();
        assert_eq!(slot.queue_len(), 0);
        assert_eq!(slot.in_flight_count(), 0);
        slot.wake();
        assert!(slot.pop().is_none());
    }

    #[test]
    fn test_generation_accessors() {
        let slot: FrameSlot<u32> = FrameSlot::new();
        assert_eq!(slot.generation(), 0);
        slot.set_generation(7);
        assert_eq!(slot.generation(), 7);
    }
}
