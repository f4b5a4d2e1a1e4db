//! Page replacement policies for the buffer pool.

use crate::frame::FrameId;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

/// Trait for page replacement algorithms.
///
/// Victim selection takes a predicate so the pool can consult pin counts
/// directly; the replacer itself only tracks access recency.
pub trait Replacer: Send + Sync {
    /// Records that the given frame was accessed.
    fn record_access(&self, frame_id: FrameId);

    /// Selects a victim among frames for which `is_victim` returns true.
    fn evict(&self, is_victim: &dyn Fn(FrameId) -> bool) -> Option<FrameId>;

    /// Forgets a frame's access history.
    fn remove(&self, frame_id: FrameId);
}

/// Clock replacement algorithm.
///
/// A reference bit per frame gives recently accessed pages a second chance;
/// the clock hand sweeps until it finds an eligible frame with a clear bit.
pub struct ClockReplacer {
    /// Number of frames.
    num_frames: usize,
    /// Reference bits, set lock-free on access.
    reference_bits: Vec<AtomicBool>,
    /// Current clock hand position.
    clock_hand: Mutex<usize>,
}

impl ClockReplacer {
    /// Creates a new clock replacer for the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            num_frames,
            reference_bits: (0..num_frames).map(|_| AtomicBool::new(false)).collect(),
            clock_hand: Mutex::new(0),
        }
    }

    /// Returns the total capacity.
    pub fn capacity(&self) -> usize {
        self.num_frames
    }
}

impl Replacer for ClockReplacer {
    #[inline]
    fn record_access(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(true, Ordering::Relaxed);
        }
    }

    fn evict(&self, is_victim: &dyn Fn(FrameId) -> bool) -> Option<FrameId> {
        let mut hand = self.clock_hand.lock();

        // Two full rotations: the first clears reference bits, the second
        // must then find any eligible frame.
        for _ in 0..(2 * self.num_frames) {
            let idx = *hand;
            *hand = (idx + 1) % self.num_frames;

            let frame_id = FrameId(idx as u32);
            if !is_victim(frame_id) {
                continue;
            }
            if self.reference_bits[idx].swap(false, Ordering::Relaxed) {
                continue;
            }
            return Some(frame_id);
        }

        // Every eligible frame kept its reference bit set concurrently;
        // fall back to the first eligible one.
        (0..self.num_frames)
            .map(|i| FrameId(i as u32))
            .find(|&fid| is_victim(fid))
    }

    fn remove(&self, frame_id: FrameId) {
        let idx = frame_id.0 as usize;
        if idx < self.num_frames {
            self.reference_bits[idx].store(false, Ordering::Relaxed);
        }
    }
}
