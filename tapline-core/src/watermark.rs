//! Backpressure bookkeeping shared by the poller and the decode workers.
//!
//! `total_raw` counts raw messages sitting in worker rings. The poller pauses
//! the broker's partitions when the aggregate reaches the high threshold;
//! workers request resumption once it falls back to the low threshold, and
//! the poller acts on that request at the top of its loop.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub(crate) struct Watermark {
    total_raw: AtomicUsize,
    paused: AtomicBool,
    resume_requested: AtomicBool,
    high: usize,
    low: usize,
}

impl Watermark {
    /// Thresholds derive from a single ring's capacity; occupancy is the sum
    /// across rings.
    pub fn new(raw_queue_size: usize, high_ratio: f64, low_ratio: f64) -> Self {
        Self {
            total_raw: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            resume_requested: AtomicBool::new(false),
            high: (raw_queue_size as f64 * high_ratio) as usize,
            low: (raw_queue_size as f64 * low_ratio) as usize,
        }
    }

    pub fn total(&self) -> usize {
        self.total_raw.load(Ordering::Relaxed)
    }

    /// Poller side: one raw message entered a ring.
    pub fn msg_queued(&self) {
        self.total_raw.fetch_add(1, Ordering::Relaxed);
    }

    /// Worker side: one raw message left a ring. Requests resumption when
    /// the occupancy has fallen to the low threshold while paused.
    pub fn msg_drained(&self) {
        let before = self.total_raw.fetch_sub(1, Ordering::Relaxed);
        if self.paused.load(Ordering::Acquire) && before.saturating_sub(1) <= self.low {
            self.resume_requested.store(true, Ordering::Release);
        }
    }

    pub fn over_high(&self) -> bool {
        self.total_raw.load(Ordering::Relaxed) >= self.high
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    /// Poller side: consume a pending resume request.
    pub fn take_resume_request(&self) -> bool {
        self.resume_requested.swap(false, Ordering::AcqRel)
    }

    #[cfg(test)]
    pub fn high(&self) -> usize {
        self.high
    }

    #[cfg(test)]
    pub fn low(&self) -> usize {
        self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds_from_ratios() {
        let wm = Watermark::new(8192, 0.9, 0.5);
        assert_eq!(wm.high(), 7372);
        assert_eq!(wm.low(), 4096);
    }

    #[test]
    fn test_high_watermark_trips() {
        let wm = Watermark::new(10, 0.9, 0.5);
        for _ in 0..8 {
            wm.msg_queued();
        }
        assert!(!wm.over_high());
        wm.msg_queued();
        assert!(wm.over_high());
    }

    #[test]
    fn test_resume_requested_only_when_paused() {
        let wm = Watermark::new(10, 0.9, 0.5);
        for _ in 0..9 {
            wm.msg_queued();
        }

        // Not paused: draining below low must not request resumption.
        for _ in 0..9 {
            wm.msg_drained();
        }
        assert!(!wm.take_resume_request());

        for _ in 0..9 {
            wm.msg_queued();
        }
        wm.set_paused(true);
        wm.msg_drained(); // 8 left, still above low
        assert!(!wm.take_resume_request());
        for _ in 0..3 {
            wm.msg_drained(); // 5 left == low
        }
        assert!(wm.take_resume_request());
        // Request is consumed by the swap.
        assert!(!wm.take_resume_request());
    }
}
