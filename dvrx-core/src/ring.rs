//! Bounded SPSC rings bridging the producer (IQ capture), the decoder
//! thread, and the audio consumer.
//!
//! The producer side is non-blocking: a full ring drops the oldest
//! contract-free — the DSP loops tolerate bounded sample gaps. Empty/full
//! snapshots are wait-free.

use crossbeam::queue::ArrayQueue;
use num_complex::Complex64;

/// IQ sample ring fed by the capture thread.
pub struct SampleRing {
    queue: ArrayQueue<Complex64>,
}

impl SampleRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    /// Non-blocking push; returns false when the ring is full and the
    /// sample was dropped.
    pub fn push(&self, sample: Complex64) -> bool {
        self.queue.push(sample).is_ok()
    }

    pub fn pop(&self) -> Option<Complex64> {
        self.queue.pop()
    }

    /// Drain up to `max` samples into `out`; returns the count moved.
    pub fn drain_into(&self, out: &mut Vec<Complex64>, max: usize) -> usize {
        let mut n = 0;
        while n < max {
            match self.queue.pop() {
                Some(s) => {
                    out.push(s);
                    n += 1;
                }
                None => break,
            }
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Per-slot audio jitter ring drained by the playback thread.
pub struct AudioRing {
    queue: ArrayQueue<i16>,
}

impl AudioRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
        }
    }

    pub fn push(&self, sample: i16) -> bool {
        self.queue.push(sample).is_ok()
    }

    pub fn pop(&self) -> Option<i16> {
        self.queue.pop()
    }

    /// Discard everything buffered; used on forced release so stale call
    /// audio never bleeds into the next call.
    pub fn flush(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
