//! Lock-free sample ring between the UI thread and an audio output callback
//!
//! Single producer (UI thread writing PCM) and single consumer (the
//! device callback pulling samples). Overflowing samples are dropped,
//! underruns are filled with silence by the caller.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity ring of interleaved f32 samples
pub struct SampleRing {
    queue: ArrayQueue<f32>,
    overflow_count: AtomicUsize,
    underrun_count: AtomicUsize,
}

impl SampleRing {
    /// Create a ring holding `capacity` samples (at least one)
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            overflow_count: AtomicUsize::new(0),
            underrun_count: AtomicUsize::new(0),
        }
    }

    /// Ring sized for `ms` milliseconds of audio
    pub fn for_duration(sample_rate: u32, channels: u16, ms: u32) -> Self {
        let capacity = sample_rate as usize * channels as usize * ms as usize / 1000;
        Self::new(capacity)
    }

    /// Push samples, returning how many were accepted
    pub fn push_slice(&self, samples: &[f32]) -> usize {
        let mut accepted = 0;
        for &sample in samples {
            if self.queue.push(sample).is_err() {
                self.overflow_count
                    .fetch_add(samples.len() - accepted, Ordering::Relaxed);
                break;
            }
            accepted += 1;
        }
        accepted
    }

    /// Fill `out` from the ring, padding with silence on underrun.
    /// Returns the number of real samples written.
    pub fn pop_into(&self, out: &mut [f32]) -> usize {
        let mut written = 0;
        for slot in out.iter_mut() {
            match self.queue.pop() {
                Some(sample) => {
                    *slot = sample;
                    written += 1;
                }
                None => *slot = 0.0,
            }
        }
        if written < out.len() {
            self.underrun_count.fetch_add(1, Ordering::Relaxed);
        }
        written
    }

    /// Discard everything buffered
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn overflow_count(&self) -> usize {
        self.overflow_count.load(Ordering::Relaxed)
    }

    pub fn underrun_count(&self) -> usize {
        self.underrun_count.load(Ordering::Relaxed)
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity() as f32
    }
}

/// Thread-safe handle to a sample ring
pub type SharedSampleRing = Arc<SampleRing>;
