//! The PCM ring buffer between the decode thread and the audio callback.
//!
//! One mutex guards the whole state; critical sections are the two-segment
//! copy plus cursor updates. The write and read sides are both non-blocking
//! and return how many frames actually moved. The audio callback uses
//! [`RingBuffer::try_read`], which refuses to wait on the lock and zero-pads
//! whatever it could not get, so the callback can never block on a slow
//! producer.

use std::sync::{Mutex, PoisonError};

/// Samples per stereo frame.
const CH: usize = 2;

struct Inner {
    buf: Vec<i16>,
    /// Read cursor in frames.
    read: usize,
    /// Write cursor in frames; `write == (read + count) % capacity`.
    write: usize,
    /// Frames currently stored.
    count: usize,
}

pub struct RingBuffer {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl RingBuffer {
    /// Creates a ring holding `capacity` stereo frames.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(Inner {
                buf: vec![0i16; capacity * CH],
                read: 0,
                write: 0,
                count: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames currently buffered.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Buffered fraction, 0.0 to 1.0.
    pub fn fill_level(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }

    /// Drops all buffered audio.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.read = 0;
        inner.write = 0;
        inner.count = 0;
    }

    /// Writes as many whole frames from `frames` as there is free space.
    ///
    /// Returns the number of frames stored. Never blocks on a full ring.
    pub fn write(&self, frames: &[i16]) -> usize {
        let mut inner = self.lock();
        let available = self.capacity - inner.count;
        let frames_in = (frames.len() / CH).min(available);
        if frames_in == 0 {
            return 0;
        }

        // Two-segment copy around the wrap point.
        let first = frames_in.min(self.capacity - inner.write);
        let write = inner.write;
        inner.buf[write * CH..(write + first) * CH].copy_from_slice(&frames[..first * CH]);
        let second = frames_in - first;
        if second > 0 {
            inner.buf[..second * CH].copy_from_slice(&frames[first * CH..frames_in * CH]);
        }

        inner.write = (inner.write + frames_in) % self.capacity;
        inner.count += frames_in;
        frames_in
    }

    /// Reads up to `out.len() / 2` frames; returns frames delivered.
    pub fn read(&self, out: &mut [i16]) -> usize {
        let mut inner = self.lock();
        Self::read_locked(&mut inner, self.capacity, out)
    }

    /// Non-blocking read for the audio callback.
    ///
    /// On lock contention nothing is read. Any part of `out` that was not
    /// filled is zeroed, so the callback always hands the device a full
    /// period. Returns frames actually read.
    pub fn try_read(&self, out: &mut [i16]) -> usize {
        let read = match self.inner.try_lock() {
            Ok(mut inner) => Self::read_locked(&mut inner, self.capacity, out),
            Err(_) => 0,
        };
        out[read * CH..].fill(0);
        read
    }

    fn read_locked(inner: &mut Inner, capacity: usize, out: &mut [i16]) -> usize {
        let frames_out = (out.len() / CH).min(inner.count);
        if frames_out == 0 {
            return 0;
        }

        let first = frames_out.min(capacity - inner.read);
        let read = inner.read;
        out[..first * CH].copy_from_slice(&inner.buf[read * CH..(read + first) * CH]);
        let second = frames_out - first;
        if second > 0 {
            out[first * CH..frames_out * CH].copy_from_slice(&inner.buf[..second * CH]);
        }

        inner.read = (inner.read + frames_out) % capacity;
        inner.count -= frames_out;
        frames_out
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned ring only means a producer panicked mid-copy; the
        // cursor state is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn write_then_read_round_trips() {
        let ring = RingBuffer::new(8);
        let data: Vec<i16> = (0..12).collect();
        assert_eq!(ring.write(&data), 6);
        assert_eq!(ring.len(), 6);

        let mut out = vec![0i16; 12];
        assert_eq!(ring.read(&mut out), 6);
        assert_eq!(out, data);
        assert!(ring.is_empty());
    }

    #[test]
    fn write_is_bounded_by_free_space() {
        let ring = RingBuffer::new(4);
        let data = vec![1i16; 6 * 2];
        assert_eq!(ring.write(&data), 4);
        assert_eq!(ring.write(&data), 0);
    }

    #[test]
    fn wrap_around_preserves_order() {
        let ring = RingBuffer::new(4);
        let mut out = vec![0i16; 4];

        // Advance the cursors to force a wrap.
        assert_eq!(ring.write(&[1, 1, 2, 2, 3, 3]), 3);
        assert_eq!(ring.read(&mut out), 2);
        assert_eq!(out, [1, 1, 2, 2]);

        assert_eq!(ring.write(&[4, 4, 5, 5, 6, 6]), 3);
        let mut rest = vec![0i16; 8];
        assert_eq!(ring.read(&mut rest), 4);
        assert_eq!(rest, [3, 3, 4, 4, 5, 5, 6, 6]);
    }

    #[test]
    fn try_read_zero_pads_short_reads() {
        let ring = RingBuffer::new(8);
        ring.write(&[7, 7]);

        let mut out = vec![9i16; 8];
        assert_eq!(ring.try_read(&mut out), 1);
        assert_eq!(out, [7, 7, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn clear_empties_the_ring() {
        let ring = RingBuffer::new(8);
        ring.write(&[1i16; 8]);
        ring.clear();
        assert!(ring.is_empty());
        assert_eq!(ring.fill_level(), 0.0);
    }

    #[test]
    fn producer_consumer_totals_balance() {
        let ring = Arc::new(RingBuffer::new(256));
        let writer_ring = ring.clone();

        let writer = std::thread::spawn(move || {
            let mut produced = 0usize;
            let chunk: Vec<i16> = (0..64).collect();
            while produced < 10_000 {
                produced += writer_ring.write(&chunk[..(32.min(10_000 - produced)) * 2]);
            }
            produced
        });

        let mut consumed = 0usize;
        let mut out = vec![0i16; 128];
        while consumed < 10_000 {
            consumed += ring.read(&mut out);
        }

        assert_eq!(writer.join().unwrap(), 10_000);
        assert_eq!(consumed, 10_000);
        assert!(ring.is_empty());
    }
}
