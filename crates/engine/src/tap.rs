//! Metering taps written by the render thread and read by the control thread.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Frames kept by each tap.
pub const TAP_WINDOW: usize = 256;

/// Unsigned byte value that represents a zero-amplitude sample.
pub const SILENCE_BYTE: u8 = 128;

/// Ring of the most recent post-gain samples of one chain, stored as unsigned
/// bytes centred on [`SILENCE_BYTE`].
///
/// Reads and writes are lock-free. A reader may observe a window that is being
/// overwritten; for metering a slightly torn window is harmless.
pub struct AnalyserTap {
    window: Box<[AtomicU8]>,
    head: AtomicUsize,
}

impl AnalyserTap {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            window: (0..len).map(|_| AtomicU8::new(SILENCE_BYTE)).collect(),
            head: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub(crate) fn push(&self, sample: f32) {
        let head = self.head.load(Ordering::Relaxed);
        self.window[head].store(sample_to_byte(sample), Ordering::Relaxed);
        self.head.store((head + 1) % self.window.len(), Ordering::Release);
    }

    /// Copy the window, oldest sample first, into `out`.
    pub fn snapshot(&self, out: &mut Vec<u8>) {
        out.clear();
        let head = self.head.load(Ordering::Acquire);
        let len = self.window.len();
        out.extend((0..len).map(|i| self.window[(head + i) % len].load(Ordering::Relaxed)));
    }
}

/// `128 * (1 + sample)`, saturating at the byte range.
#[inline]
pub fn sample_to_byte(sample: f32) -> u8 {
    (128.0 * (1.0 + sample)).clamp(0.0, 255.0) as u8
}

/// Inverse of [`sample_to_byte`], mapping back into `[-1, 1)`.
#[inline]
pub fn byte_to_amplitude(byte: u8) -> f32 {
    (byte as f32 - 128.0) / 128.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_tap_is_silent() {
        let tap = AnalyserTap::new(8);
        let mut out = Vec::new();
        tap.snapshot(&mut out);
        assert_eq!(out, vec![SILENCE_BYTE; 8]);
    }

    #[test]
    fn test_snapshot_is_oldest_first() {
        let tap = AnalyserTap::new(4);
        for s in [0.0, 0.25, 0.5, -0.5, -1.0] {
            tap.push(s);
        }
        let mut out = Vec::new();
        tap.snapshot(&mut out);
        // 0.0 was overwritten by -1.0
        assert_eq!(out, vec![160, 192, 64, 0]);
    }

    #[test]
    fn test_byte_conversion_saturates() {
        assert_eq!(sample_to_byte(2.0), 255);
        assert_eq!(sample_to_byte(-2.0), 0);
        assert_eq!(byte_to_amplitude(SILENCE_BYTE), 0.0);
        assert_eq!(byte_to_amplitude(0), -1.0);
    }
}
