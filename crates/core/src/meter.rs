//! Per-track loudness from the analyser taps. Read-only: nothing here feeds
//! back into playback or gain.

use std::collections::HashMap;

use seq_engine::{AudioGraph, Backend, byte_to_amplitude};
use seq_transport::TrackId;

pub const DEFAULT_EVERY: u32 = 3;
pub const DEFAULT_HEADROOM: f32 = 4.0;

/// RMS of a tap window mapped back to `[-1, 1]`, scaled by `headroom` and
/// clamped to `[0, 1]`.
pub fn rms_level(window: &[u8], headroom: f32) -> f32 {
    if window.is_empty() {
        return 0.0;
    }
    let sum: f32 = window
        .iter()
        .map(|b| {
            let a = byte_to_amplitude(*b);
            a * a
        })
        .sum();
    let rms = (sum / window.len() as f32).sqrt();
    (rms * headroom).clamp(0.0, 1.0)
}

pub struct LoudnessMeter {
    every: u32,
    headroom: f32,
    ticks: u32,
    levels: HashMap<TrackId, f32>,
    scratch: Vec<u8>,
}

impl Default for LoudnessMeter {
    fn default() -> Self {
        Self::new(DEFAULT_EVERY, DEFAULT_HEADROOM)
    }
}

impl LoudnessMeter {
    /// Samples on every `every`-th tick.
    pub fn new(every: u32, headroom: f32) -> Self {
        Self {
            every: every.max(1),
            headroom,
            ticks: 0,
            levels: HashMap::new(),
            scratch: Vec::new(),
        }
    }

    /// Count a tick and resample the taps when it is due. Returns whether levels changed.
    pub fn tick<B: Backend>(&mut self, graph: &AudioGraph<B>) -> bool {
        self.ticks += 1;
        if self.ticks < self.every {
            return false;
        }
        self.ticks = 0;
        self.sample(graph);
        true
    }

    /// Read every live chain's tap now. A track sounding on two passes during
    /// a loop wrap reports the louder one.
    pub fn sample<B: Backend>(&mut self, graph: &AudioGraph<B>) {
        self.levels.clear();
        for (id, info) in graph.chains() {
            let Some(tap) = info.tap() else {
                continue;
            };
            tap.snapshot(&mut self.scratch);
            let level = rms_level(&self.scratch, self.headroom);
            let entry = self.levels.entry(id.track).or_insert(0.0);
            *entry = entry.max(level);
        }
    }

    /// `None` when the track has no live chain.
    pub fn level(&self, track: TrackId) -> Option<f32> {
        self.levels.get(&track).copied()
    }

    pub fn levels(&self) -> &HashMap<TrackId, f32> {
        &self.levels
    }

    pub fn clear(&mut self) {
        self.levels.clear();
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seq_engine::{ChainId, OfflineBackend};
    use seq_transport::AudioArc;

    #[test]
    fn test_rms_of_silence_and_full_scale() {
        assert_eq!(rms_level(&[128; 64], 4.0), 0.0);
        assert_eq!(rms_level(&[], 4.0), 0.0);
        // 0 maps to -1.0: full scale, clamped after headroom
        assert_eq!(rms_level(&[0; 64], 4.0), 1.0);
    }

    #[test]
    fn test_rms_is_scaled_by_headroom() {
        // 144 maps to 0.125, times 4 is 0.5
        let level = rms_level(&[144; 32], 4.0);
        assert!((level - 0.5).abs() < 1e-6);
        let level = rms_level(&[144, 112].repeat(16), 1.0);
        assert!((level - 0.125).abs() < 1e-6);
    }

    #[test]
    fn test_meter_is_throttled_and_tracks_live_chains() {
        let mut graph = AudioGraph::new(OfflineBackend::new(1000, 1));
        let audio = AudioArc::new(vec![0.125; 1000], 1000, 1);
        graph
            .start_chain(ChainId::new(TrackId(1), 0), &audio, 0.0, 1.0, None)
            .unwrap();
        graph.backend_mut().advance(0.5);

        let mut meter = LoudnessMeter::new(3, 4.0);
        assert!(!meter.tick(&graph));
        assert!(!meter.tick(&graph));
        assert_eq!(meter.level(TrackId(1)), None);
        assert!(meter.tick(&graph));

        let level = meter.level(TrackId(1)).unwrap();
        assert!((level - 0.5).abs() < 0.01);
        assert_eq!(meter.level(TrackId(2)), None);

        graph.stop_all();
        meter.sample(&graph);
        assert_eq!(meter.level(TrackId(1)), None);
    }
}
