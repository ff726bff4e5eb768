//! Arrangement-time math: beats, bars, zoom and snap-to-grid.
//!
//! BPM never changes playback speed. It only defines the beat grid that
//! positions snap to and that the bar ruler is drawn from.

pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 300.0;
pub const DEFAULT_BPM: f64 = 140.0;

/// Zoom is measured in pixels per second of arrangement time.
pub const MIN_ZOOM: f64 = 10.0;
pub const MAX_ZOOM: f64 = 100.0;
pub const DEFAULT_ZOOM: f64 = 50.0;

pub fn clamp_bpm(bpm: f64) -> f64 {
    if bpm.is_nan() {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

pub fn clamp_zoom(zoom: f64) -> f64 {
    if zoom.is_nan() {
        return DEFAULT_ZOOM;
    }
    zoom.clamp(MIN_ZOOM, MAX_ZOOM)
}

/// Seconds per beat.
#[inline]
pub fn beat_duration(bpm: f64) -> f64 {
    60.0 / bpm
}

#[inline]
pub fn pixels_to_seconds(delta_pixels: f64, zoom: f64) -> f64 {
    delta_pixels / zoom
}

#[inline]
pub fn seconds_to_pixels(seconds: f64, zoom: f64) -> f64 {
    seconds * zoom
}

/// Quantize to the nearest beat boundary.
///
/// ```
/// use seq_core::time::snap;
///
/// // 2.3s at 120 BPM is 4.6 beats, which rounds to 5 beats
/// assert_eq!(snap(2.3, 120.0), 2.5);
/// ```
pub fn snap(position: f64, bpm: f64) -> f64 {
    let beat = beat_duration(bpm);
    (position / beat).round() * beat
}

/// `m:ss`, truncating fractional seconds.
pub fn format_time(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl TimeSignature {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.numerator.max(1)
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self::new(4, 4)
    }
}

impl From<(u32, u32)> for TimeSignature {
    fn from((numerator, denominator): (u32, u32)) -> Self {
        Self::new(numerator, denominator)
    }
}

/// Tempo, meter and zoom of the arrangement view.
#[derive(Debug, Clone, Copy)]
pub struct TimeContext {
    bpm: f64,
    zoom: f64,
    pub time_signature: TimeSignature,
}

impl TimeContext {
    pub fn new(bpm: f64, zoom: f64, time_signature: impl Into<TimeSignature>) -> Self {
        Self {
            bpm: clamp_bpm(bpm),
            zoom: clamp_zoom(zoom),
            time_signature: time_signature.into(),
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    /// Returns the value actually applied.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        self.bpm = clamp_bpm(bpm);
        self.bpm
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn set_zoom(&mut self, zoom: f64) -> f64 {
        self.zoom = clamp_zoom(zoom);
        self.zoom
    }

    pub fn beat_duration(&self) -> f64 {
        beat_duration(self.bpm)
    }

    pub fn bar_duration(&self) -> f64 {
        self.beat_duration() * self.time_signature.beats_per_bar() as f64
    }

    pub fn pixels_to_seconds(&self, delta_pixels: f64) -> f64 {
        pixels_to_seconds(delta_pixels, self.zoom)
    }

    pub fn seconds_to_pixels(&self, seconds: f64) -> f64 {
        seconds_to_pixels(seconds, self.zoom)
    }

    pub fn snap(&self, position: f64) -> f64 {
        snap(position, self.bpm)
    }

    /// Zero-based index of the beat containing `seconds`.
    pub fn beat_index(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) / self.beat_duration()).floor() as u64
    }

    /// Start times of every bar needed to cover `duration`, plus one trailing bar.
    pub fn bar_starts(&self, duration: f64) -> impl Iterator<Item = f64> + use<> {
        let bar = self.bar_duration();
        let count = (duration.max(0.0) / bar).floor() as u64 + 2;
        (0..count).map(move |i| i as f64 * bar)
    }
}

impl Default for TimeContext {
    fn default() -> Self {
        Self::new(DEFAULT_BPM, DEFAULT_ZOOM, TimeSignature::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snap_nearest_beat() {
        // 120 BPM, 0.5s beats: 2.3s -> 4.6 beats -> 5 beats
        assert_eq!(snap(2.3, 120.0), 2.5);
        assert_eq!(snap(2.2, 120.0), 2.0);
        assert_eq!(snap(0.0, 140.0), 0.0);
    }

    #[test]
    fn test_snap_is_idempotent() {
        for bpm in (40..=300).step_by(7) {
            let bpm = bpm as f64;
            for i in 0..200 {
                let x = i as f64 * 0.137;
                let once = snap(x, bpm);
                let twice = snap(once, bpm);
                assert!(
                    (once - twice).abs() < 1e-9,
                    "snap not idempotent at x={x} bpm={bpm}: {once} vs {twice}"
                );
            }
        }
    }

    #[test]
    fn test_pixel_conversion() {
        assert_eq!(pixels_to_seconds(100.0, 50.0), 2.0);
        assert_eq!(pixels_to_seconds(-25.0, 50.0), -0.5);
        assert_eq!(seconds_to_pixels(2.0, 50.0), 100.0);
    }

    #[test]
    fn test_bpm_and_zoom_are_clamped() {
        let mut ctx = TimeContext::default();
        assert_eq!(ctx.set_bpm(20.0), MIN_BPM);
        assert_eq!(ctx.set_bpm(301.0), MAX_BPM);
        assert_eq!(ctx.set_bpm(f64::NAN), DEFAULT_BPM);
        assert_eq!(ctx.set_zoom(1.0), MIN_ZOOM);
        assert_eq!(ctx.set_zoom(500.0), MAX_ZOOM);
    }

    #[test]
    fn test_bar_grid() {
        let ctx = TimeContext::new(120.0, 50.0, (4, 4));
        assert_eq!(ctx.bar_duration(), 2.0);
        let bars: Vec<f64> = ctx.bar_starts(5.0).collect();
        assert_eq!(bars, vec![0.0, 2.0, 4.0, 6.0]);
        assert_eq!(ctx.beat_index(1.25), 2);
    }

    #[test]
    fn test_format_time() {
        assert_eq!(format_time(0.0), "0:00");
        assert_eq!(format_time(59.9), "0:59");
        assert_eq!(format_time(61.0), "1:01");
        assert_eq!(format_time(-3.0), "0:00");
    }
}
