use std::fmt;
use std::sync::Arc;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

/// Volume given to freshly created tracks.
pub const DEFAULT_VOLUME: f32 = 0.8;

/// Shared, immutable decoded audio.
///
/// Cloning only bumps a reference count, so the same clip can be bound to any
/// number of render chains without copying samples.
///
/// ```
/// use seq_transport::AudioArc;
///
/// let audio = AudioArc::new(vec![0.0, 0.5, 1.0, 0.5], 44100, 2);
/// let shared = audio.clone();
/// assert_eq!(shared.frames(), 2);
/// ```
#[derive(Clone)]
pub struct AudioArc {
    /// Interleaved samples, `[L, R, L, R, ...]` for stereo.
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioArc {
    /// # Panics
    ///
    /// Panics if `channels` is 0 or if `samples.len()` is not divisible by `channels`.
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        assert!(channels > 0, "channels must be greater than 0");
        assert_eq!(
            samples.len() % channels as usize,
            0,
            "samples.len() must be divisible by channels"
        );
        Self {
            samples: Arc::from(samples),
            sample_rate,
            channels,
        }
    }

    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_arc(&self) -> &Arc<[f32]> {
        &self.samples
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of frames (samples per channel).
    #[inline]
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Resample to `target_sample_rate`. Already matching audio is returned as a cheap clone.
    pub fn resample(&self, target_sample_rate: u32) -> anyhow::Result<Self> {
        if self.sample_rate == target_sample_rate {
            return Ok(self.clone());
        }
        resample_audio_arc(self, target_sample_rate)
    }
}

impl fmt::Debug for AudioArc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioArc")
            .field("frames", &self.frames())
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("duration_secs", &self.duration_secs())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track-{}", self.0)
    }
}

/// Presentation tag carried for UI consumers. The engine never reads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackColor {
    Red,
    Blue,
    Green,
    Yellow,
    Purple,
    Pink,
    Indigo,
    Orange,
}

impl TrackColor {
    pub const PALETTE: [TrackColor; 8] = [
        TrackColor::Red,
        TrackColor::Blue,
        TrackColor::Green,
        TrackColor::Yellow,
        TrackColor::Purple,
        TrackColor::Pink,
        TrackColor::Indigo,
        TrackColor::Orange,
    ];

    /// Palette entry for the `index`-th track, wrapping around.
    pub fn for_index(index: usize) -> Self {
        Self::PALETTE[index % Self::PALETTE.len()]
    }
}

/// One arrangement lane holding at most one clip.
///
/// `volume` and `position` are only reachable through setters so that the
/// `[0, 1]` and `>= 0` bounds always hold.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    pub name: String,
    pub color: TrackColor,
    pub muted: bool,
    pub solo: bool,
    buffer: Option<AudioArc>,
    volume: f32,
    /// Arrangement time in seconds where sample 0 of the clip sounds.
    position: f64,
}

impl Track {
    pub fn new(id: TrackId, name: String, color: TrackColor) -> Self {
        Self {
            id,
            name,
            color,
            muted: false,
            solo: false,
            buffer: None,
            volume: DEFAULT_VOLUME,
            position: 0.0,
        }
    }

    #[inline]
    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn buffer(&self) -> Option<&AudioArc> {
        self.buffer.as_ref()
    }

    pub fn set_buffer(&mut self, buffer: Option<AudioArc>) {
        self.buffer = buffer;
    }

    pub fn has_buffer(&self) -> bool {
        self.buffer.is_some()
    }

    #[inline]
    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Clamps to `[0, 1]`; NaN becomes silence.
    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
    }

    #[inline]
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Clamps to `>= 0`; NaN resets to the arrangement start.
    pub fn set_position(&mut self, position: f64) {
        self.position = if position.is_nan() {
            0.0
        } else {
            position.max(0.0)
        };
    }

    /// Length of the clip in seconds, if there is one.
    pub fn duration(&self) -> Option<f64> {
        self.buffer.as_ref().map(AudioArc::duration_secs)
    }

    /// Arrangement time at which the clip stops sounding.
    pub fn end(&self) -> Option<f64> {
        self.duration().map(|d| self.position + d)
    }
}

/// Resample with sinc interpolation, keeping the channel layout.
pub fn resample_audio_arc(audio: &AudioArc, target_sample_rate: u32) -> anyhow::Result<AudioArc> {
    if audio.sample_rate == target_sample_rate {
        return Ok(audio.clone());
    }

    let channels = audio.channels as usize;
    let input_frames = audio.frames();
    if input_frames == 0 {
        return Ok(AudioArc::new(Vec::new(), target_sample_rate, audio.channels));
    }

    let resample_ratio = target_sample_rate as f64 / audio.sample_rate as f64;

    // rubato works on planar data
    let mut planar = vec![Vec::with_capacity(input_frames); channels];
    for frame in audio.samples().chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler =
        SincFixedIn::<f32>::new(resample_ratio, 2.0, params, input_frames, channels)?;
    let output = resampler.process(&planar, None)?;

    let output_frames = output[0].len();
    let mut interleaved = Vec::with_capacity(output_frames * channels);
    for frame_idx in 0..output_frames {
        for plane in &output {
            interleaved.push(plane[frame_idx]);
        }
    }

    Ok(AudioArc::new(
        interleaved,
        target_sample_rate,
        audio.channels,
    ))
}
