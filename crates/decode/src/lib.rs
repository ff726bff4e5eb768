//! Turns encoded audio (WAV, FLAC, Ogg, MP3, ...) into an [`AudioArc`].
//!
//! Decoding is the only place raw bytes enter the sequencer. A failure here is
//! never fatal to a session: the caller keeps the affected track without a
//! buffer and reports the error.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use seq_transport::AudioArc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unsupported or corrupt audio: {0}")]
    Format(#[from] SymphoniaError),

    #[error("no decodable audio track")]
    NoTrack,

    #[error("audio contains no samples")]
    Empty,

    #[error("failed to resample to {target} Hz: {source}")]
    Resample {
        target: u32,
        source: anyhow::Error,
    },
}

/// Decode an in-memory file. `extension` is only a probing hint.
pub fn decode_bytes(bytes: Vec<u8>, extension: Option<&str>) -> Result<AudioArc, DecodeError> {
    decode_source(Box::new(Cursor::new(bytes)), extension)
}

/// Decode in-memory bytes and bring them to `sample_rate` (usually the output device rate).
pub fn decode_bytes_at(
    bytes: Vec<u8>,
    extension: Option<&str>,
    sample_rate: u32,
) -> Result<AudioArc, DecodeError> {
    let audio = decode_bytes(bytes, extension)?;
    conform(audio, sample_rate)
}

pub fn decode_file(path: &Path) -> Result<AudioArc, DecodeError> {
    let file = File::open(path)?;
    let extension = path.extension().and_then(|e| e.to_str());
    decode_source(Box::new(file), extension)
}

/// Resample `audio` unless it already runs at `sample_rate`.
pub fn conform(audio: AudioArc, sample_rate: u32) -> Result<AudioArc, DecodeError> {
    if audio.sample_rate() == sample_rate {
        return Ok(audio);
    }
    debug!(from = audio.sample_rate(), to = sample_rate, "resampling clip");
    audio
        .resample(sample_rate)
        .map_err(|source| DecodeError::Resample {
            target: sample_rate,
            source,
        })
}

fn decode_source(
    source: Box<dyn MediaSource>,
    extension: Option<&str>,
) -> Result<AudioArc, DecodeError> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;

    let track = format.default_track().ok_or(DecodeError::NoTrack)?;

    let mut sample_rate = track.codec_params.sample_rate;
    let mut channels = track.codec_params.channels.map(|c| c.count() as u16);
    let track_id = track.id;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                // a single corrupt packet is skipped, not fatal
                warn!(reason, "skipping undecodable packet");
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        sample_rate.get_or_insert(spec.rate);
        channels.get_or_insert(spec.channels.count() as u16);

        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        sample_buf.copy_interleaved_ref(decoded);
        samples.extend_from_slice(sample_buf.samples());
    }

    let (Some(sample_rate), Some(channels)) = (sample_rate, channels) else {
        return Err(DecodeError::NoTrack);
    };
    if samples.is_empty() || channels == 0 {
        return Err(DecodeError::Empty);
    }

    // a truncated final packet can leave a partial frame
    let whole = samples.len() - samples.len() % channels as usize;
    samples.truncate(whole);

    debug!(
        frames = samples.len() / channels as usize,
        sample_rate, channels, "decoded clip"
    );
    Ok(AudioArc::new(samples, sample_rate, channels))
}
