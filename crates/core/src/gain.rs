//! Effective gain from mute, solo and volume.
//!
//! Effective gain is never stored. It is derived from the store every time it
//! is needed, so it cannot drift from the track attributes.

use std::collections::HashMap;

use seq_transport::{Track, TrackId};

/// Gain for `track` given whether any track in the arrangement is soloed.
pub fn effective_gain(track: &Track, any_solo: bool) -> f32 {
    if track.muted || (any_solo && !track.solo) {
        0.0
    } else {
        track.volume()
    }
}

/// Effective gain of every track. Solo is global, so all tracks are resolved together.
pub fn resolve<'a>(tracks: impl IntoIterator<Item = &'a Track>) -> HashMap<TrackId, f32> {
    let tracks: Vec<&Track> = tracks.into_iter().collect();
    let any_solo = tracks.iter().any(|t| t.solo);
    tracks
        .into_iter()
        .map(|t| (t.id(), effective_gain(t, any_solo)))
        .collect()
}
