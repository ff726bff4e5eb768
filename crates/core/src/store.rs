//! The ordered set of tracks. Pure data: mutating the store has no audio side effects.

use seq_transport::{AudioArc, Track, TrackColor, TrackId};

use crate::error::SessionError;

/// Arrangement duration when no clip extends past it.
pub const MIN_DURATION_SECS: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct TrackStore {
    tracks: Vec<Track>,
    next_id: u64,
    default_volume: f32,
    min_duration: f64,
}

impl Default for TrackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackStore {
    pub fn new() -> Self {
        Self::with_defaults(seq_transport::DEFAULT_VOLUME, MIN_DURATION_SECS)
    }

    pub fn with_defaults(default_volume: f32, min_duration: f64) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            default_volume,
            min_duration: min_duration.max(0.0),
        }
    }

    /// Append an empty track named `Track N`.
    pub fn add_track(&mut self) -> TrackId {
        let name = format!("Track {}", self.tracks.len() + 1);
        self.push(name, None)
    }

    /// Append a track already holding a clip.
    pub fn add_track_with_buffer(&mut self, name: impl Into<String>, buffer: AudioArc) -> TrackId {
        self.push(name.into(), Some(buffer))
    }

    fn push(&mut self, name: String, buffer: Option<AudioArc>) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id += 1;

        let mut track = Track::new(id, name, TrackColor::for_index(self.tracks.len()));
        track.set_volume(self.default_volume);
        track.set_buffer(buffer);
        self.tracks.push(track);
        id
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<Track, SessionError> {
        let index = self
            .tracks
            .iter()
            .position(|t| t.id() == id)
            .ok_or(SessionError::UnknownTrack(id))?;
        Ok(self.tracks.remove(index))
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id() == id)
    }

    fn update(&mut self, id: TrackId, f: impl FnOnce(&mut Track)) -> Result<&Track, SessionError> {
        let track = self
            .tracks
            .iter_mut()
            .find(|t| t.id() == id)
            .ok_or(SessionError::UnknownTrack(id))?;
        f(track);
        Ok(track)
    }

    pub fn rename(&mut self, id: TrackId, name: impl Into<String>) -> Result<(), SessionError> {
        let name = name.into();
        self.update(id, |t| t.name = name).map(drop)
    }

    /// Clamped to `[0, 1]`. Returns the applied value.
    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<f32, SessionError> {
        self.update(id, |t| t.set_volume(volume)).map(Track::volume)
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<(), SessionError> {
        self.update(id, |t| t.muted = muted).map(drop)
    }

    pub fn set_solo(&mut self, id: TrackId, solo: bool) -> Result<(), SessionError> {
        self.update(id, |t| t.solo = solo).map(drop)
    }

    pub fn set_buffer(&mut self, id: TrackId, buffer: Option<AudioArc>) -> Result<(), SessionError> {
        self.update(id, |t| t.set_buffer(buffer)).map(drop)
    }

    /// Clamped to `>= 0`. Returns the applied value.
    pub fn set_position(&mut self, id: TrackId, position: f64) -> Result<f64, SessionError> {
        self.update(id, |t| t.set_position(position)).map(Track::position)
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Tracks that hold a clip, i.e. the ones that can sound.
    pub fn audible(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(|t| t.has_buffer())
    }

    pub fn has_audio(&self) -> bool {
        self.audible().next().is_some()
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    fn last_clip_end(&self) -> Option<f64> {
        self.audible().filter_map(Track::end).reduce(f64::max)
    }

    /// Length of the arrangement, never shorter than the configured floor.
    pub fn arrangement_duration(&self) -> f64 {
        self.last_clip_end()
            .map_or(self.min_duration, |end| end.max(self.min_duration))
    }

    /// Where looped playback wraps: the end of the last clip, so trailing
    /// silence is never looped through. Falls back to the arrangement duration.
    pub fn loop_end_point(&self) -> f64 {
        self.last_clip_end()
            .unwrap_or_else(|| self.arrangement_duration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(seconds: f64) -> AudioArc {
        AudioArc::new(vec![0.0; (seconds * 100.0) as usize], 100, 1)
    }

    #[test]
    fn test_add_track_defaults() {
        let mut store = TrackStore::new();
        let a = store.add_track();
        let b = store.add_track();

        assert_ne!(a, b);
        let first = store.get(a).unwrap();
        assert_eq!(first.name, "Track 1");
        assert_eq!(first.color, TrackColor::Red);
        assert_eq!(first.volume(), 0.8);
        assert!(!first.has_buffer());
        assert_eq!(store.get(b).unwrap().color, TrackColor::Blue);
    }

    #[test]
    fn test_ids_are_never_reused() {
        let mut store = TrackStore::new();
        let a = store.add_track();
        store.remove_track(a).unwrap();
        let b = store.add_track();
        assert_ne!(a, b);
    }

    #[test]
    fn test_unknown_track_is_an_error() {
        let mut store = TrackStore::new();
        assert!(matches!(
            store.set_muted(TrackId(42), true),
            Err(SessionError::UnknownTrack(TrackId(42)))
        ));
        assert!(store.remove_track(TrackId(42)).is_err());
    }

    #[test]
    fn test_mutations_clamp() {
        let mut store = TrackStore::new();
        let id = store.add_track();
        assert_eq!(store.set_volume(id, 3.0).unwrap(), 1.0);
        assert_eq!(store.set_position(id, -1.0).unwrap(), 0.0);
        store.rename(id, "Drums").unwrap();
        assert_eq!(store.get(id).unwrap().name, "Drums");
    }

    #[test]
    fn test_duration_and_loop_end() {
        // BPM is irrelevant here: the floor applies, loop end follows the clips
        let mut store = TrackStore::new();
        store.add_track_with_buffer("a", clip(4.0));
        let b = store.add_track_with_buffer("b", clip(4.0));
        store.set_position(b, 2.0).unwrap();

        assert_eq!(store.arrangement_duration(), 60.0);
        assert_eq!(store.loop_end_point(), 6.0);
    }

    #[test]
    fn test_long_clip_extends_duration() {
        let mut store = TrackStore::new();
        let id = store.add_track_with_buffer("long", clip(50.0));
        store.set_position(id, 30.0).unwrap();
        assert_eq!(store.arrangement_duration(), 80.0);
        assert_eq!(store.loop_end_point(), 80.0);
    }

    #[test]
    fn test_empty_tracks_do_not_count() {
        let mut store = TrackStore::new();
        let id = store.add_track();
        store.set_position(id, 100.0).unwrap();
        assert!(!store.has_audio());
        assert_eq!(store.arrangement_duration(), 60.0);
        assert_eq!(store.loop_end_point(), 60.0);
    }

    #[test]
    fn test_removing_all_tracks_resets_to_floor() {
        let mut store = TrackStore::new();
        let a = store.add_track_with_buffer("a", clip(90.0));
        assert_eq!(store.arrangement_duration(), 90.0);
        store.remove_track(a).unwrap();
        assert_eq!(store.arrangement_duration(), 60.0);
        assert_eq!(store.loop_end_point(), 60.0);
    }
}
