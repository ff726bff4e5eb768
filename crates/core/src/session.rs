use std::path::Path;

use seq_engine::{AudioGraph, Backend};
use seq_transport::{AudioArc, Track, TrackId};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::drag::{Drag, DragPreview};
use crate::error::SessionError;
use crate::gain;
use crate::meter::LoudnessMeter;
use crate::scheduler::Transport;
use crate::store::TrackStore;
use crate::time::{TimeContext, TimeSignature};

/// The arrangement, its transport and the audio graph behind it.
///
/// Every mutation goes through here so that audio side effects (gain
/// updates, chain restarts) follow the store changes that cause them.
pub struct Session<B: Backend> {
    store: TrackStore,
    graph: AudioGraph<B>,
    transport: Transport,
    meter: LoudnessMeter,
    time: TimeContext,
    drag: Option<Drag>,
    snap_to_grid: bool,
}

impl<B: Backend> Session<B> {
    pub fn new(backend: B, config: &SessionConfig) -> Self {
        let graph = AudioGraph::new(backend);
        info!(sample_rate = graph.sample_rate(), bpm = config.bpm, "session started");

        Self {
            store: TrackStore::with_defaults(config.default_volume, config.min_duration_secs),
            graph,
            transport: Transport::new(
                config.loop_enabled,
                config.loop_lookahead_secs,
                config.loop_overlap_secs,
            ),
            meter: LoudnessMeter::new(config.meter_every_ticks, config.meter_headroom),
            time: TimeContext::new(config.bpm, config.zoom, TimeSignature::default()),
            drag: None,
            snap_to_grid: config.snap_to_grid,
        }
    }

    // Track store

    pub fn add_track(&mut self) -> TrackId {
        self.store.add_track()
    }

    /// Decode `bytes` into a new track named `name`.
    pub fn add_clip(
        &mut self,
        name: impl Into<String>,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<TrackId, SessionError> {
        let audio = seq_decode::decode_bytes_at(bytes, extension, self.graph.sample_rate())?;
        Ok(self.store.add_track_with_buffer(name, audio))
    }

    /// Decode `bytes` into an existing track, renaming it to `name`.
    ///
    /// On a decode failure the track is left exactly as it was.
    pub fn load_clip(
        &mut self,
        id: TrackId,
        name: impl Into<String>,
        bytes: Vec<u8>,
        extension: Option<&str>,
    ) -> Result<(), SessionError> {
        if self.store.get(id).is_none() {
            return Err(SessionError::UnknownTrack(id));
        }
        let audio = seq_decode::decode_bytes_at(bytes, extension, self.graph.sample_rate())
            .inspect_err(|err| warn!(track = %id, %err, "clip not loaded"))?;
        self.store.rename(id, name)?;
        self.set_buffer(id, Some(audio))
    }

    /// Decode a file into an existing track named after the file stem.
    pub fn load_file(&mut self, id: TrackId, path: &Path) -> Result<(), SessionError> {
        if self.store.get(id).is_none() {
            return Err(SessionError::UnknownTrack(id));
        }
        let audio = seq_decode::decode_file(path)
            .and_then(|audio| seq_decode::conform(audio, self.graph.sample_rate()))
            .inspect_err(|err| warn!(track = %id, path = %path.display(), %err, "clip not loaded"))?;
        if let Some(stem) = path.file_stem() {
            self.store.rename(id, stem.to_string_lossy())?;
        }
        self.set_buffer(id, Some(audio))
    }

    pub fn set_buffer(&mut self, id: TrackId, buffer: Option<AudioArc>) -> Result<(), SessionError> {
        self.store.set_buffer(id, buffer)?;
        self.transport.reconcile_track(&self.store, &mut self.graph, id);
        Ok(())
    }

    pub fn remove_track(&mut self, id: TrackId) -> Result<Track, SessionError> {
        let track = self.store.remove_track(id)?;
        self.transport.forget_track(&mut self.graph, id);
        if self.drag.is_some_and(|d| d.track() == id) {
            self.drag = None;
        }
        // removing the only soloed track un-silences the rest
        self.transport.apply_gains(&self.store, &mut self.graph);
        debug!(track = %id, "track removed");
        Ok(track)
    }

    pub fn rename(&mut self, id: TrackId, name: impl Into<String>) -> Result<(), SessionError> {
        self.store.rename(id, name)
    }

    pub fn set_volume(&mut self, id: TrackId, volume: f32) -> Result<f32, SessionError> {
        let volume = self.store.set_volume(id, volume)?;
        self.transport.apply_gains(&self.store, &mut self.graph);
        Ok(volume)
    }

    pub fn set_muted(&mut self, id: TrackId, muted: bool) -> Result<(), SessionError> {
        self.store.set_muted(id, muted)?;
        self.transport.apply_gains(&self.store, &mut self.graph);
        Ok(())
    }

    pub fn set_solo(&mut self, id: TrackId, solo: bool) -> Result<(), SessionError> {
        self.store.set_solo(id, solo)?;
        self.transport.apply_gains(&self.store, &mut self.graph);
        Ok(())
    }

    /// Move a clip outside of a drag. Not snapped.
    pub fn set_position(&mut self, id: TrackId, seconds: f64) -> Result<f64, SessionError> {
        let position = self.store.set_position(id, seconds)?;
        self.transport.reconcile_track(&self.store, &mut self.graph, id);
        Ok(position)
    }

    // Drag protocol

    pub fn begin_drag(&mut self, id: TrackId, pointer_x: f64) -> Result<(), SessionError> {
        let track = self.store.get(id).ok_or(SessionError::UnknownTrack(id))?;
        self.drag = Some(Drag::begin(id, pointer_x, track.position()));
        Ok(())
    }

    /// Apply the unsnapped position live. Chains are not restarted mid-drag.
    pub fn update_drag(&mut self, pointer_x: f64) -> Result<f64, SessionError> {
        let drag = self.drag.as_mut().ok_or(SessionError::NoDrag)?;
        let raw = drag.update(pointer_x, self.time.zoom());
        let track = drag.track();
        self.store.set_position(track, raw)
    }

    /// Commit the drag, snapped to the beat grid when snapping is on.
    pub fn end_drag(&mut self, pointer_x: f64) -> Result<f64, SessionError> {
        let mut drag = self.drag.take().ok_or(SessionError::NoDrag)?;
        let raw = drag.update(pointer_x, self.time.zoom());
        let target = if self.snap_to_grid {
            self.time.snap(raw)
        } else {
            raw
        };
        let position = self.store.set_position(drag.track(), target)?;
        self.transport
            .reconcile_track(&self.store, &mut self.graph, drag.track());
        debug!(track = %drag.track(), raw, position, "drag committed");
        Ok(position)
    }

    // Transport

    pub fn play(&mut self) -> Result<(), SessionError> {
        self.transport.play(&self.store, &mut self.graph)
    }

    pub fn pause(&mut self) {
        self.transport.pause(&mut self.graph);
        self.meter.clear();
    }

    pub fn stop(&mut self) {
        self.transport.stop(&mut self.graph);
        self.meter.clear();
    }

    pub fn seek(&mut self, seconds: f64) {
        self.transport.seek(&self.store, &mut self.graph, seconds);
    }

    /// Completes a play request deferred by a suspended device.
    pub fn resume_device(&mut self) -> Result<bool, SessionError> {
        self.transport.resume_device(&self.store, &mut self.graph)
    }

    /// Clamped to `[40, 300]`. Playback speed is unaffected; a running
    /// transport restarts at the same cursor.
    pub fn set_bpm(&mut self, bpm: f64) -> f64 {
        let bpm = self.time.set_bpm(bpm);
        self.transport.restart(&self.store, &mut self.graph);
        debug!(bpm, "bpm changed");
        bpm
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.transport.set_loop(&mut self.graph, enabled);
    }

    pub fn set_zoom(&mut self, zoom: f64) -> f64 {
        self.time.set_zoom(zoom)
    }

    pub fn set_snap_to_grid(&mut self, enabled: bool) {
        self.snap_to_grid = enabled;
    }

    /// Advance the transport and the meter. Call once per display refresh.
    pub fn tick(&mut self) -> f64 {
        let cursor = self.transport.tick(&self.store, &mut self.graph);
        if self.transport.is_playing() {
            self.meter.tick(&self.graph);
        } else {
            self.meter.clear();
        }
        cursor
    }

    // Read model

    pub fn cursor(&self) -> f64 {
        self.transport.cursor()
    }

    pub fn duration(&self) -> f64 {
        self.store.arrangement_duration()
    }

    pub fn loop_end(&self) -> f64 {
        self.store.loop_end_point()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// A play request is waiting on [`Session::resume_device`].
    pub fn needs_user_gesture(&self) -> bool {
        self.transport.is_deferred()
    }

    pub fn can_play(&self) -> bool {
        self.store.has_audio()
    }

    pub fn can_stop(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn loop_enabled(&self) -> bool {
        self.transport.loop_enabled()
    }

    pub fn snap_to_grid(&self) -> bool {
        self.snap_to_grid
    }

    pub fn bpm(&self) -> f64 {
        self.time.bpm()
    }

    pub fn zoom(&self) -> f64 {
        self.time.zoom()
    }

    pub fn time(&self) -> &TimeContext {
        &self.time
    }

    pub fn tracks(&self) -> &[Track] {
        self.store.tracks()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.store.get(id)
    }

    pub fn effective_gain(&self, id: TrackId) -> Option<f32> {
        let track = self.store.get(id)?;
        Some(gain::effective_gain(track, self.store.any_solo()))
    }

    /// Loudness in `[0, 1]`; 0 when the track is not sounding.
    pub fn level(&self, id: TrackId) -> f32 {
        self.meter.level(id).unwrap_or(0.0)
    }

    pub fn drag_preview(&self) -> Option<DragPreview> {
        self.drag.map(|d| d.preview(self.time.bpm()))
    }

    pub fn graph(&self) -> &AudioGraph<B> {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut AudioGraph<B> {
        &mut self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use seq_engine::{ChainId, OfflineBackend};

    const RATE: u32 = 1000;
    const TICK: f64 = 0.016;

    fn session() -> Session<OfflineBackend> {
        Session::new(OfflineBackend::new(RATE, 1), &SessionConfig::default())
    }

    fn clip(seconds: f64) -> AudioArc {
        AudioArc::new(vec![0.25; (seconds * RATE as f64) as usize], RATE, 1)
    }

    fn with_clip(session: &mut Session<OfflineBackend>, position: f64, seconds: f64) -> TrackId {
        let id = session.add_track();
        session.set_buffer(id, Some(clip(seconds))).unwrap();
        session.set_position(id, position).unwrap();
        id
    }

    fn run(session: &mut Session<OfflineBackend>, seconds: f64) {
        for _ in 0..(seconds / TICK).round() as usize {
            session.graph_mut().backend_mut().advance(TICK);
            session.tick();
        }
    }

    #[test]
    fn test_defaults_follow_config() {
        let session = session();
        assert_eq!(session.bpm(), 140.0);
        assert_eq!(session.zoom(), 50.0);
        assert!(session.loop_enabled());
        assert!(session.snap_to_grid());
        assert!(!session.can_play());
        assert!(!session.can_stop());
        assert_eq!(session.duration(), 60.0);
    }

    #[test]
    fn test_arrangement_scenario() {
        let mut session = session();
        with_clip(&mut session, 0.0, 4.0);
        with_clip(&mut session, 2.0, 4.0);
        assert_eq!(session.duration(), 60.0);
        assert_eq!(session.loop_end(), 6.0);
        assert!(session.can_play());
    }

    #[test]
    fn test_solo_scenario_updates_live_gain() {
        let mut session = session();
        let a = with_clip(&mut session, 0.0, 4.0);
        let b = with_clip(&mut session, 0.0, 4.0);
        session.set_volume(b, 0.5).unwrap();
        session.play().unwrap();

        session.set_solo(a, true).unwrap();
        assert_eq!(session.effective_gain(a), Some(0.8));
        assert_eq!(session.effective_gain(b), Some(0.0));
        assert_eq!(session.graph().chain(ChainId::new(b, 0)).map(|c| c.gain), Some(0.0));

        session.set_solo(a, false).unwrap();
        assert_eq!(session.effective_gain(b), Some(0.5));
        assert_eq!(session.graph().chain(ChainId::new(b, 0)).map(|c| c.gain), Some(0.5));
    }

    #[test]
    fn test_mute_silences_output() {
        let mut session = session();
        let a = with_clip(&mut session, 0.0, 4.0);
        session.play().unwrap();
        session.set_muted(a, true).unwrap();

        let out = session.graph_mut().backend_mut().advance(0.1);
        assert!(out.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_bpm_change_keeps_cursor_and_speed() {
        let mut session = session();
        let a = with_clip(&mut session, 0.0, 4.0);
        session.play().unwrap();
        run(&mut session, 1.008);
        let before = session.cursor();

        assert_eq!(session.set_bpm(90.0), 90.0);
        assert!(session.is_playing());
        assert_eq!(session.cursor(), before);
        let (_, info) = session.graph().chains_for(a).next().unwrap();
        assert!((info.offset - before).abs() < 1e-9);

        // cursor still moves one second per second
        run(&mut session, 0.496);
        assert!((session.cursor() - (before + 0.496)).abs() < 1e-9);
    }

    #[test]
    fn test_remove_track_while_sounding() {
        let mut session = session();
        let a = with_clip(&mut session, 0.0, 4.0);
        let b = with_clip(&mut session, 0.0, 4.0);
        session.set_solo(a, true).unwrap();
        session.play().unwrap();
        run(&mut session, 0.1);

        let removed = session.remove_track(a).unwrap();
        assert_eq!(removed.id(), a);
        assert!(!session.graph().has_track(a));
        // with the soloed track gone, B is audible again
        assert_eq!(session.graph().chain(ChainId::new(b, 0)).map(|c| c.gain), Some(0.8));
        assert!(matches!(session.remove_track(a), Err(SessionError::UnknownTrack(_))));
    }

    #[test]
    fn test_drag_snaps_on_release() {
        let mut session = session();
        session.set_bpm(120.0);
        let a = with_clip(&mut session, 0.0, 4.0);

        session.begin_drag(a, 100.0).unwrap();
        // 115 px at 50 px/s is 2.3s, applied live and unsnapped
        assert!((session.update_drag(215.0).unwrap() - 2.3).abs() < 1e-12);
        assert!((session.track(a).unwrap().position() - 2.3).abs() < 1e-12);
        let preview = session.drag_preview().unwrap();
        assert_eq!(preview.snapped, 2.5);

        assert_eq!(session.end_drag(215.0).unwrap(), 2.5);
        assert_eq!(session.track(a).unwrap().position(), 2.5);
        assert!(session.drag_preview().is_none());
        assert!(matches!(session.update_drag(0.0), Err(SessionError::NoDrag)));
    }

    #[test]
    fn test_drag_without_snap_commits_raw() {
        let mut session = session();
        session.set_snap_to_grid(false);
        let a = with_clip(&mut session, 1.0, 4.0);

        session.begin_drag(a, 0.0).unwrap();
        let position = session.end_drag(-10.0).unwrap();
        assert!((position - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_drag_while_playing_restarts_only_on_release() {
        let mut session = session();
        session.set_bpm(120.0);
        let a = with_clip(&mut session, 0.0, 8.0);
        let b = with_clip(&mut session, 0.0, 8.0);
        session.play().unwrap();
        run(&mut session, 1.008);

        // live moves leave the sounding chain alone
        session.begin_drag(b, 0.0).unwrap();
        session.update_drag(30.0).unwrap();
        let (_, info) = session.graph().chains_for(b).next().unwrap();
        assert_eq!(info.offset, 0.0);

        // released at 0.6s, snapped to 0.5s: B restarts under the cursor
        session.end_drag(30.0).unwrap();
        let cursor = session.cursor();
        let (_, info) = session.graph().chains_for(b).next().unwrap();
        assert!((info.offset - (cursor - 0.5)).abs() < 1e-9);
        let (_, info) = session.graph().chains_for(a).next().unwrap();
        assert_eq!(info.offset, 0.0);
    }

    #[test]
    fn test_deferred_play_needs_gesture() {
        let mut backend = OfflineBackend::suspended(RATE, 1);
        backend.set_resume_allowed(false);
        let mut session = Session::new(backend, &SessionConfig::default());
        with_clip(&mut session, 0.0, 4.0);

        assert!(matches!(session.play(), Err(SessionError::NeedsUserGesture(_))));
        assert!(!session.is_playing());
        assert!(session.needs_user_gesture());

        session.graph_mut().backend_mut().set_resume_allowed(true);
        assert!(session.resume_device().unwrap());
        assert!(session.is_playing());
        assert!(!session.needs_user_gesture());
    }

    #[test]
    fn test_meter_reports_sounding_tracks() {
        let mut session = session();
        let a = with_clip(&mut session, 0.0, 4.0);
        let b = with_clip(&mut session, 10.0, 4.0);
        session.set_volume(a, 1.0).unwrap();
        session.play().unwrap();
        run(&mut session, 0.48);

        // 0.25 at unity, times the default headroom of 4
        assert!((session.level(a) - 1.0).abs() < 0.01);
        assert_eq!(session.level(b), 0.0);

        session.stop();
        assert_eq!(session.level(a), 0.0);
    }

    #[test]
    fn test_decode_failure_leaves_track_without_buffer() {
        let mut session = session();
        let id = session.add_track();

        let result = session.load_clip(id, "broken", b"not audio at all".to_vec(), Some("wav"));
        assert!(matches!(result, Err(SessionError::Decode(_))));
        let track = session.track(id).unwrap();
        assert!(!track.has_buffer());
        assert_eq!(track.name, "Track 1");
        assert!(!session.can_play());
    }

    #[test]
    fn test_loop_toggle_and_stop_at_end() {
        let mut session = session();
        with_clip(&mut session, 0.0, 0.5);
        session.set_loop(false);
        session.play().unwrap();
        run(&mut session, 0.6);
        assert!(!session.is_playing());
        assert_eq!(session.cursor(), 0.0);
    }
}
