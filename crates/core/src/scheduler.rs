//! Transport scheduler: the arrangement cursor, chain start/stop decisions
//! and gap-free loop wrap-around.
//!
//! The scheduler never owns chains. It reads the track store and issues
//! commands to the [`AudioGraph`], which keeps the registry.
//!
//! The displayed cursor is derived from the device clock:
//! `cursor = origin + (device_now - clock_at_start)`. The per-tick update
//! only reconciles chains against that value, it never drives timing.

use seq_engine::{AudioGraph, Backend, ChainId};
use seq_transport::{Track, TrackId};
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::gain;
use crate::store::TrackStore;

pub const DEFAULT_LOOKAHEAD_SECS: f64 = 0.1;
pub const DEFAULT_OVERLAP_SECS: f64 = 0.1;

/// A scheduled wrap further than this from the current loop end is stale.
const WRAP_TOLERANCE_SECS: f64 = 1e-6;

/// Beyond this the cursor jumped past the loop end rather than a tick running late.
const MAX_LATE_WRAP_SECS: f64 = 0.25;

/// Next loop pass, scheduled ahead of the loop end.
#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingWrap {
    /// Device time at which the loop end is reached.
    at: f64,
    pass: u32,
}

/// A previous-pass chain to stop once the new pass is safely under way.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Retiring {
    chain: ChainId,
    stop_after: f64,
    /// Pass whose scheduling retired this chain.
    wrap_pass: u32,
}

pub struct Transport {
    playing: bool,
    /// Arrangement time at `clock_at_start`. Also the paused-at position.
    origin: f64,
    clock_at_start: f64,
    last_cursor: f64,
    displayed: f64,
    loop_enabled: bool,
    /// Chain pass of the current loop iteration.
    pass: u32,
    wrap: Option<PendingWrap>,
    retiring: Vec<Retiring>,
    deferred_play: bool,
    lookahead: f64,
    overlap: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(true, DEFAULT_LOOKAHEAD_SECS, DEFAULT_OVERLAP_SECS)
    }
}

impl Transport {
    pub fn new(loop_enabled: bool, lookahead: f64, overlap: f64) -> Self {
        Self {
            playing: false,
            origin: 0.0,
            clock_at_start: 0.0,
            last_cursor: 0.0,
            displayed: 0.0,
            loop_enabled,
            pass: 0,
            wrap: None,
            retiring: Vec::new(),
            deferred_play: false,
            lookahead: lookahead.max(0.0),
            overlap: overlap.max(0.0),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// A play request is waiting for the device to resume.
    pub fn is_deferred(&self) -> bool {
        self.deferred_play
    }

    /// The cursor as last published by a tick, seek or transport change.
    pub fn cursor(&self) -> f64 {
        self.displayed
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn pass(&self) -> u32 {
        self.pass
    }

    /// Whether the next loop pass is already scheduled.
    pub fn wrap_pending(&self) -> bool {
        self.wrap.is_some()
    }

    /// The cursor at device time `now`.
    fn effective_cursor(&self, now: f64) -> f64 {
        if self.playing {
            self.origin + (now - self.clock_at_start)
        } else {
            self.origin
        }
    }

    /// Start playback at the cursor. A no-op without any audio.
    ///
    /// When the device refuses to resume, the request is remembered and
    /// completed by [`Transport::resume_device`].
    pub fn play<B: Backend>(
        &mut self,
        store: &TrackStore,
        graph: &mut AudioGraph<B>,
    ) -> Result<(), SessionError> {
        if self.playing {
            return Ok(());
        }
        if !store.has_audio() {
            debug!("play ignored, no track has audio");
            return Ok(());
        }
        if let Err(err) = graph.ensure_running() {
            warn!(%err, "play deferred until the device resumes");
            self.deferred_play = true;
            return Err(SessionError::NeedsUserGesture(err));
        }

        self.deferred_play = false;
        self.start_at_origin(store, graph);
        debug!(cursor = self.origin, "playing");
        Ok(())
    }

    /// Retry a deferred play. Returns whether playback started.
    pub fn resume_device<B: Backend>(
        &mut self,
        store: &TrackStore,
        graph: &mut AudioGraph<B>,
    ) -> Result<bool, SessionError> {
        graph.ensure_running().map_err(SessionError::NeedsUserGesture)?;
        if !self.deferred_play {
            return Ok(false);
        }
        self.deferred_play = false;
        self.play(store, graph)?;
        Ok(self.playing)
    }

    pub fn pause<B: Backend>(&mut self, graph: &mut AudioGraph<B>) {
        self.deferred_play = false;
        if !self.playing {
            return;
        }
        self.origin = self.effective_cursor(graph.now());
        self.playing = false;
        self.teardown(graph);
        self.last_cursor = self.origin;
        self.displayed = self.origin;
        debug!(cursor = self.origin, "paused");
    }

    pub fn stop<B: Backend>(&mut self, graph: &mut AudioGraph<B>) {
        self.pause(graph);
        self.origin = 0.0;
        self.last_cursor = 0.0;
        self.displayed = 0.0;
        debug!("stopped");
    }

    pub fn seek<B: Backend>(&mut self, store: &TrackStore, graph: &mut AudioGraph<B>, seconds: f64) {
        let seconds = if seconds.is_nan() { 0.0 } else { seconds.max(0.0) };
        self.origin = seconds;
        self.last_cursor = seconds;
        self.displayed = seconds;
        if self.playing {
            self.start_at_origin(store, graph);
        }
        debug!(cursor = seconds, playing = self.playing, "seek");
    }

    /// Tear down and start again at the current cursor.
    pub fn restart<B: Backend>(&mut self, store: &TrackStore, graph: &mut AudioGraph<B>) {
        if !self.playing {
            return;
        }
        self.origin = self.effective_cursor(graph.now());
        self.start_at_origin(store, graph);
    }

    pub fn set_loop<B: Backend>(&mut self, graph: &mut AudioGraph<B>, enabled: bool) {
        self.loop_enabled = enabled;
        if !enabled {
            self.cancel_wrap(graph);
        }
    }

    fn teardown<B: Backend>(&mut self, graph: &mut AudioGraph<B>) {
        graph.stop_all();
        self.wrap = None;
        self.retiring.clear();
    }

    /// Start every track that covers the origin, in arrangement order.
    /// Tracks further ahead are left to the tick scan.
    fn start_at_origin<B: Backend>(&mut self, store: &TrackStore, graph: &mut AudioGraph<B>) {
        self.teardown(graph);

        let cursor = self.origin;
        let any_solo = store.any_solo();
        let mut due: Vec<&Track> = store
            .audible()
            .filter(|t| t.position() <= cursor && t.end().is_some_and(|end| end > cursor))
            .collect();
        due.sort_by(|a, b| a.position().total_cmp(&b.position()));

        for track in due {
            let gain = gain::effective_gain(track, any_solo);
            launch(graph, track, self.pass, cursor - track.position(), gain, None);
        }

        self.clock_at_start = graph.now();
        self.last_cursor = cursor;
        self.displayed = cursor;
        self.playing = true;
    }

    /// Advance the transport. Call once per display refresh.
    ///
    /// Returns the cursor to display.
    pub fn tick<B: Backend>(&mut self, store: &TrackStore, graph: &mut AudioGraph<B>) -> f64 {
        graph.poll();
        if !self.playing {
            return self.displayed;
        }

        let now = graph.now();
        self.retire(graph, now);

        let loop_end = store.loop_end_point();
        let mut cursor = self.effective_cursor(now);

        if self.loop_enabled {
            self.start_due(store, graph, self.last_cursor, cursor.min(loop_end));

            let remaining = loop_end - cursor;
            if self
                .wrap
                .is_some_and(|wrap| (wrap.at - (now + remaining)).abs() > WRAP_TOLERANCE_SECS)
            {
                // the loop end moved since the wrap was scheduled
                self.cancel_wrap(graph);
            }
            if remaining > 0.0 && remaining <= self.lookahead && self.wrap.is_none() {
                self.schedule_wrap(store, graph, now + remaining);
            }

            if remaining <= 0.0 {
                self.complete_wrap(store, graph, now, loop_end, -remaining);
                cursor = self.effective_cursor(now);
                self.start_due(store, graph, 0.0, cursor);
            }
        } else {
            self.cancel_wrap(graph);
            if cursor >= loop_end {
                debug!(loop_end, "reached the end of the arrangement");
                self.stop(graph);
                return self.displayed;
            }
            self.start_due(store, graph, self.last_cursor, cursor);
        }

        self.last_cursor = cursor;
        self.displayed = cursor;
        cursor
    }

    /// Start tracks whose position the cursor crossed in `(from, to]` and
    /// which are not already sounding.
    fn start_due<B: Backend>(
        &mut self,
        store: &TrackStore,
        graph: &mut AudioGraph<B>,
        from: f64,
        to: f64,
    ) {
        if to <= from {
            return;
        }
        let any_solo = store.any_solo();
        let mut due: Vec<&Track> = store
            .audible()
            .filter(|t| t.position() > from && t.position() <= to && !graph.has_track(t.id()))
            .collect();
        due.sort_by(|a, b| a.position().total_cmp(&b.position()));

        for track in due {
            let gain = gain::effective_gain(track, any_solo);
            launch(graph, track, self.pass, 0.0, gain, None);
        }
    }

    /// Schedule the next pass of every track at 0 to begin exactly at `at`,
    /// then mark the outgoing chains for removal after the overlap.
    fn schedule_wrap<B: Backend>(&mut self, store: &TrackStore, graph: &mut AudioGraph<B>, at: f64) {
        let next = self.pass.wrapping_add(1);
        let any_solo = store.any_solo();

        for track in store.audible().filter(|t| t.position() == 0.0) {
            let gain = gain::effective_gain(track, any_solo);
            launch(graph, track, next, 0.0, gain, Some(at));

            let outgoing: Vec<ChainId> = graph
                .chains_for(track.id())
                .map(|(id, _)| id)
                .filter(|id| id.pass != next)
                .collect();
            self.retiring.extend(outgoing.into_iter().map(|chain| Retiring {
                chain,
                stop_after: at + self.overlap,
                wrap_pass: next,
            }));
        }

        debug!(at, pass = next, "loop wrap scheduled");
        self.wrap = Some(PendingWrap { at, pass: next });
    }

    /// Move the cursor back to 0 once the loop end has passed. Audio that was
    /// scheduled ahead is left alone; only the clock origin is rebased.
    fn complete_wrap<B: Backend>(
        &mut self,
        store: &TrackStore,
        graph: &mut AudioGraph<B>,
        now: f64,
        loop_end: f64,
        overshoot: f64,
    ) {
        match self.wrap.take() {
            Some(wrap) => {
                self.pass = wrap.pass;
                self.clock_at_start = wrap.at;
            }
            None if overshoot >= loop_end
                || overshoot > MAX_LATE_WRAP_SECS.max(self.lookahead) =>
            {
                // jumped past the loop end (seek, or the end moved back):
                // start over from the top rather than mid-pass
                debug!(overshoot, "cursor past the loop end, restarting from 0");
                self.pass = self.pass.wrapping_add(1);
                self.origin = 0.0;
                self.start_at_origin(store, graph);
                return;
            }
            None => {
                // no tick landed inside the window, start the next pass late
                let next = self.pass.wrapping_add(1);
                let any_solo = store.any_solo();
                for track in store.audible().filter(|t| t.position() == 0.0) {
                    graph.stop_track(track.id());
                    let gain = gain::effective_gain(track, any_solo);
                    launch(graph, track, next, overshoot, gain, None);
                }
                warn!(overshoot, "loop wrap was not scheduled ahead");
                self.pass = next;
                self.clock_at_start = now - overshoot;
            }
        }

        self.origin = 0.0;
        self.last_cursor = 0.0;
        self.displayed = 0.0;
        debug!(pass = self.pass, "loop wrapped");
    }

    fn cancel_wrap<B: Backend>(&mut self, graph: &mut AudioGraph<B>) {
        let Some(wrap) = self.wrap.take() else {
            return;
        };
        let scheduled: Vec<ChainId> = graph
            .chains()
            .map(|(id, _)| id)
            .filter(|id| id.pass == wrap.pass)
            .collect();
        for id in scheduled {
            graph.stop_chain(id);
        }
        self.retiring.retain(|r| r.wrap_pass != wrap.pass);
        debug!(pass = wrap.pass, "loop wrap cancelled");
    }

    fn retire<B: Backend>(&mut self, graph: &mut AudioGraph<B>, now: f64) {
        self.retiring.retain(|r| {
            if r.stop_after <= now {
                graph.stop_chain(r.chain);
                false
            } else {
                true
            }
        });
    }

    /// Stop a removed track's chains right away.
    pub fn forget_track<B: Backend>(&mut self, graph: &mut AudioGraph<B>, track: TrackId) {
        let stopped = graph.stop_track(track);
        self.retiring.retain(|r| r.chain.track != track);
        if stopped > 0 {
            debug!(%track, stopped, "stopped chains of removed track");
        }
    }

    /// Bring one track's chains in line with its committed position or buffer.
    ///
    /// Only that track is touched: its chains stop, and a single chain restarts
    /// if the clip now covers the cursor. A clip further ahead is left to the
    /// tick scan.
    pub fn reconcile_track<B: Backend>(
        &mut self,
        store: &TrackStore,
        graph: &mut AudioGraph<B>,
        id: TrackId,
    ) {
        if !self.playing {
            return;
        }
        self.forget_track(graph, id);
        let Some(track) = store.get(id).filter(|t| t.has_buffer()) else {
            return;
        };

        let cursor = self.effective_cursor(graph.now());
        let gain = gain::effective_gain(track, store.any_solo());
        let covers = track.position() <= cursor && track.end().is_some_and(|end| end > cursor);
        if covers {
            launch(graph, track, self.pass, cursor - track.position(), gain, None);
        }

        if let Some(wrap) = self.wrap.filter(|_| track.position() == 0.0) {
            launch(graph, track, wrap.pass, 0.0, gain, Some(wrap.at));
            if covers {
                self.retiring.push(Retiring {
                    chain: ChainId::new(id, self.pass),
                    stop_after: wrap.at + self.overlap,
                    wrap_pass: wrap.pass,
                });
            }
        }
        debug!(track = %id, position = track.position(), covers, "track reconciled");
    }

    /// Push freshly resolved gains to every live chain.
    pub fn apply_gains<B: Backend>(&self, store: &TrackStore, graph: &mut AudioGraph<B>) {
        let gains = gain::resolve(store.tracks());
        let live: Vec<ChainId> = graph.chains().map(|(id, _)| id).collect();
        for id in live {
            let gain = gains.get(&id.track).copied().unwrap_or(0.0);
            graph.set_gain(id, gain);
        }
    }
}

/// Start one chain for `track`. Failures are logged and the track stays silent.
fn launch<B: Backend>(
    graph: &mut AudioGraph<B>,
    track: &Track,
    pass: u32,
    offset: f64,
    gain: f32,
    start_at: Option<f64>,
) -> bool {
    let Some(buffer) = track.buffer() else {
        return false;
    };
    match graph.start_chain(ChainId::new(track.id(), pass), buffer, offset, gain, start_at) {
        Ok(()) => true,
        Err(err) => {
            warn!(track = %track.id(), %err, "failed to start chain");
            false
        }
    }
}
