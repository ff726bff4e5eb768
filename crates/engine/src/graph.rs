use std::collections::BTreeMap;

use basedrop::{Collector, Handle, Shared};
use seq_transport::{AudioArc, TrackId};
use tracing::{debug, trace, warn};

use crate::backend::Backend;
use crate::mixer::{RenderCommand, RenderStatus, Voice};
use crate::tap::{AnalyserTap, TAP_WINDOW};
use crate::{ChainId, DeviceState, EngineError};

/// How long past its computed end a chain may stay registered without an end report.
const END_REPORT_GRACE_SECS: f64 = 0.25;

/// Control-side record of a live chain.
pub struct ChainInfo {
    /// Device time at which the source starts (or started) reading.
    pub start_at: f64,
    /// Clip-relative seconds the source starts reading from.
    pub offset: f64,
    pub gain: f32,
    /// Device time at which the source runs out of samples.
    pub end_at: f64,
    serial: u64,
    tap: Option<Shared<AnalyserTap>>,
}

impl ChainInfo {
    pub fn tap(&self) -> Option<&AnalyserTap> {
        self.tap.as_deref()
    }
}

/// Owns the device clock and every live render chain.
///
/// Nothing outside this type creates or destroys chains. Each start allocates a
/// fresh chain; a chain is never restarted once it has been stopped or has ended.
pub struct AudioGraph<B: Backend> {
    backend: B,
    chains: BTreeMap<ChainId, ChainInfo>,
    next_serial: u64,
    analysers: bool,
    collector: Collector,
    handle: Handle,
}

impl<B: Backend> AudioGraph<B> {
    pub fn new(backend: B) -> Self {
        let collector = Collector::new();
        let handle = collector.handle();
        Self {
            backend,
            chains: BTreeMap::new(),
            next_serial: 0,
            analysers: true,
            collector,
            handle,
        }
    }

    /// Whether new chains get an analyser tap. Defaults to `true`.
    pub fn set_analysers(&mut self, enabled: bool) {
        self.analysers = enabled;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn sample_rate(&self) -> u32 {
        self.backend.sample_rate()
    }

    /// The device clock in seconds.
    pub fn now(&self) -> f64 {
        self.backend.now()
    }

    pub fn device_state(&self) -> DeviceState {
        self.backend.state()
    }

    /// Resume the device if it is suspended.
    pub fn ensure_running(&mut self) -> Result<(), EngineError> {
        match self.backend.state() {
            DeviceState::Running => Ok(()),
            DeviceState::Suspended => {
                debug!("resuming audio device");
                self.backend.resume()
            }
        }
    }

    /// Bind `audio` to a new chain and schedule it.
    ///
    /// The source reads from `offset` seconds into the clip, starting at device
    /// time `start_at`, or on the next rendered frame when `None`.
    pub fn start_chain(
        &mut self,
        id: ChainId,
        audio: &AudioArc,
        offset: f64,
        gain: f32,
        start_at: Option<f64>,
    ) -> Result<(), EngineError> {
        if self.backend.state() != DeviceState::Running {
            return Err(EngineError::DeviceSuspended);
        }
        if self.chains.contains_key(&id) {
            return Err(EngineError::DuplicateChain(id));
        }
        if audio.is_empty() {
            return Err(EngineError::EmptyClip);
        }

        let device_rate = self.backend.sample_rate() as f64;
        let offset = offset.max(0.0);
        let serial = self.next_serial;
        self.next_serial += 1;

        let tap = self
            .analysers
            .then(|| Shared::new(&self.handle, AnalyserTap::new(TAP_WINDOW)));

        let voice = Voice {
            id,
            serial,
            audio: Shared::new(&self.handle, audio.clone()),
            tap: tap.clone(),
            start_frame: start_at.map(|t| (t.max(0.0) * device_rate).round() as u64),
            offset: offset * audio.sample_rate() as f64,
            step: audio.sample_rate() as f64 / device_rate,
            gain,
        };
        self.backend.send(RenderCommand::Start(voice))?;

        debug!(chain = %id, offset, ?start_at, gain, "chain started");
        let start_at = start_at.unwrap_or_else(|| self.backend.now());
        self.chains.insert(
            id,
            ChainInfo {
                start_at,
                offset,
                gain,
                end_at: start_at + (audio.duration_secs() - offset).max(0.0),
                serial,
                tap,
            },
        );
        Ok(())
    }

    /// Stop and forget a chain. Stopping a chain that is no longer live is a
    /// no-op and returns `false`.
    pub fn stop_chain(&mut self, id: ChainId) -> bool {
        if self.chains.remove(&id).is_none() {
            trace!(chain = %id, "redundant stop");
            return false;
        }
        if let Err(err) = self.backend.send(RenderCommand::Stop(id)) {
            warn!(chain = %id, %err, "stop command dropped");
        }
        debug!(chain = %id, "chain stopped");
        true
    }

    /// Stop every chain of `track`, returning how many were live.
    pub fn stop_track(&mut self, track: TrackId) -> usize {
        let ids: Vec<ChainId> = self.chains_for(track).map(|(id, _)| id).collect();
        ids.into_iter().filter(|id| self.stop_chain(*id)).count()
    }

    pub fn stop_all(&mut self) {
        if self.chains.is_empty() {
            return;
        }
        if let Err(err) = self.backend.send(RenderCommand::StopAll) {
            warn!(%err, "stop-all command dropped");
        }
        debug!(count = self.chains.len(), "all chains stopped");
        self.chains.clear();
    }

    /// Update a live chain's gain without interrupting it.
    pub fn set_gain(&mut self, id: ChainId, gain: f32) -> bool {
        let Some(info) = self.chains.get_mut(&id) else {
            return false;
        };
        if info.gain == gain {
            return true;
        }
        info.gain = gain;
        if let Err(err) = self.backend.send(RenderCommand::SetGain { id, gain }) {
            warn!(chain = %id, %err, "gain command dropped");
            return false;
        }
        true
    }

    pub fn has_track(&self, track: TrackId) -> bool {
        self.chains_for(track).next().is_some()
    }

    pub fn chains_for(&self, track: TrackId) -> impl Iterator<Item = (ChainId, &ChainInfo)> {
        self.chains
            .range(ChainId::new(track, 0)..=ChainId::new(track, u32::MAX))
            .map(|(id, info)| (*id, info))
    }

    pub fn chains(&self) -> impl Iterator<Item = (ChainId, &ChainInfo)> {
        self.chains.iter().map(|(id, info)| (*id, info))
    }

    pub fn chain(&self, id: ChainId) -> Option<&ChainInfo> {
        self.chains.get(&id)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Forget chains the render side reported as finished and reclaim
    /// resources it released. Returns the chains that ended.
    ///
    /// A chain well past its end is forgotten even without a report, since
    /// the status queue drops reports when it is full.
    pub fn poll(&mut self) -> Vec<ChainId> {
        let mut ended = Vec::new();
        while let Some(status) = self.backend.poll_status() {
            let (id, serial) = match status {
                RenderStatus::Ended { id, serial } => (id, serial),
                RenderStatus::Rejected { id, serial } => {
                    warn!(chain = %id, "voice limit reached, chain dropped");
                    (id, serial)
                }
            };
            // the id may already belong to a newer chain
            if self.chains.get(&id).is_some_and(|info| info.serial == serial) {
                self.chains.remove(&id);
                ended.push(id);
            }
        }

        let now = self.backend.now();
        let overdue: Vec<ChainId> = self
            .chains
            .iter()
            .filter(|(_, info)| info.end_at + END_REPORT_GRACE_SECS < now)
            .map(|(id, _)| *id)
            .collect();
        for id in overdue {
            debug!(chain = %id, "end report missing, chain forgotten");
            self.chains.remove(&id);
            ended.push(id);
        }

        self.collector.collect();
        ended
    }
}
