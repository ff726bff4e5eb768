//! Audio Graph Manager: the device clock plus every live render chain.
//!
//! The control side ([`AudioGraph`]) owns the chain registry and issues
//! commands; the render side ([`mixer::Mixer`]) runs inside the device
//! callback and reports back when a chain runs out of samples.

mod backend;
mod device;
mod graph;
pub mod mixer;
pub mod tap;

use std::fmt;

use seq_transport::TrackId;

pub use backend::{Backend, OfflineBackend};
pub use device::CpalBackend;
pub use graph::{AudioGraph, ChainInfo};
pub use tap::{AnalyserTap, TAP_WINDOW, byte_to_amplitude};

/// Key of one live render chain.
///
/// `pass` disambiguates chains of the same track that briefly coexist while a
/// loop wraps: the outgoing pass keeps sounding while the next one is already
/// scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId {
    pub track: TrackId,
    pub pass: u32,
}

impl ChainId {
    pub fn new(track: TrackId, pass: u32) -> Self {
        Self { track, pass }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.track, self.pass)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Running,
    /// The clock is frozen until the device is resumed.
    Suspended,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("audio device is suspended")]
    DeviceSuspended,

    #[error("audio device refused to resume: {0}")]
    ResumeFailed(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("render command queue is full")]
    QueueFull,

    #[error("chain {0} is already live")]
    DuplicateChain(ChainId),

    #[error("clip is empty")]
    EmptyClip,
}
