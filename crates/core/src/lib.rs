pub mod config;
pub mod drag;
pub mod error;
pub mod gain;
pub mod meter;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod time;

pub use config::SessionConfig;
pub use drag::{Drag, DragPreview};
pub use error::SessionError;
pub use meter::LoudnessMeter;
pub use scheduler::Transport;
pub use session::Session;
pub use store::TrackStore;
pub use time::{TimeContext, TimeSignature, format_time};

pub use seq_decode::DecodeError;
pub use seq_engine::{AudioGraph, Backend, ChainId, CpalBackend, EngineError, OfflineBackend};
pub use seq_transport::{AudioArc, Track, TrackColor, TrackId};
