use seq_decode::DecodeError;
use seq_engine::EngineError;
use seq_transport::TrackId;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no track with id {0}")]
    UnknownTrack(TrackId),

    #[error("failed to decode clip: {0}")]
    Decode(#[from] DecodeError),

    /// The device would not resume. Playback starts once
    /// [`Session::resume_device`](crate::Session::resume_device) succeeds.
    #[error("audio device needs user interaction before playback can start")]
    NeedsUserGesture(#[source] EngineError),

    #[error("no drag in progress")]
    NoDrag,

    #[error(transparent)]
    Engine(#[from] EngineError),
}
