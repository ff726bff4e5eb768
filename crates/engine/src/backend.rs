use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::mixer::{COMMAND_CAPACITY, Mixer, RenderCommand, RenderStatus, STATUS_CAPACITY};
use crate::{DeviceState, EngineError};

/// Where rendered samples go, and the clock that measures them.
pub trait Backend {
    fn sample_rate(&self) -> u32;

    /// Frames rendered since the device was opened.
    fn frames_elapsed(&self) -> u64;

    fn state(&self) -> DeviceState;

    fn resume(&mut self) -> Result<(), EngineError>;

    fn suspend(&mut self) -> Result<(), EngineError>;

    fn send(&mut self, command: RenderCommand) -> Result<(), EngineError>;

    fn poll_status(&mut self) -> Option<RenderStatus>;

    /// The device clock in seconds.
    fn now(&self) -> f64 {
        self.frames_elapsed() as f64 / self.sample_rate() as f64
    }
}

/// A device without hardware: the clock only moves when [`OfflineBackend::advance`]
/// renders. Rendering goes through the same [`Mixer`] a real stream uses.
pub struct OfflineBackend {
    sample_rate: u32,
    channels: usize,
    state: DeviceState,
    resume_allowed: bool,
    mixer: Mixer,
    clock: Arc<AtomicU64>,
    commands: rtrb::Producer<RenderCommand>,
    status: rtrb::Consumer<RenderStatus>,
    block: Vec<f32>,
}

impl OfflineBackend {
    /// Render quantum, in frames.
    pub const BLOCK_FRAMES: usize = 128;

    pub fn new(sample_rate: u32, channels: u16) -> Self {
        let (commands, command_rx) = rtrb::RingBuffer::new(COMMAND_CAPACITY);
        let (status_tx, status) = rtrb::RingBuffer::new(STATUS_CAPACITY);
        let clock = Arc::new(AtomicU64::new(0));

        Self {
            sample_rate,
            channels: channels.max(1) as usize,
            state: DeviceState::Running,
            resume_allowed: true,
            mixer: Mixer::new(clock.clone(), command_rx, status_tx),
            clock,
            commands,
            status,
            block: Vec::new(),
        }
    }

    /// Starts suspended, the way a browser holds audio back until a user gesture.
    pub fn suspended(sample_rate: u32, channels: u16) -> Self {
        let mut backend = Self::new(sample_rate, channels);
        backend.state = DeviceState::Suspended;
        backend
    }

    /// When `false`, every resume attempt fails.
    pub fn set_resume_allowed(&mut self, allowed: bool) {
        self.resume_allowed = allowed;
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Render `seconds` of audio (rounded to whole frames) and return it
    /// interleaved. A suspended device renders nothing and its clock stands still.
    pub fn advance(&mut self, seconds: f64) -> Vec<f32> {
        let frames = (seconds * self.sample_rate as f64).round().max(0.0) as usize;
        self.render_frames(frames)
    }

    pub fn render_frames(&mut self, frames: usize) -> Vec<f32> {
        if self.state == DeviceState::Suspended {
            return Vec::new();
        }

        let mut rendered = Vec::with_capacity(frames * self.channels);
        let mut remaining = frames;
        while remaining > 0 {
            let n = remaining.min(Self::BLOCK_FRAMES);
            self.block.resize(n * self.channels, 0.0);
            self.mixer.render(&mut self.block, self.channels);
            rendered.extend_from_slice(&self.block);
            remaining -= n;
        }
        rendered
    }
}

impl Backend for OfflineBackend {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames_elapsed(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn resume(&mut self) -> Result<(), EngineError> {
        if !self.resume_allowed {
            return Err(EngineError::ResumeFailed(
                "resume not allowed without user interaction".into(),
            ));
        }
        self.state = DeviceState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), EngineError> {
        self.state = DeviceState::Suspended;
        Ok(())
    }

    fn send(&mut self, command: RenderCommand) -> Result<(), EngineError> {
        self.commands
            .push(command)
            .map_err(|_| EngineError::QueueFull)
    }

    fn poll_status(&mut self) -> Option<RenderStatus> {
        self.status.pop().ok()
    }
}
