use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cpal::{
    FromSample, SizedSample,
    traits::{DeviceTrait, HostTrait, StreamTrait},
};
use tracing::{info, warn};

use crate::backend::Backend;
use crate::mixer::{COMMAND_CAPACITY, Mixer, RenderCommand, RenderStatus, STATUS_CAPACITY};
use crate::{DeviceState, EngineError};

/// The default output device, driven by a cpal stream.
pub struct CpalBackend {
    sample_rate: u32,
    state: DeviceState,
    clock: Arc<AtomicU64>,
    commands: rtrb::Producer<RenderCommand>,
    status: rtrb::Consumer<RenderStatus>,
    stream: cpal::Stream,
}

impl CpalBackend {
    pub fn open() -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no output device found"))?;

        let config = device.default_output_config()?;
        info!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate().0,
            channels = config.channels(),
            "opening output device"
        );

        let (commands, command_rx) = rtrb::RingBuffer::<RenderCommand>::new(COMMAND_CAPACITY);
        let (status_tx, status) = rtrb::RingBuffer::<RenderStatus>::new(STATUS_CAPACITY);
        let clock = Arc::new(AtomicU64::new(0));
        let mixer = Mixer::new(clock.clone(), command_rx, status_tx);

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config.clone().into(), mixer)?,
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config.clone().into(), mixer)?,
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config.clone().into(), mixer)?,
            sample_format => anyhow::bail!("unsupported sample format '{sample_format}'"),
        };

        stream.play()?;

        Ok(Self {
            sample_rate: config.sample_rate().0,
            state: DeviceState::Running,
            clock,
            commands,
            status,
            stream,
        })
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut mixer: Mixer,
) -> anyhow::Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::with_capacity(4096 * channels);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            scratch.resize(data.len(), 0.0);
            mixer.render(&mut scratch, channels);
            for (out, sample) in data.iter_mut().zip(&scratch) {
                *out = T::from_sample(*sample);
            }
        },
        |err| warn!(%err, "output stream error"),
        None,
    )?;

    Ok(stream)
}

impl Backend for CpalBackend {
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
        self.stream
            .play()
            .map_err(|e| EngineError::ResumeFailed(e.to_string()))?;
        self.state = DeviceState::Running;
        Ok(())
    }

    fn suspend(&mut self) -> Result<(), EngineError> {
        self.stream
            .pause()
            .map_err(|e| EngineError::Device(e.to_string()))?;
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
