//! The render side of the audio graph.
//!
//! A [`Mixer`] runs wherever samples are produced: inside the cpal callback
//! for a real device, or inline for the offline backend. It only ever talks
//! to the control thread through the two ring buffers, so nothing here locks
//! or blocks.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use basedrop::Shared;
use seq_transport::AudioArc;

use crate::ChainId;
use crate::tap::AnalyserTap;

pub(crate) const COMMAND_CAPACITY: usize = 256;
pub(crate) const STATUS_CAPACITY: usize = 256;
pub(crate) const VOICE_CAPACITY: usize = 64;

/// One sounding clip instance as seen by the render thread: a source bound to
/// a buffer, a gain stage and an optional analyser tap.
pub struct Voice {
    pub(crate) id: ChainId,
    /// Distinguishes successive voices that reuse one chain id.
    pub(crate) serial: u64,
    pub(crate) audio: Shared<AudioArc>,
    pub(crate) tap: Option<Shared<AnalyserTap>>,
    /// Device frame at which playback begins. `None` starts on the next rendered frame.
    pub(crate) start_frame: Option<u64>,
    /// Read position into the buffer, in source frames, at `start_frame`.
    pub(crate) offset: f64,
    /// Source frames consumed per device frame. Unity speed across sample rates.
    pub(crate) step: f64,
    pub(crate) gain: f32,
}

impl Voice {
    /// Mix this voice into `out`. Returns `true` once the buffer is exhausted.
    fn render(&mut self, out: &mut [f32], channels: usize, block_start: u64) -> bool {
        let Some(start_frame) = self.start_frame else {
            return false;
        };

        let samples = self.audio.samples();
        let src_channels = self.audio.channels() as usize;
        let src_frames = self.audio.frames();

        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let now = block_start + i as u64;
            if now < start_frame {
                continue;
            }

            let position = self.offset + (now - start_frame) as f64 * self.step;
            let index = position as usize;
            if index >= src_frames {
                return true;
            }

            let mut mono = 0.0;
            for (ch, sample) in frame.iter_mut().enumerate() {
                let value = samples[index * src_channels + ch % src_channels] * self.gain;
                *sample += value;
                mono += value;
            }
            if let Some(tap) = &self.tap {
                tap.push(mono / channels as f32);
            }
        }

        false
    }
}

pub enum RenderCommand {
    Start(Voice),
    Stop(ChainId),
    SetGain { id: ChainId, gain: f32 },
    StopAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    /// The chain played to the end of its buffer and was dropped.
    Ended { id: ChainId, serial: u64 },
    /// The voice limit was reached and the chain never started.
    Rejected { id: ChainId, serial: u64 },
}

pub struct Mixer {
    voices: Vec<Voice>,
    frame: u64,
    clock: Arc<AtomicU64>,
    commands: rtrb::Consumer<RenderCommand>,
    status: rtrb::Producer<RenderStatus>,
}

impl Mixer {
    pub(crate) fn new(
        clock: Arc<AtomicU64>,
        commands: rtrb::Consumer<RenderCommand>,
        status: rtrb::Producer<RenderStatus>,
    ) -> Self {
        Self {
            voices: Vec::with_capacity(VOICE_CAPACITY),
            frame: clock.load(Ordering::Acquire),
            clock,
            commands,
            status,
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                RenderCommand::Start(mut voice) => {
                    if self.voices.len() >= VOICE_CAPACITY {
                        // pushing would reallocate on the audio thread
                        let _ = self.status.push(RenderStatus::Rejected {
                            id: voice.id,
                            serial: voice.serial,
                        });
                        continue;
                    }
                    voice.start_frame.get_or_insert(self.frame);
                    self.voices.push(voice);
                }
                RenderCommand::Stop(id) => self.voices.retain(|v| v.id != id),
                RenderCommand::SetGain { id, gain } => {
                    for voice in self.voices.iter_mut().filter(|v| v.id == id) {
                        voice.gain = gain;
                    }
                }
                RenderCommand::StopAll => self.voices.clear(),
            }
        }
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the device clock.
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        self.apply_commands();
        out.fill(0.0);

        let block_start = self.frame;
        let mut i = 0;
        while i < self.voices.len() {
            if self.voices[i].render(out, channels, block_start) {
                let voice = self.voices.swap_remove(i);
                let _ = self.status.push(RenderStatus::Ended {
                    id: voice.id,
                    serial: voice.serial,
                });
            } else {
                i += 1;
            }
        }

        self.frame += (out.len() / channels) as u64;
        self.clock.store(self.frame, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basedrop::Collector;
    use seq_transport::TrackId;

    struct Rig {
        collector: Collector,
        mixer: Mixer,
        commands: rtrb::Producer<RenderCommand>,
        status: rtrb::Consumer<RenderStatus>,
        clock: Arc<AtomicU64>,
    }

    fn rig() -> Rig {
        let (commands, command_rx) = rtrb::RingBuffer::new(COMMAND_CAPACITY);
        let (status_tx, status) = rtrb::RingBuffer::new(STATUS_CAPACITY);
        let clock = Arc::new(AtomicU64::new(0));
        Rig {
            collector: Collector::new(),
            mixer: Mixer::new(clock.clone(), command_rx, status_tx),
            commands,
            status,
            clock,
        }
    }

    fn voice(rig: &Rig, track: u64, audio: AudioArc, start_frame: Option<u64>) -> Voice {
        let handle = rig.collector.handle();
        Voice {
            id: ChainId::new(TrackId(track), 0),
            serial: track,
            audio: Shared::new(&handle, audio),
            tap: None,
            start_frame,
            offset: 0.0,
            step: 1.0,
            gain: 1.0,
        }
    }

    #[test]
    fn test_scheduled_start_is_sample_accurate() {
        let mut rig = rig();
        let v = voice(&rig, 1, AudioArc::new(vec![1.0; 8], 100, 1), Some(3));
        rig.commands.push(RenderCommand::Start(v)).ok().unwrap();

        let mut out = vec![0.0; 6];
        rig.mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        assert_eq!(rig.clock.load(Ordering::Acquire), 6);
    }

    #[test]
    fn test_voice_ends_and_reports() {
        let mut rig = rig();
        let v = voice(&rig, 2, AudioArc::new(vec![0.5; 4], 100, 1), None);
        rig.commands.push(RenderCommand::Start(v)).ok().unwrap();

        let mut out = vec![0.0; 8];
        rig.mixer.render(&mut out, 1);

        assert_eq!(&out[..4], &[0.5; 4]);
        assert_eq!(&out[4..], &[0.0; 4]);
        assert_eq!(
            rig.status.pop().ok(),
            Some(RenderStatus::Ended {
                id: ChainId::new(TrackId(2), 0),
                serial: 2,
            })
        );
    }

    #[test]
    fn test_gain_and_channel_fanout() {
        let mut rig = rig();
        let v = voice(&rig, 1, AudioArc::new(vec![1.0; 4], 100, 1), None);
        rig.commands.push(RenderCommand::Start(v)).ok().unwrap();
        rig.commands
            .push(RenderCommand::SetGain {
                id: ChainId::new(TrackId(1), 0),
                gain: 0.25,
            })
            .ok()
            .unwrap();

        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out, 2);

        // mono source fans out to both output channels
        assert_eq!(out, vec![0.25; 4]);
    }

    #[test]
    fn test_stop_all_silences() {
        let mut rig = rig();
        let v = voice(&rig, 1, AudioArc::new(vec![1.0; 100], 100, 1), None);
        rig.commands.push(RenderCommand::Start(v)).ok().unwrap();
        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out, 1);

        rig.commands.push(RenderCommand::StopAll).ok().unwrap();
        rig.mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0; 4]);
        assert!(rig.status.pop().is_err());
    }

    #[test]
    fn test_voice_limit_rejects_without_growing() {
        let mut rig = rig();
        let capacity = rig.mixer.voices.capacity();
        for track in 0..=VOICE_CAPACITY as u64 {
            let v = voice(&rig, track, AudioArc::new(vec![0.0; 64], 100, 1), None);
            rig.commands.push(RenderCommand::Start(v)).ok().unwrap();
        }

        let mut out = vec![0.0; 4];
        rig.mixer.render(&mut out, 1);

        assert_eq!(rig.mixer.voices.len(), VOICE_CAPACITY);
        assert_eq!(rig.mixer.voices.capacity(), capacity);
        assert_eq!(
            rig.status.pop().ok(),
            Some(RenderStatus::Rejected {
                id: ChainId::new(TrackId(VOICE_CAPACITY as u64), 0),
                serial: VOICE_CAPACITY as u64,
            })
        );
    }
}
