// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

// Core mixing logic shared by the cpal and mock devices. The control side (MixerPort) is
// handed to the scheduler; the render side (Mixer) lives on the audio thread. The two talk
// over a command channel so the render side never waits on a lock held by the scheduler.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::debug;

use crate::audio::{
    CompletionSender, Destination, OutputFormat, OutputPort, OutputState, PlayableHandle,
    PlayableId, PortError, SampleBuffer,
};

/// Commands sent from the control side to the render side, applied in order.
enum Command {
    Create { id: PlayableId, buffer: SampleBuffer },
    Connect { id: PlayableId },
    SetGain { id: PlayableId, gain: f32 },
    Ramp { id: PlayableId, from: u64, frames: u64 },
    /// Offset and length are in seconds; the render side converts them at the buffer's rate.
    Start { id: PlayableId, at: u64, offset: f64, length: Option<f64> },
    OnCompletion { id: PlayableId, notify: CompletionSender },
    Disconnect { id: PlayableId },
}

/// A linear fade to zero between two absolute frames.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Ramp {
    start: u64,
    end: u64,
}

impl Ramp {
    /// Returns the gain multiplier at the given absolute frame.
    fn factor(&self, frame: u64) -> f32 {
        if frame < self.start {
            1.0
        } else if frame >= self.end {
            0.0
        } else {
            1.0 - (frame - self.start) as f32 / (self.end - self.start) as f32
        }
    }
}

/// Where and what part of the buffer a voice plays.
#[derive(Clone, Copy, Debug)]
struct Playback {
    /// Absolute frame at which the voice becomes audible.
    at: u64,
    /// First buffer frame played.
    offset: usize,
    /// One past the last buffer frame played.
    end: usize,
    /// Buffer frames per second.
    source_rate: u64,
    /// Output frames per second.
    output_rate: u64,
}

impl Playback {
    /// Returns the buffer frame heard at the given absolute output frame, or None before the
    /// voice starts. A buffer at another rate than the output advances at its own rate, one
    /// whole frame at a time.
    fn position(&self, frame: u64) -> Option<usize> {
        if frame < self.at {
            return None;
        }
        let elapsed = (frame - self.at) * self.source_rate / self.output_rate;
        Some(self.offset + elapsed as usize)
    }
}

/// A playable on the render side: a buffer source feeding its own gain stage.
struct Voice {
    buffer: SampleBuffer,
    connected: bool,
    gain: f32,
    ramp: Option<Ramp>,
    playback: Option<Playback>,
    notify: Option<CompletionSender>,
    finished: bool,
    /// Finished with nobody left to disconnect it.
    orphaned: bool,
}

impl Voice {
    fn new(buffer: SampleBuffer) -> Self {
        Self {
            buffer,
            connected: false,
            gain: 1.0,
            ramp: None,
            playback: None,
            notify: None,
            finished: false,
            orphaned: false,
        }
    }

    /// Marks the voice finished and reports completion exactly once.
    fn finish(&mut self, id: PlayableId) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(notify) = self.notify.take() {
            // The scheduler is gone, so the mixer releases the voice itself.
            self.orphaned = notify.send(id).is_err();
        }
    }
}

/// The render side of the mixer. Owned by the audio thread.
pub struct Mixer {
    commands: Receiver<Command>,
    voices: HashMap<PlayableId, Voice>,
    /// Frames rendered so far; this is the output clock.
    clock: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    sample_rate: u32,
    channels: u16,
    master_gain: f32,
}

/// The control side of the mixer, implementing the output port.
pub struct MixerPort {
    commands: Sender<Command>,
    clock: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    next_id: AtomicU64,
    sample_rate: u32,
}

/// Creates a connected mixer pair for the given output format.
pub fn new(format: OutputFormat) -> (MixerPort, Mixer) {
    let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
    let clock = Arc::new(AtomicU64::new(0));
    let running = Arc::new(AtomicBool::new(false));

    (
        MixerPort {
            commands: commands_tx,
            clock: clock.clone(),
            running: running.clone(),
            next_id: AtomicU64::new(1),
            sample_rate: format.sample_rate.max(1),
        },
        Mixer {
            commands: commands_rx,
            voices: HashMap::new(),
            clock,
            running,
            sample_rate: format.sample_rate.max(1),
            channels: format.channels.max(1),
            master_gain: format.master_gain,
        },
    )
}

impl Mixer {
    /// Gets the number of output channels.
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Marks the output as running or suspended. The port reports this state to the scheduler.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Returns the shared running flag, for devices that move the mixer into a callback.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Returns the number of voices the render side currently holds.
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// Applies pending commands from the control side.
    fn apply_commands(&mut self) {
        let now = self.clock.load(Ordering::Acquire);
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Create { id, buffer } => {
                    self.voices.insert(id, Voice::new(buffer));
                }
                Command::Connect { id } => {
                    if let Some(voice) = self.voices.get_mut(&id) {
                        voice.connected = true;
                    }
                }
                Command::SetGain { id, gain } => {
                    if let Some(voice) = self.voices.get_mut(&id) {
                        voice.gain = gain;
                    }
                }
                Command::Ramp { id, from, frames } => {
                    if let Some(voice) = self.voices.get_mut(&id) {
                        // A fade requested for the past starts now.
                        let start = from.max(now);
                        let ramp = Ramp {
                            start,
                            end: start + frames.max(1),
                        };
                        voice.ramp = match voice.ramp {
                            Some(existing) if existing.end <= ramp.end => Some(existing),
                            _ => Some(ramp),
                        };
                    }
                }
                Command::Start {
                    id,
                    at,
                    offset,
                    length,
                } => {
                    if let Some(voice) = self.voices.get_mut(&id) {
                        let source_rate = voice.buffer.sample_rate().max(1);
                        let frames = voice.buffer.frames();
                        let offset = to_frames(offset, source_rate).min(frames);
                        let end = match length {
                            Some(length) => (offset + to_frames(length, source_rate)).min(frames),
                            None => frames,
                        };
                        if at < now {
                            debug!(id, late_frames = now - at, "Voice started late");
                        }
                        voice.playback = Some(Playback {
                            at: at.max(now),
                            offset,
                            end,
                            source_rate: source_rate as u64,
                            output_rate: self.sample_rate as u64,
                        });
                    }
                }
                Command::OnCompletion { id, notify } => {
                    if let Some(voice) = self.voices.get_mut(&id) {
                        voice.notify = Some(notify);
                    }
                }
                Command::Disconnect { id } => {
                    self.voices.remove(&id);
                }
            }
        }
    }

    /// Renders `out.len() / channels` interleaved frames and advances the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        self.apply_commands();
        out.fill(0.0);

        let channels = self.channels as usize;
        let frames = out.len() / channels;
        let block_start = self.clock.load(Ordering::Acquire);
        let master_gain = self.master_gain;

        for (id, voice) in self.voices.iter_mut() {
            if voice.finished {
                continue;
            }
            let Some(playback) = voice.playback else {
                continue;
            };

            let buffer = voice.buffer.clone();
            let source_channels = buffer.channel_count() as usize;
            let data = buffer.data();

            for frame in 0..frames {
                let now = block_start + frame as u64;
                if voice.ramp.is_some_and(|ramp| now >= ramp.end) {
                    voice.finish(*id);
                    break;
                }
                let Some(position) = playback.position(now) else {
                    continue;
                };
                if position >= playback.end {
                    voice.finish(*id);
                    break;
                }
                if !voice.connected {
                    continue;
                }

                let ramp = voice.ramp.map_or(1.0, |ramp| ramp.factor(now));
                let gain = voice.gain * ramp * master_gain;
                let source_frame = &data[position * source_channels..][..source_channels];
                let output_frame = &mut out[frame * channels..][..channels];
                if source_channels == 1 {
                    for sample in output_frame.iter_mut() {
                        *sample += source_frame[0] * gain;
                    }
                } else {
                    for (sample, source) in output_frame.iter_mut().zip(source_frame) {
                        *sample += source * gain;
                    }
                }
            }

            // A voice whose last frame lands exactly on the block boundary finishes here.
            let next = block_start + frames as u64;
            if !voice.finished
                && (voice.ramp.is_some_and(|ramp| next >= ramp.end)
                    || playback
                        .position(next)
                        .is_some_and(|position| position >= playback.end))
            {
                voice.finish(*id);
            }
        }
        self.voices.retain(|_, voice| !voice.orphaned);

        self.clock.fetch_add(frames as u64, Ordering::AcqRel);
    }
}

impl MixerPort {
    fn send(&self, command: Command) -> Result<(), PortError> {
        self.commands
            .send(command)
            .map_err(|_| PortError::Disconnected)
    }

    fn to_frames(&self, seconds: f64) -> u64 {
        to_frames(seconds, self.sample_rate) as u64
    }
}

fn to_frames(seconds: f64, sample_rate: u32) -> usize {
    (seconds.max(0.0) * sample_rate as f64).round() as usize
}

impl OutputPort for MixerPort {
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Acquire) as f64 / self.sample_rate as f64
    }

    fn state(&self) -> OutputState {
        if self.running.load(Ordering::Acquire) {
            OutputState::Running
        } else {
            OutputState::Suspended
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_playable(&self, buffer: &SampleBuffer) -> Result<PlayableHandle, PortError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Create {
            id,
            buffer: buffer.clone(),
        })?;
        Ok(PlayableHandle::new(id))
    }

    fn connect(&self, handle: &PlayableHandle, destination: Destination) -> Result<(), PortError> {
        match destination {
            Destination::Master => self.send(Command::Connect { id: handle.id() }),
        }
    }

    fn set_gain(&self, handle: &PlayableHandle, gain: f32) -> Result<(), PortError> {
        self.send(Command::SetGain {
            id: handle.id(),
            gain,
        })
    }

    fn ramp_gain_to_zero(
        &self,
        handle: &PlayableHandle,
        from_time: f64,
        duration: f64,
    ) -> Result<(), PortError> {
        self.send(Command::Ramp {
            id: handle.id(),
            from: self.to_frames(from_time),
            frames: self.to_frames(duration),
        })
    }

    fn start(
        &self,
        handle: &PlayableHandle,
        at: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<(), PortError> {
        self.send(Command::Start {
            id: handle.id(),
            at: self.to_frames(at),
            offset,
            length: duration,
        })
    }

    fn on_completion(
        &self,
        handle: &PlayableHandle,
        notify: CompletionSender,
    ) -> Result<(), PortError> {
        self.send(Command::OnCompletion {
            id: handle.id(),
            notify,
        })
    }

    fn disconnect(&self, handle: PlayableHandle) -> Result<(), PortError> {
        self.send(Command::Disconnect { id: handle.id() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn create_pair(channels: u16) -> (MixerPort, Mixer) {
        let (port, mixer) = new(OutputFormat {
            sample_rate: RATE,
            channels,
            master_gain: 1.0,
        });
        mixer.set_running(true);
        (port, mixer)
    }

    fn ones(frames: usize) -> SampleBuffer {
        SampleBuffer::new(vec![1.0; frames], 1, RATE)
    }

    fn play(port: &MixerPort, buffer: &SampleBuffer, at: f64) -> PlayableHandle {
        let handle = port.create_playable(buffer).unwrap();
        port.connect(&handle, Destination::Master).unwrap();
        port.start(&handle, at, 0.0, None).unwrap();
        handle
    }

    #[test]
    fn test_clock_advances_with_render() {
        let (port, mut mixer) = create_pair(2);
        assert_eq!(port.current_time(), 0.0);
        assert_eq!(port.state(), OutputState::Running);

        let mut out = vec![0.0; 200];
        mixer.render(&mut out);
        assert!((port.current_time() - 0.1).abs() < 1e-9);

        mixer.set_running(false);
        assert_eq!(port.state(), OutputState::Suspended);
    }

    #[test]
    fn test_scheduled_start_is_sample_accurate() {
        let (port, mut mixer) = create_pair(1);
        play(&port, &ones(100), 0.005);

        let mut out = vec![0.0; 10];
        mixer.render(&mut out);
        assert_eq!(&out[..5], &[0.0; 5]);
        assert_eq!(&out[5..], &[1.0; 5]);
    }

    #[test]
    fn test_mono_spreads_to_all_outputs() {
        let (port, mut mixer) = create_pair(2);
        play(&port, &ones(10), 0.0);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0; 4]);
    }

    #[test]
    fn test_gain_and_offset_duration() {
        let (port, mut mixer) = create_pair(1);
        let buffer = SampleBuffer::new((0..10).map(|i| i as f32).collect(), 1, RATE);
        let handle = port.create_playable(&buffer).unwrap();
        port.connect(&handle, Destination::Master).unwrap();
        port.set_gain(&handle, 0.5).unwrap();
        port.start(&handle, 0.0, 0.002, Some(0.003)).unwrap();

        let mut out = vec![0.0; 6];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 1.5, 2.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_completion_fires_once_at_natural_end() {
        let (port, mut mixer) = create_pair(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = play(&port, &ones(5), 0.0);
        port.on_completion(&handle, tx).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert!(rx.try_recv().is_err());

        mixer.render(&mut out);
        assert_eq!(rx.try_recv().unwrap(), handle.id());
        mixer.render(&mut out);
        assert!(rx.try_recv().is_err());

        port.disconnect(handle).unwrap();
        mixer.render(&mut out);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn test_completion_on_block_boundary() {
        let (port, mut mixer) = create_pair(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = play(&port, &ones(4), 0.0);
        port.on_completion(&handle, tx).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(rx.try_recv().unwrap(), handle.id());
    }

    #[test]
    fn test_ramp_fades_to_zero_and_completes() {
        let (port, mut mixer) = create_pair(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = play(&port, &ones(100), 0.0);
        port.on_completion(&handle, tx).unwrap();
        port.ramp_gain_to_zero(&handle, 0.002, 0.004).unwrap();

        let mut out = vec![0.0; 8];
        mixer.render(&mut out);
        assert_eq!(&out[..3], &[1.0, 1.0, 1.0]);
        assert!((out[3] - 0.75).abs() < 1e-6);
        assert!((out[4] - 0.5).abs() < 1e-6);
        assert!((out[5] - 0.25).abs() < 1e-6);
        assert_eq!(&out[6..], &[0.0, 0.0]);
        assert_eq!(rx.try_recv().unwrap(), handle.id());
    }

    #[test]
    fn test_later_ramp_does_not_extend_earlier_one() {
        let (port, mut mixer) = create_pair(1);
        let handle = play(&port, &ones(100), 0.0);
        port.ramp_gain_to_zero(&handle, 0.0, 0.002).unwrap();
        port.ramp_gain_to_zero(&handle, 0.0, 0.010).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![1.0, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_past_ramp_fades_from_clock_floor() {
        let (port, mut mixer) = create_pair(1);
        let handle = play(&port, &ones(100), 0.0);
        let mut out = vec![0.0; 10];
        mixer.render(&mut out);

        // Both the start and the end of this fade are already behind the clock.
        port.ramp_gain_to_zero(&handle, 0.002, 0.004).unwrap();
        let mut out = vec![0.0; 6];
        mixer.render(&mut out);
        assert_eq!(out[0], 1.0);
        assert!((out[1] - 0.75).abs() < 1e-6);
        assert!((out[2] - 0.5).abs() < 1e-6);
        assert!((out[3] - 0.25).abs() < 1e-6);
        assert_eq!(&out[4..], &[0.0, 0.0]);
    }

    #[test]
    fn test_buffer_at_another_rate() {
        let (port, mut mixer) = create_pair(1);
        let buffer = SampleBuffer::new((0..500).map(|i| i as f32).collect(), 1, RATE / 2);
        let handle = port.create_playable(&buffer).unwrap();
        port.connect(&handle, Destination::Master).unwrap();
        port.start(&handle, 0.0, 0.5, Some(0.5)).unwrap();

        let mut out = vec![0.0; 6];
        mixer.render(&mut out);
        assert_eq!(out, vec![250.0, 250.0, 251.0, 251.0, 252.0, 252.0]);

        // Half a second of the buffer lasts half a second of output.
        let mut out = vec![0.0; 500];
        mixer.render(&mut out);
        assert_eq!(out[493], 499.0);
        assert_eq!(out[494], 0.0);
    }

    #[test]
    fn test_finished_voice_released_without_listener() {
        let (port, mut mixer) = create_pair(1);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = play(&port, &ones(5), 0.0);
        port.on_completion(&handle, tx).unwrap();
        drop(rx);

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(mixer.voice_count(), 1);
        mixer.render(&mut out);
        assert_eq!(mixer.voice_count(), 0);
    }

    #[test]
    fn test_late_start_plays_from_clock_floor() {
        let (port, mut mixer) = create_pair(1);
        let mut out = vec![0.0; 10];
        mixer.render(&mut out);

        let buffer = SampleBuffer::new(vec![0.25, 0.5, 0.75], 1, RATE);
        play(&port, &buffer, 0.002);
        mixer.render(&mut out);
        assert_eq!(&out[..3], &[0.25, 0.5, 0.75]);
    }

    #[test]
    fn test_unconnected_voice_is_silent() {
        let (port, mut mixer) = create_pair(1);
        let handle = port.create_playable(&ones(10)).unwrap();
        port.start(&handle, 0.0, 0.0, None).unwrap();

        let mut out = vec![0.0; 4];
        mixer.render(&mut out);
        assert_eq!(out, vec![0.0; 4]);
    }

    #[test]
    fn test_port_reports_disconnected_render_side() {
        let (port, mixer) = create_pair(1);
        drop(mixer);
        assert!(matches!(
            port.create_playable(&ones(1)),
            Err(PortError::Disconnected)
        ));
    }
}
