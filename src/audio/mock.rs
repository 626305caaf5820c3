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

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tracing::{info, span, Level};

use crate::audio::{
    mixer::{self, MixerPort},
    CompletionSender, Destination, OutputFormat, OutputPort, OutputState, PlayableHandle,
    PlayableId, PortError, SampleBuffer,
};
use crate::error::Error;

/// Frames rendered per block by the mock device thread.
const MOCK_BLOCK_FRAMES: usize = 256;

/// A start instruction recorded by the mock port.
#[derive(Clone, Debug, PartialEq)]
pub struct StartRecord {
    pub id: PlayableId,
    pub at: f64,
    pub offset: f64,
    pub duration: Option<f64>,
}

struct MockPlayable {
    buffer_duration: f64,
    connected: bool,
    gain: f32,
    ramp: Option<(f64, f64)>,
    /// Effective start and natural end once started.
    playback: Option<(f64, f64)>,
    notify: Option<CompletionSender>,
    finished: bool,
}

impl MockPlayable {
    /// Returns when this playable stops sounding, if it has been started or faded.
    fn end_time(&self) -> Option<f64> {
        let ramp_end = self.ramp.map(|(_, end)| end);
        match (self.playback.map(|(_, end)| end), ramp_end) {
            (Some(natural), Some(ramp)) => Some(natural.min(ramp)),
            (Some(natural), None) => Some(natural),
            (None, _) => None,
        }
    }
}

struct MockState {
    now: f64,
    output_state: OutputState,
    next_id: PlayableId,
    playables: HashMap<PlayableId, MockPlayable>,
    starts: Vec<StartRecord>,
}

/// A deterministic output port. The clock only moves when `advance_to` is called, which is
/// also when completions are reported.
pub struct Port {
    sample_rate: u32,
    state: Mutex<MockState>,
}

impl Port {
    /// Creates a running mock port at time zero.
    pub fn new(sample_rate: u32) -> Port {
        Port {
            sample_rate,
            state: Mutex::new(MockState {
                now: 0.0,
                output_state: OutputState::Running,
                next_id: 1,
                playables: HashMap::new(),
                starts: Vec::new(),
            }),
        }
    }

    /// Sets the reported output state.
    pub fn set_state(&self, output_state: OutputState) {
        self.state.lock().output_state = output_state;
    }

    /// Moves the clock to `time` and reports completion for every playable whose natural end
    /// or fade-out end has been reached. Playables whose listener is gone are released.
    pub fn advance_to(&self, time: f64) {
        let mut state = self.state.lock();
        state.now = state.now.max(time);
        let now = state.now;
        let mut orphaned = Vec::new();
        for (id, playable) in state.playables.iter_mut() {
            if playable.finished {
                continue;
            }
            if playable.end_time().is_some_and(|end| end <= now) {
                playable.finished = true;
                if let Some(notify) = playable.notify.take() {
                    if notify.send(*id).is_err() {
                        orphaned.push(*id);
                    }
                }
            }
        }
        for id in orphaned {
            state.playables.remove(&id);
        }
    }

    /// Returns every start instruction received, in order.
    pub fn starts(&self) -> Vec<StartRecord> {
        self.state.lock().starts.clone()
    }

    /// Returns the fixed gain of a playable.
    pub fn gain(&self, id: PlayableId) -> Option<f32> {
        self.state.lock().playables.get(&id).map(|p| p.gain)
    }

    /// Returns the fade-out window of a playable, if one was requested.
    pub fn ramp(&self, id: PlayableId) -> Option<(f64, f64)> {
        self.state.lock().playables.get(&id).and_then(|p| p.ramp)
    }

    /// Returns true if the playable exists and is connected to a destination.
    pub fn is_connected(&self, id: PlayableId) -> bool {
        self.state
            .lock()
            .playables
            .get(&id)
            .is_some_and(|p| p.connected)
    }

    /// Returns the number of playables that have not been disconnected.
    pub fn live_playables(&self) -> usize {
        self.state.lock().playables.len()
    }

    fn with_playable<T>(
        &self,
        handle: &PlayableHandle,
        f: impl FnOnce(&mut MockPlayable, f64) -> T,
    ) -> Result<T, PortError> {
        let mut state = self.state.lock();
        let now = state.now;
        state
            .playables
            .get_mut(&handle.id())
            .map(|playable| f(playable, now))
            .ok_or(PortError::UnknownPlayable(handle.id()))
    }
}

impl OutputPort for Port {
    fn current_time(&self) -> f64 {
        self.state.lock().now
    }

    fn state(&self) -> OutputState {
        self.state.lock().output_state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn create_playable(&self, buffer: &SampleBuffer) -> Result<PlayableHandle, PortError> {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.playables.insert(
            id,
            MockPlayable {
                buffer_duration: buffer.duration(),
                connected: false,
                gain: 1.0,
                ramp: None,
                playback: None,
                notify: None,
                finished: false,
            },
        );
        Ok(PlayableHandle::new(id))
    }

    fn connect(&self, handle: &PlayableHandle, _: Destination) -> Result<(), PortError> {
        self.with_playable(handle, |playable, _| playable.connected = true)
    }

    fn set_gain(&self, handle: &PlayableHandle, gain: f32) -> Result<(), PortError> {
        self.with_playable(handle, |playable, _| playable.gain = gain)
    }

    fn ramp_gain_to_zero(
        &self,
        handle: &PlayableHandle,
        from_time: f64,
        duration: f64,
    ) -> Result<(), PortError> {
        self.with_playable(handle, |playable, now| {
            let from_time = from_time.max(now);
            let ramp = (from_time, from_time + duration);
            playable.ramp = match playable.ramp {
                Some(existing) if existing.1 <= ramp.1 => Some(existing),
                _ => Some(ramp),
            };
        })
    }

    fn start(
        &self,
        handle: &PlayableHandle,
        at: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<(), PortError> {
        self.with_playable(handle, |playable, now| {
            let available = (playable.buffer_duration - offset).max(0.0);
            let length = duration.map_or(available, |duration| duration.min(available));
            let begin = at.max(now);
            playable.playback = Some((begin, begin + length));
        })?;
        self.state.lock().starts.push(StartRecord {
            id: handle.id(),
            at,
            offset,
            duration,
        });
        Ok(())
    }

    fn on_completion(
        &self,
        handle: &PlayableHandle,
        notify: CompletionSender,
    ) -> Result<(), PortError> {
        self.with_playable(handle, |playable, _| playable.notify = Some(notify))
    }

    fn disconnect(&self, handle: PlayableHandle) -> Result<(), PortError> {
        self.state
            .lock()
            .playables
            .remove(&handle.id())
            .map(|_| ())
            .ok_or(PortError::UnknownPlayable(handle.id()))
    }
}

/// A mock device. Renders the mixer in real time on its own thread but doesn't actually
/// play anything.
pub struct Device {
    name: String,
    port: Arc<MixerPort>,
    stop: Arc<AtomicBool>,
    render_thread: Option<thread::JoinHandle<()>>,
}

impl Device {
    /// Opens a mock device and starts its render thread.
    pub fn open(name: &str, format: OutputFormat) -> Result<Device, Error> {
        let (port, mut mixer) = mixer::new(format);
        let stop = Arc::new(AtomicBool::new(false));
        let sample_rate = port.sample_rate();

        let render_thread = {
            let stop = stop.clone();
            let name = name.to_string();
            thread::Builder::new()
                .name("mock-render".to_string())
                .spawn(move || {
                    let span = span!(Level::INFO, "render (mock)");
                    let _enter = span.enter();
                    info!(device = name, sample_rate, "Mock output started.");

                    let mut block = vec![0.0f32; MOCK_BLOCK_FRAMES * mixer.channels() as usize];
                    let started = Instant::now();
                    let mut rendered: u64 = 0;
                    mixer.set_running(true);
                    while !stop.load(Ordering::Relaxed) {
                        mixer.render(&mut block);
                        rendered += MOCK_BLOCK_FRAMES as u64;
                        let due = Duration::from_secs_f64(rendered as f64 / sample_rate as f64);
                        if let Some(wait) = due.checked_sub(started.elapsed()) {
                            spin_sleep::sleep(wait);
                        }
                    }
                    mixer.set_running(false);
                })
                .map_err(|e| PortError::Device(e.to_string()))?
        };

        Ok(Device {
            name: name.to_string(),
            port: Arc::new(port),
            stop,
            render_thread: Some(render_thread),
        })
    }
}

impl super::Device for Device {
    fn port(&self) -> Arc<dyn OutputPort> {
        self.port.clone()
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.render_thread.take() {
            let _ = thread.join();
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::eventually;

    #[test]
    fn test_port_completes_at_natural_end() {
        let port = Port::new(44100);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = port
            .create_playable(&SampleBuffer::silent(1, 1000, 1.0))
            .unwrap();
        port.on_completion(&handle, tx).unwrap();
        port.start(&handle, 0.5, 0.25, None).unwrap();

        port.advance_to(1.2);
        assert!(rx.try_recv().is_err());
        port.advance_to(1.25);
        assert_eq!(rx.try_recv().unwrap(), handle.id());
        port.advance_to(5.0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_port_completes_at_ramp_end() {
        let port = Port::new(44100);
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = port
            .create_playable(&SampleBuffer::silent(1, 1000, 10.0))
            .unwrap();
        port.on_completion(&handle, tx).unwrap();
        port.start(&handle, 0.0, 0.0, None).unwrap();
        port.ramp_gain_to_zero(&handle, 1.0, 0.01).unwrap();

        port.advance_to(1.0);
        assert!(rx.try_recv().is_err());
        port.advance_to(1.02);
        assert_eq!(rx.try_recv().unwrap(), handle.id());
        let (from, to) = port.ramp(handle.id()).unwrap();
        assert_eq!(from, 1.0);
        assert!((to - 1.01).abs() < 1e-9);
    }

    #[test]
    fn test_port_disconnect_releases_playable() {
        let port = Port::new(44100);
        let handle = port
            .create_playable(&SampleBuffer::silent(1, 1000, 1.0))
            .unwrap();
        let id = handle.id();
        port.connect(&handle, Destination::Master).unwrap();
        assert!(port.is_connected(id));
        port.disconnect(handle).unwrap();
        assert!(!port.is_connected(id));
        assert_eq!(port.live_playables(), 0);
    }

    #[test]
    fn test_device_clock_runs() {
        let device = Device::open(
            "mock-device",
            OutputFormat {
                sample_rate: 44100,
                channels: 2,
                master_gain: 1.0,
            },
        )
        .unwrap();
        let port = super::super::Device::port(&device);
        eventually(
            || port.state() == OutputState::Running && port.current_time() > 0.01,
            "Mock device clock never advanced",
        );
        assert_eq!(device.to_string(), "mock-device (Mock)");
    }
}
