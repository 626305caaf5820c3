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

use std::{fmt, sync::Arc};

use crate::error::Error;

pub mod buffer;
pub mod cpal;
pub mod mixer;
pub mod mock;
pub mod thread_priority;

pub use buffer::SampleBuffer;

/// Identifies a playable created by an output port.
pub type PlayableId = u64;

/// Receives the id of a playable once its playback has completed.
pub type CompletionSender = crossbeam_channel::Sender<PlayableId>;

/// Whether the output is currently advancing its clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputState {
    Running,
    Suspended,
}

/// Where a playable's gain stage is wired to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Destination {
    /// The port's master output.
    #[default]
    Master,
}

/// An owned handle to a playable source and its private gain stage. The handle is not
/// cloneable and is consumed by `disconnect`, so a playable can only be released once.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct PlayableHandle {
    id: PlayableId,
}

impl PlayableHandle {
    pub(crate) fn new(id: PlayableId) -> Self {
        Self { id }
    }

    /// Returns the id reported on completion.
    pub fn id(&self) -> PlayableId {
        self.id
    }
}

/// Errors reported by an output port.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("output is disconnected from its render thread")]
    Disconnected,

    #[error("unknown playable {0}")]
    UnknownPlayable(PlayableId),

    #[error("audio device error: {0}")]
    Device(String),
}

/// The audio output the scheduler admits segments into. Times are seconds on the port's
/// own monotonically increasing clock.
pub trait OutputPort: Send + Sync {
    /// Returns the current output clock time.
    fn current_time(&self) -> f64;

    /// Returns whether the output clock is running.
    fn state(&self) -> OutputState;

    /// Returns the output sample rate.
    fn sample_rate(&self) -> u32;

    /// Creates a playable bound to the given buffer, with its own gain stage at unity.
    fn create_playable(&self, buffer: &SampleBuffer) -> Result<PlayableHandle, PortError>;

    /// Connects the playable's gain stage to a destination.
    fn connect(&self, handle: &PlayableHandle, destination: Destination) -> Result<(), PortError>;

    /// Sets the fixed linear gain of the playable's gain stage.
    fn set_gain(&self, handle: &PlayableHandle, gain: f32) -> Result<(), PortError>;

    /// Ramps the gain linearly to zero over `duration` seconds starting at `from_time`.
    /// Playback completes when the ramp reaches zero.
    fn ramp_gain_to_zero(
        &self,
        handle: &PlayableHandle,
        from_time: f64,
        duration: f64,
    ) -> Result<(), PortError>;

    /// Starts playback at `at`, reading the buffer from `offset` for `duration` seconds (or to
    /// the end). A start time already in the past starts immediately.
    fn start(
        &self,
        handle: &PlayableHandle,
        at: f64,
        offset: f64,
        duration: Option<f64>,
    ) -> Result<(), PortError>;

    /// Registers where the completion of this playable is reported. Completion fires once.
    fn on_completion(
        &self,
        handle: &PlayableHandle,
        notify: CompletionSender,
    ) -> Result<(), PortError>;

    /// Disconnects the playable and releases its resources.
    fn disconnect(&self, handle: PlayableHandle) -> Result<(), PortError>;
}

/// An opened audio device exposing an output port.
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the output port rendering through this device.
    fn port(&self) -> Arc<dyn OutputPort>;
}

/// Output parameters used when opening a device.
#[derive(Clone, Copy, Debug)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub master_gain: f32,
}

/// Lists output devices known to cpal.
pub fn list_devices() -> Result<Vec<String>, Error> {
    cpal::Device::list()
}

/// Opens the device with the given name. Names starting with "mock" open a device that
/// renders in real time without producing sound.
pub fn get_device(name: &str, format: OutputFormat) -> Result<Box<dyn Device>, Error> {
    if name.starts_with("mock") {
        return Ok(Box::new(mock::Device::open(name, format)?));
    }

    Ok(Box::new(cpal::Device::open(name, format)?))
}
