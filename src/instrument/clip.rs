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

use serde::Deserialize;
use tracing::debug;

use crate::audio::SampleBuffer;
use crate::error::Error;
use crate::instrument::{Instrument, InstrumentCore};
use crate::sampler::SamplerRef;
use crate::scheduler::PlaybackRequest;

/// How a clip treats its own earlier voices when it plays again.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClipMode {
    /// Voices play over each other.
    #[default]
    Overlap,
    /// A new voice fades out every other voice of the clip.
    Cutoff,
}

/// A sequence entry, relative to when the sequence is played.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct ClipEvent {
    /// Seconds after the sequence starts.
    pub time: f64,
}

impl ClipEvent {
    pub fn at(time: f64) -> ClipEvent {
        ClipEvent { time }
    }
}

/// Plays one registered sample, once or as a sequence.
#[derive(Debug)]
pub struct Clip {
    core: InstrumentCore,
    sample: String,
    mode: ClipMode,
    sequence: Vec<ClipEvent>,
}

impl Clip {
    pub fn new(id: impl Into<String>, sample: impl Into<String>) -> Clip {
        Clip {
            core: InstrumentCore::new(id),
            sample: sample.into(),
            mode: ClipMode::default(),
            sequence: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: ClipMode) -> Clip {
        self.mode = mode;
        self
    }

    pub fn sample(&self) -> &str {
        &self.sample
    }

    pub fn set_sample(&mut self, sample: impl Into<String>) {
        self.sample = sample.into();
    }

    pub fn mode(&self) -> ClipMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ClipMode) {
        self.mode = mode;
    }

    pub fn sequence(&self) -> &[ClipEvent] {
        &self.sequence
    }

    pub fn set_sequence(&mut self, sequence: Vec<ClipEvent>) {
        self.sequence = sequence;
    }

    /// Returns the clip's sample from the sampler registry, if it is loaded.
    pub fn sample_buffer(&self) -> Result<Option<SampleBuffer>, Error> {
        Ok(self.core.sampler()?.sample(&self.sample))
    }

    /// Plays the sample now. Returns the event id, or None if the sample isn't loaded.
    pub fn play_once(&mut self) -> Result<Option<String>, Error> {
        let sampler = self.core.sampler()?;
        let Some(buffer) = sampler.sample(&self.sample) else {
            debug!(clip = self.core.id(), sample = self.sample, "Sample not loaded.");
            return Ok(None);
        };

        let gain = sampler.sample_gain(&self.sample);
        let id = self.core.new_event_id();
        let request = self.request(buffer, sampler.current_time(), id.clone(), gain);
        sampler.scheduler().schedule(vec![request])?;
        Ok(Some(id))
    }

    /// Plays the sequence relative to now, as one batch. Returns the event ids in sequence
    /// order.
    pub fn play_sequence(&mut self) -> Result<Vec<String>, Error> {
        let sampler = self.core.sampler()?;
        if self.sequence.is_empty() {
            return Ok(Vec::new());
        }
        let Some(buffer) = sampler.sample(&self.sample) else {
            debug!(clip = self.core.id(), sample = self.sample, "Sample not loaded.");
            return Ok(Vec::new());
        };

        let gain = sampler.sample_gain(&self.sample);
        let now = sampler.current_time();
        let mut ids = Vec::with_capacity(self.sequence.len());
        let mut requests = Vec::with_capacity(self.sequence.len());
        for event in self.sequence.clone() {
            let id = self.core.new_event_id();
            requests.push(self.request(buffer.clone(), now + event.time, id.clone(), gain));
            ids.push(id);
        }
        sampler.scheduler().schedule(requests)?;
        Ok(ids)
    }

    /// Stops one event. Ids minted by other instruments are ignored; returns whether the
    /// stop was forwarded.
    pub fn stop_one(&self, id: &str) -> Result<bool, Error> {
        let sampler = self.core.sampler()?;
        if !self.core.owns(id) {
            debug!(clip = self.core.id(), id, "Ignoring stop for foreign event.");
            return Ok(false);
        }
        sampler.scheduler().clear(id);
        Ok(true)
    }

    /// Stops everything this clip has playing or queued.
    pub fn stop_all(&self) -> Result<(), Error> {
        self.core.sampler()?.scheduler().clear(self.core.id());
        Ok(())
    }

    fn request(
        &self,
        buffer: SampleBuffer,
        time: f64,
        id: String,
        gain: Option<f32>,
    ) -> PlaybackRequest {
        let mut request = PlaybackRequest::new(buffer, time).with_id(id);
        if self.mode == ClipMode::Cutoff {
            request = request.with_cutoff(self.core.id());
        }
        if let Some(gain) = gain {
            request = request.with_gain(gain);
        }
        request
    }
}

impl Instrument for Clip {
    fn id(&self) -> &str {
        self.core.id()
    }

    fn bind(&mut self, sampler: SamplerRef) -> Result<(), Error> {
        self.core.bind(sampler)
    }
}
