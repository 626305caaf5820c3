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

//! The sampler ties the scheduler to the sample, instrument and sequence registries.

use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
};

use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::audio::{OutputPort, SampleBuffer};
use crate::clock::ClockDriver;
use crate::error::Error;
use crate::instrument::{Clip, ClipEvent, ClipMode, Instrument};
use crate::scheduler::{PlaybackRequest, Scheduler, SchedulerConfig};

pub mod loader;
pub mod registry;

pub use loader::{LoadError, SampleLoader};
pub use registry::Registry;

/// A named instrument: which sample it plays and how its voices interact.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InstrumentDefinition {
    pub sample: String,
    #[serde(default)]
    pub mode: ClipMode,
}

impl InstrumentDefinition {
    /// A clip definition in overlap mode.
    pub fn clip(sample: impl Into<String>) -> InstrumentDefinition {
        InstrumentDefinition {
            sample: sample.into(),
            mode: ClipMode::Overlap,
        }
    }

    pub fn with_mode(mut self, mode: ClipMode) -> InstrumentDefinition {
        self.mode = mode;
        self
    }
}

struct SamplerShared {
    scheduler: Scheduler,
    samples: Registry<SampleBuffer>,
    sample_gains: Registry<f32>,
    instruments: Registry<InstrumentDefinition>,
    sequences: Registry<Vec<ClipEvent>>,
    next_instrument_id: AtomicU64,
    /// Per-sequence counters for the event ids minted by `play`.
    play_counters: Mutex<HashMap<String, u64>>,
}

/// Owns the scheduler and the registries. Cloning shares the same sampler.
#[derive(Clone)]
pub struct Sampler {
    shared: Arc<SamplerShared>,
}

/// A non-owning reference to a sampler, held by instruments.
#[derive(Clone, Debug)]
pub struct SamplerRef {
    shared: Weak<SamplerShared>,
}

impl SamplerRef {
    /// Returns the sampler if it still exists.
    pub fn upgrade(&self) -> Option<Sampler> {
        self.shared.upgrade().map(|shared| Sampler { shared })
    }
}

impl fmt::Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler")
            .field("samples", &self.shared.samples.names())
            .field("instruments", &self.shared.instruments.names())
            .field("sequences", &self.shared.sequences.names())
            .finish()
    }
}

impl Sampler {
    /// Creates a sampler with its own scheduler.
    pub fn new(
        config: SchedulerConfig,
        port: Arc<dyn OutputPort>,
        clock: Box<dyn ClockDriver>,
    ) -> Result<Sampler, Error> {
        Ok(Sampler {
            shared: Arc::new(SamplerShared {
                scheduler: Scheduler::new(config, port, clock)?,
                samples: Registry::new(),
                sample_gains: Registry::new(),
                instruments: Registry::new(),
                sequences: Registry::new(),
                next_instrument_id: AtomicU64::new(0),
                play_counters: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.shared.scheduler
    }

    pub fn downgrade(&self) -> SamplerRef {
        SamplerRef {
            shared: Arc::downgrade(&self.shared),
        }
    }

    /// Returns the output clock time.
    pub fn current_time(&self) -> f64 {
        self.shared.scheduler.current_time()
    }

    /// Sets or removes samples in one pass. A None buffer removes the sample.
    pub fn update_samples<I>(&self, samples: I)
    where
        I: IntoIterator<Item = (String, Option<SampleBuffer>)>,
    {
        for (name, buffer) in samples {
            match buffer {
                Some(buffer) => {
                    self.set_sample(name, buffer);
                }
                None => {
                    self.delete_sample(&name);
                }
            }
        }
    }

    pub fn set_sample(
        &self,
        name: impl Into<String>,
        buffer: SampleBuffer,
    ) -> Option<SampleBuffer> {
        let name = name.into();
        debug!(sample = name, duration = buffer.duration(), "Setting sample.");
        self.shared.samples.set(name, buffer)
    }

    pub fn delete_sample(&self, name: &str) -> Option<SampleBuffer> {
        self.shared.sample_gains.delete(name);
        self.shared.samples.delete(name)
    }

    pub fn sample(&self, name: &str) -> Option<SampleBuffer> {
        self.shared.samples.get(name)
    }

    /// Sets the fixed gain every request for this sample is played at.
    pub fn set_sample_gain(&self, name: impl Into<String>, gain: f32) {
        self.shared.sample_gains.set(name, gain);
    }

    pub fn sample_gain(&self, name: &str) -> Option<f32> {
        self.shared.sample_gains.get(name)
    }

    pub fn samples(&self) -> &Registry<SampleBuffer> {
        &self.shared.samples
    }

    pub fn set_instrument(
        &self,
        name: impl Into<String>,
        definition: InstrumentDefinition,
    ) -> Option<InstrumentDefinition> {
        self.shared.instruments.set(name, definition)
    }

    pub fn delete_instrument(&self, name: &str) -> Option<InstrumentDefinition> {
        self.shared.instruments.delete(name)
    }

    pub fn instrument(&self, name: &str) -> Option<InstrumentDefinition> {
        self.shared.instruments.get(name)
    }

    pub fn instruments(&self) -> &Registry<InstrumentDefinition> {
        &self.shared.instruments
    }

    pub fn set_sequence(
        &self,
        name: impl Into<String>,
        events: Vec<ClipEvent>,
    ) -> Option<Vec<ClipEvent>> {
        self.shared.sequences.set(name, events)
    }

    pub fn delete_sequence(&self, name: &str) -> Option<Vec<ClipEvent>> {
        self.shared.sequences.delete(name)
    }

    pub fn sequence(&self, name: &str) -> Option<Vec<ClipEvent>> {
        self.shared.sequences.get(name)
    }

    pub fn sequences(&self) -> &Registry<Vec<ClipEvent>> {
        &self.shared.sequences
    }

    /// Mints the next instrument id. Ids are "0", "1", ... per sampler.
    pub fn next_instrument_id(&self) -> String {
        self.shared
            .next_instrument_id
            .fetch_add(1, Ordering::Relaxed)
            .to_string()
    }

    /// Binds an instrument to this sampler.
    pub fn add_instrument(&self, instrument: &mut dyn Instrument) -> Result<(), Error> {
        instrument.bind(self.downgrade())?;
        debug!(instrument = instrument.id(), "Instrument registered.");
        Ok(())
    }

    /// Creates a clip with a fresh instrument id, bound to this sampler.
    pub fn create_clip(&self, sample: impl Into<String>) -> Result<Clip, Error> {
        let mut clip = Clip::new(self.next_instrument_id(), sample);
        self.add_instrument(&mut clip)?;
        Ok(clip)
    }

    /// Schedules every sequence that names a known instrument with a loaded sample, relative
    /// to now and in a single batch. Event ids are "<sequence>.<n>". Returns how many
    /// requests were scheduled.
    pub fn play(&self) -> Result<usize, Error> {
        let now = self.current_time();
        let mut requests = Vec::new();
        {
            let mut counters = self.shared.play_counters.lock();
            for (name, events) in self.shared.sequences.snapshot() {
                let Some(definition) = self.shared.instruments.get(&name) else {
                    warn!(sequence = name, "Sequence has no instrument, skipping.");
                    continue;
                };
                let Some(buffer) = self.shared.samples.get(&definition.sample) else {
                    warn!(
                        sequence = name,
                        sample = definition.sample,
                        "Sample not loaded, skipping."
                    );
                    continue;
                };
                let gain = self.shared.sample_gains.get(&definition.sample);

                let counter = counters.entry(name.clone()).or_insert(0);
                for event in events {
                    let mut request = PlaybackRequest::new(buffer.clone(), now + event.time)
                        .with_id(format!("{}.{}", name, counter));
                    *counter += 1;
                    if definition.mode == ClipMode::Cutoff {
                        request = request.with_cutoff(name.as_str());
                    }
                    if let Some(gain) = gain {
                        request = request.with_gain(gain);
                    }
                    requests.push(request);
                }
            }
        }

        let count = requests.len();
        self.shared.scheduler.schedule(requests)?;
        info!(requests = count, time = now, "Playing sequences.");
        Ok(count)
    }

    /// Stops everything playing or queued.
    pub fn stop(&self) {
        self.shared.scheduler.clear("");
    }

    /// Disposes the scheduler. Playback after this fails.
    pub fn dispose(&self) {
        self.shared.scheduler.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::Port;
    use crate::clock::ManualClock;
    use crate::testutil::buffer;

    fn setup() -> (Arc<Port>, Sampler) {
        let port = Arc::new(Port::new(1000));
        let sampler = Sampler::new(
            SchedulerConfig::default(),
            port.clone(),
            Box::new(ManualClock::new()),
        )
        .expect("sampler should start");
        (port, sampler)
    }

    fn scheduled(sampler: &Sampler) -> Vec<(String, f64, Option<String>)> {
        sampler
            .scheduler()
            .scheduled("")
            .into_iter()
            .map(|s| (s.id.unwrap_or_default(), s.time, s.cutoff_id))
            .collect()
    }

    #[test]
    fn test_instrument_ids() {
        let (_, sampler) = setup();
        assert_eq!("0", sampler.next_instrument_id());
        assert_eq!("1", sampler.next_instrument_id());
        let clip = sampler.create_clip("kick").expect("clip should register");
        assert_eq!("2", clip.id());

        // Each sampler counts on its own.
        let (_, other) = setup();
        assert_eq!("0", other.next_instrument_id());
    }

    #[test]
    fn test_update_samples() {
        let (_, sampler) = setup();
        sampler.update_samples(vec![
            ("kick".to_string(), Some(buffer(0.5))),
            ("snare".to_string(), Some(buffer(0.25))),
        ]);
        sampler.set_sample_gain("kick", 0.5);
        assert_eq!(vec!["kick", "snare"], sampler.samples().names());

        sampler.update_samples(vec![
            ("kick".to_string(), None),
            ("hat".to_string(), Some(buffer(0.1))),
        ]);
        assert_eq!(vec!["hat", "snare"], sampler.samples().names());
        assert!(sampler.sample("kick").is_none());
        assert_eq!(None, sampler.sample_gain("kick"));
        assert!(sampler
            .sample("snare")
            .is_some_and(|b| (b.duration() - 0.25).abs() < 1e-9));
    }

    #[test]
    fn test_registries() {
        let (_, sampler) = setup();
        assert_eq!(
            None,
            sampler.set_instrument("drums", InstrumentDefinition::clip("kick"))
        );
        assert_eq!(
            Some(InstrumentDefinition::clip("kick")),
            sampler.instrument("drums")
        );
        assert!(sampler.delete_instrument("drums").is_some());
        assert!(sampler.instrument("drums").is_none());

        sampler.set_sequence("drums", vec![ClipEvent::at(0.0)]);
        assert_eq!(Some(vec![ClipEvent::at(0.0)]), sampler.sequence("drums"));
        assert!(sampler.delete_sequence("drums").is_some());
        assert!(sampler.sequences().is_empty());
    }

    #[test]
    fn test_play_sequences() {
        let (port, sampler) = setup();
        port.advance_to(1.0);
        sampler.set_sample("kick", buffer(0.5));
        sampler.set_sample("hat", buffer(0.1));
        sampler.set_sample_gain("hat", 0.25);
        sampler.set_instrument(
            "drums",
            InstrumentDefinition::clip("kick").with_mode(ClipMode::Cutoff),
        );
        sampler.set_instrument("hats", InstrumentDefinition::clip("hat"));
        sampler.set_instrument("bass", InstrumentDefinition::clip("missing"));
        sampler.set_sequence("drums", vec![ClipEvent::at(0.0), ClipEvent::at(0.5)]);
        sampler.set_sequence("hats", vec![ClipEvent::at(0.25)]);
        sampler.set_sequence("bass", vec![ClipEvent::at(0.0)]);
        sampler.set_sequence("orphan", vec![ClipEvent::at(0.0)]);

        assert_eq!(3, sampler.play().expect("play"));
        assert_eq!(
            vec![
                ("drums.0".to_string(), 1.0, Some("drums".to_string())),
                ("hats.0".to_string(), 1.25, None),
                ("drums.1".to_string(), 1.5, Some("drums".to_string())),
            ],
            scheduled(&sampler)
        );
        let hats = sampler.scheduler().scheduled("hats");
        assert_eq!(Some(0.25), hats[0].gain);

        // Counters carry on across plays.
        sampler.stop();
        assert_eq!(3, sampler.play().expect("play"));
        assert!(sampler
            .scheduler()
            .scheduled("drums")
            .iter()
            .any(|s| s.id.as_deref() == Some("drums.3")));
    }

    #[test]
    fn test_stop() {
        let (port, sampler) = setup();
        sampler.set_sample("kick", buffer(2.0));
        sampler.set_instrument("drums", InstrumentDefinition::clip("kick"));
        sampler.set_sequence("drums", vec![ClipEvent::at(0.0), ClipEvent::at(1.0)]);
        sampler.play().expect("play");
        sampler.scheduler().tick();

        sampler.stop();
        assert!(sampler.scheduler().scheduled("").is_empty());
        assert!(port.ramp(port.starts()[0].id).is_some());
    }

    #[test]
    fn test_dispose() {
        let (_, sampler) = setup();
        sampler.set_sample("kick", buffer(0.5));
        sampler.set_instrument("drums", InstrumentDefinition::clip("kick"));
        sampler.set_sequence("drums", vec![ClipEvent::at(0.0)]);
        sampler.dispose();
        assert!(matches!(sampler.play(), Err(Error::Disposed)));
    }
}
