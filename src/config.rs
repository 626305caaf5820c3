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

//! YAML configuration for the sampler: output device, scheduler timing, samples, instruments
//! and sequences.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, File, FileFormat, Source};
use serde::Deserialize;
use tracing::info;

use crate::audio::{OutputFormat, OutputPort};
use crate::clock::ClockDriver;
use crate::error::Error;
use crate::instrument::ClipEvent;
use crate::sampler::{InstrumentDefinition, SampleLoader, Sampler};
use crate::scheduler::SchedulerConfig;

mod error;
mod timing;

pub use error::ConfigError;
pub use timing::Timing;

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_CHANNELS: u16 = 2;
const DEFAULT_MASTER_GAIN: f32 = 1.0;

/// A sample file and the gain it plays at.
#[derive(Deserialize, Clone, Debug, PartialEq)]
pub struct SampleDefinition {
    /// Path to the file, relative to the configuration file.
    pub file: String,

    /// Fixed linear gain (default: unity).
    pub gain: Option<f32>,
}

/// The configuration for a sampler.
#[derive(Deserialize, Clone, Debug)]
pub struct SamplerConfig {
    /// The audio device. Names starting with "mock" select a silent device.
    device: String,

    /// Output sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// Output channels (default: 2).
    channels: Option<u16>,

    /// Gain applied to the whole mix (default: 1.0).
    master_gain: Option<f32>,

    /// Scheduler timing.
    #[serde(default)]
    scheduler: Timing,

    #[serde(default)]
    samples: HashMap<String, SampleDefinition>,

    #[serde(default)]
    instruments: HashMap<String, InstrumentDefinition>,

    #[serde(default)]
    sequences: HashMap<String, Vec<ClipEvent>>,
}

impl SamplerConfig {
    /// Parse a sampler configuration from a YAML file.
    pub fn deserialize(path: &Path) -> Result<SamplerConfig, ConfigError> {
        SamplerConfig::from_source(File::from(path))
    }

    /// Parse a sampler configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<SamplerConfig, ConfigError> {
        SamplerConfig::from_source(File::from_str(yaml, FileFormat::Yaml))
    }

    fn from_source<S>(source: S) -> Result<SamplerConfig, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        Ok(Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize::<SamplerConfig>()?)
    }

    /// Returns the device from the configuration.
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    pub fn channels(&self) -> u16 {
        self.channels.unwrap_or(DEFAULT_CHANNELS)
    }

    pub fn master_gain(&self) -> f32 {
        self.master_gain.unwrap_or(DEFAULT_MASTER_GAIN)
    }

    /// Returns the format to open the output device with.
    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.sample_rate(),
            channels: self.channels(),
            master_gain: self.master_gain(),
        }
    }

    /// Returns the scheduler timing, with defaults for anything unset.
    pub fn scheduler(&self) -> Result<SchedulerConfig, ConfigError> {
        self.scheduler.scheduler_config()
    }

    pub fn samples(&self) -> &HashMap<String, SampleDefinition> {
        &self.samples
    }

    pub fn instruments(&self) -> &HashMap<String, InstrumentDefinition> {
        &self.instruments
    }

    pub fn sequences(&self) -> &HashMap<String, Vec<ClipEvent>> {
        &self.sequences
    }

    /// Returns the problems with references between samples, instruments and sequences,
    /// sorted. An empty list means the configuration is consistent.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, instrument) in self.instruments.iter() {
            if !self.samples.contains_key(&instrument.sample) {
                problems.push(format!(
                    "instrument {} uses unknown sample {}",
                    name, instrument.sample
                ));
            }
        }
        for name in self.sequences.keys() {
            if !self.instruments.contains_key(name) {
                problems.push(format!("sequence {} has no instrument", name));
            }
        }
        problems.sort();
        problems
    }

    /// Resolves a sample file against the directory holding the configuration.
    pub fn sample_path(base_path: &Path, file: &str) -> PathBuf {
        if Path::new(file).is_absolute() {
            PathBuf::from(file)
        } else {
            base_path.join(file)
        }
    }

    /// Creates a sampler on the given port, loads every sample and registers the
    /// instruments and sequences.
    pub fn init_sampler(
        &self,
        base_path: &Path,
        port: Arc<dyn OutputPort>,
        clock: Box<dyn ClockDriver>,
    ) -> Result<Sampler, Error> {
        let sampler = Sampler::new(self.scheduler()?, port, clock)?;

        let mut loader = SampleLoader::new(self.sample_rate());
        for (name, definition) in self.samples.iter() {
            let buffer = loader.load(&SamplerConfig::sample_path(base_path, &definition.file))?;
            sampler.set_sample(name.as_str(), buffer);
            if let Some(gain) = definition.gain {
                sampler.set_sample_gain(name.as_str(), gain);
            }
        }
        for (name, definition) in self.instruments.iter() {
            sampler.set_instrument(name.as_str(), definition.clone());
        }
        for (name, events) in self.sequences.iter() {
            sampler.set_sequence(name.as_str(), events.clone());
        }

        info!(
            samples = self.samples.len(),
            instruments = self.instruments.len(),
            sequences = self.sequences.len(),
            memory_kb = loader.total_memory_usage() / 1024,
            "Sampler initialized."
        );
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::Port;
    use crate::clock::ManualClock;
    use crate::instrument::ClipMode;
    use crate::testutil::{tone, write_wav};

    const CONFIG: &str = r#"
device: mock-device
sample_rate: 1000
channels: 1
scheduler:
  look_ahead: 50ms
  chunk_length: 2s
samples:
  kick:
    file: kick.wav
    gain: 0.5
  hat:
    file: hat.wav
instruments:
  drums:
    sample: kick
    mode: cutoff
  hats:
    sample: hat
sequences:
  drums:
    - time: 0.0
    - time: 0.5
  hats:
    - time: 0.25
"#;

    #[test]
    fn test_parse() -> Result<(), Box<dyn std::error::Error>> {
        let config = SamplerConfig::from_yaml(CONFIG)?;
        assert_eq!("mock-device", config.device());
        assert_eq!(1000, config.sample_rate());
        assert_eq!(1, config.channels());
        assert_eq!(1.0, config.master_gain());

        let scheduler = config.scheduler()?;
        assert!((scheduler.look_ahead - 0.05).abs() < 1e-9);
        assert!((scheduler.chunk_length - 2.0).abs() < 1e-9);
        assert!((scheduler.crossfade - 0.01).abs() < 1e-9);

        assert_eq!(
            Some(&SampleDefinition {
                file: "kick.wav".to_string(),
                gain: Some(0.5),
            }),
            config.samples().get("kick")
        );
        assert_eq!(
            Some(&InstrumentDefinition::clip("kick").with_mode(ClipMode::Cutoff)),
            config.instruments().get("drums")
        );
        assert_eq!(
            Some(&InstrumentDefinition::clip("hat")),
            config.instruments().get("hats")
        );
        assert_eq!(
            Some(&vec![ClipEvent::at(0.0), ClipEvent::at(0.5)]),
            config.sequences().get("drums")
        );
        assert!(config.problems().is_empty());
        Ok(())
    }

    #[test]
    fn test_minimal() -> Result<(), Box<dyn std::error::Error>> {
        let config = SamplerConfig::from_yaml("device: default")?;
        assert_eq!(DEFAULT_SAMPLE_RATE, config.sample_rate());
        assert_eq!(DEFAULT_CHANNELS, config.channels());
        assert_eq!(SchedulerConfig::default(), config.scheduler()?);
        assert!(config.samples().is_empty());
        Ok(())
    }

    #[test]
    fn test_missing_device() {
        assert!(matches!(
            SamplerConfig::from_yaml("sample_rate: 48000"),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_problems() -> Result<(), Box<dyn std::error::Error>> {
        let config = SamplerConfig::from_yaml(
            r#"
device: mock
instruments:
  bass:
    sample: missing
sequences:
  orphan:
    - time: 0.0
"#,
        )?;
        assert_eq!(
            vec![
                "instrument bass uses unknown sample missing".to_string(),
                "sequence orphan has no instrument".to_string(),
            ],
            config.problems()
        );
        Ok(())
    }

    #[test]
    fn test_init_sampler() -> Result<(), Box<dyn std::error::Error>> {
        let tempdir = tempfile::tempdir()?;
        write_wav(&tempdir.path().join("kick.wav"), &tone(50.0, 1000, 0.4), 1, 1000)?;
        write_wav(&tempdir.path().join("hat.wav"), &tone(200.0, 1000, 0.1), 1, 1000)?;
        let path = tempdir.path().join("sampler.yaml");
        std::fs::write(&path, CONFIG)?;

        let config = SamplerConfig::deserialize(&path)?;
        let port = Arc::new(Port::new(1000));
        let sampler = config.init_sampler(tempdir.path(), port, Box::new(ManualClock::new()))?;

        assert!(sampler
            .sample("kick")
            .is_some_and(|buffer| buffer.frames() == 400));
        assert_eq!(Some(0.5), sampler.sample_gain("kick"));
        assert_eq!(None, sampler.sample_gain("hat"));
        assert!((sampler.scheduler().config().chunk_length - 2.0).abs() < 1e-9);
        assert_eq!(3, sampler.play()?);
        Ok(())
    }

    #[test]
    fn test_init_sampler_missing_file() -> Result<(), Box<dyn std::error::Error>> {
        let tempdir = tempfile::tempdir()?;
        let config = SamplerConfig::from_yaml(CONFIG)?;
        let result = config.init_sampler(
            tempdir.path(),
            Arc::new(Port::new(1000)),
            Box::new(ManualClock::new()),
        );
        assert!(matches!(result, Err(Error::Load(_))));
        Ok(())
    }
}
