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

use duration_string::DurationString;
use serde::Deserialize;

use super::error::ConfigError;
use crate::scheduler::SchedulerConfig;

/// A YAML representation of the scheduler timing. Every entry is a duration string such as
/// "25ms" or "1s"; missing entries keep their defaults.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Timing {
    /// How often the scheduler admits due segments.
    tick_interval: Option<String>,

    /// How far ahead of the output clock segments are admitted.
    look_ahead: Option<String>,

    /// The longest segment a sound is split into.
    chunk_length: Option<String>,

    /// Fade length when stopping sounds.
    crossfade: Option<String>,
}

fn seconds(
    field: &'static str,
    value: &Option<String>,
    default: f64,
) -> Result<f64, ConfigError> {
    match value {
        Some(value) => {
            let duration: std::time::Duration = DurationString::from_string(value.clone())
                .map_err(|e| ConfigError::Duration {
                    field,
                    value: value.clone(),
                    reason: e.to_string(),
                })?
                .into();
            Ok(duration.as_secs_f64())
        }
        None => Ok(default),
    }
}

impl Timing {
    /// Returns the scheduler configuration, filling in defaults.
    pub fn scheduler_config(&self) -> Result<SchedulerConfig, ConfigError> {
        let defaults = SchedulerConfig::default();
        Ok(SchedulerConfig {
            tick_interval: seconds("tick_interval", &self.tick_interval, defaults.tick_interval)?,
            look_ahead: seconds("look_ahead", &self.look_ahead, defaults.look_ahead)?,
            chunk_length: seconds("chunk_length", &self.chunk_length, defaults.chunk_length)?,
            crossfade: seconds("crossfade", &self.crossfade, defaults.crossfade)?,
        })
    }
}
