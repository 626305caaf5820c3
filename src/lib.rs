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

//! A sample-accurate clip scheduler. Play requests are split into bounded segments, queued by
//! start time and admitted into an output port a short lookahead before they are due. Active
//! segments are tracked so they can be faded out, and instruments in cutoff mode never sound
//! more than one voice at a time.

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
pub mod instrument;
pub mod sampler;
pub mod scheduler;
#[cfg(test)]
mod testutil;

pub use error::Error;
pub use instrument::{Clip, ClipEvent, ClipMode, Instrument, InstrumentCore};
pub use sampler::{InstrumentDefinition, Sampler, SamplerRef};
pub use scheduler::{PlaybackRequest, Scheduler, SchedulerConfig, Segment};
