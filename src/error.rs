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

//! Crate-wide error type.

use crate::audio::PortError;
use crate::config::ConfigError;
use crate::sampler::LoadError;

/// Errors returned by the scheduler, instruments and sampler.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Playback was requested on an instrument that was never added to a sampler.
    #[error("instrument {instrument} must be added to a sampler before playback")]
    Unregistered { instrument: String },

    /// An instrument can only ever be bound to one sampler.
    #[error("instrument {instrument} is already registered with a sampler")]
    AlreadyRegistered { instrument: String },

    /// The sampler an instrument was bound to has been dropped.
    #[error("the sampler for instrument {instrument} no longer exists")]
    SamplerDropped { instrument: String },

    /// The scheduler has been disposed and accepts no further work.
    #[error("scheduler has been disposed")]
    Disposed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("output port error: {0}")]
    Port(#[from] PortError),

    #[error("sample load error: {0}")]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
