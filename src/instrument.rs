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

//! Instruments turn "play this now" into scheduler requests with per-event ids.

use crate::error::Error;
use crate::sampler::{Sampler, SamplerRef};

pub mod clip;

pub use clip::{Clip, ClipEvent, ClipMode};

/// Something that plays through a sampler. Every event id it mints starts with its own id.
pub trait Instrument: Send {
    /// Returns the instrument id.
    fn id(&self) -> &str;

    /// Binds the instrument to a sampler. An instrument can only be bound once.
    fn bind(&mut self, sampler: SamplerRef) -> Result<(), Error>;

    /// Releases external resources. Does nothing by default.
    fn dispose(&mut self) {}
}

/// The id, event counter and sampler binding every instrument needs.
#[derive(Debug)]
pub struct InstrumentCore {
    id: String,
    next_event: u64,
    sampler: Option<SamplerRef>,
}

impl InstrumentCore {
    pub fn new(id: impl Into<String>) -> InstrumentCore {
        InstrumentCore {
            id: id.into(),
            next_event: 0,
            sampler: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn bind(&mut self, sampler: SamplerRef) -> Result<(), Error> {
        if self.sampler.is_some() {
            return Err(Error::AlreadyRegistered {
                instrument: self.id.clone(),
            });
        }
        self.sampler = Some(sampler);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.sampler.is_some()
    }

    /// Returns the bound sampler. Fails if the instrument was never registered or the
    /// sampler is gone.
    pub fn sampler(&self) -> Result<Sampler, Error> {
        let sampler = self.sampler.as_ref().ok_or_else(|| Error::Unregistered {
            instrument: self.id.clone(),
        })?;
        sampler.upgrade().ok_or_else(|| Error::SamplerDropped {
            instrument: self.id.clone(),
        })
    }

    /// Mints the next event id, "<instrument id>.<n>".
    pub fn new_event_id(&mut self) -> String {
        let id = format!("{}.{}", self.id, self.next_event);
        self.next_event += 1;
        id
    }

    /// Returns true if the event id was minted by an instrument with this id.
    pub fn owns(&self, event_id: &str) -> bool {
        event_id
            .strip_prefix(self.id.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}
