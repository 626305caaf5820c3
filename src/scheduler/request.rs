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

use crate::audio::SampleBuffer;

/// A logical request to play (part of) a buffer at an absolute output-clock time.
#[derive(Clone, Debug)]
pub struct PlaybackRequest {
    /// Caller-assigned id used to target the sound later.
    pub id: Option<String>,
    pub buffer: SampleBuffer,
    /// Start time on the output port's clock, in seconds.
    pub time: f64,
    /// Where in the buffer to start reading, in seconds.
    pub offset: f64,
    /// How much of the buffer to play. None plays to the end.
    pub duration: Option<f64>,
    /// Mutes active sounds under this id prefix when this one starts.
    pub cutoff_id: Option<String>,
    /// Fixed linear gain.
    pub gain: Option<f32>,
}

impl PlaybackRequest {
    /// Creates a request to play the whole buffer at `time`.
    pub fn new(buffer: SampleBuffer, time: f64) -> PlaybackRequest {
        PlaybackRequest {
            id: None,
            buffer,
            time,
            offset: 0.0,
            duration: None,
            cutoff_id: None,
            gain: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> PlaybackRequest {
        self.id = Some(id.into());
        self
    }

    pub fn with_offset(mut self, offset: f64) -> PlaybackRequest {
        self.offset = offset;
        self
    }

    pub fn with_duration(mut self, duration: f64) -> PlaybackRequest {
        self.duration = Some(duration);
        self
    }

    pub fn with_cutoff(mut self, cutoff_id: impl Into<String>) -> PlaybackRequest {
        self.cutoff_id = Some(cutoff_id.into());
        self
    }

    pub fn with_gain(mut self, gain: f32) -> PlaybackRequest {
        self.gain = Some(gain);
        self
    }
}

/// A bounded slice of a request, the unit the scheduler admits.
#[derive(Clone, Debug)]
pub struct Segment {
    /// The request id, suffixed with the chunk index when the request was split.
    pub id: Option<String>,
    /// Identifies the originating request. Shared by all of its segments and unique within
    /// a scheduler.
    pub voice: u64,
    /// The chunk index within the originating request.
    pub part: usize,
    pub buffer: SampleBuffer,
    pub time: f64,
    pub offset: f64,
    pub duration: f64,
    pub cutoff_id: Option<String>,
    pub gain: Option<f32>,
}

impl Segment {
    /// Returns true if the segment's id falls under the prefix.
    pub fn matches(&self, prefix: &str) -> bool {
        matches_prefix(self.id.as_deref(), prefix)
    }
}

/// Matches ids against a prefix at `.` boundaries. The empty prefix matches everything,
/// including id-less sounds; any other prefix only matches ids equal to it or continuing it
/// after a `.`.
pub fn matches_prefix(id: Option<&str>, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    let Some(id) = id else {
        return false;
    };
    match id.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || prefix.ends_with('.'),
        None => false,
    }
}
