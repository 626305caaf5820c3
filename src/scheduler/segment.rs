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

use super::request::{PlaybackRequest, Segment};

/// Absorbs floating point error when dividing a length into chunks, so that 3.0 / 1.0 never
/// turns into four segments.
const CHUNK_EPSILON: f64 = 1e-9;

/// Splits a request into contiguous segments no longer than `chunk_length`. Segment `k` plays
/// the buffer from `offset + k * chunk_length` starting at `time + k * chunk_length`. A request
/// with nothing left to play yields no segments. Every segment carries the `voice` key.
pub fn segment(request: PlaybackRequest, voice: u64, chunk_length: f64) -> Vec<Segment> {
    let available = request.buffer.duration() - request.offset;
    let length = match request.duration {
        Some(duration) => available.min(duration),
        None => available,
    };
    if length.is_nan() || length <= 0.0 {
        return Vec::new();
    }

    let count = ((length / chunk_length) - CHUNK_EPSILON).ceil().max(1.0) as usize;
    if count == 1 {
        return vec![Segment {
            id: request.id,
            voice,
            part: 0,
            buffer: request.buffer,
            time: request.time,
            offset: request.offset,
            duration: length,
            cutoff_id: request.cutoff_id,
            gain: request.gain,
        }];
    }

    (0..count)
        .map(|k| {
            let start = chunk_length * k as f64;
            Segment {
                id: request.id.as_ref().map(|id| format!("{}.{}", id, k)),
                voice,
                part: k,
                buffer: request.buffer.clone(),
                time: request.time + start,
                offset: request.offset + start,
                duration: chunk_length.min(length - start),
                cutoff_id: request.cutoff_id.clone(),
                gain: request.gain,
            }
        })
        .collect()
}
