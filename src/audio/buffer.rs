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

use std::fmt;
use std::sync::Arc;

/// Immutable decoded audio shared between the registry, queued segments and the output port.
/// Cloning is cheap: the sample data lives behind an Arc.
#[derive(Clone)]
pub struct SampleBuffer {
    /// The sample data as f32 samples (interleaved if multi-channel).
    data: Arc<[f32]>,
    /// Number of channels in the buffer.
    channel_count: u16,
    /// Sample rate of the audio data.
    sample_rate: u32,
}

impl SampleBuffer {
    /// Creates a buffer from interleaved samples.
    pub fn new(data: Vec<f32>, channel_count: u16, sample_rate: u32) -> Self {
        Self {
            data: data.into(),
            channel_count: channel_count.max(1),
            sample_rate: sample_rate.max(1),
        }
    }

    /// Creates a buffer of silence lasting the given number of seconds.
    pub fn silent(channel_count: u16, sample_rate: u32, seconds: f64) -> Self {
        let frames = (seconds.max(0.0) * sample_rate as f64).round() as usize;
        Self::new(
            vec![0.0; frames * channel_count.max(1) as usize],
            channel_count,
            sample_rate,
        )
    }

    /// Returns the interleaved samples.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Returns the number of channels.
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Returns the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Returns the number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.data.len() / self.channel_count as usize
    }

    /// Returns the duration in seconds.
    pub fn duration(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns the memory size in bytes.
    pub fn memory_size(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    /// Returns true if both handles point at the same sample data.
    pub fn ptr_eq(&self, other: &SampleBuffer) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("channels", &self.channel_count)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_and_frames() {
        let buffer = SampleBuffer::new(vec![0.0; 88200], 2, 44100);
        assert_eq!(buffer.frames(), 44100);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
        assert_eq!(buffer.memory_size(), 88200 * 4);
    }

    #[test]
    fn test_silent() {
        let buffer = SampleBuffer::silent(1, 1000, 2.5);
        assert_eq!(buffer.frames(), 2500);
        assert!(buffer.data().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_clone_shares_data() {
        let buffer = SampleBuffer::silent(1, 1000, 0.1);
        let clone = buffer.clone();
        assert!(buffer.ptr_eq(&clone));
        assert!(!buffer.ptr_eq(&SampleBuffer::silent(1, 1000, 0.1)));
    }
}
