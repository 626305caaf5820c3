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

//! The playback scheduler. Requests are split into bounded segments and queued by start time;
//! a periodic tick admits the segments that fall inside the lookahead window into the output
//! port and tracks them until the port reports completion.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, Weak},
};

use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::audio::{
    CompletionSender, Destination, OutputPort, OutputState, PlayableHandle, PlayableId, PortError,
};
use crate::clock::ClockDriver;
use crate::error::Error;

pub mod request;
pub mod segment;

pub use request::{matches_prefix, PlaybackRequest, Segment};

/// Timing knobs for the scheduler. All values are seconds and fixed after construction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SchedulerConfig {
    /// Period of the clock driving the tick.
    pub tick_interval: f64,
    /// How far ahead of the output clock segments are admitted.
    pub look_ahead: f64,
    /// The longest segment a request is split into.
    pub chunk_length: f64,
    /// Length of the fade to zero used when stopping sounds.
    pub crossfade: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval: 0.025,
            look_ahead: 0.1,
            chunk_length: 1.0,
            crossfade: 0.01,
        }
    }
}

impl SchedulerConfig {
    /// Checks that every knob is finite and positive. The lookahead may be zero.
    pub fn validate(&self) -> Result<(), Error> {
        let positive = [
            ("tick_interval", self.tick_interval),
            ("chunk_length", self.chunk_length),
            ("crossfade", self.crossfade),
        ];
        for (name, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{} must be positive, got {}",
                    name, value
                )));
            }
        }
        if !self.look_ahead.is_finite() || self.look_ahead < 0.0 {
            return Err(Error::InvalidConfig(format!(
                "look_ahead must not be negative, got {}",
                self.look_ahead
            )));
        }
        Ok(())
    }

    /// The rate the clock is started with.
    pub fn tick_rate_hz(&self) -> f64 {
        1.0 / self.tick_interval
    }
}

/// A segment that has been handed to the output port.
struct ActiveSegment {
    segment: Segment,
    handle: PlayableHandle,
}

struct State {
    /// Segments not yet admitted, ordered by start time.
    queue: VecDeque<Segment>,
    /// Segments admitted into the port, keyed by playable id.
    active: HashMap<PlayableId, ActiveSegment>,
    max_active: usize,
    /// Key for the next scheduled request's segments.
    next_voice: u64,
    disposed: bool,
}

struct Shared {
    state: Mutex<State>,
    port: Arc<dyn OutputPort>,
    config: SchedulerConfig,
    completion_tx: CompletionSender,
    completion_rx: Receiver<PlayableId>,
}

/// Owns the pending queue and the active set. Every public operation and every tick runs
/// under a single lock, so callers and the clock thread never observe a half-applied step.
pub struct Scheduler {
    shared: Arc<Shared>,
    clock: Mutex<Box<dyn ClockDriver>>,
}

impl Scheduler {
    /// Creates a scheduler and starts its clock.
    pub fn new(
        config: SchedulerConfig,
        port: Arc<dyn OutputPort>,
        mut clock: Box<dyn ClockDriver>,
    ) -> Result<Scheduler, Error> {
        config.validate()?;

        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                active: HashMap::new(),
                max_active: 0,
                next_voice: 0,
                disposed: false,
            }),
            port,
            config,
            completion_tx,
            completion_rx,
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        clock.start(
            Box::new(move || {
                if let Some(shared) = weak.upgrade() {
                    shared.tick();
                }
            }),
            config.tick_rate_hz(),
        )?;

        info!(
            tick_interval = config.tick_interval,
            look_ahead = config.look_ahead,
            chunk_length = config.chunk_length,
            crossfade = config.crossfade,
            "Scheduler started."
        );

        Ok(Scheduler {
            shared,
            clock: Mutex::new(clock),
        })
    }

    /// Splits the requests into segments and queues them. Nothing plays until a tick
    /// admits them.
    pub fn schedule(&self, requests: Vec<PlaybackRequest>) -> Result<(), Error> {
        let chunk_length = self.shared.config.chunk_length;
        let mut state = self.shared.state.lock();
        if state.disposed {
            return Err(Error::Disposed);
        }

        for request in requests {
            let voice = state.next_voice;
            state.next_voice += 1;
            state
                .queue
                .extend(segment::segment(request, voice, chunk_length));
        }
        // Stable, so equal start times keep their submission order.
        state
            .queue
            .make_contiguous()
            .sort_by(|a, b| a.time.total_cmp(&b.time));

        Ok(())
    }

    /// Admits every queued segment starting within the lookahead window. Does nothing while
    /// the output is suspended or after the scheduler is disposed.
    pub fn tick(&self) {
        self.shared.tick();
    }

    /// Fades out every active segment whose id matches the prefix, starting now or at `time`.
    /// The segments stay active until the port reports the fade has finished.
    pub fn stop_active(&self, prefix: &str, time: Option<f64>) {
        let state = self.shared.state.lock();
        self.shared.mute(&state, prefix, time);
    }

    /// Drops queued segments whose id matches the prefix. Active segments are untouched.
    pub fn clear_scheduled(&self, prefix: &str) {
        let mut state = self.shared.state.lock();
        Shared::drop_queued(&mut state, prefix);
    }

    /// Stops active segments and drops queued segments matching the prefix.
    pub fn clear(&self, prefix: &str) {
        let mut state = self.shared.state.lock();
        self.shared.mute(&state, prefix, None);
        Shared::drop_queued(&mut state, prefix);
    }

    /// Returns the queued segments matching the prefix, in admission order.
    pub fn scheduled(&self, prefix: &str) -> Vec<Segment> {
        let state = self.shared.state.lock();
        state
            .queue
            .iter()
            .filter(|segment| segment.matches(prefix))
            .cloned()
            .collect()
    }

    /// Returns the queued segments not matching the prefix, in admission order.
    pub fn scheduled_excluding(&self, prefix: &str) -> Vec<Segment> {
        let state = self.shared.state.lock();
        state
            .queue
            .iter()
            .filter(|segment| !segment.matches(prefix))
            .cloned()
            .collect()
    }

    /// Returns the number of segments currently playing.
    pub fn active_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.reap(&mut state);
        state.active.len()
    }

    /// Returns the number of active segments matching the prefix.
    pub fn active_matching(&self, prefix: &str) -> usize {
        let mut state = self.shared.state.lock();
        self.shared.reap(&mut state);
        state
            .active
            .values()
            .filter(|active| active.segment.matches(prefix))
            .count()
    }

    /// Returns the most segments that have been active at once.
    pub fn max_active_count(&self) -> usize {
        self.shared.state.lock().max_active
    }

    /// Resets the high-water mark to the current active count.
    pub fn reset_max_active_count(&self) {
        let mut state = self.shared.state.lock();
        self.shared.reap(&mut state);
        state.max_active = state.active.len();
    }

    /// Returns true if nothing is queued or playing.
    pub fn is_idle(&self) -> bool {
        let mut state = self.shared.state.lock();
        self.shared.reap(&mut state);
        state.queue.is_empty() && state.active.is_empty()
    }

    /// Returns the output port's clock time.
    pub fn current_time(&self) -> f64 {
        self.shared.port.current_time()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// Stops the clock, drops everything queued and fades out everything playing. Further
    /// ticks are no-ops and further scheduling fails.
    pub fn dispose(&self) {
        self.clock.lock().dispose();

        let mut state = self.shared.state.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.queue.clear();
        self.shared.mute(&state, "", None);
        self.shared.reap(&mut state);
        info!("Scheduler disposed.");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.dispose();
        // Fades that finished since disposal still hold their playables. Anything finishing
        // later is released by the port once it finds nobody listening.
        let mut state = self.shared.state.lock();
        self.shared.reap(&mut state);
    }
}

impl Shared {
    fn tick(&self) {
        let mut state = self.state.lock();
        self.reap(&mut state);
        if state.disposed || self.port.state() == OutputState::Suspended {
            return;
        }

        let now = self.port.current_time();
        let horizon = now + self.config.look_ahead;
        // Pop one head at a time; admission may itself drop queued segments.
        while state
            .queue
            .front()
            .is_some_and(|segment| segment.time <= horizon)
        {
            let Some(segment) = state.queue.pop_front() else {
                break;
            };
            self.admit(&mut state, segment, now);
        }
    }

    fn admit(&self, state: &mut State, segment: Segment, now: f64) {
        if segment.part == 0 {
            if let Some(cutoff_id) = segment.cutoff_id.as_deref() {
                // A late segment steals from now, so the fade is never already over.
                let stolen = self.mute(state, cutoff_id, Some(segment.time.max(now)));
                // A stolen voice must not come back at its next chunk.
                let before = state.queue.len();
                state
                    .queue
                    .retain(|queued| queued.part == 0 || !stolen.contains(&queued.voice));
                let dropped = before - state.queue.len();
                if dropped > 0 {
                    debug!(
                        cutoff_id,
                        dropped, "Dropped continuation segments of stolen voices."
                    );
                }
            }
        }

        if segment.time < now {
            debug!(
                id = segment.id.as_deref().unwrap_or(""),
                late = now - segment.time,
                "Admitting late segment."
            );
        }

        match self.start(&segment) {
            Ok(handle) => {
                debug!(
                    id = segment.id.as_deref().unwrap_or(""),
                    playable = handle.id(),
                    time = segment.time,
                    offset = segment.offset,
                    duration = segment.duration,
                    "Admitted segment."
                );
                state
                    .active
                    .insert(handle.id(), ActiveSegment { segment, handle });
                state.max_active = state.max_active.max(state.active.len());
            }
            Err(e) => {
                error!(
                    err = %e,
                    id = segment.id.as_deref().unwrap_or(""),
                    "Unable to start segment, dropping it."
                );
            }
        }
    }

    /// Creates and starts a playable for the segment, releasing it again if any step fails.
    fn start(&self, segment: &Segment) -> Result<PlayableHandle, PortError> {
        let handle = self.port.create_playable(&segment.buffer)?;
        let wired = (|| {
            self.port.connect(&handle, Destination::Master)?;
            if let Some(gain) = segment.gain {
                self.port.set_gain(&handle, gain)?;
            }
            self.port
                .on_completion(&handle, self.completion_tx.clone())?;
            self.port.start(
                &handle,
                segment.time,
                segment.offset,
                Some(segment.duration),
            )
        })();

        match wired {
            Ok(()) => Ok(handle),
            Err(e) => {
                let _ = self.port.disconnect(handle);
                Err(e)
            }
        }
    }

    /// Fades out the active segments matching the prefix and returns their voices.
    fn mute(&self, state: &State, prefix: &str, time: Option<f64>) -> HashSet<u64> {
        let from = time.unwrap_or_else(|| self.port.current_time());
        let mut voices = HashSet::new();
        for active in state
            .active
            .values()
            .filter(|active| active.segment.matches(prefix))
        {
            debug!(
                id = active.segment.id.as_deref().unwrap_or(""),
                from, "Fading out segment."
            );
            voices.insert(active.segment.voice);
            if let Err(e) =
                self.port
                    .ramp_gain_to_zero(&active.handle, from, self.config.crossfade)
            {
                error!(
                    err = %e,
                    id = active.segment.id.as_deref().unwrap_or(""),
                    "Unable to fade out segment."
                );
            }
        }
        voices
    }

    fn drop_queued(state: &mut State, prefix: &str) {
        state.queue.retain(|segment| !segment.matches(prefix));
    }

    /// Removes completed segments from the active set and disconnects them.
    fn reap(&self, state: &mut State) {
        while let Ok(id) = self.completion_rx.try_recv() {
            let Some(active) = state.active.remove(&id) else {
                continue;
            };
            debug!(
                id = active.segment.id.as_deref().unwrap_or(""),
                playable = id,
                "Segment completed."
            );
            if let Err(e) = self.port.disconnect(active.handle) {
                error!(err = %e, playable = id, "Unable to disconnect segment.");
            }
        }
    }
}
