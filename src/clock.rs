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

//! Clock drivers invoke the scheduler tick at a fixed rate.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, info, span, Level};

use crate::audio::thread_priority;
use crate::error::Error;

/// The callback a clock driver invokes on every tick.
pub type TickCallback = Box<dyn FnMut() + Send>;

/// A periodic timer source.
pub trait ClockDriver: Send {
    /// Starts invoking `callback` `rate_hz` times per second.
    fn start(&mut self, callback: TickCallback, rate_hz: f64) -> Result<(), Error>;

    /// Stops the clock. The callback is not invoked after this returns.
    fn dispose(&mut self);
}

/// Runs the tick callback on a dedicated thread paced with spin_sleep, so stalls in the
/// calling thread do not delay admission.
#[derive(Default)]
pub struct ThreadClock {
    stop: Arc<AtomicBool>,
    join_handle: Option<thread::JoinHandle<()>>,
}

impl ThreadClock {
    pub fn new() -> ThreadClock {
        ThreadClock::default()
    }

    /// Returns true while the clock thread is running.
    pub fn is_running(&self) -> bool {
        self.join_handle.is_some() && !self.stop.load(Ordering::Relaxed)
    }
}

impl ClockDriver for ThreadClock {
    fn start(&mut self, mut callback: TickCallback, rate_hz: f64) -> Result<(), Error> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "clock rate must be positive, got {}",
                rate_hz
            )));
        }
        // Restarting replaces the previous thread.
        self.dispose();

        let period = Duration::from_secs_f64(1.0 / rate_hz);
        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();
        let join_handle = thread::Builder::new()
            .name("clip-clock".to_string())
            .spawn(move || {
                let span = span!(Level::INFO, "clock");
                let _enter = span.enter();

                let mut priority_set = false;
                thread_priority::configure_thread_priority(
                    thread_priority::thread_priority(),
                    false,
                    &mut priority_set,
                );
                info!(period = ?period, "Clock started.");

                let mut next = Instant::now();
                while !stop.load(Ordering::Relaxed) {
                    callback();
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        spin_sleep::sleep(next - now);
                    } else {
                        // Fell behind; don't try to catch up with a burst of ticks.
                        next = now;
                    }
                }
                debug!("Clock stopped.");
            })
            .map_err(|e| Error::InvalidConfig(format!("unable to start clock thread: {}", e)))?;
        self.join_handle = Some(join_handle);

        Ok(())
    }

    fn dispose(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join_handle) = self.join_handle.take() {
            let _ = join_handle.join();
        }
    }
}

impl Drop for ThreadClock {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A clock that never fires. Ticks are driven by calling `Scheduler::tick` directly.
#[derive(Default)]
pub struct ManualClock {
    rate_hz: Option<f64>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock::default()
    }

    /// Returns the rate the clock was started with, if it is started.
    pub fn rate_hz(&self) -> Option<f64> {
        self.rate_hz
    }
}

impl ClockDriver for ManualClock {
    fn start(&mut self, _: TickCallback, rate_hz: f64) -> Result<(), Error> {
        self.rate_hz = Some(rate_hz);
        Ok(())
    }

    fn dispose(&mut self) {
        self.rate_hz = None;
    }
}
