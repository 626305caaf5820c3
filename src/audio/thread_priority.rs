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

use thread_priority::{set_current_thread_priority, ThreadPriority, ThreadPriorityValue};
use tracing::info;

/// Default priority for the render and clock threads when CLIPTRACK_THREAD_PRIORITY is unset.
const DEFAULT_THREAD_PRIORITY: u8 = 70;

/// Reads CLIPTRACK_THREAD_PRIORITY (0-99) once; used when building threads so we don't touch
/// env in the hot path.
pub fn thread_priority() -> ThreadPriority {
    let value = std::env::var("CLIPTRACK_THREAD_PRIORITY")
        .ok()
        .and_then(|v| v.parse::<u8>().ok())
        .filter(|n| *n < 100)
        .unwrap_or(DEFAULT_THREAD_PRIORITY);
    ThreadPriorityValue::try_from(value)
        .map(ThreadPriority::Crossplatform)
        .unwrap_or(ThreadPriority::Max)
}

pub(crate) fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| parse_flag(&v))
        .unwrap_or(false)
}

fn parse_flag(value: &str) -> bool {
    value == "1"
        || value.eq_ignore_ascii_case("true")
        || value.eq_ignore_ascii_case("yes")
        || value.eq_ignore_ascii_case("on")
}

/// Returns whether we should attempt RT (SCHED_FIFO) scheduling for the render thread.
/// Default: enabled. Opt out with CLIPTRACK_DISABLE_RT_AUDIO=1.
pub fn rt_audio_enabled() -> bool {
    !env_flag("CLIPTRACK_DISABLE_RT_AUDIO")
}

/// Raises the priority of the current thread once. `priority_set` records that it happened so
/// callbacks can call this unconditionally.
pub fn configure_thread_priority(priority: ThreadPriority, rt: bool, priority_set: &mut bool) {
    if *priority_set {
        return;
    }
    let _ = set_current_thread_priority(priority);

    #[cfg(unix)]
    if rt {
        use thread_priority::unix::{
            set_thread_priority_and_policy, thread_native_id, RealtimeThreadSchedulePolicy,
            ThreadSchedulePolicy,
        };
        let tid = thread_native_id();
        match set_thread_priority_and_policy(
            tid,
            priority,
            ThreadSchedulePolicy::Realtime(RealtimeThreadSchedulePolicy::Fifo),
        ) {
            Ok(()) => {
                info!("Enabled RT SCHED_FIFO for thread");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to set RT SCHED_FIFO for thread");
            }
        }
    }
    #[cfg(not(unix))]
    let _ = rt;

    *priority_set = true;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("1"));
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("yes"));
        assert!(parse_flag("On"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("off"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn test_configure_only_once() {
        let mut priority_set = true;
        configure_thread_priority(ThreadPriority::Min, false, &mut priority_set);
        assert!(priority_set);
    }
}
