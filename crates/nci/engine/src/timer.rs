//! Engine timers
//!
//! The engine arms at most one deadline per [`Timer`]; the host learns the
//! earliest through `poll_timeout` and reports expiry through
//! `handle_timeout`.

use std::time::Instant;

/// Engine timers
#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub(crate) enum Timer {
    /// Response watchdog of the in-flight command
    Command = 0,
    /// Collapses bursts of NFCEE discovery requests into one restart
    NfceeDebounce = 1,
}

impl Timer {
    const VALUES: [Self; 2] = [Self::Command, Self::NfceeDebounce];
}

/// Keeps track of the nearest timeout for each `Timer`
///
/// The host drives the table through the engine's `poll_timeout` and
/// `handle_timeout`.
#[derive(Debug, Clone, Default)]
pub(crate) struct TimerTable {
    data: [Option<Instant>; Timer::VALUES.len()],
}

impl TimerTable {
    /// Arm `timer` to fire at `time`, replacing any earlier deadline
    pub(crate) fn set(&mut self, timer: Timer, time: Instant) {
        self.data[timer as usize] = Some(time);
    }

    pub(crate) fn stop(&mut self, timer: Timer) {
        self.data[timer as usize] = None;
    }

    pub(crate) fn stop_all(&mut self) {
        self.data = Default::default();
    }

    /// Earliest armed deadline
    pub(crate) fn next_timeout(&self) -> Option<Instant> {
        self.data.iter().flatten().min().copied()
    }

    /// Disarm and return every timer whose deadline is at or before `now`
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Timer> {
        Timer::VALUES
            .into_iter()
            .filter(|timer| {
                let slot = &mut self.data[*timer as usize];
                match slot {
                    Some(deadline) if *deadline <= now => {
                        *slot = None;
                        true
                    }
                    _ => false,
                }
            })
            .collect()
    }
}
