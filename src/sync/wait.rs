//! Bounded, cooperative condition-variable waits
//!
//! A blocked acquisition never sleeps indefinitely. It waits in slices of
//! `poll_interval`, and between slices it re-checks the caller's liveness
//! predicate and deadline. While the wait drags on it logs a stall warning
//! every `stall_warning`.

use std::{
    fmt,
    sync::{Arc, Condvar, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use crate::config::{DEFAULT_POLL_INTERVAL, DEFAULT_STALL_WARNING};

/// Caller-supplied "is the subsystem still running" predicate
pub type LivenessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Timing of blocking waits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    /// Length of a single condition-variable wait
    pub poll_interval: Duration,
    /// How long a wait may run before each stall warning
    pub stall_warning: Duration,
}

impl Default for WaitTiming {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            stall_warning: DEFAULT_STALL_WARNING,
        }
    }
}

impl WaitTiming {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_stall_warning(mut self, period: Duration) -> Self {
        self.stall_warning = period;
        self
    }
}

/// What the waiter should do after one slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Re-check the condition and wait again if needed
    Retry,
    /// The liveness predicate reported the subsystem has stopped
    Abandoned,
    /// The caller's deadline passed
    TimedOut,
}

/// State of one blocking wait
pub struct CooperativeWait {
    timing: WaitTiming,
    started: Instant,
    deadline: Option<Instant>,
    next_warning: Duration,
    still_running: Option<LivenessCheck>,
    what: String,
}

impl CooperativeWait {
    /// Start a wait; `what` names the waiter in stall warnings
    pub fn new(
        timing: WaitTiming,
        timeout: Option<Duration>,
        still_running: Option<LivenessCheck>,
        what: impl Into<String>,
    ) -> Self {
        let started = Instant::now();
        Self {
            timing,
            started,
            deadline: timeout.map(|t| started + t),
            next_warning: timing.stall_warning,
            still_running,
            what: what.into(),
        }
    }

    /// Wait one slice on `condvar`, releasing `guard` meanwhile
    pub fn wait<'g, T>(
        &mut self,
        condvar: &Condvar,
        guard: MutexGuard<'g, T>,
    ) -> (MutexGuard<'g, T>, WaitOutcome) {
        let mut slice = self.timing.poll_interval;
        if let Some(deadline) = self.deadline {
            slice = slice.min(deadline.saturating_duration_since(Instant::now()));
        }

        let (guard, _) = condvar
            .wait_timeout(guard, slice)
            .unwrap_or_else(PoisonError::into_inner);

        let elapsed = self.started.elapsed();
        if !self.timing.stall_warning.is_zero() && elapsed >= self.next_warning {
            log::warn!(
                "{}: still waiting after {:.1}s, possible stall",
                self.what,
                elapsed.as_secs_f64()
            );
            self.next_warning += self.timing.stall_warning;
        }

        if let Some(still_running) = &self.still_running {
            if !still_running() {
                return (guard, WaitOutcome::Abandoned);
            }
        }

        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return (guard, WaitOutcome::TimedOut);
            }
        }

        (guard, WaitOutcome::Retry)
    }

    /// Time spent waiting so far
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for CooperativeWait {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CooperativeWait")
            .field("timing", &self.timing)
            .field("deadline", &self.deadline)
            .field("has_liveness_check", &self.still_running.is_some())
            .field("what", &self.what)
            .finish()
    }
}
