// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Time-bounded polling.
//!
//! [`WaitUntil`] is the single retry loop used by every convergence check in
//! the harness (cluster health, PG states, daemon presence, device release).
//! It deliberately knows nothing about the condition being waited for: it
//! hands the caller a [`Tick`] per interval and the caller breaks out of the
//! loop on success.  If the loop falls through, the caller converts the
//! expiry into a [`WaitError`] carrying its own description of the last
//! observed state.

use std::time::{Duration, Instant};

#[derive(Debug, thiserror::Error)]
pub enum WaitError {
    #[error("condition not met after {elapsed:?} (last observed: {last})")]
    TimedOut { elapsed: Duration, last: String },
}

/// One polling opportunity.
#[derive(Clone, Copy, Debug)]
pub struct Tick {
    /// True once the cumulative elapsed time has reached the timeout.  The
    /// expired tick is still delivered (the caller gets one final check)
    /// and the iterator then terminates.
    pub expired: bool,
    pub elapsed: Duration,
}

/// A restartable, time-bounded polling iterator.
///
/// The first tick is delivered immediately, so a zero (or sub-interval)
/// timeout still yields exactly one check.  Between subsequent ticks the
/// calling thread sleeps for `interval`; concurrency, if wanted, comes from
/// running pollers on separate threads (see [`crate::parallel`]).
#[derive(Debug)]
pub struct WaitUntil {
    timeout: Duration,
    interval: Duration,
    start: Instant,
    ticks: u64,
    done: bool,
}

impl WaitUntil {
    pub fn new(timeout: Duration, interval: Duration) -> WaitUntil {
        WaitUntil {
            timeout,
            interval,
            start: Instant::now(),
            ticks: 0,
            done: false,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Builds the timeout error for a loop that fell through without a
    /// `break`, attaching the caller's description of the last observation.
    pub fn timed_out(&self, last: impl Into<String>) -> WaitError {
        WaitError::TimedOut { elapsed: self.elapsed(), last: last.into() }
    }
}

impl Iterator for WaitUntil {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        if self.done {
            return None;
        }
        if self.ticks > 0 {
            std::thread::sleep(self.interval);
        }
        self.ticks += 1;
        let elapsed = self.start.elapsed();
        let expired = elapsed >= self.timeout;
        if expired {
            self.done = true;
        }
        Some(Tick { expired, elapsed })
    }
}
