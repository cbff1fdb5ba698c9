//! Sleep-based polling with an injectable clock.
//!
//! Remote jobs have no completion notification and no predictable
//! duration, so waiting is regulated by the interval between checks only.
//! There is no deadline; callers abandon a wait at the thread level.

use std::time::Duration;

/// Suspends the calling thread. Tests substitute a recording fake.
pub trait Clock {
    fn sleep(&self, duration: Duration);
}

/// [`Clock`] backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Interval between polls.
///
/// The first sleep lasts `interval`; each further sleep is multiplied by
/// `backoff` and capped at `max_interval`. A `backoff` of 1.0 polls at a
/// constant rate.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff: f64,
    pub max_interval: Duration,
}

impl PollPolicy {
    pub fn constant(interval: Duration) -> Self {
        PollPolicy {
            interval,
            backoff: 1.0,
            max_interval: interval,
        }
    }

    pub fn exponential(interval: Duration, backoff: f64, max_interval: Duration) -> Self {
        PollPolicy {
            interval,
            backoff,
            max_interval,
        }
    }

    fn next_interval(&self, current: Duration) -> Duration {
        if self.backoff <= 1.0 {
            return current;
        }
        let cap = self.max_interval.max(self.interval);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.backoff)
            .map_or(cap, |next| next.min(cap))
    }
}

/// Repeats a check until it yields a value, sleeping between attempts.
pub struct Poller<C> {
    policy: PollPolicy,
    clock: C,
}

impl<C: Clock> Poller<C> {
    pub fn new(policy: PollPolicy, clock: C) -> Self {
        Poller { policy, clock }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Call `check` until it returns `Ok(Some(_))`.
    ///
    /// The first check runs immediately. Errors from `check` end the wait.
    pub fn wait_for<T, E>(
        &self,
        mut check: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<T, E> {
        let mut interval = self.policy.interval;
        let mut polls: u64 = 1;
        loop {
            if let Some(value) = check()? {
                return Ok(value);
            }
            tracing::debug!(polls, wait_ms = interval.as_millis() as u64, "awaiting results");
            self.clock.sleep(interval);
            interval = self.policy.next_interval(interval);
            polls += 1;
        }
    }
}
