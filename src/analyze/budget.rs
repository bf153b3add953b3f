//! Time and attempt limits for polling a remote job.

use std::{fmt, time::Duration};

use tokio::time::Instant;

/// Why we stopped waiting for a job that was still running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutReason {
    /// The wall-clock deadline passed.
    Deadline,
    /// We used up our polling attempts.
    AttemptCeiling,
    /// Somebody cancelled the analysis.
    Cancelled,
}

impl fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutReason::Deadline => write!(f, "deadline reached"),
            TimeoutReason::AttemptCeiling => write!(f, "polling attempts exhausted"),
            TimeoutReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Stand-in deadline for timeouts too large to add to an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A polling budget, fixed when polling starts.
///
/// Both the deadline and the attempt ceiling are checked before every wait,
/// so a slow status request near the deadline can't buy us an extra round.
#[derive(Clone, Debug)]
pub struct PollBudget {
    started: Instant,
    deadline: Instant,
    interval: Duration,
    max_attempts: u32,
}

impl PollBudget {
    /// Start a budget of `timeout`, polling every `interval`.
    pub fn start(timeout: Duration, interval: Duration) -> Self {
        let started = Instant::now();
        Self {
            started,
            deadline: started
                .checked_add(timeout)
                .unwrap_or_else(|| started + FAR_FUTURE),
            interval,
            max_attempts: max_attempts(timeout, interval),
        }
    }

    /// How long we've been polling.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// How long a status request may run before we give up on it. That's the
    /// deadline, except that a request made right at the deadline still gets
    /// one poll interval to answer.
    pub fn fetch_cutoff(&self) -> Instant {
        self.deadline.max(Instant::now() + self.interval)
    }

    /// The most status requests we'll make.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// How long to wait before status request number `attempts_made + 1`, or
    /// why we shouldn't make one at all.
    pub fn next_wait(&self, attempts_made: u32) -> Result<Duration, TimeoutReason> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(TimeoutReason::Deadline)
        } else if attempts_made >= self.max_attempts {
            Err(TimeoutReason::AttemptCeiling)
        } else {
            Ok(self.interval.min(remaining))
        }
    }
}

/// `timeout / interval`, but always at least one attempt.
fn max_attempts(timeout: Duration, interval: Duration) -> u32 {
    let interval_ms = interval.as_millis().max(1);
    let attempts = timeout.as_millis() / interval_ms;
    u32::try_from(attempts).unwrap_or(u32::MAX).max(1)
}

/// What we saw on one status request.
#[derive(Clone, Debug)]
pub struct PollAttempt {
    /// 1-based attempt number.
    pub index: u32,
    /// Time since polling started.
    pub elapsed: Duration,
    /// The status the remote service reported, or `None` if the request
    /// failed transiently.
    pub status: Option<String>,
}
