//! Bounded polling until a resource reaches a target state.
//!
//! Every "wait until X" in the crate reduces to [`await_state`] with a
//! different target. The budget is decremented by the poll interval on each
//! iteration rather than by wall-clock time, so the number of polls is fixed
//! by the policy: a 20 s budget with a 5 s interval polls exactly four
//! times.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use crate::error::ProvisionError;

/// Budget used when waiting on server transitions.
pub const SERVER_WAIT_TIMEOUT: Duration = Duration::from_secs(120);
/// Interval between server state polls.
pub const SERVER_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Timeout and poll interval for a convergence wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollPolicy {
    timeout: Duration,
    interval: Duration,
}

impl PollPolicy {
    /// Builds a policy.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidPollPolicy`] when the interval is
    /// zero or the timeout is shorter than a single interval, either of
    /// which would poll forever or not at all.
    pub fn new(timeout: Duration, interval: Duration) -> Result<Self, ProvisionError> {
        if interval.is_zero() {
            return Err(ProvisionError::InvalidPollPolicy(String::from(
                "poll interval must be greater than zero",
            )));
        }
        if timeout < interval {
            return Err(ProvisionError::InvalidPollPolicy(format!(
                "timeout {timeout:?} is shorter than the poll interval {interval:?}"
            )));
        }
        Ok(Self { timeout, interval })
    }

    /// Policy applied to server create and delete waits.
    #[must_use]
    pub const fn server_default() -> Self {
        Self {
            timeout: SERVER_WAIT_TIMEOUT,
            interval: SERVER_POLL_INTERVAL,
        }
    }

    /// Total budget.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Interval slept before each poll.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::server_default()
    }
}

/// Polls until `poll` reports `target` or the budget runs out.
///
/// Each iteration sleeps for the policy interval, polls, compares, then
/// charges one interval against the remaining budget.
///
/// # Errors
///
/// Returns [`ProvisionError::Timeout`] carrying the last observed state when
/// the budget is exhausted, or the first error returned by `poll`.
pub async fn await_state<S, F, Fut>(
    resource_id: &str,
    target: &S,
    policy: PollPolicy,
    mut poll: F,
) -> Result<(), ProvisionError>
where
    S: PartialEq + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S, ProvisionError>>,
{
    let mut remaining = policy.timeout;
    loop {
        sleep(policy.interval).await;
        let observed = poll().await?;
        if observed == *target {
            debug!(resource = resource_id, state = %observed, "resource converged");
            return Ok(());
        }

        remaining = remaining.saturating_sub(policy.interval);
        debug!(
            resource = resource_id,
            state = %observed,
            target = %target,
            remaining_secs = remaining.as_secs(),
            "resource has not converged yet"
        );
        if remaining.is_zero() {
            return Err(ProvisionError::Timeout {
                resource_id: resource_id.to_owned(),
                target: target.to_string(),
                last_state: observed.to_string(),
            });
        }
    }
}
