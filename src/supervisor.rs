//! Retry governor and the main recording loop.
//!
//! The only mutable state of the whole supervisor is the failure streak,
//! owned by [`RetryPolicy`] and threaded explicitly through the loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::logging;
use crate::recorder::{SegmentOutcome, SegmentRecorder};

/// Settle delay after a successful segment, letting the filesystem finish
/// closing the previous file.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Delay after an isolated failure.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);
/// Cooldown after a burst of consecutive failures.
pub const COOLDOWN_DELAY: Duration = Duration::from_secs(30);
/// Consecutive failures that trigger the cooldown.
pub const FAILURE_THRESHOLD: u32 = 10;
/// Housekeeping runs on iterations where the streak is a multiple of this.
pub const HOUSEKEEPING_INTERVAL: u32 = 10;

/// What the governor decided to do after a segment outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    /// Success: settle briefly and continue.
    Settle,
    /// Isolated failure: short retry delay.
    Retry,
    /// Failure burst: long cooldown, streak reset afterwards.
    Cooldown,
}

impl NextAction {
    pub fn delay(self) -> Duration {
        match self {
            NextAction::Settle => SETTLE_DELAY,
            NextAction::Retry => RETRY_DELAY,
            NextAction::Cooldown => COOLDOWN_DELAY,
        }
    }
}

/// Failure-streak state machine.
#[derive(Debug, Default)]
pub struct RetryPolicy {
    streak: u32,
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Whether log housekeeping is due before the next attempt. True on the
    /// initial iteration.
    pub fn housekeeping_due(&self) -> bool {
        self.streak % HOUSEKEEPING_INTERVAL == 0
    }

    /// Record a segment outcome and decide the next action.
    ///
    /// The cooldown resets the streak: it is a circuit breaker against
    /// hammering an unreachable source, not a permanent stop.
    pub fn record(&mut self, success: bool) -> NextAction {
        if success {
            self.streak = 0;
            return NextAction::Settle;
        }

        self.streak += 1;
        if self.streak >= FAILURE_THRESHOLD {
            self.streak = 0;
            NextAction::Cooldown
        } else {
            NextAction::Retry
        }
    }
}

/// Runs segments forever, feeding outcomes to the retry policy. Returns only
/// once shutdown is requested.
pub struct Supervisor {
    config: Config,
    recorder: SegmentRecorder,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(config: Config, cancel: CancellationToken) -> Self {
        let recorder = SegmentRecorder::new(config.clone());
        Self {
            config,
            recorder,
            policy: RetryPolicy::new(),
            cancel,
        }
    }

    pub async fn run(&mut self) {
        info!("Recording supervisor started for {}", self.config.url);

        while !self.cancel.is_cancelled() {
            if self.policy.housekeeping_due() {
                logging::run_housekeeping(&self.config.log_file, &self.config.ffmpeg_log_file)
                    .await;
            }

            let action = match self.recorder.record(&self.cancel).await {
                SegmentOutcome::Cancelled => break,
                SegmentOutcome::Success { .. } => self.policy.record(true),
                SegmentOutcome::Failure { reason } => {
                    warn!(
                        "Segment failed ({}), consecutive failures: {}",
                        reason,
                        self.policy.streak() + 1
                    );
                    self.policy.record(false)
                }
            };

            if action == NextAction::Cooldown {
                warn!(
                    "{} consecutive segment failures, backing off for {}s",
                    FAILURE_THRESHOLD,
                    COOLDOWN_DELAY.as_secs()
                );
            }

            // Cancellation-aware sleep so shutdown never waits out a delay.
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(action.delay()) => {}
            }
        }

        info!("Recording supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_resets_streak_and_settles() {
        let mut policy = RetryPolicy::new();
        policy.record(false);
        policy.record(false);
        assert_eq!(policy.streak(), 2);

        assert_eq!(policy.record(true), NextAction::Settle);
        assert_eq!(policy.streak(), 0);
    }

    #[test]
    fn test_isolated_failures_retry_shortly() {
        let mut policy = RetryPolicy::new();
        for expected_streak in 1..FAILURE_THRESHOLD {
            assert_eq!(policy.record(false), NextAction::Retry);
            assert_eq!(policy.streak(), expected_streak);
        }
    }

    #[test]
    fn test_tenth_failure_cools_down_and_resets() {
        let mut policy = RetryPolicy::new();
        for _ in 1..FAILURE_THRESHOLD {
            assert_eq!(policy.record(false), NextAction::Retry);
        }
        assert_eq!(policy.record(false), NextAction::Cooldown);
        assert_eq!(policy.streak(), 0);

        // The loop keeps going after a cooldown.
        assert_eq!(policy.record(false), NextAction::Retry);
        assert_eq!(policy.streak(), 1);
    }

    #[test]
    fn test_action_delays() {
        assert_eq!(NextAction::Settle.delay(), Duration::from_secs(1));
        assert_eq!(NextAction::Retry.delay(), Duration::from_secs(5));
        assert_eq!(NextAction::Cooldown.delay(), Duration::from_secs(30));
    }

    #[test]
    fn test_housekeeping_schedule_follows_streak() {
        let mut policy = RetryPolicy::new();
        // Initial iteration.
        assert!(policy.housekeeping_due());

        policy.record(false);
        assert!(!policy.housekeeping_due());

        for _ in 0..9 {
            policy.record(false);
        }
        // Streak wrapped through the cooldown back to zero.
        assert!(policy.housekeeping_due());
    }
}
