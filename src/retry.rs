//! Retry Controller.
//!
//! Every statistics run goes through here. A run is a sequence of fully
//! independent attempts driven by [`RetryState`]: permanent failures stop
//! immediately, transient ones are retried after a fixed, increasing delay
//! until the attempt budget is spent.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RetryConfig;
use crate::error::ErrorClass;
use crate::models::{Id, SpendingStatistics};
use crate::pipeline::StatisticsRunner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt bookkeeping for one run.
#[derive(Debug, Clone)]
pub struct RetryState {
    attempt: u32,
    max_attempts: u32,
    delays: Vec<Duration>,
}

impl RetryState {
    pub fn new(max_attempts: u32, delays: Vec<Duration>) -> Self {
        Self {
            attempt: 1,
            max_attempts: max_attempts.max(1),
            delays,
        }
    }

    /// 1-based number of the current attempt.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the attempt after the current one. The last configured
    /// delay is reused once the schedule runs out.
    pub fn next_delay(&self) -> Duration {
        let idx = (self.attempt as usize).saturating_sub(1);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }

    /// Record that the current attempt failed and decide what happens next.
    pub fn record_failure(&mut self, class: ErrorClass) -> RetryDecision {
        if class == ErrorClass::Permanent || self.attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.next_delay();
        self.attempt += 1;
        RetryDecision::RetryAfter(delay)
    }
}

/// Final result of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded {
        attempts: u32,
        statistics: SpendingStatistics,
    },
    Failed {
        attempts: u32,
        class: ErrorClass,
        error: String,
    },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Failed { attempts, .. } => *attempts,
        }
    }
}

/// Fire-and-forget entry point used by the webhook router.
pub trait RefreshScheduler: Send + Sync {
    /// Start a background run for `user_id`. Returns false when a run is
    /// already in flight; that run then repeats once after it finishes.
    fn schedule(&self, user_id: Id) -> bool;
}

#[derive(Clone)]
pub struct RetryController {
    runner: Arc<dyn StatisticsRunner>,
    max_attempts: u32,
    delays: Vec<Duration>,
    in_flight: Arc<Mutex<HashMap<Id, bool>>>,
    dedup: bool,
}

impl RetryController {
    pub fn new(runner: Arc<dyn StatisticsRunner>, config: &RetryConfig) -> Self {
        Self {
            runner,
            max_attempts: config.max_attempts.max(1),
            delays: config.delays.clone(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            dedup: true,
        }
    }

    /// Disable coalescing of concurrent scheduled runs for the same user.
    pub fn without_dedup(mut self) -> Self {
        self.dedup = false;
        self
    }

    /// Run attempts until one succeeds, a permanent error occurs, or the
    /// attempt budget is exhausted. Never returns an error; every terminal
    /// state is logged.
    pub async fn run_with_retry(&self, user_id: &Id) -> RunOutcome {
        let mut state = RetryState::new(self.max_attempts, self.delays.clone());
        loop {
            let attempt = state.attempt();
            let err = match self.runner.run_once(user_id).await {
                Ok(statistics) => {
                    tracing::info!(user_id = %user_id, attempt, "Statistics run succeeded");
                    return RunOutcome::Succeeded {
                        attempts: attempt,
                        statistics,
                    };
                }
                Err(err) => err,
            };

            let class = err.class();
            match state.record_failure(class) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::warn!(
                        user_id = %user_id,
                        attempt,
                        max_attempts = state.max_attempts(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Statistics run failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::GiveUp => {
                    if class == ErrorClass::Permanent {
                        tracing::warn!(
                            user_id = %user_id,
                            attempts = attempt,
                            error = %err,
                            "Statistics run failed permanently; not retrying"
                        );
                    } else {
                        tracing::error!(
                            user_id = %user_id,
                            attempts = attempt,
                            error = %err,
                            "Statistics run exhausted retries"
                        );
                    }
                    return RunOutcome::Failed {
                        attempts: attempt,
                        class,
                        error: err.to_string(),
                    };
                }
            }
        }
    }

    /// Spawn [`Self::run_with_retry`] on the runtime and return immediately.
    ///
    /// Returns `None` when a scheduled run for the same user is already in
    /// flight in this process. The request is not lost: the in-flight task
    /// runs the whole sequence once more when it finishes, so data that
    /// arrived after its fetch still reaches the stored snapshot. Any number
    /// of requests during one run collapse into a single rerun.
    ///
    /// The handle resolves to the outcome of the last run the task performed.
    pub fn spawn(&self, user_id: Id) -> Option<JoinHandle<RunOutcome>> {
        let guard = if self.dedup {
            match InFlightGuard::acquire(&self.in_flight, &user_id) {
                Some(guard) => Some(guard),
                None => {
                    tracing::debug!(user_id = %user_id, "Run already in flight; rerun requested");
                    return None;
                }
            }
        } else {
            None
        };

        let controller = self.clone();
        Some(tokio::spawn(async move {
            let mut guard = guard;
            loop {
                let outcome = controller.run_with_retry(&user_id).await;
                let rerun = guard.as_mut().is_some_and(InFlightGuard::rerun_or_release);
                if !rerun {
                    return outcome;
                }
                tracing::info!(user_id = %user_id, "Refresh requested during run; running again");
            }
        }))
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

impl RefreshScheduler for RetryController {
    fn schedule(&self, user_id: Id) -> bool {
        self.spawn(user_id).is_some()
    }
}

/// Membership in the in-flight map, released on drop. The map value is the
/// user's "rerun requested" flag.
struct InFlightGuard {
    map: Arc<Mutex<HashMap<Id, bool>>>,
    user_id: Id,
    released: bool,
}

impl InFlightGuard {
    /// Claim `user_id`, or flag a rerun on the existing claim.
    fn acquire(map: &Arc<Mutex<HashMap<Id, bool>>>, user_id: &Id) -> Option<Self> {
        let mut in_flight = map.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(rerun) = in_flight.get_mut(user_id) {
            *rerun = true;
            return None;
        }
        in_flight.insert(user_id.clone(), false);
        Some(Self {
            map: map.clone(),
            user_id: user_id.clone(),
            released: false,
        })
    }

    /// Consume a pending rerun request, or release the claim when there is
    /// none. Check and release share one lock acquisition.
    fn rerun_or_release(&mut self) -> bool {
        let mut in_flight = self.map.lock().unwrap_or_else(|e| e.into_inner());
        match in_flight.get_mut(&self.user_id) {
            Some(rerun) if *rerun => {
                *rerun = false;
                true
            }
            _ => {
                in_flight.remove(&self.user_id);
                self.released = true;
                false
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if !self.released {
            self.map
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.user_id);
        }
    }
}
