//! Scale-out budget: the rolling counters and flags that cap how often new
//! runtimes may be started and how failures gate further attempts (§4.3.4).

use crate::clock::Clock;
use std::time::{Duration, Instant};

/// Rolling window over which start attempts/failures are counted.
pub const BUDGET_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Per-process scale-out budget, guarded by a single lock by the caller.
#[derive(Debug, Clone)]
pub struct ScaleOutBudget {
    window_start: Instant,
    start_attempts_in_window: u32,
    failed_starts_in_window: u32,
    scale_out_paused: bool,
    scale_out_cooldown_until: Option<Instant>,
    active_pulls: u32,
    active_builds: u32,
}

/// Why a spawn attempt was denied by the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetDenyReason {
    Paused,
    CooldownActive,
    StartAttemptBudgetExhausted,
    FailedStartBudgetExhausted,
}

impl std::fmt::Display for BudgetDenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            BudgetDenyReason::Paused => "scale-out is paused",
            BudgetDenyReason::CooldownActive => "scale-out cooldown active",
            BudgetDenyReason::StartAttemptBudgetExhausted => "Start attempt budget exceeded",
            BudgetDenyReason::FailedStartBudgetExhausted => "Failed start budget exceeded",
        })
    }
}

impl ScaleOutBudget {
    pub fn new(clock: &impl Clock) -> Self {
        Self {
            window_start: clock.now(),
            start_attempts_in_window: 0,
            failed_starts_in_window: 0,
            scale_out_paused: false,
            scale_out_cooldown_until: None,
            active_pulls: 0,
            active_builds: 0,
        }
    }

    fn reset_window_if_elapsed(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= BUDGET_WINDOW {
            self.window_start = now;
            self.start_attempts_in_window = 0;
            self.failed_starts_in_window = 0;
        }
    }

    /// Check whether a spawn attempt is currently permitted (§4.3.4). Does
    /// not register the attempt; callers call [`Self::register_attempt`]
    /// once admission is confirmed.
    pub fn check(
        &mut self,
        now: Instant,
        max_start_attempts: u32,
        max_failed_starts: u32,
    ) -> Result<(), BudgetDenyReason> {
        self.reset_window_if_elapsed(now);

        if self.scale_out_paused {
            return Err(BudgetDenyReason::Paused);
        }
        if let Some(until) = self.scale_out_cooldown_until {
            if now < until {
                return Err(BudgetDenyReason::CooldownActive);
            }
        }
        if self.start_attempts_in_window >= max_start_attempts {
            return Err(BudgetDenyReason::StartAttemptBudgetExhausted);
        }
        if self.failed_starts_in_window >= max_failed_starts {
            return Err(BudgetDenyReason::FailedStartBudgetExhausted);
        }
        Ok(())
    }

    /// Record an attempt, applying a cooldown if this attempt pushed the
    /// window over either budget.
    pub fn register_attempt(
        &mut self,
        now: Instant,
        max_start_attempts: u32,
        max_failed_starts: u32,
        cooldown: Duration,
    ) {
        self.reset_window_if_elapsed(now);
        self.start_attempts_in_window += 1;
        if self.start_attempts_in_window >= max_start_attempts
            || self.failed_starts_in_window >= max_failed_starts
        {
            self.scale_out_cooldown_until = Some(now + cooldown);
        }
    }

    /// Record a spawn failure, applying a cooldown if it pushed the window
    /// over the failure budget.
    pub fn register_failure(&mut self, now: Instant, max_failed_starts: u32, cooldown: Duration) {
        self.reset_window_if_elapsed(now);
        self.failed_starts_in_window += 1;
        if self.failed_starts_in_window >= max_failed_starts {
            self.scale_out_cooldown_until = Some(now + cooldown);
        }
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.scale_out_paused = paused;
    }

    pub fn start_attempts_in_window(&self) -> u32 {
        self.start_attempts_in_window
    }

    pub fn failed_starts_in_window(&self) -> u32 {
        self.failed_starts_in_window
    }

    pub fn cooldown_until(&self) -> Option<Instant> {
        self.scale_out_cooldown_until
    }

    /// Try to reserve a pull slot; returns `false` when at capacity.
    pub fn try_reserve_pull(&mut self, max_concurrent: u32) -> bool {
        if self.active_pulls >= max_concurrent {
            return false;
        }
        self.active_pulls += 1;
        true
    }

    pub fn release_pull(&mut self) {
        self.active_pulls = self.active_pulls.saturating_sub(1);
    }

    /// Try to reserve a build slot; returns `false` when at capacity.
    pub fn try_reserve_build(&mut self, max_concurrent: u32) -> bool {
        if self.active_builds >= max_concurrent {
            return false;
        }
        self.active_builds += 1;
        true
    }

    pub fn release_build(&mut self) {
        self.active_builds = self.active_builds.saturating_sub(1);
    }
}

#[cfg(test)]
#[path = "budget_tests.rs"]
mod tests;
