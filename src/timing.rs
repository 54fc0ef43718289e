//! Timing planner — converts an iteration's time budget into per-page
//! timing parameters.
//!
//! Derived once per iteration from the active page count; never shared
//! across iterations since the page count varies slot to slot.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Below this per-page budget a page gets a single observation run.
const SINGLE_RUN_BELOW_SECS: u64 = 90;

/// Below this per-page budget a page gets two runs; above it, the
/// configured base count applies.
const DOUBLE_RUN_BELOW_SECS: u64 = 240;

/// Fraction of the per-page budget spent on navigation.
const NAV_FRACTION: f64 = 0.45;
/// Fraction spent waiting for trailing network activity after load.
const SETTLE_FRACTION: f64 = 0.30;
/// Fraction reserved as safety margin before the watchdog ceiling.
const MARGIN_FRACTION: f64 = 0.20;

/// Inclusive `[min, max]` bounds for one derived timeout, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutBounds {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl TimeoutBounds {
    pub const fn new(min_ms: u64, max_ms: u64) -> Self {
        Self { min_ms, max_ms }
    }

    /// Clamp a requested value into these bounds.
    pub fn clamp(&self, requested_ms: u64) -> u64 {
        requested_ms.clamp(self.min_ms, self.max_ms)
    }
}

/// Per-category bounds for the three derived sub-budgets.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingBounds {
    pub navigation: TimeoutBounds,
    pub settle: TimeoutBounds,
    pub margin: TimeoutBounds,
}

impl Default for TimingBounds {
    fn default() -> Self {
        Self {
            navigation: TimeoutBounds::new(5_000, 60_000),
            settle: TimeoutBounds::new(2_000, 45_000),
            margin: TimeoutBounds::new(1_000, 30_000),
        }
    }
}

/// The timing parameters for one iteration.
///
/// Immutable once computed. `hard_ceiling_ms` is the sum of the three
/// clamped sub-budgets, so the watchdog can only fire after both inner
/// deadlines have had their chance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TimingPlan {
    /// How many times each page is observed this iteration.
    pub runs_per_page: u32,
    /// Deadline for a single navigation.
    pub nav_timeout_ms: u64,
    /// Post-load wait for trailing asynchronous network activity.
    pub post_load_wait_ms: u64,
    /// Hard wall-clock ceiling for one whole capture session.
    pub hard_ceiling_ms: u64,
    /// The raw per-page budget the sub-budgets were derived from.
    pub per_page_budget_ms: u64,
    /// Accepted for future elasticity; not consumed by the base formula.
    pub flex_minutes: u64,
}

impl TimingPlan {
    /// Derive the plan for one iteration.
    ///
    /// `active_page_count` is clamped to at least 1 so an empty slot
    /// still yields a valid (if unused) plan.
    pub fn derive(
        active_page_count: usize,
        target_minutes: u64,
        flex_minutes: u64,
        base_runs_per_page: u32,
        bounds: &TimingBounds,
    ) -> Self {
        let pages = active_page_count.max(1) as u64;
        let budget_ms = target_minutes * 60 * 1_000;
        let per_page_ms = budget_ms / pages;
        let per_page_secs = per_page_ms / 1_000;

        let runs_per_page = if per_page_secs < SINGLE_RUN_BELOW_SECS {
            1
        } else if per_page_secs < DOUBLE_RUN_BELOW_SECS {
            2
        } else {
            base_runs_per_page.max(1)
        };

        let nav_timeout_ms = bounds
            .navigation
            .clamp((per_page_ms as f64 * NAV_FRACTION) as u64);
        let post_load_wait_ms = bounds
            .settle
            .clamp((per_page_ms as f64 * SETTLE_FRACTION) as u64);
        let margin_ms = bounds
            .margin
            .clamp((per_page_ms as f64 * MARGIN_FRACTION) as u64);

        Self {
            runs_per_page,
            nav_timeout_ms,
            post_load_wait_ms,
            hard_ceiling_ms: nav_timeout_ms + post_load_wait_ms + margin_ms,
            per_page_budget_ms: per_page_ms,
            flex_minutes,
        }
    }

    pub fn nav_timeout(&self) -> Duration {
        Duration::from_millis(self.nav_timeout_ms)
    }

    pub fn post_load_wait(&self) -> Duration {
        Duration::from_millis(self.post_load_wait_ms)
    }

    pub fn hard_ceiling(&self) -> Duration {
        Duration::from_millis(self.hard_ceiling_ms)
    }
}
