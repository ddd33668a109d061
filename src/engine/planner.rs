//! Per-cycle action planning under the time budget and storage cap.

use tracing::{debug, info};

use crate::protocol::{Activity, PlanReport};

/// Seconds kept free for walking, delays, and flame-outs when sizing a
/// plan against the remaining time.
pub const SAFETY_BUFFER_SECS: f64 = 5.0;

/// Units planned beyond the strict time budget, absorbing estimate
/// undershoot.
pub const EXTRA_UNITS_BUFFER: u32 = 2;

/// EMA factor for folding an observed unit duration into the average.
const DURATION_ALPHA: f64 = 0.2;

/// Observed unit durations outside this window are sampling artifacts.
const COMPLETION_SANITY_MIN_MS: u64 = 600;
const COMPLETION_SANITY_MAX_MS: u64 = 10_000;

// ── Activity duration averages ─────────────────────────────────────

/// Live average duration per unit of each activity, milliseconds.
/// Starts from priors and converges on observed behavior.
#[derive(Debug, Clone, Copy)]
pub struct ActivityAverages {
    pub gather_ms: f64,
    pub process_ms: f64,
    pub stoke_ms: f64,
}

impl Default for ActivityAverages {
    fn default() -> Self {
        Self {
            gather_ms: 2800.0,
            process_ms: 2200.0,
            stoke_ms: 1600.0,
        }
    }
}

impl ActivityAverages {
    pub fn average_ms(&self, activity: Activity) -> f64 {
        match activity {
            Activity::Gather => self.gather_ms,
            Activity::Process => self.process_ms,
            Activity::Stoke => self.stoke_ms,
        }
    }

    /// Fold one observed duration into the matching average.
    fn note(&mut self, activity: Activity, duration_ms: u64) {
        if !(COMPLETION_SANITY_MIN_MS..=COMPLETION_SANITY_MAX_MS).contains(&duration_ms) {
            return;
        }
        let slot = match activity {
            Activity::Gather => &mut self.gather_ms,
            Activity::Process => &mut self.process_ms,
            Activity::Stoke => &mut self.stoke_ms,
        };
        *slot = *slot * (1.0 - DURATION_ALPHA) + duration_ms as f64 * DURATION_ALPHA;
    }
}

// ── Action plan ────────────────────────────────────────────────────

/// Target and progress counts for one gather→process→consume cycle.
/// At most one is active at a time.
#[derive(Debug, Clone, Copy)]
pub struct ActionPlan {
    pub gather_target: u32,
    pub process_target: u32,
    pub stoke_target: u32,
    pub gathered: u32,
    pub processed: u32,
    pub stoked: u32,
}

impl ActionPlan {
    /// The gather stage checks on-hand material rather than the raw
    /// completion count, so fuel processed mid-plan still counts.
    pub fn gather_satisfied(&self, on_hand_burnables: u32) -> bool {
        on_hand_burnables >= self.gather_target
    }

    pub fn process_satisfied(&self, raw_on_hand: u32) -> bool {
        raw_on_hand == 0 || self.processed >= self.process_target
    }

    /// The consume activity governs plan completion.
    pub fn is_complete(&self) -> bool {
        self.stoked >= self.stoke_target
    }
}

// ── Planner ────────────────────────────────────────────────────────

/// Timestamps of the last unit-completion signal per activity, used to
/// derive unit durations from consecutive signals. Phase-scoped: reset
/// on phase exit so gaps never span unrelated work.
#[derive(Debug, Clone, Copy, Default)]
struct SignalTimers {
    gather_ms: Option<u64>,
    process_ms: Option<u64>,
    stoke_ms: Option<u64>,
}

impl SignalTimers {
    fn slot(&mut self, activity: Activity) -> &mut Option<u64> {
        match activity {
            Activity::Gather => &mut self.gather_ms,
            Activity::Process => &mut self.process_ms,
            Activity::Stoke => &mut self.stoke_ms,
        }
    }
}

#[derive(Debug, Default)]
pub struct ActionPlanner {
    averages: ActivityAverages,
    plan: Option<ActionPlan>,
    timers: SignalTimers,
}

impl ActionPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plan(&self) -> Option<&ActionPlan> {
        self.plan.as_ref()
    }

    pub fn averages(&self) -> &ActivityAverages {
        &self.averages
    }

    /// Time to take one unit through every enabled sub-action, seconds.
    pub fn per_unit_time_secs(&self, process_enabled: bool) -> f64 {
        let process = if process_enabled {
            self.averages.process_ms
        } else {
            0.0
        };
        (self.averages.gather_ms + process + self.averages.stoke_ms) / 1000.0
    }

    /// Create a plan sized to the remaining time and free capacity.
    /// Returns the new plan, or nothing when one is already active or
    /// there is not enough time/space for a single unit. The caller is
    /// responsible for only asking once leftover materials are gone.
    pub fn try_create(
        &mut self,
        estimated_secs_left: f64,
        free_slots: u32,
        process_enabled: bool,
    ) -> Option<&ActionPlan> {
        if self.plan.is_some() {
            return None;
        }

        let per_unit = self.per_unit_time_secs(process_enabled);
        if per_unit <= 0.1 {
            return None;
        }

        let available = estimated_secs_left - SAFETY_BUFFER_SECS;
        let max_by_time = (available / per_unit).floor() as i64;
        let target = (max_by_time + EXTRA_UNITS_BUFFER as i64).min(free_slots as i64);
        if target <= 0 {
            debug!(
                estimated_secs_left,
                free_slots, "not enough time or space for a plan"
            );
            return None;
        }

        let target = target as u32;
        let plan = ActionPlan {
            gather_target: target,
            process_target: if process_enabled { target } else { 0 },
            stoke_target: target,
            gathered: 0,
            processed: 0,
            stoked: 0,
        };
        info!(
            units = target,
            per_unit_secs = per_unit,
            "new action plan"
        );
        self.plan = Some(plan);
        self.plan.as_ref()
    }

    /// Handle one unit-completion signal: advance plan progress and
    /// fold the gap since the previous signal into the duration average.
    pub fn record_completion(&mut self, activity: Activity, now_ms: u64) {
        if let Some(last) = *self.timers.slot(activity) {
            self.averages.note(activity, now_ms.saturating_sub(last));
        }
        *self.timers.slot(activity) = Some(now_ms);

        if let Some(plan) = self.plan.as_mut() {
            match activity {
                Activity::Gather => plan.gathered += 1,
                Activity::Process => plan.processed += 1,
                Activity::Stoke => plan.stoked += 1,
            }
        }
    }

    /// Forget the last signal timestamp for `activity` so a stale gap
    /// is never measured across a phase change.
    pub fn reset_signal_timer(&mut self, activity: Activity) {
        *self.timers.slot(activity) = None;
    }

    pub fn clear(&mut self) {
        if self.plan.take().is_some() {
            debug!("action plan cleared");
        }
    }

    /// Full reset, including learned duration averages.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) -> Option<PlanReport> {
        self.plan.map(|p| PlanReport {
            gather_target: p.gather_target,
            process_target: p.process_target,
            stoke_target: p.stoke_target,
            gathered: p.gathered,
            processed: p.processed,
            stoked: p.stoked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_sizing_matches_worked_example() {
        let mut planner = ActionPlanner::new();
        // Priors: 2800 + 2200 + 1600 = 6.6 s per unit.
        assert!((planner.per_unit_time_secs(true) - 6.6).abs() < 1e-9);

        let plan = planner.try_create(130.0, 28, true).copied().unwrap();
        // floor(125 / 6.6) = 18, +2 buffer = 20, min(20, 28) = 20.
        assert_eq!(plan.gather_target, 20);
        assert_eq!(plan.process_target, 20);
        assert_eq!(plan.stoke_target, 20);
    }

    #[test]
    fn space_caps_the_target() {
        let mut planner = ActionPlanner::new();
        let plan = planner.try_create(130.0, 12, true).copied().unwrap();
        assert_eq!(plan.gather_target, 12);
    }

    #[test]
    fn disabled_process_gets_zero_target() {
        let mut planner = ActionPlanner::new();
        assert!((planner.per_unit_time_secs(false) - 4.4).abs() < 1e-9);
        let plan = planner.try_create(60.0, 28, false).copied().unwrap();
        assert_eq!(plan.process_target, 0);
        assert!(plan.gather_target > 0);
    }

    #[test]
    fn no_plan_when_out_of_time() {
        let mut planner = ActionPlanner::new();
        // 5 s estimate minus the 5 s safety buffer leaves nothing.
        assert!(planner.try_create(5.0, 28, true).is_none());
        assert!(planner.plan().is_none());
    }

    #[test]
    fn at_most_one_active_plan() {
        let mut planner = ActionPlanner::new();
        assert!(planner.try_create(130.0, 28, true).is_some());
        assert!(planner.try_create(130.0, 28, true).is_none());
        planner.clear();
        assert!(planner.try_create(130.0, 28, true).is_some());
    }

    #[test]
    fn completion_signals_advance_progress_and_averages() {
        let mut planner = ActionPlanner::new();
        planner.try_create(130.0, 28, true);

        // First signal only arms the timer.
        planner.record_completion(Activity::Stoke, 10_000);
        // Second signal, 3 s later: stoke avg 1600 * 0.8 + 3000 * 0.2.
        planner.record_completion(Activity::Stoke, 13_000);
        assert!((planner.averages().stoke_ms - 1880.0).abs() < 1e-9);
        assert_eq!(planner.plan().unwrap().stoked, 2);
    }

    #[test]
    fn out_of_window_gaps_leave_average_alone() {
        let mut planner = ActionPlanner::new();
        planner.record_completion(Activity::Gather, 0);
        planner.record_completion(Activity::Gather, 60_000); // 60 s gap
        assert!((planner.averages().gather_ms - 2800.0).abs() < 1e-9);

        planner.reset_signal_timer(Activity::Gather);
        planner.record_completion(Activity::Gather, 61_000);
        assert!((planner.averages().gather_ms - 2800.0).abs() < 1e-9);
    }

    #[test]
    fn governing_activity_completes_the_plan() {
        let mut planner = ActionPlanner::new();
        planner.try_create(20.0, 3, true);
        let target = planner.plan().unwrap().stoke_target;
        for i in 0..target {
            assert!(!planner.plan().unwrap().is_complete() || i == target);
            planner.record_completion(Activity::Stoke, 1_000 * (i as u64 + 1));
        }
        assert!(planner.plan().unwrap().is_complete());
    }
}
