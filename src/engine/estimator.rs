//! Time-budget estimation from the decaying countdown quantity.
//!
//! Blends a live depletion-rate estimate (noisy, especially near the
//! start and end of a campaign) with a historical per-campaign average
//! scaled by the current level.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::protocol::{CampaignView, MAX_LEVEL};

/// Reported while no usable depletion rate has been observed yet.
pub const UNKNOWN_ESTIMATE_SECS: f64 = 999.0;

/// Seed entry so the historical model is defined before the first
/// completed campaign.
pub const DEFAULT_CAMPAIGN_DURATION_MS: u64 = 250_000;

/// Recorded campaign durations outside this window are discarded.
pub const DURATION_SANITY_MIN_MS: u64 = 30_000;
pub const DURATION_SANITY_MAX_MS: u64 = 600_000;

const HISTORY_CAPACITY: usize = 10;

// ── Tuning ─────────────────────────────────────────────────────────

/// Empirically chosen constants; tunable, not a behavioral contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorTuning {
    /// EMA factor folding a new instantaneous rate into the running one.
    pub rate_smoothing: f64,
    /// Blend weight on the historical estimate (the rest goes to the
    /// rate-based one).
    pub historical_weight: f64,
    /// Level changes observed across a shorter interval than this are
    /// treated as sampling noise.
    pub min_sample_interval_ms: u64,
}

impl Default for EstimatorTuning {
    fn default() -> Self {
        Self {
            rate_smoothing: 0.3,
            historical_weight: 0.8,
            min_sample_interval_ms: 400,
        }
    }
}

// ── Historical duration log ────────────────────────────────────────

/// Bounded ring buffer of past campaign durations, milliseconds.
#[derive(Debug, Clone)]
pub struct DurationLog {
    entries: VecDeque<u64>,
}

impl DurationLog {
    /// Empty log, then seeded with the default duration.
    pub fn seeded() -> Self {
        let mut log = Self {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        };
        log.entries.push_back(DEFAULT_CAMPAIGN_DURATION_MS);
        log
    }

    /// Record a duration. Entries outside the sanity window are
    /// rejected; the oldest entry is dropped past capacity. Returns
    /// whether the entry was accepted.
    pub fn record(&mut self, duration_ms: u64) -> bool {
        if !(DURATION_SANITY_MIN_MS..=DURATION_SANITY_MAX_MS).contains(&duration_ms) {
            debug!(duration_ms, "campaign duration outside sanity window, discarded");
            return false;
        }
        self.entries.push_back(duration_ms);
        if self.entries.len() > HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        true
    }

    pub fn average_ms(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        self.entries.iter().sum::<u64>() as f64 / self.entries.len() as f64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ── Estimator ──────────────────────────────────────────────────────

/// Campaign boundary observed this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CampaignEvent {
    /// The pre-campaign timer vanished: a new campaign is underway.
    Started,
    /// The campaign ended (level hit zero or the timer reappeared).
    Ended {
        duration_ms: u64,
        /// Whether the duration passed the sanity window and was logged.
        logged: bool,
    },
}

#[derive(Debug)]
pub struct TimeBudgetEstimator {
    tuning: EstimatorTuning,
    history: DurationLog,
    /// Level at the last observed change, and when it changed.
    prev_level: Option<u32>,
    prev_change_ms: u64,
    rate_per_sec: f64,
    estimated_seconds_left: f64,
    historical_seconds_left: f64,
    campaign_start_ms: Option<u64>,
    intermission_visible: bool,
}

impl TimeBudgetEstimator {
    pub fn new(tuning: EstimatorTuning) -> Self {
        Self {
            tuning,
            history: DurationLog::seeded(),
            prev_level: None,
            prev_change_ms: 0,
            rate_per_sec: 0.0,
            estimated_seconds_left: UNKNOWN_ESTIMATE_SECS,
            historical_seconds_left: 0.0,
            campaign_start_ms: None,
            intermission_visible: false,
        }
    }

    pub fn estimated_seconds_left(&self) -> f64 {
        self.estimated_seconds_left
    }

    pub fn historical_seconds_left(&self) -> f64 {
        self.historical_seconds_left
    }

    pub fn history(&self) -> &DurationLog {
        &self.history
    }

    /// Feed one per-tick campaign reading. Returns a boundary event
    /// when this tick crossed one.
    pub fn observe(&mut self, campaign: &CampaignView, now_ms: u64) -> Option<CampaignEvent> {
        let mut event = None;

        match (campaign.intermission_seconds, self.intermission_visible) {
            (Some(secs), false) => {
                // Timer appeared: the campaign just ended.
                self.intermission_visible = true;
                debug!(next_start_in = secs, "intermission timer visible");
                event = self.finish_campaign(now_ms);
            }
            (None, true) => {
                // Timer vanished: a new campaign is starting.
                self.intermission_visible = false;
                self.campaign_start_ms = Some(now_ms);
                self.prev_level = None;
                event = Some(CampaignEvent::Started);
            }
            _ => {}
        }

        if event.is_none() && campaign.countdown_level == 0 && self.campaign_start_ms.is_some() {
            event = self.finish_campaign(now_ms);
        }

        if campaign.active && campaign.countdown_level > 0 {
            self.update_rate(campaign.countdown_level, now_ms);
        }
        self.refresh_estimate(campaign.countdown_level);

        event
    }

    /// Full reset; the history is re-seeded.
    pub fn reset(&mut self) {
        *self = Self::new(self.tuning);
    }

    fn update_rate(&mut self, level: u32, now_ms: u64) {
        if self.prev_level == Some(level) {
            return;
        }
        if let Some(prev) = self.prev_level {
            if level < prev {
                let interval_ms = now_ms.saturating_sub(self.prev_change_ms);
                if interval_ms > self.tuning.min_sample_interval_ms {
                    let instantaneous = (prev - level) as f64 / (interval_ms as f64 / 1000.0);
                    self.rate_per_sec = if self.rate_per_sec == 0.0 {
                        instantaneous
                    } else {
                        self.rate_per_sec * (1.0 - self.tuning.rate_smoothing)
                            + instantaneous * self.tuning.rate_smoothing
                    };
                }
            }
        }
        self.prev_level = Some(level);
        self.prev_change_ms = now_ms;
    }

    fn refresh_estimate(&mut self, level: u32) {
        if self.rate_per_sec <= 0.01 {
            self.estimated_seconds_left = UNKNOWN_ESTIMATE_SECS;
            self.historical_seconds_left = 0.0;
            return;
        }

        let rate_based = level as f64 / self.rate_per_sec;
        let average_ms = self.history.average_ms();
        if average_ms > 0.0 {
            let historical = (average_ms / 1000.0) * (level as f64 / MAX_LEVEL as f64);
            self.historical_seconds_left = historical;
            self.estimated_seconds_left = rate_based * (1.0 - self.tuning.historical_weight)
                + historical * self.tuning.historical_weight;
        } else {
            self.estimated_seconds_left = rate_based;
            self.historical_seconds_left = 0.0;
        }
    }

    fn finish_campaign(&mut self, now_ms: u64) -> Option<CampaignEvent> {
        let start = self.campaign_start_ms.take()?;
        let duration_ms = now_ms.saturating_sub(start);
        let logged = self.history.record(duration_ms);
        if logged {
            info!(
                duration_s = duration_ms / 1000,
                history = self.history.len(),
                "campaign duration logged"
            );
        }
        self.prev_level = None;
        Some(CampaignEvent::Ended {
            duration_ms,
            logged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active(level: u32) -> CampaignView {
        CampaignView {
            active: true,
            countdown_level: level,
            intermission_seconds: None,
        }
    }

    fn intermission(secs: u32) -> CampaignView {
        CampaignView {
            active: false,
            countdown_level: 0,
            intermission_seconds: Some(secs),
        }
    }

    #[test]
    fn unknown_until_first_valid_rate_sample() {
        let mut est = TimeBudgetEstimator::new(EstimatorTuning::default());
        est.observe(&active(100), 0);
        assert_eq!(est.estimated_seconds_left(), UNKNOWN_ESTIMATE_SECS);

        // One decrease over a noise-window interval: still unknown.
        est.observe(&active(99), 100);
        assert_eq!(est.estimated_seconds_left(), UNKNOWN_ESTIMATE_SECS);
    }

    #[test]
    fn estimate_is_finite_and_blends_toward_historical() {
        let mut est = TimeBudgetEstimator::new(EstimatorTuning::default());
        // Steady 1 level/sec depletion.
        let mut now = 0;
        for level in (40..=100).rev() {
            est.observe(&active(level), now);
            now += 1000;
        }

        let estimate = est.estimated_seconds_left();
        let historical = est.historical_seconds_left();
        assert!(estimate.is_finite());
        assert!(estimate >= 0.0);
        assert!(historical > 0.0);

        // Blend sits between the two inputs and closer to historical.
        let rate_based: f64 = 40.0; // 40 levels left at 1/sec
        let lo = rate_based.min(historical);
        let hi = rate_based.max(historical);
        assert!(estimate >= lo && estimate <= hi);
        assert!((estimate - historical).abs() < (estimate - rate_based).abs());
    }

    #[test]
    fn level_changes_within_noise_window_are_ignored() {
        let tuning = EstimatorTuning::default();
        let mut est = TimeBudgetEstimator::new(tuning);
        est.observe(&active(100), 0);
        // 10 levels in 200 ms would be an absurd 50/sec rate.
        est.observe(&active(90), 200);
        assert_eq!(est.estimated_seconds_left(), UNKNOWN_ESTIMATE_SECS);
    }

    #[test]
    fn campaign_boundaries_log_duration_once() {
        let mut est = TimeBudgetEstimator::new(EstimatorTuning::default());
        assert_eq!(est.history().len(), 1); // seed entry

        // Intermission, then a campaign starts.
        est.observe(&intermission(30), 0);
        let started = est.observe(&active(100), 5_000);
        assert_eq!(started, Some(CampaignEvent::Started));

        // Level hits zero after 200 s.
        let ended = est.observe(&active(0), 205_000);
        assert_eq!(
            ended,
            Some(CampaignEvent::Ended {
                duration_ms: 200_000,
                logged: true,
            })
        );
        assert_eq!(est.history().len(), 2);

        // The timer reappearing afterwards must not log a second entry.
        let repeat = est.observe(&intermission(45), 206_000);
        assert_eq!(repeat, None);
        assert_eq!(est.history().len(), 2);
    }

    #[test]
    fn out_of_window_durations_are_discarded() {
        let mut log = DurationLog::seeded();
        assert!(!log.record(5_000)); // under 30 s
        assert!(!log.record(700_000)); // over 10 min
        assert!(log.record(180_000));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn history_is_bounded() {
        let mut log = DurationLog::seeded();
        for _ in 0..15 {
            log.record(120_000);
        }
        assert_eq!(log.len(), 10);
    }
}
