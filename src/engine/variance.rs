//! Pluggable behavior-variance policy.
//!
//! Timing jitter is incidental to the scheduler, so it lives behind a
//! trait invoked at two hook points and defaults to a no-op.

use std::time::Duration;

use rand::Rng;

/// Hook points the engine consults for optional extra delays.
pub trait VariancePolicy: Send {
    /// Delay applied before issuing an actuation request.
    fn pre_action_delay(&mut self) -> Option<Duration> {
        None
    }

    /// Delay applied after a phase transition takes effect.
    fn post_transition_delay(&mut self) -> Option<Duration> {
        None
    }
}

/// The default: no added variance.
pub struct NoVariance;

impl VariancePolicy for NoVariance {}

/// Uniform jitter around a base delay.
pub struct JitteredVariance {
    pub base_ms: u64,
    pub spread_ms: u64,
}

impl Default for JitteredVariance {
    fn default() -> Self {
        Self {
            base_ms: 150,
            spread_ms: 150,
        }
    }
}

impl VariancePolicy for JitteredVariance {
    fn pre_action_delay(&mut self) -> Option<Duration> {
        let extra = rand::thread_rng().gen_range(0..=self.spread_ms);
        Some(Duration::from_millis(self.base_ms + extra))
    }

    fn post_transition_delay(&mut self) -> Option<Duration> {
        let extra = rand::thread_rng().gen_range(0..=self.spread_ms / 2);
        Some(Duration::from_millis(self.base_ms / 2 + extra))
    }
}
