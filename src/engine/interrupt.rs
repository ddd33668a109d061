//! Per-activity interruption watchdogs.
//!
//! A record is armed when a continuous activity (process, stoke)
//! starts, capturing a baseline of the world. Every tick the owning
//! phase handler asks it to classify the situation; the first matching
//! cause wins and the record freezes.

use tracing::info;

use crate::protocol::{Activity, Point};

/// No liveness signal (activity animation) for this long means the
/// action silently died.
pub const LIVENESS_TIMEOUT_MS: u64 = 3_000;

/// Absolute ceiling on one continuous activity.
pub const HARD_TIMEOUT_MS: u64 = 60_000;

/// A gauge increase of at least this much since the baseline implies an
/// external consume event (restoratives grant 30+), not a failure.
pub const GAUGE_JUMP_THRESHOLD: u32 = 30;

// ── Causes ─────────────────────────────────────────────────────────

/// Why a continuous activity stopped. Ordered by evaluation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptCause {
    /// Nothing left to work on.
    MaterialsExhausted,
    /// The campaign ended mid-action.
    CampaignEnded,
    /// The player left the baseline location.
    Moved,
    /// The guarded gauge jumped up: an external consume event resolved
    /// itself; the activity can simply be restarted.
    ExternalConsumption,
    /// No activity animation seen for `LIVENESS_TIMEOUT_MS`.
    LivenessTimeout,
    /// `HARD_TIMEOUT_MS` exceeded.
    HardTimeout,
    /// Stopped by a phase transition, not by classification.
    Superseded,
}

impl InterruptCause {
    /// Terminal causes end the activity for this campaign; resumable
    /// ones allow the same plan to continue after re-entry.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            InterruptCause::MaterialsExhausted | InterruptCause::CampaignEnded
        )
    }
}

// ── Record ─────────────────────────────────────────────────────────

/// World readings captured when the activity started.
#[derive(Debug, Clone, Copy)]
pub struct InterruptBaseline {
    pub materials: u32,
    pub position: Point,
    pub gauge: u32,
}

/// Per-tick readings the watchdog classifies against its baseline.
#[derive(Debug, Clone, Copy)]
pub struct InterruptProbe {
    pub materials: u32,
    pub campaign_active: bool,
    pub position: Point,
    pub gauge: u32,
}

#[derive(Debug)]
pub struct InterruptRecord {
    activity: Activity,
    active: bool,
    started_ms: u64,
    stopped_ms: u64,
    baseline: Option<InterruptBaseline>,
    last_liveness_ms: Option<u64>,
    last_cause: Option<InterruptCause>,
}

impl InterruptRecord {
    pub fn new(activity: Activity) -> Self {
        Self {
            activity,
            active: false,
            started_ms: 0,
            stopped_ms: 0,
            baseline: None,
            last_liveness_ms: None,
            last_cause: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn last_cause(&self) -> Option<InterruptCause> {
        self.last_cause
    }

    /// Arm the watchdog with a fresh baseline.
    pub fn start(&mut self, baseline: InterruptBaseline, now_ms: u64) {
        self.active = true;
        self.started_ms = now_ms;
        self.stopped_ms = now_ms;
        self.baseline = Some(baseline);
        self.last_liveness_ms = None;
        self.last_cause = None;
        info!(
            activity = ?self.activity,
            materials = baseline.materials,
            "interrupt watch armed"
        );
    }

    /// Record that the activity animation was observed.
    pub fn note_liveness(&mut self, now_ms: u64) {
        if self.active {
            self.last_liveness_ms = Some(now_ms);
        }
    }

    /// Classify the current readings. Returns the first matching cause
    /// (stopping the record), or `None` while legitimately active.
    pub fn check(&mut self, probe: &InterruptProbe, now_ms: u64) -> Option<InterruptCause> {
        if !self.active {
            return None;
        }
        let cause = self.evaluate(probe, now_ms)?;
        self.stop(cause, now_ms);
        Some(cause)
    }

    fn evaluate(&self, probe: &InterruptProbe, now_ms: u64) -> Option<InterruptCause> {
        let baseline = self.baseline?;

        if probe.materials == 0 {
            return Some(InterruptCause::MaterialsExhausted);
        }
        if !probe.campaign_active {
            return Some(InterruptCause::CampaignEnded);
        }
        if probe.position != baseline.position {
            return Some(InterruptCause::Moved);
        }
        if probe.gauge >= baseline.gauge + GAUGE_JUMP_THRESHOLD {
            return Some(InterruptCause::ExternalConsumption);
        }
        if let Some(last) = self.last_liveness_ms {
            if now_ms.saturating_sub(last) > LIVENESS_TIMEOUT_MS {
                return Some(InterruptCause::LivenessTimeout);
            }
        }
        if now_ms.saturating_sub(self.started_ms) > HARD_TIMEOUT_MS {
            return Some(InterruptCause::HardTimeout);
        }
        None
    }

    /// Mark inactive, freeze the duration, record the cause. No-op when
    /// already stopped.
    pub fn stop(&mut self, cause: InterruptCause, now_ms: u64) {
        if !self.active {
            return;
        }
        self.active = false;
        self.stopped_ms = now_ms;
        self.last_cause = Some(cause);
        info!(
            activity = ?self.activity,
            ?cause,
            duration_ms = self.stopped_ms.saturating_sub(self.started_ms),
            "activity stopped"
        );
    }

    /// Elapsed active time; frozen once stopped.
    pub fn duration_ms(&self, now_ms: u64) -> u64 {
        if self.active {
            now_ms.saturating_sub(self.started_ms)
        } else {
            self.stopped_ms.saturating_sub(self.started_ms)
        }
    }

    /// Full reset, clearing any frozen cause and baseline.
    pub fn reset(&mut self) {
        *self = Self::new(self.activity);
    }
}
