//! Independently-timed break scheduling.
//!
//! Runs its own one-second countdown beside the main loop. When it
//! reaches zero the scheduler waits for a safe state, then pauses the
//! engine for either a short AFK break or an extended (disconnect)
//! break. It never forces phase transitions itself beyond the single
//! "walk to safe spot" request and the resume signal.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::BreakConfig;
use crate::protocol::BreakReport;

// ── Kinds & lifecycle ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakKind {
    /// Short, in-place pause; the session stays up.
    Afk,
    /// Long pause behind a disconnect; needs a reconnection sequence
    /// on resume.
    Extended,
}

/// Idle → WaitingForSafe → Active → (Ended) → Idle.
#[derive(Debug, Clone, Copy)]
enum BreakState {
    Idle,
    WaitingForSafe { since_ms: u64, walk_requested: bool },
    Active { kind: BreakKind, remaining_secs: u32 },
}

/// What the engine must act on after a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakSignal {
    /// Waited too long for a safe state: transition to the walk-to-safe
    /// phase. Emitted exactly once per wait.
    RequestSafeWalk,
    /// A break just began; extended breaks should disconnect.
    Started(BreakKind),
    /// A break just finished; the action plan must be cleared and
    /// extended breaks reconnected.
    Ended(BreakKind),
}

// ── Scheduler ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct BreakScheduler {
    config: BreakConfig,
    state: BreakState,
    /// Seconds until the next break becomes due.
    countdown_secs: u32,
    last_step_ms: u64,
}

impl BreakScheduler {
    pub fn new(config: BreakConfig, now_ms: u64) -> Self {
        let mut scheduler = Self {
            config,
            state: BreakState::Idle,
            countdown_secs: 0,
            last_step_ms: now_ms,
        };
        scheduler.roll_interval();
        scheduler
    }

    /// A break is currently running and the engine must skip dispatch.
    pub fn is_active(&self) -> bool {
        matches!(self.state, BreakState::Active { .. })
    }

    pub fn active_kind(&self) -> Option<BreakKind> {
        match self.state {
            BreakState::Active { kind, .. } => Some(kind),
            _ => None,
        }
    }

    /// Advance the one-second countdown. Called once per engine tick.
    ///
    /// * `safe` -- whether the safe-state predicate holds right now.
    /// * `gated` -- countdown freeze: the transition lock is held, the
    ///   reward flow is in progress, or breaks are disabled.
    pub fn poll(&mut self, now_ms: u64, safe: bool, gated: bool) -> Option<BreakSignal> {
        if !self.config.enabled {
            return None;
        }
        if now_ms.saturating_sub(self.last_step_ms) < 1_000 {
            return None;
        }
        self.last_step_ms = now_ms;

        match self.state {
            BreakState::Idle => {
                if gated {
                    return None;
                }
                if self.countdown_secs > 0 {
                    self.countdown_secs -= 1;
                }
                if self.countdown_secs > 0 {
                    return None;
                }
                if safe {
                    return Some(self.start_break());
                }
                debug!("break due but state unsafe, waiting");
                self.state = BreakState::WaitingForSafe {
                    since_ms: now_ms,
                    walk_requested: false,
                };
                None
            }
            BreakState::WaitingForSafe {
                since_ms,
                walk_requested,
            } => {
                if safe {
                    return Some(self.start_break());
                }
                let waited_ms = now_ms.saturating_sub(since_ms);
                if waited_ms >= u64::from(self.config.max_safe_wait_seconds) * 1_000
                    && !walk_requested
                {
                    info!("safe-state wait exceeded, requesting walk to safe spot");
                    self.state = BreakState::WaitingForSafe {
                        since_ms,
                        walk_requested: true,
                    };
                    return Some(BreakSignal::RequestSafeWalk);
                }
                None
            }
            BreakState::Active {
                kind,
                remaining_secs,
            } => {
                let remaining = remaining_secs.saturating_sub(1);
                if remaining == 0 {
                    self.state = BreakState::Idle;
                    self.roll_interval();
                    info!(?kind, "break ended");
                    return Some(BreakSignal::Ended(kind));
                }
                self.state = BreakState::Active {
                    kind,
                    remaining_secs: remaining,
                };
                None
            }
        }
    }

    /// Abort any active or pending break (shutdown path). Idempotent.
    pub fn terminate(&mut self, now_ms: u64) {
        if self.is_active() {
            info!("active break terminated by shutdown");
        }
        self.state = BreakState::Idle;
        self.last_step_ms = now_ms;
        self.roll_interval();
    }

    pub fn report(&self) -> BreakReport {
        let (active_kind, remaining_seconds, waiting) = match self.state {
            BreakState::Idle => (None, 0, false),
            BreakState::WaitingForSafe { .. } => (None, 0, true),
            BreakState::Active {
                kind,
                remaining_secs,
            } => (Some(kind), remaining_secs, false),
        };
        BreakReport {
            seconds_until_next: self.countdown_secs,
            active_kind,
            remaining_seconds,
            waiting_for_safe: waiting,
        }
    }

    fn start_break(&mut self) -> BreakSignal {
        let mut rng = rand::thread_rng();
        let extended = rng.gen_range(0..100) < self.config.extended_chance_pct;
        let (kind, min_m, max_m) = if extended {
            (
                BreakKind::Extended,
                self.config.extended_min_minutes,
                self.config.extended_max_minutes,
            )
        } else {
            (
                BreakKind::Afk,
                self.config.afk_min_minutes,
                self.config.afk_max_minutes,
            )
        };
        let minutes = rng.gen_range(min_m..=min_m.max(max_m));
        let remaining_secs = (minutes * 60).max(1);
        self.state = BreakState::Active {
            kind,
            remaining_secs,
        };
        info!(?kind, minutes, "break started");
        BreakSignal::Started(kind)
    }

    fn roll_interval(&mut self) {
        let min_s = self.config.min_interval_minutes * 60;
        let max_s = self.config.max_interval_minutes * 60;
        self.countdown_secs = rand::thread_rng().gen_range(min_s..=min_s.max(max_s));
        debug!(
            minutes = self.countdown_secs / 60,
            "next break scheduled"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Always-AFK config with a short interval so tests run in a few
    /// simulated seconds.
    fn test_config() -> BreakConfig {
        BreakConfig {
            enabled: true,
            min_interval_minutes: 0,
            max_interval_minutes: 0,
            extended_chance_pct: 0,
            afk_min_minutes: 1,
            afk_max_minutes: 1,
            extended_min_minutes: 1,
            extended_max_minutes: 1,
            max_safe_wait_seconds: 5,
        }
    }

    /// Run the countdown until the next signal, stepping one simulated
    /// second at a time. Panics after `limit` seconds.
    fn poll_until_signal(
        sched: &mut BreakScheduler,
        now_ms: &mut u64,
        safe: bool,
        limit: u32,
    ) -> BreakSignal {
        for _ in 0..limit {
            *now_ms += 1_000;
            if let Some(signal) = sched.poll(*now_ms, safe, false) {
                return signal;
            }
        }
        panic!("no break signal within {limit} seconds");
    }

    #[test]
    fn break_starts_only_when_safe() {
        let mut now = 0;
        let mut sched = BreakScheduler::new(test_config(), now);

        // Unsafe: the countdown expires but no break starts.
        for _ in 0..30 {
            now += 1_000;
            let signal = sched.poll(now, false, false);
            assert!(!matches!(signal, Some(BreakSignal::Started(_))));
            assert!(!sched.is_active());
        }

        // Safe: break starts on the next step.
        let signal = poll_until_signal(&mut sched, &mut now, true, 5);
        assert_eq!(signal, BreakSignal::Started(BreakKind::Afk));
        assert!(sched.is_active());
    }

    #[test]
    fn exactly_one_walk_request_per_wait() {
        let mut now = 0;
        let mut sched = BreakScheduler::new(test_config(), now);

        let mut walk_requests = 0;
        for _ in 0..60 {
            now += 1_000;
            if sched.poll(now, false, false) == Some(BreakSignal::RequestSafeWalk) {
                walk_requests += 1;
            }
        }
        assert_eq!(walk_requests, 1);
        assert!(!sched.is_active());
    }

    #[test]
    fn break_runs_to_completion_and_reschedules() {
        let mut now = 0;
        let mut sched = BreakScheduler::new(test_config(), now);

        assert_eq!(
            poll_until_signal(&mut sched, &mut now, true, 5),
            BreakSignal::Started(BreakKind::Afk)
        );

        // 1-minute AFK break: ends after 60 countdown steps.
        let signal = poll_until_signal(&mut sched, &mut now, true, 120);
        assert_eq!(signal, BreakSignal::Ended(BreakKind::Afk));
        assert!(!sched.is_active());
    }

    #[test]
    fn gating_freezes_the_idle_countdown() {
        let mut now = 0;
        let mut sched = BreakScheduler::new(test_config(), now);

        for _ in 0..120 {
            now += 1_000;
            assert_eq!(sched.poll(now, true, true), None);
        }
        assert!(!sched.is_active());

        // Ungated: due immediately (interval rolled to zero).
        let signal = poll_until_signal(&mut sched, &mut now, true, 5);
        assert!(matches!(signal, BreakSignal::Started(_)));
    }

    #[test]
    fn extended_breaks_are_selected_by_weight() {
        let mut config = test_config();
        config.extended_chance_pct = 100;
        let mut now = 0;
        let mut sched = BreakScheduler::new(config, now);

        let signal = poll_until_signal(&mut sched, &mut now, true, 5);
        assert_eq!(signal, BreakSignal::Started(BreakKind::Extended));
        assert_eq!(sched.active_kind(), Some(BreakKind::Extended));
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut now = 0;
        let mut sched = BreakScheduler::new(test_config(), now);
        poll_until_signal(&mut sched, &mut now, true, 5);
        assert!(sched.is_active());

        sched.terminate(now);
        assert!(!sched.is_active());
        sched.terminate(now);
        assert!(!sched.is_active());
    }

    #[test]
    fn disabled_scheduler_never_signals() {
        let mut config = test_config();
        config.enabled = false;
        let mut sched = BreakScheduler::new(config, 0);
        for s in 1..=300u64 {
            assert_eq!(sched.poll(s * 1_000, true, false), None);
        }
    }
}
