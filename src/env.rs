//! Environment ports.
//!
//! The scheduler core talks to the outside world through two traits: a
//! read-only sampler and an actuator. Implementations live outside the
//! core (the in-process simulation in `sim` is one).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{
    EnvEvent, InteractableHandle, InteractableKind, ItemKind, Point, Verb, WorldSnapshot,
};

// ── Clock ──────────────────────────────────────────────────────────

/// Monotonic time source, injected so tests can drive time explicitly.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall-clock backed implementation used by the binary.
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock shared between a test (or the simulation)
/// and the engine.
#[derive(Default)]
pub struct ManualClock {
    ms: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn advance(&self, ms: u64) {
        self.ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.ms.load(Ordering::SeqCst)
    }
}

// ── Sampler ────────────────────────────────────────────────────────

/// Produces typed, read-only views of the world. One snapshot and one
/// event drain per tick; `find_interactable` may be called freely.
pub trait EnvironmentSampler: Send + Sync {
    /// Current world/player/inventory readings.
    fn snapshot(&self) -> WorldSnapshot;

    /// Discrete signals (unit completions) observed since the previous
    /// drain. Called exactly once per tick by the engine.
    fn drain_events(&mut self) -> Vec<EnvEvent>;

    /// Typed entity lookup: the nearest interactable of `kind`,
    /// optionally biased toward `near`.
    fn find_interactable(
        &self,
        kind: InteractableKind,
        near: Option<Point>,
    ) -> Option<InteractableHandle>;
}

// ── Actuator ───────────────────────────────────────────────────────

/// Issues typed actuation requests to the environment. Each request is
/// a best-effort attempt for this tick; failures are retried by the
/// engine under its failure counters.
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn interact(&mut self, target: &InteractableHandle, verb: Verb) -> Result<()>;

    /// Consume a held item (eat a ration, drink a draught).
    async fn consume(&mut self, item: ItemKind) -> Result<()>;

    /// Use one held item on another (brewing).
    async fn combine(&mut self, first: ItemKind, second: ItemKind) -> Result<()>;

    async fn walk_toward(&mut self, destination: Point) -> Result<()>;

    // Session verbs, used only by the break scheduler's extended
    // breaks. Session management itself stays external.
    fn is_connected(&self) -> bool;
    async fn disconnect(&mut self) -> Result<()>;
    async fn reconnect(&mut self) -> Result<()>;
}

// ── Bounded wait ───────────────────────────────────────────────────

/// Poll `predicate` every `poll_interval` until it returns true or
/// `timeout` elapses. Returns whether the predicate was met; a timeout
/// is never silently swallowed.
pub async fn wait_until<F>(mut predicate: F, poll_interval: Duration, timeout: Duration) -> bool
where
    F: FnMut() -> bool + Send,
{
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new();
        assert_eq!(clock.now_ms(), 0);
        clock.advance(1500);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 2000);
    }

    #[tokio::test]
    async fn wait_until_reports_success() {
        let mut calls = 0;
        let met = wait_until(
            || {
                calls += 1;
                calls >= 3
            },
            Duration::from_millis(1),
            Duration::from_millis(500),
        )
        .await;
        assert!(met);
    }

    #[tokio::test]
    async fn wait_until_reports_timeout() {
        let met = wait_until(
            || false,
            Duration::from_millis(5),
            Duration::from_millis(20),
        )
        .await;
        assert!(!met);
    }
}
