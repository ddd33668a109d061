//! The scheduler engine: one owned state object driven by a
//! fixed-interval tick.
//!
//! Per-tick order: sample → estimator → completion signals → stop
//! conditions → break scheduler poll (gates dispatch) → connectivity →
//! stuck detection → interrupt evaluation → gauge maintenance → phase
//! dispatch. Interrupt evaluation always precedes any new actuation for
//! the current phase.

pub mod breaks;
pub mod estimator;
mod handlers;
pub mod interrupt;
pub mod planner;
pub mod state;
pub mod variance;

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::breaks::{BreakKind, BreakScheduler, BreakSignal};
use crate::engine::estimator::{CampaignEvent, TimeBudgetEstimator};
use crate::engine::interrupt::{InterruptCause, InterruptProbe, InterruptRecord};
use crate::engine::planner::ActionPlanner;
use crate::engine::state::CycleState;
use crate::engine::variance::{JitteredVariance, NoVariance, VariancePolicy};
use crate::env::{Actuator, Clock, EnvironmentSampler};
use crate::error::{EngineError, Result};
use crate::protocol::{Activity, EngineReport, EnvEvent, HealingMethod, ItemKind, Phase, WorldSnapshot};

/// Failed ticks in a row before a recovery reset is forced.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;

/// Desync retries (with backoff) before escalating to a recovery reset.
pub const MAX_DESYNC_RETRIES: u32 = 5;

/// Recovery resets in a row before the run is declared fatal.
pub const MAX_RECOVERY_RESETS: u32 = 3;

/// Attempts for the break scheduler's disconnect/reconnect sequences.
pub const MAX_SESSION_ATTEMPTS: u32 = 3;

/// Backoff applied per desync retry.
const DESYNC_BACKOFF: Duration = Duration::from_millis(250);

/// The whole scheduler state, owned as a single unit. Reporting
/// consumers only ever see [`EngineReport`] copies.
pub struct Engine<E>
where
    E: EnvironmentSampler + Actuator,
{
    env: E,
    clock: Arc<dyn Clock>,
    config: Config,

    cycle: CycleState,
    estimator: TimeBudgetEstimator,
    planner: ActionPlanner,
    process_watch: InterruptRecord,
    stoke_watch: InterruptRecord,
    breaks: BreakScheduler,
    variance: Box<dyn VariancePolicy>,

    initialized: bool,
    stopped: bool,
    campaigns_completed: u32,
    consecutive_failures: u32,
    desync_retries: u32,
    recovery_resets: u32,
    /// Rolled per run: minimum plus uniform variance.
    reward_threshold: u32,
    reward_cart_exhausted: bool,
}

impl<E> Engine<E>
where
    E: EnvironmentSampler + Actuator,
{
    pub fn new(env: E, config: Config, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now_ms();
        let variance: Box<dyn VariancePolicy> = if config.behavior_variance {
            Box::new(JitteredVariance::default())
        } else {
            Box::new(NoVariance)
        };
        let reward_threshold = roll_reward_threshold(&config);
        Self {
            cycle: CycleState::new(Phase::Restock, now),
            estimator: TimeBudgetEstimator::new(config.estimator),
            planner: ActionPlanner::new(),
            process_watch: InterruptRecord::new(Activity::Process),
            stoke_watch: InterruptRecord::new(Activity::Stoke),
            breaks: BreakScheduler::new(config.breaks, now),
            variance,
            initialized: false,
            stopped: false,
            campaigns_completed: 0,
            consecutive_failures: 0,
            desync_retries: 0,
            recovery_resets: 0,
            reward_threshold,
            reward_cart_exhausted: false,
            env,
            clock,
            config,
        }
    }

    pub fn phase(&self) -> Phase {
        self.cycle.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn campaigns_completed(&self) -> u32 {
        self.campaigns_completed
    }

    /// Immutable state snapshot for reporting consumers.
    pub fn report(&self) -> EngineReport {
        EngineReport {
            phase: self.cycle.phase(),
            locked: self.cycle.locked(),
            estimated_seconds_left: self.estimator.estimated_seconds_left(),
            historical_seconds_left: self.estimator.historical_seconds_left(),
            plan: self.planner.report(),
            breaks: self.breaks.report(),
            campaigns_completed: self.campaigns_completed,
            consecutive_failures: self.consecutive_failures,
        }
    }

    // ── Tick pipeline ──────────────────────────────────────────────

    /// One tick of the control loop. Errors are folded into the
    /// failure counters by [`Engine::run`]; callers driving ticks by
    /// hand (tests) may do the same through [`Engine::fold_failure`].
    pub async fn tick(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        let now = self.now_ms();
        let snap = self.env.snapshot();

        if !self.initialized {
            self.initialized = true;
            let start = self.determine_initial_phase(&snap);
            self.cycle = CycleState::new(start, now);
            info!(phase = ?start, "initial phase determined");
        }

        if let Some(event) = self.estimator.observe(&snap.campaign, now) {
            match event {
                CampaignEvent::Started => {
                    info!("campaign started");
                }
                CampaignEvent::Ended { duration_ms, .. } => {
                    self.campaigns_completed += 1;
                    self.reward_cart_exhausted = false;
                    info!(
                        duration_s = duration_ms / 1000,
                        total = self.campaigns_completed,
                        "campaign ended"
                    );
                }
            }
        }

        for event in self.env.drain_events() {
            let EnvEvent::UnitCompleted { activity } = event;
            self.planner.record_completion(activity, now);
        }
        match snap.player.animating {
            Some(Activity::Process) => self.process_watch.note_liveness(now),
            Some(Activity::Stoke) => self.stoke_watch.note_liveness(now),
            _ => {}
        }

        if self.stop_condition_met(&snap) {
            info!("stop condition met");
            self.shutdown();
            return Ok(());
        }

        // Break scheduler gates dispatch.
        let safe = self.is_safe_for_break(&snap);
        let gated = self.cycle.locked() || self.cycle.phase().is_reward_phase();
        if let Some(signal) = self.breaks.poll(now, safe, gated) {
            match signal {
                BreakSignal::RequestSafeWalk => {
                    self.cycle.unlock();
                    self.change_phase(Phase::WalkToSafeSpot, false, now).await;
                }
                BreakSignal::Started(kind) => {
                    if kind == BreakKind::Extended {
                        self.disconnect_for_break().await;
                    }
                    return Ok(());
                }
                BreakSignal::Ended(kind) => {
                    // The environment may have changed under us.
                    self.planner.clear();
                    self.cycle.touch(now);
                    if kind == BreakKind::Extended {
                        self.reconnect_with_retries().await?;
                    }
                    info!(?kind, "resumed from break");
                    return Ok(());
                }
            }
        }
        if self.breaks.is_active() {
            return Ok(());
        }

        if !self.env.is_connected() {
            self.reconnect_with_retries().await?;
            return Ok(());
        }

        if self.cycle.is_stuck(now) {
            self.cycle.force_unlock(now);
            return Ok(());
        }

        if self.evaluate_interrupts(&snap, now).await {
            return Ok(());
        }

        if self.maintain_gauge(&snap, now).await? {
            return Ok(());
        }

        self.dispatch(&snap, now).await?;
        self.consecutive_failures = 0;
        self.desync_retries = 0;
        self.recovery_resets = 0;
        Ok(())
    }

    /// Drive the tick loop at the configured cadence until a stop
    /// condition, shutdown, or fatal error.
    pub async fn run(&mut self) -> Result<()> {
        self.stopped = false;
        let mut interval = tokio::time::interval(Duration::from_millis(self.config.tick_ms));
        loop {
            interval.tick().await;
            match self.tick().await {
                Ok(()) => {}
                Err(EngineError::Fatal(msg)) => {
                    error!(%msg, "fatal error, shutting down");
                    self.shutdown();
                    return Err(EngineError::Fatal(msg));
                }
                Err(err) => self.fold_failure(err).await?,
            }
            if self.stopped {
                return Ok(());
            }
        }
    }

    /// Log a failed tick and escalate when the counters say so. One bad
    /// tick never terminates the loop.
    pub async fn fold_failure(&mut self, err: EngineError) -> Result<()> {
        self.consecutive_failures += 1;
        warn!(
            error = %err,
            streak = self.consecutive_failures,
            "tick failed"
        );

        let mut escalate = self.consecutive_failures > MAX_CONSECUTIVE_FAILURES;
        if let EngineError::Desync(kind) = &err {
            self.desync_retries += 1;
            let backoff = DESYNC_BACKOFF * self.desync_retries;
            warn!(?kind, retries = self.desync_retries, "environment desync, backing off");
            tokio::time::sleep(backoff).await;
            escalate = escalate || self.desync_retries > MAX_DESYNC_RETRIES;
        }

        if escalate {
            self.recovery_reset();
            if self.recovery_resets >= MAX_RECOVERY_RESETS {
                return Err(EngineError::Fatal(
                    "repeated recovery resets without progress".into(),
                ));
            }
        }
        Ok(())
    }

    /// Idempotent full shutdown: reset every run-scoped piece of state
    /// and terminate any active break. A fresh `run` afterwards starts
    /// from the same initial phase as a brand-new instance.
    pub fn shutdown(&mut self) {
        let now = self.now_ms();
        if !self.stopped {
            info!("engine shutdown");
        }
        self.cycle = CycleState::new(Phase::Restock, now);
        self.initialized = false;
        self.planner.reset();
        self.process_watch.reset();
        self.stoke_watch.reset();
        self.estimator.reset();
        self.breaks.terminate(now);
        self.campaigns_completed = 0;
        self.consecutive_failures = 0;
        self.desync_retries = 0;
        self.recovery_resets = 0;
        self.reward_threshold = roll_reward_threshold(&self.config);
        self.reward_cart_exhausted = false;
        self.stopped = true;
    }

    // ── Internals shared with the phase handlers ───────────────────

    pub(crate) fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Run the outgoing phase's exit hook, then transition. A rejected
    /// transition (same phase, or lock held) fires no hooks.
    pub(crate) async fn change_phase(&mut self, new_phase: Phase, lock: bool, now_ms: u64) {
        if !self.cycle.would_change(new_phase) {
            return;
        }
        self.phase_exit_hook(now_ms);
        self.cycle.transition(new_phase, lock, now_ms);
        if let Some(delay) = self.variance.post_transition_delay() {
            tokio::time::sleep(delay).await;
        }
    }

    fn phase_exit_hook(&mut self, now_ms: u64) {
        match self.cycle.phase() {
            Phase::Gather => self.planner.reset_signal_timer(Activity::Gather),
            Phase::Process => {
                self.process_watch.stop(InterruptCause::Superseded, now_ms);
                self.planner.reset_signal_timer(Activity::Process);
            }
            Phase::Stoke => {
                self.stoke_watch.stop(InterruptCause::Superseded, now_ms);
                self.planner.reset_signal_timer(Activity::Stoke);
            }
            _ => {}
        }
    }

    /// Optional variance delay before an actuation request.
    pub(crate) async fn pre_action_delay(&mut self) {
        if let Some(delay) = self.variance.pre_action_delay() {
            tokio::time::sleep(delay).await;
        }
    }

    fn determine_initial_phase(&self, snap: &WorldSnapshot) -> Phase {
        if !snap.player.in_arena {
            return Phase::Restock;
        }
        match self.config.gauge.healing_method {
            // Draughts are brewed in-arena, so being short of them is
            // no reason to leave.
            HealingMethod::Rations if snap.inventory.rations == 0 => Phase::Restock,
            _ => Phase::Idle,
        }
    }

    /// Not moving, not mid-interaction, and either at the designated
    /// safe spot or in the quiescent phase.
    fn is_safe_for_break(&self, snap: &WorldSnapshot) -> bool {
        if snap.player.moving || snap.player.interacting {
            return false;
        }
        let at_safe_spot = snap
            .player
            .position
            .distance_to(self.config.layout.safe_spot)
            <= self.config.layout.safe_radius;
        at_safe_spot || self.cycle.phase() == Phase::Idle
    }

    /// Classify interruptions for the current phase's watchdog. Returns
    /// true when a cause fired and the phase was changed; no actuation
    /// happens on such a tick.
    async fn evaluate_interrupts(&mut self, snap: &WorldSnapshot, now_ms: u64) -> bool {
        let cause = match self.cycle.phase() {
            Phase::Process => {
                let probe = InterruptProbe {
                    materials: snap.inventory.raw_fuel,
                    campaign_active: snap.campaign.active,
                    position: snap.player.position,
                    gauge: snap.player.gauge,
                };
                self.process_watch.check(&probe, now_ms)
            }
            Phase::Stoke => {
                let probe = InterruptProbe {
                    materials: snap.inventory.burnables(),
                    campaign_active: snap.campaign.active,
                    position: snap.player.position,
                    gauge: snap.player.gauge,
                };
                self.stoke_watch.check(&probe, now_ms)
            }
            _ => None,
        };

        let Some(cause) = cause else {
            return false;
        };

        // Plan handling: a finished consume stage or a dead campaign
        // makes the plan moot; everything else can resume it.
        match (self.cycle.phase(), cause) {
            (_, InterruptCause::CampaignEnded) => self.planner.clear(),
            (Phase::Stoke, InterruptCause::MaterialsExhausted) => self.planner.clear(),
            _ => {}
        }

        self.cycle.unlock();
        self.change_phase(Phase::Idle, false, now_ms).await;
        true
    }

    /// Consume a restorative when the gauge runs low. Returns true when
    /// this tick was spent on gauge maintenance.
    async fn maintain_gauge(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<bool> {
        if !snap.player.in_arena {
            return Ok(false);
        }
        if snap.player.gauge >= self.config.gauge.eat_at_gauge_level {
            return Ok(false);
        }

        let method = self.config.gauge.healing_method;
        if snap.inventory.restoratives(method) == 0 {
            // Already on the way to more restoratives: let that phase run.
            let handling = match method {
                HealingMethod::Rations => self.cycle.phase() == Phase::Restock,
                HealingMethod::Draughts => matches!(
                    self.cycle.phase(),
                    Phase::CollectFlasks | Phase::CollectSprigs | Phase::BrewDraughts
                ),
            };
            if handling {
                return Ok(false);
            }
            let fallback = match method {
                HealingMethod::Rations => Phase::Restock,
                HealingMethod::Draughts => Phase::CollectFlasks,
            };
            warn!(?fallback, "gauge low with no restoratives left");
            self.cycle.unlock();
            self.change_phase(fallback, false, now_ms).await;
            return Ok(true);
        }

        let item = match method {
            HealingMethod::Rations => ItemKind::Ration,
            HealingMethod::Draughts => ItemKind::Draught,
        };
        self.pre_action_delay().await;
        self.env.consume(item).await?;
        info!(gauge = snap.player.gauge, "restorative consumed");
        Ok(true)
    }

    fn stop_condition_met(&self, snap: &WorldSnapshot) -> bool {
        if let Some(max) = self.config.stop.max_campaigns {
            if self.campaigns_completed >= max {
                return true;
            }
        }
        if let Some(ceiling) = self.config.stop.reward_point_ceiling {
            if snap.reward_points >= ceiling {
                return true;
            }
        }
        false
    }

    /// Reward collection runs only between campaigns, once the rolled
    /// threshold is reached and the cart is not known to be empty.
    pub(crate) fn reward_collection_due(&self, snap: &WorldSnapshot) -> bool {
        self.config.rewards.enabled
            && !self.reward_cart_exhausted
            && !snap.campaign.active
            && snap.reward_points >= self.reward_threshold
    }

    pub(crate) fn mark_reward_cart_exhausted(&mut self) {
        self.reward_cart_exhausted = true;
    }

    pub(crate) fn reroll_reward_threshold(&mut self) {
        self.reward_threshold = roll_reward_threshold(&self.config);
    }

    /// Recovery path for repeated failures: release the lock, drop the
    /// plan and watchdogs, and re-derive the phase from scratch. The
    /// learned estimator state survives; it was not what broke.
    fn recovery_reset(&mut self) {
        self.recovery_resets += 1;
        warn!(resets = self.recovery_resets, "full state reset");
        let now = self.now_ms();
        self.cycle = CycleState::new(Phase::Restock, now);
        self.initialized = false;
        self.planner.clear();
        self.process_watch.reset();
        self.stoke_watch.reset();
        self.consecutive_failures = 0;
        self.desync_retries = 0;
    }

    async fn disconnect_for_break(&mut self) {
        for attempt in 1..=MAX_SESSION_ATTEMPTS {
            match self.env.disconnect().await {
                Ok(()) if !self.env.is_connected() => {
                    info!(attempt, "disconnected for extended break");
                    return;
                }
                Ok(()) => {}
                Err(e) => warn!(attempt, error = %e, "disconnect attempt failed"),
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        warn!("could not disconnect, continuing break anyway");
    }

    async fn reconnect_with_retries(&mut self) -> Result<()> {
        if self.env.is_connected() {
            return Ok(());
        }
        for attempt in 1..=MAX_SESSION_ATTEMPTS {
            match self.env.reconnect().await {
                Ok(()) if self.env.is_connected() => {
                    info!(attempt, "reconnected");
                    let now = self.now_ms();
                    self.cycle.touch(now);
                    return Ok(());
                }
                Ok(()) => {}
                Err(e) => warn!(attempt, error = %e, "reconnect attempt failed"),
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Err(EngineError::Fatal(
            "connectivity could not be restored after an extended break".into(),
        ))
    }

    /// Phase → handler lookup. Each handler's side effects are limited
    /// to declared actuation/query calls plus its own transitions.
    async fn dispatch(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        match self.cycle.phase() {
            Phase::Restock => self.handle_restock(snap, now_ms).await,
            Phase::EnterArena => self.handle_enter_arena(snap, now_ms).await,
            Phase::Idle => self.handle_idle(snap, now_ms).await,
            Phase::IgniteFurnace => self.handle_ignite_furnace(snap, now_ms).await,
            Phase::Gather => self.handle_gather(snap, now_ms).await,
            Phase::Process => self.handle_process(snap, now_ms).await,
            Phase::Stoke => self.handle_stoke(snap, now_ms).await,
            Phase::RepairFurnace => self.handle_repair_furnace(snap, now_ms).await,
            Phase::CollectFlasks => self.handle_collect_flasks(snap, now_ms).await,
            Phase::CollectSprigs => self.handle_collect_sprigs(snap, now_ms).await,
            Phase::BrewDraughts => self.handle_brew_draughts(snap, now_ms).await,
            Phase::WalkToSafeSpot => self.handle_walk_to_safe_spot(snap, now_ms).await,
            Phase::ExitForRewards => self.handle_exit_for_rewards(snap, now_ms).await,
            Phase::WalkToRewardsBank => self.handle_walk_to_rewards_bank(snap, now_ms).await,
            Phase::RestockForRewards => self.handle_restock_for_rewards(snap, now_ms).await,
            Phase::WalkToRewardCart => self.handle_walk_to_reward_cart(snap, now_ms).await,
            Phase::LootRewardCart => self.handle_loot_reward_cart(snap, now_ms).await,
            Phase::ReturnFromRewards => self.handle_return_from_rewards(snap, now_ms).await,
        }
    }
}

fn roll_reward_threshold(config: &Config) -> u32 {
    let base = config.rewards.minimum_points;
    if config.rewards.variance == 0 {
        return base;
    }
    base + rand::thread_rng().gen_range(0..=config.rewards.variance)
}
