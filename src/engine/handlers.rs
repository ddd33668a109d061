//! Phase handlers.
//!
//! One handler per [`Phase`], dispatched once per tick. Handlers only
//! query the sampler, issue actuation requests, and transition phases;
//! estimator/planner/watchdog internals stay behind their own APIs.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::interrupt::InterruptBaseline;
use crate::engine::Engine;
use crate::env::{wait_until, Actuator, EnvironmentSampler};
use crate::error::{EngineError, Result};
use crate::protocol::{
    Activity, HealingMethod, InteractableCondition, InteractableKind, ItemKind, Phase, Verb,
    WorldSnapshot,
};

/// Close enough to interact instead of walking.
const INTERACT_RADIUS: u32 = 3;

/// Bounded-wait parameters for actuation postconditions.
const WAIT_POLL: Duration = Duration::from_millis(100);
const WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Draughts brewed per restocking of flasks and sprigs.
const BREW_BATCH: u32 = 4;

impl<E> Engine<E>
where
    E: EnvironmentSampler + Actuator,
{
    // ── Idle: the orchestrator ─────────────────────────────────────

    /// Quiescent phase; decides what the loop should do next.
    pub(super) async fn handle_idle(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        let method = self.config.gauge.healing_method;
        if !snap.campaign.active {
            if self.reward_collection_due(snap) {
                info!(points = snap.reward_points, "collecting rewards between campaigns");
                self.change_phase(Phase::ExitForRewards, false, now_ms).await;
                return Ok(());
            }
            // Rations come from the bank; draughts are brewed in-arena.
            if method == HealingMethod::Rations
                && snap.inventory.rations < self.config.gauge.min_restoratives
            {
                self.change_phase(Phase::Restock, false, now_ms).await;
                return Ok(());
            }
            if !snap.player.in_arena {
                self.change_phase(Phase::EnterArena, false, now_ms).await;
                return Ok(());
            }
            if method == HealingMethod::Draughts && snap.inventory.draughts == 0 {
                self.change_phase(Phase::CollectFlasks, false, now_ms).await;
            }
            // Otherwise: wait out the intermission in place.
            return Ok(());
        }

        if !snap.player.in_arena {
            self.change_phase(Phase::EnterArena, false, now_ms).await;
            return Ok(());
        }

        // The furnace comes first: everything else depends on it.
        let furnace = self
            .env
            .find_interactable(InteractableKind::Furnace, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::Furnace))?;
        match furnace.condition {
            InteractableCondition::Broken
                if self.config.activities.repair_enabled && snap.inventory.has_mallet =>
            {
                self.change_phase(Phase::RepairFurnace, true, now_ms).await;
                return Ok(());
            }
            InteractableCondition::Unlit if self.config.activities.relight_enabled => {
                self.change_phase(Phase::IgniteFurnace, true, now_ms).await;
                return Ok(());
            }
            _ => {}
        }
        let furnace_burning = furnace.condition == InteractableCondition::Burning;

        // Brewing chain, only for the draught healing method.
        if method == HealingMethod::Draughts && snap.inventory.draughts == 0 {
            self.change_phase(Phase::CollectFlasks, false, now_ms).await;
            return Ok(());
        }

        let process_enabled = self.config.activities.process_enabled;
        let inventory = snap.inventory;

        if let Some(plan) = self.planner.plan().copied() {
            if plan.is_complete() {
                self.planner.clear();
                return Ok(());
            }
            if !plan.gather_satisfied(inventory.burnables()) && !inventory.is_full() {
                self.change_phase(Phase::Gather, true, now_ms).await;
                return Ok(());
            }
            if process_enabled && inventory.raw_fuel > 0 && !plan.process_satisfied(inventory.raw_fuel)
            {
                self.change_phase(Phase::Process, true, now_ms).await;
                return Ok(());
            }
            if inventory.burnables() > 0 && furnace_burning {
                self.change_phase(Phase::Stoke, true, now_ms).await;
            }
            return Ok(());
        }

        // No plan: burn leftovers down to zero before planning anew.
        if inventory.burnables() > 0 {
            if process_enabled && inventory.raw_fuel > 0 {
                self.change_phase(Phase::Process, true, now_ms).await;
            } else if furnace_burning {
                self.change_phase(Phase::Stoke, true, now_ms).await;
            }
            return Ok(());
        }

        let created = self
            .planner
            .try_create(
                self.estimator.estimated_seconds_left(),
                inventory.free_slots,
                process_enabled,
            )
            .is_some();
        if created {
            self.change_phase(Phase::Gather, true, now_ms).await;
        }
        Ok(())
    }

    // ── The cycle activities ───────────────────────────────────────

    pub(super) async fn handle_gather(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        let goal_met = self
            .planner
            .plan()
            .map(|p| p.gather_satisfied(snap.inventory.burnables()))
            .unwrap_or(true);
        if !snap.campaign.active || goal_met || snap.inventory.is_full() {
            self.cycle.unlock();
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }

        if snap.player.animating == Some(Activity::Gather) {
            return Ok(());
        }

        let node = self
            .env
            .find_interactable(InteractableKind::FuelNode, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::FuelNode))?;
        self.pre_action_delay().await;
        self.env.interact(&node, Verb::Harvest).await
    }

    pub(super) async fn handle_process(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        let stage_done = self
            .planner
            .plan()
            .map(|p| p.process_satisfied(snap.inventory.raw_fuel))
            .unwrap_or(snap.inventory.raw_fuel == 0);
        if !snap.campaign.active || stage_done {
            self.cycle.unlock();
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }
        if !snap.inventory.has_carver {
            warn!("process activity without a carver, restocking");
            self.cycle.unlock();
            self.change_phase(Phase::Restock, false, now_ms).await;
            return Ok(());
        }

        if !self.process_watch.is_active() {
            self.process_watch.start(
                InterruptBaseline {
                    materials: snap.inventory.raw_fuel,
                    position: snap.player.position,
                    gauge: snap.player.gauge,
                },
                now_ms,
            );
        }

        if snap.player.animating == Some(Activity::Process) {
            return Ok(());
        }
        self.pre_action_delay().await;
        self.env.combine(ItemKind::Carver, ItemKind::RawFuel).await
    }

    pub(super) async fn handle_stoke(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        if let Some(plan) = self.planner.plan() {
            if plan.is_complete() {
                info!("plan complete");
                self.planner.clear();
                self.cycle.unlock();
                self.change_phase(Phase::Idle, false, now_ms).await;
                return Ok(());
            }
        }
        if !snap.campaign.active || snap.inventory.burnables() == 0 {
            self.cycle.unlock();
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }

        let furnace = self
            .env
            .find_interactable(InteractableKind::Furnace, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::Furnace))?;
        if furnace.condition != InteractableCondition::Burning {
            debug!(condition = ?furnace.condition, "furnace not burning, re-evaluating");
            self.cycle.unlock();
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }

        if !self.stoke_watch.is_active() {
            self.stoke_watch.start(
                InterruptBaseline {
                    materials: snap.inventory.burnables(),
                    position: snap.player.position,
                    gauge: snap.player.gauge,
                },
                now_ms,
            );
        }

        if snap.player.animating == Some(Activity::Stoke) {
            return Ok(());
        }
        self.pre_action_delay().await;
        self.env.interact(&furnace, Verb::Feed).await
    }

    // ── Furnace upkeep ─────────────────────────────────────────────

    pub(super) async fn handle_ignite_furnace(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let furnace = self
            .env
            .find_interactable(InteractableKind::Furnace, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::Furnace))?;
        match furnace.condition {
            InteractableCondition::Unlit => {}
            _ => {
                self.cycle.unlock();
                self.change_phase(Phase::Idle, false, now_ms).await;
                return Ok(());
            }
        }

        self.pre_action_delay().await;
        self.env.interact(&furnace, Verb::Ignite).await?;

        let lit = wait_until(
            || {
                self.env
                    .find_interactable(InteractableKind::Furnace, None)
                    .map(|f| f.condition == InteractableCondition::Burning)
                    .unwrap_or(false)
            },
            WAIT_POLL,
            WAIT_TIMEOUT,
        )
        .await;
        if !lit {
            return Err(EngineError::Actuation("furnace did not light".into()));
        }

        self.cycle.unlock();
        self.change_phase(Phase::Idle, false, now_ms).await;
        Ok(())
    }

    pub(super) async fn handle_repair_furnace(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let furnace = self
            .env
            .find_interactable(InteractableKind::Furnace, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::Furnace))?;
        if furnace.condition != InteractableCondition::Broken || !snap.inventory.has_mallet {
            self.cycle.unlock();
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }

        self.pre_action_delay().await;
        self.env.interact(&furnace, Verb::Repair).await?;

        let mended = wait_until(
            || {
                self.env
                    .find_interactable(InteractableKind::Furnace, None)
                    .map(|f| f.condition != InteractableCondition::Broken)
                    .unwrap_or(false)
            },
            WAIT_POLL,
            WAIT_TIMEOUT,
        )
        .await;
        if !mended {
            return Err(EngineError::Actuation("furnace repair did not register".into()));
        }

        self.cycle.unlock();
        self.change_phase(Phase::Idle, false, now_ms).await;
        Ok(())
    }

    // ── Supply flows ───────────────────────────────────────────────

    pub(super) async fn handle_restock(&mut self, snap: &WorldSnapshot, now_ms: u64) -> Result<()> {
        let bank = self.config.layout.bank;
        if snap.player.position.distance_to(bank) > self.config.layout.bank_radius {
            if !snap.player.moving {
                self.env.walk_toward(bank).await?;
            }
            return Ok(());
        }

        let booth = self
            .env
            .find_interactable(InteractableKind::BankBooth, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::BankBooth))?;
        self.pre_action_delay().await;
        self.env.interact(&booth, Verb::Restock).await?;

        // Draughts cannot come from the bank; only rations are checked.
        let min_rations = match self.config.gauge.healing_method {
            HealingMethod::Rations => self.config.gauge.min_restoratives,
            HealingMethod::Draughts => 0,
        };
        let need_carver = self.config.activities.process_enabled;
        let need_mallet = self.config.activities.repair_enabled;
        let stocked = wait_until(
            || {
                let inv = self.env.snapshot().inventory;
                inv.rations >= min_rations
                    && (!need_carver || inv.has_carver)
                    && (!need_mallet || inv.has_mallet)
            },
            WAIT_POLL,
            WAIT_TIMEOUT,
        )
        .await;
        if !stocked {
            return Err(EngineError::Actuation("restock left supplies missing".into()));
        }

        info!("supplies restocked");
        self.change_phase(Phase::EnterArena, false, now_ms).await;
        Ok(())
    }

    pub(super) async fn handle_enter_arena(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        if snap.player.in_arena {
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }

        let entrance = self
            .env
            .find_interactable(InteractableKind::ArenaEntrance, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::ArenaEntrance))?;
        if snap.player.position.distance_to(entrance.position) > INTERACT_RADIUS {
            if !snap.player.moving {
                self.env.walk_toward(entrance.position).await?;
            }
            return Ok(());
        }

        self.pre_action_delay().await;
        self.env.interact(&entrance, Verb::Enter).await
    }

    // ── Brewing chain (draught healing method) ─────────────────────

    pub(super) async fn handle_collect_flasks(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        if snap.inventory.flasks >= BREW_BATCH {
            self.change_phase(Phase::CollectSprigs, false, now_ms).await;
            return Ok(());
        }
        let crate_ = self
            .env
            .find_interactable(InteractableKind::SupplyCrate, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::SupplyCrate))?;
        self.pre_action_delay().await;
        self.env.interact(&crate_, Verb::Loot).await
    }

    pub(super) async fn handle_collect_sprigs(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        if snap.inventory.sprigs >= snap.inventory.flasks || snap.inventory.is_full() {
            self.change_phase(Phase::BrewDraughts, false, now_ms).await;
            return Ok(());
        }
        let patch = self
            .env
            .find_interactable(InteractableKind::SproutPatch, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::SproutPatch))?;
        self.pre_action_delay().await;
        self.env.interact(&patch, Verb::Harvest).await
    }

    pub(super) async fn handle_brew_draughts(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        if snap.inventory.flasks == 0 || snap.inventory.sprigs == 0 {
            debug!(draughts = snap.inventory.draughts, "brewing done");
            self.change_phase(Phase::Idle, false, now_ms).await;
            return Ok(());
        }
        self.pre_action_delay().await;
        self.env.combine(ItemKind::Flask, ItemKind::Sprig).await
    }

    // ── Break support ──────────────────────────────────────────────

    pub(super) async fn handle_walk_to_safe_spot(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let safe_spot = self.config.layout.safe_spot;
        if snap.player.position.distance_to(safe_spot) <= self.config.layout.safe_radius {
            if !snap.player.moving {
                // Parked; the break scheduler sees a safe state now.
                self.change_phase(Phase::Idle, false, now_ms).await;
            }
            return Ok(());
        }
        if !snap.player.moving {
            self.env.walk_toward(safe_spot).await?;
        }
        Ok(())
    }

    // ── Reward collection flow ─────────────────────────────────────

    pub(super) async fn handle_exit_for_rewards(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        if !snap.player.in_arena {
            self.change_phase(Phase::WalkToRewardsBank, false, now_ms).await;
            return Ok(());
        }
        let exit = self
            .env
            .find_interactable(InteractableKind::ArenaExit, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::ArenaExit))?;
        if snap.player.position.distance_to(exit.position) > INTERACT_RADIUS {
            if !snap.player.moving {
                self.env.walk_toward(exit.position).await?;
            }
            return Ok(());
        }
        self.pre_action_delay().await;
        self.env.interact(&exit, Verb::Exit).await
    }

    pub(super) async fn handle_walk_to_rewards_bank(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let bank = self.config.layout.bank;
        if snap.player.position.distance_to(bank) <= self.config.layout.bank_radius {
            self.change_phase(Phase::RestockForRewards, false, now_ms).await;
            return Ok(());
        }
        if !snap.player.moving {
            self.env.walk_toward(bank).await?;
        }
        Ok(())
    }

    pub(super) async fn handle_restock_for_rewards(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let booth = self
            .env
            .find_interactable(InteractableKind::BankBooth, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::BankBooth))?;
        self.pre_action_delay().await;
        self.env.interact(&booth, Verb::Deposit).await?;
        self.change_phase(Phase::WalkToRewardCart, false, now_ms).await;
        Ok(())
    }

    pub(super) async fn handle_walk_to_reward_cart(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let cart = self.config.layout.reward_cart;
        if snap.player.position.distance_to(cart) <= INTERACT_RADIUS {
            self.change_phase(Phase::LootRewardCart, false, now_ms).await;
            return Ok(());
        }
        if !snap.player.moving {
            self.env.walk_toward(cart).await?;
        }
        Ok(())
    }

    pub(super) async fn handle_loot_reward_cart(
        &mut self,
        snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        let cart = self
            .env
            .find_interactable(InteractableKind::RewardCart, Some(snap.player.position))
            .ok_or(EngineError::Desync(InteractableKind::RewardCart))?;

        if snap.reward_points == 0 || cart.condition == InteractableCondition::Exhausted {
            if cart.condition == InteractableCondition::Exhausted {
                // Remember so we do not walk back to an empty cart.
                self.mark_reward_cart_exhausted();
            }
            info!(remaining = snap.reward_points, "reward cart looting finished");
            self.change_phase(Phase::ReturnFromRewards, false, now_ms).await;
            return Ok(());
        }

        self.pre_action_delay().await;
        self.env.interact(&cart, Verb::Loot).await
    }

    pub(super) async fn handle_return_from_rewards(
        &mut self,
        _snap: &WorldSnapshot,
        now_ms: u64,
    ) -> Result<()> {
        self.reroll_reward_threshold();
        self.change_phase(Phase::Restock, false, now_ms).await;
        Ok(())
    }
}
