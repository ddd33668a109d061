//! In-process simulated environment.
//!
//! A small entity world implementing the sampler/actuator ports, used
//! by the binary for headless demonstration runs and by the integration
//! tests to drive the full loop deterministically. Time comes from the
//! shared [`Clock`], so tests advance it explicitly.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use hecs::World;
use tracing::debug;

use crate::env::{Actuator, Clock, EnvironmentSampler};
use crate::error::{EngineError, Result};
use crate::protocol::{
    Activity, CampaignView, EnvEvent, InteractableCondition, InteractableHandle, InteractableKind,
    InventoryView, ItemKind, PlayerView, Point, Verb, WorldSnapshot, MAX_LEVEL,
};

// ── Components ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Position(Point);

#[derive(Debug, Clone, Copy)]
struct Kind(InteractableKind);

#[derive(Debug, Clone, Copy)]
struct Condition(InteractableCondition);

// ── Parameters ─────────────────────────────────────────────────────

/// Simulation tuning. Defaults line up with the planner's duration
/// priors so a fresh engine plans sensibly against a fresh world.
#[derive(Debug, Clone, Copy)]
pub struct SimParams {
    pub gather_ms: u64,
    pub process_ms: u64,
    pub stoke_ms: u64,
    /// Countdown levels drained per second while a campaign runs.
    pub drain_per_sec: f64,
    pub intermission_secs: u64,
    /// Gauge levels lost per second while inside the arena.
    pub gauge_decay_per_sec: f64,
    pub walk_tile_ms: u64,
    /// Reward points granted per stoked unit.
    pub points_per_stoke: u32,
    pub capacity: u32,
    /// Break the furnace after this many stoked units, once.
    pub furnace_breaks_after: Option<u32>,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            gather_ms: 2_800,
            process_ms: 2_200,
            stoke_ms: 1_600,
            drain_per_sec: 0.5,
            intermission_secs: 10,
            gauge_decay_per_sec: 1.0,
            walk_tile_ms: 100,
            points_per_stoke: 25,
            capacity: 28,
            furnace_breaks_after: None,
        }
    }
}

// ── Layout constants ───────────────────────────────────────────────

/// Everything at or above this y coordinate is inside the arena.
const ARENA_MIN_Y: i32 = 60;
const ARENA_SPAWN: Point = Point::new(30, 62);
const OUTSIDE_SPAWN: Point = Point::new(30, 58);
const PLAYER_START: Point = Point::new(40, 44);

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ActiveAnimation {
    activity: Activity,
    completes_at_ms: u64,
}

struct SimState {
    world: World,
    furnace: hecs::Entity,
    last_update_ms: u64,

    // Campaign.
    round_active: bool,
    countdown: f64,
    intermission_until_ms: u64,

    // Player.
    position: Point,
    destination: Option<Point>,
    walk_progress_ms: u64,
    gauge: f64,
    animation: Option<ActiveAnimation>,
    connected: bool,

    // Inventory.
    raw_fuel: u32,
    kindling: u32,
    rations: u32,
    flasks: u32,
    sprigs: u32,
    draughts: u32,
    has_carver: bool,
    has_mallet: bool,

    reward_points: u32,
    stokes_this_run: u32,
    events: Vec<EnvEvent>,
}

/// The simulated environment: a hecs world of interactables plus a
/// handful of player/campaign scalars.
pub struct SimEnvironment {
    clock: Arc<dyn Clock>,
    params: SimParams,
    state: Mutex<SimState>,
}

impl SimEnvironment {
    pub fn new(clock: Arc<dyn Clock>, params: SimParams) -> Self {
        let mut world = World::new();

        let furnace = world.spawn((
            Kind(InteractableKind::Furnace),
            Position(Point::new(30, 80)),
            Condition(InteractableCondition::Unlit),
        ));
        world.spawn((
            Kind(InteractableKind::FuelNode),
            Position(Point::new(28, 78)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::FuelNode),
            Position(Point::new(32, 78)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::SupplyCrate),
            Position(Point::new(34, 82)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::SproutPatch),
            Position(Point::new(35, 78)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::ArenaEntrance),
            Position(Point::new(30, 58)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::ArenaExit),
            Position(Point::new(30, 62)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::BankBooth),
            Position(Point::new(40, 44)),
            Condition(InteractableCondition::Ready),
        ));
        world.spawn((
            Kind(InteractableKind::RewardCart),
            Position(Point::new(36, 44)),
            Condition(InteractableCondition::Ready),
        ));

        let now = clock.now_ms();
        let state = SimState {
            world,
            furnace,
            last_update_ms: now,
            round_active: false,
            countdown: 0.0,
            intermission_until_ms: now + params.intermission_secs * 1_000,
            position: PLAYER_START,
            destination: None,
            walk_progress_ms: 0,
            gauge: f64::from(MAX_LEVEL),
            animation: None,
            connected: true,
            raw_fuel: 0,
            kindling: 0,
            rations: 0,
            flasks: 0,
            sprigs: 0,
            draughts: 0,
            has_carver: false,
            has_mallet: false,
            reward_points: 0,
            stokes_this_run: 0,
            events: Vec::new(),
        };

        Self {
            clock,
            params,
            state: Mutex::new(state),
        }
    }

    fn advance(&self, state: &mut SimState) {
        let now = self.clock.now_ms();
        let dt_ms = now.saturating_sub(state.last_update_ms);
        if dt_ms == 0 {
            return;
        }
        state.last_update_ms = now;
        let dt_secs = dt_ms as f64 / 1000.0;

        // Campaign timer.
        if state.round_active {
            state.countdown -= self.params.drain_per_sec * dt_secs;
            if state.countdown <= 0.0 {
                state.countdown = 0.0;
                state.round_active = false;
                state.intermission_until_ms = now + self.params.intermission_secs * 1_000;
                state.stokes_this_run = 0;
                // The fire dies between rounds.
                let _ = state
                    .world
                    .insert_one(state.furnace, Condition(InteractableCondition::Unlit));
                debug!("sim: round over");
            }
        } else if now >= state.intermission_until_ms {
            state.round_active = true;
            state.countdown = f64::from(MAX_LEVEL);
            debug!("sim: round started");
        }

        if !state.connected {
            return;
        }

        // Movement.
        if let Some(dest) = state.destination {
            state.walk_progress_ms += dt_ms;
            while state.walk_progress_ms >= self.params.walk_tile_ms && state.position != dest {
                state.walk_progress_ms -= self.params.walk_tile_ms;
                state.position.x += (dest.x - state.position.x).signum();
                state.position.y += (dest.y - state.position.y).signum();
            }
            if state.position == dest {
                state.destination = None;
                state.walk_progress_ms = 0;
            }
        }

        // Gauge decay inside the arena during a campaign.
        if state.round_active && state.position.y >= ARENA_MIN_Y {
            state.gauge = (state.gauge - self.params.gauge_decay_per_sec * dt_secs).max(0.0);
        }

        // Activity completion.
        if let Some(anim) = state.animation {
            if now >= anim.completes_at_ms {
                state.animation = None;
                self.complete_activity(state, anim.activity);
            }
        }
    }

    fn complete_activity(&self, state: &mut SimState, activity: Activity) {
        match activity {
            Activity::Gather => {
                if self.free_slots(state) > 0 {
                    state.raw_fuel += 1;
                }
            }
            Activity::Process => {
                if state.raw_fuel > 0 {
                    state.raw_fuel -= 1;
                    state.kindling += 1;
                }
            }
            Activity::Stoke => {
                if state.kindling > 0 {
                    state.kindling -= 1;
                } else if state.raw_fuel > 0 {
                    state.raw_fuel -= 1;
                }
                state.reward_points += self.params.points_per_stoke;
                state.stokes_this_run += 1;
                if let Some(limit) = self.params.furnace_breaks_after {
                    if state.stokes_this_run == limit {
                        let _ = state
                            .world
                            .insert_one(state.furnace, Condition(InteractableCondition::Broken));
                        debug!("sim: furnace broke");
                    }
                }
            }
        }
        state.events.push(EnvEvent::UnitCompleted { activity });
    }

    fn free_slots(&self, state: &SimState) -> u32 {
        let tools = u32::from(state.has_carver) + u32::from(state.has_mallet);
        let used = state.raw_fuel
            + state.kindling
            + state.rations
            + state.flasks
            + state.sprigs
            + state.draughts
            + tools;
        self.params.capacity.saturating_sub(used)
    }

    fn in_arena(position: Point) -> bool {
        position.y >= ARENA_MIN_Y
    }
}

// ── Sampler ────────────────────────────────────────────────────────

impl EnvironmentSampler for SimEnvironment {
    fn snapshot(&self) -> WorldSnapshot {
        let mut state = self.state.lock().expect("sim state poisoned");
        self.advance(&mut state);
        let now = self.clock.now_ms();

        let intermission_seconds = if state.round_active {
            None
        } else {
            Some((state.intermission_until_ms.saturating_sub(now) / 1_000) as u32)
        };

        WorldSnapshot {
            campaign: CampaignView {
                active: state.round_active,
                countdown_level: state.countdown.ceil() as u32,
                intermission_seconds,
            },
            player: PlayerView {
                position: state.position,
                gauge: state.gauge.round() as u32,
                moving: state.destination.is_some(),
                animating: state.animation.map(|a| a.activity),
                interacting: state.animation.is_some(),
                in_arena: Self::in_arena(state.position),
            },
            inventory: InventoryView {
                raw_fuel: state.raw_fuel,
                kindling: state.kindling,
                rations: state.rations,
                flasks: state.flasks,
                sprigs: state.sprigs,
                draughts: state.draughts,
                has_carver: state.has_carver,
                has_mallet: state.has_mallet,
                free_slots: self.free_slots(&state),
            },
            reward_points: state.reward_points,
        }
    }

    fn drain_events(&mut self) -> Vec<EnvEvent> {
        let mut state = self.state.lock().expect("sim state poisoned");
        self.advance(&mut state);
        std::mem::take(&mut state.events)
    }

    fn find_interactable(
        &self,
        kind: InteractableKind,
        near: Option<Point>,
    ) -> Option<InteractableHandle> {
        let state = self.state.lock().expect("sim state poisoned");
        let reference = near.unwrap_or(state.position);
        let mut best: Option<InteractableHandle> = None;
        let mut best_dist = u32::MAX;
        let mut query = state.world.query::<(&Kind, &Position, &Condition)>();
        for (entity, (Kind(k), Position(pos), Condition(cond))) in query.iter() {
            if *k != kind {
                continue;
            }
            // The cart's sub-state depends on whether anything is owed.
            let condition = if kind == InteractableKind::RewardCart && state.reward_points == 0 {
                InteractableCondition::Exhausted
            } else {
                *cond
            };
            let dist = pos.distance_to(reference);
            if dist < best_dist {
                best_dist = dist;
                best = Some(InteractableHandle {
                    id: entity.to_bits().get(),
                    kind,
                    position: *pos,
                    condition,
                });
            }
        }
        best
    }
}

// ── Actuator ───────────────────────────────────────────────────────

#[async_trait]
impl Actuator for SimEnvironment {
    async fn interact(&mut self, target: &InteractableHandle, verb: Verb) -> Result<()> {
        let state = self.state.get_mut().expect("sim state poisoned");
        let now = self.clock.now_ms();

        match (target.kind, verb) {
            (InteractableKind::FuelNode, Verb::Harvest) => {
                if !state.round_active {
                    return Err(EngineError::Actuation("no campaign running".into()));
                }
                state.animation = Some(ActiveAnimation {
                    activity: Activity::Gather,
                    completes_at_ms: now + self.params.gather_ms,
                });
                Ok(())
            }
            (InteractableKind::Furnace, Verb::Feed) => {
                state.animation = Some(ActiveAnimation {
                    activity: Activity::Stoke,
                    completes_at_ms: now + self.params.stoke_ms,
                });
                Ok(())
            }
            (InteractableKind::Furnace, Verb::Ignite) => {
                state
                    .world
                    .insert_one(state.furnace, Condition(InteractableCondition::Burning))
                    .map_err(|e| EngineError::Actuation(format!("ignite: {e}")))?;
                Ok(())
            }
            (InteractableKind::Furnace, Verb::Repair) => {
                if !state.has_mallet {
                    return Err(EngineError::Actuation("no mallet held".into()));
                }
                state
                    .world
                    .insert_one(state.furnace, Condition(InteractableCondition::Unlit))
                    .map_err(|e| EngineError::Actuation(format!("repair: {e}")))?;
                Ok(())
            }
            (InteractableKind::ArenaEntrance, Verb::Enter) => {
                state.position = ARENA_SPAWN;
                state.destination = None;
                Ok(())
            }
            (InteractableKind::ArenaExit, Verb::Exit) => {
                state.position = OUTSIDE_SPAWN;
                state.destination = None;
                Ok(())
            }
            (InteractableKind::BankBooth, Verb::Restock) => {
                state.rations = 8;
                state.has_carver = true;
                state.has_mallet = true;
                Ok(())
            }
            (InteractableKind::BankBooth, Verb::Deposit) => {
                state.raw_fuel = 0;
                state.kindling = 0;
                state.flasks = 0;
                state.sprigs = 0;
                Ok(())
            }
            (InteractableKind::SupplyCrate, Verb::Loot) => {
                state.flasks += 1;
                Ok(())
            }
            (InteractableKind::SproutPatch, Verb::Harvest) => {
                state.sprigs += 1;
                Ok(())
            }
            (InteractableKind::RewardCart, Verb::Loot) => {
                let take = state.reward_points.min(500);
                state.reward_points -= take;
                Ok(())
            }
            (kind, verb) => Err(EngineError::Actuation(format!(
                "unsupported interaction {verb:?} on {kind:?}"
            ))),
        }
    }

    async fn consume(&mut self, item: ItemKind) -> Result<()> {
        let state = self.state.get_mut().expect("sim state poisoned");
        let slot = match item {
            ItemKind::Ration => &mut state.rations,
            ItemKind::Draught => &mut state.draughts,
            other => {
                return Err(EngineError::Actuation(format!("{other:?} is not consumable")));
            }
        };
        if *slot == 0 {
            return Err(EngineError::Actuation(format!("no {item:?} held")));
        }
        *slot -= 1;
        state.gauge = (state.gauge + 40.0).min(f64::from(MAX_LEVEL));
        Ok(())
    }

    async fn combine(&mut self, first: ItemKind, second: ItemKind) -> Result<()> {
        let state = self.state.get_mut().expect("sim state poisoned");
        let now = self.clock.now_ms();
        match (first, second) {
            (ItemKind::Carver, ItemKind::RawFuel) => {
                if !state.has_carver {
                    return Err(EngineError::Actuation("no carver held".into()));
                }
                if state.raw_fuel == 0 {
                    return Err(EngineError::Actuation("nothing to carve".into()));
                }
                state.animation = Some(ActiveAnimation {
                    activity: Activity::Process,
                    completes_at_ms: now + self.params.process_ms,
                });
                Ok(())
            }
            (ItemKind::Flask, ItemKind::Sprig) => {
                if state.flasks == 0 || state.sprigs == 0 {
                    return Err(EngineError::Actuation("missing brewing components".into()));
                }
                state.flasks -= 1;
                state.sprigs -= 1;
                state.draughts += 1;
                Ok(())
            }
            (a, b) => Err(EngineError::Actuation(format!(
                "cannot combine {a:?} with {b:?}"
            ))),
        }
    }

    async fn walk_toward(&mut self, destination: Point) -> Result<()> {
        let state = self.state.get_mut().expect("sim state poisoned");
        state.destination = Some(destination);
        state.animation = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().expect("sim state poisoned").connected
    }

    async fn disconnect(&mut self) -> Result<()> {
        let state = self.state.get_mut().expect("sim state poisoned");
        state.connected = false;
        state.animation = None;
        state.destination = None;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.state.get_mut().expect("sim state poisoned").connected = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::ManualClock;

    fn make_sim() -> (Arc<ManualClock>, SimEnvironment) {
        let clock = ManualClock::new();
        let sim = SimEnvironment::new(clock.clone(), SimParams::default());
        (clock, sim)
    }

    #[test]
    fn campaign_starts_after_intermission() {
        let (clock, sim) = make_sim();
        assert!(!sim.snapshot().campaign.active);

        clock.advance(10_500);
        let snap = sim.snapshot();
        assert!(snap.campaign.active);
        assert_eq!(snap.campaign.countdown_level, MAX_LEVEL);
        assert_eq!(snap.campaign.intermission_seconds, None);
    }

    #[test]
    fn countdown_drains_while_active() {
        let (clock, sim) = make_sim();
        clock.advance(10_500);
        assert!(sim.snapshot().campaign.active);

        clock.advance(60_000);
        let snap = sim.snapshot();
        // 0.5 levels/sec for 60 s = 30 levels gone.
        assert_eq!(snap.campaign.countdown_level, 70);
    }

    #[tokio::test]
    async fn harvest_produces_fuel_and_an_event() {
        let (clock, mut sim) = make_sim();
        clock.advance(10_500);
        let node = sim
            .find_interactable(InteractableKind::FuelNode, None)
            .unwrap();
        sim.interact(&node, Verb::Harvest).await.unwrap();
        assert_eq!(sim.snapshot().player.animating, Some(Activity::Gather));

        clock.advance(3_000);
        let snap = sim.snapshot();
        assert_eq!(snap.inventory.raw_fuel, 1);
        assert_eq!(snap.player.animating, None);
        assert_eq!(
            sim.drain_events(),
            vec![EnvEvent::UnitCompleted {
                activity: Activity::Gather
            }]
        );
        assert!(sim.drain_events().is_empty());
    }

    #[tokio::test]
    async fn walking_reaches_the_destination() {
        let (clock, mut sim) = make_sim();
        sim.walk_toward(Point::new(42, 47)).await.unwrap();
        assert!(sim.snapshot().player.moving);

        clock.advance(2_000);
        let snap = sim.snapshot();
        assert_eq!(snap.player.position, Point::new(42, 47));
        assert!(!snap.player.moving);
    }

    #[tokio::test]
    async fn restock_then_consume_restores_gauge() {
        let (clock, mut sim) = make_sim();
        let booth = sim
            .find_interactable(InteractableKind::BankBooth, None)
            .unwrap();
        sim.interact(&booth, Verb::Restock).await.unwrap();
        assert_eq!(sim.snapshot().inventory.rations, 8);

        // Burn some gauge inside the arena, then eat.
        let entrance = sim
            .find_interactable(InteractableKind::ArenaEntrance, None)
            .unwrap();
        sim.interact(&entrance, Verb::Enter).await.unwrap();
        clock.advance(11_000); // round starts
        clock.advance(50_000); // gauge decays by ~50
        let before = sim.snapshot().player.gauge;
        assert!(before < 60);

        sim.consume(ItemKind::Ration).await.unwrap();
        let after = sim.snapshot().player.gauge;
        assert_eq!(after, (before + 40).min(MAX_LEVEL));
        assert_eq!(sim.snapshot().inventory.rations, 7);
    }

    #[tokio::test]
    async fn reward_cart_exhausts_at_zero_points() {
        let (_clock, mut sim) = make_sim();
        {
            let state = sim.state.get_mut().unwrap();
            state.reward_points = 600;
        }
        let cart = sim
            .find_interactable(InteractableKind::RewardCart, None)
            .unwrap();
        assert_eq!(cart.condition, InteractableCondition::Ready);

        sim.interact(&cart, Verb::Loot).await.unwrap();
        sim.interact(&cart, Verb::Loot).await.unwrap();
        let cart = sim
            .find_interactable(InteractableKind::RewardCart, None)
            .unwrap();
        assert_eq!(cart.condition, InteractableCondition::Exhausted);
    }
}
