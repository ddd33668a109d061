use serde::{Deserialize, Serialize};

// ── Core type aliases ──────────────────────────────────────────────

pub type EntityId = u64;

/// The countdown quantity and the player gauge are both reported as
/// percentages of this ceiling.
pub const MAX_LEVEL: u32 = 100;

// ── Geometry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Tile distance (Chebyshev): the number of steps needed when
    /// diagonal movement costs the same as cardinal movement.
    pub fn distance_to(self, other: Point) -> u32 {
        let dx = (self.x - other.x).unsigned_abs();
        let dy = (self.y - other.y).unsigned_abs();
        dx.max(dy)
    }
}

// ── Phases ─────────────────────────────────────────────────────────

/// Points in the gather/process/consume cycle plus the auxiliary flows.
/// Exactly one is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Bank for supplies before entering the arena.
    Restock,
    /// Move to and enter the campaign area.
    EnterArena,
    /// Quiescent between actions; the orchestrating phase.
    Idle,
    /// Light an unlit furnace.
    IgniteFurnace,
    /// Harvest raw fuel from a fuel node.
    Gather,
    /// Carve raw fuel into kindling.
    Process,
    /// Feed fuel to the burning furnace.
    Stoke,
    /// Mend a broken furnace.
    RepairFurnace,
    /// Pick up empty flasks from the supply crate.
    CollectFlasks,
    /// Harvest sprigs from the sprout patch.
    CollectSprigs,
    /// Combine flasks and sprigs into gauge-restoring draughts.
    BrewDraughts,
    /// Walk to the designated safe spot so a pending break can start.
    WalkToSafeSpot,
    // ── Reward collection flow ─────────────────────────────────────
    ExitForRewards,
    WalkToRewardsBank,
    RestockForRewards,
    WalkToRewardCart,
    LootRewardCart,
    ReturnFromRewards,
}

impl Phase {
    /// Phases belonging to the reward collection flow. The break
    /// countdown is frozen while any of these is current.
    pub fn is_reward_phase(self) -> bool {
        matches!(
            self,
            Phase::ExitForRewards
                | Phase::WalkToRewardsBank
                | Phase::RestockForRewards
                | Phase::WalkToRewardCart
                | Phase::LootRewardCart
                | Phase::ReturnFromRewards
        )
    }
}

// ── Activities ─────────────────────────────────────────────────────

/// The three repeated sub-actions of one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    Gather,
    Process,
    Stoke,
}

// ── Items ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    /// Freshly gathered, unprocessed fuel.
    RawFuel,
    /// Processed fuel; burns for more reward credit.
    Kindling,
    /// Gauge-restoring food.
    Ration,
    /// Empty flask, one half of a draught.
    Flask,
    /// Herb sprig, the other half of a draught.
    Sprig,
    /// Brewed gauge restorative.
    Draught,
    /// Tool required for the process activity.
    Carver,
    /// Tool required for furnace repairs.
    Mallet,
}

// ── Interactables ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractableKind {
    FuelNode,
    Furnace,
    ArenaEntrance,
    ArenaExit,
    BankBooth,
    SupplyCrate,
    SproutPatch,
    RewardCart,
}

/// Sub-state of an interactable, as sensed by the environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractableCondition {
    /// Usable, nothing special (nodes, crates, entrances).
    Ready,
    /// Furnace: present but not burning.
    Unlit,
    /// Furnace: burning and accepting fuel.
    Burning,
    /// Furnace: broken, needs repair before relighting.
    Broken,
    /// Reward cart: nothing left to take.
    Exhausted,
}

/// Typed handle to a nearby interactable entity. The scheduler never
/// sees environment-specific identifiers, only these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractableHandle {
    pub id: EntityId,
    pub kind: InteractableKind,
    pub position: Point,
    pub condition: InteractableCondition,
}

/// Actions that can be requested on an interactable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verb {
    Harvest,
    Ignite,
    Feed,
    Repair,
    Enter,
    Exit,
    /// Perform the configured supply withdrawal at a bank booth.
    Restock,
    /// Deposit campaign spoils at a bank booth.
    Deposit,
    Loot,
}

// ── Per-tick world snapshot ────────────────────────────────────────

/// Campaign-level readings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CampaignView {
    /// Whether a campaign is currently running.
    pub active: bool,
    /// The decaying countdown quantity, 0..=MAX_LEVEL.
    pub countdown_level: u32,
    /// Seconds shown on the pre-campaign timer, when visible.
    pub intermission_seconds: Option<u32>,
}

/// Player readings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlayerView {
    pub position: Point,
    /// The secondary decaying gauge, 0..=MAX_LEVEL.
    pub gauge: u32,
    pub moving: bool,
    /// The activity animation currently playing, if any. Used as the
    /// liveness signal by the interrupt trackers.
    pub animating: Option<Activity>,
    pub interacting: bool,
    pub in_arena: bool,
}

/// Inventory contents and free capacity.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct InventoryView {
    pub raw_fuel: u32,
    pub kindling: u32,
    pub rations: u32,
    pub flasks: u32,
    pub sprigs: u32,
    pub draughts: u32,
    pub has_carver: bool,
    pub has_mallet: bool,
    pub free_slots: u32,
}

impl InventoryView {
    /// Everything that can still be fed to the furnace.
    pub fn burnables(&self) -> u32 {
        self.raw_fuel + self.kindling
    }

    pub fn is_full(&self) -> bool {
        self.free_slots == 0
    }

    /// Count of gauge restoratives for the given healing method.
    pub fn restoratives(&self, method: HealingMethod) -> u32 {
        match method {
            HealingMethod::Rations => self.rations,
            HealingMethod::Draughts => self.draughts,
        }
    }
}

/// How the player gauge is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealingMethod {
    Rations,
    Draughts,
}

/// Discrete signals observed by the sampler since the previous drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvEvent {
    /// One unit of the given activity finished (the environment's
    /// analogue of a progress tick).
    UnitCompleted { activity: Activity },
}

/// Immutable per-tick snapshot of world/player/inventory state.
/// Rebuilt every tick from the sampler; never held across ticks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorldSnapshot {
    pub campaign: CampaignView,
    pub player: PlayerView,
    pub inventory: InventoryView,
    /// Reward points accrued and not yet collected.
    pub reward_points: u32,
}

// ── Reporting (engine → observability consumers) ───────────────────

/// Immutable view of the active plan for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanReport {
    pub gather_target: u32,
    pub process_target: u32,
    pub stoke_target: u32,
    pub gathered: u32,
    pub processed: u32,
    pub stoked: u32,
}

/// Immutable view of the break scheduler for reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakReport {
    pub seconds_until_next: u32,
    pub active_kind: Option<crate::engine::breaks::BreakKind>,
    pub remaining_seconds: u32,
    pub waiting_for_safe: bool,
}

/// Snapshot of engine state published to reporting consumers. The live
/// state object is never exposed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineReport {
    pub phase: Phase,
    pub locked: bool,
    pub estimated_seconds_left: f64,
    pub historical_seconds_left: f64,
    pub plan: Option<PlanReport>,
    pub breaks: BreakReport,
    pub campaigns_completed: u32,
    pub consecutive_failures: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_chebyshev() {
        let a = Point::new(10, 10);
        assert_eq!(a.distance_to(Point::new(13, 11)), 3);
        assert_eq!(a.distance_to(Point::new(10, 10)), 0);
        assert_eq!(a.distance_to(Point::new(7, 4)), 6);
    }

    #[test]
    fn reward_phases_are_flagged() {
        assert!(Phase::LootRewardCart.is_reward_phase());
        assert!(Phase::ExitForRewards.is_reward_phase());
        assert!(!Phase::Gather.is_reward_phase());
        assert!(!Phase::Idle.is_reward_phase());
    }

    #[test]
    fn restorative_count_follows_method() {
        let inv = InventoryView {
            rations: 4,
            draughts: 2,
            ..Default::default()
        };
        assert_eq!(inv.restoratives(HealingMethod::Rations), 4);
        assert_eq!(inv.restoratives(HealingMethod::Draughts), 2);
    }
}
