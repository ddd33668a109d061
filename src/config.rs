//! Runtime configuration.
//!
//! Loaded once at startup from a JSON file (default path under the user
//! config directory, overridable with `COLDSNAP_CONFIG`). Every field
//! has a default so a missing file yields a working configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::protocol::{HealingMethod, Point};

// ── Activity toggles ───────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityConfig {
    /// Carve raw fuel into kindling before stoking.
    pub process_enabled: bool,
    /// Mend the furnace when it breaks.
    pub repair_enabled: bool,
    /// Relight the furnace when it goes out.
    pub relight_enabled: bool,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            process_enabled: true,
            repair_enabled: true,
            relight_enabled: true,
        }
    }
}

// ── Gauge maintenance ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct GaugeConfig {
    /// How the gauge is restored.
    pub healing_method: HealingMethod,
    /// Consume a restorative when the gauge drops below this level.
    pub eat_at_gauge_level: u32,
    /// Leave to restock when fewer restoratives than this remain.
    pub min_restoratives: u32,
}

impl Default for GaugeConfig {
    fn default() -> Self {
        Self {
            healing_method: HealingMethod::Rations,
            eat_at_gauge_level: 45,
            min_restoratives: 2,
        }
    }
}

// ── Reward collection ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    pub enabled: bool,
    /// Collect once at least this many points have accrued.
    pub minimum_points: u32,
    /// Uniform random extra added to the minimum each run, so that
    /// collection timing is not perfectly periodic.
    pub variance: u32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            minimum_points: 5000,
            variance: 1500,
        }
    }
}

// ── Breaks ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakConfig {
    pub enabled: bool,
    /// Minutes between breaks (a value in this range is rolled after
    /// every break).
    pub min_interval_minutes: u32,
    pub max_interval_minutes: u32,
    /// Percent chance that a break is the extended (disconnect) kind.
    pub extended_chance_pct: u32,
    /// AFK break duration bounds, minutes.
    pub afk_min_minutes: u32,
    pub afk_max_minutes: u32,
    /// Extended break duration bounds, minutes.
    pub extended_min_minutes: u32,
    pub extended_max_minutes: u32,
    /// Give up waiting for a safe state after this many seconds and
    /// request a walk to the safe spot.
    pub max_safe_wait_seconds: u32,
}

impl Default for BreakConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_interval_minutes: 35,
            max_interval_minutes: 70,
            extended_chance_pct: 30,
            afk_min_minutes: 1,
            afk_max_minutes: 6,
            extended_min_minutes: 5,
            extended_max_minutes: 40,
            max_safe_wait_seconds: 600,
        }
    }
}

// ── Arena layout ───────────────────────────────────────────────────

/// Fixed walk targets. Interactables are found through the sampler;
/// these are only destinations for "move toward" requests and the
/// safe-zone predicate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    pub safe_spot: Point,
    pub safe_radius: u32,
    pub bank: Point,
    pub bank_radius: u32,
    pub reward_cart: Point,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            safe_spot: Point::new(30, 82),
            safe_radius: 3,
            bank: Point::new(40, 44),
            bank_radius: 5,
            reward_cart: Point::new(36, 44),
        }
    }
}

// ── Stop conditions ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StopConfig {
    /// Shut down after this many completed campaigns.
    pub max_campaigns: Option<u32>,
    /// Shut down once accrued reward points reach this ceiling.
    pub reward_point_ceiling: Option<u32>,
}

// ── Top level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tick callback period, milliseconds.
    pub tick_ms: u64,
    pub activities: ActivityConfig,
    pub gauge: GaugeConfig,
    pub rewards: RewardConfig,
    pub breaks: BreakConfig,
    pub layout: LayoutConfig,
    pub stop: StopConfig,
    pub estimator: crate::engine::estimator::EstimatorTuning,
    /// Enable the jittered behavior-variance policy instead of the
    /// no-op default.
    pub behavior_variance: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 60,
            activities: ActivityConfig::default(),
            gauge: GaugeConfig::default(),
            rewards: RewardConfig::default(),
            breaks: BreakConfig::default(),
            layout: LayoutConfig::default(),
            stop: StopConfig::default(),
            estimator: Default::default(),
            behavior_variance: false,
        }
    }
}

impl Config {
    /// Default path for the config file.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("coldsnap").join("config.json"))
    }

    /// Load configuration from `path`, falling back to the
    /// `COLDSNAP_CONFIG` environment variable and then the default
    /// location. A missing file yields defaults; a malformed file is an
    /// error.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path
            .or_else(|| std::env::var_os("COLDSNAP_CONFIG").map(PathBuf::from))
            .or_else(Self::default_path);

        let Some(path) = path else {
            return Ok(Self::default());
        };

        let bytes = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => return Err(EngineError::Io(e)),
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert!(cfg.tick_ms >= 10 && cfg.tick_ms <= 500);
        assert!(cfg.breaks.min_interval_minutes <= cfg.breaks.max_interval_minutes);
        assert!(cfg.gauge.eat_at_gauge_level > 0);
        assert!(cfg.activities.process_enabled);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"tick_ms": 100}"#).unwrap();
        assert_eq!(cfg.tick_ms, 100);
        assert_eq!(
            cfg.breaks.max_safe_wait_seconds,
            BreakConfig::default().max_safe_wait_seconds
        );
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = Config::load(Some(PathBuf::from("/definitely/not/here.json"))).unwrap();
        assert_eq!(cfg.tick_ms, Config::default().tick_ms);
    }
}
