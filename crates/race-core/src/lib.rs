#![deny(warnings)]

//! Core domain models and invariants for the race simulator.
//!
//! This crate defines the serializable value objects consumed by the
//! simulation crates, with validation helpers that reject malformed input
//! before any trial runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Tyre compound fitted for a stint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compound {
    Soft,
    Medium,
    Hard,
    Intermediate,
    Wet,
}

impl Compound {
    /// Every compound, softest dry first.
    pub const ALL: [Compound; 5] = [
        Compound::Soft,
        Compound::Medium,
        Compound::Hard,
        Compound::Intermediate,
        Compound::Wet,
    ];

    /// Slick compounds.
    pub const DRY: [Compound; 3] = [Compound::Soft, Compound::Medium, Compound::Hard];

    pub fn is_dry(self) -> bool {
        matches!(self, Compound::Soft | Compound::Medium | Compound::Hard)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Compound::Soft => "soft",
            Compound::Medium => "medium",
            Compound::Hard => "hard",
            Compound::Intermediate => "intermediate",
            Compound::Wet => "wet",
        }
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-circuit configuration. Immutable for the duration of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackProfile {
    /// Circuit identifier, e.g. "monza".
    pub id: String,
    /// Race distance in laps (> 0).
    pub total_laps: u32,
    /// Reference green-flag lap time in milliseconds (> 0).
    pub base_lap_time_ms: f64,
    /// Time lost driving through the pit lane, in seconds (>= 0).
    pub pit_loss_base_s: f64,
    /// Chance that a safety car is deployed during the race, in [0,1].
    pub safety_car_probability: f64,
    /// Multiplier on compound wear rates; compounds not listed use 1.0.
    #[serde(default)]
    pub tyre_wear_factors: BTreeMap<Compound, f64>,
    /// How hard it is to pass on track, in [0,1].
    pub overtaking_difficulty: f64,
    /// Variance (s²) of a race-wide lap-time offset caused by conditions.
    #[serde(default)]
    pub weather_variance: f64,
}

impl TrackProfile {
    /// Wear multiplier for a compound, defaulting to 1.0.
    pub fn wear_factor(&self, compound: Compound) -> f64 {
        self.tyre_wear_factors.get(&compound).copied().unwrap_or(1.0)
    }

    pub fn base_lap_time_s(&self) -> f64 {
        self.base_lap_time_ms / 1000.0
    }

    pub fn pit_loss_base_ms(&self) -> f64 {
        self.pit_loss_base_s * 1000.0
    }
}

/// Driver behaviour on a safety-car restart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RestartSkill {
    /// Mean time lost (or gained, if negative) reacting to the restart, ms.
    pub reaction_mean_ms: f64,
    /// Spread of the reaction time, ms (>= 0).
    pub reaction_sigma_ms: f64,
    /// Willingness to attack on the restart, in [0,1].
    pub aggression: f64,
    /// Time lost when an attack goes wrong, ms (>= 0).
    pub risk_penalty_ms: f64,
    /// How slowly the driver brings cold tyres up to temperature (>= 0).
    pub tyre_warmup_factor: f64,
}

/// Per-driver pace figures supplied by the upstream pace model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverPaceProfile {
    pub driver_id: String,
    /// Reference lap time in milliseconds (> 0).
    pub base_lap_ms: f64,
    /// Signed offset against the field; negative is faster.
    pub pace_delta_ms: f64,
    /// Standard deviation of the per-trial lap-time draw, ms (>= 0).
    pub noise_sigma_ms: f64,
    /// Retirement probability over the race, in [0,1].
    pub dnf_probability: f64,
    /// Only consulted when a restart is modelled.
    #[serde(default)]
    pub restart: Option<RestartSkill>,
}

/// Contiguous run of laps on one compound, ending at `end_lap` inclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stint {
    pub compound: Compound,
    pub end_lap: u32,
}

impl Stint {
    pub fn new(compound: Compound, end_lap: u32) -> Self {
        Self { compound, end_lap }
    }
}

fn default_strategy_noise() -> f64 {
    0.25
}

/// One pit strategy: ordered stints whose last `end_lap` is the flag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub name: String,
    pub stints: Vec<Stint>,
    /// Lap-time jitter standard deviation in seconds.
    #[serde(default = "default_strategy_noise")]
    pub noise_sigma_s: f64,
}

impl Strategy {
    pub fn new(name: impl Into<String>, stints: Vec<Stint>) -> Self {
        Self {
            name: name.into(),
            stints,
            noise_sigma_s: default_strategy_noise(),
        }
    }

    pub fn with_noise(mut self, noise_sigma_s: f64) -> Self {
        self.noise_sigma_s = noise_sigma_s;
        self
    }

    /// Laps at the end of which the car pits (every stint end but the last).
    pub fn pit_laps(&self) -> impl Iterator<Item = u32> + '_ {
        let n = self.stints.len().saturating_sub(1);
        self.stints[..n].iter().map(|s| s.end_lap)
    }

    pub fn stop_count(&self) -> usize {
        self.stints.len().saturating_sub(1)
    }

    /// Number of distinct compounds used across all stints.
    pub fn distinct_compounds(&self) -> usize {
        let mut seen: Vec<Compound> = self.stints.iter().map(|s| s.compound).collect();
        seen.sort();
        seen.dedup();
        seen.len()
    }
}

/// Shared trial configuration for every simulation mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Number of Monte Carlo trials (> 0).
    pub trials: usize,
    /// Seed for the deterministic RNG streams.
    pub rng_seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            trials: 10_000,
            rng_seed: 42,
        }
    }
}

/// Kind of finishing-position probability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbabilityType {
    Win,
    Podium,
    Top10,
}

impl ProbabilityType {
    pub const ALL: [ProbabilityType; 3] = [
        ProbabilityType::Win,
        ProbabilityType::Podium,
        ProbabilityType::Top10,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProbabilityType::Win => "win",
            ProbabilityType::Podium => "podium",
            ProbabilityType::Top10 => "top10",
        }
    }
}

impl fmt::Display for ProbabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation errors for profiles and configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    /// Identifier must not be blank.
    #[error("identifier must not be empty")]
    EmptyId,
    /// Race distance must be at least one lap.
    #[error("total laps must be > 0")]
    ZeroLaps,
    /// Trial count must be at least one.
    #[error("trial count must be > 0")]
    ZeroTrials,
    /// Grid needs at least one driver.
    #[error("driver field is empty")]
    EmptyField,
    /// Numeric field must be finite.
    #[error("{0} must be finite")]
    NonFinite(&'static str),
    /// Numeric field must be strictly positive.
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    /// Numeric field must not be negative.
    #[error("{0} must be >= 0")]
    Negative(&'static str),
    /// Probability-like field outside [0,1].
    #[error("{field} = {value} is outside [0,1]")]
    OutOfUnitRange { field: &'static str, value: f64 },
    /// Map key disagrees with the profile it points at.
    #[error("field key {key:?} does not match driver id {driver_id:?}")]
    DriverIdMismatch { key: String, driver_id: String },
}

/// Malformed strategy input, rejected before simulation starts.
#[derive(Debug, Error, PartialEq)]
pub enum StrategyError {
    #[error("strategy {0:?} has no stints")]
    EmptyStints(String),
    #[error("strategy {name:?}: stint {index} ends on lap 0")]
    ZeroLap { name: String, index: usize },
    #[error("strategy {name:?}: stint {index} ends on lap {end_lap}, not after lap {previous}")]
    NonIncreasing {
        name: String,
        index: usize,
        end_lap: u32,
        previous: u32,
    },
    #[error("strategy {name:?} ends on lap {end_lap} but the race is {total_laps} laps")]
    DoesNotCoverRace {
        name: String,
        end_lap: u32,
        total_laps: u32,
    },
    #[error("strategy {0:?} has a negative or non-finite noise sigma")]
    InvalidNoise(String),
}

fn check_finite(field: &'static str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFinite(field))
    }
}

fn check_positive(field: &'static str, v: f64) -> Result<(), ValidationError> {
    check_finite(field, v)?;
    if v <= 0.0 {
        return Err(ValidationError::NonPositive(field));
    }
    Ok(())
}

fn check_non_negative(field: &'static str, v: f64) -> Result<(), ValidationError> {
    check_finite(field, v)?;
    if v < 0.0 {
        return Err(ValidationError::Negative(field));
    }
    Ok(())
}

/// Reject anything outside [0,1], NaN included.
pub fn check_unit_range(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfUnitRange { field, value })
    }
}

/// Validate a track profile.
pub fn validate_track(t: &TrackProfile) -> Result<(), ValidationError> {
    if t.id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    if t.total_laps == 0 {
        return Err(ValidationError::ZeroLaps);
    }
    check_positive("base_lap_time_ms", t.base_lap_time_ms)?;
    check_non_negative("pit_loss_base_s", t.pit_loss_base_s)?;
    check_unit_range("safety_car_probability", t.safety_car_probability)?;
    check_unit_range("overtaking_difficulty", t.overtaking_difficulty)?;
    check_non_negative("weather_variance", t.weather_variance)?;
    for factor in t.tyre_wear_factors.values() {
        check_positive("tyre_wear_factor", *factor)?;
    }
    Ok(())
}

/// Validate restart-skill parameters.
pub fn validate_restart(r: &RestartSkill) -> Result<(), ValidationError> {
    check_finite("reaction_mean_ms", r.reaction_mean_ms)?;
    check_non_negative("reaction_sigma_ms", r.reaction_sigma_ms)?;
    check_unit_range("aggression", r.aggression)?;
    check_non_negative("risk_penalty_ms", r.risk_penalty_ms)?;
    check_non_negative("tyre_warmup_factor", r.tyre_warmup_factor)?;
    Ok(())
}

/// Validate a single driver profile.
pub fn validate_driver(d: &DriverPaceProfile) -> Result<(), ValidationError> {
    if d.driver_id.trim().is_empty() {
        return Err(ValidationError::EmptyId);
    }
    check_positive("base_lap_ms", d.base_lap_ms)?;
    check_finite("pace_delta_ms", d.pace_delta_ms)?;
    check_non_negative("noise_sigma_ms", d.noise_sigma_ms)?;
    check_unit_range("dnf_probability", d.dnf_probability)?;
    if let Some(r) = &d.restart {
        validate_restart(r)?;
    }
    Ok(())
}

/// Validate a whole grid keyed by driver id.
pub fn validate_field(field: &BTreeMap<String, DriverPaceProfile>) -> Result<(), ValidationError> {
    if field.is_empty() {
        return Err(ValidationError::EmptyField);
    }
    for (key, d) in field {
        if key != &d.driver_id {
            return Err(ValidationError::DriverIdMismatch {
                key: key.clone(),
                driver_id: d.driver_id.clone(),
            });
        }
        validate_driver(d)?;
    }
    Ok(())
}

/// Validate shared trial configuration.
pub fn validate_sim_config(c: &SimConfig) -> Result<(), ValidationError> {
    if c.trials == 0 {
        return Err(ValidationError::ZeroTrials);
    }
    Ok(())
}

/// Validate stint coverage: non-empty, strictly increasing, ending on the flag.
pub fn validate_strategy(s: &Strategy, total_laps: u32) -> Result<(), StrategyError> {
    if s.stints.is_empty() {
        return Err(StrategyError::EmptyStints(s.name.clone()));
    }
    if !(s.noise_sigma_s.is_finite() && s.noise_sigma_s >= 0.0) {
        return Err(StrategyError::InvalidNoise(s.name.clone()));
    }
    let mut previous = 0u32;
    for (index, stint) in s.stints.iter().enumerate() {
        if stint.end_lap == 0 {
            return Err(StrategyError::ZeroLap {
                name: s.name.clone(),
                index,
            });
        }
        if index > 0 && stint.end_lap <= previous {
            return Err(StrategyError::NonIncreasing {
                name: s.name.clone(),
                index,
                end_lap: stint.end_lap,
                previous,
            });
        }
        previous = stint.end_lap;
    }
    if previous != total_laps {
        return Err(StrategyError::DoesNotCoverRace {
            name: s.name.clone(),
            end_lap: previous,
            total_laps,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::Strategy;
    use proptest::prelude::*;

    fn track() -> TrackProfile {
        TrackProfile {
            id: "monza".to_string(),
            total_laps: 53,
            base_lap_time_ms: 82_000.0,
            pit_loss_base_s: 21.5,
            safety_car_probability: 0.45,
            tyre_wear_factors: BTreeMap::from([(Compound::Soft, 1.2)]),
            overtaking_difficulty: 0.3,
            weather_variance: 0.1,
        }
    }

    fn driver(id: &str) -> DriverPaceProfile {
        DriverPaceProfile {
            driver_id: id.to_string(),
            base_lap_ms: 82_000.0,
            pace_delta_ms: -150.0,
            noise_sigma_ms: 120.0,
            dnf_probability: 0.05,
            restart: None,
        }
    }

    #[test]
    fn serde_roundtrip_track() {
        let t = track();
        let s = serde_json::to_string(&t).unwrap();
        let back: TrackProfile = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
        assert_eq!(back.wear_factor(Compound::Soft), 1.2);
        assert_eq!(back.wear_factor(Compound::Hard), 1.0);
    }

    #[test]
    fn strategy_from_yaml_uses_default_noise() {
        let yaml = "name: one-stop\nstints:\n  - { compound: medium, end_lap: 25 }\n  - { compound: hard, end_lap: 53 }\n";
        let s: Strategy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.stints.len(), 2);
        assert_eq!(s.noise_sigma_s, 0.25);
        assert_eq!(s.pit_laps().collect::<Vec<_>>(), vec![25]);
        validate_strategy(&s, 53).unwrap();
    }

    #[test]
    fn track_validation() {
        validate_track(&track()).unwrap();
        let mut t = track();
        t.total_laps = 0;
        assert_eq!(validate_track(&t), Err(ValidationError::ZeroLaps));
        let mut t = track();
        t.safety_car_probability = 1.5;
        assert!(matches!(
            validate_track(&t),
            Err(ValidationError::OutOfUnitRange { field: "safety_car_probability", .. })
        ));
        let mut t = track();
        t.base_lap_time_ms = f64::NAN;
        assert_eq!(
            validate_track(&t),
            Err(ValidationError::NonFinite("base_lap_time_ms"))
        );
    }

    #[test]
    fn field_validation_checks_keys() {
        let mut field = BTreeMap::new();
        assert_eq!(validate_field(&field), Err(ValidationError::EmptyField));
        field.insert("VER".to_string(), driver("VER"));
        validate_field(&field).unwrap();
        field.insert("HAM".to_string(), driver("LEC"));
        assert!(matches!(
            validate_field(&field),
            Err(ValidationError::DriverIdMismatch { .. })
        ));
    }

    #[test]
    fn driver_restart_is_validated() {
        let mut d = driver("NOR");
        d.restart = Some(RestartSkill {
            reaction_mean_ms: 150.0,
            reaction_sigma_ms: 40.0,
            aggression: 1.3,
            risk_penalty_ms: 900.0,
            tyre_warmup_factor: 0.5,
        });
        assert!(validate_driver(&d).is_err());
    }

    #[test]
    fn malformed_strategies_rejected() {
        let empty = Strategy::new("empty", vec![]);
        assert_eq!(
            validate_strategy(&empty, 50),
            Err(StrategyError::EmptyStints("empty".into()))
        );

        let backwards = Strategy::new(
            "backwards",
            vec![Stint::new(Compound::Soft, 30), Stint::new(Compound::Hard, 20)],
        );
        assert!(matches!(
            validate_strategy(&backwards, 50),
            Err(StrategyError::NonIncreasing { index: 1, .. })
        ));

        let short = Strategy::new(
            "short",
            vec![Stint::new(Compound::Soft, 20), Stint::new(Compound::Hard, 45)],
        );
        assert_eq!(
            validate_strategy(&short, 50),
            Err(StrategyError::DoesNotCoverRace {
                name: "short".into(),
                end_lap: 45,
                total_laps: 50
            })
        );

        let noisy = Strategy::new("noisy", vec![Stint::new(Compound::Soft, 50)]).with_noise(-1.0);
        assert!(matches!(
            validate_strategy(&noisy, 50),
            Err(StrategyError::InvalidNoise(_))
        ));
    }

    #[test]
    fn sim_config_defaults() {
        let c = SimConfig::default();
        assert_eq!(c.trials, 10_000);
        validate_sim_config(&c).unwrap();
        let zero = SimConfig { trials: 0, rng_seed: 1 };
        assert_eq!(validate_sim_config(&zero), Err(ValidationError::ZeroTrials));
    }

    proptest! {
        #[test]
        fn increasing_stints_cover_race(a in 1u32..20, b in 1u32..20, c in 1u32..20) {
            let total = a + b + c;
            let s = Strategy::new("p", vec![
                Stint::new(Compound::Soft, a),
                Stint::new(Compound::Medium, a + b),
                Stint::new(Compound::Hard, total),
            ]);
            prop_assert!(validate_strategy(&s, total).is_ok());
            prop_assert_eq!(s.stop_count(), 2);
            prop_assert_eq!(s.distinct_compounds(), 3);
        }

        #[test]
        fn unit_range_rejects_outside(v in 1.0001f64..10.0) {
            prop_assert!(check_unit_range("p", v).is_err());
            prop_assert!(check_unit_range("p", -v).is_err());
            prop_assert!(check_unit_range("p", 1.0 / v).is_ok());
        }
    }
}
