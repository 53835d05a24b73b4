#![deny(warnings)]

//! Lap-time physics: tyre degradation, fuel-weight penalty and pit loss.
//!
//! Everything here is a pure function of its inputs. Randomness enters only
//! through [`sample_pit_traffic`], which takes the caller's generator.

use race_core::{Compound, TrackProfile};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced by physics parameter validation.
#[derive(Debug, Error, PartialEq)]
pub enum PhysicsError {
    /// Tyre coefficients must be finite and non-negative.
    #[error("invalid tyre parameters for {0}")]
    InvalidTyre(Compound),
    /// Fuel load, burn rate and weight penalty must be finite and non-negative.
    #[error("invalid fuel model")]
    InvalidFuel,
}

/// Lap time on a tyre of the given age.
///
/// `base + alpha·age + beta·(1 − e^(−gamma·age))`: a linear wear term plus a
/// saturating early-stint term. Returns `base_time` exactly at age 0 and is
/// non-decreasing in age for non-negative coefficients.
///
/// Example:
/// assert_eq!(tyre_lap_time(90.0, 0, 0.05, 0.4, 0.2), 90.0);
pub fn tyre_lap_time(base_time: f64, tyre_age: u32, alpha: f64, beta: f64, gamma: f64) -> f64 {
    if tyre_age == 0 {
        return base_time;
    }
    let age = tyre_age as f64;
    base_time + alpha * age + beta * (1.0 - (-gamma * age).exp())
}

/// Time carried for the remaining fuel load at the start of `lap`.
///
/// `k · max(0, initial_fuel − lap·burn_rate)`; clamps at an empty tank.
///
/// Example:
/// assert!((fuel_time_penalty(100.0, 0, 1.5, 0.03) - 3.0).abs() < 1e-12);
pub fn fuel_time_penalty(initial_fuel: f64, lap: u32, burn_rate: f64, k: f64) -> f64 {
    let remaining = (initial_fuel - lap as f64 * burn_rate).max(0.0);
    k * remaining
}

/// Pit-lane loss plus a caller-sampled release/traffic penalty.
pub fn pit_loss(base_loss: f64, traffic_penalty: f64) -> f64 {
    base_loss + traffic_penalty
}

/// Pit-lane loss with no traffic.
pub fn pit_loss_base(base_loss: f64) -> f64 {
    pit_loss(base_loss, 0.0)
}

/// Uniform release-timing penalty in `[0, max_s)`; zero when the bound is not positive.
pub fn sample_pit_traffic<R: Rng + ?Sized>(rng: &mut R, max_s: f64) -> f64 {
    if max_s > 0.0 && max_s.is_finite() {
        rng.gen_range(0.0..max_s)
    } else {
        0.0
    }
}

/// Degradation coefficients for one compound.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TyreParams {
    /// Linear wear, seconds per lap of age.
    pub alpha: f64,
    /// Amplitude of the saturating early-stint loss, seconds.
    pub beta: f64,
    /// Rate at which the early-stint loss saturates, per lap.
    pub gamma: f64,
    /// Fresh-tyre pace relative to the track's base lap; negative is faster.
    pub pace_offset_s: f64,
}

impl TyreParams {
    /// Reference coefficients for a compound.
    pub fn for_compound(compound: Compound) -> Self {
        let (alpha, beta, gamma, pace_offset_s) = match compound {
            Compound::Soft => (0.080, 0.60, 0.35, -0.60),
            Compound::Medium => (0.050, 0.45, 0.25, 0.0),
            Compound::Hard => (0.030, 0.35, 0.18, 0.45),
            Compound::Intermediate => (0.060, 0.50, 0.30, 4.0),
            Compound::Wet => (0.040, 0.40, 0.25, 8.0),
        };
        Self {
            alpha,
            beta,
            gamma,
            pace_offset_s,
        }
    }

    /// Scale the wear terms by a track's abrasiveness.
    pub fn scaled(self, wear_factor: f64) -> Self {
        Self {
            alpha: self.alpha * wear_factor,
            beta: self.beta * wear_factor,
            ..self
        }
    }

    pub fn lap_time(&self, base_time: f64, tyre_age: u32) -> f64 {
        tyre_lap_time(
            base_time + self.pace_offset_s,
            tyre_age,
            self.alpha,
            self.beta,
            self.gamma,
        )
    }

    pub fn validate(&self, compound: Compound) -> Result<(), PhysicsError> {
        let coeffs = [self.alpha, self.beta, self.gamma];
        if !self.pace_offset_s.is_finite() || coeffs.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(PhysicsError::InvalidTyre(compound));
        }
        Ok(())
    }
}

/// Tyre coefficients for every compound.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompoundTable {
    params: BTreeMap<Compound, TyreParams>,
}

impl Default for CompoundTable {
    fn default() -> Self {
        Self {
            params: Compound::ALL
                .iter()
                .map(|c| (*c, TyreParams::for_compound(*c)))
                .collect(),
        }
    }
}

impl CompoundTable {
    /// Override the coefficients for one compound.
    pub fn with(mut self, compound: Compound, params: TyreParams) -> Self {
        self.params.insert(compound, params);
        self
    }

    pub fn get(&self, compound: Compound) -> TyreParams {
        self.params
            .get(&compound)
            .copied()
            .unwrap_or_else(|| TyreParams::for_compound(compound))
    }

    /// Copy with every compound scaled by the track's wear factors.
    pub fn scaled_for(&self, track: &TrackProfile) -> Self {
        Self {
            params: self
                .params
                .iter()
                .map(|(c, p)| (*c, p.scaled(track.wear_factor(*c))))
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), PhysicsError> {
        for (c, p) in &self.params {
            p.validate(*c)?;
        }
        Ok(())
    }
}

/// Fuel load and its lap-time cost.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FuelModel {
    pub initial_fuel_kg: f64,
    pub burn_rate_kg_per_lap: f64,
    /// Seconds per lap per kilogram carried.
    pub time_per_kg_s: f64,
}

impl Default for FuelModel {
    fn default() -> Self {
        Self {
            initial_fuel_kg: 100.0,
            burn_rate_kg_per_lap: 1.5,
            time_per_kg_s: 0.03,
        }
    }
}

impl FuelModel {
    pub fn penalty(&self, lap: u32) -> f64 {
        fuel_time_penalty(
            self.initial_fuel_kg,
            lap,
            self.burn_rate_kg_per_lap,
            self.time_per_kg_s,
        )
    }

    pub fn validate(&self) -> Result<(), PhysicsError> {
        let fields = [
            self.initial_fuel_kg,
            self.burn_rate_kg_per_lap,
            self.time_per_kg_s,
        ];
        if fields.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(PhysicsError::InvalidFuel);
        }
        Ok(())
    }
}
