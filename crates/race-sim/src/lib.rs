#![deny(warnings)]

//! Stochastic race simulation.
//!
//! Two operating modes share one seeding scheme ([`RngStreams`]) and one set
//! of statistics helpers:
//! - strategy mode walks a single pit strategy lap by lap and yields a
//!   race-time distribution, which also backs the optimizer and the paired
//!   comparison;
//! - grid mode races every driver's pace profile against the field and yields
//!   finishing-position probabilities.
//!
//! [`Simulator`] fronts both modes behind one request/response pair.

pub mod candidates;
pub mod compare;
pub mod grid;
pub mod optimizer;
pub mod rng;
pub mod stats;
pub mod strategy;

pub use candidates::{generate_candidates, CandidateSpace};
pub use compare::{compare, Comparison, HeadToHead, StrategyReport};
pub use grid::{
    DnfPolicy, DriverForecast, GridForecast, GridSimConfig, GridSimulator, TrialOutcomeSet,
};
pub use optimizer::{RankedStrategy, StrategyOptimizer};
pub use rng::RngStreams;
pub use stats::{robustness, RaceTimeSummary};
pub use strategy::{
    SafetyCarModel, SafetyCarWindow, StrategyRun, StrategySimConfig, StrategySimulator, TrialDraws,
};

use race_core::{
    DriverPaceProfile, SimConfig, Strategy, StrategyError, TrackProfile, ValidationError,
};
use race_physics::PhysicsError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors raised before or while simulating.
#[derive(Debug, Error, PartialEq)]
pub enum SimError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
    /// Simulator tuning out of range.
    #[error("invalid simulation config: {0}")]
    Config(&'static str),
    /// Paired comparison takes exactly two strategies.
    #[error("comparison needs exactly two strategies, got {0}")]
    WrongStrategyCount(usize),
    #[error("no candidate strategies to rank")]
    NoCandidates,
}

/// Work for the unified simulator.
#[derive(Clone, Copy, Debug)]
pub enum SimulationRequest<'a> {
    Strategy(&'a Strategy),
    Optimize(&'a [Strategy]),
    Compare(&'a [Strategy]),
    Grid(&'a BTreeMap<String, DriverPaceProfile>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "result", rename_all = "snake_case")]
pub enum SimulationResult {
    Strategy(StrategyRun),
    Ranking(Vec<RankedStrategy>),
    Comparison(Comparison),
    Grid(GridForecast),
}

/// Both simulation modes for one track, sharing trial count and seed.
#[derive(Clone, Debug)]
pub struct Simulator {
    sim: SimConfig,
    strategy: StrategySimulator,
    grid: GridSimulator,
}

impl Simulator {
    /// Simulator with both modes configured from the track.
    pub fn new(track: TrackProfile, sim: SimConfig) -> Result<Self, SimError> {
        Self::with_configs(
            StrategySimConfig::from_track(&track),
            GridSimConfig::default(),
            track,
            sim,
        )
    }

    pub fn with_configs(
        strategy: StrategySimConfig,
        grid: GridSimConfig,
        track: TrackProfile,
        sim: SimConfig,
    ) -> Result<Self, SimError> {
        race_core::validate_sim_config(&sim)?;
        Ok(Self {
            sim,
            strategy: StrategySimulator::new(strategy)?,
            grid: GridSimulator::new(track, grid)?,
        })
    }

    pub fn sim_config(&self) -> &SimConfig {
        &self.sim
    }

    pub fn strategy_simulator(&self) -> &StrategySimulator {
        &self.strategy
    }

    pub fn run(&self, request: SimulationRequest<'_>) -> Result<SimulationResult, SimError> {
        match request {
            SimulationRequest::Strategy(s) => {
                self.strategy.run(s, &self.sim).map(SimulationResult::Strategy)
            }
            SimulationRequest::Optimize(candidates) => StrategyOptimizer::new(&self.strategy)
                .rank(candidates, &self.sim)
                .map(SimulationResult::Ranking),
            SimulationRequest::Compare(pair) => {
                compare(&self.strategy, pair, &self.sim).map(SimulationResult::Comparison)
            }
            SimulationRequest::Grid(field) => {
                self.grid.run(field, &self.sim).map(SimulationResult::Grid)
            }
        }
    }
}
