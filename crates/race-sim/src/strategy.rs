//! Single-strategy lap-by-lap Monte Carlo simulation.

use crate::rng::RngStreams;
use crate::stats::RaceTimeSummary;
use crate::SimError;
use race_core::{validate_sim_config, validate_strategy, SimConfig, Strategy, TrackProfile};
use race_physics::{pit_loss, sample_pit_traffic, CompoundTable, FuelModel};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Upper bound of the pit release/traffic penalty on an easy-to-pass track, seconds.
pub const PIT_TRAFFIC_MAX_S: f64 = 2.5;

/// Floor applied to every simulated lap so noise can never make a lap free.
pub const MIN_LAP_TIME_S: f64 = 0.001;

/// Safety-car incidence and its effect on lap and pit times.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SafetyCarModel {
    /// Chance of one deployment per race, in [0,1].
    pub probability: f64,
    pub min_laps: u32,
    pub max_laps: u32,
    /// Lap-time multiplier while the safety car is out.
    pub lap_factor: f64,
    /// Pit-loss multiplier for a stop taken under the safety car.
    pub pit_factor: f64,
}

impl Default for SafetyCarModel {
    fn default() -> Self {
        Self {
            probability: 0.0,
            min_laps: 2,
            max_laps: 7,
            lap_factor: 1.40,
            pit_factor: 0.5,
        }
    }
}

/// Inclusive lap range under the safety car.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyCarWindow {
    pub start_lap: u32,
    pub end_lap: u32,
}

impl SafetyCarWindow {
    pub fn covers(&self, lap: u32) -> bool {
        (self.start_lap..=self.end_lap).contains(&lap)
    }

    pub fn laps(&self) -> u32 {
        self.end_lap - self.start_lap + 1
    }
}

/// Everything the lap walk needs besides the strategy itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategySimConfig {
    pub total_laps: u32,
    /// Green-flag lap on a fresh medium with an empty tank, seconds.
    pub base_lap_time_s: f64,
    pub fuel: FuelModel,
    /// Tyre coefficients, already scaled for the circuit.
    pub tyres: CompoundTable,
    pub pit_loss_base_s: f64,
    pub pit_traffic_max_s: f64,
    /// Standard deviation of the race-wide conditions offset, seconds.
    pub weather_sigma_s: f64,
    pub safety_car: SafetyCarModel,
}

impl StrategySimConfig {
    /// Plain lap walk: default fuel and tyres, no safety car, no weather.
    pub fn new(total_laps: u32, base_lap_time_s: f64) -> Self {
        Self {
            total_laps,
            base_lap_time_s,
            fuel: FuelModel::default(),
            tyres: CompoundTable::default(),
            pit_loss_base_s: 20.0,
            pit_traffic_max_s: PIT_TRAFFIC_MAX_S,
            weather_sigma_s: 0.0,
            safety_car: SafetyCarModel::default(),
        }
    }

    /// Configuration derived from a circuit profile.
    pub fn from_track(track: &TrackProfile) -> Self {
        Self {
            total_laps: track.total_laps,
            base_lap_time_s: track.base_lap_time_s(),
            fuel: FuelModel::default(),
            tyres: CompoundTable::default().scaled_for(track),
            pit_loss_base_s: track.pit_loss_base_s,
            pit_traffic_max_s: PIT_TRAFFIC_MAX_S * (1.0 + track.overtaking_difficulty),
            weather_sigma_s: track.weather_variance.max(0.0).sqrt(),
            safety_car: SafetyCarModel {
                probability: track.safety_car_probability,
                ..SafetyCarModel::default()
            },
        }
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if self.total_laps == 0 {
            return Err(SimError::Config("total_laps must be > 0"));
        }
        if !(self.base_lap_time_s.is_finite() && self.base_lap_time_s > 0.0) {
            return Err(SimError::Config("base_lap_time_s must be > 0"));
        }
        let non_negative = [
            self.pit_loss_base_s,
            self.pit_traffic_max_s,
            self.weather_sigma_s,
        ];
        if non_negative.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(SimError::Config("pit and weather terms must be finite and >= 0"));
        }
        let sc = &self.safety_car;
        if !(0.0..=1.0).contains(&sc.probability) {
            return Err(SimError::Config("safety car probability must be in [0,1]"));
        }
        if sc.min_laps == 0 || sc.min_laps > sc.max_laps {
            return Err(SimError::Config("safety car duration range is empty"));
        }
        if !(sc.lap_factor.is_finite() && sc.lap_factor >= 1.0)
            || !(sc.pit_factor.is_finite() && sc.pit_factor >= 0.0)
        {
            return Err(SimError::Config("safety car factors out of range"));
        }
        self.fuel.validate()?;
        self.tyres.validate()?;
        Ok(())
    }
}

/// Exogenous random draws for one trial.
///
/// Drawn up front so that any number of strategies can be evaluated against
/// the same conditions.
#[derive(Clone, Debug, PartialEq)]
pub struct TrialDraws {
    lap_noise: Vec<f64>,
    pit_traffic_s: Vec<f64>,
    weather_z: f64,
    safety_car: Option<SafetyCarWindow>,
}

impl TrialDraws {
    pub fn sample<R: Rng>(rng: &mut R, config: &StrategySimConfig) -> Self {
        let laps = config.total_laps as usize;
        let lap_noise = (0..laps).map(|_| rng.sample(StandardNormal)).collect();
        let pit_traffic_s = (0..laps)
            .map(|_| sample_pit_traffic(rng, config.pit_traffic_max_s))
            .collect();
        let weather_z: f64 = rng.sample(StandardNormal);
        let sc = &config.safety_car;
        let safety_car = if rng.gen_bool(sc.probability) {
            let start_lap = rng.gen_range(1..=config.total_laps);
            let duration = rng.gen_range(sc.min_laps..=sc.max_laps);
            Some(SafetyCarWindow {
                start_lap,
                end_lap: (start_lap + duration - 1).min(config.total_laps),
            })
        } else {
            None
        };
        Self {
            lap_noise,
            pit_traffic_s,
            weather_z,
            safety_car,
        }
    }

    pub fn safety_car(&self) -> Option<SafetyCarWindow> {
        self.safety_car
    }
}

/// Per-trial lap-walk state. Lives only inside [`StrategySimulator::race_time`].
struct SimulationTrial {
    stint: usize,
    tyre_age: u32,
    race_time: f64,
}

/// Race-time distribution for one strategy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyRun {
    pub strategy: String,
    pub race_times: Vec<f64>,
    pub summary: RaceTimeSummary,
}

/// Runs N independent lap-by-lap trials of a strategy.
#[derive(Clone, Debug)]
pub struct StrategySimulator {
    config: StrategySimConfig,
}

impl StrategySimulator {
    pub fn new(config: StrategySimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &StrategySimConfig {
        &self.config
    }

    /// Total race time of `strategy` under one trial's draws, seconds.
    ///
    /// The strategy must already be validated against `total_laps`; a
    /// strategy with no stints drives no laps and takes 0.
    pub fn race_time(&self, strategy: &Strategy, draws: &TrialDraws) -> f64 {
        let Some(last) = strategy.stints.len().checked_sub(1) else {
            return 0.0;
        };
        let cfg = &self.config;
        let sc = &cfg.safety_car;
        let weather = cfg.weather_sigma_s * draws.weather_z;
        let mut trial = SimulationTrial {
            stint: 0,
            tyre_age: 0,
            race_time: 0.0,
        };
        for lap in 1..=cfg.total_laps {
            let idx = (lap - 1) as usize;
            let stint = strategy.stints[trial.stint];
            let under_sc = draws.safety_car.is_some_and(|w| w.covers(lap));

            let mut lap_time = cfg.tyres.get(stint.compound).lap_time(cfg.base_lap_time_s, trial.tyre_age)
                + cfg.fuel.penalty(lap - 1)
                + strategy.noise_sigma_s * draws.lap_noise[idx]
                + weather;
            if under_sc {
                lap_time *= sc.lap_factor;
            }
            trial.race_time += lap_time.max(MIN_LAP_TIME_S);
            trial.tyre_age += 1;

            if lap == stint.end_lap && trial.stint < last {
                let mut loss = pit_loss(cfg.pit_loss_base_s, draws.pit_traffic_s[idx]);
                if under_sc {
                    loss *= sc.pit_factor;
                }
                trial.race_time += loss;
                trial.tyre_age = 0;
                trial.stint = (trial.stint + 1).min(last);
            }
        }
        trial.race_time
    }

    fn check(&self, strategy: &Strategy, sim: &SimConfig) -> Result<(), SimError> {
        validate_sim_config(sim)?;
        validate_strategy(strategy, self.config.total_laps)?;
        Ok(())
    }

    /// N race times, trial `i` drawn from stream `i` of the run seed.
    pub fn simulate(&self, strategy: &Strategy, sim: &SimConfig) -> Result<Vec<f64>, SimError> {
        self.check(strategy, sim)?;
        let streams = RngStreams::new(sim.rng_seed);
        Ok((0..sim.trials)
            .into_par_iter()
            .map(|i| {
                let mut rng = streams.trial(i as u64);
                let draws = TrialDraws::sample(&mut rng, &self.config);
                self.race_time(strategy, &draws)
            })
            .collect())
    }

    /// Sequential variant drawing every trial from a caller-owned generator.
    pub fn simulate_with_rng<R: Rng>(
        &self,
        strategy: &Strategy,
        trials: usize,
        rng: &mut R,
    ) -> Result<Vec<f64>, SimError> {
        self.check(
            strategy,
            &SimConfig {
                trials,
                rng_seed: 0,
            },
        )?;
        Ok((0..trials)
            .map(|_| {
                let draws = TrialDraws::sample(rng, &self.config);
                self.race_time(strategy, &draws)
            })
            .collect())
    }

    /// Simulate and summarize.
    pub fn run(&self, strategy: &Strategy, sim: &SimConfig) -> Result<StrategyRun, SimError> {
        info!(strategy = %strategy.name, trials = sim.trials, seed = sim.rng_seed, "strategy simulation start");
        let race_times = self.simulate(strategy, sim)?;
        let summary = RaceTimeSummary::from_samples(&race_times);
        info!(
            strategy = %strategy.name,
            mean_s = summary.mean,
            robustness = summary.robustness,
            "strategy simulation done"
        );
        Ok(StrategyRun {
            strategy: strategy.name.clone(),
            race_times,
            summary,
        })
    }
}
