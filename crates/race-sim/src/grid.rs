//! Multi-driver grid simulation and finishing-position aggregation.

use crate::rng::RngStreams;
use crate::stats::{mean, percentile};
use crate::SimError;
use race_core::{
    validate_field, validate_sim_config, validate_track, DriverPaceProfile, ProbabilityType,
    RestartSkill, SimConfig, TrackProfile,
};
use race_physics::{pit_loss, sample_pit_traffic};
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::info;

/// Floor for a driver's effective lap, milliseconds.
pub const MIN_LAP_MS: f64 = 1.0;

const RESTART_WARMUP_MS: f64 = 250.0;
const RESTART_ATTACK_GAIN_MS: f64 = 300.0;
const RESTART_INCIDENT_RATE: f64 = 0.1;

/// How retirements are classified within a trial.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnfPolicy {
    /// Retirements fill the bottom places, ordered by laps completed, then id.
    #[default]
    LapsCompleted,
    /// Every retirement shares the last place and earns no position credit.
    SharedLast,
}

/// Grid-mode tuning.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSimConfig {
    /// Probability that a finisher makes two stops rather than one.
    pub two_stop_probability: f64,
    pub sc_min_laps: u32,
    pub sc_max_laps: u32,
    /// Lap-time multiplier applied to every safety-car lap.
    pub sc_lap_factor: f64,
    /// Upper bound of the per-stop release penalty, milliseconds.
    pub pit_traffic_max_ms: f64,
    /// Apply [`RestartSkill`] deltas after a safety car.
    pub model_restarts: bool,
    pub dnf_policy: DnfPolicy,
}

impl Default for GridSimConfig {
    fn default() -> Self {
        Self {
            two_stop_probability: 0.35,
            sc_min_laps: 2,
            sc_max_laps: 7,
            sc_lap_factor: 1.40,
            pit_traffic_max_ms: 2_500.0,
            model_restarts: true,
            dnf_policy: DnfPolicy::LapsCompleted,
        }
    }
}

impl GridSimConfig {
    pub fn validate(&self) -> Result<(), SimError> {
        if !(0.0..=1.0).contains(&self.two_stop_probability) {
            return Err(SimError::Config("two_stop_probability must be in [0,1]"));
        }
        if self.sc_min_laps == 0 || self.sc_min_laps > self.sc_max_laps {
            return Err(SimError::Config("safety car duration range is empty"));
        }
        if !(self.sc_lap_factor.is_finite() && self.sc_lap_factor >= 1.0) {
            return Err(SimError::Config("sc_lap_factor must be >= 1"));
        }
        if !(self.pit_traffic_max_ms.is_finite() && self.pit_traffic_max_ms >= 0.0) {
            return Err(SimError::Config("pit_traffic_max_ms must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct Entry {
    driver: usize,
    race_time_ms: f64,
    laps_completed: u32,
}

impl Entry {
    fn is_dnf(&self) -> bool {
        !self.race_time_ms.is_finite()
    }
}

fn finishing_order(a: &Entry, b: &Entry) -> Ordering {
    let primary = match (a.is_dnf(), b.is_dnf()) {
        (false, false) => a.race_time_ms.total_cmp(&b.race_time_ms),
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        (true, true) => b.laps_completed.cmp(&a.laps_completed),
    };
    primary.then(a.driver.cmp(&b.driver))
}

/// Counts accumulated over trials. Merging is associative and commutative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrialOutcomeSet {
    pub trials: u64,
    pub driver_ids: Vec<String>,
    pub wins: Vec<u64>,
    pub podiums: Vec<u64>,
    pub top10s: Vec<u64>,
    pub dnfs: Vec<u64>,
    pub position_sums: Vec<u64>,
    /// Finite race times per driver, ascending once the run completes.
    pub race_times_ms: Vec<Vec<f64>>,
}

impl TrialOutcomeSet {
    fn empty(driver_ids: Vec<String>) -> Self {
        let n = driver_ids.len();
        Self {
            trials: 0,
            driver_ids,
            wins: vec![0; n],
            podiums: vec![0; n],
            top10s: vec![0; n],
            dnfs: vec![0; n],
            position_sums: vec![0; n],
            race_times_ms: vec![Vec::new(); n],
        }
    }

    fn record(&mut self, ranked: &[Entry], policy: DnfPolicy) {
        let field_size = ranked.len() as u64;
        self.trials += 1;
        for (rank, e) in ranked.iter().enumerate() {
            let dnf = e.is_dnf();
            let position = match policy {
                DnfPolicy::SharedLast if dnf => field_size,
                _ => rank as u64 + 1,
            };
            self.position_sums[e.driver] += position;
            if dnf {
                self.dnfs[e.driver] += 1;
                if policy == DnfPolicy::SharedLast {
                    continue;
                }
            } else {
                self.race_times_ms[e.driver].push(e.race_time_ms);
            }
            if position == 1 {
                self.wins[e.driver] += 1;
            }
            if position <= 3 {
                self.podiums[e.driver] += 1;
            }
            if position <= 10 {
                self.top10s[e.driver] += 1;
            }
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.trials += other.trials;
        for i in 0..self.driver_ids.len() {
            self.wins[i] += other.wins[i];
            self.podiums[i] += other.podiums[i];
            self.top10s[i] += other.top10s[i];
            self.dnfs[i] += other.dnfs[i];
            self.position_sums[i] += other.position_sums[i];
        }
        for (mine, theirs) in self.race_times_ms.iter_mut().zip(other.race_times_ms) {
            mine.extend(theirs);
        }
        self
    }

    fn finish(mut self) -> Self {
        for samples in &mut self.race_times_ms {
            samples.sort_by(f64::total_cmp);
        }
        self
    }

    fn rate(&self, count: u64) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            count as f64 / self.trials as f64
        }
    }
}

/// Per-driver forecast from one grid run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverForecast {
    pub driver_id: String,
    pub win_probability: f64,
    pub podium_probability: f64,
    pub top10_probability: f64,
    pub dnf_probability: f64,
    pub expected_position: f64,
    /// Percentiles of finished race times, ms; zero if the driver never finished.
    pub pace_p05_ms: f64,
    pub pace_p50_ms: f64,
    pub pace_p95_ms: f64,
    pub mean_race_time_ms: f64,
}

impl DriverForecast {
    pub fn probability(&self, kind: ProbabilityType) -> f64 {
        match kind {
            ProbabilityType::Win => self.win_probability,
            ProbabilityType::Podium => self.podium_probability,
            ProbabilityType::Top10 => self.top10_probability,
        }
    }
}

/// Forecast for the whole field, most likely winner first.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridForecast {
    pub track_id: String,
    pub trials: u64,
    pub rng_seed: u64,
    pub dnf_policy: DnfPolicy,
    pub drivers: Vec<DriverForecast>,
}

impl GridForecast {
    fn from_outcomes(
        track_id: &str,
        rng_seed: u64,
        dnf_policy: DnfPolicy,
        set: &TrialOutcomeSet,
    ) -> Self {
        let mut drivers: Vec<DriverForecast> = set
            .driver_ids
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let times = &set.race_times_ms[i];
                DriverForecast {
                    driver_id: id.clone(),
                    win_probability: set.rate(set.wins[i]),
                    podium_probability: set.rate(set.podiums[i]),
                    top10_probability: set.rate(set.top10s[i]),
                    dnf_probability: set.rate(set.dnfs[i]),
                    expected_position: set.rate(set.position_sums[i]),
                    pace_p05_ms: percentile(times, 5.0),
                    pace_p50_ms: percentile(times, 50.0),
                    pace_p95_ms: percentile(times, 95.0),
                    mean_race_time_ms: mean(times),
                }
            })
            .collect();
        drivers.sort_by(|a, b| {
            b.win_probability
                .total_cmp(&a.win_probability)
                .then_with(|| a.driver_id.cmp(&b.driver_id))
        });
        Self {
            track_id: track_id.to_string(),
            trials: set.trials,
            rng_seed,
            dnf_policy,
            drivers,
        }
    }

    pub fn get(&self, driver_id: &str) -> Option<&DriverForecast> {
        self.drivers.iter().find(|d| d.driver_id == driver_id)
    }

    /// One probability type for every driver, in forecast order.
    pub fn probabilities(&self, kind: ProbabilityType) -> Vec<f64> {
        self.drivers.iter().map(|d| d.probability(kind)).collect()
    }

    pub fn win_probability_sum(&self) -> f64 {
        self.drivers.iter().map(|d| d.win_probability).sum()
    }
}

/// Samples a restart gain or loss for one driver, milliseconds.
fn restart_delta_ms<R: Rng>(skill: &RestartSkill, rng: &mut R) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    let mut delta = skill.reaction_mean_ms + skill.reaction_sigma_ms * z
        + skill.tyre_warmup_factor * RESTART_WARMUP_MS
        - skill.aggression * RESTART_ATTACK_GAIN_MS;
    if rng.gen_bool((skill.aggression * RESTART_INCIDENT_RATE).clamp(0.0, 1.0)) {
        delta += skill.risk_penalty_ms;
    }
    delta
}

/// Runs whole-field trials from per-driver pace profiles.
#[derive(Clone, Debug)]
pub struct GridSimulator {
    track: TrackProfile,
    config: GridSimConfig,
}

impl GridSimulator {
    pub fn new(track: TrackProfile, config: GridSimConfig) -> Result<Self, SimError> {
        validate_track(&track)?;
        config.validate()?;
        Ok(Self { track, config })
    }

    pub fn config(&self) -> &GridSimConfig {
        &self.config
    }

    fn trial<R: Rng>(&self, drivers: &[&DriverPaceProfile], rng: &mut R) -> Vec<Entry> {
        let laps = self.track.total_laps;
        let sc_laps = if rng.gen_bool(self.track.safety_car_probability) {
            Some(rng.gen_range(self.config.sc_min_laps..=self.config.sc_max_laps))
        } else {
            None
        };
        let pit_loss_ms = self.track.pit_loss_base_ms();

        let mut entries = Vec::with_capacity(drivers.len());
        for (driver, d) in drivers.iter().enumerate() {
            if rng.gen_bool(d.dnf_probability) {
                let retired_on = rng.gen_range(1..=laps);
                entries.push(Entry {
                    driver,
                    race_time_ms: f64::INFINITY,
                    laps_completed: retired_on - 1,
                });
                continue;
            }
            let z: f64 = rng.sample(StandardNormal);
            let lap_ms = (d.base_lap_ms + d.pace_delta_ms + d.noise_sigma_ms * z).max(MIN_LAP_MS);
            let stops = if rng.gen_bool(self.config.two_stop_probability) {
                2
            } else {
                1
            };
            let mut race_time_ms = lap_ms * laps as f64;
            for _ in 0..stops {
                race_time_ms += pit_loss(
                    pit_loss_ms,
                    sample_pit_traffic(rng, self.config.pit_traffic_max_ms),
                );
            }
            if let Some(sc) = sc_laps {
                race_time_ms +=
                    sc as f64 * self.track.base_lap_time_ms * (self.config.sc_lap_factor - 1.0);
                if self.config.model_restarts {
                    if let Some(skill) = &d.restart {
                        race_time_ms += restart_delta_ms(skill, rng);
                    }
                }
            }
            entries.push(Entry {
                driver,
                race_time_ms: race_time_ms.max(MIN_LAP_MS),
                laps_completed: laps,
            });
        }
        entries.sort_by(finishing_order);
        entries
    }

    /// Raw per-driver tallies over `sim.trials` trials.
    pub fn run_outcomes(
        &self,
        field: &BTreeMap<String, DriverPaceProfile>,
        sim: &SimConfig,
    ) -> Result<TrialOutcomeSet, SimError> {
        validate_field(field)?;
        validate_sim_config(sim)?;
        let drivers: Vec<&DriverPaceProfile> = field.values().collect();
        let ids: Vec<String> = field.keys().cloned().collect();
        let streams = RngStreams::new(sim.rng_seed);
        let policy = self.config.dnf_policy;

        let set = (0..sim.trials)
            .into_par_iter()
            .fold(
                || TrialOutcomeSet::empty(ids.clone()),
                |mut acc, i| {
                    let mut rng = streams.trial(i as u64);
                    let ranked = self.trial(&drivers, &mut rng);
                    acc.record(&ranked, policy);
                    acc
                },
            )
            .reduce(|| TrialOutcomeSet::empty(ids.clone()), TrialOutcomeSet::merge);
        Ok(set.finish())
    }

    /// Finishing-position probabilities and pace percentiles per driver.
    pub fn run(
        &self,
        field: &BTreeMap<String, DriverPaceProfile>,
        sim: &SimConfig,
    ) -> Result<GridForecast, SimError> {
        info!(
            track = %self.track.id,
            drivers = field.len(),
            trials = sim.trials,
            seed = sim.rng_seed,
            "grid simulation start"
        );
        let set = self.run_outcomes(field, sim)?;
        let forecast =
            GridForecast::from_outcomes(&self.track.id, sim.rng_seed, self.config.dnf_policy, &set);
        if let Some(top) = forecast.drivers.first() {
            info!(favourite = %top.driver_id, win = top.win_probability, "grid simulation done");
        }
        Ok(forecast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn track(sc: f64) -> TrackProfile {
        TrackProfile {
            id: "silverstone".into(),
            total_laps: 52,
            base_lap_time_ms: 90_000.0,
            pit_loss_base_s: 20.0,
            safety_car_probability: sc,
            tyre_wear_factors: BTreeMap::new(),
            overtaking_difficulty: 0.4,
            weather_variance: 0.0,
        }
    }

    fn driver(id: &str, delta: f64, dnf: f64) -> DriverPaceProfile {
        DriverPaceProfile {
            driver_id: id.into(),
            base_lap_ms: 90_000.0,
            pace_delta_ms: delta,
            noise_sigma_ms: 150.0,
            dnf_probability: dnf,
            restart: None,
        }
    }

    fn field(n: usize, dnf: f64) -> BTreeMap<String, DriverPaceProfile> {
        (0..n)
            .map(|i| {
                let id = format!("D{i:02}");
                (id.clone(), driver(&id, i as f64 * 40.0, dnf))
            })
            .collect()
    }

    fn sim(trials: usize, seed: u64) -> SimConfig {
        SimConfig {
            trials,
            rng_seed: seed,
        }
    }

    #[test]
    fn win_probabilities_sum_to_one() {
        let g = GridSimulator::new(track(0.5), GridSimConfig::default()).unwrap();
        let f = g.run(&field(20, 0.08), &sim(2_000, 5)).unwrap();
        assert!((f.win_probability_sum() - 1.0).abs() < 1e-9);
        assert_eq!(f.drivers.len(), 20);
        for d in &f.drivers {
            assert!((0.0..=1.0).contains(&d.win_probability));
            assert!(d.win_probability <= d.podium_probability);
            assert!(d.podium_probability <= d.top10_probability);
        }
    }

    #[test]
    fn all_retire_still_has_a_winner() {
        let g = GridSimulator::new(track(0.0), GridSimConfig::default()).unwrap();
        let f = g.run(&field(3, 1.0), &sim(200, 1)).unwrap();
        assert!((f.win_probability_sum() - 1.0).abs() < 1e-9);
        assert!(f.drivers.iter().all(|d| d.dnf_probability == 1.0));
        assert!(f.drivers.iter().all(|d| d.pace_p50_ms == 0.0));
    }

    #[test]
    fn shared_last_gives_retirements_no_credit() {
        let cfg = GridSimConfig {
            dnf_policy: DnfPolicy::SharedLast,
            ..GridSimConfig::default()
        };
        let g = GridSimulator::new(track(0.0), cfg).unwrap();
        let mut f = field(4, 0.0);
        f.get_mut("D00").unwrap().dnf_probability = 1.0;
        let out = g.run(&f, &sim(300, 2)).unwrap();
        let d0 = out.get("D00").unwrap();
        assert_eq!(d0.win_probability, 0.0);
        assert_eq!(d0.top10_probability, 0.0);
        assert_eq!(d0.expected_position, 4.0);
        assert!((out.win_probability_sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn retirements_never_outrank_finishers() {
        let g = GridSimulator::new(track(0.3), GridSimConfig::default()).unwrap();
        let f = field(6, 0.3);
        let drivers: Vec<&DriverPaceProfile> = f.values().collect();
        let streams = RngStreams::new(9);
        for i in 0..500 {
            let ranked = g.trial(&drivers, &mut streams.trial(i));
            let first_dnf = ranked.iter().position(|e| e.is_dnf()).unwrap_or(ranked.len());
            assert!(ranked[first_dnf..].iter().all(|e| e.is_dnf()));
            for pair in ranked[first_dnf..].windows(2) {
                assert!(pair[0].laps_completed >= pair[1].laps_completed);
            }
        }
    }

    #[test]
    fn faster_driver_wins_more() {
        let cfg = GridSimConfig {
            two_stop_probability: 0.0,
            ..GridSimConfig::default()
        };
        let g = GridSimulator::new(track(0.2), cfg).unwrap();
        let mut f = field(2, 0.0);
        f.get_mut("D00").unwrap().pace_delta_ms = -300.0;
        let out = g.run(&f, &sim(2_000, 3)).unwrap();
        assert_eq!(out.drivers[0].driver_id, "D00");
        assert!(out.drivers[0].win_probability > 0.85);
        assert!(out.drivers[0].pace_p05_ms <= out.drivers[0].pace_p95_ms);
    }

    #[test]
    fn seeded_grid_is_bit_identical() {
        let mut f = field(10, 0.05);
        f.get_mut("D03").unwrap().restart = Some(RestartSkill {
            reaction_mean_ms: 120.0,
            reaction_sigma_ms: 60.0,
            aggression: 0.7,
            risk_penalty_ms: 1_500.0,
            tyre_warmup_factor: 0.4,
        });
        let g = GridSimulator::new(track(0.6), GridSimConfig::default()).unwrap();
        let a = g.run_outcomes(&f, &sim(1_000, 77)).unwrap();
        let b = g.run_outcomes(&f, &sim(1_000, 77)).unwrap();
        assert_eq!(a, b);
        assert_eq!(g.run(&f, &sim(1_000, 77)).unwrap(), g.run(&f, &sim(1_000, 77)).unwrap());
    }

    #[test]
    fn invalid_inputs_rejected() {
        assert!(GridSimulator::new(track(1.2), GridSimConfig::default()).is_err());
        let cfg = GridSimConfig {
            two_stop_probability: -0.1,
            ..GridSimConfig::default()
        };
        assert!(GridSimulator::new(track(0.1), cfg).is_err());
        let g = GridSimulator::new(track(0.1), GridSimConfig::default()).unwrap();
        assert!(g.run(&BTreeMap::new(), &sim(10, 1)).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]
        #[test]
        fn win_sum_holds_for_any_field(n in 1usize..12,
                                       trials in 1usize..200,
                                       dnf in 0.0f64..1.0,
                                       sc in 0.0f64..1.0,
                                       seed in any::<u64>()) {
            let g = GridSimulator::new(track(sc), GridSimConfig::default()).unwrap();
            let f = g.run(&field(n, dnf), &sim(trials, seed)).unwrap();
            prop_assert!((f.win_probability_sum() - 1.0).abs() < 1e-9);
        }
    }
}
