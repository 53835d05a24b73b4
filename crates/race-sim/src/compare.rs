//! Paired head-to-head evaluation of two strategies.
//!
//! Both strategies are driven through the same [`TrialDraws`] in every trial
//! (common random numbers), so the delta reflects the strategies alone and
//! not sampling luck.

use crate::rng::RngStreams;
use crate::stats::{mean, std_dev, RaceTimeSummary};
use crate::strategy::{StrategySimulator, TrialDraws};
use crate::SimError;
use race_core::{validate_sim_config, validate_strategy, SimConfig, Strategy};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyReport {
    pub strategy: String,
    pub summary: RaceTimeSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeadToHead {
    /// Share of trials where the challenger finished strictly quicker.
    pub challenger_win_fraction: f64,
    /// Mean of `challenger − baseline`, seconds; negative favours the challenger.
    pub mean_delta_s: f64,
    pub delta_std_dev_s: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub trials: usize,
    pub rng_seed: u64,
    pub baseline: StrategyReport,
    pub challenger: StrategyReport,
    pub head_to_head: HeadToHead,
}

/// Compare `strategies[0]` (baseline) with `strategies[1]` (challenger).
///
/// Anything other than exactly two strategies fails before any trial runs.
pub fn compare(
    simulator: &StrategySimulator,
    strategies: &[Strategy],
    sim: &SimConfig,
) -> Result<Comparison, SimError> {
    let [baseline, challenger] = strategies else {
        return Err(SimError::WrongStrategyCount(strategies.len()));
    };
    validate_sim_config(sim)?;
    let total_laps = simulator.config().total_laps;
    validate_strategy(baseline, total_laps)?;
    validate_strategy(challenger, total_laps)?;
    info!(
        baseline = %baseline.name,
        challenger = %challenger.name,
        trials = sim.trials,
        seed = sim.rng_seed,
        "paired comparison start"
    );

    let streams = RngStreams::new(sim.rng_seed);
    let pairs: Vec<(f64, f64)> = (0..sim.trials)
        .into_par_iter()
        .map(|i| {
            let mut rng = streams.trial(i as u64);
            let draws = TrialDraws::sample(&mut rng, simulator.config());
            (
                simulator.race_time(baseline, &draws),
                simulator.race_time(challenger, &draws),
            )
        })
        .collect();

    let base_times: Vec<f64> = pairs.iter().map(|p| p.0).collect();
    let chal_times: Vec<f64> = pairs.iter().map(|p| p.1).collect();
    let deltas: Vec<f64> = pairs.iter().map(|(b, c)| c - b).collect();
    let wins = pairs.iter().filter(|(b, c)| c < b).count();

    let head_to_head = HeadToHead {
        challenger_win_fraction: wins as f64 / pairs.len() as f64,
        mean_delta_s: mean(&deltas),
        delta_std_dev_s: std_dev(&deltas),
    };
    info!(
        challenger_win_fraction = head_to_head.challenger_win_fraction,
        mean_delta_s = head_to_head.mean_delta_s,
        "paired comparison done"
    );
    Ok(Comparison {
        trials: sim.trials,
        rng_seed: sim.rng_seed,
        baseline: StrategyReport {
            strategy: baseline.name.clone(),
            summary: RaceTimeSummary::from_samples(&base_times),
        },
        challenger: StrategyReport {
            strategy: challenger.name.clone(),
            summary: RaceTimeSummary::from_samples(&chal_times),
        },
        head_to_head,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{SafetyCarModel, StrategySimConfig};
    use race_core::{Compound, Stint};

    fn sim() -> SimConfig {
        SimConfig {
            trials: 300,
            rng_seed: 11,
        }
    }

    fn simulator() -> StrategySimulator {
        StrategySimulator::new(StrategySimConfig {
            safety_car: SafetyCarModel {
                probability: 0.5,
                ..SafetyCarModel::default()
            },
            ..StrategySimConfig::new(50, 90.0)
        })
        .unwrap()
    }

    fn strat(name: &str, pit: u32) -> Strategy {
        Strategy::new(
            name,
            vec![Stint::new(Compound::Medium, pit), Stint::new(Compound::Hard, 50)],
        )
    }

    #[test]
    fn wrong_count_fails_fast() {
        let s = simulator();
        assert_eq!(
            compare(&s, &[strat("a", 20)], &sim()),
            Err(SimError::WrongStrategyCount(1))
        );
        assert_eq!(
            compare(&s, &[strat("a", 20), strat("b", 25), strat("c", 30)], &sim()),
            Err(SimError::WrongStrategyCount(3))
        );
        assert_eq!(compare(&s, &[], &sim()), Err(SimError::WrongStrategyCount(0)));
    }

    #[test]
    fn identical_strategies_tie_exactly() {
        let s = simulator();
        let c = compare(&s, &[strat("a", 22), strat("b", 22)], &sim()).unwrap();
        assert_eq!(c.head_to_head.challenger_win_fraction, 0.0);
        assert_eq!(c.head_to_head.mean_delta_s, 0.0);
        assert_eq!(c.head_to_head.delta_std_dev_s, 0.0);
        assert_eq!(c.baseline.summary, c.challenger.summary);
    }

    #[test]
    fn paired_comparison_is_reproducible() {
        let s = simulator();
        let pair = [strat("early", 15), strat("late", 30)];
        let a = compare(&s, &pair, &sim()).unwrap();
        let b = compare(&s, &pair, &sim()).unwrap();
        assert_eq!(a, b);
        assert!((0.0..=1.0).contains(&a.head_to_head.challenger_win_fraction));
        assert_eq!(a.baseline.strategy, "early");
        assert_eq!(a.challenger.summary.trials, 300);
    }

    #[test]
    fn matches_independent_simulation_per_strategy() {
        let s = simulator();
        let pair = [strat("early", 15), strat("late", 30)];
        let c = compare(&s, &pair, &sim()).unwrap();
        let solo = s.simulate(&pair[1], &sim()).unwrap();
        assert_eq!(c.challenger.summary, RaceTimeSummary::from_samples(&solo));
    }
}
