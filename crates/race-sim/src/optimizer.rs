//! Ranks candidate strategies by expected race time, then robustness.

use crate::stats::RaceTimeSummary;
use crate::strategy::StrategySimulator;
use crate::SimError;
use race_core::{validate_sim_config, validate_strategy, SimConfig, Strategy};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// One candidate with its place in the ranking (1 = best).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedStrategy {
    pub rank: usize,
    pub strategy: Strategy,
    pub summary: RaceTimeSummary,
}

/// Evaluates every candidate with the same seed, so they face the same conditions.
#[derive(Clone, Debug)]
pub struct StrategyOptimizer<'a> {
    simulator: &'a StrategySimulator,
}

impl<'a> StrategyOptimizer<'a> {
    pub fn new(simulator: &'a StrategySimulator) -> Self {
        Self { simulator }
    }

    /// Candidates sorted ascending by `(mean race time, robustness)`.
    ///
    /// Every candidate is validated before the first trial runs; exact ties
    /// keep their input order.
    pub fn rank(
        &self,
        candidates: &[Strategy],
        sim: &SimConfig,
    ) -> Result<Vec<RankedStrategy>, SimError> {
        if candidates.is_empty() {
            return Err(SimError::NoCandidates);
        }
        validate_sim_config(sim)?;
        let total_laps = self.simulator.config().total_laps;
        for c in candidates {
            validate_strategy(c, total_laps)?;
        }
        info!(candidates = candidates.len(), trials = sim.trials, seed = sim.rng_seed, "ranking strategies");

        let mut ranked = Vec::with_capacity(candidates.len());
        for c in candidates {
            let times = self.simulator.simulate(c, sim)?;
            let summary = RaceTimeSummary::from_samples(&times);
            debug!(strategy = %c.name, mean_s = summary.mean, robustness = summary.robustness, "candidate evaluated");
            ranked.push(RankedStrategy {
                rank: 0,
                strategy: c.clone(),
                summary,
            });
        }
        ranked.sort_by(|a, b| {
            a.summary
                .mean
                .total_cmp(&b.summary.mean)
                .then(a.summary.robustness.total_cmp(&b.summary.robustness))
        });
        for (i, r) in ranked.iter_mut().enumerate() {
            r.rank = i + 1;
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategySimConfig;
    use race_core::{Compound, Stint};

    fn sim() -> SimConfig {
        SimConfig {
            trials: 400,
            rng_seed: 2024,
        }
    }

    fn one_stop() -> Strategy {
        Strategy::new(
            "M25-H",
            vec![Stint::new(Compound::Medium, 25), Stint::new(Compound::Hard, 52)],
        )
    }

    fn two_stop() -> Strategy {
        Strategy::new(
            "M18-M35-H",
            vec![
                Stint::new(Compound::Medium, 18),
                Stint::new(Compound::Medium, 35),
                Stint::new(Compound::Hard, 52),
            ],
        )
    }

    #[test]
    fn ranking_is_deterministic_and_ordered() {
        let s = StrategySimulator::new(StrategySimConfig::new(52, 90.0)).unwrap();
        let opt = StrategyOptimizer::new(&s);
        let a = opt.rank(&[two_stop(), one_stop()], &sim()).unwrap();
        let b = opt.rank(&[two_stop(), one_stop()], &sim()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].rank, 1);
        assert_eq!(a[1].rank, 2);
        assert!(a[0].summary.mean <= a[1].summary.mean);
        for r in &a {
            assert!(r.summary.mean > 0.0);
            assert!(r.summary.robustness > 0.0);
        }
    }

    #[test]
    fn cheaper_pit_lane_favours_extra_stop() {
        let mut cfg = StrategySimConfig::new(52, 90.0);
        cfg.pit_loss_base_s = 0.0;
        cfg.pit_traffic_max_s = 0.0;
        let s = StrategySimulator::new(cfg).unwrap();
        let ranked = StrategyOptimizer::new(&s)
            .rank(&[one_stop(), two_stop()], &sim())
            .unwrap();
        assert_eq!(ranked[0].strategy.name, "M18-M35-H");
    }

    #[test]
    fn rejects_bad_candidate_before_running() {
        let s = StrategySimulator::new(StrategySimConfig::new(52, 90.0)).unwrap();
        let bad = Strategy::new("bad", vec![Stint::new(Compound::Soft, 10)]);
        let opt = StrategyOptimizer::new(&s);
        assert!(matches!(
            opt.rank(&[one_stop(), bad], &sim()),
            Err(SimError::Strategy(_))
        ));
        assert_eq!(opt.rank(&[], &sim()), Err(SimError::NoCandidates));
    }
}
