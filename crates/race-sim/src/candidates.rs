//! Enumerates pit strategies to feed the optimizer.

use race_core::{Compound, Stint, Strategy};
use serde::{Deserialize, Serialize};

/// Bounds of the strategy search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpace {
    pub compounds: Vec<Compound>,
    pub max_stops: usize,
    pub min_stint_laps: u32,
    /// Pit laps are restricted to multiples of this step.
    pub lap_step: u32,
    /// Dry races must use at least two different compounds.
    pub require_two_compounds: bool,
    pub noise_sigma_s: f64,
}

impl Default for CandidateSpace {
    fn default() -> Self {
        Self {
            compounds: Compound::DRY.to_vec(),
            max_stops: 2,
            min_stint_laps: 8,
            lap_step: 4,
            require_two_compounds: true,
            noise_sigma_s: 0.25,
        }
    }
}

fn code(c: Compound) -> char {
    match c {
        Compound::Soft => 'S',
        Compound::Medium => 'M',
        Compound::Hard => 'H',
        Compound::Intermediate => 'I',
        Compound::Wet => 'W',
    }
}

fn pit_plans(
    total_laps: u32,
    stops: usize,
    space: &CandidateSpace,
    from: u32,
    acc: &mut Vec<u32>,
    out: &mut Vec<Vec<u32>>,
) {
    if acc.len() == stops {
        if total_laps - from >= space.min_stint_laps {
            out.push(acc.clone());
        }
        return;
    }
    let step = space.lap_step.max(1);
    let mut lap = from + space.min_stint_laps.max(1);
    // Round up onto the step grid.
    lap = lap.div_ceil(step) * step;
    while lap < total_laps {
        acc.push(lap);
        pit_plans(total_laps, stops, space, lap, acc, out);
        acc.pop();
        lap += step;
    }
}

fn compound_sequences(len: usize, compounds: &[Compound]) -> Vec<Vec<Compound>> {
    let mut out: Vec<Vec<Compound>> = vec![Vec::new()];
    for _ in 0..len {
        out = out
            .into_iter()
            .flat_map(|seq| {
                compounds.iter().map(move |c| {
                    let mut next = seq.clone();
                    next.push(*c);
                    next
                })
            })
            .collect();
    }
    out
}

/// Every strategy in the space, in a deterministic order.
pub fn generate_candidates(total_laps: u32, space: &CandidateSpace) -> Vec<Strategy> {
    let mut compounds = space.compounds.clone();
    compounds.sort();
    compounds.dedup();
    let mut candidates = Vec::new();
    if total_laps == 0 || compounds.is_empty() {
        return candidates;
    }
    for stops in 0..=space.max_stops {
        let mut plans = Vec::new();
        pit_plans(total_laps, stops, space, 0, &mut Vec::new(), &mut plans);
        let sequences = compound_sequences(stops + 1, &compounds);
        for plan in &plans {
            for seq in &sequences {
                let ends = plan.iter().copied().chain(std::iter::once(total_laps));
                let stints: Vec<Stint> = seq
                    .iter()
                    .zip(ends)
                    .map(|(c, end)| Stint::new(*c, end))
                    .collect();
                let name = stints
                    .iter()
                    .map(|s| format!("{}{}", code(s.compound), s.end_lap))
                    .collect::<Vec<_>>()
                    .join("-");
                let strategy = Strategy::new(name, stints).with_noise(space.noise_sigma_s);
                if space.require_two_compounds && strategy.distinct_compounds() < 2 {
                    continue;
                }
                candidates.push(strategy);
            }
        }
    }
    candidates
}
