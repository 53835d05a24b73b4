use criterion::{black_box, criterion_group, criterion_main, Criterion};
use race_core::{Compound, DriverPaceProfile, SimConfig, Stint, Strategy, TrackProfile};
use race_sim::{GridSimConfig, GridSimulator, StrategySimConfig, StrategySimulator};
use std::collections::BTreeMap;

fn track() -> TrackProfile {
    TrackProfile {
        id: "barcelona".into(),
        total_laps: 66,
        base_lap_time_ms: 78_000.0,
        pit_loss_base_s: 22.0,
        safety_car_probability: 0.35,
        tyre_wear_factors: BTreeMap::new(),
        overtaking_difficulty: 0.6,
        weather_variance: 0.1,
    }
}

fn build_field(n_drivers: usize) -> BTreeMap<String, DriverPaceProfile> {
    (0..n_drivers)
        .map(|i| {
            let id = format!("D{i:02}");
            let profile = DriverPaceProfile {
                driver_id: id.clone(),
                base_lap_ms: 78_000.0,
                pace_delta_ms: i as f64 * 25.0,
                noise_sigma_ms: 150.0,
                dnf_probability: 0.05,
                restart: None,
            };
            (id, profile)
        })
        .collect()
}

fn bench_strategy(c: &mut Criterion) {
    let sim = StrategySimulator::new(StrategySimConfig::from_track(&track())).unwrap();
    let strategy = Strategy::new(
        "M-H",
        vec![Stint::new(Compound::Medium, 24), Stint::new(Compound::Hard, 66)],
    );
    let cfg = SimConfig {
        trials: 1_000,
        rng_seed: 42,
    };
    c.bench_function("strategy 1k trials x 66 laps", |b| {
        b.iter(|| black_box(sim.simulate(&strategy, &cfg).unwrap()))
    });
}

fn bench_grid(c: &mut Criterion) {
    let grid = GridSimulator::new(track(), GridSimConfig::default()).unwrap();
    let field = build_field(20);
    let cfg = SimConfig {
        trials: 10_000,
        rng_seed: 42,
    };
    c.bench_function("grid 20 drivers x 10k trials", |b| {
        b.iter(|| black_box(grid.run_outcomes(&field, &cfg).unwrap()))
    });
}

criterion_group!(benches, bench_strategy, bench_grid);
criterion_main!(benches);
