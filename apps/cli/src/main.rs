#![deny(warnings)]

//! Headless CLI: run a race scenario in any simulation mode, or fit
//! calibration models from historical forecasts.

use anyhow::{bail, Context, Result};
use calibration::{fit_all, CalibrationPolicy, CalibrationStore, Calibrator};
use persistence::{read_history, ArtifactFormat, FileCalibrationStore};
use race_core::{DriverPaceProfile, SimConfig, Strategy, TrackProfile};
use race_sim::{
    generate_candidates, CandidateSpace, GridSimConfig, SimulationRequest, SimulationResult,
    Simulator, StrategySimConfig,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Mode {
    #[default]
    Strategy,
    Grid,
    Optimize,
    Compare,
    FitCalibration,
}

impl Mode {
    fn parse(s: &str) -> Result<Self> {
        Ok(match s {
            "strategy" => Mode::Strategy,
            "grid" => Mode::Grid,
            "optimize" => Mode::Optimize,
            "compare" => Mode::Compare,
            "fit-calibration" => Mode::FitCalibration,
            other => bail!(
                "unknown mode {other:?} (expected strategy|grid|optimize|compare|fit-calibration)"
            ),
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Args {
    scenario: Option<PathBuf>,
    mode: Mode,
    trials: Option<usize>,
    seed: Option<u64>,
    calibration_dir: Option<PathBuf>,
    history: Option<PathBuf>,
    artifact_version: Option<String>,
    format: ArtifactFormat,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<Args> {
    let mut out = Args::default();
    let mut it = args.into_iter();
    while let Some(arg) = it.next() {
        let mut value = || it.next().with_context(|| format!("{arg} needs a value"));
        match arg.as_str() {
            "--scenario" => out.scenario = Some(value()?.into()),
            "--mode" => out.mode = Mode::parse(&value()?)?,
            "--trials" => out.trials = Some(value()?.parse().context("--trials")?),
            "--seed" => out.seed = Some(value()?.parse().context("--seed")?),
            "--calibration-dir" => out.calibration_dir = Some(value()?.into()),
            "--history" => out.history = Some(value()?.into()),
            "--artifact-version" => out.artifact_version = Some(value()?),
            "--format" => {
                out.format = match value()?.as_str() {
                    "json" => ArtifactFormat::Json,
                    "bincode" => ArtifactFormat::Bincode,
                    other => bail!("unknown artifact format {other:?}"),
                }
            }
            other => bail!("unrecognised argument {other:?}"),
        }
    }
    Ok(out)
}

/// YAML scenario file.
#[derive(Debug, Deserialize)]
struct Scenario {
    track: TrackProfile,
    #[serde(default)]
    drivers: Vec<DriverPaceProfile>,
    #[serde(default)]
    strategies: Vec<Strategy>,
    #[serde(default)]
    sim: SimConfig,
    #[serde(default)]
    grid: Option<GridSimConfig>,
    #[serde(default)]
    candidates: Option<CandidateSpace>,
    #[serde(default)]
    calibration: CalibrationPolicy,
}

impl Scenario {
    fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing scenario {}", path.display()))
    }

    fn field(&self) -> BTreeMap<String, DriverPaceProfile> {
        self.drivers
            .iter()
            .map(|d| (d.driver_id.clone(), d.clone()))
            .collect()
    }
}

fn open_store(args: &Args) -> Result<Option<FileCalibrationStore>> {
    args.calibration_dir
        .as_ref()
        .map(|dir| {
            FileCalibrationStore::open(dir, args.format)
                .with_context(|| format!("opening calibration store {}", dir.display()))
        })
        .transpose()
}

fn fit_calibration(args: &Args) -> Result<serde_json::Value> {
    let history_path = args.history.as_ref().context("--history is required")?;
    let store = open_store(args)?.context("--calibration-dir is required")?;
    let version = args
        .artifact_version
        .clone()
        .unwrap_or_else(|| chrono::Utc::now().format("%Y%m%d%H%M%S").to_string());
    let history = read_history(history_path)
        .with_context(|| format!("reading history {}", history_path.display()))?;
    let models = fit_all(
        &version,
        history.iter().map(|(kind, obs)| (*kind, obs.as_slice())),
    )?;
    for m in &models {
        store.save(m)?;
    }
    Ok(serde_json::to_value(&models)?)
}

fn run_scenario(args: &Args) -> Result<serde_json::Value> {
    let path = args.scenario.as_ref().context("--scenario is required")?;
    let mut scenario = Scenario::load(path)?;
    if let Some(trials) = args.trials {
        scenario.sim.trials = trials;
    }
    if let Some(seed) = args.seed {
        scenario.sim.rng_seed = seed;
    }
    let simulator = Simulator::with_configs(
        StrategySimConfig::from_track(&scenario.track),
        scenario.grid.unwrap_or_default(),
        scenario.track.clone(),
        scenario.sim,
    )?;

    let value = match args.mode {
        Mode::Strategy => {
            if scenario.strategies.is_empty() {
                bail!("scenario has no strategies");
            }
            let runs = scenario
                .strategies
                .iter()
                .map(|s| simulator.run(SimulationRequest::Strategy(s)))
                .collect::<Result<Vec<SimulationResult>, _>>()?;
            serde_json::to_value(runs)?
        }
        Mode::Optimize => {
            let candidates = if scenario.strategies.is_empty() {
                let space = scenario.candidates.clone().unwrap_or_default();
                generate_candidates(scenario.track.total_laps, &space)
            } else {
                scenario.strategies.clone()
            };
            info!(candidates = candidates.len(), "optimizing");
            serde_json::to_value(simulator.run(SimulationRequest::Optimize(&candidates))?)?
        }
        Mode::Compare => {
            serde_json::to_value(simulator.run(SimulationRequest::Compare(&scenario.strategies))?)?
        }
        Mode::Grid => {
            let field = scenario.field();
            let result = simulator.run(SimulationRequest::Grid(&field))?;
            let calibrated = match (&result, open_store(args)?) {
                (SimulationResult::Grid(forecast), Some(store)) => {
                    let calibrator = Calibrator::from_store(&store, scenario.calibration)?;
                    Some(calibrator.calibrate_forecast(forecast))
                }
                _ => None,
            };
            serde_json::json!({ "raw": result, "calibrated": calibrated })
        }
        Mode::FitCalibration => bail!("fit-calibration does not take a scenario"),
    };
    Ok(value)
}

fn main() -> Result<()> {
    // Logging setup
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    info!(
        mode = ?args.mode,
        scenario = ?args.scenario,
        git_sha = env!("RACE_SIM_GIT_SHA"),
        "starting CLI"
    );

    let output = match args.mode {
        Mode::FitCalibration => fit_calibration(&args)?,
        _ => run_scenario(&args)?,
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENARIO: &str = r#"
track:
  id: monza
  total_laps: 53
  base_lap_time_ms: 83500.0
  pit_loss_base_s: 24.0
  safety_car_probability: 0.3
  overtaking_difficulty: 0.3
  tyre_wear_factors:
    soft: 1.2
drivers:
  - { driver_id: LEC, base_lap_ms: 83500.0, pace_delta_ms: -120.0, noise_sigma_ms: 200.0, dnf_probability: 0.05 }
  - { driver_id: PIA, base_lap_ms: 83500.0, pace_delta_ms: -60.0, noise_sigma_ms: 200.0, dnf_probability: 0.05 }
strategies:
  - name: M-H
    stints: [{ compound: medium, end_lap: 22 }, { compound: hard, end_lap: 53 }]
  - name: H-M
    stints: [{ compound: hard, end_lap: 30 }, { compound: medium, end_lap: 53 }]
sim:
  trials: 100
  rng_seed: 9
"#;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn write_scenario(dir: &Path) -> PathBuf {
        let path = dir.join("monza.yaml");
        std::fs::write(&path, SCENARIO).unwrap();
        path
    }

    #[test]
    fn parses_flags() {
        let a = parse_args(args(&[
            "--mode", "grid", "--trials", "500", "--seed", "7", "--format", "bincode",
        ]))
        .unwrap();
        assert_eq!(a.mode, Mode::Grid);
        assert_eq!(a.trials, Some(500));
        assert_eq!(a.seed, Some(7));
        assert_eq!(a.format, ArtifactFormat::Bincode);
        let named = parse_args(args(&["--artifact-version", "2024.2"])).unwrap();
        assert_eq!(named.artifact_version.as_deref(), Some("2024.2"));
        assert!(parse_args(args(&["--version", "2024.2"])).is_err());
        assert!(parse_args(args(&["--mode", "bogus"])).is_err());
        assert!(parse_args(args(&["--trials"])).is_err());
        assert!(parse_args(args(&["--frobnicate"])).is_err());
    }

    #[test]
    fn scenario_yaml_loads() {
        let dir = tempfile::tempdir().unwrap();
        let s = Scenario::load(&write_scenario(dir.path())).unwrap();
        assert_eq!(s.track.total_laps, 53);
        assert_eq!(s.strategies.len(), 2);
        assert_eq!(s.strategies[0].noise_sigma_s, 0.25);
        assert_eq!(s.field().len(), 2);
        assert!(!s.calibration.renormalize_win);
    }

    #[test]
    fn compare_and_grid_modes_run() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scenario(dir.path());
        let base = Args {
            scenario: Some(path),
            ..Args::default()
        };

        let cmp = run_scenario(&Args {
            mode: Mode::Compare,
            ..base.clone()
        })
        .unwrap();
        assert_eq!(cmp["mode"], "comparison");
        assert_eq!(cmp["result"]["trials"], 100);

        let grid = run_scenario(&Args {
            mode: Mode::Grid,
            calibration_dir: Some(dir.path().join("cal")),
            ..base.clone()
        })
        .unwrap();
        assert_eq!(grid["raw"]["mode"], "grid");
        assert_eq!(grid["calibrated"]["status"]["win"]["status"], "uncalibrated");
    }

    #[test]
    fn fit_calibration_writes_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let history = dir.path().join("history.json");
        std::fs::write(
            &history,
            r#"{"win": [{"predicted": 0.2, "observed": false}, {"predicted": 0.7, "observed": true}]}"#,
        )
        .unwrap();
        let cal = dir.path().join("cal");
        let out = fit_calibration(&Args {
            mode: Mode::FitCalibration,
            history: Some(history),
            calibration_dir: Some(cal.clone()),
            artifact_version: Some("t1".into()),
            ..Args::default()
        })
        .unwrap();
        assert_eq!(out.as_array().map(Vec::len), Some(1));
        assert!(cal.join("win-t1.json").exists());
    }
}
