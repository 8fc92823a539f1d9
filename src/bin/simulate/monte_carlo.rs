// Monte Carlo driver: N seeded liquidity walks per scenario, each replayed
// through the margin and spread controllers at several tick intervals.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use fee_engine::controller::{ControllerState, MarginController, SpreadController};
use fee_engine::error_model::ErrorModel;
use fee_engine::{EngineError, FeeComposer, PeerId, TimeUnit};

use crate::report::*;
use crate::scenarios::Scenario;
use crate::time_series::{TickRecord, TimeSeriesRecorder};

use std::time::Instant;

/// Resolution of the liquidity walk.
const STEP_MINUTES: u32 = 10;
const STEPS_PER_DAY: usize = 144;
const CAPACITY_SAT: f64 = 1_000_000.0;

/// Tick intervals compared in every run, finest first.
pub const INTERVALS_MINUTES: [u32; 4] = [10, 60, 360, 1_440];

fn peer_id(index: usize) -> PeerId {
    PeerId(format!("sim-peer-{:02}", index))
}

/// Standard normal draw (Box-Muller).
fn gaussian(rng: &mut ChaCha8Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Remote share of every peer at every walk step.
fn liquidity_walk(scenario: &Scenario, rng: &mut ChaCha8Rng) -> Vec<Vec<f64>> {
    let steps = scenario.days as usize * STEPS_PER_DAY;
    let dt = 1.0 / STEPS_PER_DAY as f64;
    let shock_step = scenario.shock.map(|(day, size)| (day as usize * STEPS_PER_DAY, size));

    (0..scenario.peers)
        .map(|_| {
            let mut share = scenario.start_share;
            let mut path = Vec::with_capacity(steps + 1);
            path.push(share);
            for step in 1..=steps {
                share += scenario.drift * dt + scenario.volatility * dt.sqrt() * gaussian(rng);
                if let Some((at, size)) = shock_step {
                    if step == at {
                        share += size;
                    }
                }
                share = share.clamp(0.0, 1.0);
                path.push(share);
            }
            path
        })
        .collect()
}

/// Outcome of replaying one error source at one interval.
struct Replay {
    summary: FrequencyResult,
    final_spreads: Vec<f64>,
    final_margin: f64,
}

fn replay<F>(
    scenario: &Scenario,
    interval_minutes: u32,
    error_at: F,
    shares: &[Vec<f64>],
    mut recorder: Option<&mut TimeSeriesRecorder>,
) -> Result<Replay, EngineError>
where
    F: Fn(usize, usize) -> f64,
{
    let unit = TimeUnit::Day;
    let t0 = DateTime::<Utc>::UNIX_EPOCH;
    let interval_steps = (interval_minutes / STEP_MINUTES) as usize;
    let total_steps = scenario.days as usize * STEPS_PER_DAY;
    let composer = FeeComposer::plain();

    let margin_ctl = MarginController::new(scenario.margin, unit)?;
    let mut margin = margin_ctl.fresh(t0);
    let controllers = (0..scenario.peers)
        .map(|i| SpreadController::for_peer(&peer_id(i), scenario.spread, unit))
        .collect::<Result<Vec<_>, _>>()?;
    let mut states: Vec<ControllerState> = (0..scenario.peers)
        .map(|i| ControllerState::fresh(t0, error_at(i, 0), 0.0))
        .collect();

    let mut moved = vec![0.0; scenario.peers];
    let mut abs_error = 0.0;
    let mut ticks = 0;

    let mut step = interval_steps;
    while step <= total_steps {
        let now = t0 + Duration::minutes(step as i64 * STEP_MINUTES as i64);
        margin = margin_ctl.advance(&margin, now)?;
        for (i, ctl) in controllers.iter().enumerate() {
            let error = error_at(i, step);
            let update = ctl.advance(&states[i], now, error)?;
            moved[i] += (update.state.spread - states[i].spread).abs();
            states[i] = update.state;
            abs_error += error.abs();

            if let Some(rec) = recorder.as_deref_mut() {
                let rates = composer.compose(margin.margin, states[i].spread, 0.0);
                rec.record(TickRecord {
                    interval_minutes,
                    day: step as f64 / STEPS_PER_DAY as f64,
                    peer: i,
                    remote_share: shares[i][step],
                    error,
                    spread: states[i].spread,
                    margin: margin.margin,
                    outbound: rates.outbound,
                    inbound: rates.inbound,
                });
            }
        }
        ticks += 1;
        step += interval_steps;
    }

    let peers = scenario.peers.max(1) as f64;
    let days = scenario.days.max(1) as f64;
    let final_spreads: Vec<f64> = states.iter().map(|s| s.spread).collect();
    let mean_final_fee_rate = final_spreads
        .iter()
        .map(|&s| composer.compose(margin.margin, s, 0.0).outbound)
        .sum::<f64>()
        / peers;

    Ok(Replay {
        summary: FrequencyResult {
            interval_minutes,
            ticks,
            mean_final_spread: final_spreads.iter().sum::<f64>() / peers,
            mean_final_fee_rate,
            roughness: moved.iter().sum::<f64>() / peers / days,
            mean_abs_error: abs_error / (peers * ticks.max(1) as f64),
        },
        final_spreads,
        final_margin: margin.margin,
    })
}

fn max_gap(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f64::max)
}

/// Run a single scenario iteration with a specific seed.
pub fn run_single(
    scenario: &Scenario,
    seed: u64,
    time_series_dir: Option<&std::path::Path>,
) -> Result<RunResult, EngineError> {
    let start = Instant::now();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let shares = liquidity_walk(scenario, &mut rng);

    let model = ErrorModel::new(scenario.error, scenario.target_ppm)?;
    let errors = shares
        .iter()
        .enumerate()
        .map(|(i, path)| {
            path.iter()
                .map(|&share| {
                    model.error(&peer_id(i), share * CAPACITY_SAT, (1.0 - share) * CAPACITY_SAT)
                })
                .collect::<Result<Vec<_>, _>>()
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut recorder = time_series_dir.map(|_| TimeSeriesRecorder::new());

    let mut frequencies = Vec::with_capacity(INTERVALS_MINUTES.len());
    let mut finals = Vec::with_capacity(INTERVALS_MINUTES.len());
    let mut final_margin = 0.0;
    for &interval in &INTERVALS_MINUTES {
        let run = replay(scenario, interval, |i, step| errors[i][step], &shares, recorder.as_mut())?;
        frequencies.push(run.summary);
        finals.push(run.final_spreads);
        final_margin = run.final_margin;
    }
    let sampling_gap = match (finals.first(), finals.last()) {
        (Some(fine), Some(coarse)) => max_gap(fine, coarse),
        _ => 0.0,
    };

    // Daily ticks against 10-minute ticks fed with the daily errors
    // interpolated linearly: the closed forms make both paths coincide.
    let daily = |i: usize, step: usize| errors[i][step];
    let interpolated = |i: usize, step: usize| {
        let day = step / STEPS_PER_DAY;
        let offset = step % STEPS_PER_DAY;
        if offset == 0 {
            return errors[i][step];
        }
        let e0 = errors[i][day * STEPS_PER_DAY];
        let e1 = errors[i][(day + 1) * STEPS_PER_DAY];
        e0 + (e1 - e0) * offset as f64 / STEPS_PER_DAY as f64
    };
    let coarse = replay(scenario, 1_440, daily, &shares, None)?;
    let fine = replay(scenario, STEP_MINUTES, interpolated, &shares, None)?;
    let interpolation_gap = max_gap(&coarse.final_spreads, &fine.final_spreads);

    if let (Some(dir), Some(rec)) = (time_series_dir, recorder) {
        let path = dir.join(format!("seed_{}.jsonl", seed));
        if let Err(e) = rec.write_jsonl(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write time series");
        } else {
            tracing::debug!(path = %path.display(), records = rec.len(), "time series written");
        }
    }

    Ok(RunResult {
        scenario: scenario.name.to_string(),
        seed,
        frequencies,
        interpolation_gap,
        sampling_gap,
        final_margin,
        elapsed_ms: start.elapsed().as_secs_f64() * 1_000.0,
    })
}

/// Run N iterations of a scenario with seeds base_seed..base_seed+N.
pub fn run_monte_carlo(
    scenario: &Scenario,
    n_runs: usize,
    base_seed: u64,
    time_series_base: Option<&std::path::Path>,
) -> Result<MonteCarloReport, EngineError> {
    let ts_dir = time_series_base.map(|base| base.join(scenario.name.to_lowercase()));

    let mut results = Vec::with_capacity(n_runs);
    for i in 0..n_runs {
        let seed = base_seed + i as u64;
        results.push(run_single(scenario, seed, ts_dir.as_deref())?);
    }

    Ok(aggregate(scenario, base_seed, results))
}

fn frequency_stat<F>(results: &[RunResult], index: usize, f: F) -> Stats
where
    F: Fn(&FrequencyResult) -> f64,
{
    Stats::from_samples(
        &results
            .iter()
            .filter_map(|r| r.frequencies.get(index).map(&f))
            .collect::<Vec<_>>(),
    )
}

/// Aggregate individual runs into a MonteCarloReport.
fn aggregate(scenario: &Scenario, base_seed: u64, results: Vec<RunResult>) -> MonteCarloReport {
    let daily = INTERVALS_MINUTES.len() - 1;
    MonteCarloReport {
        scenario_name: scenario.name.to_string(),
        label: scenario.label.to_string(),
        runs: results.len(),
        base_seed,
        final_spread_fine: frequency_stat(&results, 0, |f| f.mean_final_spread),
        final_spread_daily: frequency_stat(&results, daily, |f| f.mean_final_spread),
        roughness_fine: frequency_stat(&results, 0, |f| f.roughness),
        roughness_daily: frequency_stat(&results, daily, |f| f.roughness),
        interpolation_gap: Stats::from_samples(
            &results.iter().map(|r| r.interpolation_gap).collect::<Vec<_>>(),
        ),
        sampling_gap: Stats::from_samples(&results.iter().map(|r| r.sampling_gap).collect::<Vec<_>>()),
        elapsed_ms: Stats::from_samples(&results.iter().map(|r| r.elapsed_ms).collect::<Vec<_>>()),
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::scenarios;

    fn short(mut scenario: Scenario) -> Scenario {
        scenario.days = 10;
        scenario.peers = 3;
        scenario
    }

    #[test]
    fn same_seed_same_walk() {
        let scenario = short(scenarios().remove(0));
        let a = liquidity_walk(&scenario, &mut ChaCha8Rng::seed_from_u64(7));
        let b = liquidity_walk(&scenario, &mut ChaCha8Rng::seed_from_u64(7));
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 10 * STEPS_PER_DAY + 1);
        assert!(a.iter().flatten().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn interpolated_fine_ticks_match_daily_ticks() {
        for scenario in scenarios().into_iter().map(short) {
            let result = run_single(&scenario, 11, None).unwrap();
            assert!(
                result.interpolation_gap < 1e-6,
                "{}: gap {}",
                scenario.name,
                result.interpolation_gap
            );
            assert_eq!(result.frequencies.len(), INTERVALS_MINUTES.len());
            assert_eq!(result.frequencies[3].ticks, 10);
            assert_eq!(result.frequencies[0].ticks, 10 * STEPS_PER_DAY);
        }
    }

    #[test]
    fn time_series_written_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = short(scenarios().remove(0));
        run_single(&scenario, 3, Some(dir.path())).unwrap();
        let content = std::fs::read_to_string(dir.path().join("seed_3.jsonl")).unwrap();
        let expected: usize = INTERVALS_MINUTES
            .iter()
            .map(|m| 10 * STEPS_PER_DAY / (*m / STEP_MINUTES) as usize * 3)
            .sum();
        assert_eq!(content.lines().count(), expected);
    }

    #[test]
    fn aggregate_counts_runs() {
        let scenario = short(scenarios().remove(1));
        let report = run_monte_carlo(&scenario, 3, 100, None).unwrap();
        assert_eq!(report.runs, 3);
        assert_eq!(report.results[2].seed, 102);
        assert!(report.frequency_invariant());
    }
}
