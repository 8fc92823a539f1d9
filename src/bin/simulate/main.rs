// Fee Controller Simulator: Monte Carlo over seeded liquidity walks
// ChaCha8Rng per run, multi-interval replay, optional per-tick JSONL trail
//
// Usage:
//   cargo run --release --bin simulate                      # All scenarios, 20 runs each
//   cargo run --release --bin simulate -- --runs 5          # Quick mode
//   cargo run --release --bin simulate -- shock             # Filter by name or label
//   cargo run --release --bin simulate -- --time-series     # Enable JSONL output
//   cargo run --release --bin simulate -- --seed 42         # Custom base seed

mod monte_carlo;
mod report;
mod scenarios;
mod time_series;

use clap::Parser;
use report::*;
use scenarios::*;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// ─── CLI Parsing ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "simulate", about = "Replay fee controllers against simulated liquidity")]
struct Cli {
    /// Runs per scenario.
    #[arg(long, default_value_t = 20)]
    runs: usize,

    /// Base seed; run i uses seed + i.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write per-tick JSONL time series.
    #[arg(long)]
    time_series: bool,

    /// Output directory for reports.
    #[arg(long, default_value = "simulation-results")]
    output: PathBuf,

    /// Only run scenarios whose name or label contains this.
    filter: Option<String>,
}

// ─── Main ───────────────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let all_scenarios = scenarios();
    let to_run: Vec<&Scenario> = match &cli.filter {
        Some(f) => {
            let f_lower = f.to_lowercase();
            all_scenarios
                .iter()
                .filter(|s| {
                    s.name.to_lowercase().contains(&f_lower) || s.label.to_lowercase().contains(&f_lower)
                })
                .collect()
        }
        None => all_scenarios.iter().collect(),
    };

    if to_run.is_empty() {
        eprintln!("No scenarios match filter: {:?}", cli.filter);
        std::process::exit(1);
    }

    let ts_dir = cli.time_series.then(|| cli.output.join("time-series"));

    println!("\n  Fee Controller Simulator v{}", env!("CARGO_PKG_VERSION"));
    println!("  PRNG: ChaCha8Rng | Runs/scenario: {} | Base seed: {}", cli.runs, cli.seed);
    println!("  Intervals (min): {:?}", monte_carlo::INTERVALS_MINUTES);
    println!("  Running {} scenario(s)...\n", to_run.len());
    println!(
        "  {:<32} {:>14} {:>14} {:>10} {:>10} {:>10} {:>7}",
        "Scenario", "Spread 10m", "Spread 1d", "Rough 10m", "Rough 1d", "Interp", "Time"
    );
    println!("  {}", "-".repeat(104));

    let suite_start = Instant::now();
    let mut mc_reports = Vec::new();

    for scenario in &to_run {
        let report = monte_carlo::run_monte_carlo(scenario, cli.runs, cli.seed, ts_dir.as_deref())?;
        let ci = |s: &Stats| (s.ci_upper - s.ci_lower) / 2.0;
        let status = if report.frequency_invariant() { "OK" } else { "DRIFT" };

        println!(
            "  {:<32} {:>8.1}±{:<5.1} {:>8.1}±{:<5.1} {:>10.2} {:>10.2} {:>10.1e} {:>5.0}ms  {}",
            report.label,
            report.final_spread_fine.mean,
            ci(&report.final_spread_fine),
            report.final_spread_daily.mean,
            ci(&report.final_spread_daily),
            report.roughness_fine.mean,
            report.roughness_daily.mean,
            report.interpolation_gap.max,
            report.elapsed_ms.mean,
            status,
        );

        mc_reports.push(report);
    }

    // ─── Summary ────────────────────────────────────────────────────────

    let drifting = mc_reports.iter().filter(|r| !r.frequency_invariant()).count();
    let max_sampling_gap = mc_reports.iter().map(|r| r.sampling_gap.max).fold(0.0_f64, f64::max);

    println!("  {}", "-".repeat(104));
    println!(
        "  Scenarios: {}  Frequency drift: {}  Max sampling gap: {:.2} ppm  Suite time: {:.1}s\n",
        mc_reports.len(),
        drifting,
        max_sampling_gap,
        suite_start.elapsed().as_secs_f64()
    );

    // ─── Write JSON Report ──────────────────────────────────────────────

    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();
    let report = SimReport {
        version: env!("CARGO_PKG_VERSION"),
        timestamp: timestamp.clone(),
        runs_per_scenario: cli.runs,
        base_seed: cli.seed,
        scenarios: mc_reports,
    };

    std::fs::create_dir_all(&cli.output)?;
    let path = cli.output.join(format!("sim-{}.json", timestamp));
    std::fs::write(&path, serde_json::to_string_pretty(&report)?)?;
    println!("  Results saved to: {}\n", path.display());

    if drifting > 0 {
        std::process::exit(1);
    }
    Ok(())
}
