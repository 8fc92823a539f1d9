// Simulation report types, serialized for independent analysis.

use serde::Serialize;

// ─── Statistics (per-metric Monte Carlo aggregation) ────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub mean: f64,
    pub std_dev: f64,
    pub ci_lower: f64,
    pub ci_upper: f64,
    pub min: f64,
    pub max: f64,
    pub n: usize,
}

impl Stats {
    pub fn from_samples(samples: &[f64]) -> Self {
        let n = samples.len();
        if n == 0 {
            return Self { mean: 0.0, std_dev: 0.0, ci_lower: 0.0, ci_upper: 0.0, min: 0.0, max: 0.0, n: 0 };
        }
        let mean = samples.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        let std_dev = variance.sqrt();
        let stderr = std_dev / (n as f64).sqrt();
        let z = 1.96; // 95% CI
        Self {
            mean,
            std_dev,
            ci_lower: mean - z * stderr,
            ci_upper: mean + z * stderr,
            min: samples.iter().cloned().fold(f64::INFINITY, f64::min),
            max: samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            n,
        }
    }
}

// ─── Single-Run Result ──────────────────────────────────────────────────────

/// Controller path statistics at one tick interval.
#[derive(Debug, Clone, Serialize)]
pub struct FrequencyResult {
    pub interval_minutes: u32,
    pub ticks: usize,
    pub mean_final_spread: f64,
    pub mean_final_fee_rate: f64,
    /// Mean absolute spread change per day, averaged over peers.
    pub roughness: f64,
    /// Mean absolute error over all ticks and peers.
    pub mean_abs_error: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub scenario: String,
    pub seed: u64,
    pub frequencies: Vec<FrequencyResult>,
    /// Largest final-spread difference between daily ticks and 10-minute
    /// ticks fed with the interpolated daily errors. Zero up to rounding.
    pub interpolation_gap: f64,
    /// Largest final-spread difference between the finest and the coarsest
    /// interval on the actual walk.
    pub sampling_gap: f64,
    pub final_margin: f64,
    pub elapsed_ms: f64,
}

// ─── Monte Carlo Aggregate ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct MonteCarloReport {
    pub scenario_name: String,
    pub label: String,
    pub runs: usize,
    pub base_seed: u64,
    pub final_spread_fine: Stats,
    pub final_spread_daily: Stats,
    pub roughness_fine: Stats,
    pub roughness_daily: Stats,
    pub interpolation_gap: Stats,
    pub sampling_gap: Stats,
    pub elapsed_ms: Stats,
    pub results: Vec<RunResult>,
}

impl MonteCarloReport {
    /// The closed forms are exact for interpolated input.
    pub fn frequency_invariant(&self) -> bool {
        self.interpolation_gap.max < 1e-6
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub version: &'static str,
    pub timestamp: String,
    pub runs_per_scenario: usize,
    pub base_seed: u64,
    pub scenarios: Vec<MonteCarloReport>,
}
