// Simulation scenarios: liquidity walks the controllers are run against.

use fee_engine::controller::{MarginParams, SpreadParams};
use fee_engine::error_model::ErrorBounds;

pub struct Scenario {
    pub name: &'static str,
    pub label: &'static str,
    pub peers: usize,
    pub days: u32,
    /// Starting remote share of each peer (0..1).
    pub start_share: f64,
    /// Drift of the remote share per day.
    pub drift: f64,
    /// Volatility of the remote share per sqrt(day).
    pub volatility: f64,
    /// One-off jump of the remote share: (day, size).
    pub shock: Option<(u32, f64)>,
    pub target_ppm: f64,
    pub spread: SpreadParams,
    pub margin: MarginParams,
    pub error: ErrorBounds,
}

fn standard_params() -> SpreadParams {
    SpreadParams { k_t: 0.0, k_p: 40.0, k_i: 80.0, k_d: 20.0, alpha_i: 0.1, alpha_d: 2.0 }
}

pub fn scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "BALANCED",
            label: "Balanced random walk",
            peers: 12,
            days: 60,
            start_share: 0.5,
            drift: 0.0,
            volatility: 0.05,
            shock: None,
            target_ppm: 500_000.0,
            spread: standard_params(),
            margin: MarginParams { k_m: 100.0, alpha: 0.5 },
            error: ErrorBounds::default(),
        },
        Scenario {
            name: "DRAIN",
            label: "Steady outbound drain",
            peers: 12,
            days: 60,
            start_share: 0.4,
            drift: 0.01,
            volatility: 0.03,
            shock: None,
            target_ppm: 500_000.0,
            spread: standard_params(),
            margin: MarginParams { k_m: 100.0, alpha: 0.5 },
            error: ErrorBounds { ratio_error_min: 100_000.0, ratio_error_max: 900_000.0, ..ErrorBounds::default() },
        },
        Scenario {
            name: "SHOCK",
            label: "Liquidity shock at day 20",
            peers: 12,
            days: 60,
            start_share: 0.5,
            drift: 0.0,
            volatility: 0.02,
            shock: Some((20, 0.3)),
            target_ppm: 500_000.0,
            spread: SpreadParams { k_d: 60.0, ..standard_params() },
            margin: MarginParams { k_m: 100.0, alpha: 0.5 },
            error: ErrorBounds::default(),
        },
        Scenario {
            name: "SLOW_INTEGRAL",
            label: "Slow integral, no derivative",
            peers: 8,
            days: 120,
            start_share: 0.6,
            drift: -0.002,
            volatility: 0.04,
            shock: None,
            target_ppm: 400_000.0,
            spread: SpreadParams { k_t: 0.5, k_p: 20.0, k_i: 40.0, k_d: 0.0, alpha_i: 0.02, alpha_d: 0.0 },
            margin: MarginParams { k_m: 50.0, alpha: 0.1 },
            error: ErrorBounds::default(),
        },
    ]
}
