// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Controller parameter sets and their validation.
//!
//! All gains are quoted per [`TimeUnit`](crate::core_types::TimeUnit): a
//! spread controller with `k_p = 40` under `TimeUnit::Day` moves the spread
//! by 40 ppm per day of unit error.

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

// ---------------------------------------------------------------------------
// SpreadParams
// ---------------------------------------------------------------------------

/// Gains and smoothing speeds of a per-peer spread controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadParams {
    /// Drift: constant spread change per time unit.
    pub k_t: f64,
    /// Proportional gain on the error.
    pub k_p: f64,
    /// Gain on the moving average of the error.
    pub k_i: f64,
    /// Gain on the decayed error changes; the cumulative response to a jump
    /// of the error is `k_d` times the jump.
    pub k_d: f64,
    /// Smoothing speed of the moving average (integral term).
    pub alpha_i: f64,
    /// Decay speed of the derivative term.
    pub alpha_d: f64,
}

impl SpreadParams {
    /// Proportional-only parameter set, used by the spread level controller.
    pub fn proportional(k_p: f64) -> Self {
        Self { k_p, ..Self::default() }
    }

    /// Long-run spread change per time unit for a constant error `e`.
    pub fn steady_state_rate(&self, error: f64) -> f64 {
        self.k_t + (self.k_p + self.k_i) * error
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        let gains = [
            ("k_t", self.k_t),
            ("k_p", self.k_p),
            ("k_i", self.k_i),
            ("k_d", self.k_d),
        ];
        for (name, v) in gains {
            if !v.is_finite() {
                return Err(EngineError::invalid(name, v, "must be finite"));
            }
        }
        for (name, v) in [("alpha_i", self.alpha_i), ("alpha_d", self.alpha_d)] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::invalid(name, v, "smoothing must be finite and >= 0"));
            }
        }
        Ok(())
    }

    /// Whether switching from `self` to `other` changes the smoothing speeds.
    pub fn smoothing_changed(&self, other: &SpreadParams) -> bool {
        self.alpha_i != other.alpha_i || self.alpha_d != other.alpha_d
    }
}

// ---------------------------------------------------------------------------
// MarginParams
// ---------------------------------------------------------------------------

/// Mean-reversion level and speed of the node-wide margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginParams {
    /// Level (ppm) the margin reverts to.
    pub k_m: f64,
    /// Reversion speed per time unit; must be positive.
    pub alpha: f64,
}

impl Default for MarginParams {
    fn default() -> Self {
        Self { k_m: 0.0, alpha: 1.0 }
    }
}

impl MarginParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.k_m.is_finite() {
            return Err(EngineError::invalid("k_m", self.k_m, "must be finite"));
        }
        if !self.alpha.is_finite() || self.alpha <= 0.0 {
            return Err(EngineError::invalid("alpha", self.alpha, "reversion speed must be > 0"));
        }
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spread_params_are_inert() {
        let p = SpreadParams::default();
        assert_eq!(p.steady_state_rate(0.5), 0.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn steady_state_bound() {
        let p = SpreadParams { k_p: 40.0, k_i: 80.0, alpha_i: 0.1, ..SpreadParams::default() };
        assert_eq!(p.steady_state_rate(0.5), 60.0);
        assert_eq!(p.steady_state_rate(-0.5), -60.0);
    }

    #[test]
    fn negative_smoothing_rejected() {
        let p = SpreadParams { alpha_i: -0.5, ..SpreadParams::default() };
        assert!(matches!(
            p.validate(),
            Err(EngineError::InvalidParameter { name: "alpha_i", .. })
        ));
        let p = SpreadParams { alpha_d: f64::INFINITY, ..SpreadParams::default() };
        assert!(p.validate().is_err());
        let p = SpreadParams { k_p: f64::NAN, ..SpreadParams::default() };
        assert!(p.validate().is_err());
    }

    #[test]
    fn margin_alpha_must_be_positive() {
        assert!(MarginParams { k_m: 50.0, alpha: 0.1 }.validate().is_ok());
        assert!(matches!(
            MarginParams { k_m: 50.0, alpha: 0.0 }.validate(),
            Err(EngineError::InvalidParameter { name: "alpha", .. })
        ));
        assert!(MarginParams { k_m: 50.0, alpha: -1.0 }.validate().is_err());
    }

    #[test]
    fn smoothing_change_detection() {
        let a = SpreadParams { alpha_i: 1.0, k_p: 2.0, ..SpreadParams::default() };
        let b = SpreadParams { k_p: 3.0, ..a };
        let c = SpreadParams { alpha_d: 0.5, ..a };
        assert!(!a.smoothing_changed(&b));
        assert!(a.smoothing_changed(&c));
    }

    #[test]
    fn partial_toml_table_fills_defaults() {
        let p: SpreadParams = toml::from_str("k_p = 10.0\nalpha_i = 2.0").unwrap();
        assert_eq!(p.k_p, 10.0);
        assert_eq!(p.alpha_i, 2.0);
        assert_eq!(p.k_d, 0.0);
    }
}
