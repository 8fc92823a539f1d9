// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Error Model -- maps liquidity state to a bounded controller error.
//!
//! Per peer, the error is a piecewise linear function of the remote share of
//! liquidity `ratio = in / (in + out)`:
//!
//! ```text
//!   error_max ┤                    ╭──────
//!             │                 ╭──╯
//!           0 ┼──────────────╭──╯ target
//!             │           ╭──╯
//!   error_min ┤───────────╯
//!             └──────┬────┴────────┬──── ratio
//!            ratio_error_min   ratio_error_max
//! ```
//!
//! A remote share above target (too much inbound liquidity) is a positive
//! error and pushes the spread up. The aggregate form compares spreads
//! weighted by remote liquidity with spreads weighted by target liquidity.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core_types::{PeerId, PPM_UNIT};
use crate::errors::EngineError;

// ---------------------------------------------------------------------------
// Per-peer error
// ---------------------------------------------------------------------------

/// Thresholds and saturation of the per-peer error. Ratios in ppm.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorBounds {
    pub error_min: f64,
    pub error_max: f64,
    pub ratio_error_min: f64,
    pub ratio_error_max: f64,
}

impl Default for ErrorBounds {
    fn default() -> Self {
        Self {
            error_min: -0.5,
            error_max: 0.5,
            ratio_error_min: 0.0,
            ratio_error_max: PPM_UNIT,
        }
    }
}

impl ErrorBounds {
    pub fn validate(&self) -> Result<(), EngineError> {
        if !(self.error_max >= 0.0) || !self.error_max.is_finite() {
            return Err(EngineError::invalid("error_max", self.error_max, "must be finite and >= 0"));
        }
        if !(self.error_min <= 0.0) || !self.error_min.is_finite() {
            return Err(EngineError::invalid("error_min", self.error_min, "must be finite and <= 0"));
        }
        if !(self.ratio_error_min <= self.ratio_error_max) {
            return Err(EngineError::invalid(
                "ratio_error_min",
                self.ratio_error_min,
                "must not exceed ratio_error_max",
            ));
        }
        Ok(())
    }
}

/// Error for a liquidity split, given the target remote share (ppm).
///
/// `liquidity_in` is the remote (inbound) side. Fails with
/// `DegenerateLiquidity` when both sides are zero; see [`or_neutral`].
pub fn liquidity_error(
    liquidity_in: f64,
    liquidity_out: f64,
    target: f64,
    bounds: &ErrorBounds,
) -> Result<f64, EngineError> {
    let total = liquidity_in + liquidity_out;
    if total == 0.0 {
        return Err(EngineError::DegenerateLiquidity { peer: None });
    }
    let ratio = liquidity_in / total;
    let hi = bounds.ratio_error_max / PPM_UNIT;
    let lo = bounds.ratio_error_min / PPM_UNIT;
    let set_point = target / PPM_UNIT;

    let error = if ratio >= hi {
        bounds.error_max
    } else if ratio <= lo {
        bounds.error_min
    } else if ratio >= set_point {
        bounds.error_max / (hi - set_point) * (ratio - set_point)
    } else {
        -bounds.error_min / (set_point - lo) * (ratio - set_point)
    };
    Ok(error)
}

/// Neutral fallback for degenerate liquidity; other errors pass through.
pub fn or_neutral(result: Result<f64, EngineError>) -> Result<f64, EngineError> {
    match result {
        Err(EngineError::DegenerateLiquidity { .. }) => Ok(0.0),
        other => other,
    }
}

/// Per-peer error model bound to one peer's configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorModel {
    bounds: ErrorBounds,
    target: f64,
}

impl ErrorModel {
    pub fn new(bounds: ErrorBounds, target: f64) -> Result<Self, EngineError> {
        bounds.validate()?;
        if !(0.0..=PPM_UNIT).contains(&target) {
            return Err(EngineError::invalid("target", target, "must lie within [0, 1e6] ppm"));
        }
        // Outside the thresholds the error would not be monotone in the ratio.
        let clamped = target.clamp(bounds.ratio_error_min, bounds.ratio_error_max);
        if clamped != target {
            warn!(target, clamped, "target outside the error thresholds, clamped");
        }
        Ok(Self { bounds, target: clamped })
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    /// Error for `peer`, attaching the peer to a degenerate-liquidity failure.
    pub fn error(&self, peer: &PeerId, liquidity_in: f64, liquidity_out: f64) -> Result<f64, EngineError> {
        liquidity_error(liquidity_in, liquidity_out, self.target, &self.bounds).map_err(|e| match e {
            EngineError::DegenerateLiquidity { .. } => {
                EngineError::DegenerateLiquidity { peer: Some(peer.clone()) }
            }
            other => other,
        })
    }
}

// ---------------------------------------------------------------------------
// Aggregate error
// ---------------------------------------------------------------------------

/// One peer's contribution to the aggregate error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadSample {
    /// Spread (ppm), already floored by the caller if needed.
    pub spread: f64,
    /// Liquidity the peer should hold on the remote side: capacity · target.
    pub target_weight: f64,
    /// Liquidity it actually holds on the remote side.
    pub observed_weight: f64,
}

/// Aggregate error in `[-0.5, 0.5]`.
///
/// The remote-liquidity-weighted average spread minus the target-weighted
/// average spread minus `offset_ppm`, bounded by `±max_deviation_ppm` and
/// normalized by `2 · max_deviation_ppm`.
pub fn aggregate_error(
    samples: &[SpreadSample],
    offset_ppm: f64,
    max_deviation_ppm: f64,
) -> Result<f64, EngineError> {
    if !(max_deviation_ppm > 0.0) || !max_deviation_ppm.is_finite() {
        return Err(EngineError::invalid(
            "max_deviation_ppm",
            max_deviation_ppm,
            "must be finite and > 0",
        ));
    }
    let (mut target_sum, mut target_weighted) = (0.0, 0.0);
    let (mut observed_sum, mut observed_weighted) = (0.0, 0.0);
    for s in samples {
        target_sum += s.target_weight;
        target_weighted += s.spread * s.target_weight;
        observed_sum += s.observed_weight;
        observed_weighted += s.spread * s.observed_weight;
    }
    if target_sum == 0.0 || observed_sum == 0.0 {
        return Err(EngineError::DegenerateLiquidity { peer: None });
    }
    let diff = observed_weighted / observed_sum - target_weighted / target_sum - offset_ppm;
    let bounded = diff.clamp(-max_deviation_ppm, max_deviation_ppm);
    Ok(bounded / (2.0 * max_deviation_ppm))
}

// ===========================================================================
// Tests
// ===========================================================================
