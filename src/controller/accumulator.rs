// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Exact exponential accumulators over irregular time steps.
//!
//! An accumulator follows `A'(t) = α (x(t) - A(t))`, i.e. it is the
//! exponentially weighted moving average of the driving signal `x`. Between
//! two observations the signal is either held constant or interpolated
//! linearly, and both the end value and the definite integral of `A` over the
//! step have closed forms. Only the previous value and timestamp are needed;
//! no samples are retained.
//!
//! ```text
//! x = α·Δt,  λ = e^{-x},  φ1(x) = (1 - e^{-x}) / x,  φ2(x) = (x - 1 + e^{-x}) / x²
//!
//! constant x ≡ s:        A₁ = s + λ (A₀ - s)
//!                        ∫A = Δt [ s + (A₀ - s) φ1 ]
//! linear x: e₀ → e₁:     A₁ = e₁ - (e₁ - e₀) φ1 + (A₀ - e₀) λ
//!                        ∫A = Δt [ (e₀ + e₁)/2 + (A₀ - e₀) φ1 - (e₁ - e₀) φ2 ]
//! ```
//!
//! `φ1` and `φ2` are evaluated without cancellation for small `x` and tend to
//! zero for large `x`, so no step length can overflow.

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

/// Below this `α·Δt` the series expansion of `φ2` is used.
const PHI2_SERIES_LIMIT: f64 = 1e-3;

/// Which driving signal the accumulator integrates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccumulatorMode {
    /// Moving average of the sampled level (integral term).
    MovingAverage,
    /// Decaying response to changes of the sample (derivative term). Point
    /// updates take the change itself as a jump; the step integrals are
    /// driven by the slope `Δsample / Δt`, so the integral of the
    /// accumulator over all later steps adds up to the size of the change.
    Decay,
}

/// A `(timestamp, value)` pair owned by whichever controller holds it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorState {
    pub time: f64,
    pub value: f64,
}

/// Result of advancing over one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Step {
    /// Accumulator value at the end of the step.
    pub value: f64,
    /// Definite integral of the accumulator over the step.
    pub integral: f64,
}

impl Step {
    fn hold(value: f64, dt: f64) -> Self {
        Self { value, integral: value * dt }
    }
}

/// Recursive EWMA / decay primitive parameterised by its smoothing speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialAccumulator {
    alpha: f64,
    mode: AccumulatorMode,
}

impl ExponentialAccumulator {
    /// `alpha` is the smoothing speed per time unit. Zero means "never
    /// moves"; negative or non-finite values are rejected.
    pub fn new(alpha: f64, mode: AccumulatorMode) -> Result<Self, EngineError> {
        if !alpha.is_finite() {
            return Err(EngineError::invalid("alpha", alpha, "must be finite"));
        }
        if alpha < 0.0 {
            return Err(EngineError::invalid("alpha", alpha, "must be >= 0"));
        }
        Ok(Self { alpha, mode })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn mode(&self) -> AccumulatorMode {
        self.mode
    }

    /// Point update from `prev` to `now` for a sample observed at `now`.
    ///
    /// In `MovingAverage` mode the signal is assumed to have been constant at
    /// `sample` since `prev.time`. In `Decay` mode `sample` is the change of
    /// the input since the previous observation, entered as a jump at
    /// `prev.time` that decays toward zero. Both modes share the update
    /// `sample + exp(-alpha * dt) * (prev - sample)`.
    ///
    /// `now < prev.time` is rejected; `now == prev.time` returns `prev`.
    pub fn advance(
        &self,
        prev: AccumulatorState,
        now: f64,
        sample: f64,
    ) -> Result<AccumulatorState, EngineError> {
        let dt = now - prev.time;
        if !(dt >= 0.0) {
            return Err(EngineError::invalid("now", now, "precedes the accumulator timestamp"));
        }
        if dt == 0.0 {
            return Ok(prev);
        }
        let step = self.step_constant(prev.value, dt, sample);
        Ok(AccumulatorState { time: now, value: step.value })
    }

    /// Value and integral over a step of length `dt` with the driving signal
    /// held at `driver`.
    pub fn step_constant(&self, prev_value: f64, dt: f64, driver: f64) -> Step {
        if self.alpha == 0.0 || dt == 0.0 {
            return Step::hold(prev_value, dt);
        }
        let x = self.alpha * dt;
        let lambda = (-x).exp();
        let gap = prev_value - driver;
        Step {
            value: driver + lambda * gap,
            integral: dt * (driver + gap * phi1(x)),
        }
    }

    /// Value and integral over a step of length `dt` with the driving signal
    /// moving linearly from `start` to `end`.
    pub fn step_linear(&self, prev_value: f64, dt: f64, start: f64, end: f64) -> Step {
        if self.alpha == 0.0 || dt == 0.0 {
            return Step::hold(prev_value, dt);
        }
        let x = self.alpha * dt;
        let lambda = (-x).exp();
        let rise = end - start;
        let gap = prev_value - start;
        Step {
            value: end - rise * phi1(x) + gap * lambda,
            integral: dt * (0.5 * (start + end) + gap * phi1(x) - rise * phi2(x)),
        }
    }
}

/// `(1 - e^{-x}) / x`, equal to 1 at the origin.
pub fn phi1(x: f64) -> f64 {
    if x == 0.0 {
        return 1.0;
    }
    -(-x).exp_m1() / x
}

/// `(x - 1 + e^{-x}) / x²`, equal to 1/2 at the origin.
pub fn phi2(x: f64) -> f64 {
    if x.abs() < PHI2_SERIES_LIMIT {
        return 0.5 - x / 6.0 + x * x / 24.0 - x * x * x / 120.0;
    }
    (1.0 - phi1(x)) / x
}

// ===========================================================================
// Tests
// ===========================================================================
