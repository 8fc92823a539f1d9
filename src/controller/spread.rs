// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Spread Controller -- per-peer feedback loop on the liquidity error.
//!
//! Between two ticks the error is interpolated linearly. The spread change
//! over the step is the exact integral of
//!
//! ```text
//! K_t + K_p·e(t) + K_i·E(t) + K_d·D(t)
//! ```
//!
//! where `E` is the moving average of the error (speed `α_i`) and `D` the
//! decayed error slope (speed `α_d`). Both are carried as single values in
//! [`ControllerState`], so a tick depends only on the previous state and the
//! current observation, never on how often ticks happened before.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::accumulator::{AccumulatorMode, ExponentialAccumulator};
use super::params::SpreadParams;
use crate::core_types::{PeerId, TimeUnit};
use crate::errors::{EngineError, StateOwner};

/// Persisted state of one spread controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ControllerState {
    /// Time of the last update, `T_{n-1}`.
    pub timestamp: DateTime<Utc>,
    /// Error observed at `T_{n-1}`.
    pub error: f64,
    /// Moving average of the error at `T_{n-1}` (`E_α`).
    pub error_ewma: f64,
    /// Decayed error slope at `T_{n-1}` (`D_α`), error units per time unit.
    pub error_slope: f64,
    /// Spread (ppm) at `T_{n-1}`.
    pub spread: f64,
}

impl ControllerState {
    /// State of a controller first seen at `timestamp`. The moving average
    /// starts neutral and the first tick at the same timestamp is a no-op.
    pub fn fresh(timestamp: DateTime<Utc>, error: f64, spread: f64) -> Self {
        Self {
            timestamp,
            error,
            error_ewma: 0.0,
            error_slope: 0.0,
            spread,
        }
    }

    /// Overwrite the spread, e.g. after the fee rate was changed outside the
    /// engine. Accumulators are kept.
    pub fn recalibrate(&mut self, spread: f64) {
        self.spread = spread;
    }

    pub fn is_finite(&self) -> bool {
        self.error.is_finite()
            && self.error_ewma.is_finite()
            && self.error_slope.is_finite()
            && self.spread.is_finite()
    }
}

/// Breakdown of one spread change.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Gains {
    /// Step length in time units.
    pub dt: f64,
    pub drift: f64,
    pub proportional: f64,
    pub integral: f64,
    pub derivative: f64,
}

impl Gains {
    pub fn total(&self) -> f64 {
        self.drift + self.proportional + self.integral + self.derivative
    }
}

/// Result of [`SpreadController::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadUpdate {
    pub state: ControllerState,
    pub gains: Gains,
}

/// Transition logic of a spread controller. Holds parameters only; state is
/// passed in and returned.
#[derive(Debug, Clone)]
pub struct SpreadController {
    owner: StateOwner,
    params: SpreadParams,
    unit: TimeUnit,
    integral: ExponentialAccumulator,
    derivative: ExponentialAccumulator,
}

impl SpreadController {
    pub fn new(owner: StateOwner, params: SpreadParams, unit: TimeUnit) -> Result<Self, EngineError> {
        params.validate()?;
        Ok(Self {
            owner,
            params,
            unit,
            integral: ExponentialAccumulator::new(params.alpha_i, AccumulatorMode::MovingAverage)?,
            derivative: ExponentialAccumulator::new(params.alpha_d, AccumulatorMode::Decay)?,
        })
    }

    /// Controller for a tracked peer.
    pub fn for_peer(peer: &PeerId, params: SpreadParams, unit: TimeUnit) -> Result<Self, EngineError> {
        Self::new(StateOwner::Peer(peer.clone()), params, unit)
    }

    pub fn params(&self) -> &SpreadParams {
        &self.params
    }

    /// Advance `state` to `now` with the error observed at `now`.
    ///
    /// Fails with `NonMonotonicTime` if `now` precedes the state; returns the
    /// state unchanged if `now` equals it.
    pub fn advance(
        &self,
        state: &ControllerState,
        now: DateTime<Utc>,
        error: f64,
    ) -> Result<SpreadUpdate, EngineError> {
        if now < state.timestamp {
            return Err(EngineError::NonMonotonicTime {
                owner: self.owner.clone(),
                previous: state.timestamp,
                current: now,
            });
        }
        if !error.is_finite() {
            return Err(EngineError::invalid("error", error, "must be finite"));
        }
        let dt = self.unit.elapsed(state.timestamp, now);
        if dt == 0.0 {
            return Ok(SpreadUpdate { state: *state, gains: Gains::default() });
        }

        let p = &self.params;
        let (e0, e1) = (state.error, error);

        let ewma = self.integral.step_linear(state.error_ewma, dt, e0, e1);
        let slope = self.derivative.step_constant(state.error_slope, dt, (e1 - e0) / dt);

        let gains = Gains {
            dt,
            drift: p.k_t * dt,
            proportional: p.k_p * dt * 0.5 * (e0 + e1),
            integral: p.k_i * ewma.integral,
            derivative: p.k_d * slope.integral,
        };

        let next = ControllerState {
            timestamp: now,
            error: e1,
            error_ewma: ewma.value,
            error_slope: slope.value,
            spread: state.spread + gains.total(),
        };
        trace!(
            owner = %self.owner,
            dt,
            error = e1,
            drift = gains.drift,
            proportional = gains.proportional,
            integral = gains.integral,
            derivative = gains.derivative,
            spread = next.spread,
            "spread controller advanced"
        );
        Ok(SpreadUpdate { state: next, gains })
    }

    /// Advance the state stored under `peer`; the map is only written on
    /// success. A peer without state starts fresh at `now`.
    pub fn tick(
        &self,
        states: &mut BTreeMap<PeerId, ControllerState>,
        peer: &PeerId,
        now: DateTime<Utc>,
        error: f64,
    ) -> Result<SpreadUpdate, EngineError> {
        let current = states
            .get(peer)
            .copied()
            .unwrap_or_else(|| ControllerState::fresh(now, error, 0.0));
        let update = self.advance(&current, now, error)?;
        states.insert(peer.clone(), update.state);
        Ok(update)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
