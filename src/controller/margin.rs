// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Margin Controller -- node-wide mean reversion toward `K_m`.
//!
//! ```text
//! m(T_n) = K_m + (m(T_{n-1}) - K_m) · e^{-α (T_n - T_{n-1})}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::params::MarginParams;
use crate::core_types::TimeUnit;
use crate::errors::{EngineError, StateOwner};

/// Persisted singleton state of the margin controller.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarginState {
    pub timestamp: DateTime<Utc>,
    /// Margin rate in ppm.
    pub margin: f64,
}

/// One mean-reversion step of length `dt` time units.
///
/// Fails for `alpha <= 0` or `dt < 0`; `dt == 0` returns `prev_margin`.
pub fn mean_revert(prev_margin: f64, dt: f64, k_m: f64, alpha: f64) -> Result<f64, EngineError> {
    if !alpha.is_finite() || alpha <= 0.0 {
        return Err(EngineError::invalid("alpha", alpha, "reversion speed must be > 0"));
    }
    if !(dt >= 0.0) {
        return Err(EngineError::invalid("dt", dt, "time step must be >= 0"));
    }
    if dt == 0.0 {
        return Ok(prev_margin);
    }
    Ok(k_m + (prev_margin - k_m) * (-alpha * dt).exp())
}

#[derive(Debug, Clone)]
pub struct MarginController {
    params: MarginParams,
    unit: TimeUnit,
}

impl MarginController {
    pub fn new(params: MarginParams, unit: TimeUnit) -> Result<Self, EngineError> {
        params.validate()?;
        Ok(Self { params, unit })
    }

    pub fn params(&self) -> &MarginParams {
        &self.params
    }

    /// A margin controller seen for the first time starts at its level.
    pub fn fresh(&self, now: DateTime<Utc>) -> MarginState {
        MarginState { timestamp: now, margin: self.params.k_m }
    }

    pub fn advance(&self, state: &MarginState, now: DateTime<Utc>) -> Result<MarginState, EngineError> {
        if now < state.timestamp {
            return Err(EngineError::NonMonotonicTime {
                owner: StateOwner::Margin,
                previous: state.timestamp,
                current: now,
            });
        }
        let dt = self.unit.elapsed(state.timestamp, now);
        let margin = mean_revert(state.margin, dt, self.params.k_m, self.params.alpha)?;
        trace!(dt, from = state.margin, to = margin, "margin controller advanced");
        Ok(MarginState { timestamp: now, margin })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
