// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Spread Level Controller -- proportional-only loop on the aggregate
//! depletion signal.
//!
//! Its spread is a level added to every peer's spread. It reuses the spread
//! controller with `K_p` only, so the same closed forms and the same
//! monotonicity guard apply.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::params::SpreadParams;
use super::spread::{ControllerState, SpreadController};
use crate::core_types::TimeUnit;
use crate::error_model::{aggregate_error, SpreadSample};
use crate::errors::{EngineError, StateOwner};

/// `[spread_level]` configuration. `max_deviation_ppm == 0` disables the
/// controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpreadLevelParams {
    pub max_deviation_ppm: f64,
    pub target_ppm: f64,
    pub k_p: f64,
}

impl SpreadLevelParams {
    pub fn is_enabled(&self) -> bool {
        self.max_deviation_ppm > 0.0
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.max_deviation_ppm.is_finite() || self.max_deviation_ppm < 0.0 {
            return Err(EngineError::invalid(
                "max_deviation_ppm",
                self.max_deviation_ppm,
                "must be finite and >= 0",
            ));
        }
        if !self.target_ppm.is_finite() {
            return Err(EngineError::invalid("target_ppm", self.target_ppm, "must be finite"));
        }
        SpreadParams::proportional(self.k_p).validate()
    }
}

#[derive(Debug, Clone)]
pub struct SpreadLevelController {
    params: SpreadLevelParams,
    inner: SpreadController,
}

impl SpreadLevelController {
    /// `None` when the controller is disabled.
    pub fn new(params: SpreadLevelParams, unit: TimeUnit) -> Result<Option<Self>, EngineError> {
        params.validate()?;
        if !params.is_enabled() {
            return Ok(None);
        }
        let inner = SpreadController::new(
            StateOwner::SpreadLevel,
            SpreadParams::proportional(params.k_p),
            unit,
        )?;
        Ok(Some(Self { params, inner }))
    }

    /// Aggregate error of the current spreads; zero liquidity weights fall
    /// back to a neutral error.
    pub fn error(&self, samples: &[SpreadSample]) -> Result<f64, EngineError> {
        match aggregate_error(samples, self.params.target_ppm, self.params.max_deviation_ppm) {
            Err(EngineError::DegenerateLiquidity { .. }) => {
                warn!(peers = samples.len(), "no liquidity weights for spread level error");
                Ok(0.0)
            }
            other => other,
        }
    }

    /// Advance the level to `now`. Without prior state the controller starts
    /// at level zero with its last error set to the current one.
    pub fn advance(
        &self,
        state: Option<&ControllerState>,
        now: DateTime<Utc>,
        samples: &[SpreadSample],
    ) -> Result<ControllerState, EngineError> {
        let error = self.error(samples)?;
        let current = match state {
            Some(s) => *s,
            None => ControllerState::fresh(now, error, 0.0),
        };
        let update = self.inner.advance(&current, now, error)?;
        debug!(
            error,
            level = update.state.spread,
            change = update.gains.total(),
            "spread level controller advanced"
        );
        Ok(update.state)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
