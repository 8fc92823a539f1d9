// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Fee Composer -- margin and spread to outbound/inbound fee rates.
//!
//! ```text
//! s̃        = spread + shift                 (s̃ := -margin if margin + s̃ < 0)
//! idio     = clamp(ppm + pct · s̃ / 100, idio_min, idio_max)
//! outbound = clamp(s̃ + margin + idio, fee_rate_min, fee_rate_max)
//! inbound  = clamp(-s̃, inbound_min, inbound_max)
//! ```
//!
//! The branch at `margin + s̃ = 0` is the only discontinuity of the
//! composition in its inputs' derivatives: below it the effective spread
//! stays at `-margin`, so the outbound rate holds at `idio(-margin)` and the
//! inbound discount at `margin`.

use serde::{Deserialize, Serialize};

use crate::core_types::PPM_UNIT;
use crate::errors::EngineError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Per-peer margin add-on on top of the node-wide margin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IdiosyncraticMargin {
    /// Constant add-on (ppm).
    pub ppm: f64,
    /// Share of the effective spread added to the margin, in percent.
    pub pct: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for IdiosyncraticMargin {
    fn default() -> Self {
        Self { ppm: 0.0, pct: 0.0, min: -PPM_UNIT, max: PPM_UNIT }
    }
}

impl IdiosyncraticMargin {
    pub fn at(&self, spread: f64) -> f64 {
        (self.ppm + self.pct * spread / 100.0).clamp(self.min, self.max)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (name, v) in [("margin_idiosyncratic", self.ppm), ("margin_idiosyncratic_pct", self.pct)] {
            if !v.is_finite() {
                return Err(EngineError::invalid(name, v, "must be finite"));
            }
        }
        if self.pct <= -100.0 {
            return Err(EngineError::invalid(
                "margin_idiosyncratic_pct",
                self.pct,
                "must be > -100",
            ));
        }
        if !(self.min <= self.max) {
            return Err(EngineError::invalid(
                "margin_idiosyncratic_min",
                self.min,
                "must not exceed margin_idiosyncratic_max",
            ));
        }
        Ok(())
    }
}

/// Closed interval a composed rate is clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateBounds {
    pub min: f64,
    pub max: f64,
}

impl RateBounds {
    pub const UNBOUNDED: RateBounds = RateBounds { min: f64::NEG_INFINITY, max: f64::INFINITY };

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn validate(&self, name: &'static str) -> Result<(), EngineError> {
        if !(self.min <= self.max) {
            return Err(EngineError::invalid(name, self.min, "lower bound exceeds upper bound"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FeeComposer
// ---------------------------------------------------------------------------

/// Composition result for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComposedRates {
    pub outbound: f64,
    pub inbound: f64,
    /// Spread after shift and continuity branch.
    pub effective_spread: f64,
    pub idiosyncratic: f64,
    /// Whether the continuity branch replaced the shifted spread.
    pub floored: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeeComposer {
    pub idiosyncratic: IdiosyncraticMargin,
    pub outbound: RateBounds,
    pub inbound: RateBounds,
}

impl FeeComposer {
    pub fn new(idiosyncratic: IdiosyncraticMargin, outbound: RateBounds, inbound: RateBounds) -> Self {
        Self { idiosyncratic, outbound, inbound }
    }

    /// Composer without add-ons or bounds.
    pub fn plain() -> Self {
        Self {
            idiosyncratic: IdiosyncraticMargin { ppm: 0.0, pct: 0.0, min: f64::NEG_INFINITY, max: f64::INFINITY },
            outbound: RateBounds::UNBOUNDED,
            inbound: RateBounds::UNBOUNDED,
        }
    }

    pub fn compose(&self, margin: f64, spread: f64, shift: f64) -> ComposedRates {
        let shifted = spread + shift;
        let floored = margin + shifted < 0.0;
        let effective_spread = if floored { -margin } else { shifted };
        let idiosyncratic = self.idiosyncratic.at(effective_spread);
        ComposedRates {
            outbound: self.outbound.clamp(effective_spread + margin + idiosyncratic),
            inbound: self.inbound.clamp(-effective_spread),
            effective_spread,
            idiosyncratic,
            floored,
        }
    }

    /// Effective spread for which the unclamped outbound rate equals
    /// `outbound` at `margin`. Solves the piecewise linear relation exactly,
    /// including a saturated idiosyncratic margin.
    pub fn spread_for_outbound(&self, outbound: f64, margin: f64) -> f64 {
        let idio = &self.idiosyncratic;
        let linear = (outbound - margin - idio.ppm) / (1.0 + idio.pct / 100.0);
        let raw = idio.ppm + idio.pct * linear / 100.0;
        if raw >= idio.min && raw <= idio.max {
            return linear;
        }
        let bound = if raw < idio.min { idio.min } else { idio.max };
        outbound - margin - bound
    }

    /// Invert an unbounded composition: `(margin, spread)` from the composed
    /// outbound and inbound rates. Valid outside the continuity branch.
    pub fn decompose(&self, outbound: f64, inbound: f64) -> (f64, f64) {
        let spread = -inbound;
        let margin = outbound - spread - self.idiosyncratic.at(spread);
        (margin, spread)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.idiosyncratic.validate()?;
        self.outbound.validate("fee_rate_min")?;
        self.inbound.validate("inbound_fee_rate_min")
    }
}

// ===========================================================================
// Tests
// ===========================================================================
