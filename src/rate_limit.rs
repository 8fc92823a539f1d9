// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Rate Limiter -- decides whether a composed fee rate is broadcast.
//!
//! A proposal is first clamped to `[min, max]` and truncated to whole ppm.
//! It is then rejected when
//!
//! - less than `min_seconds` passed since the peer's last broadcast,
//! - the change is smaller than `min_up_ppm` (up) or `min_down_ppm` (down),
//! - or nothing changes.
//!
//! Meeting a threshold exactly is enough. A forced update skips the interval
//! and step gates but never the bounds, and a previous value outside the
//! bounds is always corrected.

use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub min_seconds: i64,
    pub min_up_ppm: i64,
    pub min_down_ppm: i64,
    pub min: i64,
    pub max: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    TooSoon { elapsed_seconds: i64, required: i64 },
    StepTooSmall { change: i64, required: i64 },
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RateDecision {
    Apply(i64),
    Rejected(RejectReason),
}

impl RateDecision {
    pub fn applied(&self) -> Option<i64> {
        match self {
            Self::Apply(v) => Some(*v),
            Self::Rejected(_) => None,
        }
    }
}

impl RateLimit {
    /// Clamped whole-ppm value of a proposal. Fractions are truncated
    /// toward zero.
    pub fn admissible(&self, proposed: f64) -> i64 {
        if proposed.is_nan() {
            return self.min.max(0).min(self.max);
        }
        let clamped = proposed.clamp(self.min as f64, self.max as f64);
        clamped.trunc() as i64
    }

    pub fn evaluate(&self, previous: i64, proposed: f64, elapsed_seconds: i64, force: bool) -> RateDecision {
        let target = self.admissible(proposed);
        if previous < self.min || previous > self.max {
            return RateDecision::Apply(target);
        }
        if target == previous {
            return RateDecision::Rejected(RejectReason::Unchanged);
        }
        if force {
            return RateDecision::Apply(target);
        }
        if elapsed_seconds < self.min_seconds {
            return RateDecision::Rejected(RejectReason::TooSoon {
                elapsed_seconds,
                required: self.min_seconds,
            });
        }
        let change = target - previous;
        let required = if change > 0 { self.min_up_ppm } else { self.min_down_ppm };
        if change.abs() < required {
            return RateDecision::Rejected(RejectReason::StepTooSmall { change, required });
        }
        RateDecision::Apply(target)
    }

    pub fn validate(&self, prefix: &'static str) -> Result<(), EngineError> {
        if self.min > self.max {
            return Err(EngineError::invalid(prefix, self.min as f64, "min exceeds max"));
        }
        if self.min_seconds < 0 || self.min_up_ppm < 0 || self.min_down_ppm < 0 {
            return Err(EngineError::invalid(prefix, self.min_seconds as f64, "thresholds must be >= 0"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// New channels
// ---------------------------------------------------------------------------

/// Fixed rate for channels without broadcast history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NewChannelRule {
    /// Channels opened within this many blocks count as new.
    pub max_age_blocks: u32,
    /// Rate when the local side holds the liquidity.
    pub fee_rate_local: f64,
    /// Rate when the remote side holds the liquidity.
    pub fee_rate_remote: f64,
}

impl NewChannelRule {
    pub fn is_new(&self, has_history: bool, opening_height: u32, block_height: u32) -> bool {
        !has_history && block_height.saturating_sub(opening_height) <= self.max_age_blocks
    }

    pub fn rate(&self, local_balance: u64, remote_balance: u64) -> f64 {
        if local_balance > remote_balance {
            self.fee_rate_local
        } else {
            self.fee_rate_remote
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn limit() -> RateLimit {
        RateLimit { min_seconds: 3_600, min_up_ppm: 10, min_down_ppm: 5, min: 0, max: 2_500 }
    }

    #[test]
    fn rejects_before_interval() {
        let d = limit().evaluate(100, 200.0, 3_599, false);
        assert_eq!(
            d,
            RateDecision::Rejected(RejectReason::TooSoon { elapsed_seconds: 3_599, required: 3_600 })
        );
        assert_eq!(limit().evaluate(100, 200.0, 3_600, false), RateDecision::Apply(200));
    }

    #[test]
    fn step_thresholds_are_inclusive() {
        let l = limit();
        assert!(matches!(
            l.evaluate(100, 109.9, 7_200, false),
            RateDecision::Rejected(RejectReason::StepTooSmall { change: 9, required: 10 })
        ));
        assert_eq!(l.evaluate(100, 110.0, 7_200, false), RateDecision::Apply(110));
        assert!(matches!(
            l.evaluate(100, 96.0, 7_200, false),
            RateDecision::Rejected(RejectReason::StepTooSmall { change: -4, required: 5 })
        ));
        assert_eq!(l.evaluate(100, 95.0, 7_200, false), RateDecision::Apply(95));
    }

    #[test]
    fn bounds_apply_regardless() {
        let l = limit();
        assert_eq!(l.evaluate(2_000, 9_000.0, 7_200, false), RateDecision::Apply(2_500));
        assert_eq!(l.evaluate(2_500, 9_000.0, 7_200, false), RateDecision::Rejected(RejectReason::Unchanged));
        // previous out of bounds is corrected even without the interval
        assert_eq!(l.evaluate(3_000, 2_999.0, 0, false), RateDecision::Apply(2_500));
        assert_eq!(l.evaluate(10, -40.0, 7_200, false), RateDecision::Apply(0));
    }

    #[test]
    fn force_skips_gates_but_not_bounds() {
        let l = limit();
        assert_eq!(l.evaluate(100, 101.0, 0, true), RateDecision::Apply(101));
        assert_eq!(l.evaluate(100, 4_000.0, 0, true), RateDecision::Apply(2_500));
        assert_eq!(l.evaluate(100, 100.4, 0, true), RateDecision::Rejected(RejectReason::Unchanged));
    }

    #[test]
    fn negative_rates_truncate_toward_zero() {
        let l = RateLimit { min_seconds: 0, min_up_ppm: 1, min_down_ppm: 1, min: -2_500, max: 0 };
        assert_eq!(l.admissible(-12.7), -12);
        assert_eq!(l.admissible(f64::NAN), 0);
        assert_eq!(l.evaluate(0, -12.7, 0, false), RateDecision::Apply(-12));
    }

    #[test]
    fn new_channel_rule() {
        let rule = NewChannelRule { max_age_blocks: 144, fee_rate_local: 21_000.0, fee_rate_remote: 0.0 };
        assert!(rule.is_new(false, 800_000, 800_144));
        assert!(!rule.is_new(false, 800_000, 800_145));
        assert!(!rule.is_new(true, 800_000, 800_001));
        assert_eq!(rule.rate(600, 400), 21_000.0);
        assert_eq!(rule.rate(400, 600), 0.0);
        assert_eq!(rule.rate(500, 500), 0.0);
    }

    #[test]
    fn validation() {
        assert!(limit().validate("fee_rate").is_ok());
        assert!(RateLimit { min: 10, max: 5, ..limit() }.validate("fee_rate").is_err());
        assert!(RateLimit { min_up_ppm: -1, ..limit() }.validate("fee_rate").is_err());
    }
}
