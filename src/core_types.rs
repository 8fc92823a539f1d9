// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Identifiers and units shared by every controller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rates are expressed in parts per million of the routed amount.
pub const PPM_UNIT: f64 = 1_000_000.0;

/// Remote-liquidity share used when no target can be derived (50%).
pub const TARGET_DEFAULT_PPM: f64 = 500_000.0;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Public key of a channel counterparty.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(pub String);

impl PeerId {
    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        self.0.get(..end).unwrap_or(&self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self { PeerId(s) }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self { PeerId(s.to_string()) }
}

// ---------------------------------------------------------------------------
// ChannelId
// ---------------------------------------------------------------------------

/// Short channel id as reported by the node.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(v: u64) -> Self { ChannelId(v) }
}

// ---------------------------------------------------------------------------
// TimeUnit
// ---------------------------------------------------------------------------

/// Unit in which gains (`K_*`) and smoothing speeds (`α`) are quoted.
///
/// A gain of `K_p = 40` with `TimeUnit::Day` moves the spread by 40 ppm per
/// day of unit error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Second,
    Hour,
    #[default]
    Day,
}

impl TimeUnit {
    /// Length of one unit in seconds.
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Second => 1.0,
            Self::Hour => 3_600.0,
            Self::Day => 86_400.0,
        }
    }

    /// Signed elapsed time from `from` to `to`, in this unit.
    pub fn elapsed(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
        let micros = (to - from).num_microseconds().unwrap_or_else(|| {
            // Beyond ~292k years; fall back to millisecond precision.
            (to - from).num_milliseconds().saturating_mul(1_000)
        });
        micros as f64 / 1e6 / self.seconds()
    }
}
