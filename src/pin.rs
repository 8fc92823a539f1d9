// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Pin Shift Resolver -- uniform spread shift that holds one peer's spread
//! or outbound fee rate at a configured value.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::composer::FeeComposer;
use crate::core_types::PeerId;
use crate::errors::EngineError;

/// Which peer is pinned. Serialized as the peer id or `"dynamic"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PinTarget {
    /// The peer with the lowest spread in the current tick.
    Dynamic,
    Peer(PeerId),
}

impl From<String> for PinTarget {
    fn from(s: String) -> Self {
        if s == "dynamic" {
            Self::Dynamic
        } else {
            Self::Peer(PeerId(s))
        }
    }
}

impl From<PinTarget> for String {
    fn from(t: PinTarget) -> Self {
        match t {
            PinTarget::Dynamic => "dynamic".to_string(),
            PinTarget::Peer(p) => p.0,
        }
    }
}

impl fmt::Display for PinTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dynamic => write!(f, "dynamic"),
            Self::Peer(p) => write!(f, "{}", p),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinMethod {
    /// Hold the outbound fee rate of the pinned peer.
    FeeRate,
    /// Hold the spread of the pinned peer.
    Spread,
}

/// `[pin]` configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinConfig {
    pub peer: PinTarget,
    pub method: PinMethod,
    pub value: f64,
}

/// Shift for the current tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinShift {
    pub peer: PeerId,
    pub shift: f64,
}

pub struct PinShiftResolver<'a> {
    config: &'a PinConfig,
}

impl<'a> PinShiftResolver<'a> {
    pub fn new(config: &'a PinConfig) -> Self {
        Self { config }
    }

    /// The pinned peer among the peers with controller state this tick.
    pub fn select(&self, spreads: &BTreeMap<PeerId, f64>) -> Result<PeerId, EngineError> {
        match &self.config.peer {
            PinTarget::Peer(p) if spreads.contains_key(p) => Ok(p.clone()),
            PinTarget::Peer(p) => Err(EngineError::NoPinnablePeer { peer: p.to_string() }),
            PinTarget::Dynamic => spreads
                .iter()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(p, _)| p.clone())
                .ok_or_else(|| EngineError::NoPinnablePeer { peer: "dynamic".to_string() }),
        }
    }

    /// Shift to add to every spread. `spreads` are the unshifted spreads
    /// (including any common level); `composer_for` gives the pinned peer's
    /// composition for the fee-rate method.
    pub fn resolve<F>(
        &self,
        spreads: &BTreeMap<PeerId, f64>,
        margin: f64,
        composer_for: F,
    ) -> Result<PinShift, EngineError>
    where
        F: FnOnce(&PeerId) -> FeeComposer,
    {
        let peer = self.select(spreads)?;
        let spread = spreads.get(&peer).copied().unwrap_or_default();
        let shift = match self.config.method {
            PinMethod::Spread => self.config.value - spread,
            PinMethod::FeeRate => {
                let composer = composer_for(&peer);
                composer.spread_for_outbound(self.config.value, margin) - spread
            }
        };
        debug!(peer = %peer.short(), method = ?self.config.method, value = self.config.value, shift, "pin shift resolved");
        Ok(PinShift { peer, shift })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
