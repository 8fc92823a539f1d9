// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Failure taxonomy of the fee engine.
//!
//! Per-peer failures (`NonMonotonicTime`, `DegenerateLiquidity`) are isolated
//! by the engine; node-wide failures abort the tick before broadcast.

use chrono::{DateTime, Utc};

use crate::core_types::PeerId;
use crate::node::NodeError;
use crate::store::StoreError;

/// Owner of a piece of controller state, used for error context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOwner {
    Peer(PeerId),
    Margin,
    SpreadLevel,
}

impl std::fmt::Display for StateOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Peer(p) => write!(f, "peer {}", p),
            Self::Margin => write!(f, "margin controller"),
            Self::SpreadLevel => write!(f, "spread level controller"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("timestamp regression for {owner}: last {previous}, got {current}")]
    NonMonotonicTime {
        owner: StateOwner,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },

    #[error("invalid parameter {name}={value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("zero total liquidity{}", .peer.as_ref().map(|p| format!(" for peer {}", p)).unwrap_or_default())]
    DegenerateLiquidity { peer: Option<PeerId> },

    #[error("no controller state for pinned peer {peer}")]
    NoPinnablePeer { peer: String },

    #[error("node: {0}")]
    Node(#[from] NodeError),

    #[error("store: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Shorthand used by parameter validation.
    pub fn invalid(name: &'static str, value: f64, reason: &'static str) -> Self {
        Self::InvalidParameter { name, value, reason }
    }

    /// Whether the failure only concerns a single peer.
    pub fn is_peer_local(&self) -> bool {
        match self {
            Self::NonMonotonicTime { owner, .. } => matches!(owner, StateOwner::Peer(_)),
            Self::DegenerateLiquidity { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn messages_carry_context() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = EngineError::NonMonotonicTime {
            owner: StateOwner::Peer(PeerId::from("02aa")),
            previous: t0,
            current: t1,
        };
        let msg = err.to_string();
        assert!(msg.contains("peer 02aa"), "{msg}");
        assert!(err.is_peer_local());

        let err = EngineError::invalid("alpha", -1.0, "must be > 0");
        assert_eq!(err.to_string(), "invalid parameter alpha=-1: must be > 0");
        assert!(!err.is_peer_local());
    }

    #[test]
    fn degenerate_liquidity_message() {
        let err = EngineError::DegenerateLiquidity { peer: None };
        assert_eq!(err.to_string(), "zero total liquidity");
        let err = EngineError::DegenerateLiquidity { peer: Some(PeerId::from("03bb")) };
        assert_eq!(err.to_string(), "zero total liquidity for peer 03bb");
    }
}
