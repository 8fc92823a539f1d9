// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Liquidity snapshot handed in by the node and policy updates handed back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core_types::{ChannelId, PeerId};

/// Local forwarding policy of one channel direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelPolicy {
    pub fee_rate_ppm: i64,
    #[serde(default)]
    pub base_fee_msat: i64,
    #[serde(default)]
    pub inbound_fee_rate_ppm: i64,
    #[serde(default)]
    pub inbound_base_fee_msat: i64,
    /// Time the node last announced this policy.
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSnapshot {
    pub channel_id: ChannelId,
    pub peer: PeerId,
    #[serde(default)]
    pub private: bool,
    /// Block height of the funding transaction.
    pub opening_height: u32,
    pub capacity_sat: u64,
    /// Local balance including pending outgoing HTLCs.
    pub local_balance_sat: u64,
    /// Remote balance including pending incoming HTLCs.
    pub remote_balance_sat: u64,
    /// `None` if the node has not announced a policy yet.
    #[serde(default)]
    pub policy: Option<ChannelPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquiditySnapshot {
    pub timestamp: DateTime<Utc>,
    pub block_height: u32,
    pub channels: Vec<ChannelSnapshot>,
}

impl LiquiditySnapshot {
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.channel_id == id)
    }
}

/// New policy for one channel, produced when the rate limiter accepts a
/// change of the outbound or inbound rate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub channel_id: ChannelId,
    pub peer: PeerId,
    pub fee_rate_ppm: i64,
    pub base_fee_msat: i64,
    pub inbound_fee_rate_ppm: i64,
    pub inbound_base_fee_msat: i64,
}

impl PolicyUpdate {
    /// Policy the node holds after applying the update at `now`.
    pub fn to_policy(&self, now: DateTime<Utc>) -> ChannelPolicy {
        ChannelPolicy {
            fee_rate_ppm: self.fee_rate_ppm,
            base_fee_msat: self.base_fee_msat,
            inbound_fee_rate_ppm: self.inbound_fee_rate_ppm,
            inbound_base_fee_msat: self.inbound_base_fee_msat,
            last_update: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_from_json_with_defaults() {
        let json = r#"{
            "timestamp": "2024-07-01T00:00:00Z",
            "block_height": 850000,
            "channels": [
                {"channel_id": 1, "peer": "02aa", "opening_height": 840000,
                 "capacity_sat": 1000000, "local_balance_sat": 600000, "remote_balance_sat": 400000,
                 "policy": {"fee_rate_ppm": 250, "last_update": "2024-06-30T12:00:00Z"}},
                {"channel_id": 2, "peer": "02bb", "private": true, "opening_height": 849990,
                 "capacity_sat": 500000, "local_balance_sat": 500000, "remote_balance_sat": 0}
            ]
        }"#;
        let snap: LiquiditySnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.channels.len(), 2);
        let c = snap.channel(ChannelId(1)).unwrap();
        assert_eq!(c.policy.map(|p| p.inbound_fee_rate_ppm), Some(0));
        assert!(snap.channel(ChannelId(2)).unwrap().private);
        assert!(snap.channel(ChannelId(3)).is_none());
    }
}
