// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Channel Aggregator -- groups a liquidity snapshot by peer.
//!
//! Per peer it decides which channels are controlled, sums their liquidity,
//! and derives the reference fee rate the spread is calibrated against.
//! Across peers it derives the default target.
//!
//! Controlled channels of a peer:
//! - private channels without a policy (shadow channels that still carry
//!   liquidity),
//! - new channels,
//! - announced channels whose outbound rate equals the peer's reference rate.
//!
//! Announced channels without a policy yet are left out, as are peers with
//! private channels only.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::core_types::{ChannelId, PeerId, PPM_UNIT, TARGET_DEFAULT_PPM};
use crate::rate_limit::NewChannelRule;
use crate::snapshot::{ChannelPolicy, ChannelSnapshot, LiquiditySnapshot};

/// Per-peer lookups the aggregator needs from the configuration.
pub trait PeerRules {
    fn is_excluded(&self, channel: &ChannelSnapshot) -> bool;
    fn new_channel_rule(&self, peer: &PeerId) -> NewChannelRule;
    /// Target configured for this peer, if any (ppm of remote share).
    fn explicit_target(&self, peer: &PeerId) -> Option<f64>;
}

// ---------------------------------------------------------------------------
// ChannelCollection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelCollection {
    pub peer: PeerId,
    channels: Vec<ChannelSnapshot>,
    new_channels: BTreeSet<ChannelId>,
    rule: NewChannelRule,
    observed_ref: Option<i64>,
    /// Lowest outbound rate broadcast by the engine for this peer.
    pub ref_fee_rate_last: Option<i64>,
    private_only: bool,
}

impl ChannelCollection {
    fn new(peer: PeerId, rule: NewChannelRule) -> Self {
        Self {
            peer,
            channels: Vec::new(),
            new_channels: BTreeSet::new(),
            rule,
            observed_ref: None,
            ref_fee_rate_last: None,
            private_only: true,
        }
    }

    fn add(&mut self, channel: ChannelSnapshot, last: Option<&ChannelPolicy>, block_height: u32) {
        if !channel.private {
            self.private_only = false;
        }
        if let Some(policy) = channel.policy {
            if let Some(last) = last {
                self.ref_fee_rate_last = Some(
                    self.ref_fee_rate_last
                        .map_or(last.fee_rate_ppm, |r| r.min(last.fee_rate_ppm)),
                );
            }
            if self.rule.is_new(last.is_some(), channel.opening_height, block_height) {
                self.new_channels.insert(channel.channel_id);
            } else {
                self.observed_ref = Some(
                    self.observed_ref
                        .map_or(policy.fee_rate_ppm, |r| r.min(policy.fee_rate_ppm)),
                );
            }
        }
        self.channels.push(channel);
    }

    pub fn is_private_only(&self) -> bool {
        self.private_only
    }

    pub fn has_new_channels(&self) -> bool {
        !self.new_channels.is_empty()
    }

    pub fn is_new_channel(&self, id: ChannelId) -> bool {
        self.new_channels.contains(&id)
    }

    pub fn controlled_channels(&self) -> impl Iterator<Item = &ChannelSnapshot> {
        let private_only = self.private_only;
        self.channels.iter().filter(move |c| {
            if private_only {
                return false;
            }
            match c.policy {
                None => c.private,
                Some(p) => self.new_channels.contains(&c.channel_id) || Some(p.fee_rate_ppm) == self.observed_ref,
            }
        })
    }

    /// Remote-side liquidity of the controlled channels.
    pub fn liquidity_in(&self) -> u64 {
        self.controlled_channels().map(|c| c.remote_balance_sat).sum()
    }

    /// Local-side liquidity of the controlled channels.
    pub fn liquidity_out(&self) -> u64 {
        self.controlled_channels().map(|c| c.local_balance_sat).sum()
    }

    pub fn capacity(&self) -> u64 {
        self.liquidity_in() + self.liquidity_out()
    }

    /// Lowest current outbound rate among established channels, or the
    /// new-channel rate when the peer has none.
    pub fn ref_fee_rate(&self) -> f64 {
        match self.observed_ref {
            Some(r) => r as f64,
            None => self.rule.rate(self.liquidity_out(), self.liquidity_in()),
        }
    }

    /// Whether the reference rate moved away from what the engine broadcast
    /// last, or the engine never broadcast for this peer.
    pub fn ref_fee_rate_changed(&self) -> bool {
        match self.ref_fee_rate_last {
            None => true,
            Some(last) => last as f64 != self.ref_fee_rate(),
        }
    }

    /// Latest policy announcement among the controlled channels.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.controlled_channels()
            .filter_map(|c| c.policy.map(|p| p.last_update))
            .max()
    }
}

// ---------------------------------------------------------------------------
// ChannelAggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct ChannelAggregator {
    collections: BTreeMap<PeerId, ChannelCollection>,
    excluded: BTreeSet<PeerId>,
}

impl ChannelAggregator {
    pub fn from_snapshot<R: PeerRules>(
        snapshot: &LiquiditySnapshot,
        last_policies: &BTreeMap<ChannelId, ChannelPolicy>,
        rules: &R,
    ) -> Self {
        let mut agg = Self::default();
        for channel in &snapshot.channels {
            if rules.is_excluded(channel) {
                agg.excluded.insert(channel.peer.clone());
                continue;
            }
            let col = agg
                .collections
                .entry(channel.peer.clone())
                .or_insert_with(|| ChannelCollection::new(channel.peer.clone(), rules.new_channel_rule(&channel.peer)));
            col.add(channel.clone(), last_policies.get(&channel.channel_id), snapshot.block_height);
        }
        agg
    }

    /// Peers under control: at least one announced, non-excluded channel.
    pub fn controlled(&self) -> impl Iterator<Item = (&PeerId, &ChannelCollection)> {
        self.collections.iter().filter(|(_, c)| !c.is_private_only())
    }

    pub fn collection(&self, peer: &PeerId) -> Option<&ChannelCollection> {
        self.collections.get(peer).filter(|c| !c.is_private_only())
    }

    /// Peers with at least one excluded channel.
    pub fn excluded_peers(&self) -> &BTreeSet<PeerId> {
        &self.excluded
    }

    /// Remote share (ppm) the node holds on peers without explicit target,
    /// after removing what peers with explicit targets account for.
    pub fn target_default<R: PeerRules>(&self, rules: &R) -> f64 {
        let (mut local, mut total) = (0.0, 0.0);
        let (mut known_total, mut known_weighted) = (0.0, 0.0);
        for (peer, col) in self.controlled() {
            let out = col.liquidity_out() as f64;
            let sum = out + col.liquidity_in() as f64;
            local += out;
            total += sum;
            if let Some(target) = rules.explicit_target(peer) {
                known_total += sum;
                known_weighted += sum * target;
            }
        }
        let rest = total - known_total;
        if rest <= 0.0 {
            return TARGET_DEFAULT_PPM;
        }
        let target = (PPM_UNIT * (total - local) - known_weighted) / rest;
        target.clamp(0.0, PPM_UNIT)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
