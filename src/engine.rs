// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Fee Engine -- one tick from snapshot to broadcast.
//!
//! Order within a tick:
//!
//! 1. snapshot from the node, state from the store
//! 2. margin controller
//! 3. per peer: error, recalibration, spread controller
//! 4. spread level and pin shift over all spreads of the tick
//! 5. composition and rate limiting per channel
//! 6. broadcast, then save the state
//!
//! Failures of a single peer are recorded in the report and leave that
//! peer's stored state untouched. Anything else aborts the tick before
//! broadcast, so the next tick retries it as a whole.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::aggregator::{ChannelAggregator, ChannelCollection};
use crate::config::{EngineConfig, PeerSettings};
use crate::controller::{
    ControllerState, Gains, MarginController, SpreadController, SpreadLevelController,
};
use crate::core_types::{ChannelId, PeerId, PPM_UNIT};
use crate::error_model::{or_neutral, ErrorModel, SpreadSample};
use crate::errors::EngineError;
use crate::node::NodeClient;
use crate::pin::{PinShift, PinShiftResolver};
use crate::rate_limit::{RateDecision, RejectReason};
use crate::snapshot::{ChannelPolicy, LiquiditySnapshot, PolicyUpdate};
use crate::store::{EngineState, Resumed, StateStore};

/// Rate changes at least this large are logged at warn level.
const LOG_THRESHOLD_PPM: i64 = 10;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct PeerReport {
    pub peer: PeerId,
    pub target: f64,
    pub error: f64,
    /// Controller spread, before level and pin shift.
    pub spread: f64,
    pub effective_spread: f64,
    pub outbound: f64,
    pub inbound: f64,
    pub gains: Gains,
    pub recalibrated: bool,
    pub forced: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PeerFailure {
    pub peer: PeerId,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub channel_id: ChannelId,
    pub outbound: Option<RejectReason>,
    pub inbound: Option<RejectReason>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    pub timestamp: DateTime<Utc>,
    pub margin: f64,
    /// Level of the spread level controller, if enabled.
    pub spread_level: Option<f64>,
    pub pin: Option<PinShift>,
    /// Set when the pin could not be resolved; the tick ran without shift.
    pub pin_error: Option<String>,
    pub peers: Vec<PeerReport>,
    pub failures: Vec<PeerFailure>,
    /// Accepted updates, broadcast or not.
    pub updates: Vec<PolicyUpdate>,
    /// Number of updates sent to the node.
    pub broadcast: usize,
    pub rejected: Vec<Rejection>,
}

impl TickReport {
    pub fn peer(&self, peer: &PeerId) -> Option<&PeerReport> {
        self.peers.iter().find(|p| &p.peer == peer)
    }
}

/// Per-peer result of the controller phase.
struct PeerStep<'a> {
    peer: PeerId,
    settings: &'a PeerSettings,
    collection: &'a ChannelCollection,
    target: f64,
    error: f64,
    state: ControllerState,
    gains: Gains,
    recalibrated: bool,
    forced: bool,
}

// ---------------------------------------------------------------------------
// FeeEngine
// ---------------------------------------------------------------------------

pub struct FeeEngine<N, S> {
    config: EngineConfig,
    node: N,
    store: S,
}

impl<N: NodeClient, S: StateStore> FeeEngine<N, S> {
    pub fn new(config: EngineConfig, node: N, store: S) -> Self {
        Self { config, node, store }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut N {
        &mut self.node
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace the configuration between ticks.
    pub fn reload(&mut self, config: EngineConfig) {
        self.config = config;
    }

    pub fn tick(&mut self) -> Result<TickReport, EngineError> {
        let snapshot = self.node.snapshot()?;
        let mut state = self.store.load()?;
        let now = snapshot.timestamp;
        let cfg = &self.config;
        let unit = cfg.engine.time_unit;

        // -- margin -----------------------------------------------------------
        let margin_ctl = MarginController::new(cfg.margin, unit)?;
        let margin_prev = state.margin.unwrap_or_else(|| margin_ctl.fresh(now));
        let margin_state = margin_ctl.advance(&margin_prev, now)?;
        let margin = margin_state.margin;

        // -- per peer ---------------------------------------------------------
        let aggregator = ChannelAggregator::from_snapshot(&snapshot, &state.policies, cfg);
        let target_default = aggregator.target_default(cfg);
        let level_prev = state.spread_level.map_or(0.0, |s| s.spread);
        let shift_prev = level_prev + state.pin_shift;

        let mut steps = Vec::new();
        let mut failures = Vec::new();
        for (peer, col) in aggregator.controlled() {
            match Self::step_peer(cfg, &state, peer, col, now, margin_prev.margin, shift_prev, target_default) {
                Ok(step) => steps.push(step),
                Err(e) if e.is_peer_local() => {
                    warn!(peer = %peer.short(), error = %e, "peer skipped this tick");
                    failures.push(PeerFailure { peer: peer.clone(), reason: e.to_string() });
                }
                Err(e) => return Err(e),
            }
        }

        // -- spread level -----------------------------------------------------
        let level_state = match SpreadLevelController::new(cfg.spread_level, unit)? {
            Some(ctl) => {
                let samples: Vec<SpreadSample> = steps
                    .iter()
                    .map(|s| SpreadSample {
                        spread: (s.state.spread + level_prev).max(-margin),
                        target_weight: s.collection.capacity() as f64 * s.target / PPM_UNIT,
                        observed_weight: s.collection.liquidity_in() as f64,
                    })
                    .collect();
                Some(ctl.advance(state.spread_level.as_ref(), now, &samples)?)
            }
            None => None,
        };
        let level = level_state.map_or(0.0, |s| s.spread);

        // -- pin --------------------------------------------------------------
        let (pin, pin_error) = match &cfg.pin {
            Some(pin_cfg) => {
                let spreads: BTreeMap<PeerId, f64> =
                    steps.iter().map(|s| (s.peer.clone(), s.state.spread + level)).collect();
                match PinShiftResolver::new(pin_cfg).resolve(&spreads, margin, |p| cfg.peer(p).composer()) {
                    Ok(shift) => (Some(shift), None),
                    Err(e @ EngineError::NoPinnablePeer { .. }) => {
                        warn!(error = %e, "pin not applied");
                        (None, Some(e.to_string()))
                    }
                    Err(e) => return Err(e),
                }
            }
            None => (None, None),
        };
        let pin_shift = pin.as_ref().map_or(0.0, |p| p.shift);
        let shift = level + pin_shift;

        // -- composition and rate limiting ------------------------------------
        let mut peers = Vec::new();
        let mut updates = Vec::new();
        let mut rejected = Vec::new();
        for step in &steps {
            let rates = step.settings.composer().compose(margin, step.state.spread, shift);
            let elapsed = step
                .collection
                .last_update()
                .map_or(i64::MAX, |t| (now - t).num_seconds());

            for channel in step.collection.controlled_channels() {
                let Some(policy) = channel.policy.filter(|_| !channel.private) else {
                    continue;
                };
                let out = step.settings.outbound.evaluate(policy.fee_rate_ppm, rates.outbound, elapsed, step.forced);
                let inb = if cfg.engine.set_inbound {
                    Some(step.settings.inbound.evaluate(policy.inbound_fee_rate_ppm, rates.inbound, elapsed, step.forced))
                } else {
                    None
                };
                match (out.applied(), inb.and_then(|d| d.applied())) {
                    (None, None) => rejected.push(Rejection {
                        channel_id: channel.channel_id,
                        outbound: reject_reason(out),
                        inbound: inb.and_then(reject_reason),
                    }),
                    (fee, inbound) => {
                        let update = PolicyUpdate {
                            channel_id: channel.channel_id,
                            peer: step.peer.clone(),
                            fee_rate_ppm: fee.unwrap_or(policy.fee_rate_ppm),
                            base_fee_msat: policy.base_fee_msat,
                            inbound_fee_rate_ppm: inbound.unwrap_or(policy.inbound_fee_rate_ppm),
                            inbound_base_fee_msat: policy.inbound_base_fee_msat,
                        };
                        log_change(&update, &policy);
                        updates.push(update);
                    }
                }
            }

            debug!(
                peer = %step.peer.short(),
                error = step.error,
                spread = step.state.spread,
                outbound = rates.outbound,
                inbound = rates.inbound,
                "peer composed"
            );
            peers.push(PeerReport {
                peer: step.peer.clone(),
                target: step.target,
                error: step.error,
                spread: step.state.spread,
                effective_spread: rates.effective_spread,
                outbound: rates.outbound,
                inbound: rates.inbound,
                gains: step.gains,
                recalibrated: step.recalibrated,
                forced: step.forced,
            });
        }

        // -- broadcast ----------------------------------------------------------
        let outgoing: Vec<PolicyUpdate> = updates
            .iter()
            .filter(|u| cfg.broadcasts_to(&u.peer))
            .cloned()
            .collect();
        self.node.broadcast(&outgoing)?;

        // -- persist --------------------------------------------------------------
        let controlled: BTreeSet<PeerId> = aggregator.controlled().map(|(p, _)| p.clone()).collect();
        for step in &steps {
            state.peers.insert(step.peer.clone(), step.state);
        }
        state.archive_absent(&controlled);
        state.policies = observed_policies(&snapshot, &outgoing, now);
        state.margin = Some(margin_state);
        state.spread_level = level_state;
        state.pin_shift = pin_shift;
        state.last_tick = Some(now);
        self.store.save(&state)?;

        info!(
            %now,
            margin,
            level,
            shift,
            peers = peers.len(),
            failures = failures.len(),
            updates = updates.len(),
            broadcast = outgoing.len(),
            "tick complete"
        );
        Ok(TickReport {
            timestamp: now,
            margin,
            spread_level: level_state.map(|s| s.spread),
            pin,
            pin_error,
            peers,
            failures,
            broadcast: outgoing.len(),
            updates,
            rejected,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn step_peer<'a>(
        cfg: &'a EngineConfig,
        state: &EngineState,
        peer: &PeerId,
        col: &'a ChannelCollection,
        now: DateTime<Utc>,
        margin_last: f64,
        shift_last: f64,
        target_default: f64,
    ) -> Result<PeerStep<'a>, EngineError> {
        let settings = cfg.peer(peer);
        let target = settings.target.unwrap_or(target_default);
        let model = ErrorModel::new(settings.error, target)?;
        let target = model.target();
        let error = match model.error(peer, col.liquidity_in() as f64, col.liquidity_out() as f64) {
            Err(e @ EngineError::DegenerateLiquidity { .. }) => {
                warn!(error = %e, "using neutral error");
                or_neutral(Err(e))?
            }
            other => other?,
        };

        // Archived peers resume with their stored spread.
        let prior = state.resume(peer, now, cfg.engine.max_age_spread_hours);
        let recalibrate = match prior {
            None => true,
            Some(Resumed::Continued(_)) => col.ref_fee_rate_changed(),
            Some(Resumed::Archived(_)) => false,
        };
        // Undo the last tick's level and pin shift so the composed fee
        // matches the reference.
        let calibrated = || {
            settings.composer().spread_for_outbound(col.ref_fee_rate(), margin_last) - shift_last
        };
        let current = match prior.map(Resumed::state) {
            Some(mut s) => {
                if recalibrate {
                    s.recalibrate(calibrated());
                }
                s
            }
            None => ControllerState::fresh(now, error, calibrated()),
        };
        if recalibrate {
            info!(
                peer = %peer.short(),
                ref_fee_rate = col.ref_fee_rate(),
                spread = current.spread,
                "spread recalibrated to reference fee rate"
            );
        }

        let update = SpreadController::for_peer(peer, settings.ewma, cfg.engine.time_unit)?
            .advance(&current, now, error)?;
        Ok(PeerStep {
            peer: peer.clone(),
            settings,
            collection: col,
            target,
            error,
            state: update.state,
            gains: update.gains,
            recalibrated: recalibrate,
            forced: recalibrate || col.has_new_channels(),
        })
    }
}

fn reject_reason(decision: RateDecision) -> Option<RejectReason> {
    match decision {
        RateDecision::Rejected(r) => Some(r),
        RateDecision::Apply(_) => None,
    }
}

fn log_change(update: &PolicyUpdate, previous: &ChannelPolicy) {
    let out = update.fee_rate_ppm - previous.fee_rate_ppm;
    if out.abs() >= LOG_THRESHOLD_PPM {
        warn!(
            channel = %update.channel_id,
            from = previous.fee_rate_ppm,
            to = update.fee_rate_ppm,
            "fee rate changed"
        );
    }
    let inb = update.inbound_fee_rate_ppm - previous.inbound_fee_rate_ppm;
    if inb.abs() >= LOG_THRESHOLD_PPM {
        warn!(
            channel = %update.channel_id,
            from = previous.inbound_fee_rate_ppm,
            to = update.inbound_fee_rate_ppm,
            "inbound fee rate changed"
        );
    }
}

/// Policies the node holds after this tick: the snapshot, overwritten by
/// what was broadcast.
fn observed_policies(
    snapshot: &LiquiditySnapshot,
    broadcast: &[PolicyUpdate],
    now: DateTime<Utc>,
) -> BTreeMap<ChannelId, ChannelPolicy> {
    let mut policies: BTreeMap<ChannelId, ChannelPolicy> = snapshot
        .channels
        .iter()
        .filter_map(|c| c.policy.map(|p| (c.channel_id, p)))
        .collect();
    for u in broadcast {
        policies.insert(u.channel_id, u.to_policy(now));
    }
    policies
}
