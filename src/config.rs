// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Configuration -- TOML file, per-peer group overrides, validation.
//!
//! The file form ([`ConfigFile`]) mirrors the TOML layout. [`EngineConfig`]
//! is the resolved form the engine reads: named parameter sets are looked up,
//! every group is merged onto `[peers.default]` field by field, and all
//! parameters are validated before a tick can run.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::aggregator::PeerRules;
use crate::composer::{FeeComposer, IdiosyncraticMargin, RateBounds};
use crate::controller::{MarginParams, SpreadLevelParams, SpreadParams};
use crate::core_types::{ChannelId, PeerId, TimeUnit, PPM_UNIT};
use crate::error_model::ErrorBounds;
use crate::errors::EngineError;
use crate::pin::PinConfig;
use crate::rate_limit::{NewChannelRule, RateLimit};
use crate::snapshot::ChannelSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot render TOML: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("unknown named_ewma '{name}' referenced by peers.{group}")]
    UnknownEwma { name: String, group: String },

    #[error("peer {peer} is listed in peers.{first} and peers.{second}")]
    DuplicatePeer { peer: PeerId, first: String, second: String },

    #[error("{0}")]
    Invalid(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// File form
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub interval_seconds: u64,
    pub time_unit: TimeUnit,
    /// Compute and persist without broadcasting.
    pub db_only: bool,
    /// Peers broadcast to even in `db_only` mode.
    pub no_db_only_peers: Vec<PeerId>,
    pub set_inbound: bool,
    /// Channels opened within this many blocks count as new.
    pub max_age_new_channels: u32,
    /// Archived peer state younger than this resumes instead of starting fresh.
    pub max_age_spread_hours: u32,
    pub exclude_peers: Vec<PeerId>,
    pub exclude_channels: Vec<ChannelId>,
    pub state_file: PathBuf,
    pub lock_file: PathBuf,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            interval_seconds: 3_600,
            time_unit: TimeUnit::Day,
            db_only: true,
            no_db_only_peers: Vec::new(),
            set_inbound: false,
            max_age_new_channels: 144,
            max_age_spread_hours: 0,
            exclude_peers: Vec::new(),
            exclude_channels: Vec::new(),
            state_file: PathBuf::from("fee-engine-state.json"),
            lock_file: PathBuf::from("fee-engine.lock"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Snapshot exported by the node before each tick.
    pub snapshot_file: PathBuf,
    /// Accepted updates are appended here as JSON lines.
    pub updates_file: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        Self {
            snapshot_file: PathBuf::from("node-snapshot.json"),
            updates_file: PathBuf::from("policy-updates.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: LogFormat::default() }
    }
}

/// Spread parameters inline or by `[named_ewma.<name>]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EwmaRef {
    Named(String),
    Inline(SpreadParams),
}

/// One `[peers.<group>]` table. Every field is optional and overrides the
/// default group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PeerOverrides {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<PeerId>,
    pub ewma: Option<EwmaRef>,
    pub target: Option<f64>,
    pub error_min: Option<f64>,
    pub error_max: Option<f64>,
    pub ratio_error_min: Option<f64>,
    pub ratio_error_max: Option<f64>,
    pub fee_rate_new_local: Option<f64>,
    pub fee_rate_new_remote: Option<f64>,
    pub margin_idiosyncratic: Option<f64>,
    pub margin_idiosyncratic_pct: Option<f64>,
    pub margin_idiosyncratic_min: Option<f64>,
    pub margin_idiosyncratic_max: Option<f64>,
    pub min_seconds: Option<i64>,
    pub fee_rate_min: Option<i64>,
    pub fee_rate_max: Option<i64>,
    pub fee_rate_ppm_min_up: Option<i64>,
    pub fee_rate_ppm_min_down: Option<i64>,
    pub inbound_fee_rate_min: Option<i64>,
    pub inbound_fee_rate_max: Option<i64>,
    pub inbound_fee_rate_ppm_min_up: Option<i64>,
    pub inbound_fee_rate_ppm_min_down: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub logging: LoggingConfig,
    pub node: NodeSection,
    pub margin: MarginParams,
    pub spread_level: SpreadLevelParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pin: Option<PinConfig>,
    pub named_ewma: BTreeMap<String, SpreadParams>,
    pub peers: BTreeMap<String, PeerOverrides>,
}

impl ConfigFile {
    /// Sample written by `generate-config`: every default spelled out.
    pub fn sample() -> Self {
        let d = PeerSettings::default();
        let mut named_ewma = BTreeMap::new();
        named_ewma.insert(
            "standard".to_string(),
            SpreadParams { k_t: 0.0, k_p: 40.0, k_i: 80.0, k_d: 20.0, alpha_i: 0.1, alpha_d: 2.0 },
        );
        let default_group = PeerOverrides {
            peers: Vec::new(),
            ewma: Some(EwmaRef::Named("standard".to_string())),
            target: None,
            error_min: Some(d.error.error_min),
            error_max: Some(d.error.error_max),
            ratio_error_min: Some(d.error.ratio_error_min),
            ratio_error_max: Some(d.error.ratio_error_max),
            fee_rate_new_local: Some(d.new_channel.fee_rate_local),
            fee_rate_new_remote: Some(d.new_channel.fee_rate_remote),
            margin_idiosyncratic: Some(d.idiosyncratic.ppm),
            margin_idiosyncratic_pct: Some(d.idiosyncratic.pct),
            margin_idiosyncratic_min: Some(d.idiosyncratic.min),
            margin_idiosyncratic_max: Some(d.idiosyncratic.max),
            min_seconds: Some(d.outbound.min_seconds),
            fee_rate_min: Some(d.outbound.min),
            fee_rate_max: Some(d.outbound.max),
            fee_rate_ppm_min_up: Some(d.outbound.min_up_ppm),
            fee_rate_ppm_min_down: Some(d.outbound.min_down_ppm),
            inbound_fee_rate_min: Some(d.inbound.min),
            inbound_fee_rate_max: Some(d.inbound.max),
            inbound_fee_rate_ppm_min_up: Some(d.inbound.min_up_ppm),
            inbound_fee_rate_ppm_min_down: Some(d.inbound.min_down_ppm),
        };
        let mut peers = BTreeMap::new();
        peers.insert(DEFAULT_GROUP.to_string(), default_group);
        Self {
            margin: MarginParams { k_m: 100.0, alpha: 0.5 },
            named_ewma,
            peers,
            ..Self::default()
        }
    }

    pub fn render(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

const DEFAULT_GROUP: &str = "default";

// ---------------------------------------------------------------------------
// Resolved form
// ---------------------------------------------------------------------------

/// Effective parameters of one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerSettings {
    pub ewma: SpreadParams,
    /// Explicit target (ppm of remote share); `None` uses the default target.
    pub target: Option<f64>,
    pub error: ErrorBounds,
    pub new_channel: NewChannelRule,
    pub idiosyncratic: IdiosyncraticMargin,
    pub outbound: RateLimit,
    pub inbound: RateLimit,
}

impl Default for PeerSettings {
    fn default() -> Self {
        let limit = |min, max| RateLimit { min_seconds: 86_400, min_up_ppm: 10, min_down_ppm: 10, min, max };
        Self {
            ewma: SpreadParams::default(),
            target: None,
            error: ErrorBounds::default(),
            new_channel: NewChannelRule { max_age_blocks: 144, fee_rate_local: 21_000.0, fee_rate_remote: 0.0 },
            idiosyncratic: IdiosyncraticMargin::default(),
            outbound: limit(0, 2_500),
            inbound: limit(-2_500, 0),
        }
    }
}

impl PeerSettings {
    pub fn composer(&self) -> FeeComposer {
        FeeComposer::new(
            self.idiosyncratic,
            RateBounds { min: self.outbound.min as f64, max: self.outbound.max as f64 },
            RateBounds { min: self.inbound.min as f64, max: self.inbound.max as f64 },
        )
    }

    fn apply(
        &self,
        o: &PeerOverrides,
        group: &str,
        named: &BTreeMap<String, SpreadParams>,
    ) -> Result<Self, ConfigError> {
        let mut s = self.clone();
        match &o.ewma {
            Some(EwmaRef::Inline(p)) => s.ewma = *p,
            Some(EwmaRef::Named(name)) => {
                s.ewma = *named.get(name).ok_or_else(|| ConfigError::UnknownEwma {
                    name: name.clone(),
                    group: group.to_string(),
                })?;
            }
            None => {}
        }
        if o.target.is_some() {
            s.target = o.target;
        }
        let set = |dst: &mut f64, v: Option<f64>| {
            if let Some(v) = v {
                *dst = v;
            }
        };
        set(&mut s.error.error_min, o.error_min);
        set(&mut s.error.error_max, o.error_max);
        set(&mut s.error.ratio_error_min, o.ratio_error_min);
        set(&mut s.error.ratio_error_max, o.ratio_error_max);
        set(&mut s.new_channel.fee_rate_local, o.fee_rate_new_local);
        set(&mut s.new_channel.fee_rate_remote, o.fee_rate_new_remote);
        set(&mut s.idiosyncratic.ppm, o.margin_idiosyncratic);
        set(&mut s.idiosyncratic.pct, o.margin_idiosyncratic_pct);
        set(&mut s.idiosyncratic.min, o.margin_idiosyncratic_min);
        set(&mut s.idiosyncratic.max, o.margin_idiosyncratic_max);

        let set_i = |dst: &mut i64, v: Option<i64>| {
            if let Some(v) = v {
                *dst = v;
            }
        };
        set_i(&mut s.outbound.min_seconds, o.min_seconds);
        set_i(&mut s.inbound.min_seconds, o.min_seconds);
        set_i(&mut s.outbound.min, o.fee_rate_min);
        set_i(&mut s.outbound.max, o.fee_rate_max);
        set_i(&mut s.outbound.min_up_ppm, o.fee_rate_ppm_min_up);
        set_i(&mut s.outbound.min_down_ppm, o.fee_rate_ppm_min_down);
        set_i(&mut s.inbound.min, o.inbound_fee_rate_min);
        set_i(&mut s.inbound.max, o.inbound_fee_rate_max);
        set_i(&mut s.inbound.min_up_ppm, o.inbound_fee_rate_ppm_min_up);
        set_i(&mut s.inbound.min_down_ppm, o.inbound_fee_rate_ppm_min_down);
        Ok(s)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        self.ewma.validate()?;
        self.error.validate()?;
        if let Some(t) = self.target {
            if !(0.0..=PPM_UNIT).contains(&t) {
                return Err(EngineError::invalid("target", t, "must lie within [0, 1e6] ppm"));
            }
        }
        for (name, v) in [
            ("fee_rate_new_local", self.new_channel.fee_rate_local),
            ("fee_rate_new_remote", self.new_channel.fee_rate_remote),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(EngineError::invalid(name, v, "must be finite and >= 0"));
            }
        }
        self.idiosyncratic.validate()?;
        self.outbound.validate("fee_rate")?;
        self.inbound.validate("inbound_fee_rate")?;
        if self.outbound.min < 0 {
            return Err(EngineError::invalid("fee_rate_min", self.outbound.min as f64, "must be >= 0"));
        }
        Ok(())
    }
}

/// Validated configuration the engine runs on.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub logging: LoggingConfig,
    pub node: NodeSection,
    pub margin: MarginParams,
    pub spread_level: SpreadLevelParams,
    pub pin: Option<PinConfig>,
    default_peer: PeerSettings,
    peers: BTreeMap<PeerId, PeerSettings>,
    exclude_peers: BTreeSet<PeerId>,
    exclude_channels: BTreeSet<ChannelId>,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        Self::resolve(file)
    }

    pub fn resolve(file: ConfigFile) -> Result<Self, ConfigError> {
        let base = PeerSettings::default();
        let default_peer = match file.peers.get(DEFAULT_GROUP) {
            Some(o) => base.apply(o, DEFAULT_GROUP, &file.named_ewma)?,
            None => base,
        };

        let mut peers = BTreeMap::new();
        let mut owner: BTreeMap<PeerId, String> = BTreeMap::new();
        for (group, o) in file.peers.iter().filter(|(g, _)| g.as_str() != DEFAULT_GROUP) {
            let settings = default_peer.apply(o, group, &file.named_ewma)?;
            for peer in &o.peers {
                if let Some(first) = owner.insert(peer.clone(), group.clone()) {
                    return Err(ConfigError::DuplicatePeer {
                        peer: peer.clone(),
                        first,
                        second: group.clone(),
                    });
                }
                peers.insert(peer.clone(), settings.clone());
            }
        }

        let mut default_peer = default_peer;
        default_peer.new_channel.max_age_blocks = file.engine.max_age_new_channels;
        for s in peers.values_mut() {
            s.new_channel.max_age_blocks = file.engine.max_age_new_channels;
        }

        let config = Self {
            exclude_peers: file.engine.exclude_peers.iter().cloned().collect(),
            exclude_channels: file.engine.exclude_channels.iter().copied().collect(),
            engine: file.engine,
            logging: file.logging,
            node: file.node,
            margin: file.margin,
            spread_level: file.spread_level,
            pin: file.pin,
            default_peer,
            peers,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.engine.interval_seconds == 0 {
            return Err(EngineError::invalid("interval_seconds", 0.0, "must be > 0"));
        }
        self.margin.validate()?;
        self.spread_level.validate()?;
        if let Some(pin) = &self.pin {
            if !pin.value.is_finite() {
                return Err(EngineError::invalid("pin.value", pin.value, "must be finite"));
            }
        }
        self.default_peer.validate()?;
        for s in self.peers.values() {
            s.validate()?;
        }
        Ok(())
    }

    pub fn peer(&self, peer: &PeerId) -> &PeerSettings {
        self.peers.get(peer).unwrap_or(&self.default_peer)
    }

    /// Whether updates for `peer` reach the node.
    pub fn broadcasts_to(&self, peer: &PeerId) -> bool {
        !self.engine.db_only || self.engine.no_db_only_peers.contains(peer)
    }
}

impl PeerRules for EngineConfig {
    fn is_excluded(&self, channel: &ChannelSnapshot) -> bool {
        self.exclude_peers.contains(&channel.peer) || self.exclude_channels.contains(&channel.channel_id)
    }

    fn new_channel_rule(&self, peer: &PeerId) -> NewChannelRule {
        self.peer(peer).new_channel
    }

    fn explicit_target(&self, peer: &PeerId) -> Option<f64> {
        self.peer(peer).target
    }
}

// ===========================================================================
// Tests
// ===========================================================================
