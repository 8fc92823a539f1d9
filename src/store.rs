// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Persistence collaborator -- controller state between ticks.
//!
//! The whole [`EngineState`] is loaded once at tick start and saved once at
//! tick end. The file store writes to a `.tmp` sibling and renames it over
//! the target, so a crash never leaves a half-written state behind.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::{ControllerState, MarginState};
use crate::core_types::{ChannelId, PeerId};
use crate::snapshot::ChannelPolicy;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt state file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Everything the engine carries from one tick to the next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineState {
    /// Start of the last completed tick.
    pub last_tick: Option<DateTime<Utc>>,
    pub margin: Option<MarginState>,
    pub spread_level: Option<ControllerState>,
    /// Pin shift applied in the last tick; zero without a pin.
    pub pin_shift: f64,
    /// Peers controlled in the last tick.
    pub peers: BTreeMap<PeerId, ControllerState>,
    /// Last state of peers that dropped out of control.
    pub archived: BTreeMap<PeerId, ControllerState>,
    /// Last policy the engine broadcast or observed per channel.
    pub policies: BTreeMap<ChannelId, ChannelPolicy>,
}

/// Stored state a peer continues from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resumed {
    /// Controlled in the last tick.
    Continued(ControllerState),
    /// Back from the archive.
    Archived(ControllerState),
}

impl Resumed {
    pub fn state(self) -> ControllerState {
        match self {
            Resumed::Continued(s) | Resumed::Archived(s) => s,
        }
    }
}

impl EngineState {
    /// State to continue `peer` from at `now`. Peers controlled in the last
    /// tick continue; archived peers resume only if their state is at most
    /// `max_age_hours` old.
    pub fn resume(&self, peer: &PeerId, now: DateTime<Utc>, max_age_hours: u32) -> Option<Resumed> {
        if let Some(s) = self.peers.get(peer) {
            return Some(Resumed::Continued(*s));
        }
        self.archived
            .get(peer)
            .filter(|s| now - s.timestamp <= Duration::hours(i64::from(max_age_hours)))
            .map(|s| Resumed::Archived(*s))
    }

    /// Move peers not in `current` to the archive.
    pub fn archive_absent(&mut self, current: &BTreeSet<PeerId>) {
        let absent: Vec<PeerId> = self
            .peers
            .keys()
            .filter(|p| !current.contains(*p))
            .cloned()
            .collect();
        for peer in absent {
            if let Some(s) = self.peers.remove(&peer) {
                self.archived.insert(peer, s);
            }
        }
        for peer in current {
            self.archived.remove(peer);
        }
    }
}

pub trait StateStore {
    /// Last saved state; empty if nothing was saved yet.
    fn load(&mut self) -> Result<EngineState, StoreError>;
    fn save(&mut self, state: &EngineState) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub state: EngineState,
    pub saves: usize,
}

impl StateStore for MemoryStore {
    fn load(&mut self) -> Result<EngineState, StoreError> {
        Ok(self.state.clone())
    }

    fn save(&mut self, state: &EngineState) -> Result<(), StoreError> {
        self.state = state.clone();
        self.saves += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl StateStore for JsonFileStore {
    fn load(&mut self) -> Result<EngineState, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(EngineState::default()),
            Err(source) => Err(StoreError::Io { path: self.path.clone(), source }),
        }
    }

    fn save(&mut self, state: &EngineState) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(state)?;
        let tmp = self.tmp_path();
        fs::write(&tmp, json).map_err(|source| StoreError::Io { path: tmp.clone(), source })?;
        fs::rename(&tmp, &self.path).map_err(|source| StoreError::Io { path: self.path.clone(), source })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
