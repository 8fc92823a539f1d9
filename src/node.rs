// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Node collaborator -- snapshot retrieval and policy broadcast.
//!
//! The engine talks to the routing node through [`NodeClient`] only. Two
//! implementations ship with the crate: [`JsonFileNode`], which reads a
//! snapshot exported by the node and appends updates as JSON lines for an
//! external broadcaster, and [`MemoryNode`], which applies updates to an
//! in-process snapshot.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::snapshot::{LiquiditySnapshot, PolicyUpdate};

#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed node data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("node rejected update for channel {channel}: {reason}")]
    Rejected { channel: u64, reason: String },
}

pub trait NodeClient {
    /// Liquidity and policies at the start of a tick.
    fn snapshot(&mut self) -> Result<LiquiditySnapshot, NodeError>;

    /// Broadcast the accepted policy updates.
    fn broadcast(&mut self, updates: &[PolicyUpdate]) -> Result<(), NodeError>;
}

// ---------------------------------------------------------------------------
// JsonFileNode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct JsonFileNode {
    snapshot_path: PathBuf,
    updates_path: PathBuf,
}

impl JsonFileNode {
    pub fn new(snapshot_path: impl Into<PathBuf>, updates_path: impl Into<PathBuf>) -> Self {
        Self { snapshot_path: snapshot_path.into(), updates_path: updates_path.into() }
    }
}

impl NodeClient for JsonFileNode {
    fn snapshot(&mut self) -> Result<LiquiditySnapshot, NodeError> {
        let data = fs::read_to_string(&self.snapshot_path)
            .map_err(|source| NodeError::Io { path: self.snapshot_path.clone(), source })?;
        Ok(serde_json::from_str(&data)?)
    }

    fn broadcast(&mut self, updates: &[PolicyUpdate]) -> Result<(), NodeError> {
        if updates.is_empty() {
            return Ok(());
        }
        let io_err = |source| NodeError::Io { path: self.updates_path.clone(), source };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.updates_path)
            .map_err(io_err)?;
        let mut buf = String::new();
        for update in updates {
            buf.push_str(&serde_json::to_string(update)?);
            buf.push('\n');
        }
        file.write_all(buf.as_bytes()).map_err(io_err)
    }
}

// ---------------------------------------------------------------------------
// MemoryNode
// ---------------------------------------------------------------------------

/// In-process node: updates are applied to the held snapshot, which the
/// caller moves forward between ticks.
#[derive(Debug, Clone)]
pub struct MemoryNode {
    pub state: LiquiditySnapshot,
    /// Every update broadcast so far, in order.
    pub broadcasts: Vec<PolicyUpdate>,
}

impl MemoryNode {
    pub fn new(state: LiquiditySnapshot) -> Self {
        Self { state, broadcasts: Vec::new() }
    }

    /// Move the clock; policies keep their own timestamps.
    pub fn advance_to(&mut self, timestamp: DateTime<Utc>, block_height: u32) {
        self.state.timestamp = timestamp;
        self.state.block_height = block_height;
    }
}

impl NodeClient for MemoryNode {
    fn snapshot(&mut self) -> Result<LiquiditySnapshot, NodeError> {
        Ok(self.state.clone())
    }

    /// All or nothing: a batch with an unknown channel changes no policy.
    fn broadcast(&mut self, updates: &[PolicyUpdate]) -> Result<(), NodeError> {
        let now = self.state.timestamp;
        let targets = updates
            .iter()
            .map(|update| {
                self.state
                    .channels
                    .iter()
                    .position(|c| c.channel_id == update.channel_id)
                    .ok_or_else(|| NodeError::Rejected {
                        channel: update.channel_id.0,
                        reason: "unknown channel".to_string(),
                    })
            })
            .collect::<Result<Vec<usize>, NodeError>>()?;
        for (idx, update) in targets.into_iter().zip(updates) {
            self.state.channels[idx].policy = Some(update.to_policy(now));
            self.broadcasts.push(update.clone());
        }
        Ok(())
    }
}
