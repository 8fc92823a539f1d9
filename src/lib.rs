// Copyright 2026 Hypermesh Foundation. All rights reserved.
// Fee Engine: margin/spread fee control for routing nodes

pub mod core_types;
pub mod errors;
pub mod controller;
pub mod error_model;
pub mod composer;
pub mod pin;
pub mod rate_limit;

// Boundary: node, persistence, configuration, orchestration
pub mod snapshot;
pub mod aggregator;
pub mod node;
pub mod store;
pub mod config;
pub mod lock;
pub mod engine;

pub use composer::{ComposedRates, FeeComposer};
pub use config::{ConfigError, EngineConfig};
pub use core_types::{ChannelId, PeerId, TimeUnit};
pub use engine::{FeeEngine, TickReport};
pub use errors::EngineError;
