// Copyright © 2026 Hypermesh Foundation. All rights reserved.
// Licensed under the Business Source License 1.1.
// See the LICENSE file in the repository root for full license text.

//! Controllers of the fee engine.
//!
//! - `accumulator`: exact exponential accumulators over irregular steps.
//! - `spread`: per-peer drift/P/I/D controller on the liquidity error.
//! - `margin`: node-wide mean-reverting margin.
//! - `spread_level`: optional proportional controller on the aggregate
//!   depletion signal, shifting every spread by a common level.
//!
//! Controllers hold parameters only. Their state is passed in and returned
//! so that the caller decides when it becomes durable.

pub mod accumulator;
pub mod margin;
pub mod params;
pub mod spread;
pub mod spread_level;

pub use accumulator::{AccumulatorMode, AccumulatorState, ExponentialAccumulator, Step};
pub use margin::{MarginController, MarginState};
pub use params::{MarginParams, SpreadParams};
pub use spread::{ControllerState, Gains, SpreadController, SpreadUpdate};
pub use spread_level::{SpreadLevelController, SpreadLevelParams};
