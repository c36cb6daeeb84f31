// Copyright 2025 John Brosnihan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//! # Force Layout
//!
//! Barnes-Hut force-directed graph layout in three dimensions.
//!
//! ## Features
//!
//! - **Pooled octree**: cells come from a per-thread [`pool::ObjectPool`] and
//!   the tree is rebuilt every tick
//! - **Force engine**: repulsion, link springs and centering with alpha
//!   cooling, damping and pinned axes
//! - **Execution modes**: inline, one background thread, or chunked across a
//!   [`worker::WorkerPool`] sharing a lock-free [`buffer::SharedBuffer`]
//! - **Adaptive theta**: [`controller::AdaptiveController`] trades accuracy
//!   for speed when ticks run over budget
//! - **Parallelization**: optional Rayon fan-out of the repulsion pass
//!
//! ## Example
//!
//! ```rust
//! use force_layout::{Body, ExecutionMode, Link, Simulation, SimulationParams, Vec3};
//!
//! let bodies = vec![
//!     Body::new(1, Vec3::new(0.0, 0.0, 0.0)),
//!     Body::new(2, Vec3::new(1.0, 0.0, 0.0)),
//!     Body::new(3, Vec3::new(0.0, 1.0, 0.0)),
//! ];
//! let links = vec![Link::new(1, 2), Link::new(2, 3)];
//!
//! let mut sim = Simulation::start(bodies, links, SimulationParams::default(), ExecutionMode::Inline).unwrap();
//! let summary = sim.run().unwrap();
//! assert!(summary.ticks > 0);
//! assert!(sim.position(1.into()).unwrap().is_finite());
//! ```

#![warn(missing_docs)]

/// Error types
pub mod error;

/// Layout parameters and execution modes
pub mod config;

/// Vector and bounding box helpers
pub mod math;

/// Memory pooling for reducing allocation churn
pub mod pool;

/// Barnes-Hut octree
pub mod spatial;

/// Lock-free shared numeric buffer
pub mod buffer;

/// Bodies, force terms and the tick loop
pub mod engine;

/// Worker threads and task scheduling
pub mod worker;

/// Adaptive theta control
pub mod controller;

/// Running a layout in one of the execution modes
pub mod simulation;

/// Visibility queries
pub mod visibility;

/// Layered placement for parent/child graphs
pub mod hierarchy;

pub use config::{ExecutionMode, ForceMode, Parameter, SimulationParams};
pub use engine::{Body, BodyId, Engine, Link, RunSummary, Snapshot, TickStats};
pub use error::{LayoutError, TaskError};
pub use math::{Aabb, Axis, Vec3};
pub use simulation::{Simulation, SimulationEvent, SimulationOptions};
