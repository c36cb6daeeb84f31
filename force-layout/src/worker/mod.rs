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
//! Worker threads, task scheduling and chunked layout
//!
//! - [`WorkerPool`]: named workers per [`TaskCategory`], a supervisor for
//!   liveness and restarts, and [`TaskHandle`] results that can be awaited or
//!   waited on
//! - [`ChunkedLayout`]: repulsion split into contiguous chunks across the
//!   layout workers
//!
//! Each worker thread owns a [`WorkerContext`] with its own octree cell pool,
//! so payloads never contend for allocation.

mod layout;
mod pool;
mod runner;
mod task;

pub use layout::{partition, ChunkReport, ChunkedLayout, LayoutStep};
pub use pool::{PoolSettings, SelectionStrategy, WorkerPool};
pub use runner::WorkerSnapshot;
pub use task::{Payload, Priority, TaskCategory, TaskHandle, TaskId, WorkerContext};

pub(crate) use task::ResultSlot;
