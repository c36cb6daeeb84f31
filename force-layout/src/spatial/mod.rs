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
//! Spatial index for Barnes-Hut repulsion
//!
//! This module provides:
//! - [`Octree`]: pooled octree rebuilt every tick
//! - [`ForceLaw`]: the clamped inverse-square repulsion law
//! - [`brute_force`]: the exact pairwise reference
//!
//! # Accuracy vs speed
//!
//! `theta` near 0 approaches the O(n²) pairwise sum; near 1 it is cheapest
//! and least accurate. Values around 0.5 to 0.9 are typical for layout.

mod cell;
mod law;
mod octree;

pub use cell::{cell_pool, Bounds, Cell, CellContent, CellId, CellPool};
pub use law::{brute_force, jiggle, ForceLaw};
pub use octree::{AggregateViolation, Octree, MAX_DEPTH};
