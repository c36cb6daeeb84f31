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
//! Repulsion split across layout workers
//!
//! Positions travel to the workers through a [`SharedBuffer`]. Each chunk
//! task reads every position, builds its own octree from its worker's cell
//! pool, writes forces for its own index range back to the buffer and then
//! arrives at a [`Rendezvous`] the coordinator waits on.

use super::pool::WorkerPool;
use super::task::{Priority, TaskCategory};
use crate::buffer::{Field, Rendezvous, SharedBuffer};
use crate::config::ForceMode;
use crate::engine::{exact_repulsion, tree_repulsion};
use crate::error::TaskError;
use crate::math::Vec3;
use crate::pool::PoolConfig;
use crate::spatial::{cell_pool, CellPool, ForceLaw, Octree};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Split `0..len` into at most `chunks` contiguous ranges of near-equal size
///
/// Earlier ranges take the remainder. An empty input gives no ranges.
pub fn partition(len: usize, chunks: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let chunks = chunks.clamp(1, len);
    let base = len / chunks;
    let extra = len % chunks;
    let mut start = 0;
    (0..chunks)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let range = start..start + size;
            start += size;
            range
        })
        .collect()
}

/// What one chunk task reports back
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkReport {
    /// Chunk number
    pub chunk: usize,
    /// Body indices the chunk covered
    pub range: Range<usize>,
    /// Cells in the chunk's octree (0 in exact mode)
    pub cells: usize,
    /// Worker that ran it, or `"inline"`
    pub worker: String,
    /// Repulsion for each body in `range`
    pub forces: Vec<Vec3>,
}

/// Result of one distributed repulsion pass
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutStep {
    /// Repulsion on every body, by dense index
    pub repulsion: Vec<Vec3>,
    /// Largest octree any chunk built
    pub cell_count: usize,
    /// Per-chunk reports in chunk order
    pub reports: Vec<ChunkReport>,
    /// Chunks that failed on the pool and were recomputed inline
    pub failed_chunks: Vec<usize>,
    /// Chunks that arrived at the rendezvous before the wait ended
    pub arrived: u32,
    /// Wall time of the pass
    pub elapsed: Duration,
}

/// Coordinator for chunked repulsion on a [`WorkerPool`]
pub struct ChunkedLayout {
    buffer: SharedBuffer,
    chunks: usize,
    timeout: Duration,
    cells: CellPool,
    octree: Octree,
    positions: Vec<Vec3>,
}

impl ChunkedLayout {
    /// Coordinator over `buffer`, split into `chunks` tasks that each get `timeout`
    pub fn new(buffer: SharedBuffer, chunks: usize, timeout: Duration) -> Self {
        ChunkedLayout {
            buffer,
            chunks: chunks.max(1),
            timeout,
            cells: cell_pool(PoolConfig::default()),
            octree: Octree::new(),
            positions: Vec::new(),
        }
    }

    /// The shared buffer positions are read from
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Number of chunks per pass
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Compute repulsion for every body in the buffer
    ///
    /// Positions must already be published to the buffer. `charges` is
    /// indexed like the buffer. A chunk that fails on the pool, times out or
    /// finds no healthy worker is recomputed on the calling thread, so the
    /// result is always complete.
    pub fn compute(
        &mut self,
        pool: &WorkerPool,
        charges: Arc<[f64]>,
        theta: f64,
        law: ForceLaw,
        mode: ForceMode,
    ) -> LayoutStep {
        let start = Instant::now();
        let len = self.buffer.len().min(charges.len());
        let ranges = partition(len, self.chunks);
        let rendezvous = Arc::new(Rendezvous::new());

        let handles: Vec<_> = ranges
            .iter()
            .enumerate()
            .map(|(chunk, range)| {
                let buffer = self.buffer.clone();
                let charges = Arc::clone(&charges);
                let rendezvous = Arc::clone(&rendezvous);
                let range = range.clone();
                pool.submit_task(TaskCategory::Layout, Priority::High, Some(self.timeout), move |ctx| {
                    let mut positions = Vec::with_capacity(len);
                    buffer.read_field(Field::Position, &mut positions);
                    positions.truncate(len);
                    let charges = &charges[..len];

                    let mut forces = vec![Vec3::ZERO; range.len()];
                    let cells = match mode {
                        ForceMode::BarnesHut => {
                            let mut octree = Octree::new();
                            octree.rebuild(&positions, charges, ctx.cell_pool());
                            tree_repulsion(&octree, theta, &law, range.clone(), &mut forces);
                            let cells = octree.cell_count();
                            octree.release(ctx.cell_pool());
                            cells
                        }
                        ForceMode::Exact => {
                            exact_repulsion(&positions, charges, &law, range.clone(), &mut forces);
                            0
                        }
                    };
                    for (index, force) in range.clone().zip(&forces) {
                        buffer.store_vec3(index, Field::Force, *force);
                    }
                    rendezvous.arrive();
                    Ok(ChunkReport {
                        chunk,
                        range: range.clone(),
                        cells,
                        worker: ctx.name().to_string(),
                        forces,
                    })
                })
            })
            .collect();

        let expected = handles.len() as u32;
        if !rendezvous.wait(expected, self.timeout) {
            debug!(
                arrived = rendezvous.count(),
                expected,
                "rendezvous wait ended before every chunk arrived"
            );
        }
        let arrived = rendezvous.count();

        let mut repulsion = vec![Vec3::ZERO; len];
        let mut reports = Vec::with_capacity(ranges.len());
        let mut failed_chunks = Vec::new();
        let mut cell_count = 0;

        for ((chunk, range), handle) in ranges.into_iter().enumerate().zip(handles) {
            match handle.wait() {
                Ok(report) => {
                    repulsion[range].copy_from_slice(&report.forces);
                    cell_count = cell_count.max(report.cells);
                    reports.push(report);
                }
                Err(error) => {
                    log_failure(chunk, &error);
                    failed_chunks.push(chunk);
                    let report = self.inline_chunk(chunk, range.clone(), &charges[..len], theta, &law, mode);
                    repulsion[range].copy_from_slice(&report.forces);
                    cell_count = cell_count.max(report.cells);
                    reports.push(report);
                }
            }
        }
        if !failed_chunks.is_empty() {
            self.octree.release(&mut self.cells);
        }

        LayoutStep {
            repulsion,
            cell_count,
            reports,
            failed_chunks,
            arrived,
            elapsed: start.elapsed(),
        }
    }

    fn inline_chunk(
        &mut self,
        chunk: usize,
        range: Range<usize>,
        charges: &[f64],
        theta: f64,
        law: &ForceLaw,
        mode: ForceMode,
    ) -> ChunkReport {
        let len = charges.len();
        if self.positions.len() != len || !self.octree.is_aggregated() {
            self.buffer.read_field(Field::Position, &mut self.positions);
            self.positions.truncate(len);
            if mode == ForceMode::BarnesHut {
                self.octree.rebuild(&self.positions, charges, &mut self.cells);
            }
        }

        let mut forces = vec![Vec3::ZERO; range.len()];
        let cells = match mode {
            ForceMode::BarnesHut => {
                tree_repulsion(&self.octree, theta, law, range.clone(), &mut forces);
                self.octree.cell_count()
            }
            ForceMode::Exact => {
                exact_repulsion(&self.positions, charges, law, range.clone(), &mut forces);
                0
            }
        };
        for (index, force) in range.clone().zip(&forces) {
            self.buffer.store_vec3(index, Field::Force, *force);
        }
        ChunkReport {
            chunk,
            range,
            cells,
            worker: "inline".to_string(),
            forces,
        }
    }
}

fn log_failure(chunk: usize, error: &TaskError) {
    match error {
        TaskError::Timeout(_) | TaskError::WorkerFault { .. } | TaskError::NoHealthyWorker(_) => {
            warn!(chunk, %error, "layout chunk failed, recomputing inline")
        }
        _ => debug!(chunk, %error, "layout chunk failed, recomputing inline"),
    }
}

impl std::fmt::Debug for ChunkedLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedLayout")
            .field("bodies", &self.buffer.len())
            .field("chunks", &self.chunks)
            .field("timeout", &self.timeout)
            .finish()
    }
}
