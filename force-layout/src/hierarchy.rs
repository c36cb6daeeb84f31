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
//! Layered initial placement for parent/child graphs
//!
//! Each link is read as a `source -> target` parent/child edge. Unlike the
//! force layout, which never walks links, this helper does traverse them and
//! therefore rejects cycles, self-loops included.

use crate::engine::{Body, BodyId, Link};
use crate::error::LayoutError;
use crate::math::Vec3;
use std::collections::{HashMap, VecDeque};

/// Depth of every body below its furthest root, in body order
///
/// Roots (bodies with no parent) are level 0; a child sits one level below
/// its deepest parent.
///
/// Duplicate ids and unknown link endpoints are rejected before the cycle check.
pub fn assign_levels(bodies: &[Body], links: &[Link]) -> Result<Vec<usize>, LayoutError> {
    let mut index: HashMap<BodyId, usize> = HashMap::with_capacity(bodies.len());
    for (i, body) in bodies.iter().enumerate() {
        if index.insert(body.id, i).is_some() {
            return Err(LayoutError::DuplicateBody(body.id));
        }
    }
    let mut in_degree = vec![0usize; bodies.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); bodies.len()];

    for link in links {
        let parent = *index.get(&link.source).ok_or(LayoutError::UnknownBody(link.source))?;
        let child = *index.get(&link.target).ok_or(LayoutError::UnknownBody(link.target))?;
        children[parent].push(child);
        in_degree[child] += 1;
    }

    let mut levels = vec![0usize; bodies.len()];
    let mut queue: VecDeque<usize> = (0..bodies.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;

    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &child in &children[node] {
            levels[child] = levels[child].max(levels[node] + 1);
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                queue.push_back(child);
            }
        }
    }

    if visited != bodies.len() {
        // Any body still holding an in-degree sits on or below a cycle
        let stuck = (0..bodies.len())
            .find(|&i| in_degree[i] > 0)
            .map(|i| bodies[i].id)
            .unwrap_or(BodyId(0));
        return Err(LayoutError::CycleDetected(stuck));
    }

    Ok(levels)
}

/// Copy of `bodies` placed in horizontal layers by hierarchy level
///
/// Level `k` sits at `y = -k * level_spacing`; bodies within a level are
/// spread along x, `sibling_spacing` apart and centred on the origin, in body
/// order. Pins are preserved and still override the placement.
pub fn layered_positions(
    bodies: &[Body],
    links: &[Link],
    level_spacing: f64,
    sibling_spacing: f64,
) -> Result<Vec<Body>, LayoutError> {
    let levels = assign_levels(bodies, links)?;
    let depth = levels.iter().copied().max().map_or(0, |d| d + 1);
    let mut per_level = vec![0usize; depth];
    for &level in &levels {
        per_level[level] += 1;
    }

    let mut placed = vec![0usize; depth];
    let result = bodies
        .iter()
        .zip(&levels)
        .map(|(body, &level)| {
            let slot = placed[level];
            placed[level] += 1;
            let width = (per_level[level] - 1) as f64 * sibling_spacing;
            let mut body = *body;
            body.position = Vec3::new(
                slot as f64 * sibling_spacing - width * 0.5,
                -(level as f64) * level_spacing,
                0.0,
            );
            for axis in crate::math::Axis::ALL {
                if let Some(v) = body.pin[axis.index()] {
                    body.position.set(axis, v);
                }
            }
            body
        })
        .collect();
    Ok(result)
}
