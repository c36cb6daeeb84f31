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
//! Force terms of one tick
//!
//! Each function *adds* into an output slice indexed by dense body index, so
//! the terms can be accumulated in any order.
//!
//! # Parallelism
//!
//! With the `parallel` feature the repulsion pass fans out over rayon. Every
//! body's result is written to its own slot, so the outcome is identical to
//! the sequential path.

use crate::math::Vec3;
use crate::spatial::{brute_force, jiggle, ForceLaw, Octree};
use std::ops::Range;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A link with both ends mapped to dense indices and its parameters resolved
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLink {
    /// Dense index of the source
    pub source: usize,
    /// Dense index of the target
    pub target: usize,
    /// Rest distance for this tick
    pub rest_distance: f64,
    /// Strength for this tick
    pub strength: f64,
}

/// Add octree repulsion for bodies `range` into `out`
///
/// `out[i]` receives the force on body `range.start + i`.
///
/// # Panics
///
/// Panics if `out` is shorter than `range`.
pub fn tree_repulsion(octree: &Octree, theta: f64, law: &ForceLaw, range: Range<usize>, out: &mut [Vec3]) {
    let start = range.start;
    let out = &mut out[..range.len()];

    #[cfg(feature = "parallel")]
    {
        out.par_iter_mut()
            .enumerate()
            .for_each_init(Vec::new, |stack, (i, f)| {
                *f += octree.force_with(start + i, theta, law, stack)
            });
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut stack = Vec::new();
        for (i, f) in out.iter_mut().enumerate() {
            *f += octree.force_with(start + i, theta, law, &mut stack);
        }
    }
}

/// Add exact pairwise repulsion for bodies `range` into `out`
pub fn exact_repulsion(
    positions: &[Vec3],
    charges: &[f64],
    law: &ForceLaw,
    range: Range<usize>,
    out: &mut [Vec3],
) {
    let start = range.start;
    let out = &mut out[..range.len()];

    #[cfg(feature = "parallel")]
    {
        out.par_iter_mut()
            .enumerate()
            .for_each(|(i, f)| *f += brute_force(positions, charges, start + i, law));
    }

    #[cfg(not(feature = "parallel"))]
    {
        for (i, f) in out.iter_mut().enumerate() {
            *f += brute_force(positions, charges, start + i, law);
        }
    }
}

/// Add spring forces pulling linked bodies toward their rest distance
///
/// Each end receives half of the correction. Self-loops are skipped.
pub fn springs(links: &[ResolvedLink], positions: &[Vec3], out: &mut [Vec3]) {
    for link in links {
        let (s, t) = (link.source, link.target);
        if s == t {
            continue;
        }
        let delta = positions[t] - positions[s];
        let distance = delta.length();
        let direction = if distance > 0.0 {
            delta * (1.0 / distance)
        } else {
            jiggle(t, s)
        };
        let pull = direction * ((distance - link.rest_distance) * link.strength * 0.5);
        out[s] += pull;
        out[t] -= pull;
    }
}

/// Add a pull toward the origin proportional to distance from it
pub fn centering(positions: &[Vec3], strength: f64, out: &mut [Vec3]) {
    if strength == 0.0 {
        return;
    }
    for (f, &p) in out.iter_mut().zip(positions) {
        *f -= p * strength;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::PoolConfig;
    use crate::spatial::cell_pool;

    fn link(source: usize, target: usize, rest: f64, strength: f64) -> ResolvedLink {
        ResolvedLink {
            source,
            target,
            rest_distance: rest,
            strength,
        }
    }

    #[test]
    fn test_stretched_spring_pulls_together() {
        let positions = [Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)];
        let mut out = [Vec3::ZERO; 2];
        springs(&[link(0, 1, 4.0, 1.0)], &positions, &mut out);
        assert_eq!(out[0], Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(out[1], Vec3::new(-3.0, 0.0, 0.0));
    }

    #[test]
    fn test_compressed_spring_pushes_apart() {
        let positions = [Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)];
        let mut out = [Vec3::ZERO; 2];
        springs(&[link(0, 1, 5.0, 1.0)], &positions, &mut out);
        assert!(out[0].x < 0.0);
        assert!(out[1].x > 0.0);
    }

    #[test]
    fn test_coincident_link_ends_separate() {
        let positions = [Vec3::ZERO, Vec3::ZERO];
        let mut out = [Vec3::ZERO; 2];
        springs(&[link(0, 1, 5.0, 1.0)], &positions, &mut out);
        assert!(out[0].length() > 0.0);
        assert!((out[0] + out[1]).length() < 1e-12);
    }

    #[test]
    fn test_self_loop_is_inert() {
        let positions = [Vec3::new(1.0, 1.0, 1.0)];
        let mut out = [Vec3::ZERO; 1];
        springs(&[link(0, 0, 5.0, 1.0)], &positions, &mut out);
        assert_eq!(out[0], Vec3::ZERO);
    }

    #[test]
    fn test_centering() {
        let positions = [Vec3::new(10.0, -20.0, 0.0)];
        let mut out = [Vec3::ZERO; 1];
        centering(&positions, 0.1, &mut out);
        assert_eq!(out[0], Vec3::new(-1.0, 2.0, 0.0));
    }

    #[test]
    fn test_tree_and_exact_agree_on_range() {
        let positions: Vec<Vec3> = (0..20)
            .map(|i| Vec3::new(i as f64, (i * 7 % 5) as f64, (i * 3 % 11) as f64))
            .collect();
        let charges = vec![-1.0; positions.len()];
        let law = ForceLaw::new(1.0, 0.1, 1e6);
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();
        tree.rebuild(&positions, &charges, &mut pool);

        let mut approx = vec![Vec3::ZERO; 5];
        let mut exact = vec![Vec3::ZERO; 5];
        tree_repulsion(&tree, 1e-6, &law, 10..15, &mut approx);
        exact_repulsion(&positions, &charges, &law, 10..15, &mut exact);

        for (a, e) in approx.iter().zip(&exact) {
            assert!((*a - *e).length() <= 1e-9 * e.length().max(1.0));
        }
    }
}
