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
//! Pairwise repulsion law
//!
//! Bodies repel like charges in Coulomb's law:
//!
//! **F = k * q₁ * q₂ / d²**
//!
//! directed along the separation vector. Two bodies with charges of the same
//! sign push each other apart. The distance is clamped to
//! `[min_distance, max_distance]`: the lower bound removes the singularity
//! when bodies overlap and the upper bound keeps distant clusters from
//! producing vanishingly small, noisy terms.

use crate::math::Vec3;

/// Parameters of the repulsion law
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForceLaw {
    /// Scale factor `k`
    pub strength: f64,
    /// Lower clamp on the separation distance
    pub min_distance: f64,
    /// Upper clamp on the separation distance
    pub max_distance: f64,
}

impl ForceLaw {
    /// Create a new force law
    pub fn new(strength: f64, min_distance: f64, max_distance: f64) -> Self {
        ForceLaw {
            strength,
            min_distance,
            max_distance,
        }
    }

    /// Force on a charge `q` at `target` exerted by a point charge `source_q` at `source`
    ///
    /// `fallback` is the unit direction used when the two points coincide.
    pub fn point(&self, target: Vec3, source: Vec3, q: f64, source_q: f64, fallback: Vec3) -> Vec3 {
        let delta = target - source;
        let distance = delta.length();
        let direction = if distance > 0.0 {
            delta * (1.0 / distance)
        } else {
            fallback
        };
        let d = distance.clamp(self.min_distance, self.max_distance);
        direction * (self.strength * q * source_q / (d * d))
    }
}

impl Default for ForceLaw {
    fn default() -> Self {
        ForceLaw::new(1000.0, 1.0, f64::INFINITY)
    }
}

/// Deterministic unit direction separating two coincident bodies
///
/// `jiggle(a, b) == -jiggle(b, a)`, so coincident pairs push each other
/// apart symmetrically.
pub fn jiggle(a: usize, b: usize) -> Vec3 {
    let (lo, hi, sign) = if a < b { (a, b, 1.0) } else { (b, a, -1.0) };
    let mut state = ((lo as u64) << 32) ^ (hi as u64);
    let mut next = || {
        state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
        let mut z = state;
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^= z >> 31;
        (z >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    };
    let v = Vec3::new(next(), next(), next());
    let len = v.length();
    if len > 1e-9 {
        v * (sign / len)
    } else {
        Vec3::new(sign, 0.0, 0.0)
    }
}

/// Exact O(n²) repulsion on one body, used as the reference for the octree
pub fn brute_force(positions: &[Vec3], charges: &[f64], body: usize, law: &ForceLaw) -> Vec3 {
    let target = positions[body];
    let q = charges[body];
    let mut total = Vec3::ZERO;
    for (other, (&p, &c)) in positions.iter().zip(charges).enumerate() {
        if other == body {
            continue;
        }
        total += law.point(target, p, q, c, jiggle(body, other));
    }
    total
}
