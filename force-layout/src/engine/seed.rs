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
//! Initial placement helpers

use crate::math::Vec3;

/// `n` points spread evenly over a sphere of `radius` around the origin
///
/// Uses the golden-angle spiral, so no two points coincide and the result is
/// deterministic.
pub fn fibonacci_sphere(n: usize, radius: f64) -> Vec<Vec3> {
    let golden_ratio = (1.0 + 5.0_f64.sqrt()) / 2.0;
    let count = n as f64;
    (0..n)
        .map(|i| {
            let i = i as f64;
            let theta = 2.0 * std::f64::consts::PI * i / golden_ratio;
            let phi = (1.0 - 2.0 * (i + 0.5) / count).acos();
            Vec3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_lie_on_sphere() {
        for p in fibonacci_sphere(50, 10.0) {
            assert!((p.length() - 10.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_points_are_distinct() {
        let points = fibonacci_sphere(100, 1.0);
        for (i, a) in points.iter().enumerate() {
            for b in &points[i + 1..] {
                assert!(a.distance(*b) > 1e-3);
            }
        }
    }

    #[test]
    fn test_empty() {
        assert!(fibonacci_sphere(0, 5.0).is_empty());
    }
}
