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
//! Motion integration
//!
//! Layout bodies have no inertia worth modelling: every body has unit mass,
//! force is scaled by `alpha` and velocity is damped each step, so the system
//! cools toward a rest state instead of oscillating forever.

use super::store::BodyStore;
use crate::math::{Axis, Vec3};

/// Kinetic energy of unit-mass bodies, `0.5 * Σ|v|²`
pub fn kinetic_energy(velocities: &[Vec3]) -> f64 {
    0.5 * velocities.iter().map(|v| v.length_squared()).sum::<f64>()
}

/// Trait for integration schemes
///
/// Integrators consume the forces accumulated in the store and update
/// velocities and positions in place.
pub trait Integrator: Send + Sync {
    /// Name used in log output
    fn name(&self) -> &str;

    /// Integration step
    fn timestep(&self) -> f64;

    /// Advance every body by one step, returning the resulting kinetic energy
    fn step(&self, store: &mut BodyStore, alpha: f64) -> f64;
}

/// Semi-implicit Euler with velocity damping and a speed clamp
///
/// ```text
/// f  = alpha * F - v * damping
/// v' = clamp(v + f * dt, max_speed)
/// x' = x + v' * dt
/// ```
///
/// Pinned axes are set to their pin value and carry no velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedEuler {
    time_step: f64,
    damping: f64,
    max_speed: f64,
}

impl DampedEuler {
    /// Create a new integrator
    ///
    /// # Panics
    ///
    /// Panics if `time_step` is non-positive or not finite.
    pub fn new(time_step: f64, damping: f64, max_speed: f64) -> Self {
        assert!(
            time_step > 0.0 && time_step.is_finite(),
            "Timestep must be positive and finite"
        );
        DampedEuler {
            time_step,
            damping,
            max_speed,
        }
    }
}

impl Integrator for DampedEuler {
    fn name(&self) -> &str {
        "damped-euler"
    }

    fn timestep(&self) -> f64 {
        self.time_step
    }

    fn step(&self, store: &mut BodyStore, alpha: f64) -> f64 {
        let dt = self.time_step;
        let (positions, velocities, forces, pins) = store.motion_mut();
        let mut energy = 0.0;

        for i in 0..positions.len() {
            let v = velocities[i];
            let f = forces[i] * alpha - v * self.damping;
            let mut v = (v + f * dt).clamp_length(self.max_speed);

            for axis in Axis::ALL {
                match pins[i][axis.index()] {
                    Some(fixed) => {
                        positions[i].set(axis, fixed);
                        v.set(axis, 0.0);
                    }
                    None => {
                        let p = positions[i].get(axis) + v.get(axis) * dt;
                        positions[i].set(axis, p);
                    }
                }
            }

            velocities[i] = v;
            energy += 0.5 * v.length_squared();
        }
        energy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Body;

    fn store_with(bodies: &[Body]) -> BodyStore {
        BodyStore::from_bodies(bodies).unwrap()
    }

    #[test]
    fn test_step_applies_alpha_and_damping() {
        let mut store = store_with(&[Body::new(1, Vec3::ZERO).with_velocity(Vec3::new(1.0, 0.0, 0.0))]);
        store.forces_mut()[0] = Vec3::new(2.0, 0.0, 0.0);

        let integrator = DampedEuler::new(1.0, 0.5, 100.0);
        integrator.step(&mut store, 0.5);

        // f = 0.5 * 2 - 1 * 0.5 = 0.5, v = 1.5, x = 1.5
        assert!((store.velocities()[0].x - 1.5).abs() < 1e-12);
        assert!((store.positions()[0].x - 1.5).abs() < 1e-12);
    }

    #[test]
    fn test_speed_clamp() {
        let mut store = store_with(&[Body::new(1, Vec3::ZERO)]);
        store.forces_mut()[0] = Vec3::new(1e6, 1e6, 0.0);

        let integrator = DampedEuler::new(1.0, 0.0, 10.0);
        integrator.step(&mut store, 1.0);

        assert!((store.velocities()[0].length() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_pinned_axis_is_authoritative() {
        let body = Body::new(1, Vec3::ZERO).pinned(Axis::Z, 7.0);
        let mut store = store_with(&[body]);
        store.forces_mut()[0] = Vec3::new(1.0, 1.0, 1.0);

        let integrator = DampedEuler::new(1.0, 0.0, 100.0);
        for _ in 0..5 {
            integrator.step(&mut store, 1.0);
        }

        assert_eq!(store.positions()[0].z, 7.0);
        assert_eq!(store.velocities()[0].z, 0.0);
        assert!(store.positions()[0].x > 0.0);
    }

    #[test]
    fn test_kinetic_energy() {
        let v = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 2.0, 0.0)];
        assert!((kinetic_energy(&v) - 2.5).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "Timestep must be positive and finite")]
    fn test_invalid_timestep_panics() {
        DampedEuler::new(0.0, 0.4, 1.0);
    }
}
