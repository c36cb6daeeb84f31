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
//! Force and integration engine
//!
//! One [`Engine::tick`]:
//!
//! 1. rebuilds and aggregates the octree from current positions
//! 2. evaluates repulsion for every body through the octree
//! 3. adds link springs and the centering pull
//! 4. integrates with damping, the speed clamp and pinned axes
//! 5. decays `alpha`
//!
//! The engine halts once `alpha < alpha_min` or the tick cap is reached.
//! Single-threaded ticks with identical inputs produce bit-identical
//! positions.
//!
//! # Example
//!
//! ```
//! use force_layout::config::SimulationParams;
//! use force_layout::engine::{Body, Engine, Link};
//! use force_layout::math::Vec3;
//!
//! let bodies = vec![
//!     Body::new(1, Vec3::new(0.0, 0.0, 0.0)),
//!     Body::new(2, Vec3::new(1.0, 0.0, 0.0)),
//! ];
//! let links = vec![Link::new(1, 2)];
//! let mut engine = Engine::new(bodies, links, SimulationParams::default()).unwrap();
//!
//! let summary = engine.run();
//! assert!(engine.is_converged());
//! assert!(summary.ticks <= 300);
//! ```

mod body;
mod forces;
mod integrate;
mod seed;
mod store;

pub use body::{Body, BodyId, Link, Pin, DEFAULT_CHARGE, DEFAULT_REST_DISTANCE};
pub use forces::{centering, exact_repulsion, springs, tree_repulsion, ResolvedLink};
pub use integrate::{kinetic_energy, DampedEuler, Integrator};
pub use seed::fibonacci_sphere;
pub use store::BodyStore;

use crate::buffer::{Field, SharedBuffer};
use crate::config::{validate_theta, ForceMode, Parameter, SimulationParams};
use crate::error::LayoutError;
use crate::math::{Axis, Vec3};
use crate::pool::{PoolConfig, PoolStats};
use crate::spatial::{cell_pool, CellPool, ForceLaw, Octree};
use crate::visibility::{self, ViewVolume};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Diagnostics for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TickStats {
    /// Ticks completed since the start of the run, including this one
    pub tick: u32,
    /// Wall time spent in the tick
    pub duration: Duration,
    /// Octree cells built, zero in exact mode
    pub cell_count: usize,
    /// Alpha after the tick's decay
    pub alpha: f64,
    /// Opening threshold used
    pub theta: f64,
    /// `0.5 * Σ|v|²` after integration
    pub kinetic_energy: f64,
}

/// Positions of every body at a tick boundary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Tick the snapshot was taken after
    pub tick: u32,
    /// Alpha at the time of the snapshot
    pub alpha: f64,
    /// Ids in dense order
    pub ids: Arc<[BodyId]>,
    /// Positions in dense order
    pub positions: Vec<Vec3>,
}

impl Snapshot {
    /// Position of one body
    pub fn position(&self, id: BodyId) -> Option<Vec3> {
        let index = self.ids.iter().position(|&i| i == id)?;
        self.positions.get(index).copied()
    }

    /// Iterate `(id, position)` pairs in dense order
    pub fn iter(&self) -> impl Iterator<Item = (BodyId, Vec3)> + '_ {
        self.ids.iter().copied().zip(self.positions.iter().copied())
    }

    /// Number of bodies
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the snapshot holds no bodies
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    /// Ticks completed
    pub ticks: u32,
    /// Final alpha
    pub alpha: f64,
    /// Alpha dropped below `alpha_min` (as opposed to hitting the tick cap)
    pub reached_alpha_min: bool,
    /// The run was stopped before it halted on its own
    pub stopped: bool,
    /// Kinetic energy after the last tick
    pub kinetic_energy: f64,
    /// Wall time of the run
    pub elapsed: Duration,
}

/// Single-threaded force layout over a fixed set of bodies
pub struct Engine {
    store: BodyStore,
    ids: Arc<[BodyId]>,
    links: Vec<Link>,
    resolved: Vec<ResolvedLink>,
    params: SimulationParams,
    law: ForceLaw,
    integrator: DampedEuler,
    octree: Octree,
    pool: CellPool,
    charge: Option<Parameter<Body>>,
    link_strength: Option<Parameter<Link>>,
    link_distance: Option<Parameter<Link>>,
    charges: Vec<f64>,
    alpha: f64,
    ticks: u32,
    kinetic_energy: f64,
    last: Option<TickStats>,
}

impl Engine {
    /// Validate inputs and set up the engine
    ///
    /// Fails if a parameter is out of range, a body is invalid or duplicated,
    /// or a link names an id that is not in `bodies`.
    pub fn new(bodies: Vec<Body>, links: Vec<Link>, params: SimulationParams) -> Result<Self, LayoutError> {
        Self::with_cell_pool(bodies, links, params, cell_pool(PoolConfig::default()))
    }

    /// Like [`Engine::new`] with a caller-supplied cell pool
    pub fn with_cell_pool(
        bodies: Vec<Body>,
        links: Vec<Link>,
        params: SimulationParams,
        pool: CellPool,
    ) -> Result<Self, LayoutError> {
        params.validate()?;
        let store = BodyStore::from_bodies(&bodies)?;

        let mut resolved = Vec::with_capacity(links.len());
        for link in &links {
            link.validate()?;
            let source = store
                .index_of(link.source)
                .ok_or(LayoutError::UnknownBody(link.source))?;
            let target = store
                .index_of(link.target)
                .ok_or(LayoutError::UnknownBody(link.target))?;
            resolved.push(ResolvedLink {
                source,
                target,
                rest_distance: link.rest_distance,
                strength: link.strength.unwrap_or(params.spring_strength),
            });
        }

        let ids: Arc<[BodyId]> = store.ids().into();
        let charges = store.charges().to_vec();
        let engine = Engine {
            law: ForceLaw::new(params.repulsion_strength, params.min_distance, params.max_distance),
            integrator: DampedEuler::new(params.time_step, params.damping, params.max_speed),
            alpha: params.initial_alpha,
            store,
            ids,
            links,
            resolved,
            params,
            octree: Octree::new(),
            pool,
            charge: None,
            link_strength: None,
            link_distance: None,
            charges,
            ticks: 0,
            kinetic_energy: 0.0,
            last: None,
        };
        debug!(
            bodies = engine.store.len(),
            links = engine.links.len(),
            integrator = engine.integrator.name(),
            "engine created"
        );
        Ok(engine)
    }

    /// Derive each body's charge from the body instead of its own field
    pub fn with_charge(mut self, charge: Parameter<Body>) -> Self {
        self.charge = Some(charge);
        self.resolve_parameters();
        self
    }

    /// Derive each link's strength from the link
    pub fn with_link_strength(mut self, strength: Parameter<Link>) -> Self {
        self.link_strength = Some(strength);
        self.resolve_parameters();
        self
    }

    /// Derive each link's rest distance from the link
    pub fn with_link_distance(mut self, distance: Parameter<Link>) -> Self {
        self.link_distance = Some(distance);
        self.resolve_parameters();
        self
    }

    /// Evaluate computed parameters for the coming tick
    ///
    /// [`Engine::tick`] calls this itself. Callers supplying repulsion through
    /// [`Engine::tick_with_repulsion`] call it before computing that
    /// repulsion from [`Engine::charges`].
    pub fn resolve_parameters(&mut self) {
        match &self.charge {
            Some(param) => {
                let mut invalid = 0usize;
                for i in 0..self.store.len() {
                    let own = self.store.charges()[i];
                    let q = match self.store.body(i) {
                        Some(body) => param.resolve(&body),
                        None => own,
                    };
                    self.charges[i] = if q.is_finite() && q != 0.0 {
                        q
                    } else {
                        invalid += 1;
                        own
                    };
                }
                if invalid > 0 {
                    warn!(invalid, "computed charge was zero or non-finite, using body charge");
                }
            }
            None => self.charges.copy_from_slice(self.store.charges()),
        }

        if self.link_strength.is_none() && self.link_distance.is_none() {
            return;
        }
        for (link, resolved) in self.links.iter().zip(self.resolved.iter_mut()) {
            if let Some(param) = &self.link_strength {
                let s = param.resolve(link);
                resolved.strength = if s.is_finite() && s >= 0.0 {
                    s
                } else {
                    link.strength.unwrap_or(self.params.spring_strength)
                };
            }
            if let Some(param) = &self.link_distance {
                let d = param.resolve(link);
                resolved.rest_distance = if d.is_finite() && d >= 0.0 {
                    d
                } else {
                    link.rest_distance
                };
            }
        }
    }

    /// Advance the layout by one tick
    pub fn tick(&mut self) -> TickStats {
        let start = Instant::now();
        self.resolve_parameters();
        self.store.clear_forces();

        let n = self.store.len();
        let cell_count = if self.is_inert() {
            0
        } else {
            match self.params.force_mode {
                ForceMode::BarnesHut => {
                    self.octree.rebuild(self.store.positions(), &self.charges, &mut self.pool);
                    let theta = self.params.theta;
                    let (octree, law) = (&self.octree, &self.law);
                    tree_repulsion(octree, theta, law, 0..n, self.store.forces_mut());
                    self.octree.cell_count()
                }
                ForceMode::Exact => {
                    let (positions, forces) = self.store.forces_from_positions();
                    exact_repulsion(positions, &self.charges, &self.law, 0..n, forces);
                    0
                }
            }
        };

        self.finish_tick(start, cell_count)
    }

    /// Advance by one tick using repulsion computed elsewhere
    ///
    /// `repulsion[i]` is the force on dense body `i`, computed from
    /// [`Engine::positions`] and [`Engine::charges`].
    ///
    /// # Panics
    ///
    /// Panics if `repulsion` does not have one entry per body.
    pub fn tick_with_repulsion(&mut self, repulsion: &[Vec3], cell_count: usize) -> TickStats {
        assert_eq!(
            repulsion.len(),
            self.store.len(),
            "repulsion must have one entry per body"
        );
        let start = Instant::now();
        self.store.clear_forces();
        if !self.is_inert() {
            self.store.forces_mut().copy_from_slice(repulsion);
        }
        self.finish_tick(start, cell_count)
    }

    fn finish_tick(&mut self, start: Instant, cell_count: usize) -> TickStats {
        if self.is_inert() {
            // Nothing interacts; the layout is already at rest
            self.alpha = 0.0;
        } else {
            let (positions, forces) = self.store.forces_from_positions();
            springs(&self.resolved, positions, forces);
            centering(positions, self.params.centering_strength, forces);
            self.kinetic_energy = self.integrator.step(&mut self.store, self.alpha);
            self.alpha *= 1.0 - self.params.alpha_decay;
        }
        self.ticks += 1;

        let stats = TickStats {
            tick: self.ticks,
            duration: start.elapsed(),
            cell_count,
            alpha: self.alpha,
            theta: self.params.theta,
            kinetic_energy: self.kinetic_energy,
        };
        debug!(
            tick = stats.tick,
            alpha = stats.alpha,
            cells = stats.cell_count,
            energy = stats.kinetic_energy,
            "tick complete"
        );
        self.last = Some(stats);
        stats
    }

    /// Tick until the layout halts
    pub fn run(&mut self) -> RunSummary {
        self.run_until(|| false)
    }

    /// Tick until the layout halts or `stop` returns true before a tick
    pub fn run_until(&mut self, mut stop: impl FnMut() -> bool) -> RunSummary {
        let start = Instant::now();
        let first = self.ticks;
        let mut stopped = false;
        while !self.is_converged() {
            if stop() {
                stopped = true;
                break;
            }
            self.tick();
        }
        let mut summary = self.summary(start.elapsed(), stopped);
        summary.ticks = self.ticks - first;
        summary
    }

    pub(crate) fn summary(&self, elapsed: Duration, stopped: bool) -> RunSummary {
        RunSummary {
            ticks: self.ticks,
            alpha: self.alpha,
            reached_alpha_min: self.alpha < self.params.alpha_min,
            stopped,
            kinetic_energy: self.kinetic_energy,
            elapsed,
        }
    }

    /// Check if the layout has halted
    pub fn is_converged(&self) -> bool {
        self.alpha < self.params.alpha_min || self.ticks >= self.params.max_ticks
    }

    /// Fewer than two bodies and no springs: no force can act
    fn is_inert(&self) -> bool {
        self.store.len() < 2 && self.resolved.is_empty()
    }

    /// Restart cooling from `alpha`, resetting the tick count
    pub fn reheat(&mut self, alpha: f64) {
        self.alpha = alpha;
        self.ticks = 0;
        debug!(alpha, "engine reheated");
    }

    /// Change the opening threshold for subsequent ticks
    pub fn set_theta(&mut self, theta: f64) -> Result<(), LayoutError> {
        validate_theta(theta)?;
        self.params.theta = theta;
        Ok(())
    }

    /// Pin one axis of a body at `value`, or release it with `None`
    pub fn set_pinned(&mut self, id: BodyId, axis: Axis, value: Option<f64>) -> Result<(), LayoutError> {
        let index = self.store.index_of(id).ok_or(LayoutError::UnknownBody(id))?;
        if let Some(v) = value {
            if !v.is_finite() {
                return Err(LayoutError::config("pin", format!("non-finite pin {} for body {}", v, id)));
            }
        }
        self.store.set_pin(index, axis, value);
        Ok(())
    }

    /// Current position of a body
    pub fn position(&self, id: BodyId) -> Option<Vec3> {
        self.store.index_of(id).map(|i| self.store.positions()[i])
    }

    /// Current positions in dense order
    pub fn positions(&self) -> &[Vec3] {
        self.store.positions()
    }

    /// Charges resolved for the current tick, in dense order
    pub fn charges(&self) -> &[f64] {
        &self.charges
    }

    /// Copy of every position
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            tick: self.ticks,
            alpha: self.alpha,
            ids: Arc::clone(&self.ids),
            positions: self.store.positions().to_vec(),
        }
    }

    /// Write positions, velocities and forces into a shared buffer
    pub fn publish(&self, buffer: &SharedBuffer) -> Result<(), LayoutError> {
        if buffer.len() < self.store.len() {
            return Err(LayoutError::config(
                "buffer",
                format!(
                    "buffer holds {} bodies, engine has {}",
                    buffer.len(),
                    self.store.len()
                ),
            ));
        }
        for i in 0..self.store.len() {
            buffer.store_vec3(i, Field::Position, self.store.positions()[i]);
            buffer.store_vec3(i, Field::Velocity, self.store.velocities()[i]);
            buffer.store_vec3(i, Field::Force, self.store.forces()[i]);
        }
        Ok(())
    }

    /// Dense indices of bodies inside `volume` and within `culling_distance` of `eye`
    pub fn visible_bodies(&self, volume: &ViewVolume, eye: Vec3, culling_distance: f64) -> Vec<usize> {
        visibility::visible_bodies(self.store.positions(), volume, eye, culling_distance)
    }

    /// Body storage
    pub fn store(&self) -> &BodyStore {
        &self.store
    }

    /// Active parameters
    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Current opening threshold
    pub fn theta(&self) -> f64 {
        self.params.theta
    }

    /// Current alpha
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    /// Ticks since creation or the last reheat
    pub fn tick_count(&self) -> u32 {
        self.ticks
    }

    /// Stats of the most recent tick
    pub fn last_tick(&self) -> Option<TickStats> {
        self.last
    }

    /// Repulsion law derived from the parameters
    pub fn law(&self) -> ForceLaw {
        self.law
    }

    /// Octree built by the most recent Barnes-Hut tick
    pub fn octree(&self) -> &Octree {
        &self.octree
    }

    /// Counters of the engine's cell pool
    pub fn cell_pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Number of bodies
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Check if the engine has no bodies
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("bodies", &self.store.len())
            .field("links", &self.links.len())
            .field("alpha", &self.alpha)
            .field("ticks", &self.ticks)
            .field("theta", &self.params.theta)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: u64) -> Vec<Body> {
        (0..n).map(|i| Body::new(i, Vec3::new(i as f64, 0.0, 0.0))).collect()
    }

    #[test]
    fn test_unknown_link_endpoint_rejected() {
        let err = Engine::new(line(2), vec![Link::new(0, 5)], SimulationParams::default()).unwrap_err();
        assert_eq!(err, LayoutError::UnknownBody(BodyId(5)));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = SimulationParams {
            theta: 0.0,
            ..SimulationParams::default()
        };
        assert!(matches!(
            Engine::new(line(2), vec![], params),
            Err(LayoutError::Configuration { field: "theta", .. })
        ));
    }

    #[test]
    fn test_two_bodies_repel() {
        let mut engine = Engine::new(line(2), vec![], SimulationParams::default()).unwrap();
        engine.tick();
        let a = engine.position(BodyId(0)).unwrap();
        let b = engine.position(BodyId(1)).unwrap();
        assert!(b.x - a.x > 1.0);
    }

    #[test]
    fn test_alpha_decays_geometrically() {
        let params = SimulationParams::default();
        let mut engine = Engine::new(line(3), vec![], params.clone()).unwrap();
        engine.tick();
        engine.tick();
        let expected = params.initial_alpha * (1.0 - params.alpha_decay).powi(2);
        assert!((engine.alpha() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_run_halts_at_max_ticks() {
        let params = SimulationParams::default().with_max_ticks(10);
        let mut engine = Engine::new(line(4), vec![], params).unwrap();
        let summary = engine.run();
        assert_eq!(summary.ticks, 10);
        assert!(!summary.reached_alpha_min);
        assert!(engine.is_converged());
    }

    #[test]
    fn test_run_until_stops_before_tick() {
        let mut engine = Engine::new(line(4), vec![], SimulationParams::default()).unwrap();
        let mut calls = 0;
        let summary = engine.run_until(|| {
            calls += 1;
            calls > 3
        });
        assert!(summary.stopped);
        assert_eq!(summary.ticks, 3);
    }

    #[test]
    fn test_single_body_is_inert() {
        let mut engine = Engine::new(
            vec![Body::new(1, Vec3::new(5.0, 5.0, 5.0))],
            vec![],
            SimulationParams::default(),
        )
        .unwrap();
        engine.tick();
        assert!(engine.is_converged());
        assert_eq!(engine.position(BodyId(1)), Some(Vec3::new(5.0, 5.0, 5.0)));
    }

    #[test]
    fn test_empty_engine() {
        let mut engine = Engine::new(vec![], vec![], SimulationParams::default()).unwrap();
        let summary = engine.run();
        assert_eq!(summary.ticks, 1);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_set_pinned_unknown_body() {
        let mut engine = Engine::new(line(2), vec![], SimulationParams::default()).unwrap();
        assert_eq!(
            engine.set_pinned(BodyId(9), Axis::X, Some(1.0)),
            Err(LayoutError::UnknownBody(BodyId(9)))
        );
    }

    #[test]
    fn test_pinned_body_holds_through_run() {
        let mut engine = Engine::new(line(5), vec![Link::new(0, 4)], SimulationParams::default()).unwrap();
        engine.set_pinned(BodyId(2), Axis::X, Some(100.0)).unwrap();
        engine.set_pinned(BodyId(2), Axis::Y, Some(-3.0)).unwrap();
        engine.run();
        let p = engine.position(BodyId(2)).unwrap();
        assert_eq!(p.x, 100.0);
        assert_eq!(p.y, -3.0);
    }

    #[test]
    fn test_set_theta_validates() {
        let mut engine = Engine::new(line(2), vec![], SimulationParams::default()).unwrap();
        assert!(engine.set_theta(1.5).is_err());
        engine.set_theta(0.3).unwrap();
        assert_eq!(engine.theta(), 0.3);
    }

    #[test]
    fn test_reheat_restarts_run() {
        let params = SimulationParams::default().with_max_ticks(5);
        let mut engine = Engine::new(line(3), vec![], params).unwrap();
        engine.run();
        assert!(engine.is_converged());
        engine.reheat(0.5);
        assert!(!engine.is_converged());
        assert_eq!(engine.alpha(), 0.5);
    }

    #[test]
    fn test_deterministic_ticks() {
        let bodies: Vec<Body> = fibonacci_sphere(40, 20.0)
            .into_iter()
            .enumerate()
            .map(|(i, p)| Body::new(i as u64, p))
            .collect();
        let links: Vec<Link> = (1..40).map(|i| Link::new(0, i)).collect();

        let mut a = Engine::new(bodies.clone(), links.clone(), SimulationParams::default()).unwrap();
        let mut b = Engine::new(bodies, links, SimulationParams::default()).unwrap();
        for _ in 0..20 {
            a.tick();
            b.tick();
        }
        for (pa, pb) in a.positions().iter().zip(b.positions()) {
            assert_eq!(pa.to_array().map(f64::to_bits), pb.to_array().map(f64::to_bits));
        }
    }

    #[test]
    fn test_computed_charge() {
        let mut engine = Engine::new(line(3), vec![], SimulationParams::default())
            .unwrap()
            .with_charge(Parameter::computed(|b: &Body| -((b.id.get() + 1) as f64)));
        assert_eq!(engine.charges(), &[-1.0, -2.0, -3.0]);

        let mut zero = Engine::new(line(2), vec![], SimulationParams::default())
            .unwrap()
            .with_charge(Parameter::Constant(0.0));
        zero.tick();
        assert_eq!(zero.charges(), &[DEFAULT_CHARGE, DEFAULT_CHARGE]);
        engine.tick();
    }

    #[test]
    fn test_exact_mode_builds_no_cells() {
        let params = SimulationParams::default().with_force_mode(ForceMode::Exact);
        let mut engine = Engine::new(line(6), vec![], params).unwrap();
        let stats = engine.tick();
        assert_eq!(stats.cell_count, 0);
    }

    #[test]
    fn test_cell_pool_reused_across_ticks() {
        let mut engine = Engine::new(line(16), vec![], SimulationParams::default()).unwrap();
        let mut peak = 0;
        for _ in 0..6 {
            let cells = engine.tick().cell_count;
            peak = peak.max(cells);

            // New cells are only constructed when a tree outgrows every earlier one
            let stats = engine.cell_pool_stats();
            assert_eq!(stats.total_created, peak);
            assert_eq!(stats.in_use, cells);
            assert_eq!(stats.available + stats.in_use, peak);
            assert!(stats.available + stats.in_use <= PoolConfig::default().max_size);
        }
        assert!(engine.cell_pool_stats().hits > 0);
    }

    #[test]
    fn test_prewarmed_cell_pool_never_grows() {
        let pool = cell_pool(PoolConfig::default().with_prewarm(4096));
        let mut engine = Engine::with_cell_pool(line(16), vec![], SimulationParams::default(), pool).unwrap();
        for _ in 0..10 {
            let cells = engine.tick().cell_count;
            assert!(cells <= 4096);
        }
        let stats = engine.cell_pool_stats();
        assert_eq!(stats.total_created, 4096);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.available + stats.in_use, 4096);
    }

    #[test]
    fn test_publish_writes_positions() {
        let engine = Engine::new(line(3), vec![], SimulationParams::default()).unwrap();
        let buffer = SharedBuffer::try_new(3).unwrap();
        engine.publish(&buffer).unwrap();
        assert_eq!(buffer.load_vec3(2, Field::Position), Vec3::new(2.0, 0.0, 0.0));

        let small = SharedBuffer::try_new(1).unwrap();
        assert!(engine.publish(&small).is_err());
    }

    #[test]
    fn test_snapshot_lookup() {
        let engine = Engine::new(line(3), vec![], SimulationParams::default()).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.position(BodyId(1)), Some(Vec3::new(1.0, 0.0, 0.0)));
        assert_eq!(snapshot.position(BodyId(7)), None);
        assert_eq!(snapshot.iter().count(), 3);
    }
}
