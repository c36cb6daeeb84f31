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
//! End-to-end acceptance scenarios
//!
//! A star graph settles with its hub in the middle, a lone body stays put,
//! a prewarmed cell pool stops growing, and racing writers never tear a
//! shared-buffer field.

use force_layout::buffer::{Field, SharedBuffer};
use force_layout::engine::{fibonacci_sphere, DEFAULT_REST_DISTANCE};
use force_layout::math::{Axis, Vec3};
use force_layout::pool::PoolConfig;
use force_layout::spatial::cell_pool;
use force_layout::{Body, BodyId, Engine, ExecutionMode, ForceMode, Link, Simulation, SimulationParams};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

fn star() -> (Vec<Body>, Vec<Link>) {
    let bodies = fibonacci_sphere(4, 10.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| Body::new(i as u64 + 1, p))
        .collect();
    let links = vec![Link::new(1, 2), Link::new(1, 3), Link::new(1, 4)];
    (bodies, links)
}

fn centroid(points: &[Vec3]) -> Vec3 {
    let sum = points.iter().fold(Vec3::ZERO, |acc, &p| acc + p);
    sum * (1.0 / points.len() as f64)
}

fn assert_hub_central(engine: &Engine) {
    let pos = |id: u64| engine.position(BodyId(id)).unwrap();
    let hub = pos(1);
    let leaves = [pos(2), pos(3), pos(4)];
    let hub_offset = hub.distance(centroid(&leaves));

    for i in 0..leaves.len() {
        let others: Vec<Vec3> = (0..leaves.len()).filter(|&j| j != i).map(|j| leaves[j]).collect();
        let leaf_offset = leaves[i].distance(centroid(&others));
        assert!(
            hub_offset < leaf_offset,
            "hub offset {} not below leaf {} offset {}",
            hub_offset,
            i + 2,
            leaf_offset
        );
        for j in (i + 1)..leaves.len() {
            assert!(hub_offset < leaves[i].distance(leaves[j]));
        }
    }
}

#[test]
fn test_star_hub_settles_at_leaf_centroid() {
    for mode in [ForceMode::BarnesHut, ForceMode::Exact] {
        let (bodies, links) = star();
        let params = SimulationParams {
            alpha_min: 0.01,
            force_mode: mode,
            ..Default::default()
        };
        let mut engine = Engine::new(bodies, links, params).unwrap();
        let summary = engine.run();

        assert!(summary.reached_alpha_min, "did not cool within max_ticks: {:?}", summary);
        assert!(engine.alpha() < 0.01);
        assert_hub_central(&engine);
    }
}

#[test]
fn test_star_flattens_without_centering() {
    let (bodies, links) = star();
    let params = SimulationParams {
        alpha_min: 0.01,
        centering_strength: 0.0,
        ..Default::default()
    };
    let mut engine = Engine::new(bodies, links, params).unwrap();
    engine.run();
    assert_hub_central(&engine);

    // Leaves end up spread around the hub rather than bunched on one side
    let hub = engine.position(BodyId(1)).unwrap();
    let leaves: Vec<Vec3> = (2..=4).map(|id| engine.position(BodyId(id)).unwrap()).collect();
    assert!(hub.distance(centroid(&leaves)) < 0.25 * DEFAULT_REST_DISTANCE);
}

#[test]
fn test_lone_body_converges_in_one_tick() {
    let start = Vec3::new(3.0, -4.0, 12.0);
    let mut engine = Engine::new(vec![Body::new(7, start)], vec![], SimulationParams::default()).unwrap();

    engine.tick();
    assert!(engine.is_converged());
    assert_eq!(engine.tick_count(), 1);
    let end = engine.position(BodyId(7)).unwrap();
    assert!(end.distance(start) < 1e-12);
}

#[test]
fn test_lone_body_through_simulation() {
    let start = Vec3::new(1.0, 2.0, 3.0);
    let mut sim = Simulation::start(
        vec![Body::new(1, start)],
        vec![],
        SimulationParams::default(),
        ExecutionMode::Inline,
    )
    .unwrap();
    let summary = sim.run().unwrap();
    assert_eq!(summary.ticks, 1);
    assert!(sim.position(BodyId(1)).unwrap().distance(start) < 1e-12);
}

#[test]
fn test_prewarmed_cell_pool_does_not_grow() {
    let mut pool = cell_pool(PoolConfig::new(1000, 0).with_prewarm(1000));
    assert_eq!(pool.stats().total_created, 1000);

    for _ in 0..2 {
        let cells: Vec<_> = (0..1000).map(|_| pool.acquire()).collect();
        assert_eq!(pool.stats().in_use, 1000);
        for cell in cells {
            pool.release(cell);
        }
        assert_eq!(pool.stats().in_use, 0);
        assert_eq!(pool.len(), 1000);
    }

    let stats = pool.stats();
    assert_eq!(stats.total_created, 1000);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.hits, 2000);
}

#[test]
fn test_racing_writers_never_tear_a_field() {
    const ROUNDS: usize = 20_000;
    let a = 1.5f32;
    let b = -2.25e7f32;
    let buffer = SharedBuffer::try_new(4).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writers: Vec<_> = [a, b]
        .into_iter()
        .map(|value| {
            let buffer = buffer.clone();
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    buffer.store(2, Field::Position, Axis::Y, value);
                    buffer.store_vec3(3, Field::Velocity, Vec3::new(value as f64, value as f64, value as f64));
                }
            })
        })
        .collect();

    let reader = {
        let buffer = buffer.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut observed = 0usize;
            while !done.load(Ordering::Acquire) {
                let v = buffer.load(2, Field::Position, Axis::Y);
                assert!(v == 0.0 || v == a || v == b, "torn value {}", v);
                let vel = buffer.load_vec3(3, Field::Velocity);
                for axis in Axis::ALL {
                    let c = vel.get(axis) as f32;
                    assert!(c == 0.0 || c == a || c == b, "torn component {}", c);
                }
                observed += 1;
            }
            observed
        })
    };

    for writer in writers {
        writer.join().unwrap();
    }
    done.store(true, Ordering::Release);
    assert!(reader.join().unwrap() > 0);

    let last = buffer.load(2, Field::Position, Axis::Y);
    assert!(last == a || last == b);
    assert!(!last.is_nan());
    // Neighbouring fields are untouched
    assert_eq!(buffer.load(2, Field::Position, Axis::X), 0.0);
    assert_eq!(buffer.load(2, Field::Force, Axis::Y), 0.0);
}
