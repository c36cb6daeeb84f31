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
//! Pooled Layout Example
//!
//! Lays out a large random graph with repulsion split across worker
//! threads. It showcases:
//!
//! - Pooled execution over a shared atomic buffer
//! - Adaptive theta under a frame budget
//! - Pinning a body while the run is in progress
//! - Worker pool statistics
//!
//! # Running
//!
//! ```bash
//! # 5000 bodies on 4 threads
//! cargo run --example pooled_layout --release
//!
//! # Different size and thread count
//! cargo run --example pooled_layout --release -- --bodies 20000 --threads 8
//! ```

use force_layout::controller::ControllerConfig;
use force_layout::engine::fibonacci_sphere;
use force_layout::worker::{PoolSettings, Priority, TaskCategory, WorkerPool};
use force_layout::{
    Axis, Body, BodyId, ExecutionMode, Link, Simulation, SimulationEvent, SimulationOptions, SimulationParams,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn random_graph(n: usize, seed: u64) -> (Vec<Body>, Vec<Link>) {
    let bodies: Vec<Body> = fibonacci_sphere(n, 300.0)
        .into_iter()
        .enumerate()
        .map(|(i, p)| Body::new(i as u64, p))
        .collect();

    let mut state = seed;
    let mut next = move || {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (state >> 33) as usize
    };
    let links = (1..n)
        .map(|i| Link::new((next() % i) as u64, i as u64))
        .collect();
    (bodies, links)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("force_layout=info")))
        .init();

    let mut n = 5_000usize;
    let mut threads = 4usize;
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i + 1 < args.len() {
        match (args[i].as_str(), args[i + 1].parse::<usize>()) {
            ("--bodies", Ok(v)) => n = v,
            ("--threads", Ok(v)) => threads = v,
            (flag, _) => eprintln!("Warning: ignoring '{} {}'", flag, args[i + 1]),
        }
        i += 2;
    }

    println!("==========================================================");
    println!("       Force Layout: pooled run");
    println!("==========================================================");
    println!("Bodies: {}  Threads: {}", n, threads);

    let (bodies, links) = random_graph(n, 42);
    let options = SimulationOptions {
        snapshot_every: 25,
        adaptive: Some(ControllerConfig::with_budget(Duration::from_millis(20))),
        ..Default::default()
    };
    let params = SimulationParams::default();
    let mut sim = match Simulation::start_with(bodies, links, params, ExecutionMode::Pooled { threads }, options) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    println!("Running in {:?} mode", sim.mode());

    // Hold the first body on the x axis for the whole run
    for axis in [Axis::Y, Axis::Z] {
        if let Err(e) = sim.set_pinned(BodyId(0), axis, Some(0.0)) {
            eprintln!("Error: {}", e);
        }
    }

    for event in sim.events().iter() {
        match event {
            SimulationEvent::Tick(snapshot) => {
                let origin = snapshot.position(BodyId(0)).unwrap_or_default();
                println!(
                    "tick {:>4}  alpha {:.4}  body 0 at ({:.1}, {:.1}, {:.1})",
                    snapshot.tick, snapshot.alpha, origin.x, origin.y, origin.z
                );
            }
            SimulationEvent::Converged(summary) => {
                println!();
                println!("Ticks:      {}", summary.ticks);
                println!("Converged:  {}", summary.reached_alpha_min);
                println!("Wall time:  {:.1} ms", summary.elapsed.as_secs_f64() * 1000.0);
                break;
            }
        }
    }
    if let Err(e) = sim.wait() {
        eprintln!("Error: {}", e);
    }

    // The pool is also usable on its own for ad-hoc work
    let pool = match WorkerPool::new(PoolSettings::with_layout_workers(threads)) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    let handles: Vec<_> = (0..threads * 2)
        .map(|k| {
            pool.submit_task(TaskCategory::Layout, Priority::Normal, Some(Duration::from_secs(1)), move |ctx| {
                Ok((k, ctx.name().to_string()))
            })
        })
        .collect();
    for handle in handles {
        match handle.wait() {
            Ok((k, worker)) => println!("task {:>2} ran on {}", k, worker),
            Err(e) => eprintln!("task failed: {}", e),
        }
    }
    for stats in pool.worker_stats(TaskCategory::Layout) {
        println!(
            "{:<24} completed {:>3}  failed {:>3}  latency {:?}",
            stats.name, stats.completed, stats.failed, stats.mean_latency
        );
    }
    pool.shutdown();
}
