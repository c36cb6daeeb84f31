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
//! Graph Layout Example
//!
//! Lays out a small tree-shaped graph. It showcases:
//!
//! - Seeding positions with the hierarchy helper
//! - Running inline (one tick per call) or on a background thread
//! - Reading snapshots and the final run summary
//!
//! # Running
//!
//! ```bash
//! # Inline run, summary only
//! cargo run --example graph_layout --release
//!
//! # Background run with tick logging
//! RUST_LOG=force_layout=debug cargo run --example graph_layout --release -- --background
//!
//! # Wider tree
//! cargo run --example graph_layout --release -- --fanout 6 --depth 4
//! ```

use force_layout::hierarchy::layered_positions;
use force_layout::{Body, BodyId, ExecutionMode, Link, Simulation, SimulationEvent, SimulationParams, Vec3};
use tracing_subscriber::EnvFilter;

struct Config {
    background: bool,
    fanout: u64,
    depth: u32,
}

/// Complete tree with `fanout` children per node
fn tree(fanout: u64, depth: u32) -> (Vec<Body>, Vec<Link>) {
    let mut bodies = vec![Body::new(0, Vec3::ZERO)];
    let mut links = Vec::new();
    let mut frontier = vec![0u64];
    let mut next = 1u64;
    for _ in 0..depth {
        let mut children = Vec::new();
        for &parent in &frontier {
            for _ in 0..fanout {
                bodies.push(Body::new(next, Vec3::ZERO));
                links.push(Link::new(parent, next));
                children.push(next);
                next += 1;
            }
        }
        frontier = children;
    }
    (bodies, links)
}

fn parse_args() -> Config {
    let mut config = Config {
        background: false,
        fanout: 3,
        depth: 3,
    };
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--background" => config.background = true,
            "--fanout" | "--depth" if i + 1 < args.len() => {
                match args[i + 1].parse::<u32>() {
                    Ok(v) if args[i] == "--fanout" => config.fanout = v as u64,
                    Ok(v) => config.depth = v,
                    Err(_) => eprintln!("Warning: invalid value '{}' for {}", args[i + 1], args[i]),
                }
                i += 1;
            }
            other => eprintln!("Warning: ignoring argument '{}'", other),
        }
        i += 1;
    }
    config
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("force_layout=info")))
        .init();

    println!("==========================================================");
    println!("       Force Layout: tree graph");
    println!("==========================================================");

    let config = parse_args();
    let (bodies, links) = tree(config.fanout, config.depth);

    // Start from a layered arrangement instead of all bodies at the origin
    let bodies = match layered_positions(&bodies, &links, 40.0, 25.0) {
        Ok(seeded) => seeded,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };
    println!("Bodies: {}  Links: {}", bodies.len(), links.len());

    let mode = if config.background {
        ExecutionMode::Background
    } else {
        ExecutionMode::Inline
    };
    let mut sim = match Simulation::start(bodies, links, SimulationParams::default(), mode) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("Error: {}", e);
            return;
        }
    };

    let summary = if config.background {
        let mut ticks = 0;
        for event in sim.events().iter() {
            match event {
                SimulationEvent::Tick(snapshot) => {
                    ticks += 1;
                    if snapshot.tick % 50 == 0 {
                        println!("tick {:>4}  alpha {:.4}", snapshot.tick, snapshot.alpha);
                    }
                }
                SimulationEvent::Converged(_) => break,
            }
        }
        println!("Received {} tick events", ticks);
        sim.wait()
    } else {
        while let Some(stats) = sim.step() {
            if stats.tick % 50 == 0 {
                println!(
                    "tick {:>4}  alpha {:.4}  cells {:>5}  energy {:.3e}",
                    stats.tick, stats.alpha, stats.cell_count, stats.kinetic_energy
                );
            }
        }
        let root = sim.position(BodyId(0)).unwrap_or(Vec3::ZERO);
        println!("Root settled at ({:.2}, {:.2}, {:.2})", root.x, root.y, root.z);
        sim.run()
    };

    match summary {
        Ok(summary) => {
            println!();
            println!("Ticks:      {}", summary.ticks);
            println!("Alpha:      {:.5}", summary.alpha);
            println!("Converged:  {}", summary.reached_alpha_min);
            println!("Wall time:  {:.1} ms", summary.elapsed.as_secs_f64() * 1000.0);
        }
        Err(e) => eprintln!("Error: {}", e),
    }
}
