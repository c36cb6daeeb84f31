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
//! Benchmarks for octree construction and force evaluation

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use force_layout::engine::{exact_repulsion, fibonacci_sphere, tree_repulsion};
use force_layout::math::Vec3;
use force_layout::pool::PoolConfig;
use force_layout::spatial::{cell_pool, ForceLaw, Octree};

fn bodies(n: usize) -> (Vec<Vec3>, Vec<f64>) {
    (fibonacci_sphere(n, 500.0), vec![-1.0; n])
}

fn bench_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("octree_rebuild");

    for n in [1_000, 10_000, 50_000].iter() {
        let (positions, charges) = bodies(*n);
        group.throughput(Throughput::Elements(*n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), n, |b, _| {
            let mut pool = cell_pool(PoolConfig::default());
            let mut tree = Octree::new();
            b.iter(|| {
                tree.rebuild(black_box(&positions), &charges, &mut pool);
                black_box(tree.cell_count())
            });
        });
    }

    group.finish();
}

fn bench_force_by_theta(c: &mut Criterion) {
    let mut group = c.benchmark_group("octree_force");
    let n = 10_000;
    let (positions, charges) = bodies(n);
    let law = ForceLaw::default();
    let mut pool = cell_pool(PoolConfig::default());
    let mut tree = Octree::new();
    tree.rebuild(&positions, &charges, &mut pool);

    group.throughput(Throughput::Elements(n as u64));
    for theta in [0.3, 0.5, 0.8, 1.0].iter() {
        group.bench_with_input(BenchmarkId::new("theta", theta), theta, |b, &theta| {
            let mut out = vec![Vec3::ZERO; n];
            b.iter(|| {
                out.iter_mut().for_each(|f| *f = Vec3::ZERO);
                tree_repulsion(&tree, theta, &law, 0..n, &mut out);
                black_box(out[0])
            });
        });
    }

    group.finish();
}

fn bench_tree_vs_exact(c: &mut Criterion) {
    let mut group = c.benchmark_group("repulsion");
    let law = ForceLaw::default();

    for n in [500, 2_000].iter() {
        let (positions, charges) = bodies(*n);
        let mut pool = cell_pool(PoolConfig::default());
        let mut tree = Octree::new();

        group.bench_with_input(BenchmarkId::new("barnes_hut", n), n, |b, &n| {
            let mut out = vec![Vec3::ZERO; n];
            b.iter(|| {
                tree.rebuild(&positions, &charges, &mut pool);
                out.iter_mut().for_each(|f| *f = Vec3::ZERO);
                tree_repulsion(&tree, 0.8, &law, 0..n, &mut out);
                black_box(out[0])
            });
        });

        group.bench_with_input(BenchmarkId::new("exact", n), n, |b, &n| {
            let mut out = vec![Vec3::ZERO; n];
            b.iter(|| {
                out.iter_mut().for_each(|f| *f = Vec3::ZERO);
                exact_repulsion(&positions, &charges, &law, 0..n, &mut out);
                black_box(out[0])
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_rebuild, bench_force_by_theta, bench_tree_vs_exact);
criterion_main!(benches);
