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
//! Benchmarks for the atomic shared buffer
//!
//! Compares plain stores and loads with compare-and-swap accumulation, and
//! measures how contended accumulation scales with writer threads.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use force_layout::buffer::{Field, SharedBuffer};
use force_layout::math::{Axis, Vec3};
use std::thread;

fn bench_store_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_store_load");

    for n in [1_000, 100_000].iter() {
        let buffer = SharedBuffer::try_new(*n).unwrap();
        group.throughput(Throughput::Elements(*n as u64));

        group.bench_with_input(BenchmarkId::new("store_vec3", n), n, |b, &n| {
            b.iter(|| {
                for i in 0..n {
                    buffer.store_vec3(i, Field::Position, Vec3::new(i as f64, 1.0, 2.0));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("load_vec3", n), n, |b, &n| {
            b.iter(|| {
                let mut sum = Vec3::ZERO;
                for i in 0..n {
                    sum += buffer.load_vec3(i, Field::Position);
                }
                black_box(sum)
            });
        });

        group.bench_with_input(BenchmarkId::new("read_field", n), n, |b, _| {
            let mut out = Vec::new();
            b.iter(|| {
                buffer.read_field(Field::Position, &mut out);
                black_box(out.len())
            });
        });
    }

    group.finish();
}

fn bench_cas_add(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_add");
    let buffer = SharedBuffer::try_new(1).unwrap();

    group.bench_function("uncontended", |b| {
        b.iter(|| black_box(buffer.add(0, Field::Force, Axis::X, black_box(0.5))));
    });

    for writers in [2, 4].iter() {
        group.bench_with_input(BenchmarkId::new("contended", writers), writers, |b, &writers| {
            b.iter(|| {
                thread::scope(|s| {
                    for _ in 0..writers {
                        let buffer = buffer.clone();
                        s.spawn(move || {
                            for _ in 0..1_000 {
                                buffer.add(0, Field::Force, Axis::Y, 1.0);
                            }
                        });
                    }
                });
                buffer.store(0, Field::Force, Axis::Y, 0.0);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_store_load, bench_cas_add);
criterion_main!(benches);
