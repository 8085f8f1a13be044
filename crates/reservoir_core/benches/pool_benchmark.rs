//! # Pool Hot-Path Benchmark
//!
//! Measures the per-frame cost consumers pay:
//! 1. Acquire + release on a warm pool (free-list pop/push)
//! 2. Acquire with an auto-release timer armed and cancelled
//! 3. A burst that empties the pool and forces growth
//!
//! Target: a warm acquire/release pair well under a microsecond.

#![allow(missing_docs)]

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reservoir_core::{
    FactoryError, InstanceFactory, Placement, PoolConfig, PoolRegistry, RegistryConfig,
};

/// Stand-in for a projectile: a little transform state.
struct Spark {
    position: [f32; 3],
    velocity: [f32; 3],
}

struct SparkFactory;

impl InstanceFactory<Spark> for SparkFactory {
    fn create(&self) -> Result<Spark, FactoryError> {
        Ok(Spark {
            position: [0.0; 3],
            velocity: [0.0, 0.0, 1.0],
        })
    }

    fn destroy(&self, _instance: Spark) {}

    fn place(&self, instance: &mut Spark, placement: &Placement) {
        instance.position = placement.position;
    }
}

fn registry_with(config: PoolConfig) -> PoolRegistry<Spark> {
    let mut registry = PoolRegistry::new(RegistryConfig::default()).unwrap();
    registry.register_factory("spark", SparkFactory);
    registry.create_pool(config.prewarmed()).unwrap();
    registry
}

fn bench_acquire_release(c: &mut Criterion) {
    let mut registry = registry_with(PoolConfig::new("sparks", "spark").with_sizes(256, 256));
    let key = registry.resolve("sparks").unwrap();
    let placement = Placement::at([1.0, 2.0, 3.0]);

    c.bench_function("acquire_release_warm", |b| {
        b.iter(|| {
            let handle = registry.acquire_from(key, Some(black_box(&placement))).unwrap();
            if let Some(spark) = registry.get_mut(handle) {
                spark.position[2] += spark.velocity[2];
            }
            black_box(registry.release(handle).unwrap())
        });
    });
}

fn bench_acquire_with_timer(c: &mut Criterion) {
    let mut registry = registry_with(
        PoolConfig::new("sparks", "spark")
            .with_sizes(256, 256)
            .with_max_lifetime(Duration::from_secs(2)),
    );
    let key = registry.resolve("sparks").unwrap();

    c.bench_function("acquire_release_timed", |b| {
        b.iter(|| {
            let handle = registry.acquire_from(key, None).unwrap();
            black_box(registry.release(handle).unwrap())
        });
    });
}

fn bench_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("burst_then_release");

    for burst in [64usize, 512, 4096] {
        group.throughput(Throughput::Elements(burst as u64));
        group.bench_with_input(BenchmarkId::from_parameter(burst), &burst, |b, &burst| {
            let mut registry = registry_with(
                PoolConfig::new("sparks", "spark")
                    .with_sizes(16, burst)
                    .with_expansion_rate(0.5),
            );
            let key = registry.resolve("sparks").unwrap();
            let mut held = Vec::with_capacity(burst);

            b.iter(|| {
                for _ in 0..burst {
                    held.push(registry.acquire_from(key, None).unwrap());
                }
                for handle in held.drain(..) {
                    registry.release(handle).unwrap();
                }
                black_box(registry.pool(key).map(|pool| pool.size()))
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_acquire_release, bench_acquire_with_timer, bench_burst);
criterion_main!(benches);
