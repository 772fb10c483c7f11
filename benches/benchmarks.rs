use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use dfntrans::config::TrackingConfig;
use dfntrans::discretization::generator::{CrossSpec, PlanarSpec, cross_network, planar_network};
use dfntrans::discretization::mesh::Mesh;
use dfntrans::tracking::driver::{TrackSettings, Tracker, prepare_mesh, seed_and_locate, track_all};
use dfntrans::tracking::locator::search_neighborhood;
use dfntrans::tracking::mixing::MixingRule;
use dfntrans::tracking::particle::{Particle, particle_rng};
use dfntrans::tracking::seeding::SeedingStrategy;
use glam::DVec2;

fn mesh_sizes() -> Vec<usize> {
    vec![5, 20]
}

fn planar(cells_per_half: usize) -> Mesh {
    let mut mesh = planar_network(&PlanarSpec {
        cells_per_half,
        ..Default::default()
    });
    prepare_mesh(&mut mesh, &TrackingConfig::default());
    mesh
}

fn bench_locate(c: &mut Criterion) {
    let mut group = c.benchmark_group("locate");
    for &size in &mesh_sizes() {
        let mesh = planar(size);
        let cell = mesh.cells.len() / 2;
        let nodes = mesh.cells[cell].nodes;
        // Just past the cell, inside one of its neighbours.
        let target = mesh.centroid(cell) + DVec2::new(1.0 / size as f64, 0.0);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter_batched(
                || Particle::new(0, target, 0),
                |mut particle| {
                    let found = search_neighborhood(&mesh, &mut particle, nodes);
                    std::hint::black_box(found);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_single_track(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_track");
    group.sample_size(20);
    for &size in &mesh_sizes() {
        let mesh = planar(size);
        let config = TrackingConfig {
            seeding: SeedingStrategy::PerEdge { particles: 1 },
            ..Default::default()
        };
        let particle = seed_and_locate(&mesh, &config).unwrap().remove(0);
        let settings = TrackSettings::new(config.timesteps, MixingRule::CompleteMixing);
        let tracker = Tracker::new(&mesh, &settings);
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &_| {
            b.iter_batched(
                || particle.clone(),
                |p| {
                    let record = tracker.track(p, particle_rng(1, 0)).unwrap();
                    std::hint::black_box(record.time);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_parallel_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("parallel_run");
    group.sample_size(10);
    let mut mesh = cross_network(&CrossSpec::default());
    prepare_mesh(&mut mesh, &TrackingConfig::default());
    for &particles in &[16usize, 128] {
        let config = TrackingConfig {
            seeding: SeedingStrategy::PerEdge { particles },
            mixing_rule: MixingRule::StreamlineRouting,
            ..Default::default()
        };
        let seeded = seed_and_locate(&mesh, &config).unwrap();
        let settings = TrackSettings::from_config(&config);
        group.bench_with_input(BenchmarkId::from_parameter(particles), &particles, |b, &_| {
            b.iter_batched(
                || seeded.clone(),
                |batch| {
                    let records = track_all(&mesh, &settings, config.seed, batch).unwrap();
                    std::hint::black_box(records.len());
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_locate, bench_single_track, bench_parallel_run);
criterion_main!(benches);
