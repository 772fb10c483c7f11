use approx::assert_abs_diff_eq;
use dfntrans::config::TrackingConfig;
use dfntrans::discretization::generator::{
    CrossSpec, CrossSpeeds, PlanarSpec, cross_network, planar_network,
};
use dfntrans::discretization::mesh::Mesh;
use dfntrans::processing::trajectory::ParticleFileOptions;
use dfntrans::tracking::boundary::final_position;
use dfntrans::tracking::driver::{Fate, TrackSettings, Tracker, prepare_mesh, seed_and_locate, track_all};
use dfntrans::tracking::locator::is_inside;
use dfntrans::tracking::mixing::MixingRule;
use dfntrans::tracking::particle::{Particle, particle_rng};
use dfntrans::tracking::seeding::SeedingStrategy;
use glam::DVec2;
use std::fs;
use std::path::Path;

fn prepared(mut mesh: Mesh) -> Mesh {
    prepare_mesh(&mut mesh, &TrackingConfig::default());
    mesh
}

fn particle_at_centroid(mesh: &Mesh, cell: usize) -> Particle {
    let mut particle = Particle::new(0, mesh.centroid(cell), mesh.cells[cell].fracture);
    assert!(is_inside(mesh, &mut particle, cell));
    particle
}

/// (time, x, y, z) of every row of a trajectory file.
fn trajectory_rows(path: &Path) -> Vec<[f64; 4]> {
    let text = fs::read_to_string(path).unwrap();
    text.lines()
        .skip(1)
        .map(|line| {
            let f: Vec<f64> = line.split(',').map(|x| x.parse().unwrap()).collect();
            [f[9], f[1], f[2], f[3]]
        })
        .collect()
}

#[test]
fn uniform_flow_moves_in_a_straight_line() {
    let mesh = prepared(planar_network(&PlanarSpec::default()));
    let dir = tempfile::tempdir().unwrap();
    let settings = TrackSettings {
        files: Some(ParticleFileOptions {
            dir: dir.path().to_path_buf(),
            trajectories: true,
            ..Default::default()
        }),
        ..TrackSettings::new(100_000, MixingRule::CompleteMixing)
    };
    let particle = particle_at_centroid(&mesh, 90);
    let start = particle.position;
    let origin = mesh.position_3d(start, 0);

    let record = Tracker::new(&mesh, &settings).track(particle, particle_rng(1, 0)).unwrap();
    println!("Test: uniform flow, {} steps", record.steps);
    println!("  final position {}, time {:.6e}", record.final_position, record.time);
    assert_eq!(record.fate, Fate::Exited);

    let exit = mesh.to_local(record.final_position, 0);
    assert_abs_diff_eq!(exit.x, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(exit.y, start.y, epsilon = 1e-9);
    assert_abs_diff_eq!(record.time, 1.0 - start.x, epsilon = 1e-9);
    assert_abs_diff_eq!(record.length, 1.0 - start.x, epsilon = 1e-9);

    // Travel time trails the distance covered by at most one step.
    let rows = trajectory_rows(&dir.path().join("traject_1.csv"));
    assert_eq!(rows.len(), record.steps + 1);
    let mut max_lag: f64 = 0.0;
    for [time, x, y, z] in &rows {
        let distance = origin.distance(glam::DVec3::new(*x, *y, *z));
        assert!(distance - time >= -1e-9);
        max_lag = max_lag.max(distance - time);
    }
    println!("Max lag between distance and time: {:.2e}", max_lag);
    assert!(max_lag < 1e-2);
    let [last_time, ..] = rows[rows.len() - 1];
    assert_abs_diff_eq!(last_time, record.time, epsilon = 1e-9);
}

#[test]
fn exit_point_lies_on_the_outflow_edge() {
    let mesh = prepared(planar_network(&PlanarSpec::default()));

    let mut particle = particle_at_centroid(&mesh, 119);
    let start = particle.position;
    particle.time = 5.0;
    let settings = TrackSettings::new(100_000, MixingRule::CompleteMixing);
    let record = Tracker::new(&mesh, &settings).track(particle, particle_rng(1, 0)).unwrap();
    assert_eq!(record.fate, Fate::Exited);
    let exit = mesh.to_local(record.final_position, 0);
    assert_abs_diff_eq!(exit.x, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(record.time, 5.0 + (1.0 - start.x), epsilon = 1e-9);

    // A single overshooting step, resolved directly.
    let mut particle = particle_at_centroid(&mesh, 119);
    particle.time = 2.0;
    particle.prev_position = start;
    particle.velocity = DVec2::new(0.5, 0.0);
    particle.position = start + DVec2::new(0.1, 0.0);
    assert!(final_position(&mesh, &mut particle));
    assert_abs_diff_eq!(particle.position.x, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(particle.time, 2.0 + (1.0 - start.x) / 0.5, epsilon = 1e-12);
}

#[test]
fn stagnant_cell_trips_the_stuck_guard() {
    let spec = PlanarSpec {
        velocity: DVec2::ZERO,
        ..Default::default()
    };
    let mesh = prepared(planar_network(&spec));
    for timesteps in [30, 31, 32, 300] {
        let settings = TrackSettings::new(timesteps, MixingRule::CompleteMixing);
        let particle = particle_at_centroid(&mesh, 90);
        let record = Tracker::new(&mesh, &settings).track(particle, particle_rng(1, 0)).unwrap();
        println!("timesteps {timesteps}: {} after {} steps", record.fate, record.steps);
        assert_eq!(record.fate, Fate::Stuck);
        assert_eq!(record.steps, timesteps / 3 + 1);
        assert_eq!(record.time, 0.0);
    }
}

#[test]
fn particles_cross_the_intersection_and_exit() {
    let mesh = prepared(cross_network(&CrossSpec::default()));
    let dir = tempfile::tempdir().unwrap();
    let config = TrackingConfig {
        seeding: SeedingStrategy::PerEdge { particles: 4 },
        timesteps: 200_000,
        ..Default::default()
    };
    let particles = seed_and_locate(&mesh, &config).unwrap();
    assert_eq!(particles.len(), 8);
    assert!(particles.iter().all(|p| p.cell.is_some()));

    for rule in [MixingRule::CompleteMixing, MixingRule::StreamlineRouting] {
        let settings = TrackSettings {
            files: Some(ParticleFileOptions {
                dir: dir.path().join(rule.to_string().replace(' ', "_")),
                trajectories: true,
                ..Default::default()
            }),
            ..TrackSettings::new(config.timesteps, rule)
        };
        let records = track_all(&mesh, &settings, config.seed, particles.clone()).unwrap();
        let exited = records.iter().filter(|r| r.exited()).count();
        println!("Test: cross network, {rule}: {exited}/{} exited", records.len());
        assert_eq!(records.len(), 8);
        assert_eq!(exited, 8);

        for record in &records {
            if record.exited() {
                assert!(record.fracture_hits <= mesh.fractures.len());
                assert_eq!(record.fractures.len(), record.fracture_hits + 1);
                let p = record.final_position;
                assert!(
                    (p.x - 1.0).abs() < 1e-6 || (p.z - 1.0).abs() < 1e-6,
                    "exit {p} is not on an outflow boundary"
                );
                assert!(record.time > 0.0);
            }

            let path = settings
                .files
                .as_ref()
                .unwrap()
                .dir
                .join(format!("traject_{}.csv", record.id + 1));
            let rows = trajectory_rows(&path);
            assert!(rows.windows(2).all(|w| w[1][0] >= w[0][0]), "time decreased");
        }
    }
}

/// Branch frequencies at a real intersection. Fracture 0 arrives at speed 2,
/// the adjacent outgoing half of fracture 1 moves at speed 1 and the opposite
/// half of fracture 0 at speed 2. Streamline routing takes the adjacent branch
/// with probability 1/2, complete mixing with probability 1/(1 + 2).
#[test]
fn intersection_branch_frequencies() {
    let spec = CrossSpec {
        cells_per_half: 2,
        speeds: CrossSpeeds {
            a_in: 2.0,
            a_out: 2.0,
            b_in: 1.0,
            b_out: 1.0,
        },
        ..Default::default()
    };
    let mesh = prepared(cross_network(&spec));
    let start = DVec2::new(-0.35, -0.3);
    let cell = (0..mesh.cells.len())
        .find(|&c| mesh.cells[c].fracture == 0 && is_inside(&mesh, &mut Particle::new(0, start, 0), c))
        .unwrap();

    let trials = 10_000;
    let particles: Vec<Particle> = (0..trials)
        .map(|id| {
            let mut particle = Particle::new(id, start, 0);
            assert!(is_inside(&mesh, &mut particle, cell));
            particle
        })
        .collect();

    for (rule, expected) in [
        (MixingRule::StreamlineRouting, 0.5),
        (MixingRule::CompleteMixing, 1.0 / 3.0),
    ] {
        let settings = TrackSettings::new(100_000, rule);
        let records = track_all(&mesh, &settings, 2024, particles.clone()).unwrap();
        assert!(records.iter().all(|r| r.exited()));
        let adjacent = records
            .iter()
            .filter(|r| r.fractures.last() == Some(&1))
            .count();
        for r in &records {
            let p = r.final_position;
            if r.fractures.last() == Some(&1) {
                assert_abs_diff_eq!(p.z, 1.0, epsilon = 1e-6);
            } else {
                assert_abs_diff_eq!(p.x, 1.0, epsilon = 1e-6);
            }
        }
        let frequency = adjacent as f64 / trials as f64;
        println!("Test: {rule} branch frequency over {trials} trials");
        println!("  adjacent {frequency:.4}, expected {expected:.4}");
        println!("Max Absolute Error: {:.2e}", (frequency - expected).abs());
        assert_abs_diff_eq!(frequency, expected, epsilon = 0.015);
    }
}
