use approx::assert_abs_diff_eq;
use dfntrans::discretization::generator::{CrossSpec, PlanarSpec, cross_network, planar_network};
use dfntrans::tracking::locator::{INSIDE_EPS, barycentric_weights, is_inside};
use dfntrans::tracking::particle::{Particle, particle_rng};
use glam::DVec2;
use rand::Rng;

fn cross(a: DVec2, b: DVec2, p: DVec2) -> f64 {
    (b - a).perp_dot(p - a)
}

/// Signed distances of `p` to the three edges, positive inside a
/// counter-clockwise triangle.
fn edge_distances(v: [DVec2; 3], p: DVec2) -> [f64; 3] {
    let orient = cross(v[0], v[1], v[2]).signum();
    [0, 1, 2].map(|i| {
        let (a, b) = (v[i], v[(i + 1) % 3]);
        orient * cross(a, b, p) / (b - a).length()
    })
}

#[test]
fn weights_partition_unity() {
    let mut rng = particle_rng(7, 0);
    let mut max_err: f64 = 0.0;
    let mut checked = 0;
    for _ in 0..10_000 {
        let v = [0, 1, 2].map(|_| DVec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)));
        if cross(v[0], v[1], v[2]).abs() < 1e-3 {
            continue;
        }
        let (a, b): (f64, f64) = (rng.random_range(0.01..0.49), rng.random_range(0.01..0.49));
        let p = v[0] * a + v[1] * b + v[2] * (1.0 - a - b);
        let Some(w) = barycentric_weights(v, p) else {
            continue;
        };
        max_err = max_err.max((w.iter().sum::<f64>() - 1.0).abs());
        checked += 1;
    }
    println!("Test: partition of unity over {checked} triangles");
    println!("Max Absolute Error: {:.2e}", max_err);
    assert!(checked > 9_000);
    assert!(max_err < 1e-12);
}

/// Points within the snapping band of each edge keep an exact partition.
#[test]
fn weights_partition_unity_near_edges() {
    let mut rng = particle_rng(13, 0);
    let mut max_err: f64 = 0.0;
    let mut checked = 0;
    for _ in 0..10_000 {
        let v = [0, 1, 2].map(|_| DVec2::new(rng.random_range(-1.0..1.0), rng.random_range(-1.0..1.0)));
        if cross(v[0], v[1], v[2]).abs() < 1e-3 {
            continue;
        }
        let edge = rng.random_range(0..3usize);
        let near: f64 = rng.random_range(-1e-4..1e-4);
        let a: f64 = rng.random_range(0.01..0.98);
        let mut bary = [0.0; 3];
        bary[edge] = near;
        bary[(edge + 1) % 3] = a;
        bary[(edge + 2) % 3] = 1.0 - a - near;
        let p = v[0] * bary[0] + v[1] * bary[1] + v[2] * bary[2];
        let Some(w) = barycentric_weights(v, p) else {
            continue;
        };
        assert_eq!(w[2], 1.0 - w[0] - w[1]);
        max_err = max_err.max((w.iter().sum::<f64>() - 1.0).abs());
        checked += 1;
    }
    println!("Test: partition of unity near edges over {checked} triangles");
    println!("Max Absolute Error: {:.2e}", max_err);
    assert!(checked > 9_000);
    assert!(max_err < 1e-12);
}

#[test]
fn containment_agrees_with_edge_signs() {
    let mesh = planar_network(&PlanarSpec::default());
    let mut rng = particle_rng(11, 0);
    let (mut accepted, mut rejected) = (0, 0);
    for _ in 0..20_000 {
        let cell = rng.random_range(0..mesh.cells.len());
        let p = DVec2::new(rng.random_range(-1.2..1.2), rng.random_range(-1.2..1.2));
        let distances = edge_distances(mesh.cell_vertices(cell, 0), p);
        let mut particle = Particle::new(0, p, 0);
        let inside = is_inside(&mesh, &mut particle, cell);
        if distances.iter().all(|&d| d > 1e-9) {
            assert!(inside, "point {p} inside cell {cell} was rejected");
            assert!(
                particle
                    .weights
                    .iter()
                    .all(|&w| (-INSIDE_EPS..=1.0 + INSIDE_EPS).contains(&w))
            );
            accepted += 1;
        } else if distances.iter().any(|&d| d < -1e-3) {
            assert!(!inside, "point {p} outside cell {cell} was accepted");
            rejected += 1;
        }
    }
    println!("Test: containment ({accepted} inside, {rejected} outside)");
    assert!(accepted > 0 && rejected > 0);
}

#[test]
fn centroid_locates_in_its_own_cell() {
    for mesh in [planar_network(&PlanarSpec::default()), cross_network(&CrossSpec::default())] {
        for cell in 0..mesh.cells.len() {
            let fracture = mesh.cells[cell].fracture;
            let mut particle = Particle::new(0, mesh.centroid(cell), fracture);
            assert!(is_inside(&mesh, &mut particle, cell), "centroid of cell {cell}");
            assert_eq!(particle.cell, Some(cell));
            for w in particle.weights {
                assert_abs_diff_eq!(w, 1.0 / 3.0, epsilon = 1e-9);
            }
        }
    }
}
