//! Point location on the triangulated fracture planes.
//!
//! Containment is tested with barycentric weights computed in the plane of the
//! particle's current fracture. The first two weights are snapped to zero when
//! close to it, and the last is recomputed from them so the three sum to one.

use super::particle::{CellClass, Particle};
use crate::discretization::mesh::{Mesh, NodeKind};
use crate::numerics::timing::record_locate;
use crate::physics::velocity::cell_time_step;
use glam::DVec2;

/// Weights within this distance of zero are snapped to zero.
pub const SNAP_EPS: f64 = 1e-4;
/// Tolerance of the containment test.
pub const INSIDE_EPS: f64 = 1e-7;

/// What the relocation step learned about the domain boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryFlag {
    /// Left through the outflow boundary.
    Exit,
    /// Overshot a no-flow edge and could not be reflected back.
    OffEdge,
}

fn snap(w: f64) -> f64 {
    if (-SNAP_EPS..=SNAP_EPS).contains(&w) { 0.0 } else { w }
}

/// Barycentric weights of `p` against a triangle; `None` for a degenerate triangle.
pub fn barycentric_weights(vertices: [DVec2; 3], p: DVec2) -> Option<[f64; 3]> {
    let [n1, n2, n3] = vertices;
    let det = (n2.y - n3.y) * (n1.x - n3.x) + (n3.x - n2.x) * (n1.y - n3.y);
    let scale = (n1 - n3).length_squared().max((n2 - n3).length_squared());
    if !det.is_finite() || det.abs() <= f64::EPSILON * scale {
        return None;
    }
    let w0 = ((n2.y - n3.y) * (p.x - n3.x) + (n3.x - n2.x) * (p.y - n3.y)) / det;
    let w1 = ((n3.y - n1.y) * (p.x - n3.x) + (n1.x - n3.x) * (p.y - n3.y)) / det;
    let (w0, w1) = (snap(w0), snap(w1));
    let w2 = 1.0 - w0 - w1;
    Some([w0, w1, w2])
}

pub fn cell_weights(mesh: &Mesh, cell: usize, fracture: usize, p: DVec2) -> Option<[f64; 3]> {
    barycentric_weights(mesh.cell_vertices(cell, fracture), p)
}

/// Loose containment test. On success the particle adopts the cell, its
/// weights and the cell classification.
pub fn is_inside(mesh: &Mesh, particle: &mut Particle, cell: usize) -> bool {
    let Some(w) = cell_weights(mesh, cell, particle.fracture, particle.position) else {
        return false;
    };
    if !w.iter().all(|&x| (-INSIDE_EPS..=1.0 + INSIDE_EPS).contains(&x)) {
        return false;
    }

    particle.weights = w.map(f64::abs);
    particle.cell = Some(cell);

    let vertices = mesh.cells[cell].nodes.map(|n| &mesh.nodes[n]);
    let exterior = vertices.iter().filter(|n| n.is_plain_exterior()).count();
    let mut class = if exterior > 1 {
        CellClass::Boundary
    } else {
        CellClass::Interior
    };
    if particle.class != CellClass::JustCrossed && vertices.iter().any(|n| n.on_intersection()) {
        class = if exterior > 0 {
            CellClass::BoundaryIntersection
        } else {
            CellClass::Intersection
        };
    }
    particle.class = class;
    true
}

/// Scan the cells around `node` on the particle's fracture; stops at the first hit.
pub fn neighbor_cells(mesh: &Mesh, particle: &mut Particle, node: usize) -> bool {
    let fracture = particle.fracture;
    for edge in &mesh.nodes[node].neighbors {
        for cell in edge.cells_on(fracture) {
            if is_inside(mesh, particle, cell) {
                return true;
            }
        }
    }
    false
}

/// Search the neighborhoods of a cell's vertices, heaviest weight first.
pub fn search_neighborhood(mesh: &Mesh, particle: &mut Particle, nodes: [usize; 3]) -> bool {
    record_locate(|| {
        let w = particle.weights;
        let mut first = 0;
        if w[1] >= w[0] && w[1] >= w[2] {
            first = 1;
        }
        if w[2] >= w[1] && w[2] >= w[0] {
            first = 2;
        }
        if neighbor_cells(mesh, particle, nodes[first]) {
            return true;
        }
        (0..3)
            .filter(|&i| i != first)
            .any(|i| neighbor_cells(mesh, particle, nodes[i]))
    })
}

/// Strict re-check of the current cell after a move, falling back to the
/// neighborhood search, a reflection off no-flow edges, and boundary detection.
///
/// Leaves `particle.cell` as `None` when no cell was found. Returns the boundary
/// flag raised during the check, if any.
pub fn check_new_cell(mesh: &Mesh, particle: &mut Particle) -> Option<BoundaryFlag> {
    let cell = particle.cell?;
    let nodes = mesh.cells[cell].nodes;
    let dt = cell_time_step(mesh, cell, particle.weights);

    if let Some(w) = cell_weights(mesh, cell, particle.fracture, particle.position) {
        if w.iter().all(|&x| (0.0..=1.0).contains(&x)) {
            particle.weights = w;
            return None;
        }
    }

    particle.cell = None;
    search_neighborhood(mesh, particle, nodes);

    let vertices = nodes.map(|n| &mesh.nodes[n]);
    let mut flag = None;
    if vertices.iter().any(|n| n.is_outflow()) {
        flag = Some(BoundaryFlag::Exit);
    }
    if particle.cell.is_some() {
        return flag;
    }

    let on_edge = vertices.iter().any(|n| n.is_bare_exterior());
    let on_outflow_edge = vertices.iter().any(|n| n.is_outflow_exterior());
    if on_edge && !on_outflow_edge {
        for flip in [DVec2::new(-1.0, 1.0), DVec2::new(1.0, -1.0)] {
            particle.position = particle.prev_position + dt * particle.velocity * flip;
            if search_neighborhood(mesh, particle, nodes) {
                break;
            }
        }
        if particle.cell.is_none() {
            flag = Some(BoundaryFlag::OffEdge);
        }
    }

    let outflow_vertex = vertices
        .iter()
        .any(|n| n.is_outflow() && n.kind != NodeKind::Intersection);
    let outflow_nearby = || {
        vertices.iter().any(|n| {
            n.neighbors
                .iter()
                .any(|e| mesh.nodes[e.node].is_outflow_exterior())
        })
    };
    if outflow_vertex || outflow_nearby() {
        flag = Some(BoundaryFlag::Exit);
    }
    flag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{PlanarSpec, planar_network};
    use crate::physics::velocity::define_time_steps;

    fn triangle() -> [DVec2; 3] {
        [DVec2::new(0.0, 0.0), DVec2::new(2.0, 0.0), DVec2::new(0.0, 1.0)]
    }

    #[test]
    fn weights_reproduce_vertices() {
        let t = triangle();
        assert_eq!(barycentric_weights(t, t[0]).unwrap(), [1.0, 0.0, 0.0]);
        assert_eq!(barycentric_weights(t, t[1]).unwrap(), [0.0, 1.0, 0.0]);
        assert_eq!(barycentric_weights(t, t[2]).unwrap(), [0.0, 0.0, 1.0]);
    }

    #[test]
    fn near_zero_weights_are_snapped() {
        let w = barycentric_weights(triangle(), DVec2::new(0.5, 0.75 - 2.5e-5)).unwrap();
        assert_eq!(w[0], 0.0);
        assert_eq!(w[2], 1.0 - w[0] - w[1]);
        assert_eq!(w.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn last_weight_is_recomputed_not_snapped() {
        let w = barycentric_weights(triangle(), DVec2::new(1.0, 5e-5)).unwrap();
        assert!(w[2] > 0.0 && w[2] < SNAP_EPS);
        assert_eq!(w[2], 1.0 - w[0] - w[1]);
    }

    #[test]
    fn degenerate_triangle_has_no_weights() {
        let flat = [DVec2::ZERO, DVec2::new(1.0, 1.0), DVec2::new(2.0, 2.0)];
        assert!(barycentric_weights(flat, DVec2::new(0.5, 0.1)).is_none());
    }

    #[test]
    fn search_finds_the_neighbor_cell() {
        let mut mesh = planar_network(&PlanarSpec::default());
        define_time_steps(&mut mesh);
        let start = 45;
        let mut particle = Particle::new(0, mesh.centroid(start), 0);
        assert!(is_inside(&mesh, &mut particle, start));

        particle.prev_position = particle.position;
        particle.position += DVec2::new(0.2, 0.0);
        let flag = check_new_cell(&mesh, &mut particle);
        assert_eq!(flag, None);
        let found = particle.cell.unwrap();
        assert_ne!(found, start);
        let w = cell_weights(&mesh, found, 0, particle.position).unwrap();
        assert!(w.iter().all(|&x| x >= -INSIDE_EPS));
    }
}
