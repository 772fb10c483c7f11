//! Exit point on the outflow boundary and recovery from no-flow edges.

use super::locator::is_inside;
use super::particle::Particle;
use crate::discretization::mesh::{Mesh, NodeKind};
use glam::DVec2;

/// Intersection of the line through `c1, c2` with the line through `p1, p2`.
pub fn line_intersection(c1: DVec2, c2: DVec2, p1: DVec2, p2: DVec2) -> Option<DVec2> {
    let (a_s, b_s) = (c2.y - c1.y, c1.x - c2.x);
    let c_s = a_s * c1.x + b_s * c1.y;
    let (a_p, b_p) = (p2.y - p1.y, p1.x - p2.x);
    let c_p = a_p * p1.x + b_p * p1.y;
    let det = a_p * b_s - a_s * b_p;
    if det == 0.0 || !det.is_finite() {
        return None;
    }
    Some(DVec2::new(
        (b_s * c_p - b_p * c_s) / det,
        (a_p * c_s - a_s * c_p) / det,
    ))
}

/// Outflow edge seen from the particle's cell.
fn outflow_edge(mesh: &Mesh, particle: &mut Particle, cell: usize) -> Option<(usize, usize)> {
    let out: Vec<usize> = mesh.cells[cell]
        .nodes
        .iter()
        .copied()
        .filter(|&n| mesh.nodes[n].is_outflow())
        .take(2)
        .collect();
    match out.as_slice() {
        [a, b] => Some((*a, *b)),
        [a] => {
            let edge = mesh.nodes[*a].neighbors.iter().find(|e| {
                let other = &mesh.nodes[e.node];
                other.is_outflow() && other.kind != NodeKind::Interior
            })?;
            if let Some(next) = edge.cells_on(particle.fracture).next() {
                particle.cell = Some(next);
            }
            Some((*a, edge.node))
        }
        _ => None,
    }
}

/// Move a particle that left through the outflow zone back onto the outflow
/// edge and add the travel time from the start of its last step to that edge.
///
/// Returns `false` and leaves the particle untouched when the cell has no
/// outflow edge or the step runs parallel to it.
pub fn final_position(mesh: &Mesh, particle: &mut Particle) -> bool {
    let Some(cell) = particle.cell else {
        return false;
    };
    let Some((a, b)) = outflow_edge(mesh, particle, cell) else {
        return false;
    };
    let fracture = particle.fracture;
    let c1 = mesh.nodes[a].local_xy(fracture);
    let c2 = mesh.nodes[b].local_xy(fracture);
    let Some(exit) = line_intersection(c1, c2, particle.position, particle.prev_position) else {
        return false;
    };

    let speed = particle.velocity.length();
    if speed > 0.0 {
        particle.time += exit.distance(particle.prev_position) / speed;
    }
    particle.prev_position = particle.position;
    particle.position = exit;
    true
}

/// Cell preference after overshooting a no-flow edge, by the summed legacy
/// type code of its vertices: interior, then one exterior vertex, then one
/// exterior intersection vertex, then anything heavier.
fn recovery_rank(code_sum: u32) -> Option<usize> {
    match code_sum {
        0 => Some(0),
        10 => Some(1),
        12 => Some(2),
        s if s > 15 => Some(3),
        _ => None,
    }
}

/// Put a particle that fell off a no-flow edge back at the centroid of a
/// cell next to `prev_cell`.
pub fn move_to_next_cell_bound(mesh: &Mesh, particle: &mut Particle, prev_cell: usize) -> bool {
    let nodes = mesh.cells[prev_cell].nodes;
    let pivot = nodes
        .iter()
        .copied()
        .find(|&n| mesh.nodes[n].type_code() == 0)
        .unwrap_or(nodes[2]);

    let mut ranked: [Option<usize>; 4] = [None; 4];
    'scan: for edge in &mesh.nodes[pivot].neighbors {
        for cell in edge.cells_on(particle.fracture) {
            if cell == prev_cell {
                continue;
            }
            let sum: u32 = mesh.cells[cell]
                .nodes
                .iter()
                .map(|&n| mesh.nodes[n].type_code())
                .sum();
            if let Some(rank) = recovery_rank(sum) {
                ranked[rank] = Some(cell);
                if rank == 0 {
                    break 'scan;
                }
            }
        }
    }

    let Some(cell) = ranked.into_iter().flatten().next() else {
        return false;
    };
    particle.position = mesh.centroid(cell);
    is_inside(mesh, particle, cell)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{PlanarSpec, planar_network};
    use approx::assert_relative_eq;

    #[test]
    fn crossing_lines_meet() {
        let x = line_intersection(
            DVec2::new(1.0, -1.0),
            DVec2::new(1.0, 1.0),
            DVec2::new(1.5, 0.25),
            DVec2::new(0.5, 0.25),
        )
        .unwrap();
        assert_relative_eq!(x.x, 1.0, epsilon = 1e-14);
        assert_relative_eq!(x.y, 0.25, epsilon = 1e-14);

        let parallel = line_intersection(DVec2::ZERO, DVec2::X, DVec2::Y, DVec2::new(1.0, 1.0));
        assert!(parallel.is_none());
    }

    #[test]
    fn exit_point_lies_on_the_outflow_edge() {
        let mesh = planar_network(&PlanarSpec::default());
        // Upper triangle of the last column, two vertices on x = 1.
        let cell = 119;
        let mut particle = Particle::new(0, mesh.centroid(cell), 0);
        assert!(is_inside(&mesh, &mut particle, cell));
        let start = particle.position;
        particle.prev_position = start;
        particle.velocity = DVec2::new(1.0, 0.0);
        particle.position = start + DVec2::new(0.2, 0.0);

        assert!(final_position(&mesh, &mut particle));
        assert_relative_eq!(particle.position.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(particle.position.y, start.y, epsilon = 1e-12);
        assert_relative_eq!(particle.time, 1.0 - start.x, epsilon = 1e-12);
    }

    #[test]
    fn recovery_prefers_interior_cells() {
        let mesh = planar_network(&PlanarSpec::default());
        let prev = 45;
        let mut particle = Particle::new(0, DVec2::new(5.0, 5.0), 0);
        assert!(move_to_next_cell_bound(&mesh, &mut particle, prev));
        let cell = particle.cell.unwrap();
        assert_ne!(cell, prev);
        assert!(mesh.cells[cell].nodes.iter().all(|&n| mesh.nodes[n].type_code() == 0));
    }
}
