//! Predictor-corrector advection inside one cell and the Lagrangian
//! travel-time and beta accumulation.

use super::particle::Particle;
use crate::discretization::mesh::Mesh;
use crate::physics::velocity::{cell_time_step, interpolate};
use glam::DVec3;

/// Explicit step with the velocity interpolated at the current weights.
/// Records the previous position and returns the step length in time.
pub fn predictor(mesh: &Mesh, particle: &mut Particle) -> f64 {
    let Some(cell) = particle.cell else {
        return 0.0;
    };
    let dt = cell_time_step(mesh, cell, particle.weights);
    let (velocity, pressure) = interpolate(mesh, cell, particle.weights);
    particle.velocity = velocity;
    particle.pressure = pressure;
    particle.prev_position = particle.position;
    particle.position += dt * velocity;
    dt
}

/// Redo the step from the previous position with the step bound of the new cell.
pub fn corrector(mesh: &Mesh, particle: &mut Particle) {
    let Some(cell) = particle.cell else {
        return;
    };
    let dt = cell_time_step(mesh, cell, particle.weights);
    particle.position = particle.prev_position + dt * particle.velocity;
}

/// Advance travel time and beta by the straight-line move from `anchor` to
/// `start`, then move the anchor.
pub fn lagrangian(mesh: &Mesh, particle: &mut Particle, start: DVec3, anchor: &mut DVec3) {
    let distance_sq = start.distance_squared(*anchor);
    let (tau, beta) = match particle.cell {
        Some(cell) if distance_sq > 0.0 => 'step: {
            let speed = mesh.velocity_3d(particle.velocity, particle.fracture).length();
            if speed <= 0.0 {
                break 'step (0.0, 0.0);
            }
            let half_aperture = 0.5 * mesh.nodes[mesh.cells[cell].nodes[0]].aperture;
            let distance = distance_sq.sqrt();
            (distance / speed, distance / (speed * half_aperture))
        }
        _ => (0.0, 0.0),
    };
    *anchor = start;
    particle.time += tau;
    particle.beta += beta;
}
