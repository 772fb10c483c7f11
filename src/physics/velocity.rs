use crate::discretization::mesh::Mesh;
use glam::DVec2;

/// Squared-speed floor used when bounding the step of a stagnant node.
pub const SPEED_SQ_FLOOR: f64 = 1e-10;
/// Fraction of the node's transit time allowed per step.
pub const STEP_FRACTION: f64 = 0.005;

/// Per-node stable step bound for one velocity slot.
pub fn node_time_step(volume: f64, aperture: f64, velocity: DVec2) -> f64 {
    let speed_sq = velocity.length_squared();
    let speed_sq = if speed_sq > SPEED_SQ_FLOOR {
        speed_sq
    } else {
        SPEED_SQ_FLOOR
    };
    STEP_FRACTION * ((volume / aperture) / speed_sq).sqrt()
}

/// Fill the step bound of every node and velocity slot.
pub fn define_time_steps(mesh: &mut Mesh) {
    for node in mesh.nodes.iter_mut() {
        for slot in 0..4 {
            node.timestep[slot] = node_time_step(node.volume, node.aperture, node.velocity[slot]);
        }
    }
}

/// Convert velocities from per-second to per-time-unit.
pub fn scale_velocities(mesh: &mut Mesh, seconds_per_unit: f64) {
    for node in mesh.nodes.iter_mut() {
        for v in node.velocity.iter_mut() {
            *v *= seconds_per_unit;
        }
    }
}

/// Velocity and pressure at barycentric `weights` inside `cell`.
pub fn interpolate(mesh: &Mesh, cell: usize, weights: [f64; 3]) -> (DVec2, f64) {
    let c = &mesh.cells[cell];
    let mut velocity = DVec2::ZERO;
    let mut pressure = 0.0;
    for i in 0..3 {
        let node = &mesh.nodes[c.nodes[i]];
        velocity += weights[i] * node.velocity[c.velocity_slot[i]];
        pressure += weights[i] * node.pressure;
    }
    (velocity, pressure)
}

pub fn cell_time_step(mesh: &Mesh, cell: usize, weights: [f64; 3]) -> f64 {
    let c = &mesh.cells[cell];
    (0..3)
        .map(|i| weights[i] * mesh.nodes[c.nodes[i]].timestep[c.velocity_slot[i]])
        .sum()
}
