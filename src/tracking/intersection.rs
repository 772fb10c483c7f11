//! Detection of intersection crossings and the move onto the chosen branch.

use super::advector::predictor;
use super::locator::{BoundaryFlag, cell_weights, check_new_cell};
use super::mixing::{self, Candidate, Junction, MixingRule};
use super::particle::{CellClass, Particle};
use crate::discretization::mesh::Mesh;
use crate::numerics::timing::record_intersection;
use crate::physics::velocity::{cell_time_step, interpolate};
use glam::DVec2;
use rand::Rng;
use tracing::warn;

/// A particle snapped onto an intersection and ready to be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub int1: usize,
    pub int2: usize,
    /// Cell the particle is leaving.
    pub prev_cell: Option<usize>,
    /// The other fracture meeting at `int1`.
    pub crossed_fracture: usize,
}

/// Outcome of the approach test on an intersection cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Approach {
    pub flag: Option<BoundaryFlag>,
    pub crossing: Option<Crossing>,
}

/// Re-express the particle in the plane of `cell`'s fracture and adopt the cell.
pub fn change_fracture(mesh: &Mesh, particle: &mut Particle, cell: usize) {
    let target = mesh.cells[cell].fracture;
    if target != particle.fracture {
        let global = mesh.position_3d(particle.position, particle.fracture);
        let velocity = mesh.velocity_3d(particle.velocity, particle.fracture);
        particle.position = mesh.to_local(global, target);
        particle.velocity = mesh.to_local(velocity, target);
        particle.fracture = target;
    }
    particle.cell = Some(cell);
}

/// Intersection segment seen from the particle's cell: the two end nodes and
/// whether a full segment (as opposed to a line end) was found.
fn intersection_segment(mesh: &Mesh, particle: &Particle, cell: usize) -> Option<(usize, usize, bool)> {
    let on_line: Vec<usize> = mesh.cells[cell]
        .nodes
        .iter()
        .copied()
        .filter(|&n| mesh.nodes[n].on_intersection())
        .collect();
    match on_line.as_slice() {
        [] => None,
        [int1] => {
            let along: Vec<usize> = mesh.nodes[*int1]
                .neighbors
                .iter()
                .map(|e| e.node)
                .filter(|&n| {
                    let node = &mesh.nodes[n];
                    node.on_intersection() && node.on_fracture(particle.fracture)
                })
                .take(2)
                .collect();
            match along.as_slice() {
                [] => None,
                [int2] => Some((*int1, *int2, false)),
                [int2, ..] => Some((*int1, *int2, true)),
            }
        }
        [int1, .., int2] => Some((*int1, *int2, true)),
    }
}

fn other_fracture(mesh: &Mesh, node: usize, fracture: usize) -> usize {
    let n = &mesh.nodes[node];
    match n.fractures {
        [Some(f), _] if f != fracture => f,
        [_, Some(f)] => f,
        _ => fracture,
    }
}

/// Flow score and squared speed of `cell` for a particle sitting at `at` on
/// the intersection through `int1`.
pub fn flow_candidate(mesh: &Mesh, at: DVec2, fracture: usize, cell: usize, int1: usize) -> Candidate {
    let c = &mesh.cells[cell];
    let target = c.fracture;
    let mut candidate = Candidate {
        cell,
        fracture: target,
        score: 0.0,
        speed_sq: 0.0,
    };
    let Some(third) = c
        .nodes
        .iter()
        .rev()
        .find(|&&n| !mesh.nodes[n].on_intersection())
    else {
        return candidate;
    };
    let tn = mesh.nodes[*third].local_xy(target);
    let vint = mesh.nodes[int1].local_xy(target);
    let p = if target == fracture {
        at
    } else {
        mesh.to_local(mesh.position_3d(at, fracture), target)
    };
    let Some(w) = cell_weights(mesh, cell, target, p) else {
        return candidate;
    };
    let (v, _) = interpolate(mesh, cell, w);

    let side = (p.x - tn.x) * (p.y - vint.y) - (p.x - vint.x) * (p.y - tn.y);
    let flow = v.x * (p.y - vint.y) - (p.x - vint.x) * v.y;
    candidate.score = flow * side;
    candidate.speed_sq = v.length_squared();
    candidate
}

/// Test whether the particle reaches the intersection during its next step
/// and, if so, snap it onto the intersection.
///
/// The speculative predictor step is kept when no crossing is detected.
pub fn check_distance(mesh: &Mesh, particle: &mut Particle) -> Approach {
    let mut approach = Approach::default();
    let Some(cell) = particle.cell else {
        return approach;
    };
    let Some((int1, int2, segment)) = intersection_segment(mesh, particle, cell) else {
        return approach;
    };
    let fracture = particle.fracture;
    let dt = cell_time_step(mesh, cell, particle.weights);
    let step = (particle.velocity * dt).length();
    let c1 = mesh.nodes[int1].local_xy(fracture);
    let c2 = mesh.nodes[int2].local_xy(fracture);
    let crossed_fracture = other_fracture(mesh, int1, fracture);

    if segment {
        let p = particle.position;
        let base = c1.distance(c2);
        if base <= 0.0 {
            return approach;
        }
        let (side1, side2) = (c1.distance(p), c2.distance(p));
        let s = (side1 + side2 + base) / 2.0;
        let area = (s * (s - base) * (s - side1) * (s - side2)).max(0.0).sqrt();
        let height = area / (base * 0.5);
        if height > step {
            return approach;
        }

        predictor(mesh, particle);
        let (p1, p2) = (particle.position, particle.prev_position);
        let pr1 = (p1.x - c1.x) * (p2.y - c1.y) - (p1.y - c1.y) * (p2.x - c1.x);
        let pr2 = (c1.x - p1.x) * (c2.y - p1.y) - (c1.y - p1.y) * (c2.x - p1.x);
        let pr3 = (p1.x - c2.x) * (p2.y - c2.y) - (p1.y - c2.y) * (p2.x - c2.x);
        let pr4 = (c1.x - p2.x) * (c2.y - p2.y) - (c1.y - p2.y) * (c2.x - p2.x);
        if !(pr1 * pr3 < 0.0 && pr2 * pr4 < 0.0) {
            return approach;
        }

        let a = c1.x * c2.y - c1.y * c2.x;
        let b = p1.x * p2.y - p1.y * p2.x;
        let det = (c1.x - c2.x) * (p1.y - p2.y) - (c1.y - c2.y) * (p1.x - p2.x);
        if det == 0.0 {
            return approach;
        }
        particle.position = DVec2::new(
            ((p1.x - p2.x) * a - (c1.x - c2.x) * b) / det,
            ((p1.y - p2.y) * a - (c1.y - c2.y) * b) / det,
        );
        approach.flag = check_new_cell(mesh, particle);
        if particle.cell.is_some() {
            approach.crossing = Some(Crossing {
                int1,
                int2,
                prev_cell: Some(cell),
                crossed_fracture,
            });
        }
        return approach;
    }

    let mid = (c1 + c2) / 2.0;
    let before = particle.position.distance_squared(mid);
    predictor(mesh, particle);
    let after = particle.position.distance_squared(mid);

    let force = before >= after || {
        let inflowing = mesh.nodes[int1].edge_to(int2).map_or(0, |edge| {
            edge.cells_on(fracture)
                .filter(|&c| flow_candidate(mesh, mid, fracture, c, int1).score > 0.0)
                .count()
        });
        inflowing > 1
    };
    if !force {
        return approach;
    }

    particle.position = mid;
    approach.flag = check_new_cell(mesh, particle);
    match particle.cell {
        Some(found) => {
            approach.crossing = Some(Crossing {
                int1,
                int2,
                prev_cell: Some(found),
                crossed_fracture,
            });
        }
        None => warn!(particle = particle.id, "particle lost at the end of an intersection"),
    }
    approach
}

/// Score the cells around the crossing point, pick one with the mixing rule
/// and move the particle onto it.
///
/// Returns `None` and leaves the particle in place when no cell carries flow
/// away from the intersection.
pub fn across_intersection<R: Rng>(
    mesh: &Mesh,
    particle: &mut Particle,
    crossing: &Crossing,
    rule: MixingRule,
    rng: &mut R,
) -> Option<Candidate> {
    record_intersection(|| {
        let edge = mesh.nodes[crossing.int1].edge_to(crossing.int2)?;
        let candidates = edge
            .cells
            .iter()
            .flatten()
            .map(|&c| flow_candidate(mesh, particle.position, particle.fracture, c, crossing.int1))
            .collect();
        let junction = Junction {
            candidates,
            prev_cell: crossing.prev_cell,
            prev_fracture: crossing
                .prev_cell
                .map_or(particle.fracture, |c| mesh.cells[c].fracture),
        };
        let win = mixing::choose(rule, &junction, rng)?;

        change_fracture(mesh, particle, win.cell);
        particle.class = CellClass::JustCrossed;
        particle.prev_position = particle.position;
        if let Some(w) = cell_weights(mesh, win.cell, particle.fracture, particle.position) {
            particle.weights = w.map(f64::abs);
        }
        Some(win)
    })
}
