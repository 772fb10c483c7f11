use super::frame::{self, frame_from_normal};
use super::mesh::{BoundaryZone, Cell, Fracture, Mesh, Node, NodeKind};
use super::topology::assemble_adjacency;
use glam::{DVec2, DVec3};

/// A single square fracture in the z = 0 plane with a uniform velocity.
#[derive(Debug, Clone)]
pub struct PlanarSpec {
    pub cells_per_half: usize,
    pub half_length: f64,
    pub aperture: f64,
    pub velocity: DVec2,
}

impl Default for PlanarSpec {
    fn default() -> Self {
        Self {
            cells_per_half: 5,
            half_length: 1.0,
            aperture: 1e-3,
            velocity: DVec2::new(1.0, 0.0),
        }
    }
}

/// Speeds of the four half-planes of a two-fracture cross.
#[derive(Debug, Clone, Copy)]
pub struct CrossSpeeds {
    /// Fracture 0 (z = 0), x < 0, flowing towards the intersection.
    pub a_in: f64,
    /// Fracture 0, x > 0, flowing away from the intersection.
    pub a_out: f64,
    /// Fracture 1 (x = 0), z < 0, flowing towards the intersection.
    pub b_in: f64,
    /// Fracture 1, z > 0, flowing away from the intersection.
    pub b_out: f64,
}

/// Two orthogonal fractures, z = 0 and x = 0, meeting along the y axis.
#[derive(Debug, Clone)]
pub struct CrossSpec {
    pub cells_per_half: usize,
    pub half_length: f64,
    pub aperture: f64,
    pub speeds: CrossSpeeds,
}

impl Default for CrossSpec {
    fn default() -> Self {
        Self {
            cells_per_half: 4,
            half_length: 1.0,
            aperture: 1e-3,
            speeds: CrossSpeeds {
                a_in: 1.0,
                a_out: 1.5,
                b_in: 1.0,
                b_out: 0.5,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    MinX,
    MaxX,
}

/// One square fracture patch centred on the origin of its own plane.
struct Patch {
    normal: DVec3,
    /// Velocity for local x < 0.
    lower: DVec2,
    /// Velocity for local x >= 0.
    upper: DVec2,
    inflow: Side,
}

impl Patch {
    fn velocity_at(&self, local: DVec2) -> DVec2 {
        if local.x < 0.0 { self.lower } else { self.upper }
    }
}

/// Lattice of vertex positions on `[-h, h]²` with `2n` cells per side.
pub fn regular_grid_points(half_length: f64, cells_per_half: usize) -> Vec<DVec2> {
    let side = 2 * cells_per_half;
    let h = half_length / cells_per_half as f64;
    let mut points = Vec::with_capacity((side + 1) * (side + 1));
    for j in 0..=side {
        for i in 0..=side {
            points.push(DVec2::new(-half_length + i as f64 * h, -half_length + j as f64 * h));
        }
    }
    points
}

pub fn planar_network(spec: &PlanarSpec) -> Mesh {
    let inflow = if spec.velocity.x >= 0.0 { Side::MinX } else { Side::MaxX };
    let patch = Patch {
        normal: DVec3::Z,
        lower: spec.velocity,
        upper: spec.velocity,
        inflow,
    };
    build_network(&[patch], spec.cells_per_half, spec.half_length, spec.aperture)
}

pub fn cross_network(spec: &CrossSpec) -> Mesh {
    let s = spec.speeds;
    let horizontal = Patch {
        normal: DVec3::Z,
        lower: DVec2::new(s.a_in, 0.0),
        upper: DVec2::new(s.a_out, 0.0),
        inflow: Side::MinX,
    };
    // Local x of the vertical plane runs along -z.
    let vertical = Patch {
        normal: DVec3::X,
        lower: DVec2::new(-s.b_out, 0.0),
        upper: DVec2::new(-s.b_in, 0.0),
        inflow: Side::MaxX,
    };
    build_network(
        &[horizontal, vertical],
        spec.cells_per_half,
        spec.half_length,
        spec.aperture,
    )
}

fn build_network(patches: &[Patch], n: usize, half_length: f64, aperture: f64) -> Mesh {
    let side = 2 * n;
    let h = half_length / n as f64;
    let lattice = regular_grid_points(half_length, n);
    let shared_line = patches.len() > 1;

    let mut nodes: Vec<Node> = Vec::new();
    let mut cells: Vec<Cell> = Vec::new();
    let mut fractures: Vec<Fracture> = Vec::new();
    // Node index of lattice point (i, j) on the intersection line of patch 0.
    let mut line_nodes: Vec<usize> = vec![0; side + 1];

    for (p, patch) in patches.iter().enumerate() {
        let plane = frame_from_normal(patch.normal);
        let first_node = nodes.len();
        let mut index = vec![0usize; lattice.len()];

        for j in 0..=side {
            for i in 0..=side {
                let k = j * (side + 1) + i;
                let local = lattice[k];
                let on_line = shared_line && i == n;
                let wx = if i == 0 || i == side { h / 2.0 } else { h };
                let wy = if j == 0 || j == side { h / 2.0 } else { h };
                let volume = wx * wy * aperture;

                if on_line && p > 0 {
                    let shared = line_nodes[j];
                    let coord = nodes[shared].coord;
                    let node = &mut nodes[shared];
                    node.fractures[1] = Some(p);
                    node.local[1] = frame::to_local(&plane.rot2, coord);
                    node.velocity[2] = patch.lower;
                    node.velocity[3] = patch.upper;
                    node.volume += volume;
                    index[k] = shared;
                    continue;
                }

                let coord = frame::to_global(&plane.rot3, local.extend(0.0));
                let boundary_row = j == 0 || j == side;
                let kind = match (on_line, boundary_row || i == 0 || i == side) {
                    (true, true) => NodeKind::ExteriorIntersection,
                    (true, false) => NodeKind::Intersection,
                    (false, true) => NodeKind::Exterior,
                    (false, false) => NodeKind::Interior,
                };
                let mut zones = BoundaryZone::NONE;
                let edge = match i {
                    0 => Some(Side::MinX),
                    i if i == side => Some(Side::MaxX),
                    _ => None,
                };
                if let Some(edge) = edge {
                    zones.insert(if edge == patch.inflow {
                        BoundaryZone::INFLOW
                    } else {
                        BoundaryZone::OUTFLOW
                    });
                }
                let v = patch.velocity_at(local);
                let velocity = if on_line {
                    [patch.lower, patch.upper, DVec2::ZERO, DVec2::ZERO]
                } else {
                    [v; 4]
                };
                let local3 = frame::to_local(&plane.rot2, coord);
                nodes.push(Node {
                    coord,
                    local: [local3, local3],
                    fractures: [Some(p), None],
                    kind,
                    zones,
                    volume,
                    aperture,
                    pressure: -local.dot(v),
                    velocity,
                    timestep: [0.0; 4],
                    neighbors: Vec::new(),
                });
                index[k] = nodes.len() - 1;
                if on_line {
                    line_nodes[j] = index[k];
                }
            }
        }

        let first_cell = cells.len();
        for j in 0..side {
            for i in 0..side {
                let a = index[j * (side + 1) + i];
                let b = index[j * (side + 1) + i + 1];
                let c = index[(j + 1) * (side + 1) + i];
                let d = index[(j + 1) * (side + 1) + i + 1];
                let upper_half = i >= n;
                for tri in [[a, b, c], [b, d, c]] {
                    let velocity_slot = tri.map(|v| {
                        let node = &nodes[v];
                        if node.fractures[1].is_some() {
                            2 * node.slot_for(p) + usize::from(upper_half)
                        } else {
                            0
                        }
                    });
                    cells.push(Cell {
                        nodes: tri,
                        fracture: p,
                        velocity_slot,
                    });
                }
            }
        }

        fractures.push(Fracture {
            theta: plane.theta,
            rot2: plane.rot2,
            rot3: plane.rot3,
            first_node,
            node_count: nodes.len() - first_node,
            first_cell,
            cell_count: cells.len() - first_cell,
        });
    }

    assemble_adjacency(&mut nodes, &cells);
    assign_fluxes(&mut nodes, patches, h, aperture);

    Mesh {
        nodes,
        cells,
        fractures,
    }
}

fn assign_fluxes(nodes: &mut [Node], patches: &[Patch], h: f64, aperture: f64) {
    for a in 0..nodes.len() {
        for e in 0..nodes[a].neighbors.len() {
            let edge = &nodes[a].neighbors[e];
            let Some(fracture) = edge.fractures.iter().flatten().next().copied() else {
                continue;
            };
            let la = nodes[a].local_xy(fracture);
            let lb = nodes[edge.node].local_xy(fracture);
            let dir = (lb - la).normalize_or_zero();
            let v = patches[fracture].velocity_at((la + lb) / 2.0);
            let edge = &mut nodes[a].neighbors[e];
            edge.area = aperture * h;
            edge.flux = edge.area * v.dot(dir);
        }
    }
}
