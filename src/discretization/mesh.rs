use glam::{DVec2, DVec3};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

use super::frame;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mesh file could not be parsed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cell {cell} references missing node {node}")]
    NodeOutOfRange { cell: usize, node: usize },
    #[error("cell {cell} selects velocity slot {slot}, only 4 exist")]
    VelocitySlot { cell: usize, slot: usize },
    #[error("cell {cell} lies outside the cell range of fracture {fracture}")]
    NonContiguousCells { cell: usize, fracture: usize },
    #[error("intersection node {node} must belong to two fractures")]
    IntersectionMembership { node: usize },
    #[error("edge {from} -> {to} has no reverse edge")]
    AsymmetricAdjacency { from: usize, to: usize },
    #[error("fracture {fracture} spans nodes or cells beyond the mesh")]
    FractureRange { fracture: usize },
    #[error("node {node} belongs to missing fracture {fracture}")]
    NodeFracture { node: usize, fracture: usize },
    #[error("edge {from} -> {to} references missing cell {cell}")]
    EdgeCell { from: usize, to: usize, cell: usize },
    #[error("edge {from} -> {to} references missing fracture {fracture}")]
    EdgeFracture { from: usize, to: usize, fracture: usize },
}

/// Topological role of a node, independent of any flow boundary overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Interior,
    Exterior,
    Intersection,
    ExteriorIntersection,
}

impl NodeKind {
    pub fn is_intersection(self) -> bool {
        matches!(self, NodeKind::Intersection | NodeKind::ExteriorIntersection)
    }

    pub fn is_exterior(self) -> bool {
        matches!(self, NodeKind::Exterior | NodeKind::ExteriorIntersection)
    }
}

/// Flow boundary membership, kept apart from [`NodeKind`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryZone(u8);

impl BoundaryZone {
    pub const NONE: BoundaryZone = BoundaryZone(0);
    pub const INFLOW: BoundaryZone = BoundaryZone(1);
    pub const OUTFLOW: BoundaryZone = BoundaryZone(2);

    pub fn contains(self, other: BoundaryZone) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    pub fn insert(&mut self, other: BoundaryZone) {
        self.0 |= other.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// One neighbor of a node: the connecting edge and the (up to 4) cells sharing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEdge {
    pub node: usize,
    pub flux: f64,
    pub area: f64,
    pub cells: [Option<usize>; 4],
    pub fractures: [Option<usize>; 4],
}

impl NodeEdge {
    pub fn new(node: usize) -> Self {
        Self {
            node,
            flux: 0.0,
            area: 0.0,
            cells: [None; 4],
            fractures: [None; 4],
        }
    }

    /// Cells bordering this edge that lie on `fracture`.
    pub fn cells_on(&self, fracture: usize) -> impl Iterator<Item = usize> + '_ {
        self.cells
            .iter()
            .zip(self.fractures.iter())
            .filter_map(move |(c, f)| match (c, f) {
                (Some(c), Some(f)) if *f == fracture => Some(*c),
                _ => None,
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub coord: DVec3,
    /// Local (in-plane) coordinates, one entry per fracture membership slot.
    pub local: [DVec3; 2],
    pub fractures: [Option<usize>; 2],
    pub kind: NodeKind,
    #[serde(default)]
    pub zones: BoundaryZone,
    pub volume: f64,
    pub aperture: f64,
    pub pressure: f64,
    pub velocity: [DVec2; 4],
    #[serde(default)]
    pub timestep: [f64; 4],
    pub neighbors: Vec<NodeEdge>,
}

impl Node {
    /// Membership slot of `fracture`, falling back to the first slot.
    pub fn slot_for(&self, fracture: usize) -> usize {
        if self.fractures[0] == Some(fracture) {
            0
        } else if self.fractures[1] == Some(fracture) {
            1
        } else {
            0
        }
    }

    pub fn on_fracture(&self, fracture: usize) -> bool {
        self.fractures.contains(&Some(fracture))
    }

    pub fn local_xy(&self, fracture: usize) -> DVec2 {
        self.local[self.slot_for(fracture)].truncate()
    }

    /// Intersection node carrying no flow boundary overlay.
    pub fn on_intersection(&self) -> bool {
        self.kind.is_intersection() && self.zones.is_empty()
    }

    /// Exterior node of a single fracture without flow overlay.
    pub fn is_plain_exterior(&self) -> bool {
        self.kind == NodeKind::Exterior && self.zones.is_empty()
    }

    /// Any exterior node without flow overlay, intersection or not.
    pub fn is_bare_exterior(&self) -> bool {
        self.kind.is_exterior() && self.zones.is_empty()
    }

    pub fn is_outflow(&self) -> bool {
        self.zones.contains(BoundaryZone::OUTFLOW) && !self.zones.contains(BoundaryZone::INFLOW)
    }

    pub fn is_outflow_exterior(&self) -> bool {
        self.is_outflow() && self.kind.is_exterior()
    }

    pub fn is_inflow(&self) -> bool {
        self.zones.contains(BoundaryZone::INFLOW)
    }

    /// Legacy integer type code: 0/10/2/12 plus 200 (outflow) or 300 (inflow).
    pub fn type_code(&self) -> u32 {
        let base = match self.kind {
            NodeKind::Interior => 0,
            NodeKind::Exterior => 10,
            NodeKind::Intersection => 2,
            NodeKind::ExteriorIntersection => 12,
        };
        let mut overlay = 0;
        if self.zones.contains(BoundaryZone::OUTFLOW) {
            overlay += 200;
        }
        if self.zones.contains(BoundaryZone::INFLOW) {
            overlay += 300;
        }
        base + overlay
    }

    pub fn edge_to(&self, other: usize) -> Option<&NodeEdge> {
        self.neighbors.iter().find(|e| e.node == other)
    }

    pub fn total_flux(&self) -> f64 {
        self.neighbors.iter().map(|e| e.flux).sum()
    }

    pub fn total_abs_flux(&self) -> f64 {
        self.neighbors.iter().map(|e| e.flux.abs()).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub nodes: [usize; 3],
    pub fracture: usize,
    /// Velocity slot used at each vertex for this cell's orientation.
    pub velocity_slot: [usize; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fracture {
    pub theta: f64,
    /// Global to local rotation.
    pub rot2: nalgebra::Matrix3<f64>,
    /// Local to global rotation.
    pub rot3: nalgebra::Matrix3<f64>,
    pub first_node: usize,
    pub node_count: usize,
    pub first_cell: usize,
    pub cell_count: usize,
}

impl Fracture {
    pub fn cell_range(&self) -> std::ops::Range<usize> {
        self.first_cell..self.first_cell + self.cell_count
    }
}

/// The read-only fracture network queried by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    pub nodes: Vec<Node>,
    pub cells: Vec<Cell>,
    pub fractures: Vec<Fracture>,
}

/// 1-based label used in every file written for external tools.
pub fn external_id(index: usize) -> usize {
    index + 1
}

impl Mesh {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, MeshError> {
        let reader = BufReader::new(File::open(path)?);
        let mesh: Mesh = serde_json::from_reader(reader)?;
        mesh.validate()?;
        Ok(mesh)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), MeshError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), MeshError> {
        for (fi, frac) in self.fractures.iter().enumerate() {
            let nodes_end = frac.first_node.checked_add(frac.node_count);
            let cells_end = frac.first_cell.checked_add(frac.cell_count);
            let fits = frac.first_node < self.nodes.len()
                && nodes_end.is_some_and(|end| end <= self.nodes.len())
                && cells_end.is_some_and(|end| end <= self.cells.len());
            if !fits {
                return Err(MeshError::FractureRange { fracture: fi });
            }
        }

        for (ci, cell) in self.cells.iter().enumerate() {
            for &n in &cell.nodes {
                if n >= self.nodes.len() {
                    return Err(MeshError::NodeOutOfRange { cell: ci, node: n });
                }
            }
            for &slot in &cell.velocity_slot {
                if slot >= 4 {
                    return Err(MeshError::VelocitySlot { cell: ci, slot });
                }
            }
            let in_range = self
                .fractures
                .get(cell.fracture)
                .is_some_and(|f| f.cell_range().contains(&ci));
            if !in_range {
                return Err(MeshError::NonContiguousCells {
                    cell: ci,
                    fracture: cell.fracture,
                });
            }
        }

        for (ni, node) in self.nodes.iter().enumerate() {
            if node.kind.is_intersection() && node.fractures.iter().any(Option::is_none) {
                return Err(MeshError::IntersectionMembership { node: ni });
            }
            if let Some(&fracture) = node
                .fractures
                .iter()
                .flatten()
                .find(|&&f| f >= self.fractures.len())
            {
                return Err(MeshError::NodeFracture { node: ni, fracture });
            }
            for edge in &node.neighbors {
                if let Some(&cell) = edge.cells.iter().flatten().find(|&&c| c >= self.cells.len()) {
                    return Err(MeshError::EdgeCell {
                        from: ni,
                        to: edge.node,
                        cell,
                    });
                }
                if let Some(&fracture) = edge
                    .fractures
                    .iter()
                    .flatten()
                    .find(|&&f| f >= self.fractures.len())
                {
                    return Err(MeshError::EdgeFracture {
                        from: ni,
                        to: edge.node,
                        fracture,
                    });
                }
                let reverse = self
                    .nodes
                    .get(edge.node)
                    .is_some_and(|other| other.edge_to(ni).is_some());
                if !reverse {
                    return Err(MeshError::AsymmetricAdjacency {
                        from: ni,
                        to: edge.node,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn inflow_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_inflow())
            .collect()
    }

    pub fn outflow_nodes(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|&i| self.nodes[i].is_outflow())
            .collect()
    }

    /// Net volumetric flux entering through the inflow zone.
    pub fn total_inflow_flux(&self, density: f64) -> f64 {
        let total: f64 = self
            .nodes
            .iter()
            .filter(|n| n.is_inflow())
            .map(Node::total_flux)
            .sum();
        total.abs() / density
    }

    /// Vertex coordinates of `cell` in the plane of `fracture`.
    pub fn cell_vertices(&self, cell: usize, fracture: usize) -> [DVec2; 3] {
        let c = &self.cells[cell];
        c.nodes.map(|n| self.nodes[n].local_xy(fracture))
    }

    pub fn centroid(&self, cell: usize) -> DVec2 {
        let c = &self.cells[cell];
        let [a, b, d] = self.cell_vertices(cell, c.fracture);
        (a + b + d) / 3.0
    }

    /// Lift an in-plane position of `fracture` to global coordinates.
    pub fn position_3d(&self, pos: DVec2, fracture: usize) -> DVec3 {
        let frac = &self.fractures[fracture];
        let anchor = &self.nodes[frac.first_node];
        if frac.theta != 0.0 {
            let third = anchor.local[anchor.slot_for(fracture)].z;
            frame::to_global(&frac.rot3, pos.extend(third))
        } else {
            pos.extend(anchor.coord.z)
        }
    }

    pub fn velocity_3d(&self, vel: DVec2, fracture: usize) -> DVec3 {
        let frac = &self.fractures[fracture];
        if frac.theta != 0.0 {
            frame::to_global(&frac.rot3, vel.extend(0.0))
        } else {
            vel.extend(0.0)
        }
    }

    /// Project a global position into the plane of `fracture`.
    pub fn to_local(&self, pos: DVec3, fracture: usize) -> DVec2 {
        let frac = &self.fractures[fracture];
        if frac.theta != 0.0 {
            frame::to_local(&frac.rot2, pos).truncate()
        } else {
            pos.truncate()
        }
    }

    /// Aperture used for diffusion: first non-intersection vertex of the cell.
    pub fn cell_aperture(&self, cell: usize) -> f64 {
        let c = &self.cells[cell];
        c.nodes
            .iter()
            .map(|&n| &self.nodes[n])
            .find(|n| !n.on_intersection())
            .unwrap_or(&self.nodes[c.nodes[2]])
            .aperture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretization::generator::{CrossSpec, cross_network};

    fn small_cross() -> Mesh {
        cross_network(&CrossSpec {
            cells_per_half: 1,
            ..Default::default()
        })
    }

    fn node(kind: NodeKind, zones: BoundaryZone) -> Node {
        Node {
            coord: DVec3::ZERO,
            local: [DVec3::ZERO; 2],
            fractures: [Some(0), None],
            kind,
            zones,
            volume: 1.0,
            aperture: 1.0,
            pressure: 0.0,
            velocity: [DVec2::ZERO; 4],
            timestep: [0.0; 4],
            neighbors: vec![],
        }
    }

    #[test]
    fn type_codes_follow_overlay_convention() {
        assert_eq!(node(NodeKind::Interior, BoundaryZone::NONE).type_code(), 0);
        assert_eq!(node(NodeKind::ExteriorIntersection, BoundaryZone::NONE).type_code(), 12);
        assert_eq!(node(NodeKind::Exterior, BoundaryZone::OUTFLOW).type_code(), 210);
        assert_eq!(node(NodeKind::Intersection, BoundaryZone::INFLOW).type_code(), 302);
    }

    #[test]
    fn predicates_are_orthogonal() {
        let out = node(NodeKind::Exterior, BoundaryZone::OUTFLOW);
        assert!(out.is_outflow() && out.is_outflow_exterior());
        assert!(!out.is_plain_exterior());

        let inter = node(NodeKind::Intersection, BoundaryZone::NONE);
        assert!(inter.on_intersection());
        assert!(!inter.is_bare_exterior());

        let inter_out = node(NodeKind::Intersection, BoundaryZone::OUTFLOW);
        assert!(!inter_out.on_intersection());
        assert!(inter_out.is_outflow() && !inter_out.is_outflow_exterior());

        let mut zone = BoundaryZone::NONE;
        zone.insert(BoundaryZone::INFLOW);
        assert!(zone.contains(BoundaryZone::INFLOW));
        assert!(!zone.contains(BoundaryZone::OUTFLOW));
        assert!(!zone.contains(BoundaryZone::NONE));
    }

    #[test]
    fn fracture_ranges_must_fit_the_arenas() {
        let mut mesh = small_cross();
        mesh.fractures[1].first_node = mesh.nodes.len();
        assert!(matches!(mesh.validate(), Err(MeshError::FractureRange { fracture: 1 })));

        let mut mesh = small_cross();
        mesh.fractures[0].node_count = mesh.nodes.len() + 1;
        assert!(matches!(mesh.validate(), Err(MeshError::FractureRange { fracture: 0 })));

        let mut mesh = small_cross();
        mesh.fractures[1].cell_count += 1;
        assert!(matches!(mesh.validate(), Err(MeshError::FractureRange { fracture: 1 })));
    }

    #[test]
    fn node_fracture_must_exist() {
        let mut mesh = small_cross();
        mesh.nodes[0].fractures[0] = Some(7);
        match mesh.validate() {
            Err(MeshError::NodeFracture { node, fracture }) => assert_eq!((node, fracture), (0, 7)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn edge_indices_must_exist() {
        let mut mesh = small_cross();
        let cells = mesh.cells.len();
        mesh.nodes[0].neighbors[0].cells[0] = Some(cells);
        assert!(matches!(mesh.validate(), Err(MeshError::EdgeCell { from: 0, .. })));

        let mut mesh = small_cross();
        mesh.nodes[0].neighbors[0].fractures[0] = Some(2);
        assert!(matches!(
            mesh.validate(),
            Err(MeshError::EdgeFracture { from: 0, fracture: 2, .. })
        ));
    }

    #[test]
    fn generated_meshes_pass_validation() {
        small_cross().validate().unwrap();
    }
}
