//! Initial particle placement.
//!
//! Most strategies work on the inflow boundary, split into inflow edges: maximal
//! runs of consecutive inflow nodes that share a fracture.

use super::locator::is_inside;
use super::particle::Particle;
use super::tdrw::inverse_erfc;
use crate::discretization::mesh::Mesh;
use crate::discretization::topology::cells_around;
use glam::{DVec2, DVec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SeedingError {
    #[error("the mesh has no inflow nodes")]
    NoInflowNodes,
    #[error("no inflow edge crosses the seeding region")]
    RegionMissesInflow,
    #[error("no cell is eligible for random seeding")]
    NoEligibleCells,
    #[error("matrix source {index} refers to missing node {node}")]
    SourceNode { index: usize, node: usize },
}

/// A particle starting point in the rock matrix and the mesh node nearest to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixSource {
    pub position: DVec3,
    pub node: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SeedingStrategy {
    /// The same number of particles on every inflow edge.
    PerEdge { particles: usize },
    /// Particles spaced evenly over the whole inflow boundary.
    Equidistant { particles_per_edge: usize },
    /// Particles on the parts of the inflow edges inside a box.
    Region {
        particles: usize,
        min: DVec3,
        max: DVec3,
    },
    /// Particles at the centroids of random cells, weighted by aperture.
    Random { particles: usize },
    /// Particles released from the matrix with a diffusion arrival time.
    Matrix {
        sources: Vec<MatrixSource>,
        porosity: f64,
        diffusion_coefficient: f64,
    },
    /// Equal-weight particles distributed in proportion to inflow flux.
    FluxWeighted { total: usize },
}

impl Default for SeedingStrategy {
    fn default() -> Self {
        SeedingStrategy::PerEdge { particles: 10 }
    }
}

impl SeedingStrategy {
    /// Strategies whose flux weights are derived from the initial cell.
    pub fn supports_flux_weights(&self) -> bool {
        matches!(
            self,
            SeedingStrategy::PerEdge { .. }
                | SeedingStrategy::Equidistant { .. }
                | SeedingStrategy::Region { .. }
        )
    }
}

/// Where and how a particle starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub position: DVec2,
    pub fracture: usize,
    pub cell: Option<usize>,
    /// Node whose surrounding cells are searched first.
    pub near_node: Option<usize>,
    pub flux_weight: f64,
    pub time: f64,
}

impl Seed {
    fn at(position: DVec2, fracture: usize) -> Self {
        Self {
            position,
            fracture,
            cell: None,
            near_node: None,
            flux_weight: 0.0,
            time: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InflowEdge {
    pub fracture: usize,
    pub nodes: Vec<usize>,
}

impl InflowEdge {
    fn first(&self) -> usize {
        self.nodes[0]
    }

    fn last(&self) -> usize {
        self.nodes[self.nodes.len() - 1]
    }

    fn local_span(&self, mesh: &Mesh) -> (DVec2, DVec2) {
        (
            mesh.nodes[self.first()].local_xy(self.fracture),
            mesh.nodes[self.last()].local_xy(self.fracture),
        )
    }

    fn length_3d(&self, mesh: &Mesh) -> f64 {
        mesh.nodes[self.first()]
            .coord
            .distance(mesh.nodes[self.last()].coord)
    }
}

pub fn inflow_edges(mesh: &Mesh) -> Vec<InflowEdge> {
    let mut edges: Vec<InflowEdge> = Vec::new();
    for n in mesh.inflow_nodes() {
        let node = &mesh.nodes[n];
        match edges.last_mut() {
            Some(edge) if node.on_fracture(edge.fracture) => edge.nodes.push(n),
            _ => edges.push(InflowEdge {
                fracture: node.fractures[0].unwrap_or_default(),
                nodes: vec![n],
            }),
        }
    }
    edges
}

/// `count` points centred in equal sub-intervals of `a -> b`.
fn spread(a: DVec2, b: DVec2, count: usize) -> impl Iterator<Item = DVec2> {
    let step = (b - a) / count.max(1) as f64;
    (0..count).map(move |j| a + step * (j as f64 + 0.5))
}

/// Liang-Barsky clip of the segment `a -> b` against an axis-aligned box.
pub fn clip_segment(a: DVec3, b: DVec3, min: DVec3, max: DVec3) -> Option<(DVec3, DVec3)> {
    let d = b - a;
    let (mut t0, mut t1) = (0.0f64, 1.0f64);
    for axis in 0..3 {
        let (lo, hi) = (min[axis] - a[axis], max[axis] - a[axis]);
        if d[axis] == 0.0 {
            if lo > 0.0 || hi < 0.0 {
                return None;
            }
            continue;
        }
        let (ta, tb) = (lo / d[axis], hi / d[axis]);
        t0 = t0.max(ta.min(tb));
        t1 = t1.min(ta.max(tb));
        if t0 >= t1 {
            return None;
        }
    }
    Some((a + d * t0, a + d * t1))
}

pub fn seed_particles<R: Rng>(
    mesh: &Mesh,
    strategy: &SeedingStrategy,
    density: f64,
    seconds_per_unit: f64,
    rng: &mut R,
) -> Result<Vec<Seed>, SeedingError> {
    let edges: Vec<InflowEdge> = inflow_edges(mesh);
    let needs_inflow = !matches!(
        strategy,
        SeedingStrategy::Random { .. } | SeedingStrategy::Matrix { .. }
    );
    if needs_inflow && edges.is_empty() {
        return Err(SeedingError::NoInflowNodes);
    }
    let edges: Vec<InflowEdge> = edges.into_iter().filter(|e| e.nodes.len() > 1).collect();

    let seeds = match strategy {
        SeedingStrategy::PerEdge { particles } => edges
            .iter()
            .flat_map(|edge| {
                let (a, b) = edge.local_span(mesh);
                spread(a, b, *particles).map(move |p| Seed::at(p, edge.fracture))
            })
            .collect(),

        SeedingStrategy::Equidistant { particles_per_edge } => {
            let total: f64 = edges.iter().map(|e| e.length_3d(mesh)).sum();
            let spacing = total / (*particles_per_edge * edges.len()).max(1) as f64;
            let mut seeds = Vec::new();
            for edge in &edges {
                let (a, b) = edge.local_span(mesh);
                let count = if spacing > 0.0 {
                    (a.distance(b) / spacing) as usize
                } else {
                    0
                };
                if count < 2 {
                    seeds.push(Seed::at((a + b) / 2.0, edge.fracture));
                } else {
                    seeds.extend(spread(a, b, count).map(|p| Seed::at(p, edge.fracture)));
                }
            }
            seeds
        }

        SeedingStrategy::Region {
            particles,
            min,
            max,
        } => {
            let clipped: Vec<(usize, DVec3, DVec3)> = edges
                .iter()
                .filter_map(|edge| {
                    let a = mesh.nodes[edge.first()].coord;
                    let b = mesh.nodes[edge.last()].coord;
                    clip_segment(a, b, *min, *max).map(|(p, q)| (edge.fracture, p, q))
                })
                .collect();
            if clipped.is_empty() {
                return Err(SeedingError::RegionMissesInflow);
            }
            // The first `particles % n` segments take one extra particle.
            let (share, extra) = (particles / clipped.len(), particles % clipped.len());
            clipped
                .iter()
                .enumerate()
                .flat_map(|(k, &(fracture, p, q))| {
                    let (a, b) = (mesh.to_local(p, fracture), mesh.to_local(q, fracture));
                    let count = share + usize::from(k < extra);
                    spread(a, b, count).map(move |x| Seed::at(x, fracture))
                })
                .collect()
        }

        SeedingStrategy::Random { particles } => random_cells(mesh, *particles, rng)?,

        SeedingStrategy::Matrix {
            sources,
            porosity,
            diffusion_coefficient,
        } => {
            let mut seeds = Vec::with_capacity(sources.len());
            let mut distances = Vec::with_capacity(sources.len());
            for (index, source) in sources.iter().enumerate() {
                let node = mesh.nodes.get(source.node).ok_or(SeedingError::SourceNode {
                    index,
                    node: source.node,
                })?;
                let fracture = node.fractures[0].unwrap_or_default();
                let distance = node.coord.distance(source.position);
                let inv = inverse_erfc(1.0 - rng.random::<f64>());
                let spread_time = distance * distance / (4.0 * porosity * diffusion_coefficient);
                let mut seed = Seed::at(node.local_xy(fracture), fracture);
                seed.near_node = Some(source.node);
                seed.time = if inv > 0.0 {
                    spread_time / (inv * inv) / seconds_per_unit
                } else {
                    0.0
                };
                seeds.push(seed);
                distances.push(distance);
            }
            let total: f64 = distances.iter().sum();
            if total > 0.0 {
                for (seed, d) in seeds.iter_mut().zip(&distances) {
                    seed.flux_weight = d / total;
                }
            }
            seeds
        }

        SeedingStrategy::FluxWeighted { total } => {
            let inflow = mesh.inflow_nodes().len();
            let count = (*total).max(inflow).max(1);
            let weight = mesh.total_inflow_flux(density) / count as f64;
            let mut seeds = Vec::new();
            for edge in &edges {
                flux_weighted_edge(mesh, edge, density, weight, &mut seeds);
            }
            seeds
        }
    };
    Ok(seeds)
}

fn random_cells<R: Rng>(mesh: &Mesh, particles: usize, rng: &mut R) -> Result<Vec<Seed>, SeedingError> {
    let eligible = |c: usize| {
        mesh.cells[c]
            .nodes
            .iter()
            .all(|&n| !mesh.nodes[n].is_outflow())
    };
    if mesh.cells.is_empty() || !(0..mesh.cells.len()).any(eligible) {
        return Err(SeedingError::NoEligibleCells);
    }
    let mut seeds = Vec::with_capacity(particles);
    while seeds.len() < particles {
        let c = rng.random_range(0..mesh.cells.len());
        if !eligible(c) {
            continue;
        }
        let mut seed = Seed::at(mesh.centroid(c), mesh.cells[c].fracture);
        seed.cell = Some(c);
        seed.flux_weight = mesh.nodes[mesh.cells[c].nodes[0]].aperture;
        seeds.push(seed);
    }
    let total: f64 = seeds.iter().map(|s| s.flux_weight).sum();
    if total > 0.0 {
        for seed in &mut seeds {
            seed.flux_weight /= total;
        }
    }
    Ok(seeds)
}

/// Particles of weight `weight` spread over the half-spans of each inflow node.
fn flux_weighted_edge(mesh: &Mesh, edge: &InflowEdge, density: f64, weight: f64, seeds: &mut Vec<Seed>) {
    let xy = |i: usize| mesh.nodes[edge.nodes[i]].local_xy(edge.fracture);
    let last = edge.nodes.len() - 1;
    for j in 0..=last {
        let flux = mesh.nodes[edge.nodes[j]].total_flux() / density;
        let count = if weight > 0.0 {
            ((flux.abs() / weight).ceil() as usize).max(1)
        } else {
            1
        };
        let start = if j == 0 { xy(0) } else { (xy(j - 1) + xy(j)) / 2.0 };
        let end = if j == last { xy(last) } else { (xy(j) + xy(j + 1)) / 2.0 };
        seeds.extend(spread(start, end, count).map(|p| {
            let mut seed = Seed::at(p, edge.fracture);
            seed.flux_weight = weight;
            seed
        }));
    }
}

/// Find the starting cell of a freshly seeded particle.
pub fn locate_initial(mesh: &Mesh, particle: &mut Particle, seed: &Seed) -> bool {
    if let Some(cell) = seed.cell {
        if is_inside(mesh, particle, cell) {
            return true;
        }
    }
    let fracture = particle.fracture;
    if let Some(node) = seed.near_node {
        for cell in cells_around(&mesh.nodes[node], fracture) {
            if is_inside(mesh, particle, cell) {
                return true;
            }
        }
    }
    for n in mesh.inflow_nodes() {
        for edge in &mesh.nodes[n].neighbors {
            for cell in edge.cells_on(fracture) {
                if is_inside(mesh, particle, cell) {
                    return true;
                }
            }
        }
    }
    false
}

/// Inflow flux carried by a located particle, from the inflow vertices of its cell.
pub fn inflow_flux(mesh: &Mesh, particle: &Particle) -> f64 {
    let Some(cell) = particle.cell else {
        return 0.0;
    };
    let nodes = mesh.cells[cell].nodes;
    let inflow: Vec<usize> = (0..3).filter(|&i| mesh.nodes[nodes[i]].is_inflow()).collect();
    let abs_flux = |i: usize| mesh.nodes[nodes[i]].total_abs_flux();
    match inflow.as_slice() {
        [] => 0.0,
        [i] => abs_flux(*i),
        [i, .., j] => particle.weights[*i] * abs_flux(*i) + particle.weights[*j] * abs_flux(*j),
    }
}

/// Normalise the inflow flux of every particle into a flux weight.
pub fn assign_flux_weights(mesh: &Mesh, particles: &mut [Particle]) {
    let fluxes: Vec<f64> = particles.iter().map(|p| inflow_flux(mesh, p)).collect();
    let total: f64 = fluxes.iter().sum();
    for (particle, flux) in particles.iter_mut().zip(fluxes) {
        particle.flux_weight = if total > 0.0 { flux / total } else { 0.0 };
    }
}
