use glam::DVec2;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Classification of the cell a particle currently occupies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CellClass {
    #[default]
    Interior,
    /// Two or more vertices on a no-flow exterior boundary.
    Boundary,
    /// At least one vertex on a fracture intersection.
    Intersection,
    BoundaryIntersection,
    /// The particle has just been routed across an intersection.
    JustCrossed,
}

impl CellClass {
    pub fn at_intersection(self) -> bool {
        matches!(self, CellClass::Intersection | CellClass::BoundaryIntersection)
    }
}

/// Mutable per-tracer state. Positions are in the local plane of `fracture`.
#[derive(Debug, Clone, PartialEq)]
pub struct Particle {
    pub id: usize,
    pub position: DVec2,
    pub prev_position: DVec2,
    pub velocity: DVec2,
    pub cell: Option<usize>,
    pub fracture: usize,
    pub class: CellClass,
    pub weights: [f64; 3],
    /// Accumulated advective travel time.
    pub time: f64,
    /// Accumulated matrix-diffusion delay.
    pub diffusion_time: f64,
    /// Advective plus diffusion time, summed at each diffusion update.
    pub total_time: f64,
    /// Advective time at the last diffusion update.
    pub diffusion_anchor: f64,
    pub beta: f64,
    pub flux_weight: f64,
    pub pressure: f64,
}

impl Particle {
    pub fn new(id: usize, position: DVec2, fracture: usize) -> Self {
        Self {
            id,
            position,
            prev_position: position,
            velocity: DVec2::ZERO,
            cell: None,
            fracture,
            class: CellClass::Interior,
            weights: [0.0; 3],
            time: 0.0,
            diffusion_time: 0.0,
            total_time: 0.0,
            diffusion_anchor: 0.0,
            beta: 0.0,
            flux_weight: 0.0,
            pressure: 0.0,
        }
    }
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

/// Random stream owned by one particle, independent of scheduling order.
pub fn particle_rng(seed: u64, index: usize) -> ChaCha8Rng {
    ChaCha8Rng::seed_from_u64(seed ^ splitmix64(index as u64))
}
