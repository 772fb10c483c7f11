//! Time-domain random walk correction for diffusion into the rock matrix.

use super::particle::Particle;
use crate::discretization::mesh::Mesh;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TdrwParams {
    /// Matrix porosity.
    pub porosity: f64,
    /// Matrix diffusion coefficient.
    pub diffusion_coefficient: f64,
}

impl Default for TdrwParams {
    fn default() -> Self {
        Self {
            porosity: 0.1,
            diffusion_coefficient: 1e-9,
        }
    }
}

/// Series approximation of the inverse complementary error function.
pub fn inverse_erfc(y: f64) -> f64 {
    let z = 1.0 - y;
    let coefficients = [
        1.0,
        PI / 12.0,
        7.0 * PI.powi(2) / 480.0,
        127.0 * PI.powi(3) / 40320.0,
        4369.0 * PI.powi(4) / 5806080.0,
        34807.0 * PI.powi(5) / 182476800.0,
    ];
    let series: f64 = coefficients
        .iter()
        .enumerate()
        .map(|(k, c)| c * z.powi(2 * k as i32 + 1))
        .sum();
    0.5 * PI.sqrt() * series
}

/// Diffusion delay of an advective interval `t_adv` for a fracture of aperture `b`.
pub fn matrix_diffusion_time(params: &TdrwParams, aperture: f64, t_adv: f64, u: f64) -> f64 {
    let a = params.porosity * params.diffusion_coefficient.sqrt() / aperture;
    let inv = inverse_erfc(u);
    if inv <= 0.0 || !inv.is_finite() {
        return 0.0;
    }
    (a * t_adv / inv).powi(2)
}

/// One diffusion update, logged per particle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TdrwRecord {
    pub advective: f64,
    pub diffusion: f64,
    pub fracture: usize,
    pub time: f64,
    pub total_time: f64,
    pub diffusion_time: f64,
}

/// Add the matrix delay accumulated since the last update.
pub fn apply<R: Rng>(mesh: &Mesh, particle: &mut Particle, params: &TdrwParams, rng: &mut R) -> TdrwRecord {
    let aperture = match particle.cell {
        Some(cell) => mesh.cell_aperture(cell),
        None => mesh.nodes[mesh.fractures[particle.fracture].first_node].aperture,
    };
    let t_adv = particle.time - particle.diffusion_anchor;
    let u: f64 = rng.random();
    let t_diff = matrix_diffusion_time(params, aperture, t_adv, u);

    particle.diffusion_anchor = particle.time;
    particle.diffusion_time += t_diff;
    particle.total_time += t_adv + t_diff;

    TdrwRecord {
        advective: t_adv,
        diffusion: t_diff,
        fracture: particle.fracture,
        time: particle.time,
        total_time: particle.total_time,
        diffusion_time: particle.diffusion_time,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inverse_erfc_matches_known_values() {
        // erfc(0.4769362762) = 0.5
        assert_relative_eq!(inverse_erfc(0.5), 0.476_936_276_2, epsilon = 1e-4);
        assert_relative_eq!(inverse_erfc(1.0), 0.0);
        assert!(inverse_erfc(0.1) > inverse_erfc(0.5));
    }

    #[test]
    fn diffusion_time_scales_with_advection_squared() {
        let params = TdrwParams {
            porosity: 0.2,
            diffusion_coefficient: 4e-10,
        };
        let t1 = matrix_diffusion_time(&params, 1e-3, 1.0, 0.3);
        let t2 = matrix_diffusion_time(&params, 1e-3, 2.0, 0.3);
        assert!(t1 > 0.0);
        assert_relative_eq!(t2, 4.0 * t1, max_relative = 1e-12);
        assert_eq!(matrix_diffusion_time(&params, 1e-3, 0.0, 0.3), 0.0);
    }
}
