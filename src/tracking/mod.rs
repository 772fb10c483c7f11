pub mod advector;
pub mod boundary;
pub mod driver;
pub mod intersection;
pub mod locator;
pub mod mixing;
pub mod particle;
pub mod seeding;
pub mod tdrw;

use crate::config::ConfigError;
use crate::discretization::mesh::MeshError;
use seeding::SeedingError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("mesh error: {0}")]
    Mesh(#[from] MeshError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("seeding failed: {0}")]
    Seeding(#[from] SeedingError),
}
