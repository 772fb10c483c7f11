//! Particle tracking with optional matrix diffusion on discrete fracture networks.

pub mod config;
pub mod discretization;
pub mod numerics;
pub mod physics;
pub mod processing;
pub mod tracking;
