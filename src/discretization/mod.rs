pub mod frame;
pub mod generator;
pub mod mesh;
pub mod topology;
