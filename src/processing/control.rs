//! Control planes, control cylinders and time snapshots.

use crate::discretization::mesh::Mesh;
use glam::DVec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    /// Distance of `p` from this coordinate axis.
    pub fn radial_distance(self, p: DVec3) -> f64 {
        match self {
            Axis::X => p.y.hypot(p.z),
            Axis::Y => p.x.hypot(p.z),
            Axis::Z => p.x.hypot(p.y),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ControlOutput {
    /// Planes normal to `flow_dir`, `delta` apart, from the inflow side.
    Plane { delta: f64, flow_dir: Axis },
    /// Cylindrical shells around `well_dir`, shrinking by `delta`.
    Cylinder {
        delta: f64,
        well_dir: Axis,
        length_to_well: f64,
        well_thickness: f64,
    },
}

impl ControlOutput {
    pub fn delta(&self) -> f64 {
        match self {
            ControlOutput::Plane { delta, .. } | ControlOutput::Cylinder { delta, .. } => *delta,
        }
    }
}

/// Crossing state of one particle against the configured control surfaces.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlTracker {
    output: ControlOutput,
    /// Coordinate of the plane, or radius of the shell, still to be crossed.
    current: f64,
    /// Planes left; shells stop at half the well thickness instead.
    remaining: usize,
    increasing: bool,
}

impl ControlTracker {
    /// Returns `None` when the mesh has no inflow or outflow node to anchor planes on.
    pub fn new(output: &ControlOutput, mesh: &Mesh) -> Option<Self> {
        match *output {
            ControlOutput::Plane { delta, flow_dir } => {
                let axis = flow_dir.index();
                let inflow = mesh.nodes[*mesh.inflow_nodes().first()?].coord[axis];
                let outflow = mesh.nodes[*mesh.outflow_nodes().first()?].coord[axis];
                let increasing = inflow < 0.0;
                let remaining = ((outflow.abs() + inflow.abs()) / delta) as usize + 1;
                let current = if increasing { inflow + delta } else { inflow - delta };
                Some(Self {
                    output: output.clone(),
                    current,
                    remaining,
                    increasing,
                })
            }
            ControlOutput::Cylinder { length_to_well, .. } => Some(Self {
                output: output.clone(),
                current: length_to_well,
                remaining: usize::MAX,
                increasing: false,
            }),
        }
    }

    /// Plane crossings also carry a matrix diffusion increment; shell crossings are only logged.
    pub fn diffuses(&self) -> bool {
        matches!(self.output, ControlOutput::Plane { .. })
    }

    /// Check `p` against the next surface; at most one surface is crossed per call.
    pub fn crossed(&mut self, p: DVec3) -> bool {
        let hit = match self.output {
            ControlOutput::Plane { flow_dir, .. } => {
                if self.remaining == 0 {
                    return false;
                }
                let x = p[flow_dir.index()];
                if self.increasing { x >= self.current } else { x <= self.current }
            }
            ControlOutput::Cylinder {
                well_dir,
                well_thickness,
                ..
            } => self.current >= well_thickness / 2.0 && well_dir.radial_distance(p) <= self.current,
        };
        if hit {
            let delta = self.output.delta();
            if self.increasing {
                self.current += delta;
            } else {
                self.current -= delta;
            }
            self.remaining = self.remaining.saturating_sub(1);
        }
        hit
    }
}

/// Positions recorded when the travel time reaches multiples of `interval`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    pub count: usize,
    pub interval: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotRecorder {
    settings: SnapshotSettings,
    pub positions: Vec<DVec3>,
}

impl SnapshotRecorder {
    pub fn new(settings: SnapshotSettings) -> Self {
        Self {
            settings,
            positions: Vec::with_capacity(settings.count),
        }
    }

    /// Record `p` if `time` is within 5% of the next snapshot time.
    pub fn observe(&mut self, time: f64, p: DVec3) {
        if self.positions.len() >= self.settings.count {
            return;
        }
        let target = (self.positions.len() + 1) as f64 * self.settings.interval;
        let tolerance = 0.05 * self.settings.interval;
        if (time - target).abs() <= tolerance {
            self.positions.push(p);
        }
    }
}
