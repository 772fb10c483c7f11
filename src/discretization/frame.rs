use glam::DVec3;
use nalgebra::{Matrix3, Rotation3, Unit, Vector3};

/// Rotation pair and inclination of a fracture plane.
pub struct PlaneFrame {
    pub theta: f64,
    pub rot2: Matrix3<f64>,
    pub rot3: Matrix3<f64>,
}

/// Frame that maps the plane with unit normal `normal` onto z = const.
pub fn frame_from_normal(normal: DVec3) -> PlaneFrame {
    let n = Unit::new_normalize(Vector3::new(normal.x, normal.y, normal.z)).into_inner();
    let theta = n.z.clamp(-1.0, 1.0).acos();
    let rotation = if theta.abs() < 1e-12 {
        Rotation3::identity()
    } else if (theta - std::f64::consts::PI).abs() < 1e-12 {
        Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI)
    } else {
        Rotation3::rotation_between(&n, &Vector3::z()).unwrap_or_else(Rotation3::identity)
    };
    let rot2 = *rotation.matrix();
    PlaneFrame {
        theta,
        rot2,
        rot3: rot2.transpose(),
    }
}

pub fn to_global(rot3: &Matrix3<f64>, local: DVec3) -> DVec3 {
    apply(rot3, local)
}

pub fn to_local(rot2: &Matrix3<f64>, global: DVec3) -> DVec3 {
    apply(rot2, global)
}

fn apply(m: &Matrix3<f64>, v: DVec3) -> DVec3 {
    let r = m * Vector3::new(v.x, v.y, v.z);
    DVec3::new(r.x, r.y, r.z)
}
