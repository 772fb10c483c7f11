//! Per-particle trajectory buffering and the trajectory/intersection files.
//!
//! Samples gathered since the last flush are kept either in memory or in a
//! `tempdata_<n>` file. A flush writes them out, every step or thinned by the
//! curvature of the path, and empties the store.

use super::csv_writer::{CsvStream, sci};
use crate::discretization::mesh::external_id;
use glam::{DVec2, DVec3};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Angular tolerance of the curvature filter, in radians.
pub const CURVATURE_EPS: f64 = 0.05;

/// Particle state at the start of one time step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub step: usize,
    pub position: DVec2,
    pub position_3d: DVec3,
    pub velocity_3d: DVec3,
    pub cell: Option<usize>,
    pub fracture: usize,
    pub time: f64,
    pub beta: f64,
    pub length: f64,
    pub pressure: f64,
    /// Aperture of the first vertex of `cell`.
    pub aperture: f64,
}

impl Sample {
    fn encode(&self) -> String {
        let cell = self.cell.map_or(0, external_id);
        format!(
            "{} {:e} {:e} {:e} {:e} {:e} {:e} {:e} {:e} {} {} {:e} {:e} {:e} {:e} {:e}",
            self.step,
            self.position.x,
            self.position.y,
            self.position_3d.x,
            self.position_3d.y,
            self.position_3d.z,
            self.velocity_3d.x,
            self.velocity_3d.y,
            self.velocity_3d.z,
            cell,
            self.fracture,
            self.time,
            self.beta,
            self.length,
            self.pressure,
            self.aperture,
        )
    }

    fn decode(line: &str) -> io::Result<Self> {
        let bad = || io::Error::new(io::ErrorKind::InvalidData, format!("malformed sample: {line}"));
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 16 {
            return Err(bad());
        }
        let f = |i: usize| fields[i].parse::<f64>().map_err(|_| bad());
        let u = |i: usize| fields[i].parse::<usize>().map_err(|_| bad());
        let cell = u(9)?;
        Ok(Self {
            step: u(0)?,
            position: DVec2::new(f(1)?, f(2)?),
            position_3d: DVec3::new(f(3)?, f(4)?, f(5)?),
            velocity_3d: DVec3::new(f(6)?, f(7)?, f(8)?),
            cell: cell.checked_sub(1),
            fracture: u(10)?,
            time: f(11)?,
            beta: f(12)?,
            length: f(13)?,
            pressure: f(14)?,
            aperture: f(15)?,
        })
    }
}

/// Growable sample buffer, in memory or streamed to a temporary file.
pub enum TrajectoryStore {
    Memory(Vec<Sample>),
    TempFile {
        path: PathBuf,
        writer: BufWriter<File>,
        count: usize,
    },
}

impl TrajectoryStore {
    pub fn memory() -> Self {
        TrajectoryStore::Memory(Vec::new())
    }

    pub fn temp_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let writer = BufWriter::new(File::create(&path)?);
        Ok(TrajectoryStore::TempFile {
            path,
            writer,
            count: 0,
        })
    }

    pub fn len(&self) -> usize {
        match self {
            TrajectoryStore::Memory(samples) => samples.len(),
            TrajectoryStore::TempFile { count, .. } => *count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn push(&mut self, sample: Sample) -> io::Result<()> {
        match self {
            TrajectoryStore::Memory(samples) => samples.push(sample),
            TrajectoryStore::TempFile { writer, count, .. } => {
                writeln!(writer, "{}", sample.encode())?;
                *count += 1;
            }
        }
        Ok(())
    }

    /// Hand back every buffered sample and start an empty segment.
    pub fn take(&mut self) -> io::Result<Vec<Sample>> {
        match self {
            TrajectoryStore::Memory(samples) => Ok(std::mem::take(samples)),
            TrajectoryStore::TempFile {
                path,
                writer,
                count,
            } => {
                writer.flush()?;
                let reader = BufReader::new(File::open(&*path)?);
                let mut samples = Vec::with_capacity(*count);
                for line in reader.lines() {
                    let line = line?;
                    if !line.trim().is_empty() {
                        samples.push(Sample::decode(&line)?);
                    }
                }
                *writer = BufWriter::new(File::create(&*path)?);
                *count = 0;
                Ok(samples)
            }
        }
    }

    /// Drop the buffer, removing the temporary file if there is one.
    pub fn discard(self) -> io::Result<()> {
        match self {
            TrajectoryStore::Memory(_) => Ok(()),
            TrajectoryStore::TempFile { path, writer, .. } => {
                drop(writer);
                fs::remove_file(path)
            }
        }
    }
}

fn angle_between(u: DVec2, v: DVec2) -> Option<f64> {
    let norm = u.length() * v.length();
    if norm <= 0.0 {
        return None;
    }
    Some((u.dot(v) / norm).clamp(-1.0, 1.0).acos())
}

fn straight(angle: f64) -> bool {
    angle.abs() < CURVATURE_EPS || (angle - std::f64::consts::PI).abs() < CURVATURE_EPS
}

/// Sample `offset` steps after the start of the segment, or the last one.
fn at_offset(samples: &[Sample], offset: usize) -> &Sample {
    &samples[offset.min(samples.len() - 1)]
}

/// Indices of the samples kept by the curvature filter for a segment ending
/// at `end` on step `current`. The first sample is always kept.
pub fn curvature_thinning(samples: &[Sample], end: DVec2, current: usize) -> Vec<usize> {
    let Some(first) = samples.first() else {
        return Vec::new();
    };
    let start_step = first.step;
    if start_step == current {
        return Vec::new();
    }
    let start = first.position;

    let mut kdiv = 2usize;
    let (mut end_step, mut end_pos) = (current, end);
    loop {
        let span = end_step.saturating_sub(start_step);
        kdiv *= 2;
        let mid = at_offset(samples, span / 2);
        let collinear = angle_between(start - mid.position, end_pos - mid.position).is_none_or(straight);
        if collinear {
            break;
        }
        end_step = mid.step;
        end_pos = mid.position;
        if end_step <= start_step {
            break;
        }
    }

    if kdiv < 10 {
        kdiv *= 4;
    }
    let span = current.saturating_sub(start_step);
    let mut stride = span / kdiv;
    if kdiv > span {
        stride = 2;
        kdiv = span / 2;
    }
    if kdiv == 0 {
        kdiv = 2;
        stride = 1;
    }

    let mut kept = vec![0];
    for i in 0..kdiv - 1 {
        let offset = stride * (i + 1);
        kept.push(offset.min(samples.len() - 1));
    }
    kept
}

/// Which per-particle files are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleFileOptions {
    pub dir: PathBuf,
    pub trajectories: bool,
    pub curvature: bool,
    pub temp_file: bool,
    pub tdrw: bool,
    pub control: bool,
}

const TRAJECTORY_HEADERS: [&str; 14] = [
    "step", "x", "y", "z", "vx", "vy", "vz", "cell", "fracture", "time", "aperture", "beta",
    "crossed_fracture", "pressure",
];
const INTERSECTION_HEADERS: [&str; 7] = ["length", "time", "x", "y", "z", "fracture", "beta"];
pub const TDRW_HEADERS: [&str; 7] = [
    "advective_time",
    "diffusion_time",
    "segment_time",
    "fracture",
    "time",
    "total_time",
    "total_diffusion_time",
];
pub const CONTROL_HEADERS: [&str; 12] = [
    "time",
    "x",
    "y",
    "z",
    "vx",
    "vy",
    "vz",
    "length",
    "fracture",
    "aperture",
    "total_time",
    "diffusion_time",
];

fn trajectory_row(sample: &Sample, crossed: usize) -> [String; 14] {
    [
        sample.step.to_string(),
        sci(sample.position_3d.x),
        sci(sample.position_3d.y),
        sci(sample.position_3d.z),
        sci(sample.velocity_3d.x),
        sci(sample.velocity_3d.y),
        sci(sample.velocity_3d.z),
        sample.cell.map_or(0, external_id).to_string(),
        external_id(sample.fracture).to_string(),
        sci(sample.time),
        sci(sample.aperture),
        sci(sample.beta),
        crossed.to_string(),
        sci(sample.pressure),
    ]
}

/// Output files owned by the task tracking one particle.
pub struct ParticleFiles {
    trajectory: Option<CsvStream>,
    intersections: Option<CsvStream>,
    pub tdrw: Option<CsvStream>,
    pub control: Option<CsvStream>,
    curvature: bool,
}

impl ParticleFiles {
    /// Open the files of particle `label` (1-based) according to `options`.
    pub fn open(options: &ParticleFileOptions, label: usize) -> io::Result<Self> {
        let dir = &options.dir;
        let (trajectory, intersections) = if options.trajectories {
            (
                Some(CsvStream::create(dir.join(format!("traject_{label}.csv")), &TRAJECTORY_HEADERS)?),
                Some(CsvStream::create(dir.join(format!("inters_{label}.csv")), &INTERSECTION_HEADERS)?),
            )
        } else {
            (None, None)
        };
        let tdrw = if options.tdrw {
            Some(CsvStream::create(dir.join(format!("tdrw_{label}.csv")), &TDRW_HEADERS)?)
        } else {
            None
        };
        let control = if options.control {
            Some(CsvStream::create(
                dir.join(format!("part_control_{label}.csv")),
                &CONTROL_HEADERS,
            )?)
        } else {
            None
        };
        Ok(Self {
            trajectory,
            intersections,
            tdrw,
            control,
            curvature: options.curvature,
        })
    }

    /// Write one buffered segment and the current state, then empty the store.
    ///
    /// `crossed` is the 1-based id of the fracture being entered, 0 at exit.
    pub fn flush(&mut self, store: &mut TrajectoryStore, current: &Sample, crossed: usize) -> io::Result<()> {
        let samples = store.take()?;
        let Some(first) = samples.first() else {
            return Ok(());
        };
        if let Some(inters) = self.intersections.as_mut() {
            inters.write_row([
                sci(first.length),
                sci(first.time),
                sci(first.position_3d.x),
                sci(first.position_3d.y),
                sci(first.position_3d.z),
                external_id(first.fracture).to_string(),
                sci(first.beta),
            ])?;
        }
        let Some(traj) = self.trajectory.as_mut() else {
            return Ok(());
        };
        if self.curvature {
            for i in curvature_thinning(&samples, current.position, current.step) {
                traj.write_row(trajectory_row(&samples[i], 0))?;
            }
        } else {
            for sample in &samples {
                traj.write_row(trajectory_row(sample, 0))?;
            }
        }
        traj.write_row(trajectory_row(current, crossed))
    }

    pub fn finish(&mut self) -> io::Result<()> {
        for stream in [
            self.trajectory.as_mut(),
            self.intersections.as_mut(),
            self.tdrw.as_mut(),
            self.control.as_mut(),
        ]
        .into_iter()
        .flatten()
        {
            stream.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(step: usize, position: DVec2) -> Sample {
        Sample {
            step,
            position,
            position_3d: position.extend(0.0),
            velocity_3d: DVec3::X,
            cell: Some(step),
            fracture: 0,
            time: step as f64 * 0.1,
            beta: 0.0,
            length: step as f64,
            pressure: 0.0,
            aperture: 1e-3,
        }
    }

    #[test]
    fn temp_file_store_reads_back_and_resets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tempdata_1");
        let mut store = TrajectoryStore::temp_file(&path).unwrap();
        let a = sample(0, DVec2::new(0.1, 0.2));
        let mut b = sample(1, DVec2::new(1.0 / 3.0, -2.5e-7));
        b.cell = None;
        store.push(a).unwrap();
        store.push(b).unwrap();
        assert_eq!(store.len(), 2);

        let back = store.take().unwrap();
        assert_eq!(back, vec![a, b]);
        assert!(store.is_empty());
        assert!(store.take().unwrap().is_empty());

        store.discard().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn straight_paths_keep_few_points() {
        let samples: Vec<Sample> = (0..100)
            .map(|k| sample(k, DVec2::new(k as f64 * 0.01, 0.0)))
            .collect();
        let kept = curvature_thinning(&samples, DVec2::new(1.0, 0.0), 100);
        // kdiv grows 2 -> 4, then 16: 1 + 15 points.
        assert_eq!(kept.len(), 16);
        assert_eq!(kept[0], 0);
        assert!(kept.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn curved_paths_keep_more_points() {
        let curve: Vec<Sample> = (0..100)
            .map(|k| {
                let a = k as f64 * 0.03;
                sample(k, DVec2::new(a.cos(), a.sin()))
            })
            .collect();
        let end = DVec2::new(3.0f64.cos(), 3.0f64.sin());
        let line: Vec<Sample> = (0..100)
            .map(|k| sample(k, DVec2::new(k as f64 * 0.01, 0.0)))
            .collect();
        let curved = curvature_thinning(&curve, end, 100);
        let straight = curvature_thinning(&line, DVec2::new(1.0, 0.0), 100);
        assert!(curved.len() > straight.len());
    }

    #[test]
    fn flush_writes_segment_and_current_state() {
        let dir = tempfile::tempdir().unwrap();
        let options = ParticleFileOptions {
            dir: dir.path().to_path_buf(),
            trajectories: true,
            ..Default::default()
        };
        let mut files = ParticleFiles::open(&options, 3).unwrap();
        let mut store = TrajectoryStore::memory();
        for k in 0..5 {
            store.push(sample(k, DVec2::new(k as f64, 0.0))).unwrap();
        }
        files.flush(&mut store, &sample(5, DVec2::new(5.0, 0.0)), 2).unwrap();
        files.finish().unwrap();
        assert!(store.is_empty());

        let traj = fs::read_to_string(dir.path().join("traject_3.csv")).unwrap();
        let rows: Vec<&str> = traj.lines().skip(1).collect();
        assert_eq!(rows.len(), 6);
        assert!(rows[5].split(',').nth(12) == Some("2"));
        let inters = fs::read_to_string(dir.path().join("inters_3.csv")).unwrap();
        assert_eq!(inters.lines().count(), 2);
    }
}
