//! Run-level tables written once all particles are tracked.

use super::csv_writer::{CsvStream, sci};
use crate::config::TrackingConfig;
use crate::discretization::mesh::external_id;
use crate::tracking::driver::TrackRecord;
use std::fs;
use std::io;
use std::path::Path;

pub const TRAVEL_TIME_FILE: &str = "traveltime.csv";
pub const TOTAL_FILE: &str = "TotalNumberP";
pub const TORTUOSITY_FILE: &str = "tortuosity.csv";
pub const FRACTURE_SEQUENCE_FILE: &str = "fracture_sequence.csv";
pub const INITIAL_POSITION_FILE: &str = "initial_positions.csv";

/// Write every table the configuration asks for into `output.out_dir`.
pub fn write_run_tables(config: &TrackingConfig, records: &[TrackRecord]) -> io::Result<()> {
    let out = &config.output;
    let dir = out.out_dir.as_path();

    let exited = records.iter().filter(|r| r.exited()).count();
    fs::write(dir.join(TOTAL_FILE), format!("{exited}\n"))?;

    if out.out_time {
        write_travel_times(dir.join(TRAVEL_TIME_FILE), records)?;
    }
    if out.out_tort {
        write_tortuosity(dir.join(TORTUOSITY_FILE), records)?;
    }
    if out.out_fract {
        write_fracture_sequences(dir.join(FRACTURE_SEQUENCE_FILE), records)?;
    }
    if out.out_init {
        write_initial_positions(dir.join(INITIAL_POSITION_FILE), records)?;
    }
    if let Some(snapshots) = &config.snapshots {
        write_snapshots(dir, snapshots.count, records)?;
    }
    Ok(())
}

pub fn write_travel_times<P: AsRef<Path>>(path: P, records: &[TrackRecord]) -> io::Result<()> {
    let mut table = CsvStream::create(
        path,
        &[
            "particle",
            "steps",
            "flux_weight",
            "advective_time",
            "total_time",
            "diffusion_time",
            "beta",
            "length",
        ],
    )?;
    for r in records.iter().filter(|r| r.exited()) {
        table.write_row([
            external_id(r.id).to_string(),
            r.steps.to_string(),
            sci(r.flux_weight),
            sci(r.time),
            sci(r.time + r.diffusion_time),
            sci(r.diffusion_time),
            sci(r.beta),
            sci(r.length),
        ])?;
    }
    table.flush()
}

pub fn write_tortuosity<P: AsRef<Path>>(path: P, records: &[TrackRecord]) -> io::Result<()> {
    let mut table = CsvStream::create(
        path,
        &["particle", "length", "x0", "y0", "z0", "x1", "y1", "z1", "intersections"],
    )?;
    for r in records.iter().filter(|r| r.exited()) {
        let (a, b) = (r.initial_position, r.final_position);
        table.write_row([
            external_id(r.id).to_string(),
            sci(r.length),
            sci(a.x),
            sci(a.y),
            sci(a.z),
            sci(b.x),
            sci(b.y),
            sci(b.z),
            r.fracture_hits.to_string(),
        ])?;
    }
    table.flush()
}

/// One row per exited particle; the visited fractures are space separated.
pub fn write_fracture_sequences<P: AsRef<Path>>(path: P, records: &[TrackRecord]) -> io::Result<()> {
    let mut table = CsvStream::create(path, &["particle", "fractures"])?;
    for r in records.iter().filter(|r| r.exited()) {
        let sequence: Vec<String> = r
            .fractures
            .iter()
            .map(|&f| external_id(f).to_string())
            .collect();
        table.write_row([external_id(r.id).to_string(), sequence.join(" ")])?;
    }
    table.flush()
}

pub fn write_initial_positions<P: AsRef<Path>>(path: P, records: &[TrackRecord]) -> io::Result<()> {
    let mut table = CsvStream::create(
        path,
        &["particle", "cell", "fracture", "x", "y", "z", "flux_weight"],
    )?;
    for r in records {
        let p = r.initial_position;
        table.write_row([
            external_id(r.id).to_string(),
            r.initial_cell.map_or(0, external_id).to_string(),
            external_id(r.initial_fracture).to_string(),
            sci(p.x),
            sci(p.y),
            sci(p.z),
            sci(r.flux_weight),
        ])?;
    }
    table.flush()
}

/// `dispers_t<k>.csv` holds the exited particles' positions at the k-th snapshot time.
pub fn write_snapshots(dir: &Path, count: usize, records: &[TrackRecord]) -> io::Result<()> {
    for k in 0..count {
        let path = dir.join(format!("dispers_t{}.csv", k + 1));
        let mut table = CsvStream::append(path, &["particle", "x", "y", "z"])?;
        for r in records.iter().filter(|r| r.exited()) {
            if let Some(p) = r.snapshots.get(k) {
                table.write_row([
                    external_id(r.id).to_string(),
                    sci(p.x),
                    sci(p.y),
                    sci(p.z),
                ])?;
            }
        }
        table.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutputOptions;
    use crate::processing::control::SnapshotSettings;
    use crate::tracking::driver::Fate;
    use glam::DVec3;

    fn record(id: usize, fate: Fate) -> TrackRecord {
        TrackRecord {
            id,
            fate,
            steps: 7,
            flux_weight: 0.5,
            time: 2.0,
            total_time: 0.0,
            diffusion_time: 1.0,
            beta: 3.0,
            length: 2.5,
            initial_cell: Some(4),
            initial_fracture: 0,
            initial_position: DVec3::new(-1.0, 0.0, 0.0),
            final_position: DVec3::new(1.0, 0.5, 0.0),
            fracture_hits: 1,
            fractures: vec![0, 1],
            snapshots: vec![DVec3::ZERO],
        }
    }

    #[test]
    fn tables_list_exited_particles_with_external_ids() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrackingConfig {
            output: OutputOptions {
                out_dir: dir.path().to_path_buf(),
                out_tort: true,
                out_fract: true,
                out_init: true,
                ..Default::default()
            },
            snapshots: Some(SnapshotSettings {
                count: 2,
                interval: 1.0,
            }),
            ..Default::default()
        };
        let records = vec![record(0, Fate::Exited), record(1, Fate::Lost)];
        write_run_tables(&config, &records).unwrap();

        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read(TOTAL_FILE).trim(), "1");

        let times = read(TRAVEL_TIME_FILE);
        let lines: Vec<&str> = times.lines().collect();
        assert_eq!(lines.len(), 2);
        let fields: Vec<&str> = lines[1].split(',').collect();
        assert_eq!(fields[0], "1");
        assert_eq!(fields[1], "7");
        assert_eq!(fields[4].parse::<f64>().unwrap(), 3.0);

        assert_eq!(read(FRACTURE_SEQUENCE_FILE).lines().nth(1), Some("1,1 2"));
        assert_eq!(read(INITIAL_POSITION_FILE).lines().count(), 3);
        assert!(read(INITIAL_POSITION_FILE).contains("\n2,5,1,"));
        assert_eq!(read(TORTUOSITY_FILE).lines().count(), 2);
        assert_eq!(read("dispers_t1.csv").lines().count(), 2);
        assert_eq!(read("dispers_t2.csv").lines().count(), 1);
    }
}
