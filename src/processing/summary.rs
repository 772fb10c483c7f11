use super::csv_writer::write_xy;
use crate::discretization::mesh::Mesh;
use crate::tracking::driver::{Fate, TrackRecord};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

/// Travel-time statistics over the exited particles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelTimes {
    pub min: f64,
    pub mean: f64,
    pub max: f64,
    /// `None` when no exited particle carries a flux weight.
    pub flux_weighted_mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    // Mesh info
    pub num_nodes: usize,
    pub num_cells: usize,
    pub num_fractures: usize,
    pub num_inflow_nodes: usize,
    pub num_outflow_nodes: usize,

    // Fates
    pub particles: usize,
    pub exited: usize,
    pub lost: usize,
    pub stuck: usize,
    pub budget_exhausted: usize,
    pub no_initial_cell: usize,

    pub travel_times: Option<TravelTimes>,
    pub total_steps: usize,
    pub wall_time: Duration,
}

impl RunSummary {
    pub fn from_records(mesh: &Mesh, records: &[TrackRecord], wall_time: Duration) -> Self {
        let count = |fate: Fate| records.iter().filter(|r| r.fate == fate).count();

        let exited: Vec<&TrackRecord> = records.iter().filter(|r| r.exited()).collect();
        let travel_times = (!exited.is_empty()).then(|| {
            let times: Vec<f64> = exited.iter().map(|r| r.time).collect();
            let weight: f64 = exited.iter().map(|r| r.flux_weight).sum();
            let flux_weighted_mean = (weight > 0.0)
                .then(|| exited.iter().map(|r| r.flux_weight * r.time).sum::<f64>() / weight);
            TravelTimes {
                min: times.iter().cloned().fold(f64::INFINITY, f64::min),
                mean: times.iter().sum::<f64>() / times.len() as f64,
                max: times.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                flux_weighted_mean,
            }
        });

        Self {
            num_nodes: mesh.nodes.len(),
            num_cells: mesh.cells.len(),
            num_fractures: mesh.fractures.len(),
            num_inflow_nodes: mesh.inflow_nodes().len(),
            num_outflow_nodes: mesh.outflow_nodes().len(),
            particles: records.len(),
            exited: exited.len(),
            lost: count(Fate::Lost),
            stuck: count(Fate::Stuck),
            budget_exhausted: count(Fate::BudgetExhausted),
            no_initial_cell: count(Fate::NoInitialCell),
            travel_times,
            total_steps: records.iter().map(|r| r.steps).sum(),
            wall_time,
        }
    }

    fn write_report<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out, "DFN PARTICLE TRACKING SUMMARY")?;
        writeln!(out, "{}", "=".repeat(60))?;
        writeln!(out)?;

        writeln!(out, "MESH STATISTICS")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Number of nodes:     {}", self.num_nodes)?;
        writeln!(out, "Number of cells:     {}", self.num_cells)?;
        writeln!(out, "Number of fractures: {}", self.num_fractures)?;
        writeln!(out, "Inflow nodes:        {}", self.num_inflow_nodes)?;
        writeln!(out, "Outflow nodes:       {}", self.num_outflow_nodes)?;
        writeln!(out)?;

        writeln!(out, "PARTICLE FATES")?;
        writeln!(out, "{}", "-".repeat(60))?;
        writeln!(out, "Particles:           {}", self.particles)?;
        writeln!(out, "Exited:              {}", self.exited)?;
        writeln!(out, "Lost:                {}", self.lost)?;
        writeln!(out, "Stuck:               {}", self.stuck)?;
        writeln!(out, "Budget exhausted:    {}", self.budget_exhausted)?;
        writeln!(out, "No initial cell:     {}", self.no_initial_cell)?;
        writeln!(out, "Total steps:         {}", self.total_steps)?;
        writeln!(out)?;

        writeln!(out, "TRAVEL TIMES")?;
        writeln!(out, "{}", "-".repeat(60))?;
        match &self.travel_times {
            Some(t) => {
                writeln!(out, "Minimum:             {:.6e}", t.min)?;
                writeln!(out, "Mean:                {:.6e}", t.mean)?;
                writeln!(out, "Maximum:             {:.6e}", t.max)?;
                match t.flux_weighted_mean {
                    Some(mean) => writeln!(out, "Flux-weighted mean:  {:.6e}", mean)?,
                    None => writeln!(out, "Flux-weighted mean:  N/A")?,
                }
            }
            None => writeln!(out, "No particle reached the outflow boundary")?,
        }
        writeln!(out)?;

        writeln!(out, "Wall time:           {:.3}s", self.wall_time.as_secs_f64())?;
        writeln!(out, "{}", "=".repeat(60))?;
        Ok(())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        self.write_report(&mut file)
    }

    pub fn print_to_console(&self) {
        let mut buffer = Vec::new();
        if self.write_report(&mut buffer).is_ok() {
            print!("{}", String::from_utf8_lossy(&buffer));
        }
    }

    /// Cumulative breakthrough of the exited particles against travel time.
    /// Particles are weighted by flux when weights are present, uniformly otherwise.
    pub fn write_breakthrough<P: AsRef<Path>>(&self, path: P, records: &[TrackRecord]) -> io::Result<()> {
        let (times, cumulative) = breakthrough_curve(records);
        write_xy(path, "time", "cumulative_weight", &times, &cumulative)
    }
}

pub fn breakthrough_curve(records: &[TrackRecord]) -> (Vec<f64>, Vec<f64>) {
    let mut exited: Vec<&TrackRecord> = records.iter().filter(|r| r.exited()).collect();
    exited.sort_by(|a, b| a.time.total_cmp(&b.time));

    let total_weight: f64 = exited.iter().map(|r| r.flux_weight).sum();
    let uniform = total_weight <= 0.0;
    let mut sum = 0.0;
    let mut times = Vec::with_capacity(exited.len());
    let mut cumulative = Vec::with_capacity(exited.len());
    for record in &exited {
        sum += if uniform { 1.0 } else { record.flux_weight };
        times.push(record.time);
        cumulative.push(if uniform {
            sum / exited.len() as f64
        } else {
            sum / total_weight
        });
    }
    (times, cumulative)
}
