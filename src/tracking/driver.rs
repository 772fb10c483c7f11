//! The per-particle time loop and the parallel run over all particles.

use super::TrackingError;
use super::advector::{corrector, lagrangian, predictor};
use super::boundary::{final_position, move_to_next_cell_bound};
use super::intersection::{Crossing, across_intersection, check_distance};
use super::locator::{BoundaryFlag, check_new_cell};
use super::mixing::MixingRule;
use super::particle::{Particle, particle_rng};
use super::seeding::{assign_flux_weights, locate_initial, seed_particles};
use super::tdrw::{self, TdrwParams};
use crate::config::TrackingConfig;
use crate::discretization::mesh::{Mesh, external_id};
use crate::numerics::timing::{collect_timing, record_track, reset_timing};
use crate::physics::velocity::{define_time_steps, scale_velocities};
use crate::processing::control::{ControlOutput, ControlTracker, SnapshotRecorder, SnapshotSettings};
use crate::processing::csv_writer::sci;
use crate::processing::records::write_run_tables;
use crate::processing::summary::RunSummary;
use crate::processing::trajectory::{ParticleFileOptions, ParticleFiles, Sample, TrajectoryStore};
use glam::DVec3;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Result of one pass through the time loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    Continue,
    /// The particle sits on an intersection and has to be routed.
    IntersectionPending(Crossing),
    ExitedBoundary,
    Lost,
    Stuck,
}

/// How a particle's track ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fate {
    Exited,
    Lost,
    Stuck,
    BudgetExhausted,
    NoInitialCell,
}

impl std::fmt::Display for Fate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Fate::Exited => "exited",
            Fate::Lost => "lost",
            Fate::Stuck => "stuck",
            Fate::BudgetExhausted => "budget exhausted",
            Fate::NoInitialCell => "no initial cell",
        };
        f.write_str(name)
    }
}

/// Everything reported about one particle once its track is over.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackRecord {
    pub id: usize,
    pub fate: Fate,
    /// Time steps executed.
    pub steps: usize,
    pub flux_weight: f64,
    pub time: f64,
    pub total_time: f64,
    pub diffusion_time: f64,
    pub beta: f64,
    pub length: f64,
    pub initial_cell: Option<usize>,
    pub initial_fracture: usize,
    pub initial_position: DVec3,
    pub final_position: DVec3,
    /// Fracture changes along the path.
    pub fracture_hits: usize,
    /// Fractures visited, starting with the initial one.
    pub fractures: Vec<usize>,
    /// Positions at the snapshot times reached.
    pub snapshots: Vec<DVec3>,
}

impl TrackRecord {
    pub fn exited(&self) -> bool {
        self.fate == Fate::Exited
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackSettings {
    pub timesteps: usize,
    pub mixing_rule: MixingRule,
    pub tdrw: Option<TdrwParams>,
    pub control: Option<ControlOutput>,
    pub snapshots: Option<SnapshotSettings>,
    /// Per-particle files; `None` tracks without writing anything.
    pub files: Option<ParticleFileOptions>,
}

impl TrackSettings {
    pub fn new(timesteps: usize, mixing_rule: MixingRule) -> Self {
        Self {
            timesteps,
            mixing_rule,
            tdrw: None,
            control: None,
            snapshots: None,
            files: None,
        }
    }

    pub fn from_config(config: &TrackingConfig) -> Self {
        let output = &config.output;
        let wants_files =
            output.out_traj || config.tdrw.is_some() || config.control.is_some();
        let files = wants_files.then(|| ParticleFileOptions {
            dir: output.particle_dir(),
            trajectories: output.out_traj,
            curvature: output.out_curv,
            temp_file: output.out_filetemp,
            tdrw: config.tdrw.is_some(),
            control: config.control.is_some(),
        });
        Self {
            timesteps: config.timesteps,
            mixing_rule: config.mixing_rule,
            tdrw: config.tdrw,
            control: config.control.clone(),
            snapshots: config.snapshots,
            files,
        }
    }
}

/// Mutable state of one particle's walk.
struct Walk {
    particle: Particle,
    rng: ChaCha8Rng,
    store: TrajectoryStore,
    files: Option<ParticleFiles>,
    control: Option<ControlTracker>,
    snapshots: Option<SnapshotRecorder>,
    /// Global position at the start of the current step.
    start: DVec3,
    anchor: DVec3,
    initial: DVec3,
    initial_cell: Option<usize>,
    initial_fracture: usize,
    length: f64,
    prev_cell: Option<usize>,
    prev_fracture: usize,
    flag: Option<BoundaryFlag>,
    same_cell_steps: usize,
    fracture_hits: usize,
    fractures: Vec<usize>,
}

pub struct Tracker<'a> {
    mesh: &'a Mesh,
    settings: &'a TrackSettings,
}

impl<'a> Tracker<'a> {
    pub fn new(mesh: &'a Mesh, settings: &'a TrackSettings) -> Self {
        Self { mesh, settings }
    }

    /// Track one located particle until it exits, is lost or stuck, or runs
    /// out of steps.
    pub fn track(&self, particle: Particle, rng: ChaCha8Rng) -> io::Result<TrackRecord> {
        record_track(|| self.track_inner(particle, rng))
    }

    fn track_inner(&self, particle: Particle, rng: ChaCha8Rng) -> io::Result<TrackRecord> {
        let mut walk = self.begin(particle, rng)?;
        if walk.particle.cell.is_none() {
            return self.finish(walk, Fate::NoInitialCell, 0);
        }
        self.write_control_row(&mut walk, false)?;

        for t in 0..self.settings.timesteps {
            self.observe(&mut walk, t)?;

            if walk.particle.class.at_intersection() {
                if let StepOutcome::IntersectionPending(crossing) = self.approach(&mut walk) {
                    self.cross(&mut walk, t, &crossing)?;
                }
                walk.prev_cell = walk.particle.cell;
            }
            if walk.particle.cell.is_none() {
                return self.finish(walk, Fate::Lost, t + 1);
            }

            match self.advance(&mut walk) {
                StepOutcome::Continue | StepOutcome::IntersectionPending(_) => {}
                StepOutcome::ExitedBoundary => return self.exit(walk, t),
                StepOutcome::Lost => return self.finish(walk, Fate::Lost, t + 1),
                StepOutcome::Stuck => return self.finish(walk, Fate::Stuck, t + 1),
            }
        }
        let budget = self.settings.timesteps;
        self.finish(walk, Fate::BudgetExhausted, budget)
    }

    fn begin(&self, particle: Particle, rng: ChaCha8Rng) -> io::Result<Walk> {
        let label = external_id(particle.id);
        let (files, store) = match &self.settings.files {
            Some(options) => {
                let store = if options.trajectories && options.temp_file {
                    TrajectoryStore::temp_file(options.dir.join(format!("tempdata_{label}")))?
                } else {
                    TrajectoryStore::memory()
                };
                (Some(ParticleFiles::open(options, label)?), store)
            }
            None => (None, TrajectoryStore::memory()),
        };
        let initial = self.mesh.position_3d(particle.position, particle.fracture);
        let control = self
            .settings
            .control
            .as_ref()
            .and_then(|c| ControlTracker::new(c, self.mesh));
        Ok(Walk {
            rng,
            store,
            files,
            control,
            snapshots: self.settings.snapshots.map(SnapshotRecorder::new),
            start: initial,
            anchor: initial,
            initial,
            initial_cell: particle.cell,
            initial_fracture: particle.fracture,
            length: 0.0,
            prev_cell: particle.cell,
            prev_fracture: particle.fracture,
            flag: None,
            same_cell_steps: 0,
            fracture_hits: 0,
            fractures: vec![particle.fracture],
            particle,
        })
    }

    fn records_trajectory(&self) -> bool {
        self.settings.files.as_ref().is_some_and(|f| f.trajectories)
    }

    fn sample(&self, walk: &Walk, step: usize) -> Sample {
        let p = &walk.particle;
        Sample {
            step,
            position: p.position,
            position_3d: self.mesh.position_3d(p.position, p.fracture),
            velocity_3d: self.mesh.velocity_3d(p.velocity, p.fracture),
            cell: p.cell,
            fracture: p.fracture,
            time: p.time,
            beta: p.beta,
            length: walk.length,
            pressure: p.pressure,
            aperture: self.aperture(p.cell),
        }
    }

    fn aperture(&self, cell: Option<usize>) -> f64 {
        cell.map_or(0.0, |c| self.mesh.nodes[self.mesh.cells[c].nodes[0]].aperture)
    }

    /// Path length, trajectory sample, snapshots and control surfaces at the
    /// start of step `t`.
    fn observe(&self, walk: &mut Walk, t: usize) -> io::Result<()> {
        let here = self.mesh.position_3d(walk.particle.position, walk.particle.fracture);
        walk.length += here.distance(walk.start);
        walk.start = here;

        if self.records_trajectory() {
            let sample = self.sample(walk, t);
            walk.store.push(sample)?;
        }
        if let Some(snapshots) = walk.snapshots.as_mut() {
            snapshots.observe(walk.particle.time, here);
        }
        let crossed = walk
            .control
            .as_mut()
            .and_then(|c| c.crossed(here).then(|| c.diffuses()));
        if let Some(with_diffusion) = crossed {
            self.write_control_row(walk, with_diffusion)?;
        }
        Ok(())
    }

    /// Apply one diffusion increment and log it.
    fn diffuse(&self, walk: &mut Walk) -> io::Result<()> {
        let Some(params) = &self.settings.tdrw else {
            return Ok(());
        };
        let record = tdrw::apply(self.mesh, &mut walk.particle, params, &mut walk.rng);
        if let Some(log) = walk.files.as_mut().and_then(|f| f.tdrw.as_mut()) {
            log.write_row([
                sci(record.advective),
                sci(record.diffusion),
                sci(record.advective + record.diffusion),
                external_id(record.fracture).to_string(),
                sci(record.time),
                sci(record.total_time),
                sci(record.diffusion_time),
            ])?;
        }
        Ok(())
    }

    fn write_control_row(&self, walk: &mut Walk, with_diffusion: bool) -> io::Result<()> {
        if walk.control.is_none() {
            return Ok(());
        }
        if with_diffusion {
            self.diffuse(walk)?;
        }
        let p = &walk.particle;
        let here = self.mesh.position_3d(p.position, p.fracture);
        let velocity = self.mesh.velocity_3d(p.velocity, p.fracture);
        let row = [
            sci(p.time),
            sci(here.x),
            sci(here.y),
            sci(here.z),
            sci(velocity.x),
            sci(velocity.y),
            sci(velocity.z),
            sci(walk.length),
            external_id(p.fracture).to_string(),
            sci(self.aperture(p.cell)),
            sci(p.total_time),
            sci(p.diffusion_time),
        ];
        if let Some(table) = walk.files.as_mut().and_then(|f| f.control.as_mut()) {
            table.write_row(row)?;
        }
        Ok(())
    }

    fn approach(&self, walk: &mut Walk) -> StepOutcome {
        let approach = check_distance(self.mesh, &mut walk.particle);
        if approach.flag.is_some() {
            walk.flag = approach.flag;
        }
        match approach.crossing {
            Some(crossing) => StepOutcome::IntersectionPending(crossing),
            None => StepOutcome::Continue,
        }
    }

    fn cross(&self, walk: &mut Walk, t: usize, crossing: &Crossing) -> io::Result<()> {
        if self.records_trajectory() {
            let current = self.sample(walk, t);
            if let Some(files) = walk.files.as_mut() {
                files.flush(&mut walk.store, &current, external_id(crossing.crossed_fracture))?;
            }
        }
        self.diffuse(walk)?;
        let routed = across_intersection(
            self.mesh,
            &mut walk.particle,
            crossing,
            self.settings.mixing_rule,
            &mut walk.rng,
        );
        if routed.is_none() {
            warn!(
                particle = external_id(walk.particle.id),
                "no cell carries flow away from the intersection"
            );
        }
        Ok(())
    }

    fn recover(&self, walk: &mut Walk) {
        if let Some(prev) = walk.prev_cell {
            move_to_next_cell_bound(self.mesh, &mut walk.particle, prev);
        }
    }

    /// Predictor, relocation, corrector and travel-time update, followed by
    /// the cell bookkeeping of the step.
    fn advance(&self, walk: &mut Walk) -> StepOutcome {
        let mesh = self.mesh;
        predictor(mesh, &mut walk.particle);
        if let Some(flag) = check_new_cell(mesh, &mut walk.particle) {
            walk.flag = Some(flag);
        }
        if walk.flag == Some(BoundaryFlag::Exit) {
            return StepOutcome::ExitedBoundary;
        }

        if walk.particle.cell.is_some() {
            if !walk.particle.class.at_intersection() {
                corrector(mesh, &mut walk.particle);
            }
            lagrangian(mesh, &mut walk.particle, walk.start, &mut walk.anchor);
        } else if walk.flag == Some(BoundaryFlag::OffEdge) {
            self.recover(walk);
            walk.flag = None;
        }

        if walk.particle.cell.is_some() {
            if let Some(flag) = check_new_cell(mesh, &mut walk.particle) {
                walk.flag = Some(flag);
            }
            if walk.particle.cell.is_none() && walk.flag == Some(BoundaryFlag::OffEdge) {
                walk.flag = None;
                self.recover(walk);
            }
        }

        if walk.flag == Some(BoundaryFlag::Exit) {
            return StepOutcome::ExitedBoundary;
        }
        match walk.particle.cell {
            Some(cell) if walk.prev_cell != Some(cell) => {
                walk.same_cell_steps = 0;
                walk.prev_cell = Some(cell);
                if walk.particle.fracture != walk.prev_fracture {
                    walk.prev_fracture = walk.particle.fracture;
                    walk.fracture_hits += 1;
                    if walk.fracture_hits > mesh.fractures.len() {
                        return StepOutcome::Lost;
                    }
                    walk.fractures.push(walk.particle.fracture);
                }
                StepOutcome::Continue
            }
            Some(_) => {
                walk.same_cell_steps += 1;
                if walk.same_cell_steps as f64 > self.settings.timesteps as f64 / 3.0 {
                    StepOutcome::Stuck
                } else {
                    StepOutcome::Continue
                }
            }
            None => StepOutcome::Lost,
        }
    }

    /// Exit through the outflow zone during step `t`.
    fn exit(&self, mut walk: Walk, t: usize) -> io::Result<TrackRecord> {
        let mesh = self.mesh;
        // The exit edge belongs to the cell the step started in.
        walk.particle.cell = walk.prev_cell.or(walk.particle.cell);
        if walk.particle.cell.is_some() {
            lagrangian(mesh, &mut walk.particle, walk.start, &mut walk.anchor);
            final_position(mesh, &mut walk.particle);
        }

        if self.records_trajectory() {
            let current = self.sample(&walk, t);
            if let Some(files) = walk.files.as_mut() {
                files.flush(&mut walk.store, &current, 0)?;
            }
        }
        self.diffuse(&mut walk)?;

        let here = mesh.position_3d(walk.particle.position, walk.particle.fracture);
        walk.length += here.distance(walk.start);
        walk.start = here;
        self.write_control_row(&mut walk, false)?;

        self.finish(walk, Fate::Exited, t + 1)
    }

    fn finish(&self, mut walk: Walk, fate: Fate, steps: usize) -> io::Result<TrackRecord> {
        if let Some(files) = walk.files.as_mut() {
            files.finish()?;
        }
        walk.store.discard()?;

        let p = &walk.particle;
        let label = external_id(p.id);
        match fate {
            Fate::Lost => warn!(particle = label, steps, "particle lost"),
            Fate::NoInitialCell => {}
            _ => debug!(particle = label, steps, fate = %fate, time = p.time, "track finished"),
        }
        Ok(TrackRecord {
            id: p.id,
            fate,
            steps,
            flux_weight: p.flux_weight,
            time: p.time,
            total_time: p.total_time,
            diffusion_time: p.diffusion_time,
            beta: p.beta,
            length: walk.length,
            initial_cell: walk.initial_cell,
            initial_fracture: walk.initial_fracture,
            initial_position: walk.initial,
            final_position: walk.start,
            fracture_hits: walk.fracture_hits,
            fractures: walk.fractures,
            snapshots: walk.snapshots.map(|s| s.positions).unwrap_or_default(),
        })
    }
}

/// Give apertures to nodes without one, convert velocities to the run's time
/// unit and fill the per-node step bounds.
pub fn prepare_mesh(mesh: &mut Mesh, config: &TrackingConfig) {
    for node in mesh.nodes.iter_mut().filter(|n| n.aperture <= 0.0) {
        node.aperture = config.thickness;
    }
    scale_velocities(mesh, config.time_units.seconds());
    define_time_steps(mesh);
}

/// Seed every particle and locate its starting cell.
pub fn seed_and_locate(mesh: &Mesh, config: &TrackingConfig) -> Result<Vec<Particle>, TrackingError> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let seeds = seed_particles(
        mesh,
        &config.seeding,
        config.density,
        config.time_units.seconds(),
        &mut rng,
    )?;

    let mut particles: Vec<Particle> = seeds
        .iter()
        .enumerate()
        .map(|(i, seed)| {
            let mut particle = Particle::new(i, seed.position, seed.fracture);
            particle.time = seed.time;
            particle.flux_weight = seed.flux_weight;
            if !locate_initial(mesh, &mut particle, seed) {
                particle.cell = None;
                warn!(
                    particle = external_id(i),
                    x = seed.position.x,
                    y = seed.position.y,
                    fracture = external_id(seed.fracture),
                    "initial cell not found"
                );
            }
            particle
        })
        .collect();

    if config.flux_weight && config.seeding.supports_flux_weights() {
        assign_flux_weights(mesh, &mut particles);
    }
    Ok(particles)
}

const PROGRESS_MARKS: [usize; 5] = [1, 5, 25, 50, 75];

fn report_progress(done: usize, total: usize) {
    for percent in PROGRESS_MARKS {
        let mark = (total * percent).div_ceil(100).max(1);
        if done == mark {
            info!("Done {done} particles, {percent}%.");
        }
    }
}

/// A finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub records: Vec<TrackRecord>,
    pub summary: RunSummary,
}

/// Track already located particles in parallel. Records come back in particle order.
pub fn track_all(
    mesh: &Mesh,
    settings: &TrackSettings,
    seed: u64,
    particles: Vec<Particle>,
) -> io::Result<Vec<TrackRecord>> {
    if let Some(files) = &settings.files {
        fs::create_dir_all(&files.dir)?;
    }
    let total = particles.len();
    let done = AtomicUsize::new(0);
    let tracker = Tracker::new(mesh, settings);
    particles
        .into_par_iter()
        .map(|particle| {
            let rng = particle_rng(seed, particle.id);
            let record = tracker.track(particle, rng);
            report_progress(done.fetch_add(1, Ordering::Relaxed) + 1, total);
            record
        })
        .collect()
}

/// Seed, track and report: the whole run on a prepared mesh.
pub fn run(mesh: &Mesh, config: &TrackingConfig) -> Result<RunReport, TrackingError> {
    let started = Instant::now();
    reset_timing();
    info!(rule = %config.mixing_rule, timesteps = config.timesteps, "starting particle tracking");

    let particles = seed_and_locate(mesh, config)?;
    info!(particles = particles.len(), "initial positions placed");

    let settings = TrackSettings::from_config(config);
    let records = track_all(mesh, &settings, config.seed, particles)?;

    fs::create_dir_all(&config.output.out_dir)?;
    write_run_tables(config, &records)?;
    let summary = RunSummary::from_records(mesh, &records, started.elapsed());
    summary.write_to_file(config.output.out_dir.join("summary.txt"))?;
    summary.write_breakthrough(config.output.out_dir.join("breakthrough.csv"), &records)?;
    collect_timing(started.elapsed()).print_summary();

    Ok(RunReport { records, summary })
}
