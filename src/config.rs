use crate::processing::control::{ControlOutput, SnapshotSettings};
use crate::tracking::mixing::MixingRule;
use crate::tracking::seeding::SeedingStrategy;
use crate::tracking::tdrw::TdrwParams;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("configuration could not be parsed: {0}")]
    Parse(String),
    #[error("invalid value for {key}: {value} ({reason})")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("missing configuration key: {0}")]
    Missing(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Years,
    Days,
    Hours,
    Minutes,
    #[default]
    Seconds,
}

impl TimeUnit {
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Years => 365.0 * 24.0 * 3600.0,
            TimeUnit::Days => 24.0 * 3600.0,
            TimeUnit::Hours => 3600.0,
            TimeUnit::Minutes => 60.0,
            TimeUnit::Seconds => 1.0,
        }
    }
}

/// Which result files a run writes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    pub out_dir: PathBuf,
    /// Sub-directory of `out_dir` for the per-particle files.
    pub out_path: String,
    pub out_time: bool,
    pub out_traj: bool,
    pub out_curv: bool,
    pub out_tort: bool,
    pub out_fract: bool,
    pub out_init: bool,
    pub out_filetemp: bool,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("output"),
            out_path: "trajectories".to_string(),
            out_time: true,
            out_traj: false,
            out_curv: false,
            out_tort: false,
            out_fract: false,
            out_init: false,
            out_filetemp: false,
        }
    }
}

impl OutputOptions {
    pub fn particle_dir(&self) -> PathBuf {
        self.out_dir.join(&self.out_path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Global seed; every particle derives its own stream from it.
    pub seed: u64,
    pub density: f64,
    /// Aperture given to nodes that carry none.
    pub thickness: f64,
    /// Step budget per particle.
    pub timesteps: usize,
    pub time_units: TimeUnit,
    pub output: OutputOptions,
    pub mixing_rule: MixingRule,
    pub tdrw: Option<TdrwParams>,
    pub seeding: SeedingStrategy,
    pub flux_weight: bool,
    pub control: Option<ControlOutput>,
    pub snapshots: Option<SnapshotSettings>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            seed: 1,
            density: 997.7,
            thickness: 1e-3,
            timesteps: 2_000_000,
            time_units: TimeUnit::Seconds,
            output: OutputOptions::default(),
            mixing_rule: MixingRule::CompleteMixing,
            tdrw: None,
            seeding: SeedingStrategy::default(),
            flux_weight: false,
            control: None,
            snapshots: None,
        }
    }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn positive(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(key, value, "must be positive"))
    }
}

fn porosity(key: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(invalid(key, value, "must lie in (0, 1]"))
    }
}

impl TrackingConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: TrackingConfig =
            serde_json::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let text =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timesteps == 0 {
            return Err(invalid("timesteps", self.timesteps, "must be positive"));
        }
        positive("density", self.density)?;
        positive("thickness", self.thickness)?;

        if let Some(tdrw) = &self.tdrw {
            porosity("tdrw.porosity", tdrw.porosity)?;
            positive("tdrw.diffusion_coefficient", tdrw.diffusion_coefficient)?;
        }

        match &self.seeding {
            SeedingStrategy::PerEdge { particles } | SeedingStrategy::Random { particles } => {
                if *particles == 0 {
                    return Err(invalid("seeding.particles", particles, "must be positive"));
                }
            }
            SeedingStrategy::Equidistant { particles_per_edge } => {
                if *particles_per_edge == 0 {
                    return Err(invalid(
                        "seeding.particles_per_edge",
                        particles_per_edge,
                        "must be positive",
                    ));
                }
            }
            SeedingStrategy::Region { particles, min, max } => {
                if *particles == 0 {
                    return Err(invalid("seeding.particles", particles, "must be positive"));
                }
                if min.cmpgt(*max).any() {
                    return Err(invalid("seeding.min", min, "must not exceed seeding.max"));
                }
            }
            SeedingStrategy::Matrix {
                sources,
                porosity: phi,
                diffusion_coefficient,
            } => {
                if sources.is_empty() {
                    return Err(ConfigError::Missing("seeding.sources".to_string()));
                }
                porosity("seeding.porosity", *phi)?;
                positive("seeding.diffusion_coefficient", *diffusion_coefficient)?;
            }
            SeedingStrategy::FluxWeighted { total } => {
                if *total == 0 {
                    return Err(invalid("seeding.total", total, "must be positive"));
                }
            }
        }

        if let Some(control) = &self.control {
            positive("control.delta", control.delta())?;
            if let ControlOutput::Cylinder {
                length_to_well,
                well_thickness,
                ..
            } = control
            {
                positive("control.length_to_well", *length_to_well)?;
                positive("control.well_thickness", *well_thickness)?;
            }
        }

        if let Some(snapshots) = &self.snapshots {
            if snapshots.count == 0 {
                return Err(invalid("snapshots.count", snapshots.count, "must be positive"));
            }
            positive("snapshots.interval", snapshots.interval)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrackingConfig::default();
        config.validate().unwrap();
        config.to_file(&path).unwrap();
        assert_eq!(TrackingConfig::from_file(&path).unwrap(), config);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let text = r#"{
            "timesteps": 500,
            "mixing_rule": "streamline_routing",
            "seeding": { "strategy": "flux_weighted", "total": 20 },
            "control": { "mode": "plane", "delta": 0.25, "flow_dir": "x" }
        }"#;
        let config: TrackingConfig = serde_json::from_str(text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.timesteps, 500);
        assert_eq!(config.mixing_rule, MixingRule::StreamlineRouting);
        assert_eq!(config.seeding, SeedingStrategy::FluxWeighted { total: 20 });
        assert_eq!(config.density, TrackingConfig::default().density);
    }

    #[test]
    fn invalid_values_are_named() {
        let config = TrackingConfig {
            timesteps: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "timesteps"
        ));

        let config = TrackingConfig {
            tdrw: Some(TdrwParams {
                porosity: 1.5,
                diffusion_coefficient: 1e-9,
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "tdrw.porosity"
        ));
    }

    #[test]
    fn unit_scales() {
        assert_eq!(TimeUnit::Days.seconds(), 86_400.0);
        assert_eq!(TimeUnit::Years.seconds(), 31_536_000.0);
    }
}
