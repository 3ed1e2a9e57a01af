use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use repex_core::{DynamicsParams, ErrorInfo, RepexError};
use serde::{Deserialize, Serialize};

/// YAML-configurable parameters governing a replica-exchange run.
///
/// Field names match the keys of the persisted options record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunOptions {
    /// Free-form title stored with the run.
    #[serde(default = "default_title")]
    pub title: String,
    /// Langevin collision rate in 1/ps.
    #[serde(default = "default_collision_rate")]
    pub collision_rate: f64,
    /// Relative tolerance for constrained bonds, passed through to the physics.
    #[serde(default = "default_constraint_tolerance")]
    pub constraint_tolerance: f64,
    /// Production timestep in fs.
    #[serde(default = "default_timestep")]
    pub timestep: f64,
    /// Dynamics steps between exchange attempts.
    #[serde(default = "default_nsteps_per_iteration")]
    pub nsteps_per_iteration: usize,
    /// Iterations performed by [`crate::ReplicaExchange::run_to_completion`].
    #[serde(default = "default_number_of_iterations")]
    pub number_of_iterations: usize,
    /// Timestep in fs used during equilibration.
    #[serde(default = "default_equilibration_timestep")]
    pub equilibration_timestep: f64,
    /// Rounds of dynamics without exchanges before iteration 0 is written.
    #[serde(default = "default_number_of_equilibration_iterations")]
    pub number_of_equilibration_iterations: usize,
    /// Minimize every replica before iteration 0 is written.
    #[serde(default = "default_true")]
    pub minimize: bool,
    /// Strategy used to propose state-label swaps.
    #[serde(default)]
    pub replica_mixing_scheme: MixingScheme,
    /// Stored with the run; no analysis is triggered by the engine.
    #[serde(default)]
    pub online_analysis: bool,
    /// Log the acceptance table after every iteration.
    #[serde(default = "default_true")]
    pub show_mixing_statistics: bool,
    /// Master seed from which every random stream is derived.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Threads used to propagate the replicas owned by one worker.
    #[serde(default = "default_propagation_threads")]
    pub propagation_threads: usize,
}

fn default_title() -> String {
    "Replica-exchange simulation".to_string()
}

fn default_collision_rate() -> f64 {
    91.0
}

fn default_constraint_tolerance() -> f64 {
    1e-6
}

fn default_timestep() -> f64 {
    2.0
}

fn default_nsteps_per_iteration() -> usize {
    500
}

fn default_number_of_iterations() -> usize {
    1
}

fn default_equilibration_timestep() -> f64 {
    1.0
}

fn default_number_of_equilibration_iterations() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_master_seed() -> u64 {
    0x05EE_D5EE_DD15_5EED_u64
}

fn default_propagation_threads() -> usize {
    1
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            title: default_title(),
            collision_rate: default_collision_rate(),
            constraint_tolerance: default_constraint_tolerance(),
            timestep: default_timestep(),
            nsteps_per_iteration: default_nsteps_per_iteration(),
            number_of_iterations: default_number_of_iterations(),
            equilibration_timestep: default_equilibration_timestep(),
            number_of_equilibration_iterations: default_number_of_equilibration_iterations(),
            minimize: true,
            replica_mixing_scheme: MixingScheme::default(),
            online_analysis: false,
            show_mixing_statistics: true,
            master_seed: default_master_seed(),
            propagation_threads: default_propagation_threads(),
        }
    }
}

impl RunOptions {
    /// Parses options from a YAML document and validates them.
    pub fn from_yaml_str(text: &str) -> Result<Self, RepexError> {
        let options: RunOptions = serde_yaml::from_str(text).map_err(|err| {
            RepexError::Configuration(
                ErrorInfo::new("invalid-options", err.to_string())
                    .with_hint("see RunOptions for the accepted keys and mixing schemes"),
            )
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Reads and parses a YAML options file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, RepexError> {
        let text = fs::read_to_string(path).map_err(|err| {
            RepexError::Configuration(
                ErrorInfo::new("options-read", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        Self::from_yaml_str(&text).map_err(|err| err.with_context("path", path.display()))
    }

    /// Checks numeric ranges.
    pub fn validate(&self) -> Result<(), RepexError> {
        let positive = [
            ("timestep", self.timestep),
            ("equilibration_timestep", self.equilibration_timestep),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(RepexError::Configuration(
                    ErrorInfo::new("invalid-option", "option must be finite and positive")
                        .with_context("option", name)
                        .with_context("value", value),
                ));
            }
        }
        let non_negative = [
            ("collision_rate", self.collision_rate),
            ("constraint_tolerance", self.constraint_tolerance),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(RepexError::Configuration(
                    ErrorInfo::new("invalid-option", "option must be finite and non-negative")
                        .with_context("option", name)
                        .with_context("value", value),
                ));
            }
        }
        if self.propagation_threads == 0 {
            return Err(RepexError::Configuration(
                ErrorInfo::new("invalid-option", "at least one propagation thread is required")
                    .with_context("option", "propagation_threads"),
            ));
        }
        Ok(())
    }

    /// Integrator settings for production iterations.
    pub fn production_dynamics(&self) -> DynamicsParams {
        DynamicsParams {
            n_steps: self.nsteps_per_iteration,
            timestep: self.timestep,
            collision_rate: self.collision_rate,
        }
    }

    /// Integrator settings for equilibration rounds.
    pub fn equilibration_dynamics(&self) -> DynamicsParams {
        DynamicsParams {
            n_steps: self.nsteps_per_iteration,
            timestep: self.equilibration_timestep,
            collision_rate: self.collision_rate,
        }
    }
}

/// Named strategy used to propose state-label swaps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MixingScheme {
    /// `n_states` random proposals between distinct states per iteration.
    #[default]
    SwapAll,
    /// One pass over the adjacent state pairs per iteration.
    SwapNeighbors,
    /// No exchanges.
    None,
}

impl MixingScheme {
    /// Stable name used in configuration and the options record.
    pub fn as_str(&self) -> &'static str {
        match self {
            MixingScheme::SwapAll => "swap-all",
            MixingScheme::SwapNeighbors => "swap-neighbors",
            MixingScheme::None => "none",
        }
    }
}

impl fmt::Display for MixingScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MixingScheme {
    type Err = RepexError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "swap-all" => Ok(MixingScheme::SwapAll),
            "swap-neighbors" => Ok(MixingScheme::SwapNeighbors),
            "none" => Ok(MixingScheme::None),
            other => Err(RepexError::Configuration(
                ErrorInfo::new("unknown-mixing-scheme", "unsupported replica mixing scheme")
                    .with_context("scheme", other)
                    .with_hint("expected one of swap-all, swap-neighbors, none"),
            )),
        }
    }
}
