//! Temperature ladders and state-set builders for the common exchange variants.

use std::f64::consts::E;

use repex_core::{ErrorInfo, RepexError, SystemDefinition, ThermodynamicState};
use serde::{Deserialize, Serialize};

/// Supported ladder construction strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LadderPolicy {
    /// `T_i = T_min + (T_max - T_min) (e^{i/(n-1)} - 1) / (e - 1)`.
    Exponential {
        /// Coldest temperature in K.
        t_min: f64,
        /// Hottest temperature in K.
        t_max: f64,
        /// Number of temperatures.
        n_temps: usize,
    },
    /// Constant ratio between neighbouring temperatures.
    Geometric {
        /// Coldest temperature in K.
        t_min: f64,
        /// Hottest temperature in K.
        t_max: f64,
        /// Number of temperatures.
        n_temps: usize,
    },
    /// Explicit list of temperatures.
    Manual {
        /// Temperatures in K, coldest first by convention.
        temperatures: Vec<f64>,
    },
}

impl LadderPolicy {
    /// Picks a policy from optional inputs: an explicit list wins, otherwise
    /// the exponential spacing needs all of `t_min`, `t_max` and `n_temps`.
    pub fn from_parts(
        temperatures: Option<Vec<f64>>,
        t_min: Option<f64>,
        t_max: Option<f64>,
        n_temps: Option<usize>,
    ) -> Result<Self, RepexError> {
        if let Some(temperatures) = temperatures {
            return Ok(LadderPolicy::Manual { temperatures });
        }
        match (t_min, t_max, n_temps) {
            (Some(t_min), Some(t_max), Some(n_temps)) => Ok(LadderPolicy::Exponential {
                t_min,
                t_max,
                n_temps,
            }),
            _ => Err(RepexError::Configuration(
                ErrorInfo::new(
                    "missing-ladder-input",
                    "either temperatures or t_min, t_max and n_temps must be provided",
                )
                .with_context("t_min", format!("{t_min:?}"))
                .with_context("t_max", format!("{t_max:?}"))
                .with_context("n_temps", format!("{n_temps:?}")),
            )),
        }
    }
}

fn check_range(t_min: f64, t_max: f64, n_temps: usize) -> Result<(), RepexError> {
    if n_temps == 0 {
        return Err(RepexError::configuration(
            "empty-ladder",
            "ladder needs at least one temperature",
        ));
    }
    if !(t_min.is_finite() && t_max.is_finite() && t_min > 0.0 && t_max >= t_min) {
        return Err(RepexError::Configuration(
            ErrorInfo::new("invalid-ladder-range", "need 0 < t_min <= t_max")
                .with_context("t_min", t_min)
                .with_context("t_max", t_max),
        ));
    }
    Ok(())
}

/// Builds the temperature ladder described by `policy`.
pub fn build_ladder(policy: &LadderPolicy) -> Result<Vec<f64>, RepexError> {
    match policy {
        LadderPolicy::Exponential {
            t_min,
            t_max,
            n_temps,
        } => {
            check_range(*t_min, *t_max, *n_temps)?;
            if *n_temps == 1 {
                return Ok(vec![*t_min]);
            }
            let span = t_max - t_min;
            let last = (*n_temps - 1) as f64;
            Ok((0..*n_temps)
                .map(|i| t_min + span * (((i as f64) / last).exp() - 1.0) / (E - 1.0))
                .collect())
        }
        LadderPolicy::Geometric {
            t_min,
            t_max,
            n_temps,
        } => {
            check_range(*t_min, *t_max, *n_temps)?;
            if *n_temps == 1 {
                return Ok(vec![*t_min]);
            }
            let ratio = (t_max / t_min).powf(1.0 / (*n_temps - 1) as f64);
            Ok((0..*n_temps)
                .map(|i| t_min * ratio.powi(i as i32))
                .collect())
        }
        LadderPolicy::Manual { temperatures } => {
            if temperatures.is_empty() {
                return Err(RepexError::configuration(
                    "empty-ladder",
                    "ladder needs at least one temperature",
                ));
            }
            Ok(temperatures.clone())
        }
    }
}

/// One state per ladder temperature, all sharing `system` and `pressure`.
///
/// A barostat on `system` gets its internal temperature set to the state's.
pub fn parallel_tempering_states(
    system: &SystemDefinition,
    policy: &LadderPolicy,
    pressure: Option<f64>,
) -> Result<Vec<ThermodynamicState>, RepexError> {
    build_ladder(policy)?
        .into_iter()
        .map(|temperature| {
            let mut system = system.clone();
            if let Some(barostat) = system.barostat.as_mut() {
                barostat.temperature = temperature;
            }
            ThermodynamicState::new(system, temperature, pressure)
        })
        .collect()
}

/// One state per system, all at the temperature and pressure of `reference`.
pub fn hamiltonian_states(
    reference: &ThermodynamicState,
    systems: Vec<SystemDefinition>,
) -> Result<Vec<ThermodynamicState>, RepexError> {
    if systems.is_empty() {
        return Err(RepexError::configuration(
            "empty-state-set",
            "at least one system is required",
        ));
    }
    systems
        .into_iter()
        .map(|system| {
            ThermodynamicState::new(system, reference.temperature(), reference.pressure())
        })
        .collect()
}
