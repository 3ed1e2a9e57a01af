//! Construction-time policies on the state set of a run.

use std::fmt;

use repex_core::{BarostatNormalizer, ErrorInfo, RepexError, ThermodynamicState};
use serde::{Deserialize, Serialize};

use crate::energy::{EnergyMatrixComputer, GenericEnergy, TemperatureLinearEnergy};

/// Exchange variant selected when a run is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExchangeVariant {
    /// Arbitrary compatible states, full `N x N` energy evaluation.
    Generic,
    /// Parallel tempering: one Hamiltonian, states differ in temperature only.
    TemperatureLinear,
    /// Hamiltonian exchange: one temperature and pressure, different systems.
    FixedTemperature,
}

impl ExchangeVariant {
    /// Stable name used in logs and the static payload.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeVariant::Generic => "generic",
            ExchangeVariant::TemperatureLinear => "temperature-linear",
            ExchangeVariant::FixedTemperature => "fixed-temperature",
        }
    }

    /// Energy-matrix computer matching the variant.
    pub fn energy_computer(&self) -> Box<dyn EnergyMatrixComputer> {
        match self {
            ExchangeVariant::TemperatureLinear => Box::new(TemperatureLinearEnergy),
            ExchangeVariant::Generic | ExchangeVariant::FixedTemperature => Box::new(GenericEnergy),
        }
    }

    /// Checks that `states` satisfy the invariants of the variant.
    ///
    /// Barostat fields may be rewritten during the check; they are restored
    /// before this returns, whether or not the check succeeds.
    pub fn validate(&self, states: &mut [ThermodynamicState]) -> Result<(), RepexError> {
        check_compatible(states)?;
        match self {
            ExchangeVariant::Generic => Ok(()),
            ExchangeVariant::FixedTemperature => check_fixed_temperature(states),
            ExchangeVariant::TemperatureLinear => check_temperature_linear(states),
        }
    }
}

impl fmt::Display for ExchangeVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Every state must share atom count and ensemble class with the first one.
pub fn check_compatible(states: &[ThermodynamicState]) -> Result<(), RepexError> {
    let Some(first) = states.first() else {
        return Err(RepexError::configuration(
            "empty-state-set",
            "at least one thermodynamic state is required",
        ));
    };
    for (index, state) in states.iter().enumerate().skip(1) {
        if !first.is_compatible_with(state) {
            return Err(RepexError::Configuration(
                ErrorInfo::new("incompatible-states", "states differ in atom count or ensemble")
                    .with_context("state", index)
                    .with_context("atoms", state.n_atoms())
                    .with_context("expected_atoms", first.n_atoms()),
            ));
        }
    }
    Ok(())
}

fn pressure_mismatch(index: usize, expected: Option<f64>, found: Option<f64>) -> RepexError {
    RepexError::Configuration(
        ErrorInfo::new("pressure-mismatch", "all states must share one pressure")
            .with_context("state", index)
            .with_context("expected", format!("{expected:?}"))
            .with_context("found", format!("{found:?}")),
    )
}

fn check_fixed_temperature(states: &[ThermodynamicState]) -> Result<(), RepexError> {
    let first = &states[0];
    for (index, state) in states.iter().enumerate().skip(1) {
        if state.temperature() != first.temperature() {
            return Err(RepexError::Configuration(
                ErrorInfo::new(
                    "temperature-mismatch",
                    "Hamiltonian exchange requires one temperature",
                )
                .with_context("state", index)
                .with_context("expected", first.temperature())
                .with_context("found", state.temperature()),
            ));
        }
        if state.pressure() != first.pressure() {
            return Err(pressure_mismatch(index, first.pressure(), state.pressure()));
        }
    }
    Ok(())
}

fn check_temperature_linear(states: &mut [ThermodynamicState]) -> Result<(), RepexError> {
    let pressure = states[0].pressure();
    for (index, state) in states.iter().enumerate().skip(1) {
        if state.pressure() != pressure {
            return Err(pressure_mismatch(index, pressure, state.pressure()));
        }
    }
    let normalized = BarostatNormalizer::engage(states);
    let states = normalized.states();
    for (index, state) in states.iter().enumerate().skip(1) {
        if !state.system().structurally_equal(states[0].system())? {
            return Err(RepexError::Configuration(
                ErrorInfo::new(
                    "system-mismatch",
                    "parallel tempering requires one system definition",
                )
                .with_context("state", index)
                .with_context("system", &state.system().name)
                .with_hint("use the generic or fixed-temperature variant"),
            ));
        }
    }
    Ok(())
}
