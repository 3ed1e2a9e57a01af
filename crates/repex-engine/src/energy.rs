//! Reduced-potential matrices and the strategies that fill them.

use repex_core::{reduced_potential, ErrorInfo, Physics, RepexError, SamplerState, ThermodynamicState};
use serde::{Deserialize, Serialize};

/// Row-major matrix `u[replica, state]` of reduced potentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct EnergyMatrix {
    n_replicas: usize,
    n_states: usize,
    values: Vec<f64>,
}

impl EnergyMatrix {
    /// All-zero matrix.
    pub fn zeros(n_replicas: usize, n_states: usize) -> Self {
        Self {
            n_replicas,
            n_states,
            values: vec![0.0; n_replicas * n_states],
        }
    }

    /// Builds a matrix from one row per replica; rows must have equal length.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, RepexError> {
        let n_replicas = rows.len();
        let n_states = rows.first().map_or(0, Vec::len);
        let mut values = Vec::with_capacity(n_replicas * n_states);
        for (replica, row) in rows.into_iter().enumerate() {
            if row.len() != n_states {
                return Err(RepexError::Serde(
                    ErrorInfo::new("ragged-energy-matrix", "energy rows differ in length")
                        .with_context("replica", replica)
                        .with_context("expected", n_states)
                        .with_context("found", row.len()),
                ));
            }
            values.extend(row);
        }
        Ok(Self {
            n_replicas,
            n_states,
            values,
        })
    }

    /// Number of rows.
    pub fn n_replicas(&self) -> usize {
        self.n_replicas
    }

    /// Number of columns.
    pub fn n_states(&self) -> usize {
        self.n_states
    }

    /// Reduced potential of `replica` evaluated at `state`.
    pub fn get(&self, replica: usize, state: usize) -> f64 {
        self.values[replica * self.n_states + state]
    }

    /// Row of `replica`.
    pub fn row(&self, replica: usize) -> &[f64] {
        let start = replica * self.n_states;
        &self.values[start..start + self.n_states]
    }

    /// Overwrites the row of `replica`.
    pub fn set_row(&mut self, replica: usize, row: &[f64]) -> Result<(), RepexError> {
        if replica >= self.n_replicas || row.len() != self.n_states {
            return Err(RepexError::Communication(
                ErrorInfo::new("energy-row-shape", "energy row does not fit the matrix")
                    .with_context("replica", replica)
                    .with_context("row_len", row.len())
                    .with_context("n_states", self.n_states),
            ));
        }
        let start = replica * self.n_states;
        self.values[start..start + self.n_states].copy_from_slice(row);
        Ok(())
    }

    /// Copies the matrix out as one row per replica.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.n_replicas).map(|replica| self.row(replica).to_vec()).collect()
    }

    /// Largest relative difference between two matrices of equal shape.
    pub fn max_relative_difference(&self, other: &EnergyMatrix) -> Option<f64> {
        if self.n_replicas != other.n_replicas || self.n_states != other.n_states {
            return None;
        }
        Some(
            self.values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| (a - b).abs() / a.abs().max(b.abs()).max(f64::MIN_POSITIVE))
                .fold(0.0, f64::max),
        )
    }
}

impl TryFrom<Vec<Vec<f64>>> for EnergyMatrix {
    type Error = RepexError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        EnergyMatrix::from_rows(rows)
    }
}

impl From<EnergyMatrix> for Vec<Vec<f64>> {
    fn from(matrix: EnergyMatrix) -> Self {
        matrix.to_rows()
    }
}

/// Strategy computing one replica's row of the energy matrix.
///
/// Rows are independent, which lets the distribution layer compute each on
/// the worker owning the replica.
pub trait EnergyMatrixComputer: Send + Sync {
    /// Stable name for logs.
    fn name(&self) -> &'static str;

    /// Reduced potential of `sampler` at every state in `states`. `assigned`
    /// is the state the replica is currently sampling.
    fn compute_row(
        &self,
        physics: &dyn Physics,
        sampler: &SamplerState,
        assigned: &ThermodynamicState,
        states: &[ThermodynamicState],
    ) -> Result<Vec<f64>, RepexError>;
}

/// One physics evaluation per `(replica, state)` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericEnergy;

impl EnergyMatrixComputer for GenericEnergy {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn compute_row(
        &self,
        physics: &dyn Physics,
        sampler: &SamplerState,
        _assigned: &ThermodynamicState,
        states: &[ThermodynamicState],
    ) -> Result<Vec<f64>, RepexError> {
        states
            .iter()
            .map(|state| reduced_potential(physics, sampler, state))
            .collect()
    }
}

/// One physics evaluation per replica; `u[i, k] = beta_k (U_i + p V_i)`.
///
/// Only valid when every state shares one Hamiltonian and pressure.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemperatureLinearEnergy;

impl EnergyMatrixComputer for TemperatureLinearEnergy {
    fn name(&self) -> &'static str {
        "temperature-linear"
    }

    fn compute_row(
        &self,
        physics: &dyn Physics,
        sampler: &SamplerState,
        assigned: &ThermodynamicState,
        states: &[ThermodynamicState],
    ) -> Result<Vec<f64>, RepexError> {
        let potential = match sampler.potential_energy {
            Some(energy) => energy,
            None => physics.potential_energy(sampler, assigned)?,
        };
        let volume = sampler.volume();
        Ok(states
            .iter()
            .map(|state| state.reduced_potential(potential, volume))
            .collect())
    }
}

/// Fills a full matrix for `samplers`, replica `i` assigned to
/// `replica_states[i]`. Used for single-worker checks and benches.
pub fn compute_matrix(
    computer: &dyn EnergyMatrixComputer,
    physics: &dyn Physics,
    samplers: &[SamplerState],
    replica_states: &[usize],
    states: &[ThermodynamicState],
) -> Result<EnergyMatrix, RepexError> {
    let mut matrix = EnergyMatrix::zeros(samplers.len(), states.len());
    for (replica, (sampler, &assigned)) in samplers.iter().zip(replica_states).enumerate() {
        let row = computer
            .compute_row(physics, sampler, &states[assigned], states)
            .map_err(|err| err.with_context("replica", replica))?;
        matrix.set_row(replica, &row)?;
    }
    Ok(matrix)
}
