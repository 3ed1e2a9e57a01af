//! Contract required from the physics engine and coordinate validation.

use crate::errors::{ErrorInfo, RepexError};
use crate::rng::RngHandle;
use crate::sampler::{SamplerState, Vec3};
use crate::thermo::ThermodynamicState;

/// Integrator settings for one propagation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsParams {
    /// Number of integration steps.
    pub n_steps: usize,
    /// Timestep in fs.
    pub timestep: f64,
    /// Langevin collision rate in 1/ps.
    pub collision_rate: f64,
}

/// Physics collaborator that propagates dynamics and evaluates energies.
///
/// Implementations must be deterministic given the supplied RNG handle. Errors
/// are reported as [`RepexError::Physics`] and are never retried by the engine.
pub trait Physics: Send + Sync {
    /// Advances `sampler` under the Hamiltonian and temperature of `state`,
    /// returning the updated state with cached energies filled in.
    fn propagate(
        &self,
        sampler: &SamplerState,
        state: &ThermodynamicState,
        dynamics: &DynamicsParams,
        rng: &mut RngHandle,
    ) -> Result<SamplerState, RepexError>;

    /// Raw potential energy (kJ/mol) of `sampler` under the Hamiltonian of `state`.
    fn potential_energy(
        &self,
        sampler: &SamplerState,
        state: &ThermodynamicState,
    ) -> Result<f64, RepexError>;

    /// Local energy minimization; the default leaves the configuration untouched.
    fn minimize(
        &self,
        sampler: &SamplerState,
        _state: &ThermodynamicState,
    ) -> Result<SamplerState, RepexError> {
        Ok(sampler.clone())
    }
}

/// Evaluates the reduced potential of `sampler` at `state`.
pub fn reduced_potential(
    physics: &dyn Physics,
    sampler: &SamplerState,
    state: &ThermodynamicState,
) -> Result<f64, RepexError> {
    let energy = physics.potential_energy(sampler, state)?;
    Ok(state.reduced_potential(energy, sampler.volume()))
}

/// Checks that there is one coordinate set per state, that each set matches
/// the atom count of its state and that every coordinate is finite.
pub fn validate_coordinates(
    coordinates: Vec<Vec<Vec3>>,
    states: &[ThermodynamicState],
) -> Result<Vec<Vec<Vec3>>, RepexError> {
    if coordinates.len() != states.len() {
        return Err(RepexError::Configuration(
            ErrorInfo::new(
                "state-count-mismatch",
                "number of coordinate sets must equal number of states",
            )
            .with_context("coordinates", coordinates.len())
            .with_context("states", states.len()),
        ));
    }
    for (index, (coords, state)) in coordinates.iter().zip(states).enumerate() {
        if coords.len() != state.n_atoms() {
            return Err(RepexError::Configuration(
                ErrorInfo::new("atom-count-mismatch", "coordinate set has wrong atom count")
                    .with_context("replica", index)
                    .with_context("expected", state.n_atoms())
                    .with_context("found", coords.len()),
            ));
        }
        if coords.iter().flatten().any(|value| !value.is_finite()) {
            return Err(RepexError::Configuration(
                ErrorInfo::new("non-finite-coordinates", "coordinates must be finite")
                    .with_context("replica", index),
            ));
        }
    }
    Ok(coordinates)
}

/// Expands `sets` round-robin to `n_replicas` coordinate sets.
pub fn round_robin_coordinates(
    sets: &[Vec<Vec3>],
    n_replicas: usize,
) -> Result<Vec<Vec<Vec3>>, RepexError> {
    if sets.is_empty() {
        return Err(RepexError::configuration(
            "empty-coordinates",
            "at least one coordinate set is required",
        ));
    }
    Ok((0..n_replicas)
        .map(|replica| sets[replica % sets.len()].clone())
        .collect())
}
