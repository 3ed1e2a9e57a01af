//! Reference physics: independent atoms in analytic external potentials,
//! integrated with BAOAB Langevin dynamics. Used by tests and benches.

use crate::errors::{ErrorInfo, RepexError};
use crate::physics::{DynamicsParams, Physics};
use crate::rng::RngHandle;
use crate::sampler::{SamplerState, Vec3};
use crate::thermo::{ForceTerm, SystemDefinition, ThermodynamicState};
use crate::units::{BOLTZMANN_KJ_PER_MOL_K, FS_PER_PS};

/// Term kind for `U = k/2 |r - r0|^2` per atom (`k`, `x0`, `y0`, `z0`).
pub const HARMONIC_RESTRAINT: &str = "harmonic-restraint";
/// Term kind for `U = g . r` per atom (`gx`, `gy`, `gz`).
pub const UNIFORM_FIELD: &str = "uniform-field";

const DEFAULT_MASS: f64 = 12.0;

/// Harmonic restraint term with spring constant `k` (kJ/mol/nm^2) centred at the origin.
pub fn harmonic_restraint(k: f64) -> ForceTerm {
    ForceTerm::new(HARMONIC_RESTRAINT).with("k", k)
}

/// Uniform external field term.
pub fn uniform_field(g: Vec3) -> ForceTerm {
    ForceTerm::new(UNIFORM_FIELD)
        .with("gx", g[0])
        .with("gy", g[1])
        .with("gz", g[2])
}

/// Analytic physics collaborator for [`SystemDefinition`]s built from
/// [`HARMONIC_RESTRAINT`] and [`UNIFORM_FIELD`] terms.
#[derive(Debug, Clone, Default)]
pub struct ReferencePhysics;

impl ReferencePhysics {
    /// Creates the reference physics.
    pub fn new() -> Self {
        Self
    }

    fn energy_and_forces(
        &self,
        system: &SystemDefinition,
        positions: &[Vec3],
    ) -> Result<(f64, Vec<Vec3>), RepexError> {
        let mut energy = 0.0;
        let mut forces = vec![[0.0; 3]; positions.len()];
        for term in &system.terms {
            match term.kind.as_str() {
                HARMONIC_RESTRAINT => {
                    let k = term.parameter("k").unwrap_or(0.0);
                    let center = [
                        term.parameter("x0").unwrap_or(0.0),
                        term.parameter("y0").unwrap_or(0.0),
                        term.parameter("z0").unwrap_or(0.0),
                    ];
                    for (position, force) in positions.iter().zip(forces.iter_mut()) {
                        for axis in 0..3 {
                            let displacement = position[axis] - center[axis];
                            energy += 0.5 * k * displacement * displacement;
                            force[axis] -= k * displacement;
                        }
                    }
                }
                UNIFORM_FIELD => {
                    let g = [
                        term.parameter("gx").unwrap_or(0.0),
                        term.parameter("gy").unwrap_or(0.0),
                        term.parameter("gz").unwrap_or(0.0),
                    ];
                    for (position, force) in positions.iter().zip(forces.iter_mut()) {
                        for axis in 0..3 {
                            energy += g[axis] * position[axis];
                            force[axis] -= g[axis];
                        }
                    }
                }
                other => {
                    return Err(RepexError::Physics(
                        ErrorInfo::new("unsupported-term", "reference physics cannot evaluate term")
                            .with_context("kind", other)
                            .with_context("system", &system.name),
                    ))
                }
            }
        }
        if !energy.is_finite() {
            return Err(RepexError::Physics(
                ErrorInfo::new("non-finite-energy", "potential energy is not finite")
                    .with_context("system", &system.name),
            ));
        }
        Ok((energy, forces))
    }

    fn masses(&self, system: &SystemDefinition, n_atoms: usize) -> Result<Vec<f64>, RepexError> {
        if system.masses.is_empty() {
            return Ok(vec![DEFAULT_MASS; n_atoms]);
        }
        if system.masses.len() != n_atoms || system.masses.iter().any(|mass| *mass <= 0.0) {
            return Err(RepexError::Physics(
                ErrorInfo::new("invalid-masses", "masses must be positive, one per atom")
                    .with_context("system", &system.name)
                    .with_context("atoms", n_atoms),
            ));
        }
        Ok(system.masses.clone())
    }
}

impl Physics for ReferencePhysics {
    fn propagate(
        &self,
        sampler: &SamplerState,
        state: &ThermodynamicState,
        dynamics: &DynamicsParams,
        rng: &mut RngHandle,
    ) -> Result<SamplerState, RepexError> {
        let system = state.system();
        let n_atoms = sampler.n_atoms();
        let masses = self.masses(system, n_atoms)?;
        let kt = BOLTZMANN_KJ_PER_MOL_K * state.temperature();
        let dt = dynamics.timestep / FS_PER_PS;
        let c1 = (-dynamics.collision_rate * dt).exp();
        let c2 = (1.0 - c1 * c1).max(0.0).sqrt();

        let mut positions = sampler.positions.clone();
        let mut velocities = match &sampler.velocities {
            Some(velocities) if velocities.len() == n_atoms => velocities.clone(),
            _ => masses
                .iter()
                .map(|mass| {
                    let sigma = (kt / mass).sqrt();
                    [
                        sigma * rng.standard_normal(),
                        sigma * rng.standard_normal(),
                        sigma * rng.standard_normal(),
                    ]
                })
                .collect(),
        };

        let (_, mut forces) = self.energy_and_forces(system, &positions)?;
        for _ in 0..dynamics.n_steps {
            for atom in 0..n_atoms {
                let sigma = (kt / masses[atom]).sqrt();
                for axis in 0..3 {
                    velocities[atom][axis] += 0.5 * dt * forces[atom][axis] / masses[atom];
                    positions[atom][axis] += 0.5 * dt * velocities[atom][axis];
                    velocities[atom][axis] =
                        c1 * velocities[atom][axis] + c2 * sigma * rng.standard_normal();
                    positions[atom][axis] += 0.5 * dt * velocities[atom][axis];
                }
            }
            forces = self.energy_and_forces(system, &positions)?.1;
            for atom in 0..n_atoms {
                for axis in 0..3 {
                    velocities[atom][axis] += 0.5 * dt * forces[atom][axis] / masses[atom];
                }
            }
        }

        let (potential, _) = self.energy_and_forces(system, &positions)?;
        let kinetic = velocities
            .iter()
            .zip(&masses)
            .map(|(velocity, mass)| 0.5 * mass * velocity.iter().map(|v| v * v).sum::<f64>())
            .sum();
        Ok(SamplerState {
            positions,
            velocities: Some(velocities),
            box_vectors: sampler.box_vectors,
            potential_energy: Some(potential),
            kinetic_energy: Some(kinetic),
        })
    }

    fn potential_energy(
        &self,
        sampler: &SamplerState,
        state: &ThermodynamicState,
    ) -> Result<f64, RepexError> {
        Ok(self
            .energy_and_forces(state.system(), &sampler.positions)?
            .0)
    }

    fn minimize(
        &self,
        sampler: &SamplerState,
        state: &ThermodynamicState,
    ) -> Result<SamplerState, RepexError> {
        // Steepest descent with a step that halves whenever energy goes up.
        let system = state.system();
        let mut positions = sampler.positions.clone();
        let (mut energy, mut forces) = self.energy_and_forces(system, &positions)?;
        let mut step = 1e-3;
        for _ in 0..200 {
            let trial: Vec<Vec3> = positions
                .iter()
                .zip(&forces)
                .map(|(p, f)| [p[0] + step * f[0], p[1] + step * f[1], p[2] + step * f[2]])
                .collect();
            let (trial_energy, trial_forces) = self.energy_and_forces(system, &trial)?;
            if trial_energy < energy {
                positions = trial;
                energy = trial_energy;
                forces = trial_forces;
                step *= 1.2;
            } else {
                step *= 0.5;
                if step < 1e-12 {
                    break;
                }
            }
        }
        Ok(SamplerState {
            positions,
            velocities: sampler.velocities.clone(),
            box_vectors: sampler.box_vectors,
            potential_energy: Some(energy),
            kinetic_energy: sampler.kinetic_energy,
        })
    }
}
