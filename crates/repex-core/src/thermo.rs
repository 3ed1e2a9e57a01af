//! Thermodynamic states and the system definitions they reference.

use std::collections::BTreeMap;
use std::iter::FromIterator;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::errors::{ErrorInfo, RepexError};
use crate::units;

/// Sentinel barostat temperature used while comparing systems.
pub const BAROSTAT_SENTINEL_TEMPERATURE: f64 = 1.0;
/// Sentinel barostat seed used while comparing systems.
pub const BAROSTAT_SENTINEL_SEED: u32 = 1;

/// Statistical ensemble sampled by a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ensemble {
    /// Constant volume and temperature.
    Nvt,
    /// Constant pressure and temperature.
    Npt,
}

/// Opaque Hamiltonian term interpreted by the physics collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceTerm {
    /// Term family, e.g. `harmonic-restraint`.
    pub kind: String,
    /// Named scalar parameters of the term.
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

impl ForceTerm {
    /// Creates a term without parameters.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            parameters: BTreeMap::new(),
        }
    }

    /// Adds or replaces a parameter.
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Returns a parameter value.
    pub fn parameter(&self, key: &str) -> Option<f64> {
        self.parameters.get(key).copied()
    }
}

/// Monte Carlo barostat attached to a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barostat {
    /// Target pressure in bar.
    pub pressure: f64,
    /// Internal temperature used by the volume move acceptance.
    pub temperature: f64,
    /// Attempt frequency in steps.
    pub frequency: u32,
    /// Random number seed of the barostat.
    pub seed: u32,
}

/// Serializable description of a simulated system and its Hamiltonian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDefinition {
    /// Label of the system.
    pub name: String,
    /// Number of atoms.
    pub n_atoms: usize,
    /// Per-atom masses in amu. Empty means the physics default.
    #[serde(default)]
    pub masses: Vec<f64>,
    /// Hamiltonian terms.
    #[serde(default)]
    pub terms: Vec<ForceTerm>,
    /// Optional barostat.
    #[serde(default)]
    pub barostat: Option<Barostat>,
}

impl SystemDefinition {
    /// Creates an empty system with `n_atoms` atoms.
    pub fn new(name: impl Into<String>, n_atoms: usize) -> Self {
        Self {
            name: name.into(),
            n_atoms,
            masses: Vec::new(),
            terms: Vec::new(),
            barostat: None,
        }
    }

    /// Sets per-atom masses.
    pub fn with_masses(mut self, masses: Vec<f64>) -> Self {
        self.masses = masses;
        self
    }

    /// Appends a Hamiltonian term.
    pub fn with_term(mut self, term: ForceTerm) -> Self {
        self.terms.push(term);
        self
    }

    /// Attaches a barostat.
    pub fn with_barostat(mut self, barostat: Barostat) -> Self {
        self.barostat = Some(barostat);
        self
    }

    /// Serializes the system into JSON with deterministic key ordering.
    pub fn canonical_json(&self) -> Result<Vec<u8>, RepexError> {
        let value = serde_json::to_value(self).map_err(|err| {
            RepexError::Serde(
                ErrorInfo::new("system-serialize", err.to_string()).with_context("system", &self.name),
            )
        })?;
        serde_json::to_vec(&canonicalize(value)).map_err(|err| {
            RepexError::Serde(
                ErrorInfo::new("system-write", err.to_string()).with_context("system", &self.name),
            )
        })
    }

    /// SHA-256 fingerprint (hex) of the canonical serialization.
    pub fn fingerprint(&self) -> Result<String, RepexError> {
        let bytes = self.canonical_json()?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }

    /// Structural equality on the canonical serialization.
    pub fn structurally_equal(&self, other: &SystemDefinition) -> Result<bool, RepexError> {
        Ok(self.canonical_json()? == other.canonical_json()?)
    }
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let ordered = map
                .into_iter()
                .map(|(key, value)| (key, canonicalize(value)))
                .collect::<BTreeMap<_, _>>();
            Value::Object(Map::from_iter(ordered))
        }
        Value::Array(values) => Value::Array(values.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Immutable description of one ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StateFields")]
pub struct ThermodynamicState {
    system: SystemDefinition,
    temperature: f64,
    pressure: Option<f64>,
}

#[derive(Deserialize)]
struct StateFields {
    system: SystemDefinition,
    temperature: f64,
    pressure: Option<f64>,
}

impl TryFrom<StateFields> for ThermodynamicState {
    type Error = RepexError;

    fn try_from(fields: StateFields) -> Result<Self, Self::Error> {
        ThermodynamicState::new(fields.system, fields.temperature, fields.pressure)
    }
}

impl ThermodynamicState {
    /// Creates a state; temperature must be positive and pressure non-negative.
    pub fn new(
        system: SystemDefinition,
        temperature: f64,
        pressure: Option<f64>,
    ) -> Result<Self, RepexError> {
        if !(temperature.is_finite() && temperature > 0.0) {
            return Err(RepexError::Configuration(
                ErrorInfo::new("invalid-temperature", "temperature must be finite and positive")
                    .with_context("temperature", temperature),
            ));
        }
        if let Some(pressure) = pressure {
            if !(pressure.is_finite() && pressure >= 0.0) {
                return Err(RepexError::Configuration(
                    ErrorInfo::new("invalid-pressure", "pressure must be finite and non-negative")
                        .with_context("pressure", pressure),
                ));
            }
        }
        Ok(Self {
            system,
            temperature,
            pressure,
        })
    }

    /// Returns the referenced system definition.
    pub fn system(&self) -> &SystemDefinition {
        &self.system
    }

    /// Temperature in K.
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Pressure in bar, if the state is isobaric.
    pub fn pressure(&self) -> Option<f64> {
        self.pressure
    }

    /// Inverse temperature in mol/kJ.
    pub fn beta(&self) -> f64 {
        units::beta(self.temperature)
    }

    /// Ensemble class of the state.
    pub fn ensemble(&self) -> Ensemble {
        if self.pressure.is_some() {
            Ensemble::Npt
        } else {
            Ensemble::Nvt
        }
    }

    /// Number of atoms in the referenced system.
    pub fn n_atoms(&self) -> usize {
        self.system.n_atoms
    }

    /// Two states are compatible when atom counts and ensemble classes agree.
    pub fn is_compatible_with(&self, other: &ThermodynamicState) -> bool {
        self.n_atoms() == other.n_atoms() && self.ensemble() == other.ensemble()
    }

    /// Reduced potential `beta * (U + pV)` of a configuration with raw potential
    /// energy `potential_energy` (kJ/mol) and box volume `volume` (nm^3).
    pub fn reduced_potential(&self, potential_energy: f64, volume: Option<f64>) -> f64 {
        let mut enthalpy = potential_energy;
        if let (Some(pressure), Some(volume)) = (self.pressure, volume) {
            enthalpy += pressure * volume * units::BAR_NM3_TO_KJ_PER_MOL;
        }
        self.beta() * enthalpy
    }
}

/// Scoped normalization of barostat temperature and seed.
///
/// On construction every barostat's temperature and seed are snapshotted and
/// overwritten with sentinel values so systems can be compared structurally.
/// The original values are written back when the guard is dropped, which also
/// happens when the comparison returns early with an error or panics.
pub struct BarostatNormalizer<'a> {
    states: &'a mut [ThermodynamicState],
    saved: Vec<Option<(f64, u32)>>,
}

impl<'a> BarostatNormalizer<'a> {
    /// Normalizes all barostats of `states` until the guard is dropped.
    pub fn engage(states: &'a mut [ThermodynamicState]) -> Self {
        let saved = states
            .iter_mut()
            .map(|state| {
                state.system.barostat.as_mut().map(|barostat| {
                    let snapshot = (barostat.temperature, barostat.seed);
                    barostat.temperature = BAROSTAT_SENTINEL_TEMPERATURE;
                    barostat.seed = BAROSTAT_SENTINEL_SEED;
                    snapshot
                })
            })
            .collect();
        Self { states, saved }
    }

    /// Read access to the normalized states.
    pub fn states(&self) -> &[ThermodynamicState] {
        self.states
    }
}

impl Drop for BarostatNormalizer<'_> {
    fn drop(&mut self) {
        for (state, saved) in self.states.iter_mut().zip(self.saved.iter()) {
            if let (Some(barostat), Some((temperature, seed))) =
                (state.system.barostat.as_mut(), saved)
            {
                barostat.temperature = *temperature;
                barostat.seed = *seed;
            }
        }
    }
}
