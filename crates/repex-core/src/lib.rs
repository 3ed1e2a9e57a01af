#![deny(missing_docs)]
#![doc = "Core contracts and data types for the replica-exchange engine."]

pub mod errors;
pub mod physics;
pub mod provenance;
pub mod reference;
pub mod rng;
/// Per-replica mutable simulation state.
pub mod sampler;
pub mod thermo;
pub mod units;

pub use errors::{ErrorInfo, RepexError};
pub use physics::{reduced_potential, validate_coordinates, DynamicsParams, Physics};
pub use provenance::{RunProvenance, SchemaVersion};
pub use reference::ReferencePhysics;
pub use rng::{derive_substream_seed, RngHandle};
pub use sampler::{box_volume, BoxVectors, SamplerState, Vec3};
pub use thermo::{
    Barostat, BarostatNormalizer, Ensemble, ForceTerm, SystemDefinition, ThermodynamicState,
};
