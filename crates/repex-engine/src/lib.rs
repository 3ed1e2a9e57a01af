#![deny(missing_docs)]

//! Replica-exchange engine: parallel tempering, Hamiltonian exchange and the
//! generic variant, with durable checkpoint/resume and optional distribution
//! of replicas across workers.

/// Mixing diagnostics from counters and state histories.
pub mod analysis;
/// Iteration records, static payloads and checkpoint stores.
pub mod checkpoint;
/// YAML run options and mixing scheme names.
pub mod config;
/// Variant selection and state-set consistency checks.
pub mod consistency;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Replica ownership and worker collectives.
pub mod distribution;
/// Energy matrices and the computers that fill them.
pub mod energy;
/// The engine and its public `create`/`resume`/`run` entry points.
pub mod engine;
/// Exchange acceptance and mixing schemes.
pub mod exchange;
/// Temperature ladders and state-set builders.
pub mod ladder;
/// Tagged option values for persistence.
pub mod options;

pub use analysis::{analyze_store, MixingReport, MixingStatistics};
pub use checkpoint::{
    CheckpointStore, DirectoryStore, IterationRecord, IterationTimings, MemoryStore, StateRecord,
    StaticPayload, SCHEMA_VERSION,
};
pub use config::{MixingScheme, RunOptions};
pub use consistency::ExchangeVariant;
pub use distribution::{
    thread_group, Communicator, Directive, Partition, ReplicaUpdate, SingleProcess,
    ThreadCommunicator,
};
pub use energy::{
    compute_matrix, EnergyMatrix, EnergyMatrixComputer, GenericEnergy, TemperatureLinearEnergy,
};
pub use engine::{Collaborators, ReplicaExchange, RunReport, StopHandle};
pub use exchange::{ExchangeCounters, ExchangeProtocol, MixingOutcome};
pub use ladder::{build_ladder, hamiltonian_states, parallel_tempering_states, LadderPolicy};
pub use options::{OptionValue, OptionsRecord};
