//! The replica-exchange control loop.
//!
//! One iteration is propagate, compute energies, mix, persist. The iteration
//! counter and the in-memory replica data advance only after the coordinator
//! reports that the record is durable, so a failed iteration leaves both the
//! engine and the store at the last completed iteration.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;
use repex_core::{
    validate_coordinates, ErrorInfo, Physics, RepexError, RngHandle, RunProvenance, SamplerState,
    ThermodynamicState,
};
use serde::{Deserialize, Serialize};

use crate::analysis::MixingStatistics;
use crate::checkpoint::{
    CheckpointStore, IterationRecord, IterationTimings, StateRecord, StaticPayload, SCHEMA_VERSION,
};
use crate::config::RunOptions;
use crate::consistency::ExchangeVariant;
use crate::determinism;
use crate::distribution::{Communicator, Directive, Partition, ReplicaUpdate, SingleProcess};
use crate::energy::{EnergyMatrix, EnergyMatrixComputer};
use crate::exchange::{ExchangeCounters, ExchangeProtocol};

/// Everything an engine talks to besides its own state.
pub struct Collaborators {
    /// Dynamics and energy evaluation.
    pub physics: Arc<dyn Physics>,
    /// Checkpoint target; written only by the coordinator.
    pub store: Box<dyn CheckpointStore>,
    /// Collectives between workers.
    pub communicator: Box<dyn Communicator>,
    /// Replica ownership policy; must agree across workers.
    pub partition: Partition,
}

impl Collaborators {
    /// Single-worker collaborators.
    pub fn local(physics: Arc<dyn Physics>, store: impl CheckpointStore + 'static) -> Self {
        Self {
            physics,
            store: Box::new(store),
            communicator: Box::new(SingleProcess),
            partition: Partition::default(),
        }
    }

    /// Replaces the communicator and partition policy.
    pub fn with_communicator(
        mut self,
        communicator: impl Communicator + 'static,
        partition: Partition,
    ) -> Self {
        self.communicator = Box::new(communicator);
        self.partition = partition;
        self
    }
}

/// Cloneable flag used to ask a running engine to stop between iterations.
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    /// Requests a stop before the next iteration starts.
    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clears a previous request.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Summary returned by [`ReplicaExchange::run`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Current iteration when the call started.
    pub first_iteration: usize,
    /// Current iteration when the call returned.
    pub last_iteration: usize,
    /// Iterations completed and persisted by the call.
    pub iterations_completed: usize,
    /// Whether the loop ended on a stop request.
    pub stopped: bool,
    /// Cumulative acceptance statistics.
    pub statistics: MixingStatistics,
}

struct Snapshot {
    samplers: Vec<SamplerState>,
    replica_states: Vec<usize>,
    energies: EnergyMatrix,
    counters: ExchangeCounters,
    iteration: usize,
}

/// Replica-exchange engine, one instance per worker.
pub struct ReplicaExchange {
    variant: ExchangeVariant,
    states: Vec<ThermodynamicState>,
    options: RunOptions,
    physics: Arc<dyn Physics>,
    energy: Box<dyn EnergyMatrixComputer>,
    protocol: ExchangeProtocol,
    store: Box<dyn CheckpointStore>,
    communicator: Box<dyn Communicator>,
    owned: Vec<usize>,
    pool: Option<rayon::ThreadPool>,
    samplers: Vec<SamplerState>,
    replica_states: Vec<usize>,
    energies: EnergyMatrix,
    counters: ExchangeCounters,
    iteration: usize,
    span: tracing::Span,
    stop: StopHandle,
}

fn equilibrate(
    physics: &dyn Physics,
    sampler: &SamplerState,
    assigned: &ThermodynamicState,
    options: &RunOptions,
    replica: usize,
) -> Result<SamplerState, RepexError> {
    let mut sampler = if options.minimize {
        physics.minimize(sampler, assigned)?
    } else {
        sampler.clone()
    };
    let dynamics = options.equilibration_dynamics();
    for round in 0..options.number_of_equilibration_iterations {
        let mut rng = RngHandle::from_seed(determinism::equilibration_seed(
            options.master_seed,
            round,
            replica,
        ));
        sampler = physics.propagate(&sampler, assigned, &dynamics, &mut rng)?;
    }
    Ok(sampler)
}

fn unexpected(directive: &Directive, expected: &str) -> RepexError {
    RepexError::Communication(
        ErrorInfo::new("unexpected-directive", "coordinator sent an unexpected directive")
            .with_context("expected", expected)
            .with_context("found", directive.name()),
    )
}

impl ReplicaExchange {
    /// Creates a new run: validates the inputs and persists the static
    /// payload plus iteration 0 (the given coordinates, their energies, the
    /// identity mapping and zero counters) before any dynamics. The optional
    /// minimization and equilibration run at the start of iteration 1.
    ///
    /// `initial` holds one sampler state per state; replica `i` starts at
    /// state `i`. Every worker of a distributed run calls this with the same
    /// arguments and its own communicator.
    pub fn create(
        variant: ExchangeVariant,
        mut states: Vec<ThermodynamicState>,
        initial: Vec<SamplerState>,
        options: RunOptions,
        collaborators: Collaborators,
    ) -> Result<Self, RepexError> {
        options.validate()?;
        validate_coordinates(
            initial.iter().map(|sampler| sampler.positions.clone()).collect(),
            &states,
        )?;
        variant.validate(&mut states)?;

        let n_states = states.len();
        let samplers = initial
            .into_iter()
            .map(|mut sampler| {
                sampler.potential_energy = None;
                sampler.kinetic_energy = None;
                sampler
            })
            .collect();
        let snapshot = Snapshot {
            samplers,
            replica_states: (0..n_states).collect(),
            energies: EnergyMatrix::zeros(n_states, n_states),
            counters: ExchangeCounters::zeros(n_states),
            iteration: 0,
        };
        let mut engine = Self::assemble(variant, states, options, collaborators, snapshot)?;
        engine.initialize()?;
        Ok(engine)
    }

    /// Rebuilds an engine from the static payload and the last complete
    /// iteration in `collaborators.store`. The loaded iteration becomes the
    /// current one; the next record written is `loaded + 1`.
    pub fn resume(collaborators: Collaborators) -> Result<Self, RepexError> {
        let loaded = Self::load(collaborators.store.as_ref());
        // Every worker must agree before any of them enters the loop.
        collaborators.communicator.all_gather(
            loaded
                .as_ref()
                .map(|_| Vec::new())
                .map_err(RepexError::clone),
        )?;
        let (variant, states, options, snapshot) = loaded?;
        let engine = Self::assemble(variant, states, options, collaborators, snapshot)?;
        {
            let _entered = engine.span.enter();
            tracing::info!(
                iteration = engine.iteration,
                total_proposed = engine.counters.total_proposed(),
                "resumed replica-exchange run"
            );
        }
        Ok(engine)
    }

    #[allow(clippy::type_complexity)]
    fn load(
        store: &dyn CheckpointStore,
    ) -> Result<(ExchangeVariant, Vec<ThermodynamicState>, RunOptions, Snapshot), RepexError> {
        let payload = store.load_static()?;
        if !SCHEMA_VERSION.can_read(&payload.schema) {
            return Err(RepexError::Resume(
                ErrorInfo::new("schema-mismatch", "stored schema cannot be read")
                    .with_context(
                        "stored",
                        format!(
                            "{}.{}.{}",
                            payload.schema.major, payload.schema.minor, payload.schema.patch
                        ),
                    )
                    .with_context(
                        "supported",
                        format!(
                            "{}.{}.{}",
                            SCHEMA_VERSION.major, SCHEMA_VERSION.minor, SCHEMA_VERSION.patch
                        ),
                    ),
            ));
        }
        let mut states = payload.thermodynamic_states()?;
        let options = RunOptions::from_record(&payload.options)?;
        payload.variant.validate(&mut states)?;

        let records = store.read_iterations()?;
        let Some(last) = records.last() else {
            return Err(RepexError::resume(
                "empty-store",
                "store holds no iterations",
            ));
        };
        let n_states = states.len();
        let mut counters = ExchangeCounters::zeros(n_states);
        for record in &records {
            record.check_shape(n_states, n_states)?;
            counters.accumulate(&record.counters);
        }
        let snapshot = Snapshot {
            samplers: last.sampler_states(),
            replica_states: last.states.clone(),
            energies: last.energies.clone(),
            counters,
            iteration: last.iteration,
        };
        Ok((payload.variant, states, options, snapshot))
    }

    fn assemble(
        variant: ExchangeVariant,
        states: Vec<ThermodynamicState>,
        options: RunOptions,
        collaborators: Collaborators,
        snapshot: Snapshot,
    ) -> Result<Self, RepexError> {
        let Collaborators {
            physics,
            store,
            communicator,
            partition,
        } = collaborators;
        let n_replicas = snapshot.samplers.len();
        let owned = partition.owned(communicator.rank(), communicator.size(), n_replicas);
        let pool = if options.propagation_threads > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(options.propagation_threads)
                    .build()
                    .map_err(|err| {
                        RepexError::Configuration(
                            ErrorInfo::new("thread-pool", err.to_string())
                                .with_context("threads", options.propagation_threads),
                        )
                    })?,
            )
        } else {
            None
        };
        let span = tracing::info_span!(
            "repex",
            variant = variant.as_str(),
            replicas = n_replicas,
            rank = communicator.rank()
        );
        Ok(Self {
            variant,
            energy: variant.energy_computer(),
            protocol: ExchangeProtocol::new(options.replica_mixing_scheme),
            states,
            options,
            physics,
            store,
            communicator,
            owned,
            pool,
            samplers: snapshot.samplers,
            replica_states: snapshot.replica_states,
            energies: snapshot.energies,
            counters: snapshot.counters,
            iteration: snapshot.iteration,
            span,
            stop: StopHandle::default(),
        })
    }

    fn initialize(&mut self) -> Result<(), RepexError> {
        let span = self.span.clone();
        let _entered = span.enter();
        tracing::info!(
            title = %self.options.title,
            minimize = self.options.minimize,
            equilibration_rounds = self.options.number_of_equilibration_iterations,
            energy = self.energy.name(),
            "creating replica-exchange run"
        );
        let local = if self.communicator.is_coordinator() {
            self.ensure_store_empty().and_then(|_| self.initial_energies())
        } else {
            self.initial_energies()
        };
        let updates = self.communicator.all_gather(local)?;
        let (samplers, energies, propagate_seconds) = self.collect_updates(updates)?;

        let commit = if self.communicator.is_coordinator() {
            let record = IterationRecord::capture(
                0,
                &samplers,
                self.replica_states.clone(),
                energies.clone(),
                ExchangeCounters::zeros(self.states.len()),
                IterationTimings {
                    propagate_seconds,
                    ..IterationTimings::default()
                },
            );
            Some(match self.persist_initial(&record) {
                Ok(()) => Directive::Committed { iteration: 0 },
                Err(err) => Directive::Abort(err),
            })
        } else {
            None
        };
        match self.communicator.broadcast(commit)? {
            Directive::Committed { iteration: 0 } => {}
            Directive::Abort(err) => return Err(err),
            other => return Err(unexpected(&other, "committed")),
        }
        self.samplers = samplers;
        self.energies = energies;
        tracing::info!("iteration 0 written");
        Ok(())
    }

    /// A target counts as empty until iteration 0 is durable. A static
    /// payload left by a create that failed before that point is replaced.
    fn ensure_store_empty(&self) -> Result<(), RepexError> {
        if !self.store.read_iterations()?.is_empty() {
            return Err(RepexError::Configuration(
                ErrorInfo::new("store-not-empty", "checkpoint target already holds a run")
                    .with_hint("use ReplicaExchange::resume to continue it"),
            ));
        }
        if self.store.has_static()? {
            tracing::warn!("replacing static payload of a run that never wrote iteration 0");
        }
        Ok(())
    }

    fn persist_initial(&mut self, record: &IterationRecord) -> Result<(), RepexError> {
        let states = self
            .states
            .iter()
            .map(StateRecord::from_state)
            .collect::<Result<Vec<_>, _>>()?;
        let payload = StaticPayload {
            schema: SCHEMA_VERSION,
            provenance: RunProvenance {
                title: self.options.title.clone(),
                seed: self.options.master_seed,
                created_at: record.timestamp.clone(),
                tool_versions: BTreeMap::from([(
                    env!("CARGO_PKG_NAME").to_string(),
                    env!("CARGO_PKG_VERSION").to_string(),
                )]),
            },
            variant: self.variant,
            states,
            options: self.options.to_record()?,
        };
        self.store.store_static(&payload)?;
        self.store.write(record)
    }

    fn run_owned<F>(&self, work: F) -> Result<Vec<ReplicaUpdate>, RepexError>
    where
        F: Fn(usize) -> Result<ReplicaUpdate, RepexError> + Sync + Send,
    {
        let owned = &self.owned;
        let task = |replica: &usize| {
            work(*replica).map_err(|err| err.with_context("replica", *replica))
        };
        match &self.pool {
            Some(pool) => pool.install(|| owned.par_iter().map(task).collect()),
            None => owned.iter().map(task).collect(),
        }
    }

    fn initial_energies(&self) -> Result<Vec<ReplicaUpdate>, RepexError> {
        let physics = self.physics.as_ref();
        let energy = self.energy.as_ref();
        let states = &self.states;
        let samplers = &self.samplers;
        let replica_states = &self.replica_states;
        self.run_owned(|replica| {
            let assigned = &states[replica_states[replica]];
            let sampler = samplers[replica].clone();
            let energies = energy.compute_row(physics, &sampler, assigned, states)?;
            Ok(ReplicaUpdate {
                replica,
                sampler,
                energies,
                propagate_seconds: 0.0,
            })
        })
    }

    /// Iteration 1 first applies minimization and equilibration, so a run
    /// resumed from iteration 0 repeats them with the same seeds.
    fn propagate_owned(&self, iteration: usize) -> Result<Vec<ReplicaUpdate>, RepexError> {
        let physics = self.physics.as_ref();
        let energy = self.energy.as_ref();
        let states = &self.states;
        let samplers = &self.samplers;
        let replica_states = &self.replica_states;
        let options = &self.options;
        let seed = options.master_seed;
        let dynamics = options.production_dynamics();
        let pre_production = iteration == 1;
        self.run_owned(|replica| {
            let assigned = &states[replica_states[replica]];
            let started = Instant::now();
            let prepared = if pre_production {
                Some(equilibrate(physics, &samplers[replica], assigned, options, replica)?)
            } else {
                None
            };
            let start = prepared.as_ref().unwrap_or(&samplers[replica]);
            let mut rng =
                RngHandle::from_seed(determinism::propagation_seed(seed, iteration, replica));
            let sampler = physics.propagate(start, assigned, &dynamics, &mut rng)?;
            let propagate_seconds = started.elapsed().as_secs_f64();
            let energies = energy.compute_row(physics, &sampler, assigned, states)?;
            Ok(ReplicaUpdate {
                replica,
                sampler,
                energies,
                propagate_seconds,
            })
        })
    }

    fn collect_updates(
        &self,
        updates: Vec<ReplicaUpdate>,
    ) -> Result<(Vec<SamplerState>, EnergyMatrix, Vec<f64>), RepexError> {
        let n_replicas = self.samplers.len();
        let mut samplers: Vec<Option<SamplerState>> = vec![None; n_replicas];
        let mut energies = EnergyMatrix::zeros(n_replicas, self.states.len());
        let mut seconds = vec![0.0; n_replicas];
        for update in updates {
            let Some(slot) = samplers.get_mut(update.replica) else {
                return Err(RepexError::Communication(
                    ErrorInfo::new("unknown-replica", "gathered update for unknown replica")
                        .with_context("replica", update.replica),
                ));
            };
            if slot.is_some() {
                return Err(RepexError::Communication(
                    ErrorInfo::new("duplicate-replica", "replica updated by two workers")
                        .with_context("replica", update.replica),
                ));
            }
            energies.set_row(update.replica, &update.energies)?;
            seconds[update.replica] = update.propagate_seconds;
            *slot = Some(update.sampler);
        }
        let samplers = samplers
            .into_iter()
            .enumerate()
            .map(|(replica, sampler)| {
                sampler.ok_or_else(|| {
                    RepexError::Communication(
                        ErrorInfo::new("incomplete-gather", "no worker updated the replica")
                            .with_context("replica", replica),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((samplers, energies, seconds))
    }

    fn step(&mut self) -> Result<(), RepexError> {
        let next = self.iteration + 1;
        let coordinator = self.communicator.is_coordinator();
        let started = Instant::now();
        if next == 1 {
            tracing::info!(
                minimize = self.options.minimize,
                rounds = self.options.number_of_equilibration_iterations,
                "pre-production before iteration 1"
            );
        }

        let local = self.propagate_owned(next);
        let updates = self.communicator.all_gather(local)?;
        let (samplers, energies, propagate_seconds) = self.collect_updates(updates)?;
        tracing::debug!(
            iteration = next,
            seconds = started.elapsed().as_secs_f64(),
            "propagation and energies complete"
        );

        let mixing_started = Instant::now();
        let decision = coordinator.then(|| {
            let mut rng = RngHandle::from_seed(determinism::exchange_seed(
                self.options.master_seed,
                next,
            ));
            Directive::Mix(self.protocol.mix(&energies, &self.replica_states, &mut rng))
        });
        let outcome = match self.communicator.broadcast(decision)? {
            Directive::Mix(outcome) => outcome,
            Directive::Abort(err) => return Err(err),
            other => return Err(unexpected(&other, "mix")),
        };
        let mixing_seconds = mixing_started.elapsed().as_secs_f64();
        tracing::debug!(iteration = next, seconds = mixing_seconds, "mixing complete");

        let commit = if coordinator {
            let record = IterationRecord::capture(
                next,
                &samplers,
                outcome.replica_states.clone(),
                energies.clone(),
                outcome.delta.clone(),
                IterationTimings {
                    iteration_seconds: started.elapsed().as_secs_f64(),
                    mixing_seconds,
                    propagate_seconds,
                },
            );
            Some(match self.store.write(&record) {
                Ok(()) => Directive::Committed { iteration: next },
                Err(err) => Directive::Abort(err.with_context("iteration", next)),
            })
        } else {
            None
        };
        match self.communicator.broadcast(commit)? {
            Directive::Committed { iteration } if iteration == next => {}
            Directive::Abort(err) => {
                tracing::error!(iteration = next, error = %err, "iteration not persisted");
                return Err(err);
            }
            other => return Err(unexpected(&other, "committed")),
        }

        self.samplers = samplers;
        self.energies = energies;
        self.replica_states = outcome.replica_states;
        self.counters.accumulate(&outcome.delta);
        self.iteration = next;

        if coordinator && self.options.show_mixing_statistics {
            let statistics = MixingStatistics::from_counters(&self.counters);
            tracing::info!(
                iteration = next,
                acceptance = ?statistics.overall_acceptance(),
                "mixing statistics\n{}",
                statistics.render()
            );
        }
        Ok(())
    }

    /// Runs `n_iterations` iterations from the current one, stopping early
    /// when a stop is requested through [`ReplicaExchange::stop_handle`].
    pub fn run(&mut self, n_iterations: usize) -> Result<RunReport, RepexError> {
        let span = self.span.clone();
        let _entered = span.enter();
        let first = self.iteration;
        tracing::info!(from = first, requested = n_iterations, "running iterations");
        let mut stopped = false;
        for _ in 0..n_iterations {
            let request = self.communicator.is_coordinator().then(|| {
                if self.stop.is_stop_requested() {
                    Directive::Stop
                } else {
                    Directive::Proceed
                }
            });
            match self.communicator.broadcast(request)? {
                Directive::Proceed => {}
                Directive::Stop => {
                    stopped = true;
                    tracing::info!(iteration = self.iteration, "stop requested");
                    break;
                }
                other => return Err(unexpected(&other, "proceed")),
            }
            self.step()?;
        }
        tracing::info!(
            iteration = self.iteration,
            completed = self.iteration - first,
            "run finished"
        );
        Ok(RunReport {
            first_iteration: first,
            last_iteration: self.iteration,
            iterations_completed: self.iteration - first,
            stopped,
            statistics: MixingStatistics::from_counters(&self.counters),
        })
    }

    /// Same as [`ReplicaExchange::run`]; reads naturally on a resumed engine.
    pub fn extend(&mut self, n_iterations: usize) -> Result<RunReport, RepexError> {
        self.run(n_iterations)
    }

    /// Runs until the current iteration reaches `number_of_iterations`.
    pub fn run_to_completion(&mut self) -> Result<RunReport, RepexError> {
        let remaining = self
            .options
            .number_of_iterations
            .saturating_sub(self.iteration);
        self.run(remaining)
    }

    /// Handle that requests a stop between iterations.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Index of the last completed iteration.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    /// Exchange variant.
    pub fn variant(&self) -> ExchangeVariant {
        self.variant
    }

    /// Thermodynamic states in index order.
    pub fn states(&self) -> &[ThermodynamicState] {
        &self.states
    }

    /// Run options.
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Current replica to state mapping.
    pub fn replica_states(&self) -> &[usize] {
        &self.replica_states
    }

    /// Energy matrix of the last completed iteration.
    pub fn energies(&self) -> &EnergyMatrix {
        &self.energies
    }

    /// Cumulative exchange counters since iteration 0.
    pub fn counters(&self) -> &ExchangeCounters {
        &self.counters
    }

    /// Sampler states of the last completed iteration.
    pub fn sampler_states(&self) -> &[SamplerState] {
        &self.samplers
    }

    /// Replicas propagated by this worker.
    pub fn owned_replicas(&self) -> &[usize] {
        &self.owned
    }

    /// Rank of this worker.
    pub fn rank(&self) -> usize {
        self.communicator.rank()
    }

    /// Acceptance statistics from the cumulative counters.
    pub fn mixing_statistics(&self) -> MixingStatistics {
        MixingStatistics::from_counters(&self.counters)
    }
}
