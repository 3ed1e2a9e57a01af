//! Partitioning of replicas across workers and the collectives they share.

use std::sync::{Arc, Barrier, Mutex};

use repex_core::{ErrorInfo, RepexError, SamplerState};
use serde::{Deserialize, Serialize};

use crate::exchange::MixingOutcome;

/// Rank of the worker that mixes and persists.
pub const COORDINATOR: usize = 0;

/// Assignment of replica indices to workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Partition {
    /// Replica `i` belongs to worker `i % size`.
    #[default]
    RoundRobin,
    /// Consecutive blocks of `ceil(n / size)` replicas.
    Contiguous,
}

impl Partition {
    /// Whether `rank` of `size` workers owns `replica` out of `n_replicas`.
    pub fn owns(&self, rank: usize, size: usize, replica: usize, n_replicas: usize) -> bool {
        let size = size.max(1);
        match self {
            Partition::RoundRobin => replica % size == rank,
            Partition::Contiguous => {
                let block = n_replicas.div_ceil(size).max(1);
                replica / block == rank
            }
        }
    }

    /// Replicas owned by `rank`, ascending.
    pub fn owned(&self, rank: usize, size: usize, n_replicas: usize) -> Vec<usize> {
        (0..n_replicas)
            .filter(|&replica| self.owns(rank, size, replica, n_replicas))
            .collect()
    }
}

/// Result of the local work on one owned replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaUpdate {
    /// Replica index.
    pub replica: usize,
    /// Sampler state after the local phase.
    pub sampler: SamplerState,
    /// Energy-matrix row of the replica.
    pub energies: Vec<f64>,
    /// Wall-clock seconds spent propagating.
    pub propagate_seconds: f64,
}

/// Message broadcast by the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Run the next iteration.
    Proceed,
    /// Stop before the next iteration.
    Stop,
    /// New mapping and counter deltas for the current iteration.
    Mix(MixingOutcome),
    /// The record of `iteration` is durable.
    Committed {
        /// Iteration that was persisted.
        iteration: usize,
    },
    /// The iteration failed on the coordinator.
    Abort(RepexError),
}

impl Directive {
    /// Short name for error context.
    pub fn name(&self) -> &'static str {
        match self {
            Directive::Proceed => "proceed",
            Directive::Stop => "stop",
            Directive::Mix(_) => "mix",
            Directive::Committed { .. } => "committed",
            Directive::Abort(_) => "abort",
        }
    }
}

/// Collective operations between the workers of one run.
///
/// Every worker must call the same collectives in the same order.
pub trait Communicator: Send {
    /// Rank of this worker.
    fn rank(&self) -> usize;

    /// Number of workers.
    fn size(&self) -> usize;

    /// Whether this worker mixes and persists.
    fn is_coordinator(&self) -> bool {
        self.rank() == COORDINATOR
    }

    /// Combines every worker's contribution. If any worker contributed an
    /// error, every worker receives the error of the lowest failing rank.
    fn all_gather(
        &self,
        local: Result<Vec<ReplicaUpdate>, RepexError>,
    ) -> Result<Vec<ReplicaUpdate>, RepexError>;

    /// Delivers the coordinator's directive to every worker. Only the
    /// coordinator's argument is used.
    fn broadcast(&self, directive: Option<Directive>) -> Result<Directive, RepexError>;
}

fn missing_directive() -> RepexError {
    RepexError::communication("missing-directive", "coordinator broadcast without a directive")
}

/// Degenerate communicator for a single worker.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleProcess;

impl Communicator for SingleProcess {
    fn rank(&self) -> usize {
        COORDINATOR
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(
        &self,
        local: Result<Vec<ReplicaUpdate>, RepexError>,
    ) -> Result<Vec<ReplicaUpdate>, RepexError> {
        local
    }

    fn broadcast(&self, directive: Option<Directive>) -> Result<Directive, RepexError> {
        directive.ok_or_else(missing_directive)
    }
}

type Contribution = Option<Result<Vec<ReplicaUpdate>, RepexError>>;

struct Shared {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Contribution>>,
    directive: Mutex<Option<Directive>>,
}

/// In-process worker connected to its peers through shared memory.
///
/// Each collective is two barrier phases: publish, then read. A worker only
/// overwrites its own slot, so no slot is cleared between collectives.
pub struct ThreadCommunicator {
    rank: usize,
    shared: Arc<Shared>,
}

/// Creates `size` connected communicators, one per worker thread.
pub fn thread_group(size: usize) -> Vec<ThreadCommunicator> {
    let size = size.max(1);
    let shared = Arc::new(Shared {
        size,
        barrier: Barrier::new(size),
        slots: Mutex::new(vec![None; size]),
        directive: Mutex::new(None),
    });
    (0..size)
        .map(|rank| ThreadCommunicator {
            rank,
            shared: Arc::clone(&shared),
        })
        .collect()
}

fn poisoned(rank: usize) -> RepexError {
    RepexError::Communication(
        ErrorInfo::new("poisoned", "a peer panicked while holding shared state")
            .with_context("rank", rank),
    )
}

impl Communicator for ThreadCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn all_gather(
        &self,
        local: Result<Vec<ReplicaUpdate>, RepexError>,
    ) -> Result<Vec<ReplicaUpdate>, RepexError> {
        let published = self
            .shared
            .slots
            .lock()
            .map(|mut slots| slots[self.rank] = Some(local))
            .map_err(|_| poisoned(self.rank));
        self.shared.barrier.wait();
        let combined = published.and_then(|_| {
            let slots = self.shared.slots.lock().map_err(|_| poisoned(self.rank))?;
            let mut gathered = Vec::new();
            for (rank, slot) in slots.iter().enumerate() {
                match slot {
                    Some(Ok(updates)) => gathered.extend(updates.iter().cloned()),
                    Some(Err(err)) => return Err(err.clone().with_context("origin_rank", rank)),
                    None => {
                        return Err(RepexError::Communication(
                            ErrorInfo::new("missing-contribution", "worker did not contribute")
                                .with_context("rank", rank),
                        ))
                    }
                }
            }
            Ok(gathered)
        });
        self.shared.barrier.wait();
        combined
    }

    fn broadcast(&self, directive: Option<Directive>) -> Result<Directive, RepexError> {
        let published = if self.rank == COORDINATOR {
            self.shared
                .directive
                .lock()
                .map(|mut slot| *slot = directive)
                .map_err(|_| poisoned(self.rank))
        } else {
            Ok(())
        };
        self.shared.barrier.wait();
        let received = published.and_then(|_| {
            self.shared
                .directive
                .lock()
                .map_err(|_| poisoned(self.rank))?
                .clone()
                .ok_or_else(missing_directive)
        });
        self.shared.barrier.wait();
        received
    }
}
