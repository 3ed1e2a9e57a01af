//! State-label exchange between replicas.

use repex_core::{units, RngHandle};
use serde::{Deserialize, Serialize};

use crate::config::MixingScheme;
use crate::energy::EnergyMatrix;

/// Symmetric `n_states x n_states` exchange counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeCounters {
    /// Attempted swaps per state pair.
    pub proposed: Vec<Vec<u64>>,
    /// Accepted swaps per state pair.
    pub accepted: Vec<Vec<u64>>,
}

impl ExchangeCounters {
    /// All-zero counters.
    pub fn zeros(n_states: usize) -> Self {
        Self {
            proposed: vec![vec![0; n_states]; n_states],
            accepted: vec![vec![0; n_states]; n_states],
        }
    }

    /// Number of states covered.
    pub fn n_states(&self) -> usize {
        self.proposed.len()
    }

    fn record(&mut self, k: usize, l: usize, accepted: bool) {
        self.proposed[k][l] += 1;
        self.proposed[l][k] += 1;
        if accepted {
            self.accepted[k][l] += 1;
            self.accepted[l][k] += 1;
        }
    }

    /// Adds per-iteration deltas. Shapes must match.
    pub fn accumulate(&mut self, delta: &ExchangeCounters) {
        for (row, delta_row) in self.proposed.iter_mut().zip(&delta.proposed) {
            for (count, add) in row.iter_mut().zip(delta_row) {
                *count += add;
            }
        }
        for (row, delta_row) in self.accepted.iter_mut().zip(&delta.accepted) {
            for (count, add) in row.iter_mut().zip(delta_row) {
                *count += add;
            }
        }
    }

    /// Total attempts over unordered pairs.
    pub fn total_proposed(&self) -> u64 {
        upper_sum(&self.proposed)
    }

    /// Total accepted swaps over unordered pairs.
    pub fn total_accepted(&self) -> u64 {
        upper_sum(&self.accepted)
    }

    /// Empirical acceptance rate for the pair, `None` when never attempted.
    pub fn acceptance_rate(&self, k: usize, l: usize) -> Option<f64> {
        let proposed = self.proposed[k][l];
        (proposed > 0).then(|| self.accepted[k][l] as f64 / proposed as f64)
    }
}

fn upper_sum(matrix: &[Vec<u64>]) -> u64 {
    matrix
        .iter()
        .enumerate()
        .flat_map(|(k, row)| row.iter().skip(k + 1))
        .sum()
}

/// Result of one mixing phase: the new mapping plus this iteration's counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingOutcome {
    /// `replica_states[i]` after mixing.
    pub replica_states: Vec<usize>,
    /// Attempts and acceptances made during this phase only.
    pub delta: ExchangeCounters,
}

/// Energy change of swapping the states held by replicas `i` (at `k`) and
/// `j` (at `l`): `(u[i,l] + u[j,k]) - (u[i,k] + u[j,l])`.
pub fn swap_delta(energies: &EnergyMatrix, i: usize, j: usize, k: usize, l: usize) -> f64 {
    (energies.get(i, l) + energies.get(j, k)) - (energies.get(i, k) + energies.get(j, l))
}

/// Metropolis probability `min(1, exp(-delta))`; NaN maps to 0.
pub fn acceptance_probability(delta: f64) -> f64 {
    if delta.is_nan() {
        0.0
    } else if delta <= 0.0 {
        1.0
    } else {
        (-delta).exp()
    }
}

/// Decides a proposal against a uniform draw in `[0, 1)`.
pub fn accept(delta: f64, draw: f64) -> bool {
    if delta.is_nan() {
        return false;
    }
    delta <= 0.0 || draw < (-delta).exp()
}

/// Closed-form parallel-tempering acceptance for replica `a` at `temp_a`
/// and replica `b` at `temp_b`, with raw potential energies in kJ/mol.
pub fn exchange_acceptance(energy_a: f64, temp_a: f64, energy_b: f64, temp_b: f64) -> f64 {
    let beta_a = units::beta(temp_a);
    let beta_b = units::beta(temp_b);
    let delta = (beta_a - beta_b) * (energy_b - energy_a);
    (-delta).exp().min(1.0)
}

/// Proposes and applies state-label swaps under a [`MixingScheme`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExchangeProtocol {
    scheme: MixingScheme,
}

impl ExchangeProtocol {
    /// Protocol for `scheme`.
    pub fn new(scheme: MixingScheme) -> Self {
        Self { scheme }
    }

    /// Scheme in use.
    pub fn scheme(&self) -> MixingScheme {
        self.scheme
    }

    /// Runs one mixing phase. Only labels move; configurations stay put.
    ///
    /// Every proposal consumes exactly one uniform draw for acceptance, and
    /// `swap-all` additionally two index draws to pick the ordered pair.
    pub fn mix(
        &self,
        energies: &EnergyMatrix,
        replica_states: &[usize],
        rng: &mut RngHandle,
    ) -> MixingOutcome {
        let n_states = energies.n_states();
        let mut mixing = Mixing::new(replica_states, n_states);
        if n_states >= 2 {
            match self.scheme {
                MixingScheme::None => {}
                MixingScheme::SwapNeighbors => {
                    for k in 0..n_states - 1 {
                        mixing.attempt(energies, k, k + 1, rng);
                    }
                }
                MixingScheme::SwapAll => {
                    for _ in 0..n_states {
                        let k = rng.index(n_states);
                        let mut l = rng.index(n_states - 1);
                        if l >= k {
                            l += 1;
                        }
                        mixing.attempt(energies, k, l, rng);
                    }
                }
            }
        }
        MixingOutcome {
            replica_states: mixing.replica_states,
            delta: mixing.delta,
        }
    }
}

struct Mixing {
    replica_states: Vec<usize>,
    holder: Vec<Option<usize>>,
    delta: ExchangeCounters,
}

impl Mixing {
    fn new(replica_states: &[usize], n_states: usize) -> Self {
        let mut holder = vec![None; n_states];
        for (replica, &state) in replica_states.iter().enumerate() {
            if let Some(slot) = holder.get_mut(state) {
                *slot = Some(replica);
            }
        }
        Self {
            replica_states: replica_states.to_vec(),
            holder,
            delta: ExchangeCounters::zeros(n_states),
        }
    }

    fn attempt(&mut self, energies: &EnergyMatrix, k: usize, l: usize, rng: &mut RngHandle) {
        let draw = rng.uniform();
        let (Some(i), Some(j)) = (self.holder[k], self.holder[l]) else {
            return;
        };
        let delta = swap_delta(energies, i, j, k, l);
        let accepted = accept(delta, draw);
        self.delta.record(k, l, accepted);
        if accepted {
            self.replica_states[i] = l;
            self.replica_states[j] = k;
            self.holder[k] = Some(j);
            self.holder[l] = Some(i);
        }
    }
}
