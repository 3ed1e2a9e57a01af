//! Mixing diagnostics derived from counters and the persisted state history.

use std::fmt::Write as _;

use nalgebra::{DMatrix, SymmetricEigen};
use repex_core::RepexError;
use serde::{Deserialize, Serialize};

use crate::checkpoint::CheckpointStore;
use crate::exchange::ExchangeCounters;

/// Acceptance rates derived from cumulative counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingStatistics {
    /// `acceptance[k][l]`, `None` where the pair was never attempted.
    pub acceptance: Vec<Vec<Option<f64>>>,
    /// Acceptance between states `k` and `k + 1`.
    pub neighbor_acceptance: Vec<Option<f64>>,
    /// Attempts over unordered pairs.
    pub total_proposed: u64,
    /// Accepted swaps over unordered pairs.
    pub total_accepted: u64,
}

impl MixingStatistics {
    /// Summarizes `counters`.
    pub fn from_counters(counters: &ExchangeCounters) -> Self {
        let n = counters.n_states();
        let acceptance = (0..n)
            .map(|k| (0..n).map(|l| counters.acceptance_rate(k, l)).collect())
            .collect();
        let neighbor_acceptance = (0..n.saturating_sub(1))
            .map(|k| counters.acceptance_rate(k, k + 1))
            .collect();
        Self {
            acceptance,
            neighbor_acceptance,
            total_proposed: counters.total_proposed(),
            total_accepted: counters.total_accepted(),
        }
    }

    /// Fraction of all attempts that were accepted.
    pub fn overall_acceptance(&self) -> Option<f64> {
        (self.total_proposed > 0).then(|| self.total_accepted as f64 / self.total_proposed as f64)
    }

    /// Acceptance table as fixed-width text, one row per state.
    pub fn render(&self) -> String {
        let mut table = String::new();
        let _ = write!(table, "{:>6}", "");
        for l in 0..self.acceptance.len() {
            let _ = write!(table, "{l:>7}");
        }
        for (k, row) in self.acceptance.iter().enumerate() {
            let _ = write!(table, "\n{k:>6}");
            for rate in row {
                match rate {
                    Some(rate) => {
                        let _ = write!(table, "{rate:>7.3}");
                    }
                    None => {
                        let _ = write!(table, "{:>7}", "-");
                    }
                }
            }
        }
        table
    }
}

/// Symmetrized, row-normalized empirical transition matrix between states,
/// estimated from consecutive entries of the `states` history (one mapping
/// per iteration). Rows without observations stay on the diagonal.
pub fn transition_matrix(history: &[Vec<usize>], n_states: usize) -> Vec<Vec<f64>> {
    let mut counts = vec![vec![0.0_f64; n_states]; n_states];
    for window in history.windows(2) {
        for (&from, &to) in window[0].iter().zip(&window[1]) {
            if from < n_states && to < n_states {
                counts[from][to] += 0.5;
                counts[to][from] += 0.5;
            }
        }
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(k, row)| {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                row.into_iter().map(|count| count / total).collect()
            } else {
                (0..n_states).map(|l| if l == k { 1.0 } else { 0.0 }).collect()
            }
        })
        .collect()
}

/// Magnitude of the subdominant eigenvalue of the symmetric part of
/// `matrix`: the largest `|lambda|` once the leading (unit) eigenvalue is
/// removed. Negative eigenvalues from period-2 swap oscillation count.
pub fn subdominant_eigenvalue(matrix: &[Vec<f64>]) -> Option<f64> {
    let n = matrix.len();
    if n < 2 {
        return None;
    }
    let dense = DMatrix::from_fn(n, n, |row, col| 0.5 * (matrix[row][col] + matrix[col][row]));
    let mut eigenvalues: Vec<f64> = SymmetricEigen::new(dense).eigenvalues.iter().copied().collect();
    // The leading eigenvalue is the largest signed one.
    eigenvalues.sort_by(|a, b| b.total_cmp(a));
    eigenvalues
        .iter()
        .skip(1)
        .map(|lambda| lambda.abs())
        .max_by(|a, b| a.total_cmp(b))
}

/// Relaxation time `1 / (1 - |lambda|)` in iterations; infinite when `|lambda| >= 1`.
pub fn relaxation_time(subdominant: f64) -> f64 {
    let magnitude = subdominant.abs();
    if magnitude >= 1.0 {
        f64::INFINITY
    } else {
        1.0 / (1.0 - magnitude)
    }
}

/// Offline mixing report for a stored run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingReport {
    /// Iterations read from the store, including iteration 0.
    pub iterations: usize,
    /// Acceptance rates from the summed counters.
    pub statistics: MixingStatistics,
    /// Empirical state-transition matrix.
    pub transition: Vec<Vec<f64>>,
    /// Subdominant eigenvalue magnitude of `transition`.
    pub subdominant_eigenvalue: Option<f64>,
    /// Estimated relaxation time in iterations.
    pub relaxation_time: Option<f64>,
}

/// Builds a [`MixingReport`] from every record in `store`.
pub fn analyze_store(store: &dyn CheckpointStore) -> Result<MixingReport, RepexError> {
    let records = store.read_iterations()?;
    let n_states = records
        .first()
        .map(|record| record.counters.n_states())
        .ok_or_else(|| RepexError::resume("empty-store", "store holds no iterations"))?;
    let mut counters = ExchangeCounters::zeros(n_states);
    for record in &records {
        counters.accumulate(&record.counters);
    }
    let history: Vec<Vec<usize>> = records.iter().map(|record| record.states.clone()).collect();
    let transition = transition_matrix(&history, n_states);
    let subdominant = subdominant_eigenvalue(&transition);
    Ok(MixingReport {
        iterations: records.len(),
        statistics: MixingStatistics::from_counters(&counters),
        transition,
        subdominant_eigenvalue: subdominant,
        relaxation_time: subdominant.map(relaxation_time),
    })
}
