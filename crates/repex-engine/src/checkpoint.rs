//! Durable, append-only persistence of iteration records.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use repex_core::{
    BoxVectors, ErrorInfo, RepexError, RunProvenance, SamplerState, SchemaVersion,
    SystemDefinition, ThermodynamicState, Vec3,
};
use serde::{Deserialize, Serialize};

use crate::consistency::ExchangeVariant;
use crate::energy::EnergyMatrix;
use crate::exchange::ExchangeCounters;
use crate::options::OptionsRecord;

/// Schema written by this version of the engine.
pub const SCHEMA_VERSION: SchemaVersion = SchemaVersion::new(1, 0, 0);

const STATIC_FILE: &str = "static.json";
const STATIC_TEMP_FILE: &str = "static.json.tmp";
const ITERATIONS_FILE: &str = "iterations.jsonl";

/// Wall-clock timings of one iteration, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationTimings {
    /// Whole iteration.
    pub iteration_seconds: f64,
    /// Mixing phase.
    pub mixing_seconds: f64,
    /// Propagation per replica.
    pub propagate_seconds: Vec<f64>,
}

/// Everything persisted for one iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Iteration index, 0 for the initial configuration.
    pub iteration: usize,
    /// Positions per replica.
    pub positions: Vec<Vec<Vec3>>,
    /// Velocities per replica, when tracked.
    pub velocities: Vec<Option<Vec<Vec3>>>,
    /// Box vectors per replica.
    pub box_vectors: Vec<Option<BoxVectors>>,
    /// Box volumes per replica.
    pub volumes: Vec<Option<f64>>,
    /// Replica to state mapping.
    pub states: Vec<usize>,
    /// Reduced potentials `u[replica, state]`.
    pub energies: EnergyMatrix,
    /// Exchange attempts and acceptances made during this iteration.
    pub counters: ExchangeCounters,
    /// RFC 3339 wall-clock time of the write.
    pub timestamp: String,
    /// Phase timings.
    #[serde(default)]
    pub timings: IterationTimings,
}

impl IterationRecord {
    /// Snapshots `samplers` together with the mixing results.
    pub fn capture(
        iteration: usize,
        samplers: &[SamplerState],
        states: Vec<usize>,
        energies: EnergyMatrix,
        counters: ExchangeCounters,
        timings: IterationTimings,
    ) -> Self {
        Self {
            iteration,
            positions: samplers.iter().map(|s| s.positions.clone()).collect(),
            velocities: samplers.iter().map(|s| s.velocities.clone()).collect(),
            box_vectors: samplers.iter().map(|s| s.box_vectors).collect(),
            volumes: samplers.iter().map(SamplerState::volume).collect(),
            states,
            energies,
            counters,
            timestamp: chrono::Utc::now().to_rfc3339(),
            timings,
        }
    }

    /// Rebuilds sampler states. Cached energies are not persisted.
    pub fn sampler_states(&self) -> Vec<SamplerState> {
        self.positions
            .iter()
            .zip(&self.velocities)
            .zip(&self.box_vectors)
            .map(|((positions, velocities), box_vectors)| SamplerState {
                positions: positions.clone(),
                velocities: velocities.clone(),
                box_vectors: *box_vectors,
                potential_energy: None,
                kinetic_energy: None,
            })
            .collect()
    }

    /// Checks that every per-replica series and matrix has the expected shape.
    pub fn check_shape(&self, n_replicas: usize, n_states: usize) -> Result<(), RepexError> {
        let lengths = [
            ("positions", self.positions.len()),
            ("velocities", self.velocities.len()),
            ("box_vectors", self.box_vectors.len()),
            ("volumes", self.volumes.len()),
            ("states", self.states.len()),
            ("energies", self.energies.n_replicas()),
        ];
        for (series, length) in lengths {
            if length != n_replicas {
                return Err(malformed(self.iteration, series, n_replicas, length));
            }
        }
        if self.energies.n_states() != n_states {
            return Err(malformed(
                self.iteration,
                "energies",
                n_states,
                self.energies.n_states(),
            ));
        }
        if self.counters.n_states() != n_states
            || self.counters.accepted.len() != n_states
            || self
                .counters
                .proposed
                .iter()
                .chain(&self.counters.accepted)
                .any(|row| row.len() != n_states)
        {
            return Err(malformed(
                self.iteration,
                "counters",
                n_states,
                self.counters.n_states(),
            ));
        }
        let mut seen = vec![false; n_states];
        for &state in &self.states {
            match seen.get_mut(state) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(RepexError::Resume(
                        ErrorInfo::new("malformed-record", "state mapping is not a permutation")
                            .with_context("iteration", self.iteration)
                            .with_context("state", state),
                    ))
                }
            }
        }
        Ok(())
    }
}

fn malformed(iteration: usize, series: &str, expected: usize, found: usize) -> RepexError {
    RepexError::Resume(
        ErrorInfo::new("malformed-record", "persisted series has unexpected length")
            .with_context("iteration", iteration)
            .with_context("series", series)
            .with_context("expected", expected)
            .with_context("found", found),
    )
}

/// Persisted description of one thermodynamic state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    /// Temperature in K.
    pub temperature: f64,
    /// Pressure in bar, if isobaric.
    pub pressure: Option<f64>,
    /// Serialized system.
    pub system: SystemDefinition,
    /// SHA-256 of the canonical system serialization.
    pub fingerprint: String,
}

impl StateRecord {
    /// Describes `state`.
    pub fn from_state(state: &ThermodynamicState) -> Result<Self, RepexError> {
        Ok(Self {
            temperature: state.temperature(),
            pressure: state.pressure(),
            system: state.system().clone(),
            fingerprint: state.system().fingerprint()?,
        })
    }

    /// Rebuilds the state after verifying the fingerprint.
    pub fn to_state(&self, index: usize) -> Result<ThermodynamicState, RepexError> {
        let fingerprint = self.system.fingerprint()?;
        if fingerprint != self.fingerprint {
            return Err(RepexError::Resume(
                ErrorInfo::new(
                    "system-fingerprint-mismatch",
                    "stored system does not match its fingerprint",
                )
                .with_context("state", index)
                .with_context("expected", &self.fingerprint)
                .with_context("found", fingerprint),
            ));
        }
        ThermodynamicState::new(self.system.clone(), self.temperature, self.pressure).map_err(
            |err| RepexError::Resume(err.info().clone().with_context("state", index)),
        )
    }
}

/// Immutable configuration written once when a run is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticPayload {
    /// Schema of the stored data.
    pub schema: SchemaVersion,
    /// Title, seed, creation time and tool versions.
    pub provenance: RunProvenance,
    /// Exchange variant of the run.
    pub variant: ExchangeVariant,
    /// Thermodynamic states in index order.
    pub states: Vec<StateRecord>,
    /// Tagged run options.
    pub options: OptionsRecord,
}

impl StaticPayload {
    /// Rebuilds the thermodynamic states.
    pub fn thermodynamic_states(&self) -> Result<Vec<ThermodynamicState>, RepexError> {
        self.states
            .iter()
            .enumerate()
            .map(|(index, record)| record.to_state(index))
            .collect()
    }
}

/// Durable storage for a run.
///
/// `write` either persists the whole record durably or returns an error; a
/// record that was not fully written is never returned by the readers.
pub trait CheckpointStore: Send {
    /// Writes the static payload. A payload may be replaced until the first
    /// iteration record exists; after that this fails with `static-exists`.
    fn store_static(&mut self, payload: &StaticPayload) -> Result<(), RepexError>;

    /// Reads the static payload; `Resume` error `missing-static` if absent.
    fn load_static(&self) -> Result<StaticPayload, RepexError>;

    /// Whether a static payload is present.
    fn has_static(&self) -> Result<bool, RepexError>;

    /// Appends `record`, which must be iteration `last + 1` (or 0 when empty).
    fn write(&mut self, record: &IterationRecord) -> Result<(), RepexError>;

    /// All complete records in iteration order.
    fn read_iterations(&self) -> Result<Vec<IterationRecord>, RepexError>;

    /// Most recent complete record; `Resume` error `empty-store` if none.
    fn read_last_iteration(&self) -> Result<IterationRecord, RepexError> {
        self.read_iterations()?
            .pop()
            .ok_or_else(|| RepexError::resume("empty-store", "store holds no iterations"))
    }
}

fn check_order(last: Option<usize>, record: &IterationRecord) -> Result<(), RepexError> {
    let expected = last.map_or(0, |last| last + 1);
    if record.iteration != expected {
        return Err(RepexError::Persistence(
            ErrorInfo::new("record-out-of-order", "iteration records must be contiguous")
                .with_context("expected", expected)
                .with_context("found", record.iteration),
        ));
    }
    Ok(())
}

fn io_error(code: &str, err: std::io::Error, path: &Path) -> RepexError {
    RepexError::Persistence(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display()),
    )
}

fn static_exists() -> RepexError {
    RepexError::persistence("static-exists", "static payload already written")
}

/// Makes new or renamed entries of `dir` durable.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<(), RepexError> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| io_error("checkpoint-sync-dir", err, dir))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<(), RepexError> {
    Ok(())
}

/// Store backed by a directory holding `static.json` and `iterations.jsonl`.
///
/// Each record is one newline-terminated JSON line, synced before `write`
/// returns. A trailing line without newline, or one that does not parse, is
/// a torn write: readers skip it and the next append truncates it away.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    tail: Option<Tail>,
}

#[derive(Debug, Clone, Copy)]
struct Tail {
    valid_len: u64,
    last: Option<usize>,
}

struct Scan {
    records: Vec<IterationRecord>,
    valid_len: u64,
    torn: bool,
}

impl DirectoryStore {
    /// Store rooted at `root`. Nothing is touched until the first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            tail: None,
        }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the iteration log.
    pub fn iterations_path(&self) -> PathBuf {
        self.root.join(ITERATIONS_FILE)
    }

    /// Path of the static payload.
    pub fn static_path(&self) -> PathBuf {
        self.root.join(STATIC_FILE)
    }

    fn scan(&self) -> Result<Scan, RepexError> {
        let path = self.iterations_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(io_error("checkpoint-read", err, &path)),
        };
        let mut records = Vec::new();
        let mut offset = 0usize;
        let mut torn = false;
        while offset < bytes.len() {
            let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') else {
                torn = true;
                break;
            };
            let end = offset + newline;
            match serde_json::from_slice::<IterationRecord>(&bytes[offset..end]) {
                Ok(record) => records.push(record),
                Err(err) if end + 1 == bytes.len() => {
                    tracing::debug!(error = %err, "unparseable final checkpoint line");
                    torn = true;
                    break;
                }
                Err(err) => {
                    return Err(RepexError::Persistence(
                        ErrorInfo::new("corrupt-record", err.to_string())
                            .with_context("path", path.display())
                            .with_context("offset", offset),
                    ))
                }
            }
            offset = end + 1;
        }
        Ok(Scan {
            records,
            valid_len: offset as u64,
            torn,
        })
    }

    fn ensure_tail(&mut self) -> Result<Tail, RepexError> {
        if let Some(tail) = self.tail {
            return Ok(tail);
        }
        let scan = self.scan()?;
        let path = self.iterations_path();
        if scan.torn {
            tracing::warn!(
                path = %path.display(),
                valid_len = scan.valid_len,
                "discarding torn checkpoint tail"
            );
            let file = OpenOptions::new()
                .write(true)
                .open(&path)
                .map_err(|err| io_error("checkpoint-open", err, &path))?;
            file.set_len(scan.valid_len)
                .and_then(|_| file.sync_all())
                .map_err(|err| io_error("checkpoint-truncate", err, &path))?;
        }
        let tail = Tail {
            valid_len: scan.valid_len,
            last: scan.records.last().map(|record| record.iteration),
        };
        self.tail = Some(tail);
        Ok(tail)
    }

    fn ensure_root(&self) -> Result<(), RepexError> {
        if self.root.is_dir() {
            return Ok(());
        }
        fs::create_dir_all(&self.root)
            .map_err(|err| io_error("checkpoint-mkdir", err, &self.root))?;
        match self.root.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => sync_dir(parent),
            _ => Ok(()),
        }
    }

    fn append(&self, line: &[u8]) -> Result<(), RepexError> {
        self.ensure_root()?;
        let path = self.iterations_path();
        let created = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| io_error("checkpoint-open", err, &path))?;
        file.write_all(line)
            .and_then(|_| file.sync_all())
            .map_err(|err| io_error("checkpoint-write", err, &path))?;
        if created {
            sync_dir(&self.root)?;
        }
        Ok(())
    }
}

impl CheckpointStore for DirectoryStore {
    fn store_static(&mut self, payload: &StaticPayload) -> Result<(), RepexError> {
        let path = self.static_path();
        if path.exists() && !self.scan()?.records.is_empty() {
            return Err(static_exists().with_context("path", path.display()));
        }
        self.ensure_root()?;
        let json = serde_json::to_vec_pretty(payload).map_err(|err| {
            RepexError::Serde(
                ErrorInfo::new("static-serialize", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        let temp = self.root.join(STATIC_TEMP_FILE);
        let mut file =
            File::create(&temp).map_err(|err| io_error("checkpoint-open", err, &temp))?;
        file.write_all(&json)
            .and_then(|_| file.sync_all())
            .map_err(|err| io_error("checkpoint-write", err, &temp))?;
        fs::rename(&temp, &path).map_err(|err| io_error("checkpoint-rename", err, &path))?;
        sync_dir(&self.root)
    }

    fn load_static(&self) -> Result<StaticPayload, RepexError> {
        let path = self.static_path();
        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepexError::Resume(
                    ErrorInfo::new("missing-static", "no static payload in store")
                        .with_context("path", path.display()),
                ))
            }
            Err(err) => return Err(io_error("checkpoint-read", err, &path)),
        };
        serde_json::from_slice(&contents).map_err(|err| {
            RepexError::Resume(
                ErrorInfo::new("static-parse", err.to_string()).with_context("path", path.display()),
            )
        })
    }

    fn has_static(&self) -> Result<bool, RepexError> {
        Ok(self.static_path().exists())
    }

    fn write(&mut self, record: &IterationRecord) -> Result<(), RepexError> {
        let tail = self.ensure_tail()?;
        check_order(tail.last, record)?;
        let mut line = serde_json::to_vec(record).map_err(|err| {
            RepexError::Serde(
                ErrorInfo::new("record-serialize", err.to_string())
                    .with_context("iteration", record.iteration),
            )
        })?;
        line.push(b'\n');
        // Unknown file length after a failed append; rescan next time.
        self.tail = None;
        self.append(&line)?;
        self.tail = Some(Tail {
            valid_len: tail.valid_len + line.len() as u64,
            last: Some(record.iteration),
        });
        Ok(())
    }

    fn read_iterations(&self) -> Result<Vec<IterationRecord>, RepexError> {
        Ok(self.scan()?.records)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    static_payload: Option<StaticPayload>,
    records: Vec<IterationRecord>,
}

/// In-memory store; clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>, RepexError> {
        self.inner
            .lock()
            .map_err(|_| RepexError::persistence("store-poisoned", "memory store lock poisoned"))
    }
}

impl CheckpointStore for MemoryStore {
    fn store_static(&mut self, payload: &StaticPayload) -> Result<(), RepexError> {
        let mut inner = self.lock()?;
        if inner.static_payload.is_some() && !inner.records.is_empty() {
            return Err(static_exists());
        }
        inner.static_payload = Some(payload.clone());
        Ok(())
    }

    fn load_static(&self) -> Result<StaticPayload, RepexError> {
        self.lock()?
            .static_payload
            .clone()
            .ok_or_else(|| RepexError::resume("missing-static", "no static payload in store"))
    }

    fn has_static(&self) -> Result<bool, RepexError> {
        Ok(self.lock()?.static_payload.is_some())
    }

    fn write(&mut self, record: &IterationRecord) -> Result<(), RepexError> {
        let mut inner = self.lock()?;
        check_order(inner.records.last().map(|record| record.iteration), record)?;
        inner.records.push(record.clone());
        Ok(())
    }

    fn read_iterations(&self) -> Result<Vec<IterationRecord>, RepexError> {
        Ok(self.lock()?.records.clone())
    }
}
