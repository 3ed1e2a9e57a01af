use std::fs::{self, OpenOptions};
use std::io::Write;

use repex_core::reference::harmonic_restraint;
use repex_core::{RepexError, RunProvenance, SamplerState, SystemDefinition, ThermodynamicState};
use tempfile::tempdir;

use repex_engine::{
    CheckpointStore, DirectoryStore, EnergyMatrix, ExchangeCounters, ExchangeVariant,
    IterationRecord, IterationTimings, MemoryStore, RunOptions, StateRecord, StaticPayload,
    SCHEMA_VERSION,
};

fn record(iteration: usize) -> IterationRecord {
    let offset = iteration as f64;
    let samplers = vec![
        SamplerState {
            positions: vec![[0.1 + 0.2, offset, -1.0 / 3.0]],
            velocities: Some(vec![[1e-17, 2.5, offset.sqrt()]]),
            box_vectors: Some([[2.0, 0.0, 0.0], [0.0, 2.0, 0.0], [0.0, 0.0, 2.0]]),
            potential_energy: None,
            kinetic_energy: None,
        },
        SamplerState::new(vec![[std::f64::consts::PI, 0.0, offset]]),
    ];
    let mut counters = ExchangeCounters::zeros(2);
    counters.proposed[0][1] = 1;
    counters.proposed[1][0] = 1;
    IterationRecord::capture(
        iteration,
        &samplers,
        vec![iteration % 2, (iteration + 1) % 2],
        EnergyMatrix::from_rows(vec![vec![1.0 / 7.0, offset], vec![-2.0, 1e300]]).unwrap(),
        counters,
        IterationTimings {
            iteration_seconds: 0.5,
            mixing_seconds: 0.01,
            propagate_seconds: vec![0.2, 0.25],
        },
    )
}

fn static_payload() -> StaticPayload {
    let system = SystemDefinition::new("pair", 1).with_term(harmonic_restraint(10.0));
    let states = [300.0, 330.0]
        .iter()
        .map(|t| StateRecord::from_state(&ThermodynamicState::new(system.clone(), *t, None).unwrap()))
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    StaticPayload {
        schema: SCHEMA_VERSION,
        provenance: RunProvenance {
            title: "store test".to_string(),
            seed: 3,
            ..RunProvenance::default()
        },
        variant: ExchangeVariant::TemperatureLinear,
        states,
        options: RunOptions::default().to_record().unwrap(),
    }
}

#[test]
fn directory_store_round_trips_records_exactly() {
    let dir = tempdir().unwrap();
    let mut store = DirectoryStore::new(dir.path().join("run"));
    let written: Vec<_> = (0..3).map(record).collect();
    for record in &written {
        store.write(record).unwrap();
    }

    let reopened = DirectoryStore::new(dir.path().join("run"));
    assert_eq!(reopened.read_iterations().unwrap(), written);
    let last = reopened.read_last_iteration().unwrap();
    assert_eq!(last.iteration, 2);
    assert_eq!(last.positions[0][0][0].to_bits(), (0.1_f64 + 0.2).to_bits());
    assert_eq!(last.volumes[0], Some(8.0));
    assert_eq!(last.volumes[1], None);
    assert_eq!(last.energies.get(1, 1), 1e300);
}

#[test]
fn static_payload_round_trips_and_locks_after_first_record() {
    let dir = tempdir().unwrap();
    let mut store = DirectoryStore::new(dir.path());
    assert!(!store.has_static().unwrap());
    let payload = static_payload();
    store.store_static(&payload).unwrap();
    assert!(store.has_static().unwrap());
    assert_eq!(store.load_static().unwrap(), payload);
    assert!(!dir.path().join("static.json.tmp").exists());

    let states = store.load_static().unwrap().thermodynamic_states().unwrap();
    assert_eq!(states[1].temperature(), 330.0);

    let mut retitled = payload.clone();
    retitled.provenance.title = "second attempt".to_string();
    store.store_static(&retitled).unwrap();
    assert_eq!(store.load_static().unwrap(), retitled);
    assert!(!dir.path().join("static.json.tmp").exists());

    store.write(&record(0)).unwrap();
    let err = store.store_static(&payload).unwrap_err();
    assert_eq!(err.info().code, "static-exists");
    assert_eq!(store.load_static().unwrap(), retitled);
}

#[test]
fn first_write_creates_nested_root() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("a").join("b");
    let mut store = DirectoryStore::new(&root);
    store.store_static(&static_payload()).unwrap();
    let first = record(0);
    store.write(&first).unwrap();
    let reopened = DirectoryStore::new(&root);
    assert!(reopened.has_static().unwrap());
    assert_eq!(reopened.read_last_iteration().unwrap(), first);
}

#[test]
fn missing_static_and_empty_log_are_resume_errors() {
    let dir = tempdir().unwrap();
    let store = DirectoryStore::new(dir.path().join("absent"));
    let err = store.load_static().unwrap_err();
    assert!(matches!(err, RepexError::Resume(_)));
    assert_eq!(err.info().code, "missing-static");

    let err = store.read_last_iteration().unwrap_err();
    assert!(matches!(err, RepexError::Resume(_)));
    assert_eq!(err.info().code, "empty-store");
}

#[test]
fn torn_tail_without_newline_is_ignored_then_truncated() {
    let dir = tempdir().unwrap();
    let mut store = DirectoryStore::new(dir.path());
    store.write(&record(0)).unwrap();
    store.write(&record(1)).unwrap();

    let path = store.iterations_path();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"iteration\":2,\"positions\":[[[0.1").unwrap();
    drop(file);

    let mut reopened = DirectoryStore::new(dir.path());
    assert_eq!(reopened.read_iterations().unwrap().len(), 2);
    assert_eq!(reopened.read_last_iteration().unwrap().iteration, 1);

    let third = record(2);
    reopened.write(&third).unwrap();
    let records = reopened.read_iterations().unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[2], third);
    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 3);
    assert!(contents.ends_with('\n'));
}

#[test]
fn unparseable_final_line_is_treated_as_torn() {
    let dir = tempdir().unwrap();
    let mut store = DirectoryStore::new(dir.path());
    store.write(&record(0)).unwrap();
    let path = store.iterations_path();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"iteration\":1}\n").unwrap();
    drop(file);

    let mut reopened = DirectoryStore::new(dir.path());
    assert_eq!(reopened.read_last_iteration().unwrap().iteration, 0);
    reopened.write(&record(1)).unwrap();
    assert_eq!(reopened.read_iterations().unwrap().len(), 2);
}

#[test]
fn corruption_before_the_tail_is_a_persistence_error() {
    let dir = tempdir().unwrap();
    let mut store = DirectoryStore::new(dir.path());
    store.write(&record(0)).unwrap();
    let path = store.iterations_path();
    let mut contents = fs::read(&path).unwrap();
    contents.extend_from_slice(b"not json\n");
    contents.extend_from_slice(serde_json::to_string(&record(1)).unwrap().as_bytes());
    contents.push(b'\n');
    fs::write(&path, contents).unwrap();

    let err = DirectoryStore::new(dir.path()).read_iterations().unwrap_err();
    assert!(matches!(err, RepexError::Persistence(_)));
    assert_eq!(err.info().code, "corrupt-record");
}

#[test]
fn records_must_be_contiguous() {
    let dir = tempdir().unwrap();
    let mut stores: Vec<Box<dyn CheckpointStore>> = vec![
        Box::new(DirectoryStore::new(dir.path())),
        Box::new(MemoryStore::new()),
    ];
    for store in stores.iter_mut() {
        let err = store.write(&record(1)).unwrap_err();
        assert_eq!(err.info().code, "record-out-of-order");
        store.write(&record(0)).unwrap();
        let err = store.write(&record(0)).unwrap_err();
        assert!(matches!(err, RepexError::Persistence(_)));
        assert_eq!(err.info().context["expected"], "1");
        store.write(&record(1)).unwrap();
        assert_eq!(store.read_last_iteration().unwrap().iteration, 1);
    }
}

#[test]
fn memory_store_clones_share_data() {
    let mut writer = MemoryStore::new();
    let reader = writer.clone();
    writer.store_static(&static_payload()).unwrap();
    let written = record(0);
    writer.write(&written).unwrap();
    assert!(reader.has_static().unwrap());
    assert_eq!(reader.read_last_iteration().unwrap(), written);
    let err = writer.store_static(&static_payload()).unwrap_err();
    assert_eq!(err.info().code, "static-exists");
}

#[test]
fn sampler_states_rebuild_positions_velocities_and_boxes() {
    let samplers = record(4).sampler_states();
    assert_eq!(samplers.len(), 2);
    assert_eq!(samplers[0].velocities.as_ref().unwrap()[0][2], 2.0);
    assert!(samplers[1].box_vectors.is_none());
    assert!(samplers[0].potential_energy.is_none());
}

#[test]
fn shape_check_catches_bad_mappings() {
    let mut bad = record(0);
    bad.states = vec![1, 1];
    let err = bad.check_shape(2, 2).unwrap_err();
    assert!(matches!(err, RepexError::Resume(_)));
    assert_eq!(err.info().code, "malformed-record");
    record(0).check_shape(2, 2).unwrap();
    assert_eq!(record(0).check_shape(3, 3).unwrap_err().info().code, "malformed-record");
}
