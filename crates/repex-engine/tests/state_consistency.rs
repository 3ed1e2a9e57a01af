use std::sync::Arc;

use repex_core::reference::harmonic_restraint;
use repex_core::{Barostat, ReferencePhysics, RepexError, SamplerState, SystemDefinition, ThermodynamicState};

use repex_engine::{
    build_ladder, hamiltonian_states, parallel_tempering_states, CheckpointStore, Collaborators,
    ExchangeVariant, LadderPolicy, MemoryStore, ReplicaExchange, RunOptions,
};

fn system(name: &str, k: f64) -> SystemDefinition {
    SystemDefinition::new(name, 2).with_term(harmonic_restraint(k))
}

fn barostatted(seed: u32, frequency: u32) -> SystemDefinition {
    system("npt", 50.0).with_barostat(Barostat {
        pressure: 1.0,
        temperature: 300.0,
        frequency,
        seed,
    })
}

fn initial(n: usize) -> Vec<SamplerState> {
    (0..n)
        .map(|_| SamplerState::new(vec![[0.1, 0.0, 0.0], [0.0, 0.1, 0.0]]))
        .collect()
}

fn quick_options() -> RunOptions {
    RunOptions {
        minimize: false,
        number_of_equilibration_iterations: 0,
        nsteps_per_iteration: 2,
        show_mixing_statistics: false,
        ..RunOptions::default()
    }
}

fn code(err: &RepexError) -> &str {
    &err.info().code
}

#[test]
fn hamiltonian_exchange_rejects_different_temperatures_before_any_iteration() {
    let states = vec![
        ThermodynamicState::new(system("a", 10.0), 300.0, None).unwrap(),
        ThermodynamicState::new(system("b", 20.0), 310.0, None).unwrap(),
    ];
    let store = MemoryStore::new();
    let err = ReplicaExchange::create(
        ExchangeVariant::FixedTemperature,
        states,
        initial(2),
        quick_options(),
        Collaborators::local(Arc::new(ReferencePhysics::new()), store.clone()),
    )
    .err()
    .unwrap();
    assert!(matches!(err, RepexError::Configuration(_)));
    assert_eq!(code(&err), "temperature-mismatch");
    assert!(!store.has_static().unwrap());
    assert!(store.read_iterations().unwrap().is_empty());
}

#[test]
fn hamiltonian_exchange_rejects_different_pressures() {
    let mut states = vec![
        ThermodynamicState::new(system("a", 10.0), 300.0, Some(1.0)).unwrap(),
        ThermodynamicState::new(system("b", 20.0), 300.0, Some(2.0)).unwrap(),
    ];
    let err = ExchangeVariant::FixedTemperature
        .validate(&mut states)
        .unwrap_err();
    assert_eq!(code(&err), "pressure-mismatch");
}

#[test]
fn incompatible_atom_counts_are_rejected_for_every_variant() {
    for variant in [
        ExchangeVariant::Generic,
        ExchangeVariant::TemperatureLinear,
        ExchangeVariant::FixedTemperature,
    ] {
        let mut states = vec![
            ThermodynamicState::new(system("a", 10.0), 300.0, None).unwrap(),
            ThermodynamicState::new(SystemDefinition::new("b", 3), 300.0, None).unwrap(),
        ];
        let err = variant.validate(&mut states).unwrap_err();
        assert_eq!(code(&err), "incompatible-states", "{variant}");
    }
}

#[test]
fn mixed_ensembles_are_incompatible() {
    let mut states = vec![
        ThermodynamicState::new(system("a", 10.0), 300.0, None).unwrap(),
        ThermodynamicState::new(system("a", 10.0), 300.0, Some(1.0)).unwrap(),
    ];
    let err = ExchangeVariant::Generic.validate(&mut states).unwrap_err();
    assert_eq!(code(&err), "incompatible-states");
}

#[test]
fn tempering_accepts_barostats_differing_in_temperature_and_seed() {
    let mut states = vec![
        ThermodynamicState::new(barostatted(1, 25), 300.0, Some(1.0)).unwrap(),
        ThermodynamicState::new(
            {
                let mut system = barostatted(77, 25);
                if let Some(barostat) = system.barostat.as_mut() {
                    barostat.temperature = 350.0;
                }
                system
            },
            350.0,
            Some(1.0),
        )
        .unwrap(),
    ];
    ExchangeVariant::TemperatureLinear
        .validate(&mut states)
        .unwrap();

    let second = states[1].system().barostat.as_ref().unwrap();
    assert_eq!(second.temperature, 350.0);
    assert_eq!(second.seed, 77);
    let first = states[0].system().barostat.as_ref().unwrap();
    assert_eq!(first.temperature, 300.0);
    assert_eq!(first.seed, 1);
}

#[test]
fn tempering_rejects_other_system_differences_and_still_restores_barostats() {
    let mut states = vec![
        ThermodynamicState::new(barostatted(1, 25), 300.0, Some(1.0)).unwrap(),
        ThermodynamicState::new(barostatted(2, 50), 350.0, Some(1.0)).unwrap(),
    ];
    let err = ExchangeVariant::TemperatureLinear
        .validate(&mut states)
        .unwrap_err();
    assert_eq!(code(&err), "system-mismatch");
    assert_eq!(states[1].system().barostat.as_ref().unwrap().seed, 2);
    assert_eq!(states[0].system().barostat.as_ref().unwrap().temperature, 300.0);
}

#[test]
fn tempering_rejects_different_hamiltonians() {
    let mut states = vec![
        ThermodynamicState::new(system("a", 10.0), 300.0, None).unwrap(),
        ThermodynamicState::new(system("a", 11.0), 350.0, None).unwrap(),
    ];
    let err = ExchangeVariant::TemperatureLinear
        .validate(&mut states)
        .unwrap_err();
    assert_eq!(code(&err), "system-mismatch");
}

#[test]
fn exponential_ladder_follows_the_exponential_spacing() {
    let ladder = build_ladder(&LadderPolicy::Exponential {
        t_min: 300.0,
        t_max: 600.0,
        n_temps: 3,
    })
    .unwrap();
    let e = std::f64::consts::E;
    assert_eq!(ladder.len(), 3);
    assert!((ladder[0] - 300.0).abs() < 1e-12);
    assert!((ladder[1] - (300.0 + 300.0 * (e.sqrt() - 1.0) / (e - 1.0))).abs() < 1e-9);
    assert!((ladder[2] - 600.0).abs() < 1e-9);
}

#[test]
fn geometric_ladder_has_constant_ratio() {
    let ladder = build_ladder(&LadderPolicy::Geometric {
        t_min: 300.0,
        t_max: 480.0,
        n_temps: 4,
    })
    .unwrap();
    let ratio = ladder[1] / ladder[0];
    for pair in ladder.windows(2) {
        assert!((pair[1] / pair[0] - ratio).abs() < 1e-12);
    }
    assert!((ladder[3] - 480.0).abs() < 1e-9);
}

#[test]
fn ladder_inputs_are_required() {
    let err = LadderPolicy::from_parts(None, Some(300.0), None, Some(4)).unwrap_err();
    assert!(matches!(err, RepexError::Configuration(_)));
    assert_eq!(code(&err), "missing-ladder-input");

    let manual = LadderPolicy::from_parts(Some(vec![300.0, 320.0]), None, None, None).unwrap();
    assert_eq!(build_ladder(&manual).unwrap(), vec![300.0, 320.0]);

    let err = build_ladder(&LadderPolicy::Exponential {
        t_min: 400.0,
        t_max: 300.0,
        n_temps: 3,
    })
    .unwrap_err();
    assert_eq!(code(&err), "invalid-ladder-range");
}

#[test]
fn tempering_builder_tracks_barostat_temperature() {
    let states = parallel_tempering_states(
        &barostatted(3, 25),
        &LadderPolicy::Manual {
            temperatures: vec![300.0, 330.0],
        },
        Some(1.0),
    )
    .unwrap();
    assert_eq!(
        states[1].system().barostat.as_ref().unwrap().temperature,
        330.0
    );
    assert_eq!(states[1].pressure(), Some(1.0));
}

#[test]
fn hamiltonian_builder_uses_reference_temperature_and_pressure() {
    let reference = ThermodynamicState::new(system("ref", 1.0), 298.0, Some(1.0)).unwrap();
    let states = hamiltonian_states(
        &reference,
        vec![system("a", 10.0), system("b", 20.0), system("c", 30.0)],
    )
    .unwrap();
    assert_eq!(states.len(), 3);
    assert!(states
        .iter()
        .all(|state| state.temperature() == 298.0 && state.pressure() == Some(1.0)));
    let mut states = states;
    ExchangeVariant::FixedTemperature
        .validate(&mut states)
        .unwrap();
}

#[test]
fn coordinate_count_mismatch_is_a_configuration_error() {
    let states = vec![
        ThermodynamicState::new(system("a", 10.0), 300.0, None).unwrap(),
        ThermodynamicState::new(system("a", 10.0), 330.0, None).unwrap(),
    ];
    let err = ReplicaExchange::create(
        ExchangeVariant::TemperatureLinear,
        states,
        initial(3),
        quick_options(),
        Collaborators::local(Arc::new(ReferencePhysics::new()), MemoryStore::new()),
    )
    .err()
    .unwrap();
    assert_eq!(code(&err), "state-count-mismatch");
}
