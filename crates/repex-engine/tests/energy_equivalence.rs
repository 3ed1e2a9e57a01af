use repex_core::reference::{harmonic_restraint, uniform_field};
use repex_core::{Barostat, Physics, ReferencePhysics, SamplerState, SystemDefinition};

use repex_engine::{
    compute_matrix, parallel_tempering_states, ExchangeVariant, GenericEnergy, LadderPolicy,
    TemperatureLinearEnergy,
};

fn system(n_atoms: usize) -> SystemDefinition {
    SystemDefinition::new("restrained", n_atoms)
        .with_term(harmonic_restraint(80.0))
        .with_term(uniform_field([0.3, -0.1, 0.05]))
}

fn samplers(n_replicas: usize, n_atoms: usize) -> Vec<SamplerState> {
    (0..n_replicas)
        .map(|replica| {
            SamplerState::new(
                (0..n_atoms)
                    .map(|atom| {
                        let shift = 0.05 * (replica * n_atoms + atom) as f64;
                        [0.2 + shift, -0.1 + 0.5 * shift, 0.3 - shift]
                    })
                    .collect(),
            )
        })
        .collect()
}

#[test]
fn temperature_linear_matches_generic_for_tempering_states() {
    let physics = ReferencePhysics::new();
    let states = parallel_tempering_states(
        &system(5),
        &LadderPolicy::Exponential {
            t_min: 300.0,
            t_max: 600.0,
            n_temps: 6,
        },
        None,
    )
    .unwrap();
    let samplers = samplers(6, 5);
    let mapping = vec![3, 0, 5, 1, 4, 2];

    let generic = compute_matrix(&GenericEnergy, &physics, &samplers, &mapping, &states).unwrap();
    let linear =
        compute_matrix(&TemperatureLinearEnergy, &physics, &samplers, &mapping, &states).unwrap();

    assert_eq!(generic.n_replicas(), 6);
    assert_eq!(generic.n_states(), 6);
    assert!(generic.max_relative_difference(&linear).unwrap() < 1e-5);
}

#[test]
fn temperature_linear_includes_pressure_volume_work() {
    let physics = ReferencePhysics::new();
    let barostatted = system(3).with_barostat(Barostat {
        pressure: 1.0,
        temperature: 300.0,
        frequency: 25,
        seed: 9,
    });
    let mut states = parallel_tempering_states(
        &barostatted,
        &LadderPolicy::Geometric {
            t_min: 300.0,
            t_max: 450.0,
            n_temps: 3,
        },
        Some(1.0),
    )
    .unwrap();
    ExchangeVariant::TemperatureLinear
        .validate(&mut states)
        .unwrap();

    let samplers: Vec<SamplerState> = samplers(3, 3)
        .into_iter()
        .enumerate()
        .map(|(replica, sampler)| {
            let edge = 3.0 + 0.1 * replica as f64;
            sampler.with_box_vectors([[edge, 0.0, 0.0], [0.0, edge, 0.0], [0.0, 0.0, edge]])
        })
        .collect();
    let mapping = vec![0, 1, 2];

    let generic = compute_matrix(&GenericEnergy, &physics, &samplers, &mapping, &states).unwrap();
    let linear =
        compute_matrix(&TemperatureLinearEnergy, &physics, &samplers, &mapping, &states).unwrap();
    assert!(generic.max_relative_difference(&linear).unwrap() < 1e-5);

    let potential = physics.potential_energy(&samplers[0], &states[0]).unwrap();
    assert!(linear.get(0, 0) > states[0].beta() * potential);
}

#[test]
fn cached_potential_energy_is_reused() {
    let physics = ReferencePhysics::new();
    let states = parallel_tempering_states(
        &system(2),
        &LadderPolicy::Manual {
            temperatures: vec![300.0, 360.0],
        },
        None,
    )
    .unwrap();
    let mut sampler = samplers(1, 2).remove(0);
    sampler.potential_energy = Some(42.0);

    let linear = compute_matrix(
        &TemperatureLinearEnergy,
        &physics,
        std::slice::from_ref(&sampler),
        &[0],
        &states,
    )
    .unwrap();
    assert!((linear.get(0, 1) - states[1].beta() * 42.0).abs() < 1e-12);
}

#[test]
fn variants_pick_their_computer() {
    assert_eq!(
        ExchangeVariant::TemperatureLinear.energy_computer().name(),
        "temperature-linear"
    );
    assert_eq!(ExchangeVariant::FixedTemperature.energy_computer().name(), "generic");
    assert_eq!(ExchangeVariant::Generic.energy_computer().name(), "generic");
}
