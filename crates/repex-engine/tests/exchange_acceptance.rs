use proptest::prelude::*;
use repex_core::units::beta;
use repex_core::RngHandle;

use repex_engine::exchange::{
    accept, acceptance_probability, exchange_acceptance, swap_delta, ExchangeProtocol,
};
use repex_engine::{EnergyMatrix, MixingScheme};

fn tempering_matrix(potentials: &[f64], temperatures: &[f64]) -> EnergyMatrix {
    EnergyMatrix::from_rows(
        potentials
            .iter()
            .map(|u| temperatures.iter().map(|t| beta(*t) * u).collect())
            .collect(),
    )
    .unwrap()
}

#[test]
fn two_state_swap_pins_sign_and_magnitude() {
    let beta_0 = beta(300.0);
    let beta_1 = beta(400.0);
    let energies = tempering_matrix(&[100.0, 120.0], &[300.0, 400.0]);

    let delta = swap_delta(&energies, 0, 1, 0, 1);
    let expected = (beta_1 * 100.0 + beta_0 * 120.0) - (beta_0 * 100.0 + beta_1 * 120.0);
    assert!((delta - expected).abs() < 1e-12);
    // Moving the higher energy into the colder state is uphill.
    assert!(delta > 0.0);

    let probability = acceptance_probability(delta);
    assert!((probability - (-expected).exp()).abs() < 1e-12);
    assert!(probability > 0.13 && probability < 0.14);
    assert!(accept(delta, probability * 0.5));
    assert!(!accept(delta, probability * 1.5));
}

#[test]
fn protocol_decides_against_the_first_uniform_draw() {
    let energies = tempering_matrix(&[100.0, 120.0], &[300.0, 400.0]);
    let probability = acceptance_probability(swap_delta(&energies, 0, 1, 0, 1));
    let protocol = ExchangeProtocol::new(MixingScheme::SwapNeighbors);

    for seed in 0..32_u64 {
        let draw = RngHandle::from_seed(seed).uniform();
        let outcome = protocol.mix(&energies, &[0, 1], &mut RngHandle::from_seed(seed));
        let swapped = outcome.replica_states == vec![1, 0];
        assert_eq!(swapped, draw < probability, "seed {seed}");
        assert_eq!(outcome.delta.proposed[0][1], 1);
        assert_eq!(outcome.delta.proposed[1][0], 1);
        assert_eq!(outcome.delta.accepted[0][1], u64::from(swapped));
    }
}

#[test]
fn downhill_swap_is_always_accepted() {
    let energies = tempering_matrix(&[120.0, 100.0], &[300.0, 400.0]);
    let delta = swap_delta(&energies, 0, 1, 0, 1);
    assert!(delta < 0.0);
    assert_eq!(acceptance_probability(delta), 1.0);
    assert!(accept(delta, 0.999_999));
}

#[test]
fn nan_delta_is_rejected() {
    assert_eq!(acceptance_probability(f64::NAN), 0.0);
    assert!(!accept(f64::NAN, 0.0));
}

#[test]
fn no_mixing_leaves_mapping_and_counters_untouched() {
    let energies = tempering_matrix(&[1.0, 2.0, 3.0], &[300.0, 350.0, 400.0]);
    let outcome = ExchangeProtocol::new(MixingScheme::None).mix(
        &energies,
        &[2, 0, 1],
        &mut RngHandle::from_seed(3),
    );
    assert_eq!(outcome.replica_states, vec![2, 0, 1]);
    assert_eq!(outcome.delta.total_proposed(), 0);
}

#[test]
fn swap_all_makes_one_proposal_per_state() {
    let energies = tempering_matrix(&[10.0, 12.0, 15.0, 19.0], &[300.0, 330.0, 370.0, 420.0]);
    let outcome = ExchangeProtocol::new(MixingScheme::SwapAll).mix(
        &energies,
        &[0, 1, 2, 3],
        &mut RngHandle::from_seed(11),
    );
    assert_eq!(outcome.delta.total_proposed(), 4);
    for k in 0..4 {
        assert_eq!(outcome.delta.proposed[k][k], 0);
    }
}

#[test]
fn neighbour_scan_visits_every_adjacent_pair() {
    let energies = tempering_matrix(&[10.0, 12.0, 15.0, 19.0, 24.0], &[300.0, 320.0, 340.0, 360.0, 380.0]);
    let outcome = ExchangeProtocol::new(MixingScheme::SwapNeighbors).mix(
        &energies,
        &[0, 1, 2, 3, 4],
        &mut RngHandle::from_seed(5),
    );
    assert_eq!(outcome.delta.total_proposed(), 4);
    for k in 0..4 {
        assert_eq!(outcome.delta.proposed[k][k + 1], 1);
    }
    assert_eq!(outcome.delta.proposed[0][2], 0);
}

proptest! {
    #[test]
    fn generic_rule_matches_tempering_closed_form(
        t_k in 200.0f64..600.0,
        t_l in 200.0f64..600.0,
        u_i in -500.0f64..500.0,
        u_j in -500.0f64..500.0,
    ) {
        let energies = tempering_matrix(&[u_i, u_j], &[t_k, t_l]);
        let generic = acceptance_probability(swap_delta(&energies, 0, 1, 0, 1));
        let closed = exchange_acceptance(u_i, t_k, u_j, t_l);
        prop_assert!((generic - closed).abs() <= 1e-9 * closed.max(1e-300).max(generic));
        prop_assert!((0.0..=1.0).contains(&generic));
    }
}
