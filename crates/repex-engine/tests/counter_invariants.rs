use proptest::prelude::*;
use repex_core::RngHandle;

use repex_engine::{EnergyMatrix, ExchangeCounters, ExchangeProtocol, MixingScheme};

fn scenario() -> impl Strategy<Value = (Vec<Vec<f64>>, Vec<usize>, u64)> {
    (2usize..7).prop_flat_map(|n| {
        (
            prop::collection::vec(prop::collection::vec(-40.0f64..40.0, n), n),
            Just((0..n).collect::<Vec<usize>>()).prop_shuffle(),
            any::<u64>(),
        )
    })
}

fn is_permutation(mapping: &[usize]) -> bool {
    let mut sorted = mapping.to_vec();
    sorted.sort_unstable();
    sorted.iter().enumerate().all(|(index, value)| index == *value)
}

proptest! {
    #[test]
    fn repeated_mixing_keeps_counters_consistent(
        (rows, start, seed) in scenario(),
        scheme in prop_oneof![Just(MixingScheme::SwapAll), Just(MixingScheme::SwapNeighbors)],
    ) {
        let n = rows.len();
        let energies = EnergyMatrix::from_rows(rows).unwrap();
        let protocol = ExchangeProtocol::new(scheme);
        let mut rng = RngHandle::from_seed(seed);
        let mut mapping = start;
        let mut totals = ExchangeCounters::zeros(n);
        let per_phase = match scheme {
            MixingScheme::SwapAll => n as u64,
            _ => n as u64 - 1,
        };

        for _ in 0..12 {
            let before = totals.clone();
            let outcome = protocol.mix(&energies, &mapping, &mut rng);
            prop_assert!(is_permutation(&outcome.replica_states));
            prop_assert_eq!(outcome.delta.total_proposed(), per_phase);
            totals.accumulate(&outcome.delta);
            for k in 0..n {
                prop_assert_eq!(totals.proposed[k][k], 0);
                for l in 0..n {
                    prop_assert!(totals.proposed[k][l] >= before.proposed[k][l]);
                    prop_assert!(totals.accepted[k][l] >= before.accepted[k][l]);
                    prop_assert!(totals.accepted[k][l] <= totals.proposed[k][l]);
                    prop_assert_eq!(totals.proposed[k][l], totals.proposed[l][k]);
                    prop_assert_eq!(totals.accepted[k][l], totals.accepted[l][k]);
                }
            }
            mapping = outcome.replica_states;
        }
    }

    #[test]
    fn flat_energies_accept_every_proposal((_, start, seed) in scenario()) {
        let n = start.len();
        let energies = EnergyMatrix::zeros(n, n);
        let protocol = ExchangeProtocol::new(MixingScheme::SwapAll);
        let outcome = protocol.mix(&energies, &start, &mut RngHandle::from_seed(seed));
        prop_assert_eq!(outcome.delta.total_accepted(), outcome.delta.total_proposed());
        prop_assert!(is_permutation(&outcome.replica_states));
    }

    #[test]
    fn none_scheme_is_the_identity((rows, start, seed) in scenario()) {
        let energies = EnergyMatrix::from_rows(rows).unwrap();
        let outcome = ExchangeProtocol::new(MixingScheme::None)
            .mix(&energies, &start, &mut RngHandle::from_seed(seed));
        prop_assert_eq!(&outcome.replica_states, &start);
        prop_assert_eq!(outcome.delta.total_proposed(), 0);
    }
}
