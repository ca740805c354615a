use control_loop::{DecisionPolicy, HysteresisState};
use proptest::prelude::*;
use types::{OperatingMode, PowerSample};

fn any_mode() -> impl Strategy<Value = OperatingMode> {
    prop_oneof![Just(OperatingMode::Normal), Just(OperatingMode::PvSurplus)]
}

fn any_state() -> impl Strategy<Value = HysteresisState> {
    (any_mode(), any::<u32>()).prop_map(|(mode, held_cycles)| HysteresisState { mode, held_cycles })
}

fn any_policy() -> impl Strategy<Value = DecisionPolicy> {
    (0u32..5_000, 0u32..5_000).prop_map(|(surplus, import)| DecisionPolicy::new(surplus, import))
}

proptest! {
    #[test]
    fn surplus_beyond_threshold_always_requests_pv_surplus(
        policy in any_policy(),
        prior in any_state(),
        extra in 1i32..100_000,
    ) {
        let watts = -(policy.surplus_threshold_w as i32) - extra;
        let (command, next) = policy.decide(PowerSample::from_watts(watts), prior);
        prop_assert_eq!(command.mode, OperatingMode::PvSurplus);
        prop_assert_eq!(command.excess_w, -watts);
        prop_assert_eq!(next.mode, OperatingMode::PvSurplus);
    }

    #[test]
    fn import_beyond_threshold_always_requests_normal(
        policy in any_policy(),
        prior in any_state(),
        extra in 1i32..100_000,
    ) {
        let watts = policy.import_threshold_w as i32 + extra;
        let (command, next) = policy.decide(PowerSample::from_watts(watts), prior);
        prop_assert_eq!(command.mode, OperatingMode::Normal);
        prop_assert_eq!(command.excess_w, -watts);
        prop_assert_eq!(next.mode, OperatingMode::Normal);
    }

    #[test]
    fn dead_band_samples_keep_prior_mode(
        policy in any_policy(),
        prior in any_state(),
        position in 0.0f64..=1.0,
        repeats in 1usize..10,
    ) {
        let low = -(policy.surplus_threshold_w as i64);
        let high = policy.import_threshold_w as i64;
        let watts = (low as f64 + (high - low) as f64 * position).round() as i32;

        let mut state = prior;
        for _ in 0..repeats {
            let (command, next) = policy.decide(PowerSample::from_watts(watts), state);
            prop_assert_eq!(command.mode, prior.mode);
            state = next;
        }
        prop_assert_eq!(state.mode, prior.mode);
    }
}
