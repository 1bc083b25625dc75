//! Invariants of the registry under arbitrary discovery traffic

mod helpers;

use std::collections::HashSet;

use helpers::{discovered, registry, MockOps};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Advertise(u8, u32),
    ByeBye(u8),
    Tick(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 1u32..200).prop_map(|(n, expires)| Op::Advertise(n, expires)),
        (0u8..6).prop_map(Op::ByeBye),
        (1u8..60).prop_map(Op::Tick),
    ]
}

fn udn(n: u8) -> String {
    format!("uuid:tv-{}", n)
}

proptest! {
    #[test]
    fn udns_stay_unique(ops in proptest::collection::vec(op(), 1..40)) {
        let mock = MockOps::new();
        let (registry, _) = registry(&mock);

        for op in ops {
            match op {
                Op::Advertise(n, expires) => {
                    registry.add_or_refresh(discovered(&udn(n)), expires);
                }
                Op::ByeBye(n) => {
                    registry.remove(&udn(n));
                }
                Op::Tick(incr) => {
                    registry.verify_timeouts(i64::from(incr));
                }
            }

            let udns = registry.udns();
            let distinct: HashSet<_> = udns.iter().collect();
            prop_assert_eq!(distinct.len(), udns.len());
        }
    }

    #[test]
    fn surviving_devices_have_time_left(
        expires in proptest::collection::vec(1u32..300, 1..8),
        incr in 1i64..120,
    ) {
        let mock = MockOps::new();
        let (registry, _) = registry(&mock);
        for (i, secs) in expires.iter().enumerate() {
            registry.add_or_refresh(discovered(&udn(i as u8)), *secs);
        }

        let report = registry.verify_timeouts(incr);

        for devnum in 1..=registry.len() {
            prop_assert!(registry.device(devnum).unwrap().advr_timeout > 0);
        }
        let expected_expired = expires.iter().filter(|s| i64::from(**s) <= incr).count();
        prop_assert_eq!(report.expired.len(), expected_expired);
        prop_assert_eq!(mock.searches.lock().len(), report.renewing.len());
    }
}
