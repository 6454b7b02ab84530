use kinetis_clock_tree::{Error, Severity, Status, Variable, templates};
use proptest::prelude::*;

/// OSC0 through the MCG to the SIM, upstream first.
const PEE_CHAIN: [&str; 6] = [
    "/OSC0/osc_clock",
    "/MCG/pll0InputFrequency[0]",
    "/MCG/system_mcgoutclk_clock[0]",
    "/SIM/system_core_clock[0]",
    "/SIM/system_bus_clock[0]",
    "/SIM/system_flash_clock[0]",
];

/// Severity and enable state along the chain of a PEE-mode K device fitted with `crystal`.
fn pee_chain(crystal: i64) -> Result<Vec<(Severity, bool)>, Error> {
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;
    device.set("/OSC0/osc_input_freq", crystal)?;
    PEE_CHAIN
        .iter()
        .map(|key| -> Result<_, Error> {
            let variable = device.get(key)?;
            Ok((Status::severity_of(variable.status()), variable.is_enabled()))
        })
        .collect()
}

fn severity() -> impl Strategy<Value = Severity> {
    prop_oneof![
        Just(Severity::Ok),
        Just(Severity::Info),
        Just(Severity::Warning),
        Just(Severity::Error),
    ]
}

fn status() -> impl Strategy<Value = Option<Status>> {
    proptest::option::of((severity(), "[a-z ]{0,12}").prop_map(|(severity, text)| Status::new(text, severity)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn crystal_errors_reach_every_enabled_downstream_clock(crystal in 40_001_i64..3_000_000) {
        let chain = pee_chain(crystal).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let (upstream, _) = chain[0];
        prop_assert_eq!(upstream, Severity::Error);
        for (key, &(severity, enabled)) in PEE_CHAIN.iter().zip(&chain).skip(1) {
            if enabled {
                prop_assert!(severity >= upstream, "{} dropped to {:?}", key, severity);
            }
        }
    }
}

proptest! {
    #[test]
    fn worst_never_hides_a_more_severe_status(a in status(), b in status()) {
        let expected = Status::severity_of(a.as_ref()).max(Status::severity_of(b.as_ref()));
        let worst = Status::worst(a.clone(), b.clone());
        prop_assert_eq!(Status::severity_of(worst.as_ref()), expected);
        prop_assert!(worst == a || worst == b);
    }

    #[test]
    fn folding_statuses_is_order_independent_in_severity(statuses in proptest::collection::vec(status(), 0..8)) {
        let forward = statuses.iter().cloned().fold(None, Status::worst);
        let backward = statuses.iter().rev().cloned().fold(None, Status::worst);
        prop_assert_eq!(
            Status::severity_of(forward.as_ref()),
            Status::severity_of(backward.as_ref())
        );
    }

    #[test]
    fn clamped_values_land_in_bounds(min in -1_000_i64..1_000, span in 0_i64..10_000, value in -20_000_i64..20_000) {
        let max = min + span;
        let mut variable = Variable::long("ldval", min).with_bounds(min, max);
        variable.set_long(value).map_err(|e| TestCaseError::fail(e.to_string()))?;
        let clamped = variable.apply_bounds().map_err(|e| TestCaseError::fail(e.to_string()))?;
        let stored = variable.as_long().map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert!((min..=max).contains(&stored));
        prop_assert_eq!(clamped, value != stored);
        let flagged = variable.status().map(Status::severity) == Some(Severity::Warning);
        prop_assert_eq!(flagged, value != stored);
    }
}
