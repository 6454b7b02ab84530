use kinetis_clock_tree::clocks::search::{
    FllLimits, FrdivSearch, HIGH_RANGE_DIVISORS, LOW_RANGE_DIVISORS, PllLimits, find_divisor, search_pll,
};
use proptest::prelude::*;

proptest! {
    #[test]
    fn chosen_divisor_is_legal_and_nearest(
        input in 1_000_000_i64..200_000_000,
        target in 0_i64..200_000_000,
        max in 1_000_000_i64..150_000_000,
    ) {
        let search = find_divisor(input, target, (1..=16).rev(), |_, f| f <= max);
        for &(divisor, frequency) in &search.candidates {
            prop_assert_eq!(frequency, input / i64::from(divisor));
            prop_assert!(frequency <= max);
        }
        match search.nearest {
            Some(nearest) => {
                prop_assert!(search.found());
                prop_assert_eq!(nearest, input / i64::from(search.divisor));
                let best = search.candidates.iter().map(|(_, f)| f.abs_diff(target)).min();
                prop_assert_eq!(best, Some(nearest.abs_diff(target)));
                // Ties go to the first candidate enumerated.
                let first = search.candidates.iter().find(|(_, f)| f.abs_diff(target) == nearest.abs_diff(target));
                prop_assert_eq!(first.map(|(d, _)| *d), Some(search.divisor));
            }
            None => {
                prop_assert!(!search.found());
                prop_assert!(search.candidates.is_empty());
            }
        }
    }

    #[test]
    fn pll_settings_stay_in_their_windows(input in 100_000_i64..50_000_000, target in 40_000_000_i64..130_000_000) {
        let limits = PllLimits::default();
        let search = search_pll(input, target, &limits);
        prop_assert!((limits.prdiv_min..=limits.prdiv_max).contains(&search.prdiv));
        prop_assert!((limits.vdiv_min..=limits.vdiv_max).contains(&search.vdiv));
        for &frequency in &search.frequencies {
            prop_assert!((limits.out_min..=limits.out_max).contains(&frequency));
        }
        if search.input_valid {
            prop_assert!((limits.in_min..=limits.in_max).contains(&search.input));
            prop_assert!(search.nearest.is_some());
        } else {
            prop_assert_eq!((search.prdiv, search.vdiv), (limits.prdiv_min, limits.vdiv_min));
            prop_assert!(search.frequencies.is_empty());
            prop_assert!(!search.output_valid);
        }
        if search.output_valid {
            let nearest = search.nearest.unwrap_or_default();
            prop_assert!(nearest.abs_diff(target) < (target / 50).unsigned_abs());
        }
    }

    #[test]
    fn accepted_fll_reference_is_in_the_window(input in 1_000_i64..60_000_000, narrow in any::<bool>()) {
        let limits = FllLimits::default();
        let (min, max) = limits.window(narrow);
        let mut search = FrdivSearch::new((min, max));
        if search.probe(input, &LOW_RANGE_DIVISORS).is_none() {
            search.probe(input, &HIGH_RANGE_DIVISORS);
        }
        if search.found() {
            prop_assert!(search.frequency() >= min as f64 && search.frequency() <= max as f64);
        } else {
            prop_assert!(search.frequency() < min as f64 || search.frequency() > max as f64);
        }
    }
}
