//! Constrained divisor and multiplier searches shared by the clock-generation units.
//!
//! Every search returns both the chosen setting and the complete set of legal alternatives, so
//! callers can show the user what the hardware is able to produce.

use std::collections::{BTreeSet, HashSet};

use crate::{notation, util::round_i64};

/// Outcome of a single-stage divisor search.
#[derive(Clone, Debug, PartialEq)]
pub struct DivisorSearch {
    /// Chosen divisor, or 0 when no divisor is legal. 0 is never a usable divisor, so callers
    /// treat it as "leave the field alone".
    pub divisor: u32,
    /// Frequency produced by `divisor`.
    pub nearest: Option<i64>,
    /// Every legal `(divisor, frequency)` pair, in search order.
    pub candidates: Vec<(u32, i64)>,
    /// Tooltip listing the distinct legal frequencies.
    pub display: String,
}

impl DivisorSearch {
    pub fn found(&self) -> bool {
        self.divisor != 0
    }
}

/// Divide `input` by each of `divisors` (conventionally largest first) and pick the legal
/// divisor whose output is nearest `target`. On a tie, the first candidate wins.
///
/// `ok(divisor, frequency)` decides legality. Division is integer division, as the hardware does.
pub fn find_divisor<I, F>(input: i64, target: i64, divisors: I, mut ok: F) -> DivisorSearch
where
    I: IntoIterator<Item = u32>,
    F: FnMut(u32, i64) -> bool,
{
    let mut display = String::from("Possible values:");
    let mut shown = HashSet::new();
    let mut candidates = Vec::new();
    let mut best: Option<(u32, i64)> = None;

    for divisor in divisors.into_iter().filter(|d| *d != 0) {
        let frequency = input / i64::from(divisor);
        if !ok(divisor, frequency) {
            continue;
        }
        if candidates.len() == 7 {
            display.push('\n');
        }
        candidates.push((divisor, frequency));

        let text = notation::format(frequency as f64, 3);
        if shown.insert(text.clone()) {
            display.push_str(&format!(" {text}Hz"));
        }
        let closer = match best {
            None => true,
            Some((_, nearest)) => target.abs_diff(frequency) < target.abs_diff(nearest),
        };
        if closer {
            best = Some((divisor, frequency));
        }
    }

    DivisorSearch {
        divisor: best.map_or(0, |(d, _)| d),
        nearest: best.map(|(_, f)| f),
        candidates,
        display,
    }
}

/// PLL stage limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct PllLimits {
    /// Legal range of the reference after the pre-divider, in Hz.
    pub in_min: i64,
    pub in_max: i64,
    /// Legal range of the PLL output, in Hz.
    pub out_min: i64,
    pub out_max: i64,
    pub prdiv_min: u32,
    pub prdiv_max: u32,
    pub vdiv_min: u32,
    pub vdiv_max: u32,
    /// Fixed divider after the VCO.
    pub post_div: u32,
}

impl Default for PllLimits {
    /// K64-class MCG PLL: 2-4MHz reference, 48-120MHz output, PRDIV 1-25, VDIV 24-55.
    fn default() -> Self {
        Self {
            in_min: 2_000_000,
            in_max: 4_000_000,
            out_min: 48_000_000,
            out_max: 120_000_000,
            prdiv_min: 1,
            prdiv_max: 25,
            vdiv_min: 24,
            vdiv_max: 55,
            post_div: 1,
        }
    }
}

/// Outcome of a two-stage PLL search.
#[derive(Clone, Debug, PartialEq)]
pub struct PllSearch {
    pub prdiv: u32,
    pub vdiv: u32,
    /// Reference after the chosen pre-divider.
    pub input: i64,
    /// Some pre-divider brought the reference into the legal window.
    pub input_valid: bool,
    /// Some setting lands within 2% of the target.
    pub output_valid: bool,
    pub nearest: Option<i64>,
    /// Every legal output frequency, ascending.
    pub frequencies: BTreeSet<i64>,
}

impl PllSearch {
    /// Comma separated list of the legal outputs, wrapped every eleven values.
    pub fn possible_values(&self) -> String {
        let mut text = String::from("Possible values = \n");
        let mut line_count = -1;
        for (i, frequency) in self.frequencies.iter().enumerate() {
            if i > 0 {
                text.push_str(", ");
            }
            if line_count >= 10 {
                text.push('\n');
                line_count = 0;
            } else {
                line_count += 1;
            }
            text.push_str(&notation::hz(*frequency as f64));
        }
        text
    }
}

/// Search pre-divider and multiplier for the output nearest `target`.
///
/// The pre-divider loop skips settings whose reference is too high and stops at the first one
/// that is too low. The multiplier loop skips outputs below the window and stops above it. When
/// nothing is legal the dividers stay at their minimums.
pub fn search_pll(input: i64, target: i64, limits: &PllLimits) -> PllSearch {
    let mut search = PllSearch {
        prdiv: limits.prdiv_min,
        vdiv: limits.vdiv_min,
        input: 0,
        input_valid: false,
        output_valid: false,
        nearest: None,
        frequencies: BTreeSet::new(),
    };
    let post_div = f64::from(limits.post_div.max(1));

    for prdiv in limits.prdiv_min.max(1)..=limits.prdiv_max {
        let reference = input / i64::from(prdiv);
        if reference > limits.in_max {
            continue;
        }
        if reference < limits.in_min {
            break;
        }
        search.input_valid = true;

        for vdiv in limits.vdiv_min..=limits.vdiv_max {
            let output = round_i64(f64::from(vdiv) * reference as f64 / post_div);
            if output < limits.out_min {
                continue;
            }
            if output > limits.out_max {
                break;
            }
            search.frequencies.insert(output);
            let closer = search
                .nearest
                .is_none_or(|nearest| output.abs_diff(target) < nearest.abs_diff(target));
            if closer {
                search.nearest = Some(output);
                search.prdiv = prdiv;
                search.vdiv = vdiv;
            }
            if output.abs_diff(target) < (target / 50).unsigned_abs() {
                search.output_valid = true;
            }
        }
    }
    search.input = input / i64::from(search.prdiv.max(1));
    search
}

/// FLL reference dividers with the oscillator in low range.
pub const LOW_RANGE_DIVISORS: [u32; 8] = [1, 2, 4, 8, 16, 32, 64, 128];
/// FLL reference dividers with the oscillator in high or very high range.
pub const HIGH_RANGE_DIVISORS: [u32; 8] = [32, 64, 128, 256, 512, 1024, 1280, 1536];

/// FLL stage limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct FllLimits {
    /// Reference window in the default (wide) mode.
    pub wide_min: i64,
    pub wide_max: i64,
    /// Reference window with DMX32 set, around 32.768kHz.
    pub narrow_min: i64,
    pub narrow_max: i64,
    pub wide_factor: i64,
    pub narrow_factor: i64,
    /// Highest DRST_DRS range selection.
    pub drs_max: u32,
}

impl Default for FllLimits {
    /// MCG FLL: 31.25-39.0625kHz reference (32.768kHz +-100Hz with DMX32), x640 or x732 per
    /// DRS step, four DRS ranges.
    fn default() -> Self {
        Self {
            wide_min: 31_250,
            wide_max: 39_063,
            narrow_min: 32_768 - 100,
            narrow_max: 32_768 + 100,
            wide_factor: 640,
            narrow_factor: 732,
            drs_max: 3,
        }
    }
}

impl FllLimits {
    pub fn window(&self, narrow: bool) -> (i64, i64) {
        if narrow {
            (self.narrow_min, self.narrow_max)
        } else {
            (self.wide_min, self.wide_max)
        }
    }

    pub fn factor(&self, narrow: bool) -> i64 {
        if narrow {
            self.narrow_factor
        } else {
            self.wide_factor
        }
    }
}

/// Reference-divider search for an FLL. Several divider tables may be probed in turn; the
/// nearest miss is remembered across them.
#[derive(Clone, Debug, PartialEq)]
pub struct FrdivSearch {
    window: (i64, i64),
    nearest_error: f64,
    nearest_frequency: f64,
    nearest_index: u32,
    found: Option<(u32, f64)>,
}

impl FrdivSearch {
    pub fn new(window: (i64, i64)) -> Self {
        Self {
            window,
            nearest_error: f64::MAX,
            nearest_frequency: 0.0,
            nearest_index: 0,
            found: None,
        }
    }

    /// Walk `table` in order. The first divider landing in the window wins and is returned as
    /// its table index.
    pub fn probe(&mut self, input: i64, table: &[u32]) -> Option<u32> {
        let (min, max) = (self.window.0 as f64, self.window.1 as f64);
        for (index, divisor) in (0_u32..).zip(table) {
            let frequency = input as f64 / f64::from(*divisor);
            let error = if frequency < min {
                min - frequency
            } else if frequency > max {
                frequency - max
            } else {
                self.found = Some((index, frequency));
                self.nearest_error = 0.0;
                self.nearest_frequency = frequency;
                self.nearest_index = index;
                return Some(index);
            };
            if error < self.nearest_error {
                self.nearest_error = error;
                self.nearest_frequency = frequency;
                self.nearest_index = index;
            }
        }
        None
    }

    pub fn found(&self) -> bool {
        self.found.is_some()
    }

    /// Table index of the accepted divider, or of the nearest miss.
    pub fn index(&self) -> u32 {
        self.found.map_or(self.nearest_index, |(i, _)| i)
    }

    /// Reference frequency after the accepted divider, or after the nearest miss.
    pub fn frequency(&self) -> f64 {
        self.found.map_or(self.nearest_frequency, |(_, f)| f)
    }
}

/// Outcome of the FLL output (DRS) search.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FllOutput {
    /// Reference times the fixed FLL factor.
    pub base: i64,
    /// `base * 1 ..= base * (drs_max + 1)`.
    pub frequencies: Vec<i64>,
    /// Chosen DRS setting. The last range within 10% of the target wins.
    pub drs: Option<u32>,
}

impl FllOutput {
    pub fn frequency(&self) -> i64 {
        self.base * (i64::from(self.drs.unwrap_or(0)) + 1)
    }

    pub fn possible_values(&self) -> String {
        let values = self
            .frequencies
            .iter()
            .map(|f| notation::format(*f as f64, 5) + "Hz")
            .collect::<Vec<_>>();
        format!("Possible values = {}", values.join(", "))
    }
}

/// Pick the DRS range that brings the FLL output within 10% of `target`.
pub fn search_fll_output(reference: i64, target: i64, narrow: bool, limits: &FllLimits) -> FllOutput {
    let base = reference * limits.factor(narrow);
    let mut output = FllOutput {
        base,
        frequencies: Vec::new(),
        drs: None,
    };
    for drs in 0..=limits.drs_max {
        let frequency = base * (i64::from(drs) + 1);
        output.frequencies.push(frequency);
        if frequency.abs_diff(target) < (target / 10).unsigned_abs() {
            output.drs = Some(drs);
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sim_divisors() -> impl Iterator<Item = u32> {
        (1..=16).rev()
    }

    #[test]
    fn nearest_divisor_and_display() {
        let core = find_divisor(48_000_000, 48_000_000, sim_divisors(), |_, f| f <= 120_000_000);
        assert_eq!(core.divisor, 1);
        assert_eq!(core.nearest, Some(48_000_000));
        assert_eq!(core.candidates.len(), 16);
        assert!(core.display.starts_with("Possible values: 3.00MHz 3.20MHz"));
        assert!(core.display.contains(" 4.80MHz\n 5.33MHz"));

        // Bus: integer multiple of the core divisor, at most 8 times it.
        let bus = find_divisor(48_000_000, 24_000_000, sim_divisors(), |d, f| {
            f <= 60_000_000 && d % core.divisor == 0 && d / core.divisor <= 8
        });
        assert_eq!(bus.divisor, 2);
        assert_eq!(bus.nearest, Some(24_000_000));
        assert_eq!(bus.candidates.len(), 8);
    }

    #[test]
    fn no_legal_divisor_is_a_sentinel() {
        let search = find_divisor(48_000_000, 24_000_000, sim_divisors(), |_, f| f > 100_000_000);
        assert!(!search.found());
        assert_eq!(search.nearest, None);
        assert!(search.candidates.is_empty());
        assert_eq!(search.display, "Possible values:");
    }

    #[test]
    fn ties_keep_first_candidate() {
        // 30MHz and 10MHz are equally far from 20MHz; 10MHz (divisor 6) is enumerated first.
        let search = find_divisor(60_000_000, 20_000_000, [6, 2], |_, _| true);
        assert_eq!(search.divisor, 6);
    }

    #[test]
    fn pll_finds_exact_output() {
        let search = search_pll(8_000_000, 48_000_000, &PllLimits::default());
        assert!(search.input_valid && search.output_valid);
        assert_eq!(search.nearest, Some(48_000_000));
        assert_eq!((search.prdiv, search.vdiv), (4, 24));
        assert_eq!(search.input, 2_000_000);
        assert!(search.frequencies.contains(&120_000_000));
    }

    #[test]
    fn pll_reference_too_low_stops_search() {
        let limits = PllLimits {
            in_min: 8_000_000,
            in_max: 32_000_000,
            ..PllLimits::default()
        };
        let search = search_pll(4_000_000, 48_000_000, &limits);
        assert!(!search.input_valid);
        assert!(!search.output_valid);
        assert_eq!((search.prdiv, search.vdiv), (limits.prdiv_min, limits.vdiv_min));
        assert!(search.frequencies.is_empty());
    }

    #[test]
    fn pll_value_list_wraps() {
        let search = search_pll(8_000_000, 100_000_000, &PllLimits::default());
        let text = search.possible_values();
        assert!(text.starts_with("Possible values = \n"));
        assert!(text.matches('\n').count() > 2);
    }

    #[test]
    fn fll_narrow_band_from_slow_irc() {
        let limits = FllLimits::default();
        let mut frdiv = FrdivSearch::new(limits.window(true));
        assert_eq!(frdiv.probe(32_768, &LOW_RANGE_DIVISORS), Some(0));
        assert_eq!(frdiv.frequency(), 32_768.0);

        let output = search_fll_output(32_768, 24_000_000, true, &limits);
        assert_eq!(output.drs, Some(0));
        assert_eq!(output.frequency(), 23_986_176);
        assert_eq!(output.frequencies.len(), 4);
        assert!(output.possible_values().starts_with("Possible values = 23.986MHz, 47.972MHz"));
    }

    #[test]
    fn fll_divider_from_crystal() {
        let limits = FllLimits::default();
        let mut frdiv = FrdivSearch::new(limits.window(false));
        // 8MHz / 256 = 31.25kHz, index 3 of the high range table.
        assert_eq!(frdiv.probe(8_000_000, &LOW_RANGE_DIVISORS), None);
        assert_eq!(frdiv.probe(8_000_000, &HIGH_RANGE_DIVISORS), Some(3));
        assert_eq!(frdiv.index(), 3);
    }

    #[test]
    fn fll_nearest_miss_is_kept() {
        let mut frdiv = FrdivSearch::new(FllLimits::default().window(false));
        assert_eq!(frdiv.probe(100_000_000, &HIGH_RANGE_DIVISORS), None);
        // 100MHz / 1536 is the closest the table gets.
        assert_eq!(frdiv.index(), 7);
        assert!(frdiv.frequency() > 39_063.0);
    }

    #[test]
    fn fll_output_out_of_reach() {
        let output = search_fll_output(32_768, 5_000_000, false, &FllLimits::default());
        assert_eq!(output.drs, None);
        assert_eq!(output.frequency(), 20_971_520);
    }
}
