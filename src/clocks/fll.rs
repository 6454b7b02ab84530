//! FLL stage of the MCG: reference divider (FRDIV) selection, oscillator range arbitration and
//! DCO range (DRS) selection for a target output frequency.

use crate::{
    Result,
    clocks::{
        Clock,
        search::{FllLimits, FrdivSearch, HIGH_RANGE_DIVISORS, LOW_RANGE_DIVISORS, search_fll_output},
    },
    notation,
    util::round_i64,
    validator::{Context, Family, WatchContext},
    variable::{Severity, Status},
};

/// Inputs of the FLL stage for one clock configuration.
#[derive(Clone, Debug)]
pub struct FllReference<'a> {
    /// Internal (slow IRC) reference selected.
    pub irefs: bool,
    pub oscsel: i64,
    /// Oscillator external reference enabled.
    pub erclken: bool,
    /// Range chosen by the oscillator, with its origin.
    pub osc_range: i64,
    pub range_origin: String,
    pub erc: &'a Clock,
    pub slow_irc: i64,
    /// DMX32: narrow 32.768kHz reference window.
    pub narrow: bool,
}

/// What the FLL stage produced.
#[derive(Clone, Debug, PartialEq)]
pub struct FllResult {
    /// FLL reference after FRDIV, as written to the FLL input variable.
    pub reference: Clock,
    /// FLL output. The frequency is the target, snapped to a reachable value when one exists.
    pub output: Clock,
}

/// Probe the low range table, then the high range one. Returns the range used.
fn probe_either(search: &mut FrdivSearch, available: i64) -> i64 {
    if search.probe(available, &LOW_RANGE_DIVISORS).is_some() {
        return 0;
    }
    search.probe(available, &HIGH_RANGE_DIVISORS);
    1
}

/// Handles of the FLL variables.
#[derive(Clone, Debug)]
pub struct FllStage {
    limits: FllLimits,
    input: Family,
    target: Family,
    frdiv: Family,
    drs: Family,
    range: Family,
}

impl FllStage {
    /// Resolve the FLL variables. The output target is user-editable, so it is watched.
    pub fn watch(ctx: &mut WatchContext<'_>, dimension: usize, limits: FllLimits) -> Result<Self> {
        Ok(Self {
            limits,
            input: ctx.family("fllInputFrequency[]", dimension)?,
            target: ctx.watch_family("system_mcgfllclk_clock[]", dimension)?,
            frdiv: ctx.family("mcg_c1_frdiv[]", dimension)?,
            drs: ctx.family("mcg_c4_drst_drs[]", dimension)?,
            range: ctx.family("mcg_c2_range0[]", dimension)?,
        })
    }

    pub fn target(&self) -> &Family {
        &self.target
    }

    pub fn input(&self) -> &Family {
        &self.input
    }

    pub fn drs(&self) -> &Family {
        &self.drs
    }

    fn write_fields(
        &self,
        ctx: &mut Context<'_>,
        index: usize,
        frdiv: u32,
        drs: u32,
        range: i64,
        range_origin: String,
    ) -> Result<()> {
        ctx.set_value(self.frdiv.at(index), frdiv)?;
        ctx.set_value(self.drs.at(index), drs)?;
        ctx.set_value(self.range.at(index), range)?;
        ctx.set_origin(self.range.at(index), range_origin)
    }

    /// Run the stage for configuration `index`. Writes the FLL input, FRDIV, DRS and the range
    /// field; the output is returned for the caller to gate and write.
    pub fn configure(
        &self,
        ctx: &mut Context<'_>,
        index: usize,
        reference: &FllReference<'_>,
    ) -> Result<FllResult> {
        let (available, origin, upstream) = if reference.irefs {
            (reference.slow_irc, String::from("Slow internal reference clock"), None)
        } else {
            (
                reference.erc.frequency,
                reference.erc.origin.clone(),
                reference.erc.status.clone(),
            )
        };
        let target = ctx.long(self.target.at(index))?;
        let mut osc_range = reference.osc_range;
        let mut range_origin = reference.range_origin.clone();

        if let Some(upstream) = upstream.filter(|s| s.greater_than(Severity::Ok)) {
            let invalid = Status::warning(format!("{}: Invalid FLL input", upstream.text()));
            self.write_fields(ctx, index, 0, 0, osc_range.max(0), range_origin)?;
            let input = Clock::new(available, origin.clone()).with_status(invalid.clone());
            input.write(ctx, self.input.at(index))?;
            return Ok(FllResult {
                output: Clock::new(target, format!("{origin} via FLL")).with_status(invalid),
                reference: input,
            });
        }

        let mut search = FrdivSearch::new(self.limits.window(reference.narrow));
        let scaling;
        if reference.irefs {
            search.probe(available, &LOW_RANGE_DIVISORS);
            scaling = "";
            osc_range = osc_range.max(0);
        } else if reference.oscsel == 1 {
            search.probe(available, &LOW_RANGE_DIVISORS);
            scaling = " after scaling by (Low range FRDIV)";
            osc_range = osc_range.max(0);
        } else if reference.oscsel != 0 && !reference.erclken {
            osc_range = probe_either(&mut search, available);
            scaling = " after scaling (Low/High range FRDIV)";
            range_origin = String::from("Determined by FLL");
        } else {
            match osc_range {
                0 => {
                    search.probe(available, &LOW_RANGE_DIVISORS);
                    scaling = " after scaling (Low range FRDIV)";
                }
                1 | 2 => {
                    search.probe(available, &HIGH_RANGE_DIVISORS);
                    scaling = " after scaling (High range FRDIV)";
                }
                // Not constrained by the oscillator: the FLL picks the range.
                _ => {
                    osc_range = probe_either(&mut search, available);
                    scaling = " after scaling (Low/High range FRDIV)";
                    range_origin = String::from("Determined by FLL");
                }
            }
        }
        let origin = format!("{origin}{scaling}");
        let output_origin = format!("{origin} via FLL");

        if !search.found() {
            let warning = Status::warning(format!(
                "Unable to find suitable FLL divisor for input frequency of {}",
                notation::format(available as f64, 3)
            ));
            self.write_fields(ctx, index, search.index(), 0, osc_range, range_origin)?;
            let input = Clock::new(round_i64(search.frequency()), origin).with_status(warning.clone());
            input.write(ctx, self.input.at(index))?;
            return Ok(FllResult {
                output: Clock::new(target, output_origin).with_status(warning),
                reference: input,
            });
        }

        let input = Clock::new(round_i64(search.frequency()), origin);
        input.write(ctx, self.input.at(index))?;

        let fll = search_fll_output(input.frequency, target, reference.narrow, &self.limits);
        let (frequency, status) = match fll.drs {
            Some(_) => (fll.frequency(), Status::ok(fll.possible_values())),
            None => (
                target,
                Status::warning(format!(
                    "Not possible to generate desired FLL frequency from input clock\n{}",
                    fll.possible_values()
                )),
            ),
        };
        self.write_fields(
            ctx,
            index,
            search.index(),
            fll.drs.unwrap_or(0),
            osc_range,
            range_origin,
        )?;
        Ok(FllResult {
            output: Clock::new(frequency, output_origin).with_status(status),
            reference: input,
        })
    }
}
