//! PLL stage of the MCG: pre-divider and multiplier search for a target output frequency.

use crate::{
    Result,
    clocks::{
        Clock,
        search::{PllLimits, search_pll},
    },
    notation,
    validator::{Context, Family, WatchContext},
    variable::{Severity, Status},
};

/// What the PLL stage produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PllResult {
    /// Reference after PRDIV.
    pub input: Clock,
    /// PLL output, snapped to the nearest reachable frequency when the target is reachable.
    pub output: Clock,
}

impl PllResult {
    /// Overall stage status, as carried by the output.
    pub fn status(&self) -> Option<&Status> {
        self.output.status.as_ref()
    }
}

/// Handles of the PLL variables.
#[derive(Clone, Debug)]
pub struct PllStage {
    limits: PllLimits,
    input: Family,
    target: Family,
    prdiv: Family,
    vdiv: Family,
}

impl PllStage {
    /// Resolve the PLL variables. The output target is user-editable, so it is watched.
    pub fn watch(ctx: &mut WatchContext<'_>, dimension: usize, limits: PllLimits) -> Result<Self> {
        Ok(Self {
            limits,
            input: ctx.family("pll0InputFrequency[]", dimension)?,
            target: ctx.watch_family("pll0OutputFrequency[]", dimension)?,
            prdiv: ctx.family("mcg_c5_prdiv0[]", dimension)?,
            vdiv: ctx.family("mcg_c6_vdiv0[]", dimension)?,
        })
    }

    pub fn input(&self) -> &Family {
        &self.input
    }

    pub fn target(&self) -> &Family {
        &self.target
    }

    pub fn prdiv(&self) -> &Family {
        &self.prdiv
    }

    pub fn vdiv(&self) -> &Family {
        &self.vdiv
    }

    /// Run the stage for configuration `index` from the external reference `erc`. PRDIV and
    /// VDIV are written here; the caller gates and writes input and output.
    pub fn configure(&self, ctx: &mut Context<'_>, index: usize, erc: &Clock) -> Result<PllResult> {
        let limits = &self.limits;
        let target = ctx.long(self.target.at(index))?;
        let input_origin = format!("{}\n/mcg.c7.prdiv0", erc.origin);
        let output_origin = format!("{}\n via PLL", erc.origin);

        if let Some(upstream) = erc.status.clone().filter(|s| s.greater_than(Severity::Info)) {
            return Ok(PllResult {
                input: Clock::new(ctx.long(self.input.at(index))?, input_origin).with_status(upstream.clone()),
                output: Clock::new(target, output_origin).with_status(upstream),
            });
        }

        let search = search_pll(erc.frequency, target, limits);

        let prdiv = self.prdiv.at(index);
        ctx.set_value(prdiv, search.prdiv)?;
        ctx.set_status(
            prdiv,
            Status::ok(format!("Field value = 0b{:b}", search.prdiv.saturating_sub(limits.prdiv_min))),
        )?;
        let vdiv = self.vdiv.at(index);
        ctx.set_value(vdiv, search.vdiv)?;
        ctx.set_status(
            vdiv,
            Status::ok(format!("Field value = 0b{:b}", search.vdiv.saturating_sub(limits.vdiv_min))),
        )?;

        let input = Clock::new(search.input, input_origin);
        if !search.input_valid {
            let error = Status::error(format!(
                "PLL not usable with input clock frequency {}\nRange: [{},{}]",
                notation::hz(erc.frequency as f64),
                notation::format(limits.in_min as f64, 3),
                notation::format(limits.in_max as f64, 3),
            ));
            return Ok(PllResult {
                input: input.with_status(error.clone()),
                output: Clock::new(target, output_origin).with_status(error),
            });
        }

        let (frequency, status) = match search.nearest {
            Some(nearest) if search.output_valid => (nearest, Status::ok(search.possible_values())),
            _ => (
                target,
                Status::error(format!(
                    "Not possible to generate desired PLL frequency from input clock\n{}",
                    search.possible_values()
                )),
            ),
        };
        Ok(PllResult {
            input,
            output: Clock::new(frequency, output_origin).with_status(status),
        })
    }
}
