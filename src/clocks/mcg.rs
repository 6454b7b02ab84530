//! Multipurpose Clock Generator (K series). One pass per clock configuration: pick the
//! internal and external references, run the FLL and PLL stages, then route MCGOUTCLK
//! according to the clock mode.

use crate::{
    Result,
    clocks::{
        Clock, check_configuration, pin_first_configuration,
        fll::{FllReference, FllStage},
        pll::PllStage,
        search::{FllLimits, PllLimits},
    },
    engine::{Device, PropagationError},
    namespace::{PeripheralId, VarId},
    util::{chain, shift_divide},
    validator::{Context, Family, IndexedValidator, WatchContext},
    variable::{ChoiceEntry, Severity, Status, Variable},
};

/// Whether the MCG has its PLL stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum McgVariant {
    Full,
    NoPll,
}

/// MCG clock modes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum McgMode {
    /// Out of reset; nothing is applied.
    None,
    /// FLL Engaged Internal
    Fei,
    /// FLL Engaged External
    Fee,
    /// FLL Bypassed Internal
    Fbi,
    /// FLL Bypassed External
    Fbe,
    /// Bypassed Low Power Internal
    Blpi,
    /// Bypassed Low Power External
    Blpe,
    /// PLL Bypassed External
    Pbe,
    /// PLL Engaged External
    Pee,
}

/// Register fields a mode fixes, and where MCGOUTCLK comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ModeFields {
    clks: i64,
    plls: bool,
    lp: bool,
    irefs: bool,
    source: &'static str,
    fll_enabled: bool,
    /// The PLL runs whatever `mcg_c5_pllclken0` says.
    pll_forced: bool,
}

impl McgMode {
    pub const ALL: [Self; 9] = [
        Self::None,
        Self::Fei,
        Self::Fee,
        Self::Fbi,
        Self::Fbe,
        Self::Blpi,
        Self::Blpe,
        Self::Pbe,
        Self::Pee,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Fei => "FEI",
            Self::Fee => "FEE",
            Self::Fbi => "FBI",
            Self::Fbe => "FBE",
            Self::Blpi => "BLPI",
            Self::Blpe => "BLPE",
            Self::Pbe => "PBE",
            Self::Pee => "PEE",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::None => "No setup (Reset default)",
            Self::Fei => "FLL Engaged Internal",
            Self::Fee => "FLL Engaged External",
            Self::Fbi => "FLL Bypassed Internal",
            Self::Fbe => "FLL Bypassed External",
            Self::Blpi => "Bypassed Low Power Internal",
            Self::Blpe => "Bypassed Low Power External",
            Self::Pbe => "PLL Bypassed External",
            Self::Pee => "PLL Engaged External",
        }
    }

    /// Parse a mode from its name or its enumeration name, eg `"PEE"` or `"McgClockMode_PEE"`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("McgClockMode_").unwrap_or(name);
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// The mode needs the PLL stage.
    pub fn uses_pll(self) -> bool {
        matches!(self, Self::Pbe | Self::Pee)
    }

    fn entry(self) -> ChoiceEntry {
        ChoiceEntry::new(
            format!("{}: {}", self.name(), self.description()),
            format!("McgClockMode_{}", self.name()),
        )
    }

    fn fields(self) -> ModeFields {
        let (clks, plls, lp, irefs, source, fll_enabled) = match self {
            Self::None | Self::Fei => (0, false, false, true, "FLL output", true),
            Self::Fee => (0, false, false, false, "FLL output", true),
            Self::Fbi => (1, false, false, true, "MCGIRCLK", true),
            Self::Fbe => (2, false, false, false, "MCGERCLK", true),
            Self::Blpi => (1, false, true, true, "MCGIRCLK", false),
            Self::Blpe => (2, false, true, false, "MCGERCLK", false),
            Self::Pbe => (2, true, false, false, "MCGERCLK", false),
            Self::Pee => (0, true, false, false, "PLL output", false),
        };
        ModeFields {
            clks,
            plls,
            lp,
            irefs,
            source,
            fll_enabled,
            pll_forced: self.uses_pll(),
        }
    }
}

/// Stage limits of the MCG.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct McgLimits {
    pub pll: PllLimits,
    pub fll: FllLimits,
    /// Slow IRC trim target, Hz.
    pub slow_irc: i64,
    /// Fast IRC trim target, Hz.
    pub fast_irc: i64,
}

impl Default for McgLimits {
    /// K64-class MCG: 32.768kHz slow IRC, 4MHz fast IRC, with the default FLL and PLL limits.
    fn default() -> Self {
        Self {
            pll: PllLimits::default(),
            fll: FllLimits::default(),
            slow_irc: 32_768,
            fast_irc: 4_000_000,
        }
    }
}

/// Declare the MCG variables, `dimension` clock configurations deep.
pub fn declare(
    device: &mut Device,
    peripheral: PeripheralId,
    dimension: usize,
    variant: McgVariant,
    limits: &McgLimits,
) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::long("system_slow_irc_clock", limits.slow_irc)
            .with_units("Hz")
            .with_bounds(31_250, 39_063)
            .with_description("Slow internal reference clock, trimmed"),
    )?;
    device.declare(
        p,
        Variable::long("system_fast_irc_clock", limits.fast_irc)
            .with_units("Hz")
            .with_bounds(3_000_000, 5_000_000),
    )?;
    device.declare(p, Variable::long("system_irc48m_clock", 48_000_000).with_units("Hz").locked())?;
    device.declare(
        p,
        Variable::bool("mcg_c2_erefs0", true).with_description("External reference: oscillator or external clock"),
    )?;
    device.declare(p, Variable::bool("mcg_c2_hgo0", false))?;
    device.declare(p, Variable::bool("mcg_c6_cme0", false))?;
    device.declare(p, Variable::bool("mcg_c2_locre0", false))?;

    let family = |device: &mut Device, variable: Variable| device.declare_family(p, variable, dimension);
    family(device, Variable::text("ClockConfig[]", "ClockConfig"))?;
    family(device, Variable::bool("enableClockConfiguration[]", true))?;
    family(
        device,
        Variable::choice("mcgClockMode[]", McgMode::ALL.iter().map(|m| m.entry()).collect(), 1),
    )?;
    family(device, Variable::long("mcg_c1_clks[]", 0).with_bounds(0, 2).locked())?;
    family(device, Variable::bool("mcg_c6_plls[]", false).locked())?;
    family(device, Variable::bool("mcg_c2_lp[]", false).locked())?;
    family(device, Variable::bool("mcg_c1_irefs[]", true).locked())?;
    family(
        device,
        Variable::long("mcg_c7_oscsel[]", 0)
            .with_bounds(0, 2)
            .with_description("MCG external reference: 0 OSC0, 1 RTC, 2 IRC48M"),
    )?;
    family(device, Variable::bool("mcg_c1_irclken[]", true))?;
    family(device, Variable::bool("mcg_c1_irefsten[]", false))?;
    family(device, Variable::bool("mcg_c2_ircs[]", false))?;
    family(device, Variable::long("mcg_sc_fcrdiv[]", 1).with_bounds(0, 7))?;
    family(device, Variable::bool("mcg_c4_dmx32[]", false))?;
    family(device, Variable::long("mcg_c4_drst_drs[]", 0).with_bounds(0, 3).locked())?;
    family(device, Variable::long("mcg_c1_frdiv[]", 0).with_bounds(0, 7).locked())?;
    family(device, Variable::long("mcg_c2_range0[]", 0).with_bounds(0, 3).locked())?;
    family(
        device,
        Variable::long("system_mcgfllclk_clock[]", 20_971_520)
            .with_units("Hz")
            .with_bounds(0, 100_000_000)
            .with_description("Desired FLL output frequency"),
    )?;

    if variant == McgVariant::Full {
        let pll = &limits.pll;
        family(device, Variable::bool("mcg_c5_pllclken0[]", false))?;
        family(device, Variable::bool("mcg_c5_pllsten0[]", false))?;
        family(
            device,
            Variable::long("mcg_c5_prdiv0[]", i64::from(pll.prdiv_min))
                .with_bounds(pll.prdiv_min, pll.prdiv_max)
                .with_offset(i64::from(pll.prdiv_min))
                .locked(),
        )?;
        family(
            device,
            Variable::long("mcg_c6_vdiv0[]", i64::from(pll.vdiv_min))
                .with_bounds(pll.vdiv_min, pll.vdiv_max)
                .with_offset(i64::from(pll.vdiv_min))
                .locked(),
        )?;
        family(
            device,
            Variable::long("pll0OutputFrequency[]", 48_000_000)
                .with_units("Hz")
                .with_bounds(pll.out_min, pll.out_max)
                .with_description("Desired PLL output frequency"),
        )?;
        declare_clock_families!(
            device,
            p,
            dimension,
            ["pll0InputFrequency[]", "system_mcgpllclk_clock[]"]
        );
    }

    declare_clock_families!(
        device,
        p,
        dimension,
        [
            "fllInputFrequency[]",
            "system_mcgoutclk_clock[]",
            "system_mcgirclk_clock[]",
            "system_mcgir_ungated_clock[]",
            "system_mcgffclk_clock[]",
            "mcg_erc_clock[]",
        ]
    );
    family(device, Variable::text("mcgClockSource[]", "").locked())?;
    Ok(())
}

struct McgVars {
    slow_irc: VarId,
    fast_irc: VarId,
    irc48m: VarId,
    cme: VarId,
    locre: VarId,
    osc_clock: VarId,
    osc_range: VarId,
    osc_erclken: VarId,
    rtc_clock: Option<VarId>,

    clock_config: Family,
    enable_config: Family,
    mode: Family,
    clks: Family,
    plls: Family,
    lp: Family,
    irefs: Family,
    oscsel: Family,
    irclken: Family,
    irefsten: Family,
    ircs: Family,
    /// Absent on parts with a fixed /2 fast IRC divider.
    fcrdiv: Option<Family>,
    dmx32: Family,

    fll: FllStage,
    pll: Option<PllVars>,

    mcgout: Family,
    mcgirclk: Family,
    ungated: Family,
    ffclk: Family,
    erc: Family,
    source: Family,
}

struct PllVars {
    stage: PllStage,
    clken: Family,
    sten: Family,
    clock: Family,
}

/// Validator for the MCG, one pass per clock configuration.
pub struct McgValidator {
    variant: McgVariant,
    limits: McgLimits,
    dimension: usize,
    vars: Option<McgVars>,
}

impl McgValidator {
    pub fn new(variant: McgVariant, limits: McgLimits, dimension: usize) -> Self {
        Self {
            variant,
            limits,
            dimension,
            vars: None,
        }
    }
}

/// Internal reference clocks of one configuration.
fn internal_reference(ctx: &Context<'_>, v: &McgVars, index: usize) -> Result<Clock> {
    if ctx.bool(v.ircs.at(index))? {
        let fast = ctx.long(v.fast_irc)?;
        Ok(match &v.fcrdiv {
            Some(fcrdiv) => Clock::new(
                shift_divide(fast, ctx.long(fcrdiv.at(index))?),
                "(Fast IRC)/FCRDIV",
            ),
            None => Clock::new(fast / 2, "(Fast IRC)/2"),
        })
    } else {
        Ok(Clock::new(ctx.long(v.slow_irc)?, "Slow IRC"))
    }
}

/// MCG external reference clock, by `mcg_c7_oscsel`.
fn external_reference(ctx: &mut Context<'_>, v: &McgVars, index: usize) -> Result<Clock> {
    let oscsel = v.oscsel.at(index);
    loop {
        match (ctx.long(oscsel)?, v.rtc_clock) {
            (0, _) => return Clock::read(ctx, v.osc_clock),
            (1, Some(rtc)) => return Ok(Clock::read(ctx, rtc)?.note("[RTCCLK]")),
            (2, _) => return Ok(Clock::read(ctx, v.irc48m)?.with_origin("IRC48MCLK")),
            _ => ctx.coerce_selector(oscsel, 0)?,
        }
    }
}

impl IndexedValidator for McgValidator {
    fn name(&self) -> &str {
        "McgValidator"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let dim = self.dimension;
        let pll = match self.variant {
            McgVariant::Full => Some(PllVars {
                stage: PllStage::watch(ctx, dim, self.limits.pll)?,
                clken: ctx.watch_family("mcg_c5_pllclken0[]", dim)?,
                sten: ctx.family("mcg_c5_pllsten0[]", dim)?,
                clock: ctx.family("system_mcgpllclk_clock[]", dim)?,
            }),
            McgVariant::NoPll => None,
        };
        self.vars = Some(McgVars {
            slow_irc: ctx.watch("system_slow_irc_clock")?,
            fast_irc: ctx.watch("system_fast_irc_clock")?,
            irc48m: ctx.watch("system_irc48m_clock")?,
            cme: ctx.watch("mcg_c6_cme0")?,
            locre: ctx.lookup("mcg_c2_locre0")?,
            osc_clock: ctx.watch("/OSC0/osc_clock")?,
            osc_range: ctx.watch("/OSC0/oscillatorRange")?,
            osc_erclken: ctx.watch("/OSC0/osc_cr_erclken")?,
            rtc_clock: ctx.safe_watch("/RTC/osc_clock")?,

            clock_config: ctx.watch_family("ClockConfig[]", dim)?,
            enable_config: ctx.watch_family("enableClockConfiguration[]", dim)?,
            mode: ctx.watch_family("mcgClockMode[]", dim)?,
            clks: ctx.family("mcg_c1_clks[]", dim)?,
            plls: ctx.family("mcg_c6_plls[]", dim)?,
            lp: ctx.family("mcg_c2_lp[]", dim)?,
            irefs: ctx.family("mcg_c1_irefs[]", dim)?,
            oscsel: ctx.watch_family("mcg_c7_oscsel[]", dim)?,
            irclken: ctx.watch_family("mcg_c1_irclken[]", dim)?,
            irefsten: ctx.family("mcg_c1_irefsten[]", dim)?,
            ircs: ctx.watch_family("mcg_c2_ircs[]", dim)?,
            fcrdiv: ctx.safe_watch_family("mcg_sc_fcrdiv[]", dim)?,
            dmx32: ctx.watch_family("mcg_c4_dmx32[]", dim)?,

            fll: FllStage::watch(ctx, dim, self.limits.fll)?,
            pll,

            mcgout: ctx.family("system_mcgoutclk_clock[]", dim)?,
            mcgirclk: ctx.family("system_mcgirclk_clock[]", dim)?,
            ungated: ctx.family("system_mcgir_ungated_clock[]", dim)?,
            ffclk: ctx.family("system_mcgffclk_clock[]", dim)?,
            erc: ctx.family("mcg_erc_clock[]", dim)?,
            source: ctx.family("mcgClockSource[]", dim)?,
        });
        if let Some(v) = &self.vars {
            pin_first_configuration(ctx, &v.enable_config)?;
        }
        Ok(())
    }

    fn validate(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>, index: usize) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };
        let i = index;

        check_configuration(ctx, v.clock_config.at(i), v.enable_config.at(i))?;

        let cme = ctx.bool(v.cme)?;
        ctx.enable(v.locre, cme)?;

        // Internal reference
        let ungated = internal_reference(ctx, v, i)?;
        ungated.write(ctx, v.ungated.at(i))?;
        let irclken = ctx.bool(v.irclken.at(i))?;
        let mcgirclk = if irclken {
            ungated.clone()
        } else {
            Clock::gated(
                chain(&ungated.origin, "[Disabled by mcg_c1_irclken]"),
                Status::ok("Disabled by mcg_c1_irclken"),
            )
        };
        mcgirclk.write(ctx, v.mcgirclk.at(i))?;
        ctx.enable(v.irefsten.at(i), irclken)?;

        // External reference
        let erc = external_reference(ctx, v, i)?;
        erc.write(ctx, v.erc.at(i))?;

        // Mode
        let mode_var = v.mode.at(i);
        let mode_name = ctx.choice_name(mode_var);
        let mode = McgMode::from_name(&mode_name).ok_or_else(|| PropagationError::UnhandledMode {
            validator: self.name().to_owned(),
            mode: mode_name.clone(),
        })?;
        let legal = !(self.variant == McgVariant::NoPll && mode.uses_pll());
        let mut fields = mode.fields();
        let mode_status = if !legal {
            fields.plls = false;
            fields.pll_forced = false;
            Some(Status::error(format!("{} mode requires a PLL, which this MCG lacks", mode.name())))
        } else if mode == McgMode::None {
            Some(Status::warning("No clock settings are applied"))
        } else {
            None
        };
        ctx.set_status(mode_var, if legal { None } else { mode_status.clone() })?;

        ctx.set_value(v.clks.at(i), fields.clks)?;
        ctx.set_value(v.plls.at(i), fields.plls)?;
        ctx.set_value(v.lp.at(i), fields.lp)?;
        ctx.set_value(v.irefs.at(i), fields.irefs)?;

        let ircs = v.ircs.at(i);
        if matches!(mode, McgMode::Blpi | McgMode::Blpe) && !ctx.bool(ircs)? {
            ctx.set_status(ircs, Status::warning("Fast IRC clock should be selected if entering VLPR mode"))?;
        } else {
            ctx.clear_status(ircs)?;
        }

        // FLL
        let osc_range = v.osc_range;
        let reference = FllReference {
            irefs: fields.irefs,
            oscsel: ctx.long(v.oscsel.at(i))?,
            erclken: ctx.bool(v.osc_erclken)?,
            osc_range: ctx.long(osc_range)?,
            range_origin: ctx.origin(osc_range),
            erc: &erc,
            slow_irc: ctx.long(v.slow_irc)?,
            narrow: ctx.bool(v.dmx32.at(i))?,
        };
        let fll = v.fll.configure(ctx, i, &reference)?;
        let fll_output = if fields.fll_enabled {
            let usable = fll.reference.status.is_none() || fll.output.severity() < Severity::Warning;
            Clock {
                enabled: usable,
                ..fll.output.clone()
            }
        } else {
            Clock {
                status: Some(Status::warning("FLL is disabled")),
                enabled: false,
                ..fll.output.clone()
            }
        };
        fll_output.write(ctx, v.fll.target().at(i))?;
        ctx.enable(v.fll.input().at(i), fields.fll_enabled)?;
        ctx.enable(v.dmx32.at(i), fields.fll_enabled)?;
        ctx.enable(v.fll.drs().at(i), fields.fll_enabled)?;
        Clock {
            status: fll.reference.status.clone().filter(|s| s.greater_than(Severity::Info)),
            ..fll.reference.clone()
        }
        .write(ctx, v.ffclk.at(i))?;

        // PLL
        let pll_clock = match &v.pll {
            Some(pll) => {
                let enabled = fields.pll_forced || ctx.bool(pll.clken.at(i))?;
                let result = pll.stage.configure(ctx, i, &erc)?;
                let input = Clock {
                    enabled,
                    ..result.input.clone()
                };
                input.write(ctx, pll.stage.input().at(i))?;
                for id in [
                    pll.stage.prdiv().at(i),
                    pll.stage.vdiv().at(i),
                    pll.sten.at(i),
                ] {
                    ctx.enable(id, enabled)?;
                }
                let output = if enabled {
                    let input_ok = input
                        .status
                        .as_ref()
                        .is_none_or(|s| !s.greater_than(Severity::Info));
                    Clock {
                        enabled: input_ok,
                        ..result.output.clone()
                    }
                } else {
                    Clock {
                        status: Some(Status::warning("PLL is disabled")),
                        enabled: false,
                        ..result.output.clone()
                    }
                };
                output.write(ctx, pll.stage.target().at(i))?;
                let clock = Clock {
                    status: output.status.clone().filter(|s| s.greater_than(Severity::Info)),
                    ..output
                };
                clock.write(ctx, pll.clock.at(i))?;
                Some(clock)
            }
            None => None,
        };

        // MCGOUTCLK
        let filtered = |clock: &Clock| Clock {
            status: clock.status.clone().filter(|s| s.greater_than(Severity::Info)),
            enabled: true,
            ..clock.clone()
        };
        let mcgout = if !legal {
            Clock::new(0, "PLL not available").with_status(mode_status.clone())
        } else {
            match mode {
                McgMode::None => Clock {
                    status: None,
                    ..filtered(&fll_output)
                },
                McgMode::Fei | McgMode::Fee => filtered(&fll_output),
                McgMode::Fbi | McgMode::Blpi => filtered(&ungated),
                McgMode::Fbe | McgMode::Blpe | McgMode::Pbe => filtered(&erc),
                McgMode::Pee => match &pll_clock {
                    Some(pll) => filtered(pll),
                    None => Clock::new(0, "PLL not available")
                        .with_status(Status::error("PLL not available")),
                },
            }
        };
        mcgout.write(ctx, v.mcgout.at(i))?;

        let source = v.source.at(i);
        ctx.set_value(source, fields.source)?;
        ctx.set_status(source, mode_status)?;
        ctx.set_origin(source, mcgout.origin)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_names_parse_both_ways() {
        for mode in McgMode::ALL {
            assert_eq!(McgMode::from_name(mode.name()), Some(mode));
            assert_eq!(McgMode::from_name(mode.entry().substitution()), Some(mode));
        }
        assert_eq!(McgMode::from_name("FLL"), None);
    }

    #[test]
    fn mode_table() {
        let pee = McgMode::Pee.fields();
        assert_eq!((pee.clks, pee.plls, pee.irefs), (0, true, false));
        assert!(pee.pll_forced && !pee.fll_enabled);

        let blpi = McgMode::Blpi.fields();
        assert_eq!((blpi.clks, blpi.lp, blpi.irefs), (1, true, true));
        assert_eq!(blpi.source, "MCGIRCLK");

        assert!(McgMode::Fee.fields().fll_enabled);
        assert!(!McgMode::Fbe.fields().pll_forced);
    }
}
