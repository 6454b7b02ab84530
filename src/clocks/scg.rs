//! System Clock Generator (S32K). Four sources (SOSC, SIRC, FIRC and the SPLL fed from SOSC),
//! each with two power-of-two peripheral dividers, and the RUN and alternate-mode (VLPR or
//! HSRUN) core, bus and flash dividers.

use crate::{
    Result,
    clocks::{
        Clock, check_configuration,
        search::{PllLimits, search_pll},
    },
    engine::{Device, PropagationError},
    namespace::{PeripheralId, VarId},
    notation,
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Severity, Status, Variable},
};

/// Frequency caps of one power mode, Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct ModeCaps {
    pub core: i64,
    pub bus: i64,
    pub flash: i64,
}

/// SCG limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct ScgLimits {
    pub pll: PllLimits,
    /// Lowest frequency of the SOSC low, medium and high ranges, and the highest overall.
    pub sosc_low_min: i64,
    pub sosc_medium_min: i64,
    pub sosc_high_min: i64,
    pub sosc_high_max: i64,
    pub sirc: i64,
    pub firc: i64,
    pub run: ModeCaps,
    pub hsrun: ModeCaps,
    pub vlpr: ModeCaps,
}

impl Default for ScgLimits {
    /// S32K144: SPLL 8-16MHz after PREDIV 1-8, MULT 16-47, VCO/2 in 90-160MHz; SOSC ranges from
    /// 32kHz, 1MHz and 8MHz up to 40MHz; 8MHz SIRC, 48MHz FIRC; RUN 80/48/26.67MHz,
    /// HSRUN 112/56/28MHz, VLPR 4/4/1MHz core/bus/flash.
    fn default() -> Self {
        Self {
            pll: PllLimits {
                in_min: 8_000_000,
                in_max: 16_000_000,
                out_min: 90_000_000,
                out_max: 160_000_000,
                prdiv_min: 1,
                prdiv_max: 8,
                vdiv_min: 16,
                vdiv_max: 47,
                post_div: 2,
            },
            sosc_low_min: 32_000,
            sosc_medium_min: 1_000_000,
            sosc_high_min: 8_000_000,
            sosc_high_max: 40_000_000,
            sirc: 8_000_000,
            firc: 48_000_000,
            run: ModeCaps {
                core: 80_000_000,
                bus: 48_000_000,
                flash: 26_670_000,
            },
            hsrun: ModeCaps {
                core: 112_000_000,
                bus: 56_000_000,
                flash: 28_000_000,
            },
            vlpr: ModeCaps {
                core: 4_000_000,
                bus: 4_000_000,
                flash: 1_000_000,
            },
        }
    }
}

/// System clock source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum ScgMode {
    None,
    Sosc,
    Sirc,
    Firc,
    Spll,
}

/// Alternate power mode offered with a clock source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AltMode {
    Vlpr,
    Hsrun,
}

impl ScgMode {
    pub const ALL: [Self; 5] = [Self::None, Self::Sosc, Self::Sirc, Self::Firc, Self::Spll];

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Sosc => "SOSC",
            Self::Sirc => "SIRC",
            Self::Firc => "FIRC",
            Self::Spll => "SPLL",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("ClockMode_").unwrap_or(name);
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// SCS field encoding.
    fn scs(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Sosc => 1,
            Self::Sirc => 2,
            Self::Firc => 3,
            Self::Spll => 6,
        }
    }

    fn alternate(self) -> Option<AltMode> {
        match self {
            Self::Sirc => Some(AltMode::Vlpr),
            Self::Firc | Self::Spll => Some(AltMode::Hsrun),
            Self::None | Self::Sosc => None,
        }
    }

    fn entry(self) -> ChoiceEntry {
        ChoiceEntry::new(self.name(), format!("ClockMode_{}", self.name()))
    }
}

impl AltMode {
    fn name(self) -> &'static str {
        match self {
            Self::Vlpr => "VLPR",
            Self::Hsrun => "HSRUN",
        }
    }
}

/// Per-source dividers: 0 stops the output, otherwise divide by `2^(n-1)`.
fn peripheral_clock(source: &Clock, divider: i64, name: &str) -> Clock {
    let frequency = match u32::try_from(divider) {
        Ok(d) if (1..=7).contains(&d) => source.frequency >> (d - 1),
        _ => 0,
    };
    Clock {
        frequency,
        enabled: source.enabled && frequency > 0,
        ..source.clone()
    }
    .note(name)
}

pub fn declare(device: &mut Device, peripheral: PeripheralId, _dimension: usize, limits: &ScgLimits) -> Result<()> {
    let p = peripheral;
    let divider = |name: &str, value: i64| {
        Variable::long(name, value)
            .with_bounds(0, 7)
            .with_description("0 disables the output, otherwise divide by 2^(n-1)")
    };
    device.declare(p, Variable::text("ClockConfig", "ClockConfig"))?;
    device.declare(p, Variable::bool("enableClockConfiguration", true).locked())?;
    device.declare(
        p,
        Variable::choice("clock_transition_mode", ScgMode::ALL.iter().map(|m| m.entry()).collect(), 3),
    )?;

    device.declare(
        p,
        Variable::long("system_sosc_frequency", 8_000_000)
            .with_units("Hz")
            .with_bounds(limits.sosc_low_min, limits.sosc_high_max),
    )?;
    device.declare(p, Variable::bool("scg_sosccsr_soscen", true))?;
    device.declare(p, Variable::long("scg_sosccfg_range", 3).with_bounds(1, 3).locked())?;
    device.declare(p, divider("scg_soscdiv_soscdiv1", 1))?;
    device.declare(p, divider("scg_soscdiv_soscdiv2", 1))?;

    device.declare(p, Variable::long("system_sirc_frequency", limits.sirc).with_units("Hz").locked())?;
    device.declare(p, Variable::bool("scg_sirccsr_sircen", true))?;
    device.declare(p, divider("scg_sircdiv_sircdiv1", 1))?;
    device.declare(p, divider("scg_sircdiv_sircdiv2", 1))?;

    device.declare(p, Variable::long("system_firc_frequency", limits.firc).with_units("Hz").locked())?;
    device.declare(p, Variable::bool("scg_firccsr_fircen", true))?;
    device.declare(p, divider("scg_fircdiv_fircdiv1", 1))?;
    device.declare(p, divider("scg_fircdiv_fircdiv2", 1))?;

    let pll = &limits.pll;
    device.declare(p, Variable::bool("scg_spllcsr_spllen", false))?;
    device.declare(
        p,
        Variable::long("spllTargetFrequency", 112_000_000)
            .with_units("Hz")
            .with_bounds(pll.out_min, pll.out_max)
            .with_description("Desired SPLL output frequency"),
    )?;
    device.declare(
        p,
        Variable::long("scg_spllcfg_prediv", i64::from(pll.prdiv_min))
            .with_bounds(pll.prdiv_min, pll.prdiv_max)
            .with_offset(i64::from(pll.prdiv_min))
            .locked(),
    )?;
    device.declare(
        p,
        Variable::long("scg_spllcfg_mult", i64::from(pll.vdiv_min))
            .with_bounds(pll.vdiv_min, pll.vdiv_max)
            .with_offset(i64::from(pll.vdiv_min))
            .locked(),
    )?;
    device.declare(p, divider("scg_splldiv_splldiv1", 1))?;
    device.declare(p, divider("scg_splldiv_splldiv2", 1))?;

    for prefix in ["runccr", "altccr"] {
        device.declare(p, Variable::long(format!("scg_{prefix}_scs"), 3).locked())?;
        device.declare(p, Variable::long(format!("scg_{prefix}_divcore"), 1).with_bounds(1, 16))?;
        device.declare(p, Variable::long(format!("scg_{prefix}_divbus"), 2).with_bounds(1, 16))?;
        device.declare(p, Variable::long(format!("scg_{prefix}_divslow"), 2).with_bounds(1, 8))?;
    }
    device.declare(p, Variable::text("runModeSystemClocks", "").locked())?;
    device.declare(p, Variable::text("alternativeModeSystemClocks", "").locked())?;

    declare_clocks!(
        device,
        p,
        [
            "sosc_clock",
            "sosc_div1_clock",
            "sosc_div2_clock",
            "sirc_clock",
            "sirc_div1_clock",
            "sirc_div2_clock",
            "firc_clock",
            "firc_div1_clock",
            "firc_div2_clock",
            "system_spll_clock",
            "spll_div1_clock",
            "spll_div2_clock",
            "run_mode_core_clock",
            "run_mode_bus_clock",
            "run_mode_flash_clock",
            "alt_mode_core_clock",
            "alt_mode_bus_clock",
            "alt_mode_flash_clock",
        ]
    );
    Ok(())
}

/// Handles of one clock source: its frequency, enable, two dividers and three outputs.
struct Source {
    frequency: VarId,
    enable: VarId,
    div1: VarId,
    div2: VarId,
    clock: VarId,
    div1_clock: VarId,
    div2_clock: VarId,
}

impl Source {
    fn watch(ctx: &mut WatchContext<'_>, frequency: &str, enable: &str, prefix: &str, div: &str) -> Result<Self> {
        Ok(Self {
            frequency: ctx.watch(frequency)?,
            enable: ctx.watch(enable)?,
            div1: ctx.watch(&format!("scg_{div}_{div}1"))?,
            div2: ctx.watch(&format!("scg_{div}_{div}2"))?,
            clock: ctx.lookup(&format!("{prefix}_clock"))?,
            div1_clock: ctx.lookup(&format!("{prefix}_div1_clock"))?,
            div2_clock: ctx.lookup(&format!("{prefix}_div2_clock"))?,
        })
    }

    /// Write the dividers' outputs from the source clock.
    fn write_dividers(&self, ctx: &mut Context<'_>, clock: &Clock) -> Result<()> {
        let div1 = ctx.long(self.div1)?;
        peripheral_clock(clock, div1, "/DIV1").write(ctx, self.div1_clock)?;
        let div2 = ctx.long(self.div2)?;
        peripheral_clock(clock, div2, "/DIV2").write(ctx, self.div2_clock)
    }

    /// Gate by the enable flag and write the clock and its dividers.
    fn run(&self, ctx: &mut Context<'_>, name: &str, flag: &str) -> Result<Clock> {
        let clock = if ctx.bool(self.enable)? {
            Clock::new(ctx.long(self.frequency)?, name)
        } else {
            Clock::gated(name, Status::info(format!("Disabled by {flag}")))
        };
        clock.write(ctx, self.clock)?;
        self.write_dividers(ctx, &clock)?;
        Ok(clock)
    }
}

struct Ccr {
    scs: VarId,
    divcore: VarId,
    divbus: VarId,
    divslow: VarId,
    core: VarId,
    bus: VarId,
    flash: VarId,
}

impl Ccr {
    fn watch(ctx: &mut WatchContext<'_>, prefix: &str, outputs: &str) -> Result<Self> {
        Ok(Self {
            scs: ctx.lookup(&format!("scg_{prefix}_scs"))?,
            divcore: ctx.watch(&format!("scg_{prefix}_divcore"))?,
            divbus: ctx.watch(&format!("scg_{prefix}_divbus"))?,
            divslow: ctx.watch(&format!("scg_{prefix}_divslow"))?,
            core: ctx.lookup(&format!("{outputs}_core_clock"))?,
            bus: ctx.lookup(&format!("{outputs}_bus_clock"))?,
            flash: ctx.lookup(&format!("{outputs}_flash_clock"))?,
        })
    }

    /// Core, bus and flash clocks from the system clock, each checked against its cap.
    fn write(&self, ctx: &mut Context<'_>, system: &Clock, scs: i64, caps: ModeCaps, enabled: bool) -> Result<()> {
        ctx.set_value(self.scs, scs)?;
        let core = system.clone().divided(ctx.long(self.divcore)?).note(" after division by SCG_xCCR.DIVCORE");
        let bus = Clock {
            origin: format!("{} after division by SCG_xCCR.DIVBUS", system.origin),
            ..core.clone().divided(ctx.long(self.divbus)?)
        };
        let flash = Clock {
            origin: format!("{} after division by SCG_xCCR.DIVSLOW", system.origin),
            ..core.clone().divided(ctx.long(self.divslow)?)
        };
        for (clock, max, id) in [(core, caps.core, self.core), (bus, caps.bus, self.bus), (flash, caps.flash, self.flash)] {
            let status = if clock.frequency > max {
                Status::worst(
                    clock.status.clone(),
                    Some(Status::error(format!(
                        "Clock frequency is too high. (Req. clock <= {})",
                        notation::hz(max as f64)
                    ))),
                )
            } else {
                clock.status.clone()
            };
            Clock {
                status,
                enabled,
                ..clock
            }
            .write(ctx, id)?;
        }
        for id in [self.divcore, self.divbus, self.divslow] {
            ctx.enable(id, enabled)?;
        }
        Ok(())
    }
}

struct ScgVars {
    clock_config: VarId,
    enable_config: VarId,
    mode: VarId,
    sosc: Source,
    sosc_range: VarId,
    sirc: Source,
    firc: Source,
    spllen: VarId,
    spll_target: VarId,
    prediv: VarId,
    mult: VarId,
    spll_div1: VarId,
    spll_div2: VarId,
    spll: VarId,
    spll_div1_clock: VarId,
    spll_div2_clock: VarId,
    run: Ccr,
    alt: Ccr,
    run_label: VarId,
    alt_label: VarId,
}

/// Validator for the SCG.
pub struct ScgValidator {
    limits: ScgLimits,
    vars: Option<ScgVars>,
}

impl ScgValidator {
    pub fn new(limits: ScgLimits) -> Self {
        Self { limits, vars: None }
    }

    /// SOSC range field from the crystal frequency.
    fn sosc_range(&self, ctx: &mut Context<'_>, range: VarId, frequency: i64) -> Result<()> {
        let limits = &self.limits;
        if frequency > limits.sosc_high_max {
            ctx.set_value(range, 3_i64)?;
            return ctx.set_status(range, Status::warning("Frequency not suitable for oscillator"));
        }
        ctx.clear_status(range)?;
        let value: i64 = if frequency >= limits.sosc_high_min {
            3
        } else if frequency >= limits.sosc_medium_min {
            2
        } else {
            1
        };
        ctx.set_value(range, value)
    }

    /// SPLL from SOSC. The PLL settings are searched for the output nearest the target.
    fn spll(&self, ctx: &mut Context<'_>, v: &ScgVars, sosc: &Clock) -> Result<Clock> {
        let limits = &self.limits.pll;
        let origin = "SPLL";
        if !ctx.bool(v.spllen)? {
            ctx.clear_status(v.spllen)?;
            return Ok(Clock::gated(origin, Status::info("Disabled by spllen")));
        }
        if !sosc.enabled {
            let status = Status::warning("Unavailable because SOSC disabled (sosccsr.soscen)");
            ctx.set_status(v.spllen, status.clone())?;
            return Ok(Clock::gated(origin, status));
        }
        let target = ctx.long(v.spll_target)?;
        let search = search_pll(sosc.frequency, target, limits);
        ctx.set_value(v.prediv, search.prdiv)?;
        ctx.set_value(v.mult, search.vdiv)?;
        if !search.input_valid {
            let status = Status::warning(format!(
                "System Oscillator frequency not suitable for PLL\nRange: [{},{}] after PREDIV",
                notation::hz(limits.in_min as f64),
                notation::hz(limits.in_max as f64)
            ));
            ctx.set_status(v.spllen, status.clone())?;
            return Ok(Clock::gated(origin, status));
        }
        ctx.clear_status(v.spllen)?;
        let origin = format!("{} via SPLL", sosc.origin);
        Ok(match search.nearest {
            None => Clock::gated(
                origin,
                Status::error(format!("No SPLL output possible from input clock\n{}", search.possible_values())),
            ),
            Some(nearest) if search.output_valid => {
                Clock::new(nearest, origin).with_status(Status::ok(search.possible_values()))
            }
            Some(nearest) => Clock::new(nearest, origin).with_status(Status::warning(format!(
                "Desired SPLL frequency rounded to nearest possible value\n{}",
                search.possible_values()
            ))),
        })
    }
}

impl Validator for ScgValidator {
    fn name(&self) -> &str {
        "ScgValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let vars = ScgVars {
            clock_config: ctx.watch("ClockConfig")?,
            enable_config: ctx.lookup("enableClockConfiguration")?,
            mode: ctx.watch("clock_transition_mode")?,
            sosc: Source::watch(ctx, "system_sosc_frequency", "scg_sosccsr_soscen", "sosc", "soscdiv")?,
            sosc_range: ctx.lookup("scg_sosccfg_range")?,
            sirc: Source::watch(ctx, "system_sirc_frequency", "scg_sirccsr_sircen", "sirc", "sircdiv")?,
            firc: Source::watch(ctx, "system_firc_frequency", "scg_firccsr_fircen", "firc", "fircdiv")?,
            spllen: ctx.watch("scg_spllcsr_spllen")?,
            spll_target: ctx.watch("spllTargetFrequency")?,
            prediv: ctx.lookup("scg_spllcfg_prediv")?,
            mult: ctx.lookup("scg_spllcfg_mult")?,
            spll_div1: ctx.watch("scg_splldiv_splldiv1")?,
            spll_div2: ctx.watch("scg_splldiv_splldiv2")?,
            spll: ctx.lookup("system_spll_clock")?,
            spll_div1_clock: ctx.lookup("spll_div1_clock")?,
            spll_div2_clock: ctx.lookup("spll_div2_clock")?,
            run: Ccr::watch(ctx, "runccr", "run_mode")?,
            alt: Ccr::watch(ctx, "altccr", "alt_mode")?,
            run_label: ctx.lookup("runModeSystemClocks")?,
            alt_label: ctx.lookup("alternativeModeSystemClocks")?,
        };
        self.vars = Some(vars);
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        check_configuration(ctx, v.clock_config, v.enable_config)?;

        let firc = v.firc.run(ctx, "FIRC", "firccsr.fircen")?;
        let sirc = v.sirc.run(ctx, "SIRC", "sirccsr.sircen")?;
        let sosc_frequency = ctx.long(v.sosc.frequency)?;
        self.sosc_range(ctx, v.sosc_range, sosc_frequency)?;
        let sosc = v.sosc.run(ctx, "SOSC", "sosccsr.soscen")?;

        let spll = self.spll(ctx, v, &sosc)?;
        spll.write(ctx, v.spll)?;
        let div1 = ctx.long(v.spll_div1)?;
        peripheral_clock(&spll, div1, "/DIV1").write(ctx, v.spll_div1_clock)?;
        let div2 = ctx.long(v.spll_div2)?;
        peripheral_clock(&spll, div2, "/DIV2").write(ctx, v.spll_div2_clock)?;

        let mode_name = ctx.choice_name(v.mode);
        let mode = ScgMode::from_name(&mode_name).ok_or_else(|| PropagationError::UnhandledMode {
            validator: self.name().to_owned(),
            mode: mode_name.clone(),
        })?;
        let source = match mode {
            ScgMode::None => None,
            ScgMode::Sosc => Some(&sosc),
            ScgMode::Sirc => Some(&sirc),
            ScgMode::Firc => Some(&firc),
            ScgMode::Spll => Some(&spll),
        };
        let system = match source {
            Some(clock) => {
                let status = clock
                    .status
                    .as_ref()
                    .filter(|_| !clock.enabled || clock.severity() > Severity::Info)
                    .map(|s| Status::error(format!("Clock unavailable: {}", s.text())));
                Clock {
                    origin: mode.name().to_owned(),
                    status,
                    enabled: true,
                    ..clock.clone()
                }
            }
            None => Clock::new(0, "Disabled"),
        };

        let run_label = match mode {
            ScgMode::None => String::from("Unavailable"),
            _ => format!("RUN mode - {}", mode.name()),
        };
        ctx.set_value(v.run_label, run_label)?;
        ctx.enable(v.run_label, mode != ScgMode::None)?;
        ctx.set_status(v.run_label, system.status.clone())?;
        v.run.write(ctx, &system, mode.scs(), self.limits.run, mode != ScgMode::None)?;

        let alternate = mode.alternate();
        let (alt_label, caps) = match alternate {
            Some(AltMode::Vlpr) => (format!("VLPR mode - {}", mode.name()), self.limits.vlpr),
            Some(AltMode::Hsrun) => (format!("HSRUN mode - {}", mode.name()), self.limits.hsrun),
            None => (String::from("Unavailable"), self.limits.run),
        };
        ctx.set_value(v.alt_label, alt_label)?;
        ctx.enable(v.alt_label, alternate.is_some())?;
        ctx.set_status(v.alt_label, system.status.clone())?;
        v.alt.write(ctx, &system, mode.scs(), caps, alternate.is_some())?;
        tracing::trace!(mode = mode.name(), alternate = ?alternate.map(AltMode::name), "scg system clock");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peripheral_dividers() {
        let firc = Clock::new(48_000_000, "FIRC");
        assert_eq!(peripheral_clock(&firc, 1, "/DIV1").frequency, 48_000_000);
        assert_eq!(peripheral_clock(&firc, 3, "/DIV1").frequency, 12_000_000);
        let off = peripheral_clock(&firc, 0, "/DIV2");
        assert_eq!(off.frequency, 0);
        assert!(!off.enabled);
        assert_eq!(off.origin, "FIRC/DIV2");
    }

    #[test]
    fn spll_reaches_112mhz_from_8mhz() {
        let limits = ScgLimits::default();
        let search = search_pll(8_000_000, 112_000_000, &limits.pll);
        assert!(search.input_valid && search.output_valid);
        assert_eq!(search.nearest, Some(112_000_000));
        assert_eq!((search.prdiv, search.vdiv), (1, 28));
    }

    #[test]
    fn alternate_modes() {
        assert_eq!(ScgMode::Sirc.alternate(), Some(AltMode::Vlpr));
        assert_eq!(ScgMode::Spll.alternate(), Some(AltMode::Hsrun));
        assert_eq!(ScgMode::Sosc.alternate(), None);
        assert_eq!(ScgMode::Spll.scs(), 6);
    }
}
