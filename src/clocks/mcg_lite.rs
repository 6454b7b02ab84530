//! Lite MCG (KL series): a 2/8MHz low-frequency IRC with two power-of-two dividers, a 48MHz
//! high-frequency IRC, and a bypass to the external oscillator. No FLL or PLL.

use crate::{
    Result,
    clocks::{Clock, check_configuration, pin_first_configuration},
    engine::{Device, PropagationError},
    namespace::{PeripheralId, VarId},
    util::shift_divide,
    validator::{Context, Family, IndexedValidator, WatchContext},
    variable::{ChoiceEntry, Severity, Status, Variable},
};

use super::osc::UNCONSTRAINED_RANGE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum McgLiteMode {
    Lirc2MHz,
    Lirc8MHz,
    Hirc48MHz,
    External,
}

impl McgLiteMode {
    pub const ALL: [Self; 4] = [Self::Lirc2MHz, Self::Lirc8MHz, Self::Hirc48MHz, Self::External];

    pub fn name(self) -> &'static str {
        match self {
            Self::Lirc2MHz => "LIRC_2MHz",
            Self::Lirc8MHz => "LIRC_8MHz",
            Self::Hirc48MHz => "HIRC_48MHz",
            Self::External => "EXT",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("McgClockMode_").unwrap_or(name);
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// `mcg_c1_clks`, and the `mcg_c2_ircs` value when the mode fixes it.
    fn fields(self) -> (i64, Option<bool>) {
        match self {
            Self::Hirc48MHz => (0, None),
            Self::Lirc2MHz => (1, Some(false)),
            Self::Lirc8MHz => (1, Some(true)),
            Self::External => (2, None),
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::Hirc48MHz => "HIRC 48M (IRCLK48MCLK)",
            Self::Lirc2MHz => "LIRC2",
            Self::Lirc8MHz => "LIRC8",
            Self::External => "External Clock (OSCCLK)",
        }
    }

    fn uses_lirc(self) -> bool {
        matches!(self, Self::Lirc2MHz | Self::Lirc8MHz)
    }

    fn entry(self) -> ChoiceEntry {
        ChoiceEntry::new(self.source(), format!("McgClockMode_{}", self.name()))
    }
}

pub fn declare(device: &mut Device, peripheral: PeripheralId, dimension: usize) -> Result<()> {
    let p = peripheral;
    device.declare(p, Variable::long("system_slow_irc_clock", 2_000_000).with_units("Hz").locked())?;
    device.declare(p, Variable::long("system_fast_irc_clock", 8_000_000).with_units("Hz").locked())?;
    device.declare(p, Variable::long("system_irc48m_clock", 48_000_000).with_units("Hz").locked())?;

    let family = |device: &mut Device, variable: Variable| device.declare_family(p, variable, dimension);
    family(device, Variable::text("ClockConfig[]", "ClockConfig"))?;
    family(device, Variable::bool("enableClockConfiguration[]", true))?;
    family(
        device,
        Variable::choice(
            "mcgClockMode[]",
            McgLiteMode::ALL.iter().map(|m| m.entry()).collect(),
            2,
        ),
    )?;
    family(device, Variable::long("mcg_c1_clks[]", 0).with_bounds(0, 2).locked())?;
    family(device, Variable::bool("mcg_c1_irclken[]", true))?;
    family(device, Variable::bool("mcg_c1_irefsten[]", false))?;
    family(device, Variable::long("mcg_c2_range0[]", 0).with_bounds(0, 2).locked())?;
    family(device, Variable::bool("mcg_c2_ircs[]", true))?;
    family(
        device,
        Variable::long("mcg_sc_fcrdiv[]", 0)
            .with_bounds(0, 7)
            .with_description("LIRC divider 1, as a power of two"),
    )?;
    family(
        device,
        Variable::long("mcg_mc_lirc_div2[]", 0)
            .with_bounds(0, 7)
            .with_description("LIRC divider 2, as a power of two"),
    )?;
    family(device, Variable::bool("mcg_mc_hircen[]", false))?;
    declare_clock_families!(
        device,
        p,
        dimension,
        [
            "system_lirc_clock[]",
            "system_lirc_div1_clock[]",
            "system_mcgirclk_clock[]",
            "system_mcgoutclk_clock[]",
            "system_mcgpclk_clock[]",
        ]
    );
    family(device, Variable::text("mcgClockSource[]", "").locked())?;
    Ok(())
}

struct McgLiteVars {
    slow_irc: VarId,
    fast_irc: VarId,
    irc48m: VarId,
    osc_clock: VarId,
    osc_range: VarId,

    clock_config: Family,
    enable_config: Family,
    mode: Family,
    clks: Family,
    irclken: Family,
    irefsten: Family,
    range: Family,
    ircs: Family,
    fcrdiv: Family,
    lirc_div2: Family,
    hircen: Family,

    lirc: Family,
    lirc_div1: Family,
    mcgirclk: Family,
    mcgout: Family,
    mcgpclk: Family,
    source: Family,
}

/// Validator for the MCG-Lite, one pass per clock configuration.
pub struct McgLiteValidator {
    dimension: usize,
    vars: Option<McgLiteVars>,
}

impl McgLiteValidator {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vars: None,
        }
    }
}

fn filtered(clock: Clock) -> Clock {
    Clock {
        status: clock.status.clone().filter(|s| s.greater_than(Severity::Info)),
        enabled: true,
        ..clock
    }
}

impl IndexedValidator for McgLiteValidator {
    fn name(&self) -> &str {
        "McgLiteValidator"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let dim = self.dimension;
        let vars = McgLiteVars {
            slow_irc: ctx.watch("system_slow_irc_clock")?,
            fast_irc: ctx.watch("system_fast_irc_clock")?,
            irc48m: ctx.watch("system_irc48m_clock")?,
            osc_clock: ctx.watch("/OSC0/osc_clock")?,
            osc_range: ctx.watch("/OSC0/oscillatorRange")?,

            clock_config: ctx.watch_family("ClockConfig[]", dim)?,
            enable_config: ctx.watch_family("enableClockConfiguration[]", dim)?,
            mode: ctx.watch_family("mcgClockMode[]", dim)?,
            clks: ctx.family("mcg_c1_clks[]", dim)?,
            irclken: ctx.watch_family("mcg_c1_irclken[]", dim)?,
            irefsten: ctx.family("mcg_c1_irefsten[]", dim)?,
            range: ctx.family("mcg_c2_range0[]", dim)?,
            ircs: ctx.watch_family("mcg_c2_ircs[]", dim)?,
            fcrdiv: ctx.watch_family("mcg_sc_fcrdiv[]", dim)?,
            lirc_div2: ctx.watch_family("mcg_mc_lirc_div2[]", dim)?,
            hircen: ctx.watch_family("mcg_mc_hircen[]", dim)?,

            lirc: ctx.family("system_lirc_clock[]", dim)?,
            lirc_div1: ctx.family("system_lirc_div1_clock[]", dim)?,
            mcgirclk: ctx.family("system_mcgirclk_clock[]", dim)?,
            mcgout: ctx.family("system_mcgoutclk_clock[]", dim)?,
            mcgpclk: ctx.family("system_mcgpclk_clock[]", dim)?,
            source: ctx.family("mcgClockSource[]", dim)?,
        };
        pin_first_configuration(ctx, &vars.enable_config)?;
        self.vars = Some(vars);
        Ok(())
    }

    fn validate(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>, index: usize) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };
        let i = index;

        check_configuration(ctx, v.clock_config.at(i), v.enable_config.at(i))?;

        // The oscillator range follows OSC0 when OSC0 constrains it
        let osc_range = ctx.long(v.osc_range)?;
        let range = v.range.at(i);
        if osc_range == UNCONSTRAINED_RANGE {
            ctx.enable(range, false)?;
        } else {
            ctx.enable(range, true)?;
            ctx.set_value(range, osc_range)?;
        }

        let mode_name = ctx.choice_name(v.mode.at(i));
        let mode = McgLiteMode::from_name(&mode_name).ok_or_else(|| PropagationError::UnhandledMode {
            validator: self.name().to_owned(),
            mode: mode_name.clone(),
        })?;
        let (clks, ircs) = mode.fields();
        ctx.set_value(v.clks.at(i), clks)?;
        let ircs_var = v.ircs.at(i);
        if let Some(ircs) = ircs {
            ctx.set_value(ircs_var, ircs)?;
        }
        ctx.set_locked(ircs_var, ircs.is_some())?;

        // LIRC chain
        let lirc_on = ctx.bool(v.irclken.at(i))? || mode.uses_lirc();
        let lirc = if lirc_on {
            let source = if ctx.bool(ircs_var)? { v.fast_irc } else { v.slow_irc };
            let frequency = ctx.long(source)?;
            let origin = if ctx.bool(ircs_var)? { "LIRC 8MHz" } else { "LIRC 2MHz" };
            Clock::new(frequency, origin)
        } else {
            Clock::gated("LIRC", Status::warning("Disabled by mcg_c1_irclken"))
        };
        lirc.write(ctx, v.lirc.at(i))?;
        for id in [v.irefsten.at(i), v.fcrdiv.at(i), v.lirc_div2.at(i)] {
            ctx.enable(id, lirc_on)?;
        }
        let div1 = Clock {
            frequency: shift_divide(lirc.frequency, ctx.long(v.fcrdiv.at(i))?),
            ..lirc.clone()
        }
        .note("/LIRC_DIV1");
        div1.write(ctx, v.lirc_div1.at(i))?;
        let div2 = Clock {
            frequency: shift_divide(div1.frequency, ctx.long(v.lirc_div2.at(i))?),
            ..div1.clone()
        }
        .note("/LIRC_DIV2");
        div2.write(ctx, v.mcgirclk.at(i))?;

        // HIRC clock to peripherals
        let hirc = Clock::read(ctx, v.irc48m)?.with_origin("HIRC 48MHz");
        let pclk = if mode == McgLiteMode::Hirc48MHz || ctx.bool(v.hircen.at(i))? {
            hirc.clone()
        } else {
            Clock {
                status: Some(Status::warning("Disabled in this clock mode")),
                enabled: false,
                ..hirc.clone()
            }
        };
        pclk.write(ctx, v.mcgpclk.at(i))?;

        let mcgout = match mode {
            McgLiteMode::Hirc48MHz => filtered(hirc),
            McgLiteMode::Lirc2MHz | McgLiteMode::Lirc8MHz => filtered(div1),
            McgLiteMode::External => filtered(Clock::read(ctx, v.osc_clock)?),
        };
        mcgout.write(ctx, v.mcgout.at(i))?;

        let source = v.source.at(i);
        ctx.set_value(source, mode.source())?;
        ctx.set_status(source, mcgout.status.clone())?;
        ctx.set_origin(source, mcgout.origin)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lirc_modes_fix_the_irc_select() {
        assert_eq!(McgLiteMode::Lirc8MHz.fields(), (1, Some(true)));
        assert_eq!(McgLiteMode::Lirc2MHz.fields(), (1, Some(false)));
        assert_eq!(McgLiteMode::External.fields(), (2, None));
        assert_eq!(McgLiteMode::from_name("McgClockMode_HIRC_48MHz"), Some(McgLiteMode::Hirc48MHz));
    }
}
