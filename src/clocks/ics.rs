//! Internal Clock Source (KE series): a fixed-factor FLL fed by the internal reference or by
//! the oscillator through the RDIV reference divider, followed by the BDIV output divider.

use crate::{
    Result,
    clocks::{Clock, check_configuration, pin_first_configuration},
    engine::{Device, PropagationError},
    namespace::{PeripheralId, VarId},
    notation,
    util::{round_i64, shift_divide},
    validator::{Context, Family, IndexedValidator, WatchContext},
    variable::{ChoiceEntry, Severity, Status, Variable},
};

use super::search::{FrdivSearch, LOW_RANGE_DIVISORS};

/// RDIV dividers with the oscillator in high range.
pub const HIGH_RANGE_DIVISORS: [u32; 6] = [32, 64, 128, 256, 512, 1024];

/// ICS limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct IcsLimits {
    /// Legal FLL reference window, Hz.
    pub reference: (i64, i64),
    /// Fixed FLL multiplication factor.
    pub fll_factor: i64,
    /// Internal reference trim target, Hz.
    pub slow_irc: i64,
}

impl Default for IcsLimits {
    /// KE06 ICS: 31.25-39.0625kHz FLL reference, x1280, IRC trimmed to 37.5kHz (48MHz FLL).
    fn default() -> Self {
        Self {
            reference: (31_250, 39_063),
            fll_factor: 1280,
            slow_irc: 37_500,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum IcsMode {
    None,
    Fei,
    Fee,
    Fbi,
    Fbe,
    Blpi,
    Blpe,
}

impl IcsMode {
    pub const ALL: [Self; 7] = [
        Self::None,
        Self::Fei,
        Self::Fee,
        Self::Fbi,
        Self::Fbe,
        Self::Blpi,
        Self::Blpe,
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
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.strip_prefix("IcsClockMode_").unwrap_or(name);
        Self::ALL.into_iter().find(|m| m.name() == name)
    }

    /// `(clks, irefs, lp, fll enabled)`
    fn fields(self) -> (i64, bool, bool, bool) {
        match self {
            Self::None | Self::Fei => (0, true, false, true),
            Self::Fee => (0, false, false, true),
            Self::Fbi => (1, true, false, true),
            Self::Fbe => (2, false, false, true),
            Self::Blpi => (1, true, true, false),
            Self::Blpe => (2, false, true, false),
        }
    }

    fn source(self) -> &'static str {
        match self {
            Self::None | Self::Fei | Self::Fee => "FLL output",
            Self::Fbi | Self::Blpi => "ICSIRCLK",
            Self::Fbe | Self::Blpe => "OSCCLK",
        }
    }

    fn entry(self) -> ChoiceEntry {
        ChoiceEntry::new(self.name(), format!("IcsClockMode_{}", self.name()))
    }
}

pub fn declare(
    device: &mut Device,
    peripheral: PeripheralId,
    dimension: usize,
    limits: &IcsLimits,
) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::long("system_slow_irc_clock", limits.slow_irc)
            .with_units("Hz")
            .with_bounds(limits.reference.0, limits.reference.1),
    )?;

    let family = |device: &mut Device, variable: Variable| device.declare_family(p, variable, dimension);
    family(device, Variable::text("ClockConfig[]", "ClockConfig"))?;
    family(device, Variable::bool("enableClockConfiguration[]", true))?;
    family(
        device,
        Variable::choice("icsClockMode[]", IcsMode::ALL.iter().map(|m| m.entry()).collect(), 1),
    )?;
    family(device, Variable::long("ics_c1_clks[]", 0).with_bounds(0, 2).locked())?;
    family(device, Variable::bool("ics_c1_irefs[]", true).locked())?;
    family(device, Variable::bool("ics_c2_lp[]", false).locked())?;
    family(device, Variable::long("ics_c1_rdiv[]", 0).with_bounds(0, 7).locked())?;
    family(
        device,
        Variable::long("ics_c2_bdiv[]", 0)
            .with_bounds(0, 7)
            .with_description("ICSOUTCLK divider, as a power of two"),
    )?;
    family(device, Variable::bool("ics_c1_irclken[]", true))?;
    declare_clock_families!(
        device,
        p,
        dimension,
        [
            "ics_erc_clock[]",
            "fllInputFrequency[]",
            "system_icsfllclk_clock[]",
            "system_icsirclk_clock[]",
            "system_icsoutclk_clock[]",
        ]
    );
    family(device, Variable::text("icsClockSource[]", "").locked())?;
    Ok(())
}

struct IcsVars {
    slow_irc: VarId,
    osc_clock: VarId,
    osc_range: VarId,

    clock_config: Family,
    enable_config: Family,
    mode: Family,
    clks: Family,
    irefs: Family,
    lp: Family,
    rdiv: Family,
    bdiv: Family,
    irclken: Family,

    erc: Family,
    fll_input: Family,
    fll: Family,
    icsirclk: Family,
    icsout: Family,
    source: Family,
}

/// Validator for the ICS, one pass per clock configuration.
pub struct IcsValidator {
    limits: IcsLimits,
    dimension: usize,
    vars: Option<IcsVars>,
}

impl IcsValidator {
    pub fn new(limits: IcsLimits, dimension: usize) -> Self {
        Self {
            limits,
            dimension,
            vars: None,
        }
    }

    /// Pick RDIV for the external reference. Returns the divided reference.
    fn divide_reference(
        &self,
        ctx: &mut Context<'_>,
        rdiv: VarId,
        erc: &Clock,
        osc_range: i64,
    ) -> Result<Clock> {
        if let Some(upstream) = erc.status.clone().filter(|s| s.greater_than(Severity::Info)) {
            ctx.set_value(rdiv, 0_i64)?;
            ctx.set_status(rdiv, upstream.clone())?;
            return Ok(erc.clone().with_status(upstream));
        }
        let mut search = FrdivSearch::new(self.limits.reference);
        let origin = match osc_range {
            0 => {
                search.probe(erc.frequency, &LOW_RANGE_DIVISORS);
                "/RDIV (low range)"
            }
            1 | 2 => {
                search.probe(erc.frequency, &HIGH_RANGE_DIVISORS);
                "/RDIV (high range)"
            }
            _ => {
                if search.probe(erc.frequency, &LOW_RANGE_DIVISORS).is_none() {
                    search.probe(erc.frequency, &HIGH_RANGE_DIVISORS);
                }
                "/RDIV"
            }
        };
        if !search.found() {
            let warning = Status::warning(format!(
                "Unable to find suitable divider for external reference clock frequency = {}",
                notation::hz(erc.frequency as f64)
            ));
            ctx.set_value(rdiv, 0_i64)?;
            ctx.set_status(rdiv, warning.clone())?;
            return Ok(erc.clone().note(origin).with_status(warning));
        }
        ctx.set_value(rdiv, search.index())?;
        ctx.clear_status(rdiv)?;
        Ok(Clock {
            frequency: round_i64(search.frequency()),
            ..erc.clone()
        }
        .note(origin))
    }
}

fn filtered(clock: &Clock) -> Clock {
    Clock {
        status: clock.status.clone().filter(|s| s.greater_than(Severity::Info)),
        enabled: true,
        ..clock.clone()
    }
}

impl IndexedValidator for IcsValidator {
    fn name(&self) -> &str {
        "IcsValidator"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let dim = self.dimension;
        let vars = IcsVars {
            slow_irc: ctx.watch("system_slow_irc_clock")?,
            osc_clock: ctx.watch("/OSC0/osc_clock")?,
            osc_range: ctx.watch("/OSC0/oscillatorRange")?,

            clock_config: ctx.watch_family("ClockConfig[]", dim)?,
            enable_config: ctx.watch_family("enableClockConfiguration[]", dim)?,
            mode: ctx.watch_family("icsClockMode[]", dim)?,
            clks: ctx.family("ics_c1_clks[]", dim)?,
            irefs: ctx.family("ics_c1_irefs[]", dim)?,
            lp: ctx.family("ics_c2_lp[]", dim)?,
            rdiv: ctx.family("ics_c1_rdiv[]", dim)?,
            bdiv: ctx.watch_family("ics_c2_bdiv[]", dim)?,
            irclken: ctx.watch_family("ics_c1_irclken[]", dim)?,

            erc: ctx.family("ics_erc_clock[]", dim)?,
            fll_input: ctx.family("fllInputFrequency[]", dim)?,
            fll: ctx.family("system_icsfllclk_clock[]", dim)?,
            icsirclk: ctx.family("system_icsirclk_clock[]", dim)?,
            icsout: ctx.family("system_icsoutclk_clock[]", dim)?,
            source: ctx.family("icsClockSource[]", dim)?,
        };
        pin_first_configuration(ctx, &vars.enable_config)?;
        self.vars = Some(vars);
        Ok(())
    }

    fn validate(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>, index: usize) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };
        let i = index;

        check_configuration(ctx, v.clock_config.at(i), v.enable_config.at(i))?;

        let erc = Clock::read(ctx, v.osc_clock)?;
        erc.write(ctx, v.erc.at(i))?;
        let osc_range = ctx.long(v.osc_range)?;
        let divided = self.divide_reference(ctx, v.rdiv.at(i), &erc, osc_range)?;

        let mode_name = ctx.choice_name(v.mode.at(i));
        let mode = IcsMode::from_name(&mode_name).ok_or_else(|| PropagationError::UnhandledMode {
            validator: self.name().to_owned(),
            mode: mode_name.clone(),
        })?;
        let (clks, irefs, lp, fll_enabled) = mode.fields();
        ctx.set_value(v.clks.at(i), clks)?;
        ctx.set_value(v.irefs.at(i), irefs)?;
        ctx.set_value(v.lp.at(i), lp)?;

        let irc = Clock::new(ctx.long(v.slow_irc)?, "Internal reference clock");
        let irclken = ctx.bool(v.irclken.at(i))?;
        if irclken || matches!(mode, IcsMode::Fbi | IcsMode::Blpi) {
            irc.write(ctx, v.icsirclk.at(i))?;
        } else {
            Clock::gated(
                "Internal reference clock[Disabled by ics_c1_irclken]",
                Status::ok("Disabled by ics_c1_irclken"),
            )
            .write(ctx, v.icsirclk.at(i))?;
        }

        // FLL
        let reference = if irefs { irc.clone() } else { divided };
        let reference = Clock {
            enabled: fll_enabled,
            ..reference
        };
        reference.write(ctx, v.fll_input.at(i))?;
        let usable = reference.severity() < Severity::Warning;
        let fll = Clock {
            frequency: if usable {
                reference.frequency * self.limits.fll_factor
            } else {
                0
            },
            origin: format!("{} via FLL", reference.origin),
            status: if fll_enabled {
                reference.status.clone()
            } else {
                Some(Status::warning("FLL is disabled"))
            },
            enabled: fll_enabled && usable,
        };
        fll.write(ctx, v.fll.at(i))?;

        let selected = match mode {
            IcsMode::None | IcsMode::Fei | IcsMode::Fee => filtered(&fll),
            IcsMode::Fbi | IcsMode::Blpi => filtered(&irc),
            IcsMode::Fbe | IcsMode::Blpe => filtered(&erc),
        };
        let icsout = Clock {
            frequency: shift_divide(selected.frequency, ctx.long(v.bdiv.at(i))?),
            ..selected
        }
        .note("/BDIV");
        icsout.write(ctx, v.icsout.at(i))?;

        let source = v.source.at(i);
        ctx.set_value(source, mode.source())?;
        let mode_status = match mode {
            IcsMode::None => Some(Status::warning("No clock settings are applied")),
            _ => icsout.status.clone(),
        };
        ctx.set_status(source, mode_status)?;
        ctx.set_origin(source, icsout.origin)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rdiv_tables_reach_the_reference_window() {
        let limits = IcsLimits::default();

        let mut search = FrdivSearch::new(limits.reference);
        assert_eq!(search.probe(8_000_000, &HIGH_RANGE_DIVISORS), Some(3));
        assert_eq!(search.frequency(), 31_250.0);

        let mut search = FrdivSearch::new(limits.reference);
        assert_eq!(search.probe(32_768, &LOW_RANGE_DIVISORS), Some(0));

        let mut search = FrdivSearch::new(limits.reference);
        assert_eq!(search.probe(50_000_000, &HIGH_RANGE_DIVISORS), None);
        assert!(!search.found());
    }

    #[test]
    fn bypass_modes_skip_the_fll() {
        assert_eq!(IcsMode::Blpe.fields(), (2, false, true, false));
        assert_eq!(IcsMode::Fbi.source(), "ICSIRCLK");
        assert_eq!(IcsMode::from_name("IcsClockMode_FEE"), Some(IcsMode::Fee));
    }
}
