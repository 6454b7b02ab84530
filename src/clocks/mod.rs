//! Clock-generation units. Each hardware family (MCG, MCG-Lite, ICS, SCG) is a validator over
//! the clock configurations of a device, fed by the oscillators (OSC, RTC) and feeding the SIM
//! dividers that produce the core, bus and peripheral clocks.
//!
//! [`ClockTopology`] picks one family and knows how to declare its variables and attach its
//! validator. The shared pieces live here: [`Clock`], a frequency travelling down the tree with
//! its provenance and status, and [`ClockSelector`], a multiplexer whose choices name the
//! clocks they select.

use crate::{
    Result,
    engine::{Device, ValidatorId},
    namespace::{PeripheralId, VarId},
    util::{is_valid_c_identifier, round_i64},
    validator::{Context, Family, Indexed, WatchContext},
    variable::{Scale, Status},
};

pub mod fll;
pub mod ics;
pub mod mcg;
pub mod mcg_lite;
pub mod osc;
pub mod pll;
pub mod rtc;
pub mod scg;
pub mod search;
pub mod sim;

pub use ics::{IcsLimits, IcsValidator};
pub use mcg::{McgLimits, McgMode, McgValidator, McgVariant};
pub use mcg_lite::{McgLiteMode, McgLiteValidator};
pub use osc::{OscLimits, OscValidator};
pub use rtc::RtcValidator;
pub use scg::{ScgLimits, ScgMode, ScgValidator};
pub use search::{FllLimits, PllLimits};
pub use sim::{SimClockValidator, SimFeatures, SimLayout, SimLimits, SimRtcClockValidator};

/// A clock value as read from, or about to be written to, a frequency variable.
#[derive(Clone, Debug, PartialEq)]
pub struct Clock {
    /// Hz
    pub frequency: i64,
    pub origin: String,
    pub status: Option<Status>,
    pub enabled: bool,
}

impl Clock {
    pub fn new(frequency: i64, origin: impl Into<String>) -> Self {
        Self {
            frequency,
            origin: origin.into(),
            status: None,
            enabled: true,
        }
    }

    /// A clock switched off: 0Hz, disabled, with a status saying why.
    pub fn gated(origin: impl Into<String>, status: Status) -> Self {
        Self {
            frequency: 0,
            origin: origin.into(),
            status: Some(status),
            enabled: false,
        }
    }

    /// Read a frequency variable. An enabled clock passes on only its WARNING or ERROR status;
    /// a disabled one passes on the status explaining why it is off.
    pub fn read(ctx: &Context<'_>, id: VarId) -> Result<Self> {
        let var = ctx.var(id);
        let enabled = var.is_enabled();
        let status = if enabled {
            var.filtered_status()
        } else {
            var.status()
        };
        Ok(Self {
            frequency: round_i64(var.as_double()?),
            origin: var.origin().to_owned(),
            status: status.cloned(),
            enabled,
        })
    }

    pub fn with_status(mut self, status: impl Into<Option<Status>>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    /// Append to the provenance text.
    pub fn note(mut self, text: &str) -> Self {
        self.origin.push_str(text);
        self
    }

    /// Apply a multiplexer scale. The scale is recorded in the origin, eg `"...mcgpllclk/2"`.
    pub fn scaled(mut self, scale: Scale) -> Self {
        if scale != Scale::Unity {
            self.frequency = round_i64(scale.apply(self.frequency as f64));
            self.origin = format!("{}{}", self.origin, scale);
        }
        self
    }

    /// Integer division, as a hardware divider does. A zero divisor stops the clock.
    pub fn divided(mut self, divisor: i64) -> Self {
        self.frequency = if divisor > 0 {
            self.frequency / divisor
        } else {
            0
        };
        self
    }

    /// Status severity, treating no status as OK.
    pub fn severity(&self) -> crate::Severity {
        Status::severity_of(self.status.as_ref())
    }

    /// Write value, status, origin and enable state.
    pub fn write(&self, ctx: &mut Context<'_>, id: VarId) -> Result<()> {
        ctx.set_value(id, self.frequency)?;
        ctx.set_status(id, self.status.clone())?;
        ctx.set_origin(id, self.origin.clone())?;
        ctx.enable(id, self.enabled)
    }
}

/// Check a clock configuration name is usable as a C enumerator, and show or hide it with its
/// enable flag.
pub(crate) fn check_configuration(ctx: &mut Context<'_>, name: VarId, enable: VarId) -> Result<()> {
    if is_valid_c_identifier(&ctx.text(name)?) {
        ctx.clear_status(name)?;
    } else {
        ctx.set_status(name, Status::error("Illegal C enum value"))?;
    }
    let enabled = ctx.bool(enable)?;
    ctx.enable(name, enabled)
}

/// Configuration 0 is always in use: pin its enable flag.
pub(crate) fn pin_first_configuration(ctx: &mut WatchContext<'_>, enable: &Family) -> Result<()> {
    ctx.configure(enable.at(0), |v| {
        v.set_locked(true);
        v.enable(false);
        v.set_tool_tip("Clock configuration 0 must always be enabled");
    })
}

/// Result of resolving a multiplexer.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// The selected entry names a clock.
    Clock(Clock),
    /// The selected entry names no clock, eg "Disabled".
    Unreferenced,
    /// The selected entry names a clock this device does not have.
    Unavailable,
}

/// A clock multiplexer: a choice variable whose entries carry clock references.
#[derive(Clone, Debug, PartialEq)]
pub struct ClockSelector {
    selector: VarId,
    sources: Vec<Option<(VarId, Scale)>>,
}

impl ClockSelector {
    /// Resolve and watch the selector behind `key`, and every clock it can select. `[]`
    /// references resolve with the current index of `ctx`.
    pub fn watch(ctx: &mut WatchContext<'_>, key: &str) -> Result<Self> {
        let selector = ctx.watch(key)?;
        Self::from_handle(ctx, selector)
    }

    pub fn safe_watch(ctx: &mut WatchContext<'_>, key: &str) -> Result<Option<Self>> {
        match ctx.safe_watch(key)? {
            Some(selector) => Ok(Some(Self::from_handle(ctx, selector)?)),
            None => Ok(None),
        }
    }

    pub fn from_handle(ctx: &mut WatchContext<'_>, selector: VarId) -> Result<Self> {
        ctx.watch_handle(selector);
        let sources = ctx.choice_sources(selector)?;
        for (id, _) in sources.iter().flatten() {
            ctx.watch_handle(*id);
        }
        Ok(Self { selector, sources })
    }

    pub fn selector(&self) -> VarId {
        self.selector
    }

    /// The clock behind the selected entry, scaled as the entry says.
    pub fn resolve(&self, ctx: &Context<'_>) -> Result<Selection> {
        let index = ctx.var(self.selector).as_choice_index()?;
        let referenced = ctx
            .var(self.selector)
            .selected_choice()
            .is_some_and(|c| c.reference().is_some());
        Ok(match self.sources.get(index).copied().flatten() {
            Some((id, scale)) => Selection::Clock(Clock::read(ctx, id)?.scaled(scale)),
            None if referenced => Selection::Unavailable,
            None => Selection::Unreferenced,
        })
    }

    /// Resolve, coercing a selection of an unavailable clock back to `default`. The coercion
    /// shows up as a status on the selector and the default's clock is used.
    pub fn resolve_or_coerce(&self, ctx: &mut Context<'_>, default: i64) -> Result<Selection> {
        match self.resolve(ctx)? {
            Selection::Unavailable => {
                ctx.coerce_selector(self.selector, default)?;
                match self.resolve(ctx)? {
                    Selection::Unavailable => Ok(Selection::Unreferenced),
                    other => Ok(other),
                }
            }
            other => Ok(other),
        }
    }
}

/// The clock-generation family of a device.
#[derive(Clone, Debug, PartialEq)]
pub enum ClockTopology {
    /// Multipurpose Clock Generator with FLL and PLL (K series).
    Mcg(McgLimits),
    /// MCG with the PLL stage absent.
    McgNoPll(McgLimits),
    /// Lite MCG: LIRC 2/8MHz and HIRC 48MHz, no FLL or PLL (KL series).
    McgLite,
    /// Internal Clock Source: a single FLL (KE series).
    Ics(IcsLimits),
    /// System Clock Generator (S32K).
    Scg(ScgLimits),
}

impl ClockTopology {
    /// Name of the peripheral holding the unit's variables.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mcg(_) | Self::McgNoPll(_) | Self::McgLite => "MCG",
            Self::Ics(_) => "ICS",
            Self::Scg(_) => "SCG",
        }
    }

    /// Names of the clock modes the unit can run in.
    pub fn modes(&self) -> Vec<&'static str> {
        match self {
            Self::Mcg(_) => McgMode::ALL.iter().map(|m| m.name()).collect(),
            Self::McgNoPll(_) => McgMode::ALL
                .iter()
                .filter(|m| !m.uses_pll())
                .map(|m| m.name())
                .collect(),
            Self::McgLite => McgLiteMode::ALL.iter().map(|m| m.name()).collect(),
            Self::Ics(_) => ics::IcsMode::ALL.iter().map(|m| m.name()).collect(),
            Self::Scg(_) => ScgMode::ALL.iter().map(|m| m.name()).collect(),
        }
    }

    /// Key of the clock the SIM core and bus dividers run from. The SCG has its own.
    pub fn system_clock_key(&self) -> Option<&'static str> {
        match self {
            Self::Mcg(_) | Self::McgNoPll(_) | Self::McgLite => Some("/MCG/system_mcgoutclk_clock[]"),
            Self::Ics(_) => Some("/ICS/system_icsoutclk_clock[]"),
            Self::Scg(_) => None,
        }
    }

    /// Key of the internal reference clock offered to low-power peripherals.
    pub fn internal_reference_key(&self) -> &'static str {
        match self {
            Self::Mcg(_) | Self::McgNoPll(_) | Self::McgLite => "/MCG/system_mcgirclk_clock[]",
            Self::Ics(_) => "/ICS/system_icsirclk_clock[]",
            Self::Scg(_) => "/SCG/sirc_div2_clock",
        }
    }

    /// Key of the bus clock that on-chip peripherals count from, in clock configuration 0.
    pub fn bus_clock_key(&self) -> &'static str {
        match self {
            Self::Scg(_) => "/SCG/run_mode_bus_clock",
            _ => "/SIM/system_bus_clock[]",
        }
    }

    /// Add the unit's peripheral and declare its variables, `dimension` clock configurations
    /// deep.
    pub fn declare(&self, device: &mut Device, dimension: usize) -> Result<PeripheralId> {
        let peripheral = device.add_peripheral(self.name())?;
        match self {
            Self::Mcg(limits) => mcg::declare(device, peripheral, dimension, McgVariant::Full, limits)?,
            Self::McgNoPll(limits) => {
                mcg::declare(device, peripheral, dimension, McgVariant::NoPll, limits)?
            }
            Self::McgLite => mcg_lite::declare(device, peripheral, dimension)?,
            Self::Ics(limits) => ics::declare(device, peripheral, dimension, limits)?,
            Self::Scg(limits) => scg::declare(device, peripheral, dimension, limits)?,
        }
        Ok(peripheral)
    }

    /// Attach the unit's validator.
    pub fn attach(
        &self,
        device: &mut Device,
        peripheral: PeripheralId,
        dimension: usize,
    ) -> Result<ValidatorId> {
        match self {
            Self::Mcg(limits) => device.attach(
                peripheral,
                Indexed(McgValidator::new(McgVariant::Full, *limits, dimension)),
            ),
            Self::McgNoPll(limits) => device.attach(
                peripheral,
                Indexed(McgValidator::new(McgVariant::NoPll, *limits, dimension)),
            ),
            Self::McgLite => device.attach(peripheral, Indexed(McgLiteValidator::new(dimension))),
            Self::Ics(limits) => device.attach(peripheral, Indexed(IcsValidator::new(*limits, dimension))),
            Self::Scg(limits) => device.attach(peripheral, ScgValidator::new(*limits)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_clocks_record_the_scale() {
        let clock = Clock::new(96_000_000, "PLL").scaled(Scale::Divide(2));
        assert_eq!(clock.frequency, 48_000_000);
        assert_eq!(clock.origin, "PLL/2");

        let clock = Clock::new(48_000_000, "IRC48M").scaled(Scale::Unity);
        assert_eq!(clock.origin, "IRC48M");
    }

    #[test]
    fn zero_divisor_stops_the_clock() {
        assert_eq!(Clock::new(8_000_000, "OSC").divided(0).frequency, 0);
        assert_eq!(Clock::new(8_000_000, "OSC").divided(3).frequency, 2_666_666);
    }

    #[test]
    fn no_pll_topology_hides_pll_modes() {
        let modes = ClockTopology::McgNoPll(McgLimits::default()).modes();
        assert!(modes.contains(&"FEE"));
        assert!(!modes.contains(&"PEE"));
        assert_eq!(ClockTopology::Mcg(McgLimits::default()).modes().len(), 9);
    }
}
