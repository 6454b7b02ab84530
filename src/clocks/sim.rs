//! System Integration Module clocking: the core, bus, flash and flexbus dividers fed by the
//! clock-generation unit, the peripheral clock multiplexer and its post-divider, the USB FS
//! clock, the low-power peripheral clock selectors and the 32kHz ERCLK32K selection.
//!
//! The core, bus, flash and flexbus frequencies are targets. Editing one snaps it to the nearest
//! frequency the dividers can produce. Any other change only checks the targets still hold.

use crate::{
    Result,
    clocks::{
        Clock, ClockSelector, ClockTopology, Selection,
        search::{DivisorSearch, find_divisor},
    },
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::chain,
    validator::{Context, Family, IndexedValidator, Validator, WatchContext},
    variable::{ChoiceEntry, Severity, Status, Variable},
};

/// Frequency USB FS needs.
const USB_FREQUENCY: i64 = 48_000_000;

/// Maximum frequencies of the SIM outputs, Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct SimLimits {
    pub core_max: i64,
    pub bus_max: i64,
    pub flash_max: i64,
    /// `None` on devices without a FlexBus divider.
    pub flexbus_max: Option<i64>,
}

impl Default for SimLimits {
    /// K64 in RUN mode: core 120MHz, bus 60MHz, flash 25MHz, FlexBus 50MHz.
    fn default() -> Self {
        Self {
            core_max: 120_000_000,
            bus_max: 60_000_000,
            flash_max: 25_000_000,
            flexbus_max: Some(50_000_000),
        }
    }
}

impl SimLimits {
    /// KL series: core 48MHz, bus and flash 24MHz, no FlexBus.
    pub fn kl() -> Self {
        Self {
            core_max: 48_000_000,
            bus_max: 24_000_000,
            flash_max: 24_000_000,
            flexbus_max: None,
        }
    }
}

/// Divider arrangement of the SIM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum SimLayout {
    /// OUTDIV1..4 all divide the system clock. Bus, flash and flexbus divisors are multiples of
    /// the core divisor, at most 8 times it.
    K,
    /// OUTDIV1 gives the core clock, OUTDIV4 divides the core clock again for bus and flash.
    Kl,
}

/// Optional parts of the SIM on a given device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SimFeatures {
    /// Frequency of the system clock out of reset. The targets start at what the dividers
    /// make of it.
    pub reset_clock: i64,
    /// `sim_sopt2_pllfllsel` selects the peripheral clock.
    pub peripheral_select: bool,
    /// `sim_clkdiv3_pllfll` divides the peripheral clock.
    pub postdivider: bool,
    pub usb: bool,
    /// Peripherals with a low-power clock selector, eg `"tpm"` for `sim_sopt2_tpmsrc`.
    pub lp_clocks: Vec<&'static str>,
}

/// Frequencies the dividers aim for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Targets {
    core: i64,
    bus: i64,
    flash: i64,
    flexbus: i64,
}

/// Outcome of the divider searches for one configuration.
#[derive(Clone, Debug, PartialEq)]
struct Dividers {
    core: DivisorSearch,
    bus: DivisorSearch,
    flash: Option<DivisorSearch>,
    flexbus: Option<DivisorSearch>,
}

impl SimLayout {
    fn search(self, limits: &SimLimits, input: i64, targets: Targets) -> Dividers {
        let core = find_divisor(input, targets.core, (1..=16).rev(), |_, f| f <= limits.core_max);
        let core_divisor = core.divisor;
        match self {
            Self::K => {
                let multiple = |d: u32| core_divisor != 0 && d % core_divisor == 0 && d / core_divisor <= 8;
                let bus = find_divisor(input, targets.bus, (1..=16).rev(), |d, f| {
                    f <= limits.bus_max && multiple(d)
                });
                let bus_frequency = bus.nearest.unwrap_or(0);
                let flexbus = limits.flexbus_max.map(|max| {
                    find_divisor(input, targets.flexbus, (1..=16).rev(), |d, f| {
                        f <= max && f <= bus_frequency && multiple(d)
                    })
                });
                let flash = find_divisor(input, targets.flash, (1..=16).rev(), |d, f| {
                    f <= limits.flash_max && f <= bus_frequency && multiple(d)
                });
                Dividers {
                    core,
                    bus,
                    flash: Some(flash),
                    flexbus,
                }
            }
            Self::Kl => {
                let core_frequency = core.nearest.unwrap_or(0);
                let bus = find_divisor(core_frequency, targets.bus, (1..=8).rev(), |_, f| {
                    f <= limits.bus_max && f <= core_frequency
                });
                Dividers {
                    core,
                    bus,
                    flash: None,
                    flexbus: None,
                }
            }
        }
    }

    /// What the dividers make of the reset clock, aiming for the reset clock everywhere.
    fn reset_targets(self, limits: &SimLimits, reset: i64) -> Targets {
        let dividers = self.search(
            limits,
            reset,
            Targets {
                core: reset,
                bus: reset,
                flash: reset,
                flexbus: reset,
            },
        );
        let nearest = |search: Option<&DivisorSearch>| search.and_then(|s| s.nearest).unwrap_or(0);
        Targets {
            core: nearest(Some(&dividers.core)),
            bus: nearest(Some(&dividers.bus)),
            flash: nearest(dividers.flash.as_ref()),
            flexbus: nearest(dividers.flexbus.as_ref()),
        }
    }
}

/// Peripheral clock multiplexer entries: MCGFLLCLK, MCGPLLCLK and IRC48MCLK.
fn peripheral_select_entries() -> Result<Vec<ChoiceEntry>> {
    Ok(vec![
        ChoiceEntry::new("MCGFLLCLK clock", "0").with_reference("/MCG/system_mcgfllclk_clock[]")?,
        ChoiceEntry::new("MCGPLLCLK clock", "1").with_reference("/MCG/system_mcgpllclk_clock[]")?,
        ChoiceEntry::new("IRC48MCLK clock", "3").with_reference("/MCG/system_irc48m_clock")?,
    ])
}

/// Low-power peripheral clock entries: disabled, peripheral clock, OSCERCLK and the internal
/// reference clock of the clock-generation unit.
fn lp_entries(peripheral_clock: &str, internal_reference: &str) -> Result<Vec<ChoiceEntry>> {
    Ok(vec![
        ChoiceEntry::new("Disabled", "0"),
        ChoiceEntry::new("Peripheral clock", "1").with_reference(peripheral_clock)?,
        ChoiceEntry::new("OSCERCLK clock", "2").with_reference("/OSC0/oscer_clock")?,
        ChoiceEntry::new("Internal reference clock", "3").with_reference(internal_reference)?,
    ])
}

fn peripheral_clock_key(features: &SimFeatures) -> &'static str {
    if features.postdivider {
        "system_peripheral_postdivider_clock[]"
    } else {
        "system_peripheral_clock[]"
    }
}

/// Declare the SIM clock variables for `dimension` clock configurations.
pub fn declare(
    device: &mut Device,
    peripheral: PeripheralId,
    dimension: usize,
    layout: SimLayout,
    limits: &SimLimits,
    topology: &ClockTopology,
    features: &SimFeatures,
) -> Result<()> {
    let p = peripheral;
    let family = |device: &mut Device, variable: Variable| device.declare_family(p, variable, dimension);
    let targets = layout.reset_targets(limits, features.reset_clock);
    let target = |name: &str, value: i64, max: i64| {
        Variable::long(name, value).with_units("Hz").with_bounds(0, max)
    };
    let divider = |name: &str, max: i64| Variable::long(name, 1).with_bounds(1, max).locked();

    declare_clock_families!(device, p, dimension, ["system_peripheral_clock[]"]);
    if features.peripheral_select {
        family(device, Variable::choice("sim_sopt2_pllfllsel[]", peripheral_select_entries()?, 0))?;
    }
    if features.postdivider {
        family(
            device,
            Variable::long("sim_clkdiv3_pllfll[]", 0)
                .with_bounds(0, 15)
                .with_description("Peripheral clock divider, (divide - 1) << 1 | fraction"),
        )?;
        declare_clock_families!(device, p, dimension, ["system_peripheral_postdivider_clock[]"]);
    }

    family(device, target("system_core_clock[]", targets.core, limits.core_max))?;
    family(device, target("system_bus_clock[]", targets.bus, limits.bus_max))?;
    family(device, divider("sim_clkdiv1_outdiv1[]", 16))?;
    match layout {
        SimLayout::K => {
            family(device, target("system_flash_clock[]", targets.flash, limits.flash_max))?;
            family(device, divider("sim_clkdiv1_outdiv2[]", 16))?;
            family(device, divider("sim_clkdiv1_outdiv4[]", 16))?;
            if let Some(max) = limits.flexbus_max {
                family(device, target("system_flexbus_clock[]", targets.flexbus, max))?;
                family(device, divider("sim_clkdiv1_outdiv3[]", 16))?;
            }
        }
        SimLayout::Kl => {
            family(device, divider("sim_clkdiv1_outdiv4[]", 8))?;
        }
    }

    if features.usb {
        device.declare(p, Variable::bool("sim_sopt2_usbsrc", true).with_description("Internal (true) or USB_CLKIN"))?;
        device.declare(
            p,
            Variable::long("sim_clkdiv2_usb", 0)
                .with_bounds(0, 15)
                .with_description("USB clock divider, (divide - 1) << 1 | fraction"),
        )?;
        device.declare(p, Variable::long("system_usb_clkin_clock", USB_FREQUENCY).with_units("Hz"))?;
        declare_clocks!(device, p, ["system_usbfs_clock"]);
    }

    let peripheral_clock = peripheral_clock_key(features);
    for name in &features.lp_clocks {
        device.declare(
            p,
            Variable::choice(
                format!("sim_sopt2_{name}src"),
                lp_entries(peripheral_clock, topology.internal_reference_key())?,
                0,
            ),
        )?;
        device.declare(p, Variable::long(format!("system_{name}_clock"), 0).with_units("Hz").locked())?;
    }
    Ok(())
}

struct LpClock {
    selector: ClockSelector,
    clock: VarId,
}

struct Usb {
    source: VarId,
    divider: VarId,
    clkin: VarId,
    clock: VarId,
}

struct SimVars {
    system: Family,
    peripheral: Family,
    peripheral_select: Option<Vec<ClockSelector>>,
    /// Where the peripheral clock comes from when there is no multiplexer.
    peripheral_fallback: Option<Family>,
    postdivider: Option<(Family, Family)>,

    core: Family,
    bus: Family,
    flash: Option<Family>,
    flexbus: Option<Family>,
    outdiv1: Family,
    outdiv2: Option<Family>,
    outdiv3: Option<Family>,
    outdiv4: Family,

    usb: Option<Usb>,
    lp_clocks: Vec<LpClock>,
}

/// Validator for the SIM clock dividers, one pass per clock configuration. The USB and
/// low-power selectors follow configuration 0.
pub struct SimClockValidator {
    layout: SimLayout,
    limits: SimLimits,
    dimension: usize,
    system_key: &'static str,
    lp_names: Vec<&'static str>,
    vars: Option<SimVars>,
}

impl SimClockValidator {
    pub fn new(
        layout: SimLayout,
        limits: SimLimits,
        dimension: usize,
        topology: &ClockTopology,
        features: &SimFeatures,
    ) -> Self {
        Self {
            layout,
            limits,
            dimension,
            system_key: topology.system_clock_key().unwrap_or("/MCG/system_mcgoutclk_clock[]"),
            lp_names: features.lp_clocks.clone(),
            vars: None,
        }
    }

    fn peripheral_clock(&self, ctx: &mut Context<'_>, v: &SimVars, i: usize) -> Result<Clock> {
        let clock = match (&v.peripheral_select, &v.peripheral_fallback) {
            (Some(selectors), _) => match selectors[i].resolve_or_coerce(ctx, 0)? {
                Selection::Clock(clock) => clock,
                _ => Clock::gated("Unavailable", Status::warning("No peripheral clock source")),
            },
            (None, Some(fallback)) => Clock::read(ctx, fallback.at(i))?,
            (None, None) => Clock::read(ctx, v.system.at(i))?,
        };
        Ok(Clock {
            status: clock.status.clone().filter(|s| s.greater_than(Severity::Info)),
            ..clock
        })
    }

    fn usb(&self, ctx: &mut Context<'_>, usb: &Usb, peripheral: &Clock) -> Result<()> {
        let clock = if ctx.bool(usb.source)? {
            let auto = (0..=7_i64)
                .flat_map(|div| (0..=1_i64).map(move |frac| (div, frac)))
                .find(|(div, frac)| peripheral.frequency * (frac + 1) / (div + 1) == USB_FREQUENCY);
            ctx.enable(usb.divider, true)?;
            match auto {
                Some((div, frac)) => {
                    ctx.set_value(usb.divider, (div << 1) | frac)?;
                    ctx.set_origin(usb.divider, "Automatically calculated from input clock")?;
                    ctx.set_locked(usb.divider, true)?;
                }
                None => {
                    ctx.set_origin(usb.divider, "Manually selected")?;
                    ctx.set_locked(usb.divider, false)?;
                }
            }
            let value = ctx.long(usb.divider)?;
            let (div, frac) = ((value >> 1) & 0x7, value & 0x1);
            Clock {
                frequency: peripheral.frequency * (frac + 1) / (div + 1),
                origin: format!("{} after /CLKDIV2", peripheral.origin),
                ..peripheral.clone()
            }
        } else {
            ctx.enable(usb.divider, false)?;
            ctx.set_origin(usb.divider, "Not used with external clock")?;
            ctx.set_locked(usb.divider, false)?;
            Clock::read(ctx, usb.clkin)?.with_origin("USB_CLKIN")
        };
        let clock = if clock.frequency != USB_FREQUENCY {
            clock.with_status(Status::warning("Illegal clock frequency for USB"))
        } else {
            clock
        };
        clock.write(ctx, usb.clock)
    }
}

/// Write a divider target and its status. `snap` moves the target to the nearest frequency the
/// divider can produce; otherwise a target the divider cannot produce is an error.
fn apply_divider(
    ctx: &mut Context<'_>,
    search: &DivisorSearch,
    target: VarId,
    divider: VarId,
    snap: bool,
    upstream: &Clock,
    field: &str,
) -> Result<()> {
    if let (true, Some(nearest)) = (snap, search.nearest) {
        ctx.set_value(target, nearest)?;
    }
    let value = ctx.long(target)?;
    let (text, severity) = if !search.found() || search.nearest != Some(value) {
        (format!("Illegal Frequency\n{}", search.display), Severity::Error)
    } else {
        (search.display.clone(), Severity::Ok)
    };
    let status = Status::worst(
        upstream.status.clone().filter(|s| s.greater_than(Severity::Info)),
        Some(Status::new(text, severity)),
    );
    ctx.set_status(target, status)?;
    ctx.set_origin(target, chain(&upstream.origin, &format!("/{field}")))?;
    if search.found() {
        ctx.set_value(divider, search.divisor)?;
    }
    Ok(())
}

impl IndexedValidator for SimClockValidator {
    fn name(&self) -> &str {
        "SimClockValidator"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let dim = self.dimension;
        let peripheral_select = match ctx.safe_watch_family("sim_sopt2_pllfllsel[]", dim)? {
            Some(family) => {
                let mut selectors = Vec::with_capacity(dim);
                for i in 0..dim {
                    ctx.set_index(i);
                    selectors.push(ClockSelector::from_handle(ctx, family.at(i))?);
                }
                ctx.set_index(0);
                Some(selectors)
            }
            None => None,
        };
        let peripheral_fallback = match ctx.safe_watch_family("/MCG/system_mcgfllclk_clock[]", dim)? {
            Some(family) => Some(family),
            None => match ctx.safe_watch_family("/MCG/system_mcgpclk_clock[]", dim)? {
                Some(family) => Some(family),
                None => ctx.safe_watch_family("/ICS/system_icsfllclk_clock[]", dim)?,
            },
        };
        let postdivider = match ctx.safe_watch_family("sim_clkdiv3_pllfll[]", dim)? {
            Some(divider) => Some((divider, ctx.family("system_peripheral_postdivider_clock[]", dim)?)),
            None => None,
        };
        let usb = match ctx.safe_watch("sim_sopt2_usbsrc")? {
            Some(source) => Some(Usb {
                source,
                divider: ctx.watch("sim_clkdiv2_usb")?,
                clkin: ctx.watch("system_usb_clkin_clock")?,
                clock: ctx.lookup("system_usbfs_clock")?,
            }),
            None => None,
        };
        let mut lp_clocks = Vec::with_capacity(self.lp_names.len());
        for name in &self.lp_names {
            lp_clocks.push(LpClock {
                selector: ClockSelector::watch(ctx, &format!("sim_sopt2_{name}src"))?,
                clock: ctx.lookup(&format!("system_{name}_clock"))?,
            });
        }

        self.vars = Some(SimVars {
            system: ctx.watch_family(self.system_key, dim)?,
            peripheral: ctx.family("system_peripheral_clock[]", dim)?,
            peripheral_select,
            peripheral_fallback,
            postdivider,
            core: ctx.watch_family("system_core_clock[]", dim)?,
            bus: ctx.watch_family("system_bus_clock[]", dim)?,
            flash: ctx.safe_watch_family("system_flash_clock[]", dim)?,
            flexbus: ctx.safe_watch_family("system_flexbus_clock[]", dim)?,
            outdiv1: ctx.family("sim_clkdiv1_outdiv1[]", dim)?,
            outdiv2: ctx.safe_family("sim_clkdiv1_outdiv2[]", dim)?,
            outdiv3: ctx.safe_family("sim_clkdiv1_outdiv3[]", dim)?,
            outdiv4: ctx.family("sim_clkdiv1_outdiv4[]", dim)?,
            usb,
            lp_clocks,
        });
        Ok(())
    }

    fn validate(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>, index: usize) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };
        let i = index;

        let peripheral = self.peripheral_clock(ctx, v, i)?;
        peripheral.write(ctx, v.peripheral.at(i))?;
        let divided_peripheral = match &v.postdivider {
            Some((divider, clock)) => {
                let value = ctx.long(divider.at(i))?;
                let (div, frac) = ((value >> 1) & 0x7, value & 0x1);
                let divided = Clock {
                    frequency: peripheral.frequency * (frac + 1) / (div + 1),
                    origin: format!("{} after /CLKDIV3", peripheral.origin),
                    ..peripheral.clone()
                };
                divided.write(ctx, clock.at(i))?;
                divided
            }
            None => peripheral.clone(),
        };

        let system = Clock::read(ctx, v.system.at(i))?;
        let read = |family: &Option<Family>, ctx: &Context<'_>| -> Result<i64> {
            match family {
                Some(f) => ctx.long(f.at(i)),
                None => Ok(0),
            }
        };
        let targets = Targets {
            core: ctx.long(v.core.at(i))?,
            bus: ctx.long(v.bus.at(i))?,
            flash: read(&v.flash, ctx)?,
            flexbus: read(&v.flexbus, ctx)?,
        };
        let dividers = self.layout.search(&self.limits, system.frequency, targets);
        let snap = |target: VarId| changed == Some(target);

        apply_divider(ctx, &dividers.core, v.core.at(i), v.outdiv1.at(i), snap(v.core.at(i)), &system, "OUTDIV1")?;
        match self.layout {
            SimLayout::K => {
                if let Some(outdiv2) = &v.outdiv2 {
                    apply_divider(ctx, &dividers.bus, v.bus.at(i), outdiv2.at(i), snap(v.bus.at(i)), &system, "OUTDIV2")?;
                }
                if let (Some(search), Some(flexbus), Some(outdiv3)) = (&dividers.flexbus, &v.flexbus, &v.outdiv3) {
                    let target = flexbus.at(i);
                    apply_divider(ctx, search, target, outdiv3.at(i), snap(target), &system, "OUTDIV3")?;
                }
                if let (Some(search), Some(flash)) = (&dividers.flash, &v.flash) {
                    let target = flash.at(i);
                    apply_divider(ctx, search, target, v.outdiv4.at(i), snap(target), &system, "OUTDIV4")?;
                }
            }
            SimLayout::Kl => {
                let core = Clock {
                    frequency: dividers.core.nearest.unwrap_or(0),
                    origin: chain(&system.origin, "/OUTDIV1"),
                    ..system.clone()
                };
                apply_divider(ctx, &dividers.bus, v.bus.at(i), v.outdiv4.at(i), snap(v.bus.at(i)), &core, "OUTDIV4")?;
            }
        }

        if i == 0 {
            if let Some(usb) = &v.usb {
                self.usb(ctx, usb, &peripheral)?;
            }
            for lp in &v.lp_clocks {
                let clock = match lp.selector.resolve_or_coerce(ctx, 0)? {
                    Selection::Clock(clock) => clock,
                    _ => Clock {
                        frequency: 0,
                        origin: String::from("Disabled"),
                        status: None,
                        enabled: false,
                    },
                };
                clock.write(ctx, lp.clock)?;
            }
        }
        tracing::trace!(index = i, core = dividers.core.divisor, bus = dividers.bus.divisor, peripheral = divided_peripheral.frequency, "sim dividers");
        Ok(())
    }
}

/// Declare the ERCLK32K selection, and the RTC clock output when the device has an RTC.
pub fn declare_rtc_clocks(device: &mut Device, peripheral: PeripheralId, rtc: bool) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::long("system_low_power_clock", 1_000)
            .with_units("Hz")
            .with_description("LPO 1kHz")
            .locked(),
    )?;
    let entries = vec![
        ChoiceEntry::new("OSC32KCLK", "0").with_reference("/OSC0/osc32k_clock")?,
        ChoiceEntry::new("RTC 32kHz oscillator", "2").with_reference("/RTC/osc_clock")?,
        ChoiceEntry::new("LPO 1kHz", "3").with_reference("system_low_power_clock")?,
    ];
    device.declare(p, Variable::choice("sim_sopt1_osc32ksel", entries, usize::from(rtc)))?;
    declare_clocks!(device, p, ["system_erclk32k_clock"]);
    if rtc {
        device.declare(
            p,
            Variable::bool("sim_sopt2_rtcclkoutsel", false).with_description("RTC 32kHz clock (true) or 1Hz clock"),
        )?;
        declare_clocks!(device, p, ["rtc_clkout"]);
    }
    Ok(())
}

struct RtcClockOut {
    select: VarId,
    one_hz: VarId,
    oscillator: VarId,
    clkout: VarId,
}

/// Validator for ERCLK32K and the RTC clock output pin.
pub struct SimRtcClockValidator {
    shared_pins: bool,
    erclk32k: Option<(ClockSelector, VarId)>,
    clkout: Option<RtcClockOut>,
}

impl SimRtcClockValidator {
    /// With `shared_pins` the RTC runs from OSC0 in 32kHz mode, so its clock output is OSCERCLK.
    pub fn new(shared_pins: bool) -> Self {
        Self {
            shared_pins,
            erclk32k: None,
            clkout: None,
        }
    }
}

impl Validator for SimRtcClockValidator {
    fn name(&self) -> &str {
        "SimRtcClockValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        self.erclk32k = Some((
            ClockSelector::watch(ctx, "sim_sopt1_osc32ksel")?,
            ctx.lookup("system_erclk32k_clock")?,
        ));
        self.clkout = match ctx.safe_watch("sim_sopt2_rtcclkoutsel")? {
            Some(select) => Some(RtcClockOut {
                select,
                one_hz: ctx.watch("/RTC/rtc_1hz_clock")?,
                oscillator: if self.shared_pins {
                    ctx.watch("/OSC0/oscer_clock")?
                } else {
                    ctx.watch("/RTC/rtcclk_gated_clock")?
                },
                clkout: ctx.lookup("rtc_clkout")?,
            }),
            None => None,
        };
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        if let Some((selector, clock)) = &self.erclk32k {
            let erclk32k = match selector.resolve_or_coerce(ctx, 0)? {
                Selection::Clock(clock) => clock,
                _ => Clock::gated("ERCLK32K", Status::warning("No 32kHz clock source available")),
            };
            erclk32k.write(ctx, *clock)?;
        }
        if let Some(out) = &self.clkout {
            let source = if ctx.bool(out.select)? { out.oscillator } else { out.one_hz };
            Clock::read(ctx, source)?.write(ctx, out.clkout)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(core: i64, bus: i64, flash: i64, flexbus: i64) -> Targets {
        Targets {
            core,
            bus,
            flash,
            flexbus,
        }
    }

    #[test]
    fn bus_divisor_is_a_multiple_of_the_core_divisor() {
        let limits = SimLimits::default();
        let dividers = SimLayout::K.search(&limits, 48_000_000, targets(48_000_000, 24_000_000, 24_000_000, 24_000_000));
        assert_eq!(dividers.core.divisor, 1);
        assert_eq!(dividers.bus.divisor, 2);
        assert_eq!(dividers.bus.nearest, Some(24_000_000));
        assert_eq!(dividers.flash.map(|f| f.divisor), Some(2));

        // Core /3 leaves only /3, /6 ... /15 for the bus
        let dividers = SimLayout::K.search(&limits, 120_000_000, targets(40_000_000, 60_000_000, 20_000_000, 40_000_000));
        assert_eq!(dividers.core.divisor, 3);
        assert!(dividers.bus.candidates.iter().all(|(d, _)| d % 3 == 0));
        assert_eq!(dividers.bus.divisor, 3);
    }

    #[test]
    fn kl_bus_divides_the_core_clock() {
        let limits = SimLimits::kl();
        let dividers = SimLayout::Kl.search(&limits, 48_000_000, targets(48_000_000, 24_000_000, 0, 0));
        assert_eq!(dividers.core.divisor, 1);
        assert_eq!(dividers.bus.divisor, 2);
        assert!(dividers.flash.is_none());
    }

    #[test]
    fn reset_targets_follow_the_limits() {
        let targets = SimLayout::K.reset_targets(&SimLimits::default(), 20_971_520);
        assert_eq!(targets.core, 20_971_520);
        assert_eq!(targets.bus, 20_971_520);
        assert_eq!(targets.flash, 20_971_520);

        let targets = SimLayout::Kl.reset_targets(&SimLimits::kl(), 48_000_000);
        assert_eq!((targets.core, targets.bus), (48_000_000, 24_000_000));
    }
}
