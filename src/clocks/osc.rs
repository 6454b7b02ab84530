//! External oscillator (OSC0). Classifies the crystal or external clock into a frequency range,
//! and produces OSCCLK, the 32kHz oscillator clock and the gated OSCERCLK.

use crate::{
    Result,
    clocks::Clock,
    engine::Device,
    namespace::{PeripheralId, VarId},
    notation,
    validator::{Context, Validator, WatchContext},
    variable::{Severity, Status, Variable},
};

/// `oscillatorRange` value when the oscillator does not constrain the FLL divider range.
pub const UNCONSTRAINED_RANGE: i64 = 3;

/// Oscillator frequency ranges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct OscLimits {
    /// Crystal, low range (32kHz crystals), Hz.
    pub low: (i64, i64),
    /// Crystal, high range.
    pub high: (i64, i64),
    /// Crystal, very high range.
    pub very_high: (i64, i64),
    /// Highest external clock accepted on EXTAL.
    pub external_max: i64,
}

impl Default for OscLimits {
    /// Kinetis OSC: crystal ranges 32-40kHz, 3-8MHz and 8-32MHz, external clock up to 50MHz.
    fn default() -> Self {
        Self {
            low: (32_000, 40_000),
            high: (3_000_000, 8_000_000),
            very_high: (8_000_000, 32_000_000),
            external_max: 50_000_000,
        }
    }
}

fn within(range: (i64, i64), frequency: i64) -> bool {
    (range.0..=range.1).contains(&frequency)
}

fn bracket(range: (i64, i64)) -> String {
    format!(
        "[{},{}]",
        notation::hz(range.0 as f64),
        notation::hz(range.1 as f64)
    )
}

impl OscLimits {
    fn crystal_message(&self) -> String {
        format!(
            "External crystal frequency not suitable for oscillator\nRanges {}, {}, {}",
            bracket(self.low),
            bracket(self.high),
            bracket(self.very_high)
        )
    }

    fn osc32k_message(&self) -> String {
        format!(
            "External crystal frequency not suitable for 32k Oscillator mode\nRange {}",
            bracket(self.low)
        )
    }

    fn external_message(&self) -> String {
        format!(
            "External clock frequency is too high\nMax={}",
            notation::hz(self.external_max as f64)
        )
    }

    /// Range setting and origin note for a crystal, or `None` when no range fits.
    fn crystal_range(&self, frequency: i64) -> Option<(i64, &'static str)> {
        if within(self.low, frequency) {
            Some((0, " (low range)"))
        } else if within(self.high, frequency) {
            Some((1, " (high range)"))
        } else if within(self.very_high, frequency) {
            Some((2, " (very high range)"))
        } else {
            None
        }
    }
}

/// Declare the oscillator's variables. `standalone` adds the oscillator-select field for
/// devices without an MCG, where `osc_cr_oscos` takes the place of `mcg_c2_erefs0`.
pub fn declare(
    device: &mut Device,
    peripheral: PeripheralId,
    crystal: i64,
    standalone: bool,
) -> Result<()> {
    device.declare(
        peripheral,
        Variable::long("osc_input_freq", crystal)
            .with_units("Hz")
            .with_description("Frequency of the crystal or external clock on EXTAL"),
    )?;
    device.declare(peripheral, Variable::bool("osc_cr_erclken", true))?;
    device.declare(peripheral, Variable::bool("osc_cr_erefsten", false))?;
    device.declare(
        peripheral,
        Variable::long("osc_cr_scp", 0)
            .with_bounds(0, 30)
            .with_units("pF")
            .with_description("Oscillator load capacitance"),
    )?;
    device.declare(
        peripheral,
        Variable::long("oscillatorRange", UNCONSTRAINED_RANGE)
            .with_bounds(0, UNCONSTRAINED_RANGE)
            .locked(),
    )?;
    device.declare(
        peripheral,
        Variable::long("osc_div_erps", 0)
            .with_bounds(0, 3)
            .with_description("OSCERCLK prescaler, as a power of two"),
    )?;
    if standalone {
        device.declare(
            peripheral,
            Variable::bool("osc_cr_oscos", true).with_description("Oscillator (true) or external clock"),
        )?;
    }
    declare_clocks!(
        device,
        peripheral,
        ["osc_clock", "osc32k_clock", "oscer_undiv_clock", "oscer_clock"]
    );
    Ok(())
}

struct OscVars {
    name: String,
    input: VarId,
    erclken: VarId,
    erefsten: VarId,
    scp: VarId,
    range: VarId,
    erps: Option<VarId>,
    osc: VarId,
    osc32k: VarId,
    undiv: Option<VarId>,
    oscer: VarId,
    /// Oscillator (true) or external clock select.
    erefs: VarId,
    hgo: Option<VarId>,
    rtc_osce: Option<VarId>,
}

/// Validator for the OSC0 peripheral.
pub struct OscValidator {
    limits: OscLimits,
    /// The RTC oscillator shares the XTAL/EXTAL pins, and takes them over when enabled.
    shared_pins: bool,
    vars: Option<OscVars>,
}

impl OscValidator {
    pub fn new(limits: OscLimits, shared_pins: bool) -> Self {
        Self {
            limits,
            shared_pins,
            vars: None,
        }
    }
}

impl Validator for OscValidator {
    fn name(&self) -> &str {
        "OscValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let erefs = match ctx.safe_watch("/MCG/mcg_c2_erefs0")? {
            Some(id) => id,
            None => ctx.watch("osc_cr_oscos")?,
        };
        let rtc_osce = if self.shared_pins {
            ctx.safe_watch("/RTC/rtc_cr_osce")?
        } else {
            None
        };
        self.vars = Some(OscVars {
            name: ctx.peripheral_name().to_owned(),
            input: ctx.watch("osc_input_freq")?,
            erclken: ctx.watch("osc_cr_erclken")?,
            erefsten: ctx.lookup("osc_cr_erefsten")?,
            scp: ctx.lookup("osc_cr_scp")?,
            range: ctx.lookup("oscillatorRange")?,
            erps: ctx.safe_watch("osc_div_erps")?,
            osc: ctx.lookup("osc_clock")?,
            osc32k: ctx.lookup("osc32k_clock")?,
            undiv: ctx.safe_lookup("oscer_undiv_clock")?,
            oscer: ctx.lookup("oscer_clock")?,
            erefs,
            hgo: ctx.safe_watch("/MCG/mcg_c2_hgo0")?,
            rtc_osce,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };
        let limits = &self.limits;

        let input = ctx.long(v.input)?;
        let erclken = ctx.bool(v.erclken)?;
        let rtc_forcing = match v.rtc_osce {
            Some(osce) => ctx.bool(osce)?,
            None => false,
        };

        let mut origin = v.name.clone();
        let mut status = None;
        let mut range = UNCONSTRAINED_RANGE;
        let mut range_origin = "Unused";
        let mut range_status = None;

        if rtc_forcing {
            let shared = Status::warning("Feature is controlled by RTC which shares XTAL/EXTAL pins");
            for id in [Some(v.erefs), Some(v.scp), v.hgo].into_iter().flatten() {
                ctx.enable(id, false)?;
                ctx.set_status(id, shared.clone())?;
            }
            range_status = Some(shared);
            range = 0;
            range_origin = "Forced by RTC";
            origin.push_str(" Forced by RTC");
            if within(limits.low, input) {
                origin.push_str(" (low range)");
            } else {
                origin.push_str(" (invalid range)");
                status = Some(Status::warning(limits.osc32k_message()));
            }
        } else {
            ctx.enable(v.erefsten, erclken)?;
            ctx.clear_status(v.erefsten)?;
            ctx.enable(v.erefs, true)?;
            ctx.clear_status(v.erefs)?;

            let in_use = ctx.bool(v.erefs)?;
            if in_use {
                ctx.set_min(v.input, Some(limits.low.0 as f64))?;
                ctx.set_max(v.input, Some(limits.very_high.1 as f64))?;
                match limits.crystal_range(input) {
                    Some((r, note)) => {
                        origin.push_str(note);
                        range = r;
                        range_origin = "Determined by Crystal Frequency";
                    }
                    None => {
                        origin.push_str(" (invalid range)");
                        status = Some(Status::error(limits.crystal_message()));
                    }
                }
            } else {
                ctx.set_min(v.input, Some(limits.low.0 as f64))?;
                ctx.set_max(v.input, Some(limits.external_max as f64))?;
                origin.push_str(" (External clock)");
                if input > limits.external_max {
                    status = Some(Status::error(limits.external_message()));
                }
            }
            for id in [Some(v.scp), v.hgo].into_iter().flatten() {
                ctx.enable(id, in_use)?;
                ctx.clear_status(id)?;
            }
        }

        let usable = Status::severity_of(status.as_ref()) < Severity::Warning;
        let osc = Clock {
            frequency: if usable { input } else { 0 },
            origin,
            status,
            enabled: usable,
        };
        osc.write(ctx, v.osc)?;

        let mut osc32k = osc.clone();
        if !within(limits.low, osc32k.frequency) {
            if osc32k.severity() < Severity::Error {
                osc32k.status = Some(Status::warning(limits.osc32k_message()));
            }
            osc32k.origin.push_str("(invalid range for 32kHz clock)");
        }
        if osc32k.status.is_some() {
            osc32k.frequency = 0;
            osc32k.enabled = false;
        }
        osc32k.write(ctx, v.osc32k)?;

        ctx.set_value(v.range, range)?;
        ctx.set_origin(v.range, range_origin)?;
        ctx.set_status(v.range, range_status)?;
        ctx.enable(v.range, !rtc_forcing)?;

        if erclken {
            let filtered = osc.status.clone().filter(|s| s.greater_than(Severity::Info));
            let undivided = Clock {
                status: filtered,
                enabled: true,
                ..osc
            };
            if let Some(undiv) = v.undiv {
                undivided.write(ctx, undiv)?;
            }
            let oscer = match v.erps {
                Some(erps) => {
                    let shift = ctx.long(erps)?;
                    ctx.enable(erps, true)?;
                    Clock {
                        frequency: crate::util::shift_divide(undivided.frequency, shift),
                        ..undivided
                    }
                    .note("/osc_div_erps")
                }
                None => undivided,
            };
            oscer.write(ctx, v.oscer)?;
        } else {
            let off = Status::ok("Disabled by osc_cr_erclken");
            let gated = Clock::gated(
                crate::util::chain(&osc.origin, "[Disabled by osc_cr_erclken]"),
                off,
            );
            if let Some(undiv) = v.undiv {
                gated.write(ctx, undiv)?;
            }
            gated.write(ctx, v.oscer)?;
            if let Some(erps) = v.erps {
                ctx.enable(erps, false)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crystal_ranges() {
        let limits = OscLimits::default();
        assert_eq!(limits.crystal_range(32_768), Some((0, " (low range)")));
        assert_eq!(limits.crystal_range(8_000_000), Some((1, " (high range)")));
        assert_eq!(limits.crystal_range(16_000_000), Some((2, " (very high range)")));
        assert_eq!(limits.crystal_range(1_000_000), None);
    }

    #[test]
    fn messages_quote_the_ranges() {
        let limits = OscLimits::default();
        assert_eq!(
            limits.crystal_message(),
            "External crystal frequency not suitable for oscillator\n\
             Ranges [32.0kHz,40.0kHz], [3.00MHz,8.00MHz], [8.00MHz,32.0MHz]"
        );
        assert_eq!(limits.external_message(), "External clock frequency is too high\nMax=50.0MHz");
    }
}
