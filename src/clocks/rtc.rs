//! RTC oscillator. Either an independent 32kHz oscillator, or the OSC0 pins taken over in
//! 32kHz mode. Produces the RTC oscillator clock, the gated RTC clock output and the 1Hz clock.

use crate::{
    Result,
    clocks::Clock,
    engine::Device,
    namespace::{PeripheralId, VarId},
    notation,
    util::round_i64,
    validator::{Context, Validator, WatchContext},
    variable::{Status, Variable},
};

/// Legal RTC crystal range, Hz.
pub const RTC_CRYSTAL_RANGE: (i64, i64) = (32_000, 40_000);

/// RTC prescaler from the 32.768kHz clock to 1Hz.
const RTC_DIVIDER: f64 = 32_768.0;

fn crystal_message() -> String {
    format!(
        "External crystal frequency not suitable for RTCCLK32\nRange [{},{}]",
        notation::hz(RTC_CRYSTAL_RANGE.0 as f64),
        notation::hz(RTC_CRYSTAL_RANGE.1 as f64)
    )
}

/// Declare the RTC variables. With `shared_pins` the crystal frequency follows OSC0.
pub fn declare(device: &mut Device, peripheral: PeripheralId, shared_pins: bool) -> Result<()> {
    let input = Variable::long("osc_input_freq", 32_768).with_units("Hz");
    let input = if shared_pins {
        input.locked()
    } else {
        input.with_bounds(RTC_CRYSTAL_RANGE.0, RTC_CRYSTAL_RANGE.1)
    };
    device.declare(peripheral, input)?;
    device.declare(
        peripheral,
        Variable::bool("rtc_cr_osce", true).with_tool_tip(if shared_pins {
            "Enable OSC0 as 32kHz RTC oscillator\nNote: this disables OSC0 control by MCG"
        } else {
            "Enable independent 32kHz RTC oscillator"
        }),
    )?;
    device.declare(peripheral, Variable::bool("rtc_cr_clko", true))?;
    device.declare(
        peripheral,
        Variable::long("rtc_cr_scp", 0)
            .with_bounds(0, 30)
            .with_units("pF"),
    )?;
    declare_clocks!(device, peripheral, ["osc_clock", "rtcclk_gated_clock", "rtc_1hz_clock"]);
    Ok(())
}

struct RtcVars {
    input: VarId,
    osce: VarId,
    clko: VarId,
    scp: VarId,
    osc: VarId,
    gated: VarId,
    one_hz: VarId,
    erclk32k: VarId,
    /// OSC0 crystal frequency and 32kHz clock, when the pins are shared.
    osc0: Option<(VarId, VarId)>,
}

/// Validator for the RTC peripheral.
pub struct RtcValidator {
    shared_pins: bool,
    vars: Option<RtcVars>,
}

impl RtcValidator {
    pub fn new(shared_pins: bool) -> Self {
        Self {
            shared_pins,
            vars: None,
        }
    }
}

impl Validator for RtcValidator {
    fn name(&self) -> &str {
        "RtcValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let osc0 = if self.shared_pins {
            Some((
                ctx.watch("/OSC0/osc_input_freq")?,
                ctx.watch("/OSC0/osc32k_clock")?,
            ))
        } else {
            None
        };
        self.vars = Some(RtcVars {
            input: ctx.watch("osc_input_freq")?,
            osce: ctx.watch("rtc_cr_osce")?,
            clko: ctx.watch("rtc_cr_clko")?,
            scp: ctx.lookup("rtc_cr_scp")?,
            osc: ctx.lookup("osc_clock")?,
            gated: ctx.lookup("rtcclk_gated_clock")?,
            one_hz: ctx.lookup("rtc_1hz_clock")?,
            erclk32k: ctx.watch("/SIM/system_erclk32k_clock")?,
            osc0,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        let mut frequency = ctx.long(v.input)?;
        let mut origin = String::from("Independent RTC oscillator");
        let mut status = None;

        if let Some((osc0_input, _)) = v.osc0 {
            frequency = ctx.long(osc0_input)?;
            ctx.set_value(v.input, frequency)?;
        }

        let mut osce = false;
        if (RTC_CRYSTAL_RANGE.0..=RTC_CRYSTAL_RANGE.1).contains(&frequency) {
            ctx.clear_status(v.osce)?;
            ctx.clear_status(v.input)?;
            osce = ctx.is_enabled(v.osce) && ctx.bool(v.osce)?;
            if !osce {
                status = Some(Status::warning("Disabled by rtc_cr_osce"));
                origin.push_str(" (disabled)");
                frequency = 0;
            }
        } else {
            let warning = Status::warning(crystal_message());
            status = Some(warning.clone());
            origin.push_str(" (invalid RTC frequency)");
            frequency = 0;
            ctx.set_value(v.osce, false)?;
            ctx.set_status(v.osce, warning.clone())?;
            ctx.set_status(v.input, warning)?;
        }
        ctx.enable(v.scp, osce)?;

        let rtc = match v.osc0 {
            Some((_, osc0_osc32k)) => {
                let osc32k = Clock::read(ctx, osc0_osc32k)?;
                Clock {
                    enabled: osce,
                    ..osc32k
                }
                .write(ctx, v.osc)?;
                // The RTC then runs from ERCLK32K, whichever source the SIM selects.
                ctx.enable(v.clko, false)?;
                Clock::gated("RTC (pins shared with OSC0)", Status::ok("RTC clock output not available"))
                    .write(ctx, v.gated)?;
                Clock::read(ctx, v.erclk32k)?.with_status(status.clone())
            }
            None => {
                let rtc = Clock {
                    frequency,
                    origin,
                    status: status.clone(),
                    enabled: osce,
                };
                rtc.write(ctx, v.osc)?;
                ctx.enable(v.clko, osce)?;
                let gated = if !osce {
                    Clock::gated(
                        "RTC (disabled by rtc_cr_osce)",
                        Status::warning("Disabled by rtc_cr_osce"),
                    )
                } else if !ctx.bool(v.clko)? {
                    Clock::gated(
                        "RTC (disabled by rtc_cr_clko)",
                        Status::warning("Disabled by rtc_cr_clko"),
                    )
                } else {
                    rtc.clone()
                };
                gated.write(ctx, v.gated)?;
                rtc
            }
        };

        Clock {
            frequency: round_i64(rtc.frequency as f64 / RTC_DIVIDER),
            origin: format!("{} via RTC divider", rtc.origin),
            status,
            enabled: osce || v.osc0.is_none(),
        }
        .write(ctx, v.one_hz)
    }
}
