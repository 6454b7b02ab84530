//! Low Power Timer. In timer mode the counter runs from one of four low-power clocks through
//! an optional prescaler, and the compare value sets the period. In pulse mode it counts pin
//! edges through a glitch filter instead.

use crate::{
    Result,
    clocks::{Clock, ClockSelector, Selection},
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::{power_of_two, round_i64},
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Status, Variable},
};

const CMR_MAX: i64 = 0xFFFF;

/// Declare the LPTMR variables. `internal_reference_key` names the clock behind the MCGIRCLK
/// selection.
pub fn declare(device: &mut Device, peripheral: PeripheralId, internal_reference_key: &str) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::choice(
            "lptmr_psr_pcs",
            vec![
                ChoiceEntry::new("MCGIRCLK", "0").with_reference(internal_reference_key)?,
                ChoiceEntry::new("LPO", "1").with_reference("/SIM/system_low_power_clock")?,
                ChoiceEntry::new("ERCLK32K", "2").with_reference("/SIM/system_erclk32k_clock")?,
                ChoiceEntry::new("OSCERCLK", "3").with_reference("/OSC0/oscer_clock")?,
            ],
            1,
        ),
    )?;
    device.declare(
        p,
        Variable::choice(
            "lptmr_psr_prescaler",
            std::iter::once(ChoiceEntry::new("Prescaler bypassed", "0"))
                .chain((1..=16).map(|n| ChoiceEntry::new(format!("Divide by {}", 1_i64 << n), n.to_string())))
                .collect(),
            0,
        ),
    )?;
    device.declare(
        p,
        Variable::choice(
            "lptmr_psr_glitchFilter",
            std::iter::once(ChoiceEntry::new("Glitch filter bypassed", "0"))
                .chain((1..=15).map(|n| {
                    ChoiceEntry::new(format!("Change recognised after {} clocks", 1_i64 << n), n.to_string())
                }))
                .collect(),
            0,
        ),
    )?;
    device.declare(p, Variable::bool("lptmr_csr_tms", false).with_description("Pulse counter mode"))?;
    device.declare(p, Variable::long("lptmr_csr_tps", 0).with_bounds(0, 3))?;
    device.declare(p, Variable::bool("lptmr_csr_tpp", false))?;
    device.declare(p, Variable::double("counterFrequency", 0.0).with_units("Hz").locked())?;
    device.declare(p, Variable::double("maximumPeriod", 0.0).with_units("s").locked())?;
    device.declare(p, Variable::double("filterDuration", 0.0).with_units("s").locked())?;
    device.declare(p, Variable::long("lptmr_cmr_compare", 0).with_bounds(0, CMR_MAX))?;
    device.declare(p, Variable::double("lptmr_cmrPeriod", 0.0).with_units("s"))?;
    device.declare(p, Variable::double("lptmr_cmrFrequency", 0.0).with_units("Hz"))?;
    Ok(())
}

struct LptmrVars {
    clock_select: ClockSelector,
    prescaler: VarId,
    glitch_filter: VarId,
    pulse_mode: VarId,
    pin: VarId,
    polarity: VarId,
    counter_frequency: VarId,
    maximum_period: VarId,
    filter_duration: VarId,
    compare: VarId,
    period: VarId,
    frequency: VarId,
}

/// Compare value giving `period` seconds at `counter` Hz.
fn compare_for_period(period: f64, counter: f64) -> i64 {
    (round_i64(period * counter) - 1).clamp(0, CMR_MAX)
}

/// Compare value giving an event rate of `frequency` at `counter` Hz.
fn compare_for_frequency(frequency: f64, counter: f64) -> i64 {
    if frequency <= counter / CMR_MAX as f64 {
        return CMR_MAX;
    }
    (round_i64(counter / frequency) - 1).clamp(0, CMR_MAX)
}

/// Validator for the LPTMR.
#[derive(Default)]
pub struct LptmrValidator {
    vars: Option<LptmrVars>,
}

impl LptmrValidator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Validator for LptmrValidator {
    fn name(&self) -> &str {
        "LptmrValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        self.vars = Some(LptmrVars {
            clock_select: ClockSelector::watch(ctx, "lptmr_psr_pcs")?,
            prescaler: ctx.watch("lptmr_psr_prescaler")?,
            glitch_filter: ctx.watch("lptmr_psr_glitchFilter")?,
            pulse_mode: ctx.watch("lptmr_csr_tms")?,
            pin: ctx.lookup("lptmr_csr_tps")?,
            polarity: ctx.lookup("lptmr_csr_tpp")?,
            counter_frequency: ctx.lookup("counterFrequency")?,
            maximum_period: ctx.lookup("maximumPeriod")?,
            filter_duration: ctx.lookup("filterDuration")?,
            compare: ctx.watch("lptmr_cmr_compare")?,
            period: ctx.watch("lptmr_cmrPeriod")?,
            frequency: ctx.watch("lptmr_cmrFrequency")?,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        let pulse_mode = ctx.bool(v.pulse_mode)?;
        for id in [v.prescaler, v.period, v.frequency, v.maximum_period, v.counter_frequency] {
            ctx.enable(id, !pulse_mode)?;
        }
        for id in [v.glitch_filter, v.pin, v.polarity, v.filter_duration] {
            ctx.enable(id, pulse_mode)?;
        }

        let source = match v.clock_select.resolve_or_coerce(ctx, 1)? {
            Selection::Clock(clock) => clock,
            _ => Clock::gated("LPTMR clock", Status::warning("No clock selected")),
        };

        // Glitch filter, in clocks of the selected source
        let filter = match power_of_two(ctx.long(v.glitch_filter)?) {
            Some(clocks) if clocks > 1 && source.frequency > 0 => clocks as f64 / source.frequency as f64,
            _ => 0.0,
        };
        ctx.set_value(v.filter_duration, filter)?;
        ctx.set_origin(v.filter_duration, format!("{} glitch filter", source.origin))?;

        let divider = power_of_two(ctx.long(v.prescaler)?).unwrap_or(1);
        let counter = source.frequency as f64 / divider as f64;
        ctx.set_value(v.counter_frequency, counter)?;
        ctx.set_status(v.counter_frequency, source.status.clone())?;
        ctx.set_origin(v.counter_frequency, format!("{} divided by lptmr_psr_prescaler", source.origin))?;

        let tick = if counter > 0.0 { 1.0 / counter } else { 0.0 };
        let maximum = tick * (CMR_MAX + 1) as f64;
        ctx.set_value(v.maximum_period, maximum)?;
        if tick > 0.0 {
            ctx.set_min(v.period, Some(2.0 * tick))?;
            ctx.set_max(v.period, Some(maximum))?;
            ctx.set_min(v.frequency, Some(1.0 / maximum))?;
            ctx.set_max(v.frequency, Some(counter / 2.0))?;
        } else {
            for id in [v.period, v.frequency] {
                ctx.set_min(id, None)?;
                ctx.set_max(id, None)?;
            }
        }

        let mut compare = ctx.long(v.compare)?;
        if ctx.phase().allows_round_trip() && counter > 0.0 {
            if changed == Some(v.period) {
                compare = compare_for_period(ctx.double(v.period)?, counter);
            } else if changed == Some(v.frequency) {
                compare = compare_for_frequency(ctx.double(v.frequency)?, counter);
            }
            ctx.set_value(v.compare, compare)?;
        }

        let counts = (compare + 1) as f64;
        ctx.set_value(v.period, tick * counts)?;
        ctx.set_value(v.frequency, counter / counts)?;
        for id in [v.period, v.frequency] {
            ctx.set_status(id, source.status.clone())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_from_period_and_rate() {
        // 1kHz LPO
        assert_eq!(compare_for_period(0.5, 1_000.0), 499);
        assert_eq!(compare_for_frequency(10.0, 1_000.0), 99);
        assert_eq!(compare_for_frequency(0.001, 1_000.0), CMR_MAX);
        assert_eq!(compare_for_period(1_000.0, 1_000.0), CMR_MAX);
    }
}
