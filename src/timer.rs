//! FlexTimer (FTM) and Timer/PWM Module (TPM) counter clocking: clock source, power-of-two
//! prescaler, and the modulo register with its period twin. Centre-aligned PWM counts up and
//! down, so a period takes `2 * mod` ticks instead of `mod + 1`.

use crate::{
    Result,
    clocks::{Clock, ClockSelector, ClockTopology, Selection},
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::{round_i64, shift_divide},
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Variable},
};

const MOD_MAX: i64 = 0xFFFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum TimerKind {
    Ftm,
    Tpm,
}

impl TimerKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Ftm => "ftm",
            Self::Tpm => "tpm",
        }
    }

    fn clock_entries(self, topology: &ClockTopology) -> Result<Vec<ChoiceEntry>> {
        let disabled = ChoiceEntry::new("Disabled", "0");
        Ok(match self {
            Self::Ftm => vec![
                disabled,
                ChoiceEntry::new("System clock", "1").with_reference(topology.bus_clock_key())?,
                ChoiceEntry::new("Fixed frequency clock", "2").with_reference("/MCG/system_mcgffclk_clock[]")?,
                ChoiceEntry::new("External clock", "3").with_reference("ftmExternalClock")?,
            ],
            Self::Tpm => vec![
                disabled,
                ChoiceEntry::new("Peripheral clock", "1").with_reference("/SIM/system_tpm_clock")?,
                ChoiceEntry::new("OSCERCLK", "2").with_reference("/OSC0/oscer_clock")?,
                ChoiceEntry::new("MCGIRCLK", "3").with_reference(topology.internal_reference_key())?,
            ],
        })
    }
}

/// Ticks in one counter period.
fn period_ticks(modulo: i64, centre_aligned: bool) -> f64 {
    if centre_aligned {
        2.0 * modulo as f64
    } else {
        (modulo + 1) as f64
    }
}

/// Modulo value nearest to `period` seconds at `tick` seconds per count.
fn modulo_for_period(period: f64, tick: f64, centre_aligned: bool) -> i64 {
    let ticks = period / tick;
    let modulo = if centre_aligned {
        round_i64(ticks / 2.0)
    } else {
        round_i64(ticks - 1.0)
    };
    modulo.clamp(0, MOD_MAX)
}

pub fn declare(device: &mut Device, peripheral: PeripheralId, kind: TimerKind, topology: &ClockTopology) -> Result<()> {
    let p = peripheral;
    let prefix = kind.prefix();
    device.declare(p, Variable::choice(format!("{prefix}_sc_clks"), kind.clock_entries(topology)?, 1))?;
    device.declare(
        p,
        Variable::choice(
            format!("{prefix}_sc_ps"),
            (0..8)
                .map(|n| ChoiceEntry::new(format!("Divide by {}", 1 << n), n.to_string()))
                .collect(),
            0,
        ),
    )?;
    if kind == TimerKind::Ftm {
        device.declare(p, Variable::long("ftmExternalClock", 0).with_units("Hz").with_min(0))?;
    }
    device.declare(p, Variable::bool(format!("{prefix}_sc_cpwms"), false))?;
    device.declare(p, Variable::double("clockFrequency", 0.0).with_units("Hz").locked())?;
    device.declare(p, Variable::double("clockPeriod", 0.0).with_units("s").locked())?;
    device.declare(p, Variable::long(format!("{prefix}_mod"), MOD_MAX).with_bounds(0, MOD_MAX))?;
    device.declare(p, Variable::double(format!("{prefix}_mod_period"), 0.0).with_units("s").with_min(0))?;
    Ok(())
}

struct TimerVars {
    clock_select: ClockSelector,
    prescaler: VarId,
    centre_aligned: VarId,
    frequency: VarId,
    period: VarId,
    modulo: VarId,
    modulo_period: VarId,
}

/// Validator for one FTM or TPM instance.
pub struct TimerValidator {
    kind: TimerKind,
    vars: Option<TimerVars>,
}

impl TimerValidator {
    pub fn new(kind: TimerKind) -> Self {
        Self { kind, vars: None }
    }
}

impl Validator for TimerValidator {
    fn name(&self) -> &str {
        match self.kind {
            TimerKind::Ftm => "FtmValidator",
            TimerKind::Tpm => "TpmValidator",
        }
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let prefix = self.kind.prefix();
        self.vars = Some(TimerVars {
            clock_select: ClockSelector::watch(ctx, &format!("{prefix}_sc_clks"))?,
            prescaler: ctx.watch(&format!("{prefix}_sc_ps"))?,
            centre_aligned: ctx.watch(&format!("{prefix}_sc_cpwms"))?,
            frequency: ctx.lookup("clockFrequency")?,
            period: ctx.lookup("clockPeriod")?,
            modulo: ctx.watch(&format!("{prefix}_mod"))?,
            modulo_period: ctx.watch(&format!("{prefix}_mod_period"))?,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        let source = match v.clock_select.resolve_or_coerce(ctx, 1)? {
            Selection::Clock(clock) => clock,
            _ => Clock {
                enabled: false,
                ..Clock::new(0, "Disabled")
            },
        };
        let frequency = shift_divide(source.frequency, ctx.long(v.prescaler)?) as f64;
        let running = frequency != 0.0;
        ctx.set_value(v.frequency, frequency)?;
        ctx.set_origin(v.frequency, format!("{} frequency / prescaler", source.origin))?;
        ctx.set_origin(v.period, format!("{} period * prescaler", source.origin))?;
        for id in [v.frequency, v.period, v.modulo_period] {
            ctx.set_status(id, source.status.clone())?;
            ctx.enable(id, running)?;
        }
        if !running {
            return Ok(());
        }

        let tick = 1.0 / frequency;
        ctx.set_value(v.period, tick)?;
        let centre_aligned = ctx.bool(v.centre_aligned)?;
        let mut modulo = ctx.long(v.modulo)?;
        if changed == Some(v.modulo_period) {
            modulo = modulo_for_period(ctx.double(v.modulo_period)?, tick, centre_aligned);
            ctx.set_value(v.modulo, modulo)?;
        }
        let maximum = if centre_aligned {
            2.0 * (MOD_MAX as f64 + 0.5)
        } else {
            MOD_MAX as f64 + 1.5
        };
        ctx.set_max(v.modulo_period, Some(tick * maximum))?;
        ctx.set_value(v.modulo_period, tick * period_ticks(modulo, centre_aligned))?;
        ctx.set_origin(v.modulo_period, format!("{} period * modulo", source.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centre_aligned_period_doubles() {
        // 1MHz counter
        let tick = 1e-6;
        assert_eq!(modulo_for_period(1e-3, tick, false), 999);
        assert_eq!(modulo_for_period(1e-3, tick, true), 500);
        assert_eq!(period_ticks(999, false), 1000.0);
        assert_eq!(period_ticks(500, true), 1000.0);
        assert_eq!(modulo_for_period(1.0, tick, false), MOD_MAX);
    }
}
