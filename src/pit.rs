//! Periodic Interrupt Timer. Every channel counts the bus clock down from its load value, so a
//! channel fires every `ldval + 1` bus clocks. Load value, period and frequency are three views
//! of one setting; editing any of them updates the others.

use crate::{
    Result,
    clocks::Clock,
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::round_i64,
    validator::{Context, Family, Validator, WatchContext},
    variable::Variable,
};

const LDVAL_MAX: i64 = u32::MAX as i64;

pub fn declare(device: &mut Device, peripheral: PeripheralId, channels: usize) -> Result<()> {
    let p = peripheral;
    device.declare(p, Variable::bool("pit_mcr_mdis", false).with_description("Disable the PIT module"))?;
    device.declare(p, Variable::bool("pit_mcr_frz", false))?;
    device.declare(p, Variable::long("pitInputClock", 0).with_units("Hz").locked())?;
    device.declare_family(p, Variable::bool("pit_tctrl_ten[]", false), channels)?;
    device.declare_family(p, Variable::bool("pit_tctrl_tie[]", false), channels)?;
    device.declare_family(p, Variable::long("pit_ldval[]", 0).with_bounds(0, LDVAL_MAX), channels)?;
    device.declare_family(p, Variable::double("pit_period[]", 0.0).with_units("s"), channels)?;
    device.declare_family(p, Variable::double("pit_frequency[]", 0.0).with_units("Hz"), channels)?;
    Ok(())
}

/// Load value giving `period` seconds from a `clock` Hz counter.
pub fn ldval_for_period(period: f64, clock: f64) -> i64 {
    (round_i64(period * clock) - 1).clamp(0, LDVAL_MAX)
}

/// Load value giving `frequency` Hz from a `clock` Hz counter.
pub fn ldval_for_frequency(frequency: f64, clock: f64) -> i64 {
    if frequency <= 0.0 {
        return LDVAL_MAX;
    }
    (round_i64(clock / frequency) - 1).clamp(0, LDVAL_MAX)
}

struct PitVars {
    bus: VarId,
    input: VarId,
    disable: VarId,
    enable: Family,
    interrupt: Family,
    ldval: Family,
    period: Family,
    frequency: Family,
}

/// Validator for the PIT, over all of its channels.
pub struct PitValidator {
    bus_key: String,
    channels: usize,
    vars: Option<PitVars>,
}

impl PitValidator {
    pub fn new(bus_key: impl Into<String>, channels: usize) -> Self {
        Self {
            bus_key: bus_key.into(),
            channels,
            vars: None,
        }
    }
}

impl Validator for PitValidator {
    fn name(&self) -> &str {
        "PitValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let n = self.channels;
        self.vars = Some(PitVars {
            bus: ctx.watch(&self.bus_key)?,
            input: ctx.lookup("pitInputClock")?,
            disable: ctx.watch("pit_mcr_mdis")?,
            enable: ctx.watch_family("pit_tctrl_ten[]", n)?,
            interrupt: ctx.family("pit_tctrl_tie[]", n)?,
            ldval: ctx.watch_family("pit_ldval[]", n)?,
            period: ctx.watch_family("pit_period[]", n)?,
            frequency: ctx.watch_family("pit_frequency[]", n)?,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        let bus = Clock::read(ctx, v.bus)?;
        bus.write(ctx, v.input)?;
        let clock = bus.frequency as f64;
        let running = clock > 0.0 && !ctx.bool(v.disable)?;

        for ch in 0..self.channels {
            let (ldval_id, period_id, frequency_id) = (v.ldval.at(ch), v.period.at(ch), v.frequency.at(ch));
            ctx.enable(v.enable.at(ch), running)?;
            let active = running && ctx.bool(v.enable.at(ch))?;
            for id in [v.interrupt.at(ch), ldval_id, period_id, frequency_id] {
                ctx.enable(id, active)?;
            }
            if clock <= 0.0 {
                ctx.set_status(period_id, bus.status.clone())?;
                ctx.set_status(frequency_id, bus.status.clone())?;
                continue;
            }

            let mut ldval = ctx.long(ldval_id)?;
            if changed == Some(period_id) {
                ldval = ldval_for_period(ctx.double(period_id)?, clock);
            } else if changed == Some(frequency_id) {
                ldval = ldval_for_frequency(ctx.double(frequency_id)?, clock);
            }
            ctx.set_value(ldval_id, ldval)?;

            let counts = (ldval + 1) as f64;
            ctx.set_min(period_id, Some(1.0 / clock))?;
            ctx.set_max(period_id, Some((LDVAL_MAX + 1) as f64 / clock))?;
            ctx.set_min(frequency_id, Some(clock / (LDVAL_MAX + 1) as f64))?;
            ctx.set_max(frequency_id, Some(clock))?;
            ctx.set_value(period_id, counts / clock)?;
            ctx.set_value(frequency_id, clock / counts)?;
            for id in [period_id, frequency_id] {
                ctx.set_status(id, bus.status.clone())?;
                ctx.set_origin(id, format!("{} / (pit_ldval + 1)", bus.origin))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_values() {
        // 1ms from a 24MHz bus clock
        assert_eq!(ldval_for_period(1e-3, 24e6), 23_999);
        assert_eq!(ldval_for_frequency(1_000.0, 24e6), 23_999);
        assert_eq!(ldval_for_period(0.0, 24e6), 0);
        assert_eq!(ldval_for_period(1e6, 24e6), LDVAL_MAX);
        assert_eq!(ldval_for_frequency(0.0, 24e6), LDVAL_MAX);
    }
}
