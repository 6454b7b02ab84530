//! Programmable Delay Block. The counter clock is the bus clock through a prescaler and a
//! multiplier. Every delay register has a time twin: editing either one updates the other.

use crate::{
    Result,
    clocks::Clock,
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::ticks,
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Variable},
};

/// `pdb_sc_mult` multiplier values.
const MULTIPLIERS: [i64; 4] = [1, 10, 20, 40];

/// Largest counter value.
const COUNTER_MAX: i64 = 0xFFFF;

/// Number of each kind of trigger output on a PDB instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct PdbFeatures {
    /// ADC trigger channels, each with two pre-triggers.
    pub channels: usize,
    /// DAC interval triggers.
    pub dac_triggers: usize,
    pub pulse_outputs: usize,
}

impl Default for PdbFeatures {
    fn default() -> Self {
        Self {
            channels: 2,
            dac_triggers: 2,
            pulse_outputs: 4,
        }
    }
}

fn declare_count(device: &mut Device, p: PeripheralId, name: &str) -> Result<()> {
    device.declare(p, Variable::long(name, 0).with_bounds(0, COUNTER_MAX))?;
    device.declare(p, Variable::double(format!("{name}_delay"), 0.0).with_units("s").with_min(0))?;
    Ok(())
}

pub fn declare(device: &mut Device, peripheral: PeripheralId, features: PdbFeatures) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::long("pdb_sc_prescaler", 0)
            .with_bounds(0, 7)
            .with_description("Prescaler, as a power of two"),
    )?;
    device.declare(
        p,
        Variable::choice(
            "pdb_sc_mult",
            MULTIPLIERS
                .iter()
                .enumerate()
                .map(|(i, m)| ChoiceEntry::new(format!("Multiply prescaler by {m}"), i.to_string()))
                .collect(),
            0,
        ),
    )?;
    device.declare(p, Variable::double("pdb_frequency", 0.0).with_units("Hz").locked())?;
    device.declare(p, Variable::double("pdb_period", 0.0).with_units("s").locked())?;
    device.declare(p, Variable::long("pdb_mod", COUNTER_MAX).with_bounds(0, COUNTER_MAX))?;
    device.declare(p, Variable::double("pdb_mod_period", 0.0).with_units("s").with_min(0))?;
    declare_count(device, p, "pdb_idly")?;

    for ch in 0..features.channels {
        device.declare(p, Variable::long(format!("pdb_ch{ch}_c1_en"), 0).with_bounds(0, 3))?;
        device.declare(p, Variable::long(format!("pdb_ch{ch}_c1_tos"), 0).with_bounds(0, 3))?;
        declare_count(device, p, &format!("pdb_ch{ch}_dly0"))?;
        declare_count(device, p, &format!("pdb_ch{ch}_dly1"))?;
    }
    for n in 0..features.dac_triggers {
        device.declare(p, Variable::bool(format!("pdb_int{n}c_toe"), false))?;
        device.declare(p, Variable::bool(format!("pdb_int{n}c_ext"), false))?;
        declare_count(device, p, &format!("pdb_int{n}_int"))?;
    }
    if features.pulse_outputs > 0 {
        let mask = (1_i64 << features.pulse_outputs) - 1;
        device.declare(p, Variable::long("pdb_poen", 0).with_bounds(0, mask))?;
    }
    for n in 0..features.pulse_outputs {
        declare_count(device, p, &format!("pdb_po{n}_dly_dly1"))?;
        declare_count(device, p, &format!("pdb_po{n}_dly_dly2"))?;
    }
    Ok(())
}

/// A counter register and its duration in seconds.
struct Delay {
    count: VarId,
    delay: VarId,
    name: String,
}

impl Delay {
    fn watch(ctx: &mut WatchContext<'_>, name: &str) -> Result<Self> {
        Ok(Self {
            count: ctx.watch(name)?,
            delay: ctx.watch(&format!("{name}_delay"))?,
            name: name.to_owned(),
        })
    }

    fn enable(&self, ctx: &mut Context<'_>, enabled: bool) -> Result<()> {
        ctx.enable(self.count, enabled)?;
        ctx.enable(self.delay, enabled)
    }

    /// Bring the pair into agreement. An edited duration moves the count to the nearest tick,
    /// no further than `limit`. Otherwise the duration follows the count.
    fn update(&self, ctx: &mut Context<'_>, changed: Option<VarId>, tick: f64, limit: i64) -> Result<()> {
        let mut count = ctx.long(self.count)?;
        if changed == Some(self.delay) {
            count = ticks(ctx.double(self.delay)?, tick).min(limit);
            ctx.set_value(self.count, count)?;
        }
        ctx.set_max(self.count, Some(limit as f64))?;
        ctx.set_max(self.delay, Some((limit as f64 + 1.5) * tick))?;
        ctx.set_value(self.delay, tick * (count + 1) as f64)?;
        ctx.set_origin(self.delay, format!("PDB clock period * {}", self.name))
    }
}

struct Channel {
    enable: VarId,
    select: VarId,
    pre_triggers: [Delay; 2],
}

struct DacTrigger {
    enable: VarId,
    external: VarId,
    interval: Delay,
}

struct PdbVars {
    bus: VarId,
    prescaler: VarId,
    mult: VarId,
    frequency: VarId,
    period: VarId,
    modulo: Delay,
    idly: Delay,
    channels: Vec<Channel>,
    dac_triggers: Vec<DacTrigger>,
    poen: Option<VarId>,
    pulses: Vec<[Delay; 2]>,
}

/// Validator for one PDB instance.
pub struct PdbValidator {
    bus_key: String,
    features: PdbFeatures,
    vars: Option<PdbVars>,
}

impl PdbValidator {
    /// `bus_key` names the clock the PDB counts, eg `"/SIM/system_bus_clock[]"`.
    pub fn new(bus_key: impl Into<String>, features: PdbFeatures) -> Self {
        Self {
            bus_key: bus_key.into(),
            features,
            vars: None,
        }
    }
}

impl Validator for PdbValidator {
    fn name(&self) -> &str {
        "PdbValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let f = self.features;
        let mut channels = Vec::with_capacity(f.channels);
        for ch in 0..f.channels {
            channels.push(Channel {
                enable: ctx.watch(&format!("pdb_ch{ch}_c1_en"))?,
                select: ctx.watch(&format!("pdb_ch{ch}_c1_tos"))?,
                pre_triggers: [
                    Delay::watch(ctx, &format!("pdb_ch{ch}_dly0"))?,
                    Delay::watch(ctx, &format!("pdb_ch{ch}_dly1"))?,
                ],
            });
        }
        let mut dac_triggers = Vec::with_capacity(f.dac_triggers);
        for n in 0..f.dac_triggers {
            dac_triggers.push(DacTrigger {
                enable: ctx.watch(&format!("pdb_int{n}c_toe"))?,
                external: ctx.lookup(&format!("pdb_int{n}c_ext"))?,
                interval: Delay::watch(ctx, &format!("pdb_int{n}_int"))?,
            });
        }
        let mut pulses = Vec::with_capacity(f.pulse_outputs);
        for n in 0..f.pulse_outputs {
            pulses.push([
                Delay::watch(ctx, &format!("pdb_po{n}_dly_dly1"))?,
                Delay::watch(ctx, &format!("pdb_po{n}_dly_dly2"))?,
            ]);
        }
        self.vars = Some(PdbVars {
            bus: ctx.watch(&self.bus_key)?,
            prescaler: ctx.watch("pdb_sc_prescaler")?,
            mult: ctx.watch("pdb_sc_mult")?,
            frequency: ctx.lookup("pdb_frequency")?,
            period: ctx.lookup("pdb_period")?,
            modulo: Delay {
                count: ctx.watch("pdb_mod")?,
                delay: ctx.watch("pdb_mod_period")?,
                name: "PDB modulo".to_owned(),
            },
            idly: Delay::watch(ctx, "pdb_idly")?,
            channels,
            dac_triggers,
            poen: if f.pulse_outputs > 0 {
                Some(ctx.watch("pdb_poen")?)
            } else {
                None
            },
            pulses,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        // Counter clock
        let bus = Clock::read(ctx, v.bus)?;
        let multiplier = usize::try_from(ctx.long(v.mult)?)
            .ok()
            .and_then(|i| MULTIPLIERS.get(i).copied())
            .unwrap_or(1);
        let prescale = crate::util::power_of_two(ctx.long(v.prescaler)?).unwrap_or(1) * multiplier;
        let frequency = bus.frequency as f64 / prescale as f64;
        let tick = if frequency > 0.0 { 1.0 / frequency } else { 0.0 };
        ctx.set_value(v.frequency, frequency)?;
        ctx.set_status(v.frequency, bus.status.clone())?;
        ctx.set_origin(v.frequency, "PDB clock frequency / (prescaler * multiplier)")?;
        ctx.set_value(v.period, tick)?;
        ctx.set_status(v.period, bus.status)?;
        ctx.set_origin(v.period, "PDB clock period * prescaler * multiplier")?;

        // Modulo, then everything bounded by it
        v.modulo.update(ctx, changed, tick, COUNTER_MAX)?;
        let modulo = ctx.long(v.modulo.count)?;
        v.idly.update(ctx, changed, tick, modulo)?;

        for channel in &v.channels {
            let enabled = ctx.long(channel.enable)?;
            let selected = ctx.long(channel.select)?;
            for (bit, pre_trigger) in channel.pre_triggers.iter().enumerate() {
                let on = enabled & (1 << bit) != 0 && selected & (1 << bit) != 0;
                pre_trigger.enable(ctx, on)?;
                pre_trigger.update(ctx, changed, tick, modulo)?;
            }
        }

        for trigger in &v.dac_triggers {
            let on = ctx.bool(trigger.enable)?;
            ctx.enable(trigger.external, on)?;
            trigger.interval.enable(ctx, on)?;
            trigger.interval.update(ctx, changed, tick, modulo)?;
        }

        if let Some(poen) = v.poen {
            let enabled = ctx.long(poen)?;
            for (n, pulse) in v.pulses.iter().enumerate() {
                for edge in pulse {
                    edge.enable(ctx, enabled & (1 << n) != 0)?;
                    edge.update(ctx, changed, tick, modulo)?;
                }
            }
        }
        Ok(())
    }
}
