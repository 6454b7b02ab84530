//! I2C baud rate for the KE-series I2C: SCL = input clock / (MULT * ICR divider). The speed is
//! a target; the nearest `(mult, icr)` pair is written to the frequency divider register.

use crate::{
    Result,
    clocks::Clock,
    engine::Device,
    namespace::{PeripheralId, VarId},
    notation,
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Status, Variable},
};

const MULT_FACTORS: [i64; 3] = [1, 2, 4];

/// SCL divider for each `i2c_f_icr` value.
const ICR_FACTORS: [i64; 64] = [
    20, 22, 24, 26, 28, 30, 34, 40, 28, 32, //
    36, 40, 44, 48, 56, 68, 48, 56, 64, 72, //
    80, 88, 104, 128, 80, 96, 112, 128, 144, 160, //
    192, 240, 160, 192, 224, 256, 288, 320, 384, 480, //
    320, 384, 448, 512, 576, 640, 768, 960, 640, 768, //
    896, 1024, 1152, 1280, 1536, 1920, 1280, 1536, 1792, 2048, //
    2304, 2560, 3072, 3840,
];

/// Tool tip lines wrap after this many characters.
const LINE_LENGTH: usize = 60;

/// Best divider pair for a requested speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct I2cDivider {
    /// Index into the MULT factors, ie the `i2c_f_mult` field.
    pub mult: usize,
    /// `i2c_f_icr` field.
    pub icr: usize,
    /// SCL frequency the pair gives, Hz.
    pub speed: i64,
}

fn scl(input: i64, mult: usize, icr: usize) -> i64 {
    input / (MULT_FACTORS[mult] * ICR_FACTORS[icr])
}

/// Nearest divider pair to `speed`. On equal distance the first pair found is kept.
pub fn find_i2c_divider(input: i64, speed: i64) -> I2cDivider {
    let mut best = I2cDivider {
        mult: MULT_FACTORS.len() - 1,
        icr: ICR_FACTORS.len() - 1,
        speed: scl(input, MULT_FACTORS.len() - 1, ICR_FACTORS.len() - 1),
    };
    let mut best_difference = i64::MAX;
    for mult in 0..MULT_FACTORS.len() {
        for icr in 0..ICR_FACTORS.len() {
            let frequency = scl(input, mult, icr);
            let difference = (speed - frequency).abs();
            if difference < best_difference {
                best_difference = difference;
                best = I2cDivider {
                    mult,
                    icr,
                    speed: frequency,
                };
            }
        }
    }
    best
}

/// Every SCL frequency reachable from `input`, ascending, as tool tip text.
pub fn available_speeds(input: i64) -> String {
    let mut speeds: Vec<i64> = (0..MULT_FACTORS.len())
        .flat_map(|mult| (0..ICR_FACTORS.len()).map(move |icr| scl(input, mult, icr)))
        .collect();
    speeds.sort_unstable();
    speeds.dedup();

    let mut text = String::from("Available Frequencies:\n");
    let mut line = 0;
    for (i, speed) in speeds.iter().enumerate() {
        if i > 0 {
            text.push_str(", ");
            if line >= LINE_LENGTH {
                text.push('\n');
                line = 0;
            }
        }
        let speed = notation::hz(*speed as f64);
        line += speed.len() + 2;
        text.push_str(&speed);
    }
    text
}

/// Declare the I2C variables. The input clock is mirrored from the bus clock by the validator.
pub fn declare(device: &mut Device, peripheral: PeripheralId) -> Result<()> {
    let p = peripheral;
    device.declare(p, Variable::long("i2cInputClock", 0).with_units("Hz").locked())?;
    device.declare(p, Variable::long("i2c_speed", 100_000).with_units("Hz").with_min(1))?;
    device.declare(
        p,
        Variable::choice(
            "i2c_f_mult",
            MULT_FACTORS
                .iter()
                .enumerate()
                .map(|(i, m)| ChoiceEntry::new(format!("mul = {m}"), i.to_string()))
                .collect(),
            0,
        )
        .locked(),
    )?;
    device.declare(p, Variable::long("i2c_f_icr", 0).with_bounds(0, 63).locked())?;
    Ok(())
}

struct I2cVars {
    bus: VarId,
    input: VarId,
    speed: VarId,
    mult: VarId,
    icr: VarId,
}

/// Validator for one I2C instance.
pub struct I2cValidator {
    bus_key: String,
    vars: Option<I2cVars>,
}

impl I2cValidator {
    pub fn new(bus_key: impl Into<String>) -> Self {
        Self {
            bus_key: bus_key.into(),
            vars: None,
        }
    }
}

impl Validator for I2cValidator {
    fn name(&self) -> &str {
        "I2cValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        self.vars = Some(I2cVars {
            bus: ctx.watch(&self.bus_key)?,
            input: ctx.lookup("i2cInputClock")?,
            speed: ctx.watch("i2c_speed")?,
            mult: ctx.lookup("i2c_f_mult")?,
            icr: ctx.lookup("i2c_f_icr")?,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        let bus = Clock::read(ctx, v.bus)?;
        bus.write(ctx, v.input)?;

        ctx.set_tool_tip(v.speed, available_speeds(bus.frequency))?;
        let divider = find_i2c_divider(bus.frequency, ctx.long(v.speed)?);
        ctx.set_value(v.mult, divider.mult as i64)?;
        ctx.set_value(v.icr, divider.icr as i64)?;

        if ctx.phase().allows_round_trip() {
            ctx.set_value(v.speed, divider.speed)?;
            ctx.set_status(v.speed, bus.status)
        } else if divider.speed != ctx.long(v.speed)? {
            let nearest = Status::info(format!("Nearest available speed is {}", notation::hz(divider.speed as f64)));
            ctx.set_status(v.speed, Status::worst(bus.status, Some(nearest)))
        } else {
            ctx.set_status(v.speed, bus.status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_mode_from_24mhz() {
        let d = find_i2c_divider(24_000_000, 100_000);
        assert_eq!((d.mult, d.icr, d.speed), (0, 31, 100_000));
    }

    #[test]
    fn speed_list_is_sorted_and_wrapped() {
        let text = available_speeds(24_000_000);
        assert!(text.starts_with("Available Frequencies:\n"));
        assert!(text.contains("100kHz"));
        assert!(text.lines().skip(1).all(|line| line.len() <= LINE_LENGTH + 16));
        assert!(text.lines().count() > 2);
    }
}
