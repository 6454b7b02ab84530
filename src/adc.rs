//! ADC clocking and compare setup. The conversion clock is selected by `adc_cfg1_adiclk`
//! (bus, ALTCLK2, OSCERCLK or the asynchronous ADACK clock) and divided by a power of two.
//! Its legal range depends on the conversion resolution.

use crate::{
    Result,
    clocks::{Clock, ClockSelector, Selection},
    engine::Device,
    namespace::{PeripheralId, VarId},
    util::{range_status, shift_divide},
    validator::{Context, Validator, WatchContext},
    variable::{ChoiceEntry, Status, Variable},
};

/// ADC clock limits, Hz.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct AdcLimits {
    /// Conversion clock range for 8 to 12 bit conversions.
    pub low_res: (i64, i64),
    /// Conversion clock range for 16 bit conversions.
    pub high_res: (i64, i64),
    /// ADACK frequency, indexed by `2 * adlpc + adhsc`.
    pub internal: [i64; 4],
}

impl Default for AdcLimits {
    /// K-series 16-bit SAR ADC: 1-18MHz below 16 bits, 2-12MHz at 16 bits. ADACK runs at
    /// 5.2MHz, 6.2MHz in high-speed mode, 2.4MHz and 4.0MHz in low-power mode.
    fn default() -> Self {
        Self {
            low_res: (1_000_000, 18_000_000),
            high_res: (2_000_000, 12_000_000),
            internal: [5_200_000, 6_200_000, 2_400_000, 4_000_000],
        }
    }
}

impl AdcLimits {
    fn internal_clock(&self, adlpc: bool, adhsc: bool) -> i64 {
        self.internal[2 * usize::from(adlpc) + usize::from(adhsc)]
    }
}

/// Compare function selected by `adc_sc2_compare`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum AdcCompare {
    Disabled,
    /// ADC < low
    Below,
    /// ADC >= low
    AtOrAbove,
    /// ADC < low or ADC > high
    Outside,
    /// low < ADC < high
    Inside,
    /// low <= ADC <= high
    InsideInclusive,
    /// ADC <= low or ADC >= high
    OutsideInclusive,
}

/// Register fields for a compare function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompareFields {
    pub cv1: i64,
    pub cv2: i64,
    pub acfe: bool,
    pub acfgt: bool,
    pub acren: bool,
}

impl AdcCompare {
    pub const ALL: [Self; 7] = [
        Self::Disabled,
        Self::Below,
        Self::AtOrAbove,
        Self::Outside,
        Self::Inside,
        Self::InsideInclusive,
        Self::OutsideInclusive,
    ];

    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    fn label(self) -> &'static str {
        match self {
            Self::Disabled => "Disabled",
            Self::Below => "ADC < low",
            Self::AtOrAbove => "ADC >= low",
            Self::Outside => "(ADC < low) or (high < ADC)",
            Self::Inside => "low < ADC < high",
            Self::InsideInclusive => "low <= ADC <= high",
            Self::OutsideInclusive => "(ADC <= low) or (high <= ADC)",
        }
    }

    /// Uses the high comparison value too.
    fn is_range(self) -> bool {
        !matches!(self, Self::Disabled | Self::Below | Self::AtOrAbove)
    }

    /// Map the comparison values onto CV1/CV2 and the compare control bits. Inside ranges
    /// load the high value into CV1.
    pub fn fields(self, low: i64, high: i64) -> CompareFields {
        let (cv1, cv2, acfgt, acren) = match self {
            Self::Disabled => {
                return CompareFields::default();
            }
            Self::Below => (low, 0, false, false),
            Self::AtOrAbove => (low, 0, true, false),
            Self::Outside => (low, high, false, true),
            Self::Inside => (high, low, false, true),
            Self::InsideInclusive => (low, high, true, true),
            Self::OutsideInclusive => (high, low, true, true),
        };
        CompareFields {
            cv1,
            cv2,
            acfe: true,
            acfgt,
            acren,
        }
    }
}

/// Declare the ADC variables. `bus_key` and `alt_key` name the clocks behind the bus and
/// ALTCLK2 selections, eg `"/SIM/system_bus_clock[]"` and `"/MCG/system_irc48m_clock"`.
pub fn declare(device: &mut Device, peripheral: PeripheralId, bus_key: &str, alt_key: &str) -> Result<()> {
    let p = peripheral;
    device.declare(
        p,
        Variable::choice(
            "adc_cfg1_adiclk",
            vec![
                ChoiceEntry::new("Bus clock", "0").with_reference(bus_key)?,
                ChoiceEntry::new("Alternate clock (ALTCLK2)", "1").with_reference(alt_key)?,
                ChoiceEntry::new("OSCERCLK", "2").with_reference("/OSC0/oscer_clock")?,
                ChoiceEntry::new("Asynchronous clock (ADACK)", "3").with_reference("adcInternalClock")?,
            ],
            0,
        ),
    )?;
    device.declare(
        p,
        Variable::choice(
            "adc_cfg1_adiv",
            ["Divide by 1", "Divide by 2", "Divide by 4", "Divide by 8"]
                .iter()
                .enumerate()
                .map(|(i, name)| ChoiceEntry::new(*name, i.to_string()))
                .collect(),
            0,
        ),
    )?;
    device.declare(p, Variable::bool("adc_cfg1_adlpc", false))?;
    device.declare(p, Variable::bool("adc_cfg2_adhsc", false))?;
    device.declare(
        p,
        Variable::choice(
            "adc_cfg1_mode",
            vec![
                ChoiceEntry::new("8-bit", "0"),
                ChoiceEntry::new("12-bit", "1"),
                ChoiceEntry::new("10-bit", "2"),
                ChoiceEntry::new("16-bit", "3"),
            ],
            1,
        ),
    )?;
    device.declare(p, Variable::bool("adc_cfg1_adlsmp", false))?;
    device.declare(
        p,
        Variable::choice(
            "adc_cfg2_adlsts",
            ["20 extra cycles", "12 extra cycles", "6 extra cycles", "2 extra cycles"]
                .iter()
                .enumerate()
                .map(|(i, name)| ChoiceEntry::new(*name, i.to_string()))
                .collect(),
            0,
        ),
    )?;
    device.declare(
        p,
        Variable::long("adcInternalClock", AdcLimits::default().internal[0])
            .with_units("Hz")
            .locked(),
    )?;
    device.declare(p, Variable::double("clockFrequency", 0.0).with_units("Hz").locked())?;

    device.declare(
        p,
        Variable::choice(
            "adc_sc2_compare",
            AdcCompare::ALL
                .iter()
                .enumerate()
                .map(|(i, c)| ChoiceEntry::new(c.label(), i.to_string()))
                .collect(),
            0,
        ),
    )?;
    device.declare(p, Variable::long("low_comparison_value", 0).with_bounds(0, 65_535))?;
    device.declare(p, Variable::long("high_comparison_value", 0).with_bounds(0, 65_535))?;
    device.declare(p, Variable::long("adc_cv1", 0).locked())?;
    device.declare(p, Variable::long("adc_cv2", 0).locked())?;
    device.declare(p, Variable::bool("adc_sc2_acfe", false).locked())?;
    device.declare(p, Variable::bool("adc_sc2_acfgt", false).locked())?;
    device.declare(p, Variable::bool("adc_sc2_acren", false).locked())?;
    Ok(())
}

struct AdcVars {
    clock_select: ClockSelector,
    adiv: VarId,
    adlpc: VarId,
    adhsc: VarId,
    mode: VarId,
    adlsmp: VarId,
    adlsts: VarId,
    internal: VarId,
    frequency: VarId,

    compare: VarId,
    low: VarId,
    high: VarId,
    cv1: VarId,
    cv2: VarId,
    acfe: VarId,
    acfgt: VarId,
    acren: VarId,
}

/// Validator for one ADC instance.
pub struct AdcValidator {
    limits: AdcLimits,
    vars: Option<AdcVars>,
}

impl AdcValidator {
    pub fn new(limits: AdcLimits) -> Self {
        Self { limits, vars: None }
    }
}

impl Validator for AdcValidator {
    fn name(&self) -> &str {
        "AdcValidator"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        self.vars = Some(AdcVars {
            clock_select: ClockSelector::watch(ctx, "adc_cfg1_adiclk")?,
            adiv: ctx.watch("adc_cfg1_adiv")?,
            adlpc: ctx.watch("adc_cfg1_adlpc")?,
            adhsc: ctx.watch("adc_cfg2_adhsc")?,
            mode: ctx.watch("adc_cfg1_mode")?,
            adlsmp: ctx.watch("adc_cfg1_adlsmp")?,
            adlsts: ctx.lookup("adc_cfg2_adlsts")?,
            internal: ctx.lookup("adcInternalClock")?,
            frequency: ctx.lookup("clockFrequency")?,

            compare: ctx.watch("adc_sc2_compare")?,
            low: ctx.watch("low_comparison_value")?,
            high: ctx.watch("high_comparison_value")?,
            cv1: ctx.lookup("adc_cv1")?,
            cv2: ctx.lookup("adc_cv2")?,
            acfe: ctx.lookup("adc_sc2_acfe")?,
            acfgt: ctx.lookup("adc_sc2_acfgt")?,
            acren: ctx.lookup("adc_sc2_acren")?,
        });
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _changed: Option<VarId>) -> Result<()> {
        let Some(v) = &self.vars else { return Ok(()) };

        // Compare function
        let compare = match AdcCompare::from_index(ctx.long(v.compare)?) {
            Some(compare) => compare,
            None => {
                ctx.coerce_selector(v.compare, 0)?;
                AdcCompare::Disabled
            }
        };
        let fields = compare.fields(ctx.long(v.low)?, ctx.long(v.high)?);
        ctx.enable(v.cv1, compare != AdcCompare::Disabled)?;
        ctx.enable(v.low, compare != AdcCompare::Disabled)?;
        ctx.enable(v.cv2, compare.is_range())?;
        ctx.enable(v.high, compare.is_range())?;
        ctx.set_value(v.cv1, fields.cv1)?;
        ctx.set_value(v.cv2, fields.cv2)?;
        ctx.set_value(v.acfe, fields.acfe)?;
        ctx.set_value(v.acfgt, fields.acfgt)?;
        ctx.set_value(v.acren, fields.acren)?;

        let long_sample = ctx.bool(v.adlsmp)?;
        ctx.enable(v.adlsts, long_sample)?;

        // Conversion clock
        let internal = self.limits.internal_clock(ctx.bool(v.adlpc)?, ctx.bool(v.adhsc)?);
        ctx.set_value(v.internal, internal)?;
        ctx.set_origin(v.internal, "ADC asynchronous clock (ADACK)")?;

        let source = match v.clock_select.resolve_or_coerce(ctx, 3)? {
            Selection::Clock(clock) => clock,
            _ => Clock::gated("ADC clock", Status::warning("No clock selected")),
        };
        let frequency = shift_divide(source.frequency, ctx.long(v.adiv)?) as f64;
        let (min, max) = if ctx.long(v.mode)? >= 2 {
            self.limits.high_res
        } else {
            self.limits.low_res
        };
        ctx.set_min(v.frequency, Some(min as f64))?;
        ctx.set_max(v.frequency, Some(max as f64))?;
        ctx.set_value(v.frequency, frequency)?;
        let status = Status::worst(
            source.status.filter(|s| s.greater_than(crate::Severity::Info)),
            range_status(frequency, min as f64, max as f64),
        );
        ctx.set_status(v.frequency, status)?;
        ctx.set_origin(v.frequency, format!("{} divided by adc_cfg1_adiv", source.origin))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inside_ranges_swap_the_compare_values() {
        let f = AdcCompare::Inside.fields(100, 200);
        assert_eq!((f.cv1, f.cv2, f.acfgt, f.acren), (200, 100, false, true));

        let f = AdcCompare::InsideInclusive.fields(100, 200);
        assert_eq!((f.cv1, f.cv2, f.acfgt, f.acren), (100, 200, true, true));

        assert_eq!(AdcCompare::Disabled.fields(100, 200), CompareFields::default());
        assert!(AdcCompare::AtOrAbove.fields(5, 0).acfe);
        assert_eq!(AdcCompare::from_index(7), None);
    }

    #[test]
    fn adack_follows_the_power_bits() {
        let limits = AdcLimits::default();
        assert_eq!(limits.internal_clock(false, false), 5_200_000);
        assert_eq!(limits.internal_clock(false, true), 6_200_000);
        assert_eq!(limits.internal_clock(true, true), 4_000_000);
    }
}
