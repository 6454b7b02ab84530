//! Ready-made devices. Each builder declares the peripherals, variables and validators of one
//! representative device family, leaving propagation suspended so that peripheral add-ons can
//! be attached before [`Template::start`].
//!
//! ```
//! use kinetis_clock_tree::templates;
//!
//! let mut template = templates::k_series_mcg()?;
//! template.add_pit("PIT", 4)?;
//! let device = template.start()?;
//! assert!(device.get("/SIM/system_core_clock[0]")?.as_long()? > 0);
//! # Ok::<(), kinetis_clock_tree::Error>(())
//! ```

use crate::{
    Result,
    adc::{self, AdcLimits, AdcValidator},
    clocks::{
        ClockTopology, IcsLimits, McgLimits, OscLimits, OscValidator, RtcValidator, ScgLimits,
        SimClockValidator, SimFeatures, SimLayout, SimLimits, SimRtcClockValidator, osc, rtc, sim,
    },
    engine::Device,
    i2c::{self, I2cValidator},
    lptmr::{self, LptmrValidator},
    namespace::PeripheralId,
    pdb::{self, PdbFeatures, PdbValidator},
    pit::{self, PitValidator},
    timer::{self, TimerKind, TimerValidator},
};

/// Clock configurations declared by the templates.
pub const CLOCK_CONFIGURATIONS: usize = 2;

/// A device under construction, with what the peripheral add-ons need to know about its
/// clock tree.
pub struct Template {
    pub device: Device,
    pub topology: ClockTopology,
    pub dimension: usize,
}

impl Template {
    fn new(name: &str, topology: ClockTopology) -> Self {
        Self {
            device: Device::new(name),
            topology,
            dimension: CLOCK_CONFIGURATIONS,
        }
    }

    /// End of loading: run the first full pass and hand the device over.
    pub fn start(mut self) -> Result<Device> {
        self.device.start()?;
        Ok(self.device)
    }

    /// ALTCLK2: the 48MHz IRC where there is one, otherwise half the bus clock.
    fn adc_alternate_clock(&self) -> String {
        match self.topology {
            ClockTopology::Mcg(_) | ClockTopology::McgNoPll(_) | ClockTopology::McgLite => {
                "/MCG/system_irc48m_clock".to_owned()
            }
            _ => format!("{},/2", self.topology.bus_clock_key()),
        }
    }

    pub fn add_adc(&mut self, name: &str, limits: AdcLimits) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        let alternate = self.adc_alternate_clock();
        adc::declare(&mut self.device, p, self.topology.bus_clock_key(), &alternate)?;
        self.device.attach(p, AdcValidator::new(limits))?;
        Ok(p)
    }

    pub fn add_pdb(&mut self, name: &str, features: PdbFeatures) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        pdb::declare(&mut self.device, p, features)?;
        self.device.attach(p, PdbValidator::new(self.topology.bus_clock_key(), features))?;
        Ok(p)
    }

    pub fn add_i2c(&mut self, name: &str) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        i2c::declare(&mut self.device, p)?;
        self.device.attach(p, I2cValidator::new(self.topology.bus_clock_key()))?;
        Ok(p)
    }

    pub fn add_lptmr(&mut self, name: &str) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        lptmr::declare(&mut self.device, p, self.topology.internal_reference_key())?;
        self.device.attach(p, LptmrValidator::new())?;
        Ok(p)
    }

    pub fn add_timer(&mut self, name: &str, kind: TimerKind) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        timer::declare(&mut self.device, p, kind, &self.topology)?;
        self.device.attach(p, TimerValidator::new(kind))?;
        Ok(p)
    }

    pub fn add_pit(&mut self, name: &str, channels: usize) -> Result<PeripheralId> {
        let p = self.device.add_peripheral(name)?;
        pit::declare(&mut self.device, p, channels)?;
        self.device.attach(p, PitValidator::new(self.topology.bus_clock_key(), channels))?;
        Ok(p)
    }
}

/// Where the RTC gets its 32kHz crystal from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RtcOscillator {
    Absent,
    Independent,
    /// The RTC takes over the OSC0 XTAL/EXTAL pins when `rtc_cr_osce` is set.
    SharedWithOsc0,
}

/// How the SIM of a family is put together.
struct SimSetup {
    layout: SimLayout,
    limits: SimLimits,
    features: SimFeatures,
    rtc: RtcOscillator,
}

/// OSC0, an optional RTC, the clock-generation unit and the SIM. Everything is declared before
/// any validator is attached, as validators resolve their cross-peripheral keys at attach time.
fn build_clock_tree(template: &mut Template, crystal: i64, standalone_osc: bool, sim: SimSetup) -> Result<()> {
    let dim = template.dimension;
    let device = &mut template.device;
    let has_rtc = sim.rtc != RtcOscillator::Absent;
    let shared_pins = sim.rtc == RtcOscillator::SharedWithOsc0;

    let osc0 = device.add_peripheral("OSC0")?;
    osc::declare(device, osc0, crystal, standalone_osc)?;
    let rtc_peripheral = if has_rtc {
        let p = device.add_peripheral("RTC")?;
        rtc::declare(device, p, shared_pins)?;
        Some(p)
    } else {
        None
    };
    let clock_unit = template.topology.declare(device, dim)?;
    let sim_peripheral = device.add_peripheral("SIM")?;
    sim::declare(
        device,
        sim_peripheral,
        dim,
        sim.layout,
        &sim.limits,
        &template.topology,
        &sim.features,
    )?;
    sim::declare_rtc_clocks(device, sim_peripheral, has_rtc)?;

    device.attach(osc0, OscValidator::new(OscLimits::default(), shared_pins))?;
    if let Some(p) = rtc_peripheral {
        device.attach(p, RtcValidator::new(shared_pins))?;
    }
    template.topology.attach(device, clock_unit, dim)?;
    device.attach(
        sim_peripheral,
        crate::validator::Indexed(SimClockValidator::new(
            sim.layout,
            sim.limits,
            dim,
            &template.topology,
            &sim.features,
        )),
    )?;
    device.attach(sim_peripheral, SimRtcClockValidator::new(shared_pins))?;
    Ok(())
}

/// K64-style device: 8MHz crystal on OSC0, independent RTC oscillator, MCG with FLL and PLL,
/// USB FS, and a FlexBus divider. Out of reset the MCG runs FEI at 20.97MHz.
pub fn k_series_mcg() -> Result<Template> {
    k_series("MK64FN1M0VLL12", 8_000_000, RtcOscillator::Independent)
}

/// K22-style device: the same clock tree, but the RTC has no oscillator of its own and takes
/// over the OSC0 pins, here fitted with a 32.768kHz crystal. With `rtc_cr_osce` set OSC0 is
/// forced into its low range and the MCG loses control of it.
pub fn k_series_mcg_shared_rtc() -> Result<Template> {
    k_series("MK22FN512VLH12", 32_768, RtcOscillator::SharedWithOsc0)
}

fn k_series(name: &str, crystal: i64, rtc: RtcOscillator) -> Result<Template> {
    let mut template = Template::new(name, ClockTopology::Mcg(McgLimits::default()));
    build_clock_tree(
        &mut template,
        crystal,
        false,
        SimSetup {
            layout: SimLayout::K,
            limits: SimLimits::default(),
            features: SimFeatures {
                reset_clock: 20_971_520,
                peripheral_select: true,
                postdivider: false,
                usb: true,
                lp_clocks: Vec::new(),
            },
            rtc,
        },
    )?;
    Ok(template)
}

/// K02-style device: the MCG without its PLL, 100MHz core, no RTC or FlexBus.
pub fn k_series_mcg_no_pll() -> Result<Template> {
    let mut template = Template::new("MK02FN128VLH10", ClockTopology::McgNoPll(McgLimits::default()));
    build_clock_tree(
        &mut template,
        8_000_000,
        false,
        SimSetup {
            layout: SimLayout::K,
            limits: SimLimits {
                core_max: 100_000_000,
                bus_max: 50_000_000,
                flash_max: 25_000_000,
                flexbus_max: None,
            },
            features: SimFeatures {
                reset_clock: 20_971_520,
                ..SimFeatures::default()
            },
            rtc: RtcOscillator::Absent,
        },
    )?;
    Ok(template)
}

/// KL27-style device: MCG-Lite starting on the 48MHz HIRC, 32kHz crystal, TPM and LPUART
/// clock selectors.
pub fn kl_series_mcg_lite() -> Result<Template> {
    let mut template = Template::new("MKL27Z64VLH4", ClockTopology::McgLite);
    build_clock_tree(
        &mut template,
        32_768,
        true,
        SimSetup {
            layout: SimLayout::Kl,
            limits: SimLimits::kl(),
            features: SimFeatures {
                reset_clock: 48_000_000,
                usb: true,
                lp_clocks: vec!["tpm", "lpuart0"],
                ..SimFeatures::default()
            },
            rtc: RtcOscillator::Absent,
        },
    )?;
    Ok(template)
}

/// KE06-style device: ICS with its FLL locked to an 8MHz crystal divided into the 31.25kHz
/// reference window.
pub fn ke_series_ics() -> Result<Template> {
    let mut template = Template::new("MKE06Z128VLK4", ClockTopology::Ics(IcsLimits::default()));
    build_clock_tree(
        &mut template,
        8_000_000,
        true,
        SimSetup {
            layout: SimLayout::K,
            limits: SimLimits::kl(),
            features: SimFeatures {
                reset_clock: 48_000_000,
                ..SimFeatures::default()
            },
            rtc: RtcOscillator::Absent,
        },
    )?;
    Ok(template)
}

/// S32K144-style device: SCG with SOSC, SIRC, FIRC and SPLL, and RUN/HSRUN/VLPR dividers.
pub fn s32k_scg() -> Result<Template> {
    let topology = ClockTopology::Scg(ScgLimits::default());
    let mut template = Template::new("S32K144", topology);
    let dim = template.dimension;
    let scg = template.topology.declare(&mut template.device, dim)?;
    template.topology.attach(&mut template.device, scg, dim)?;
    Ok(template)
}
