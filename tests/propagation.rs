//! Engine properties observed through the template devices.

use kinetis_clock_tree::{
    Context, Device, EngineConfig, Error, InitPhase, PropagationError, Result, Severity, Validator, Value,
    Variable, VarId, WatchContext, templates, timer::TimerKind,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn values(device: &Device) -> Vec<(String, Value)> {
    device
        .variables()
        .map(|(id, variable)| (device.key_of(id), variable.value().clone()))
        .collect()
}

fn full_device() -> Result<Device> {
    let mut template = templates::k_series_mcg()?;
    template.add_pit("PIT", 2)?;
    template.add_timer("FTM0", TimerKind::Ftm)?;
    template.add_i2c("I2C0")?;
    template.start()
}

fn edit(device: &mut Device) -> Result<()> {
    device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;
    device.set("/MCG/pll0OutputFrequency[0]", 96_000_000_i64)?;
    device.set("/SIM/system_core_clock[0]", 96_000_000_i64)?;
    device.set("/SIM/system_bus_clock[0]", 48_000_000_i64)?;
    device.set("/PIT/pit_frequency[1]", 10_000.0)?;
    Ok(())
}

#[test]
fn the_same_edits_give_the_same_device() -> Result<()> {
    init_tracing();
    let mut a = full_device()?;
    let mut b = full_device()?;
    edit(&mut a)?;
    edit(&mut b)?;
    assert_eq!(values(&a), values(&b));
    assert_eq!(a.get("/PIT/pit_ldval[1]")?.as_long()?, 4_799);
    Ok(())
}

#[test]
fn a_settled_device_stays_settled() -> Result<()> {
    init_tracing();
    let mut device = full_device()?;
    assert_eq!(device.validate_all()?, 0);

    edit(&mut device)?;
    let before = values(&device);
    assert_eq!(device.validate_all()?, 0);
    assert_eq!(values(&device), before);
    Ok(())
}

#[test]
fn edits_wait_for_start() -> Result<()> {
    init_tracing();
    let mut template = templates::k_series_mcg()?;
    assert_eq!(template.device.phase(), InitPhase::PropagationSuspended);
    template.device.set("/OSC0/osc_input_freq", 16_000_000_i64)?;
    // Nothing has run yet.
    assert_eq!(template.device.get("/OSC0/osc_clock")?.as_long()?, 0);

    let device = template.start()?;
    assert_eq!(device.phase(), InitPhase::FullPropagation);
    assert_eq!(device.get("/OSC0/osc_clock")?.as_long()?, 16_000_000);
    assert_eq!(device.get("/OSC0/oscillatorRange")?.as_long()?, 2);
    Ok(())
}

#[test]
fn suspending_a_started_device_defers_the_cascade() -> Result<()> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set_phase(InitPhase::PropagationSuspended);
    device.set("/OSC0/osc_input_freq", 12_000_000_i64)?;
    assert_eq!(device.get("/OSC0/osc_clock")?.as_long()?, 8_000_000);

    device.set_phase(InitPhase::FullPropagation);
    assert!(device.validate_all()? > 0);
    assert_eq!(device.get("/OSC0/osc_clock")?.as_long()?, 12_000_000);
    Ok(())
}

#[test]
fn out_of_range_edits_are_clamped_with_a_warning() -> Result<()> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/SIM/system_core_clock[0]", 500_000_000_i64)?;
    let core = device.get("/SIM/system_core_clock[0]")?;
    assert!(core.as_long()? <= 120_000_000);
    Ok(())
}

#[test]
fn worst_status_tracks_the_peripheral() -> Result<()> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    let osc = device.peripheral("OSC0")?.id();
    assert!(device.worst_status(osc).is_none());

    device.set("/OSC0/osc_input_freq", 1_000_000_i64)?;
    let worst = device.worst_status(osc).expect("crystal out of range");
    assert_eq!(worst.severity(), Severity::Error);
    assert!(worst.text().starts_with("External crystal frequency not suitable for oscillator"));
    Ok(())
}

/// Writes the MCG output clock, which the MCG validator already owns.
struct Intruder(Option<VarId>);

impl Validator for Intruder {
    fn name(&self) -> &str {
        "Intruder"
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        self.0 = Some(ctx.watch("/MCG/system_mcgoutclk_clock[0]")?);
        Ok(())
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, _: Option<VarId>) -> Result<()> {
        let Some(id) = self.0 else { return Ok(()) };
        ctx.set_value(id, 1_i64)
    }
}

#[test]
fn a_second_writer_aborts_the_pass() -> Result<()> {
    init_tracing();
    let mut template = templates::k_series_mcg()?;
    let p = template.device.add_peripheral("Intruder")?;
    template.device.attach(p, Intruder(None))?;
    let err = template.start().err().expect("ownership conflict");
    assert!(matches!(
        err,
        Error::PropagationError(PropagationError::WriteConflict { ref variable, .. })
            if variable.contains("system_mcgoutclk_clock")
    ));
    Ok(())
}

#[test]
fn ownership_can_be_relaxed() -> Result<()> {
    init_tracing();
    let config = EngineConfig {
        enforce_ownership: false,
        max_iterations: 10,
    };
    let mut device = Device::with_config("loose", config);
    let p = device.add_peripheral("MCG")?;
    device.declare_family(p, Variable::long("system_mcgoutclk_clock[]", 0), 1)?;
    device.attach(p, Intruder(None))?;
    device.attach(p, Intruder(None))?;
    device.start()?;
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 1);
    Ok(())
}
