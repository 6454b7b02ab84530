//! End-to-end walkthroughs over the template devices.

use kinetis_clock_tree::{Error, Severity, Status, templates, timer::TimerKind};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn severity(device: &kinetis_clock_tree::Device, key: &str) -> Result<Severity, Error> {
    Ok(Status::severity_of(device.get(key)?.status()))
}

#[test]
fn fll_narrow_band_snaps_to_732_times_the_slow_irc() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/MCG/mcg_c4_dmx32[0]", true)?;
    device.set("/MCG/system_mcgfllclk_clock[0]", 24_000_000_i64)?;

    assert_eq!(device.get("/MCG/system_mcgfllclk_clock[0]")?.as_long()?, 23_986_176);
    assert_eq!(device.get("/MCG/mcg_c4_drst_drs[0]")?.as_long()?, 0);
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 23_986_176);
    assert!(severity(&device, "/MCG/system_mcgfllclk_clock[0]")? < Severity::Warning);
    Ok(())
}

#[test]
fn pee_from_an_8mhz_crystal() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;

    assert_eq!(device.get("/MCG/mcg_c5_prdiv0[0]")?.as_long()?, 4);
    assert_eq!(device.get("/MCG/mcg_c6_vdiv0[0]")?.as_long()?, 24);
    // Register encodings count from the smallest divider and multiplier.
    assert_eq!(device.get("/MCG/mcg_c5_prdiv0[0]")?.field_value()?, 3);
    assert_eq!(device.get("/MCG/mcg_c6_vdiv0[0]")?.substitution_value(), "0");
    assert_eq!(device.get("/MCG/pll0InputFrequency[0]")?.as_long()?, 2_000_000);
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 48_000_000);
    assert!(device.get("/MCG/mcg_c6_plls[0]")?.as_bool()?);

    device.set("/SIM/system_core_clock[0]", 48_000_000_i64)?;
    device.set("/SIM/system_bus_clock[0]", 24_000_000_i64)?;
    device.set("/SIM/system_flash_clock[0]", 24_000_000_i64)?;

    assert_eq!(device.get("/SIM/system_core_clock[0]")?.as_long()?, 48_000_000);
    assert_eq!(device.get("/SIM/sim_clkdiv1_outdiv1[0]")?.as_long()?, 1);
    assert_eq!(device.get("/SIM/system_bus_clock[0]")?.as_long()?, 24_000_000);
    assert_eq!(device.get("/SIM/sim_clkdiv1_outdiv2[0]")?.as_long()?, 2);
    assert_eq!(device.get("/SIM/sim_clkdiv1_outdiv4[0]")?.as_long()?, 2);
    for key in ["/SIM/system_core_clock[0]", "/SIM/system_bus_clock[0]", "/SIM/system_flash_clock[0]"] {
        assert!(severity(&device, key)? < Severity::Warning, "{key}");
    }
    Ok(())
}

#[test]
fn pll_reference_below_its_window_is_an_error() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;
    // 1MHz external clock: PRDIV cannot bring it up to 2MHz.
    device.set("/MCG/mcg_c2_erefs0", false)?;
    device.set("/OSC0/osc_input_freq", 1_000_000_i64)?;
    assert_eq!(device.get("/OSC0/osc_clock")?.as_long()?, 1_000_000);

    let input = device.get("/MCG/pll0InputFrequency[0]")?;
    let status = input.status().expect("PLL input status");
    assert_eq!(status.severity(), Severity::Error);
    assert!(status.text().contains("not usable with input clock frequency"));
    assert_eq!(device.get("/MCG/mcg_c5_prdiv0[0]")?.as_long()?, 1);
    assert_eq!(device.get("/MCG/mcg_c6_vdiv0[0]")?.as_long()?, 24);
    let output = device.get("/MCG/pll0OutputFrequency[0]")?;
    assert_eq!(Status::severity_of(output.status()), Severity::Error);
    assert!(!output.is_enabled());
    assert_eq!(severity(&device, "/MCG/system_mcgoutclk_clock[0]")?, Severity::Error);
    Ok(())
}

#[test]
fn pll_reference_error_is_not_reported_while_the_pll_is_off() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    device.set("/MCG/mcg_c2_erefs0", false)?;
    device.set("/OSC0/osc_input_freq", 1_000_000_i64)?;

    let output = device.get("/MCG/pll0OutputFrequency[0]")?;
    assert!(!output.is_enabled());
    assert_eq!(output.status().map(Status::text), Some("PLL is disabled"));
    assert_eq!(output.status().map(Status::severity), Some(Severity::Warning));
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 20_971_520);
    Ok(())
}

#[test]
fn oscer_gated_by_erclken() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg()?.start()?;
    assert_eq!(device.get("/OSC0/oscer_clock")?.as_long()?, 8_000_000);

    device.set("/OSC0/osc_cr_erclken", false)?;
    let oscer = device.get("/OSC0/oscer_clock")?;
    assert_eq!(oscer.as_long()?, 0);
    assert!(!oscer.is_enabled());
    assert_eq!(oscer.status().map(Status::text), Some("Disabled by osc_cr_erclken"));
    assert!(oscer.origin().contains("[Disabled by osc_cr_erclken]"));

    device.set("/OSC0/osc_cr_erclken", true)?;
    let oscer = device.get("/OSC0/oscer_clock")?;
    assert_eq!(oscer.as_long()?, 8_000_000);
    assert!(oscer.is_enabled());
    Ok(())
}

#[test]
fn oscer_gating_reaches_the_tpm() -> Result<(), Error> {
    init_tracing();
    let mut template = templates::kl_series_mcg_lite()?;
    template.add_timer("TPM0", TimerKind::Tpm)?;
    let mut device = template.start()?;
    device.set("/SIM/sim_sopt2_tpmsrc", 2_i64)?;
    let tpm_clock = device.get("/SIM/system_tpm_clock")?.as_long()?;
    assert!(tpm_clock > 0);
    assert_eq!(device.get("/TPM0/clockFrequency")?.as_double()?, tpm_clock as f64);

    device.set("/OSC0/osc_cr_erclken", false)?;
    for key in ["/SIM/system_tpm_clock", "/TPM0/clockFrequency", "/TPM0/tpm_mod_period"] {
        let variable = device.get(key)?;
        assert!(!variable.is_enabled(), "{key}");
        let status = variable.status().expect(key);
        assert_eq!(status.text(), "Disabled by osc_cr_erclken", "{key}");
        assert!(status.severity() <= Severity::Info, "{key}");
    }
    assert_eq!(device.get("/SIM/system_tpm_clock")?.as_long()?, 0);
    Ok(())
}

#[test]
fn rtc_takes_over_the_shared_oscillator_pins() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg_shared_rtc()?.start()?;

    // rtc_cr_osce is set out of reset: OSC0 is held in its low range for the RTC.
    let range = device.get("/OSC0/oscillatorRange")?;
    assert_eq!(range.as_long()?, 0);
    assert!(!range.is_enabled());
    assert_eq!(range.origin(), "Forced by RTC");
    let erefs = device.get("/MCG/mcg_c2_erefs0")?;
    assert!(!erefs.is_enabled());
    assert!(erefs.status().map(Status::text).is_some_and(|t| t.contains("shares XTAL/EXTAL pins")));
    assert_eq!(device.get("/OSC0/osc32k_clock")?.as_long()?, 32_768);

    assert_eq!(device.get("/RTC/osc_input_freq")?.as_long()?, 32_768);
    assert_eq!(device.get("/RTC/osc_clock")?.as_long()?, 32_768);
    assert_eq!(device.get("/RTC/rtc_1hz_clock")?.as_long()?, 1);
    assert!(!device.get("/RTC/rtc_cr_clko")?.is_enabled());
    assert!(!device.get("/RTC/rtcclk_gated_clock")?.is_enabled());

    // The RTC clock output then comes from OSCERCLK.
    assert_eq!(device.get("/SIM/rtc_clkout")?.as_long()?, 1);
    device.set("/SIM/sim_sopt2_rtcclkoutsel", true)?;
    assert_eq!(
        device.get("/SIM/rtc_clkout")?.as_long()?,
        device.get("/OSC0/oscer_clock")?.as_long()?
    );

    // Released by the RTC, OSC0 classifies its crystal again.
    device.set("/RTC/rtc_cr_osce", false)?;
    let range = device.get("/OSC0/oscillatorRange")?;
    assert!(range.is_enabled());
    assert_eq!(range.origin(), "Determined by Crystal Frequency");
    assert!(device.get("/MCG/mcg_c2_erefs0")?.is_enabled());
    assert!(!device.get("/RTC/osc_clock")?.is_enabled());
    Ok(())
}

#[test]
fn rtc_follows_the_shared_crystal_out_of_range() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg_shared_rtc()?.start()?;
    // An 8MHz crystal cannot run the RTC, which then gives the pins back to OSC0.
    device.set("/OSC0/osc_input_freq", 8_000_000_i64)?;

    assert_eq!(device.get("/RTC/osc_input_freq")?.as_long()?, 8_000_000);
    let osce = device.get("/RTC/rtc_cr_osce")?;
    assert!(!osce.as_bool()?);
    assert!(osce.status().map(Status::text).is_some_and(|t| t.starts_with("External crystal frequency not suitable for RTCCLK32")));
    assert_eq!(device.get("/OSC0/oscillatorRange")?.as_long()?, 1);
    assert_eq!(device.get("/OSC0/osc_clock")?.as_long()?, 8_000_000);
    Ok(())
}

#[test]
fn no_pll_part_rejects_pll_modes() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::k_series_mcg_no_pll()?.start()?;
    assert!(device.safe_get("/MCG/pll0OutputFrequency[0]")?.is_none());

    device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;
    assert_eq!(severity(&device, "/MCG/mcgClockMode[0]")?, Severity::Error);
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 0);
    assert_eq!(device.worst_severity(), Severity::Error);

    device.set("/MCG/mcgClockMode[0]", "McgClockMode_FEI")?;
    assert_eq!(severity(&device, "/MCG/mcgClockMode[0]")?, Severity::Ok);
    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 20_971_520);
    Ok(())
}

#[test]
fn kl_part_runs_from_hirc_and_feeds_the_tpm() -> Result<(), Error> {
    init_tracing();
    let mut template = templates::kl_series_mcg_lite()?;
    template.add_timer("TPM0", TimerKind::Tpm)?;
    let mut device = template.start()?;

    assert_eq!(device.get("/MCG/system_mcgoutclk_clock[0]")?.as_long()?, 48_000_000);
    assert_eq!(device.get("/SIM/system_core_clock[0]")?.as_long()?, 48_000_000);
    assert_eq!(device.get("/SIM/system_bus_clock[0]")?.as_long()?, 24_000_000);
    assert_eq!(device.get("/SIM/sim_clkdiv1_outdiv4[0]")?.as_long()?, 2);

    // The TPM clock is off out of reset.
    assert_eq!(device.get("/SIM/system_tpm_clock")?.as_long()?, 0);
    assert_eq!(device.get("/TPM0/clockFrequency")?.as_double()?, 0.0);
    assert!(!device.get("/TPM0/tpm_mod_period")?.is_enabled());

    device.set("/SIM/sim_sopt2_tpmsrc", 1_i64)?;
    let tpm_clock = device.get("/SIM/system_tpm_clock")?.as_long()?;
    assert!(tpm_clock > 0);
    assert_eq!(device.get("/TPM0/clockFrequency")?.as_double()?, tpm_clock as f64);
    assert!(device.get("/TPM0/tpm_mod_period")?.is_enabled());
    Ok(())
}

#[test]
fn ke_part_locks_the_fll_to_the_crystal() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::ke_series_ics()?.start()?;
    device.set("/ICS/icsClockMode[0]", "IcsClockMode_FEE")?;

    assert_eq!(device.get("/ICS/fllInputFrequency[0]")?.as_long()?, 31_250);
    assert_eq!(device.get("/ICS/system_icsfllclk_clock[0]")?.as_long()?, 40_000_000);
    assert!(!device.get("/ICS/ics_c1_irefs[0]")?.as_bool()?);

    device.set("/ICS/ics_c2_bdiv[0]", 1_i64)?;
    assert_eq!(device.get("/ICS/system_icsoutclk_clock[0]")?.as_long()?, 20_000_000);
    Ok(())
}

#[test]
fn ke_part_without_a_reference_divider() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::ke_series_ics()?.start()?;
    device.set("/ICS/icsClockMode[0]", "IcsClockMode_FEE")?;
    assert!(device.get("/ICS/ics_c1_rdiv[0]")?.as_long()? > 0);

    // 3MHz is a high-range crystal, but no high-range divider reaches 31.25-39.06kHz.
    device.set("/OSC0/osc_input_freq", 3_000_000_i64)?;
    let rdiv = device.get("/ICS/ics_c1_rdiv[0]")?;
    assert_eq!(rdiv.as_long()?, 0);
    let status = rdiv.status().expect("divider status");
    assert_eq!(status.severity(), Severity::Warning);
    assert!(status.text().starts_with("Unable to find suitable divider"));

    // An unusable crystal passes its error on instead.
    device.set("/OSC0/osc_input_freq", 1_000_000_i64)?;
    let rdiv = device.get("/ICS/ics_c1_rdiv[0]")?;
    assert_eq!(rdiv.as_long()?, 0);
    assert_eq!(Status::severity_of(rdiv.status()), Severity::Error);
    Ok(())
}

#[test]
fn s32k_sosc_range_follows_the_crystal() -> Result<(), Error> {
    init_tracing();
    let mut device = templates::s32k_scg()?.start()?;
    assert_eq!(device.get("/SCG/scg_sosccfg_range")?.as_long()?, 3);
    for (crystal, range) in [(500_000_i64, 1), (4_000_000, 2), (16_000_000, 3)] {
        device.set("/SCG/system_sosc_frequency", crystal)?;
        assert_eq!(device.get("/SCG/scg_sosccfg_range")?.as_long()?, range, "{crystal}");
    }
    Ok(())
}

#[test]
fn s32k_run_mode_has_clocks() -> Result<(), Error> {
    init_tracing();
    let device = templates::s32k_scg()?.start()?;
    let core = device.get("/SCG/run_mode_core_clock")?.as_long()?;
    let bus = device.get("/SCG/run_mode_bus_clock")?.as_long()?;
    assert!(core > 0 && core <= 80_000_000);
    assert!(bus > 0 && bus <= core);
    Ok(())
}

#[test]
fn peripherals_follow_the_bus_clock() -> Result<(), Error> {
    init_tracing();
    let mut template = templates::k_series_mcg()?;
    template.add_pit("PIT", 4)?;
    template.add_i2c("I2C0")?;
    template.add_lptmr("LPTMR0")?;
    template.add_timer("FTM0", TimerKind::Ftm)?;
    template.add_adc("ADC0", Default::default())?;
    template.add_pdb("PDB0", Default::default())?;
    let mut device = template.start()?;

    let bus = device.get("/SIM/system_bus_clock[0]")?.as_long()?;
    assert_eq!(bus, 20_971_520);
    assert_eq!(device.get("/PIT/pitInputClock")?.as_long()?, bus);

    // PIT: period in, load value out.
    device.set("/PIT/pit_tctrl_ten[0]", true)?;
    device.set("/PIT/pit_period[0]", 1e-3)?;
    assert_eq!(device.get("/PIT/pit_ldval[0]")?.as_long()?, 20_971);
    let frequency = device.get("/PIT/pit_frequency[0]")?.as_double()?;
    assert!((frequency - 1_000.0).abs() < 1.0);
    assert!(!device.get("/PIT/pit_ldval[1]")?.is_enabled());

    // I2C: the requested speed is replaced by the nearest reachable one.
    device.set("/I2C0/i2c_speed", 100_000_i64)?;
    let speed = device.get("/I2C0/i2c_speed")?.as_long()?;
    assert!((speed - 100_000).abs() < 5_000, "{speed}");
    assert_eq!(device.get("/I2C0/i2cInputClock")?.as_long()?, bus);

    // LPTMR counts the 1kHz LPO by default.
    assert_eq!(device.get("/LPTMR0/counterFrequency")?.as_double()?, 1_000.0);
    device.set("/LPTMR0/lptmr_cmrPeriod", 0.5)?;
    assert_eq!(device.get("/LPTMR0/lptmr_cmr_compare")?.as_long()?, 499);
    assert_eq!(device.get("/LPTMR0/lptmr_cmrFrequency")?.as_double()?, 2.0);

    // FTM: edge-aligned, then centre-aligned.
    device.set("/FTM0/ftm_mod_period", 1e-3)?;
    assert_eq!(device.get("/FTM0/ftm_mod")?.as_long()?, 20_971);
    device.set("/FTM0/ftm_sc_cpwms", true)?;
    let period = device.get("/FTM0/ftm_mod_period")?.as_double()?;
    assert!((period - 2.0 * 20_971.0 / bus as f64).abs() < 1e-9);

    // ADC and PDB produce clocks from the same tree.
    assert!(device.get("/ADC0/clockFrequency")?.as_double()? > 0.0);
    assert!(device.get("/PDB0/pdb_frequency")?.as_double()? > 0.0);
    Ok(())
}
