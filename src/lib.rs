//! Design-time clock tree and peripheral timing calculator for Kinetis-style microcontrollers.
//!
//! A [`Device`] holds typed [`Variable`]s, one per configurable register field or derived clock,
//! grouped by peripheral. Validators attached to each peripheral watch the variables they read and
//! recompute the ones they own whenever an input changes, until the whole graph settles. Problems
//! with a configuration are reported as a [`Status`] on the variables concerned; only malformed
//! templates make an operation fail.
//!
//! The [`templates`] module builds representative devices: K-series MCG, KL-series MCG-Lite,
//! KE-series ICS and S32K SCG parts, plus ADC, PDB, I2C, LPTMR, FTM/TPM and PIT add-ons.
//!
//! ```
//! use kinetis_clock_tree::templates;
//!
//! let mut device = templates::k_series_mcg()?.start()?;
//! device.set("/MCG/mcgClockMode[0]", "McgClockMode_PEE")?;
//! let core = device.get("/SIM/system_core_clock[0]")?;
//! println!("core clock {}Hz from {}", core.as_long()?, core.origin());
//! # Ok::<(), kinetis_clock_tree::Error>(())
//! ```

#[macro_use]
mod macros;

pub mod error;
pub mod notation;
pub mod util;

pub mod engine;
pub mod namespace;
pub mod validator;
pub mod variable;

pub mod clocks;

pub mod adc;
pub mod i2c;
pub mod lptmr;
pub mod pdb;
pub mod pit;
pub mod timer;

pub mod templates;

cfg_if::cfg_if! {
    if #[cfg(snapshot)] {
        pub mod snapshot;
        pub use snapshot::Snapshot;
    }
}

pub use engine::{Device, EngineConfig, InitPhase, PropagationError, ValidatorId};
pub use error::{Error, Result};
pub use namespace::{KeyError, PeripheralId, VarId};
pub use validator::{Context, Family, Indexed, IndexedValidator, Validator, WatchContext};
pub use variable::{ChoiceEntry, ClockReference, Kind, Scale, Severity, Status, Value, ValueError, Variable};
