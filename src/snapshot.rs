//! Bulk save and restore of variable values, keyed by absolute variable key.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    Result,
    engine::{Device, InitPhase},
    variable::Value,
};

/// Every variable value of a device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub device: String,
    pub values: BTreeMap<String, Value>,
}

impl Snapshot {
    pub fn capture(device: &Device) -> Self {
        Self {
            device: device.name().to_owned(),
            values: device
                .variables()
                .map(|(id, variable)| (device.key_of(id), variable.value().clone()))
                .collect(),
        }
    }

    /// Write the values back with propagation suspended, then settle the device with one full
    /// pass. Returns the number of changes of that pass.
    pub fn restore(&self, device: &mut Device) -> Result<usize> {
        let phase = device.phase();
        device.set_phase(InitPhase::PropagationSuspended);
        let written = self
            .values
            .iter()
            .try_for_each(|(key, value)| device.set(key, value.clone()).map(|_| ()));
        device.set_phase(phase);
        written?;
        tracing::debug!(device = %self.device, values = self.values.len(), "snapshot restored");
        device.validate_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates;

    #[test]
    fn restore_reproduces_the_captured_state() -> core::result::Result<(), Box<dyn std::error::Error>> {
        let mut device = templates::k_series_mcg()?.start()?;
        device.set("/OSC0/osc_input_freq", 12_000_000_i64)?;
        let saved = Snapshot::capture(&device);

        let json = serde_json::to_string(&saved)?;
        let loaded: Snapshot = serde_json::from_str(&json)?;

        let mut fresh = templates::k_series_mcg()?.start()?;
        loaded.restore(&mut fresh)?;
        assert_eq!(Snapshot::capture(&fresh), saved);
        Ok(())
    }
}
