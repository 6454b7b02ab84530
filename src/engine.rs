//! The propagation engine. A [`Device`] owns the variable arena, the attached validators and the
//! worklist that drives recomputation to a fixed point.
//!
//! A change made through [`Device::set_value`] queues every validator watching the variable. Each
//! validator run may change further variables; their listeners are queued in turn, first in first
//! out. A pending `(validator, trigger)` pair is never queued twice, and a validator that keeps
//! being re-run within one pass is reported as a cycle instead of looping forever.

use std::collections::VecDeque;

use tracing::{debug, error, instrument, trace};

use crate::{
    Result,
    namespace::{KeyError, PeripheralId, PeripheralView, VarId, VariableStore},
    validator::{Context, Family, Validator, WatchContext},
    variable::{Severity, Status, Value, Variable},
};

/// Handle of an attached validator, in attach order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct ValidatorId(usize);

impl ValidatorId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Initialisation phase of a device configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum InitPhase {
    /// The graph is being built or bulk-loaded. Edits are stored but nothing is recomputed.
    #[default]
    PropagationSuspended,
    /// Edits cascade through the validators.
    PropagationAllowed,
    /// As `PropagationAllowed`, and validators may also write computed values back into
    /// user-facing input fields, eg an achieved baud rate.
    FullPropagation,
}

impl InitPhase {
    pub fn propagates(self) -> bool {
        self != Self::PropagationSuspended
    }

    pub fn allows_round_trip(self) -> bool {
        self == Self::FullPropagation
    }
}

/// Engine settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct EngineConfig {
    /// Maximum runs of a single validator within one pass before the pass is aborted as a cycle.
    pub max_iterations: usize,
    /// Reject writes to a variable by a validator other than its first writer.
    pub enforce_ownership: bool,
}

impl Default for EngineConfig {
    /// 100 runs per validator per pass, ownership enforced.
    fn default() -> Self {
        Self {
            max_iterations: 100,
            enforce_ownership: true,
        }
    }
}

/// Reasons a propagation pass is aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum PropagationError {
    /// A validator kept being re-triggered. The graph contains a cycle that does not settle.
    #[error("validator `{validator}` did not settle after {iterations} runs")]
    NotConverged { validator: String, iterations: usize },
    /// Two validators tried to write the same variable.
    #[error("`{variable}` is owned by validator #{owner}, written by validator #{writer}")]
    WriteConflict {
        variable: String,
        owner: usize,
        writer: usize,
    },
    /// A mode selector held a value the validator has no rule for.
    #[error("validator `{validator}` has no rule for mode `{mode}`")]
    UnhandledMode { validator: String, mode: String },
}

struct Slot {
    peripheral: PeripheralId,
    validator: Box<dyn Validator>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Job {
    validator: ValidatorId,
    trigger: Option<VarId>,
}

/// One device configuration: peripherals, variables and validators.
pub struct Device {
    name: String,
    store: VariableStore,
    /// Writing validator of each variable, once known.
    owners: Vec<Option<ValidatorId>>,
    slots: Vec<Slot>,
    phase: InitPhase,
    config: EngineConfig,
    queue: VecDeque<Job>,
}

impl Device {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, EngineConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: EngineConfig) -> Self {
        Self {
            name: name.into(),
            store: VariableStore::new(),
            owners: Vec::new(),
            slots: Vec::new(),
            phase: InitPhase::default(),
            config,
            queue: VecDeque::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    pub fn add_peripheral(&mut self, name: &str) -> Result<PeripheralId> {
        Ok(self.store.add_peripheral(name)?)
    }

    pub fn declare(&mut self, peripheral: PeripheralId, variable: Variable) -> Result<VarId> {
        let id = self.store.declare(peripheral, variable)?;
        self.owners.push(None);
        Ok(id)
    }

    /// Declare a `name[]` family expanded over `dimension` indices.
    pub fn declare_family(
        &mut self,
        peripheral: PeripheralId,
        template: Variable,
        dimension: usize,
    ) -> Result<Family> {
        let ids = self.store.declare_family(peripheral, template, dimension)?;
        self.owners.resize(self.store.len(), None);
        Ok(Family::new(ids))
    }

    /// Attach a validator to `peripheral`, building its watch list.
    pub fn attach(
        &mut self,
        peripheral: PeripheralId,
        validator: impl Validator + 'static,
    ) -> Result<ValidatorId> {
        let id = ValidatorId(self.slots.len());
        let mut validator: Box<dyn Validator> = Box::new(validator);

        let mut ctx = WatchContext::new(&mut self.store, &mut self.owners, peripheral, id);
        validator.build_watch_list(&mut ctx)?;
        let watched = ctx.into_watched();

        debug!(
            validator = validator.name(),
            peripheral = self.store.peripheral(peripheral).name(),
            watched = watched.len(),
            "attached"
        );
        for var in watched {
            self.store.get_mut(var).add_listener(id);
        }
        self.slots.push(Slot {
            peripheral,
            validator,
        });
        Ok(id)
    }

    pub fn validator_name(&self, id: ValidatorId) -> &str {
        self.slots[id.0].validator.name()
    }

    /// Peripheral a validator is attached to.
    pub fn validator_peripheral(&self, id: ValidatorId) -> PeripheralId {
        self.slots[id.0].peripheral
    }

    pub fn validator_count(&self) -> usize {
        self.slots.len()
    }

    pub fn peripheral(&self, name: &str) -> Result<PeripheralView<'_>> {
        let id = self.store.peripheral_id(name)?;
        Ok(PeripheralView::new(&self.store, id))
    }

    pub fn peripherals(&self) -> impl Iterator<Item = PeripheralView<'_>> {
        self.store
            .peripherals()
            .map(|(id, _)| PeripheralView::new(&self.store, id))
    }

    /// Handle of an absolute key such as `/MCG/mcgClockMode[0]`.
    pub fn handle(&self, key: &str) -> Result<VarId> {
        Ok(self.store.resolve_absolute(key)?)
    }

    /// Variable behind an absolute key that must exist.
    pub fn get(&self, key: &str) -> Result<&Variable> {
        Ok(self.store.get(self.handle(key)?))
    }

    /// Variable behind an absolute key that may be absent on this device.
    pub fn safe_get(&self, key: &str) -> Result<Option<&Variable>> {
        match self.store.resolve_absolute(key) {
            Ok(id) => Ok(Some(self.store.get(id))),
            Err(KeyError::NotFound(_) | KeyError::UnknownPeripheral(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        self.store.get(id)
    }

    /// Absolute key of a variable.
    pub fn key_of(&self, id: VarId) -> String {
        self.store.key_of(id)
    }

    pub fn variables(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.store.iter()
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: InitPhase) {
        debug!(?phase, device = %self.name, "init phase");
        self.phase = phase;
    }

    /// End of loading: allow propagation and run one full pass, then allow round-trip writes
    /// and run another so the device is left at its fixed point. Returns the number of changes
    /// over both passes.
    pub fn start(&mut self) -> Result<usize> {
        self.set_phase(InitPhase::PropagationAllowed);
        let mut changes = self.validate_all()?;
        self.set_phase(InitPhase::FullPropagation);
        changes += self.validate_all()?;
        Ok(changes)
    }

    /// User or loader edit. The value is clamped to the variable's bounds; unless propagation is
    /// suspended, every watcher is then run to a fixed point. Returns true when the variable
    /// changed.
    #[instrument(level = "debug", skip(self, value), fields(variable = %self.store.key_of(id)))]
    pub fn set_value(&mut self, id: VarId, value: impl Into<Value>) -> Result<bool> {
        let variable = self.store.get_mut(id);
        let written = variable.set_value(value.into())?;
        let clamped = variable.apply_bounds()?;
        if !(written || clamped) {
            return Ok(false);
        }
        trace!(value = %self.store.get(id), "edited");
        if self.phase.propagates() {
            self.notify(id, None);
            self.drain()?;
        }
        Ok(true)
    }

    /// [`set_value`](Self::set_value) by absolute key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<bool> {
        let id = self.handle(key)?;
        self.set_value(id, value)
    }

    /// Framework entry point: `Some(var)` runs the watchers of `var`, `None` revalidates
    /// everything. Returns the number of observable changes.
    pub fn on_changed(&mut self, trigger: Option<VarId>) -> Result<usize> {
        match trigger {
            Some(id) => {
                self.notify(id, None);
                self.drain()
            }
            None => self.validate_all(),
        }
    }

    /// Run every validator with no trigger, in attach order, then settle. Returns the number of
    /// observable changes; 0 means the graph was already at its fixed point.
    #[instrument(level = "debug", skip(self), fields(device = %self.name))]
    pub fn validate_all(&mut self) -> Result<usize> {
        for i in 0..self.slots.len() {
            self.enqueue(Job {
                validator: ValidatorId(i),
                trigger: None,
            });
        }
        self.drain()
    }

    /// Worst status among the enabled variables of a peripheral, for an aggregate indicator.
    pub fn worst_status(&self, peripheral: PeripheralId) -> Option<Status> {
        self.store
            .peripheral(peripheral)
            .variables()
            .iter()
            .map(|&id| self.store.get(id))
            .filter(|v| v.is_enabled())
            .filter_map(|v| v.filtered_status().cloned())
            .fold(None, |worst, s| Status::worst(worst, Some(s)))
    }

    /// Worst severity over the whole device.
    pub fn worst_severity(&self) -> Severity {
        self.store
            .peripherals()
            .map(|(id, _)| Status::severity_of(self.worst_status(id).as_ref()))
            .max()
            .unwrap_or_default()
    }

    fn enqueue(&mut self, job: Job) {
        if !self.queue.contains(&job) {
            self.queue.push_back(job);
        }
    }

    /// Queue the listeners of `changed`. A listener that is itself `rerun` keeps its own trigger.
    fn notify(&mut self, changed: VarId, rerun: Option<Job>) {
        for i in 0..self.store.get(changed).listeners().len() {
            let listener = self.store.get(changed).listeners()[i];
            let job = match rerun {
                Some(current) if current.validator == listener => current,
                _ => Job {
                    validator: listener,
                    trigger: Some(changed),
                },
            };
            self.enqueue(job);
        }
    }

    fn drain(&mut self) -> Result<usize> {
        let mut runs = vec![0_usize; self.slots.len()];
        let mut total = 0;
        while let Some(job) = self.queue.pop_front() {
            let count = &mut runs[job.validator.0];
            *count += 1;
            if *count > self.config.max_iterations {
                let validator = self.validator_name(job.validator).to_owned();
                error!(%validator, iterations = *count - 1, "propagation did not settle");
                self.queue.clear();
                return Err(PropagationError::NotConverged {
                    validator,
                    iterations: *count - 1,
                }
                .into());
            }
            match self.run(job) {
                Ok(changes) => total += changes,
                Err(e) => {
                    error!(
                        validator = self.validator_name(job.validator),
                        error = %e,
                        "validation pass aborted"
                    );
                    self.queue.clear();
                    return Err(e);
                }
            }
        }
        Ok(total)
    }

    fn run(&mut self, job: Job) -> Result<usize> {
        let slot = &mut self.slots[job.validator.0];
        debug!(
            validator = slot.validator.name(),
            trigger = ?job.trigger.map(|id| self.store.key_of(id)),
            "validate"
        );
        let mut ctx = Context::new(
            &mut self.store,
            &mut self.owners,
            job.validator,
            self.phase,
            self.config.enforce_ownership,
        );
        slot.validator.on_changed(&mut ctx, job.trigger)?;
        let changes = ctx.into_changes();
        for &id in &changes {
            self.notify(id, Some(job));
        }
        Ok(changes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validator::{Context, WatchContext};

    /// Copies `input` into `output`, doubled.
    struct Doubler {
        input: Option<VarId>,
        output: Option<VarId>,
    }

    impl Validator for Doubler {
        fn name(&self) -> &str {
            "Doubler"
        }

        fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
            self.input = Some(ctx.watch("input")?);
            self.output = Some(ctx.lookup("output")?);
            Ok(())
        }

        fn on_changed(&mut self, ctx: &mut Context<'_>, _: Option<VarId>) -> Result<()> {
            let (Some(input), Some(output)) = (self.input, self.output) else {
                return Ok(());
            };
            let value = ctx.long(input)? * 2;
            ctx.set_value(output, value)
        }
    }

    /// Increments its own watched variable: never settles.
    struct Runaway(Option<VarId>);

    impl Validator for Runaway {
        fn name(&self) -> &str {
            "Runaway"
        }

        fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
            self.0 = Some(ctx.watch("input")?);
            Ok(())
        }

        fn on_changed(&mut self, ctx: &mut Context<'_>, _: Option<VarId>) -> Result<()> {
            let Some(id) = self.0 else { return Ok(()) };
            let next = ctx.long(id)? + 1;
            ctx.set_value(id, next)
        }
    }

    /// Rounds `input` to a multiple of ten, but only once round-trip writes are allowed.
    struct Snap(Option<VarId>);

    impl Validator for Snap {
        fn name(&self) -> &str {
            "Snap"
        }

        fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
            self.0 = Some(ctx.watch("input")?);
            Ok(())
        }

        fn on_changed(&mut self, ctx: &mut Context<'_>, _: Option<VarId>) -> Result<()> {
            let Some(id) = self.0 else { return Ok(()) };
            if !ctx.phase().allows_round_trip() {
                return Ok(());
            }
            let snapped = ctx.long(id)? / 10 * 10;
            ctx.set_value(id, snapped)
        }
    }

    fn device() -> (Device, PeripheralId, VarId, VarId) {
        let mut device = Device::new("test");
        let p = device.add_peripheral("P").unwrap();
        let input = device.declare(p, Variable::long("input", 3)).unwrap();
        let output = device.declare(p, Variable::long("output", 0)).unwrap();
        (device, p, input, output)
    }

    #[test]
    fn suspended_edits_do_not_cascade() {
        let (mut device, p, input, output) = device();
        device
            .attach(p, Doubler { input: None, output: None })
            .unwrap();
        assert!(device.set_value(input, 5_i64).unwrap());
        assert_eq!(device.variable(output).as_long(), Ok(0));

        assert_eq!(device.start().unwrap(), 1);
        assert_eq!(device.variable(output).as_long(), Ok(10));
        assert_eq!(device.validate_all().unwrap(), 0);

        device.set_value(input, 7_i64).unwrap();
        assert_eq!(device.variable(output).as_long(), Ok(14));
    }

    #[test]
    fn start_leaves_round_trip_writes_settled() {
        let (mut device, p, input, _) = device();
        device.set_value(input, 37_i64).unwrap();
        device.attach(p, Snap(None)).unwrap();
        assert_eq!(device.start().unwrap(), 1);
        assert_eq!(device.variable(input).as_long(), Ok(30));
        assert_eq!(device.validate_all().unwrap(), 0);
    }

    #[test]
    fn second_writer_is_rejected() {
        let (mut device, p, _, _) = device();
        device
            .attach(p, Doubler { input: None, output: None })
            .unwrap();
        device
            .attach(p, Doubler { input: None, output: None })
            .unwrap();
        let err = device.start().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::PropagationError(PropagationError::WriteConflict { owner: 0, writer: 1, .. })
        ));
    }

    #[test]
    fn runaway_cycle_is_detected() {
        let (mut device, p, input, _) = device();
        device.attach(p, Runaway(None)).unwrap();
        let err = device.start().unwrap_err();
        assert!(matches!(
            err,
            crate::Error::PropagationError(PropagationError::NotConverged { iterations: 100, .. })
        ));
        // 1 initial run + 99 re-runs each incremented the value before the abort.
        assert_eq!(device.variable(input).as_long(), Ok(103));
    }

    #[test]
    fn phase_flags() {
        assert!(!InitPhase::PropagationSuspended.propagates());
        assert!(InitPhase::PropagationAllowed.propagates());
        assert!(!InitPhase::PropagationAllowed.allows_round_trip());
        assert!(InitPhase::FullPropagation.allows_round_trip());
    }
}
