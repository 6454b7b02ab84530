//! The recomputation unit. A validator is attached to one peripheral, resolves and watches the
//! variables it needs once at attach time, and is then run by the engine whenever one of them
//! changes (or with `None` for a full revalidation).
//!
//! Validators write only through [`Context`], which records every observable change so the engine
//! can schedule dependents, and enforces that each variable has a single writing validator.

use crate::{
    Result,
    engine::{InitPhase, PropagationError, ValidatorId},
    namespace::{PeripheralId, VarId, VariableStore},
    variable::{ChoiceEntry, Status, Value, Variable},
};

/// A recomputation unit.
pub trait Validator {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Resolve handles and register watched variables. Called once, when attached.
    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()>;

    /// Recompute owned variables. `changed` is the variable that triggered the run, or `None`
    /// for a full revalidation.
    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()>;
}

/// A validator that works over an array dimension, eg one pass per clock configuration.
/// Attach it wrapped in [`Indexed`].
pub trait IndexedValidator {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()>;

    /// Recompute the variables of one index.
    fn validate(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>, index: usize) -> Result<()>;
}

/// Adapter running an [`IndexedValidator`] over its dimension.
///
/// A trigger carrying an explicit array index restricts the run to that index. Anything else
/// runs every index in turn. The current index is left at 0 afterwards.
pub struct Indexed<V>(pub V);

impl<V: IndexedValidator> Validator for Indexed<V> {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn build_watch_list(&mut self, ctx: &mut WatchContext<'_>) -> Result<()> {
        let result = self.0.build_watch_list(ctx);
        ctx.set_index(0);
        result
    }

    fn on_changed(&mut self, ctx: &mut Context<'_>, changed: Option<VarId>) -> Result<()> {
        let dimension = self.0.dimension();
        let explicit = changed
            .and_then(|id| ctx.var(id).index())
            .filter(|&i| i < dimension);

        let result = match explicit {
            Some(index) => {
                ctx.set_index(index);
                self.0.validate(ctx, changed, index)
            }
            None => (0..dimension).try_for_each(|index| {
                ctx.set_index(index);
                self.0.validate(ctx, changed, index)
            }),
        };
        ctx.set_index(0);
        result
    }
}

/// Handles of an indexed family, one per index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Family(Vec<VarId>);

impl Family {
    pub fn new(ids: Vec<VarId>) -> Self {
        Self(ids)
    }

    /// Handle for `index`. Indices beyond the family's dimension use the last member, so a
    /// family declared with dimension 1 can serve every configuration.
    pub fn at(&self, index: usize) -> VarId {
        self.0[index.min(self.0.len().saturating_sub(1))]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = VarId> + '_ {
        self.0.iter().copied()
    }

    pub fn contains(&self, id: VarId) -> bool {
        self.0.contains(&id)
    }
}

/// Attach-time context: key resolution relative to the validator's peripheral, watch
/// registration, and one-off configuration of owned variables (bounds, offsets, tooltips).
pub struct WatchContext<'a> {
    store: &'a mut VariableStore,
    owners: &'a mut Vec<Option<ValidatorId>>,
    peripheral: PeripheralId,
    validator: ValidatorId,
    index: usize,
    watched: Vec<VarId>,
}

impl<'a> WatchContext<'a> {
    pub(crate) fn new(
        store: &'a mut VariableStore,
        owners: &'a mut Vec<Option<ValidatorId>>,
        peripheral: PeripheralId,
        validator: ValidatorId,
    ) -> Self {
        Self {
            store,
            owners,
            peripheral,
            validator,
            index: 0,
            watched: Vec::new(),
        }
    }

    pub(crate) fn into_watched(self) -> Vec<VarId> {
        self.watched
    }

    pub fn peripheral_name(&self) -> &str {
        self.store.peripheral(self.peripheral).name()
    }

    /// Index used to rewrite `[]` keys.
    pub fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Resolve a variable that must exist.
    pub fn lookup(&self, key: &str) -> Result<VarId> {
        Ok(self.store.resolve(self.peripheral, key, self.index)?)
    }

    /// Resolve a variable that may be absent on this device.
    pub fn safe_lookup(&self, key: &str) -> Result<Option<VarId>> {
        Ok(self.store.try_resolve(self.peripheral, key, self.index)?)
    }

    /// Watch an already-resolved variable.
    pub fn watch_handle(&mut self, id: VarId) {
        if !self.watched.contains(&id) {
            self.watched.push(id);
        }
    }

    /// Resolve and watch a variable that must exist.
    pub fn watch(&mut self, key: &str) -> Result<VarId> {
        let id = self.lookup(key)?;
        self.watch_handle(id);
        Ok(id)
    }

    /// Resolve and watch a variable that may be absent.
    pub fn safe_watch(&mut self, key: &str) -> Result<Option<VarId>> {
        let id = self.safe_lookup(key)?;
        if let Some(id) = id {
            self.watch_handle(id);
        }
        Ok(id)
    }

    /// Resolve a `[]` key for each index in `0..dimension`.
    pub fn family(&mut self, key: &str, dimension: usize) -> Result<Family> {
        let saved = self.index;
        let ids = (0..dimension.max(1))
            .map(|i| {
                self.index = i;
                self.lookup(key)
            })
            .collect::<Result<Vec<_>>>();
        self.index = saved;
        Ok(Family(ids?))
    }

    /// As [`family`](Self::family), watching every member.
    pub fn watch_family(&mut self, key: &str, dimension: usize) -> Result<Family> {
        let family = self.family(key, dimension)?;
        for id in family.iter() {
            self.watch_handle(id);
        }
        Ok(family)
    }

    /// Optional family: `None` when index 0 is absent.
    pub fn safe_family(&mut self, key: &str, dimension: usize) -> Result<Option<Family>> {
        let saved = self.index;
        self.index = 0;
        let first = self.safe_lookup(key);
        self.index = saved;
        match first? {
            Some(_) => Ok(Some(self.family(key, dimension)?)),
            None => Ok(None),
        }
    }

    pub fn safe_watch_family(&mut self, key: &str, dimension: usize) -> Result<Option<Family>> {
        let family = self.safe_family(key, dimension)?;
        if let Some(family) = &family {
            for id in family.iter() {
                self.watch_handle(id);
            }
        }
        Ok(family)
    }

    /// A family that may have been declared indexed or plain. Plain variables are
    /// repeated for each index.
    pub fn watch_either(&mut self, base: &str, dimension: usize) -> Result<Family> {
        match self.safe_watch_family(&format!("{base}[]"), dimension)? {
            Some(family) => Ok(family),
            None => Ok(Family(vec![self.watch(base)?])),
        }
    }

    /// Resolve the clock references of a choice variable's entries. Entries without a reference,
    /// or whose target is absent on this device, map to `None`.
    pub fn choice_sources(&self, selector: VarId) -> Result<Vec<Option<(VarId, crate::Scale)>>> {
        self.store
            .get(selector)
            .choices()
            .iter()
            .map(|entry: &ChoiceEntry| match entry.reference() {
                Some(reference) => Ok(self
                    .safe_lookup(&reference.key)?
                    .map(|id| (id, reference.scale))),
                None => Ok(None),
            })
            .collect()
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        self.store.get(id)
    }

    /// One-off configuration of a variable this validator owns.
    pub fn configure(&mut self, id: VarId, configure: impl FnOnce(&mut Variable)) -> Result<()> {
        claim(self.store, self.owners, self.validator, id, true)?;
        configure(self.store.get_mut(id));
        Ok(())
    }

    context_reads!(bool: bool, long: i64, double: f64, text: String);
}

/// Record `writer` as the owner of `id`, or fail if another validator already owns it.
fn claim(
    store: &VariableStore,
    owners: &mut [Option<ValidatorId>],
    writer: ValidatorId,
    id: VarId,
    enforce: bool,
) -> Result<()> {
    let slot = &mut owners[id.index()];
    match *slot {
        None => {
            *slot = Some(writer);
            Ok(())
        }
        Some(owner) if owner == writer || !enforce => Ok(()),
        Some(owner) => Err(PropagationError::WriteConflict {
            variable: store.key_of(id),
            owner: owner.index(),
            writer: writer.index(),
        }
        .into()),
    }
}

/// Observable state of a variable, taken when a run first writes it.
#[derive(Clone, Debug, PartialEq)]
struct Observed {
    value: Value,
    status: Option<Status>,
    enabled: bool,
    origin: String,
}

impl Observed {
    fn of(variable: &Variable) -> Self {
        Self {
            value: variable.value().clone(),
            status: variable.status().cloned(),
            enabled: variable.is_enabled(),
            origin: variable.origin().to_owned(),
        }
    }
}

/// Runtime context handed to [`Validator::on_changed`].
///
/// Only the net effect of a run counts as a change: a variable written twice and left as it was
/// found does not notify anybody.
pub struct Context<'a> {
    store: &'a mut VariableStore,
    owners: &'a mut Vec<Option<ValidatorId>>,
    touched: Vec<(VarId, Observed)>,
    writer: ValidatorId,
    phase: InitPhase,
    enforce_ownership: bool,
    index: usize,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        store: &'a mut VariableStore,
        owners: &'a mut Vec<Option<ValidatorId>>,
        writer: ValidatorId,
        phase: InitPhase,
        enforce_ownership: bool,
    ) -> Self {
        Self {
            store,
            owners,
            touched: Vec::new(),
            writer,
            phase,
            enforce_ownership,
            index: 0,
        }
    }

    pub fn phase(&self) -> InitPhase {
        self.phase
    }

    /// Current array index of an indexed validator run.
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    pub fn var(&self, id: VarId) -> &Variable {
        self.store.get(id)
    }

    context_reads!(bool: bool, long: i64, double: f64, text: String);

    pub fn status(&self, id: VarId) -> Option<Status> {
        self.store.get(id).status().cloned()
    }

    pub fn filtered_status(&self, id: VarId) -> Option<Status> {
        self.store.get(id).filtered_status().cloned()
    }

    pub fn origin(&self, id: VarId) -> String {
        self.store.get(id).origin().to_owned()
    }

    pub fn is_enabled(&self, id: VarId) -> bool {
        self.store.get(id).is_enabled()
    }

    /// Selected entry of a choice variable.
    pub fn choice(&self, id: VarId) -> Option<&ChoiceEntry> {
        self.store.get(id).selected_choice()
    }

    /// Substitution text of the selected entry, eg an enumeration name.
    pub fn choice_name(&self, id: VarId) -> String {
        self.choice(id)
            .map(|c| c.substitution().to_owned())
            .unwrap_or_default()
    }

    /// Variables whose observable state differs from when this run first wrote them.
    pub(crate) fn into_changes(self) -> Vec<VarId> {
        let store = self.store;
        self.touched
            .into_iter()
            .filter(|(id, before)| *before != Observed::of(store.get(*id)))
            .map(|(id, _)| {
                tracing::trace!(variable = %store.key_of(id), value = %store.get(id), "changed");
                id
            })
            .collect()
    }

    fn write(&mut self, id: VarId, change: impl FnOnce(&mut Variable) -> bool) -> Result<()> {
        claim(self.store, self.owners, self.writer, id, self.enforce_ownership)?;
        if !self.touched.iter().any(|(t, _)| *t == id) {
            self.touched.push((id, Observed::of(self.store.get(id))));
        }
        change(self.store.get_mut(id));
        Ok(())
    }

    pub fn set_value(&mut self, id: VarId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let mut result = Ok(false);
        self.write(id, |v| {
            let range = v.clear_range_status();
            result = v.set_value(value);
            range || matches!(result, Ok(true))
        })?;
        result.map(|_| ()).map_err(Into::into)
    }

    pub fn set_status(&mut self, id: VarId, status: impl Into<Option<Status>>) -> Result<()> {
        let status = status.into();
        self.write(id, |v| v.set_status(status))
    }

    pub fn clear_status(&mut self, id: VarId) -> Result<()> {
        self.write(id, Variable::clear_status)
    }

    pub fn set_origin(&mut self, id: VarId, origin: impl Into<String>) -> Result<()> {
        let origin = origin.into();
        self.write(id, |v| v.set_origin(origin))
    }

    pub fn enable(&mut self, id: VarId, enabled: bool) -> Result<()> {
        self.write(id, |v| v.enable(enabled))
    }

    pub fn set_locked(&mut self, id: VarId, locked: bool) -> Result<()> {
        self.write(id, |v| v.set_locked(locked))
    }

    pub fn set_min(&mut self, id: VarId, min: Option<f64>) -> Result<()> {
        self.write(id, |v| v.set_min(min))
    }

    pub fn set_max(&mut self, id: VarId, max: Option<f64>) -> Result<()> {
        self.write(id, |v| v.set_max(max))
    }

    pub fn set_tool_tip(&mut self, id: VarId, tool_tip: impl Into<String>) -> Result<()> {
        let tool_tip = tool_tip.into();
        self.write(id, |v| v.set_tool_tip(tool_tip))
    }

    /// Coerce an out-of-range selector back to `default`, leaving an INFO status so the
    /// coercion is visible.
    pub fn coerce_selector(&mut self, id: VarId, default: i64) -> Result<()> {
        tracing::warn!(
            variable = %self.store.key_of(id),
            default,
            "invalid selection coerced to default"
        );
        self.set_value(id, default)?;
        self.set_status(id, Status::info("Invalid selection coerced to default"))
    }
}
