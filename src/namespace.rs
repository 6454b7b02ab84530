//! Variable namespaces. Every variable of a device lives in one arena and is addressed by a
//! [`VarId`] handle; each peripheral owns a key space over part of that arena.
//!
//! Key syntax:
//! - `name` resolves within the owning peripheral.
//! - `/PERIPHERAL/name` is absolute and may target another peripheral.
//! - `name[]` is a template, rewritten to `name[i]` with the current validation index.
//! - `name[3]` addresses one member of an indexed family directly.
//!
//! Strings are only parsed at graph-build time and at the UI boundary. Validators keep the
//! resolved handles.

use std::collections::{BTreeMap, HashMap};

use crate::variable::Variable;

/// Handle of a variable in the device arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct VarId(u32);

impl VarId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of a peripheral in the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct PeripheralId(u16);

/// Key resolution errors. All of these point at template or validator bugs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum KeyError {
    #[error("variable not found: {0}")]
    NotFound(String),
    /// Both `name` and `name[i]` exist, or an indexed family was looked up without an index.
    #[error("ambiguous key, indexed and unindexed variables collide: {0}")]
    Ambiguous(String),
    #[error("peripheral not found: {0}")]
    UnknownPeripheral(String),
    #[error("malformed key: {0}")]
    Malformed(String),
    #[error("duplicate declaration: {0}")]
    Duplicate(String),
}

/// How the index part of a key is resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexSpec {
    None,
    /// `name[]`: use the current validation index.
    Current,
    Explicit(usize),
}

/// A parsed key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Key<'a> {
    pub peripheral: Option<&'a str>,
    pub name: &'a str,
    pub index: IndexSpec,
}

impl<'a> Key<'a> {
    pub fn parse(key: &'a str) -> Result<Self, KeyError> {
        let malformed = || KeyError::Malformed(key.to_owned());

        let (peripheral, local) = match key.strip_prefix('/') {
            Some(absolute) => {
                let (peripheral, local) = absolute.split_once('/').ok_or_else(malformed)?;
                if peripheral.is_empty() {
                    return Err(malformed());
                }
                (Some(peripheral), local)
            }
            None => (None, key),
        };

        let (name, index) = if let Some(base) = local.strip_suffix("[]") {
            (base, IndexSpec::Current)
        } else if let Some(open) = local.strip_suffix(']') {
            let (base, digits) = open.rsplit_once('[').ok_or_else(malformed)?;
            let index = digits.parse::<usize>().map_err(|_| malformed())?;
            (base, IndexSpec::Explicit(index))
        } else {
            (local, IndexSpec::None)
        };

        if name.is_empty() || name.contains(['/', '[', ']']) {
            return Err(malformed());
        }
        Ok(Self {
            peripheral,
            name,
            index,
        })
    }
}

fn member_name(base: &str, index: usize) -> String {
    format!("{base}[{index}]")
}

/// One peripheral's key space.
#[derive(Debug, Clone)]
pub struct Peripheral {
    name: String,
    variables: BTreeMap<String, VarId>,
    /// Indexed families: base name -> dimension.
    families: BTreeMap<String, usize>,
    order: Vec<VarId>,
}

impl Peripheral {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            variables: BTreeMap::new(),
            families: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Variables in declaration order.
    pub fn variables(&self) -> &[VarId] {
        &self.order
    }

    /// Dimension of an indexed family declared with `name[]`.
    pub fn dimension_of(&self, family: &str) -> Option<usize> {
        self.families.get(family).copied()
    }

    fn qualified(&self, name: &str) -> String {
        format!("/{}/{}", self.name, name)
    }

    fn resolve(&self, name: &str, index: IndexSpec, current: usize) -> Result<VarId, KeyError> {
        let wanted = match index {
            IndexSpec::None => {
                let plain = self.variables.get(name);
                if self.families.contains_key(name) {
                    return Err(KeyError::Ambiguous(self.qualified(name)));
                }
                return plain
                    .copied()
                    .ok_or_else(|| KeyError::NotFound(self.qualified(name)));
            }
            IndexSpec::Current => member_name(name, current),
            IndexSpec::Explicit(i) => member_name(name, i),
        };
        self.variables
            .get(&wanted)
            .copied()
            .ok_or_else(|| KeyError::NotFound(self.qualified(&wanted)))
    }
}

/// The arena of all variables of a device, with per-peripheral key spaces.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    variables: Vec<Variable>,
    /// Owning peripheral of each variable.
    homes: Vec<PeripheralId>,
    peripherals: Vec<Peripheral>,
    by_name: HashMap<String, PeripheralId>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peripheral(&mut self, name: &str) -> Result<PeripheralId, KeyError> {
        if name.is_empty() || name.contains(['/', '[', ']']) {
            return Err(KeyError::Malformed(name.to_owned()));
        }
        if self.by_name.contains_key(name) {
            return Err(KeyError::Duplicate(format!("/{name}")));
        }
        let id = PeripheralId(
            u16::try_from(self.peripherals.len())
                .map_err(|_| KeyError::Malformed(name.to_owned()))?,
        );
        self.peripherals.push(Peripheral::new(name));
        self.by_name.insert(name.to_owned(), id);
        Ok(id)
    }

    fn insert(&mut self, peripheral: PeripheralId, variable: Variable) -> Result<VarId, KeyError> {
        let home = &self.peripherals[peripheral.0 as usize];
        if home.variables.contains_key(variable.name()) {
            return Err(KeyError::Duplicate(home.qualified(variable.name())));
        }
        let id = VarId(
            u32::try_from(self.variables.len())
                .map_err(|_| KeyError::Malformed(variable.name().to_owned()))?,
        );
        let home = &mut self.peripherals[peripheral.0 as usize];
        home.variables.insert(variable.name().to_owned(), id);
        home.order.push(id);
        self.variables.push(variable);
        self.homes.push(peripheral);
        Ok(id)
    }

    /// Declare a plain variable. Names with an index suffix must go through
    /// [`declare_family`](Self::declare_family).
    pub fn declare(&mut self, peripheral: PeripheralId, variable: Variable) -> Result<VarId, KeyError> {
        let key = Key::parse(variable.name())?;
        if key.peripheral.is_some() || key.index != IndexSpec::None {
            return Err(KeyError::Malformed(variable.name().to_owned()));
        }
        self.insert(peripheral, variable)
    }

    /// Declare an indexed family from a template named `name[]` (or plain `name`), expanded to
    /// `name[0]..name[dimension-1]`.
    pub fn declare_family(
        &mut self,
        peripheral: PeripheralId,
        template: Variable,
        dimension: usize,
    ) -> Result<Vec<VarId>, KeyError> {
        let key = Key::parse(template.name())?;
        if key.peripheral.is_some() || matches!(key.index, IndexSpec::Explicit(_)) || dimension == 0 {
            return Err(KeyError::Malformed(template.name().to_owned()));
        }
        let base = key.name.to_owned();
        let home = &self.peripherals[peripheral.0 as usize];
        if home.families.contains_key(&base) {
            return Err(KeyError::Duplicate(home.qualified(&format!("{base}[]"))));
        }
        let ids = (0..dimension)
            .map(|i| self.insert(peripheral, template.instance(member_name(&base, i), i)))
            .collect::<Result<Vec<_>, _>>()?;
        self.peripherals[peripheral.0 as usize]
            .families
            .insert(base, dimension);
        Ok(ids)
    }

    pub fn peripheral_id(&self, name: &str) -> Result<PeripheralId, KeyError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| KeyError::UnknownPeripheral(name.to_owned()))
    }

    pub fn peripheral(&self, id: PeripheralId) -> &Peripheral {
        &self.peripherals[id.0 as usize]
    }

    pub fn peripherals(&self) -> impl Iterator<Item = (PeripheralId, &Peripheral)> {
        self.peripherals
            .iter()
            .enumerate()
            .map(|(i, p)| (PeripheralId(i as u16), p))
    }

    /// Resolve `key` as seen from `from`, using `current` for `[]` templates.
    pub fn resolve(&self, from: PeripheralId, key: &str, current: usize) -> Result<VarId, KeyError> {
        let parsed = Key::parse(key)?;
        let home = match parsed.peripheral {
            Some(name) => self.peripheral_id(name)?,
            None => from,
        };
        self.peripheral(home).resolve(parsed.name, parsed.index, current)
    }

    /// As [`resolve`](Self::resolve), but an absent variable or peripheral is `Ok(None)`.
    /// Ambiguous and malformed keys are still errors.
    pub fn try_resolve(
        &self,
        from: PeripheralId,
        key: &str,
        current: usize,
    ) -> Result<Option<VarId>, KeyError> {
        match self.resolve(from, key, current) {
            Ok(id) => Ok(Some(id)),
            Err(KeyError::NotFound(_) | KeyError::UnknownPeripheral(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Resolve an absolute key, eg `/MCG/mcgClockMode[0]`. A relative key resolves against the
    /// first peripheral.
    pub fn resolve_absolute(&self, key: &str) -> Result<VarId, KeyError> {
        if self.peripherals.is_empty() {
            return Err(KeyError::NotFound(key.to_owned()));
        }
        self.resolve(PeripheralId(0), key, 0)
    }

    pub fn get(&self, id: VarId) -> &Variable {
        &self.variables[id.index()]
    }

    pub fn get_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.index()]
    }

    pub fn home_of(&self, id: VarId) -> PeripheralId {
        self.homes[id.index()]
    }

    /// Absolute key of a variable, eg `/MCG/mcg_c1_frdiv`.
    pub fn key_of(&self, id: VarId) -> String {
        self.peripheral(self.home_of(id)).qualified(self.get(id).name())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VarId, &Variable)> {
        self.variables
            .iter()
            .enumerate()
            .map(|(i, v)| (VarId(i as u32), v))
    }
}

/// Read-only view of one peripheral's key space, for UI and code-generation collaborators.
#[derive(Clone, Copy)]
pub struct PeripheralView<'a> {
    store: &'a VariableStore,
    id: PeripheralId,
}

impl<'a> PeripheralView<'a> {
    pub(crate) fn new(store: &'a VariableStore, id: PeripheralId) -> Self {
        Self { store, id }
    }

    pub fn id(&self) -> PeripheralId {
        self.id
    }

    pub fn name(&self) -> &'a str {
        self.store.peripheral(self.id).name()
    }

    /// Handle of a variable the caller asserts exists. `[]` keys resolve at index 0.
    pub fn handle(&self, key: &str) -> Result<VarId, KeyError> {
        self.store.resolve(self.id, key, 0)
    }

    /// Variable the caller asserts exists.
    pub fn get(&self, key: &str) -> Result<&'a Variable, KeyError> {
        Ok(self.store.get(self.handle(key)?))
    }

    /// Variable that may legitimately be absent on some hardware variants.
    pub fn safe_get(&self, key: &str) -> Result<Option<&'a Variable>, KeyError> {
        Ok(self
            .store
            .try_resolve(self.id, key, 0)?
            .map(|id| self.store.get(id)))
    }

    /// All variables of this peripheral, in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = (VarId, &'a Variable)> + 'a {
        let store = self.store;
        store
            .peripheral(self.id)
            .variables()
            .iter()
            .map(move |&id| (id, store.get(id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (VariableStore, PeripheralId, PeripheralId) {
        let mut store = VariableStore::new();
        let mcg = store.add_peripheral("MCG").unwrap();
        let osc = store.add_peripheral("OSC0").unwrap();
        store.declare(mcg, Variable::long("mcg_c1_frdiv", 0)).unwrap();
        store
            .declare_family(mcg, Variable::long("system_mcgoutclk_clock[]", 0), 3)
            .unwrap();
        store.declare(osc, Variable::long("osc_clock", 8_000_000)).unwrap();
        (store, mcg, osc)
    }

    #[test]
    fn parses_keys() {
        let k = Key::parse("/OSC0/osc_clock").unwrap();
        assert_eq!(k.peripheral, Some("OSC0"));
        assert_eq!(k.index, IndexSpec::None);

        let k = Key::parse("mcgClockMode[]").unwrap();
        assert_eq!((k.name, k.index), ("mcgClockMode", IndexSpec::Current));

        let k = Key::parse("/MCG/mcgClockMode[2]").unwrap();
        assert_eq!(k.index, IndexSpec::Explicit(2));

        for bad in ["", "/", "//x", "/MCG", "a[b]", "a[", "a]", "a/b"] {
            assert!(Key::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn resolves_relative_absolute_and_indexed() {
        let (store, mcg, osc) = store();
        let frdiv = store.resolve(mcg, "mcg_c1_frdiv", 0).unwrap();
        assert_eq!(store.get(frdiv).name(), "mcg_c1_frdiv");

        let clock = store.resolve(mcg, "/OSC0/osc_clock", 0).unwrap();
        assert_eq!(store.home_of(clock), osc);
        assert_eq!(store.key_of(clock), "/OSC0/osc_clock");

        let second = store.resolve(osc, "/MCG/system_mcgoutclk_clock[]", 2).unwrap();
        assert_eq!(store.get(second).index(), Some(2));
        assert_eq!(
            store.resolve(mcg, "system_mcgoutclk_clock[1]", 0),
            store.resolve(mcg, "system_mcgoutclk_clock[]", 1),
        );
    }

    #[test]
    fn unindexed_lookup_of_family_fails_loudly() {
        let (store, mcg, _) = store();
        assert!(matches!(
            store.resolve(mcg, "system_mcgoutclk_clock", 0),
            Err(KeyError::Ambiguous(_))
        ));
        assert!(matches!(
            store.try_resolve(mcg, "system_mcgoutclk_clock", 0),
            Err(KeyError::Ambiguous(_))
        ));
    }

    #[test]
    fn plain_and_family_collision_is_ambiguous() {
        let (mut store, mcg, _) = store();
        store
            .declare_family(mcg, Variable::long("mcg_c1_frdiv[]", 0), 2)
            .unwrap();
        assert!(matches!(
            store.resolve(mcg, "mcg_c1_frdiv", 0),
            Err(KeyError::Ambiguous(_))
        ));
        assert!(store.resolve(mcg, "mcg_c1_frdiv[1]", 0).is_ok());
    }

    #[test]
    fn missing_keys() {
        let (store, mcg, _) = store();
        assert!(matches!(
            store.resolve(mcg, "mcg_c7_oscsel", 0),
            Err(KeyError::NotFound(_))
        ));
        assert_eq!(store.try_resolve(mcg, "mcg_c7_oscsel", 0), Ok(None));
        assert_eq!(store.try_resolve(mcg, "/RTC/rtc_cr_osce", 0), Ok(None));
        assert!(store.resolve(mcg, "system_mcgoutclk_clock[3]", 0).is_err());
    }

    #[test]
    fn duplicates_rejected() {
        let (mut store, mcg, _) = store();
        assert!(matches!(
            store.declare(mcg, Variable::long("mcg_c1_frdiv", 1)),
            Err(KeyError::Duplicate(_))
        ));
        assert!(store.add_peripheral("MCG").is_err());
        assert!(store.declare(mcg, Variable::long("x[2]", 1)).is_err());
    }

    #[test]
    fn view_enumerates_in_declaration_order() {
        let (store, mcg, _) = store();
        let view = PeripheralView::new(&store, mcg);
        let names: Vec<_> = view.variables().map(|(_, v)| v.name().to_owned()).collect();
        assert_eq!(
            names,
            [
                "mcg_c1_frdiv",
                "system_mcgoutclk_clock[0]",
                "system_mcgoutclk_clock[1]",
                "system_mcgoutclk_clock[2]"
            ]
        );
        assert!(view.get("mcg_c1_frdiv").is_ok());
        assert!(view.safe_get("nope").unwrap().is_none());
    }
}
