//! Typed value cells. A variable models one register field or one derived frequency, and carries
//! the status, enable/lock flags, bounds and provenance that validators read and write.
//!
//! The model is passive: setting a value never notifies anybody. Notification is the engine's
//! job (see [`Device`](crate::Device)).

use core::{fmt, str::FromStr};

use num_traits::ToPrimitive;
#[cfg(snapshot)]
use serde::{Deserialize, Serialize};

use crate::{engine::ValidatorId, notation};

/// Errors from typed access to a variable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum ValueError {
    /// The storage kind does not match the requested kind.
    #[error("type mismatch on `{variable}`: expected {expected}, got {actual}")]
    TypeMismatch {
        variable: String,
        expected: Kind,
        actual: Kind,
    },
    /// A choice variable was set to a value none of its entries carries.
    #[error("`{variable}` has no choice matching `{value}`")]
    NoSuchChoice { variable: String, value: String },
    /// Text could not be read as a number.
    #[error("illegal number: {0}")]
    NotANumber(String),
    /// A choice reference formula was malformed. Expected `key`, `key,/N` or `key,*N`.
    #[error("illegal clock reference: {0}")]
    BadReference(String),
}

/// Status severity, totally ordered from `Ok` to `Error`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(fmt, derive(defmt::Format))]
#[cfg_attr(snapshot, derive(Serialize, Deserialize))]
pub enum Severity {
    #[default]
    Ok,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn greater_than(self, other: Self) -> bool {
        self > other
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A message with a severity. OK and INFO statuses carry tooltip-style information, such as
/// the list of frequencies a divider can produce.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(fmt, derive(defmt::Format))]
#[cfg_attr(snapshot, derive(Serialize, Deserialize))]
pub struct Status {
    text: String,
    severity: Severity,
}

impl Status {
    pub fn new(text: impl Into<String>, severity: Severity) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn ok(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Ok)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Info)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Warning)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Severity::Error)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn greater_than(&self, severity: Severity) -> bool {
        self.severity > severity
    }

    /// The more severe of two optional statuses. On equal severity the first wins.
    pub fn worst(a: Option<Status>, b: Option<Status>) -> Option<Status> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.severity > a.severity { b } else { a }),
            (a, None) => a,
            (None, b) => b,
        }
    }

    /// Severity of an optional status, treating no status as OK.
    pub fn severity_of(status: Option<&Status>) -> Severity {
        status.map_or(Severity::Ok, |s| s.severity)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.text)
    }
}

/// Storage kind of a variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum Kind {
    Bool,
    Long,
    Double,
    Text,
    Choice,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Long => "long",
            Self::Double => "double",
            Self::Text => "text",
            Self::Choice => "choice",
        };
        f.write_str(name)
    }
}

/// A stored value. Choice values hold the index of the selected entry.
#[derive(Clone, Debug)]
#[cfg_attr(snapshot, derive(Serialize, Deserialize))]
pub enum Value {
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Choice(usize),
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Self::Bool(_) => Kind::Bool,
            Self::Long(_) => Kind::Long,
            Self::Double(_) => Kind::Double,
            Self::Text(_) => Kind::Text,
            Self::Choice(_) => Kind::Choice,
        }
    }
}

// NaN compares equal to itself here, otherwise a NaN-valued variable would report a change on
// every write and a pass could never settle.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits() || a == b,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Choice(a), Self::Choice(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Choice(v) => write!(f, "#{v}"),
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Long(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Long(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Scale factor applied to a referenced clock by a multiplexer entry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum Scale {
    #[default]
    Unity,
    Multiply(u32),
    Divide(u32),
}

impl Scale {
    pub fn apply(self, frequency: f64) -> f64 {
        match self {
            Self::Unity => frequency,
            Self::Multiply(n) => frequency * f64::from(n),
            Self::Divide(n) => frequency / f64::from(n),
        }
    }
}

impl fmt::Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unity => Ok(()),
            Self::Multiply(n) => write!(f, "*{n}"),
            Self::Divide(n) => write!(f, "/{n}"),
        }
    }
}

/// Clock source named by a multiplexer choice, eg `"system_mcgfllclk_clock,/2"`.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub struct ClockReference {
    pub key: String,
    pub scale: Scale,
}

impl FromStr for ClockReference {
    type Err = ValueError;

    fn from_str(formula: &str) -> Result<Self, Self::Err> {
        let bad = || ValueError::BadReference(formula.to_owned());
        let (key, scale) = match formula.split_once(',') {
            None => (formula.trim(), Scale::Unity),
            Some((key, factor)) => {
                let factor = factor.trim();
                let amount = |digits: &str| digits.trim().parse::<u32>().ok().filter(|n| *n > 0);
                let scale = if let Some(digits) = factor.strip_prefix('/') {
                    Scale::Divide(amount(digits).ok_or_else(bad)?)
                } else if let Some(digits) = factor.strip_prefix('*') {
                    Scale::Multiply(amount(digits).ok_or_else(bad)?)
                } else {
                    return Err(bad());
                };
                (key.trim(), scale)
            }
        };
        if key.is_empty() {
            return Err(bad());
        }
        Ok(Self {
            key: key.to_owned(),
            scale,
        })
    }
}

impl fmt::Display for ClockReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scale {
            Scale::Unity => f.write_str(&self.key),
            scale => write!(f, "{},{}", self.key, scale),
        }
    }
}

/// One entry of a choice variable.
#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceEntry {
    name: String,
    substitution: String,
    reference: Option<ClockReference>,
}

impl ChoiceEntry {
    /// `name` is the display text; `substitution` is the register encoding or enumeration name.
    pub fn new(name: impl Into<String>, substitution: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            substitution: substitution.into(),
            reference: None,
        }
    }

    /// Attach a clock reference formula, eg `"system_oscerclk_clock"` or `"osc_clock,/2"`.
    pub fn with_reference(mut self, formula: &str) -> Result<Self, ValueError> {
        self.reference = Some(formula.parse()?);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn substitution(&self) -> &str {
        &self.substitution
    }

    pub fn reference(&self) -> Option<&ClockReference> {
        self.reference.as_ref()
    }

    /// Register field value, when the substitution text is numeric.
    pub fn field_value(&self) -> Option<i64> {
        notation::parse_long(&self.substitution).ok()
    }
}

/// A named, typed value cell.
#[derive(Clone, Debug)]
pub struct Variable {
    name: String,
    description: String,
    units: &'static str,
    index: Option<usize>,
    value: Value,
    default: Value,
    min: Option<f64>,
    max: Option<f64>,
    offset: i64,
    status: Option<Status>,
    /// Set by a user edit that had to be clamped. Kept apart from the validator-owned status.
    range_status: Option<Status>,
    enabled: bool,
    locked: bool,
    origin: String,
    tool_tip: String,
    choices: Vec<ChoiceEntry>,
    listeners: Vec<ValidatorId>,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            units: "",
            index: None,
            default: value.clone(),
            value,
            min: None,
            max: None,
            offset: 0,
            status: None,
            range_status: None,
            enabled: true,
            locked: false,
            origin: String::new(),
            tool_tip: String::new(),
            choices: Vec::new(),
            listeners: Vec::new(),
        }
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::new(name, Value::Bool(value))
    }

    pub fn long(name: impl Into<String>, value: i64) -> Self {
        Self::new(name, Value::Long(value))
    }

    pub fn double(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Value::Double(value))
    }

    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(name, Value::Text(value.into()))
    }

    /// A choice variable with `selected` as its default entry. An out-of-range selection
    /// falls back to the first entry.
    pub fn choice(name: impl Into<String>, entries: Vec<ChoiceEntry>, selected: usize) -> Self {
        let selected = if selected < entries.len() { selected } else { 0 };
        let mut variable = Self::new(name, Value::Choice(selected));
        variable.choices = entries;
        variable
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_units(mut self, units: &'static str) -> Self {
        self.units = units;
        self
    }

    /// Numeric bounds. Any primitive number works; `None` from a failed conversion leaves the
    /// bound open.
    pub fn with_bounds(mut self, min: impl ToPrimitive, max: impl ToPrimitive) -> Self {
        self.min = min.to_f64();
        self.max = max.to_f64();
        self
    }

    pub fn with_min(mut self, min: impl ToPrimitive) -> Self {
        self.min = min.to_f64();
        self
    }

    pub fn with_max(mut self, max: impl ToPrimitive) -> Self {
        self.max = max.to_f64();
        self
    }

    /// Physical value of field encoding 0, eg 1 for a divide-by-(field + 1) divider.
    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    pub fn with_tool_tip(mut self, tool_tip: impl Into<String>) -> Self {
        self.tool_tip = tool_tip.into();
        self
    }

    /// Not user-editable. Validators may still write it.
    pub fn locked(mut self) -> Self {
        self.locked = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Copy used when expanding a `[]` family: renamed and stamped with its index.
    pub(crate) fn instance(&self, name: String, index: usize) -> Self {
        let mut copy = self.clone();
        copy.name = name;
        copy.index = Some(index);
        copy
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn units(&self) -> &'static str {
        self.units
    }

    /// Array index for members of an indexed family.
    pub fn index(&self) -> Option<usize> {
        self.index
    }

    pub fn kind(&self) -> Kind {
        self.value.kind()
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    fn mismatch(&self, expected: Kind) -> ValueError {
        ValueError::TypeMismatch {
            variable: self.name.clone(),
            expected,
            actual: self.kind(),
        }
    }

    fn no_such_choice(&self, value: impl fmt::Display) -> ValueError {
        ValueError::NoSuchChoice {
            variable: self.name.clone(),
            value: value.to_string(),
        }
    }

    fn read_bool(&self) -> Option<bool> {
        match &self.value {
            Value::Bool(v) => Some(*v),
            Value::Choice(_) => self.selected_choice()?.field_value().map(|v| v != 0),
            _ => None,
        }
    }

    fn read_long(&self) -> Option<i64> {
        match &self.value {
            Value::Long(v) => Some(*v),
            Value::Choice(i) => Some(self.selected_choice()?.field_value().unwrap_or(*i as i64)),
            _ => None,
        }
    }

    fn read_double(&self) -> Option<f64> {
        match &self.value {
            Value::Double(v) => Some(*v),
            Value::Long(_) | Value::Choice(_) => self.read_long().and_then(|v| v.to_f64()),
            _ => None,
        }
    }

    fn read_text(&self) -> Option<String> {
        match &self.value {
            Value::Text(v) => Some(v.clone()),
            _ => None,
        }
    }

    typed_access!(
        bool: bool => Bool,
        long: i64 => Long,
        double: f64 => Double,
        text: String => Text,
    );

    /// Index of the selected entry of a choice variable.
    pub fn as_choice_index(&self) -> Result<usize, ValueError> {
        match self.value {
            Value::Choice(i) => Ok(i),
            _ => Err(self.mismatch(Kind::Choice)),
        }
    }

    /// Write a value. Numeric kinds convert between each other (doubles round to the nearest
    /// integer); choices accept an entry index, a field value, or an entry name/substitution.
    /// Returns true when the stored value changed.
    pub fn set_value(&mut self, value: Value) -> Result<bool, ValueError> {
        let value = match (&self.value, value) {
            (Value::Bool(_), Value::Bool(v)) => Value::Bool(v),
            (Value::Long(_), Value::Long(v)) => Value::Long(v),
            (Value::Long(_), Value::Double(v)) => Value::Long(
                v.round()
                    .to_i64()
                    .ok_or_else(|| ValueError::NotANumber(v.to_string()))?,
            ),
            (Value::Long(_), Value::Bool(v)) => Value::Long(i64::from(v)),
            (Value::Double(_), Value::Double(v)) => Value::Double(v),
            (Value::Double(_), Value::Long(v)) => Value::Double(v as f64),
            (Value::Text(_), Value::Text(v)) => Value::Text(v),
            (Value::Choice(_), Value::Choice(i)) => {
                if i >= self.choices.len() {
                    return Err(self.no_such_choice(i));
                }
                Value::Choice(i)
            }
            (Value::Choice(_), Value::Long(v)) => Value::Choice(self.choice_by_field(v)?),
            (Value::Choice(_), Value::Bool(v)) => Value::Choice(self.choice_by_field(i64::from(v))?),
            (Value::Choice(_), Value::Text(v)) => {
                let found = self
                    .choices
                    .iter()
                    .position(|c| c.name == v || c.substitution == v);
                Value::Choice(found.ok_or_else(|| self.no_such_choice(&v))?)
            }
            (_, other) => {
                return Err(ValueError::TypeMismatch {
                    variable: self.name.clone(),
                    expected: self.kind(),
                    actual: other.kind(),
                });
            }
        };
        if value == self.value {
            return Ok(false);
        }
        self.value = value;
        Ok(true)
    }

    fn choice_by_field(&self, field: i64) -> Result<usize, ValueError> {
        self.choices
            .iter()
            .position(|c| c.field_value() == Some(field))
            .ok_or_else(|| self.no_such_choice(field))
    }

    /// Restore the default value.
    pub fn reset(&mut self) -> bool {
        if self.value == self.default {
            return false;
        }
        self.value = self.default.clone();
        true
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn set_min(&mut self, min: Option<f64>) -> bool {
        let changed = self.min != min;
        self.min = min;
        changed
    }

    pub fn set_max(&mut self, max: Option<f64>) -> bool {
        let changed = self.max != max;
        self.max = max;
        changed
    }

    /// Clamp a numeric value into `[min, max]`. A clamp leaves a WARNING range status behind,
    /// an in-range value clears it. Returns true when the value or range status changed.
    pub fn apply_bounds(&mut self) -> Result<bool, ValueError> {
        let Some(current) = self.read_double().filter(|_| self.kind() != Kind::Choice) else {
            return Ok(false);
        };
        let clamped = match (self.min, self.max) {
            (Some(min), _) if current < min => Some(min),
            (_, Some(max)) if current > max => Some(max),
            _ => None,
        };
        let Some(limit) = clamped else {
            return Ok(self.range_status.take().is_some());
        };
        let message = format!(
            "Value {} is outside [{}, {}] and was clamped",
            current,
            self.min.map_or_else(|| "-inf".to_owned(), |v| v.to_string()),
            self.max.map_or_else(|| "inf".to_owned(), |v| v.to_string()),
        );
        self.set_value(Value::Double(limit))?;
        self.range_status = Some(Status::warning(message));
        Ok(true)
    }

    pub(crate) fn clear_range_status(&mut self) -> bool {
        self.range_status.take().is_some()
    }

    /// Subtracted from the user value to give the register field encoding.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn set_offset(&mut self, offset: i64) -> bool {
        let changed = self.offset != offset;
        self.offset = offset;
        changed
    }

    /// Register field encoding of the value: user value minus offset for integers, 0/1 for
    /// booleans, the entry's field value for choices.
    pub fn field_value(&self) -> Result<i64, ValueError> {
        match &self.value {
            Value::Long(v) => Ok(v - self.offset),
            Value::Bool(v) => Ok(i64::from(*v)),
            Value::Choice(_) => self.as_long(),
            _ => Err(self.mismatch(Kind::Long)),
        }
    }

    /// Text emitted by code generation for this variable.
    pub fn substitution_value(&self) -> String {
        match &self.value {
            Value::Long(v) => (v - self.offset).to_string(),
            Value::Choice(_) => self
                .selected_choice()
                .map(|c| c.substitution.clone())
                .unwrap_or_default(),
            other => other.to_string(),
        }
    }

    /// Current status: the more severe of the validator-owned status and any range status.
    pub fn status(&self) -> Option<&Status> {
        match (&self.status, &self.range_status) {
            (Some(a), Some(b)) if b.severity > a.severity => Some(b),
            (Some(a), _) => Some(a),
            (None, b) => b.as_ref(),
        }
    }

    /// Status for UI purposes: OK and INFO collapse to `None`.
    pub fn filtered_status(&self) -> Option<&Status> {
        self.status().filter(|s| s.greater_than(Severity::Info))
    }

    pub fn set_status(&mut self, status: Option<Status>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        true
    }

    pub fn clear_status(&mut self) -> bool {
        self.set_status(None)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self, enabled: bool) -> bool {
        let changed = self.enabled != enabled;
        self.enabled = enabled;
        changed
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn set_locked(&mut self, locked: bool) -> bool {
        let changed = self.locked != locked;
        self.locked = locked;
        changed
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn set_origin(&mut self, origin: impl Into<String>) -> bool {
        let origin = origin.into();
        if self.origin == origin {
            return false;
        }
        self.origin = origin;
        true
    }

    pub fn tool_tip(&self) -> &str {
        &self.tool_tip
    }

    pub fn set_tool_tip(&mut self, tool_tip: impl Into<String>) -> bool {
        let tool_tip = tool_tip.into();
        if self.tool_tip == tool_tip {
            return false;
        }
        self.tool_tip = tool_tip;
        true
    }

    pub fn choices(&self) -> &[ChoiceEntry] {
        &self.choices
    }

    pub fn selected_choice(&self) -> Option<&ChoiceEntry> {
        match self.value {
            Value::Choice(i) => self.choices.get(i),
            _ => None,
        }
    }

    /// Validators notified when this variable changes, in registration order.
    pub fn listeners(&self) -> &[ValidatorId] {
        &self.listeners
    }

    pub(crate) fn add_listener(&mut self, validator: ValidatorId) {
        if !self.listeners.contains(&validator) {
            self.listeners.push(validator);
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.selected_choice() {
            Some(choice) => write!(f, "{} = {}", self.name, choice.name),
            None => write!(f, "{} = {}{}", self.name, self.value, self.units),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> Variable {
        Variable::choice(
            "sim_sopt2_pllfllsel",
            vec![
                ChoiceEntry::new("FLL clock", "0")
                    .with_reference("system_mcgfllclk_clock")
                    .unwrap(),
                ChoiceEntry::new("PLL clock", "1")
                    .with_reference("system_mcgpllclk_clock,/2")
                    .unwrap(),
                ChoiceEntry::new("IRC48M", "0b11").with_reference("/MCG/irc48m,*1").unwrap(),
            ],
            0,
        )
    }

    #[test]
    fn typed_access_rejects_other_kinds() {
        let v = Variable::long("mcg_c1_frdiv", 3);
        assert_eq!(v.as_long(), Ok(3));
        assert_eq!(v.as_double(), Ok(3.0));
        assert!(matches!(
            v.as_bool(),
            Err(ValueError::TypeMismatch {
                expected: Kind::Bool,
                actual: Kind::Long,
                ..
            })
        ));
        assert!(v.as_text().is_err());

        let mut t = Variable::text("ClockConfig", "default");
        assert!(t.set_long(3).is_err());
        assert_eq!(t.set_text("fast".to_owned()), Ok(true));
        assert_eq!(t.set_text("fast".to_owned()), Ok(false));
    }

    #[test]
    fn numeric_writes_convert() {
        let mut v = Variable::long("system_core_clock", 0);
        assert_eq!(v.set_double(23_999_999.6), Ok(true));
        assert_eq!(v.as_long(), Ok(24_000_000));

        let mut d = Variable::double("pdb_period", 0.0);
        assert_eq!(d.set_long(2), Ok(true));
        assert_eq!(d.as_double(), Ok(2.0));
    }

    #[test]
    fn nan_writes_settle() {
        let mut d = Variable::double("rtc_1hz_clock", f64::NAN);
        assert_eq!(d.set_double(f64::NAN), Ok(false));
    }

    #[test]
    fn choices_select_by_field_and_name() {
        let mut v = selector();
        assert_eq!(v.as_long(), Ok(0));
        assert_eq!(v.set_long(3), Ok(true));
        assert_eq!(v.as_choice_index(), Ok(2));
        assert_eq!(v.substitution_value(), "0b11");
        assert_eq!(v.set_text("PLL clock".to_owned()), Ok(true));
        assert_eq!(v.as_long(), Ok(1));
        assert!(v.as_bool().unwrap());
        assert!(matches!(v.set_long(7), Err(ValueError::NoSuchChoice { .. })));
    }

    #[test]
    fn reference_formulas() {
        let r: ClockReference = "system_mcgpllclk_clock,/2".parse().unwrap();
        assert_eq!(r.scale, Scale::Divide(2));
        assert_eq!(r.scale.apply(96e6), 48e6);
        assert_eq!(r.to_string(), "system_mcgpllclk_clock,/2");

        let r: ClockReference = "osc_clock , *4".parse().unwrap();
        assert_eq!(r.key, "osc_clock");
        assert_eq!(r.scale, Scale::Multiply(4));

        assert!("osc_clock,%2".parse::<ClockReference>().is_err());
        assert!("osc_clock,/0".parse::<ClockReference>().is_err());
        assert!(",/2".parse::<ClockReference>().is_err());
    }

    #[test]
    fn filtered_status_hides_ok_and_info() {
        let mut v = Variable::long("system_bus_clock", 24_000_000);
        v.set_status(Some(Status::info("Possible values: 24.0MHz")));
        assert!(v.status().is_some());
        assert!(v.filtered_status().is_none());
        v.set_status(Some(Status::warning("rounded")));
        assert_eq!(v.filtered_status().map(Status::severity), Some(Severity::Warning));
    }

    #[test]
    fn bounds_clamp_and_report() {
        let mut v = Variable::long("ftm_mod", 10).with_bounds(0, 65535);
        v.set_long(70_000).unwrap();
        assert_eq!(v.apply_bounds(), Ok(true));
        assert_eq!(v.as_long(), Ok(65535));
        assert_eq!(v.status().map(Status::severity), Some(Severity::Warning));

        v.set_long(100).unwrap();
        assert_eq!(v.apply_bounds(), Ok(true));
        assert!(v.status().is_none());
    }

    #[test]
    fn unrepresentable_bound_is_an_error() {
        let mut v = Variable::long("pit_ldval", 0).with_min(1e300);
        assert!(matches!(v.apply_bounds(), Err(ValueError::NotANumber(_))));
        assert_eq!(v.as_long(), Ok(0));
        assert!(v.status().is_none());
    }

    #[test]
    fn offset_maps_to_field_encoding() {
        let v = Variable::long("sim_clkdiv1_outdiv1", 2).with_offset(1);
        assert_eq!(v.field_value(), Ok(1));
        assert_eq!(v.substitution_value(), "1");
    }

    #[test]
    fn severities_are_ordered() {
        assert!(Severity::Error.greater_than(Severity::Warning));
        assert!(Severity::Warning > Severity::Info && Severity::Info > Severity::Ok);
        let worst = Status::worst(Some(Status::info("a")), Some(Status::error("b")));
        assert_eq!(worst.map(|s| s.severity()), Some(Severity::Error));
    }
}
