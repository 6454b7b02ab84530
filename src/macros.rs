//! This module contains internal syntax helpers used to generate the repetitive typed accessors
//! of variables and validation contexts.

/// Generates the typed read and write accessors of [`Variable`](crate::Variable). Each entry
/// expands to an `as_<name>` reader backed by a `read_<name>` helper, and a `set_<name>` writer.
///
/// Example: `typed_access!(long: i64 => Long, double: f64 => Double);`
macro_rules! typed_access {
    ($($name:ident: $ty:ty => $kind:ident),+ $(,)?) => {
        paste::paste! {
            $(
                /// Typed read. Fails with `TypeMismatch` when the storage is of another kind.
                pub fn [<as_ $name>](&self) -> Result<$ty, ValueError> {
                    self.[<read_ $name>]().ok_or_else(|| self.mismatch(Kind::$kind))
                }

                /// Typed write. Returns true when the stored value changed.
                pub fn [<set_ $name>](&mut self, value: $ty) -> Result<bool, ValueError> {
                    self.set_value(Value::from(value))
                }
            )+
        }
    };
}

/// Generates handle-based typed reads on a context type that holds a `store` field.
///
/// Example: `context_reads!(long: i64, double: f64);` gives `ctx.long(id)` and `ctx.double(id)`.
macro_rules! context_reads {
    ($($name:ident: $ty:ty),+ $(,)?) => {
        paste::paste! {
            $(
                /// Typed read of a resolved variable.
                pub fn $name(&self, id: VarId) -> $crate::Result<$ty> {
                    Ok(self.store.get(id).[<as_ $name>]()?)
                }
            )+
        }
    };
}

/// Syntax helper for declaring a run of plain clock-frequency variables on one peripheral.
///
/// Example: `declare_clocks!(device, mcg, ["system_slow_irc_clock", "system_fast_irc_clock"]);`
macro_rules! declare_clocks {
    ($device:expr, $peripheral:expr, [$($name:literal),+ $(,)?]) => {
        $(
            $device.declare($peripheral, $crate::Variable::long($name, 0).with_units("Hz").locked())?;
        )+
    };
}

/// Indexed flavour of `declare_clocks!`: each name ends in `[]` and is expanded over the
/// configuration dimension.
macro_rules! declare_clock_families {
    ($device:expr, $peripheral:expr, $dimension:expr, [$($name:literal),+ $(,)?]) => {
        $(
            $device.declare_family(
                $peripheral,
                $crate::Variable::long($name, 0).with_units("Hz").locked(),
                $dimension,
            )?;
        )+
    };
}
