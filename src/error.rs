//! Common error definitions.
//!
//! Only configuration problems are errors: a key a validator asserts must exist, a typed access of
//! the wrong kind, two validators writing one variable, or a pass that fails to settle. Range
//! problems and unsatisfiable divider chains are reported as [`Status`](crate::Status) on the
//! affected variables instead.

use crate::{engine::PropagationError, namespace::KeyError, variable::ValueError};

macro_rules! impl_from_error {
    ($error:ident) => {
        impl From<$error> for Error {
            fn from(error: $error) -> Self {
                Self::$error(error)
            }
        }
    };
}

/// Alias for Result<T, Error>.
pub type Result<T> = core::result::Result<T, Error>;

/// Collection of all errors that can occur.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[cfg_attr(fmt, derive(defmt::Format))]
pub enum Error {
    /// A typed access or write did not match the variable's storage.
    #[error(transparent)]
    ValueError(ValueError),
    /// Key resolution failed. Usually a template bug.
    #[error(transparent)]
    KeyError(KeyError),
    /// The propagation engine aborted the pass.
    #[error(transparent)]
    PropagationError(PropagationError),
}

impl_from_error!(ValueError);
impl_from_error!(KeyError);
impl_from_error!(PropagationError);

impl Error {
    /// True for errors caused by a missing variable, as opposed to a malformed graph.
    pub fn is_missing_variable(&self) -> bool {
        matches!(self, Self::KeyError(KeyError::NotFound(_)))
    }
}
