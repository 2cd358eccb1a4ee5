//! Typed errors for handler units.

use thiserror::Error;

/// A source location did not describe a well-formed handler unit.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ValidationError {
    /// One or more required properties are absent or empty.
    #[error("missing required field(s): {}", .missing.join(", "))]
    MissingFields {
        /// Names of the missing properties, in declaration order.
        missing: Vec<&'static str>,
    },

    /// A property is present but unusable.
    #[error("invalid field `{field}`: {reason}")]
    InvalidField {
        /// Property name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// A handler failed while executing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecuteError {
    /// The handler body raised an error.
    #[error("handler raised: {0}")]
    Raised(String),

    /// Arguments or return value could not be converted.
    #[error("value conversion failed: {0}")]
    Conversion(String),

    /// The runtime context was torn down before the handler ran.
    #[error("host runtime is no longer available")]
    HostGone,
}
